//! Basic TCP Transport
//!
//! Newline-delimited packet stream used to talk to a remote-control bridge.

use crate::{Packet, ProtocolError, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, error};

/// Default timeout for connect and request/response operations
pub const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum packet size (64KB)
const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Packet connection to a bridge
pub struct TcpConnection {
    reader: PacketReader,
    writer: PacketWriter,
}

impl TcpConnection {
    /// Connect to `host:port`, bounded by `connect_timeout`
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let target = format!("{}:{}", host, port);
        debug!("Connecting to {}", target);

        let stream = timeout(connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connecting to {}", target)))?
            .map_err(|e| ProtocolError::from_io_error(e, &format!("connecting to {}", target)))?;

        let remote_addr = stream.peer_addr()?;
        debug!("Connected to {}", remote_addr);

        Ok(Self::from_stream(stream, remote_addr))
    }

    /// Create from an existing TcpStream
    pub fn from_stream(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: PacketReader {
                reader: BufReader::new(read_half),
                remote_addr,
            },
            writer: PacketWriter {
                writer: write_half,
                remote_addr,
            },
        }
    }

    /// Send a packet
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.writer.send_packet(packet).await
    }

    /// Receive a packet; `Ok(None)` on clean end of stream
    pub async fn receive_packet(&mut self) -> Result<Option<Packet>> {
        self.reader.receive_packet().await
    }

    /// Send `packet` and wait for the next packet, bounded by [`TCP_TIMEOUT`]
    pub async fn request(&mut self, packet: &Packet) -> Result<Packet> {
        self.send_packet(packet).await?;

        let remote_addr = self.remote_addr();
        timeout(TCP_TIMEOUT, self.receive_packet())
            .await
            .map_err(|_| ProtocolError::Timeout(format!("waiting for reply from {}", remote_addr)))??
            .ok_or_else(|| {
                ProtocolError::NetworkError(format!("{} closed the connection", remote_addr))
            })
    }

    /// Get remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.reader.remote_addr
    }

    /// Split into independently owned read and write halves
    pub fn into_split(self) -> (PacketReader, PacketWriter) {
        (self.reader, self.writer)
    }

    /// Close the connection
    pub async fn close(self) -> Result<()> {
        self.writer.close().await
    }
}

/// Read half of a [`TcpConnection`]
pub struct PacketReader {
    reader: BufReader<OwnedReadHalf>,
    remote_addr: SocketAddr,
}

impl PacketReader {
    /// Receive a packet; `Ok(None)` on clean end of stream
    pub async fn receive_packet(&mut self) -> Result<Option<Packet>> {
        let mut line = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_PACKET_SIZE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| ProtocolError::from_io_error(e, "reading packet"))?;

        if read == 0 {
            debug!("{} closed the stream", self.remote_addr);
            return Ok(None);
        }

        if line.len() > MAX_PACKET_SIZE {
            error!("Packet too large from {}: {} bytes", self.remote_addr, line.len());
            return Err(ProtocolError::InvalidPacket(format!(
                "Packet too large: more than {} bytes",
                MAX_PACKET_SIZE
            )));
        }

        let packet = Packet::from_bytes(&line)?;
        debug!(
            "Received packet type '{}' from {}",
            packet.packet_type, self.remote_addr
        );
        Ok(Some(packet))
    }
}

/// Write half of a [`TcpConnection`]
pub struct PacketWriter {
    writer: OwnedWriteHalf,
    remote_addr: SocketAddr,
}

impl PacketWriter {
    /// Send a packet
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_bytes()?;

        debug!(
            "Sending packet '{}' ({} bytes) to {}",
            packet.packet_type,
            bytes.len(),
            self.remote_addr
        );

        self.writer
            .write_all(&bytes)
            .await
            .map_err(|e| ProtocolError::from_io_error(e, "sending packet"))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ProtocolError::from_io_error(e, "sending packet"))?;
        Ok(())
    }

    /// Shut down the write side
    pub async fn close(mut self) -> Result<()> {
        debug!("Closing connection to {}", self.remote_addr);
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connection_request_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, remote_addr) = listener.accept().await.unwrap();
            let mut conn = TcpConnection::from_stream(stream, remote_addr);

            let packet = conn.receive_packet().await.unwrap().unwrap();
            assert_eq!(packet.packet_type, "test.packet");

            let response = Packet::new("test.response", json!({"status": "ok"}));
            conn.send_packet(&response).await.unwrap();
        });

        let mut client = TcpConnection::connect("127.0.0.1", addr.port(), TCP_TIMEOUT)
            .await
            .unwrap();
        let reply = client
            .request(&Packet::new("test.packet", json!({"data": "hello"})))
            .await
            .unwrap();
        assert_eq!(reply.packet_type, "test.response");

        client.close().await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut client = TcpConnection::connect("127.0.0.1", addr.port(), TCP_TIMEOUT)
            .await
            .unwrap();
        server_task.await.unwrap();
        assert!(client.receive_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnection::connect("127.0.0.1", port, TCP_TIMEOUT).await;
        assert!(result.is_err());
    }
}
