mod cli;
mod config;
mod entries;
mod host;
mod onboarding;

use anyhow::{anyhow, bail, Context, Result};
use atv_remote_protocol::{
    BridgeTransportFactory, PairingFlow, SessionSnapshot, StateCallback, TransportFactory,
};
use clap::Parser;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use cli::{Cli, Command};
use config::Config;
use entries::{EntryStore, ENTRY_TITLE};
use host::{Host, RemoteEntity};
use onboarding::Prompt;

/// Main daemon state
struct Daemon {
    /// Configuration
    config: Config,

    /// Creates transports for pairing and control sessions
    factory: Arc<dyn TransportFactory>,

    /// Stored config entries
    store: EntryStore,
}

impl Daemon {
    /// Create a new daemon
    fn new(config: Config, simulate: bool) -> Result<Self> {
        config
            .ensure_directories()
            .context("Failed to create directories")?;

        let factory: Arc<dyn TransportFactory> = if simulate {
            let simulator = &config.simulator;
            info!(
                "Simulated TV at {} accepts pairing code {}",
                simulator.address, simulator.code
            );
            Arc::new(simulator.device())
        } else {
            Arc::new(BridgeTransportFactory::new(config.bridge_config()))
        };

        let store = EntryStore::load(config.entries_path()).context("Failed to load entries")?;
        info!(
            "Loaded {} entries from {}",
            store.entries().len(),
            store.path().display()
        );

        Ok(Self {
            config,
            factory,
            store,
        })
    }

    fn host(&self) -> Host {
        Host::new(self.factory.clone(), self.config.session_config())
    }

    /// Pair a device and store it
    async fn pair(&mut self, address: Option<String>) -> Result<()> {
        let mut flow = PairingFlow::new(
            self.factory.clone(),
            Arc::new(self.store.clone()),
            self.config.pairing_config(),
        );
        let mut prompt = Prompt::new(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        );

        let Some(paired) = onboarding::run(&mut flow, &mut prompt, address).await? else {
            return Ok(());
        };

        let entry = self.store.add(ENTRY_TITLE, paired.record())?;
        println!("Created entry {}", entry.entry_id);
        Ok(())
    }

    /// Print stored entries
    fn list(&self) {
        if self.store.entries().is_empty() {
            println!("No paired devices");
            return;
        }

        for entry in self.store.entries() {
            println!(
                "{}  {}  {}  {}  {}",
                entry.entry_id,
                entry.title,
                entry.data.host,
                entry.data.unique_id,
                entry.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    /// Remove a stored entry
    fn remove(&mut self, id: &str) -> Result<()> {
        let entry_id = self.resolve(id)?;
        self.store.remove(&entry_id)?;
        println!("Removed entry {}", entry_id);
        Ok(())
    }

    /// Send one batch to a paired device
    async fn send(&self, id: &str, hold: Option<f64>, commands: Vec<String>) -> Result<()> {
        let entry_id = self.resolve(id)?;
        let entry = self
            .store
            .get(&entry_id)
            .ok_or_else(|| anyhow!("No entry {}", entry_id))?;

        let mut host = self.host();
        let session = host.setup_entry(entry).await;
        let result = if session.connection_state().is_connected() {
            let entity = host
                .entity(&entry_id)
                .ok_or_else(|| anyhow!("Entry {} not loaded", entry_id))?;
            entity
                .send_command(&commands, hold)
                .await
                .map_err(|e| anyhow!(e.user_message()))
        } else {
            let reason = session
                .snapshot()
                .last_error
                .unwrap_or_else(|| "device not reachable".to_string());
            Err(anyhow!("Cannot reach {}: {}", entry.data.host, reason))
        };
        host.unload_entry(&entry_id).await;

        let report = result?;
        println!(
            "Sent {}{}",
            report.executed.join(" "),
            if report.held { " (held)" } else { "" }
        );
        Ok(())
    }

    /// Keep every paired device connected until interrupted
    async fn run(&self) -> Result<()> {
        if self.store.entries().is_empty() {
            warn!("No paired devices; run `atv-remote pair` first");
        }

        let mut host = self.host();
        let mut entities = Vec::new();
        for entry in self.store.entries() {
            host.setup_entry(entry).await;
            let Some(entity) = host.entity(&entry.entry_id) else {
                continue;
            };

            let title = entity.device_info().name;
            let callback: StateCallback = Arc::new(move |snapshot: &SessionSnapshot| {
                info!(
                    "{}: {} ({})",
                    title,
                    snapshot.activity_or_unknown(),
                    snapshot.connection
                );
            });
            entity.added(callback).await;
            if !entity.available() {
                info!("{} not reachable yet", entity.device_info().name);
            }
            entities.push(entity);
        }

        info!("Remote daemon running with {} devices", host.entry_ids().len());

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;

        info!("Shutting down remote daemon...");
        join_all(entities.iter().map(RemoteEntity::will_remove)).await;
        host.unload_all().await;
        Ok(())
    }

    fn resolve(&self, id: &str) -> Result<String> {
        match self.store.find(id) {
            Some(entry) => Ok(entry.entry_id.clone()),
            None => bail!("No entry matches '{}'", id),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_logging(&cli)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let mut daemon = Daemon::new(config, cli.simulate).context("Failed to create daemon")?;

    match cli.command {
        Command::Pair { address } => daemon.pair(address).await,
        Command::List => {
            daemon.list();
            Ok(())
        }
        Command::Remove { entry_id } => daemon.remove(&entry_id),
        Command::Send {
            entry_id,
            hold,
            commands,
        } => daemon.send(&entry_id, hold, commands).await,
        Command::Run => daemon.run().await,
    }
}
