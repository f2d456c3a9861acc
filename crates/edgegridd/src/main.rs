//! edgegridd: the EdgeGrid daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Node registry + staleness sweeper
//! - Assignment manager
//! - Deployment orchestrator
//! - Metrics retention
//! - REST API + agent endpoints
//!
//! It can also run a simulated edge node for local testing.
//!
//! # Usage
//!
//! ```text
//! edgegridd serve --config /etc/edgegrid/edgegridd.toml
//! edgegridd check-config --config /etc/edgegrid/edgegridd.toml
//! edgegridd default-config > /etc/edgegrid/edgegridd.toml
//! edgegridd render-config --config /etc/edgegrid/edgegridd.toml
//! edgegridd node-sim --orchestrator 127.0.0.1:8443 --listen 127.0.0.1:7000
//! ```

mod config;
mod control_plane;
mod node_sim;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{DaemonConfig, LogConfig, LogFormat};

#[derive(Parser)]
#[command(name = "edgegridd", about = "EdgeGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Path to edgegridd.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `server.listen`.
        #[arg(long)]
        listen: Option<String>,

        /// Override `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Parse and validate a config file, then exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print a config file with every default filled in.
    DefaultConfig,
    /// Print the tunnel config document and its version.
    RenderConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a simulated edge node that registers with an orchestrator.
    NodeSim {
        /// Orchestrator API address (`host:port`).
        #[arg(long, default_value = "127.0.0.1:8443")]
        orchestrator: String,

        /// Address the node's command endpoint binds to.
        #[arg(long, default_value = "127.0.0.1:7000")]
        listen: String,

        /// Host advertised to the orchestrator. Defaults to the listen host.
        #[arg(long)]
        advertise_host: Option<String>,

        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .with_context(|| format!("invalid log filter {:?}", log.filter))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            listen,
            data_dir,
        } => {
            let mut config = DaemonConfig::load(config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            init_tracing(&config.log)?;
            config.validate()?;
            control_plane::run(config).await
        }
        Command::CheckConfig { config: path } => {
            let config = DaemonConfig::from_file(&path)?;
            config.validate()?;
            println!("{}: ok", path.display());
            Ok(())
        }
        Command::DefaultConfig => {
            print!("{}", DaemonConfig::default().to_toml_string()?);
            Ok(())
        }
        Command::RenderConfig { config } => {
            let config = DaemonConfig::load(config.as_deref())?;
            let (version, document) = config.tunnel.materialize()?;
            println!("# version {version}");
            println!("{document}");
            Ok(())
        }
        Command::NodeSim {
            orchestrator,
            listen,
            advertise_host,
            name,
        } => {
            init_tracing(&LogConfig::default())?;
            node_sim::run(orchestrator, listen, advertise_host, name).await
        }
    }
}
