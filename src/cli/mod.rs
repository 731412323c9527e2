mod relay;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectorConfig;
use crate::connector::SshProcessConnector;
use crate::ssh::spec::parse_target;

#[derive(Parser)]
#[command(name = "ssh-hop")]
#[command(version)]
#[command(about = "Reach TCP endpoints through an SSH jump host")]
#[command(long_about = "Runs the system ssh client with -W host:port and relays stdin/stdout over it.\n\nJump hosts are given as [user[:pass]@]host[:port].")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: <config dir>/ssh-hop/config.yaml)
    #[arg(short, long, global = true, env = "SSH_HOP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to TARGET through VIA and relay stdin/stdout
    Connect {
        /// Jump host, e.g. alice@bastion.example.com:2222
        via: String,

        /// Endpoint to reach from the jump host, e.g. db.internal:5432
        target: String,
    },

    /// Print the ssh command that would be run (passwords masked)
    Command {
        /// Jump host
        via: String,

        /// Optional endpoint to include as forwarding directive
        target: Option<String>,
    },

    /// Check that the required client programs are installed
    Check {
        /// Jump host
        via: String,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        let config = match &self.config {
            Some(path) => ConnectorConfig::load_from(path)?,
            None => ConnectorConfig::load()?,
        };

        match self.command {
            Commands::Connect { via, target } => {
                let connector = SshProcessConnector::with_config(&via, &config)?;
                if !connector.is_available() {
                    tracing::warn!("ssh client not found in PATH, spawning will likely fail");
                }

                let cancel = CancellationToken::new();
                let ctrl_c = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        ctrl_c.cancel();
                    }
                });

                let stream = connector
                    .connect_with_cancel(&target, &cancel)
                    .await
                    .with_context(|| format!("Failed to reach {} via {}", target, connector.spec()))?;

                relay::stdio(stream, &cancel).await
            }
            Commands::Command { via, target } => {
                let connector = SshProcessConnector::with_config(&via, &config)?;
                let command = match target {
                    Some(target) => connector.command().with_forwarding(&parse_target(&target)?),
                    None => connector.command().clone(),
                };
                println!("{}", command.redacted());
                Ok(())
            }
            Commands::Check { via } => {
                let connector = SshProcessConnector::with_config(&via, &config)?;
                let missing = connector.missing_programs();
                if missing.is_empty() {
                    println!("ok: {}", connector.command().program().unwrap_or_default());
                    Ok(())
                } else {
                    anyhow::bail!("Required client programs not found: {}", missing.join(", "))
                }
            }
        }
    }
}
