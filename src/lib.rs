//! Reach TCP endpoints through an SSH jump host.
//!
//! `ssh-hop` spawns the system `ssh` client (behind `sshpass` when the jump
//! host spec carries a password) with `-W host:port` and hands back the
//! child's stdin/stdout as a [`TunnelStream`].
//!
//! ```no_run
//! # async fn demo() -> ssh_hop::Result<()> {
//! use ssh_hop::SshProcessConnector;
//! use tokio::io::AsyncWriteExt;
//!
//! let connector = SshProcessConnector::new("alice@bastion.example.com")?;
//! let mut stream = connector.connect("db.internal:5432").await?;
//! stream.write_all(b"hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod ssh;
pub mod utils;

pub use config::ConnectorConfig;
pub use connector::{PendingConnection, SshProcessConnector, TunnelStream};
pub use error::{HopError, Result, SpecErrorReason};
