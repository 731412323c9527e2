//! Connectivity through an ssh jump host.
//!
//! This module drives the system `ssh` client as a subprocess and exposes its
//! stdio as a byte stream to the forwarded target.

pub mod process;
pub mod ssh;
pub mod stream;

pub use process::{ExitStatus, ProcessControl, ProcessHandle, Spawner, TokioSpawner};
pub use ssh::{PendingConnection, SshProcessConnector};
pub use stream::TunnelStream;
