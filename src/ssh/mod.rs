//! SSH connection strings and client command lines.
//!
//! ## Modules
//!
//! - [`spec`] - `[user[:pass]@]host[:port]` parsing and validation
//! - [`command`] - rendering a spec into ssh client arguments

pub mod command;
pub mod spec;

pub use command::{CommandBuilder, CommandLine, Token};
pub use spec::{parse, parse_target, DialSpec, Target, DEFAULT_SSH_PORT};
