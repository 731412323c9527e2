use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HopError, Result};
use crate::ssh::command::{CommandBuilder, SSHPASS_PROGRAM, SSH_PROGRAM};
use crate::utils::parse_duration;

/// Environment variable overriding `grace_interval`.
pub const GRACE_ENV: &str = "SSH_HOP_GRACE";

/// Environment variable overriding `connect_timeout`.
pub const TIMEOUT_ENV: &str = "SSH_HOP_TIMEOUT";

const MAX_VERBOSITY: u8 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    #[serde(default = "default_sshpass_program")]
    pub sshpass_program: String,
    /// Number of `-v` flags passed to ssh.
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    /// Extra `-o` options, e.g. `ServerAliveInterval=15`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_options: Vec<String>,
    /// How long the client must stay alive before the tunnel counts as up.
    /// `off` waits for `ready_marker` instead.
    #[serde(default = "default_grace_interval")]
    pub grace_interval: String,
    /// Upper bound for the whole handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    /// Optional stderr substring that marks the tunnel as up before the grace interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_marker: Option<String>,
}

fn default_ssh_program() -> String {
    SSH_PROGRAM.to_string()
}

fn default_sshpass_program() -> String {
    SSHPASS_PROGRAM.to_string()
}

fn default_verbosity() -> u8 {
    2
}

fn default_grace_interval() -> String {
    "1s".to_string()
}

fn default_connect_timeout() -> String {
    "30s".to_string()
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            ssh_program: default_ssh_program(),
            sshpass_program: default_sshpass_program(),
            verbosity: default_verbosity(),
            ssh_options: Vec::new(),
            grace_interval: default_grace_interval(),
            connect_timeout: default_connect_timeout(),
            ready_marker: None,
        }
    }
}

impl ConnectorConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| HopError::Config("Could not determine config directory".to_string()))?;
        Ok(base.join("ssh-hop"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// Load the user config, falling back to defaults when there is none.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            Self::read(&path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load an explicitly named config file. The file must exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(&path.as_ref().to_string_lossy()).as_ref());

        if !path.exists() {
            return Err(HopError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let mut config = Self::read(&path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| HopError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    fn apply_env(&mut self) {
        if let Ok(grace) = std::env::var(GRACE_ENV) {
            self.grace_interval = grace;
        }
        if let Ok(timeout) = std::env::var(TIMEOUT_ENV) {
            self.connect_timeout = timeout;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.ssh_program.trim().is_empty() || self.sshpass_program.trim().is_empty() {
            return Err(HopError::Config(
                "ssh_program and sshpass_program must not be empty".to_string(),
            ));
        }

        if self.verbosity > MAX_VERBOSITY {
            return Err(HopError::Config(format!(
                "Invalid verbosity {}. Use 0 to {}",
                self.verbosity, MAX_VERBOSITY
            )));
        }

        for option in &self.ssh_options {
            if option.trim().is_empty() || option.starts_with('-') {
                return Err(HopError::Config(format!(
                    "Invalid ssh option '{}'. Use the form Key=Value",
                    option
                )));
            }
        }

        let timeout = match parse_duration(&self.connect_timeout) {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => {
                return Err(HopError::Config(format!(
                    "Invalid connect_timeout '{}'. Use a non-zero value like '30s'",
                    self.connect_timeout
                )))
            }
        };

        if is_off(&self.grace_interval) {
            if self.ready_marker.is_none() {
                return Err(HopError::Config(
                    "grace_interval 'off' requires a ready_marker".to_string(),
                ));
            }
        } else {
            match parse_duration(&self.grace_interval) {
                None => {
                    return Err(HopError::Config(format!(
                        "Invalid grace_interval '{}'. Use format like '500ms', '2s', '1m' or 'off'",
                        self.grace_interval
                    )))
                }
                // the deadline would always fire first
                Some(grace) if grace >= timeout => {
                    return Err(HopError::Config(format!(
                        "grace_interval '{}' must be shorter than connect_timeout '{}'",
                        self.grace_interval, self.connect_timeout
                    )))
                }
                Some(_) => {}
            }
        }

        if matches!(&self.ready_marker, Some(marker) if marker.is_empty()) {
            return Err(HopError::Config("ready_marker must not be empty".to_string()));
        }

        Ok(())
    }

    /// `None` when the grace interval is switched off.
    pub fn grace_interval(&self) -> Option<Duration> {
        if is_off(&self.grace_interval) {
            return None;
        }
        Some(parse_duration(&self.grace_interval).unwrap_or(Duration::from_secs(1)))
    }

    pub fn connect_timeout(&self) -> Duration {
        parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn verbosity_flags(&self) -> Vec<String> {
        match self.verbosity {
            0 => Vec::new(),
            n => vec![format!("-{}", "v".repeat(n as usize))],
        }
    }

    /// Command builder carrying this config's programs and options.
    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder::new()
            .ssh_program(shellexpand::tilde(&self.ssh_program).into_owned())
            .sshpass_program(shellexpand::tilde(&self.sshpass_program).into_owned())
            .verbosity_flags(self.verbosity_flags())
            .extra_options(self.ssh_options.iter().cloned())
    }
}

fn is_off(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "off" | "none")
}
