//! Connections tunneled through an ssh client process.
//!
//! Each [`SshProcessConnector::connect`] call spawns `ssh ... -W host:port`
//! and supervises it through a short handshake window:
//!
//! ```text
//! Idle -> AwaitingHandshake -> Established -> Closed
//!                           \-> Failed | Cancelled | TimedOut
//! ```
//!
//! ssh offers no explicit "forwarding is ready" signal on stdio, so a client
//! that is still alive once the grace interval has passed counts as
//! established. A configured ready marker seen on stderr ends the window early.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ConnectorConfig;
use crate::connector::process::{
    shutdown, BoxedReader, ExitStatus, ProcessControl, Spawner, TokioSpawner,
};
use crate::connector::stream::{TunnelStream, REAP_GRACE};
use crate::error::{HopError, Result};
use crate::ssh::command::CommandLine;
use crate::ssh::spec::{self, DialSpec, Target};
use crate::utils::truncate;

/// How long to keep collecting stderr after ssh exited during the handshake.
const DIAGNOSTIC_DRAIN: Duration = Duration::from_millis(200);

/// Longest stderr line echoed into trace logs.
const MAX_LOGGED_LINE: usize = 200;

/// Handshake timing and readiness settings.
#[derive(Debug, Clone)]
struct Handshake {
    grace: Option<Duration>,
    timeout: Duration,
    ready_marker: Option<String>,
}

/// Opens connections to targets through an ssh jump host.
///
/// The jump host spec is parsed and rendered once; every connect only adds
/// the forwarding directive. The connector holds no per-connection state and
/// can be cloned and shared freely.
#[derive(Clone)]
pub struct SshProcessConnector {
    spec: DialSpec,
    command: CommandLine,
    handshake: Handshake,
    spawner: Arc<dyn Spawner>,
    programs: Vec<String>,
}

impl SshProcessConnector {
    /// Create a connector for `[user[:pass]@]host[:port]` with default settings.
    pub fn new(uri: &str) -> Result<Self> {
        Self::with_config(uri, &ConnectorConfig::default())
    }

    pub fn with_config(uri: &str, config: &ConnectorConfig) -> Result<Self> {
        Self::with_spawner(uri, config, Arc::new(TokioSpawner::new()))
    }

    /// Create a connector that starts processes through `spawner`.
    pub fn with_spawner(
        uri: &str,
        config: &ConnectorConfig,
        spawner: Arc<dyn Spawner>,
    ) -> Result<Self> {
        config.validate()?;
        let spec = spec::parse(uri)?;
        let command = config.command_builder().build(&spec);

        let mut programs = vec![shellexpand::tilde(&config.ssh_program).into_owned()];
        if spec.pass.is_some() {
            programs.push(shellexpand::tilde(&config.sshpass_program).into_owned());
        }

        tracing::debug!("ssh connector for {}: {}", spec, command.redacted());

        Ok(Self {
            spec,
            command,
            handshake: Handshake {
                grace: config.grace_interval(),
                timeout: config.connect_timeout(),
                ready_marker: config.ready_marker.clone(),
            },
            spawner,
            programs,
        })
    }

    /// The parsed jump host spec.
    pub fn spec(&self) -> &DialSpec {
        &self.spec
    }

    /// The base client command, without any forwarding directive.
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// Check that the client programs this connector needs are installed.
    pub fn is_available(&self) -> bool {
        self.missing_programs().is_empty()
    }

    /// The client programs this connector needs that cannot be found.
    pub fn missing_programs(&self) -> Vec<&str> {
        self.programs
            .iter()
            .map(String::as_str)
            .filter(|p| !TokioSpawner::is_installed(p))
            .collect()
    }

    /// Open a connection to `target` (`host:port`) through the jump host.
    ///
    /// An invalid target yields an already-failed [`PendingConnection`]
    /// without spawning anything. Everything else, including spawn failures,
    /// is reported when the returned future resolves.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn connect(&self, target: &str) -> PendingConnection {
        self.connect_with_cancel(target, &CancellationToken::new())
    }

    /// Like [`connect`](Self::connect), but also cancelled when `cancel` is.
    pub fn connect_with_cancel(&self, target: &str, cancel: &CancellationToken) -> PendingConnection {
        let cancel = cancel.child_token();

        let target = match spec::parse_target(target) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!("Rejected target: {}", e);
                return PendingConnection::rejected(e, cancel);
            }
        };

        let command = self.command.with_forwarding(&target);
        let conn_id = uuid::Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("ssh_hop", conn = %&conn_id[..8], via = %self.spec, target = %target);

        let task = tokio::spawn(
            establish(
                self.spawner.clone(),
                command,
                target,
                self.handshake.clone(),
                cancel.clone(),
            )
            .instrument(span),
        );

        PendingConnection {
            state: PendingState::Running(task),
            cancel,
        }
    }
}

impl std::fmt::Debug for SshProcessConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshProcessConnector")
            .field("spec", &self.spec.to_string())
            .field("command", &self.command.redacted())
            .field("handshake", &self.handshake)
            .finish()
    }
}

enum PendingState {
    Rejected(HopError),
    Running(JoinHandle<Result<TunnelStream>>),
    Done,
}

/// A connection attempt in progress.
///
/// Resolves to a [`TunnelStream`] once the handshake window has passed.
/// Dropping it before then cancels the attempt and terminates ssh.
pub struct PendingConnection {
    state: PendingState,
    cancel: CancellationToken,
}

impl PendingConnection {
    fn rejected(error: HopError, cancel: CancellationToken) -> Self {
        Self {
            state: PendingState::Rejected(error),
            cancel,
        }
    }

    /// Cancel the attempt. The future settles to [`HopError::Cancelled`]
    /// unless it already resolved.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this attempt when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Future for PendingConnection {
    type Output = Result<TunnelStream>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match std::mem::replace(&mut this.state, PendingState::Done) {
            PendingState::Rejected(e) => Poll::Ready(Err(e)),
            PendingState::Running(mut task) => match Pin::new(&mut task).poll(cx) {
                Poll::Pending => {
                    this.state = PendingState::Running(task);
                    Poll::Pending
                }
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(HopError::Cancelled)),
                Poll::Ready(Err(e)) => Poll::Ready(Err(HopError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("connection task failed: {}", e),
                )))),
            },
            PendingState::Done => panic!("PendingConnection polled after completion"),
        }
    }
}

impl Drop for PendingConnection {
    fn drop(&mut self) {
        if matches!(self.state, PendingState::Running(_)) {
            self.cancel.cancel();
        }
    }
}

/// How the handshake window ended.
enum Outcome {
    Ready,
    Exited(Option<ExitStatus>),
    Cancelled,
    TimedOut,
}

async fn establish(
    spawner: Arc<dyn Spawner>,
    command: CommandLine,
    target: Target,
    handshake: Handshake,
    cancel: CancellationToken,
) -> Result<TunnelStream> {
    let program = command.program().unwrap_or_default().to_string();

    let process = spawner
        .spawn(&command)
        .map_err(|source| HopError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

    let mut control = process.control;
    tracing::debug!(pid = ?control.id(), "Spawned {}", command.redacted());

    let (line_tx, mut lines) = mpsc::unbounded_channel();
    let stderr_drain = tokio::spawn(pump_stderr(process.stderr, line_tx).in_current_span());

    let mut diagnostic = Vec::new();
    let outcome =
        await_handshake(control.as_mut(), &mut lines, &mut diagnostic, &handshake, &cancel).await;

    match outcome {
        Outcome::Ready => {
            // later stderr output is drained and dropped, never replayed
            drop(lines);
            tracing::info!("Tunnel to {} established", target);
            Ok(TunnelStream::new(process.stdout, process.stdin, control, stderr_drain))
        }
        Outcome::Exited(status) => {
            while let Ok(Some(line)) = tokio::time::timeout(DIAGNOSTIC_DRAIN, lines.recv()).await {
                diagnostic.extend_from_slice(&line);
            }
            stderr_drain.abort();

            let status = status.and_then(|s| s.code());
            tracing::debug!("ssh exited during handshake (exit code {:?})", status);
            Err(HopError::ConnectFailed {
                diagnostic: String::from_utf8_lossy(&diagnostic).into_owned(),
                status,
            })
        }
        Outcome::Cancelled => {
            terminate(control.as_mut(), stderr_drain).await;
            tracing::debug!("Connection attempt cancelled");
            Err(HopError::Cancelled)
        }
        Outcome::TimedOut => {
            terminate(control.as_mut(), stderr_drain).await;
            tracing::warn!("Timed out after {:?} connecting to {}", handshake.timeout, target);
            Err(HopError::Timeout(handshake.timeout))
        }
    }
}

async fn await_handshake(
    control: &mut dyn ProcessControl,
    lines: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    diagnostic: &mut Vec<u8>,
    handshake: &Handshake,
    cancel: &CancellationToken,
) -> Outcome {
    // disabled grace still needs a timer; the deadline fires no later
    let grace = tokio::time::sleep(handshake.grace.unwrap_or(handshake.timeout));
    let deadline = tokio::time::sleep(handshake.timeout);
    tokio::pin!(grace, deadline);

    let mut stderr_open = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Outcome::Cancelled,
            _ = &mut deadline => return Outcome::TimedOut,
            status = control.wait() => {
                return match status {
                    Ok(status) => Outcome::Exited(Some(status)),
                    Err(e) => {
                        tracing::debug!("Failed to wait for ssh: {}", e);
                        Outcome::Exited(None)
                    }
                };
            }
            line = lines.recv(), if stderr_open => match line {
                Some(line) => {
                    if let Some(marker) = &handshake.ready_marker {
                        if String::from_utf8_lossy(&line).contains(marker.as_str()) {
                            return Outcome::Ready;
                        }
                    }
                    diagnostic.extend_from_slice(&line);
                }
                None => stderr_open = false,
            },
            _ = &mut grace, if handshake.grace.is_some() => return Outcome::Ready,
        }
    }
}

async fn terminate(control: &mut dyn ProcessControl, stderr_drain: JoinHandle<()>) {
    if let Err(e) = shutdown(control, REAP_GRACE).await {
        tracing::warn!("Failed to reap ssh process: {}", e);
    }
    stderr_drain.abort();
}

/// Forward raw stderr lines, terminators included, to the handshake until its
/// receiver goes away, then keep draining so ssh never blocks on a full pipe.
async fn pump_stderr(stderr: BoxedReader, lines: mpsc::UnboundedSender<Vec<u8>>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches(['\r', '\n']);
                tracing::trace!("ssh: {}", truncate(text, MAX_LOGGED_LINE));
                if !lines.is_closed() {
                    let _ = lines.send(buf.clone());
                }
            }
            Err(e) => {
                tracing::debug!("Stopped reading ssh stderr: {}", e);
                break;
            }
        }
    }
}
