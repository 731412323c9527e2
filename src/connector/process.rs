//! Child process abstraction.
//!
//! The connector never touches `tokio::process` directly. It asks a
//! [`Spawner`] for a [`ProcessHandle`], which lets tests substitute scripted
//! processes backed by in-memory pipes.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::ssh::command::CommandLine;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: Option<i32>,
}

impl ExitStatus {
    /// `None` means the process was ended by a signal.
    pub fn from_code(code: Option<i32>) -> Self {
        Self { code }
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self::from_code(status.code())
    }
}

/// Lifecycle operations on a spawned process.
#[async_trait]
pub trait ProcessControl: Send {
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM on unix).
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to exit.
    fn kill(&mut self) -> io::Result<()>;

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Wait for the process to exit and reap it. Must be cancel safe.
    async fn wait(&mut self) -> io::Result<ExitStatus>;
}

/// A running process and its pipes.
pub struct ProcessHandle {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    pub control: Box<dyn ProcessControl>,
}

/// Starts processes from a [`CommandLine`].
pub trait Spawner: Send + Sync {
    fn spawn(&self, command: &CommandLine) -> io::Result<ProcessHandle>;
}

/// Spawns real child processes with piped stdio.
///
/// No shell is involved: the first token is the program, the rest are
/// passed as separate arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl TokioSpawner {
    pub fn new() -> Self {
        Self
    }

    /// Check if `program` can be found in PATH (or exists, if it is a path).
    pub fn is_installed(program: &str) -> bool {
        which::which(program).is_ok()
    }
}

impl Spawner for TokioSpawner {
    fn spawn(&self, command: &CommandLine) -> io::Result<ProcessHandle> {
        let program = command
            .program()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut child = Command::new(program)
            .args(command.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        Ok(ProcessHandle {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            control: Box::new(TokioChild { child }),
        })
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("child {} was not captured", name))
}

struct TokioChild {
    child: Child,
}

#[async_trait]
impl ProcessControl for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // id() is None once the child has been reaped
        match self.child.id() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?.map(ExitStatus::from))
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        Ok(self.child.wait().await?.into())
    }
}

/// Terminate a process and reap it.
///
/// Sends a termination request, waits up to `grace`, then kills.
pub(crate) async fn shutdown(
    control: &mut dyn ProcessControl,
    grace: Duration,
) -> io::Result<ExitStatus> {
    if let Some(status) = control.try_wait()? {
        return Ok(status);
    }

    if let Err(e) = control.terminate() {
        tracing::debug!("Failed to signal ssh process: {}", e);
    }

    match tokio::time::timeout(grace, control.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::debug!("ssh process ignored termination for {:?}, killing", grace);
            control.kill()?;
            control.wait().await
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted processes backed by in-memory pipes.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::io::DuplexStream;
    use tokio::sync::watch;

    use super::*;

    const PIPE_CAPACITY: usize = 64 * 1024;

    /// The far side of a scripted process, held by the test.
    pub struct Remote {
        /// Reads what the connector writes to the child's stdin.
        pub stdin: DuplexStream,
        /// Writes what the connector reads from the child's stdout.
        pub stdout: DuplexStream,
        /// Writes the child's diagnostics.
        pub stderr: Option<DuplexStream>,
        exit: Arc<watch::Sender<Option<ExitStatus>>>,
        pub terminated: Arc<AtomicUsize>,
        pub waited: Arc<AtomicUsize>,
    }

    impl Remote {
        /// Make the child exit with `code`.
        pub fn exit(&self, code: i32) {
            self.exit.send_replace(Some(ExitStatus::from_code(Some(code))));
        }

        pub fn terminated(&self) -> usize {
            self.terminated.load(Ordering::SeqCst)
        }

        pub fn waited(&self) -> usize {
            self.waited.load(Ordering::SeqCst)
        }
    }

    struct ScriptedControl {
        exit_tx: Arc<watch::Sender<Option<ExitStatus>>>,
        exit_rx: watch::Receiver<Option<ExitStatus>>,
        terminated: Arc<AtomicUsize>,
        waited: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProcessControl for ScriptedControl {
        fn id(&self) -> Option<u32> {
            Some(4242)
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            self.exit_tx.send_replace(Some(ExitStatus::from_code(None)));
            Ok(())
        }

        fn kill(&mut self) -> io::Result<()> {
            self.terminate()
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
            Ok(*self.exit_rx.borrow())
        }

        async fn wait(&mut self) -> io::Result<ExitStatus> {
            loop {
                if let Some(status) = *self.exit_rx.borrow_and_update() {
                    self.waited.fetch_add(1, Ordering::SeqCst);
                    return Ok(status);
                }
                self.exit_rx
                    .changed()
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "exit channel closed"))?;
            }
        }
    }

    /// Create a scripted process and the handles that drive it.
    pub fn scripted() -> (ProcessHandle, Remote) {
        let (stdin_local, stdin_remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_local, stdout_remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_local, stderr_remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);
        let terminated = Arc::new(AtomicUsize::new(0));
        let waited = Arc::new(AtomicUsize::new(0));

        let handle = ProcessHandle {
            stdin: Box::new(stdin_local),
            stdout: Box::new(stdout_local),
            stderr: Box::new(stderr_local),
            control: Box::new(ScriptedControl {
                exit_tx: exit_tx.clone(),
                exit_rx,
                terminated: terminated.clone(),
                waited: waited.clone(),
            }),
        };

        let remote = Remote {
            stdin: stdin_remote,
            stdout: stdout_remote,
            stderr: Some(stderr_remote),
            exit: exit_tx,
            terminated,
            waited,
        };

        (handle, remote)
    }

    /// Hands out queued processes and records every command it was given.
    ///
    /// Fails with `NotFound` once the queue is empty.
    #[derive(Default)]
    pub struct ScriptedSpawner {
        queue: Mutex<VecDeque<ProcessHandle>>,
        commands: Mutex<Vec<CommandLine>>,
    }

    impl ScriptedSpawner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a scripted process and return its remote side.
        pub fn push(&self) -> Remote {
            let (handle, remote) = scripted();
            self.queue.lock().unwrap().push_back(handle);
            remote
        }

        pub fn calls(&self) -> usize {
            self.commands.lock().unwrap().len()
        }

        pub fn commands(&self) -> Vec<CommandLine> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl Spawner for ScriptedSpawner {
        fn spawn(&self, command: &CommandLine) -> io::Result<ProcessHandle> {
            self.commands.lock().unwrap().push(command.clone());
            self.queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "No such file or directory"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::scripted;
    use super::*;
    use crate::ssh::command::Token;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn command(argv: &[&str]) -> CommandLine {
        CommandLine::new(argv.iter().map(|a| Token::Literal(a.to_string())).collect())
    }

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::from_code(Some(0)).success());
        assert!(!ExitStatus::from_code(Some(255)).success());
        assert!(!ExitStatus::from_code(None).success());
        assert_eq!(ExitStatus::from_code(Some(3)).code(), Some(3));
    }

    #[test]
    fn test_spawn_empty_command_line() {
        let result = TokioSpawner::new().spawn(&CommandLine::new(Vec::new()));
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = TokioSpawner::new().spawn(&command(&["/nonexistent/ssh-hop-test-binary"]));
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_is_installed() {
        assert!(!TokioSpawner::is_installed("ssh-hop-definitely-not-installed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_pipes_stdio() {
        let mut process = TokioSpawner::new().spawn(&command(&["cat"])).unwrap();

        process.stdin.write_all(b"through the pipe").await.unwrap();
        drop(process.stdin);

        let mut output = String::new();
        process.stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "through the pipe");

        let status = process.control.wait().await.unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_terminates_running_process() {
        let mut process = TokioSpawner::new().spawn(&command(&["sleep", "30"])).unwrap();
        assert!(process.control.id().is_some());

        let status = shutdown(process.control.as_mut(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!status.success());
        assert_eq!(status.code(), None);
    }

    #[tokio::test]
    async fn test_shutdown_skips_exited_process() {
        let (mut process, remote) = scripted();
        remote.exit(0);

        let status = shutdown(process.control.as_mut(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(remote.terminated(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_terminates_scripted_process() {
        let (mut process, remote) = scripted();

        let status = shutdown(process.control.as_mut(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(status.code(), None);
        assert_eq!(remote.terminated(), 1);
        assert_eq!(remote.waited(), 1);
    }
}
