//! The byte stream handed out once a tunnel is up.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;

use crate::connector::process::{shutdown, BoxedReader, BoxedWriter, ExitStatus, ProcessControl};
use crate::error::Result;

/// How long [`TunnelStream::close`] waits for ssh to exit on its own.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time between SIGTERM and SIGKILL when tearing a tunnel down.
pub(crate) const REAP_GRACE: Duration = Duration::from_secs(2);

/// Duplex stream over the ssh client's stdout (read) and stdin (write).
///
/// Dropping the stream terminates and reaps the ssh process.
pub struct TunnelStream {
    reader: BoxedReader,
    writer: Option<BoxedWriter>,
    control: Option<Box<dyn ProcessControl>>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl TunnelStream {
    pub(crate) fn new(
        reader: BoxedReader,
        writer: BoxedWriter,
        control: Box<dyn ProcessControl>,
        stderr_drain: JoinHandle<()>,
    ) -> Self {
        Self {
            reader,
            writer: Some(writer),
            control: Some(control),
            stderr_drain: Some(stderr_drain),
        }
    }

    /// Process id of the ssh client, if it is still running.
    pub fn id(&self) -> Option<u32> {
        self.control.as_ref().and_then(|c| c.id())
    }

    /// Check whether the ssh client has exited, without blocking.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.control.as_mut() {
            Some(control) => control.try_wait(),
            None => Ok(None),
        }
    }

    /// Close the write side, wait for ssh to exit and return its status.
    ///
    /// ssh gets a few seconds to wind down after stdin closes before it is
    /// terminated.
    pub async fn close(mut self) -> Result<ExitStatus> {
        let mut control = self.take_control()?;

        let status = match tokio::time::timeout(CLOSE_TIMEOUT, control.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::debug!("ssh did not exit after stdin closed, terminating");
                shutdown(control.as_mut(), REAP_GRACE).await?
            }
        };

        tracing::debug!("Tunnel closed (exit code {:?})", status.code());
        Ok(status)
    }

    /// Terminate ssh right away and wait for it to be reaped.
    pub async fn terminate(mut self) -> Result<ExitStatus> {
        let mut control = self.take_control()?;
        let status = shutdown(control.as_mut(), REAP_GRACE).await?;
        tracing::debug!("Tunnel terminated (exit code {:?})", status.code());
        Ok(status)
    }

    fn take_control(&mut self) -> Result<Box<dyn ProcessControl>> {
        self.writer = None;
        self.control.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "tunnel already closed").into()
        })
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_for_writing())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    /// Flushes and closes ssh's stdin, which ends the forwarded connection's
    /// write direction.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(writer) = this.writer.as_mut() {
            std::task::ready!(Pin::new(writer).poll_shutdown(cx))?;
        }
        // dropping the pipe is what delivers EOF to the child
        this.writer = None;
        Poll::Ready(Ok(()))
    }
}

fn closed_for_writing() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "tunnel has been shut down for writing")
}

impl Drop for TunnelStream {
    fn drop(&mut self) {
        self.writer = None;

        if let Some(drain) = self.stderr_drain.take() {
            drain.abort();
        }

        let Some(mut control) = self.control.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match shutdown(control.as_mut(), REAP_GRACE).await {
                        Ok(status) => tracing::debug!("Reaped ssh process (exit code {:?})", status.code()),
                        Err(e) => tracing::warn!("Failed to reap ssh process: {}", e),
                    }
                });
            }
            Err(_) => {
                // no runtime left to wait on; kill_on_drop covers the rest
                let _ = control.kill();
            }
        }
    }
}

impl std::fmt::Debug for TunnelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelStream")
            .field("pid", &self.id())
            .field("writable", &self.writer.is_some())
            .finish()
    }
}
