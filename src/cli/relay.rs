//! netcat-style relay between this process's stdio and a tunnel.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::connector::{ExitStatus, TunnelStream};

enum Ending {
    Interrupted,
    RemoteClosed,
}

/// Copy stdin into the tunnel and the tunnel into stdout.
pub(super) async fn stdio(stream: TunnelStream, cancel: &CancellationToken) -> anyhow::Result<()> {
    let status = relay(stream, tokio::io::stdin(), tokio::io::stdout(), cancel).await?;
    tracing::debug!("ssh exited (exit code {:?})", status.code());
    Ok(())
}

/// Relay between `input`/`output` and the tunnel until the remote side closes
/// or `cancel` fires. Local EOF on `input` only half-closes the tunnel.
///
/// The ssh process has been reaped by the time this returns.
async fn relay<I, O>(
    stream: TunnelStream,
    mut input: I,
    output: O,
    cancel: &CancellationToken,
) -> anyhow::Result<ExitStatus>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut output = BufWriter::new(output);

    let ending: io::Result<Ending> = {
        let upstream = async {
            let sent = tokio::io::copy(&mut input, &mut writer).await?;
            writer.shutdown().await?;
            Ok::<_, io::Error>(sent)
        };
        let downstream = async {
            let received = tokio::io::copy(&mut reader, &mut output).await?;
            output.flush().await?;
            Ok::<_, io::Error>(received)
        };
        tokio::pin!(upstream, downstream);

        let mut upstream_done = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Relay interrupted");
                    break Ok(Ending::Interrupted);
                }
                sent = &mut upstream, if !upstream_done => match sent {
                    Ok(sent) => {
                        tracing::debug!("stdin closed after {} bytes", sent);
                        upstream_done = true;
                    }
                    Err(e) => break Err(e),
                },
                received = &mut downstream => {
                    break received.map(|received| {
                        tracing::debug!("Tunnel closed after {} bytes", received);
                        Ending::RemoteClosed
                    });
                }
            }
        }
    };

    let stream = reader.unsplit(writer);
    let status = match ending {
        Ok(Ending::RemoteClosed) => stream.close().await?,
        _ => stream.terminate().await?,
    };
    ending?;
    Ok(status)
}
