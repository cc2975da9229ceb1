//! Line-oriented TCP server
//!
//! Every connection gets its own interpreter over a fresh container. The
//! server writes a prompt, reads one line, runs it to completion and writes
//! back the rendering followed by the terminator and a new prompt. A bare
//! `EOF` line ends the session, and so does a line longer than the limit.
//! Sessions never page: long output goes back to the client.

use crate::container::CommandContainer;
use crate::interpreter::{Interpreter, InterpreterConfig};
use futures::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use taskline_foundation::{Error, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Line that closes a session
pub const EOF_LINE: &str = "EOF";

/// Longest request line accepted by default, in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Builds the container of each new session
pub type ContainerFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

pub struct LineServer<C: CommandContainer> {
    listener: TcpListener,
    factory: ContainerFactory<C>,
    config: InterpreterConfig,
    terminator: String,
    max_line_length: usize,
}

impl<C: CommandContainer> LineServer<C> {
    pub async fn bind(
        addr: &str,
        factory: ContainerFactory<C>,
        config: InterpreterConfig,
        terminator: impl Into<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind to {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            factory,
            config: config.with_pager(None),
            terminator: terminator.into(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        })
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Line server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Line server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    info!("New connection from {}", peer);

                    let factory = Arc::clone(&self.factory);
                    let config = self.config.clone();
                    let terminator = self.terminator.clone();
                    let max_line_length = self.max_line_length;
                    tokio::spawn(async move {
                        let served = handle_connection(stream, factory(), config, terminator, max_line_length);
                        if let Err(e) = served.await {
                            warn!("Error serving connection from {}: {}", peer, e);
                        }
                        info!("Connection from {} closed", peer);
                    });
                }
            }
        }
    }
}

async fn handle_connection<C: CommandContainer>(
    stream: TcpStream,
    container: C,
    config: InterpreterConfig,
    terminator: String,
    max_line_length: usize,
) -> Result<()> {
    let prompt = config.prompt.clone();
    let interpreter = blocking(move || {
        let mut interpreter = Interpreter::new(container, config)?;
        interpreter.enter()?;
        Ok(interpreter)
    })
    .await?;

    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length));
    let mut session = Some(interpreter);

    let result = async {
        writer.write_all(prompt.as_bytes()).await?;
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line.trim().to_string(),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("Closing session: line longer than {} bytes", max_line_length);
                    let message = format!("UsageError: line longer than {} bytes{}", max_line_length, terminator);
                    writer.write_all(message.as_bytes()).await?;
                    writer.flush().await?;
                    break;
                }
                Err(LinesCodecError::Io(e)) => return Err(Error::Io(e)),
            };
            if line == EOF_LINE {
                break;
            }
            let response = respond(&mut session, line).await?;
            write_response(&mut writer, &response, &terminator, &prompt).await?;
        }
        Ok::<(), Error>(())
    }
    .await;

    if let Some(mut interpreter) = session.take() {
        blocking(move || interpreter.exit()).await?;
    }
    result
}

/// Run one line on the blocking pool; the session moves there and back
async fn respond<C: CommandContainer>(
    session: &mut Option<Interpreter<C>>,
    line: String,
) -> Result<String> {
    let interpreter = session
        .take()
        .ok_or_else(|| Error::Internal("session already closed".to_string()))?;
    debug!("Received: {}", line);
    let (interpreter, response) = tokio::task::spawn_blocking(move || {
        let response = match interpreter.send(&line) {
            Ok(task) => task.render(),
            Err(e) => e.to_string(),
        };
        (interpreter, response)
    })
    .await
    .map_err(|e| Error::Internal(format!("Session task failed: {}", e)))?;
    *session = Some(interpreter);
    Ok(response)
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &str,
    terminator: &str,
    prompt: &str,
) -> Result<()> {
    let mut message = response.replace('\n', terminator);
    message.push_str(terminator);
    message.push_str(prompt);
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Session task failed: {}", e)))?
}
