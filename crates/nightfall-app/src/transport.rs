//! Line-based request/reply transport.
//!
//! Each input line is one command, each command gets exactly one JSON
//! response line. Commands run on the blocking pool because a switch can
//! take a while.

use std::sync::Arc;

use async_trait::async_trait;
use nightfall_engine::{ApiResponse, Service};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

#[async_trait]
pub trait CommandTransport: Send {
    /// Serves commands until the peer hangs up or the service asks to exit.
    async fn serve(&mut self, service: Arc<Service>) -> anyhow::Result<()>;
}

pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
}

pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<R, W> CommandTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn serve(&mut self, service: Arc<Service>) -> anyhow::Result<()> {
        let token = service.shutdown_token();
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                read = self.reader.read_line(&mut line) => read?,
            };
            if read == 0 {
                tracing::debug!("Command input closed");
                break;
            }
            let message = line.trim().to_string();
            if message.is_empty() {
                continue;
            }

            let svc = service.clone();
            let response = match tokio::task::spawn_blocking(move || svc.handle_message(&message)).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("Command handler panicked: {e}");
                    ApiResponse::new(nightfall_engine::StatusCode::Err).with_message("internal error")
                }
            };
            self.writer.write_all(format!("{response}\n").as_bytes()).await?;
            self.writer.flush().await?;
        }
        Ok(())
    }
}
