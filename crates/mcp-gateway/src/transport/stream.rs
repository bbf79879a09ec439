//! Newline-delimited JSON-RPC over a byte stream (stdin/stdout by default).
//!
//! Every inbound line is dispatched on its own task, so a slow request never
//! blocks the lines behind it. Responses are written whole, one per line,
//! under a writer lock and in completion order. Logs must go to stderr;
//! anything else on stdout corrupts the framing.

use super::framing::{Frame, LineFramer};
use crate::config::ProtocolConfig;
use crate::protocol::{Dispatcher, Outgoing, Response, RpcError};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Handle to a running stream transport.
///
/// Dropping the handle requests a stop. Frames already dispatched still run
/// to completion and write their responses.
pub struct StreamTransportHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl StreamTransportHandle {
    /// Stop reading new input. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait until input is exhausted (or a stop was requested) and every
    /// in-flight request has finished writing.
    pub async fn wait(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(crate::GatewayError::Other(format!(
                    "stream transport task failed: {}",
                    e
                ))),
            },
            None => Ok(()),
        }
    }
}

impl Drop for StreamTransportHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stream transport builder.
pub struct StreamTransport {
    dispatcher: Dispatcher,
    max_line: usize,
}

impl StreamTransport {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            max_line: ProtocolConfig::MAX_MESSAGE_BYTES,
        }
    }

    /// Override the per-line limit (default 10 MiB).
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Serve on the process's stdin/stdout.
    pub fn stdio(self) -> StreamTransportHandle {
        self.start(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Serve on an arbitrary reader/writer pair. Must be called inside a
    /// tokio runtime.
    pub fn start<R, W>(self, reader: R, writer: W) -> StreamTransportHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(self.dispatcher, reader, writer, self.max_line, stop_rx));
        info!("Stream transport started");

        StreamTransportHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }
}

async fn run<R, W>(
    dispatcher: Dispatcher,
    mut reader: R,
    writer: W,
    max_line: usize,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));
    let mut framer = LineFramer::new(max_line);
    let mut tasks = JoinSet::new();
    let mut buf = vec![0u8; ProtocolConfig::STREAM_READ_CHUNK];

    let result = loop {
        let read = tokio::select! {
            _ = &mut stop_rx => {
                debug!("Stream transport stop requested");
                break Ok(());
            }
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                if let Some(frame) = framer.finish() {
                    spawn_frame(&mut tasks, &dispatcher, &writer, frame);
                }
                debug!("Stream transport input closed");
                break Ok(());
            }
            Ok(n) => {
                for frame in framer.push(&buf[..n]) {
                    spawn_frame(&mut tasks, &dispatcher, &writer, frame);
                }
            }
            Err(e) => {
                error!("Stream transport read failed: {}", e);
                break Err(e.into());
            }
        }

        while let Some(joined) = tasks.try_join_next() {
            log_join(joined);
        }
    };

    // Drain in-flight requests before reporting completion
    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }

    info!("Stream transport stopped");
    result
}

fn spawn_frame<W>(
    tasks: &mut JoinSet<()>,
    dispatcher: &Dispatcher,
    writer: &Arc<Mutex<W>>,
    frame: Frame,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let dispatcher = dispatcher.clone();
    let writer = writer.clone();

    tasks.spawn(async move {
        let outgoing = match frame {
            Frame::Line(bytes) => dispatcher.dispatch_bytes(&bytes).await,
            Frame::Oversized => {
                warn!("Dropped inbound line over the size limit");
                Some(Outgoing::Single(Response::error(Value::Null, RpcError::too_large())))
            }
        };

        if let Some(outgoing) = outgoing {
            if let Err(e) = write_line(&writer, &outgoing).await {
                warn!("Failed to write response: {}", e);
            }
        }
    });
}

async fn write_line<W>(writer: &Mutex<W>, outgoing: &Outgoing) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = outgoing.to_vec()?;
    line.push(b'\n');

    let mut writer = writer.lock().await;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Stream transport task failed: {}", e);
    }
}
