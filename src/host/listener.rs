//! Host-side channel listener.
//!
//! Owns the listening endpoint derived from the host's own pid and
//! build version.  Accepts exactly one connection at a time, decodes
//! exactly one command per connection, dispatches it, and holds the
//! connection open until the streamed response — results, then the
//! terminal sentinel — is complete.  Only then is the next connection
//! accepted; there is no connection concurrency inside one host
//! process.

use std::sync::Arc;

use futures_util::StreamExt;
use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::channel::LineCodec;
use crate::host::cancel::spawn_cancel_waiter;
use crate::host::engine::{Engine, Outbound};
use crate::host::module::ModuleLoader;
use crate::protocol::{Command, ResultMessage, COMMAND_RUN_TESTS, END_SENTINEL};
use crate::{AppError, Result};

/// Depth of the outbound result queue between the engine and the
/// connection writer.
const OUTBOUND_QUEUE: usize = 32;

/// The host's test-channel listener.
pub struct Listener {
    channel_name: String,
    loader: Arc<dyn ModuleLoader>,
    engine: Engine,
    grace: std::time::Duration,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("channel_name", &self.channel_name)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Build a listener for `channel_name`.
    #[must_use]
    pub fn new(
        channel_name: String,
        loader: Arc<dyn ModuleLoader>,
        engine: Engine,
        grace: std::time::Duration,
    ) -> Self {
        Self {
            channel_name,
            loader,
            engine,
            grace,
        }
    }

    /// Serve connections until `ct` is cancelled.
    ///
    /// On shutdown the listener stops accepting immediately and gives
    /// the in-flight response the configured grace period to finish
    /// before abandoning it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connect`] when the listening endpoint cannot
    /// be created.
    pub async fn serve(&self, ct: CancellationToken) -> Result<()> {
        let ns_name = self
            .channel_name
            .clone()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| {
                AppError::Connect(format!(
                    "invalid channel name '{}': {err}",
                    self.channel_name
                ))
            })?;

        let listener = ListenerOptions::new()
            .name(ns_name)
            .create_tokio()
            .map_err(|err| AppError::Connect(format!("failed to create listener: {err}")))?;

        info!(channel = %self.channel_name, "test channel listening");

        let span = info_span!("listener", channel = %self.channel_name);
        async {
            loop {
                let stream = tokio::select! {
                    () = ct.cancelled() => {
                        info!("listener shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => stream,
                        Err(err) => {
                            warn!(%err, "accept failed");
                            continue;
                        }
                    }
                };

                // One connection at a time: the next accept happens only
                // after this response fully completes.
                let conn = self.handle_connection(stream);
                tokio::pin!(conn);
                tokio::select! {
                    () = &mut conn => {}
                    () = ct.cancelled() => {
                        info!(grace_secs = self.grace.as_secs(), "shutdown requested mid-response");
                        if tokio::time::timeout(self.grace, &mut conn).await.is_err() {
                            warn!("in-flight response abandoned after grace period");
                        }
                        break;
                    }
                }
            }
        }
        .instrument(span)
        .await;

        Ok(())
    }

    /// Service one connection: decode one command, dispatch, stream the
    /// response, terminate with the sentinel.
    async fn handle_connection(&self, stream: interprocess::local_socket::tokio::Stream) {
        let span = info_span!("connection");
        async {
            let (reader, mut writer) = stream.split();
            let mut framed = FramedRead::new(reader, LineCodec::new());

            let command = match read_command(&mut framed).await {
                Ok(command) => command,
                Err(err) => {
                    warn!(%err, "failed to decode command");
                    fail_connection(&mut writer, &err.to_string()).await;
                    return;
                }
            };

            info!(
                assembly = %command.test_assembly,
                methods = command.test_methods.len(),
                "command received"
            );

            let run_token = CancellationToken::new();
            let done = CancellationToken::new();
            let waiter = spawn_cancel_waiter(
                command.cancel_pipe.clone(),
                run_token.clone(),
                done.clone(),
            );

            self.dispatch(&command, &run_token, &mut writer).await;

            // The response is complete; release the waiter either way.
            done.cancel();
            let _ = waiter.await;
        }
        .instrument(span)
        .await;
    }

    /// Load the module and stream the engine's results to the writer.
    ///
    /// Every exit path emits the terminal sentinel; a mid-stream write
    /// failure means the remote side is gone, in which case the run is
    /// cancelled and the connection dropped.
    async fn dispatch<W>(&self, command: &Command, run_token: &CancellationToken, writer: &mut W)
    where
        W: AsyncWrite + Unpin,
    {
        let module = match self.loader.load(&command.test_assembly) {
            Ok(module) => module,
            Err(err) => {
                warn!(assembly = %command.test_assembly, %err, "module load failed");
                fail_connection(writer, &err.to_string()).await;
                return;
            }
        };

        let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
        let engine = self.engine.clone();
        let filter = command.test_methods.clone();
        let engine_token = run_token.clone();
        let engine_task = tokio::spawn(async move {
            engine
                .run_module(module.as_ref(), &filter, &engine_token, &tx)
                .await
        });

        while let Some(outbound) = rx.recv().await {
            let serialized = match &outbound {
                Outbound::Result(result) => serde_json::to_string(result),
                Outbound::Log(log) => serde_json::to_string(log),
            };
            let line = match serialized {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound record, dropping");
                    continue;
                }
            };
            if write_line(writer, &line).await.is_err() {
                warn!("remote side disconnected mid-stream, cancelling run");
                run_token.cancel();
                break;
            }
        }

        // Drain whatever the engine still produces after a disconnect so
        // it finishes its teardown path, then terminate the stream.
        while rx.recv().await.is_some() {}

        let engine_failure = match engine_task.await {
            Ok(Ok(())) => {
                debug!("engine run complete");
                None
            }
            Ok(Err(err)) => {
                warn!(%err, "engine run ended early");
                Some(err.to_string())
            }
            Err(err) => {
                warn!(%err, "engine task panicked");
                Some(format!("test engine failed: {err}"))
            }
        };
        if let Some(message) = engine_failure {
            let failure = ResultMessage::failed("<engine>", 0.0, message);
            if let Ok(line) = serde_json::to_string(&failure) {
                let _ = write_line(writer, &line).await;
            }
        }

        if write_line(writer, END_SENTINEL).await.is_err() {
            debug!("terminal line could not be delivered");
        }
    }
}

/// Read and decode the single command line of a connection.
async fn read_command<R>(framed: &mut FramedRead<R, LineCodec>) -> Result<Command>
where
    R: AsyncRead + Unpin,
{
    loop {
        let line = framed
            .next()
            .await
            .ok_or_else(|| AppError::Protocol("connection closed before a command arrived".into()))??;
        if line.trim().is_empty() {
            continue;
        }
        let command: Command = serde_json::from_str(&line)
            .map_err(|err| AppError::Protocol(format!("malformed command: {err}")))?;
        if command.command != COMMAND_RUN_TESTS {
            return Err(AppError::Protocol(format!(
                "unknown command verb '{}'",
                command.command
            )));
        }
        return Ok(command);
    }
}

/// Best-effort failure response: one failed result plus the sentinel, so
/// the remote side never hangs reading a connection that silently died.
async fn fail_connection<W>(writer: &mut W, message: &str)
where
    W: AsyncWrite + Unpin,
{
    let failure = ResultMessage::failed("<command>", 0.0, message);
    if let Ok(line) = serde_json::to_string(&failure) {
        let _ = write_line(writer, &line).await;
    }
    let _ = write_line(writer, END_SENTINEL).await;
}

/// Write one record line and flush immediately — streaming, not batched.
async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
