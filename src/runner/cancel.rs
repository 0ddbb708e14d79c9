//! Runner-side cancellation trigger.
//!
//! The runner mints a cancel-channel name, binds a listener on it
//! *before* the command is sent (the host's waiter connects as soon as
//! the command is dispatched), and keeps a detached trigger task alive
//! for the run: when the runner-side trigger token fires, one token
//! line is written to the connected waiter.  Fire-and-forget — the main
//! flow never awaits it, and the `done` token stops it from leaking
//! once the run is over.

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Token written on the side-channel; any non-empty content triggers
/// cancellation, the host does not parse it further.
pub const CANCEL_TOKEN: &str = "CANCEL";

/// Bind the side-channel and spawn the detached trigger task.
///
/// Must be called before the command referencing `pipe_name` is sent,
/// so the host's waiter finds the channel already listening.
///
/// # Errors
///
/// Returns [`AppError::Connect`] when the side-channel cannot be bound.
pub fn spawn_cancel_trigger(
    pipe_name: &str,
    trigger: CancellationToken,
    done: CancellationToken,
) -> Result<JoinHandle<()>> {
    let ns_name = pipe_name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Connect(format!("invalid cancel channel name: {err}")))?;
    let listener = ListenerOptions::new()
        .name(ns_name)
        .create_tokio()
        .map_err(|err| AppError::Connect(format!("failed to bind cancel channel: {err}")))?;

    let pipe = pipe_name.to_owned();
    Ok(tokio::spawn(async move {
        // The host's waiter connects once the command is dispatched; if
        // it never does, the trigger quietly expires with the run.
        let mut stream = tokio::select! {
            () = done.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(pipe = %pipe, %err, "cancel channel accept failed");
                    return;
                }
            }
        };

        tokio::select! {
            () = done.cancelled() => {}
            () = trigger.cancelled() => {
                info!(pipe = %pipe, "forwarding cancellation to the host");
                if let Err(err) = stream.write_all(CANCEL_TOKEN.as_bytes()).await {
                    debug!(pipe = %pipe, %err, "cancel token write failed");
                    return;
                }
                if let Err(err) = stream.write_all(b"\n").await {
                    debug!(pipe = %pipe, %err, "cancel token write failed");
                    return;
                }
                let _ = stream.flush().await;
            }
        }
    }))
}
