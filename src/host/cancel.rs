//! Cancellation side-channel waiter.
//!
//! Every command carries the name of a one-shot channel the runner
//! created before sending it.  Immediately on dispatch the listener
//! spawns this waiter: it connects to that channel and blocks reading
//! one line; any non-empty token cancels the run.  Everything here is
//! best-effort — a runner that never created the channel, or a host
//! that fails to reach it, silently disables out-of-band cancellation,
//! and the main channel's closure remains the fallback trigger.

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::GenericNamespaced;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn the detached waiter for one command's cancel channel.
///
/// `run_token` is cancelled when the runner writes a token; `done` is
/// the run's completion token and bounds the waiter's lifetime so it
/// never leaks past the response.
pub fn spawn_cancel_waiter(
    pipe_name: String,
    run_token: CancellationToken,
    done: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ns_name = match pipe_name.clone().to_ns_name::<GenericNamespaced>() {
            Ok(name) => name,
            Err(err) => {
                debug!(pipe = %pipe_name, %err, "invalid cancel channel name, waiter disabled");
                return;
            }
        };

        let stream = tokio::select! {
            () = done.cancelled() => return,
            connected = Stream::connect(ns_name) => match connected {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(pipe = %pipe_name, %err, "cancel channel unreachable, waiter disabled");
                    return;
                }
            }
        };

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        tokio::select! {
            () = done.cancelled() => {}
            read = reader.read_line(&mut line) => match read {
                Ok(n) if n > 0 && !line.trim().is_empty() => {
                    info!(pipe = %pipe_name, "cancellation requested by the runner");
                    run_token.cancel();
                }
                Ok(_) => debug!(pipe = %pipe_name, "cancel channel closed without a token"),
                Err(err) => debug!(pipe = %pipe_name, %err, "cancel channel read failed"),
            }
        }
    })
}
