//! Remote run client: one command out, a stream of results back.
//!
//! The connection is single-use.  The read loop terminates on the
//! terminal sentinel or on disconnect — never blocks indefinitely — and
//! the caller learns which of the two happened from the summary.

use futures_util::StreamExt;
use interprocess::local_socket::tokio::{prelude::*, Stream};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::LineCodec;
use crate::protocol::{parse_host_line, Command, HostLine, Outcome, ResultMessage};
use crate::runner::cancel::spawn_cancel_trigger;
use crate::{AppError, Result};

/// Everything a finished (or broken-off) run produced.
#[derive(Debug)]
pub struct RunSummary {
    /// Results in the order they streamed in.
    pub results: Vec<ResultMessage>,
    /// Whether the terminal sentinel arrived.  `false` means the
    /// connection dropped mid-stream and the results are partial.
    pub clean_end: bool,
}

impl RunSummary {
    /// Whether any result reported a failure.
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.results
            .iter()
            .any(|result| result.outcome == Outcome::Failed)
    }
}

/// Send one command over `stream` and read the response to completion.
///
/// The side-channel named in the command is bound *before* the command
/// is written, so the host's waiter can always reach it.  When `cancel`
/// fires the trigger task forwards one token to the host and this loop
/// keeps reading: the host still terminates the stream with the
/// sentinel after skipping the remaining tests.
///
/// Each result is forwarded through `progress` as it arrives, for
/// incremental rendering; the returned summary owns the full list.
///
/// # Errors
///
/// Returns [`AppError::Connect`] when the side-channel cannot be bound
/// and [`AppError::Protocol`] / [`AppError::Io`] on write failures.  A
/// premature disconnect is not an error: it surfaces as
/// `clean_end == false`.
pub async fn execute(
    stream: Stream,
    command: &Command,
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<ResultMessage>>,
) -> Result<RunSummary> {
    let done = CancellationToken::new();
    let trigger = spawn_cancel_trigger(&command.cancel_pipe, cancel, done.clone())?;

    let outcome = exchange(stream, command, progress).await;

    // Release the trigger task on every path; the connection closes on
    // drop.
    done.cancel();
    let _ = trigger.await;

    outcome
}

/// The command/response exchange itself, separated so the trigger task
/// is released no matter how it exits.
async fn exchange(
    stream: Stream,
    command: &Command,
    progress: Option<mpsc::UnboundedSender<ResultMessage>>,
) -> Result<RunSummary> {
    let (reader, mut writer) = stream.split();

    let mut line = serde_json::to_string(command)
        .map_err(|err| AppError::Protocol(format!("cannot serialize command: {err}")))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    debug!(assembly = %command.test_assembly, "command sent");

    let mut framed = FramedRead::new(reader, LineCodec::new());
    let mut results = Vec::new();
    let mut clean_end = false;

    while let Some(next) = framed.next().await {
        let raw = match next {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "stream read failed");
                break;
            }
        };
        match parse_host_line(&raw) {
            Ok(Some(HostLine::End)) => {
                clean_end = true;
                break;
            }
            Ok(Some(HostLine::Result(result))) => {
                if let Some(ref progress) = progress {
                    let _ = progress.send(result.clone());
                }
                results.push(result);
            }
            Ok(Some(HostLine::Log(log))) => {
                info!(source = log.source.as_deref().unwrap_or("host"), level = %log.level, "{}", log.message);
            }
            Ok(None) => {}
            Err(err) => {
                // Advisory resilience: one bad line does not end the run.
                warn!(%err, raw_line = %raw, "unparseable stream line, skipping");
            }
        }
    }

    if !clean_end {
        warn!(
            received = results.len(),
            "connection closed before the terminal line"
        );
    }

    Ok(RunSummary { results, clean_end })
}
