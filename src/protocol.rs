//! Wire types for the duplex streaming test channel.
//!
//! One connection carries exactly one exchange: the runner sends a
//! single [`Command`] line, then the host streams zero or more
//! [`ResultMessage`] / [`LogMessage`] lines and finishes with the
//! literal [`END_SENTINEL`] line.  Every record is a single line of
//! UTF-8 JSON; field names follow the `PascalCase` wire contract.
//!
//! Result lines arrive in completion order, which equals submission
//! order because the host executes tests strictly serially.  Log lines
//! are advisory — a reader that drops them stays correct.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Terminal line ending every response stream, sent exactly once.
///
/// The reader must stop as soon as it sees this line, even if the
/// connection remains open.
pub const END_SENTINEL: &str = "END";

/// The single command verb understood by the host listener.
pub const COMMAND_RUN_TESTS: &str = "RunTests";

/// Discriminator value carried in a [`LogMessage`]'s `Type` field.
pub const LOG_TYPE: &str = "LOG";

// ── Command ──────────────────────────────────────────────────────────────────

/// One test-run request, sent by the runner as the first line of a
/// connection.  Immutable once sent; consumed exactly once by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Command {
    /// Command verb; currently always [`COMMAND_RUN_TESTS`].
    pub command: String,
    /// Artifact identifying the test module to load on the host side.
    pub test_assembly: String,
    /// Fully-qualified test names to run; empty means run all.
    #[serde(default)]
    pub test_methods: Vec<String>,
    /// Name of the cancellation side-channel minted for this command.
    pub cancel_pipe: String,
}

impl Command {
    /// Build a `RunTests` command.
    #[must_use]
    pub fn run_tests(
        test_assembly: impl Into<String>,
        test_methods: Vec<String>,
        cancel_pipe: impl Into<String>,
    ) -> Self {
        Self {
            command: COMMAND_RUN_TESTS.to_owned(),
            test_assembly: test_assembly.into(),
            test_methods,
            cancel_pipe: cancel_pipe.into(),
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Final status of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The test body completed without error.
    Passed,
    /// The test body, its setup, or its resource resolution failed.
    Failed,
    /// The test did not run — cancellation, or an explicit skip.
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "Passed"),
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

/// One completed test, streamed as a single line the moment it finishes.
///
/// Authoritative once emitted — never retried or deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultMessage {
    /// Fully-qualified test name.
    pub name: String,
    /// Final status.
    pub outcome: Outcome,
    /// Execution duration in seconds, measured on the host's safe thread.
    pub duration: f64,
    /// Failure message, unwrapped to the innermost cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Failure backtrace, when one could be captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack_trace: Option<String>,
}

impl ResultMessage {
    /// Build a `Passed` result.
    #[must_use]
    pub fn passed(name: impl Into<String>, duration: f64) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Passed,
            duration,
            error_message: None,
            error_stack_trace: None,
        }
    }

    /// Build a `Failed` result carrying the innermost failure message.
    #[must_use]
    pub fn failed(name: impl Into<String>, duration: f64, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Failed,
            duration,
            error_message: Some(message.into()),
            error_stack_trace: None,
        }
    }

    /// Build a `Skipped` result; cancellation is not an error, so no
    /// message is attached.
    #[must_use]
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Skipped,
            duration: 0.0,
            error_message: None,
            error_stack_trace: None,
        }
    }

    /// Attach a captured backtrace to this result.
    #[must_use]
    pub fn with_stack_trace(mut self, stack: impl Into<String>) -> Self {
        self.error_stack_trace = Some(stack.into());
        self
    }
}

// ── Logs ─────────────────────────────────────────────────────────────────────

/// Advisory log record interleaved with results on the stream.
///
/// Dropping a log line must not affect correctness on the reader side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogMessage {
    /// Record discriminator; always [`LOG_TYPE`].
    #[serde(rename = "Type")]
    pub kind: String,
    /// Severity label (`info`, `warn`, …).
    pub level: String,
    /// Human-readable message.
    pub message: String,
    /// RFC 3339 timestamp taken when the record was created.
    pub timestamp: String,
    /// Optional originating component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl LogMessage {
    /// Build a log record stamped with the current time.
    #[must_use]
    pub fn new(
        level: impl Into<String>,
        message: impl Into<String>,
        source: Option<String>,
    ) -> Self {
        Self {
            kind: LOG_TYPE.to_owned(),
            level: level.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            source,
        }
    }
}

// ── Host → runner line parsing ───────────────────────────────────────────────

/// One decoded line of the host's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum HostLine {
    /// A completed test.
    Result(ResultMessage),
    /// An advisory log record.
    Log(LogMessage),
    /// The terminal sentinel; the stream is over.
    End,
}

/// Parse one line of the response stream.
///
/// The sentinel check happens before any JSON parsing, so the terminal
/// line unconditionally ends the response regardless of message content.
/// Empty and whitespace-only lines yield `Ok(None)` and are skipped.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] when the line is neither the sentinel
/// nor a well-formed result/log record.
pub fn parse_host_line(line: &str) -> Result<Option<HostLine>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed == END_SENTINEL {
        return Ok(Some(HostLine::End));
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed stream line: {e}")))?;

    if value.get("Type").and_then(serde_json::Value::as_str) == Some(LOG_TYPE) {
        let log: LogMessage = serde_json::from_value(value)
            .map_err(|e| AppError::Protocol(format!("malformed log record: {e}")))?;
        return Ok(Some(HostLine::Log(log)));
    }

    let result: ResultMessage = serde_json::from_value(value)
        .map_err(|e| AppError::Protocol(format!("malformed result record: {e}")))?;
    Ok(Some(HostLine::Result(result)))
}
