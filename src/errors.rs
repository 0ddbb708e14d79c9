//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Channel discovery or connection failure, including launch failures.
    Connect(String),
    /// Wire protocol failure: framing, malformed JSON, premature close.
    Protocol(String),
    /// Execution marshal failure: queue shut down, panicked unit of work.
    Marshal(String),
    /// Resource resolution or isolation failure.
    Resource(String),
    /// Test module loading or contract failure.
    Module(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Cooperative cancellation was requested; not a fault.
    Cancelled,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Connect(msg) => write!(f, "connect: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Marshal(msg) => write!(f, "marshal: {msg}"),
            Self::Resource(msg) => write!(f, "resource: {msg}"),
            Self::Module(msg) => write!(f, "module: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
