//! Interface contract between the bridge and the host application.
//!
//! The host application's document/model layer is an external
//! collaborator: the bridge only needs to open a document by identifier,
//! run a mutation group against it, and roll that group back.  Everything
//! here is expressed through [`HostApi`] so the execution subsystem never
//! touches application types directly.

use std::fmt::{Display, Formatter};
use std::path::Path;

/// Result alias for host application calls.
pub type HostResult<T> = std::result::Result<T, HostApiError>;

/// Opaque handle to an open document inside the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u64);

/// Opaque handle to an open mutation group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

/// Failure reported by the host application itself.
#[derive(Debug)]
pub struct HostApiError {
    message: String,
}

impl HostApiError {
    /// Wrap a host-application failure message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for HostApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HostApiError {}

/// The mutation-safe surface of the host application.
///
/// Implementations are owned by the execution marshal and only ever
/// called from its single thread; they do not need interior
/// synchronization of their own.
pub trait HostApi: Send {
    /// Open a document from a local path.
    ///
    /// # Errors
    ///
    /// Returns [`HostApiError`] when the document cannot be opened.
    fn open_local(&mut self, path: &Path) -> HostResult<DocumentId>;

    /// Open a document from a cloud project/model pair.
    ///
    /// # Errors
    ///
    /// Returns [`HostApiError`] when the document cannot be opened.
    fn open_cloud(&mut self, project: &str, model: &str) -> HostResult<DocumentId>;

    /// Whether a previously opened document is still usable.
    fn is_valid(&self, doc: DocumentId) -> bool;

    /// Close an open document.
    ///
    /// # Errors
    ///
    /// Returns [`HostApiError`] when the handle is unknown or the close
    /// fails inside the application.
    fn close(&mut self, doc: DocumentId) -> HostResult<()>;

    /// Open a named mutation group against a document.
    ///
    /// # Errors
    ///
    /// Returns [`HostApiError`] when the document is unknown or invalid.
    fn begin_group(&mut self, doc: DocumentId, name: &str) -> HostResult<GroupId>;

    /// Roll a mutation group back, discarding every change made inside
    /// it, and dispose of the group.
    ///
    /// # Errors
    ///
    /// Returns [`HostApiError`] when the group is unknown or the host
    /// rejects the rollback.
    fn rollback_group(&mut self, group: GroupId) -> HostResult<()>;

    /// Insert one element into a document (the minimal mutation hook).
    ///
    /// # Errors
    ///
    /// Returns [`HostApiError`] when the document is unknown or invalid.
    fn insert_element(&mut self, doc: DocumentId, tag: &str) -> HostResult<()>;

    /// Number of elements currently in a document.
    ///
    /// # Errors
    ///
    /// Returns [`HostApiError`] when the document is unknown.
    fn element_count(&self, doc: DocumentId) -> HostResult<usize>;
}
