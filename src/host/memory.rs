//! Reference in-memory host application.
//!
//! Backs the bundled `harness-host` binary and the test suite with a
//! document store that honors the full [`HostApi`] contract: snapshot
//! rollback for mutation groups, handle invalidation, and per-document
//! element state.  Clones share one underlying store, so a test can keep
//! a handle for inspection while the marshal owns another.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::host::api::{DocumentId, GroupId, HostApi, HostApiError, HostResult};

#[derive(Debug, Default)]
struct Store {
    next_doc: u64,
    next_group: u64,
    docs: HashMap<DocumentId, DocState>,
    groups: HashMap<GroupId, GroupState>,
}

#[derive(Debug)]
struct DocState {
    origin: String,
    elements: Vec<String>,
    valid: bool,
}

#[derive(Debug)]
struct GroupState {
    doc: DocumentId,
    name: String,
    snapshot: Vec<String>,
}

/// In-memory [`HostApi`] implementation with shared-handle semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    store: Arc<Mutex<Store>>,
}

impl MemoryHost {
    /// Create an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a document as closed/corrupt so the next validity check
    /// fails.  Test hook for the reopen-on-invalidation path.
    pub fn poison(&self, doc: DocumentId) {
        if let Some(state) = self.lock().docs.get_mut(&doc) {
            state.valid = false;
        }
    }

    /// Snapshot of a document's element tags, for external inspection.
    #[must_use]
    pub fn elements(&self, doc: DocumentId) -> Vec<String> {
        self.lock()
            .docs
            .get(&doc)
            .map(|d| d.elements.clone())
            .unwrap_or_default()
    }

    /// Number of documents currently open in the store.
    #[must_use]
    pub fn open_documents(&self) -> usize {
        self.lock().docs.len()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&mut self, origin: String) -> DocumentId {
        let mut store = self.lock();
        store.next_doc += 1;
        let id = DocumentId(store.next_doc);
        store.docs.insert(
            id,
            DocState {
                origin,
                elements: Vec::new(),
                valid: true,
            },
        );
        id
    }
}

impl HostApi for MemoryHost {
    fn open_local(&mut self, path: &Path) -> HostResult<DocumentId> {
        Ok(self.open(path.display().to_string()))
    }

    fn open_cloud(&mut self, project: &str, model: &str) -> HostResult<DocumentId> {
        Ok(self.open(format!("{project}/{model}")))
    }

    fn is_valid(&self, doc: DocumentId) -> bool {
        self.lock().docs.get(&doc).is_some_and(|d| d.valid)
    }

    fn close(&mut self, doc: DocumentId) -> HostResult<()> {
        let mut store = self.lock();
        store
            .docs
            .remove(&doc)
            .map(|_| ())
            .ok_or_else(|| HostApiError::new(format!("unknown document {doc:?}")))?;
        store.groups.retain(|_, g| g.doc != doc);
        Ok(())
    }

    fn begin_group(&mut self, doc: DocumentId, name: &str) -> HostResult<GroupId> {
        let mut store = self.lock();
        let snapshot = {
            let state = store
                .docs
                .get(&doc)
                .ok_or_else(|| HostApiError::new(format!("unknown document {doc:?}")))?;
            if !state.valid {
                return Err(HostApiError::new(format!(
                    "document {doc:?} ({}) is no longer valid",
                    state.origin
                )));
            }
            state.elements.clone()
        };
        store.next_group += 1;
        let id = GroupId(store.next_group);
        store.groups.insert(
            id,
            GroupState {
                doc,
                name: name.to_owned(),
                snapshot,
            },
        );
        Ok(id)
    }

    fn rollback_group(&mut self, group: GroupId) -> HostResult<()> {
        let mut store = self.lock();
        let state = store
            .groups
            .remove(&group)
            .ok_or_else(|| HostApiError::new(format!("unknown group {group:?}")))?;
        tracing::debug!(group = %state.name, doc = ?state.doc, "rolling back mutation group");
        if let Some(doc) = store.docs.get_mut(&state.doc) {
            doc.elements = state.snapshot;
        }
        Ok(())
    }

    fn insert_element(&mut self, doc: DocumentId, tag: &str) -> HostResult<()> {
        let mut store = self.lock();
        let state = store
            .docs
            .get_mut(&doc)
            .ok_or_else(|| HostApiError::new(format!("unknown document {doc:?}")))?;
        if !state.valid {
            return Err(HostApiError::new(format!("document {doc:?} is no longer valid")));
        }
        state.elements.push(tag.to_owned());
        Ok(())
    }

    fn element_count(&self, doc: DocumentId) -> HostResult<usize> {
        self.lock()
            .docs
            .get(&doc)
            .map(|d| d.elements.len())
            .ok_or_else(|| HostApiError::new(format!("unknown document {doc:?}")))
    }
}
