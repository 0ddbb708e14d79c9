//! Resource lifecycle: document resolution, caching, and isolation.
//!
//! Every document the bridge opens is cached for the lifetime of the
//! host process, keyed by a normalized identifier; a test that names the
//! same model reuses the cached handle instead of reopening.  Each test
//! that touches a document runs inside a mutation group that is always
//! rolled back — never committed — so every run observes the same
//! starting state.
//!
//! All state lives in [`HostContext`], owned by the marshal thread;
//! [`ResourceManager`] is the thread-safe façade that routes each
//! operation through the marshal.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::host::api::{DocumentId, GroupId, HostApi};
use crate::host::marshal::Marshal;
use crate::{AppError, Result};

// ── Model identifiers ────────────────────────────────────────────────────────

/// A test's declared model identifier: a local path, a cloud
/// project/model pair, or both (local wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRef {
    /// Path to a model file on disk.
    pub local_path: Option<PathBuf>,
    /// Cloud project identifier.
    pub cloud_project: Option<String>,
    /// Cloud model identifier within the project.
    pub cloud_model: Option<String>,
}

impl ModelRef {
    /// Reference a local model file.
    #[must_use]
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Reference a cloud-hosted model.
    #[must_use]
    pub fn cloud(project: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            local_path: None,
            cloud_project: Some(project.into()),
            cloud_model: Some(model.into()),
        }
    }

    /// Normalize to a cache key.  Local path takes precedence when both
    /// identifier kinds are populated.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] when neither a local path nor a
    /// complete cloud pair is present.
    pub fn normalize(&self) -> Result<ModelKey> {
        if let Some(ref path) = self.local_path {
            return Ok(ModelKey::Local(normalize_path(path)));
        }
        match (&self.cloud_project, &self.cloud_model) {
            (Some(project), Some(model)) => Ok(ModelKey::Cloud {
                project: project.clone(),
                model: model.clone(),
            }),
            _ => Err(AppError::Resource(
                "model reference has neither a local path nor a complete cloud pair".into(),
            )),
        }
    }
}

/// Normalized cache key for an open document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelKey {
    /// Lexically normalized local path.
    Local(PathBuf),
    /// Cloud project/model pair.
    Cloud {
        /// Cloud project identifier.
        project: String,
        /// Cloud model identifier.
        model: String,
    },
}

/// Lexical path cleanup: drop `.` components and resolve `..` where
/// possible, without touching the filesystem (the file may not exist
/// until the host opens it).
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

// ── Marshal-owned state ──────────────────────────────────────────────────────

/// Mutable host state owned exclusively by the marshal thread.
///
/// Holds the host application handle, the document cache, the ambient
/// current document, and the set of open mutation groups.
pub struct HostContext {
    host: Box<dyn HostApi>,
    cache: HashMap<ModelKey, DocumentId>,
    current: Option<DocumentId>,
    groups: HashMap<GroupId, DocumentId>,
}

impl HostContext {
    /// Wrap a host application handle.
    #[must_use]
    pub fn new(host: Box<dyn HostApi>) -> Self {
        Self {
            host,
            cache: HashMap::new(),
            current: None,
            groups: HashMap::new(),
        }
    }

    /// Mutable access to the host application, for test bodies running
    /// on the marshal thread.
    pub fn host_mut(&mut self) -> &mut dyn HostApi {
        self.host.as_mut()
    }

    /// The ambient current document, set by the latest resolution.
    #[must_use]
    pub fn current_document(&self) -> Option<DocumentId> {
        self.current
    }

    /// Resolve a key to a live document: cache hit when still valid,
    /// reopen when invalidated, open-and-insert on miss.  The cache
    /// never holds two live entries for the same key.
    fn ensure_open(&mut self, key: &ModelKey) -> Result<DocumentId> {
        if let Some(&doc) = self.cache.get(key) {
            if self.host.is_valid(doc) {
                debug!(?key, ?doc, "resource cache hit");
                self.current = Some(doc);
                return Ok(doc);
            }
            info!(?key, ?doc, "cached document invalidated, reopening");
            if let Err(err) = self.host.close(doc) {
                debug!(?doc, %err, "closing invalidated document failed");
            }
            self.cache.remove(key);
        }

        let doc = self.open(key)?;
        self.cache.insert(key.clone(), doc);
        self.current = Some(doc);
        Ok(doc)
    }

    fn open(&mut self, key: &ModelKey) -> Result<DocumentId> {
        let opened = match key {
            ModelKey::Local(path) => self.host.open_local(path),
            ModelKey::Cloud { project, model } => self.host.open_cloud(project, model),
        };
        opened.map_err(|err| AppError::Resource(format!("cannot open {key:?}: {err}")))
    }

    fn begin_isolation(&mut self, doc: DocumentId, test_name: &str) -> Result<GroupId> {
        let group = self
            .host
            .begin_group(doc, test_name)
            .map_err(|err| AppError::Resource(format!("cannot open isolation group: {err}")))?;
        self.groups.insert(group, doc);
        Ok(group)
    }

    /// Roll the group back and dispose of it.  A rollback failure is
    /// logged and swallowed, and the document's cache entry plus the
    /// current pointer are cleared so the cache never claims a handle it
    /// cannot vouch for.
    fn end_isolation(&mut self, group: GroupId) {
        let doc = self.groups.remove(&group);
        if let Err(err) = self.host.rollback_group(group) {
            warn!(?group, %err, "isolation rollback failed; dropping cached document");
            if let Some(doc) = doc {
                self.cache.retain(|_, &mut cached| cached != doc);
                if self.current == Some(doc) {
                    self.current = None;
                }
            }
        }
    }

    /// Release every cached document.  One entry's failure does not
    /// block releasing the rest.  Called once, on host shutdown.
    pub(crate) fn release_all(&mut self) {
        self.current = None;
        for (key, doc) in self.cache.drain() {
            if let Err(err) = self.host.close(doc) {
                warn!(?key, ?doc, %err, "failed to release cached document");
            }
        }
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("cached", &self.cache.len())
            .field("current", &self.current)
            .field("open_groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

// ── Façade ───────────────────────────────────────────────────────────────────

/// Thread-safe façade over the marshal-owned resource state.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    marshal: Arc<Marshal>,
}

impl ResourceManager {
    /// Wrap a marshal handle.
    #[must_use]
    pub fn new(marshal: Arc<Marshal>) -> Self {
        Self { marshal }
    }

    /// The marshal this manager routes through.
    #[must_use]
    pub fn marshal(&self) -> &Arc<Marshal> {
        &self.marshal
    }

    /// Resolve an optional model reference to a live document.
    ///
    /// `None` means the test needs no document: no resource is acquired
    /// and no isolation scope will be opened — intentional, not an
    /// error.  The wait is cancellable: a cancellation requested while
    /// the acquisition is queued abandons the wait (the queued unit
    /// still runs, but its result is discarded).
    ///
    /// # Errors
    ///
    /// - [`AppError::Cancelled`] when `cancel` fires first.
    /// - [`AppError::Resource`] when the identifier is malformed or the
    ///   host cannot open the document.
    /// - [`AppError::Marshal`] when the marshal is gone.
    pub async fn ensure_open(
        &self,
        model: Option<&ModelRef>,
        cancel: &CancellationToken,
    ) -> Result<Option<DocumentId>> {
        let Some(model) = model else {
            return Ok(None);
        };
        let key = model.normalize()?;

        let acquire = self.marshal.submit(move |ctx| ctx.ensure_open(&key));
        tokio::select! {
            () = cancel.cancelled() => Err(AppError::Cancelled),
            resolved = acquire => resolved?.map(Some),
        }
    }

    /// Open a named isolation group for `test_name` against `doc`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] when the host rejects the group,
    /// or [`AppError::Marshal`] when the marshal is gone.
    pub async fn begin_isolation(&self, doc: DocumentId, test_name: &str) -> Result<GroupId> {
        let name = test_name.to_owned();
        self.marshal
            .submit(move |ctx| ctx.begin_isolation(doc, &name))
            .await?
    }

    /// Close an isolation group, rolling back every mutation made inside
    /// it.  Never propagates teardown failures; they are logged on the
    /// marshal thread and the affected cache entry is cleared.
    pub async fn end_isolation(&self, group: GroupId) {
        let ended = self
            .marshal
            .submit(move |ctx| ctx.end_isolation(group))
            .await;
        if let Err(err) = ended {
            warn!(?group, %err, "isolation teardown could not be submitted");
        }
    }

    /// Release all cached documents and stop the marshal thread.
    pub async fn shutdown(&self, grace: Duration) {
        // The worker releases cached documents on its way out.
        self.marshal.shutdown(grace).await;
    }
}
