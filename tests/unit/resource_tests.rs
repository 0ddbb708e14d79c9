//! Unit tests for the resource lifecycle manager.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use host_harness::host::api::{DocumentId, GroupId, HostApi, HostResult};
use host_harness::host::marshal::Marshal;
use host_harness::host::memory::MemoryHost;
use host_harness::host::resources::{HostContext, ModelKey, ModelRef, ResourceManager};
use host_harness::AppError;

fn manager_over(host: MemoryHost) -> ResourceManager {
    let ctx = HostContext::new(Box::new(host));
    let marshal = Arc::new(Marshal::spawn(ctx).expect("marshal must spawn"));
    ResourceManager::new(marshal)
}

#[tokio::test]
async fn no_identifier_means_no_resource() {
    let manager = manager_over(MemoryHost::new());
    let resolved = manager
        .ensure_open(None, &CancellationToken::new())
        .await
        .expect("must succeed");
    assert!(resolved.is_none(), "no identifier must yield no document");
}

/// `EnsureOpen` is idempotent: the same identifier returns the same
/// cached handle without reopening.
#[tokio::test]
async fn ensure_open_reuses_the_cached_handle() {
    let host = MemoryHost::new();
    let observer = host.clone();
    let manager = manager_over(host);
    let model = ModelRef::local("models/a.model");
    let cancel = CancellationToken::new();

    let first = manager
        .ensure_open(Some(&model), &cancel)
        .await
        .expect("first open must succeed");
    let second = manager
        .ensure_open(Some(&model), &cancel)
        .await
        .expect("second open must succeed");

    assert_eq!(first, second, "the cached handle must be reused");
    assert_eq!(observer.open_documents(), 1, "no second document may be opened");
}

/// Lexically different spellings of one path normalize to one cache
/// entry.
#[tokio::test]
async fn path_spellings_share_a_cache_entry() {
    let host = MemoryHost::new();
    let observer = host.clone();
    let manager = manager_over(host);
    let cancel = CancellationToken::new();

    let plain = manager
        .ensure_open(Some(&ModelRef::local("models/a.model")), &cancel)
        .await
        .expect("open must succeed");
    let dotted = manager
        .ensure_open(Some(&ModelRef::local("./models/extra/../a.model")), &cancel)
        .await
        .expect("open must succeed");

    assert_eq!(plain, dotted);
    assert_eq!(observer.open_documents(), 1);
}

#[test]
fn local_path_takes_precedence_over_cloud_pair() {
    let both = ModelRef {
        local_path: Some("models/a.model".into()),
        cloud_project: Some("project-1".into()),
        cloud_model: Some("model-a".into()),
    };
    match both.normalize().expect("normalize must succeed") {
        ModelKey::Local(path) => assert_eq!(path, Path::new("models/a.model")),
        other => panic!("local path must win, got: {other:?}"),
    }
}

#[test]
fn empty_model_reference_is_rejected() {
    let empty = ModelRef::default();
    assert!(matches!(empty.normalize(), Err(AppError::Resource(_))));

    let half_cloud = ModelRef {
        cloud_project: Some("project-1".into()),
        ..ModelRef::default()
    };
    assert!(matches!(half_cloud.normalize(), Err(AppError::Resource(_))));
}

/// An invalidated handle is closed and reopened; the cache never keeps
/// two live entries for one identifier.
#[tokio::test]
async fn invalidated_documents_are_reopened() {
    let host = MemoryHost::new();
    let observer = host.clone();
    let manager = manager_over(host);
    let model = ModelRef::cloud("project-1", "model-a");
    let cancel = CancellationToken::new();

    let first = manager
        .ensure_open(Some(&model), &cancel)
        .await
        .expect("open must succeed")
        .expect("a document must resolve");

    observer.poison(first);

    let second = manager
        .ensure_open(Some(&model), &cancel)
        .await
        .expect("reopen must succeed")
        .expect("a document must resolve");

    assert_ne!(first, second, "a fresh handle must be opened");
    assert_eq!(observer.open_documents(), 1, "the dead entry must be gone");
}

/// The isolation scope always rolls back: mutations made inside the
/// group vanish when it ends.
#[tokio::test]
async fn isolation_rolls_back_mutations() {
    let host = MemoryHost::new();
    let observer = host.clone();
    let manager = manager_over(host);
    let cancel = CancellationToken::new();

    let doc = manager
        .ensure_open(Some(&ModelRef::local("models/a.model")), &cancel)
        .await
        .expect("open must succeed")
        .expect("a document must resolve");

    let group = manager
        .begin_isolation(doc, "suite::mutating_case")
        .await
        .expect("isolation must open");

    manager
        .marshal()
        .submit(move |ctx| ctx.host_mut().insert_element(doc, "scratch"))
        .await
        .expect("submit must succeed")
        .expect("insert must succeed");
    assert_eq!(observer.elements(doc), vec!["scratch".to_owned()]);

    manager.end_isolation(group).await;
    assert!(observer.elements(doc).is_empty(), "rollback must erase the mutation");
}

/// Host wrapper whose rollback always fails, for the teardown-failure
/// path.
struct BrokenRollbackHost(MemoryHost);

impl HostApi for BrokenRollbackHost {
    fn open_local(&mut self, path: &Path) -> HostResult<DocumentId> {
        self.0.open_local(path)
    }
    fn open_cloud(&mut self, project: &str, model: &str) -> HostResult<DocumentId> {
        self.0.open_cloud(project, model)
    }
    fn is_valid(&self, doc: DocumentId) -> bool {
        self.0.is_valid(doc)
    }
    fn close(&mut self, doc: DocumentId) -> HostResult<()> {
        self.0.close(doc)
    }
    fn begin_group(&mut self, doc: DocumentId, name: &str) -> HostResult<GroupId> {
        self.0.begin_group(doc, name)
    }
    fn rollback_group(&mut self, _group: GroupId) -> HostResult<()> {
        Err(host_harness::host::api::HostApiError::new("rollback rejected"))
    }
    fn insert_element(&mut self, doc: DocumentId, tag: &str) -> HostResult<()> {
        self.0.insert_element(doc, tag)
    }
    fn element_count(&self, doc: DocumentId) -> HostResult<usize> {
        self.0.element_count(doc)
    }
}

/// A teardown failure never propagates, and the cache entry is cleared
/// so the next resolution opens a fresh handle.
#[tokio::test]
async fn rollback_failure_is_swallowed_and_cache_cleared() {
    let inner = MemoryHost::new();
    let observer = inner.clone();
    let ctx = HostContext::new(Box::new(BrokenRollbackHost(inner)));
    let marshal = Arc::new(Marshal::spawn(ctx).expect("marshal must spawn"));
    let manager = ResourceManager::new(marshal);
    let model = ModelRef::local("models/a.model");
    let cancel = CancellationToken::new();

    let first = manager
        .ensure_open(Some(&model), &cancel)
        .await
        .expect("open must succeed")
        .expect("a document must resolve");
    let group = manager
        .begin_isolation(first, "suite::case")
        .await
        .expect("isolation must open");

    // Does not panic and does not return an error.
    manager.end_isolation(group).await;

    let second = manager
        .ensure_open(Some(&model), &cancel)
        .await
        .expect("reopen must succeed")
        .expect("a document must resolve");
    assert_ne!(
        first, second,
        "the unrolled-back document must not be served from cache"
    );
    assert!(observer.open_documents() >= 1);
}

/// A cancellation during acquisition abandons the wait without failing
/// the manager.
#[tokio::test]
async fn cancelled_acquisition_reports_cancelled() {
    let manager = manager_over(MemoryHost::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = manager
        .ensure_open(Some(&ModelRef::local("models/a.model")), &cancel)
        .await;
    assert!(matches!(outcome, Err(AppError::Cancelled)));
}

/// Shutdown releases every cached entry; the worker thread drains and
/// stops.
#[tokio::test]
async fn shutdown_releases_all_cached_documents() {
    let host = MemoryHost::new();
    let observer = host.clone();
    let manager = manager_over(host);
    let cancel = CancellationToken::new();

    manager
        .ensure_open(Some(&ModelRef::local("models/a.model")), &cancel)
        .await
        .expect("open must succeed");
    manager
        .ensure_open(Some(&ModelRef::cloud("project-1", "model-a")), &cancel)
        .await
        .expect("open must succeed");
    assert_eq!(observer.open_documents(), 2);

    manager.shutdown(Duration::from_secs(5)).await;
    assert_eq!(observer.open_documents(), 0, "every cached entry must be released");
}
