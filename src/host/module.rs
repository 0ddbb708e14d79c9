//! Test module contract.
//!
//! Loaded test code is invoked only through this explicit interface —
//! a module names itself and exposes its cases; a loader resolves the
//! artifact named in a command to a module instance.  There is no
//! name-based reflective lookup anywhere in the execution path.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::host::api::{DocumentId, HostApi};
use crate::host::resources::ModelRef;
use crate::{AppError, Result};

/// Injected arguments a test body receives on the marshal thread.
pub struct TestInput<'a> {
    /// The host application's mutation-safe surface.
    pub host: &'a mut dyn HostApi,
    /// The resolved document, when the case declared a model.
    pub document: Option<DocumentId>,
    /// Cooperative cancellation token for long-running bodies.
    pub cancel: CancellationToken,
}

/// A test body's failure, unwrapped to its innermost cause.
#[derive(Debug, Clone)]
pub struct TestFailure {
    /// Failure message.
    pub message: String,
    /// Optional captured backtrace or context dump.
    pub stack_trace: Option<String>,
}

impl TestFailure {
    /// Build a failure from a message alone.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }
}

impl<E: std::error::Error> From<E> for TestFailure {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Parameter shape a test case declares.
///
/// Only the shapes the marshal can inject are supported; anything else
/// is rejected before the body is ever invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestParam {
    /// The host application surface.
    Host,
    /// The resolved document handle.
    Document,
    /// The cooperative cancellation token.
    Cancel,
    /// An unsupported shape, carried by its declared type name.
    Other(String),
}

/// A test body: synchronous, executed on the marshal thread.
pub type TestBody =
    Arc<dyn Fn(&mut TestInput<'_>) -> std::result::Result<(), TestFailure> + Send + Sync>;

/// One executable test case declared by a module.
#[derive(Clone)]
pub struct TestCase {
    /// Fully-qualified test name (`module::case`).
    pub name: String,
    /// Model the case needs open, if any.  `None` means the case runs
    /// without a document and without an isolation scope.
    pub model: Option<ModelRef>,
    /// Declared parameter shapes, validated before invocation.
    pub params: Vec<TestParam>,
    /// The body itself.
    pub body: TestBody,
}

impl TestCase {
    /// Declare a case with no model and no parameters.
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut TestInput<'_>) -> std::result::Result<(), TestFailure>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            model: None,
            params: Vec::new(),
            body: Arc::new(body),
        }
    }

    /// Attach a model reference.
    #[must_use]
    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model = Some(model);
        self
    }

    /// Declare the case's parameter shapes.
    #[must_use]
    pub fn with_params(mut self, params: Vec<TestParam>) -> Self {
        self.params = params;
        self
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A loaded test module: a name plus its declared cases.
pub trait TestModule: Send + Sync + std::fmt::Debug {
    /// The module's display name.
    fn name(&self) -> &str;

    /// The module's cases, in declaration order.
    fn tests(&self) -> &[TestCase];
}

/// Resolves the artifact string named in a command to a module.
pub trait ModuleLoader: Send + Sync {
    /// Load the module identified by `artifact`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Module`] when the artifact is unknown or the
    /// module fails to load.
    fn load(&self, artifact: &str) -> Result<Box<dyn TestModule>>;
}

/// A module declared directly in code.
#[derive(Debug)]
pub struct StaticModule {
    name: String,
    tests: Vec<TestCase>,
}

impl StaticModule {
    /// Build a module from its name and cases.
    #[must_use]
    pub fn new(name: impl Into<String>, tests: Vec<TestCase>) -> Self {
        Self {
            name: name.into(),
            tests,
        }
    }
}

impl TestModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn tests(&self) -> &[TestCase] {
        &self.tests
    }
}

type ModuleFactory = Arc<dyn Fn() -> Box<dyn TestModule> + Send + Sync>;

/// Loader backed by a registry of module factories keyed by artifact.
#[derive(Default, Clone)]
pub struct StaticLoader {
    modules: HashMap<String, ModuleFactory>,
}

impl StaticLoader {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `artifact`, replacing any previous one.
    pub fn register(
        &mut self,
        artifact: impl Into<String>,
        factory: impl Fn() -> Box<dyn TestModule> + Send + Sync + 'static,
    ) {
        self.modules.insert(artifact.into(), Arc::new(factory));
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, artifact: &str) -> Result<Box<dyn TestModule>> {
        self.modules
            .get(artifact)
            .map(|factory| factory())
            .ok_or_else(|| AppError::Module(format!("unknown test artifact '{artifact}'")))
    }
}

impl std::fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticLoader")
            .field("artifacts", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
