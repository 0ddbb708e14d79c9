//! In-process test engine.
//!
//! Drives a loaded module through the per-test lifecycle: parameter
//! validation, document resolution, isolation scope, body execution on
//! the marshal thread, guaranteed rollback, and one streamed result per
//! case.  Execution is strictly serial — one marshal, one test at a
//! time — so completion order equals submission order and the streamed
//! results never need reordering.  An engine running over a test
//! framework that parallelizes internally would break that assumption;
//! this one cannot.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::host::marshal::panic_message;
use crate::host::module::{TestCase, TestFailure, TestInput, TestModule, TestParam};
use crate::host::resources::ResourceManager;
use crate::protocol::{LogMessage, ResultMessage};
use crate::{AppError, Result};

/// One record bound for the response stream.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A completed test.
    Result(ResultMessage),
    /// An advisory log record.
    Log(LogMessage),
}

/// Executes modules against the host through the marshal.
#[derive(Debug, Clone)]
pub struct Engine {
    resources: ResourceManager,
}

impl Engine {
    /// Build an engine over a resource manager.
    #[must_use]
    pub fn new(resources: ResourceManager) -> Self {
        Self { resources }
    }

    /// Run the selected cases of `module`, streaming one result per
    /// case through `out` as it completes.
    ///
    /// An empty `filter` selects every case; otherwise cases are matched
    /// by exact name in module declaration order, and a filter entry
    /// naming no case yields a failed result rather than silence.
    ///
    /// Cancellation is cooperative: once `cancel` fires, cases that have
    /// not started are reported `Skipped`, and the current body's
    /// token-aware code is asked to exit early.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] only when `out` is closed — the
    /// remote side is gone and there is nobody left to report to.
    pub async fn run_module(
        &self,
        module: &dyn TestModule,
        filter: &[String],
        cancel: &CancellationToken,
        out: &mpsc::Sender<Outbound>,
    ) -> Result<()> {
        let selected = select_cases(module, filter);
        info!(
            module = module.name(),
            selected = selected.len(),
            "test module loaded"
        );
        send(
            out,
            Outbound::Log(LogMessage::new(
                "info",
                format!(
                    "module '{}' loaded, {} test(s) selected",
                    module.name(),
                    selected.len()
                ),
                Some("engine".into()),
            )),
        )
        .await?;

        for selection in selected {
            let result = match selection {
                Selection::Case(case) => self.run_case(case, cancel).await,
                Selection::Missing(name) => ResultMessage::failed(
                    name.clone(),
                    0.0,
                    format!("test '{name}' not found in module '{}'", module.name()),
                ),
            };
            send(out, Outbound::Result(result)).await?;
        }

        Ok(())
    }

    /// Run one case through its full lifecycle and produce its result.
    async fn run_case(&self, case: &TestCase, cancel: &CancellationToken) -> ResultMessage {
        if cancel.is_cancelled() {
            debug!(test = %case.name, "cancelled before start, skipping");
            return ResultMessage::skipped(case.name.clone());
        }

        if let Some(TestParam::Other(type_name)) = case
            .params
            .iter()
            .find(|p| matches!(p, TestParam::Other(_)))
        {
            return ResultMessage::failed(
                case.name.clone(),
                0.0,
                format!("unsupported parameter type '{type_name}'"),
            );
        }

        let document = match self.resources.ensure_open(case.model.as_ref(), cancel).await {
            Ok(doc) => doc,
            Err(AppError::Cancelled) => {
                debug!(test = %case.name, "cancelled while acquiring resource, skipping");
                return ResultMessage::skipped(case.name.clone());
            }
            Err(err) => {
                warn!(test = %case.name, %err, "resource resolution failed");
                return ResultMessage::failed(case.name.clone(), 0.0, err.to_string());
            }
        };

        let isolation = match document {
            Some(doc) => match self.resources.begin_isolation(doc, &case.name).await {
                Ok(group) => Some(group),
                Err(err) => {
                    warn!(test = %case.name, %err, "isolation scope could not be opened");
                    return ResultMessage::failed(case.name.clone(), 0.0, err.to_string());
                }
            },
            None => None,
        };

        let (failure, duration) = self.execute_body(case, document, cancel.clone()).await;

        // The scope closes exactly once, before the result is reported,
        // on every exit path.
        if let Some(group) = isolation {
            self.resources.end_isolation(group).await;
        }

        match failure {
            None => ResultMessage::passed(case.name.clone(), duration),
            Some(f) => {
                let mut result = ResultMessage::failed(case.name.clone(), duration, f.message);
                if let Some(stack) = f.stack_trace {
                    result = result.with_stack_trace(stack);
                }
                result
            }
        }
    }

    /// Execute the body on the marshal thread, measuring duration there
    /// and folding panics into an ordinary failure.
    async fn execute_body(
        &self,
        case: &TestCase,
        document: Option<crate::host::api::DocumentId>,
        cancel: CancellationToken,
    ) -> (Option<TestFailure>, f64) {
        let body = Arc::clone(&case.body);
        let submitted = self
            .resources
            .marshal()
            .submit(move |ctx| {
                let started = Instant::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let mut input = TestInput {
                        host: ctx.host_mut(),
                        document,
                        cancel,
                    };
                    body(&mut input)
                }));
                let duration = started.elapsed().as_secs_f64();

                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(failure)) => Some(failure),
                    Err(payload) => Some(TestFailure::new(panic_message(payload.as_ref()))),
                };
                (failure, duration)
            })
            .await;

        match submitted {
            Ok(body_outcome) => body_outcome,
            Err(err) => (Some(TestFailure::new(err.to_string())), 0.0),
        }
    }
}

enum Selection<'a> {
    Case(&'a TestCase),
    Missing(&'a String),
}

/// Apply the method filter: empty selects all, otherwise exact names in
/// module declaration order, with unknown names surfaced explicitly.
fn select_cases<'a>(module: &'a dyn TestModule, filter: &'a [String]) -> Vec<Selection<'a>> {
    if filter.is_empty() {
        return module.tests().iter().map(Selection::Case).collect();
    }

    let mut selected: Vec<Selection<'a>> = module
        .tests()
        .iter()
        .filter(|case| filter.contains(&case.name))
        .map(Selection::Case)
        .collect();

    for name in filter {
        if !module.tests().iter().any(|case| &case.name == name) {
            selected.push(Selection::Missing(name));
        }
    }

    selected
}

async fn send(out: &mpsc::Sender<Outbound>, message: Outbound) -> Result<()> {
    out.send(message)
        .await
        .map_err(|_| AppError::Protocol("response stream closed by the receiver".into()))
}
