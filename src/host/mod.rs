//! Host-side execution subsystem.
//!
//! Everything that runs inside the host application process: the
//! channel listener, the single-threaded execution marshal, the
//! resource lifecycle manager, the test engine, and the module
//! contract.  [`HostService`] wires them together for the bundled
//! binary and for in-process integration tests.

pub mod api;
pub mod cancel;
pub mod diagnostics;
pub mod engine;
pub mod listener;
pub mod marshal;
pub mod memory;
pub mod module;
pub mod resources;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::host::api::HostApi;
use crate::host::engine::Engine;
use crate::host::listener::Listener;
use crate::host::marshal::Marshal;
use crate::host::module::ModuleLoader;
use crate::host::resources::{HostContext, ResourceManager};
use crate::Result;

/// The composed host side: marshal, resources, engine, listener.
#[derive(Debug)]
pub struct HostService {
    resources: ResourceManager,
    listener: Listener,
    grace: Duration,
}

impl HostService {
    /// Compose the host service around a host application handle.
    ///
    /// Spawns the marshal worker thread immediately; the listener does
    /// not bind until [`HostService::serve`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Marshal`] when the marshal thread
    /// cannot be spawned.
    pub fn new(
        host: Box<dyn HostApi>,
        loader: Arc<dyn ModuleLoader>,
        channel_name: String,
        grace: Duration,
    ) -> Result<Self> {
        let marshal = Arc::new(Marshal::spawn(HostContext::new(host))?);
        let resources = ResourceManager::new(marshal);
        let engine = Engine::new(resources.clone());
        let listener = Listener::new(channel_name, loader, engine, grace);
        Ok(Self {
            resources,
            listener,
            grace,
        })
    }

    /// Serve the test channel until `ct` fires, then release every
    /// cached resource and stop the marshal.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Connect`] when the listening endpoint
    /// cannot be created; resources are still released on that path.
    pub async fn serve(self, ct: CancellationToken) -> Result<()> {
        let served = self.listener.serve(ct).await;
        self.resources.shutdown(self.grace).await;
        info!("host service stopped");
        served
    }
}
