use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use medsrv_services::{
    BinaryLocator, DatabaseManager, NotebookManager, Platform, ProbeRunner, RequirementChecker,
    ServiceConfig, SystemProbeRunner,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Shared state handed to every handler.
///
/// The managers live here rather than in globals, one per gateway process.
#[derive(Clone)]
pub struct ApiState {
    pub platform: Platform,
    pub port: u16,
    pub started_at: Instant,
    pub tree_depth: usize,
    pub services: Arc<ServiceConfig>,
    pub database: Arc<DatabaseManager>,
    pub notebook: Arc<NotebookManager>,
    pub requirements: Arc<RequirementChecker>,
    pub working_dir: Arc<RwLock<Option<PathBuf>>>,
}

impl ApiState {
    /// State backed by the real host: process environment, real probe commands
    pub fn new(services: ServiceConfig, port: u16, tree_depth: usize) -> anyhow::Result<Self> {
        let platform = Platform::current()?;
        let locator = BinaryLocator::new(platform, &services.data_dir);
        let runner: Arc<dyn ProbeRunner> = Arc::new(SystemProbeRunner::new(services.probe_timeout));
        Ok(Self::with_parts(services, locator, runner, port, tree_depth))
    }

    pub fn with_parts(
        services: ServiceConfig,
        locator: BinaryLocator,
        runner: Arc<dyn ProbeRunner>,
        port: u16,
        tree_depth: usize,
    ) -> Self {
        let platform = locator.platform();
        let locator = Arc::new(locator);
        let database = Arc::new(DatabaseManager::new(locator.clone(), services.shutdown_timeout));
        let notebook = Arc::new(NotebookManager::new(locator.clone(), runner, &services));
        let requirements = Arc::new(RequirementChecker::new(locator, notebook.clone(), &services));

        Self {
            platform,
            port,
            started_at: Instant::now(),
            tree_depth,
            services: Arc::new(services),
            database,
            notebook,
            requirements,
            working_dir: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn working_dir(&self) -> Option<PathBuf> {
        self.working_dir.read().await.clone()
    }

    /// Stop every process this gateway spawned
    pub async fn shutdown(&self) {
        info!("Stopping managed services");
        if let Err(e) = self.database.stop().await {
            warn!(error = %e, "Failed to stop database");
        }
        self.notebook.shutdown().await;
    }
}
