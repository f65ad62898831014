//! Document service: owns the collaborators and the background task set.

mod document_processing;

pub use document_processing::UploadRequest;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::analyzer::{AnalyzerClient, ImageAnalyzer};
use crate::config::ServiceConfig;
use crate::db::Database;
use crate::error::ServiceResult;
use crate::rasterizer::{CommandRasterizer, PageRasterizer};
use crate::storage::{BlobStore, FsBlobStore};

/// Main service coordinator
pub struct DocumentService {
    pub config: Arc<ServiceConfig>,
    pub db: Arc<Database>,
    pub blobs: Arc<dyn BlobStore>,
    pub analyzer: Arc<dyn ImageAnalyzer>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    /// Detached extraction workflows
    tasks: TaskTracker,
}

impl DocumentService {
    /// Create the service with its production collaborators
    pub fn new(config: Arc<ServiceConfig>, db: Arc<Database>) -> ServiceResult<Self> {
        info!("Initializing document service");

        let blobs = Arc::new(FsBlobStore::new(config.storage.blob_root()));
        let analyzer = Arc::new(AnalyzerClient::new(config.analyzer.clone())?);
        let rasterizer = Arc::new(CommandRasterizer::new(config.rasterizer.clone()));

        if config.analyzer.api_key.is_empty() {
            warn!(url = %config.analyzer.base_url, "No analyzer API key configured");
        }
        info!(
            url = %config.analyzer.base_url,
            model = %config.analyzer.model,
            rasterizer = %config.rasterizer.program,
            "Document service initialized"
        );

        Ok(Self::with_components(config, db, blobs, analyzer, rasterizer))
    }

    pub fn with_components(
        config: Arc<ServiceConfig>,
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        analyzer: Arc<dyn ImageAnalyzer>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            config,
            db,
            blobs,
            analyzer,
            rasterizer,
            tasks: TaskTracker::new(),
        }
    }

    /// Number of extraction workflows currently running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait up to `grace` for running workflows. Returns false if some were
    /// still running when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tasks.close();
        let in_flight = self.tasks.len();
        if in_flight > 0 {
            info!(in_flight, grace_secs = grace.as_secs(), "Waiting for extraction workflows");
        }

        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    in_flight = self.tasks.len(),
                    "Shutdown grace period elapsed; abandoned documents remain in processing"
                );
                false
            }
        }
    }
}
