//! Application state.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use hclip_worker::JobService;

use crate::config::ApiConfig;

/// Model names reported by the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct ModelInfo {
    pub transcription: String,
    pub analysis: String,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: Arc<JobService>,
    pub models: ModelInfo,
    /// Where multipart uploads are staged before being handed to the service
    pub upload_dir: PathBuf,
}

impl AppState {
    /// Create new application state. Uploads left behind by a previous
    /// process are removed.
    pub async fn new(config: ApiConfig, service: Arc<JobService>, models: ModelInfo) -> std::io::Result<Self> {
        let upload_dir = service.config().data_dir.join("uploads");
        match tokio::fs::remove_dir_all(&upload_dir).await {
            Ok(()) => info!("Cleared stale uploads in {}", upload_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not clear {}: {}", upload_dir.display(), e),
        }
        tokio::fs::create_dir_all(&upload_dir).await?;

        Ok(Self {
            config,
            service,
            models,
            upload_dir,
        })
    }
}
