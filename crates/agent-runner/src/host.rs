//! Hosting collaborator seam
//!
//! The hosting-platform API client lives outside this crate. The sequencer
//! only needs to post a progress comment between passes.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

/// Source-hosting operations the sequencer relies on
#[async_trait]
pub trait HostingCollaborator: Send + Sync {
    /// Post a progress comment on the issue being fixed
    async fn post_progress_comment(&self, body: &str) -> Result<()>;
}

/// Writes comments to the log instead of a hosting platform
#[derive(Debug, Clone, Default)]
pub struct LogHost;

#[async_trait]
impl HostingCollaborator for LogHost {
    async fn post_progress_comment(&self, body: &str) -> Result<()> {
        info!("Progress comment: {}", body);
        Ok(())
    }
}

