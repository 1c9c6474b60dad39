//! Listing of matched delete markers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{error, info};
use unmark_pool::{BatchAction, WorkerId};
use unmark_types::{Status, VersionEntry};

use crate::context::RunContext;
use crate::error::EngineError;

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes one stack-relative key per line for every matched delete marker.
///
/// Workers share the output behind a mutex; each batch is written and flushed
/// as one unit.
pub struct ListExecutor {
    ctx: Arc<RunContext>,
    output: Mutex<Output>,
}

impl ListExecutor {
    /// List to `path`, truncating it, or to standard output when `None`.
    pub async fn create(ctx: Arc<RunContext>, path: Option<&Path>) -> Result<Self, EngineError> {
        let output: Output = match path {
            Some(path) => Box::new(
                tokio::fs::File::create(path)
                    .await
                    .map_err(EngineError::ListOutput)?,
            ),
            None => Box::new(tokio::io::stdout()),
        };
        Ok(Self::with_writer(ctx, output))
    }

    /// List to an arbitrary writer.
    pub fn with_writer(ctx: Arc<RunContext>, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            ctx,
            output: Mutex::new(Box::new(writer)),
        }
    }
}

#[async_trait]
impl BatchAction<VersionEntry> for ListExecutor {
    async fn run(&self, _worker: &WorkerId, batch: Vec<VersionEntry>) {
        let mut lines = String::new();
        for entry in &batch {
            let key = self.ctx.strip_stack(&entry.key);
            lines.push_str(key);
            lines.push('\n');
            info!(
                status = %Status::List,
                pid = self.ctx.pid,
                key = %entry.key,
                versionid = %entry.version_id,
                lastmodified = %entry.last_modified,
                "delete marker listed"
            );
        }

        let mut output = self.output.lock().await;
        let written = async {
            output.write_all(lines.as_bytes()).await?;
            output.flush().await
        }
        .await;
        if let Err(e) = written {
            error!(status = %Status::Error, pid = self.ctx.pid, count = batch.len(), error = %e, "list output write failed");
        }
    }
}
