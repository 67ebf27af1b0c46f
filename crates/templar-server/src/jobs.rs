//! In-process job registry
//!
//! Each submitted request becomes a job on a spawned tokio task; the
//! registry tracks its status and outcome for the API to answer. The
//! registry is process-local on purpose: cross-process deduplication is
//! handled by the pipeline's filesystem locks, not by the job layer, and
//! cross-host scheduling is out of scope. Jobs hitting a recoverable error
//! (a databank index mid-rebuild, a transient service failure) go through
//! one retry before failing.

use crate::AppState;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use templar_engine::models::template::TemplateID;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Job status vocabulary of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Started,
    Success,
    Failure,
    Retry,
    Revoked,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Started => "STARTED",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Retry => "RETRY",
            JobStatus::Revoked => "REVOKED",
        };
        write!(f, "{}", s)
    }
}

/// Validated model-job parameters.
#[derive(Debug, Clone)]
pub struct JobParams {
    pub sequence: String,
    pub species_id: String,
    pub position: Option<usize>,
    pub template_id: Option<TemplateID>,
}

/// Snapshot of one job's state.
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub status: JobStatus,
    /// Archive of the created model; `None` with `Success` means the job
    /// finished without finding an acceptable template.
    pub model_path: Option<PathBuf>,
    pub message: Option<String>,
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
}

impl JobRegistry {
    /// Register a job and run it on a spawned task.
    pub async fn submit(&self, state: AppState, params: JobParams) -> Uuid {
        let job_id = Uuid::new_v4();
        self.inner.write().await.insert(
            job_id,
            JobEntry {
                status: JobStatus::Pending,
                model_path: None,
                message: None,
            },
        );

        let registry = self.clone();
        tokio::spawn(async move {
            registry.set_status(job_id, JobStatus::Started).await;
            info!(job = %job_id, species = %params.species_id, "model job started");

            let mut attempt = 0;
            loop {
                attempt += 1;
                let result = state
                    .pipeline
                    .create_model(
                        &params.sequence,
                        &params.species_id,
                        params.position,
                        params.template_id.as_ref(),
                    )
                    .await;

                match result {
                    Ok(model_path) => {
                        registry.finish(job_id, model_path).await;
                        return;
                    },
                    Err(e) if e.is_recoverable() && attempt == 1 => {
                        warn!(job = %job_id, error = %e, "recoverable failure, retrying once");
                        registry.set_status(job_id, JobStatus::Retry).await;
                    },
                    Err(e) => {
                        warn!(job = %job_id, error = %e, "model job failed");
                        registry.fail(job_id, e.to_string()).await;
                        return;
                    },
                }
            }
        });

        job_id
    }

    pub async fn get(&self, job_id: &Uuid) -> Option<JobEntry> {
        self.inner.read().await.get(job_id).cloned()
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) {
        if let Some(entry) = self.inner.write().await.get_mut(&job_id) {
            entry.status = status;
        }
    }

    async fn finish(&self, job_id: Uuid, model_path: Option<PathBuf>) {
        if let Some(entry) = self.inner.write().await.get_mut(&job_id) {
            entry.status = JobStatus::Success;
            entry.model_path = model_path;
        }
    }

    async fn fail(&self, job_id: Uuid, message: String) {
        if let Some(entry) = self.inner.write().await.get_mut(&job_id) {
            entry.status = JobStatus::Failure;
            entry.message = Some(message);
        }
    }
}
