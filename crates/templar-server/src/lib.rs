//! Templar Server
//!
//! The HTTP boundary of the modeling pipeline: request validation, job
//! submission and tracking, and result retrieval from the model store.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;

use std::sync::Arc;
use templar_engine::storage::ModelStorage;
use templar_engine::ModelPipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ModelPipeline>,
    pub storage: Arc<ModelStorage>,
    pub jobs: jobs::JobRegistry,
}

impl AppState {
    pub fn new(pipeline: Arc<ModelPipeline>) -> Self {
        let storage = pipeline.storage().clone();
        Self {
            pipeline,
            storage,
            jobs: jobs::JobRegistry::default(),
        }
    }
}
