//! HTTP API
//!
//! The request surface of the pipeline. Jobs are submitted with a form and
//! polled by job id; finished models are retrieved either per job or per
//! model id straight from the result store.

use crate::error::AppError;
use crate::jobs::{JobParams, JobStatus};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::OnceLock;
use templar_engine::models::template::TemplateID;
use templar_common::sequence::is_protein_sequence;
use uuid::Uuid;

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/submit/", post(submit))
        .route("/api/status/:job_id/", get(status))
        .route("/api/result/:job_id/", get(result))
        .route("/api/get_model_file/:file_name", get(get_model_file))
        .route("/api/get_metadata/:job_id/", get(get_metadata))
        .route("/api/get_model_if_exists/", post(get_model_if_exists))
        .route(
            "/api/get_model_file_by_model_id/:file_name",
            get(get_model_file_by_model_id),
        )
        .route(
            "/api/get_metadata_by_model_id/:model_id/",
            get(get_metadata_by_model_id),
        )
        .with_state(state)
}

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ModelRequestForm {
    pub sequence: Option<String>,
    pub species_id: Option<String>,
    pub position: Option<String>,
    pub template_id: Option<String>,
}

fn template_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9][0-9a-zA-Z]{3}_[0-9a-zA-Z]{1,2}$").unwrap())
}

fn model_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{32}_[0-9A-Za-z]+_[0-9]+-[0-9]+(_[0-9][0-9a-zA-Z]{3}-[0-9a-zA-Z]{1,2})?$")
            .unwrap()
    })
}

fn validate_form(form: &ModelRequestForm) -> Result<JobParams, AppError> {
    let sequence = form
        .sequence
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing sequence input".to_string()))?;
    if !is_protein_sequence(sequence) {
        return Err(AppError::BadRequest("Invalid sequence data".to_string()));
    }
    let sequence = sequence.to_uppercase();

    let species_id = form
        .species_id
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing species_id input".to_string()))?;
    if species_id.is_empty() || !species_id.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::BadRequest("Invalid species_id data".to_string()));
    }

    let position = match form.position.as_deref() {
        Some(position) => {
            let position: usize = position
                .parse()
                .map_err(|_| AppError::BadRequest("Invalid position data".to_string()))?;
            if position < 1 || position > sequence.len() {
                return Err(AppError::BadRequest(
                    "Residue position out of range".to_string(),
                ));
            }
            Some(position)
        },
        None => None,
    };

    let template_id = match form.template_id.as_deref() {
        Some(template_id) => {
            if !template_id_pattern().is_match(template_id) {
                return Err(AppError::BadRequest("Invalid template id data".to_string()));
            }
            Some(
                template_id
                    .parse::<TemplateID>()
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            )
        },
        None => None,
    };

    Ok(JobParams {
        sequence,
        species_id: species_id.to_string(),
        position,
        template_id,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Request a model for the given parameters; answers with a job id.
async fn submit(
    State(state): State<AppState>,
    Form(form): Form<ModelRequestForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    let params = validate_form(&form)?;
    let job_id = state.jobs.submit(state.clone(), params).await;
    Ok(Json(json!({ "jobid": job_id.to_string() })))
}

/// Request the status of a job.
async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entry = lookup_job(&state, &job_id).await?;

    let mut response = json!({ "status": entry.status.to_string() });
    if let Some(message) = entry.message {
        response["message"] = json!(message);
    }
    Ok(Json(response))
}

/// Request whether a job created a model.
async fn result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entry = lookup_job(&state, &job_id).await?;
    if entry.status != JobStatus::Success {
        return Err(AppError::BadRequest(format!(
            "{} has status {}",
            job_id, entry.status
        )));
    }
    Ok(Json(json!({ "model_created": entry.model_path.is_some() })))
}

/// The pdb file created by a modeling job.
async fn get_model_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let job_id = strip_pdb_extension(&file_name)?;
    let entry = lookup_job(&state, &job_id).await?;
    if entry.status != JobStatus::Success {
        return Err(AppError::BadRequest(format!(
            "{} has status {}",
            job_id, entry.status
        )));
    }
    let Some(model_path) = entry.model_path else {
        return Err(AppError::Internal(format!(
            "Job {} finished, but without creating a model. \
             This could be due to lack of a suitable template.",
            job_id
        )));
    };

    let contents = state.storage.extract_model(&model_path)?;
    Ok(pdb_response(contents))
}

/// Metadata of a job's model: selected targets plus per-chain alignments.
async fn get_metadata(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entry = lookup_job(&state, &job_id).await?;
    if entry.status != JobStatus::Success {
        return Err(AppError::BadRequest(format!(
            "{} has status {}",
            job_id, entry.status
        )));
    }
    let Some(model_path) = entry.model_path else {
        return Err(AppError::Internal(format!(
            "Job {} finished, but without creating a model. \
             This could be due to lack of a suitable template.",
            job_id
        )));
    };

    metadata_response(&state, &model_path)
}

/// List model ids already in the result store for the given parameters.
async fn get_model_if_exists(
    State(state): State<AppState>,
    Form(form): Form<ModelRequestForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    let params = validate_form(&form)?;

    let paths = state.storage.list_models(
        &params.sequence,
        &params.species_id,
        params.position,
        params.template_id.as_ref(),
    )?;
    let model_ids: Vec<String> = paths
        .iter()
        .map(|path| state.storage.model_name_from_path(path))
        .collect();

    Ok(Json(json!({ "model_ids": model_ids })))
}

/// The pdb file of a stored model, by model id.
async fn get_model_file_by_model_id(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let model_id = strip_pdb_extension(&file_name)?;
    let tar_path = stored_model_path(&state, &model_id)?;
    let contents = state.storage.extract_model(&tar_path)?;
    Ok(pdb_response(contents))
}

/// Metadata of a stored model, by model id.
async fn get_metadata_by_model_id(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tar_path = stored_model_path(&state, &model_id)?;
    metadata_response(&state, &tar_path)
}

// ============================================================================
// Helpers
// ============================================================================

async fn lookup_job(state: &AppState, job_id: &str) -> Result<crate::jobs::JobEntry, AppError> {
    let job_uuid: Uuid = job_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("not a job id: {}", job_id)))?;
    state
        .jobs
        .get(&job_uuid)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no such job: {}", job_id)))
}

fn strip_pdb_extension(file_name: &str) -> Result<String, AppError> {
    file_name
        .strip_suffix(".pdb")
        .or_else(|| file_name.strip_suffix(".PDB"))
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::BadRequest(format!("not a pdb file name: {}", file_name)))
}

fn stored_model_path(
    state: &AppState,
    model_id: &str,
) -> Result<std::path::PathBuf, AppError> {
    if !model_id_pattern().is_match(model_id) {
        return Err(AppError::BadRequest(format!("not a model id: {}", model_id)));
    }
    let tar_path = state.storage.tar_path_from_name(model_id);
    if !tar_path.is_file() {
        return Err(AppError::NotFound("no such model".to_string()));
    }
    Ok(tar_path)
}

fn pdb_response(contents: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "chemical/x-pdb")],
        contents,
    )
        .into_response()
}

fn metadata_response(
    state: &AppState,
    tar_path: &std::path::Path,
) -> Result<Json<serde_json::Value>, AppError> {
    let selected_targets = state.storage.extract_selected_targets(tar_path)?;

    let alignments: Vec<HashMap<String, String>> = state
        .storage
        .extract_alignments(tar_path)?
        .iter()
        .map(|alignment| {
            alignment
                .rows()
                .iter()
                .map(|(label, row)| (label.clone(), row.clone()))
                .collect()
        })
        .collect();

    Ok(Json(json!({
        "selected_targets": selected_targets,
        "alignments": alignments,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(
        sequence: Option<&str>,
        species: Option<&str>,
        position: Option<&str>,
        template: Option<&str>,
    ) -> ModelRequestForm {
        ModelRequestForm {
            sequence: sequence.map(|s| s.to_string()),
            species_id: species.map(|s| s.to_string()),
            position: position.map(|s| s.to_string()),
            template_id: template.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_validate_accepts_minimal_form() {
        let params = validate_form(&form(Some("TTCCPSIVAR"), Some("HUMAN"), None, None)).unwrap();
        assert_eq!(params.sequence, "TTCCPSIVAR");
        assert_eq!(params.species_id, "HUMAN");
        assert!(params.position.is_none());
        assert!(params.template_id.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_sequence() {
        assert!(validate_form(&form(Some("TTC-PS"), Some("HUMAN"), None, None)).is_err());
        assert!(validate_form(&form(None, Some("HUMAN"), None, None)).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_species() {
        assert!(validate_form(&form(Some("TTCCPS"), Some("H0MAN"), None, None)).is_err());
        assert!(validate_form(&form(Some("TTCCPS"), None, None, None)).is_err());
    }

    #[test]
    fn test_validate_position_bounds() {
        assert!(validate_form(&form(Some("TTCCPS"), Some("HUMAN"), Some("6"), None)).is_ok());
        assert!(validate_form(&form(Some("TTCCPS"), Some("HUMAN"), Some("7"), None)).is_err());
        assert!(validate_form(&form(Some("TTCCPS"), Some("HUMAN"), Some("0"), None)).is_err());
        assert!(validate_form(&form(Some("TTCCPS"), Some("HUMAN"), Some("x"), None)).is_err());
    }

    #[test]
    fn test_validate_template_id() {
        let params =
            validate_form(&form(Some("TTCCPS"), Some("HUMAN"), None, Some("1CRN_A"))).unwrap();
        assert_eq!(params.template_id, Some(TemplateID::new("1crn", "A")));
        assert!(validate_form(&form(Some("TTCCPS"), Some("HUMAN"), None, Some("garbage"))).is_err());
    }

    #[test]
    fn test_model_id_pattern() {
        assert!(model_id_pattern().is_match(
            "902fbdd2b1df0c4f70b4a5d23525e932_HUMAN_1-46_1crn-A"
        ));
        assert!(model_id_pattern().is_match("902fbdd2b1df0c4f70b4a5d23525e932_HUMAN_1-46"));
        assert!(!model_id_pattern().is_match("../../etc/passwd"));
    }

    #[test]
    fn test_strip_pdb_extension() {
        assert_eq!(strip_pdb_extension("abc.pdb").unwrap(), "abc");
        assert_eq!(strip_pdb_extension("abc.PDB").unwrap(), "abc");
        assert!(strip_pdb_extension("abc.cif").is_err());
    }
}
