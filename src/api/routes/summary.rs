//! Summary job endpoints.
//!
//! - `POST /summarize` starts a run in the job slot (replacing any active run)
//! - `GET /status` reports the slot
//! - `POST /cancel` cancels the active run

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::config::Config;
use crate::credentials::{resolve_api_key, CredentialStore, API_KEY_ENV};
use crate::pipeline::{JobPhase, JobRunner, JobStatus, Pipeline, RunOptions};
use crate::summarizer::{build_service, ProviderSettings, SUPPORTED_PROVIDERS};
use crate::window::{WindowAnchor, WindowDuration};

/// Body of `POST /summarize`. Unset fields fall back to the configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummarizeRequest {
    pub archive_path: PathBuf,
    #[serde(default)]
    pub window: Option<WindowDuration>,
    #[serde(default)]
    pub anchor: Option<WindowAnchor>,
    #[serde(default)]
    pub verbosity: Option<f32>,
    #[serde(default)]
    pub include_media: Option<bool>,
    #[serde(default)]
    pub max_media_count: Option<usize>,
    #[serde(default)]
    pub provider: Option<String>,
    /// Stop after assembling the request
    #[serde(default)]
    pub dry_run: bool,
    /// Hold the response until the run finishes
    #[serde(default)]
    pub wait: bool,
}

#[derive(Clone)]
pub struct SummaryState {
    pub runner: Arc<JobRunner>,
    pub config: Config,
    pub credentials: Arc<CredentialStore>,
}

pub fn router(state: SummaryState) -> Router {
    Router::new()
        .route("/summarize", post(start_summary))
        .route("/status", get(job_status))
        .route("/cancel", post(cancel_summary))
        .with_state(state)
}

async fn start_summary(
    State(state): State<SummaryState>,
    Json(req): Json<SummarizeRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !req.archive_path.is_file() {
        return Err(ApiError::not_found(format!(
            "Archive not found: {}",
            req.archive_path.display()
        )));
    }
    if let Some(verbosity) = req.verbosity {
        if !(0.0..=1.0).contains(&verbosity) {
            return Err(ApiError::bad_request("verbosity must be between 0.0 and 1.0"));
        }
    }

    let mut config = state.config.clone();
    if let Some(provider) = &req.provider {
        config.service.provider = provider.trim().to_lowercase();
    }
    let summary = &mut config.summary;
    if let Some(window) = req.window {
        summary.window = window;
    }
    if let Some(anchor) = req.anchor {
        summary.anchor = anchor;
    }
    if let Some(verbosity) = req.verbosity {
        summary.verbosity = verbosity;
    }
    if let Some(include_media) = req.include_media {
        summary.include_media = include_media;
    }
    if let Some(max_media_count) = req.max_media_count {
        summary.max_media_count = max_media_count;
    }

    let service = if req.dry_run {
        None
    } else {
        let provider = config.service.provider.clone();
        if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
            return Err(ApiError::bad_request(format!(
                "Unknown provider '{}'. Supported: {}",
                provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }
        let (api_key, _) = resolve_api_key(
            None,
            std::env::var(API_KEY_ENV).ok(),
            &state.credentials,
            &provider,
            || Ok(None),
        )?
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "No API key for {provider}. Set {API_KEY_ENV} or store one with `chat-digest config set-key`"
            ))
        })?;
        Some(build_service(
            &provider,
            ProviderSettings::from_config(&config.service, api_key),
        )?)
    };

    let pipeline = Pipeline::new(&config, service);
    let options = RunOptions::from_config(req.archive_path.clone(), &config.summary);
    let job_id = state
        .runner
        .start(move |cancel, progress| async move { pipeline.run(options, cancel, progress).await })
        .await;
    info!("Summary job {} accepted for {:?}", job_id, req.archive_path);

    if !req.wait {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "job_id": job_id, "phase": JobPhase::Running.as_str() })),
        ));
    }

    let status = state.runner.wait().await;
    finished_response(status).map(|body| (StatusCode::OK, body))
}

fn finished_response(status: JobStatus) -> ApiResult<Json<Value>> {
    match status.phase {
        JobPhase::Completed => {
            let result = status
                .last_result
                .ok_or_else(|| ApiError::internal("Run completed without a result"))?;
            Ok(Json(json!({
                "job_id": status.job_id,
                "phase": status.phase.as_str(),
                "result": result,
            })))
        }
        JobPhase::Cancelled => Err(ApiError::new(StatusCode::CONFLICT, "Run was cancelled")),
        JobPhase::Failed => {
            let message = status
                .last_error
                .unwrap_or_else(|| "Run failed".to_string());
            Err(match status.error_kind {
                Some(kind) => ApiError::service(message, kind),
                None => ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, message),
            })
        }
        JobPhase::Idle | JobPhase::Running => Err(ApiError::internal("Run did not finish")),
    }
}

async fn job_status(State(state): State<SummaryState>) -> Json<JobStatus> {
    Json(state.runner.status().get().await)
}

async fn cancel_summary(State(state): State<SummaryState>) -> Json<Value> {
    let cancelled = state.runner.cancel().await;
    Json(json!({ "cancelled": cancelled }))
}
