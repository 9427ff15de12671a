use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;
use warp::Filter;
use warp::http::StatusCode;

use crate::config::Config;
use crate::engine::AgreementEngine;
use crate::error::ApiError;
use crate::executor;
use crate::models::{AssessmentJob, AssessmentRequest, StartResponse, TaskStatus};
use crate::registry::TaskRegistry;

const MIN_POLL_SECS: u64 = 1;
const MAX_POLL_SECS: u64 = 60;
const DEFAULT_POLL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct PollQuery {
  timeout: Option<u64>,
  since: Option<u64>,
}

fn with_registry(
  registry: Arc<TaskRegistry>,
) -> impl Filter<Extract = (Arc<TaskRegistry>,), Error = Infallible> + Clone {
  warp::any().map(move || registry.clone())
}

fn with_engine(
  engine: Arc<dyn AgreementEngine>,
) -> impl Filter<Extract = (Arc<dyn AgreementEngine>,), Error = Infallible> + Clone {
  warp::any().map(move || engine.clone())
}

fn with_config(config: Config) -> impl Filter<Extract = (Config,), Error = Infallible> + Clone {
  warp::any().map(move || config.clone())
}

fn sanitize_path(input: &str) -> bool {
  let re = Regex::new(r"^[\w\s./\-]+$").unwrap();
  re.is_match(input)
}

fn sanitize_feature(input: &str) -> bool {
  let re = Regex::new(r"^\w+$").unwrap();
  re.is_match(input)
}

fn validate_request(request: &AssessmentRequest) -> Result<(), String> {
  if request.files.len() < 2 {
    return Err("At least 2 files are required".into());
  }
  for file in &request.files {
    if !sanitize_path(file) {
      return Err(format!("Invalid or unsafe file path '{}'", file));
    }
  }
  if let Some(features) = &request.features {
    for feature in features {
      if !sanitize_feature(feature) {
        return Err(format!("Invalid feature name '{}'", feature));
      }
    }
  }
  Ok(())
}

pub fn start_route(
  registry: Arc<TaskRegistry>,
  engine: Arc<dyn AgreementEngine>,
  config: Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "assess" / "start")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_registry(registry))
    .and(with_engine(engine))
    .and(with_config(config))
    .and_then(handle_start)
}

async fn handle_start(
  request: AssessmentRequest,
  registry: Arc<TaskRegistry>,
  engine: Arc<dyn AgreementEngine>,
  config: Config,
) -> Result<impl warp::Reply, warp::Rejection> {
  if let Err(e) = validate_request(&request) {
    error!("Request validation failed: {}", e);
    return Err(warp::reject::custom(ApiError::InvalidInput(e)));
  }

  let job = AssessmentJob {
    files: request.files,
    features: request.features.filter(|f| !f.is_empty()),
    weighted: request.weighted,
    def_file: request
      .def_file
      .map(PathBuf::from)
      .unwrap_or_else(|| config.def_file.clone()),
    merge_epistemic: request.merge_epistemic,
    split_by_use: request.split_by_use,
    only_epistemic: request.only_epistemic,
  };

  let task_id = registry.create().await;
  executor::spawn(registry, engine, task_id, job);
  info!("Started assessment task {}", task_id);

  let response = StartResponse {
    task_id,
    status: TaskStatus::Pending,
    message: "Assessment task started".into(),
  };
  Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::ACCEPTED))
}

pub fn progress_route(
  registry: Arc<TaskRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "assess" / "progress" / Uuid)
    .and(warp::get())
    .and(warp::query::<PollQuery>())
    .and(with_registry(registry))
    .and_then(handle_progress)
}

/// Long-poll handler: suspends on the task's channel for up to the clamped
/// timeout. Timing out is an expected outcome, so both the fresh-update
/// and stale-snapshot cases reply 200.
async fn handle_progress(
  task_id: Uuid,
  query: PollQuery,
  registry: Arc<TaskRegistry>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let timeout = query
    .timeout
    .unwrap_or(DEFAULT_POLL_SECS)
    .clamp(MIN_POLL_SECS, MAX_POLL_SECS);
  let since = query.since.unwrap_or(0);
  match registry
    .wait_for_update(task_id, since, Duration::from_secs(timeout))
    .await
  {
    Some((snapshot, _timed_out)) => Ok(warp::reply::json(&snapshot)),
    None => Err(warp::reject::custom(ApiError::NotFound)),
  }
}

pub fn status_route(
  registry: Arc<TaskRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "assess" / "status" / Uuid)
    .and(warp::get())
    .and(with_registry(registry))
    .and_then(handle_status)
}

async fn handle_status(
  task_id: Uuid,
  registry: Arc<TaskRegistry>,
) -> Result<impl warp::Reply, warp::Rejection> {
  match registry.get(task_id).await {
    Some(snapshot) => Ok(warp::reply::json(&snapshot)),
    None => Err(warp::reject::custom(ApiError::NotFound)),
  }
}

pub fn result_route(
  registry: Arc<TaskRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "assess" / "result" / Uuid)
    .and(warp::get())
    .and(with_registry(registry))
    .and_then(handle_result)
}

async fn handle_result(
  task_id: Uuid,
  registry: Arc<TaskRegistry>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let Some(snapshot) = registry.get(task_id).await else {
    return Err(warp::reject::custom(ApiError::NotFound));
  };
  match snapshot.status {
    TaskStatus::Pending | TaskStatus::Running => {
      Err(warp::reject::custom(ApiError::NotReady { status: snapshot.status }))
    }
    TaskStatus::Failed => Err(warp::reject::custom(ApiError::TaskFailed {
      status: snapshot.status,
      message: snapshot.error.unwrap_or_else(|| "Task failed".into()),
    })),
    TaskStatus::Completed => Ok(warp::reply::json(&serde_json::json!({
      "status": snapshot.status,
      "result": snapshot.result,
      "timestamp": snapshot.updated_at,
    }))),
  }
}
