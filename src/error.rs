use std::convert::Infallible;
use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::{Rejection, Reply};
use crate::models::TaskStatus;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("{0}")]
  InvalidInput(String),
  #[error("Task not found")]
  NotFound,
  #[error("Task not yet completed")]
  NotReady { status: TaskStatus },
  #[error("{message}")]
  TaskFailed { status: TaskStatus, message: String },
}

impl warp::reject::Reject for ApiError {}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (code, body) = if err.is_not_found() {
    (StatusCode::NOT_FOUND, json!({"error": "Not found"}))
  } else if let Some(api_error) = err.find::<ApiError>() {
    match api_error {
      ApiError::InvalidInput(message) => (StatusCode::BAD_REQUEST, json!({"error": message})),
      ApiError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "Task not found"})),
      ApiError::NotReady { status } => {
        (StatusCode::CONFLICT, json!({"error": "Task not yet completed", "status": status}))
      }
      ApiError::TaskFailed { status, message } => {
        (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": message, "status": status}))
      }
    }
  } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, json!({"error": e.to_string()}))
  } else if err.find::<warp::reject::InvalidQuery>().is_some() {
    (StatusCode::BAD_REQUEST, json!({"error": "Invalid query string"}))
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, json!({"error": "Method not allowed"}))
  } else {
    error!("Unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "Internal server error"}))
  };
  Ok(warp::reply::with_status(warp::reply::json(&body), code))
}
