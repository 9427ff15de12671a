use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  Pending,
  Running,
  Completed,
  Failed,
}

impl TaskStatus {
  /// Completed and failed are absorbing: no further transitions.
  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskStatus::Completed | TaskStatus::Failed)
  }
}

/// Point-in-time copy of one task's record. Readers always get a value
/// copy, never a reference into mutable state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
  pub task_id: Uuid,
  pub status: TaskStatus,
  pub progress: f64,
  pub message: String,
  pub revision: u64,
  pub created_at: DateTime<Utc>,
  #[serde(rename = "timestamp")]
  pub updated_at: DateTime<Utc>,
  pub result: Option<AgreementOutcome>,
  pub error: Option<String>,
}

impl TaskSnapshot {
  pub fn new(task_id: Uuid) -> Self {
    let now = Utc::now();
    Self {
      task_id,
      status: TaskStatus::Pending,
      progress: 0.0,
      message: "Task created".to_string(),
      revision: 0,
      created_at: now,
      updated_at: now,
      result: None,
      error: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentRequest {
  #[serde(default)]
  pub files: Vec<String>,
  pub features: Option<Vec<String>>,
  #[serde(default)]
  pub weighted: bool,
  pub def_file: Option<String>,
  #[serde(default)]
  pub merge_epistemic: bool,
  #[serde(default)]
  pub split_by_use: bool,
  #[serde(default)]
  pub only_epistemic: bool,
}

/// Validated job parameters handed to the executor, defaults resolved.
#[derive(Debug, Clone)]
pub struct AssessmentJob {
  pub files: Vec<String>,
  pub features: Option<Vec<String>>,
  pub weighted: bool,
  pub def_file: PathBuf,
  pub merge_epistemic: bool,
  pub split_by_use: bool,
  pub only_epistemic: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgreementOutcome {
  pub summary: String,
  pub metrics: BTreeMap<String, f64>,
  pub files: Vec<String>,
  pub timestamp: DateTime<Utc>,
  pub simulated: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
  pub task_id: Uuid,
  pub status: TaskStatus,
  pub message: String,
}
