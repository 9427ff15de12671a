use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::AgreementEngine;
use crate::models::AssessmentJob;
use crate::registry::{ProgressSink, TaskRegistry};

/// Runs one assessment off the request path. Whatever the engine does,
/// exactly one terminal transition lands in the record; engine errors are
/// captured into the task, never left to escape the spawned context.
pub fn spawn(
  registry: Arc<TaskRegistry>,
  engine: Arc<dyn AgreementEngine>,
  task_id: Uuid,
  job: AssessmentJob,
) {
  tokio::spawn(async move {
    registry.set_running(task_id, "Starting assessment...").await;
    info!("Starting assessment task {} with files: {:?}", task_id, job.files);
    let sink = ProgressSink::new(Arc::clone(&registry), task_id);
    match engine.run(&job, &sink).await {
      Ok(outcome) => {
        registry.complete(task_id, outcome).await;
        info!("Assessment task {} completed successfully", task_id);
      }
      Err(e) => {
        error!("Assessment task {} failed: {}", task_id, e);
        registry.fail(task_id, &e.to_string()).await;
      }
    }
  });
}
