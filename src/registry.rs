//! In-memory task registry. Each task owns a watch channel that doubles as
//! the record store and the wait/notify primitive for long polling: the
//! sender retains the latest snapshot, every mutation publishes a new one,
//! and all subscribed pollers wake on a single publish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{AgreementOutcome, TaskSnapshot, TaskStatus};

pub struct TaskRegistry {
  tasks: RwLock<HashMap<Uuid, watch::Sender<TaskSnapshot>>>,
}

impl TaskRegistry {
  pub fn new() -> Self {
    Self {
      tasks: RwLock::new(HashMap::new()),
    }
  }

  pub async fn create(&self) -> Uuid {
    let task_id = Uuid::new_v4();
    let (tx, _rx) = watch::channel(TaskSnapshot::new(task_id));
    self.tasks.write().await.insert(task_id, tx);
    task_id
  }

  pub async fn get(&self, task_id: Uuid) -> Option<TaskSnapshot> {
    self.tasks.read().await.get(&task_id).map(|tx| tx.borrow().clone())
  }

  pub async fn len(&self) -> usize {
    self.tasks.read().await.len()
  }

  /// Applies one mutation: bumps the revision, refreshes the update
  /// timestamp and wakes every attached poller. Terminal records reject
  /// further mutation.
  async fn mutate(&self, task_id: Uuid, apply: impl FnOnce(&mut TaskSnapshot)) -> bool {
    let tasks = self.tasks.read().await;
    let Some(tx) = tasks.get(&task_id) else {
      warn!("Task {} not found", task_id);
      return false;
    };
    if tx.borrow().status.is_terminal() {
      error!("Task {} already terminal, dropping update", task_id);
      return false;
    }
    tx.send_modify(|snap| {
      apply(snap);
      snap.revision += 1;
      snap.updated_at = Utc::now();
    });
    true
  }

  pub async fn set_running(&self, task_id: Uuid, message: &str) -> bool {
    self
      .mutate(task_id, |snap| {
        snap.status = TaskStatus::Running;
        snap.message = message.to_string();
      })
      .await
  }

  /// Progress is clamped non-decreasing; a stale or out-of-order report
  /// keeps the last known value.
  pub async fn report_progress(&self, task_id: Uuid, progress: f64, message: &str) -> bool {
    self
      .mutate(task_id, |snap| {
        snap.progress = snap.progress.max(progress.min(1.0));
        snap.message = message.to_string();
      })
      .await
  }

  pub async fn complete(&self, task_id: Uuid, result: AgreementOutcome) -> bool {
    self
      .mutate(task_id, |snap| {
        snap.status = TaskStatus::Completed;
        snap.progress = 1.0;
        snap.message = "Task completed successfully".to_string();
        snap.result = Some(result);
        snap.error = None;
      })
      .await
  }

  pub async fn fail(&self, task_id: Uuid, error: &str) -> bool {
    self
      .mutate(task_id, |snap| {
        snap.status = TaskStatus::Failed;
        snap.message = "Task failed".to_string();
        snap.error = Some(error.to_string());
        snap.result = None;
      })
      .await
  }

  /// Long-poll wait. Returns immediately when the task's revision already
  /// passed `since`, otherwise suspends until the next publish or the
  /// timeout, whichever comes first. The flag reports whether the timeout
  /// fired. A publish racing the timeout is never lost: the watch channel
  /// tracks versions, so anything sent before the waiter gives up is seen.
  pub async fn wait_for_update(
    &self,
    task_id: Uuid,
    since: u64,
    timeout: Duration,
  ) -> Option<(TaskSnapshot, bool)> {
    let mut rx = {
      let tasks = self.tasks.read().await;
      tasks.get(&task_id)?.subscribe()
    };
    {
      let current = rx.borrow();
      if current.revision > since {
        return Some((current.clone(), false));
      }
    }
    match tokio::time::timeout(timeout, rx.changed()).await {
      Ok(Ok(())) => {
        let snap = rx.borrow().clone();
        Some((snap, false))
      }
      // Sender gone: the task was evicted mid-wait; hand back the final
      // snapshot the channel still holds.
      Ok(Err(_)) => {
        let snap = rx.borrow().clone();
        Some((snap, false))
      }
      Err(_) => {
        let snap = rx.borrow().clone();
        Some((snap, true))
      }
    }
  }

  /// Evicts one task. Dropping the sender releases any poller still
  /// suspended on the channel; snapshots already handed out stay valid.
  pub async fn remove(&self, task_id: Uuid) -> bool {
    self.tasks.write().await.remove(&task_id).is_some()
  }

  /// Sweeps terminal tasks whose last update is older than `retention`.
  pub async fn evict_finished(&self, retention: Duration) -> usize {
    let cutoff = Utc::now() - chrono::Duration::seconds(retention.as_secs() as i64);
    let mut tasks = self.tasks.write().await;
    let before = tasks.len();
    tasks.retain(|_, tx| {
      let snap = tx.borrow();
      !(snap.status.is_terminal() && snap.updated_at < cutoff)
    });
    let evicted = before - tasks.len();
    if evicted > 0 {
      info!("Evicted {} finished task(s)", evicted);
    }
    evicted
  }

  pub fn spawn_retention_sweep(self: &Arc<Self>, interval: Duration, retention: Duration) {
    let registry = Arc::clone(self);
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(interval).await;
        registry.evict_finished(retention).await;
      }
    });
  }
}

impl Default for TaskRegistry {
  fn default() -> Self {
    Self::new()
  }
}

/// Writer handle the executor hands to the computation. The only mutation
/// path exposed outside the registry while a task runs.
#[derive(Clone)]
pub struct ProgressSink {
  registry: Arc<TaskRegistry>,
  task_id: Uuid,
}

impl ProgressSink {
  pub fn new(registry: Arc<TaskRegistry>, task_id: Uuid) -> Self {
    Self { registry, task_id }
  }

  pub async fn report(&self, progress: f64, message: &str) {
    self.registry.report_progress(self.task_id, progress, message).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  fn outcome() -> AgreementOutcome {
    AgreementOutcome {
      summary: "done".to_string(),
      metrics: BTreeMap::from([("cohens_kappa".to_string(), 0.8)]),
      files: vec!["a.xml".to_string(), "b.xml".to_string()],
      timestamp: Utc::now(),
      simulated: false,
      note: None,
    }
  }

  #[tokio::test]
  async fn create_starts_pending() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    let snap = registry.get(task_id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Pending);
    assert_eq!(snap.progress, 0.0);
    assert_eq!(snap.revision, 0);
  }

  #[tokio::test]
  async fn revision_strictly_increases() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    registry.set_running(task_id, "starting").await;
    assert_eq!(registry.get(task_id).await.unwrap().revision, 1);
    registry.report_progress(task_id, 0.2, "working").await;
    assert_eq!(registry.get(task_id).await.unwrap().revision, 2);
    registry.report_progress(task_id, 0.4, "working").await;
    assert_eq!(registry.get(task_id).await.unwrap().revision, 3);
  }

  #[tokio::test]
  async fn progress_never_decreases() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    registry.set_running(task_id, "starting").await;
    registry.report_progress(task_id, 0.5, "half").await;
    registry.report_progress(task_id, 0.3, "stale report").await;
    let snap = registry.get(task_id).await.unwrap();
    assert_eq!(snap.progress, 0.5);
    // the message still lands even when the fraction is clamped
    assert_eq!(snap.message, "stale report");
  }

  #[tokio::test]
  async fn complete_forces_full_progress() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    registry.set_running(task_id, "starting").await;
    registry.report_progress(task_id, 0.6, "almost").await;
    registry.complete(task_id, outcome()).await;
    let snap = registry.get(task_id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.progress, 1.0);
    assert!(snap.result.is_some());
    assert!(snap.error.is_none());
  }

  #[tokio::test]
  async fn fail_keeps_last_progress() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    registry.set_running(task_id, "starting").await;
    registry.report_progress(task_id, 0.4, "working").await;
    registry.fail(task_id, "missing input").await;
    let snap = registry.get(task_id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Failed);
    assert_eq!(snap.progress, 0.4);
    assert_eq!(snap.error.as_deref(), Some("missing input"));
    assert!(snap.result.is_none());
  }

  #[tokio::test]
  async fn terminal_state_absorbs_updates() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    registry.set_running(task_id, "starting").await;
    registry.complete(task_id, outcome()).await;
    let before = registry.get(task_id).await.unwrap();
    assert!(!registry.fail(task_id, "too late").await);
    assert!(!registry.report_progress(task_id, 0.1, "too late").await);
    let after = registry.get(task_id).await.unwrap();
    assert_eq!(after.revision, before.revision);
    assert_eq!(after.status, TaskStatus::Completed);
    assert!(after.error.is_none());
  }

  #[tokio::test]
  async fn mutating_unknown_task_is_a_noop() {
    let registry = TaskRegistry::new();
    assert!(!registry.set_running(Uuid::new_v4(), "nope").await);
    assert!(registry.get(Uuid::new_v4()).await.is_none());
  }

  #[tokio::test]
  async fn wait_returns_immediately_when_behind() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    registry.set_running(task_id, "starting").await;
    let waited = tokio::time::timeout(
      Duration::from_millis(100),
      registry.wait_for_update(task_id, 0, Duration::from_secs(30)),
    )
    .await
    .expect("wait should not block when an update already exists");
    let (snap, timed_out) = waited.unwrap();
    assert!(!timed_out);
    assert_eq!(snap.revision, 1);
  }

  #[tokio::test]
  async fn wait_times_out_with_unchanged_snapshot() {
    let registry = TaskRegistry::new();
    let task_id = registry.create().await;
    let (snap, timed_out) = registry
      .wait_for_update(task_id, 0, Duration::from_millis(50))
      .await
      .unwrap();
    assert!(timed_out);
    assert_eq!(snap.revision, 0);
    assert_eq!(snap.status, TaskStatus::Pending);
  }

  #[tokio::test]
  async fn wait_for_unknown_task_is_none() {
    let registry = TaskRegistry::new();
    assert!(
      registry
        .wait_for_update(Uuid::new_v4(), 0, Duration::from_millis(10))
        .await
        .is_none()
    );
  }

  #[tokio::test]
  async fn concurrent_publish_wakes_waiter() {
    let registry = Arc::new(TaskRegistry::new());
    let task_id = registry.create().await;
    let waiter = tokio::spawn({
      let registry = Arc::clone(&registry);
      async move { registry.wait_for_update(task_id, 0, Duration::from_secs(30)).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    registry.set_running(task_id, "go").await;
    let (snap, timed_out) = tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .expect("waiter should wake well before its timeout")
      .unwrap()
      .unwrap();
    assert!(!timed_out);
    assert_eq!(snap.status, TaskStatus::Running);
  }

  #[tokio::test]
  async fn one_publish_wakes_all_waiters() {
    let registry = Arc::new(TaskRegistry::new());
    let task_id = registry.create().await;
    let spawn_waiter = |registry: Arc<TaskRegistry>| {
      tokio::spawn(async move {
        registry.wait_for_update(task_id, 0, Duration::from_secs(30)).await
      })
    };
    let first = spawn_waiter(Arc::clone(&registry));
    let second = spawn_waiter(Arc::clone(&registry));
    tokio::time::sleep(Duration::from_millis(20)).await;
    registry.set_running(task_id, "go").await;
    for waiter in [first, second] {
      let (snap, timed_out) = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("all waiters should wake on one publish")
        .unwrap()
        .unwrap();
      assert!(!timed_out);
      assert_eq!(snap.revision, 1);
    }
  }

  #[tokio::test]
  async fn remove_releases_blocked_waiter() {
    let registry = Arc::new(TaskRegistry::new());
    let task_id = registry.create().await;
    let waiter = tokio::spawn({
      let registry = Arc::clone(&registry);
      async move { registry.wait_for_update(task_id, 0, Duration::from_secs(30)).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(registry.remove(task_id).await);
    let (snap, timed_out) = tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .expect("eviction should release the waiter")
      .unwrap()
      .unwrap();
    assert!(!timed_out);
    assert_eq!(snap.revision, 0);
  }

  #[tokio::test]
  async fn eviction_sweeps_only_aged_terminal_tasks() {
    let registry = TaskRegistry::new();
    let finished = registry.create().await;
    let pending = registry.create().await;
    registry.set_running(finished, "starting").await;
    registry.complete(finished, outcome()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let evicted = registry.evict_finished(Duration::ZERO).await;
    assert_eq!(evicted, 1);
    assert!(registry.get(finished).await.is_none());
    assert!(registry.get(pending).await.is_some());
    assert_eq!(registry.len().await, 1);
  }
}
