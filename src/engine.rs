//! Agreement computation engines. The executor only talks to the
//! `AgreementEngine` trait; which implementation backs it is decided once
//! at startup, not inside the executor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{AgreementOutcome, AssessmentJob};
use crate::registry::ProgressSink;

/// Features assessed when the request names none, matching the annotation
/// schema the external calculator ships with.
pub const DEFAULT_FEATURES: [&str; 9] = [
  "use", "certainty", "commfuntype", "scope", "tfpos",
  "sentpos", "neg", "contrast", "modalpersp",
];

#[derive(Debug, thiserror::Error)]
pub enum ComputationError {
  #[error("Failed to load file {path}: {reason}")]
  InputFile { path: String, reason: String },
  #[error("Agreement command failed: {0}")]
  Command(String),
  #[error("Agreement command produced invalid output: {0}")]
  InvalidOutput(String),
}

#[async_trait]
pub trait AgreementEngine: Send + Sync {
  async fn run(
    &self,
    job: &AssessmentJob,
    progress: &ProgressSink,
  ) -> Result<AgreementOutcome, ComputationError>;
}

/// Picks the command engine when the configured executable exists on disk,
/// otherwise falls back to simulation.
pub fn detect(config: &Config) -> Arc<dyn AgreementEngine> {
  if let Some(command) = &config.iaa_command {
    if Path::new(command).exists() {
      info!("Using agreement command {}", command);
      return Arc::new(CommandEngine::new(command.clone()));
    }
    warn!("Agreement command {} not found, running in simulation mode", command);
  } else {
    warn!("No agreement command configured, running in simulation mode");
  }
  Arc::new(SimulatedEngine::default())
}

/// Runs the external agreement calculator and parses its JSON metrics.
pub struct CommandEngine {
  command: PathBuf,
}

impl CommandEngine {
  pub fn new(command: impl Into<PathBuf>) -> Self {
    Self { command: command.into() }
  }

  fn parse_metrics(stdout: &[u8]) -> anyhow::Result<BTreeMap<String, f64>> {
    let value: serde_json::Value = serde_json::from_slice(stdout)?;
    let object = value
      .as_object()
      .ok_or_else(|| anyhow::anyhow!("expected a JSON object of metrics"))?;
    let mut metrics = BTreeMap::new();
    for (name, metric) in object {
      let number = metric
        .as_f64()
        .ok_or_else(|| anyhow::anyhow!("metric '{}' is not a number", name))?;
      metrics.insert(name.clone(), number);
    }
    if metrics.is_empty() {
      anyhow::bail!("no metrics in output");
    }
    Ok(metrics)
  }
}

#[async_trait]
impl AgreementEngine for CommandEngine {
  async fn run(
    &self,
    job: &AssessmentJob,
    progress: &ProgressSink,
  ) -> Result<AgreementOutcome, ComputationError> {
    progress.report(0.05, "Loading feature definitions...").await;
    if !job.def_file.exists() {
      warn!("Definition file {} not found, continuing without it", job.def_file.display());
    }

    progress.report(0.1, "Loading annotation files...").await;
    for (i, file) in job.files.iter().enumerate() {
      if let Err(e) = tokio::fs::metadata(file).await {
        return Err(ComputationError::InputFile {
          path: file.clone(),
          reason: e.to_string(),
        });
      }
      let fraction = 0.1 + 0.2 * (i + 1) as f64 / job.files.len() as f64;
      progress
        .report(fraction, &format!("Loaded {}/{} files...", i + 1, job.files.len()))
        .await;
    }

    progress.report(0.3, "Initializing agreement calculator...").await;
    let mut command = Command::new(&self.command);
    command.args(&job.files);
    let features = match &job.features {
      Some(features) => features.join(","),
      None => DEFAULT_FEATURES.join(","),
    };
    command.arg("--features").arg(features);
    if job.weighted {
      command.arg("--weighted");
    }
    command.arg("--def-file").arg(&job.def_file);
    if job.merge_epistemic {
      command.arg("--merge-epistemic");
    }
    if job.split_by_use {
      command.arg("--split-by-use");
    }
    if job.only_epistemic {
      command.arg("--only-epistemic");
    }

    progress.report(0.4, "Computing agreement metrics...").await;
    let output = command
      .output()
      .await
      .map_err(|e| ComputationError::Command(e.to_string()))?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(ComputationError::Command(format!(
        "{}: {}",
        output.status,
        stderr.trim()
      )));
    }

    progress.report(0.9, "Finalizing results...").await;
    let metrics = Self::parse_metrics(&output.stdout)
      .map_err(|e| ComputationError::InvalidOutput(e.to_string()))?;

    Ok(AgreementOutcome {
      summary: "Assessment completed successfully".to_string(),
      metrics,
      files: job.files.clone(),
      timestamp: Utc::now(),
      simulated: false,
      note: None,
    })
  }
}

/// Deterministic stand-in used when no external calculator is available.
/// Emits the same progress/terminal contract as the real engine; the
/// payload is explicitly labeled as simulated.
pub struct SimulatedEngine {
  step_delay: Duration,
}

impl SimulatedEngine {
  pub fn new(step_delay: Duration) -> Self {
    Self { step_delay }
  }
}

impl Default for SimulatedEngine {
  fn default() -> Self {
    Self::new(Duration::from_millis(1500))
  }
}

#[async_trait]
impl AgreementEngine for SimulatedEngine {
  async fn run(
    &self,
    job: &AssessmentJob,
    progress: &ProgressSink,
  ) -> Result<AgreementOutcome, ComputationError> {
    let phases = [
      (0.1, "Loading annotation files (simulation)..."),
      (0.3, "Calculating agreement metrics (simulation)..."),
      (0.5, "Computing Cohen's Kappa (simulation)..."),
      (0.7, "Computing Krippendorff's Alpha (simulation)..."),
      (0.9, "Finalizing results (simulation)..."),
    ];
    for (fraction, message) in phases {
      progress.report(fraction, message).await;
      tokio::time::sleep(self.step_delay).await;
    }

    let metrics = BTreeMap::from([
      ("cohens_kappa".to_string(), 0.75),
      ("krippendorffs_alpha".to_string(), 0.72),
      ("agreement_percentage".to_string(), 85.5),
    ]);

    Ok(AgreementOutcome {
      summary: "Assessment completed successfully (simulation mode)".to_string(),
      metrics,
      files: job.files.clone(),
      timestamp: Utc::now(),
      simulated: true,
      note: Some(
        "This is simulated data. Configure the agreement command and provide valid files for real results."
          .to_string(),
      ),
    })
  }
}
