use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
  pub host: String,
  pub server_port: u16,
  pub iaa_command: Option<String>,
  pub def_file: PathBuf,
  pub retention_secs: u64,
  pub sweep_interval_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".into(),
      server_port: 5000,
      iaa_command: None,
      def_file: "teitok/config/markers_def.xml".into(),
      retention_secs: 3600,
      sweep_interval_secs: 60,
    }
  }
}

impl Config {
  pub fn from_env() -> Self {
    let defaults = Self::default();
    Self {
      host: env::var("HOST").unwrap_or(defaults.host),
      server_port: env::var("SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.server_port),
      iaa_command: env::var("IAA_COMMAND").ok().filter(|v| !v.is_empty()),
      def_file: env::var("DEF_FILE").map(PathBuf::from).unwrap_or(defaults.def_file),
      retention_secs: env::var("RETENTION_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.retention_secs),
      sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.sweep_interval_secs),
    }
  }
}
