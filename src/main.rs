use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use warp::Filter;
use iaa_backend::{config::Config, engine, error::handle_rejection, registry::TaskRegistry, routes::routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env();
  let registry = Arc::new(TaskRegistry::new());
  let engine = engine::detect(&config);
  registry.spawn_retention_sweep(
    Duration::from_secs(config.sweep_interval_secs),
    Duration::from_secs(config.retention_secs),
  );

  let cors = warp::cors()
    .allow_any_origin()
    .allow_headers(vec!["content-type"])
    .allow_methods(vec!["GET", "POST"]);

  let api = routes(registry, engine, config.clone())
    .recover(handle_rejection)
    .with(cors);

  let addr: SocketAddr = format!("{}:{}", config.host, config.server_port).parse()?;
  info!("Starting assessment backend server on {}", addr);
  warp::serve(api).run(addr).await;
  Ok(())
}
