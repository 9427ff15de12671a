use std::sync::Arc;
use warp::Filter;

use crate::config::Config;
use crate::engine::AgreementEngine;
use crate::registry::TaskRegistry;

pub mod assess;

pub fn routes(
  registry: Arc<TaskRegistry>,
  engine: Arc<dyn AgreementEngine>,
  config: Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  assess::start_route(registry.clone(), engine, config)
    .or(assess::progress_route(registry.clone()))
    .or(assess::status_route(registry.clone()))
    .or(assess::result_route(registry))
    .or(health_route())
}

fn health_route() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "health")
    .and(warp::get())
    .map(|| warp::reply::json(&serde_json::json!({"status": "ok"})))
}
