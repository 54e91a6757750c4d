use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use sam_server::{
    config::ServerConfig,
    generator::AutomaticMaskGenerator,
    onnx::OnnxSam,
    server::{build_router, AppState, SharedModel},
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = ServerConfig::parse();
    let addr = cfg.addr()?;

    let model: SharedModel = Arc::new(Mutex::new(OnnxSam::load(&cfg.model, cfg.threads)?));
    let state = AppState::new(
        model,
        AutomaticMaskGenerator::new(cfg.generator()),
        cfg.max_masks,
    );

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    let app = build_router(state, cfg.static_dir.clone(), cfg.body_limit_bytes())
        .route("/metrics", get(move || async move { metric_handle.render() }))
        .layer(prometheus_layer);

    info!("server listening on http://{}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
