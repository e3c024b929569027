use crate::cli::ServeArgs;
use crate::infra::{build_orchestrator, AppState, SimulatedConnector};
use crate::routes::with_referral_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use referral_orchestrator::config::AppConfig;
use referral_orchestrator::error::AppError;
use referral_orchestrator::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let orchestrator = Arc::new(build_orchestrator(
        &config.pipeline,
        Arc::new(SimulatedConnector),
    )?);

    let app = with_referral_routes(orchestrator)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "referral orchestrator ready");

    axum::serve(listener, app).await?;
    Ok(())
}
