use crate::cli::ServeArgs;
use crate::infra::{seed_rule_set, AppState};
use crate::routes::with_royalty_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use royalty_engine::config::AppConfig;
use royalty_engine::error::AppError;
use royalty_engine::telemetry;
use royalty_engine::workflows::royalty::{MemoryArticleCatalog, MemoryRoyaltyStore, RoyaltyService};
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

    let store = Arc::new(MemoryRoyaltyStore::default());
    let catalog = Arc::new(MemoryArticleCatalog::default());
    let royalty_service = Arc::new(RoyaltyService::new(
        store,
        catalog,
        config.royalty.clone(),
    ));
    if config.royalty.seed_rule_set {
        seed_rule_set(&royalty_service)?;
    }

    let app = with_royalty_routes(royalty_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "royalty engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
