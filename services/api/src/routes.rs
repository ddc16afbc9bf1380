use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use royalty_engine::workflows::royalty::{
    royalty_router, ArticleCatalog, RoyaltyService, RoyaltyStore,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_royalty_routes<S, C>(service: Arc<RoyaltyService<S, C>>) -> axum::Router
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    royalty_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::seed_rule_set;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use royalty_engine::config::RoyaltyConfig;
    use royalty_engine::workflows::royalty::{MemoryArticleCatalog, MemoryRoyaltyStore};
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn app(ready: bool) -> axum::Router {
        let service = Arc::new(RoyaltyService::new(
            Arc::new(MemoryRoyaltyStore::default()),
            Arc::new(MemoryArticleCatalog::default()),
            RoyaltyConfig::default(),
        ));
        seed_rule_set(&service).expect("seed succeeds");
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_royalty_routes(service).layer(Extension(state))
    }

    async fn get(router: axum::Router, uri: &str, actor: Option<&str>) -> axum::response::Response {
        let mut builder = Request::get(uri);
        if let Some(actor) = actor {
            builder = builder.header("x-actor-id", actor);
        }
        router
            .oneshot(builder.body(Body::empty()).expect("request builds"))
            .await
            .expect("route executes")
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let response = get(app(false), "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let response = get(app(false), "/ready", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = get(app(true), "/ready", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn royalty_routes_are_mounted() {
        let response = get(app(true), "/royalty/rulesets", Some("reader")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json payload");
        assert_eq!(payload[0]["name"], "newsroom-default");
        assert_eq!(payload[0]["status"], "ACTIVE");
    }
}
