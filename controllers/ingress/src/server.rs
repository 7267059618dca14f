//! Controller HTTP endpoint: `/healthz` for probes and `/metrics` for
//! Prometheus when enabled.

use crate::metrics;
use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Builds the router. `/metrics` is only mounted when `prometheus` is set.
pub fn router(prometheus: bool) -> Router {
    let mut router = Router::new().route("/healthz", get(healthz));
    if prometheus {
        router = router.route("/metrics", get(metrics_text));
    }
    router.layer(TraceLayer::new_for_http())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics_text() -> impl IntoResponse {
    match metrics::gather_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serves on `port` until `cancel` fires.
pub async fn serve(port: u16, prometheus: bool, cancel: CancellationToken) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, prometheus, "controller endpoint listening");

    axum::serve(listener, router(prometheus))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("controller endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_always_served() {
        let (status, _) = get_path(router(false), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_only_when_enabled() {
        let (status, _) = get_path(router(false), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        metrics::init().unwrap();
        metrics::record_reload();
        let (status, body) = get_path(router(true), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("haproxy_ingress_reloads_total"));
    }
}
