//! Liveness and readiness endpoint

use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Body returned by every health route
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HealthStatus {
    /// Always `healthy` while the process serves requests
    pub status: String,
    /// Time the response was produced
    pub timestamp: DateTime<Utc>,
    /// Operator version
    pub version: String,
}

async fn healthy() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build the health router
pub fn health_routes() -> Router {
    Router::new()
        .route("/healthz", get(healthy))
        .route("/livez", get(healthy))
        .route("/readyz", get(healthy))
}

/// Serve the health router on `port` until the process exits
pub async fn start_health_server(port: u16) {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, "health server started");
            l
        }
        Err(e) => {
            error!(error = %e, port, "failed to bind health port");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, health_routes()).await {
        error!(error = %e, "health server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rstest::rstest;
    use tower::ServiceExt;

    #[rstest]
    #[case("/healthz")]
    #[case("/livez")]
    #[case("/readyz")]
    #[tokio::test]
    async fn test_health_routes_report_healthy(#[case] path: &str) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = health_routes().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let health: HealthStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = health_routes().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
