// crates/server/src/lib.rs
//! bulkpull server: control-plane HTTP API, background job runner and the
//! per-owner push channel.

pub mod auth;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod notifier;
pub mod routes;
pub mod state;

pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use notifier::Notifier;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full application router around `state`.
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::state_with;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use bulkpull_core::testing::ScriptedProvider;
    use tower::ServiceExt;

    async fn app() -> Router {
        create_app(state_with(Arc::new(ScriptedProvider::new(0))).await)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint_response_structure() {
        let (status, body) = get(app().await, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptimeSecs"].is_number());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = get(app().await, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/health")
                    .header("Origin", "http://localhost:3000")
                    .header("Access-Control-Request-Method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
