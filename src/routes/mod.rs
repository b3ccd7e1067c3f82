use axum::{routing::get, Router};

use crate::state::AppState;

pub mod blocks;
pub mod campaigns;
pub mod fees;
pub mod health;
pub mod payments;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(fees::router())
        .merge(payments::router())
        .merge(campaigns::router())
        .merge(blocks::router())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::v1_router;
    use crate::{config::AppConfig, state::AppState};

    fn test_state() -> AppState {
        let mut config = AppConfig::from_env();
        config.environment = "test".to_string();
        config.dev_auth_overrides_enabled = true;
        config.supabase_db_url = None;
        config.supabase_jwt_secret = None;
        AppState::build(config).expect("state builds without a database")
    }

    fn app(state: AppState) -> Router {
        Router::new().nest("/v1", v1_router()).with_state(state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("response body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str, user_id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header("x-user-id", user_id);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn health_reports_degraded_without_database() {
        let (status, body) = send(app(test_state()), get("/v1/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["db"], false);
    }

    #[tokio::test]
    async fn fee_listing_requires_a_user() {
        let (status, body) = send(app(test_state()), get("/v1/fees", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["detail"].as_str().is_some_and(|d| d.contains("bearer")));
    }

    #[tokio::test]
    async fn residents_cannot_review_payments() {
        let state = test_state();
        state
            .role_cache
            .insert("resident-1".to_string(), "resident".to_string())
            .await;
        let request = Request::builder()
            .method("POST")
            .uri("/v1/payments/p-1/confirm")
            .header("x-user-id", "resident-1")
            .body(Body::empty())
            .expect("request");
        let (status, _) = send(app(state), request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn reject_checks_auth_before_the_body() {
        let body = serde_json::json!({ "reason": "x".repeat(600) }).to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/payments/p-1/reject")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("request");
        let (status, _) = send(app(test_state()), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_database_is_a_dependency_failure() {
        let state = test_state();
        state
            .role_cache
            .insert("admin-1".to_string(), "admin".to_string())
            .await;
        let (status, _) = send(app(state), get("/v1/blocks", Some("admin-1"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unknown_fee_kind_is_rejected() {
        let state = test_state();
        state
            .role_cache
            .insert("admin-1".to_string(), "admin".to_string())
            .await;
        let (status, _) = send(app(state), get("/v1/fees/weekly/f-1", Some("admin-1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
