//! Razorpay webhook endpoint.
//!
//! The provider posts signed JSON deliveries here. The body must stay raw
//! until the signature over its exact bytes has been verified; only then is
//! it parsed and dispatched.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use invisifeed_billing::{WebhookEvent, SIGNATURE_HEADER};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body returned for every accepted delivery, duplicates and unknown event
/// types included.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// `POST /api/webhooks/razorpay`
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing webhook signature".to_string()))?;

    state.webhooks.verify_signature(&body, signature)?;

    let event = WebhookEvent::parse(&body)?;
    state.webhooks.process(event).await?;

    Ok(Json(WebhookAck { received: true }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::routes::create_router;

    const SECRET: &str = "whsec_test";

    /// State over a lazy pool: no connection is ever established, so these
    /// tests double as proof that rejected deliveries touch no database.
    fn test_state(secret: &str) -> AppState {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://invisifeed@localhost/invisifeed")
            .unwrap();
        let config = Config {
            database_url: "postgres://invisifeed@localhost/invisifeed".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            razorpay_webhook_secret: secret.to_string(),
        };
        AppState::new(pool, config)
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn webhook_request(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/razorpay")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let app = create_router(test_state(SECRET));
        let response = app
            .oneshot(webhook_request(r#"{"event":"payment.captured"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let app = create_router(test_state(SECRET));
        let body = r#"{"event":"payment.captured"}"#;
        let signature = sign("whsec_other", body.as_bytes());
        let response = app
            .oneshot(webhook_request(body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let app = create_router(test_state(SECRET));
        let signature = sign(SECRET, br#"{"event":"payment.captured"}"#);
        let response = app
            .oneshot(webhook_request(
                r#"{"event":"refund.created"}"#,
                Some(&signature),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_secret_is_a_server_fault_not_a_client_fault() {
        let app = create_router(test_state(""));
        let body = r#"{"event":"payment.captured"}"#;
        let signature = sign(SECRET, body.as_bytes());
        let response = app
            .oneshot(webhook_request(body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        // The body must not describe what is missing.
        assert_eq!(json["error"], "internal server error");
    }

    #[tokio::test]
    async fn unknown_event_types_are_acknowledged() {
        let app = create_router(test_state(SECRET));
        let body = r#"{"event":"invoice.expired","payload":{}}"#;
        let signature = sign(SECRET, body.as_bytes());
        let response = app
            .oneshot(webhook_request(body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["received"], true);
    }

    #[tokio::test]
    async fn order_paid_without_payment_entity_is_acknowledged() {
        let app = create_router(test_state(SECRET));
        let body = r#"{"event":"order.paid","payload":{"order":{"entity":{"id":"order_A1"}}}}"#;
        let signature = sign(SECRET, body.as_bytes());
        let response = app
            .oneshot(webhook_request(body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_probe_answers() {
        let app = create_router(test_state(SECRET));
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
