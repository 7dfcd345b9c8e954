//! Application state

use std::sync::Arc;

use invisifeed_billing::WebhookHandler;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// Reconciliation handler for provider webhooks, constructed once and
    /// injected here rather than living as a module-level singleton.
    pub webhooks: Arc<WebhookHandler>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        if config.razorpay_webhook_secret.is_empty() {
            tracing::warn!(
                "RAZORPAY_WEBHOOK_SECRET not set - webhook deliveries will be rejected"
            );
        } else {
            tracing::info!("Razorpay webhook verification enabled");
        }

        let webhooks = Arc::new(WebhookHandler::new(
            pool.clone(),
            config.razorpay_webhook_secret.clone(),
        ));

        Self {
            pool,
            config,
            webhooks,
        }
    }
}
