//! Server configuration, sourced from the environment.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Shared secret for webhook signature verification. May be empty when
    /// unset; deliveries are then rejected with a configuration error
    /// rather than processed unverified.
    pub razorpay_webhook_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let razorpay_webhook_secret =
            std::env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default();

        Ok(Self {
            database_url,
            bind_address,
            razorpay_webhook_secret,
        })
    }
}
