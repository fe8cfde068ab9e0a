use std::env;
use std::path::PathBuf;

use tracing::info;

/// Runtime configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    /// Base URL used when building verification links.
    pub site_url: String,
    /// Missing key switches the email transport to the in-memory one.
    pub resend_api_key: Option<String>,
    pub from_email: String,
    pub reply_to_email: String,
    pub admin_email: String,
    pub daily_limit: u32,
    pub monthly_limit: u32,
    pub token_expiry_hours: i64,
    pub workflow_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: or_default("BIND_ADDR", "127.0.0.1:3004"),
            data_dir: PathBuf::from(or_default("REVIEW_DATA_DIR", "data")),
            site_url: or_default("NEXT_PUBLIC_SITE_URL", "http://localhost:3004"),
            resend_api_key: env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty()),
            from_email: or_default("REVIEW_FROM_EMAIL", "reviews@localhost"),
            reply_to_email: or_default("REVIEW_REPLY_TO_EMAIL", "reviews@localhost"),
            admin_email: or_default("REVIEW_ADMIN_EMAIL", "admin@localhost"),
            daily_limit: 90,
            monthly_limit: 2800,
            token_expiry_hours: 24,
            workflow_retention_days: 30,
        }
    }

    /// Configuration rooted at an explicit data directory. Used by tests and
    /// anywhere the environment should not be consulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            data_dir: data_dir.into(),
            site_url: "http://localhost:3004".to_string(),
            resend_api_key: None,
            from_email: "reviews@localhost".to_string(),
            reply_to_email: "reviews@localhost".to_string(),
            admin_email: "admin@localhost".to_string(),
            daily_limit: 90,
            monthly_limit: 2800,
            token_expiry_hours: 24,
            workflow_retention_days: 30,
        }
    }
}

fn or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}
