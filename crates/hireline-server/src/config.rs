use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Upper bound on the post-persistence notify step of a send.
    pub notify_timeout: Duration,
    pub db_busy_timeout: Duration,
    pub history_preview: u32,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("HIRELINE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("HIRELINE_JWT_SECRET is unset or still a placeholder");
        }

        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());
        let millis = |key: &str| -> anyhow::Result<Duration> {
            let raw = var(key, "5000");
            let ms: u64 = raw.parse().with_context(|| format!("{key}={raw} is not a number of milliseconds"))?;
            Ok(Duration::from_millis(ms))
        };

        let port_raw = var("HIRELINE_PORT", "3000");
        let preview_raw = var("HIRELINE_HISTORY_PREVIEW", "20");

        Ok(Self {
            jwt_secret,
            db_path: var("HIRELINE_DB_PATH", "hireline.db").into(),
            host: var("HIRELINE_HOST", "0.0.0.0"),
            port: port_raw
                .parse()
                .with_context(|| format!("HIRELINE_PORT={port_raw} is not a port"))?,
            notify_timeout: millis("HIRELINE_NOTIFY_TIMEOUT_MS")?,
            db_busy_timeout: millis("HIRELINE_DB_BUSY_TIMEOUT_MS")?,
            history_preview: preview_raw
                .parse()
                .with_context(|| format!("HIRELINE_HISTORY_PREVIEW={preview_raw} is not a count"))?,
        })
    }
}
