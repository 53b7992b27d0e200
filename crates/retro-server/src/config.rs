use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use retro_types::DEFAULT_BOARD_TTL;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub board_ttl: Duration,
    /// Server-side expiry sweep period; `None` leaves expiry to clients.
    pub sweep_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("RETRO_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("RETRO_JWT_SECRET is unset or still a placeholder; it must match the identity provider's signing secret");
        }

        let host = std::env::var("RETRO_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("RETRO_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("RETRO_PORT must be a port number")?;
        let db_path = std::env::var("RETRO_DB_PATH")
            .unwrap_or_else(|_| "retro.db".into())
            .into();

        let board_ttl = match std::env::var("RETRO_BOARD_TTL_MINS") {
            Ok(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .context("RETRO_BOARD_TTL_MINS must be a whole number of minutes")?
                    * 60,
            ),
            Err(_) => DEFAULT_BOARD_TTL,
        };

        let sweep_secs: u64 = std::env::var("RETRO_SWEEP_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            board_ttl,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}
