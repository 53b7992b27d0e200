use std::time::Duration;

use anyhow::{Context, Result};
use uuid::Uuid;

use retro_types::DEFAULT_BOARD_TTL;

/// Timers that drive the engine. Defaults match the product behavior;
/// tests shrink or stretch them.
#[derive(Debug, Clone)]
pub struct SyncTimings {
    /// Lifetime of a board before any participant may expire it.
    pub board_ttl: Duration,
    pub expiry_poll: Duration,
    /// Quiet period after the last keystroke before "stopped typing" is sent.
    pub typing_idle: Duration,
    /// How long a peer's typing indicator survives without a refresh.
    pub typing_ttl: Duration,
    /// How long a peer's like preview counts without durable confirmation.
    pub preview_ttl: Duration,
    pub celebration_ttl: Duration,
    /// Delay between a settled like/unlike and the authoritative count refresh.
    pub reaction_refresh_delay: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            board_ttl: DEFAULT_BOARD_TTL,
            expiry_poll: Duration::from_secs(30),
            typing_idle: Duration::from_secs(1),
            typing_ttl: Duration::from_secs(3),
            preview_ttl: Duration::from_secs(5),
            celebration_ttl: Duration::from_secs(4),
            reaction_refresh_delay: Duration::from_millis(750),
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP URL of the retro server, e.g. `http://localhost:3000`.
    pub server_url: String,
    pub token: String,
    pub user_id: Uuid,
    pub timings: SyncTimings,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            user_id,
            timings: SyncTimings::default(),
        }
    }

    /// Read `RETRO_SERVER_URL`, `RETRO_TOKEN`, `RETRO_USER_ID` and the
    /// optional `RETRO_BOARD_TTL_MINS` / `RETRO_EXPIRY_POLL_SECS`, loading
    /// `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let server_url =
            std::env::var("RETRO_SERVER_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let token = std::env::var("RETRO_TOKEN").context("RETRO_TOKEN is not set")?;
        let user_id = std::env::var("RETRO_USER_ID")
            .context("RETRO_USER_ID is not set")?
            .parse()
            .context("RETRO_USER_ID must be a UUID")?;

        let mut config = Self::new(server_url, token, user_id);
        if let Ok(raw) = std::env::var("RETRO_BOARD_TTL_MINS") {
            config.timings.board_ttl = parse_board_ttl(&raw)?;
        }
        if let Ok(raw) = std::env::var("RETRO_EXPIRY_POLL_SECS") {
            let secs: u64 = raw
                .parse()
                .context("RETRO_EXPIRY_POLL_SECS must be a whole number of seconds")?;
            config.timings.expiry_poll = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }

    /// WebSocket URL of a board's channel.
    pub fn gateway_url(&self, board_id: Uuid) -> String {
        let base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.server_url.clone()
        };
        format!("{}/boards/{}/gateway?token={}", base, board_id, self.token)
    }
}

fn parse_board_ttl(raw: &str) -> Result<Duration> {
    let mins: u64 = raw
        .trim()
        .parse()
        .context("RETRO_BOARD_TTL_MINS must be a whole number of minutes")?;
    let secs = mins
        .checked_mul(60)
        .context("RETRO_BOARD_TTL_MINS is too large")?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_ttl_rejects_overflow() {
        assert_eq!(parse_board_ttl("90").unwrap(), Duration::from_secs(5400));
        assert!(parse_board_ttl("soon").is_err());
        assert!(parse_board_ttl(&u64::MAX.to_string()).is_err());
    }

    #[test]
    fn gateway_url_swaps_scheme() {
        let board = Uuid::nil();
        let config = ClientConfig::new("http://localhost:3000/", "tok", Uuid::nil());
        assert_eq!(
            config.gateway_url(board),
            format!("ws://localhost:3000/boards/{}/gateway?token=tok", board)
        );

        let secure = ClientConfig::new("https://retro.example", "tok", Uuid::nil());
        assert!(secure.gateway_url(board).starts_with("wss://retro.example/boards/"));
    }
}
