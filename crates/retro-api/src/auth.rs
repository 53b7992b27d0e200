use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use retro_db::Database;
use retro_gateway::dispatcher::Dispatcher;
use retro_types::api::Claims;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    /// Lifetime of a board before it may be expired.
    pub board_ttl: Duration,
}

/// Run a blocking database call off the async runtime.
pub async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> retro_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}

/// Sign a token the way the identity provider does. Used for local
/// development and tests; production tokens come from outside.
pub fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_with_matching_secret() {
        let user = Uuid::new_v4();
        let token = create_token("s3cret", user, "ada", chrono::Duration::hours(1)).unwrap();

        let claims = verify_token("s3cret", &token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.username, "ada");
        assert!(verify_token("other", &token).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token =
            create_token("s3cret", Uuid::new_v4(), "ada", chrono::Duration::hours(-2)).unwrap();
        assert!(verify_token("s3cret", &token).is_none());
    }
}
