//! Client-side synchronization engine for retro boards.
//!
//! [`open_board`] wires the REST store and the board's WebSocket channel
//! into a [`BoardEngine`]. Embedders with their own transport can build
//! the pieces directly.

pub mod config;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod items;
pub mod presence;
pub mod reactions;
pub mod signals;
pub mod store;
pub mod transport;
pub mod view;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use uuid::Uuid;

pub use config::{ClientConfig, SyncTimings};
pub use engine::{BoardEngine, EngineConfig, EngineEvent, EngineHandle};
pub use error::{Notice, SyncError};
pub use items::{ItemId, LocalItem};
pub use store::{BoardStore, HttpStore};
pub use view::BoardView;

use crate::transport::Backoff;

/// Open `board_id` against a retro server.
pub async fn open_board(config: &ClientConfig, board_id: Uuid) -> Result<EngineHandle, SyncError> {
    let store = Arc::new(HttpStore::new(config.server_url.clone(), config.token.clone()));
    let backoff = Backoff::new(config.timings.reconnect_min, config.timings.reconnect_max);
    let channel = transport::connect(config.gateway_url(board_id), backoff);

    BoardEngine::spawn(
        EngineConfig {
            board_id,
            user_id: config.user_id,
            timings: config.timings.clone(),
        },
        store,
        channel,
    )
    .await
}
