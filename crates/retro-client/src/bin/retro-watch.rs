//! Follow a board from the terminal: logs every view change and notice.

use anyhow::Context;
use tracing::{info, warn};
use uuid::Uuid;

use retro_client::{ClientConfig, EngineEvent, open_board};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retro_client=info,retro_watch=info".into()),
        )
        .init();

    let board_id: Uuid = std::env::args()
        .nth(1)
        .context("usage: retro-watch <board-id>")?
        .parse()
        .context("board id must be a UUID")?;
    let config = ClientConfig::from_env()?;

    let mut handle = open_board(&config, board_id).await?;
    let mut view = handle.view();
    let mut events = handle
        .take_events()
        .context("event stream already taken")?;

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                info!(
                    "{} [{}] {:?}: {} notes, {} online, {} typing",
                    current.board.title,
                    current.board.status.as_str(),
                    current.connection,
                    current.items.len(),
                    current.live_count,
                    current.typing.len()
                );
            }
            Some(event) = events.recv() => match event {
                EngineEvent::Notice(notice) => warn!("{}", notice.message),
                EngineEvent::UserSeen(user_id) => info!("New participant {}", user_id),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.close().await;
    Ok(())
}
