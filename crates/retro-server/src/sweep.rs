use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use retro_api::auth::{AppState, with_db};
use retro_api::boards::transition;

/// Backstop for boards nobody revisits after their time budget: applies
/// the same conditional end transition clients use, so it can race them safely.
pub async fn run_sweep_loop(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match sweep_overdue(&state).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: expired {} boards", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

async fn sweep_overdue(state: &AppState) -> anyhow::Result<usize> {
    let Ok(ttl) = chrono::Duration::from_std(state.board_ttl) else {
        return Ok(0);
    };
    let cutoff = Utc::now() - ttl;
    let overdue = with_db(state, move |db| db.overdue_boards(cutoff)).await?;

    let mut expired = 0;
    for board_id in overdue {
        if transition(state, board_id, None).await?.transitioned {
            expired += 1;
        }
    }
    Ok(expired)
}
