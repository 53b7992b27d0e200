use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use uuid::Uuid;

use retro_db::StoreError;
use retro_types::api::{Claims, ReactionSummary};
use retro_types::events::GatewayEvent;

use crate::auth::{AppState, with_db};
use crate::error::ApiError;

/// Like an item. Liking twice is a no-op that still answers `liked = true`.
pub async fn like(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReactionSummary>, ApiError> {
    set_reaction(&state, item_id, claims.sub, true).await
}

pub async fn unlike(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReactionSummary>, ApiError> {
    set_reaction(&state, item_id, claims.sub, false).await
}

async fn set_reaction(
    state: &AppState,
    item_id: Uuid,
    user_id: Uuid,
    liked: bool,
) -> Result<Json<ReactionSummary>, ApiError> {
    let (changed, count, board_id) = with_db(state, move |db| {
        let board_id = db
            .get_item(item_id)?
            .ok_or(StoreError::NotFound("item"))?
            .board_id;
        let (changed, count) = if liked {
            db.like(item_id, user_id, Utc::now())?
        } else {
            db.unlike(item_id, user_id)?
        };
        Ok((changed, count, board_id))
    })
    .await?;

    if changed {
        state
            .dispatcher
            .publish(
                board_id,
                GatewayEvent::ReactionUpdate {
                    item_id,
                    user_id,
                    liked,
                    count,
                },
            )
            .await;
    }

    Ok(Json(ReactionSummary {
        item_id,
        count,
        liked,
    }))
}

pub async fn get_item_reactions(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReactionSummary>, ApiError> {
    let viewer = claims.sub;
    let summary = with_db(&state, move |db| db.item_reactions(item_id, viewer)).await?;
    Ok(Json(summary))
}

pub async fn get_board_reactions(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ReactionSummary>>, ApiError> {
    let viewer = claims.sub;
    let summaries = with_db(&state, move |db| db.board_reactions(board_id, viewer)).await?;
    Ok(Json(summaries))
}
