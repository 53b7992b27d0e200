use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use retro_types::api::{Claims, CreateItemRequest, UpdateItemRequest};
use retro_types::events::GatewayEvent;
use retro_types::models::Item;
use retro_types::normalize_content;

use crate::auth::{AppState, with_db};
use crate::error::ApiError;

pub async fn list_items(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Vec<Item>>, ApiError> {
    let items = with_db(&state, move |db| {
        if db.get_board(board_id)?.is_none() {
            return Err(retro_db::StoreError::NotFound("board"));
        }
        db.list_items(board_id)
    })
    .await?;
    Ok(Json(items))
}

pub async fn create_item(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = normalize_content(&req.content).map_err(ApiError::Invalid)?;
    let author = claims.sub;

    let item = with_db(&state, move |db| {
        db.insert_item(board_id, req.client_token, author, &content, req.category, Utc::now())
    })
    .await
    .inspect_err(|e| warn!("{} could not add a note to {}: {}", claims.username, board_id, e))?;

    debug!("Item {} created on board {}", item.id, board_id);
    state
        .dispatcher
        .publish(board_id, GatewayEvent::ItemCreate { item: item.clone() })
        .await;

    Ok((StatusCode::CREATED, Json(item)))
}

/// Author-scoped edit. Store-side checks are the real guard; the client's
/// own checks only save a round trip.
pub async fn update_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<Item>, ApiError> {
    let content = normalize_content(&req.content).map_err(ApiError::Invalid)?;
    let author = claims.sub;

    let item = with_db(&state, move |db| {
        db.update_item(item_id, author, &content, req.category, Utc::now())
    })
    .await
    .inspect_err(|e| warn!("{} could not edit {}: {}", claims.username, item_id, e))?;

    state
        .dispatcher
        .publish(item.board_id, GatewayEvent::ItemUpdate { item: item.clone() })
        .await;

    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let author = claims.sub;
    let item = with_db(&state, move |db| db.delete_item(item_id, author))
        .await
        .inspect_err(|e| warn!("{} could not delete {}: {}", claims.username, item_id, e))?;

    state
        .dispatcher
        .publish(
            item.board_id,
            GatewayEvent::ItemDelete {
                board_id: item.board_id,
                item_id,
            },
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
