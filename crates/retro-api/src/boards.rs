use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use retro_db::StoreError;
use retro_types::api::{BoardSnapshot, BoardSummary, Claims, CreateBoardRequest, ExpireResponse};
use retro_types::events::GatewayEvent;
use retro_types::models::Board;

use crate::auth::{AppState, with_db};
use crate::error::ApiError;

/// Join codes avoid characters that are easy to misread (0/O, 1/I/L).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;
const CODE_ATTEMPTS: usize = 5;
const MAX_TITLE_LEN: usize = 120;

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub async fn create_board(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::Invalid(format!(
            "board title must be 1 to {} characters",
            MAX_TITLE_LEN
        )));
    }

    for _ in 0..CODE_ATTEMPTS {
        let code = generate_code();
        let title = title.clone();
        let result = with_db(&state, move |db| {
            match db.create_board(&code, &title, claims.sub, Utc::now()) {
                Err(StoreError::CodeTaken) => Ok(None),
                other => other.map(Some),
            }
        })
        .await?;

        if let Some(board) = result {
            info!("{} created board {} ({})", claims.username, board.id, board.code);
            return Ok((StatusCode::CREATED, Json(board)));
        }
    }

    Err(ApiError::Internal)
}

pub async fn get_board(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Board>, ApiError> {
    let board = with_db(&state, move |db| db.get_board(board_id))
        .await?
        .ok_or(ApiError::NotFound("board"))?;
    Ok(Json(board))
}

pub async fn get_board_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Board>, ApiError> {
    let code = code.trim().to_ascii_uppercase();
    let board = with_db(&state, move |db| db.get_board_by_code(&code))
        .await?
        .ok_or(ApiError::NotFound("board"))?;
    Ok(Json(board))
}

/// Board, notes and like state as seen by the caller.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<BoardSnapshot>, ApiError> {
    let snapshot = with_db(&state, move |db| {
        let board = db.get_board(board_id)?.ok_or(StoreError::NotFound("board"))?;
        let items = db.list_items(board_id)?;
        let reactions = db.board_reactions(board_id, claims.sub)?;
        Ok(BoardSnapshot { board, items, reactions })
    })
    .await?;
    Ok(Json(snapshot))
}

pub async fn get_summary(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<BoardSummary>, ApiError> {
    let summary = with_db(&state, move |db| {
        let board = db.get_board(board_id)?.ok_or(StoreError::NotFound("board"))?;
        let items = db.list_items(board_id)?;
        let counts: HashMap<Uuid, u32> = db
            .board_reactions(board_id, claims.sub)?
            .into_iter()
            .map(|r| (r.item_id, r.count))
            .collect();
        Ok(BoardSummary::new(
            &board,
            items
                .iter()
                .map(|item| (item, counts.get(&item.id).copied().unwrap_or(0))),
        ))
    })
    .await?;
    Ok(Json(summary))
}

/// Manual end by the owner. Confirmation happens in the UI before this call.
pub async fn end_board(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ExpireResponse>, ApiError> {
    let board = with_db(&state, move |db| db.get_board(board_id))
        .await?
        .ok_or(ApiError::NotFound("board"))?;
    if board.owner_id != claims.sub {
        return Err(ApiError::Forbidden(
            "only the board owner may end the session".into(),
        ));
    }

    let response = transition(&state, board_id, Some(claims.sub)).await?;
    if response.transitioned {
        info!("{} ended board {}", claims.username, board_id);
    }
    Ok(Json(response))
}

/// Cooperative expiry. Any participant may call this; the conditional write
/// makes racing callers safe and only one of them observes `transitioned`.
pub async fn expire_board(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
) -> Result<Json<ExpireResponse>, ApiError> {
    let board = with_db(&state, move |db| db.get_board(board_id))
        .await?
        .ok_or(ApiError::NotFound("board"))?;

    if board.is_active() && !board.is_overdue(Utc::now(), state.board_ttl) {
        debug!("Expiry requested early for board {}, ignoring", board_id);
        return Ok(Json(ExpireResponse {
            transitioned: false,
            board,
        }));
    }

    let response = transition(&state, board_id, None).await?;
    if response.transitioned {
        info!("Board {} expired", board_id);
    } else {
        debug!("Board {} already ended, expiry was a no-op", board_id);
    }
    Ok(Json(response))
}

/// Shared end transition: conditional write, then notify the board once.
pub async fn transition(
    state: &AppState,
    board_id: Uuid,
    ended_by: Option<Uuid>,
) -> Result<ExpireResponse, ApiError> {
    let (transitioned, board) = with_db(state, move |db| {
        let transitioned = db.end_board_if_active(board_id, ended_by, Utc::now())?;
        let board = db.get_board(board_id)?.ok_or(StoreError::NotFound("board"))?;
        Ok((transitioned, board))
    })
    .await?;

    if transitioned {
        state
            .dispatcher
            .publish(board_id, GatewayEvent::BoardUpdate { board: board.clone() })
            .await;
    }

    Ok(ExpireResponse { transitioned, board })
}
