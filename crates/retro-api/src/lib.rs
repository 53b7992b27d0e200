pub mod auth;
pub mod boards;
pub mod error;
pub mod items;
pub mod middleware;
pub mod reactions;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All REST routes. Every route requires a bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/boards", post(boards::create_board))
        .route("/boards/{board_id}", get(boards::get_board))
        .route("/boards/code/{code}", get(boards::get_board_by_code))
        .route("/boards/{board_id}/snapshot", get(boards::get_snapshot))
        .route("/boards/{board_id}/summary", get(boards::get_summary))
        .route("/boards/{board_id}/end", post(boards::end_board))
        .route("/boards/{board_id}/expire", post(boards::expire_board))
        .route(
            "/boards/{board_id}/items",
            get(items::list_items).post(items::create_item),
        )
        .route(
            "/items/{item_id}",
            axum::routing::patch(items::update_item).delete(items::delete_item),
        )
        .route(
            "/items/{item_id}/reactions",
            put(reactions::like)
                .delete(reactions::unlike)
                .get(reactions::get_item_reactions),
        )
        .route("/boards/{board_id}/reactions", get(reactions::get_board_reactions))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
