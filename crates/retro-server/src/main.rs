mod config;
mod sweep;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use retro_api::auth::{self, AppState, AppStateInner};
use retro_gateway::connection;
use retro_gateway::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retro=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // `retro token <user-id> <username>` mints a development token
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("token") {
        return mint_token(&config, &args[2..]);
    }

    // Init database
    let db = retro_db::Database::open(&config.db_path)?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.clone(),
        board_ttl: config.board_ttl,
    });

    if let Some(interval) = config.sweep_interval {
        info!("Expiry sweep every {:?}", interval);
        tokio::spawn(sweep::run_sweep_loop(state.clone(), interval));
    }

    let ws_route = Router::new()
        .route("/boards/{board_id}/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(retro_api::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Retro server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Validate the JWT at the HTTP upgrade so the socket starts authenticated.
async fn ws_upgrade(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(claims) = auth::verify_token(&state.jwt_secret, &query.token) else {
        warn!("Rejected gateway upgrade for board {}: bad token", board_id);
        return Err(StatusCode::UNAUTHORIZED);
    };

    let exists = auth::with_db(&state, move |db| db.get_board(board_id))
        .await
        .map_err(|e| e.status())?
        .is_some();
    if !exists {
        return Err(StatusCode::NOT_FOUND);
    }

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, board_id, claims.sub, claims.username)
    }))
}

fn mint_token(config: &ServerConfig, args: &[String]) -> anyhow::Result<()> {
    let (Some(user_id), Some(username)) = (args.first(), args.get(1)) else {
        anyhow::bail!("usage: retro token <user-id> <username>");
    };
    let user_id: Uuid = user_id.parse()?;
    let token = auth::create_token(&config.jwt_secret, user_id, username, chrono::Duration::days(30))?;
    println!("{}", token);
    Ok(())
}
