use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, trace, warn};
use uuid::Uuid;

use retro_types::events::{GatewayCommand, GatewayEvent};
use retro_types::models::PresenceEntry;

use crate::dispatcher::{Dispatcher, Envelope};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection scoped to one board.
/// The JWT was already validated at the HTTP upgrade layer.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    board_id: Uuid,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();

    info!("{} ({}) joined board {} as {}", username, user_id, board_id, conn_id);

    let Some(ready) = encode(&GatewayEvent::Ready { user_id, board_id }) else {
        return;
    };

    // Subscribe before Ready so nothing published in between is missed
    let mut broadcast_rx = dispatcher.subscribe(board_id).await;
    if sender.send(ready).await.is_err() {
        drop(broadcast_rx);
        dispatcher.leave(board_id, conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward board events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match route(result, conn_id) {
                        Route::Forward(event) => event,
                        Route::Skip => continue,
                        Route::Close => break,
                    };

                    let Some(msg) = encode(&event) else { continue };
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, board_id, conn_id, user_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish, then make sure the other is gone so
    // its broadcast receiver is dropped before leaving the room.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    dispatcher.leave(board_id, conn_id).await;
    info!("{} ({}) left board {}", username, user_id, board_id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    board_id: Uuid,
    conn_id: Uuid,
    user_id: Uuid,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Announce { joined_at } => {
            dispatcher
                .announce(board_id, conn_id, PresenceEntry { user_id, joined_at })
                .await;
        }

        GatewayCommand::Broadcast { signal } => {
            trace!("{} signal on board {}: {:?}", user_id, board_id, signal);
            dispatcher
                .relay(board_id, conn_id, signal.with_sender(user_id))
                .await;
        }
    }
}

enum Route {
    Forward(GatewayEvent),
    Skip,
    Close,
}

/// Decide what to do with the next room envelope. A lagged receiver has
/// lost events, so the socket closes and the client resyncs on reconnect.
fn route(result: Result<Envelope, RecvError>, conn_id: Uuid) -> Route {
    match result {
        Ok(envelope) if envelope.origin == Some(conn_id) => Route::Skip,
        Ok(envelope) => Route::Forward(envelope.event),
        Err(RecvError::Lagged(n)) => {
            warn!("Connection {} lagged by {} messages, closing", conn_id, n);
            Route::Close
        }
        Err(RecvError::Closed) => Route::Close,
    }
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            None
        }
    }
}
