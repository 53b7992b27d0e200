//! Board channel: typed inbound events, outbound commands, and the
//! reconnecting WebSocket loop that carries them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use retro_types::events::{GatewayCommand, GatewayEvent, Signal};
use retro_types::models::{Board, Item, PresenceEntry};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Authoritative change to a persisted entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    ItemCreated(Item),
    ItemUpdated(Item),
    ItemDeleted { board_id: Uuid, item_id: Uuid },
    ReactionChanged { item_id: Uuid, user_id: Uuid, liked: bool, count: u32 },
    BoardChanged(Board),
}

/// Everything a board channel can deliver, one variant per stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Entity(EntityChange),
    Broadcast(Signal),
    PresenceSync(Vec<PresenceEntry>),
    Connectivity(ConnectionState),
}

impl ChannelEvent {
    /// `Ready` is a handshake detail and has no channel-level meaning.
    pub fn from_gateway(event: GatewayEvent) -> Option<Self> {
        let event = match event {
            GatewayEvent::Ready { .. } => return None,
            GatewayEvent::ItemCreate { item } => Self::Entity(EntityChange::ItemCreated(item)),
            GatewayEvent::ItemUpdate { item } => Self::Entity(EntityChange::ItemUpdated(item)),
            GatewayEvent::ItemDelete { board_id, item_id } => {
                Self::Entity(EntityChange::ItemDeleted { board_id, item_id })
            }
            GatewayEvent::ReactionUpdate { item_id, user_id, liked, count } => {
                Self::Entity(EntityChange::ReactionChanged { item_id, user_id, liked, count })
            }
            GatewayEvent::BoardUpdate { board } => Self::Entity(EntityChange::BoardChanged(board)),
            GatewayEvent::Broadcast { signal } => Self::Broadcast(signal),
            GatewayEvent::PresenceSync { entries } => Self::PresenceSync(entries),
        };
        Some(event)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Announce { joined_at: DateTime<Utc> },
    Broadcast(Signal),
}

impl From<Outbound> for GatewayCommand {
    fn from(out: Outbound) -> Self {
        match out {
            Outbound::Announce { joined_at } => GatewayCommand::Announce { joined_at },
            Outbound::Broadcast(signal) => GatewayCommand::Broadcast { signal },
        }
    }
}

/// One open board channel. Dropping it stops the underlying transport.
pub struct Channel {
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
}

/// Far side of a loopback channel.
pub struct RemoteEnd {
    pub events: mpsc::Sender<ChannelEvent>,
    pub outbound: mpsc::Receiver<Outbound>,
}

impl Channel {
    /// An in-process channel with no network behind it.
    pub fn loopback() -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let channel = Self {
            outbound: out_tx,
            inbound: in_rx,
            task: None,
        };
        (
            channel,
            RemoteEnd {
                events: in_tx,
                outbound: out_rx,
            },
        )
    }

    /// Fire-and-forget. Returns false when the channel is gone or full.
    pub fn send(&self, out: Outbound) -> bool {
        self.outbound.try_send(out).is_ok()
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    /// Stop receiving now. Commands already queued are still flushed
    /// before the transport shuts down.
    pub fn close(mut self) {
        self.inbound.close();
        self.task.take();
    }

    fn shutdown(&mut self) {
        self.inbound.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Open a reconnecting WebSocket channel to `url`.
///
/// Connectivity changes are delivered in-band. The last `Announce` is
/// replayed on every successful connect; broadcasts sent while
/// disconnected are dropped.
pub fn connect(url: String, backoff: Backoff) -> Channel {
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(run_socket(url, backoff, out_rx, in_tx));
    Channel {
        outbound: out_tx,
        inbound: in_rx,
        task: Some(task),
    }
}

enum SessionEnd {
    /// Socket dropped; try again.
    Lost,
    /// The engine released the channel.
    Closed,
}

async fn run_socket(
    url: String,
    mut backoff: Backoff,
    mut outbound: mpsc::Receiver<Outbound>,
    inbound: mpsc::Sender<ChannelEvent>,
) {
    let mut announce: Option<DateTime<Utc>> = None;

    loop {
        if !notify(&inbound, ConnectionState::Connecting).await {
            return;
        }

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!("Board channel connected");
                backoff.reset();
                if !notify(&inbound, ConnectionState::Connected).await {
                    return;
                }

                let (mut ws_tx, mut ws_rx) = stream.split();
                let mut end = SessionEnd::Lost;
                let mut healthy = true;

                if let Some(joined_at) = announce {
                    if let Err(e) = send_command(&mut ws_tx, Outbound::Announce { joined_at }).await {
                        warn!("Failed to re-announce presence: {}", e);
                        healthy = false;
                    }
                }

                if healthy {
                    loop {
                        tokio::select! {
                            out = outbound.recv() => {
                                let Some(out) = out else {
                                    end = SessionEnd::Closed;
                                    break;
                                };
                                if let Outbound::Announce { joined_at } = &out {
                                    announce = Some(*joined_at);
                                }
                                if let Err(e) = send_command(&mut ws_tx, out).await {
                                    warn!("Board channel send failed: {}", e);
                                    break;
                                }
                            }
                            msg = ws_rx.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                                            Ok(event) => {
                                                if let Some(event) = ChannelEvent::from_gateway(event) {
                                                    if inbound.send(event).await.is_err() {
                                                        end = SessionEnd::Closed;
                                                        break;
                                                    }
                                                }
                                            }
                                            Err(e) => debug!("Ignoring unparseable gateway event: {}", e),
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => break,
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        warn!("Board channel error: {}", e);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }

                let _ = ws_tx.close().await;
                if matches!(end, SessionEnd::Closed) {
                    debug!("Board channel released");
                    return;
                }
            }
            Err(e) => warn!("Board channel connect failed: {}", e),
        }

        if !notify(&inbound, ConnectionState::Disconnected).await {
            return;
        }

        let delay = backoff.next_delay();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        // Only the announce survives a disconnect.
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                out = outbound.recv() => match out {
                    Some(Outbound::Announce { joined_at }) => announce = Some(joined_at),
                    Some(Outbound::Broadcast(_)) => {}
                    None => return,
                },
            }
        }
    }
}

async fn notify(inbound: &mpsc::Sender<ChannelEvent>, state: ConnectionState) -> bool {
    inbound.send(ChannelEvent::Connectivity(state)).await.is_ok()
}

async fn send_command<S>(ws_tx: &mut S, out: Outbound) -> anyhow::Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let command = GatewayCommand::from(out);
    let text = serde_json::to_string(&command)?;
    ws_tx.send(Message::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_not_surfaced() {
        let ready = GatewayEvent::Ready {
            user_id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
        };
        assert_eq!(ChannelEvent::from_gateway(ready), None);
    }

    #[test]
    fn gateway_events_map_to_their_stream() {
        let signal = Signal::Celebrate {
            user_id: Uuid::new_v4(),
            effect: "confetti".into(),
        };
        assert_eq!(
            ChannelEvent::from_gateway(GatewayEvent::Broadcast { signal: signal.clone() }),
            Some(ChannelEvent::Broadcast(signal))
        );

        let item_id = Uuid::new_v4();
        let board_id = Uuid::new_v4();
        assert_eq!(
            ChannelEvent::from_gateway(GatewayEvent::ItemDelete { board_id, item_id }),
            Some(ChannelEvent::Entity(EntityChange::ItemDeleted { board_id, item_id }))
        );
        assert_eq!(
            ChannelEvent::from_gateway(GatewayEvent::PresenceSync { entries: vec![] }),
            Some(ChannelEvent::PresenceSync(vec![]))
        );
    }

    #[test]
    fn backoff_doubles_up_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn loopback_carries_both_directions() {
        let (mut channel, mut remote) = Channel::loopback();

        assert!(channel.send(Outbound::Announce { joined_at: Utc::now() }));
        assert!(matches!(remote.outbound.recv().await, Some(Outbound::Announce { .. })));

        remote
            .events
            .send(ChannelEvent::Connectivity(ConnectionState::Connected))
            .await
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Connectivity(ConnectionState::Connected))
        );

        channel.close();
        assert!(remote.events.send(ChannelEvent::PresenceSync(vec![])).await.is_err());
    }
}
