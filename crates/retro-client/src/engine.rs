//! The per-board engine. A single actor task owns the note list, reaction
//! book, presence and ephemeral state; everything else talks to it through
//! [`EngineHandle`] intents and reads the published [`BoardView`].

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use retro_types::api::{BoardSnapshot, ExpireResponse, ReactionSummary};
use retro_types::events::Signal;
use retro_types::models::{Board, BoardStatus, Category, Item};
use retro_types::normalize_content;

use crate::config::SyncTimings;
use crate::error::{Notice, SyncError};
use crate::expiry::ExpiryEnforcer;
use crate::items::{ItemId, ItemList, LocalItem};
use crate::presence::PresenceTracker;
use crate::reactions::{ReactionBook, Settled};
use crate::signals::EphemeralBus;
use crate::store::BoardStore;
use crate::transport::{Channel, ChannelEvent, ConnectionState, EntityChange, Outbound};
use crate::view::BoardView;

const INTENT_CAPACITY: usize = 64;

/// Something the rendering layer should react to once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    Notice(Notice),
    /// A participant id observed for the first time; look up its profile.
    UserSeen(Uuid),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub board_id: Uuid,
    pub user_id: Uuid,
    pub timings: SyncTimings,
}

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum Intent {
    Create {
        content: String,
        category: Category,
        reply: Reply<ItemId>,
    },
    Update {
        item: ItemId,
        content: String,
        category: Category,
        reply: Reply<()>,
    },
    Delete {
        item: ItemId,
        reply: Reply<()>,
    },
    ToggleReaction {
        item: ItemId,
        reply: Reply<bool>,
    },
    SetReaction {
        item: ItemId,
        liked: bool,
        reply: Reply<bool>,
    },
    Keystroke {
        item_id: Uuid,
    },
    StopTyping,
    Celebrate {
        effect: String,
    },
    EndBoard {
        reply: Reply<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Store completions, routed back into the actor.
enum Done {
    Created {
        token: Uuid,
        result: Result<Item, SyncError>,
    },
    Updated {
        prior: LocalItem,
        result: Result<Item, SyncError>,
    },
    Deleted {
        index: usize,
        item: LocalItem,
        result: Result<(), SyncError>,
    },
    Reacted {
        item_id: Uuid,
        sent: bool,
        result: Result<ReactionSummary, SyncError>,
    },
    ReactionRead {
        item_id: Uuid,
        revision: u64,
        result: Result<ReactionSummary, SyncError>,
    },
    Expired(Result<ExpireResponse, SyncError>),
    Ended(Result<ExpireResponse, SyncError>),
    Resynced(Result<BoardSnapshot, SyncError>),
}

pub struct BoardEngine {
    board: Board,
    me: Uuid,
    timings: SyncTimings,
    store: Arc<dyn BoardStore>,
    channel: Option<Channel>,
    items: ItemList,
    reactions: ReactionBook,
    presence: PresenceTracker,
    bus: EphemeralBus,
    expiry: ExpiryEnforcer,
    connection: ConnectionState,
    was_connected: bool,
    resync_in_flight: bool,
    /// Pending authoritative reaction reads: due time, item, revision.
    refreshes: Vec<(Instant, Uuid, u64)>,
    done_tx: mpsc::UnboundedSender<Done>,
    view_tx: watch::Sender<BoardView>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl BoardEngine {
    /// Load the board, announce presence and start the actor.
    pub async fn spawn(
        config: EngineConfig,
        store: Arc<dyn BoardStore>,
        channel: Channel,
    ) -> Result<EngineHandle, SyncError> {
        let EngineConfig {
            board_id,
            user_id,
            timings,
        } = config;

        let snapshot = store.snapshot(board_id, user_id).await?;
        info!(
            "Opened board {} with {} items ({})",
            board_id,
            snapshot.items.len(),
            snapshot.board.status.as_str()
        );

        channel.send(Outbound::Announce {
            joined_at: Utc::now(),
        });

        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(BoardView::new(snapshot.board.clone()));

        let mut reactions = ReactionBook::new(user_id);
        reactions.seed(&snapshot.reactions);

        let engine = Self {
            board: snapshot.board,
            me: user_id,
            store,
            channel: Some(channel),
            items: ItemList::from_items(snapshot.items),
            reactions,
            presence: PresenceTracker::default(),
            bus: EphemeralBus::new(user_id, &timings),
            expiry: ExpiryEnforcer::new(timings.board_ttl),
            connection: ConnectionState::Connecting,
            was_connected: false,
            resync_in_flight: false,
            refreshes: Vec::new(),
            timings,
            done_tx,
            view_tx,
            events_tx,
        };
        engine.publish();

        let task = tokio::spawn(engine.run(intent_rx, done_rx));
        Ok(EngineHandle {
            intents: intent_tx,
            view: view_rx,
            events: Some(events_rx),
            task,
        })
    }

    async fn run(mut self, mut intents: mpsc::Receiver<Intent>, mut done_rx: mpsc::UnboundedReceiver<Done>) {
        let mut expiry_poll = tokio::time::interval(self.timings.expiry_poll);
        expiry_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                intent = intents.recv() => {
                    let Some(intent) = intent else {
                        debug!("All handles for board {} dropped", self.board.id);
                        break;
                    };
                    if let Some(reply) = self.on_intent(intent) {
                        self.teardown();
                        let _ = reply.send(());
                        return;
                    }
                }
                Some(done) = done_rx.recv() => self.on_done(done),
                event = recv_channel(&mut self.channel) => match event {
                    Some(event) => self.on_channel(event),
                    None => {
                        warn!("Board {} channel closed", self.board.id);
                        self.channel = None;
                        self.connection = ConnectionState::Disconnected;
                    }
                },
                _ = sleep_until(deadline) => self.on_timer(Instant::now()),
                // First tick completes immediately, so a stale board is
                // expired right after load.
                _ = expiry_poll.tick() => self.check_expiry(),
            }
            self.publish();
        }

        self.teardown();
    }

    // -- Intents --

    fn on_intent(&mut self, intent: Intent) -> Option<oneshot::Sender<()>> {
        match intent {
            Intent::Create {
                content,
                category,
                reply,
            } => {
                let result = self.create_item(content, category);
                self.answer(reply, result);
            }
            Intent::Update {
                item,
                content,
                category,
                reply,
            } => {
                let result = self.update_item(item, content, category);
                self.answer(reply, result);
            }
            Intent::Delete { item, reply } => {
                let result = self.delete_item(item);
                self.answer(reply, result);
            }
            Intent::ToggleReaction { item, reply } => {
                let result = self.react(item, None);
                self.answer(reply, result);
            }
            Intent::SetReaction { item, liked, reply } => {
                let result = self.react(item, Some(liked));
                self.answer(reply, result);
            }
            Intent::Keystroke { item_id } => {
                if self.board.is_active() && self.items.get(item_id).is_some() {
                    for signal in self.bus.keystroke(item_id, Instant::now()) {
                        self.broadcast(signal);
                    }
                }
            }
            Intent::StopTyping => {
                if let Some(signal) = self.bus.stop_typing() {
                    self.broadcast(signal);
                }
            }
            Intent::Celebrate { effect } => {
                let signal = self.bus.celebrate(effect, Instant::now());
                self.broadcast(signal);
            }
            Intent::EndBoard { reply } => {
                let result = self.end_board();
                self.answer(reply, result);
            }
            Intent::Close { reply } => return Some(reply),
        }
        None
    }

    /// Publish local effects before the caller sees the result.
    fn answer<T>(&mut self, reply: Reply<T>, result: Result<T, SyncError>) {
        if let Err(e) = &result {
            self.surface(e.clone());
        }
        self.publish();
        let _ = reply.send(result);
    }

    fn ensure_active(&self) -> Result<(), SyncError> {
        if self.board.is_active() {
            Ok(())
        } else {
            Err(SyncError::SessionEnded)
        }
    }

    /// Resolve a confirmed note. Placeholders cannot be edited or liked yet.
    fn durable(&self, item: ItemId) -> Result<&LocalItem, SyncError> {
        match item {
            ItemId::Pending(_) => Err(SyncError::Invalid("This note is still being saved.".into())),
            ItemId::Durable(id) => self
                .items
                .get(id)
                .ok_or_else(|| SyncError::NotFound("note".into())),
        }
    }

    fn authored(&self, item: ItemId) -> Result<Uuid, SyncError> {
        let local = self.durable(item)?;
        if local.author_id != self.me {
            return Err(SyncError::Unauthorized("only the author can change this note".into()));
        }
        local
            .durable_id()
            .ok_or_else(|| SyncError::NotFound("note".into()))
    }

    fn create_item(&mut self, content: String, category: Category) -> Result<ItemId, SyncError> {
        self.ensure_active()?;
        let content = normalize_content(&content).map_err(SyncError::Invalid)?;

        let token = Uuid::new_v4();
        let board_id = self.board.id;
        let me = self.me;
        self.items.insert_placeholder(LocalItem::placeholder(
            token,
            board_id,
            me,
            content.clone(),
            category,
            Utc::now(),
        ));
        debug!("Item placeholder {} added to board {}", token, board_id);

        self.spawn_store(move |store| async move {
            let result = store.create_item(board_id, token, me, content, category).await;
            Done::Created { token, result }
        });
        Ok(ItemId::Pending(token))
    }

    fn update_item(&mut self, item: ItemId, content: String, category: Category) -> Result<(), SyncError> {
        self.ensure_active()?;
        let item_id = self.authored(item)?;
        let content = normalize_content(&content).map_err(SyncError::Invalid)?;

        let prior = self
            .items
            .apply_local_edit(item_id, content.clone(), category, Utc::now())
            .ok_or_else(|| SyncError::NotFound("note".into()))?;

        let me = self.me;
        self.spawn_store(move |store| async move {
            let result = store.update_item(item_id, me, content, category).await;
            Done::Updated { prior, result }
        });
        Ok(())
    }

    fn delete_item(&mut self, item: ItemId) -> Result<(), SyncError> {
        self.ensure_active()?;
        let item_id = self.authored(item)?;
        let (index, removed) = self
            .items
            .remove_local(item_id)
            .ok_or_else(|| SyncError::NotFound("note".into()))?;

        let me = self.me;
        self.spawn_store(move |store| async move {
            let result = store.delete_item(item_id, me).await;
            Done::Deleted {
                index,
                item: removed,
                result,
            }
        });
        Ok(())
    }

    /// Toggle when `desired` is `None`, otherwise set. Returns the new flag.
    fn react(&mut self, item: ItemId, desired: Option<bool>) -> Result<bool, SyncError> {
        self.ensure_active()?;
        let item_id = self
            .durable(item)?
            .durable_id()
            .ok_or_else(|| SyncError::NotFound("note".into()))?;

        let before = self.reactions.state(item_id).liked;
        let (liked, write) = match desired {
            None => self.reactions.toggle(item_id),
            Some(liked) => (liked, self.reactions.set(item_id, liked)),
        };

        if liked != before {
            self.broadcast(Signal::ReactionIntent {
                item_id,
                user_id: self.me,
                liked,
            });
        }
        if let Some(sent) = write {
            self.spawn_reaction_write(item_id, sent);
        }
        Ok(liked)
    }

    fn spawn_reaction_write(&self, item_id: Uuid, sent: bool) {
        let me = self.me;
        self.spawn_store(move |store| async move {
            let result = if sent {
                store.like(item_id, me).await
            } else {
                store.unlike(item_id, me).await
            };
            Done::Reacted {
                item_id,
                sent,
                result,
            }
        });
    }

    fn end_board(&mut self) -> Result<(), SyncError> {
        self.ensure_active()?;
        if self.board.owner_id != self.me {
            return Err(SyncError::Unauthorized("only the board owner can end the session".into()));
        }
        let board_id = self.board.id;
        let me = self.me;
        self.spawn_store(move |store| async move { Done::Ended(store.end_board(board_id, me).await) });
        Ok(())
    }

    // -- Store completions --

    fn on_done(&mut self, done: Done) {
        match done {
            Done::Created { token, result } => match result {
                Ok(item) => {
                    let id = item.id;
                    let merge = self.items.confirm(token, item);
                    debug!("Item {} confirmed for placeholder {} ({:?})", id, token, merge);
                }
                Err(e) => {
                    warn!("Create failed, rolling back placeholder {}: {}", token, e);
                    self.items.rollback(token);
                    self.fail(e);
                }
            },
            Done::Updated { prior, result } => match result {
                Ok(item) => {
                    let id = item.id;
                    let merge = self.items.merge_updated(item);
                    trace!("Update of {} acknowledged ({:?})", id, merge);
                }
                Err(e) => {
                    warn!("Update failed, restoring prior content: {}", e);
                    self.items.restore(prior);
                    self.fail(e);
                }
            },
            Done::Deleted {
                index,
                item,
                result,
            } => match result {
                Ok(()) => {
                    if let Some(id) = item.durable_id() {
                        self.forget_item(id);
                    }
                }
                Err(e) => {
                    warn!("Delete failed, restoring note: {}", e);
                    self.items.reinsert(index, item);
                    self.fail(e);
                }
            },
            Done::Reacted {
                item_id,
                sent,
                result,
            } => match self.reactions.settle(item_id, sent, result) {
                Some(Settled::Next(next)) => self.spawn_reaction_write(item_id, next),
                Some(Settled::Refresh { revision }) => {
                    let due = Instant::now() + self.timings.reaction_refresh_delay;
                    self.refreshes.push((due, item_id, revision));
                }
                Some(Settled::Failed(e)) => {
                    warn!("Reaction on {} rolled back: {}", item_id, e);
                    self.fail(e);
                }
                None => {}
            },
            Done::ReactionRead {
                item_id,
                revision,
                result,
            } => match result {
                Ok(summary) => {
                    if self.reactions.refresh(item_id, revision, &summary) {
                        debug!("Reaction count on {} corrected to {}", item_id, summary.count);
                    }
                }
                Err(e) => debug!("Reaction refresh for {} failed: {}", item_id, e),
            },
            Done::Expired(result) => {
                if let Some(board) = self.expiry.settle(result) {
                    self.apply_board(board);
                }
            }
            Done::Ended(result) => match result {
                Ok(response) => self.apply_board(response.board),
                Err(e) => self.fail(e),
            },
            Done::Resynced(result) => {
                self.resync_in_flight = false;
                match result {
                    Ok(snapshot) => self.apply_snapshot(snapshot),
                    Err(e) => warn!("Board {} resync failed: {}", self.board.id, e),
                }
            }
        }
    }

    /// A durable write was rejected. Local state is already restored.
    fn fail(&mut self, error: SyncError) {
        if error == SyncError::SessionEnded && self.board.is_active() {
            info!("Store reports board {} ended, refreshing", self.board.id);
            self.board.status = BoardStatus::Ended;
            self.resync();
        }
        self.surface(error);
    }

    fn surface(&self, error: SyncError) {
        if error.is_surfaced() {
            let _ = self.events_tx.send(EngineEvent::Notice(Notice::from(error)));
        }
    }

    // -- Channel --

    fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Entity(change) => self.on_entity(change),
            ChannelEvent::Broadcast(signal) => self.on_signal(signal),
            ChannelEvent::PresenceSync(entries) => {
                for user_id in self.presence.apply_snapshot(&entries) {
                    if user_id != self.me {
                        let _ = self.events_tx.send(EngineEvent::UserSeen(user_id));
                    }
                }
                let presence = &self.presence;
                self.bus.retain_users(|user| presence.is_live(user));
            }
            ChannelEvent::Connectivity(state) => {
                debug!("Board {} channel {:?}", self.board.id, state);
                self.connection = state;
                if state == ConnectionState::Connected {
                    // Anything pushed while we were away is lost
                    if self.was_connected {
                        self.resync();
                    }
                    self.was_connected = true;
                }
            }
        }
    }

    fn on_entity(&mut self, change: EntityChange) {
        let board_id = self.board.id;
        match change {
            EntityChange::ItemCreated(item) if item.board_id == board_id => {
                let id = item.id;
                let merge = self.items.merge_created(item, self.me);
                debug!("Created notification for {}: {:?}", id, merge);
            }
            EntityChange::ItemUpdated(item) if item.board_id == board_id => {
                let id = item.id;
                let merge = self.items.merge_updated(item);
                debug!("Updated notification for {}: {:?}", id, merge);
            }
            EntityChange::ItemDeleted { board_id: b, item_id } if b == board_id => {
                let merge = self.items.merge_deleted(item_id);
                debug!("Deleted notification for {}: {:?}", item_id, merge);
                self.forget_item(item_id);
            }
            EntityChange::ReactionChanged {
                item_id,
                user_id,
                liked,
                count,
            } => {
                if self.items.get(item_id).is_some() {
                    self.reactions.apply_durable(item_id, user_id, liked, count);
                }
            }
            EntityChange::BoardChanged(board) => self.apply_board(board),
            other => debug!("Ignoring change for another board: {:?}", other),
        }
    }

    fn on_signal(&mut self, signal: Signal) {
        trace!("Signal on board {}: {:?}", self.board.id, signal);
        let now = Instant::now();
        match signal {
            Signal::ReactionIntent {
                item_id,
                user_id,
                liked,
            } => {
                if self.items.get(item_id).is_some() {
                    let expires_at = now + self.timings.preview_ttl;
                    self.reactions.apply_preview(item_id, user_id, liked, expires_at);
                }
            }
            other => {
                self.bus.receive(&other, now);
            }
        }
    }

    /// Status only moves forward; a stale active board never reopens.
    fn apply_board(&mut self, board: Board) {
        if board.id != self.board.id {
            return;
        }
        if !self.board.is_active() && board.is_active() {
            debug!("Ignoring stale active state for board {}", board.id);
            return;
        }
        if self.board.is_active() && !board.is_active() {
            info!(
                "Board {} ended ({})",
                board.id,
                if board.ended_by.is_some() { "manual" } else { "expired" }
            );
            if let Some(signal) = self.bus.stop_typing() {
                self.broadcast(signal);
            }
        }
        self.board = board;
    }

    fn apply_snapshot(&mut self, snapshot: BoardSnapshot) {
        self.apply_board(snapshot.board);
        self.items.merge_snapshot(snapshot.items);
        let items = &self.items;
        self.reactions.retain_items(|id| items.get(id).is_some());
        self.reactions.seed(&snapshot.reactions);
        debug!("Board {} resynced with {} items", self.board.id, self.items.len());
    }

    fn resync(&mut self) {
        if self.resync_in_flight {
            return;
        }
        self.resync_in_flight = true;
        let board_id = self.board.id;
        let me = self.me;
        self.spawn_store(move |store| async move { Done::Resynced(store.snapshot(board_id, me).await) });
    }

    fn forget_item(&mut self, item_id: Uuid) {
        self.reactions.forget_item(item_id);
        self.refreshes.retain(|(_, id, _)| *id != item_id);
        if let Some(signal) = self.bus.forget_item(item_id) {
            self.broadcast(signal);
        }
    }

    fn broadcast(&self, signal: Signal) {
        if let Some(channel) = &self.channel {
            if !channel.send(Outbound::Broadcast(signal)) {
                debug!("Dropped outbound signal for board {}", self.board.id);
            }
        }
    }

    // -- Timers --

    fn next_deadline(&self) -> Option<Instant> {
        let refresh = self.refreshes.iter().map(|(due, _, _)| *due).min();
        [self.bus.next_deadline(), self.reactions.next_deadline(), refresh]
            .into_iter()
            .flatten()
            .min()
    }

    fn on_timer(&mut self, now: Instant) {
        let (outgoing, _) = self.bus.tick(now);
        for signal in outgoing {
            self.broadcast(signal);
        }
        self.reactions.expire_previews(now);

        let (due, later): (Vec<_>, Vec<_>) = self.refreshes.drain(..).partition(|(at, _, _)| *at <= now);
        self.refreshes = later;
        for (_, item_id, revision) in due {
            let me = self.me;
            self.spawn_store(move |store| async move {
                let result = store.item_reactions(item_id, me).await;
                Done::ReactionRead {
                    item_id,
                    revision,
                    result,
                }
            });
        }
    }

    fn check_expiry(&mut self) {
        if !self.expiry.check(&self.board, Utc::now()) {
            return;
        }
        let board_id = self.board.id;
        self.spawn_store(move |store| async move { Done::Expired(store.expire_board(board_id).await) });
    }

    // -- Plumbing --

    fn spawn_store<F, Fut>(&self, call: F)
    where
        F: FnOnce(Arc<dyn BoardStore>) -> Fut,
        Fut: Future<Output = Done> + Send + 'static,
    {
        let done_tx = self.done_tx.clone();
        let fut = call(self.store.clone());
        // Results for a closed engine are dropped with the receiver
        tokio::spawn(async move {
            let _ = done_tx.send(fut.await);
        });
    }

    fn view(&self) -> BoardView {
        BoardView {
            board: self.board.clone(),
            items: self.items.as_slice().to_vec(),
            reactions: self.reactions.states(),
            live_count: self.presence.live_count(),
            live_user_ids: self.presence.live_user_ids(),
            typing: self.bus.typing(),
            celebrations: self.bus.celebrations(),
            connection: self.connection,
        }
    }

    fn publish(&self) {
        let next = self.view();
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Stop typing, release the channel and drop every timer.
    fn teardown(&mut self) {
        if let Some(signal) = self.bus.stop_typing() {
            self.broadcast(signal);
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.refreshes.clear();
        self.connection = ConnectionState::Disconnected;
        self.publish();
        info!("Closed board {}", self.board.id);
    }
}

async fn recv_channel(channel: &mut Option<Channel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Client side of a running [`BoardEngine`].
pub struct EngineHandle {
    intents: mpsc::Sender<Intent>,
    view: watch::Receiver<BoardView>,
    events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    async fn call<T>(&self, intent: impl FnOnce(Reply<T>) -> Intent) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.intents
            .send(intent(reply))
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    fn fire(&self, intent: Intent) {
        if self.intents.try_send(intent).is_err() {
            debug!("Board engine busy or closed, dropping ephemeral intent");
        }
    }

    /// Add a note. It is visible immediately as pending.
    pub async fn create_item(&self, content: impl Into<String>, category: Category) -> Result<ItemId, SyncError> {
        let content = content.into();
        self.call(|reply| Intent::Create {
            content,
            category,
            reply,
        })
        .await
    }

    pub async fn update_item(
        &self,
        item: ItemId,
        content: impl Into<String>,
        category: Category,
    ) -> Result<(), SyncError> {
        let content = content.into();
        self.call(|reply| Intent::Update {
            item,
            content,
            category,
            reply,
        })
        .await
    }

    pub async fn delete_item(&self, item: ItemId) -> Result<(), SyncError> {
        self.call(|reply| Intent::Delete { item, reply }).await
    }

    /// Flip our like on a note. Returns the new flag.
    pub async fn toggle_reaction(&self, item: ItemId) -> Result<bool, SyncError> {
        self.call(|reply| Intent::ToggleReaction { item, reply }).await
    }

    /// Set our like on a note. Repeating the same value is a no-op.
    pub async fn set_reaction(&self, item: ItemId, liked: bool) -> Result<bool, SyncError> {
        self.call(|reply| Intent::SetReaction { item, liked, reply }).await
    }

    pub async fn like(&self, item: ItemId) -> Result<bool, SyncError> {
        self.set_reaction(item, true).await
    }

    pub fn keystroke(&self, item_id: Uuid) {
        self.fire(Intent::Keystroke { item_id });
    }

    pub fn stop_typing(&self) {
        self.fire(Intent::StopTyping);
    }

    pub fn celebrate(&self, effect: impl Into<String>) {
        self.fire(Intent::Celebrate {
            effect: effect.into(),
        });
    }

    /// End the session on behalf of the owner. Confirmation is the
    /// caller's job.
    pub async fn end_board(&self) -> Result<(), SyncError> {
        self.call(|reply| Intent::EndBoard { reply }).await
    }

    pub fn view(&self) -> watch::Receiver<BoardView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> BoardView {
        self.view.borrow().clone()
    }

    /// The notice and user-seen stream. Only the first caller gets it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events.take()
    }

    /// Tear the engine down and wait for it to finish.
    pub async fn close(self) {
        let (reply, rx) = oneshot::channel();
        if self.intents.send(Intent::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}
