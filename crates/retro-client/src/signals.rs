//! Typing indicators and celebrations. Nothing here is persisted; every
//! entry carries its own deadline.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use retro_types::events::Signal;

use crate::config::SyncTimings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Celebration {
    pub user_id: Uuid,
    pub effect: String,
}

#[derive(Debug)]
pub struct EphemeralBus {
    me: Uuid,
    typing_idle: Duration,
    typing_ttl: Duration,
    celebration_ttl: Duration,
    /// Item we are typing in, and when to declare we stopped.
    own_typing: Option<(Uuid, Instant)>,
    peers_typing: HashMap<(Uuid, Uuid), Instant>,
    celebrations: Vec<(Celebration, Instant)>,
}

impl EphemeralBus {
    pub fn new(me: Uuid, timings: &SyncTimings) -> Self {
        Self {
            me,
            typing_idle: timings.typing_idle,
            typing_ttl: timings.typing_ttl,
            celebration_ttl: timings.celebration_ttl,
            own_typing: None,
            peers_typing: HashMap::new(),
            celebrations: Vec::new(),
        }
    }

    /// A keystroke in `item_id`'s editor. Returns the signals to send.
    pub fn keystroke(&mut self, item_id: Uuid, now: Instant) -> Vec<Signal> {
        let mut out = Vec::with_capacity(2);
        if let Some((previous, _)) = self.own_typing {
            if previous != item_id {
                out.push(Signal::TypingStopped {
                    item_id: previous,
                    user_id: self.me,
                });
            }
        }
        out.push(Signal::Typing {
            item_id,
            user_id: self.me,
        });
        self.own_typing = Some((item_id, now + self.typing_idle));
        out
    }

    pub fn stop_typing(&mut self) -> Option<Signal> {
        let (item_id, _) = self.own_typing.take()?;
        Some(Signal::TypingStopped {
            item_id,
            user_id: self.me,
        })
    }

    /// Our own celebration shows locally too.
    pub fn celebrate(&mut self, effect: String, now: Instant) -> Signal {
        self.celebrations.push((
            Celebration {
                user_id: self.me,
                effect: effect.clone(),
            },
            now + self.celebration_ttl,
        ));
        Signal::Celebrate {
            user_id: self.me,
            effect,
        }
    }

    /// Apply a peer signal. Returns whether visible state changed.
    pub fn receive(&mut self, signal: &Signal, now: Instant) -> bool {
        if signal.user_id() == self.me {
            return false;
        }
        match signal {
            Signal::Typing { item_id, user_id } => {
                self.peers_typing
                    .insert((*item_id, *user_id), now + self.typing_ttl)
                    .is_none()
            }
            Signal::TypingStopped { item_id, user_id } => {
                self.peers_typing.remove(&(*item_id, *user_id)).is_some()
            }
            Signal::Celebrate { user_id, effect } => {
                self.celebrations.push((
                    Celebration {
                        user_id: *user_id,
                        effect: effect.clone(),
                    },
                    now + self.celebration_ttl,
                ));
                true
            }
            Signal::ReactionIntent { .. } => false,
        }
    }

    /// Fire due timers. Returns signals to send and whether anything
    /// visible expired.
    pub fn tick(&mut self, now: Instant) -> (Vec<Signal>, bool) {
        let mut out = Vec::new();
        if let Some((_, deadline)) = self.own_typing {
            if deadline <= now {
                out.extend(self.stop_typing());
            }
        }

        let before = self.peers_typing.len() + self.celebrations.len();
        self.peers_typing.retain(|_, expires_at| *expires_at > now);
        self.celebrations.retain(|(_, expires_at)| *expires_at > now);
        let changed = before != self.peers_typing.len() + self.celebrations.len();

        (out, changed)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let own = self.own_typing.map(|(_, deadline)| deadline);
        let peers = self.peers_typing.values().copied();
        let celebrations = self.celebrations.iter().map(|(_, at)| *at);
        own.into_iter().chain(peers).chain(celebrations).min()
    }

    /// Item id to the users currently typing in it.
    pub fn typing(&self) -> BTreeMap<Uuid, Vec<Uuid>> {
        let mut map: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for (item_id, user_id) in self.peers_typing.keys() {
            map.entry(*item_id).or_default().push(*user_id);
        }
        for users in map.values_mut() {
            users.sort();
        }
        map
    }

    pub fn celebrations(&self) -> Vec<Celebration> {
        self.celebrations.iter().map(|(c, _)| c.clone()).collect()
    }

    /// The item is gone; drop its indicators and stop our own typing in it.
    pub fn forget_item(&mut self, item_id: Uuid) -> Option<Signal> {
        self.peers_typing.retain(|(item, _), _| *item != item_id);
        match self.own_typing {
            Some((current, _)) if current == item_id => self.stop_typing(),
            _ => None,
        }
    }

    /// Drop indicators of users who left the board.
    pub fn retain_users(&mut self, is_live: impl Fn(Uuid) -> bool) -> bool {
        let before = self.peers_typing.len();
        self.peers_typing.retain(|(_, user), _| is_live(*user));
        before != self.peers_typing.len()
    }
}
