//! The local note list and the reconciliation rules that merge store
//! acknowledgements and pushed notifications into it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use retro_types::models::{Category, Item};

/// Placeholder ids are the client token minted at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ItemId {
    Pending(Uuid),
    Durable(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalItem {
    pub id: ItemId,
    pub client_token: Option<Uuid>,
    pub board_id: Uuid,
    pub content: String,
    pub category: Category,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Awaiting durable confirmation.
    pub pending: bool,
}

impl LocalItem {
    pub fn placeholder(
        token: Uuid,
        board_id: Uuid,
        author_id: Uuid,
        content: String,
        category: Category,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ItemId::Pending(token),
            client_token: Some(token),
            board_id,
            content,
            category,
            author_id,
            created_at: now,
            updated_at: now,
            pending: true,
        }
    }

    pub fn confirmed(item: Item) -> Self {
        Self {
            id: ItemId::Durable(item.id),
            client_token: item.client_token,
            board_id: item.board_id,
            content: item.content,
            category: item.category,
            author_id: item.author_id,
            created_at: item.created_at,
            updated_at: item.updated_at,
            pending: false,
        }
    }

    pub fn durable_id(&self) -> Option<Uuid> {
        match self.id {
            ItemId::Durable(id) => Some(id),
            ItemId::Pending(_) => None,
        }
    }

    /// The persisted form, if confirmed.
    pub fn to_durable(&self) -> Option<Item> {
        let id = self.durable_id()?;
        Some(Item {
            id,
            client_token: self.client_token,
            board_id: self.board_id,
            content: self.content.clone(),
            category: self.category,
            author_id: self.author_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn is_placeholder_for(&self, token: Uuid) -> bool {
        self.pending && self.client_token == Some(token)
    }
}

/// What a merge did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// An existing entry (placeholder or durable) took the new value.
    Replaced,
    Appended,
    Removed,
    /// Already reflected locally, or not ours to apply.
    Ignored,
}

/// Ordered notes for one board. Only the engine writes to it.
#[derive(Debug, Default, Clone)]
pub struct ItemList {
    items: Vec<LocalItem>,
}

impl ItemList {
    pub fn from_items(items: Vec<Item>) -> Self {
        Self {
            items: items.into_iter().map(LocalItem::confirmed).collect(),
        }
    }

    pub fn as_slice(&self) -> &[LocalItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&LocalItem> {
        self.position(id).map(|i| &self.items[i])
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|i| i.id == ItemId::Durable(id))
    }

    fn placeholder_position(&self, token: Uuid) -> Option<usize> {
        self.items.iter().position(|i| i.is_placeholder_for(token))
    }

    // -- Optimistic mutations --

    pub fn insert_placeholder(&mut self, item: LocalItem) {
        self.items.push(item);
    }

    /// The store acknowledged a create. The placeholder keeps its slot and
    /// takes the durable identity.
    pub fn confirm(&mut self, token: Uuid, item: Item) -> Merge {
        if let Some(pos) = self.position(item.id) {
            // A notification beat the acknowledgement
            self.items[pos] = LocalItem::confirmed(item);
            self.rollback(token);
            return Merge::Replaced;
        }
        match self.placeholder_position(token) {
            Some(pos) => {
                self.items[pos] = LocalItem::confirmed(item);
                Merge::Replaced
            }
            None => {
                self.items.push(LocalItem::confirmed(item));
                Merge::Appended
            }
        }
    }

    /// Drop a placeholder whose create failed. Returns whether it was present.
    pub fn rollback(&mut self, token: Uuid) -> bool {
        match self.placeholder_position(token) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Apply an edit locally and hand back the prior value for rollback.
    pub fn apply_local_edit(
        &mut self,
        id: Uuid,
        content: String,
        category: Category,
        now: DateTime<Utc>,
    ) -> Option<LocalItem> {
        let pos = self.position(id)?;
        let prior = self.items[pos].clone();
        let item = &mut self.items[pos];
        item.content = content;
        item.category = category;
        item.updated_at = now;
        Some(prior)
    }

    /// Put back a value captured before a failed edit. A no-op when the
    /// item has since been deleted.
    pub fn restore(&mut self, prior: LocalItem) -> bool {
        let Some(id) = prior.durable_id() else {
            return false;
        };
        match self.position(id) {
            Some(pos) => {
                self.items[pos] = prior;
                true
            }
            None => false,
        }
    }

    pub fn remove_local(&mut self, id: Uuid) -> Option<(usize, LocalItem)> {
        let pos = self.position(id)?;
        Some((pos, self.items.remove(pos)))
    }

    /// Undo a failed delete, unless the item reappeared some other way.
    pub fn reinsert(&mut self, index: usize, item: LocalItem) -> bool {
        if item.durable_id().is_some_and(|id| self.position(id).is_some()) {
            return false;
        }
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        true
    }

    // -- Authoritative notifications --

    pub fn merge_created(&mut self, item: Item, me: Uuid) -> Merge {
        if self.position(item.id).is_some() {
            debug!("Item {} already present, notification ignored", item.id);
            return Merge::Ignored;
        }

        if item.author_id == me {
            let slot = match item.client_token {
                Some(token) => self.placeholder_position(token),
                // Best effort for notifications that carry no token: the
                // oldest pending note with identical content and category.
                None => self.items.iter().position(|i| {
                    i.pending
                        && i.author_id == me
                        && i.content == item.content
                        && i.category == item.category
                }),
            };
            if let Some(pos) = slot {
                debug!("Item {} reconciled with local placeholder", item.id);
                self.items[pos] = LocalItem::confirmed(item);
                return Merge::Replaced;
            }
        }

        self.items.push(LocalItem::confirmed(item));
        Merge::Appended
    }

    pub fn merge_updated(&mut self, item: Item) -> Merge {
        match self.position(item.id) {
            Some(pos) => {
                self.items[pos] = LocalItem::confirmed(item);
                Merge::Replaced
            }
            None => Merge::Ignored,
        }
    }

    pub fn merge_deleted(&mut self, id: Uuid) -> Merge {
        match self.remove_local(id) {
            Some(_) => Merge::Removed,
            None => Merge::Ignored,
        }
    }

    /// Replace durable state with a fresh snapshot, keeping placeholders
    /// the snapshot does not know about yet.
    pub fn merge_snapshot(&mut self, items: Vec<Item>) {
        let persisted_tokens: Vec<Uuid> = items.iter().filter_map(|i| i.client_token).collect();
        let placeholders: Vec<LocalItem> = self
            .items
            .drain(..)
            .filter(|i| {
                i.pending
                    && i.client_token
                        .is_some_and(|token| !persisted_tokens.contains(&token))
            })
            .collect();

        self.items = items.into_iter().map(LocalItem::confirmed).collect();
        self.items.extend(placeholders);
    }
}
