//! Persistence seam. The engine only talks to the durable store through
//! [`BoardStore`].

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use retro_types::api::{
    BoardSnapshot, CreateItemRequest, ErrorBody, ExpireResponse, ReactionSummary,
    UpdateItemRequest,
};
use retro_types::models::{Category, Item};

use crate::error::SyncError;

/// Durable operations a board engine needs.
///
/// Writes are scoped by the acting user so authorization holds at the
/// store, whatever the local guards decided.
#[async_trait]
pub trait BoardStore: Send + Sync + 'static {
    /// Board, items and like summaries as seen by `viewer`.
    async fn snapshot(&self, board_id: Uuid, viewer: Uuid) -> Result<BoardSnapshot, SyncError>;

    /// Persist a note. Retrying with the same `client_token` returns the
    /// note already stored.
    async fn create_item(
        &self,
        board_id: Uuid,
        client_token: Uuid,
        author_id: Uuid,
        content: String,
        category: Category,
    ) -> Result<Item, SyncError>;

    async fn update_item(
        &self,
        item_id: Uuid,
        author_id: Uuid,
        content: String,
        category: Category,
    ) -> Result<Item, SyncError>;

    async fn delete_item(&self, item_id: Uuid, author_id: Uuid) -> Result<(), SyncError>;

    /// Insert the `(item, user)` reaction. An existing row is success.
    async fn like(&self, item_id: Uuid, user_id: Uuid) -> Result<ReactionSummary, SyncError>;

    async fn unlike(&self, item_id: Uuid, user_id: Uuid) -> Result<ReactionSummary, SyncError>;

    async fn item_reactions(&self, item_id: Uuid, user_id: Uuid) -> Result<ReactionSummary, SyncError>;

    /// Conditional `active -> ended` with no human attached.
    async fn expire_board(&self, board_id: Uuid) -> Result<ExpireResponse, SyncError>;

    /// Manual end by `user_id`. Confirmation happens before this call.
    async fn end_board(&self, board_id: Uuid, user_id: Uuid) -> Result<ExpireResponse, SyncError>;
}

/// [`BoardStore`] over the retro REST API. The acting user is whoever the
/// bearer token names; the id arguments are only checked server-side.
#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SyncError> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.json::<ErrorBody>().await.ok();
        Err(SyncError::from_response(status.as_u16(), body))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SyncError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Transient(format!("unreadable response: {}", e)))
    }
}

#[async_trait]
impl BoardStore for HttpStore {
    async fn snapshot(&self, board_id: Uuid, _viewer: Uuid) -> Result<BoardSnapshot, SyncError> {
        self.json(self.request(Method::GET, &format!("/boards/{}/snapshot", board_id)))
            .await
    }

    async fn create_item(
        &self,
        board_id: Uuid,
        client_token: Uuid,
        _author_id: Uuid,
        content: String,
        category: Category,
    ) -> Result<Item, SyncError> {
        let body = CreateItemRequest {
            client_token: Some(client_token),
            content,
            category,
        };
        self.json(
            self.request(Method::POST, &format!("/boards/{}/items", board_id))
                .json(&body),
        )
        .await
    }

    async fn update_item(
        &self,
        item_id: Uuid,
        _author_id: Uuid,
        content: String,
        category: Category,
    ) -> Result<Item, SyncError> {
        let body = UpdateItemRequest { content, category };
        self.json(
            self.request(Method::PATCH, &format!("/items/{}", item_id))
                .json(&body),
        )
        .await
    }

    async fn delete_item(&self, item_id: Uuid, _author_id: Uuid) -> Result<(), SyncError> {
        self.send(self.request(Method::DELETE, &format!("/items/{}", item_id)))
            .await
            .map(|_| ())
    }

    async fn like(&self, item_id: Uuid, _user_id: Uuid) -> Result<ReactionSummary, SyncError> {
        self.json(self.request(Method::PUT, &format!("/items/{}/reactions", item_id)))
            .await
    }

    async fn unlike(&self, item_id: Uuid, _user_id: Uuid) -> Result<ReactionSummary, SyncError> {
        self.json(self.request(Method::DELETE, &format!("/items/{}/reactions", item_id)))
            .await
    }

    async fn item_reactions(&self, item_id: Uuid, _user_id: Uuid) -> Result<ReactionSummary, SyncError> {
        self.json(self.request(Method::GET, &format!("/items/{}/reactions", item_id)))
            .await
    }

    async fn expire_board(&self, board_id: Uuid) -> Result<ExpireResponse, SyncError> {
        self.json(self.request(Method::POST, &format!("/boards/{}/expire", board_id)))
            .await
    }

    async fn end_board(&self, board_id: Uuid, _user_id: Uuid) -> Result<ExpireResponse, SyncError> {
        self.json(self.request(Method::POST, &format!("/boards/{}/end", board_id)))
            .await
    }
}
