//! Chat channels.

use serde_json::{Value, json};
use tracing::info;

use super::{User, chat_pager, id_of};
use crate::client::{ApiClient, Service};
use crate::pager::Pager;
use crate::proxy::{EntityKind, Proxy};
use crate::ApiError;

/// A group chat channel, identified by its channel URL.
#[derive(Debug, Clone)]
pub struct Channel {
    proxy: Proxy,
}

entity!(Channel);

impl Channel {
    pub fn new(client: &ApiClient, channel_url: impl Into<String>) -> Self {
        let url = channel_url.into();
        let path = format!("/group_channels/{}", url);
        Self {
            proxy: Proxy::new(client, EntityKind::Channel, url, &path),
        }
    }

    pub fn seeded(client: &ApiClient, channel_url: impl Into<String>, payload: Value) -> Self {
        let url = channel_url.into();
        let path = format!("/group_channels/{}", url);
        Self {
            proxy: Proxy::seeded(client, EntityKind::Channel, url, &path, payload),
        }
    }

    pub fn from_value(client: &ApiClient, value: Value) -> Option<Self> {
        let url = id_of(&value, &["channel_url"])?;
        Some(Self::seeded(client, url, value))
    }

    /// The channel URL (same as [`Channel::id`]).
    pub fn url(&self) -> &str {
        self.id()
    }

    pub async fn name(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("name").await
    }

    pub async fn member_count(&self) -> Result<u64, ApiError> {
        self.proxy.u64("member_count").await
    }

    pub async fn is_frozen(&self) -> Result<bool, ApiError> {
        self.proxy.bool("freeze").await
    }

    /// Application-defined channel type.
    pub async fn kind(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("custom_type").await
    }

    pub fn members(&self) -> Pager<User> {
        chat_pager(
            self.proxy.client(),
            format!("/group_channels/{}/members", self.id()),
            "members",
            User::from_chat,
        )
    }

    /// Invite users by id.
    pub async fn invite<I, S>(&self, user_ids: I) -> Result<&Self, ApiError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let user_ids: Vec<String> = user_ids.into_iter().map(Into::into).collect();
        let path = format!("/group_channels/{}/invite", self.id());
        let result = self
            .proxy
            .client()
            .post(Service::Chat, &path, json!({ "user_ids": user_ids }))
            .await;
        info!(channel = %self.id(), count = user_ids.len(), "invited users");
        self.proxy.apply_mutation(result, &[]).await?;
        Ok(self)
    }

    pub async fn join(&self) -> Result<&Self, ApiError> {
        self.membership("join").await
    }

    pub async fn leave(&self) -> Result<&Self, ApiError> {
        self.membership("leave").await
    }

    async fn membership(&self, action: &str) -> Result<&Self, ApiError> {
        let user_id = self
            .proxy
            .client()
            .user_id()
            .ok_or_else(|| ApiError::Auth("no user id configured".to_string()))?
            .to_string();
        let path = format!("/group_channels/{}/{}", self.id(), action);
        let result = self
            .proxy
            .client()
            .request(Service::Chat, reqwest::Method::PUT, &path)
            .json(json!({ "user_id": user_id }))
            .call()
            .await;
        self.proxy.apply_mutation(result, &[]).await?;
        Ok(self)
    }
}
