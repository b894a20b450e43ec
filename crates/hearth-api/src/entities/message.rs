//! Chat messages.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::{Channel, User, id_of};
use crate::client::ApiClient;
use crate::proxy::{EntityKind, Proxy};
use crate::ApiError;

/// A message in a chat channel.
#[derive(Debug, Clone)]
pub struct Message {
    proxy: Proxy,
    channel_url: String,
}

entity!(Message);

impl Message {
    pub fn new(
        client: &ApiClient,
        channel_url: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        let (channel_url, id) = (channel_url.into(), message_id.into());
        let path = format!("/group_channels/{}/messages/{}", channel_url, id);
        Self {
            proxy: Proxy::new(client, EntityKind::Message, id, &path),
            channel_url,
        }
    }

    /// Build from a `MESG`/`FILE` frame payload or a message list item.
    pub fn from_payload(client: &ApiClient, payload: Value) -> Result<Self, ApiError> {
        let id = id_of(&payload, &["message_id", "msg_id"])
            .ok_or_else(|| ApiError::InvalidResponse("message without id".to_string()))?;
        let channel_url = id_of(&payload, &["channel_url"])
            .ok_or_else(|| ApiError::InvalidResponse("message without channel_url".to_string()))?;
        let path = format!("/group_channels/{}/messages/{}", channel_url, id);
        Ok(Self {
            proxy: Proxy::seeded(client, EntityKind::Message, id, &path, payload),
            channel_url,
        })
    }

    pub fn message_id(&self) -> &str {
        self.id()
    }

    pub fn channel_url(&self) -> &str {
        &self.channel_url
    }

    /// The channel this message was posted in (bare).
    pub fn channel(&self) -> Channel {
        Channel::new(self.proxy.client(), self.channel_url.clone())
    }

    pub async fn text(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("message").await
    }

    /// Download URL of a file message.
    pub async fn file_url(&self) -> Result<Option<String>, ApiError> {
        let file = self.proxy.field("file", Value::Null).await?;
        Ok(file
            .get("url")
            .and_then(Value::as_str)
            .or_else(|| file.as_str())
            .map(str::to_string))
    }

    pub async fn created_at(&self) -> Result<Option<DateTime<Utc>>, ApiError> {
        let ts = self.proxy.field("created_at", Value::Null).await?;
        Ok(ts.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Sender id, read straight from the cached payload without any fetch.
    pub async fn sender_id(&self) -> Option<String> {
        let user = self.proxy.cached("user").await?;
        id_of(&user, &["guest_id", "user_id"])
    }

    /// The sender, seeded from the embedded `user` object.
    pub async fn author(&self) -> Result<Option<User>, ApiError> {
        let user = self.proxy.field("user", Value::Null).await?;
        Ok(User::from_chat(self.proxy.client(), user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "msg_id": 991,
            "channel_url": "ch1",
            "message": "!help me",
            "created_at": 1_700_000_000_000_i64,
            "user": {"guest_id": "u5", "nickname": "eve"}
        })
    }

    #[tokio::test]
    async fn test_from_payload() {
        let client = ApiClient::builder().build();
        let message = Message::from_payload(&client, payload()).unwrap();

        assert_eq!(message.message_id(), "991");
        assert_eq!(message.channel_url(), "ch1");
        assert_eq!(message.channel().url(), "ch1");
        assert_eq!(message.text().await.unwrap().as_deref(), Some("!help me"));
        assert_eq!(message.sender_id().await.as_deref(), Some("u5"));
        assert_eq!(
            message.created_at().await.unwrap().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );

        let author = message.author().await.unwrap().unwrap();
        assert_eq!(author.id(), "u5");
        assert_eq!(author.nick().await.unwrap().as_deref(), Some("eve"));
    }

    #[test]
    fn test_from_payload_requires_channel() {
        let client = ApiClient::builder().build();
        let result = Message::from_payload(&client, json!({"msg_id": 1}));
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_file_url() {
        let client = ApiClient::builder().build();
        let message = Message::from_payload(
            &client,
            json!({"msg_id": 2, "channel_url": "ch1", "file": {"url": "https://cdn/x.png"}}),
        )
        .unwrap();
        assert_eq!(message.file_url().await.unwrap().as_deref(), Some("https://cdn/x.png"));
    }
}
