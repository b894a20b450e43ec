//! Posts ("content") and their relations.

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::{ALREADY_SMILED, Comment, User, id_of, nested_count, platform_pager};
use crate::client::{ApiClient, Service};
use crate::pager::Pager;
use crate::proxy::{EntityKind, Proxy};
use crate::ApiError;

/// A published post.
#[derive(Debug, Clone)]
pub struct Post {
    proxy: Proxy,
}

entity!(Post);

impl Post {
    pub fn new(client: &ApiClient, id: impl Into<String>) -> Self {
        let id = id.into();
        let path = format!("/content/{}", id);
        Self {
            proxy: Proxy::new(client, EntityKind::Post, id, &path),
        }
    }

    pub fn seeded(client: &ApiClient, id: impl Into<String>, payload: Value) -> Self {
        let id = id.into();
        let path = format!("/content/{}", id);
        Self {
            proxy: Proxy::seeded(client, EntityKind::Post, id, &path, payload),
        }
    }

    pub fn from_value(client: &ApiClient, value: Value) -> Option<Self> {
        let id = id_of(&value, &["id"])?;
        Some(Self::seeded(client, id, value))
    }

    pub async fn title(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("title").await
    }

    /// Caption text.
    pub async fn text(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("text").await
    }

    /// Media URL.
    pub async fn url(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("url").await
    }

    /// Content type (`pic`, `video_clip`, ...).
    pub async fn content_type(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("type").await
    }

    pub async fn is_smiled(&self) -> Result<bool, ApiError> {
        self.proxy.bool("is_smiled").await
    }

    pub async fn smile_count(&self) -> Result<u64, ApiError> {
        nested_count(&self.proxy, "num", "smiles").await
    }

    pub async fn comment_count(&self) -> Result<u64, ApiError> {
        nested_count(&self.proxy, "num", "comments").await
    }

    /// The post's author, seeded from the embedded `creator` object.
    pub async fn author(&self) -> Result<Option<User>, ApiError> {
        let creator = self.proxy.field("creator", Value::Null).await?;
        Ok(User::from_value(self.proxy.client(), creator))
    }

    pub fn comments(&self) -> Pager<Comment> {
        let post_id = self.id().to_string();
        platform_pager(
            self.proxy.client(),
            format!("/content/{}/comments", self.id()),
            "comments",
            move |client, value| Comment::from_value(client, &post_id, value),
        )
    }

    /// Users who smiled at this post.
    pub fn smiles(&self) -> Pager<User> {
        platform_pager(
            self.proxy.client(),
            format!("/content/{}/smiles", self.id()),
            "users",
            User::from_value,
        )
    }

    pub async fn smile(&self) -> Result<&Self, ApiError> {
        self.set_smiled(Method::PUT).await
    }

    pub async fn unsmile(&self) -> Result<&Self, ApiError> {
        self.set_smiled(Method::DELETE).await
    }

    async fn set_smiled(&self, method: Method) -> Result<&Self, ApiError> {
        let path = format!("/content/{}/smiles", self.id());
        let result = self
            .proxy
            .client()
            .request(Service::Api, method, &path)
            .call()
            .await;
        self.proxy.apply_mutation(result, ALREADY_SMILED).await?;
        Ok(self)
    }

    /// Comment on this post.
    pub async fn add_comment(&self, text: &str) -> Result<Comment, ApiError> {
        let path = format!("/content/{}/comments", self.id());
        let body = self
            .proxy
            .client()
            .request(Service::Api, Method::POST, &path)
            .form([("text", text)])
            .call()
            .await?;
        self.proxy.mark_stale().await;

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let comment = data.get("comment").cloned().unwrap_or_else(|| data.clone());
        let id = id_of(&comment, &["id"])
            .or_else(|| id_of(&data, &["id"]))
            .ok_or_else(|| ApiError::InvalidResponse("comment response without id".to_string()))?;

        debug!(post = %self.id(), comment = %id, "added comment");
        Ok(Comment::seeded(self.proxy.client(), self.id(), id, comment))
    }

    /// Delete this post. Deleting an already-deleted post is not an error.
    pub async fn delete(&self) -> Result<(), ApiError> {
        let path = format!("/content/{}", self.id());
        let result = self.proxy.client().delete(Service::Api, &path).await;
        let result = match result {
            Err(ApiError::NotFound { .. }) => Ok(Value::Null),
            other => other,
        };
        self.proxy.apply_mutation(result, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Endpoints;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::builder()
            .endpoints(Endpoints::single_host(server.uri()))
            .build()
    }

    #[tokio::test]
    async fn test_author_is_seeded_from_creator() {
        let client = ApiClient::builder().build();
        let post = Post::seeded(
            &client,
            "p1",
            json!({"id": "p1", "creator": {"id": "u9", "nick": "carol"}}),
        );
        let author = post.author().await.unwrap().unwrap();
        assert_eq!(author.id(), "u9");
        assert_eq!(author.nick().await.unwrap().as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_comments_carry_post_id() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/content/p1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"comments": {
                    "items": [{"id": "c1", "text": "nice"}],
                    "paging": {"cursors": {}}
                }}
            })))
            .mount(&server)
            .await;

        let post = Post::new(&client_for(&server), "p1");
        let comments = post.comments().collect_all().await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].post().id(), "p1");
        assert_eq!(comments[0].text().await.unwrap().as_deref(), Some("nice"));
    }

    #[tokio::test]
    async fn test_smile_already_smiled() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/content/p1/smiles"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "already_smiled"})))
            .mount(&server)
            .await;

        let post = Post::new(&client_for(&server), "p1");
        assert!(post.smile().await.is_ok());
    }

    #[tokio::test]
    async fn test_add_comment() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/content/p1/comments"))
            .and(body_string_contains("text=hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "c5", "comment": {"id": "c5", "text": "hello"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let post = Post::seeded(&client_for(&server), "p1", json!({"title": "t"}));
        let comment = post.add_comment("hello").await.unwrap();
        assert_eq!(comment.id(), "c5");
        assert_eq!(comment.text().await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_delete_missing_post_is_ok() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/content/p1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let post = Post::new(&client_for(&server), "p1");
        assert!(post.delete().await.is_ok());
    }
}
