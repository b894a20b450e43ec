//! Comments on posts.

use reqwest::Method;
use serde_json::Value;

use super::{ALREADY_SMILED, Post, User, id_of, platform_pager};
use crate::client::{ApiClient, Service};
use crate::pager::Pager;
use crate::proxy::{EntityKind, Proxy};
use crate::ApiError;

/// A comment, addressed through the post it belongs to.
#[derive(Debug, Clone)]
pub struct Comment {
    proxy: Proxy,
    post_id: String,
}

entity!(Comment);

impl Comment {
    pub fn new(client: &ApiClient, post_id: impl Into<String>, id: impl Into<String>) -> Self {
        let (post_id, id) = (post_id.into(), id.into());
        let path = format!("/content/{}/comments/{}", post_id, id);
        Self {
            proxy: Proxy::new(client, EntityKind::Comment, id, &path),
            post_id,
        }
    }

    pub fn seeded(
        client: &ApiClient,
        post_id: impl Into<String>,
        id: impl Into<String>,
        payload: Value,
    ) -> Self {
        let (post_id, id) = (post_id.into(), id.into());
        let path = format!("/content/{}/comments/{}", post_id, id);
        Self {
            proxy: Proxy::seeded(client, EntityKind::Comment, id, &path, payload),
            post_id,
        }
    }

    pub fn from_value(client: &ApiClient, post_id: &str, value: Value) -> Option<Self> {
        let id = id_of(&value, &["id"])?;
        Some(Self::seeded(client, post_id, id, value))
    }

    pub async fn text(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("text").await
    }

    pub async fn is_smiled(&self) -> Result<bool, ApiError> {
        self.proxy.bool("is_smiled").await
    }

    pub async fn smile_count(&self) -> Result<u64, ApiError> {
        self.proxy.u64("num_smiles").await
    }

    pub async fn author(&self) -> Result<Option<User>, ApiError> {
        let user = self.proxy.field("user", Value::Null).await?;
        Ok(User::from_value(self.proxy.client(), user))
    }

    /// The post this comment belongs to (bare; fetched on first read).
    pub fn post(&self) -> Post {
        Post::new(self.proxy.client(), self.post_id.clone())
    }

    pub fn replies(&self) -> Pager<Comment> {
        let post_id = self.post_id.clone();
        platform_pager(
            self.proxy.client(),
            format!("/content/{}/comments/{}/replies", self.post_id, self.id()),
            "replies",
            move |client, value| Comment::from_value(client, &post_id, value),
        )
    }

    pub async fn smile(&self) -> Result<&Self, ApiError> {
        self.set_smiled(Method::PUT).await
    }

    pub async fn unsmile(&self) -> Result<&Self, ApiError> {
        self.set_smiled(Method::DELETE).await
    }

    async fn set_smiled(&self, method: Method) -> Result<&Self, ApiError> {
        let path = format!("/content/{}/comments/{}/smiles", self.post_id, self.id());
        let result = self
            .proxy
            .client()
            .request(Service::Api, method, &path)
            .call()
            .await;
        self.proxy.apply_mutation(result, ALREADY_SMILED).await?;
        Ok(self)
    }

    /// Reply to this comment. The reply lands on the same post.
    pub async fn reply(&self, text: &str) -> Result<Comment, ApiError> {
        let path = format!("/content/{}/comments/{}/replies", self.post_id, self.id());
        let body = self
            .proxy
            .client()
            .request(Service::Api, Method::POST, &path)
            .form([("text", text)])
            .call()
            .await?;
        self.proxy.mark_stale().await;

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let reply = data.get("comment").cloned().unwrap_or_else(|| data.clone());
        let id = id_of(&reply, &["id"])
            .or_else(|| id_of(&data, &["id"]))
            .ok_or_else(|| ApiError::InvalidResponse("reply response without id".to_string()))?;
        Ok(Comment::seeded(self.proxy.client(), self.post_id.clone(), id, reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Endpoints;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::builder()
            .endpoints(Endpoints::single_host(server.uri()))
            .build()
    }

    #[tokio::test]
    async fn test_bare_comment_fetches_from_post_path() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/content/p1/comments/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "c1", "text": "hi", "user": {"id": "u3", "nick": "dan"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let comment = Comment::new(&client_for(&server), "p1", "c1");
        assert_eq!(comment.text().await.unwrap().as_deref(), Some("hi"));
        let author = comment.author().await.unwrap().unwrap();
        assert_eq!(author.id(), "u3");
    }

    #[tokio::test]
    async fn test_reply_stays_on_post() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/content/p1/comments/c1/replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"comment": {"id": "c2", "text": "re"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let comment = Comment::seeded(&client_for(&server), "p1", "c1", json!({"text": "hi"}));
        let reply = comment.reply("re").await.unwrap();
        assert_eq!(reply.id(), "c2");
        assert_eq!(reply.post().id(), "p1");
    }

    #[tokio::test]
    async fn test_unsmile_not_smiled_is_ok() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/content/p1/comments/c1/smiles"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "not_smiled"})))
            .mount(&server)
            .await;

        let comment = Comment::new(&client_for(&server), "p1", "c1");
        assert!(comment.unsmile().await.is_ok());
    }
}
