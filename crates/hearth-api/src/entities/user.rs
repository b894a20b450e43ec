//! Platform users.

use reqwest::Method;
use serde_json::{Map, Value};

use super::{ALREADY_BLOCKED, ALREADY_SUBSCRIBED, Post, id_of, nested_count, platform_pager};
use crate::client::{ApiClient, Service};
use crate::pager::Pager;
use crate::proxy::{EntityKind, Proxy};
use crate::ApiError;

/// A platform account.
#[derive(Debug, Clone)]
pub struct User {
    proxy: Proxy,
}

entity!(User);

impl User {
    pub fn new(client: &ApiClient, id: impl Into<String>) -> Self {
        let id = id.into();
        let path = format!("/users/{}", id);
        Self {
            proxy: Proxy::new(client, EntityKind::User, id, &path),
        }
    }

    pub fn seeded(client: &ApiClient, id: impl Into<String>, payload: Value) -> Self {
        let id = id.into();
        let path = format!("/users/{}", id);
        Self {
            proxy: Proxy::seeded(client, EntityKind::User, id, &path, payload),
        }
    }

    /// Build from a list item or embedded user object.
    pub fn from_value(client: &ApiClient, value: Value) -> Option<Self> {
        let id = id_of(&value, &["id", "user_id", "guest_id"])?;
        Some(Self::seeded(client, id, value))
    }

    /// Build from a chat provider user object (`user_id`/`guest_id`, `nickname`),
    /// mapping its fields onto platform names.
    pub fn from_chat(client: &ApiClient, value: Value) -> Option<Self> {
        match value {
            Value::Object(user) => Self::from_value(client, Value::Object(platform_fields(user))),
            _ => None,
        }
    }

    /// Look a user up by nick. `None` if no such user exists.
    pub async fn by_nick(client: &ApiClient, nick: &str) -> Result<Option<Self>, ApiError> {
        let path = format!("/users/by_nick/{}", nick);
        match client.get(Service::Api, &path).await {
            Ok(body) => {
                let data = body.get("data").cloned().unwrap_or(body);
                Ok(Self::from_value(client, data))
            }
            Err(ApiError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The authenticated account.
    pub async fn me(client: &ApiClient) -> Result<Self, ApiError> {
        let body = client.get(Service::Api, "/account").await?;
        let data = body.get("data").cloned().unwrap_or(body);
        Self::from_value(client, data)
            .ok_or_else(|| ApiError::InvalidResponse("account without id".to_string()))
    }

    pub async fn nick(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("nick").await
    }

    pub async fn about(&self) -> Result<Option<String>, ApiError> {
        self.proxy.string("about").await
    }

    pub async fn is_blocked(&self) -> Result<bool, ApiError> {
        self.proxy.bool("is_blocked").await
    }

    /// Whether the authenticated account subscribes to this user.
    pub async fn is_subscribed(&self) -> Result<bool, ApiError> {
        self.proxy.bool("is_in_subscriptions").await
    }

    pub async fn is_verified(&self) -> Result<bool, ApiError> {
        self.proxy.bool("is_verified").await
    }

    pub async fn is_private(&self) -> Result<bool, ApiError> {
        self.proxy.bool("is_private").await
    }

    pub async fn subscriber_count(&self) -> Result<u64, ApiError> {
        nested_count(&self.proxy, "num", "subscribers").await
    }

    pub async fn post_count(&self) -> Result<u64, ApiError> {
        nested_count(&self.proxy, "num", "total_posts").await
    }

    /// Posts by this user, newest first.
    pub fn timeline(&self) -> Pager<Post> {
        platform_pager(
            self.proxy.client(),
            format!("/timelines/users/{}", self.id()),
            "content",
            Post::from_value,
        )
    }

    pub fn subscribers(&self) -> Pager<User> {
        platform_pager(
            self.proxy.client(),
            format!("/users/{}/subscribers", self.id()),
            "users",
            User::from_value,
        )
    }

    pub fn subscriptions(&self) -> Pager<User> {
        platform_pager(
            self.proxy.client(),
            format!("/users/{}/subscriptions", self.id()),
            "users",
            User::from_value,
        )
    }

    /// Block this user. Blocking an already-blocked user is not an error.
    pub async fn block(&self) -> Result<&Self, ApiError> {
        self.set_blocked(Method::PUT).await
    }

    /// Unblock this user. Unblocking a user that is not blocked is not an error.
    pub async fn unblock(&self) -> Result<&Self, ApiError> {
        self.set_blocked(Method::DELETE).await
    }

    async fn set_blocked(&self, method: Method) -> Result<&Self, ApiError> {
        let path = format!("/users/my/blocked/{}", self.id());
        let result = self
            .proxy
            .client()
            .request(Service::Api, method, &path)
            .query("type", "user")
            .call()
            .await;
        self.proxy.apply_mutation(result, ALREADY_BLOCKED).await?;
        Ok(self)
    }

    pub async fn subscribe(&self) -> Result<&Self, ApiError> {
        self.set_subscribed(Method::PUT).await
    }

    pub async fn unsubscribe(&self) -> Result<&Self, ApiError> {
        self.set_subscribed(Method::DELETE).await
    }

    async fn set_subscribed(&self, method: Method) -> Result<&Self, ApiError> {
        let path = format!("/users/{}/subscribers", self.id());
        let result = self
            .proxy
            .client()
            .request(Service::Api, method, &path)
            .call()
            .await;
        self.proxy.apply_mutation(result, ALREADY_SUBSCRIBED).await?;
        Ok(self)
    }
}

fn platform_fields(mut user: Map<String, Value>) -> Map<String, Value> {
    if let Some(nickname) = user.remove("nickname") {
        user.entry("nick").or_insert(nickname);
    }
    if let Some(id) = user.get("guest_id").or_else(|| user.get("user_id")).cloned() {
        user.entry("id").or_insert(id);
    }
    user
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Endpoints;
    use crate::proxy::Freshness;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::builder()
            .endpoints(Endpoints::single_host(server.uri()))
            .user_id("me")
            .build()
    }

    #[tokio::test]
    async fn test_block_twice_is_idempotent() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/users/my/blocked/u1"))
            .and(query_param("type", "user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 200})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/users/my/blocked/u1"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "already_blocked"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "u1", "nick": "bob", "is_blocked": true}
            })))
            .mount(&server)
            .await;

        let user = User::new(&client_for(&server), "u1");

        user.block().await.unwrap();
        assert_eq!(user.proxy().freshness().await, Freshness::Stale);
        assert!(user.is_blocked().await.unwrap());

        user.block().await.unwrap();
        assert!(user.is_blocked().await.unwrap());
    }

    #[tokio::test]
    async fn test_unblock_not_blocked_is_ok() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/users/my/blocked/u1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "not_blocked"})))
            .mount(&server)
            .await;

        let user = User::new(&client_for(&server), "u1");
        assert!(user.unblock().await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_forbidden_is_treated_as_applied() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/users/u1/subscribers"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "already_subscribed"})))
            .mount(&server)
            .await;

        let user = User::seeded(&client_for(&server), "u1", json!({"nick": "bob"}));
        user.subscribe().await.unwrap();
        assert_eq!(user.proxy().freshness().await, Freshness::Stale);
    }

    #[tokio::test]
    async fn test_subscribe_hard_error_propagates() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/users/u1/subscribers"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let user = User::new(&client_for(&server), "u1");
        assert!(matches!(
            user.subscribe().await,
            Err(ApiError::UnexpectedStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_timeline_items_are_seeded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/timelines/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"content": {
                    "items": [
                        {"id": "p1", "title": "first"},
                        {"id": "p2", "title": "second"}
                    ],
                    "paging": {"cursors": {"next": null}, "hasNext": false}
                }}
            })))
            .expect(1)
            .mount(&server)
            .await;
        // Seeded posts must not be re-fetched for list-derived fields.
        Mock::given(method("GET"))
            .and(path("/api/content/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(0)
            .mount(&server)
            .await;

        let user = User::new(&client_for(&server), "u1");
        let posts = user.timeline().collect_all().await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id(), "p1");
        assert_eq!(posts[0].title().await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_subscribers_follow_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/users/u1/subscribers"))
            .and(query_param("next", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"users": {
                    "items": [{"id": "s2", "nick": "two"}],
                    "paging": {"cursors": {}, "hasNext": false}
                }}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/users/u1/subscribers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"users": {
                    "items": [{"id": "s1", "nick": "one"}],
                    "paging": {"cursors": {"next": "c1"}, "hasNext": true}
                }}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let user = User::new(&client_for(&server), "u1");
        let mut pager = user.subscribers().with_limit(1);
        let ids: Vec<String> = pager
            .take_n(10)
            .await
            .unwrap()
            .iter()
            .map(|u| u.id().to_string())
            .collect();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(pager.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_by_nick_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/users/by_nick/nobody"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let found = User::by_nick(&client_for(&server), "nobody").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_from_chat_maps_nickname() {
        let client = ApiClient::builder().build();
        let user = User::from_chat(&client, json!({"user_id": "u7", "nickname": "fay"})).unwrap();
        assert_eq!(user.id(), "u7");
        assert_eq!(user.nick().await.unwrap().as_deref(), Some("fay"));
        assert!(User::from_chat(&client, json!("u7")).is_none());
    }

    #[tokio::test]
    async fn test_subscriber_count_nested() {
        let client = ApiClient::builder().build();
        let user = User::seeded(&client, "u1", json!({"num": {"subscribers": 7}}));
        assert_eq!(user.subscriber_count().await.unwrap(), 7);
    }
}
