//! Typed entities built on [`Proxy`](crate::proxy::Proxy).
//!
//! Every entity is a thin wrapper that fixes the kind and canonical URL of
//! its proxy and exposes typed accessors, paginated relations and mutations.

use std::sync::Arc;

use futures_util::FutureExt;
use reqwest::Method;
use serde_json::Value;

use crate::client::{ApiClient, Service};
use crate::pager::{Page, Pager};
use crate::proxy::Proxy;
use crate::ApiError;

/// Shared accessors, equality and hashing for entity wrappers.
macro_rules! entity {
    ($name:ident) => {
        impl $name {
            pub fn id(&self) -> &str {
                self.proxy.id()
            }

            /// The underlying cache proxy.
            pub fn proxy(&self) -> &$crate::proxy::Proxy {
                &self.proxy
            }

            /// Require a re-fetch before the next read.
            pub async fn mark_stale(&self) -> &Self {
                self.proxy.mark_stale().await;
                self
            }

            pub async fn refresh(&self) -> Result<&Self, $crate::ApiError> {
                self.proxy.refresh().await?;
                Ok(self)
            }

            pub async fn is_deleted(&self) -> Result<bool, $crate::ApiError> {
                self.proxy.is_deleted().await
            }

            /// Raw field access (see [`Proxy::field`](crate::proxy::Proxy::field)).
            pub async fn field(
                &self,
                name: &str,
                default: serde_json::Value,
            ) -> Result<serde_json::Value, $crate::ApiError> {
                self.proxy.field(name, default).await
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.proxy == other.proxy
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                std::hash::Hash::hash(&self.proxy, state);
            }
        }
    };
}

mod channel;
mod comment;
mod message;
mod post;
mod user;

pub use channel::Channel;
pub use comment::Comment;
pub use message::Message;
pub use post::Post;
pub use user::User;

/// Turns one list item into an entity; items without an id are skipped.
type Decode<T> = Arc<dyn Fn(&ApiClient, Value) -> Option<T> + Send + Sync>;

/// Error codes the platform uses to say a mutation was already applied.
pub(crate) const ALREADY_BLOCKED: &[&str] = &["already_blocked", "not_blocked"];
pub(crate) const ALREADY_SUBSCRIBED: &[&str] = &["already_subscribed", "not_subscribed"];
pub(crate) const ALREADY_SMILED: &[&str] = &["already_smiled", "not_smiled"];

/// Read an identifier that may be encoded as a string or a number.
pub(crate) fn id_of(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Read `outer.inner` as a count (e.g. `num.subscribers`).
pub(crate) async fn nested_count(proxy: &Proxy, outer: &str, inner: &str) -> Result<u64, ApiError> {
    Ok(proxy
        .field(outer, Value::Null)
        .await?
        .get(inner)
        .and_then(Value::as_u64)
        .unwrap_or(0))
}

/// Pager over a platform list endpoint (`data.<key>.items` + `paging.cursors`).
pub(crate) fn platform_pager<T, F>(client: &ApiClient, path: String, key: &'static str, decode: F) -> Pager<T>
where
    T: Send + 'static,
    F: Fn(&ApiClient, Value) -> Option<T> + Send + Sync + 'static,
{
    let client = client.clone();
    let decode: Decode<T> = Arc::new(decode);
    Pager::new(Box::new(move |limit, direction, cursor| {
        let client = client.clone();
        let path = path.clone();
        let decode = Arc::clone(&decode);
        async move {
            let mut request = client
                .request(Service::Api, Method::GET, &path)
                .query("limit", limit.to_string());
            if let Some(cursor) = cursor {
                request = request.query(direction.param(), cursor);
            }
            let body = request.call().await?;
            let page = Page::from_platform(&body, key)?;
            Ok::<_, ApiError>(decode_page(&client, page, &decode))
        }
        .boxed()
    }))
}

/// Pager over a chat list endpoint (`<key>: [..]` + `next` token).
pub(crate) fn chat_pager<T, F>(client: &ApiClient, path: String, key: &'static str, decode: F) -> Pager<T>
where
    T: Send + 'static,
    F: Fn(&ApiClient, Value) -> Option<T> + Send + Sync + 'static,
{
    let client = client.clone();
    let decode: Decode<T> = Arc::new(decode);
    Pager::new(Box::new(move |limit, _direction, cursor| {
        let client = client.clone();
        let path = path.clone();
        let decode = Arc::clone(&decode);
        async move {
            let mut request = client
                .request(Service::Chat, Method::GET, &path)
                .query("limit", limit.to_string());
            if let Some(token) = cursor {
                request = request.query("token", token);
            }
            let body = request.call().await?;
            let page = Page::from_chat(&body, key)?;
            Ok::<_, ApiError>(decode_page(&client, page, &decode))
        }
        .boxed()
    }))
}

fn decode_page<T>(client: &ApiClient, page: Page<Value>, decode: &Decode<T>) -> Page<T> {
    Page {
        items: page
            .items
            .into_iter()
            .filter_map(|item| decode(client, item))
            .collect(),
        cursor: page.cursor,
    }
}
