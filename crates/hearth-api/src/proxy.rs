//! Lazy remote-object proxies.
//!
//! A [`Proxy`] stands in for one server-side entity. It keeps the last-known
//! fields locally and re-fetches them from the entity's canonical URL when a
//! read cannot be answered from the cache.
//!
//! Freshness is a small state machine:
//!
//! ```text
//! bare ───────────────> Uninitialized ──┐
//! seeded ─────────────> Fresh           │ read
//! Fresh ──miss/falsy──> Stale ──────────┤
//! any ───mark_stale───> Stale           v
//!                          refresh: 2xx -> Fresh
//!                                   403 -> AccessDenied
//!                                   404 -> Deleted
//! ```
//!
//! `AccessDenied` and `Deleted` are settled: reads answer from the cache (or the
//! caller's default) until the proxy is marked stale or refreshed explicitly.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::client::{ApiClient, Service, check_status};
use crate::ApiError;

/// Kinds of remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Post,
    Comment,
    Channel,
    Message,
}

impl EntityKind {
    /// Backend that owns this kind of entity.
    pub fn service(self) -> Service {
        match self {
            EntityKind::User | EntityKind::Post | EntityKind::Comment => Service::Api,
            EntityKind::Channel | EntityKind::Message => Service::Chat,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
            EntityKind::Channel => "channel",
            EntityKind::Message => "message",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far the local cache can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Never fetched nor seeded.
    Uninitialized,
    /// Fields reflect the last fetch or seed.
    Fresh,
    /// Must re-fetch before the next read is answered.
    Stale,
    /// The server refused access (403); cache holds no fields.
    AccessDenied,
    /// The entity no longer exists (404); cache holds `is_deleted: true`.
    Deleted,
}

impl Freshness {
    /// Whether a read in this state goes to the network before answering.
    fn needs_fetch(self) -> bool {
        matches!(self, Freshness::Uninitialized | Freshness::Stale)
    }

    /// Whether misses in this state are answered without a fetch.
    fn is_settled(self) -> bool {
        matches!(self, Freshness::AccessDenied | Freshness::Deleted)
    }
}

/// Whether a cached value counts as a miss.
///
/// Present-but-empty values (`null`, `false`, `0`, `""`, `[]`, `{}`) are
/// treated like absent ones and force a refresh.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[derive(Debug)]
struct CacheState {
    fields: Map<String, Value>,
    freshness: Freshness,
}

/// Client-side proxy for one server entity.
///
/// Equality and hashing use `(kind, id)` only. Independently constructed
/// proxies for the same entity keep independent caches; clones of one proxy
/// share theirs.
#[derive(Clone)]
pub struct Proxy {
    id: String,
    kind: EntityKind,
    source_url: String,
    client: ApiClient,
    cache: Arc<Mutex<CacheState>>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("source_url", &self.source_url)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for Proxy {}

impl Hash for Proxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl Proxy {
    /// A bare proxy; the first read fetches.
    pub fn new(
        client: &ApiClient,
        kind: EntityKind,
        id: impl Into<String>,
        source_path: &str,
    ) -> Self {
        Self::with_state(client, kind, id.into(), source_path, Map::new(), Freshness::Uninitialized)
    }

    /// A proxy pre-populated from a list item or event payload.
    ///
    /// Non-object payloads are ignored and the proxy starts bare.
    pub fn seeded(
        client: &ApiClient,
        kind: EntityKind,
        id: impl Into<String>,
        source_path: &str,
        payload: Value,
    ) -> Self {
        match payload {
            Value::Object(fields) => {
                Self::with_state(client, kind, id.into(), source_path, fields, Freshness::Fresh)
            }
            _ => Self::new(client, kind, id, source_path),
        }
    }

    fn with_state(
        client: &ApiClient,
        kind: EntityKind,
        id: String,
        source_path: &str,
        fields: Map<String, Value>,
        freshness: Freshness,
    ) -> Self {
        Self {
            id,
            kind,
            source_url: client.absolute_url(kind.service(), source_path),
            client: client.clone(),
            cache: Arc::new(Mutex::new(CacheState { fields, freshness })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Canonical GET endpoint for this entity.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub async fn freshness(&self) -> Freshness {
        self.cache.lock().await.freshness
    }

    /// Read a field, refreshing first if the cache cannot answer.
    ///
    /// Returns `default` when the field is still absent after the refresh.
    pub async fn field(&self, name: &str, default: Value) -> Result<Value, ApiError> {
        let mut cache = self.cache.lock().await;

        if cache.freshness == Freshness::Fresh {
            if let Some(value) = cache.fields.get(name).filter(|v| !is_falsy(v)) {
                return Ok(value.clone());
            }
            trace!(kind = %self.kind, id = %self.id, field = %name, "cache miss");
            cache.freshness = Freshness::Stale;
        } else if cache.freshness.is_settled() {
            return Ok(cache.fields.get(name).cloned().unwrap_or(default));
        }

        if cache.freshness.needs_fetch() {
            self.refresh_locked(&mut cache).await?;
        }

        Ok(cache.fields.get(name).cloned().unwrap_or(default))
    }

    /// Read a field as `Option`, mapping `null`/absent to `None`.
    pub async fn get_field(&self, name: &str) -> Result<Option<Value>, ApiError> {
        let value = self.field(name, Value::Null).await?;
        Ok((!value.is_null()).then_some(value))
    }

    /// Read a field and deserialize it.
    pub async fn field_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ApiError> {
        match self.get_field(name).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn string(&self, name: &str) -> Result<Option<String>, ApiError> {
        Ok(self
            .get_field(name)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn bool(&self, name: &str) -> Result<bool, ApiError> {
        Ok(self
            .field(name, Value::Bool(false))
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    pub async fn u64(&self, name: &str) -> Result<u64, ApiError> {
        Ok(self.field(name, Value::from(0)).await?.as_u64().unwrap_or(0))
    }

    /// Read a cached field without any network call.
    pub async fn cached(&self, name: &str) -> Option<Value> {
        self.cache.lock().await.fields.get(name).cloned()
    }

    /// Copy of every cached field.
    pub async fn snapshot(&self) -> Map<String, Value> {
        self.cache.lock().await.fields.clone()
    }

    /// Require a re-fetch before the next read is answered.
    pub async fn mark_stale(&self) -> &Self {
        self.cache.lock().await.freshness = Freshness::Stale;
        self
    }

    /// Merge a payload into the cache and mark it fresh.
    pub async fn seed(&self, payload: Value) {
        if let Value::Object(fields) = payload {
            let mut cache = self.cache.lock().await;
            cache.fields.extend(fields);
            cache.freshness = Freshness::Fresh;
        }
    }

    /// Re-fetch unconditionally.
    ///
    /// 403 and 404 are not errors: they move the proxy to `AccessDenied` and
    /// `Deleted`. Other non-2xx statuses are returned and leave the state as is.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let mut cache = self.cache.lock().await;
        self.refresh_locked(&mut cache).await
    }

    /// Whether the last fetch found the entity gone. Fetches only if the
    /// cache has never been filled or is stale.
    pub async fn is_deleted(&self) -> Result<bool, ApiError> {
        let mut cache = self.cache.lock().await;
        if cache.freshness.needs_fetch() {
            self.refresh_locked(&mut cache).await?;
        }
        Ok(cache
            .fields
            .get("is_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn refresh_locked(&self, cache: &mut CacheState) -> Result<(), ApiError> {
        debug!(kind = %self.kind, id = %self.id, url = %self.source_url, "refreshing");

        let response = self
            .client
            .request(self.kind.service(), Method::GET, &self.source_url)
            .send()
            .await?;

        match response.status {
            200..=299 => {
                let payload = match response.body {
                    Value::Object(mut body) => match body.remove("data") {
                        Some(Value::Object(data)) => data,
                        Some(other) => {
                            body.insert("data".to_string(), other);
                            body
                        }
                        None => body,
                    },
                    other => {
                        return Err(ApiError::InvalidResponse(format!(
                            "{} {}: expected an object, got {}",
                            self.kind, self.id, other
                        )));
                    }
                };
                // A live answer overrides an earlier 404 marker.
                cache.fields.remove("is_deleted");
                cache.fields.extend(payload);
                cache.freshness = Freshness::Fresh;
                Ok(())
            }
            403 => {
                debug!(kind = %self.kind, id = %self.id, "access denied");
                cache.fields.clear();
                cache.freshness = Freshness::AccessDenied;
                Ok(())
            }
            404 => {
                debug!(kind = %self.kind, id = %self.id, "entity deleted");
                cache.fields.clear();
                cache
                    .fields
                    .insert("is_deleted".to_string(), Value::Bool(true));
                cache.freshness = Freshness::Deleted;
                Ok(())
            }
            _ => check_status(&self.source_url, response).map(|_| ()),
        }
    }

    /// Interpret the result of a mutating call.
    ///
    /// Success, a 403, or any of `already_applied` error codes count as applied;
    /// in every such case the proxy is marked stale so the next read reflects
    /// server state.
    pub async fn apply_mutation(
        &self,
        result: Result<Value, ApiError>,
        already_applied: &[&str],
    ) -> Result<Value, ApiError> {
        let outcome = match result {
            Ok(body) => Ok(body),
            Err(ApiError::Forbidden { error, .. }) => {
                debug!(kind = %self.kind, id = %self.id, error = ?error, "mutation forbidden, treating as applied");
                Ok(Value::Null)
            }
            Err(e) if e.error_code().is_some_and(|code| already_applied.contains(&code)) => {
                debug!(kind = %self.kind, id = %self.id, error = %e, "mutation already applied");
                Ok(Value::Null)
            }
            Err(e) => return Err(e),
        };
        self.mark_stale().await;
        outcome
    }
}
