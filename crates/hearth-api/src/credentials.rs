//! Credential collaborators.
//!
//! The core never looks inside credentials; it only merges the headers they
//! produce into each request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Supplies authentication headers for outgoing requests.
#[async_trait]
pub trait Credentials: Send + Sync {
    async fn headers(&self) -> HashMap<String, String>;
}

/// No authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl Credentials for Anonymous {
    async fn headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Static bearer token for the platform API.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl Credentials for BearerToken {
    async fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.token),
        );
        headers
    }
}

/// Chat session key, shared between the socket (which learns it from the
/// connection-ack frame) and the chat REST calls that need it.
#[derive(Debug, Clone, Default)]
pub struct SessionKey {
    key: Arc<RwLock<Option<String>>>,
}

impl SessionKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current key.
    pub async fn set(&self, key: impl Into<String>) {
        *self.key.write().await = Some(key.into());
    }

    /// Forget the current key (e.g. on disconnect).
    pub async fn clear(&self) {
        *self.key.write().await = None;
    }

    pub async fn get(&self) -> Option<String> {
        self.key.read().await.clone()
    }
}

#[async_trait]
impl Credentials for SessionKey {
    async fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(key) = self.key.read().await.as_ref() {
            headers.insert("Session-Key".to_string(), key.clone());
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bearer_headers() {
        let creds = BearerToken::new("abc");
        let headers = creds.headers().await;
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
    }

    #[test]
    fn test_bearer_debug_redacts_token() {
        let creds = BearerToken::new("super-secret");
        assert!(!format!("{:?}", creds).contains("super-secret"));
    }

    #[tokio::test]
    async fn test_session_key_shared_between_clones() {
        let key = SessionKey::new();
        let clone = key.clone();
        assert!(clone.headers().await.is_empty());

        key.set("sess-1").await;
        assert_eq!(
            clone.headers().await.get("Session-Key").map(String::as_str),
            Some("sess-1")
        );

        clone.clear().await;
        assert_eq!(key.get().await, None);
    }
}
