//! REST client shared by every proxy.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::credentials::{Anonymous, Credentials, SessionKey};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody};
use crate::ApiError;

/// Default platform API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.hearth.social/v4";

/// Default chat provider REST base URL.
pub const DEFAULT_CHAT_API_BASE: &str = "https://chat.hearth.social/v3";

/// Default routing endpoint; answers with the websocket host to use.
pub const DEFAULT_ROUTING_URL: &str = "https://chat.hearth.social/routing";

/// Which backend a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// The platform's own REST API (users, posts, comments).
    Api,
    /// The chat provider's REST API (channels, messages).
    Chat,
}

/// Base URLs for each backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: String,
    pub chat_api_base: String,
    pub routing_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            chat_api_base: DEFAULT_CHAT_API_BASE.to_string(),
            routing_url: DEFAULT_ROUTING_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every backend at one host (used by tests against a mock server).
    pub fn single_host(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('/').to_string();
        Self {
            api_base: format!("{}/api", base),
            chat_api_base: format!("{}/chat", base),
            routing_url: format!("{}/routing", base),
        }
    }

    fn base(&self, service: Service) -> &str {
        match service {
            Service::Api => &self.api_base,
            Service::Chat => &self.chat_api_base,
        }
    }
}

struct Inner {
    http: Arc<dyn HttpTransport>,
    endpoints: Endpoints,
    credentials: Arc<dyn Credentials>,
    chat_credentials: Arc<dyn Credentials>,
    session: Option<SessionKey>,
    user_id: Option<String>,
}

/// Client for the platform and chat REST APIs.
///
/// Cheap to clone; every entity holds its own clone. There is no process-wide
/// default instance, so entities are always constructed with an explicit client.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoints", &self.inner.endpoints)
            .field("user_id", &self.inner.user_id)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    http: Option<Arc<dyn HttpTransport>>,
    endpoints: Endpoints,
    credentials: Arc<dyn Credentials>,
    chat_credentials: Arc<dyn Credentials>,
    session: Option<SessionKey>,
    user_id: Option<String>,
}

impl ApiClientBuilder {
    /// Use a custom HTTP collaborator.
    pub fn transport(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Credentials for [`Service::Api`] calls.
    pub fn credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Credentials for [`Service::Chat`] calls.
    pub fn chat_credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.chat_credentials = credentials;
        self
    }

    /// Authenticate chat calls with a session key learned from the socket.
    ///
    /// Replaces any [`ApiClientBuilder::chat_credentials`]. A chat client
    /// built on this `ApiClient` picks the same key up by default.
    pub fn session_key(mut self, session: SessionKey) -> Self {
        self.chat_credentials = Arc::new(session.clone());
        self.session = Some(session);
        self
    }

    /// Id of the authenticated account.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn build(self) -> ApiClient {
        ApiClient {
            inner: Arc::new(Inner {
                http: self
                    .http
                    .unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
                endpoints: self.endpoints,
                credentials: self.credentials,
                chat_credentials: self.chat_credentials,
                session: self.session,
                user_id: self.user_id,
            }),
        }
    }
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder {
            http: None,
            endpoints: Endpoints::default(),
            credentials: Arc::new(Anonymous),
            chat_credentials: Arc::new(Anonymous),
            session: None,
            user_id: None,
        }
    }

    /// Id of the authenticated account, if configured.
    pub fn user_id(&self) -> Option<&str> {
        self.inner.user_id.as_deref()
    }

    /// Session key behind the chat credentials, if one was configured.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.inner.session.as_ref()
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    /// The underlying HTTP collaborator.
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.inner.http)
    }

    /// Resolve a path against a backend's base URL. Absolute URLs pass through.
    pub fn absolute_url(&self, service: Service, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.inner.endpoints.base(service).trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Start building a request against a backend.
    pub fn request(&self, service: Service, method: Method, path: &str) -> ApiRequest<'_> {
        ApiRequest {
            client: self,
            service,
            request: HttpRequest::new(method, self.absolute_url(service, path)),
        }
    }

    pub async fn get(&self, service: Service, path: &str) -> Result<Value, ApiError> {
        self.request(service, Method::GET, path).call().await
    }

    /// POST a JSON body.
    pub async fn post(&self, service: Service, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(service, Method::POST, path).json(body).call().await
    }

    pub async fn put(&self, service: Service, path: &str) -> Result<Value, ApiError> {
        self.request(service, Method::PUT, path).call().await
    }

    /// PATCH a JSON body.
    pub async fn patch(&self, service: Service, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(service, Method::PATCH, path).json(body).call().await
    }

    pub async fn delete(&self, service: Service, path: &str) -> Result<Value, ApiError> {
        self.request(service, Method::DELETE, path).call().await
    }

    /// Perform a request and return the raw status and body without mapping
    /// non-2xx statuses onto errors.
    pub async fn raw(&self, service: Service, method: Method, path: &str) -> Result<HttpResponse, ApiError> {
        self.request(service, method, path).send().await
    }

    async fn credentials_for(&self, service: Service) -> std::collections::HashMap<String, String> {
        match service {
            Service::Api => self.inner.credentials.headers().await,
            Service::Chat => self.inner.chat_credentials.headers().await,
        }
    }
}

/// A request being assembled against one backend.
pub struct ApiRequest<'a> {
    client: &'a ApiClient,
    service: Service,
    request: HttpRequest,
}

impl ApiRequest<'_> {
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request = self.request.query(key, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.request = self.request.body(RequestBody::Json(body));
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.request = self.request.body(RequestBody::Form(fields));
        self
    }

    /// Perform the exchange and return the raw status and body.
    pub async fn send(self) -> Result<HttpResponse, ApiError> {
        let headers = self.client.credentials_for(self.service).await;
        let request = self.request.headers(headers);
        debug!(method = %request.method, url = %request.url, "api request");
        self.client.inner.http.request(request).await
    }

    /// Perform the exchange and map non-2xx statuses onto [`ApiError`].
    pub async fn call(self) -> Result<Value, ApiError> {
        let url = self.request.url.clone();
        let response = self.send().await?;
        check_status(&url, response)
    }
}

/// Map a response onto the error taxonomy.
pub fn check_status(url: &str, response: HttpResponse) -> Result<Value, ApiError> {
    if response.is_success() {
        return Ok(response.body);
    }

    let error = response
        .body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = response
        .body
        .get("error_description")
        .or_else(|| response.body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match response.status {
        403 => Err(ApiError::Forbidden {
            url: url.to_string(),
            error,
        }),
        404 => Err(ApiError::NotFound {
            url: url.to_string(),
        }),
        429 => {
            let retry_after_secs = response.body.get("retry_after").and_then(Value::as_u64);
            warn!(url = %url, retry_after_secs = ?retry_after_secs, "rate limited");
            Err(ApiError::RateLimited {
                endpoint: Some(url.to_string()),
                retry_after_secs,
            })
        }
        status => Err(ApiError::UnexpectedStatus {
            status,
            error,
            message,
        }),
    }
}
