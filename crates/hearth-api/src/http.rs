//! HTTP collaborator.
//!
//! The rest of the crate only ever sees a status code and a JSON body, so
//! anything that can answer an [`HttpRequest`] with an [`HttpResponse`] can
//! stand in for the network (tests use in-memory fakes as well as wiremock).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::trace;

use crate::ApiError;

/// Request body variants accepted by the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/json` body.
    Json(Value),
    /// `application/x-www-form-urlencoded` body.
    Form(Vec<(String, String)>),
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    /// Build a request with no headers, query or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Merge headers into the request, replacing existing keys.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Attach a body.
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status code plus decoded body. Empty or non-JSON bodies decode to `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Anything that can perform an HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Create a transport with the default timeouts.
    pub fn new() -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self { http }
    }

    /// Wrap an existing client (custom proxies, TLS roots, timeouts).
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        trace!(method = %request.method, url = %request.url, "http request");

        let mut builder = self.http.request(request.method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Form(fields)) => builder.form(&fields),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reqwest_transport_sends_query_and_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/abc"))
            .and(query_param("limit", "5"))
            .and(header("Authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": "abc"}
            })))
            .mount(&mock_server)
            .await;

        let transport = ReqwestTransport::new();
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        let request = HttpRequest::new(Method::GET, format!("{}/users/abc", mock_server.uri()))
            .query("limit", "5")
            .headers(headers);

        let response = transport.request(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["data"]["id"], "abc");
    }

    #[tokio::test]
    async fn test_reqwest_transport_form_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/content/p1/comments"))
            .and(body_string_contains("text=hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"id": "c1"}})))
            .mount(&mock_server)
            .await;

        let transport = ReqwestTransport::new();
        let request = HttpRequest::new(
            Method::POST,
            format!("{}/content/p1/comments", mock_server.uri()),
        )
        .body(RequestBody::Form(vec![("text".to_string(), "hello".to_string())]));

        let response = transport.request(request).await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_empty_body_decodes_to_null() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/content/p1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let transport = ReqwestTransport::new();
        let request = HttpRequest::new(Method::DELETE, format!("{}/content/p1", mock_server.uri()));
        let response = transport.request(request).await.unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(response.body, Value::Null);
    }
}
