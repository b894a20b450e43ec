//! REST client and lazy object cache for the Hearth platform.
//!
//! This crate provides the pieces every higher layer builds on:
//!
//! ## Features
//!
//! - **HTTP**: a pluggable [`HttpTransport`] collaborator with a reqwest default
//! - **Credentials**: bearer tokens and the chat session key, opaque to the core
//! - **Pagination**: [`Pager`], a lazy pull-based sequence over cursor endpoints
//! - **Proxies**: [`Proxy`] caches an entity's fields and re-fetches on demand
//! - **Entities**: typed users, posts, comments, channels and messages

pub mod client;
pub mod credentials;
pub mod entities;
mod error;
pub mod http;
pub mod pager;
pub mod proxy;

pub use client::{ApiClient, ApiClientBuilder, ApiRequest, Endpoints, Service};
pub use client::{DEFAULT_API_BASE, DEFAULT_CHAT_API_BASE, DEFAULT_ROUTING_URL};
pub use credentials::{Anonymous, BearerToken, Credentials, SessionKey};
pub use entities::{Channel, Comment, Message, Post, User};
pub use error::ApiError;
pub use http::{HttpRequest, HttpResponse, HttpTransport, RequestBody, ReqwestTransport};
pub use pager::{CursorDirection, DEFAULT_PAGE_LIMIT, Page, PageCursor, PageFetch, Pager};
pub use proxy::{EntityKind, Freshness, Proxy};
