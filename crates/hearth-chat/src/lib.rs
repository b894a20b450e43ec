//! Real-time chat for Hearth bots.
//!
//! ## Features
//!
//! - **Framing**: the line protocol of opcode-tagged JSON frames ([`Frame`])
//! - **Transport**: websocket lifecycle, keepalive and optional reconnect
//! - **Dispatch**: frames become typed [`Event`]s delivered to [`Hooks`]
//! - **Commands**: prefix-matched commands with a replaceable default handler
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! use hearth_api::ApiClient;
//! use hearth_chat::{ChatClient, Context, HookError};
//!
//! let client = ChatClient::builder(ApiClient::builder().build(), "bot-id", "token")
//!     .prefixes(["!", "/"])
//!     .command("ping", |ctx: Context, _args| async move {
//!         ctx.send("pong")?;
//!         Ok::<(), HookError>(())
//!     })
//!     .build();
//! client.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod commands;
pub mod dispatcher;
mod error;
pub mod frame;
pub mod hooks;
pub mod transport;

pub use client::{ChatClient, ChatClientBuilder, ChatHandle};
pub use commands::{
    CommandHandler, CommandRouter, Commands, Context, ParsedCommand, PrefixSource, Prefixes,
    Resolution, parse_command,
};
pub use dispatcher::Dispatcher;
pub use error::{ChatError, FrameError, HookError};
pub use frame::{Frame, Opcode};
pub use hooks::{Event, EventKind, Hook, Hooks, Invitation};
pub use transport::{ConnectionState, FrameHandler, Transport, TransportConfig};
