//! Chat client: transport, dispatcher, hooks and commands wired together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hearth_api::{ApiClient, Channel, SessionKey};
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use crate::commands::{CommandRouter, Commands, Context, PrefixSource, Prefixes};
use crate::dispatcher::Dispatcher;
use crate::error::{ChatError, HookError};
use crate::frame::{Frame, Opcode};
use crate::hooks::{Event, EventKind, Hooks};
use crate::transport::{ConnectionState, Transport, TransportConfig};

/// Cheap handle for sending on the chat socket from hooks and commands.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    transport: Transport,
}

impl ChatHandle {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn api(&self) -> &ApiClient {
        self.transport.api()
    }

    pub fn user_id(&self) -> &str {
        self.transport.user_id()
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn channel(&self, channel_url: impl Into<String>) -> Channel {
        Channel::new(self.api(), channel_url)
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<(), ChatError> {
        self.transport.send(frame)
    }

    /// Post a text message. Returns the request id the frame was tagged with.
    pub fn send_message(&self, channel_url: &str, text: &str) -> Result<u64, ChatError> {
        let req_id = self.transport.next_request_id();
        self.send_frame(&Frame::new(
            Opcode::Message,
            json!({
                "channel_url": channel_url,
                "message": text,
                "data": "",
                "req_id": req_id.to_string(),
            }),
        ))?;
        Ok(req_id)
    }

    /// Send a read receipt for the channel.
    pub fn mark_read(&self, channel_url: &str) -> Result<(), ChatError> {
        let req_id = self.transport.next_request_id();
        self.send_frame(&Frame::new(
            Opcode::Read,
            json!({ "channel_url": channel_url, "req_id": req_id.to_string() }),
        ))
    }

    /// Start or end the typing indicator.
    pub fn typing(&self, channel_url: &str, typing: bool) -> Result<(), ChatError> {
        let opcode = if typing {
            Opcode::TypingStart
        } else {
            Opcode::TypingEnd
        };
        let req_id = self.transport.next_request_id();
        self.send_frame(&Frame::new(
            opcode,
            json!({
                "channel_url": channel_url,
                "time": chrono::Utc::now().timestamp_millis(),
                "req_id": req_id.to_string(),
            }),
        ))
    }
}

/// Builder for [`ChatClient`].
pub struct ChatClientBuilder {
    api: ApiClient,
    user_id: String,
    access_token: String,
    config: TransportConfig,
    prefixes: PrefixSource,
    session: SessionKey,
    hooks: Hooks,
    commands: Commands,
}

impl ChatClientBuilder {
    pub fn prefixes(mut self, prefixes: impl Into<Prefixes>) -> Self {
        self.prefixes = PrefixSource::Static(prefixes.into());
        self
    }

    /// Prefixes computed on every message.
    pub fn prefix_provider<F, P>(mut self, provider: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Into<Prefixes>,
    {
        self.prefixes = PrefixSource::dynamic(provider);
        self
    }

    pub fn on<F, Fut>(self, kind: EventKind, hook: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.hooks.on(kind, hook);
        self
    }

    pub fn command<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Context, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.commands.register(name, handler);
        self
    }

    pub fn default_command<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(Context, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.commands.set_default(handler);
        self
    }

    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Session key the connection ack is stored in.
    ///
    /// Defaults to the `ApiClient`'s own key (see
    /// `ApiClientBuilder::session_key`), so chat REST calls made from hooks
    /// are authenticated. Without one, a private key is used and those calls
    /// go out without `Session-Key`.
    pub fn session_key(mut self, session: SessionKey) -> Self {
        self.session = session;
        self
    }

    pub fn build(self) -> ChatClient {
        let transport = Transport::new(self.api, self.user_id, self.access_token, self.config);
        let handle = ChatHandle::new(transport);
        let router = CommandRouter::new(self.prefixes, self.commands);
        let dispatcher = Dispatcher::new(
            handle.clone(),
            self.session.clone(),
            self.hooks.clone(),
            router.clone(),
        );
        ChatClient {
            handle,
            session: self.session,
            hooks: self.hooks,
            router,
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// A bot's connection to chat.
#[derive(Debug, Clone)]
pub struct ChatClient {
    handle: ChatHandle,
    session: SessionKey,
    hooks: Hooks,
    router: CommandRouter,
    dispatcher: Arc<Dispatcher>,
}

impl ChatClient {
    /// Start building a client. The session key defaults to the one `api`
    /// authenticates chat calls with, when it has one.
    pub fn builder(
        api: ApiClient,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> ChatClientBuilder {
        let session = api.session_key().cloned().unwrap_or_default();
        ChatClientBuilder {
            api,
            user_id: user_id.into(),
            access_token: access_token.into(),
            config: TransportConfig::default(),
            prefixes: PrefixSource::default(),
            session,
            hooks: Hooks::new(),
            commands: Commands::new(),
        }
    }

    /// Connect. Returns once the socket is open; see [`ChatClient::wait_connected`].
    pub async fn start(&self) -> Result<(), ChatError> {
        info!(user_id = %self.handle.user_id(), "starting chat client");
        let dispatcher: Arc<Dispatcher> = Arc::clone(&self.dispatcher);
        self.handle.transport().start(dispatcher).await
    }

    pub async fn stop(&self) -> Result<(), ChatError> {
        self.handle.transport().stop().await
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.handle.transport().subscribe()
    }

    /// Wait for the connection ack. `false` on timeout.
    pub async fn wait_connected(&self, wait: Duration) -> bool {
        self.handle.transport().wait_connected(wait).await
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn commands(&self) -> &Commands {
        self.router.commands()
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn handle() -> ChatHandle {
        let api = ApiClient::builder().build();
        ChatHandle::new(Transport::new(api, "me", "t", TransportConfig::default()))
    }

    fn next_frame(message: Option<WsMessage>) -> Frame {
        match message {
            Some(WsMessage::Text(text)) => Frame::decode(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_outbound_frames() {
        let chat = handle();
        let mut rx = chat.transport().loopback(ConnectionState::Connected);

        let req_id = chat.send_message("ch1", "hello").unwrap();
        chat.mark_read("ch1").unwrap();
        chat.typing("ch1", true).unwrap();
        chat.typing("ch1", false).unwrap();

        let mesg = next_frame(rx.recv().await);
        assert_eq!(mesg.opcode, Opcode::Message);
        assert_eq!(mesg.str_field("message"), Some("hello"));
        assert_eq!(mesg.str_field("data"), Some(""));
        assert_eq!(mesg.str_field("req_id"), Some(req_id.to_string().as_str()));

        assert_eq!(next_frame(rx.recv().await).opcode, Opcode::Read);
        let start = next_frame(rx.recv().await);
        assert_eq!(start.opcode, Opcode::TypingStart);
        assert!(start.payload["time"].is_i64());
        assert_eq!(next_frame(rx.recv().await).opcode, Opcode::TypingEnd);
    }

    #[test]
    fn test_send_while_disconnected() {
        assert!(matches!(
            handle().send_message("ch1", "hi"),
            Err(ChatError::NotConnected)
        ));
    }

    #[test]
    fn test_builder_registers_hooks_and_commands() {
        let client = ChatClient::builder(ApiClient::builder().build(), "me", "t")
            .prefixes(["!", "/"])
            .on(EventKind::Connect, |_| async { Ok(()) })
            .command("help", |_ctx, _args| async { Ok(()) })
            .build();

        assert!(client.hooks().contains(EventKind::Connect));
        assert_eq!(client.commands().names(), vec!["help".to_string()]);
        assert_eq!(client.router().prefixes().len(), 2);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_session_key_shared_with_api_client() {
        let session = SessionKey::new();
        let api = ApiClient::builder().session_key(session.clone()).build();
        let client = ChatClient::builder(api, "me", "t").build();

        client.session_key().set("k1").await;
        assert_eq!(session.get().await.as_deref(), Some("k1"));
    }
}
