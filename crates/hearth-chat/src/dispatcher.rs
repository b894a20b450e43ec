//! Turns raw socket lines into events.
//!
//! Protocol bookkeeping (decode, `PONG`, session key, self-filter, proxy
//! construction) runs inline on the reader in arrival order. User code runs
//! in one spawned task per frame: hooks first, then command routing.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use hearth_api::{Channel, Message, SessionKey, User, proxy::is_falsy};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::client::ChatHandle;
use crate::commands::{CommandRouter, Resolution};
use crate::frame::{Frame, Opcode};
use crate::hooks::{Event, EventKind, Hooks, Invitation, panic_message};
use crate::transport::FrameHandler;

/// `SYEV` category: users invited to a channel.
pub const CATEGORY_INVITE: i64 = 10020;
/// `SYEV` category: users joined a channel.
pub const CATEGORY_USER_JOIN: i64 = 10000;
/// `SYEV` category: a user left a channel.
pub const CATEGORY_USER_EXIT: i64 = 10001;

/// Routes decoded frames to hooks and commands.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    chat: ChatHandle,
    session: SessionKey,
    hooks: Hooks,
    router: CommandRouter,
}

#[async_trait]
impl FrameHandler for Dispatcher {
    async fn handle_line(&self, line: &str) {
        // The task is detached; ordering across frames is not guaranteed.
        let _ = self.resolve(line).await;
    }

    async fn disconnected(&self) {
        self.session.clear().await;
        self.hooks.fire(Event::Disconnect).await;
    }
}

impl Dispatcher {
    pub fn new(chat: ChatHandle, session: SessionKey, hooks: Hooks, router: CommandRouter) -> Self {
        Self {
            chat,
            session,
            hooks,
            router,
        }
    }

    /// Handle one raw frame. Returns the task running user code, if any.
    pub async fn resolve(&self, raw: &str) -> Option<JoinHandle<()>> {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return None;
            }
        };

        match frame.opcode {
            Opcode::Ping => self.on_ping(frame.payload),
            Opcode::Message | Opcode::File => self.on_message(frame).await,
            Opcode::Login => self.on_login(frame.payload).await,
            Opcode::SystemEvent => self.on_system_event(frame.payload).await,
            other => {
                trace!(opcode = %other, "ignoring frame");
                None
            }
        }
    }

    fn on_ping(&self, payload: Value) -> Option<JoinHandle<()>> {
        let id = payload.get("id").cloned().unwrap_or(Value::Null);
        let now = Utc::now().timestamp_millis();
        let pong = Frame::new(Opcode::Pong, json!({ "id": id.clone(), "ts": now, "sts": now }));
        if let Err(e) = self.chat.transport().enqueue(&pong) {
            warn!(error = %e, "failed to answer ping");
        }

        if !self.hooks.contains(EventKind::Ping) {
            return None;
        }
        let hooks = self.hooks.clone();
        Some(spawn_guarded("ping", async move {
            hooks.fire(Event::Ping { id }).await;
        }))
    }

    async fn on_message(&self, frame: Frame) -> Option<JoinHandle<()>> {
        let message = match Message::from_payload(self.chat.api(), frame.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(opcode = %frame.opcode, error = %e, "dropping malformed message");
                return None;
            }
        };
        if message.sender_id().await.as_deref() == Some(self.chat.user_id()) {
            trace!(message_id = %message.message_id(), "ignoring own message");
            return None;
        }

        let event = if frame.opcode == Opcode::File {
            Event::File(message.clone())
        } else {
            Event::Message(message.clone())
        };
        let hooks = self.hooks.clone();
        let router = self.router.clone();
        let chat = self.chat.clone();
        Some(spawn_guarded("message", async move {
            hooks.fire(event).await;
            match router.resolve(message, chat).await {
                Ok(Resolution::NotACommand) => {}
                Ok(resolution) => debug!(?resolution, "command routed"),
                Err(e) => warn!(error = %e, "command failed"),
            }
        }))
    }

    async fn on_login(&self, payload: Value) -> Option<JoinHandle<()>> {
        if let Some(error) = payload.get("error").filter(|e| !is_falsy(e)) {
            warn!(error = %error, message = ?payload.get("message"), "chat login rejected");
            return None;
        }
        match payload.get("key").and_then(Value::as_str) {
            Some(key) => self.session.set(key).await,
            None => warn!("connection ack without session key"),
        }
        if !self.chat.transport().mark_connected() {
            debug!("connection ack while not connecting");
            return None;
        }
        info!(user_id = %self.chat.user_id(), "chat connected");

        let hooks = self.hooks.clone();
        Some(spawn_guarded("connect", async move {
            hooks.fire(Event::Connect).await;
        }))
    }

    async fn on_system_event(&self, payload: Value) -> Option<JoinHandle<()>> {
        let Some(category) = payload
            .get("cat")
            .or_else(|| payload.get("category"))
            .and_then(Value::as_i64)
        else {
            debug!("system event without category");
            return None;
        };
        let api = self.chat.api();
        let channel = payload
            .get("channel")
            .filter(|c| c.is_object())
            .and_then(|c| Channel::from_value(api, c.clone()))
            .or_else(|| {
                payload
                    .get("channel_url")
                    .and_then(Value::as_str)
                    .map(|url| Channel::new(api, url))
            });
        let Some(channel) = channel else {
            debug!(category, "system event without channel");
            return None;
        };
        let data = payload.get("data").cloned().unwrap_or(Value::Null);

        let event = match category {
            CATEGORY_INVITE => {
                let inviter = data
                    .get("inviter")
                    .cloned()
                    .and_then(|v| User::from_chat(api, v));
                let invitees = users(api, data.get("invitees"));
                let invitation = Invitation {
                    channel,
                    inviter,
                    invitees,
                };
                if invitation
                    .invitees
                    .iter()
                    .any(|u| u.id() == self.chat.user_id())
                {
                    Event::Invite(invitation)
                } else {
                    Event::InviteBroadcast(invitation)
                }
            }
            CATEGORY_USER_JOIN => {
                let mut joined = users(api, data.get("users"));
                if joined.is_empty() {
                    joined.extend(User::from_chat(api, data.clone()));
                }
                Event::UserJoin {
                    channel,
                    users: joined,
                }
            }
            CATEGORY_USER_EXIT => {
                let Some(user) = User::from_chat(api, data) else {
                    debug!("user exit without user");
                    return None;
                };
                Event::UserExit { channel, user }
            }
            other => {
                trace!(category = other, "ignoring system event");
                return None;
            }
        };

        let hooks = self.hooks.clone();
        Some(spawn_guarded("system event", async move {
            hooks.fire(event).await;
        }))
    }
}

fn users(api: &hearth_api::ApiClient, list: Option<&Value>) -> Vec<User> {
    list.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| User::from_chat(api, v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Run user code on its own task; panics are logged, never propagated.
fn spawn_guarded<F>(what: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
            warn!(task = what, panic = %panic_message(&*panic), "dispatch task panicked");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Commands, Context, PrefixSource};
    use crate::error::HookError;
    use crate::transport::{ConnectionState, Transport, TransportConfig};
    use hearth_api::ApiClient;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    struct Harness {
        dispatcher: Dispatcher,
        outbound: mpsc::UnboundedReceiver<WsMessage>,
        events: Arc<Mutex<Vec<String>>>,
    }

    fn recorder(events: &Arc<Mutex<Vec<String>>>, hooks: &Hooks, kind: EventKind) {
        let events = Arc::clone(events);
        hooks.on(kind, move |event| {
            let events = Arc::clone(&events);
            async move {
                let label = match &event {
                    Event::Message(m) => format!("message:{}", m.message_id()),
                    Event::Invite(i) | Event::InviteBroadcast(i) => {
                        format!("{}:{}", event.kind(), i.channel.url())
                    }
                    Event::UserJoin { users, .. } => format!("user_join:{}", users.len()),
                    Event::UserExit { user, .. } => format!("user_exit:{}", user.id()),
                    other => other.kind().to_string(),
                };
                events.lock().unwrap().push(label);
                Ok(())
            }
        });
    }

    fn harness(state: ConnectionState) -> Harness {
        let api = ApiClient::builder().user_id("me").build();
        let transport = Transport::new(api, "me", "t", TransportConfig::default());
        let outbound = transport.loopback(state);
        let chat = ChatHandle::new(transport);

        let events: Arc<Mutex<Vec<String>>> = Arc::default();
        let hooks = Hooks::new();
        for kind in [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::Message,
            EventKind::Invite,
            EventKind::InviteBroadcast,
            EventKind::UserJoin,
            EventKind::UserExit,
        ] {
            recorder(&events, &hooks, kind);
        }

        let commands = Commands::new();
        let seen = Arc::clone(&events);
        commands.register("help", move |ctx: Context, _args| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(format!("command:{}", ctx.command));
                ctx.send("usage: !help")?;
                Ok::<(), HookError>(())
            }
        });
        let router = CommandRouter::new(PrefixSource::Static("!".into()), commands);

        Harness {
            dispatcher: Dispatcher::new(chat, SessionKey::new(), hooks, router),
            outbound,
            events,
        }
    }

    async fn run(dispatcher: &Dispatcher, raw: &str) {
        if let Some(task) = dispatcher.resolve(raw).await {
            task.await.unwrap();
        }
    }

    fn sent_text(message: WsMessage) -> String {
        match message {
            WsMessage::Text(text) => text,
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_answered_before_hooks() {
        let mut h = harness(ConnectionState::Connected);
        run(&h.dispatcher, "PING{\"id\":\"abc\"}").await;

        let pong = Frame::decode(&sent_text(h.outbound.recv().await.unwrap())).unwrap();
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.str_field("id"), Some("abc"));
        assert!(pong.payload["ts"].is_i64());
        assert!(pong.payload["sts"].is_i64());
    }

    #[tokio::test]
    async fn test_login_connects_and_stores_key() {
        let h = harness(ConnectionState::Connecting);
        run(&h.dispatcher, "LOGI{\"key\":\"sess-1\"}").await;

        assert_eq!(h.dispatcher.chat.state(), ConnectionState::Connected);
        assert_eq!(h.dispatcher.session.get().await.as_deref(), Some("sess-1"));
        assert_eq!(*h.events.lock().unwrap(), vec!["connect".to_string()]);
    }

    #[tokio::test]
    async fn test_login_error_does_not_connect() {
        let h = harness(ConnectionState::Connecting);
        run(&h.dispatcher, "LOGI{\"error\":true,\"message\":\"bad token\"}").await;

        assert_eq!(h.dispatcher.chat.state(), ConnectionState::Connecting);
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_hook_then_command() {
        let mut h = harness(ConnectionState::Connected);
        run(
            &h.dispatcher,
            r#"MESG{"msg_id":7,"channel_url":"ch1","message":"!help","user":{"guest_id":"u2"}}"#,
        )
        .await;

        assert_eq!(
            *h.events.lock().unwrap(),
            vec!["message:7".to_string(), "command:help".to_string()]
        );
        let reply = Frame::decode(&sent_text(h.outbound.recv().await.unwrap())).unwrap();
        assert_eq!(reply.opcode, Opcode::Message);
        assert_eq!(reply.str_field("channel_url"), Some("ch1"));
        assert_eq!(reply.str_field("message"), Some("usage: !help"));
    }

    #[tokio::test]
    async fn test_own_messages_are_suppressed() {
        let h = harness(ConnectionState::Connected);
        let task = h
            .dispatcher
            .resolve(r#"MESG{"msg_id":8,"channel_url":"ch1","message":"!help","user":{"user_id":"me"}}"#)
            .await;
        assert!(task.is_none());
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invite_targets() {
        let h = harness(ConnectionState::Connected);
        run(
            &h.dispatcher,
            r#"SYEV{"cat":10020,"channel_url":"ch1","data":{"inviter":{"user_id":"u2"},"invitees":[{"user_id":"me"}]}}"#,
        )
        .await;
        run(
            &h.dispatcher,
            r#"SYEV{"category":10020,"channel":{"channel_url":"ch2"},"data":{"invitees":[{"user_id":"u3"}]}}"#,
        )
        .await;

        assert_eq!(
            *h.events.lock().unwrap(),
            vec!["invite:ch1".to_string(), "invite_broadcast:ch2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_join_and_exit() {
        let h = harness(ConnectionState::Connected);
        run(
            &h.dispatcher,
            r#"SYEV{"cat":10000,"channel_url":"ch1","data":{"users":[{"user_id":"a"},{"user_id":"b"}]}}"#,
        )
        .await;
        run(
            &h.dispatcher,
            r#"SYEV{"cat":10001,"channel_url":"ch1","data":{"user_id":"a","nickname":"ann"}}"#,
        )
        .await;
        run(&h.dispatcher, r#"SYEV{"cat":12345,"channel_url":"ch1"}"#).await;

        assert_eq!(
            *h.events.lock().unwrap(),
            vec!["user_join:2".to_string(), "user_exit:a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_and_broken_frames_are_dropped() {
        let h = harness(ConnectionState::Connected);
        assert!(h.dispatcher.resolve("BRDM{}").await.is_none());
        assert!(h.dispatcher.resolve("MESG{oops").await.is_none());
        assert!(h.dispatcher.resolve("xy").await.is_none());
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_command_is_contained() {
        let h = harness(ConnectionState::Connected);
        fn explode() -> Result<(), HookError> {
            panic!("command exploded")
        }
        h.dispatcher
            .router
            .commands()
            .register("boom", |_ctx, _args| async { explode() });

        let task = h
            .dispatcher
            .resolve(r#"MESG{"msg_id":9,"channel_url":"ch1","message":"!boom","user":{"user_id":"u2"}}"#)
            .await
            .unwrap();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_clears_session() {
        let h = harness(ConnectionState::Connecting);
        run(&h.dispatcher, "LOGI{\"key\":\"k\"}").await;
        h.dispatcher.disconnected().await;

        assert!(h.dispatcher.session.get().await.is_none());
        assert_eq!(
            *h.events.lock().unwrap(),
            vec!["connect".to_string(), "disconnect".to_string()]
        );
    }
}
