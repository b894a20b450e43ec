//! User event hooks.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use hearth_api::{Channel, Message, User};
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::HookError;

/// Which hook an [`Event`] is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Ping,
    Message,
    File,
    /// This client was invited to a channel.
    Invite,
    /// Someone else was invited to a channel this client is in.
    InviteBroadcast,
    UserJoin,
    UserExit,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Ping => "ping",
            EventKind::Message => "message",
            EventKind::File => "file",
            EventKind::Invite => "invite",
            EventKind::InviteBroadcast => "invite_broadcast",
            EventKind::UserJoin => "user_join",
            EventKind::UserExit => "user_exit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invite details shared by [`Event::Invite`] and [`Event::InviteBroadcast`].
#[derive(Debug, Clone)]
pub struct Invitation {
    pub channel: Channel,
    pub inviter: Option<User>,
    pub invitees: Vec<User>,
}

/// A dispatched event with the proxies built from its payload.
#[derive(Debug, Clone)]
pub enum Event {
    Connect,
    Disconnect,
    Ping { id: Value },
    Message(Message),
    File(Message),
    Invite(Invitation),
    InviteBroadcast(Invitation),
    UserJoin { channel: Channel, users: Vec<User> },
    UserExit { channel: Channel, user: User },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connect => EventKind::Connect,
            Event::Disconnect => EventKind::Disconnect,
            Event::Ping { .. } => EventKind::Ping,
            Event::Message(_) => EventKind::Message,
            Event::File(_) => EventKind::File,
            Event::Invite(_) => EventKind::Invite,
            Event::InviteBroadcast(_) => EventKind::InviteBroadcast,
            Event::UserJoin { .. } => EventKind::UserJoin,
            Event::UserExit { .. } => EventKind::UserExit,
        }
    }
}

/// Async hook callback.
pub type Hook = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// Hook table: at most one hook per [`EventKind`], replaceable at runtime.
#[derive(Clone, Default)]
pub struct Hooks {
    table: Arc<DashMap<EventKind, Hook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<EventKind> = self.table.iter().map(|e| *e.key()).collect();
        f.debug_struct("Hooks").field("registered", &kinds).finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `kind`, replacing any previous one.
    pub fn on<F, Fut>(&self, kind: EventKind, hook: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        let hook: Hook = Arc::new(move |event| hook(event).boxed());
        self.table.insert(kind, hook);
    }

    pub fn remove(&self, kind: EventKind) -> bool {
        self.table.remove(&kind).is_some()
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.table.contains_key(&kind)
    }

    /// Run the hook for this event, if any. Errors and panics are logged.
    ///
    /// Returns whether a hook was registered.
    pub async fn fire(&self, event: Event) -> bool {
        let kind = event.kind();
        // Clone out so the map shard is not held across the await.
        let Some(hook) = self.table.get(&kind).map(|h| Arc::clone(h.value())) else {
            trace!(event = %kind, "no hook registered");
            return false;
        };

        match AssertUnwindSafe(async move { hook(event).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(event = %kind, error = %e, "hook failed"),
            Err(panic) => warn!(event = %kind, panic = %panic_message(&*panic), "hook panicked"),
        }
        true
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let hooks = Hooks::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        hooks.on(EventKind::Connect, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let counter = Arc::clone(&second);
        hooks.on(EventKind::Connect, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(hooks.fire(Event::Connect).await);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_hook() {
        let hooks = Hooks::new();
        assert!(!hooks.fire(Event::Disconnect).await);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_hooks_are_contained() {
        let hooks = Hooks::new();
        hooks.on(EventKind::Connect, |_| async { Err::<(), HookError>("boom".into()) });
        fn explode() -> Result<(), HookError> {
            panic!("hook exploded")
        }
        hooks.on(EventKind::Disconnect, |_| async { explode() });

        assert!(hooks.fire(Event::Connect).await);
        assert!(hooks.fire(Event::Disconnect).await);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
    }
}
