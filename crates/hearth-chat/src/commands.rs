//! Prefix-based command routing for chat messages.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use hearth_api::{ApiError, Channel, Message, User};
use serde_json::Value;
use tracing::{debug, trace};

use crate::client::ChatHandle;
use crate::error::{ChatError, HookError};

/// Normalized set of command prefixes, longest first.
///
/// Empty strings are dropped. Ordering by length makes resolution
/// deterministic when one prefix is a prefix of another (`!` and `!!`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefixes(Vec<String>);

impl Prefixes {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        let mut prefixes: Vec<String> = unique.into_iter().collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self(prefixes)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// First prefix `word` starts with, and what follows it.
    pub fn strip<'a>(&self, word: &'a str) -> Option<(&str, &'a str)> {
        self.iter()
            .find_map(|prefix| word.strip_prefix(prefix).map(|rest| (prefix, rest)))
    }
}

impl From<&str> for Prefixes {
    fn from(prefix: &str) -> Self {
        Self::new([prefix])
    }
}

impl From<String> for Prefixes {
    fn from(prefix: String) -> Self {
        Self::new([prefix])
    }
}

impl<S: Into<String>> From<Vec<S>> for Prefixes {
    fn from(prefixes: Vec<S>) -> Self {
        Self::new(prefixes)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Prefixes {
    fn from(prefixes: [S; N]) -> Self {
        Self::new(prefixes)
    }
}

impl From<HashSet<String>> for Prefixes {
    fn from(prefixes: HashSet<String>) -> Self {
        Self::new(prefixes)
    }
}

/// Where prefixes come from.
#[derive(Clone)]
pub enum PrefixSource {
    Static(Prefixes),
    /// Called on every resolution.
    Dynamic(Arc<dyn Fn() -> Prefixes + Send + Sync>),
}

impl fmt::Debug for PrefixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixSource::Static(prefixes) => f.debug_tuple("Static").field(prefixes).finish(),
            PrefixSource::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl Default for PrefixSource {
    fn default() -> Self {
        PrefixSource::Static(Prefixes::default())
    }
}

impl PrefixSource {
    /// Wrap a provider whose result is normalized into [`Prefixes`].
    pub fn dynamic<F, P>(provider: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Into<Prefixes>,
    {
        PrefixSource::Dynamic(Arc::new(move || provider().into()))
    }

    pub fn current(&self) -> Prefixes {
        match self {
            PrefixSource::Static(prefixes) => prefixes.clone(),
            PrefixSource::Dynamic(provider) => provider(),
        }
    }
}

/// A message split into prefix, command name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub prefix: String,
    pub name: String,
    pub args: Vec<String>,
}

/// Split `text` on whitespace and match the first word against `prefixes`.
pub fn parse_command(text: &str, prefixes: &Prefixes) -> Option<ParsedCommand> {
    let mut words = text.split_whitespace();
    let first = words.next()?;
    let (prefix, name) = prefixes.strip(first)?;
    Some(ParsedCommand {
        prefix: prefix.to_string(),
        name: name.to_string(),
        args: words.map(str::to_string).collect(),
    })
}

/// What the router did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NotACommand,
    Dispatched(String),
    /// Prefixed, but no such command; the default handler ran.
    Unknown(String),
}

/// Everything a command handler gets to work with.
#[derive(Debug, Clone)]
pub struct Context {
    pub message: Message,
    pub chat: ChatHandle,
    pub prefix: String,
    pub command: String,
}

impl Context {
    /// Reply in the channel the command came from.
    pub fn send(&self, text: &str) -> Result<(), ChatError> {
        self.chat.send_message(self.message.channel_url(), text).map(|_| ())
    }

    pub async fn author(&self) -> Result<Option<User>, ApiError> {
        self.message.author().await
    }

    pub fn channel(&self) -> Channel {
        self.message.channel()
    }
}

/// Async command callback, invoked with the context and the arguments.
pub type CommandHandler =
    Arc<dyn Fn(Context, Vec<String>) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

fn boxed_handler<F, Fut>(handler: F) -> CommandHandler
where
    F: Fn(Context, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HookError>> + Send + 'static,
{
    Arc::new(move |ctx, args| handler(ctx, args).boxed())
}

/// Command table. Names are case-sensitive; one handler per name.
#[derive(Clone, Default)]
pub struct Commands {
    table: Arc<DashMap<String, CommandHandler>>,
    fallback: Arc<RwLock<Option<CommandHandler>>>,
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commands").field("names", &self.names()).finish()
    }
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Context, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.table.insert(name.into(), boxed_handler(handler));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.table.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Handler for prefixed messages naming no registered command.
    pub fn set_default<F, Fut>(&self, handler: F)
    where
        F: Fn(Context, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        *self.fallback.write().unwrap_or_else(PoisonError::into_inner) = Some(boxed_handler(handler));
    }

    /// Back to the no-op default.
    pub fn clear_default(&self) {
        *self.fallback.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn get(&self, name: &str) -> Option<CommandHandler> {
        self.table.get(name).map(|h| Arc::clone(h.value()))
    }

    fn fallback(&self) -> Option<CommandHandler> {
        self.fallback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Matches message text against the prefix set and runs commands.
#[derive(Debug, Clone, Default)]
pub struct CommandRouter {
    prefixes: Arc<RwLock<PrefixSource>>,
    commands: Commands,
}

impl CommandRouter {
    pub fn new(prefixes: PrefixSource, commands: Commands) -> Self {
        Self {
            prefixes: Arc::new(RwLock::new(prefixes)),
            commands,
        }
    }

    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    pub fn set_prefixes(&self, prefixes: PrefixSource) {
        *self.prefixes.write().unwrap_or_else(PoisonError::into_inner) = prefixes;
    }

    /// Prefixes in effect right now.
    pub fn prefixes(&self) -> Prefixes {
        self.prefixes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
    }

    /// Route one message. The text is read from the message payload without
    /// touching the network.
    pub async fn resolve(&self, message: Message, chat: ChatHandle) -> Result<Resolution, HookError> {
        let text = match message.proxy().cached("message").await {
            Some(Value::String(text)) => text,
            _ => return Ok(Resolution::NotACommand),
        };
        let Some(parsed) = parse_command(&text, &self.prefixes()) else {
            trace!("not a command");
            return Ok(Resolution::NotACommand);
        };

        let ParsedCommand { prefix, name, args } = parsed;
        let ctx = Context {
            message,
            chat,
            prefix,
            command: name.clone(),
        };

        match self.commands.get(&name) {
            Some(handler) => {
                debug!(command = %name, args = args.len(), "dispatching command");
                handler(ctx, args).await?;
                Ok(Resolution::Dispatched(name))
            }
            None => {
                debug!(command = %name, "unknown command");
                if let Some(fallback) = self.commands.fallback() {
                    fallback(ctx, args).await?;
                }
                Ok(Resolution::Unknown(name))
            }
        }
    }
}
