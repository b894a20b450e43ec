//! The `bot` subcommand.

use std::time::Duration;

use hearth_api::ApiClient;
use hearth_chat::{ChatClient, Commands, Context, Event, EventKind, HookError, TransportConfig};
use miette::{IntoDiagnostic, Result};
use tracing::{info, warn};

/// How long to wait for the connection ack before warning.
const CONNECT_WAIT: Duration = Duration::from_secs(30);

pub struct BotConfig {
    pub api: ApiClient,
    pub user_id: String,
    pub token: String,
    pub prefixes: Vec<String>,
    pub reconnect: bool,
}

pub async fn run(config: BotConfig) -> Result<()> {
    let client = ChatClient::builder(config.api, config.user_id, config.token)
        .config(TransportConfig::default().with_reconnect(config.reconnect))
        .prefixes(config.prefixes)
        .on(EventKind::Connect, |_| async {
            info!("bot is online");
            Ok(())
        })
        .on(EventKind::Disconnect, |_| async {
            warn!("bot went offline");
            Ok(())
        })
        .on(EventKind::Message, log_event)
        .on(EventKind::File, log_event)
        .on(EventKind::UserJoin, log_event)
        .on(EventKind::UserExit, log_event)
        .on(EventKind::InviteBroadcast, log_event)
        .on(EventKind::Invite, accept_invite)
        .command("ping", |ctx: Context, _args| async move {
            ctx.send("pong")?;
            Ok::<(), HookError>(())
        })
        .command("whoami", whoami)
        .default_command(|ctx: Context, _args| async move {
            ctx.send(&format!("unknown command, try {}help", ctx.prefix))?;
            Ok::<(), HookError>(())
        })
        .build();

    let commands = client.commands().clone();
    client.commands().register("help", move |ctx: Context, _args| {
        let reply = help_text(&commands, &ctx.prefix);
        async move {
            ctx.send(&reply)?;
            Ok::<(), HookError>(())
        }
    });

    client.start().await.into_diagnostic()?;
    if !client.wait_connected(CONNECT_WAIT).await {
        warn!(wait_secs = CONNECT_WAIT.as_secs(), "no connection ack yet");
    }

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("shutting down");
    client.stop().await.into_diagnostic()?;
    Ok(())
}

async fn log_event(event: Event) -> Result<(), HookError> {
    match &event {
        Event::Message(message) | Event::File(message) => {
            let sender = message.sender_id().await;
            info!(
                event = %event.kind(),
                channel = %message.channel_url(),
                sender = ?sender,
                "received"
            );
        }
        Event::UserJoin { channel, users } => {
            info!(channel = %channel.url(), count = users.len(), "users joined");
        }
        Event::UserExit { channel, user } => {
            info!(channel = %channel.url(), user = %user.id(), "user left");
        }
        Event::InviteBroadcast(invitation) => {
            info!(
                channel = %invitation.channel.url(),
                count = invitation.invitees.len(),
                "users invited"
            );
        }
        other => info!(event = %other.kind(), "event"),
    }
    Ok(())
}

async fn accept_invite(event: Event) -> Result<(), HookError> {
    if let Event::Invite(invitation) = event {
        info!(
            channel = %invitation.channel.url(),
            inviter = ?invitation.inviter.as_ref().map(|u| u.id().to_string()),
            "invited, joining"
        );
        invitation.channel.join().await?;
    }
    Ok(())
}

async fn whoami(ctx: Context, _args: Vec<String>) -> Result<(), HookError> {
    let reply = match ctx.author().await? {
        Some(user) => {
            let nick = user.nick().await?.unwrap_or_else(|| "(no nick)".to_string());
            format!("you are {} ({})", nick, user.id())
        }
        None => "I could not tell who you are".to_string(),
    };
    ctx.send(&reply)?;
    Ok(())
}

/// One-line listing of every registered command under `prefix`.
fn help_text(commands: &Commands, prefix: &str) -> String {
    let names: Vec<String> = commands
        .names()
        .iter()
        .map(|name| format!("{}{}", prefix, name))
        .collect();
    format!("commands: {}", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_chat::Hooks;

    #[test]
    fn test_help_text_lists_sorted_commands() {
        let commands = Commands::new();
        commands.register("whoami", whoami);
        commands.register("ping", |_ctx, _args| async { Ok::<(), HookError>(()) });
        commands.register("help", |_ctx, _args| async { Ok::<(), HookError>(()) });

        assert_eq!(help_text(&commands, "/"), "commands: /help, /ping, /whoami");
    }

    #[tokio::test]
    async fn test_event_hooks_register_and_fire() {
        let hooks = Hooks::new();
        hooks.on(EventKind::Message, log_event);
        hooks.on(EventKind::Connect, log_event);
        hooks.on(EventKind::Invite, accept_invite);

        assert!(hooks.contains(EventKind::Message));
        assert!(hooks.contains(EventKind::Invite));
        assert!(hooks.fire(Event::Connect).await);
    }
}
