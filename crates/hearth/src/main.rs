//! Hearth: command-line client for the Hearth platform.
//!
//! Subcommands:
//! - `bot`: connect to chat and answer `help`, `ping` and `whoami`
//! - `inspect user`: print a user's fields and recent posts

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use hearth_api::{ApiClient, BearerToken, Endpoints, SessionKey};
use hearth_api::{DEFAULT_API_BASE, DEFAULT_CHAT_API_BASE, DEFAULT_ROUTING_URL};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod inspect;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Hearth platform client and chat bot", long_about = None)]
struct Cli {
    #[command(flatten)]
    api: ApiArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Account and endpoint settings shared by every subcommand.
#[derive(Args)]
struct ApiArgs {
    /// Access token
    #[arg(long, env = "HEARTH_TOKEN", hide_env_values = true)]
    token: String,

    /// Id of the account the token belongs to
    #[arg(long, env = "HEARTH_USER_ID")]
    user_id: Option<String>,

    /// Platform API base URL
    #[arg(long, env = "HEARTH_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Chat REST API base URL
    #[arg(long, env = "HEARTH_CHAT_API_BASE", default_value = DEFAULT_CHAT_API_BASE)]
    chat_api_base: String,

    /// Chat routing endpoint (yields the socket host)
    #[arg(long, env = "HEARTH_ROUTING_URL", default_value = DEFAULT_ROUTING_URL)]
    routing_url: String,
}

impl ApiArgs {
    fn client(&self) -> ApiClient {
        let mut builder = ApiClient::builder()
            .endpoints(Endpoints {
                api_base: self.api_base.clone(),
                chat_api_base: self.chat_api_base.clone(),
                routing_url: self.routing_url.clone(),
            })
            .credentials(Arc::new(BearerToken::new(self.token.clone())))
            .session_key(SessionKey::new());
        if let Some(user_id) = &self.user_id {
            builder = builder.user_id(user_id.clone());
        }
        builder.build()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat bot until Ctrl-C
    Bot {
        /// Command prefix (repeatable, or comma-separated in the env var)
        #[arg(
            long = "prefix",
            env = "HEARTH_PREFIXES",
            value_delimiter = ',',
            default_value = "!"
        )]
        prefixes: Vec<String>,

        /// Reconnect with backoff when the connection drops
        #[arg(long, env = "HEARTH_RECONNECT", value_parser = parse_bool_env, default_value = "false")]
        reconnect: bool,
    },

    /// Look things up through the API
    Inspect {
        #[command(subcommand)]
        target: InspectTarget,
    },
}

#[derive(Subcommand)]
enum InspectTarget {
    /// Show a user by id or nick
    User {
        /// User id or nick
        #[arg(value_name = "ID_OR_NICK")]
        who: String,

        /// Number of timeline posts to list
        #[arg(long, default_value = "5")]
        posts: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "hearth=info,hearth_chat=info,hearth_api=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let api = cli.api.client();

    match cli.command {
        Commands::Bot {
            prefixes,
            reconnect,
        } => {
            let user_id = cli
                .api
                .user_id
                .clone()
                .ok_or_else(|| miette::miette!("the bot needs --user-id (or HEARTH_USER_ID)"))?;
            bot::run(bot::BotConfig {
                api,
                user_id,
                token: cli.api.token.clone(),
                prefixes,
                reconnect,
            })
            .await
        }

        Commands::Inspect {
            target: InspectTarget::User { who, posts },
        } => inspect::user(&api, &who, posts).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1", true)]
    #[test_case("YES", true)]
    #[test_case("on", true)]
    #[test_case("0", false)]
    #[test_case("", false)]
    #[test_case("Off", false)]
    fn test_parse_bool_env(input: &str, expected: bool) {
        assert_eq!(parse_bool_env(input), Ok(expected));
    }

    #[test]
    fn test_parse_bool_env_rejects_garbage() {
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_prefixes_from_cli() {
        let cli = Cli::try_parse_from([
            "hearth", "--token", "t", "bot", "--prefix", "!", "--prefix", "/",
        ])
        .unwrap();
        match cli.command {
            Commands::Bot {
                prefixes,
                reconnect,
            } => {
                assert_eq!(prefixes, vec!["!".to_string(), "/".to_string()]);
                assert!(!reconnect);
            }
            Commands::Inspect { .. } => panic!("parsed the wrong subcommand"),
        }
    }
}
