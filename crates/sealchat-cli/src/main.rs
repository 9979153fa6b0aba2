//! sealchat: end-to-end encrypted group messaging from the terminal
//!
//! Every command signs in first (challenge/response), runs, and exits.
//! Keys never leave the process unencrypted.
//!
//! Commands:
//!   register                    - create an account and upload wrapped keys
//!   login                       - check the password and show the identity key
//!   conversations               - list conversations and their members
//!   create <user>...            - start a conversation
//!   add <id> <user>             - add a member (existing key is re-sealed)
//!   remove <id> <user>          - remove a member (key is rotated)
//!   send <id> <text>            - send an encrypted message
//!   history <id>                - fetch and decrypt a conversation
//!   safety-number <user>        - print the safety number shared with <user>

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use tracing::info;
use url::Url;

use sealchat_client::{ChatClient, Directory, HttpDirectory, InboundMessage};
use sealchat_core::config::{LogConfig, SealchatConfig};
use sealchat_core::ConversationId;
use sealchat_crypto::DefaultCryptoProvider;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealchat",
    version,
    about = "End-to-end encrypted group messaging client"
)]
struct Cli {
    /// Path to sealchat.toml configuration file
    #[arg(long, short = 'c', env = "SEALCHAT_CONFIG", default_value = "sealchat.toml")]
    config: PathBuf,

    /// Directory server base URL (overrides config)
    #[arg(long, env = "SEALCHAT_SERVER")]
    server: Option<Url>,

    /// Username to act as
    #[arg(long, short = 'u', env = "SEALCHAT_USER")]
    user: String,

    /// Log level (trace, debug, info, warn, error; default: `[log] level`)
    #[arg(long, env = "SEALCHAT_LOG")]
    log: Option<String>,

    /// Log format (json, text; default: `[log] format`)
    #[arg(long, env = "SEALCHAT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, PartialEq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account: generates identity and login keys, wraps them
    /// under the password and uploads the public halves
    Register,

    /// Sign in and print the identity public key
    Login,

    /// List conversations
    Conversations,

    /// Start a conversation with one or more users
    Create {
        /// Other participants (you are added automatically)
        users: Vec<String>,
    },

    /// Add a user to a conversation
    Add {
        conversation: ConversationId,
        user: String,
    },

    /// Remove a user from a conversation and rotate its key
    Remove {
        conversation: ConversationId,
        user: String,
    },

    /// Send a message
    Send {
        conversation: ConversationId,
        text: String,
    },

    /// Show a conversation's decrypted history
    History { conversation: ConversationId },

    /// Print the safety number to compare with another user out of band
    #[command(name = "safety-number")]
    SafetyNumber { user: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SealchatConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;
    let (level, format) = log_settings(cli.log.as_deref(), cli.log_format.as_ref(), &config.log)?;
    init_logging(&level, &format);
    if !cli.config.exists() {
        tracing::warn!("config file not found: {}  (using defaults)", cli.config.display());
    }

    if let Some(server) = &cli.server {
        config.server.base_url = server.to_string();
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server.base_url,
        "sealchat starting"
    );

    let mut client = build_client(config)?;
    let password = read_password()?;

    if let Commands::Register = cli.command {
        let user = client
            .register(&cli.user, &password)
            .await
            .context("registration failed")?;
        println!("registered {user}");
        print_identity(&client);
        return Ok(());
    }

    client
        .login(&cli.user, &password)
        .await
        .context("login failed")?;

    match cli.command {
        Commands::Register => Ok(()),
        Commands::Login => {
            print_identity(&client);
            Ok(())
        }
        Commands::Conversations => cmd_conversations(&client),
        Commands::Create { users } => cmd_create(&mut client, &users).await,
        Commands::Add { conversation, user } => {
            client
                .add_participant(conversation, &user)
                .await
                .with_context(|| format!("adding {user} to conversation {conversation}"))?;
            println!("added {user} to conversation {conversation}");
            Ok(())
        }
        Commands::Remove { conversation, user } => {
            client
                .remove_participant(conversation, &user)
                .await
                .with_context(|| format!("removing {user} from conversation {conversation}"))?;
            println!("removed {user} from conversation {conversation}; session key rotated");
            Ok(())
        }
        Commands::Send { conversation, text } => {
            let sent = client
                .send_message(conversation, &text)
                .await
                .context("sending message")?;
            println!("sent message {} at {}", sent.message_id, sent.timestamp);
            Ok(())
        }
        Commands::History { conversation } => cmd_history(&mut client, conversation).await,
        Commands::SafetyNumber { user } => {
            let number = client
                .safety_number(&user)
                .await
                .with_context(|| format!("computing safety number with {user}"))?;
            println!("{number}");
            Ok(())
        }
    }
}

// ── Setup ─────────────────────────────────────────────────────────────────────

/// Command-line flags win; otherwise the `[log]` section applies.
fn log_settings(
    level: Option<&str>,
    format: Option<&LogFormat>,
    config: &LogConfig,
) -> Result<(String, LogFormat)> {
    let level = level.unwrap_or(config.level.as_str()).to_string();
    let format = match format {
        Some(format) => format.clone(),
        None => <LogFormat as ValueEnum>::from_str(&config.format, true)
            .map_err(|e| anyhow::anyhow!("invalid [log] format {:?}: {e}", config.format))?,
    };
    Ok((level, format))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn build_client(config: SealchatConfig) -> Result<ChatClient> {
    let base = Url::parse(&config.server.base_url)
        .with_context(|| format!("invalid server URL: {}", config.server.base_url))?;
    let timeout = Duration::from_secs(config.server.request_timeout_secs);
    let directory: Arc<dyn Directory> =
        Arc::new(HttpDirectory::new(&base, timeout).context("building HTTP client")?);
    Ok(ChatClient::new(
        config,
        Arc::new(DefaultCryptoProvider),
        directory,
    ))
}

/// SEALCHAT_PASSWORD wins over the interactive prompt.
fn read_password() -> Result<SecretString> {
    if let Ok(password) = std::env::var("SEALCHAT_PASSWORD") {
        return Ok(SecretString::from(password));
    }
    let password = rpassword::prompt_password("Password: ").context("reading password")?;
    Ok(SecretString::from(password))
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn print_identity(client: &ChatClient) {
    if let Some(key) = client.identity_public_key() {
        println!("identity key: {}", key.to_base64());
    }
}

fn cmd_conversations(client: &ChatClient) -> Result<()> {
    let conversations = client.conversations();
    if conversations.is_empty() {
        println!("no conversations");
        return Ok(());
    }
    for conversation in conversations {
        let status = if client.session_keys().is_key_lost(conversation.id) {
            " [key lost]"
        } else {
            ""
        };
        println!(
            "{:>6}  {}{}",
            conversation.id,
            conversation.participants.join(", "),
            status
        );
    }
    Ok(())
}

async fn cmd_create(client: &mut ChatClient, users: &[String]) -> Result<()> {
    let conversation = client
        .create_conversation(users)
        .await
        .context("creating conversation")?;
    println!(
        "created conversation {} with {}",
        conversation.id,
        conversation.participants.join(", ")
    );
    Ok(())
}

async fn cmd_history(client: &mut ChatClient, conversation: ConversationId) -> Result<()> {
    let messages = client
        .load_history(conversation)
        .await
        .with_context(|| format!("loading history of conversation {conversation}"))?;
    for message in messages {
        match message {
            InboundMessage::Decoded(m) => {
                println!("[{}] {}: {}", m.timestamp, m.sender_id, m.plaintext);
            }
            InboundMessage::Undecryptable(m) => {
                println!("[{}] {}: <unable to decrypt: {}>", m.timestamp, m.sender_id, m.reason);
            }
        }
    }
    Ok(())
}
