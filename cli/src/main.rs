use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use gigchat::api::ChatApi;
use gigchat::notify::ChannelNotifier;
use gigchat::{
    CookieJar, Credential, MessageKind, OutgoingMessage, SessionConfig, SessionError, SessionHandle,
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing credential; pass --token, --cookies, or set CHAT_TOKEN")]
    MissingCredential,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "gigchat", about = "Marketplace chat session client")]
struct Cli {
    #[arg(long, env = "CHAT_SOCKET_URL")]
    socket_url: Option<String>,

    #[arg(long, env = "CHAT_API_URL")]
    api_url: Option<String>,

    /// Bearer token; takes precedence over --cookies.
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Raw cookie header, e.g. "token=abc; theme=dark".
    #[arg(long, env = "CHAT_COOKIES", hide_env_values = true)]
    cookies: Option<String>,

    #[arg(long, env = "CHAT_USER_ID")]
    user_id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the conversation list.
    List,
    /// Stay connected and print notifications until interrupted.
    Watch(WatchArgs),
    /// Start (or look up) the conversation with a user.
    Start { recipient: String },
    Send(SendArgs),
    /// Mark a correspondent's messages as seen.
    Seen { conversation_id: String, recipient_id: String },
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Suppress toasts as if the messaging screen were open.
    #[arg(long, default_value_t = false)]
    on_surface: bool,
}

#[derive(Args, Debug)]
struct SendArgs {
    conversation_id: String,
    recipient_id: String,
    content: String,
    #[arg(long, value_enum, default_value_t = KindArg::Text)]
    kind: KindArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Text,
    Image,
    File,
}

impl From<KindArg> for MessageKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Text => Self::Text,
            KindArg::Image => Self::Image,
            KindArg::File => Self::File,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = SessionConfig::from_lookup(|key| match key {
        "CHAT_SOCKET_URL" => cli.socket_url.clone(),
        "CHAT_API_URL" => cli.api_url.clone(),
        _ => std::env::var(key).ok(),
    })?;
    let credential = credential(&cli, &config)?;

    match cli.command {
        Command::List => run_list(&config, credential, &cli.user_id).await,
        Command::Watch(args) => run_watch(config, credential, cli.user_id, args).await,
        Command::Start { recipient } => {
            let session = connect(config, credential, cli.user_id).await?;
            let result = session.initialize_conversation(&recipient).await;
            session.teardown().await;
            println!("{}", result?.id);
            Ok(())
        }
        Command::Send(args) => {
            let session = connect(config, credential, cli.user_id).await?;
            let outgoing = OutgoingMessage {
                conversation_id: args.conversation_id,
                recipient_id: args.recipient_id,
                kind: args.kind.into(),
                content: args.content,
            };
            let result = session.send_message(outgoing).await;
            session.teardown().await;
            let message = result?;
            println!("sent at {}", message.created_at);
            Ok(())
        }
        Command::Seen { conversation_id, recipient_id } => {
            let session = connect(config, credential, cli.user_id.clone()).await?;
            let result = session.mark_as_seen(&conversation_id, &cli.user_id, &recipient_id).await;
            session.teardown().await;
            result?;
            println!("ok");
            Ok(())
        }
    }
}

fn credential(cli: &Cli, config: &SessionConfig) -> Result<Credential, CliError> {
    if let Some(token) = cli.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(Credential::new(token));
    }
    let Some(cookies) = cli.cookies.as_deref() else {
        return Err(CliError::MissingCredential);
    };
    Ok(Credential::from_cookies(&CookieJar::parse(cookies), &config.token_cookie)?)
}

async fn connect(config: SessionConfig, credential: Credential, user_id: String) -> Result<SessionHandle, CliError> {
    let timeout = config.ack_timeout;
    let session = SessionHandle::init(config, credential, user_id, Arc::new(gigchat::LogNotifier));
    if let Err(e) = session.wait_connected(timeout).await {
        session.teardown().await;
        return Err(e.into());
    }
    Ok(session)
}

async fn run_list(config: &SessionConfig, credential: Credential, user_id: &str) -> Result<(), CliError> {
    let api = ChatApi::new(reqwest::Client::new(), config.chat_list_url(), credential);
    let conversations = api.fetch_conversations().await?;
    for conversation in &conversations {
        let header = conversation.header(user_id);
        let preview = conversation
            .last_message()
            .map(|m| gigchat::dispatcher::truncate_preview(&m.content, config.preview_limit))
            .unwrap_or_default();
        println!("{}\t{}\t{}\t{}", conversation.id, header.title, conversation.unread_count(), preview);
    }
    Ok(())
}

async fn run_watch(
    config: SessionConfig,
    credential: Credential,
    user_id: String,
    args: WatchArgs,
) -> Result<(), CliError> {
    let (notifier, mut toasts) = ChannelNotifier::new();
    let session = SessionHandle::init(config, credential, user_id, Arc::new(notifier));
    session.set_messaging_surface(args.on_surface);
    let mut state = session.subscribe_state();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = %current, "session state");
                if current.is_connected() {
                    println!("connected: {} conversations", session.conversations().await.len());
                }
            }
            toast = toasts.recv() => {
                let Some(toast) = toast else { break };
                println!("[{}] {}: {}", toast.conversation_id, toast.title, toast.body);
            }
        }
    }

    session.teardown().await;
    Ok(())
}
