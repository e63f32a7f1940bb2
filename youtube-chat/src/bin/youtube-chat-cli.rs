use clap::{Args, Parser, Subcommand};
use eyre::Context;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use youtube_chat_retrieval::credentials::{CredentialStore, Credentials};
use youtube_chat_retrieval::oauth::{ClientSecret, OAuthManager};
use youtube_chat_retrieval::retrieval::ChatMessageType;
use youtube_chat_retrieval::{
    ChatMessage, ChatRetrieval, ChatRetrievalConfig, MessageHandlerContext, YouTubeClient,
};

const DEFAULT_POLLING_INTERVAL_MS: u64 = 5000;

/// Follow a YouTube live chat from the terminal.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Where OAuth tokens are stored.
    #[arg(long, global = true, default_value = "tokens.json")]
    credentials: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Authorize access to your YouTube account and store the tokens.
    Auth(AuthArgs),
    /// Print messages from a live chat as they arrive.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
struct AuthArgs {
    /// The client_secret.json downloaded from the Google Cloud console.
    #[arg(long, default_value = "client_secret.json")]
    client_secret: PathBuf,
    /// Loopback port for the OAuth redirect; 0 picks a free one.
    #[arg(long, default_value_t = 0)]
    port: u16,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// The live chat to follow. Defaults to the chat of your active broadcast.
    #[arg(long)]
    chat_id: Option<String>,
    /// JSON file with a chat retrieval config; flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long)]
    max_results: Option<u32>,
    /// Consecutive retries of throttled requests before giving up.
    #[arg(long, conflicts_with = "unlimited_retries")]
    max_retries: Option<u32>,
    #[arg(long)]
    unlimited_retries: bool,
    #[arg(long)]
    retry_delay_ms: Option<u64>,
    /// Stop after this many seconds.
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Print each message as a line of JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = CredentialStore::new(cli.credentials);
    match cli.command {
        Command::Auth(args) => auth(&store, args).await,
        Command::Watch(args) => watch(&store, args).await,
    }
}

async fn auth(store: &CredentialStore, args: AuthArgs) -> eyre::Result<()> {
    let secret = ClientSecret::from_file(&args.client_secret).await?;
    let token = OAuthManager::new(secret)
        .with_port(args.port)
        .authenticate()
        .await
        .context("authorize user to YouTube")?;

    store
        .save(Credentials::from_token(&token))
        .await
        .context("store YouTube tokens")?;
    eprintln!("==> tokens saved to {}", store.path().display());
    Ok(())
}

async fn load_config(path: &Path) -> eyre::Result<ChatRetrievalConfig> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parse {}", path.display()))
}

async fn watch(store: &CredentialStore, args: WatchArgs) -> eyre::Result<()> {
    let credentials = store.load().await.context("load stored tokens")?;
    let Some(access_token) = credentials.access_token else {
        eyre::bail!(
            "no access token in {}; run `youtube-chat-cli auth` first",
            store.path().display()
        );
    };
    let client = YouTubeClient::new(access_token, reqwest::Client::new());

    let file_config = match &args.config {
        Some(path) => Some(load_config(path).await?),
        None => None,
    };

    let live_chat_id = match (&args.chat_id, &file_config) {
        (Some(id), _) => id.clone(),
        (None, Some(config)) => config.live_chat_id.clone(),
        (None, None) => client
            .active_live_chat_id()
            .await
            .context("look up active broadcast")?
            .ok_or_else(|| eyre::eyre!("no active broadcast with a live chat; pass --chat-id"))?,
    };

    let mut config = file_config.unwrap_or_else(|| {
        ChatRetrievalConfig::new(
            String::new(),
            Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
        )
    });
    config.live_chat_id = live_chat_id;
    if let Some(ms) = args.interval_ms {
        config.polling_interval_ms = ms;
    }
    if let Some(n) = args.max_results {
        config.max_results = n;
    }
    if args.unlimited_retries {
        config.max_retries = None;
    } else if let Some(n) = args.max_retries {
        config.max_retries = Some(n);
    }
    if let Some(ms) = args.retry_delay_ms {
        config.retry_delay_ms = ms;
    }

    let retrieval = ChatRetrieval::new(client);
    let json = args.json;
    retrieval.add_message_handler(
        move |messages: Arc<[ChatMessage]>, _: MessageHandlerContext| async move {
            for message in messages.iter() {
                if json {
                    println!(
                        "{}",
                        serde_json::to_string(message).context("serialize chat message")?
                    );
                } else {
                    println!("{}", render(message));
                }
            }
            Ok::<(), eyre::Report>(())
        },
    );

    let mut failures = retrieval.subscribe_failures();
    eprintln!("==> following live chat {}", config.live_chat_id);
    retrieval
        .start(config)
        .await
        .context("start chat retrieval")?;

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        r = tokio::signal::ctrl_c() => r.context("listen for ctrl-c"),
        () = deadline => Ok(()),
        failure = failures.recv() => match failure {
            Ok(error) => Err(eyre::Report::new(error)).context("chat retrieval stopped"),
            Err(e) => Err(e).context("failure channel closed"),
        },
    };

    retrieval.stop();
    let status = retrieval.status();
    eprintln!("==> {} messages received", status.total_messages);
    if let Some(at) = status.last_retrieval_time {
        eprintln!("    last retrieval at {at}");
    }
    outcome
}

fn render(message: &ChatMessage) -> String {
    let author = &message.author_details;
    let mut badges = String::new();
    if author.is_chat_owner {
        badges.push_str("[owner]");
    }
    if author.is_chat_moderator {
        badges.push_str("[mod]");
    }
    if author.is_chat_sponsor {
        badges.push_str("[member]");
    }
    if !badges.is_empty() {
        badges.push(' ');
    }

    let time = message.snippet.published_at.strftime("%H:%M:%S");
    let mut line = format!("{time} {badges}{}", author.display_name);
    match (&message.super_chat_details, message.snippet.message_type) {
        (Some(paid), _) => {
            line.push_str(&format!(" [{}]", paid.amount_display_string));
        }
        (None, ChatMessageType::TextMessage) => {}
        (None, other) => line.push_str(&format!(" <{other}>")),
    }
    if !message.snippet.display_message.is_empty() {
        line.push_str(": ");
        line.push_str(&message.snippet.display_message);
    }
    line
}
