use std::collections::HashSet;

use anyhow::Context;
use clap::{Parser, Subcommand};
use studio_chat_config::{load as load_config, AppConfig};
use studio_chat_runtime::{shutdown_signal, telemetry};
use studio_chat_sync::{
    ChatMessage, ChatSession, ConnectionState, ConnectionStatus, Identity, MessageType,
    MessagesApi, NewMessage, SenderType, SessionEvent, SyncSettings,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "studio-chat")]
#[command(about = "Terminal client for studio chat rooms")]
struct Cli {
    /// Participant side, "artist" or "client"
    #[arg(long, global = true)]
    sender_type: Option<String>,
    /// Artist or client id to send as
    #[arg(long, global = true)]
    sender_id: Option<String>,
    /// Base URL of the studio site
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a room and chat interactively
    Join {
        #[arg(long)]
        room: String,
    },
    /// Print the recent messages of a room
    History {
        #[arg(long)]
        room: String,
        /// Number of messages to fetch
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Send a single message without opening a live session
    Send {
        #[arg(long)]
        room: String,
        #[arg(long)]
        content: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing().context("failed to initialise tracing")?;
    let mut config = load_config().context("failed to load configuration")?;
    if let Some(base_url) = &cli.base_url {
        config.server.base_url = base_url.clone();
    }

    match &cli.command {
        Commands::Join { room } => run_join(&cli, &config, room).await,
        Commands::History { room, limit } => run_history(&config, room, *limit).await,
        Commands::Send { room, content } => run_send(&cli, &config, room, content).await,
    }
}

fn resolve_identity(cli: &Cli, config: &AppConfig) -> anyhow::Result<Identity> {
    let sender_type: SenderType = cli
        .sender_type
        .as_deref()
        .unwrap_or(&config.session.sender_type)
        .parse()
        .context("invalid sender type")?;

    let sender_id = cli
        .sender_id
        .clone()
        .or_else(|| config.session.sender_id.clone())
        .context("a sender id is required (--sender-id or session.sender_id)")?;

    Ok(Identity::new(sender_type, sender_id))
}

fn messages_api(config: &AppConfig) -> anyhow::Result<MessagesApi> {
    MessagesApi::from_config(&config.server).context("failed to build REST client")
}

async fn run_history(config: &AppConfig, room: &str, limit: Option<u32>) -> anyhow::Result<()> {
    let api = messages_api(config)?;
    let per_page = limit.unwrap_or(config.sync.poll_page_size);

    let mut messages = api
        .fetch_recent(room, per_page)
        .await
        .with_context(|| format!("failed to fetch messages for room {room}"))?;
    messages.sort_by_key(|message| message.created_at);

    if messages.is_empty() {
        println!("No messages in room {room}");
    }
    for message in &messages {
        print_message(message);
    }
    Ok(())
}

async fn run_send(cli: &Cli, config: &AppConfig, room: &str, content: &str) -> anyhow::Result<()> {
    let identity = resolve_identity(cli, config)?;
    let api = messages_api(config)?;

    let content = content.trim();
    anyhow::ensure!(!content.is_empty(), "message content is empty");

    let stored = api
        .post_message(&NewMessage {
            room_id: room.to_string(),
            sender_type: identity.sender_type,
            sender_id: identity.sender_id,
            content: content.to_string(),
            message_type: MessageType::Text,
        })
        .await
        .context("failed to send message")?;

    println!("Sent {}", stored.id);
    Ok(())
}

async fn run_join(cli: &Cli, config: &AppConfig, room: &str) -> anyhow::Result<()> {
    let identity = resolve_identity(cli, config)?;
    let api = messages_api(config)?;
    let settings = SyncSettings::from(&config.sync);

    info!(room, sender_type = %identity.sender_type, "joining room");
    let session = ChatSession::connect(room, identity, settings, api)
        .context("failed to start chat session")?;

    tokio::spawn(print_messages(session.subscribe_messages()));
    tokio::spawn(print_statuses(session.subscribe_status()));
    let mut events = session.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::SendTimedOut { draft } => {
                    println!("! not delivered, try again: {}", draft.content)
                }
                SessionEvent::RemoteError { message } => println!("! server: {message}"),
            }
        }
    });

    println!("Joined room {room}");
    println!("Type a message and press enter, or '/help' for commands");
    println!("---");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            () = &mut shutdown => break,
        };
        if bytes_read == 0 {
            break; // EOF
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => break,
            "/help" | "/h" => {
                println!("Available commands:");
                println!("  /typing, /t        - Tell the other side you are typing");
                println!("  /reconnect, /r     - Retry the live connection");
                println!("  /status, /s        - Show the connection status");
                println!("  /quit, /exit, /q   - Leave the room");
            }
            "/typing" | "/t" => session.notify_typing()?,
            "/reconnect" | "/r" => session.force_reconnect()?,
            "/status" | "/s" => {
                let state = session.connection_state();
                println!(
                    "status: {} (reconnect attempts: {})",
                    state.status, state.reconnect_attempts
                );
            }
            content => {
                if let Err(error) = session.send(content).await {
                    println!("! send failed: {error}");
                }
            }
        }
    }

    session.dispose().await;
    println!("Goodbye!");
    Ok(())
}

async fn print_messages(mut messages: watch::Receiver<Vec<ChatMessage>>) {
    let mut shown = HashSet::new();
    loop {
        let fresh: Vec<ChatMessage> = messages
            .borrow_and_update()
            .iter()
            .filter(|message| !message.is_temporary() && !shown.contains(&message.id))
            .cloned()
            .collect();
        for message in fresh {
            print_message(&message);
            shown.insert(message.id);
        }

        if messages.changed().await.is_err() {
            return;
        }
    }
}

async fn print_statuses(mut status: watch::Receiver<ConnectionState>) {
    let mut last = status.borrow_and_update().status;
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().status;
        if current != last {
            match current {
                ConnectionStatus::Polling => {
                    println!("~ live connection unavailable, checking for messages every few seconds (/reconnect to retry)")
                }
                other => println!("~ {other}"),
            }
            last = current;
        }
    }
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] {}: {}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.sender_type,
        message.content
    );
}
