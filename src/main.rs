//! threadrelay binary entry point.

use std::io::Write;

use clap::Parser;
use threadrelay::cli::{ChatArgs, Cli, Commands, ServeArgs};
use threadrelay::client::{ChatClient, ChatStatus};
use threadrelay::server::{self, AppState};
use threadrelay::thread::{FileThreadIdStorage, Principal, ThreadId};
use threadrelay::types::UiPart;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "threadrelay=info";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => handle_serve(args).await,
        Commands::Chat(args) => handle_chat(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn handle_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(args.log_json);
    let config = args.load_config()?;
    if config.api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY is not set; every run will fail with an agent-unavailable error");
    }
    server::serve(AppState::from_config(config)?).await?;
    Ok(())
}

async fn handle_chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(false);

    let principal = match &args.user {
        Some(user) => Principal::Authenticated(user.clone()),
        None => Principal::Anonymous,
    };
    let mut client = match args.thread.as_deref().and_then(ThreadId::parse) {
        Some(thread_id) => ChatClient::new(&args.url, thread_id),
        None => ChatClient::from_storage(&args.url, &FileThreadIdStorage::new_default(), &principal)?,
    };
    if let Some(user) = &args.user {
        client = client.with_user_id(user.clone());
    }

    let mut printed = 0usize;
    let mut stdout = std::io::stdout();
    let status = client
        .send_with(&args.prompt, |transcript| {
            let Some(message) = transcript.active_message() else {
                return;
            };
            let text = message.text_content();
            if text.len() > printed {
                let _ = write!(stdout, "{}", &text[printed..]);
                let _ = stdout.flush();
                printed = text.len();
            }
        })
        .await?;
    println!();

    if let Some(message) = client.transcript().messages().last() {
        for part in &message.parts {
            if let UiPart::Tool {
                tool_name, state, ..
            } = part
            {
                eprintln!("[{tool_name}: {state}]");
            }
        }
    }

    match status {
        ChatStatus::Ready => Ok(()),
        ChatStatus::Truncated => Err("response stream ended before completion".into()),
        ChatStatus::Failed { error } => Err(error.into()),
        ChatStatus::Streaming => Err("response stream still open".into()),
    }
}
