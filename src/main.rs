//! Command line interface for the bot. Runs the Telegram inline bot or
//! renders a single note reference to stdout.

mod bolt11;
mod compose;
mod config;
mod engagement;
mod error;
mod event;
mod filter;
mod handlers;
mod metadata;
mod nip19;
mod query;
mod relay;
mod router;
mod telegram;

use std::{fs, path::Path, sync::Arc};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use config::{LogFormat, Settings};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    compose::Composer,
    handlers::NoteLookup,
    query::QueryAggregator,
    relay::RelayPool,
    router::{InlineQueryFilter, MessageFilter, Router},
    telegram::TelegramClient,
};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "notelens",
    author,
    version,
    about = "Telegram inline bot that previews Nostr notes",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the bot until interrupted.
    Serve,
    /// Render one note reference and print the title and body.
    Lookup {
        /// `note1…`, `nevent1…`, `nostr:…` or a hex event id.
        reference: String,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    init_logging(cfg.log_format);

    let pool = Arc::new(
        RelayPool::new(cfg.relays.clone(), cfg.tor_socks.clone(), cfg.verify_sig)
            .with_local_hints(cfg.allow_local_hints),
    );
    let aggregator = QueryAggregator::new(pool.clone(), cfg.query_timeout);
    let lookup = NoteLookup::new(aggregator, Composer::new(&cfg.link_base)?);
    match cli.command {
        Commands::Serve => serve(&cfg, &pool, lookup).await,
        Commands::Lookup { reference } => {
            let answer = lookup.render(&CancellationToken::new(), &reference).await?;
            println!("{}\n\n{}", answer.title, answer.body);
            Ok(())
        }
    }
}

async fn serve(cfg: &Settings, pool: &RelayPool, lookup: NoteLookup) -> anyhow::Result<()> {
    let token = cfg
        .telegram_token
        .as_deref()
        .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN is not set"))?;
    let reachable = pool.probe(cfg.query_timeout).await;
    info!(reachable, configured = pool.relays().len(), "relay pool ready");

    let client = TelegramClient::new(&cfg.telegram_api_url, token)?;
    let account = client.get_me().await.context("authorizing bot")?;
    info!(%account, "authorized on account");

    let mut router = Router::new(Arc::new(client), cfg.max_in_flight);
    router.on_inline_query(InlineQueryFilter::default(), move |ctx, query| {
        let lookup = lookup.clone();
        async move { lookup.handle_inline_query(ctx, query).await }
    });
    router.on_message(
        MessageFilter {
            text: Some("/start".into()),
        },
        handlers::handle_start,
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            trigger.cancel();
        }
    });
    info!("starting bot");
    router.serve(shutdown).await;
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // Already installed when `run` is called more than once in a process.
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str("TELEGRAM_BOT_TOKEN=\n");
    content.push_str(&format!("TELEGRAM_API_URL={}\n", config::DEFAULT_API_URL));
    content.push_str("RELAYS=wss://relay.damus.io,wss://nos.lol,wss://relay.nostr.band\n");
    content.push_str("TOR_SOCKS=\n");
    content.push_str("VERIFY_SIG=1\n");
    content.push_str("ALLOW_LOCAL_HINTS=0\n");
    content.push_str(&format!(
        "QUERY_TIMEOUT_SECS={}\n",
        config::DEFAULT_QUERY_TIMEOUT_SECS
    ));
    content.push_str(&format!("MAX_IN_FLIGHT={}\n", config::DEFAULT_MAX_IN_FLIGHT));
    content.push_str(&format!("LINK_BASE={}\n", config::DEFAULT_LINK_BASE));
    content.push_str("LOG_FORMAT=text\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
