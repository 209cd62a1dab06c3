mod cli;
mod config;
mod filter;
mod health;
mod pipeline;
mod profile;
mod range;
mod record;
mod scheduler;
mod shutdown;
mod sinks;
mod source;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::config::Config;
use crate::filter::MessageFilter;
use crate::pipeline::Pipeline;
use crate::profile::ProfileSet;
use crate::scheduler::{tasks, Scheduler};
use crate::sinks::SinkDispatcher;
use crate::source::replay::ReplaySource;
use crate::source::telegram::TelegramSource;
use crate::source::{EventSource, ListenScope};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Diagnostics on stderr; stdout carries records only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if cli.debug {
                    "warn,telebridge=debug".into()
                } else {
                    "warn".into()
                }
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    let filter = MessageFilter::new(&cli.filter_options())?;

    let bot_token = cli
        .bot_token
        .clone()
        .or_else(|| config.telegram.bot_token.clone());
    let scope = cli.listen_scope(bot_token.is_some());
    if cli.chat.is_none() && scope.is_none() {
        bail!("Nothing to do: pass --chat to fetch history or a --listen mode with a bot token");
    }

    let profiles = Arc::new(ProfileSet::load(&config.profiles_path));
    let dispatcher = Arc::new(SinkDispatcher::new().initialize_all(&config.sinks).await);

    let cancel = shutdown::install_signal_handler();
    let health = if config.health.enabled || cli.health {
        let listener = health::bind(config.health_port()).await?;
        Some(tokio::spawn(health::serve(listener, cancel.clone())))
    } else {
        None
    };

    let pipeline = Pipeline::new(
        filter,
        profiles,
        &cli.profile,
        Arc::clone(&dispatcher),
        config.pipeline.max_in_flight,
    );

    let result = run(&cli, &config, &pipeline, scope, bot_token, &cancel).await;

    pipeline
        .drain(Duration::from_secs(config.pipeline.drain_timeout_secs))
        .await;
    dispatcher.shutdown().await;

    cancel.cancel();
    if let Some(handle) = health {
        match handle.await {
            Ok(Err(e)) => error!("{:#}", e),
            Err(e) => error!("Health server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    result
}

async fn run(
    cli: &Cli,
    config: &Config,
    pipeline: &Pipeline,
    scope: Option<ListenScope>,
    bot_token: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Some(chat) = &cli.chat {
        let source = ReplaySource::new(&config.replay.directory);
        let range = range::resolve(&cli.range_request());

        tokio::select! {
            summary = pipeline.run_fetch(&source, chat, &range) => {
                if summary?.kept == 0 {
                    println!("[]");
                }
            }
            _ = cancel.cancelled() => {
                warn!("Fetch interrupted");
                return Ok(());
            }
        }
    }

    let Some(scope) = scope else {
        return Ok(());
    };
    let token = bot_token
        .context("Live mode needs a bot token (--bot-token or [telegram] bot_token)")?;
    run_live(config, pipeline, scope, &token, cancel).await
}

async fn run_live(
    config: &Config,
    pipeline: &Pipeline,
    scope: ListenScope,
    token: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut scheduler = Scheduler::new().await?;
    tasks::register_heartbeat(&scheduler, &config.heartbeat.cron, pipeline.stats()).await?;
    scheduler.start().await?;

    let (events_tx, events_rx) = mpsc::channel(config.pipeline.max_in_flight.max(1));
    let source = TelegramSource::new(token);
    let listener = tokio::spawn({
        let cancel = cancel.clone();
        async move { source.listen(scope, events_tx, cancel).await }
    });

    info!("Listening for live events. Press Ctrl+C to stop.");
    pipeline.run_live(events_rx, cancel.clone()).await;

    // The pipeline only stops early when the listener has gone away.
    cancel.cancel();
    let outcome = match listener.await {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("Listener task failed: {}", e)),
    };

    if let Err(e) = scheduler.shutdown().await {
        warn!("{:#}", e);
    }
    outcome
}
