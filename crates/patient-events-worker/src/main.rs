use std::{env, sync::Arc};

use anyhow::Context;
use patient_events_worker::config::loader::load_config;
use patient_events_core::DeletionNotice;
use patient_events_worker::feed::{ChangeFeedSender, DeletionQueue, DeletionSender, InMemoryChangeFeed};
use patient_events_worker::{PipelineBuilder, observability};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From PATIENT_EVENTS_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (patient-events.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (PATIENT_EVENTS_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let (config_path, source) = resolve_config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    observability::init_tracing(&cfg.logging);

    tracing::info!(
        path = %config_path,
        source = %source,
        level = %cfg.logging.level,
        "Configuration loaded"
    );

    let feed_capacity = cfg.processor.feed_capacity;
    let pipeline = match PipelineBuilder::new(cfg).build() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Pipeline initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    let (feed_sender, feed) =
        InMemoryChangeFeed::channel(feed_capacity, pipeline.stores.checkpoints.clone());

    let (deletion_sender, deletions) = DeletionQueue::channel(feed_capacity);

    let cancel = CancellationToken::new();
    let mut tasks = pipeline.spawn(Arc::new(feed), deletions, cancel.clone());

    if let Some(path) = resolve_feed_path() {
        let sender = feed_sender.clone();
        tokio::spawn(async move {
            if let Err(e) = seed_feed(&path, &sender).await {
                tracing::error!(path = %path, error = %format!("{e:#}"), "Failed to seed change feed");
            }
        });
    }

    if let Some(path) = flag_value("--deletions") {
        let sender = deletion_sender.clone();
        tokio::spawn(async move {
            if let Err(e) = seed_deletions(&path, &sender).await {
                tracing::error!(path = %path, error = %format!("{e:#}"), "Failed to queue deletions");
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received, stopping pipeline");
    cancel.cancel();
    drop(feed_sender);
    drop(deletion_sender);

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Pipeline task panicked");
        }
    }

    tracing::info!("Pipeline stopped");
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: PATIENT_EVENTS_CONFIG
/// 3. Default: patient-events.toml
fn resolve_config_path() -> (String, ConfigSource) {
    if let Some(path) = flag_value("--config") {
        return (path, ConfigSource::CliArgument);
    }

    if let Ok(path) = env::var("PATIENT_EVENTS_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (
        patient_events_worker::config::DEFAULT_CONFIG_PATH.to_string(),
        ConfigSource::Default,
    )
}

fn resolve_feed_path() -> Option<String> {
    flag_value("--feed")
}

fn flag_value(flag: &str) -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

/// Push every document of a JSONL file into the feed.
///
/// Blank lines are ignored; lines that are not JSON are logged and skipped.
async fn seed_feed(path: &str, sender: &ChangeFeedSender) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {path}"))?;

    let mut documents = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                tracing::warn!(path = %path, line = index + 1, error = %e, "Skipping malformed feed line");
            }
        }
    }

    let count = documents.len();
    let batches = sender
        .push_documents(documents)
        .await
        .context("change feed closed before seeding finished")?;

    tracing::info!(path = %path, documents = count, batches, "Change feed seeded");
    Ok(())
}

/// Queue every deletion notice of a JSONL file.
async fn seed_deletions(path: &str, sender: &DeletionSender) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {path}"))?;

    let mut queued = 0usize;
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DeletionNotice>(line) {
            Ok(notice) => {
                sender
                    .send(notice)
                    .await
                    .context("deletion queue closed before seeding finished")?;
                queued += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path, line = index + 1, error = %e, "Skipping malformed deletion line");
            }
        }
    }

    tracing::info!(path = %path, deletions = queued, "Deletions queued");
    Ok(())
}
