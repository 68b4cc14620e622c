use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use logtail_client::HttpTransport;
use logtail_logs::{FileStore, LogRecord, LogTail, MemoryStore, SessionState, SessionStore, Tab};

mod config;

use config::{FileConfig, Settings, StoreLocation};

/// Logtail - Follow a live log stream from the terminal
#[derive(Parser, Debug)]
#[command(name = "logtail")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Stream endpoint URL
    #[arg(long)]
    url: Option<String>,

    /// Access token sent with each connection
    #[arg(long, env = "LOGTAIL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Only stream these sources (repeatable)
    #[arg(long, value_name = "SOURCE")]
    source: Vec<String>,

    /// Only stream these levels (repeatable, comma separated)
    #[arg(long, value_name = "LEVEL")]
    level: Vec<String>,

    /// Only stream records containing this keyword
    #[arg(long)]
    keyword: Option<String>,

    /// Skip the one-time history backfill
    #[arg(long)]
    no_history: bool,

    /// Records kept per source
    #[arg(long)]
    capacity: Option<usize>,

    /// Directory holding session caches
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Session name; "none" keeps the cache in memory only
    #[arg(long)]
    session: Option<String>,

    /// Clear the session cache and exit
    #[arg(long)]
    clear: bool,

    /// Write the cached session transcript to FILE and exit
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Config file (default: $CONFIG_DIR/logtail/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    // Diagnostics go to stderr; stdout carries records only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let file = FileConfig::load(args.config.as_deref())?;
    let settings = Settings::resolve(&args, file)?;

    let store: Arc<dyn SessionStore> = match &settings.store {
        StoreLocation::Memory => Arc::new(MemoryStore::new()),
        StoreLocation::Dir(dir) => Arc::new(FileStore::new(dir)),
    };
    let transport =
        HttpTransport::new(settings.url.clone()).context("failed to build HTTP client")?;

    if args.clear {
        let tail = LogTail::open_stopped(transport, store, settings.tail);
        tail.clear().await?;
        tail.shutdown().await;
        eprintln!("Session cache cleared");
        return Ok(());
    }

    if let Some(path) = &args.export {
        let tail = LogTail::open_stopped(transport, store, settings.tail);
        let count = tail.len(&Tab::All);
        std::fs::write(path, tail.export_text())
            .with_context(|| format!("failed to write {}", path.display()))?;
        tail.shutdown().await;
        eprintln!("Exported {} records to {}", count, path.display());
        return Ok(());
    }

    follow(transport, store, settings).await
}

/// Print restored records, then every new record until ctrl-c or the
/// session gives up
async fn follow(
    transport: HttpTransport,
    store: Arc<dyn SessionStore>,
    settings: Settings,
) -> Result<()> {
    info!(url = %settings.url, "following log stream");
    let tail = LogTail::open(transport, store, settings.tail);
    let mut records = tail.subscribe();
    let mut state = tail.watch_state();

    for record in tail.view(&Tab::All, &[], None).iter().rev() {
        println!("{}", format_record(record));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            record = records.recv() => match record {
                Ok(record) => println!("{}", format_record(&record)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind the stream"),
                Err(RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SessionState::Closed {
                    break;
                }
            }
        }
    }

    // Records posted right before the session closed
    while let Ok(record) = records.try_recv() {
        println!("{}", format_record(&record));
    }

    tail.shutdown().await;
    Ok(())
}

fn format_record(record: &LogRecord) -> String {
    let level = record.level.map_or(record.kind.label(), |l| l.as_str());
    format!(
        "{} {:<8} [{}] {}",
        record.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        level,
        record.source,
        record.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logtail_logs::{LogLevel, RecordKind};

    #[test]
    fn test_format_record_pads_level() {
        let mut record = LogRecord::new(RecordKind::Entry, "api.log", "ready", Utc::now());
        record.level = Some(LogLevel::Info);
        let line = format_record(&record);
        assert!(line.ends_with("INFO     [api.log] ready"), "{line}");
    }

    #[test]
    fn test_format_record_without_level_uses_kind() {
        let record = LogRecord::new(RecordKind::Entry, "api.log", "plain", Utc::now());
        assert!(format_record(&record).contains("LOG      [api.log] plain"));
    }
}
