//! Config file and command line merging for the logtail binary
//!
//! The config file is optional and lives at `$CONFIG_DIR/logtail/config.toml`
//! unless `--config` points elsewhere. Command line flags always win.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use logtail_logs::{FileStore, LogLevel, StreamFilters, TailConfig};

use crate::Args;

/// Session name that keeps the cache in memory only
const EPHEMERAL_SESSION: &str = "none";

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSection,
    pub stream: StreamSection,
    pub buffer: BufferSection,
    pub cache: CacheSection,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSection {
    pub sources: Vec<String>,
    pub levels: Vec<String>,
    pub keyword: Option<String>,
    pub load_history: Option<bool>,
    pub history_tail: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferSection {
    pub capacity: Option<usize>,
    pub save_debounce_ms: Option<u64>,
    pub save_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSection {
    /// Parent directory of the per-session cache directories
    pub dir: Option<PathBuf>,
    pub session: Option<String>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("logtail").join("config.toml"))
    }

    /// Load `path`, or the default file if it exists
    ///
    /// An explicitly named file must exist; a missing default file is an
    /// empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Where the session cache lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Dir(PathBuf),
}

/// Fully resolved runtime settings
#[derive(Debug)]
pub struct Settings {
    pub url: String,
    pub tail: TailConfig,
    pub store: StoreLocation,
}

impl Settings {
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self> {
        let url = args
            .url
            .clone()
            .or(file.server.url)
            .context("no stream URL; pass --url or set [server] url in the config file")?;

        let defaults = TailConfig::default();
        let level_names = if args.level.is_empty() {
            file.stream.levels
        } else {
            args.level.clone()
        };
        let filters = StreamFilters {
            sources: if args.source.is_empty() {
                file.stream.sources
            } else {
                args.source.clone()
            },
            levels: parse_levels(&level_names)?,
            keyword: args.keyword.clone().or(file.stream.keyword),
        };

        let tail = TailConfig {
            token: args.token.clone().or(file.server.token),
            capacity: args
                .capacity
                .or(file.buffer.capacity)
                .unwrap_or(defaults.capacity),
            history_tail: file.stream.history_tail.unwrap_or(defaults.history_tail),
            load_history: !args.no_history
                && file.stream.load_history.unwrap_or(defaults.load_history),
            retry_delay_ms: file.stream.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
            max_reconnect_attempts: file.stream.max_reconnect_attempts,
            save_debounce_ms: file
                .buffer
                .save_debounce_ms
                .unwrap_or(defaults.save_debounce_ms),
            save_max_delay_ms: file
                .buffer
                .save_max_delay_ms
                .unwrap_or(defaults.save_max_delay_ms),
            filters,
        };

        let session = args
            .session
            .clone()
            .or(file.cache.session)
            .unwrap_or_else(|| "default".to_string());
        let store = if session == EPHEMERAL_SESSION {
            StoreLocation::Memory
        } else {
            if session.contains(['/', '\\']) || session == ".." {
                bail!("invalid session name '{session}'");
            }
            match args.cache_dir.clone().or(file.cache.dir) {
                Some(dir) => StoreLocation::Dir(dir.join(&session)),
                None => StoreLocation::Dir(FileStore::default_dir(&session)?),
            }
        };

        Ok(Self { url, tail, store })
    }
}

fn parse_levels(names: &[String]) -> Result<Vec<LogLevel>> {
    names
        .iter()
        .flat_map(|name| name.split(','))
        .filter(|name| !name.trim().is_empty())
        .map(|name| LogLevel::parse(name).with_context(|| format!("unknown log level '{name}'")))
        .collect()
}
