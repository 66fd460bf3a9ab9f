use crate::issues::extract::RetryPolicy;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_RELATIVE_PATH: &str = ".faultline/config.toml";
pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_WORKSPACE: &str = "default";
const DEFAULT_DEADLINE_SECS: u64 = 60;
const DEFAULT_HOST_TIMEOUT_SECS: u64 = 15 * 60;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    pub workspace: String,
    pub ingest: IngestConfig,
    pub extract: ExtractConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub deadline_secs: u64,
    pub host_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
    pub ndjson: Option<PathBuf>,
}

impl Config {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.ingest.deadline_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.extract.retry_attempts,
            backoff: Duration::from_millis(self.extract.retry_backoff_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            workspace: DEFAULT_WORKSPACE.to_string(),
            ingest: IngestConfig {
                deadline_secs: DEFAULT_DEADLINE_SECS,
                host_timeout_secs: DEFAULT_HOST_TIMEOUT_SECS,
            },
            extract: ExtractConfig {
                retry_attempts: DEFAULT_RETRY_ATTEMPTS,
                retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            },
            store: StoreConfig {
                path: default_store_path(),
            },
            log: LogConfig {
                level: DEFAULT_LOG_LEVEL.to_string(),
                json: false,
                ndjson: None,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    version: Option<u32>,
    workspace: Option<String>,
    ingest: Option<RawIngestConfig>,
    extract: Option<RawExtractConfig>,
    store: Option<RawStoreConfig>,
    log: Option<RawLogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIngestConfig {
    deadline_secs: Option<u64>,
    host_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExtractConfig {
    retry_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStoreConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogConfig {
    level: Option<String>,
    json: Option<bool>,
    ndjson: Option<String>,
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workspace: Option<String>,
    pub state_db: Option<PathBuf>,
    pub deadline_secs: Option<u64>,
    pub log: Option<PathBuf>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(CONFIG_RELATIVE_PATH)
}

pub fn default_store_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("faultline").join("issues.db");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("faultline")
            .join("issues.db");
    }
    PathBuf::from(".faultline/issues.db")
}

/// Loads the config at `path`. A missing file at the default location yields
/// the defaults; a missing file given explicitly is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };
    if !path.exists() {
        if explicit {
            bail!("config file {} does not exist", path.display());
        }
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    let parsed: RawConfig =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    validate_config(parsed, &path)
}

pub fn apply_overrides(mut cfg: Config, overrides: Overrides) -> Result<Config> {
    if let Some(workspace) = sanitize_optional(overrides.workspace) {
        cfg.workspace = workspace;
    }
    if let Some(path) = overrides.state_db {
        cfg.store.path = path;
    }
    if let Some(secs) = overrides.deadline_secs {
        cfg.ingest.deadline_secs = secs;
        validate_deadline(&cfg.ingest, Path::new("--deadline-secs"))?;
    }
    if overrides.log.is_some() {
        cfg.log.ndjson = overrides.log;
    }
    Ok(cfg)
}

fn validate_config(raw: RawConfig, path: &Path) -> Result<Config> {
    let defaults = Config::default();

    let version = raw
        .version
        .ok_or_else(|| anyhow::anyhow!("{} missing required `version`", path.display()))?;
    if version != CONFIG_VERSION {
        bail!(
            "{} has unsupported version {version}; expected version = {CONFIG_VERSION}",
            path.display()
        );
    }

    let workspace = match raw.workspace {
        Some(ws) => sanitize_optional(Some(ws))
            .ok_or_else(|| anyhow::anyhow!("{} has empty `workspace`", path.display()))?,
        None => defaults.workspace,
    };

    let ingest = match raw.ingest {
        Some(ingest) => IngestConfig {
            deadline_secs: ingest.deadline_secs.unwrap_or(DEFAULT_DEADLINE_SECS),
            host_timeout_secs: ingest.host_timeout_secs.unwrap_or(DEFAULT_HOST_TIMEOUT_SECS),
        },
        None => defaults.ingest,
    };
    validate_deadline(&ingest, path)?;

    let extract = match raw.extract {
        Some(extract) => ExtractConfig {
            retry_attempts: extract.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            retry_backoff_ms: extract.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
        },
        None => defaults.extract,
    };
    if extract.retry_attempts == 0 {
        bail!("{} has `[extract].retry_attempts = 0`; expected at least 1", path.display());
    }

    let store = StoreConfig {
        path: raw
            .store
            .and_then(|s| sanitize_optional(s.path))
            .map(PathBuf::from)
            .unwrap_or(defaults.store.path),
    };

    let log = match raw.log {
        Some(log) => {
            let level = sanitize_optional(log.level).unwrap_or(defaults.log.level);
            validate_level(&level, path)?;
            LogConfig {
                level,
                json: log.json.unwrap_or(false),
                ndjson: sanitize_optional(log.ndjson).map(PathBuf::from),
            }
        }
        None => defaults.log,
    };

    Ok(Config {
        version,
        workspace,
        ingest,
        extract,
        store,
        log,
    })
}

fn validate_deadline(ingest: &IngestConfig, source: &Path) -> Result<()> {
    if ingest.deadline_secs == 0 {
        bail!("{}: deadline must be greater than zero", source.display());
    }
    if ingest.deadline_secs >= ingest.host_timeout_secs {
        bail!(
            "{}: deadline of {}s must be below the host timeout of {}s",
            source.display(),
            ingest.deadline_secs,
            ingest.host_timeout_secs
        );
    }
    Ok(())
}

fn validate_level(level: &str, path: &Path) -> Result<()> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
        other => bail!("{} has unknown `[log].level` '{other}'", path.display()),
    }
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
