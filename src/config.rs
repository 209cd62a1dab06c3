use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default = "default_profiles_path")]
    pub profiles_path: PathBuf,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    /// Bot token for live mode; `--bot-token` overrides it.
    #[serde(default)]
    pub bot_token: Option<String>,
}

/// One `[[sinks]]` entry. Type-specific keys are ignored by other sink types.
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,

    // console
    #[serde(default = "default_true")]
    pub pretty: bool,

    // http
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    // document store
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default, alias = "db")]
    pub database: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            enabled: true,
            pretty: true,
            url: None,
            method: default_method(),
            headers: HashMap::new(),
            timeout: default_timeout(),
            uri: None,
            database: None,
            collection: default_collection(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_dir")]
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Upper bound on concurrently dispatched records.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_cron")]
    pub cron: String,
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_collection() -> String {
    "messages".to_string()
}

fn default_profiles_path() -> PathBuf {
    PathBuf::from("profiles.json")
}

fn default_replay_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_max_in_flight() -> usize {
    64
}

fn default_drain_timeout() -> u64 {
    10
}

fn default_health_port() -> u16 {
    8080
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            directory: default_replay_dir(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_health_port(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            cron: default_heartbeat_cron(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            sinks: Vec::new(),
            profiles_path: default_profiles_path(),
            replay: ReplayConfig::default(),
            pipeline: PipelineConfig::default(),
            health: HealthConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Load the config file. A missing file is not fatal: defaults are used.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file '{}' not found. Using defaults (console output only).",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Health port, letting the `PORT` environment variable win.
    pub fn health_port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.health.port)
    }
}
