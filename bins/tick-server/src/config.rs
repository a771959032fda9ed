use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use tick_api::{RateConfig, WireFormat};
use tick_engine::EngineSettings;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "tick-server", about = "Rate-controlled event broadcast server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broadcast server
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file; built-in defaults when omitted
    #[arg(long, env = "TICK_CONFIG")]
    pub config: Option<String>,

    /// HTTP + WebSocket port, overrides `api_port`
    #[arg(long)]
    pub port: Option<u16>,

    /// Initial target rate in messages/s, overrides `engine.target_rate`
    #[arg(long)]
    pub rate: Option<i64>,

    /// Initial wire format (text|binary), overrides `engine.format`
    #[arg(long)]
    pub format: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  TOML config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_target_rate")]
    pub target_rate: i64,
    #[serde(default)]
    pub format: WireFormat,
    #[serde(default)]
    pub ramp_enabled: bool,
    #[serde(default = "default_ramp_percent")]
    pub ramp_percent: f64,
    #[serde(default = "default_ramp_interval_seconds")]
    pub ramp_interval_seconds: u64,
    /// Subscriber stats older than this are reported as disconnected.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Lifetime of a cached encoding in microseconds, 0 disables the cache.
    #[serde(default = "default_encode_cache_us")]
    pub encode_cache_us: u64,
    /// Give every message its own event and timestamp. Changes the default
    /// behaviour where messages sent within one cache window share an event.
    #[serde(default)]
    pub unique_timestamps: bool,
    /// Fixed generator seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_rate: default_target_rate(),
            format: WireFormat::default(),
            ramp_enabled: false,
            ramp_percent: default_ramp_percent(),
            ramp_interval_seconds: default_ramp_interval_seconds(),
            stale_after_secs: default_stale_after_secs(),
            encode_cache_us: default_encode_cache_us(),
            unique_timestamps: false,
            seed: None,
        }
    }
}

fn default_api_port() -> u16 {
    9300
}
fn default_target_rate() -> i64 {
    RateConfig::default().target_rate
}
fn default_ramp_percent() -> f64 {
    RateConfig::default().ramp_percent
}
fn default_ramp_interval_seconds() -> u64 {
    RateConfig::default().ramp_interval_seconds
}
fn default_stale_after_secs() -> u64 {
    5
}
fn default_encode_cache_us() -> u64 {
    1_000
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|detail| ServerError::Config { context: "parse", detail: format!("'{path}': {detail}") })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply CLI overrides on top of the file values.
    pub fn with_overrides(mut self, args: &ServeArgs) -> Result<Self, ServerError> {
        if let Some(port) = args.port {
            self.api_port = port;
        }
        if let Some(rate) = args.rate {
            self.engine.target_rate = rate;
        }
        if let Some(format) = &args.format {
            self.engine.format = parse_format(format)?;
        }
        Ok(self)
    }
}

fn parse_format(value: &str) -> Result<WireFormat, ServerError> {
    match value.to_ascii_lowercase().as_str() {
        "text" | "json" => Ok(WireFormat::Text),
        "binary" => Ok(WireFormat::Binary),
        other => Err(ServerError::Config {
            context: "args",
            detail: format!("unknown format '{other}', expected text|binary"),
        }),
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        let encode_cache = if self.unique_timestamps || self.encode_cache_us == 0 {
            None
        } else {
            Some(Duration::from_micros(self.encode_cache_us))
        };

        EngineSettings {
            initial: RateConfig {
                target_rate: self.target_rate,
                ramp_enabled: self.ramp_enabled,
                ramp_percent: self.ramp_percent,
                ramp_interval_seconds: self.ramp_interval_seconds,
                format: self.format,
            },
            stale_after: Duration::from_secs(self.stale_after_secs),
            encode_cache,
            seed: self.seed,
            ..EngineSettings::default()
        }
    }
}
