use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "./relay.toml";

/// Command-line flags. Only flags actually given are serialized, so an
/// omitted flag never masks the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "relay-server", version, about = "WebSocket relay server")]
pub struct CliArgs {
    /// Port to listen on [default: 8080]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./relay.toml]
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Client id that receives job results [default: tv]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,

    /// Seconds between heartbeat probes [default: 30]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,

    /// Upper bound in seconds on a single scrape job [default: 120]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,

    /// Username used when a job request carries none (unset: such requests are rejected)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_username: Option<String>,

    /// Username scraped by POST /debug/job [default: instagram]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_username: Option<String>,

    /// Base URL of the profile statistics service [default: http://127.0.0.1:9000/profiles]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraper_url: Option<String>,
}

impl CliArgs {
    pub fn config_path(&self) -> &str {
        self.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)
    }
}

/// Relay server configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub receiver_id: String,
    pub heartbeat_interval_secs: u64,
    pub job_timeout_secs: u64,
    pub default_username: Option<String>,
    pub debug_username: String,
    pub scraper_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: DEFAULT_CONFIG_PATH.to_string(),
            json_logs: false,
            generate_config: false,
            receiver_id: "tv".to_string(),
            heartbeat_interval_secs: 30,
            job_timeout_secs: 120,
            default_username: None,
            debug_username: "instagram".to_string(),
            scraper_url: "http://127.0.0.1:9000/profiles".to_string(),
        }
    }
}

/// Configuration that parsed but cannot run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),
    #[error("{field} must be {requirement}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
    },
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        let file = Toml::file(cli.config_path());
        Self::from_figment(Self::layered(&cli, file))
    }

    fn layered(cli: &CliArgs, file: impl Provider) -> Figment {
        let defaults = Config {
            config: cli.config_path().to_string(),
            ..Config::default()
        };
        Figment::new()
            .merge(Serialized::defaults(defaults))
            .merge(file)
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receiver_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "receiver_id",
                requirement: "a non-empty client id",
            });
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeat_interval_secs",
                requirement: "greater than zero",
            });
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "job_timeout_secs",
                requirement: "greater than zero",
            });
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Routing ----

# Client id that receives every followers job result (default: "tv")
# receiver_id = "tv"

# Seconds between heartbeat probes; a silent client is evicted
# after at most two intervals (default: 30)
# heartbeat_interval_secs = 30

# ---- Followers jobs ----

# Upper bound in seconds on a single scrape (default: 120)
# job_timeout_secs = 120

# Username used when a job request carries none.
# Leave unset to reject such requests.
# default_username = "instagram"

# Username scraped by POST /debug/job (default: "instagram")
# debug_username = "instagram"

# Profile statistics service, queried as GET {scraper_url}/{username}
# scraper_url = "http://127.0.0.1:9000/profiles"
"#
    .to_string()
}
