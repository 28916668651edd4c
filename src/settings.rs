use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::models::users::UserId;
use crate::services::withdrawals::PendingPolicy;

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Ledger {
    /// Decimal string, e.g. "1.0" for one percent.
    pub referral_percent: String,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub pending_policy: PendingPolicy,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Bot {
    pub username: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub ledger: Ledger,
    #[serde(default)]
    pub http: Http,
    pub bot: Bot,
    #[serde(default)]
    pub admins: Vec<UserId>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_currency() -> String {
    "USDT".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Settings {
    /// Loads `path`, then applies `REFLEDGER__SECTION__KEY` environment overrides.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("REFLEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("admins")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;

        config.try_deserialize()
    }
}
