//! Typed application config.
//!
//! ```yaml
//! connection:
//!   host: "127.0.0.1"
//!   port: 7497
//!   client_id: 0
//!   account_env: "TBOT_ACCOUNT"
//! bots:
//!   - symbol: "AAPL"
//!     max_dollar_amount: 10000
//!     max_risk_dollar_amount: 100
//!     profit_target: 0.50
//!     stop_distance: 0.25
//! recorder:
//!   enabled: true
//!   dir: "log"
//! paper:
//!   fill_price: 100.0
//! ```
//!
//! Every field except `bots[].symbol` has a default. `TBOT_HOST`,
//! `TBOT_PORT` and `TBOT_CLIENT_ID` override the connection section.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENV_HOST: &str = "TBOT_HOST";
pub const ENV_PORT: &str = "TBOT_PORT";
pub const ENV_CLIENT_ID: &str = "TBOT_CLIENT_ID";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub bots: Vec<BotConfig>,
    pub recorder: RecorderConfig,
    pub paper: PaperConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    /// Name of the env var holding the trading account id.
    pub account_env: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 0,
            account_env: "TBOT_ACCOUNT".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    pub symbol: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Fixed lot count; when absent the dollar/risk caps size the position.
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default = "default_max_dollar_amount")]
    pub max_dollar_amount: f64,
    #[serde(default = "default_max_risk_dollar_amount")]
    pub max_risk_dollar_amount: f64,
    #[serde(default = "default_profit_target")]
    pub profit_target: f64,
    #[serde(default = "default_stop_distance")]
    pub stop_distance: f64,
    #[serde(default)]
    pub enforce_regular_hours: bool,
    /// Minutes cut off the end of the regular session.
    #[serde(default)]
    pub end_offset_minutes: u32,
    /// Skip entries within this distance of the day's high.
    #[serde(default)]
    pub daily_high_delta: Option<f64>,
    #[serde(default)]
    pub min_tick: Option<f64>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_exchange() -> String {
    "SMART".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_dollar_amount() -> f64 {
    10_000.0
}

fn default_max_risk_dollar_amount() -> f64 {
    100.0
}

fn default_profit_target() -> f64 {
    0.5
}

fn default_stop_distance() -> f64 {
    0.25
}

fn default_tick_interval_ms() -> u64 {
    500
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub dir: String,
    pub deep_book: bool,
    pub depth_exchange: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "log".to_string(),
            deep_book: true,
            depth_exchange: "ISLAND".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaperConfig {
    /// Quote for every symbol until moved.
    pub fill_price: Option<f64>,
    pub commission_per_share: f64,
}

impl AppConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let app: AppConfig = serde_json::from_value(config_json.clone())
            .context("config does not match the application schema")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            bail!("CONFIG_INVALID connection.host is empty");
        }
        let mut seen = std::collections::BTreeSet::new();
        for (i, bot) in self.bots.iter().enumerate() {
            if bot.symbol.trim().is_empty() {
                bail!("CONFIG_INVALID bots[{i}].symbol is empty");
            }
            if !seen.insert(bot.symbol.as_str()) {
                bail!("CONFIG_INVALID bots[{i}].symbol '{}' configured twice", bot.symbol);
            }
            if matches!(bot.quantity, Some(q) if q <= 0) {
                bail!("CONFIG_INVALID bots[{i}].quantity must be positive");
            }
            if bot.profit_target <= 0.0 || bot.stop_distance <= 0.0 {
                bail!("CONFIG_INVALID bots[{i}] profit_target and stop_distance must be positive");
            }
            if matches!(bot.min_tick, Some(t) if t <= 0.0) {
                bail!("CONFIG_INVALID bots[{i}].min_tick must be positive");
            }
        }
        if matches!(self.paper.fill_price, Some(p) if p <= 0.0) {
            bail!("CONFIG_INVALID paper.fill_price must be positive");
        }
        Ok(())
    }

    /// Applies `TBOT_HOST` / `TBOT_PORT` / `TBOT_CLIENT_ID` from `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.connection.host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.connection.port = port
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT}='{port}' is not a port number"))?;
        }
        if let Some(id) = lookup(ENV_CLIENT_ID) {
            self.connection.client_id = id
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CLIENT_ID}='{id}' is not an integer"))?;
        }
        Ok(())
    }
}
