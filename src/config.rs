// Configuration management for the grid executor

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::side::Side;
use crate::core::types::InstrumentMeta;

/// Loop timing and engine-wide knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_symbol_delay_ms")]
    pub symbol_delay_ms: u64, // pause between symbols
    #[serde(default = "default_post_cancel_delay_ms")]
    pub post_cancel_delay_ms: u64,
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    #[serde(default = "default_idle_sweep_delay_ms")]
    pub idle_sweep_delay_ms: u64,
    #[serde(default = "default_status_check_interval_secs")]
    pub status_check_interval_secs: u64,
    #[serde(default = "default_resume_cooldown_secs")]
    pub resume_cooldown_secs: u64,
    #[serde(default = "default_fill_settle_secs")]
    pub fill_settle_secs: u64, // no regrid right after a fill
    #[serde(default = "default_layer_cooldown_secs")]
    pub layer_cooldown_secs: u64,
    #[serde(default = "default_max_level_shifts")]
    pub max_level_shifts: u32,
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_symbol_delay_ms() -> u64 { 3000 }
fn default_post_cancel_delay_ms() -> u64 { 500 }
fn default_error_cooldown_secs() -> u64 { 60 }
fn default_idle_sweep_delay_ms() -> u64 { 1000 }
fn default_status_check_interval_secs() -> u64 { 100 }
fn default_resume_cooldown_secs() -> u64 { 5 }
fn default_fill_settle_secs() -> u64 { 10 }
fn default_layer_cooldown_secs() -> u64 { 10 }
fn default_max_level_shifts() -> u32 { 50 }
fn default_commission_rate() -> f64 { 0.00035 }
fn default_state_dir() -> String { "data/state".to_string() }
fn default_db_path() -> String { "data/trades.db".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol_delay_ms: default_symbol_delay_ms(),
            post_cancel_delay_ms: default_post_cancel_delay_ms(),
            error_cooldown_secs: default_error_cooldown_secs(),
            idle_sweep_delay_ms: default_idle_sweep_delay_ms(),
            status_check_interval_secs: default_status_check_interval_secs(),
            resume_cooldown_secs: default_resume_cooldown_secs(),
            fill_settle_secs: default_fill_settle_secs(),
            layer_cooldown_secs: default_layer_cooldown_secs(),
            max_level_shifts: default_max_level_shifts(),
            commission_rate: default_commission_rate(),
            state_dir: default_state_dir(),
            db_path: default_db_path(),
        }
    }
}

impl EngineConfig {
    pub fn symbol_delay(&self) -> Duration {
        Duration::from_millis(self.symbol_delay_ms)
    }

    pub fn post_cancel_delay(&self) -> Duration {
        Duration::from_millis(self.post_cancel_delay_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn idle_sweep_delay(&self) -> Duration {
        Duration::from_millis(self.idle_sweep_delay_ms)
    }

    /// Zeroed delays for tests and single-shot runs
    pub fn without_delays(mut self) -> Self {
        self.symbol_delay_ms = 0;
        self.post_cancel_delay_ms = 0;
        self.error_cooldown_secs = 0;
        self.idle_sweep_delay_ms = 0;
        self
    }
}

/// One pre-halt window in venue local time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionWindowConfig {
    #[serde(with = "clock_time")]
    pub snapshot_from: NaiveTime,
    #[serde(with = "clock_time")]
    pub snapshot_until: NaiveTime,
    /// Restore on the following day when earlier than `snapshot_from`
    #[serde(with = "clock_time")]
    pub restore_at: NaiveTime,
}

impl SessionWindowConfig {
    fn at(from: (u32, u32), until: (u32, u32), restore: (u32, u32)) -> Self {
        let time = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            snapshot_from: time(from),
            snapshot_until: time(until),
            restore_at: time(restore),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_midday_window")]
    pub midday: SessionWindowConfig,
    #[serde(default = "default_evening_window")]
    pub evening: SessionWindowConfig,
    #[serde(default = "default_overnight_window")]
    pub overnight: SessionWindowConfig,
}

fn default_utc_offset_hours() -> i32 { 3 }
fn default_midday_window() -> SessionWindowConfig { SessionWindowConfig::at((13, 57), (14, 0), (14, 5)) }
fn default_evening_window() -> SessionWindowConfig { SessionWindowConfig::at((18, 42), (18, 45), (19, 0)) }
fn default_overnight_window() -> SessionWindowConfig { SessionWindowConfig::at((23, 43), (23, 45), (9, 3)) }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            midday: default_midday_window(),
            evening: default_evening_window(),
            overnight: default_overnight_window(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Paper, // in-memory venue, no network
    Http,  // adapter gateway over HTTP/JSON
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Starting prices for the paper venue
    #[serde(default, alias = "initial_prices")]
    pub paper_prices: BTreeMap<String, f64>,
}

fn default_broker_kind() -> BrokerKind { BrokerKind::Paper }
fn default_base_url() -> String { "http://127.0.0.1:8080".to_string() }
fn default_timeout_secs() -> u64 { 15 }
fn default_max_retries() -> u32 { 5 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_max_delay_ms() -> u64 { 16000 }

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            base_url: default_base_url(),
            api_token: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            paper_prices: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Per-symbol strategy, authored by the operator.
///
/// Legacy field names (`TP`, `quantity_orders`, `enable = "ON"`) are accepted
/// and mapped onto the canonical names at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Venue ticker; defaults to the table key
    #[serde(default, alias = "symbol")]
    pub ticker: String,
    pub side: Side,
    #[serde(default)]
    pub market: String,
    pub size: u64,
    pub step_orders: f64,
    #[serde(alias = "quantity_orders")]
    pub grid_level_count: u32,
    #[serde(alias = "TP", alias = "tp")]
    pub take_profit: f64,
    /// Recorded only, never acted upon
    #[serde(default, deserialize_with = "optional_number", skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, deserialize_with = "optional_number", skip_serializing_if = "Option::is_none")]
    pub sell_trigger: Option<f64>,
    #[serde(default, alias = "ceiling", deserialize_with = "optional_lots", skip_serializing_if = "Option::is_none")]
    pub portfolio_limit: Option<u64>,
    #[serde(default, alias = "enable", deserialize_with = "on_off")]
    pub enabled: bool,
}

impl StrategyConfig {
    /// Positive sell-trigger threshold, if any
    pub fn sell_trigger_threshold(&self) -> Option<f64> {
        self.sell_trigger.filter(|t| *t > 0.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) => {
            let s = s.trim().replace(',', ".");
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

fn optional_lots<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = optional_number(deserializer)?;
    Ok(value.filter(|v| *v >= 1.0).map(|v| v as u64))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn on_off<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
            "ON" | "TRUE" | "YES" | "1" => Ok(true),
            "OFF" | "FALSE" | "NO" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("expected ON or OFF, got {}", other))),
        },
    }
}

mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub instruments: BTreeMap<String, InstrumentMeta>,
    #[serde(default)]
    pub symbols: BTreeMap<String, StrategyConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse, normalise and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            tracing::info!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    pub fn instrument(&self, ticker: &str) -> Option<&InstrumentMeta> {
        self.instruments.get(ticker)
    }

    /// Enabled symbols in a stable order
    pub fn enabled_symbols(&self) -> impl Iterator<Item = (&String, &StrategyConfig)> {
        self.symbols.iter().filter(|(_, s)| s.enabled)
    }

    fn normalize(&mut self) {
        for (key, strategy) in self.symbols.iter_mut() {
            if strategy.ticker.trim().is_empty() {
                strategy.ticker = key.clone();
            }
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if !(-12..=14).contains(&self.session.utc_offset_hours) {
            return Err(ConfigError::Validation(
                "session.utc_offset_hours must be between -12 and 14".to_string(),
            ));
        }

        if self.engine.commission_rate < 0.0 {
            return Err(ConfigError::Validation("commission_rate must be non-negative".to_string()));
        }

        if self.engine.max_level_shifts == 0 {
            return Err(ConfigError::Validation("max_level_shifts must be greater than 0".to_string()));
        }

        for (ticker, meta) in &self.instruments {
            if meta.price_step <= 0.0 {
                return Err(ConfigError::Validation(format!("{}: price_step must be positive", ticker)));
            }
            if meta.lot_size == 0 {
                return Err(ConfigError::Validation(format!("{}: lot_size must be greater than 0", ticker)));
            }
        }

        for (symbol, strategy) in self.enabled_symbols() {
            let invalid = |msg: &str| ConfigError::Validation(format!("{}: {}", symbol, msg));

            if strategy.size == 0 {
                return Err(invalid("size must be greater than 0"));
            }
            if strategy.grid_level_count == 0 {
                return Err(invalid("grid_level_count must be greater than 0"));
            }
            if strategy.step_orders <= 0.0 {
                return Err(invalid("step_orders must be positive"));
            }
            if strategy.take_profit <= 0.0 {
                return Err(invalid("take_profit must be positive"));
            }

            let meta = self
                .instrument(&strategy.ticker)
                .ok_or_else(|| invalid(&format!("no [instruments.{}] table", strategy.ticker)))?;

            // Adjacent ladder levels must not collide in the price-level guard
            if strategy.step_orders <= meta.price_step {
                return Err(invalid("step_orders must exceed the instrument price_step"));
            }
            if strategy.take_profit <= meta.price_step {
                return Err(invalid("take_profit must exceed the instrument price_step"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[instruments.SBER]
instrument_id = "BBG004730N88"
price_step = 0.01
lot_size = 10
decimals = 2

[symbols.SBER]
side = "long"
size = 1
step_orders = 1.0
grid_level_count = 3
take_profit = 2.0
portfolio_limit = 5
enabled = true
"#;

    #[test]
    fn test_defaults_filled_in() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.status_check_interval_secs, 100);
        assert_eq!(config.session.utc_offset_hours, 3);
        assert_eq!(config.broker.kind, BrokerKind::Paper);
        let sber = &config.symbols["SBER"];
        assert_eq!(sber.ticker, "SBER");
        assert_eq!(sber.portfolio_limit, Some(5));
        assert!(sber.enabled);
    }

    #[test]
    fn test_legacy_field_names() {
        let text = r#"
[instruments.GAZP]
instrument_id = "BBG004730RP0"
price_step = 0.01
lot_size = 10
decimals = 2

[symbols.GAZP]
side = "SHORT"
size = 2
step_orders = 0.5
quantity_orders = 4
TP = 1.5
sell_trigger = ""
portfolio_limit = 0
enable = "ON"
"#;
        let config = Config::from_toml_str(text).unwrap();
        let gazp = &config.symbols["GAZP"];
        assert_eq!(gazp.side, Side::Short);
        assert_eq!(gazp.grid_level_count, 4);
        assert_eq!(gazp.take_profit, 1.5);
        assert_eq!(gazp.sell_trigger, None);
        assert_eq!(gazp.portfolio_limit, None);
        assert!(gazp.enabled);
    }

    #[test]
    fn test_missing_instrument_rejected() {
        let text = r#"
[symbols.LKOH]
side = "long"
size = 1
step_orders = 1.0
grid_level_count = 3
take_profit = 2.0
enabled = true
"#;
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_disabled_symbol_skips_validation() {
        let text = r#"
[symbols.LKOH]
side = "long"
size = 0
step_orders = 1.0
grid_level_count = 3
take_profit = 2.0
enable = "OFF"
"#;
        let config = Config::from_toml_str(text).unwrap();
        assert!(!config.symbols["LKOH"].enabled);
    }

    #[test]
    fn test_step_must_exceed_tick() {
        let text = SAMPLE.replace("step_orders = 1.0", "step_orders = 0.01");
        assert!(Config::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_window_times_parse() {
        let text = format!(
            "{}\n[session.midday]\nsnapshot_from = \"12:00\"\nsnapshot_until = \"12:05\"\nrestore_at = \"12:30\"\n",
            SAMPLE
        );
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(config.session.midday.snapshot_from, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(config.session.overnight.restore_at, NaiveTime::from_hms_opt(9, 3, 0).unwrap());
    }
}
