//! Marketplace Configuration
//!
//! Loaded from an optional config file, `config/default`, `config/local` and
//! `AGENTBOND__*` environment variables, in increasing priority.

use agentbond_types::{Address, AssetId, DEFAULT_REQUIRED_APPROVALS};
use serde::{Deserialize, Serialize};

/// Marketplace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Identity allowed to execute slashes and change the quorum
    #[serde(default = "default_administrator")]
    pub administrator: String,

    /// Asset deals are denominated in
    #[serde(default = "default_deal_asset")]
    pub deal_asset: String,

    /// Asset agent stakes are held in
    #[serde(default = "default_stake_asset")]
    pub stake_asset: String,

    /// Moderator approvals needed to execute a slash
    #[serde(default = "default_required_approvals")]
    pub required_approvals: u32,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            administrator: default_administrator(),
            deal_asset: default_deal_asset(),
            stake_asset: default_stake_asset(),
            required_approvals: default_required_approvals(),
            event_buffer: default_event_buffer(),
            logging: LoggingConfig::default(),
        }
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_administrator() -> String {
    Address::from_label("agentbond:administrator").to_string()
}

fn default_deal_asset() -> String {
    "USDC".to_string()
}

fn default_stake_asset() -> String {
    AssetId::native().0
}

fn default_required_approvals() -> u32 {
    DEFAULT_REQUIRED_APPROVALS
}

fn default_event_buffer() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl MarketConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("AGENTBOND")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let market_config: MarketConfig = builder.build()?.try_deserialize()?;
        market_config.validate()?;
        Ok(market_config)
    }

    /// Reject settings the marketplace cannot start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.required_approvals == 0 {
            anyhow::bail!("required_approvals must be at least 1");
        }
        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be at least 1");
        }
        if self.deal_asset.trim().is_empty() || self.stake_asset.trim().is_empty() {
            anyhow::bail!("asset symbols must not be empty");
        }
        self.administrator_address()?;
        Ok(())
    }

    pub fn administrator_address(&self) -> anyhow::Result<Address> {
        Address::parse(&self.administrator)
            .map_err(|e| anyhow::anyhow!("invalid administrator address: {e}"))
    }

    pub fn deal_asset_id(&self) -> AssetId {
        AssetId::new(self.deal_asset.clone())
    }

    pub fn stake_asset_id(&self) -> AssetId {
        AssetId::new(self.stake_asset.clone())
    }
}
