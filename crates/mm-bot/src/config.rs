//! Configuration for the market-maker terminal.
//!
//! Loaded from a TOML file, with environment variable overrides for
//! credentials and CLI overrides for the common knobs. Every option is a
//! typed field validated at startup; unknown keys in the file are errors,
//! not silently ignored.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use mm_common::{Asset, SlotDuration, MIN_SHARES_PER_SIDE};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Disable on-chain writes and CLOB orders; fills are simulated
    /// against live midpoints.
    #[serde(default)]
    pub dry_run: bool,

    /// Market-maker parameters.
    #[serde(default)]
    pub mm: MmConfig,

    /// Redeemer parameters.
    #[serde(default)]
    pub redeem: RedeemConfig,

    /// Venue and node endpoints.
    #[serde(default)]
    pub endpoints: Endpoints,

    /// Wallet configuration. Secrets come from the environment only.
    #[serde(default)]
    pub wallet: WalletConfig,
}

/// Market-maker engine parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MmConfig {
    /// Assets to make markets on; one position slot each.
    #[serde(default = "default_assets")]
    pub assets: Vec<Asset>,

    /// Slot duration of the targeted markets.
    #[serde(default)]
    pub duration: SlotDuration,

    /// Collateral committed per market entry; equals the shares minted on
    /// each leg. The balance check keeps a 2x buffer above this.
    #[serde(default = "default_trade_size")]
    pub trade_size: Decimal,

    /// Limit target for both initial sells.
    #[serde(default = "default_sell_price")]
    pub sell_price: Decimal,

    /// Seconds before settlement when cut-loss triggers.
    #[serde(default = "default_cut_loss_time")]
    pub cut_loss_time: u64,

    /// Detector poll period in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Monitor cadence in seconds.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: u64,

    /// Run the adaptive controller when exactly one leg fills.
    #[serde(default = "default_true")]
    pub adaptive_cut_loss: bool,

    /// Profit floor for the two-leg combined sell price.
    #[serde(default = "default_min_combined")]
    pub adaptive_min_combined: Decimal,

    /// Adaptive controller cadence in seconds.
    #[serde(default = "default_adaptive_monitor")]
    pub adaptive_monitor_sec: u64,

    /// Attempt a recovery buy after a neither-filled merge.
    #[serde(default)]
    pub recovery_buy: bool,

    /// Midpoint threshold qualifying a recovery candidate.
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: Decimal,

    /// Collateral spent on a recovery buy; 0 falls back to `trade_size`.
    #[serde(default)]
    pub recovery_size: Decimal,

    /// Starting collateral of the simulated ledger in dry-run mode.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: Decimal,
}

/// Redeemer parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedeemConfig {
    /// Redeemer cadence in seconds.
    #[serde(default = "default_redeem_interval")]
    pub interval: u64,
}

/// Venue and node endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoints {
    #[serde(default)]
    pub gamma_url: Option<String>,
    #[serde(default)]
    pub clob_url: Option<String>,
    #[serde(default)]
    pub data_api_url: Option<String>,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
}

/// Wallet configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletConfig {
    /// Proxy wallet holding the collateral. Overridden by MM_PROXY_WALLET.
    #[serde(default)]
    pub proxy_address: Option<String>,

    /// Signing key. Environment only (MM_PRIVATE_KEY); never in the file.
    #[serde(skip)]
    pub private_key: Option<String>,

    /// Pre-derived CLOB API credentials. Environment only; derived from
    /// the signing key on first run when absent.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub api_secret: Option<String>,
    #[serde(skip)]
    pub api_passphrase: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_assets() -> Vec<Asset> {
    vec![Asset::Btc]
}
fn default_trade_size() -> Decimal {
    dec!(5)
}
fn default_sell_price() -> Decimal {
    dec!(0.60)
}
fn default_cut_loss_time() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    10
}
fn default_monitor_interval() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_min_combined() -> Decimal {
    dec!(1.20)
}
fn default_adaptive_monitor() -> u64 {
    5
}
fn default_recovery_threshold() -> Decimal {
    dec!(0.60)
}
fn default_sim_balance() -> Decimal {
    dec!(100)
}
fn default_redeem_interval() -> u64 {
    60
}
fn default_rpc_url() -> String {
    "https://polygon-rpc.com".to_string()
}

impl Default for MmConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            duration: SlotDuration::default(),
            trade_size: default_trade_size(),
            sell_price: default_sell_price(),
            cut_loss_time: default_cut_loss_time(),
            poll_interval: default_poll_interval(),
            monitor_interval: default_monitor_interval(),
            adaptive_cut_loss: true,
            adaptive_min_combined: default_min_combined(),
            adaptive_monitor_sec: default_adaptive_monitor(),
            recovery_buy: false,
            recovery_threshold: default_recovery_threshold(),
            recovery_size: Decimal::ZERO,
            sim_balance: default_sim_balance(),
        }
    }
}

impl Default for RedeemConfig {
    fn default() -> Self {
        Self {
            interval: default_redeem_interval(),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            gamma_url: None,
            clob_url: None,
            data_api_url: None,
            rpc_url: default_rpc_url(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
            mm: MmConfig::default(),
            redeem: RedeemConfig::default(),
            endpoints: Endpoints::default(),
            wallet: WalletConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        let config: BotConfig =
            toml::from_str(&raw).with_context(|| format!("Failed to parse config {path:?}"))?;
        Ok(config)
    }

    /// Apply credential and endpoint overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MM_PRIVATE_KEY") {
            self.wallet.private_key = Some(v);
        }
        if let Ok(v) = std::env::var("MM_PROXY_WALLET") {
            self.wallet.proxy_address = Some(v);
        }
        if let Ok(v) = std::env::var("MM_API_KEY") {
            self.wallet.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("MM_API_SECRET") {
            self.wallet.api_secret = Some(v);
        }
        if let Ok(v) = std::env::var("MM_API_PASSPHRASE") {
            self.wallet.api_passphrase = Some(v);
        }
        if let Ok(v) = std::env::var("MM_RPC_URL") {
            self.endpoints.rpc_url = v;
        }
    }

    /// Apply CLI overrides.
    pub fn apply_cli_overrides(
        &mut self,
        assets: Option<Vec<Asset>>,
        duration: Option<SlotDuration>,
        dry_run: bool,
    ) {
        if let Some(assets) = assets {
            self.mm.assets = assets;
        }
        if let Some(duration) = duration {
            self.mm.duration = duration;
        }
        if dry_run {
            self.dry_run = true;
        }
    }

    /// Validate the whole record. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let mm = &self.mm;
        if mm.assets.is_empty() {
            bail!("mm.assets must name at least one asset");
        }
        if mm.trade_size < MIN_SHARES_PER_SIDE {
            bail!(
                "MM_TRADE_SIZE below minimum: {} < {}",
                mm.trade_size,
                MIN_SHARES_PER_SIDE
            );
        }
        if mm.sell_price <= Decimal::ZERO || mm.sell_price >= Decimal::ONE {
            bail!("mm.sell_price must be inside (0, 1), got {}", mm.sell_price);
        }
        if mm.cut_loss_time == 0 || mm.cut_loss_time >= mm.duration.secs() {
            bail!(
                "mm.cut_loss_time must be inside (0, {}), got {}",
                mm.duration.secs(),
                mm.cut_loss_time
            );
        }
        if mm.poll_interval == 0 || mm.monitor_interval == 0 || mm.adaptive_monitor_sec == 0 {
            bail!("poll, monitor and adaptive cadences must be non-zero");
        }
        if mm.adaptive_min_combined <= Decimal::ZERO || mm.adaptive_min_combined >= dec!(2) {
            bail!(
                "mm.adaptive_min_combined must be inside (0, 2), got {}",
                mm.adaptive_min_combined
            );
        }
        if mm.recovery_threshold <= Decimal::ZERO || mm.recovery_threshold >= Decimal::ONE {
            bail!(
                "mm.recovery_threshold must be inside (0, 1), got {}",
                mm.recovery_threshold
            );
        }
        if self.redeem.interval == 0 {
            bail!("redeem.interval must be non-zero");
        }

        if !self.dry_run {
            if self.wallet.private_key.as_deref().unwrap_or("").is_empty() {
                bail!("live mode requires MM_PRIVATE_KEY");
            }
            if self.wallet.proxy_address.as_deref().unwrap_or("").is_empty() {
                bail!("live mode requires a proxy wallet (MM_PROXY_WALLET)");
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.mm.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BotConfig {
        let mut config = BotConfig::default();
        config.dry_run = true;
        config
    }

    #[test]
    fn test_defaults_validate_in_dry_run() {
        valid().validate().unwrap();
    }

    #[test]
    fn test_trade_size_minimum() {
        let mut config = valid();
        config.mm.trade_size = dec!(2.0);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("MM_TRADE_SIZE below minimum"), "{err}");

        config.mm.trade_size = dec!(2.5);
        config.validate().unwrap();
    }

    #[test]
    fn test_sell_price_bounds() {
        for bad in [dec!(0), dec!(1), dec!(1.5)] {
            let mut config = valid();
            config.mm.sell_price = bad;
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_cut_loss_bounds() {
        let mut config = valid();
        config.mm.cut_loss_time = 300; // whole 5m slot
        assert!(config.validate().is_err());
        config.mm.cut_loss_time = 60;
        config.validate().unwrap();
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let mut config = valid();
        config.dry_run = false;
        assert!(config.validate().is_err());
        config.wallet.private_key = Some("0xabc".into());
        config.wallet.proxy_address = Some("0xdef".into());
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_option_is_an_error() {
        let err = toml::from_str::<BotConfig>("unknown_option = 1").unwrap_err();
        assert!(err.to_string().contains("unknown"), "{err}");

        let err = toml::from_str::<BotConfig>("[mm]\nspread = 0.1").unwrap_err();
        assert!(err.to_string().contains("unknown"), "{err}");
    }

    #[test]
    fn test_parse_full_file() {
        let config: BotConfig = toml::from_str(
            r#"
            log_level = "debug"
            dry_run = true

            [mm]
            assets = ["BTC", "ETH"]
            duration = "15m"
            trade_size = "7.5"
            sell_price = "0.55"
            cut_loss_time = 90
            recovery_buy = true

            [redeem]
            interval = 120

            [endpoints]
            rpc_url = "https://example.invalid"
            "#,
        )
        .unwrap();
        assert_eq!(config.mm.assets, vec![Asset::Btc, Asset::Eth]);
        assert_eq!(config.mm.duration, SlotDuration::FifteenMin);
        assert_eq!(config.mm.trade_size, dec!(7.5));
        assert_eq!(config.redeem.interval, 120);
        assert!(config.mm.recovery_buy);
        config.validate().unwrap();
    }
}
