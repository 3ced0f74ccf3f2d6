//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::common::errors::{PortfolioError, Result};
use crate::common::types::normalize_asset;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Execution engine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Per-trade and per-day safety limits
    #[serde(default)]
    pub safety: SafetyLimits,
    /// Target allocation rebalancing
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    /// Recurring purchases
    #[serde(default)]
    pub dca: DcaConfig,
    /// Simulated exchange used by the binary
    #[serde(default)]
    pub paper: PaperConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

impl AppConfig {
    /// Check cross-field rules that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.safety.validate()?;
        self.rebalance.validate()?;
        self.dca.validate()?;

        if self.settings.unattended && self.engine.mode == ExecutionMode::Confirm {
            return Err(PortfolioError::Configuration(
                "confirm mode blocks for approval and cannot be used in unattended runs".into(),
            ));
        }
        if self.engine.taker_fee_pct < Decimal::ZERO {
            return Err(PortfolioError::Configuration(
                "engine.taker_fee_pct must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// How the engine dispatches orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Simulate fills at the current price, never touch the exchange
    #[default]
    Paper,
    /// Show a preview and wait for approval before dispatch
    Confirm,
    /// Dispatch immediately after the safety checks
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Confirm => write!(f, "confirm"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Dispatch mode
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Estimated taker fee in percent, used for paper fills and previews
    #[serde(default = "default_taker_fee_pct")]
    pub taker_fee_pct: Decimal,
    /// JSON-lines audit file (in-memory audit when unset)
    #[serde(default)]
    pub audit_log_path: Option<String>,
    /// Capacity of the single-writer intent queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            taker_fee_pct: default_taker_fee_pct(),
            audit_log_path: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_taker_fee_pct() -> Decimal {
    dec!(0.6)
}

fn default_queue_capacity() -> usize {
    64
}

/// Safety thresholds every trade is checked against. Loaded once, read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Largest single trade in USD
    #[serde(default = "default_max_trade_usd")]
    pub max_trade_usd: Decimal,
    /// Trades allowed per calendar day
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    /// Total USD traded per calendar day
    #[serde(default = "default_max_daily_volume_usd")]
    pub max_daily_volume_usd: Decimal,
    /// Largest share of a position a single sell may liquidate, in percent
    #[serde(default = "default_max_sell_percent")]
    pub max_sell_percent: Decimal,
    /// Minimum wait between two trades of the same asset
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Assets that may never be traded
    #[serde(default)]
    pub blacklist: BTreeSet<String>,
    /// When non-empty, the only assets that may be traded
    #[serde(default)]
    pub whitelist: BTreeSet<String>,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_trade_usd: default_max_trade_usd(),
            max_trades_per_day: default_max_trades_per_day(),
            max_daily_volume_usd: default_max_daily_volume_usd(),
            max_sell_percent: default_max_sell_percent(),
            cooldown_seconds: default_cooldown_seconds(),
            blacklist: BTreeSet::new(),
            whitelist: BTreeSet::new(),
        }
    }
}

impl SafetyLimits {
    pub fn is_blacklisted(&self, asset: &str) -> bool {
        self.blacklist.iter().any(|a| normalize_asset(a) == asset)
    }

    /// True when a whitelist exists and `asset` is not on it
    pub fn is_outside_whitelist(&self, asset: &str) -> bool {
        !self.whitelist.is_empty() && !self.whitelist.iter().any(|a| normalize_asset(a) == asset)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_trade_usd <= Decimal::ZERO || self.max_daily_volume_usd <= Decimal::ZERO {
            return Err(PortfolioError::Configuration(
                "safety.max_trade_usd and safety.max_daily_volume_usd must be positive".into(),
            ));
        }
        if self.max_sell_percent <= Decimal::ZERO || self.max_sell_percent > dec!(100) {
            return Err(PortfolioError::Configuration(format!(
                "safety.max_sell_percent must be in (0, 100], got {}",
                self.max_sell_percent
            )));
        }
        if let Some(asset) = self.blacklist.iter().find(|a| {
            let asset = normalize_asset(a);
            self.whitelist.iter().any(|w| normalize_asset(w) == asset)
        }) {
            return Err(PortfolioError::Configuration(format!(
                "{} is both blacklisted and whitelisted",
                asset
            )));
        }
        Ok(())
    }
}

fn default_max_trade_usd() -> Decimal {
    dec!(100)
}

fn default_max_trades_per_day() -> u32 {
    10
}

fn default_max_daily_volume_usd() -> Decimal {
    dec!(500)
}

fn default_max_sell_percent() -> Decimal {
    dec!(25)
}

fn default_cooldown_seconds() -> u64 {
    300
}

/// Target allocation rebalancing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Target weight per asset, in percent
    #[serde(default)]
    pub target_allocations: BTreeMap<String, Decimal>,
    /// Percentage-point drift below which an asset is left alone
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: Decimal,
    /// Trades smaller than this (USD) are not worth placing
    #[serde(default = "default_min_trade_usd")]
    pub min_trade_usd: Decimal,
    /// Largest share of an asset's current value one sell may take, in percent
    #[serde(default = "default_max_trade_pct")]
    pub max_trade_pct: Decimal,
    /// Whether overweight assets may be sold
    #[serde(default = "default_true")]
    pub allow_sells: bool,
    /// Allowed distance of the target sum from 100
    #[serde(default = "default_allocation_tolerance")]
    pub allocation_tolerance: Decimal,
    /// Spread unused sell proceeds over underweight assets in the same pass
    #[serde(default)]
    pub redeploy_surplus: bool,
    /// Minimum time between two rebalance passes of the runner
    #[serde(default = "default_rebalance_interval")]
    pub interval_seconds: u64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            target_allocations: BTreeMap::new(),
            drift_threshold: default_drift_threshold(),
            min_trade_usd: default_min_trade_usd(),
            max_trade_pct: default_max_trade_pct(),
            allow_sells: true,
            allocation_tolerance: default_allocation_tolerance(),
            redeploy_surplus: false,
            interval_seconds: default_rebalance_interval(),
        }
    }
}

impl RebalanceConfig {
    /// Targets keyed by normalized asset symbol
    pub fn targets(&self) -> BTreeMap<String, Decimal> {
        self.target_allocations
            .iter()
            .map(|(asset, pct)| (normalize_asset(asset), *pct))
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        !self.target_allocations.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((asset, pct)) = self
            .target_allocations
            .iter()
            .find(|(_, pct)| **pct < Decimal::ZERO)
        {
            return Err(PortfolioError::Configuration(format!(
                "target allocation for {} is negative ({})",
                asset, pct
            )));
        }
        if self.is_enabled() {
            let total: Decimal = self.target_allocations.values().copied().sum();
            if (total - dec!(100)).abs() > self.allocation_tolerance {
                return Err(PortfolioError::Configuration(format!(
                    "target allocations sum to {}%, expected 100% (±{})",
                    total, self.allocation_tolerance
                )));
            }
        }
        if self.drift_threshold < Decimal::ZERO || self.min_trade_usd < Decimal::ZERO {
            return Err(PortfolioError::Configuration(
                "rebalance.drift_threshold and rebalance.min_trade_usd must not be negative".into(),
            ));
        }
        if self.max_trade_pct <= Decimal::ZERO || self.max_trade_pct > dec!(100) {
            return Err(PortfolioError::Configuration(format!(
                "rebalance.max_trade_pct must be in (0, 100], got {}",
                self.max_trade_pct
            )));
        }
        Ok(())
    }
}

fn default_drift_threshold() -> Decimal {
    dec!(5)
}

fn default_min_trade_usd() -> Decimal {
    dec!(10)
}

fn default_max_trade_pct() -> Decimal {
    dec!(50)
}

fn default_allocation_tolerance() -> Decimal {
    dec!(1)
}

fn default_rebalance_interval() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

/// Recurring purchase configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaConfig {
    /// One entry per asset
    #[serde(default)]
    pub plans: Vec<DcaPlanConfig>,
    /// Skip a purchase when price is at or above this percent of the trailing high
    #[serde(default = "default_near_high_pct")]
    pub near_high_pct: Decimal,
    /// Where schedules are persisted (in-memory when unset)
    #[serde(default)]
    pub state_path: Option<String>,
}

impl Default for DcaConfig {
    fn default() -> Self {
        Self {
            plans: Vec::new(),
            near_high_pct: default_near_high_pct(),
            state_path: None,
        }
    }
}

impl DcaConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for plan in &self.plans {
            let asset = normalize_asset(&plan.asset);
            if asset.is_empty() {
                return Err(PortfolioError::Configuration("DCA plan without asset".into()));
            }
            if !seen.insert(asset.clone()) {
                return Err(PortfolioError::Configuration(format!(
                    "duplicate DCA plan for {}",
                    asset
                )));
            }
            if plan.usd_amount <= Decimal::ZERO {
                return Err(PortfolioError::Configuration(format!(
                    "DCA usd_amount for {} must be positive",
                    asset
                )));
            }
            if plan.hour > 23 {
                return Err(PortfolioError::Configuration(format!(
                    "DCA hour for {} must be 0-23, got {}",
                    asset, plan.hour
                )));
            }
            if plan.day_of_week > 6 {
                return Err(PortfolioError::Configuration(format!(
                    "DCA day_of_week for {} must be 0-6 (Monday-Sunday), got {}",
                    asset, plan.day_of_week
                )));
            }
        }
        if self.near_high_pct <= Decimal::ZERO {
            return Err(PortfolioError::Configuration(
                "dca.near_high_pct must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_near_high_pct() -> Decimal {
    dec!(95)
}

/// Recurring purchase of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaPlanConfig {
    pub asset: String,
    /// USD spent per purchase
    pub usd_amount: Decimal,
    /// hourly, daily, weekly, biweekly or monthly
    #[serde(default = "default_cadence")]
    pub cadence: String,
    /// Hour of day (UTC) for daily and longer cadences
    #[serde(default = "default_hour")]
    pub hour: u32,
    /// 0 = Monday ... 6 = Sunday
    #[serde(default)]
    pub day_of_week: u32,
    /// Clamped to 28
    #[serde(default = "default_day_of_month")]
    pub day_of_month: u32,
    /// Trailing window for the near-high skip, 0 disables it
    #[serde(default)]
    pub skip_if_near_high_days: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_cadence() -> String {
    "weekly".to_string()
}

fn default_hour() -> u32 {
    9
}

fn default_day_of_month() -> u32 {
    1
}

/// Seed data for the simulated exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default)]
    pub prices: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub trailing_highs: BTreeMap<String, Decimal>,
    /// Holdings in asset units
    #[serde(default)]
    pub balances: BTreeMap<String, Decimal>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds between two runner cycles
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    /// No operator at the terminal
    #[serde(default = "default_true")]
    pub unattended: bool,
    /// Upper bound for a single exchange call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tick_interval_seconds: default_tick_interval(),
            unattended: true,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}
