use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::errors::PortfolioError;
use crate::common::types::normalize_asset;
use crate::config::types::DcaPlanConfig;
use crate::engine::types::TradeRecord;

/// How often a recurring purchase fires
///
/// Parsing never fails: unknown names are kept verbatim and scheduled a day out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Unknown(String),
}

impl Cadence {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "hourly" => Cadence::Hourly,
            "daily" => Cadence::Daily,
            "weekly" => Cadence::Weekly,
            "biweekly" => Cadence::Biweekly,
            "monthly" => Cadence::Monthly,
            _ => Cadence::Unknown(name.trim().to_string()),
        }
    }
}

impl From<String> for Cadence {
    fn from(name: String) -> Self {
        Cadence::parse(&name)
    }
}

impl From<Cadence> for String {
    fn from(cadence: Cadence) -> Self {
        cadence.to_string()
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Hourly => write!(f, "hourly"),
            Cadence::Daily => write!(f, "daily"),
            Cadence::Weekly => write!(f, "weekly"),
            Cadence::Biweekly => write!(f, "biweekly"),
            Cadence::Monthly => write!(f, "monthly"),
            Cadence::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Persistent per-asset recurring purchase state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcaSchedule {
    pub asset: String,
    pub usd_amount: Decimal,
    pub cadence: Cadence,
    pub hour: u32,
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub skip_if_near_high_days: u32,
    pub enabled: bool,
    /// USD spent on executed purchases
    #[serde(default)]
    pub total_invested: Decimal,
    /// Asset units bought
    #[serde(default)]
    pub total_purchased: Decimal,
    #[serde(default)]
    pub execution_count: u64,
    /// Cycles passed over by the near-high rule
    #[serde(default)]
    pub skipped_count: u64,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
    pub next_execution: DateTime<Utc>,
}

impl DcaSchedule {
    /// Fresh schedule for `plan`, first due at `next_execution`
    pub fn from_plan(plan: &DcaPlanConfig, next_execution: DateTime<Utc>) -> Self {
        Self {
            asset: normalize_asset(&plan.asset),
            usd_amount: plan.usd_amount,
            cadence: Cadence::parse(&plan.cadence),
            hour: plan.hour,
            day_of_week: plan.day_of_week,
            day_of_month: plan.day_of_month,
            skip_if_near_high_days: plan.skip_if_near_high_days,
            enabled: plan.enabled,
            total_invested: Decimal::ZERO,
            total_purchased: Decimal::ZERO,
            execution_count: 0,
            skipped_count: 0,
            last_executed: None,
            next_execution,
        }
    }

    /// True when the timing fields differ from `plan`
    pub fn timing_differs(&self, plan: &DcaPlanConfig) -> bool {
        self.cadence != Cadence::parse(&plan.cadence)
            || self.hour != plan.hour
            || self.day_of_week != plan.day_of_week
            || self.day_of_month != plan.day_of_month
    }

    /// Mean price paid per unit, None before the first fill
    pub fn average_cost(&self) -> Option<Decimal> {
        if self.total_purchased > Decimal::ZERO {
            Some(self.total_invested / self.total_purchased)
        } else {
            None
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && now >= self.next_execution
    }
}

/// What one scheduler tick did for one asset
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NotDue {
        asset: String,
        wait: Duration,
    },
    SkippedNearHigh {
        asset: String,
        price: Decimal,
        high: Decimal,
        next_execution: DateTime<Utc>,
    },
    Executed {
        record: TradeRecord,
        next_execution: DateTime<Utc>,
    },
    Failed {
        record: TradeRecord,
        next_execution: DateTime<Utc>,
    },
}

impl TickOutcome {
    pub fn asset(&self) -> &str {
        match self {
            TickOutcome::NotDue { asset, .. } | TickOutcome::SkippedNearHigh { asset, .. } => asset,
            TickOutcome::Executed { record, .. } | TickOutcome::Failed { record, .. } => &record.asset,
        }
    }

    /// The trade record, when a purchase was attempted
    pub fn record(&self) -> Option<&TradeRecord> {
        match self {
            TickOutcome::Executed { record, .. } | TickOutcome::Failed { record, .. } => Some(record),
            _ => None,
        }
    }
}

/// Everything one scheduler tick did
///
/// Outcomes are kept even when the updated schedules could not be saved; the
/// in-memory schedules have already advanced and are written again on the
/// next tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub outcomes: Vec<TickOutcome>,
    pub persist_error: Option<PortfolioError>,
}

impl TickReport {
    pub fn records(&self) -> impl Iterator<Item = &TradeRecord> {
        self.outcomes.iter().filter_map(TickOutcome::record)
    }
}
