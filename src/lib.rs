//! PortfolioGuard Library
//!
//! Automated portfolio management for crypto holdings: target-allocation
//! rebalancing and recurring purchases, funnelled through one execution
//! engine that enforces hard safety limits and writes an audit trail.
//!
//! Exchange access is injected through [`ExchangeClient`]; the bundled
//! [`PaperExchange`] simulates a venue for dry runs and tests.

pub mod common;
pub mod config;
pub mod dca;
pub mod engine;
pub mod exchange;
pub mod rebalance;
pub mod runner;
pub mod safety;

// Re-export commonly used types
pub use common::clock::{Clock, ManualClock, SystemClock};
pub use common::errors::{PortfolioError, Result};
pub use common::traits::{ExchangeClient, TradeExecutor};
pub use common::types::{
    IntentOrigin, MarketOrder, OrderAmount, OrderFill, OrderQuote, Side, TradeIntent,
};
pub use config::types::{AppConfig, ExecutionMode, SafetyLimits};

// Engine
pub use engine::{
    spawn_engine_worker, AuditSink, EngineHandle, EngineState, ExecutionEngine, FeeSchedule,
    JsonlAuditSink, MemoryAuditSink, PreviewResult, TradeRecord,
};

// Planning and scheduling
pub use dca::{Cadence, DcaSchedule, RecurringPurchaseScheduler, TickOutcome, TickReport};
pub use exchange::PaperExchange;
pub use rebalance::{AllocationStatus, PortfolioSnapshot, RebalancePlan, RebalancePlanner};
pub use runner::{CycleReport, PortfolioRunner};
pub use safety::{SafetyCheck, SafetyRule};
