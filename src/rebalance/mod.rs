//! Target allocation rebalancing
//!
//! [`RebalancePlanner`] turns a [`PortfolioSnapshot`] into an ordered list of
//! USD-denominated trade intents: sells first, then buys scaled to what the
//! sells (plus any external cash) can fund.

pub mod planner;
pub mod types;

pub use planner::RebalancePlanner;
pub use types::{AllocationAction, AllocationStatus, PortfolioSnapshot, RebalancePlan};
