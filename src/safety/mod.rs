//! Safety limit policy
//!
//! A pure, side-effect free gate between a proposed trade and the exchange.
//! See [`policy::evaluate`] for the rule order.

pub mod policy;

pub use policy::{evaluate, ProposedTrade, SafetyCheck, SafetyRule};
