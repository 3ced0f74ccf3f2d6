//! Execution engine
//!
//! # Flow
//!
//! ```text
//! TradeIntent
//!     │
//!     ▼
//! daily reset ──► spot price ──► normalize (asset units + USD)
//!                                   │
//!                                   ▼
//!                          SafetyLimitPolicy ──fail──► TradeRecord (executed=false)
//!                                   │
//!                                   ▼
//!                   PAPER: simulated fill
//!                   CONFIRM: preview ─► approval ─► exchange
//!                   LIVE: exchange
//!                                   │
//!                                   ▼
//!                 audit sink + counters (one step per intent)
//! ```
//!
//! # Components
//!
//! - [`ExecutionEngine`]: owns [`EngineState`] and is the only writer
//! - [`spawn_engine_worker`]: queue-based single writer for independent tasks
//! - [`AuditSink`]: where every [`TradeRecord`] ends up
//! - [`Confirmer`]: operator approval for confirm mode

pub mod audit;
pub mod confirm;
pub mod executor;
pub mod fees;
pub mod queue;
pub mod state;
pub mod types;

pub use audit::{AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use confirm::{AutoApprove, AutoDecline, Confirmer, StdinConfirmer};
pub use executor::{normalize, ExecutionEngine};
pub use fees::FeeSchedule;
pub use queue::{spawn_engine_worker, EngineHandle};
pub use state::EngineState;
pub use types::{NormalizedOrder, PreviewResult, TradeRecord, CANCELLED_BY_USER};
