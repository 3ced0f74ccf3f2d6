//! Recurring (dollar-cost-averaging) purchases
//!
//! Each configured asset has a persistent [`DcaSchedule`]. On every tick the
//! [`RecurringPurchaseScheduler`] buys what is due, optionally skipping a cycle
//! when the price sits near its trailing high, and moves the schedule to its
//! next slot either way.

pub mod cadence;
pub mod scheduler;
pub mod store;
pub mod types;

pub use cadence::{next_execution, MAX_DAY_OF_MONTH};
pub use scheduler::RecurringPurchaseScheduler;
pub use store::{JsonFileScheduleStore, MemoryScheduleStore, ScheduleStore};
pub use types::{Cadence, DcaSchedule, TickOutcome, TickReport};
