//! Exchange client implementations
//!
//! Real exchange wrappers live outside this crate and implement
//! [`crate::common::traits::ExchangeClient`]. The simulated venue here backs
//! the binary and the tests.

pub mod paper;

pub use paper::{PaperExchange, QUOTE_CURRENCY};
