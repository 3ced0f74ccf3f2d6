//! Types, traits and errors shared across the crate

pub mod clock;
pub mod errors;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{PortfolioError, Result};
pub use traits::{ExchangeClient, TradeExecutor};
pub use types::{
    normalize_asset, IntentOrigin, MarketOrder, OrderAmount, OrderFill, OrderQuote, Side,
    TradeIntent,
};
