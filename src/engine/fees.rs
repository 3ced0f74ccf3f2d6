use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::common::types::Side;

/// Estimated fee structure used for paper fills and previews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Taker fee as a percentage of trade value
    pub taker_fee_percent: Decimal,
}

impl FeeSchedule {
    pub fn new(taker_fee_percent: Decimal) -> Self {
        Self { taker_fee_percent }
    }

    /// Typical retail taker fee on a spot exchange
    pub fn retail() -> Self {
        Self::new(dec!(0.6))
    }

    /// Fee charged on a trade worth `usd_value`
    pub fn fee(&self, usd_value: Decimal) -> Decimal {
        (usd_value * self.taker_fee_percent / dec!(100)).round_dp(8)
    }

    /// Cash effect of a trade including fees
    ///
    /// For buying: the quote amount plus the fee
    /// For selling: the proceeds minus the fee
    pub fn net_cash(&self, side: Side, usd_value: Decimal) -> Decimal {
        let fee = self.fee(usd_value);
        match side {
            Side::Buy => usd_value + fee,
            Side::Sell => usd_value - fee,
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::retail()
    }
}
