//! Allocation drift planner
//!
//! Stateless: the same snapshot, configuration and external cash always give
//! the same ordered plan.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::types::{AllocationAction, AllocationStatus, PortfolioSnapshot, RebalancePlan};
use crate::common::errors::Result;
use crate::common::types::{IntentOrigin, TradeIntent};
use crate::config::types::RebalanceConfig;

/// Trade amounts are whole cents, always rounded towards zero
const USD_DP: u32 = 2;

fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(USD_DP, RoundingStrategy::ToZero)
}

/// Plans trades that move a portfolio back towards its target weights
#[derive(Debug, Clone)]
pub struct RebalancePlanner {
    config: RebalanceConfig,
}

impl RebalancePlanner {
    /// Create a planner; fails when the targets do not sum to ~100%
    pub fn new(config: RebalanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Ordered trade intents for `snapshot`
    ///
    /// `external_cash` is USD outside the snapshot that may fund buys on top of
    /// sell proceeds.
    pub fn plan(&self, snapshot: &PortfolioSnapshot, external_cash: Decimal) -> Vec<TradeIntent> {
        self.plan_detailed(snapshot, external_cash).intents
    }

    /// Per-asset drift and classification, before any balancing
    ///
    /// Every targeted or held asset appears once, in symbol order. Held assets
    /// without a target are treated as 0% targets.
    pub fn compute_drift(&self, snapshot: &PortfolioSnapshot) -> Vec<AllocationStatus> {
        let targets = self.config.targets();
        let total = snapshot.total_value();

        let assets: BTreeSet<&String> = targets.keys().chain(snapshot.holdings().keys()).collect();

        assets
            .into_iter()
            .map(|asset| {
                let current_value = snapshot.value_of(asset);
                let target_percent = targets.get(asset).copied().unwrap_or_default();
                let current_percent = if total > Decimal::ZERO {
                    current_value / total * dec!(100)
                } else {
                    Decimal::ZERO
                };
                let target_value = total * target_percent / dec!(100);
                let mut status = AllocationStatus {
                    asset: asset.clone(),
                    current_value,
                    current_percent,
                    target_percent,
                    deviation: current_percent - target_percent,
                    target_value,
                    value_diff: current_value - target_value,
                    action: AllocationAction::Hold,
                    trade_amount: Decimal::ZERO,
                };
                if total > Decimal::ZERO {
                    self.classify(&mut status);
                }
                status
            })
            .collect()
    }

    fn classify(&self, status: &mut AllocationStatus) {
        if status.deviation.abs() < self.config.drift_threshold {
            return;
        }

        let (action, amount) = if status.deviation < Decimal::ZERO {
            (AllocationAction::Buy, -status.value_diff)
        } else if self.config.allow_sells {
            let cap = status.current_value * self.config.max_trade_pct / dec!(100);
            (AllocationAction::Sell, status.value_diff.min(cap))
        } else {
            return;
        };

        let amount = cents(amount);
        if amount < self.config.min_trade_usd || amount <= Decimal::ZERO {
            debug!("{} {} of ${} is below minimum trade size", action, status.asset, amount);
            return;
        }
        status.action = action;
        status.trade_amount = amount;
    }

    /// Full planning pass: drift, classification, balancing and ordering
    pub fn plan_detailed(&self, snapshot: &PortfolioSnapshot, external_cash: Decimal) -> RebalancePlan {
        let mut statuses = self.compute_drift(snapshot);
        let external_cash = external_cash.max(Decimal::ZERO);

        let total_sells = sum_of(&statuses, AllocationAction::Sell);
        let wanted_buys = sum_of(&statuses, AllocationAction::Buy);
        let available_cash = total_sells + external_cash;

        let mut scale_factor = Decimal::ONE;
        if wanted_buys > available_cash {
            scale_factor = available_cash / wanted_buys;
            info!(
                "Buys ${} exceed available ${}, scaling by {}",
                wanted_buys.round_dp(2),
                available_cash.round_dp(2),
                scale_factor.round_dp(4)
            );
            for status in statuses.iter_mut().filter(|s| s.action == AllocationAction::Buy) {
                status.trade_amount = cents(status.trade_amount * scale_factor);
                if status.trade_amount < self.config.min_trade_usd || status.trade_amount <= Decimal::ZERO {
                    status.action = AllocationAction::Hold;
                    status.trade_amount = Decimal::ZERO;
                }
            }
        } else if self.config.redeploy_surplus && available_cash > wanted_buys {
            self.redeploy(&mut statuses, available_cash - wanted_buys);
        }

        let total_buys = sum_of(&statuses, AllocationAction::Buy);
        let intents = order_intents(&statuses);

        RebalancePlan {
            statuses,
            intents,
            total_sells,
            total_buys,
            available_cash,
            scale_factor,
        }
    }

    /// Spread leftover cash over underweight assets, never past their target
    fn redeploy(&self, statuses: &mut [AllocationStatus], leftover: Decimal) {
        let shortfalls: Vec<(usize, Decimal)> = statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| s.action != AllocationAction::Sell)
            .map(|(i, s)| (i, -s.value_diff - s.trade_amount))
            .filter(|(_, shortfall)| *shortfall > Decimal::ZERO)
            .collect();

        let total_shortfall: Decimal = shortfalls.iter().map(|(_, s)| *s).sum();
        if total_shortfall <= Decimal::ZERO {
            return;
        }
        let deploy = leftover.min(total_shortfall);
        debug!("Redeploying ${} of surplus proceeds", deploy.round_dp(2));

        for (i, shortfall) in shortfalls {
            let status = &mut statuses[i];
            let amount = cents(status.trade_amount + shortfall * deploy / total_shortfall);
            if amount >= self.config.min_trade_usd && amount > status.trade_amount {
                status.action = AllocationAction::Buy;
                status.trade_amount = amount;
            }
        }
    }
}

fn sum_of(statuses: &[AllocationStatus], action: AllocationAction) -> Decimal {
    statuses
        .iter()
        .filter(|s| s.action == action)
        .map(|s| s.trade_amount)
        .sum()
}

/// SELLs before BUYs, each group by descending size (ties by symbol)
fn order_intents(statuses: &[AllocationStatus]) -> Vec<TradeIntent> {
    let mut trades: Vec<&AllocationStatus> = statuses
        .iter()
        .filter(|s| s.action != AllocationAction::Hold)
        .collect();

    trades.sort_by(|a, b| {
        let rank = |s: &AllocationStatus| if s.action == AllocationAction::Sell { 0 } else { 1 };
        rank(a)
            .cmp(&rank(b))
            .then(b.trade_amount.cmp(&a.trade_amount))
            .then(a.asset.cmp(&b.asset))
    });

    trades
        .into_iter()
        .map(|s| {
            let reason = format!(
                "Rebalance {} {:.2}% -> {:.2}% (drift {:+.2}pp)",
                s.asset,
                s.current_percent.round_dp(2),
                s.target_percent.round_dp(2),
                s.deviation.round_dp(2)
            );
            match s.action {
                AllocationAction::Sell => {
                    TradeIntent::sell_usd(&s.asset, s.trade_amount, IntentOrigin::Rebalance, reason)
                }
                _ => TradeIntent::buy_usd(&s.asset, s.trade_amount, IntentOrigin::Rebalance, reason),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{OrderAmount, Side};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn config(targets: &[(&str, Decimal)]) -> RebalanceConfig {
        RebalanceConfig {
            target_allocations: targets
                .iter()
                .map(|(a, p)| (a.to_string(), *p))
                .collect::<BTreeMap<_, _>>(),
            drift_threshold: dec!(5),
            min_trade_usd: dec!(1),
            max_trade_pct: dec!(50),
            ..Default::default()
        }
    }

    fn summary(intents: &[TradeIntent]) -> Vec<(Side, String, Decimal)> {
        intents
            .iter()
            .map(|i| (i.side(), i.asset().to_string(), i.amount().value()))
            .collect()
    }

    #[test]
    fn test_rejects_bad_targets() {
        assert!(RebalancePlanner::new(config(&[("BTC", dec!(50)), ("ETH", dec!(30))])).is_err());
    }

    #[test]
    fn test_even_split_sell_then_buy() {
        let planner = RebalancePlanner::new(config(&[("BTC", dec!(50)), ("ETH", dec!(50))])).unwrap();
        let snapshot = PortfolioSnapshot::from_values([("BTC", dec!(70)), ("ETH", dec!(30))]);

        let plan = planner.plan_detailed(&snapshot, Decimal::ZERO);

        assert_eq!(
            summary(&plan.intents),
            vec![
                (Side::Sell, "BTC".to_string(), dec!(20)),
                (Side::Buy, "ETH".to_string(), dec!(20)),
            ]
        );
        assert_eq!(plan.scale_factor, Decimal::ONE);
        assert_eq!(plan.intents[0].amount(), OrderAmount::Quote(dec!(20)));
    }

    #[test]
    fn test_statuses_cover_total_value() {
        let planner = RebalancePlanner::new(config(&[("BTC", dec!(60)), ("ETH", dec!(40))])).unwrap();
        let snapshot =
            PortfolioSnapshot::from_values([("BTC", dec!(500)), ("ETH", dec!(300)), ("DOGE", dec!(200))]);

        let statuses = planner.compute_drift(&snapshot);
        let sum: Decimal = statuses.iter().map(|s| s.current_value).sum();

        assert_eq!(sum, snapshot.total_value());
        let doge = statuses.iter().find(|s| s.asset == "DOGE").unwrap();
        assert_eq!(doge.target_percent, Decimal::ZERO);
        assert_eq!(doge.action, AllocationAction::Sell);
        // 50% of DOGE's value at most
        assert_eq!(doge.trade_amount, dec!(100));
    }

    #[test]
    fn test_untargeted_holding_held_when_sells_disabled() {
        let mut cfg = config(&[("BTC", dec!(100))]);
        cfg.allow_sells = false;
        let planner = RebalancePlanner::new(cfg).unwrap();
        let snapshot = PortfolioSnapshot::from_values([("BTC", dec!(50)), ("DOGE", dec!(50))]);

        let plan = planner.plan_detailed(&snapshot, Decimal::ZERO);

        let doge = plan.statuses.iter().find(|s| s.asset == "DOGE").unwrap();
        assert_eq!(doge.action, AllocationAction::Hold);
        // nothing to fund the BTC buy with
        assert!(plan.intents.is_empty());
    }

    #[test]
    fn test_within_threshold_holds() {
        let planner = RebalancePlanner::new(config(&[("BTC", dec!(50)), ("ETH", dec!(50))])).unwrap();
        let snapshot = PortfolioSnapshot::from_values([("BTC", dec!(52)), ("ETH", dec!(48))]);
        assert!(planner.plan(&snapshot, Decimal::ZERO).is_empty());
    }

    #[test]
    fn test_buys_scaled_to_sell_proceeds() {
        let mut cfg = config(&[("BTC", dec!(40)), ("ETH", dec!(30)), ("SOL", dec!(30))]);
        cfg.max_trade_pct = dec!(10);
        let planner = RebalancePlanner::new(cfg).unwrap();
        // BTC is 80% -> wants to sell 400 but is capped at 10% of 800
        let snapshot =
            PortfolioSnapshot::from_values([("BTC", dec!(800)), ("ETH", dec!(100)), ("SOL", dec!(100))]);

        let plan = planner.plan_detailed(&snapshot, Decimal::ZERO);

        assert_eq!(plan.total_sells, dec!(80));
        assert!(plan.total_buys <= plan.available_cash);
        assert_eq!(
            summary(&plan.intents),
            vec![
                (Side::Sell, "BTC".to_string(), dec!(80)),
                (Side::Buy, "ETH".to_string(), dec!(40)),
                (Side::Buy, "SOL".to_string(), dec!(40)),
            ]
        );
    }

    #[test]
    fn test_external_cash_extends_buys() {
        let mut cfg = config(&[("BTC", dec!(40)), ("ETH", dec!(30)), ("SOL", dec!(30))]);
        cfg.max_trade_pct = dec!(10);
        let planner = RebalancePlanner::new(cfg).unwrap();
        let snapshot =
            PortfolioSnapshot::from_values([("BTC", dec!(800)), ("ETH", dec!(100)), ("SOL", dec!(100))]);

        let plan = planner.plan_detailed(&snapshot, dec!(120));

        assert_eq!(plan.available_cash, dec!(200));
        assert_eq!(plan.total_buys, dec!(200));
    }

    #[test]
    fn test_scaled_buy_below_minimum_dropped() {
        let mut cfg = config(&[("BTC", dec!(50)), ("ETH", dec!(45)), ("SOL", dec!(5))]);
        cfg.max_trade_pct = dec!(5);
        cfg.min_trade_usd = dec!(10);
        let planner = RebalancePlanner::new(cfg).unwrap();
        let snapshot =
            PortfolioSnapshot::from_values([("BTC", dec!(900)), ("ETH", dec!(100)), ("SOL", dec!(0))]);

        let plan = planner.plan_detailed(&snapshot, Decimal::ZERO);

        // sells 45, ETH wants 350 -> 45 * 350/400, SOL wants 50 -> below 10 after scaling
        let sides: Vec<_> = summary(&plan.intents).into_iter().map(|(s, a, _)| (s, a)).collect();
        assert_eq!(
            sides,
            vec![(Side::Sell, "BTC".to_string()), (Side::Buy, "ETH".to_string())]
        );
        assert!(plan.total_buys <= plan.available_cash);
    }

    #[test]
    fn test_surplus_idle_by_default() {
        let mut cfg = config(&[("BTC", dec!(50)), ("ETH", dec!(48)), ("SOL", dec!(2))]);
        cfg.drift_threshold = dec!(3);
        let planner = RebalancePlanner::new(cfg.clone()).unwrap();
        let snapshot =
            PortfolioSnapshot::from_values([("BTC", dec!(600)), ("ETH", dec!(400)), ("SOL", dec!(0))]);

        let plan = planner.plan_detailed(&snapshot, Decimal::ZERO);
        assert_eq!(plan.total_sells, dec!(100));
        assert_eq!(plan.total_buys, dec!(80));

        cfg.redeploy_surplus = true;
        let planner = RebalancePlanner::new(cfg).unwrap();
        let plan = planner.plan_detailed(&snapshot, Decimal::ZERO);
        assert_eq!(plan.total_buys, dec!(100));
        let sol = plan.statuses.iter().find(|s| s.asset == "SOL").unwrap();
        assert_eq!(sol.action, AllocationAction::Buy);
        assert_eq!(sol.trade_amount, dec!(20));
    }

    #[test]
    fn test_plan_is_idempotent() {
        let planner = RebalancePlanner::new(config(&[("BTC", dec!(34)), ("ETH", dec!(33)), ("SOL", dec!(33))])).unwrap();
        let snapshot =
            PortfolioSnapshot::from_values([("BTC", dec!(123.45)), ("ETH", dec!(678.9)), ("ADA", dec!(55))]);

        let first = planner.plan_detailed(&snapshot, dec!(10));
        let second = planner.plan_detailed(&snapshot, dec!(10));
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_portfolio_plans_nothing() {
        let planner = RebalancePlanner::new(config(&[("BTC", dec!(100))])).unwrap();
        let plan = planner.plan_detailed(&PortfolioSnapshot::default(), dec!(100));
        assert!(plan.is_empty());
        assert_eq!(plan.statuses.len(), 1);
    }
}
