//! Recurring purchase scheduler

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::cadence::next_for;
use super::store::ScheduleStore;
use super::types::{DcaSchedule, TickOutcome, TickReport};
use crate::common::errors::Result;
use crate::common::traits::{ExchangeClient, TradeExecutor};
use crate::common::types::{normalize_asset, IntentOrigin, TradeIntent};
use crate::config::types::DcaConfig;

/// Fires recurring USD purchases when they fall due
///
/// Schedules are written to the store after every change, so a restart picks
/// up the cadence where it left off instead of replaying missed purchases.
pub struct RecurringPurchaseScheduler {
    schedules: BTreeMap<String, DcaSchedule>,
    near_high_pct: Decimal,
    store: Arc<dyn ScheduleStore>,
    lookup_timeout: Option<Duration>,
    // a save failed and memory is ahead of the store
    unsaved: bool,
}

impl RecurringPurchaseScheduler {
    /// Merge persisted schedules with the configured plans
    ///
    /// Persisted totals and counters always survive. Amount, cadence and the
    /// other plan fields come from configuration; when the timing changed the
    /// next execution is recomputed from `now`. Assets no longer configured
    /// are dropped.
    pub fn load(config: &DcaConfig, store: Arc<dyn ScheduleStore>, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;

        let mut persisted: BTreeMap<String, DcaSchedule> = store
            .load()?
            .into_iter()
            .map(|s| (normalize_asset(&s.asset), s))
            .collect();

        let mut schedules = BTreeMap::new();
        for plan in &config.plans {
            let asset = normalize_asset(&plan.asset);
            let schedule = match persisted.remove(&asset) {
                Some(mut existing) => {
                    let retime = existing.timing_differs(plan);
                    let fresh = DcaSchedule::from_plan(plan, existing.next_execution);
                    existing.usd_amount = fresh.usd_amount;
                    existing.cadence = fresh.cadence;
                    existing.hour = fresh.hour;
                    existing.day_of_week = fresh.day_of_week;
                    existing.day_of_month = fresh.day_of_month;
                    existing.skip_if_near_high_days = fresh.skip_if_near_high_days;
                    existing.enabled = fresh.enabled;
                    if retime {
                        existing.next_execution = next_for(&existing, now);
                        info!("{} cadence changed, next purchase at {}", asset, existing.next_execution);
                    }
                    existing
                }
                None => {
                    let mut schedule = DcaSchedule::from_plan(plan, now);
                    schedule.next_execution = next_for(&schedule, now);
                    info!(
                        "New {} plan: ${} {}, first purchase at {}",
                        asset, schedule.usd_amount, schedule.cadence, schedule.next_execution
                    );
                    schedule
                }
            };
            schedules.insert(asset, schedule);
        }

        for asset in persisted.keys() {
            info!("Dropping schedule for {} (no longer configured)", asset);
        }

        let scheduler = Self {
            schedules,
            near_high_pct: config.near_high_pct,
            store,
            lookup_timeout: None,
            unsaved: false,
        };
        scheduler.persist()?;
        Ok(scheduler)
    }

    /// Bound the trailing-high and spot price lookups of the near-high check
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn set_lookup_timeout(&mut self, timeout: Duration) {
        self.lookup_timeout = Some(timeout);
    }

    pub fn schedule(&self, asset: &str) -> Option<&DcaSchedule> {
        self.schedules.get(&normalize_asset(asset))
    }

    pub fn schedules(&self) -> impl Iterator<Item = &DcaSchedule> {
        self.schedules.values()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Earliest upcoming purchase among enabled schedules
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.schedules
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.next_execution)
            .min()
    }

    fn save(&mut self, report: &mut TickReport) {
        match self.persist() {
            Ok(()) => self.unsaved = false,
            Err(e) => {
                error!("Failed to save recurring purchase schedules: {}", e);
                self.unsaved = true;
                report.persist_error = Some(e);
            }
        }
    }

    fn persist(&self) -> Result<()> {
        let all: Vec<DcaSchedule> = self.schedules.values().cloned().collect();
        self.store.save(&all)
    }

    /// Run every due purchase once
    ///
    /// Disabled schedules produce no outcome. A purchase that fails still
    /// advances the cadence; it is never retried within the same period.
    /// Schedules are saved after each purchase attempt. A failed save does
    /// not stop the remaining due assets; it is reported next to the outcomes
    /// and retried on the next save.
    #[instrument(skip(self, exchange, executor))]
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        exchange: &dyn ExchangeClient,
        executor: &dyn TradeExecutor,
    ) -> TickReport {
        let assets: Vec<String> = self.schedules.keys().cloned().collect();
        let mut report = TickReport {
            outcomes: Vec::with_capacity(assets.len()),
            persist_error: None,
        };
        for asset in assets {
            let Some(schedule) = self.schedules.get(&asset).cloned() else {
                continue;
            };
            if !schedule.enabled {
                continue;
            }
            if !schedule.is_due(now) {
                let wait = schedule.next_execution - now;
                debug!("{} not due for {}s", asset, wait.num_seconds());
                report.outcomes.push(TickOutcome::NotDue { asset, wait });
                continue;
            }

            report.outcomes.push(self.run_due(schedule, now, exchange, executor).await);
            self.save(&mut report);
        }

        // progress left unsaved by an earlier tick
        if self.unsaved && report.persist_error.is_none() {
            self.save(&mut report);
        }

        report
    }

    async fn run_due(
        &mut self,
        mut schedule: DcaSchedule,
        now: DateTime<Utc>,
        exchange: &dyn ExchangeClient,
        executor: &dyn TradeExecutor,
    ) -> TickOutcome {
        let asset = schedule.asset.clone();

        if let Some((price, high)) = self.near_high(&schedule, exchange).await {
            schedule.skipped_count += 1;
            schedule.next_execution = next_for(&schedule, now);
            info!(
                "Skipping {} purchase: ${} is within {}% of the {}-day high ${}",
                asset, price, self.near_high_pct, schedule.skip_if_near_high_days, high
            );
            let next_execution = schedule.next_execution;
            self.schedules.insert(asset.clone(), schedule);
            return TickOutcome::SkippedNearHigh {
                asset,
                price,
                high,
                next_execution,
            };
        }

        let intent = TradeIntent::buy_usd(
            &asset,
            schedule.usd_amount,
            IntentOrigin::RecurringPurchase,
            format!("{} recurring purchase of ${}", schedule.cadence, schedule.usd_amount),
        );
        let record = executor.execute(intent).await;

        if record.executed {
            schedule.total_invested += record.requested_usd.unwrap_or(schedule.usd_amount);
            schedule.total_purchased += record.fill_amount.unwrap_or_default();
            schedule.execution_count += 1;
            schedule.last_executed = Some(now);
        } else {
            warn!(
                "{} recurring purchase not executed: {}",
                asset,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
        schedule.next_execution = next_for(&schedule, now);
        let next_execution = schedule.next_execution;
        let executed = record.executed;
        self.schedules.insert(asset, schedule);

        if executed {
            TickOutcome::Executed { record, next_execution }
        } else {
            TickOutcome::Failed { record, next_execution }
        }
    }

    /// (price, high) when the near-high rule says skip
    ///
    /// Lookup failures never block the purchase.
    async fn near_high(
        &self,
        schedule: &DcaSchedule,
        exchange: &dyn ExchangeClient,
    ) -> Option<(Decimal, Decimal)> {
        if schedule.skip_if_near_high_days == 0 {
            return None;
        }
        let days = schedule.skip_if_near_high_days;

        let high = match self.lookup(exchange.get_trailing_high(&schedule.asset, days)).await {
            Ok(high) => high,
            Err(e) => {
                warn!("{}-day high for {} unavailable, buying anyway: {}", days, schedule.asset, e);
                return None;
            }
        };
        let price = match self.lookup(exchange.get_spot_price(&schedule.asset)).await {
            Ok(price) => price,
            Err(e) => {
                warn!("Spot price for {} unavailable for near-high check: {}", schedule.asset, e);
                return None;
            }
        };

        if high > Decimal::ZERO && price >= high * self.near_high_pct / dec!(100) {
            Some((price, high))
        } else {
            None
        }
    }

    async fn lookup<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.lookup_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::ManualClock;
    use crate::common::traits::MockTradeExecutor;
    use crate::config::types::{DcaPlanConfig, SafetyLimits};
    use crate::dca::store::MemoryScheduleStore;
    use crate::dca::types::Cadence;
    use crate::engine::ExecutionEngine;
    use crate::exchange::PaperExchange;
    use crate::common::errors::PortfolioError;
    use crate::common::types::{MarketOrder, OrderFill};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        // Monday
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
    }

    fn plan(asset: &str, cadence: &str, near_high_days: u32) -> DcaPlanConfig {
        DcaPlanConfig {
            asset: asset.into(),
            usd_amount: dec!(50),
            cadence: cadence.into(),
            hour: 9,
            day_of_week: 0,
            day_of_month: 1,
            skip_if_near_high_days: near_high_days,
            enabled: true,
        }
    }

    fn config(plans: Vec<DcaPlanConfig>) -> DcaConfig {
        DcaConfig {
            plans,
            ..Default::default()
        }
    }

    fn exchange() -> Arc<PaperExchange> {
        let exchange = Arc::new(PaperExchange::new());
        exchange.set_price("BTC", dec!(40000));
        exchange.set_price("ETH", dec!(2000));
        exchange
    }

    fn engine(exchange: Arc<PaperExchange>, now: DateTime<Utc>) -> ExecutionEngine {
        ExecutionEngine::new(exchange, SafetyLimits::default(), Default::default())
            .with_clock(Arc::new(ManualClock::new(now)))
    }

    #[tokio::test]
    async fn test_new_plan_is_not_immediately_due() {
        let store = Arc::new(MemoryScheduleStore::new());
        let mut scheduler =
            RecurringPurchaseScheduler::load(&config(vec![plan("btc", "weekly", 0)]), store.clone(), start())
                .unwrap();

        let schedule = scheduler.schedule("BTC").unwrap();
        assert_eq!(schedule.next_execution, Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap());
        assert_eq!(store.load().unwrap().len(), 1);

        let exchange = exchange();
        let engine = engine(exchange.clone(), start());
        let outcomes = scheduler.tick(start(), exchange.as_ref(), &engine).await.outcomes;
        assert!(matches!(&outcomes[0], TickOutcome::NotDue { wait, .. } if *wait > Duration::zero()));
        assert_eq!(scheduler.schedule("BTC").unwrap().execution_count, 0);
    }

    #[tokio::test]
    async fn test_due_purchase_executes_and_advances() {
        let store = Arc::new(MemoryScheduleStore::new());
        let mut scheduler =
            RecurringPurchaseScheduler::load(&config(vec![plan("BTC", "daily", 0)]), store.clone(), start())
                .unwrap();
        let due = Utc.with_ymd_and_hms(2024, 6, 4, 9, 0, 5).unwrap();

        let exchange = exchange();
        let engine = engine(exchange.clone(), due);
        let outcomes = scheduler.tick(due, exchange.as_ref(), &engine).await.outcomes;

        match &outcomes[0] {
            TickOutcome::Executed { record, next_execution } => {
                assert!(record.executed);
                assert_eq!(*next_execution, Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let schedule = scheduler.schedule("BTC").unwrap();
        assert_eq!(schedule.execution_count, 1);
        assert_eq!(schedule.total_invested, dec!(50));
        assert_eq!(schedule.total_purchased, dec!(0.00125));
        assert_eq!(schedule.average_cost(), Some(dec!(40000)));
        assert_eq!(schedule.last_executed, Some(due));
        assert_eq!(store.load().unwrap()[0].execution_count, 1);
    }

    #[tokio::test]
    async fn test_near_high_skip_still_advances() {
        let store = Arc::new(MemoryScheduleStore::new());
        let mut scheduler =
            RecurringPurchaseScheduler::load(&config(vec![plan("BTC", "weekly", 7)]), store.clone(), start())
                .unwrap();
        let due = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();

        let exchange = exchange();
        // price is 96% of the 7-day high
        exchange.set_price("BTC", dec!(48000));
        exchange.set_trailing_high("BTC", dec!(50000));
        let engine = engine(exchange.clone(), due);

        let outcomes = scheduler.tick(due, exchange.as_ref(), &engine).await.outcomes;

        assert_eq!(
            outcomes,
            vec![TickOutcome::SkippedNearHigh {
                asset: "BTC".into(),
                price: dec!(48000),
                high: dec!(50000),
                next_execution: Utc.with_ymd_and_hms(2024, 6, 17, 9, 0, 0).unwrap(),
            }]
        );
        let persisted = &store.load().unwrap()[0];
        assert_eq!(persisted.skipped_count, 1);
        assert_eq!(persisted.execution_count, 0);
        assert!(persisted.next_execution > due);
    }

    #[tokio::test]
    async fn test_missing_high_does_not_block_purchase() {
        let store = Arc::new(MemoryScheduleStore::new());
        let mut scheduler =
            RecurringPurchaseScheduler::load(&config(vec![plan("ETH", "hourly", 30)]), store, start()).unwrap();
        let due = start() + Duration::hours(1);

        let exchange = exchange();
        let engine = engine(exchange.clone(), due);
        let outcomes = scheduler.tick(due, exchange.as_ref(), &engine).await.outcomes;

        assert!(matches!(outcomes[0], TickOutcome::Executed { .. }));
        assert_eq!(scheduler.schedule("ETH").unwrap().execution_count, 1);
    }

    #[tokio::test]
    async fn test_failed_purchase_keeps_totals_but_advances() {
        let store = Arc::new(MemoryScheduleStore::new());
        let mut scheduler =
            RecurringPurchaseScheduler::load(&config(vec![plan("BTC", "daily", 0)]), store, start()).unwrap();
        let due = Utc.with_ymd_and_hms(2024, 6, 4, 9, 0, 0).unwrap();

        let mut executor = MockTradeExecutor::new();
        executor.expect_execute().times(1).returning(move |intent| {
            crate::engine::TradeRecord::unpriced(&intent, Default::default(), due, "exchange down")
        });

        let exchange = exchange();
        let outcomes = scheduler.tick(due, exchange.as_ref(), &executor).await.outcomes;

        assert!(matches!(outcomes[0], TickOutcome::Failed { .. }));
        let schedule = scheduler.schedule("BTC").unwrap();
        assert_eq!(schedule.execution_count, 0);
        assert_eq!(schedule.total_invested, Decimal::ZERO);
        assert_eq!(schedule.last_executed, None);
        assert_eq!(schedule.next_execution, Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_reload_keeps_progress_and_applies_config() {
        let store = Arc::new(MemoryScheduleStore::new());
        let cfg = config(vec![plan("BTC", "daily", 0), plan("ETH", "daily", 0)]);
        let mut scheduler = RecurringPurchaseScheduler::load(&cfg, store.clone(), start()).unwrap();
        let due = Utc.with_ymd_and_hms(2024, 6, 4, 9, 0, 0).unwrap();
        let exchange = exchange();
        let engine = engine(exchange.clone(), due);
        scheduler.tick(due, exchange.as_ref(), &engine).await;

        // restart with ETH removed, BTC amount changed, SOL added
        let mut btc = plan("BTC", "daily", 0);
        btc.usd_amount = dec!(75);
        let later = due + Duration::minutes(30);
        let reloaded =
            RecurringPurchaseScheduler::load(&config(vec![btc, plan("SOL", "weekly", 0)]), store.clone(), later)
                .unwrap();

        let btc = reloaded.schedule("BTC").unwrap();
        assert_eq!(btc.usd_amount, dec!(75));
        assert_eq!(btc.execution_count, 1);
        assert_eq!(btc.next_execution, Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap());
        assert!(reloaded.schedule("ETH").is_none());
        assert_eq!(reloaded.schedule("SOL").unwrap().cadence, Cadence::Weekly);
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_plan_is_ignored() {
        let mut disabled = plan("BTC", "hourly", 0);
        disabled.enabled = false;
        let store = Arc::new(MemoryScheduleStore::new());
        let mut scheduler = RecurringPurchaseScheduler::load(&config(vec![disabled]), store, start()).unwrap();

        let exchange = exchange();
        let later = start() + Duration::days(2);
        let engine = engine(exchange.clone(), later);
        let outcomes = scheduler.tick(later, exchange.as_ref(), &engine).await.outcomes;

        assert!(outcomes.is_empty());
        assert_eq!(scheduler.next_due(), None);
    }

    /// Store whose saves numbered in `failing` (1-based) error
    struct FlakyStore {
        inner: MemoryScheduleStore,
        saves: AtomicUsize,
        failing: std::ops::RangeInclusive<usize>,
    }

    impl ScheduleStore for FlakyStore {
        fn load(&self) -> Result<Vec<DcaSchedule>> {
            self.inner.load()
        }

        fn save(&self, schedules: &[DcaSchedule]) -> Result<()> {
            if self.failing.contains(&(self.saves.fetch_add(1, Ordering::SeqCst) + 1)) {
                return Err(PortfolioError::Persistence("disk full".into()));
            }
            self.inner.save(schedules)
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_outcomes_and_retries() {
        // save 1 happens on load, saves 2 and 3 follow the BTC and ETH purchases
        let store = Arc::new(FlakyStore {
            inner: MemoryScheduleStore::new(),
            saves: AtomicUsize::new(0),
            failing: 2..=3,
        });
        let cfg = config(vec![plan("BTC", "hourly", 0), plan("ETH", "hourly", 0)]);
        let mut scheduler = RecurringPurchaseScheduler::load(&cfg, store.clone(), start()).unwrap();
        let due = start() + Duration::hours(1);
        let exchange = exchange();
        let engine = engine(exchange.clone(), due);

        let report = scheduler.tick(due, exchange.as_ref(), &engine).await;

        assert!(matches!(report.persist_error, Some(PortfolioError::Persistence(_))));
        assert_eq!(report.records().filter(|r| r.executed).count(), 2);
        assert_eq!(scheduler.schedule("BTC").unwrap().execution_count, 1);
        assert_eq!(scheduler.schedule("ETH").unwrap().execution_count, 1);
        assert_eq!(store.load().unwrap()[0].execution_count, 0);

        // nothing due, but the unsaved progress is written now
        let later = due + Duration::minutes(10);
        let report = scheduler.tick(later, exchange.as_ref(), &engine).await;
        assert!(report.persist_error.is_none());
        assert!(report.records().next().is_none());
        let saved = store.load().unwrap();
        assert!(saved.iter().all(|s| s.execution_count == 1 && s.next_execution > later));
    }

    /// Paper exchange whose trailing-high lookup never answers
    struct StalledHighs(Arc<PaperExchange>);

    #[async_trait]
    impl ExchangeClient for StalledHighs {
        async fn get_spot_price(&self, asset: &str) -> Result<Decimal> {
            self.0.get_spot_price(asset).await
        }

        async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill> {
            self.0.place_market_order(order).await
        }

        async fn get_trailing_high(&self, _asset: &str, _days: u32) -> Result<Decimal> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_high_lookup_times_out_and_buys() {
        let store = Arc::new(MemoryScheduleStore::new());
        let mut scheduler =
            RecurringPurchaseScheduler::load(&config(vec![plan("BTC", "hourly", 7)]), store, start())
                .unwrap()
                .with_lookup_timeout(std::time::Duration::from_millis(50));
        let due = start() + Duration::hours(1);
        let paper = exchange();
        let stalled = StalledHighs(paper.clone());
        let engine = engine(paper, due);

        let report = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            scheduler.tick(due, &stalled, &engine),
        )
        .await
        .expect("tick should not hang on the high lookup");

        assert!(matches!(report.outcomes[0], TickOutcome::Executed { .. }));
        assert_eq!(scheduler.schedule("BTC").unwrap().skipped_count, 0);
    }
}
