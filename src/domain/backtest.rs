//! Backtest engine and event loop.
//!
//! For each bar, in order:
//! 1. resolve orders placed on earlier bars against this bar,
//! 2. deliver `on_trade` / `on_order_filled` for the fills,
//! 3. ask the strategy for new orders,
//! 4. queue protective exits for positions whose thresholds were crossed,
//! 5. mark equity at the bar's close.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use super::bar::{Bar, validate_bars};
use super::error::TradesimError;
use super::execution::{
    ExecutionConfig, ExecutionSimulator, FillEvent, OrderBook, synthesize_protective_orders,
};
use super::metrics::{
    Metrics, MonthlyReturn, TRADING_DAYS_PER_YEAR, benchmark_returns, drawdown_curve,
    monthly_returns,
};
use super::order::{Order, OrderOrigin};
use super::portfolio::{CashAccounting, Portfolio};
use super::position::{Position, Trade};
use super::strategy::{Callback, Strategy, StrategyError};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub instrument: String,
    pub initial_cash: f64,
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub periods_per_year: f64,
    pub risk_free_rate: f64,
    pub cash_accounting: CashAccounting,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            instrument: "UNKNOWN".into(),
            initial_cash: 100_000.0,
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            periods_per_year: TRADING_DAYS_PER_YEAR,
            risk_free_rate: 0.0,
            cash_accounting: CashAccounting::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), TradesimError> {
        let invalid = |field: &str, reason: String| TradesimError::InvalidConfig {
            field: field.into(),
            reason,
        };

        if self.instrument.trim().is_empty() {
            return Err(invalid("instrument", "must not be empty".into()));
        }
        if !self.initial_cash.is_finite() || self.initial_cash <= 0.0 {
            return Err(invalid(
                "initial_cash",
                format!("must be positive, got {}", self.initial_cash),
            ));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(invalid(
                "periods_per_year",
                format!("must be positive, got {}", self.periods_per_year),
            ));
        }
        for (field, value) in [
            ("commission_per_trade", self.commission_per_trade),
            ("commission_pct", self.commission_pct),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("must be non-negative, got {value}")));
            }
        }
        if !self.risk_free_rate.is_finite() {
            return Err(invalid("risk_free_rate", "must be finite".into()));
        }
        Ok(())
    }

    fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission_per_trade: self.commission_per_trade,
            commission_pct: self.commission_pct,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled {
        at_bar: usize,
    },
    StrategyFailed {
        /// `None` when `initialize` failed.
        bar_index: Option<usize>,
        callback: Callback,
        message: String,
    },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub instrument: String,
    pub strategy: String,
    pub status: RunStatus,
    pub bars_processed: usize,
    pub initial_cash: f64,
    pub final_cash: f64,
    pub final_equity: f64,
    /// `bars_processed + 1` points; the first is the initial cash.
    pub equity_curve: Vec<f64>,
    pub drawdown_curve: Vec<f64>,
    pub monthly_returns: Vec<MonthlyReturn>,
    pub trades: Vec<Trade>,
    pub orders: Vec<Order>,
    pub unfilled_orders: Vec<Order>,
    pub open_positions: Vec<Position>,
    /// Open positions marked to the last processed close.
    pub unrealized_pnl: f64,
    pub metrics: Metrics,
}

pub struct Backtest {
    config: BacktestConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl Backtest {
    pub fn new(config: BacktestConfig) -> Self {
        Backtest {
            config,
            cancel: None,
        }
    }

    /// Stop before the next bar once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn run(
        &self,
        bars: &[Bar],
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult, TradesimError> {
        self.config.validate()?;
        validate_bars(bars)?;

        let name = strategy.name().to_string();
        let instrument = self.config.instrument.as_str();
        if self.config.cash_accounting == CashAccounting::DebitAll {
            warn!(
                instrument,
                "debit_all cash accounting: sells debit cash instead of crediting it"
            );
        }
        info!(strategy = %name, instrument, bars = bars.len(), "backtest started");

        let mut run = RunState {
            instrument,
            book: OrderBook::new(),
            portfolio: Portfolio::new(self.config.initial_cash, self.config.cash_accounting),
            sim: ExecutionSimulator::new(self.config.execution_config()),
        };

        let mut status = RunStatus::Completed;
        if let Err(err) = strategy.initialize(&bars[0]) {
            status = strategy_failed(&name, None, Callback::Initialize, err);
        } else {
            for (index, bar) in bars.iter().enumerate() {
                if self.cancelled() {
                    info!(strategy = %name, at_bar = index, "backtest cancelled");
                    status = RunStatus::Cancelled { at_bar: index };
                    break;
                }
                if let Some((callback, err)) = run.step(bar, index, strategy)? {
                    status = strategy_failed(&name, Some(index), callback, err);
                    break;
                }
            }
        }

        let result = run.finish(&self.config, bars, name, status);
        info!(
            strategy = %result.strategy,
            bars = result.bars_processed,
            trades = result.trades.len(),
            total_return = result.metrics.total_return,
            "backtest finished"
        );
        Ok(result)
    }
}

/// Run `strategy` over `bars` with no cancellation flag.
pub fn run_backtest(
    config: BacktestConfig,
    bars: &[Bar],
    strategy: &mut dyn Strategy,
) -> Result<BacktestResult, TradesimError> {
    Backtest::new(config).run(bars, strategy)
}

fn strategy_failed(
    name: &str,
    bar_index: Option<usize>,
    callback: Callback,
    err: StrategyError,
) -> RunStatus {
    error!(strategy = name, %callback, bar = ?bar_index, error = %err, "strategy failed; stopping run");
    RunStatus::StrategyFailed {
        bar_index,
        callback,
        message: err.message,
    }
}

struct RunState<'a> {
    instrument: &'a str,
    book: OrderBook,
    portfolio: Portfolio,
    sim: ExecutionSimulator,
}

impl RunState<'_> {
    /// Process one bar. A strategy failure still records the bar's equity.
    fn step(
        &mut self,
        bar: &Bar,
        index: usize,
        strategy: &mut dyn Strategy,
    ) -> Result<Option<(Callback, StrategyError)>, TradesimError> {
        let events = self
            .sim
            .process_bar(&mut self.book, &mut self.portfolio, bar, index)?;

        let outcome = match self.dispatch_fills(&events, strategy) {
            Err(failure) => Some(failure),
            Ok(()) => match strategy.on_bar(bar) {
                Err(err) => Some((Callback::OnBar, err)),
                Ok(requests) => {
                    for request in requests {
                        self.book
                            .submit(self.instrument, request, bar, index, OrderOrigin::Strategy);
                    }
                    synthesize_protective_orders(&mut self.book, &mut self.portfolio, bar, index);
                    None
                }
            },
        };

        self.mark_equity(bar);
        Ok(outcome)
    }

    fn dispatch_fills(
        &self,
        events: &[FillEvent],
        strategy: &mut dyn Strategy,
    ) -> Result<(), (Callback, StrategyError)> {
        for event in events {
            if let FillEvent::Closed { trade, .. } = *event {
                if let Some(trade) = self.portfolio.trades.get(trade) {
                    strategy
                        .on_trade(trade)
                        .map_err(|e| (Callback::OnTrade, e))?;
                }
            }
            if let Some(order) = self.book.get(event.order()) {
                strategy
                    .on_order_filled(order)
                    .map_err(|e| (Callback::OnOrderFilled, e))?;
            }
        }
        Ok(())
    }

    fn mark_equity(&mut self, bar: &Bar) {
        let prices = HashMap::from([(self.instrument.to_string(), bar.close)]);
        let equity = self.portfolio.total_equity(&prices);
        self.portfolio.record_equity(equity);
    }

    fn finish(
        self,
        config: &BacktestConfig,
        bars: &[Bar],
        strategy: String,
        status: RunStatus,
    ) -> BacktestResult {
        let portfolio = self.portfolio;
        let equity_curve = portfolio.equity_curve.clone();
        let processed = &bars[..equity_curve.len() - 1];

        let timestamps: Vec<_> = processed.iter().map(|b| b.timestamp).collect();
        let metrics = Metrics::compute(
            &equity_curve,
            &portfolio.trades,
            &benchmark_returns(processed),
            config.periods_per_year,
            config.risk_free_rate,
        );

        let orders = self.book.into_orders();
        let unfilled_orders = orders.iter().filter(|o| o.is_pending()).cloned().collect();
        let open_positions: Vec<Position> = portfolio.positions().cloned().collect();
        let unrealized_pnl = processed
            .last()
            .map_or(0.0, |bar| open_positions.iter().map(|p| p.unrealized_pnl(bar.close)).sum());

        BacktestResult {
            instrument: config.instrument.clone(),
            strategy,
            status,
            bars_processed: processed.len(),
            initial_cash: portfolio.initial_cash,
            final_cash: portfolio.cash,
            final_equity: equity_curve.last().copied().unwrap_or(portfolio.initial_cash),
            drawdown_curve: drawdown_curve(&equity_curve),
            monthly_returns: monthly_returns(&timestamps, &equity_curve),
            equity_curve,
            trades: portfolio.trades,
            orders,
            unfilled_orders,
            open_positions,
            unrealized_pnl,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderRequest, OrderStatus, Side};
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::BTreeMap;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(ts(i as u32 + 1), c, c + 1.0, c - 1.0, c, 1_000.0))
            .collect()
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            instrument: "ACME".into(),
            initial_cash: 10_000.0,
            ..BacktestConfig::default()
        }
    }

    /// Emits the scripted requests on the given bar indices.
    #[derive(Default)]
    struct Scripted {
        script: BTreeMap<usize, Vec<OrderRequest>>,
        fail_on_bar: Option<usize>,
        seen: usize,
        trades: usize,
        fills: usize,
    }

    impl Scripted {
        fn at(mut self, index: usize, request: OrderRequest) -> Self {
            self.script.entry(index).or_default().push(request);
            self
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn on_bar(&mut self, _bar: &Bar) -> Result<Vec<OrderRequest>, StrategyError> {
            let index = self.seen;
            self.seen += 1;
            if self.fail_on_bar == Some(index) {
                return Err(StrategyError::new("boom"));
            }
            Ok(self.script.remove(&index).unwrap_or_default())
        }

        fn on_trade(&mut self, _trade: &Trade) -> Result<(), StrategyError> {
            self.trades += 1;
            Ok(())
        }

        fn on_order_filled(&mut self, _order: &Order) -> Result<(), StrategyError> {
            self.fills += 1;
            Ok(())
        }
    }

    #[test]
    fn default_config_is_valid() {
        let c = BacktestConfig::default();
        assert!(c.validate().is_ok());
        assert!((c.initial_cash - 100_000.0).abs() < f64::EPSILON);
        assert!((c.periods_per_year - 252.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_config_names_field() {
        let c = BacktestConfig {
            initial_cash: 0.0,
            ..config()
        };
        match c.validate() {
            Err(TradesimError::InvalidConfig { field, .. }) => assert_eq!(field, "initial_cash"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
        let c = BacktestConfig {
            commission_pct: -1.0,
            ..config()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn risk_free_rate_may_be_negative_but_finite() {
        let c = BacktestConfig {
            risk_free_rate: -0.005,
            ..config()
        };
        assert!(c.validate().is_ok());
        let c = BacktestConfig {
            risk_free_rate: f64::NAN,
            ..config()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn idle_strategy_keeps_cash_flat() {
        let mut s = Scripted::default();
        let result = run_backtest(config(), &bars(&[100.0, 101.0, 102.0]), &mut s).unwrap();
        assert!(result.status.is_completed());
        assert_eq!(result.bars_processed, 3);
        assert_eq!(result.equity_curve, vec![10_000.0; 4]);
        assert_eq!(result.drawdown_curve.len(), 4);
        assert_eq!(s.seen, 3);
    }

    #[test]
    fn round_trip_fills_on_following_bars() {
        let mut s = Scripted::default()
            .at(0, OrderRequest::market(Side::Buy, 10.0))
            .at(1, OrderRequest::market(Side::Sell, 10.0));
        let result = run_backtest(config(), &bars(&[100.0, 110.0, 90.0]), &mut s).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.position.entry_price, 110.0);
        assert_eq!(trade.position.exit_price, Some(90.0));
        assert!((trade.pnl - (-200.0)).abs() < 1e-9);
        assert_eq!(result.orders[0].filled_bar, Some(1));
        assert_eq!(result.orders[1].filled_bar, Some(2));
        assert_eq!(s.trades, 1);
        assert_eq!(s.fills, 2);
        assert!((result.final_cash - 9_800.0).abs() < 1e-9);
        assert_eq!(result.equity_curve, vec![10_000.0, 10_000.0, 10_000.0, 9_800.0]);
    }

    #[test]
    fn open_position_is_marked_to_close() {
        let mut s = Scripted::default().at(0, OrderRequest::market(Side::Buy, 10.0));
        let result = run_backtest(config(), &bars(&[100.0, 100.0, 120.0]), &mut s).unwrap();
        assert_eq!(result.equity_curve.last().copied(), Some(10_200.0));
        assert_eq!(result.open_positions.len(), 1);
        assert_eq!(result.unrealized_pnl, 200.0);
        assert!(result.trades.is_empty());
    }

    #[test]
    fn pending_orders_reported_at_end() {
        let mut s = Scripted::default().at(0, OrderRequest::limit(Side::Buy, 1.0, 1.0));
        let result = run_backtest(config(), &bars(&[100.0, 101.0]), &mut s).unwrap();
        assert_eq!(result.unfilled_orders.len(), 1);
        assert_eq!(result.unfilled_orders[0].status, OrderStatus::Pending);
    }

    #[test]
    fn cancellation_before_first_bar() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut s = Scripted::default();
        let result = Backtest::new(config())
            .with_cancel_flag(flag)
            .run(&bars(&[100.0, 101.0]), &mut s)
            .unwrap();
        assert_eq!(result.status, RunStatus::Cancelled { at_bar: 0 });
        assert_eq!(result.bars_processed, 0);
        assert_eq!(result.equity_curve, vec![10_000.0]);
    }

    #[test]
    fn failing_on_bar_stops_with_partial_result() {
        let mut s = Scripted {
            fail_on_bar: Some(1),
            ..Scripted::default()
        };
        let result = run_backtest(config(), &bars(&[100.0, 101.0, 102.0]), &mut s).unwrap();
        assert_eq!(
            result.status,
            RunStatus::StrategyFailed {
                bar_index: Some(1),
                callback: Callback::OnBar,
                message: "boom".into(),
            }
        );
        assert_eq!(result.bars_processed, 2);
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn invalid_bars_rejected_before_run() {
        let mut feed = bars(&[100.0, 101.0]);
        feed[1].timestamp = feed[0].timestamp;
        let mut s = Scripted::default();
        assert!(matches!(
            run_backtest(config(), &feed, &mut s),
            Err(TradesimError::UnorderedBars { .. })
        ));
        assert_eq!(s.seen, 0);
    }

    #[test]
    fn result_serializes_status_tag() {
        let mut s = Scripted::default();
        let result = run_backtest(config(), &bars(&[100.0]), &mut s).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"]["status"], "completed");
        assert_eq!(json["bars_processed"], 1);
    }
}
