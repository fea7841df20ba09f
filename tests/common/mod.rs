#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};
use tradesim::domain::backtest::BacktestConfig;
use tradesim::domain::bar::Bar;
use tradesim::domain::error::TradesimError;
use tradesim::domain::order::{Order, OrderRequest};
use tradesim::domain::position::Trade;
use tradesim::domain::strategy::{Strategy, StrategyError};
use tradesim::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, instrument: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(instrument.to_string(), bars);
        self
    }

    pub fn with_error(mut self, instrument: &str, reason: &str) -> Self {
        self.errors.insert(instrument.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn load_bars(&self, instrument: &str) -> Result<Vec<Bar>, TradesimError> {
        if let Some(reason) = self.errors.get(instrument) {
            return Err(TradesimError::Data {
                reason: reason.clone(),
            });
        }
        match self.data.get(instrument) {
            Some(bars) if !bars.is_empty() => Ok(bars.clone()),
            _ => Err(TradesimError::NoData {
                instrument: instrument.to_string(),
            }),
        }
    }

    fn list_instruments(&self) -> Result<Vec<String>, TradesimError> {
        let mut names: Vec<String> = self.data.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

pub fn ts(date: &str) -> NaiveDateTime {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Flat bar: open = close, range of one either side.
pub fn make_bar(date: &str, close: f64) -> Bar {
    Bar::new(ts(date), close, close + 1.0, close - 1.0, close, 1_000.0)
}

pub fn make_ohlc(date: &str, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::new(ts(date), open, high, low, close, 1_000.0)
}

/// Daily bars on consecutive days from 2024-01-01 with the given closes.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let start = ts("2024-01-01");
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            Bar::new(
                start + chrono::Duration::days(i as i64),
                c,
                c + 1.0,
                c - 1.0,
                c,
                1_000.0,
            )
        })
        .collect()
}

pub fn generate_bars(start_date: &str, count: usize, start_price: f64) -> Vec<Bar> {
    let start = ts(start_date);
    (0..count)
        .map(|i| {
            let price = start_price + i as f64;
            Bar::new(
                start + chrono::Duration::days(i as i64),
                price,
                price + 1.0,
                price - 1.0,
                price,
                1_000.0,
            )
        })
        .collect()
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        instrument: "ACME".into(),
        initial_cash: 100_000.0,
        ..BacktestConfig::default()
    }
}

/// Emits preset requests on given bar indices and records every callback.
#[derive(Default)]
pub struct ScriptedStrategy {
    pub script: BTreeMap<usize, Vec<OrderRequest>>,
    pub fail_on_bar: Option<usize>,
    pub fail_on_trade: bool,
    pub fail_on_fill: bool,
    pub fail_on_initialize: bool,
    pub bars_seen: Vec<NaiveDateTime>,
    pub trades: Vec<Trade>,
    pub fills: Vec<Order>,
    /// Callback names in delivery order.
    pub log: Vec<String>,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, index: usize, request: OrderRequest) -> Self {
        self.script.entry(index).or_default().push(request);
        self
    }

    pub fn failing_on_bar(mut self, index: usize) -> Self {
        self.fail_on_bar = Some(index);
        self
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn initialize(&mut self, _first_bar: &Bar) -> Result<(), StrategyError> {
        self.log.push("initialize".into());
        if self.fail_on_initialize {
            return Err(StrategyError::new("initialize failed"));
        }
        Ok(())
    }

    fn on_bar(&mut self, bar: &Bar) -> Result<Vec<OrderRequest>, StrategyError> {
        let index = self.bars_seen.len();
        self.bars_seen.push(bar.timestamp);
        self.log.push(format!("on_bar:{index}"));
        if self.fail_on_bar == Some(index) {
            return Err(StrategyError::new(format!("scripted failure at {index}")));
        }
        Ok(self.script.remove(&index).unwrap_or_default())
    }

    fn on_trade(&mut self, trade: &Trade) -> Result<(), StrategyError> {
        self.log.push("on_trade".into());
        self.trades.push(trade.clone());
        if self.fail_on_trade {
            return Err(StrategyError::new("trade handler failed"));
        }
        Ok(())
    }

    fn on_order_filled(&mut self, order: &Order) -> Result<(), StrategyError> {
        self.log.push(format!("on_order_filled:{}", order.id));
        self.fills.push(order.clone());
        if self.fail_on_fill {
            return Err(StrategyError::new("fill handler failed"));
        }
        Ok(())
    }
}
