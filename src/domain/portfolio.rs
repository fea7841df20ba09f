//! Cash, open positions, trade ledger and equity tracking.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use super::order::Side;
use super::position::{Position, Trade};

/// How a fill's notional moves cash.
///
/// `Signed` credits sells and debits buys. `DebitAll` debits
/// `price * quantity` on every fill regardless of side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashAccounting {
    #[default]
    Signed,
    DebitAll,
}

impl FromStr for CashAccounting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "signed" => Ok(CashAccounting::Signed),
            "debit_all" => Ok(CashAccounting::DebitAll),
            other => Err(format!(
                "unknown cash accounting '{other}' (expected signed or debit_all)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortfolioError {
    #[error("a position in {instrument} is already open")]
    PositionExists { instrument: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_cash: f64,
    pub accounting: CashAccounting,
    positions: BTreeMap<String, Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<f64>,
}

impl Portfolio {
    /// New portfolio with the equity curve seeded by the starting cash.
    pub fn new(initial_cash: f64, accounting: CashAccounting) -> Self {
        Portfolio {
            cash: initial_cash,
            initial_cash,
            accounting,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            equity_curve: vec![initial_cash],
        }
    }

    /// Apply a fill's notional and commission to cash.
    pub fn settle(&mut self, side: Side, notional: f64, commission: f64) {
        match (self.accounting, side) {
            (CashAccounting::Signed, Side::Sell) => self.cash += notional,
            _ => self.cash -= notional,
        }
        self.cash -= commission;
    }

    /// Open a position; refuses a second open position on the same instrument.
    pub fn open_position(&mut self, position: Position) -> Result<(), PortfolioError> {
        if self.positions.contains_key(&position.instrument) {
            return Err(PortfolioError::PositionExists {
                instrument: position.instrument,
            });
        }
        self.positions.insert(position.instrument.clone(), position);
        Ok(())
    }

    pub fn get_position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn get_position_mut(&mut self, instrument: &str) -> Option<&mut Position> {
        self.positions.get_mut(instrument)
    }

    pub fn has_position(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    pub fn close_position(&mut self, instrument: &str) -> Option<Position> {
        self.positions.remove(instrument)
    }

    /// Open positions in instrument order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn record_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    pub fn record_equity(&mut self, equity: f64) {
        self.equity_curve.push(equity);
    }

    /// cash + sum(quantity * price) over open positions with a known price.
    pub fn total_equity(&self, price_map: &HashMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .filter_map(|pos| {
                price_map
                    .get(&pos.instrument)
                    .map(|&price| pos.market_value(price))
            })
            .sum();
        self.cash + position_value
    }
}
