//! The capability a trading strategy offers the backtest engine.

use serde::Serialize;
use std::fmt;

use super::bar::Bar;
use super::order::{Order, OrderRequest};
use super::position::Trade;

/// Failure reported by a strategy callback.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct StrategyError {
    pub message: String,
}

impl StrategyError {
    pub fn new(message: impl Into<String>) -> Self {
        StrategyError {
            message: message.into(),
        }
    }
}

/// Which strategy callback was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Callback {
    Initialize,
    OnBar,
    OnTrade,
    OnOrderFilled,
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Callback::Initialize => "initialize",
            Callback::OnBar => "on_bar",
            Callback::OnTrade => "on_trade",
            Callback::OnOrderFilled => "on_order_filled",
        };
        f.write_str(s)
    }
}

/// A strategy reacts to bars by returning order requests.
///
/// The engine calls `initialize` once with the first bar, then `on_bar`
/// exactly once per bar in chronological order. Requests returned from bar
/// `i` become eligible to fill from bar `i + 1`. After fills on a bar are
/// applied, `on_trade` is delivered for each closed position and
/// `on_order_filled` for each filled order, in fill order.
pub trait Strategy {
    fn name(&self) -> &str {
        "strategy"
    }

    fn initialize(&mut self, _first_bar: &Bar) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_bar(&mut self, bar: &Bar) -> Result<Vec<OrderRequest>, StrategyError>;

    fn on_trade(&mut self, _trade: &Trade) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_order_filled(&mut self, _order: &Order) -> Result<(), StrategyError> {
        Ok(())
    }
}
