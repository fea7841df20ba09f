//! Orders and their lifecycle.
//!
//! An order starts `Pending` and leaves that state exactly once, into one of
//! the terminal states `Filled`, `Cancelled` or `Rejected`. Transition methods
//! refuse to touch an order that is already terminal.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::bar::Bar;
use super::position::PositionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
    Stop { price: f64 },
    StopLimit { stop: f64, limit: f64 },
}

impl OrderKind {
    /// Price at which an order of this kind fills against `bar`, if it fills at all.
    ///
    /// | kind            | buy fills when         | sell fills when        | price |
    /// |-----------------|------------------------|------------------------|-------|
    /// | market          | always                 | always                 | close |
    /// | limit(P)        | low <= P               | high >= P              | P     |
    /// | stop(P)         | high >= P              | low <= P               | P     |
    /// | stop-limit(S,L) | high >= S and low <= L | low <= S and high >= L | L     |
    pub fn fill_price(&self, side: Side, bar: &Bar) -> Option<f64> {
        match (*self, side) {
            (OrderKind::Market, _) => Some(bar.close),
            (OrderKind::Limit { price }, Side::Buy) => (bar.low <= price).then_some(price),
            (OrderKind::Limit { price }, Side::Sell) => (bar.high >= price).then_some(price),
            (OrderKind::Stop { price }, Side::Buy) => (bar.high >= price).then_some(price),
            (OrderKind::Stop { price }, Side::Sell) => (bar.low <= price).then_some(price),
            (OrderKind::StopLimit { stop, limit }, Side::Buy) => {
                (bar.high >= stop && bar.low <= limit).then_some(limit)
            }
            (OrderKind::StopLimit { stop, limit }, Side::Sell) => {
                (bar.low <= stop && bar.high >= limit).then_some(limit)
            }
        }
    }

    fn prices(&self) -> Vec<f64> {
        match *self {
            OrderKind::Market => vec![],
            OrderKind::Limit { price } | OrderKind::Stop { price } => vec![price],
            OrderKind::StopLimit { stop, limit } => vec![stop, limit],
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Market => f.write_str("market"),
            OrderKind::Limit { price } => write!(f, "limit({price})"),
            OrderKind::Stop { price } => write!(f, "stop({price})"),
            OrderKind::StopLimit { stop, limit } => write!(f, "stop-limit({stop}, {limit})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

/// Who placed the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "position", rename_all = "snake_case")]
pub enum OrderOrigin {
    Strategy,
    StopLoss(PositionId),
    TakeProfit(PositionId),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("order {id} is {status:?} and can no longer change state")]
    NotPending { id: OrderId, status: OrderStatus },
}

/// An order as requested by a strategy, before the engine stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub kind: OrderKind,
    pub side: Side,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl OrderRequest {
    pub fn new(kind: OrderKind, side: Side, quantity: f64) -> Self {
        OrderRequest {
            kind,
            side,
            quantity,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn market(side: Side, quantity: f64) -> Self {
        Self::new(OrderKind::Market, side, quantity)
    }

    pub fn limit(side: Side, quantity: f64, price: f64) -> Self {
        Self::new(OrderKind::Limit { price }, side, quantity)
    }

    pub fn stop(side: Side, quantity: f64, price: f64) -> Self {
        Self::new(OrderKind::Stop { price }, side, quantity)
    }

    pub fn stop_limit(side: Side, quantity: f64, stop: f64, limit: f64) -> Self {
        Self::new(OrderKind::StopLimit { stop, limit }, side, quantity)
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    /// Reason the request cannot be accepted, if any.
    pub fn defect(&self) -> Option<String> {
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Some(format!("quantity {} must be positive", self.quantity));
        }
        let bad_price = self
            .kind
            .prices()
            .into_iter()
            .chain(self.stop_loss)
            .chain(self.take_profit)
            .find(|p| !p.is_finite() || *p <= 0.0);
        bad_price.map(|p| format!("price {p} must be positive"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: String,
    pub kind: OrderKind,
    pub side: Side,
    pub quantity: f64,
    pub created_at: NaiveDateTime,
    pub created_bar: usize,
    pub fill_price: Option<f64>,
    pub fill_time: Option<NaiveDateTime>,
    pub filled_bar: Option<usize>,
    pub status: OrderStatus,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub origin: OrderOrigin,
    pub reject_reason: Option<String>,
}

impl Order {
    pub fn new(
        id: OrderId,
        instrument: &str,
        request: OrderRequest,
        created_at: NaiveDateTime,
        created_bar: usize,
        origin: OrderOrigin,
    ) -> Self {
        Order {
            id,
            instrument: instrument.to_string(),
            kind: request.kind,
            side: request.side,
            quantity: request.quantity,
            created_at,
            created_bar,
            fill_price: None,
            fill_time: None,
            filled_bar: None,
            status: OrderStatus::Pending,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            origin,
            reject_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    fn ensure_pending(&self) -> Result<(), OrderError> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(OrderError::NotPending {
                id: self.id,
                status: self.status,
            })
        }
    }

    pub fn fill(&mut self, price: f64, time: NaiveDateTime, bar: usize) -> Result<(), OrderError> {
        self.ensure_pending()?;
        self.status = OrderStatus::Filled;
        self.fill_price = Some(price);
        self.fill_time = Some(time);
        self.filled_bar = Some(bar);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.ensure_pending()?;
        self.status = OrderStatus::Cancelled;
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.ensure_pending()?;
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason.into());
        Ok(())
    }
}
