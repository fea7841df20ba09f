//! Open positions and closed round-trips.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use super::bar::Bar;
use super::order::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Only `Long` is ever opened by the execution simulator; short selling is
/// not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: PositionId,
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: NaiveDateTime,
    pub entry_bar: usize,
    pub entry_order: OrderId,
    pub entry_commission: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<NaiveDateTime>,
    pub realized_pnl: Option<f64>,
    /// Pending stop-loss exit synthesized for this position, if any.
    #[serde(skip)]
    pub stop_order: Option<OrderId>,
    /// Pending take-profit exit synthesized for this position, if any.
    #[serde(skip)]
    pub target_order: Option<OrderId>,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        let sign = match self.direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        sign * self.quantity * (price - self.entry_price)
    }

    pub fn stop_loss_breached(&self, bar: &Bar) -> bool {
        self.stop_loss.is_some_and(|stop| bar.low <= stop)
    }

    pub fn take_profit_reached(&self, bar: &Bar) -> bool {
        self.take_profit.is_some_and(|target| bar.high >= target)
    }
}

/// A completed entry/exit round-trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub position: Position,
    pub entry_order: OrderId,
    pub exit_order: OrderId,
    /// Price P&L: `(exit - entry) * quantity`. Commissions are reported separately.
    pub pnl: f64,
    pub return_pct: f64,
    #[serde(rename = "holding_secs", serialize_with = "serialize_secs")]
    pub holding_duration: Duration,
    pub holding_bars: usize,
    pub commission: f64,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration.num_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_long_position() -> Position {
        Position {
            id: PositionId(1),
            instrument: "ACME".into(),
            direction: Direction::Long,
            entry_price: 50.0,
            quantity: 100.0,
            entry_time: ts(15),
            entry_bar: 3,
            entry_order: OrderId(0),
            entry_commission: 0.0,
            stop_loss: Some(45.0),
            take_profit: Some(60.0),
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
            stop_order: None,
            target_order: None,
        }
    }

    fn bar_with_range(low: f64, high: f64) -> Bar {
        Bar::new(ts(16), low, high, low, high, 0.0)
    }

    #[test]
    fn market_value_long() {
        let pos = sample_long_position();
        assert!((pos.market_value(55.0) - 5500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrealized_pnl_long_profit_and_loss() {
        let pos = sample_long_position();
        assert!((pos.unrealized_pnl(55.0) - 500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(45.0) - (-500.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn unrealized_pnl_short_is_inverted() {
        let mut pos = sample_long_position();
        pos.direction = Direction::Short;
        assert!((pos.unrealized_pnl(45.0) - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stop_loss_uses_bar_low() {
        let pos = sample_long_position();
        assert!(pos.stop_loss_breached(&bar_with_range(44.0, 52.0)));
        assert!(pos.stop_loss_breached(&bar_with_range(45.0, 52.0)));
        assert!(!pos.stop_loss_breached(&bar_with_range(46.0, 52.0)));
    }

    #[test]
    fn take_profit_uses_bar_high() {
        let pos = sample_long_position();
        assert!(pos.take_profit_reached(&bar_with_range(50.0, 61.0)));
        assert!(pos.take_profit_reached(&bar_with_range(50.0, 60.0)));
        assert!(!pos.take_profit_reached(&bar_with_range(50.0, 59.0)));
    }

    #[test]
    fn thresholds_absent_never_trigger() {
        let mut pos = sample_long_position();
        pos.stop_loss = None;
        pos.take_profit = None;
        let wide = bar_with_range(0.01, 1_000_000.0);
        assert!(!pos.stop_loss_breached(&wide));
        assert!(!pos.take_profit_reached(&wide));
    }

    #[test]
    fn trade_classification() {
        let trade = Trade {
            position: sample_long_position(),
            entry_order: OrderId(0),
            exit_order: OrderId(4),
            pnl: -3.0,
            return_pct: -0.0006,
            holding_duration: Duration::days(2),
            holding_bars: 2,
            commission: 0.0,
        };
        assert!(trade.is_loss());
        assert!(!trade.is_win());
    }
}
