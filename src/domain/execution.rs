//! Order book and fill simulation.
//!
//! The [`OrderBook`] is an append-only arena of every order placed during a
//! run, addressed by [`OrderId`]. The [`ExecutionSimulator`] walks the pending
//! orders once per bar, decides fills from the bar's range, and applies the
//! consequences to the [`Portfolio`]. Protective exits for open positions are
//! synthesized by [`synthesize_protective_orders`].

use tracing::{debug, warn};

use super::bar::Bar;
use super::order::{Order, OrderError, OrderId, OrderOrigin, OrderRequest, Side};
use super::portfolio::{Portfolio, PortfolioError};
use super::position::{Direction, Position, PositionId, Trade};

/// Commission parameters applied to every fill.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub commission_pct: f64,
}

/// Calculate commission: flat_fee + (trade_value * pct / 100).
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_per_trade + (trade_value * config.commission_pct / 100.0)
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
}

#[derive(Debug, Default, Clone)]
pub struct OrderBook {
    orders: Vec<Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp and store a request. Malformed requests are stored as rejected.
    pub fn submit(
        &mut self,
        instrument: &str,
        request: OrderRequest,
        bar: &Bar,
        bar_index: usize,
        origin: OrderOrigin,
    ) -> OrderId {
        let id = OrderId(self.orders.len() as u64);
        let defect = request.defect();
        let mut order = Order::new(id, instrument, request, bar.timestamp, bar_index, origin);

        if let Some(reason) = defect {
            warn!(order = %id, bar = bar_index, %reason, "order rejected at submission");
            if order.reject(reason).is_err() {
                debug!(order = %id, "submission rejection skipped");
            }
        }

        self.orders.push(order);
        id
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(id.0 as usize)
    }

    fn get_mut(&mut self, id: OrderId) -> Result<&mut Order, ExecutionError> {
        self.orders
            .get_mut(id.0 as usize)
            .ok_or(ExecutionError::UnknownOrder(id))
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn pending(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.is_pending())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn into_orders(self) -> Vec<Order> {
        self.orders
    }

    fn reject(&mut self, id: OrderId, reason: String) -> Result<(), ExecutionError> {
        warn!(order = %id, %reason, "order rejected");
        self.get_mut(id)?.reject(reason)?;
        Ok(())
    }

    /// Cancel `id` if it is still pending.
    fn cancel_if_pending(&mut self, id: OrderId) -> Result<bool, ExecutionError> {
        let order = self.get_mut(id)?;
        if !order.is_pending() {
            return Ok(false);
        }
        order.cancel()?;
        Ok(true)
    }
}

/// What a fill did to the book of positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillEvent {
    Opened { order: OrderId, position: PositionId },
    /// `trade` indexes `Portfolio::trades`.
    Closed { order: OrderId, trade: usize },
}

impl FillEvent {
    pub fn order(&self) -> OrderId {
        match *self {
            FillEvent::Opened { order, .. } | FillEvent::Closed { order, .. } => order,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionSimulator {
    config: ExecutionConfig,
    next_position_id: u64,
}

impl ExecutionSimulator {
    pub fn new(config: ExecutionConfig) -> Self {
        ExecutionSimulator {
            config,
            next_position_id: 0,
        }
    }

    /// Resolve every order placed before `bar_index` against `bar`, in
    /// submission order. Returns the fills in the order they happened.
    pub fn process_bar(
        &mut self,
        book: &mut OrderBook,
        portfolio: &mut Portfolio,
        bar: &Bar,
        bar_index: usize,
    ) -> Result<Vec<FillEvent>, ExecutionError> {
        let eligible: Vec<OrderId> = book
            .pending()
            .filter(|o| o.created_bar < bar_index)
            .map(|o| o.id)
            .collect();

        let mut events = Vec::new();
        for id in eligible {
            // An earlier fill on this bar may have cancelled it.
            let Some(order) = book.get(id).filter(|o| o.is_pending()) else {
                continue;
            };
            let side = order.side;
            let Some(price) = order.kind.fill_price(side, bar) else {
                continue;
            };

            let event = match side {
                Side::Buy => self.open_long(book, portfolio, id, price, bar, bar_index)?,
                Side::Sell => self.close_long(book, portfolio, id, price, bar, bar_index)?,
            };
            events.extend(event);
        }

        Ok(events)
    }

    fn open_long(
        &mut self,
        book: &mut OrderBook,
        portfolio: &mut Portfolio,
        id: OrderId,
        price: f64,
        bar: &Bar,
        bar_index: usize,
    ) -> Result<Option<FillEvent>, ExecutionError> {
        let order = book.get(id).ok_or(ExecutionError::UnknownOrder(id))?;
        let instrument = order.instrument.clone();

        if portfolio.has_position(&instrument) {
            book.reject(id, format!("a position in {instrument} is already open"))?;
            return Ok(None);
        }

        let quantity = order.quantity;
        let (stop_loss, take_profit) = (order.stop_loss, order.take_profit);
        let notional = price * quantity;
        let commission = calculate_commission(notional, &self.config);
        if notional + commission > portfolio.cash {
            book.reject(
                id,
                format!(
                    "insufficient cash: need {:.2}, have {:.2}",
                    notional + commission,
                    portfolio.cash
                ),
            )?;
            return Ok(None);
        }

        book.get_mut(id)?.fill(price, bar.timestamp, bar_index)?;
        portfolio.settle(Side::Buy, notional, commission);

        let position_id = PositionId(self.next_position_id);
        self.next_position_id += 1;

        portfolio.open_position(Position {
            id: position_id,
            instrument,
            direction: Direction::Long,
            entry_price: price,
            quantity,
            entry_time: bar.timestamp,
            entry_bar: bar_index,
            entry_order: id,
            entry_commission: commission,
            stop_loss,
            take_profit,
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
            stop_order: None,
            target_order: None,
        })?;

        debug!(order = %id, position = %position_id, price, quantity, bar = bar_index, "opened long");
        Ok(Some(FillEvent::Opened {
            order: id,
            position: position_id,
        }))
    }

    fn close_long(
        &mut self,
        book: &mut OrderBook,
        portfolio: &mut Portfolio,
        id: OrderId,
        price: f64,
        bar: &Bar,
        bar_index: usize,
    ) -> Result<Option<FillEvent>, ExecutionError> {
        let order = book.get(id).ok_or(ExecutionError::UnknownOrder(id))?;
        let instrument = order.instrument.clone();
        let requested = order.quantity;

        let Some(mut position) = portfolio.close_position(&instrument) else {
            book.reject(
                id,
                format!("no open position in {instrument}; short selling is not supported"),
            )?;
            return Ok(None);
        };

        // The whole position is settled regardless of the requested size.
        let quantity = position.quantity;
        if (requested - quantity).abs() > f64::EPSILON {
            debug!(order = %id, requested, quantity, "sell settles the full position");
        }

        book.get_mut(id)?.fill(price, bar.timestamp, bar_index)?;
        let notional = price * quantity;
        let commission = calculate_commission(notional, &self.config);
        portfolio.settle(Side::Sell, notional, commission);

        for protective in [position.stop_order, position.target_order]
            .into_iter()
            .flatten()
            .filter(|&p| p != id)
        {
            if book.cancel_if_pending(protective)? {
                debug!(order = %protective, position = %position.id, "protective order cancelled");
            }
        }

        let pnl = (price - position.entry_price) * quantity;
        let cost_basis = position.entry_price * quantity;
        let return_pct = if cost_basis > 0.0 { pnl / cost_basis } else { 0.0 };

        position.exit_price = Some(price);
        position.exit_time = Some(bar.timestamp);
        position.realized_pnl = Some(pnl);

        let trade = Trade {
            entry_order: position.entry_order,
            exit_order: id,
            pnl,
            return_pct,
            holding_duration: bar.timestamp - position.entry_time,
            holding_bars: bar_index - position.entry_bar,
            commission: position.entry_commission + commission,
            position,
        };

        debug!(order = %id, position = %trade.position.id, price, pnl, bar = bar_index, "closed long");
        portfolio.record_trade(trade);

        Ok(Some(FillEvent::Closed {
            order: id,
            trade: portfolio.trades.len() - 1,
        }))
    }
}

/// Queue stop-loss / take-profit exits for open positions whose thresholds
/// `bar` has crossed. At most one pending exit of each kind per position.
pub fn synthesize_protective_orders(
    book: &mut OrderBook,
    portfolio: &mut Portfolio,
    bar: &Bar,
    bar_index: usize,
) -> Vec<OrderId> {
    let instruments: Vec<String> = portfolio.positions().map(|p| p.instrument.clone()).collect();
    let mut created = Vec::new();

    for instrument in instruments {
        let Some(position) = portfolio.get_position_mut(&instrument) else {
            continue;
        };

        if position.stop_order.is_none() && position.stop_loss_breached(bar) {
            if let Some(stop) = position.stop_loss {
                let request = OrderRequest::stop(Side::Sell, position.quantity, stop);
                let origin = OrderOrigin::StopLoss(position.id);
                let id = book.submit(&instrument, request, bar, bar_index, origin);
                debug!(order = %id, position = %position.id, stop, bar = bar_index, "stop-loss exit queued");
                position.stop_order = Some(id);
                created.push(id);
            }
        }

        if position.target_order.is_none() && position.take_profit_reached(bar) {
            if let Some(target) = position.take_profit {
                let request = OrderRequest::limit(Side::Sell, position.quantity, target);
                let origin = OrderOrigin::TakeProfit(position.id);
                let id = book.submit(&instrument, request, bar, bar_index, origin);
                debug!(order = %id, position = %position.id, target, bar = bar_index, "take-profit exit queued");
                position.target_order = Some(id);
                created.push(id);
            }
        }
    }

    created
}
