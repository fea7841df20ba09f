//! A long-only strategy driven by entry and exit rules.

use super::bar::Bar;
use super::order::{Order, OrderRequest, Side};
use super::position::Trade;
use super::rule::Rule;
use super::rule_eval::evaluate_latest;
use super::strategy::{Strategy, StrategyError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryOrder {
    Market,
    /// Limit at `close * (1 - offset_pct / 100)` of the signal bar. The order
    /// works until it fills; no second entry is placed meanwhile.
    Limit { offset_pct: f64 },
}

#[derive(Debug, Clone)]
pub struct RuleStrategy {
    pub name: String,
    pub description: String,
    pub entry: Rule,
    pub exit: Rule,
    pub quantity: f64,
    pub entry_order: EntryOrder,
    /// Percent below the entry reference price; 0 disables.
    pub stop_loss_pct: f64,
    /// Percent above the entry reference price; 0 disables.
    pub take_profit_pct: f64,
    history: Vec<Bar>,
    holding: bool,
    entry_working: bool,
    exit_working: bool,
}

impl RuleStrategy {
    pub fn new(name: impl Into<String>, entry: Rule, exit: Rule, quantity: f64) -> Self {
        RuleStrategy {
            name: name.into(),
            description: String::new(),
            entry,
            exit,
            quantity,
            entry_order: EntryOrder::Market,
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
            history: Vec::new(),
            holding: false,
            entry_working: false,
            exit_working: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_entry_order(mut self, entry_order: EntryOrder) -> Self {
        self.entry_order = entry_order;
        self
    }

    pub fn with_stop_loss_pct(mut self, pct: f64) -> Self {
        self.stop_loss_pct = pct;
        self
    }

    pub fn with_take_profit_pct(mut self, pct: f64) -> Self {
        self.take_profit_pct = pct;
        self
    }

    /// Bars kept for evaluation: enough for the deeper of the two rules.
    fn history_len(&self) -> usize {
        self.entry.lookback().max(self.exit.lookback()) + 1
    }

    fn entry_request(&self, bar: &Bar) -> OrderRequest {
        let (mut request, reference) = match self.entry_order {
            EntryOrder::Market => (OrderRequest::market(Side::Buy, self.quantity), bar.close),
            EntryOrder::Limit { offset_pct } => {
                let price = bar.close * (1.0 - offset_pct / 100.0);
                (OrderRequest::limit(Side::Buy, self.quantity, price), price)
            }
        };
        if self.stop_loss_pct > 0.0 {
            request = request.with_stop_loss(reference * (1.0 - self.stop_loss_pct / 100.0));
        }
        if self.take_profit_pct > 0.0 {
            request = request.with_take_profit(reference * (1.0 + self.take_profit_pct / 100.0));
        }
        request
    }
}

impl Strategy for RuleStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _first_bar: &Bar) -> Result<(), StrategyError> {
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(StrategyError::new(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        self.history.clear();
        self.holding = false;
        self.entry_working = false;
        self.exit_working = false;
        Ok(())
    }

    fn on_bar(&mut self, bar: &Bar) -> Result<Vec<OrderRequest>, StrategyError> {
        self.history.push(bar.clone());
        let keep = self.history_len();
        if self.history.len() > keep {
            self.history.drain(..self.history.len() - keep);
        }

        if self.holding {
            if !self.exit_working && evaluate_latest(&self.exit, &self.history) {
                self.exit_working = true;
                return Ok(vec![OrderRequest::market(Side::Sell, self.quantity)]);
            }
        } else if !self.entry_working && evaluate_latest(&self.entry, &self.history) {
            if matches!(self.entry_order, EntryOrder::Limit { .. }) {
                self.entry_working = true;
            }
            return Ok(vec![self.entry_request(bar)]);
        }

        Ok(vec![])
    }

    fn on_trade(&mut self, _trade: &Trade) -> Result<(), StrategyError> {
        self.holding = false;
        self.exit_working = false;
        Ok(())
    }

    fn on_order_filled(&mut self, order: &Order) -> Result<(), StrategyError> {
        if order.side == Side::Buy {
            self.holding = true;
            self.entry_working = false;
        }
        Ok(())
    }
}
