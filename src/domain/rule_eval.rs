//! Rule evaluation engine.
//!
//! Evaluates rules against the bars a strategy has seen so far, using the
//! indicator values and pattern annotations attached to each bar.
//!
//! # Evaluation Semantics
//!
//! - Comparison rules: evaluate at the given bar index
//! - Missing indicator values resolve to NaN, so any comparison is `false`
//! - `CROSS_ABOVE`/`CROSS_BELOW`: require `index >= 1`, return `false` at index 0
//! - `AND`: short-circuits on first `false`
//! - `OR`: short-circuits on first `true`
//! - `CONSECUTIVE(rule, N)`: child must be true for N consecutive bars ending at current
//! - `ANY_OF(rule, N)`: child must be true at least once in the last N bars
//! - `PATTERN(name, dir)`: the current bar carries a matching annotation

use crate::domain::bar::Bar;
use crate::domain::rule::{Operand, Rule};

const EPSILON: f64 = 1e-9;

/// Evaluate `rule` at `bar_index`. Indices past the end of `bars` are false.
pub fn evaluate(rule: &Rule, bars: &[Bar], bar_index: usize) -> bool {
    if bar_index >= bars.len() {
        return false;
    }

    match rule {
        Rule::CrossAbove { left, right } => {
            if bar_index == 0 {
                return false;
            }
            let (l_curr, r_curr) = resolve_pair(left, right, &bars[bar_index]);
            let (l_prev, r_prev) = resolve_pair(left, right, &bars[bar_index - 1]);
            l_curr > r_curr && l_prev <= r_prev
        }
        Rule::CrossBelow { left, right } => {
            if bar_index == 0 {
                return false;
            }
            let (l_curr, r_curr) = resolve_pair(left, right, &bars[bar_index]);
            let (l_prev, r_prev) = resolve_pair(left, right, &bars[bar_index - 1]);
            l_curr < r_curr && l_prev >= r_prev
        }
        Rule::Above { left, right } => {
            let (l, r) = resolve_pair(left, right, &bars[bar_index]);
            l > r
        }
        Rule::Below { left, right } => {
            let (l, r) = resolve_pair(left, right, &bars[bar_index]);
            l < r
        }
        Rule::Between {
            operand,
            lower,
            upper,
        } => {
            let val = resolve_operand(operand, &bars[bar_index]);
            val >= *lower && val <= *upper
        }
        Rule::Equals { left, right } => {
            let (l, r) = resolve_pair(left, right, &bars[bar_index]);
            (l - r).abs() < EPSILON
        }
        Rule::And(rules) => rules.iter().all(|r| evaluate(r, bars, bar_index)),
        Rule::Or(rules) => rules.iter().any(|r| evaluate(r, bars, bar_index)),
        Rule::Not(rule) => !evaluate(rule, bars, bar_index),
        Rule::Consecutive { rule, count } => {
            if *count == 0 || bar_index + 1 < *count {
                return false;
            }
            ((bar_index + 1 - *count)..=bar_index).all(|i| evaluate(rule, bars, i))
        }
        Rule::AnyOf { rule, count } => {
            if *count == 0 {
                return false;
            }
            let start = bar_index.saturating_sub(*count - 1);
            (start..=bar_index).any(|i| evaluate(rule, bars, i))
        }
        Rule::Pattern { name, direction } => bars[bar_index].has_pattern(name, *direction),
    }
}

/// Evaluate at the most recent bar.
pub fn evaluate_latest(rule: &Rule, bars: &[Bar]) -> bool {
    match bars.len() {
        0 => false,
        n => evaluate(rule, bars, n - 1),
    }
}

fn resolve_pair(left: &Operand, right: &Operand, bar: &Bar) -> (f64, f64) {
    (resolve_operand(left, bar), resolve_operand(right, bar))
}

fn resolve_operand(operand: &Operand, bar: &Bar) -> f64 {
    match operand {
        Operand::Open => bar.open,
        Operand::High => bar.high,
        Operand::Low => bar.low,
        Operand::Close => bar.close,
        Operand::Volume => bar.volume,
        Operand::Constant(v) => *v,
        Operand::Indicator(name) => bar.indicator(name).unwrap_or(f64::NAN),
    }
}
