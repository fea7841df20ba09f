//! Performance metrics and statistics computed once a run has finished.
//!
//! Every ratio whose denominator is zero is reported as 0, except the profit
//! factor, which is `+inf` when there are winning trades and no losing ones
//! (serialized as `null` by `serde_json`).

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;

use super::bar::Bar;
use super::position::Trade;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Tail probability used for value-at-risk and expected shortfall.
pub const VAR_LEVEL: f64 = 0.05;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    /// Longest stretch of equity points below the running peak, in bars.
    pub max_drawdown_duration: usize,
    pub value_at_risk: f64,
    pub expected_shortfall: f64,
    pub beta: f64,
    pub alpha: f64,
    pub information_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    /// Signed: zero or negative.
    pub avg_loss: f64,
    pub largest_win: f64,
    /// Signed: zero or negative.
    pub largest_loss: f64,
    pub avg_holding_secs: f64,
    pub avg_holding_bars: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    #[serde(rename = "return")]
    pub value: f64,
}

impl Metrics {
    /// `benchmark` holds per-period returns aligned with the equity curve's
    /// returns (see [`benchmark_returns`]).
    pub fn compute(
        equity_curve: &[f64],
        trades: &[Trade],
        benchmark: &[f64],
        periods_per_year: f64,
        risk_free_rate: f64,
    ) -> Self {
        let returns = period_returns(equity_curve);
        let rf = risk_free_rate / periods_per_year;
        let ann = periods_per_year.sqrt();

        let total_return = match (equity_curve.first(), equity_curve.last()) {
            (Some(&first), Some(&last)) if first > 0.0 => (last - first) / first,
            _ => 0.0,
        };

        let annualized_return = if returns.is_empty() {
            0.0
        } else if 1.0 + total_return <= 0.0 {
            -1.0
        } else {
            (1.0 + total_return).powf(periods_per_year / returns.len() as f64) - 1.0
        };

        let mean_return = mean(&returns);
        let stddev = population_stddev(&returns);
        let volatility = stddev * ann;

        let sharpe_ratio = if stddev > 0.0 {
            (mean_return - rf) / stddev * ann
        } else {
            0.0
        };

        let downside = downside_deviation(&returns, rf);
        let sortino_ratio = if downside > 0.0 {
            (mean_return - rf) / downside * ann
        } else {
            0.0
        };

        let drawdowns = drawdown_curve(equity_curve);
        let max_drawdown = drawdowns.iter().copied().fold(0.0_f64, f64::max);
        let max_drawdown_duration = drawdown_duration(equity_curve);

        let calmar_ratio = if max_drawdown > 0.0 {
            annualized_return / max_drawdown
        } else {
            0.0
        };

        let (value_at_risk, expected_shortfall) = tail_risk(&returns, VAR_LEVEL);
        let (beta, alpha, information_ratio) =
            relative_to_benchmark(&returns, benchmark, rf, periods_per_year);

        let mut metrics = Metrics {
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            max_drawdown,
            max_drawdown_duration,
            value_at_risk,
            expected_shortfall,
            beta,
            alpha,
            information_ratio,
            ..Metrics::default()
        };
        metrics.apply_trade_stats(trades);
        metrics
    }

    fn apply_trade_stats(&mut self, trades: &[Trade]) {
        if trades.is_empty() {
            return;
        }

        let mut gross_win = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut holding_secs = 0.0_f64;
        let mut holding_bars = 0usize;

        for trade in trades {
            let pnl = trade.pnl;
            if trade.is_win() {
                self.winning_trades += 1;
                gross_win += pnl;
                self.largest_win = self.largest_win.max(pnl);
            } else if trade.is_loss() {
                self.losing_trades += 1;
                gross_loss += pnl;
                self.largest_loss = self.largest_loss.min(pnl);
            } else {
                self.breakeven_trades += 1;
            }
            holding_secs += trade.holding_duration.num_seconds() as f64;
            holding_bars += trade.holding_bars;
        }

        let total = trades.len();
        self.total_trades = total;
        self.win_rate = self.winning_trades as f64 / total as f64;

        self.profit_factor = if gross_loss < 0.0 {
            gross_win / gross_loss.abs()
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        if self.winning_trades > 0 {
            self.avg_win = gross_win / self.winning_trades as f64;
        }
        if self.losing_trades > 0 {
            self.avg_loss = gross_loss / self.losing_trades as f64;
        }
        self.avg_holding_secs = holding_secs / total as f64;
        self.avg_holding_bars = holding_bars as f64 / total as f64;
    }
}

/// Simple returns between consecutive equity points; 0 after a non-positive point.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let (prev, curr) = (w[0], w[1]);
            if prev > 0.0 { (curr - prev) / prev } else { 0.0 }
        })
        .collect()
}

/// Buy-and-hold close-to-close returns, one per bar; the first bar has no
/// predecessor and contributes 0.
pub fn benchmark_returns(bars: &[Bar]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(bars.windows(2).map(|w| {
            let (prev, curr) = (w[0].close, w[1].close);
            if prev > 0.0 { (curr - prev) / prev } else { 0.0 }
        }))
        .take(bars.len())
        .collect()
}

/// `(peak - equity) / peak` for every point of the curve.
pub fn drawdown_curve(equity_curve: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    equity_curve
        .iter()
        .map(|&equity| {
            peak = peak.max(equity);
            if peak > 0.0 { (peak - equity) / peak } else { 0.0 }
        })
        .collect()
}

fn drawdown_duration(equity_curve: &[f64]) -> usize {
    let mut peak = f64::NEG_INFINITY;
    let mut current = 0usize;
    let mut longest = 0usize;

    for &equity in equity_curve {
        if equity < peak {
            current += 1;
            longest = longest.max(current);
        } else {
            peak = equity;
            current = 0;
        }
    }

    longest
}

/// Group bars by calendar month. Each month's return is its last equity point
/// over the point recorded just before its first bar. `equity_curve[i + 1]`
/// is the equity after bar `i`.
pub fn monthly_returns(timestamps: &[NaiveDateTime], equity_curve: &[f64]) -> Vec<MonthlyReturn> {
    let mut months: Vec<MonthlyReturn> = Vec::new();
    let mut start_equity = 0.0;

    for (i, ts) in timestamps.iter().enumerate() {
        let Some(&end_equity) = equity_curve.get(i + 1) else {
            break;
        };
        let (year, month) = (ts.year(), ts.month());

        let same_month = months
            .last()
            .is_some_and(|m| m.year == year && m.month == month);
        if !same_month {
            start_equity = equity_curve[i];
            months.push(MonthlyReturn {
                year,
                month,
                value: 0.0,
            });
        }

        if let Some(current) = months.last_mut() {
            current.value = if start_equity > 0.0 {
                end_equity / start_equity - 1.0
            } else {
                0.0
            };
        }
    }

    months
}

/// Historical value-at-risk at `level` (linear interpolation between order
/// statistics) and the mean of returns at or below it.
fn tail_risk(returns: &[f64], level: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = level * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let var = sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64);

    let tail: Vec<f64> = sorted.iter().copied().take_while(|&r| r <= var).collect();
    (var, mean(&tail))
}

/// Beta, annualized Jensen's alpha and information ratio against `benchmark`.
fn relative_to_benchmark(
    returns: &[f64],
    benchmark: &[f64],
    rf: f64,
    periods_per_year: f64,
) -> (f64, f64, f64) {
    let n = returns.len().min(benchmark.len());
    if n == 0 {
        return (0.0, 0.0, 0.0);
    }
    let (r, b) = (&returns[..n], &benchmark[..n]);

    let (mean_r, mean_b) = (mean(r), mean(b));
    let covariance = r
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_r) * (y - mean_b))
        .sum::<f64>()
        / n as f64;
    let variance_b = population_stddev(b).powi(2);

    let beta = if variance_b > 0.0 {
        covariance / variance_b
    } else {
        0.0
    };
    let alpha = ((mean_r - rf) - beta * (mean_b - rf)) * periods_per_year;

    let active: Vec<f64> = r.iter().zip(b).map(|(x, y)| x - y).collect();
    let tracking_error = population_stddev(&active);
    let information_ratio = if tracking_error > 0.0 {
        mean(&active) / tracking_error * periods_per_year.sqrt()
    } else {
        0.0
    };

    (beta, alpha, information_ratio)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Population standard deviation of the returns below `target`; 0 with
/// fewer than two of them.
fn downside_deviation(returns: &[f64], target: f64) -> f64 {
    let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < target).collect();
    if downside.len() < 2 {
        return 0.0;
    }
    population_stddev(&downside)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderId;
    use crate::domain::position::{Direction, Position, PositionId};
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, NaiveDate};

    fn ts(month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn make_trade(pnl: f64, holding_days: i64, holding_bars: usize) -> Trade {
        Trade {
            position: Position {
                id: PositionId(0),
                instrument: "ACME".into(),
                direction: Direction::Long,
                entry_price: 100.0,
                quantity: 1.0,
                entry_time: ts(1, 1),
                entry_bar: 0,
                entry_order: OrderId(0),
                entry_commission: 0.0,
                stop_loss: None,
                take_profit: None,
                exit_price: Some(100.0 + pnl),
                exit_time: Some(ts(1, 1) + Duration::days(holding_days)),
                realized_pnl: Some(pnl),
                stop_order: None,
                target_order: None,
            },
            entry_order: OrderId(0),
            exit_order: OrderId(1),
            pnl,
            return_pct: pnl / 100.0,
            holding_duration: Duration::days(holding_days),
            holding_bars,
            commission: 0.0,
        }
    }

    fn compute(equity: &[f64], trades: &[Trade], ppy: f64) -> Metrics {
        Metrics::compute(equity, trades, &[], ppy, 0.0)
    }

    #[test]
    fn total_return_and_drawdown() {
        let m = compute(&[100.0, 110.0, 99.0, 121.0], &[], 252.0);
        assert_abs_diff_eq!(m.total_return, 0.21, epsilon = 1e-12);
        assert_abs_diff_eq!(m.max_drawdown, 0.1, epsilon = 1e-12);
        assert_eq!(m.max_drawdown_duration, 1);
    }

    #[test]
    fn monotonic_curve_has_no_drawdown() {
        let m = compute(&[100.0, 101.0, 102.0, 102.0, 105.0], &[], 252.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.max_drawdown_duration, 0);
        assert_eq!(m.calmar_ratio, 0.0);
    }

    #[test]
    fn drawdown_duration_counts_longest_run() {
        let curve = [100.0, 90.0, 95.0, 101.0, 99.0, 98.0, 97.0, 102.0];
        assert_eq!(drawdown_duration(&curve), 3);
    }

    #[test]
    fn drawdown_curve_tracks_running_peak() {
        let dd = drawdown_curve(&[100.0, 120.0, 90.0, 130.0]);
        assert_eq!(dd.len(), 4);
        assert_abs_diff_eq!(dd[0], 0.0);
        assert_abs_diff_eq!(dd[1], 0.0);
        assert_abs_diff_eq!(dd[2], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(dd[3], 0.0);
    }

    #[test]
    fn annualized_return_scales_by_periods() {
        let m = compute(&[100.0, 110.0, 121.0], &[], 2.0);
        assert_abs_diff_eq!(m.annualized_return, 0.21, epsilon = 1e-12);
    }

    #[test]
    fn annualized_return_wiped_out() {
        let m = compute(&[100.0, -10.0], &[], 252.0);
        assert_eq!(m.annualized_return, -1.0);
    }

    #[test]
    fn single_point_curve_is_all_zero() {
        let m = compute(&[100.0], &[], 252.0);
        assert_eq!(m, Metrics::default());
    }

    #[test]
    fn volatility_uses_population_stddev() {
        let m = compute(&[100.0, 110.0, 99.0], &[], 4.0);
        assert_abs_diff_eq!(m.volatility, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(m.sharpe_ratio, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn sortino_uses_stdev_of_returns_below_risk_free() {
        // Returns -0.1, -0.2, +0.1; the two losses have a stdev of 0.05.
        let m = compute(&[100.0, 90.0, 72.0, 79.2], &[], 1.0);
        let mean = (-0.1 - 0.2 + 0.1) / 3.0;
        assert_abs_diff_eq!(m.sortino_ratio, mean / 0.05, epsilon = 1e-9);
        assert_abs_diff_eq!(m.sortino_ratio, -4.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn sortino_downside_is_measured_against_risk_free() {
        // Per-period rf of 0.05 puts 0.02 and -0.02 below target, not 0.2.
        let m = Metrics::compute(&[100.0, 102.0, 99.96, 119.952], &[], &[], 1.0, 0.05);
        let returns = period_returns(&[100.0, 102.0, 99.96, 119.952]);
        let mean = returns.iter().sum::<f64>() / 3.0;
        assert_abs_diff_eq!(m.sortino_ratio, (mean - 0.05) / 0.02, epsilon = 1e-9);
    }

    #[test]
    fn sortino_zero_with_single_downside_return() {
        let m = compute(&[100.0, 120.0, 108.0], &[], 1.0);
        assert_eq!(m.sortino_ratio, 0.0);
    }

    #[test]
    fn sortino_zero_without_downside() {
        let m = compute(&[100.0, 110.0, 121.0], &[], 252.0);
        assert_eq!(m.sortino_ratio, 0.0);
    }

    #[test]
    fn value_at_risk_picks_order_statistic() {
        let returns: Vec<f64> = (1..=21).map(|k| (k as f64 - 11.0) / 100.0).collect();
        let (var, es) = tail_risk(&returns, VAR_LEVEL);
        assert_abs_diff_eq!(var, -0.09, epsilon = 1e-12);
        assert_abs_diff_eq!(es, -0.095, epsilon = 1e-12);
    }

    #[test]
    fn value_at_risk_interpolates() {
        let (var, es) = tail_risk(&[1.0, 0.0], VAR_LEVEL);
        assert_abs_diff_eq!(var, 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(es, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![
            make_trade(100.0, 2, 2),
            make_trade(-50.0, 4, 4),
            make_trade(0.0, 1, 1),
            make_trade(200.0, 3, 3),
            make_trade(-25.0, 5, 5),
        ];
        let m = compute(&[100.0, 100.0], &trades, 252.0);
        assert_eq!(m.total_trades, 5);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.losing_trades, 2);
        assert_eq!(m.breakeven_trades, 1);
        assert_abs_diff_eq!(m.win_rate, 0.4);
        assert_abs_diff_eq!(m.profit_factor, 4.0);
        assert_abs_diff_eq!(m.avg_win, 150.0);
        assert_abs_diff_eq!(m.avg_loss, -37.5);
        assert_abs_diff_eq!(m.largest_win, 200.0);
        assert_abs_diff_eq!(m.largest_loss, -50.0);
        assert_abs_diff_eq!(m.avg_holding_bars, 3.0);
        assert_abs_diff_eq!(m.avg_holding_secs, 3.0 * 86_400.0);
    }

    #[test]
    fn no_trades_zero_stats() {
        let m = compute(&[100.0, 105.0], &[], 252.0);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.avg_holding_secs, 0.0);
    }

    #[test]
    fn profit_factor_infinite_serializes_as_null() {
        let m = compute(&[100.0, 105.0], &[make_trade(5.0, 1, 1)], 252.0);
        assert!(m.profit_factor.is_infinite());
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"profit_factor\":null"));
    }

    #[test]
    fn benchmark_returns_align_with_bars() {
        let bars: Vec<Bar> = [100.0, 110.0, 99.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(ts(1, i as u32 + 1), c, c, c, c, 0.0))
            .collect();
        let b = benchmark_returns(&bars);
        assert_eq!(b.len(), 3);
        assert_abs_diff_eq!(b[0], 0.0);
        assert_abs_diff_eq!(b[1], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(b[2], -0.1, epsilon = 1e-12);
    }

    #[test]
    fn beta_against_benchmark() {
        let bench = [0.01, -0.02, 0.03, 0.0];
        let mut equity = vec![100.0];
        for r in bench {
            let last = *equity.last().unwrap();
            equity.push(last * (1.0 + 2.0 * r));
        }
        let m = Metrics::compute(&equity, &[], &bench, 252.0, 0.0);
        assert_abs_diff_eq!(m.beta, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.alpha, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn tracking_benchmark_exactly_gives_zero_information_ratio() {
        let bench = [0.01, -0.02, 0.03];
        let mut equity = vec![100.0];
        for r in bench {
            let last = *equity.last().unwrap();
            equity.push(last * (1.0 + r));
        }
        let m = Metrics::compute(&equity, &[], &bench, 252.0, 0.0);
        assert_abs_diff_eq!(m.beta, 1.0, epsilon = 1e-9);
        assert_eq!(m.information_ratio, 0.0);
    }

    #[test]
    fn monthly_returns_group_by_calendar_month() {
        let stamps = [ts(1, 30), ts(1, 31), ts(2, 1), ts(2, 2)];
        let equity = [100.0, 100.0, 110.0, 110.0, 121.0];
        let months = monthly_returns(&stamps, &equity);
        assert_eq!(months.len(), 2);
        assert_eq!((months[0].year, months[0].month), (2024, 1));
        assert_abs_diff_eq!(months[0].value, 0.1, epsilon = 1e-12);
        assert_eq!(months[1].month, 2);
        assert_abs_diff_eq!(months[1].value, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn monthly_returns_stop_at_processed_bars() {
        let stamps = [ts(1, 30), ts(2, 1), ts(3, 1)];
        let equity = [100.0, 105.0];
        let months = monthly_returns(&stamps, &equity);
        assert_eq!(months.len(), 1);
        assert_abs_diff_eq!(months[0].value, 0.05, epsilon = 1e-12);
    }
}
