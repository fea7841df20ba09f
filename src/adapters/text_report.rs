//! Plain-text rendering of backtest results for the terminal.
//!
//! Provides functions to format:
//! - Run summary with the headline metrics
//! - Monthly/yearly returns grid
//! - Trade log (sorted by entry time)
//! - Sweep comparison table

use crate::domain::backtest::{BacktestResult, RunStatus};
use crate::domain::metrics::MonthlyReturn;
use crate::domain::position::Trade;
use std::collections::BTreeMap;
use std::fmt::Write;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn format_pct(value: f64) -> String {
    format!("{:+.2}%", value * 100.0)
}

fn format_ratio(value: f64) -> String {
    if value.is_infinite() {
        "inf".to_string()
    } else {
        format!("{value:.2}")
    }
}

pub fn format_status(status: &RunStatus) -> String {
    match status {
        RunStatus::Completed => "completed".to_string(),
        RunStatus::Cancelled { at_bar } => format!("cancelled before bar {at_bar}"),
        RunStatus::StrategyFailed {
            bar_index: Some(i),
            callback,
            message,
        } => format!("strategy failed in {callback} at bar {i}: {message}"),
        RunStatus::StrategyFailed {
            bar_index: None,
            callback,
            message,
        } => format!("strategy failed in {callback}: {message}"),
    }
}

pub fn format_summary(result: &BacktestResult) -> String {
    let m = &result.metrics;
    let mut out = String::new();

    let _ = writeln!(out, "Backtest: {} on {}", result.strategy, result.instrument);
    let _ = writeln!(out, "Status:   {}", format_status(&result.status));
    let _ = writeln!(out, "Bars:     {}", result.bars_processed);
    let _ = writeln!(out);

    let _ = writeln!(out, "Initial cash        {:>14.2}", result.initial_cash);
    let _ = writeln!(out, "Final cash          {:>14.2}", result.final_cash);
    let _ = writeln!(out, "Final equity        {:>14.2}", result.final_equity);
    let _ = writeln!(out);

    let rows: [(&str, String); 13] = [
        ("Total return", format_pct(m.total_return)),
        ("Annualized return", format_pct(m.annualized_return)),
        ("Volatility", format_pct(m.volatility)),
        ("Sharpe ratio", format_ratio(m.sharpe_ratio)),
        ("Sortino ratio", format_ratio(m.sortino_ratio)),
        ("Calmar ratio", format_ratio(m.calmar_ratio)),
        ("Max drawdown", format_pct(m.max_drawdown)),
        ("Max DD duration", format!("{} bars", m.max_drawdown_duration)),
        ("VaR (95%)", format_pct(m.value_at_risk)),
        ("Expected shortfall", format_pct(m.expected_shortfall)),
        ("Beta", format_ratio(m.beta)),
        ("Alpha", format_pct(m.alpha)),
        ("Information ratio", format_ratio(m.information_ratio)),
    ];
    for (label, value) in rows {
        let _ = writeln!(out, "{label:<20}{value:>14}");
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Trades              {:>14}  ({} won / {} lost / {} flat)",
        m.total_trades, m.winning_trades, m.losing_trades, m.breakeven_trades
    );
    let _ = writeln!(out, "Win rate            {:>14}", format_pct(m.win_rate));
    let _ = writeln!(out, "Profit factor       {:>14}", format_ratio(m.profit_factor));
    let _ = writeln!(out, "Avg win / loss      {:>14.2} / {:.2}", m.avg_win, m.avg_loss);
    let _ = writeln!(
        out,
        "Largest win / loss  {:>14.2} / {:.2}",
        m.largest_win, m.largest_loss
    );
    let _ = writeln!(out, "Avg holding         {:>11.1} bars", m.avg_holding_bars);

    if !result.unfilled_orders.is_empty() {
        let _ = writeln!(out, "Unfilled orders     {:>14}", result.unfilled_orders.len());
    }
    if !result.open_positions.is_empty() {
        let _ = writeln!(out, "Open positions      {:>14}", result.open_positions.len());
        let _ = writeln!(out, "Unrealized P&L      {:>14.2}", result.unrealized_pnl);
    }
    out
}

/// Year rows, month columns, compounded YTD at the end.
pub fn format_returns_grid(returns: &[MonthlyReturn]) -> String {
    if returns.is_empty() {
        return "No returns data available.\n".to_string();
    }

    let mut years: BTreeMap<i32, [Option<f64>; 12]> = BTreeMap::new();
    for r in returns {
        let entry = years.entry(r.year).or_insert([None; 12]);
        if let Some(slot) = (r.month as usize).checked_sub(1).and_then(|m| entry.get_mut(m)) {
            *slot = Some(r.value);
        }
    }

    let mut out = String::from("Year ");
    for month in MONTHS {
        let _ = write!(out, "{month:>8}");
    }
    out.push_str("      YTD\n");

    for (year, monthly) in &years {
        let _ = write!(out, "{year:<5}");
        let mut ytd = 1.0_f64;
        for ret in monthly {
            match ret {
                Some(r) => {
                    ytd *= 1.0 + r;
                    let _ = write!(out, "{:>8}", format_pct(*r));
                }
                None => {
                    let _ = write!(out, "{:>8}", "-");
                }
            }
        }
        let _ = writeln!(out, "{:>9}", format_pct(ytd - 1.0));
    }
    out
}

pub fn format_trade_log(trades: &[Trade]) -> String {
    if trades.is_empty() {
        return "No trades executed.\n".to_string();
    }

    let mut sorted: Vec<&Trade> = trades.iter().collect();
    sorted.sort_by_key(|t| t.position.entry_time);

    let mut out = format!(
        "{:>4}  {:<19}  {:<19}  {:>10}  {:>10}  {:>10}  {:>12}  {:>8}\n",
        "#", "Entry", "Exit", "Qty", "Entry px", "Exit px", "P&L", "Return"
    );
    for (i, trade) in sorted.iter().enumerate() {
        let exit_time = trade
            .position
            .exit_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:>4}  {:<19}  {:<19}  {:>10.2}  {:>10.2}  {:>10.2}  {:>12.2}  {:>8}",
            i + 1,
            trade.position.entry_time.format("%Y-%m-%d %H:%M:%S"),
            exit_time,
            trade.position.quantity,
            trade.position.entry_price,
            trade.position.exit_price.unwrap_or(f64::NAN),
            trade.pnl,
            format_pct(trade.return_pct),
        );
    }
    out
}

/// One row per sweep run: parameter label, status and headline metrics.
pub fn format_sweep_table<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = (String, &'a BacktestResult)>,
{
    let mut out = format!(
        "{:<16}  {:<10}  {:>10}  {:>8}  {:>10}  {:>7}\n",
        "Params", "Status", "Return", "Sharpe", "Max DD", "Trades"
    );
    for (label, result) in rows {
        let status = match result.status {
            RunStatus::Completed => "ok",
            RunStatus::Cancelled { .. } => "cancelled",
            RunStatus::StrategyFailed { .. } => "failed",
        };
        let m = &result.metrics;
        let _ = writeln!(
            out,
            "{:<16}  {:<10}  {:>10}  {:>8}  {:>10}  {:>7}",
            label,
            status,
            format_pct(m.total_return),
            format_ratio(m.sharpe_ratio),
            format_pct(m.max_drawdown),
            m.total_trades,
        );
    }
    out
}
