//! Configuration validation.
//!
//! Validates all config fields before a backtest runs.

use std::str::FromStr;

use crate::domain::error::TradesimError;
use crate::domain::portfolio::CashAccounting;
use crate::ports::config_port::ConfigPort;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    validate_instrument(config)?;
    validate_initial_cash(config)?;
    validate_commission(config)?;
    validate_periods_per_year(config)?;
    validate_risk_free_rate(config)?;
    validate_cash_accounting(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    validate_quantity(config)?;
    validate_stop_loss(config)?;
    validate_take_profit(config)?;
    validate_entry_order(config)?;
    validate_entry_exit_rules(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradesimError {
    TradesimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Read a numeric key; `default` when absent, an error when present but not a number.
pub fn get_number(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, TradesimError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(invalid(section, key, format!("'{raw}' is not a number"))),
        },
    }
}

/// Read a key through `FromStr`; `default` when absent.
pub fn get_parsed<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, TradesimError>
where
    T: FromStr<Err = String>,
{
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|reason| invalid(section, key, reason)),
    }
}

fn require_string(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<String, TradesimError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(TradesimError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn validate_instrument(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    require_string(config, "backtest", "instrument").map(|_| ())
}

fn validate_initial_cash(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    let value = get_number(config, "backtest", "initial_cash", 100_000.0)?;
    if value <= 0.0 {
        return Err(invalid("backtest", "initial_cash", "initial_cash must be positive"));
    }
    Ok(())
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    for key in ["commission_per_trade", "commission_pct"] {
        if get_number(config, "backtest", key, 0.0)? < 0.0 {
            return Err(invalid("backtest", key, format!("{key} must be non-negative")));
        }
    }
    Ok(())
}

fn validate_periods_per_year(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    let value = get_number(config, "backtest", "periods_per_year", 252.0)?;
    if value <= 0.0 {
        return Err(invalid(
            "backtest",
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }
    Ok(())
}

/// Any finite annual rate; negative rates are allowed.
fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    get_number(config, "backtest", "risk_free_rate", 0.0).map(|_| ())
}

fn validate_cash_accounting(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    get_parsed(config, "backtest", "cash_accounting", CashAccounting::default()).map(|_| ())
}

fn validate_quantity(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    let value = get_number(config, "strategy", "quantity", 1.0)?;
    if value <= 0.0 {
        return Err(invalid("strategy", "quantity", "quantity must be positive"));
    }
    Ok(())
}

fn validate_stop_loss(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    let value = get_number(config, "strategy", "stop_loss", 0.0)?;
    if !(0.0..100.0).contains(&value) {
        return Err(invalid(
            "strategy",
            "stop_loss",
            "stop_loss must be a percentage in [0, 100)",
        ));
    }
    Ok(())
}

fn validate_take_profit(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    let value = get_number(config, "strategy", "take_profit", 0.0)?;
    if value < 0.0 {
        return Err(invalid("strategy", "take_profit", "take_profit must be non-negative"));
    }
    Ok(())
}

fn validate_entry_order(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    let kind = config
        .get_string("strategy", "entry_order")
        .unwrap_or_else(|| "market".to_string());
    match kind.trim().to_lowercase().as_str() {
        "market" => Ok(()),
        "limit" => {
            let offset = get_number(config, "strategy", "limit_offset_pct", 0.0)?;
            if !(0.0..100.0).contains(&offset) {
                return Err(invalid(
                    "strategy",
                    "limit_offset_pct",
                    "limit_offset_pct must be a percentage in [0, 100)",
                ));
            }
            Ok(())
        }
        other => Err(invalid(
            "strategy",
            "entry_order",
            format!("unknown entry order '{other}' (expected market or limit)"),
        )),
    }
}

fn validate_entry_exit_rules(config: &dyn ConfigPort) -> Result<(), TradesimError> {
    require_string(config, "strategy", "entry")?;
    require_string(config, "strategy", "exit")?;
    Ok(())
}
