//! Price bars and their ingestion checks.
//!
//! A [`Bar`] carries one OHLCV sample plus whatever indicator values and
//! pattern annotations the upstream calculators attached to it. The engine
//! never recomputes those; it only reads them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::error::TradesimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Bullish => "bullish",
            TrendDirection::Bearish => "bearish",
            TrendDirection::Neutral => "neutral",
        };
        f.write_str(s)
    }
}

impl FromStr for TrendDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bullish" | "bull" | "up" => Ok(TrendDirection::Bullish),
            "bearish" | "bear" | "down" => Ok(TrendDirection::Bearish),
            "neutral" | "none" => Ok(TrendDirection::Neutral),
            other => Err(format!("unknown trend direction '{other}'")),
        }
    }
}

/// A detected chart/candlestick pattern attached to a bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: String,
    pub start_index: usize,
    pub end_index: usize,
    /// 0-1 score from the recognizer.
    pub reliability: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
    #[serde(default)]
    pub patterns: Vec<PatternMatch>,
}

impl Bar {
    pub fn new(
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: BTreeMap::new(),
            patterns: Vec::new(),
        }
    }

    pub fn with_indicator(mut self, name: &str, value: f64) -> Self {
        self.indicators.insert(name.to_string(), value);
        self
    }

    pub fn with_pattern(mut self, pattern: PatternMatch) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }

    /// Case-insensitive lookup of a pattern annotation, optionally filtered by direction.
    pub fn has_pattern(&self, name: &str, direction: Option<TrendDirection>) -> bool {
        self.patterns.iter().any(|p| {
            p.pattern.eq_ignore_ascii_case(name) && direction.is_none_or(|d| p.direction == d)
        })
    }

    /// Check the bar's own fields; returns the reason on failure.
    pub fn check(&self) -> Result<(), String> {
        for (label, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(format!("{label} is not a finite number"));
            }
        }
        if self.high < self.low {
            return Err(format!("high {} is below low {}", self.high, self.low));
        }
        if self.open < self.low || self.open > self.high {
            return Err(format!(
                "open {} is outside the bar range [{}, {}]",
                self.open, self.low, self.high
            ));
        }
        if self.close < self.low || self.close > self.high {
            return Err(format!(
                "close {} is outside the bar range [{}, {}]",
                self.close, self.low, self.high
            ));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(format!("volume {} is negative or not finite", self.volume));
        }
        if let Some((name, value)) = self.indicators.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("indicator '{name}' has non-finite value {value}"));
        }
        Ok(())
    }
}

/// Validate a whole feed before it is replayed: every bar well-formed and
/// timestamps strictly ascending.
pub fn validate_bars(bars: &[Bar]) -> Result<(), TradesimError> {
    if bars.is_empty() {
        return Err(TradesimError::EmptyFeed);
    }

    for (index, bar) in bars.iter().enumerate() {
        bar.check().map_err(|reason| TradesimError::InvalidBar {
            index,
            timestamp: bar.timestamp,
            reason,
        })?;

        if index > 0 {
            let previous = bars[index - 1].timestamp;
            if bar.timestamp <= previous {
                return Err(TradesimError::UnorderedBars {
                    index,
                    previous,
                    current: bar.timestamp,
                });
            }
        }
    }

    Ok(())
}
