//! Domain error types.

use chrono::NaiveDateTime;

/// A parse error with position information for rule parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    ///
    /// `position` is a byte offset; the caret is indented by the number of
    /// characters before it.
    pub fn display_with_context(&self, input: &str) -> String {
        let column = input
            .get(..self.position)
            .map_or(self.position, |prefix| prefix.chars().count());
        let caret = " ".repeat(column) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for tradesim.
#[derive(Debug, thiserror::Error)]
pub enum TradesimError {
    #[error("bar feed is empty")]
    EmptyFeed,

    #[error("invalid bar {index} at {timestamp}: {reason}")]
    InvalidBar {
        index: usize,
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("bar {index} at {current} is not after previous bar at {previous}")]
    UnorderedBars {
        index: usize,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("invalid backtest config {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {instrument}")]
    NoData { instrument: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    #[error("invalid rule: {reason}")]
    RuleInvalid { reason: String },

    #[error("execution engine: {0}")]
    Execution(#[from] super::execution::ExecutionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&TradesimError> for std::process::ExitCode {
    fn from(err: &TradesimError) -> Self {
        let code: u8 = match err {
            TradesimError::Io(_) | TradesimError::Execution(_) => 1,
            TradesimError::ConfigParse { .. }
            | TradesimError::ConfigMissing { .. }
            | TradesimError::ConfigInvalid { .. }
            | TradesimError::InvalidConfig { .. } => 2,
            TradesimError::Data { .. } | TradesimError::NoData { .. } => 3,
            TradesimError::RuleParse(_) | TradesimError::RuleInvalid { .. } => 4,
            TradesimError::EmptyFeed
            | TradesimError::InvalidBar { .. }
            | TradesimError::UnorderedBars { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parse_error_context_points_at_offset() {
        let err = ParseError {
            message: "expected ')'".into(),
            position: 6,
        };
        let rendered = err.display_with_context("ABOVE(close");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "ABOVE(close");
        assert_eq!(lines[1], "      ^");
        assert!(lines[2].contains("position 6"));
    }

    #[test]
    fn parse_error_caret_counts_characters_not_bytes() {
        let input = "ABOVE(é_sma close)";
        let err = crate::domain::rule_parser::parse(input).unwrap_err();
        assert_eq!(err.position, 13);
        let rendered = err.display_with_context(input);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], format!("{}^", " ".repeat(12)));
        assert_eq!(lines[0].chars().nth(12), Some('c'));
    }

    #[test]
    fn invalid_bar_message_names_the_bar() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let err = TradesimError::InvalidBar {
            index: 7,
            timestamp: ts,
            reason: "high 9 is below low 10".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bar 7"));
        assert!(msg.contains("2024-03-01"));
        assert!(msg.contains("high 9 is below low 10"));
    }

    #[test]
    fn rule_parse_converts_from_parse_error() {
        let err: TradesimError = ParseError {
            message: "bad".into(),
            position: 0,
        }
        .into();
        assert!(matches!(err, TradesimError::RuleParse(_)));
    }
}
