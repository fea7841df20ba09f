//! Rule DSL parser.
//!
//! Recursive descent parser for the rule grammar. Converts text to AST with
//! meaningful error messages including character offset, expected/found tokens.
//!
//! ```text
//! rule     := cmp | BETWEEN(operand, num, num) | AND(rule, rule, ...)
//!           | OR(rule, rule, ...) | NOT(rule) | CONSECUTIVE(rule, int)
//!           | ANY_OF(rule, int) | PATTERN(ident [, direction])
//! cmp      := (ABOVE | BELOW | CROSS_ABOVE | CROSS_BELOW | EQUALS)(operand, operand)
//! operand  := open | high | low | close | volume | number | ident
//! ```

use crate::domain::bar::TrendDirection;
use crate::domain::error::ParseError;
use crate::domain::rule::{Operand, Rule};

const COMPARISONS: [&str; 5] = ["CROSS_ABOVE", "CROSS_BELOW", "ABOVE", "BELOW", "EQUALS"];

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{expected}', found '{ch}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of input"))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(is_ident_char)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            Ok(())
        } else {
            Err(self.error(format!("expected '{keyword}', found '{}'", self.peek_word())))
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self.remaining().chars().take_while(|&c| is_ident_char(c)).collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        if !self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(self.error(format!("expected identifier, found '{}'", self.peek_word())));
        }
        let word: String = self.remaining().chars().take_while(|&c| is_ident_char(c)).collect();
        self.pos += word.len();
        Ok(word)
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {num_str}"),
            position: start,
        })
    }

    /// Window length for temporal rules; must be at least 1.
    fn parse_count(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let digits: String = self
            .remaining()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        self.pos += digits.len();

        let count = digits.parse::<usize>().map_err(|_| ParseError {
            message: "expected integer".to_string(),
            position: start,
        })?;
        if count == 0 {
            return Err(ParseError {
                message: "count must be at least 1".to_string(),
                position: start,
            });
        }
        Ok(count)
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            return Ok(Operand::Constant(self.parse_number()?));
        }

        let start = self.pos;
        let name = self.parse_identifier()?;
        self.skip_whitespace();
        if self.peek() == Some('(') {
            return Err(ParseError {
                message: format!(
                    "'{name}(' is not an operand; reference indicators by column name, e.g. sma_20"
                ),
                position: start,
            });
        }

        Ok(match name.as_str() {
            "open" => Operand::Open,
            "high" => Operand::High,
            "low" => Operand::Low,
            "close" => Operand::Close,
            "volume" => Operand::Volume,
            _ => Operand::Indicator(name),
        })
    }

    fn parse_comparison(&mut self, keyword: &str) -> Result<Rule, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;
        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;

        Ok(match keyword {
            "CROSS_ABOVE" => Rule::CrossAbove { left, right },
            "CROSS_BELOW" => Rule::CrossBelow { left, right },
            "ABOVE" => Rule::Above { left, right },
            "BELOW" => Rule::Below { left, right },
            _ => Rule::Equals { left, right },
        })
    }

    fn parse_between(&mut self) -> Result<Rule, ParseError> {
        self.expect_keyword("BETWEEN")?;
        self.expect_char('(')?;
        let operand = self.parse_operand()?;
        self.expect_char(',')?;
        let lower = self.parse_number()?;
        self.expect_char(',')?;
        let upper = self.parse_number()?;
        self.expect_char(')')?;

        if lower > upper {
            return Err(self.error(format!(
                "BETWEEN lower bound {lower} is above upper bound {upper}"
            )));
        }
        Ok(Rule::Between {
            operand,
            lower,
            upper,
        })
    }

    /// `AND(...)` / `OR(...)`: at least two comma-separated rules.
    fn parse_list(&mut self, keyword: &str) -> Result<Vec<Rule>, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;

        let mut rules = vec![self.parse_rule()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
            rules.push(self.parse_rule()?);
        }

        if rules.len() < 2 {
            return Err(self.error(format!("{keyword} requires at least 2 rules")));
        }
        Ok(rules)
    }

    fn parse_not(&mut self) -> Result<Rule, ParseError> {
        self.expect_keyword("NOT")?;
        self.expect_char('(')?;
        let rule = self.parse_rule()?;
        self.expect_char(')')?;
        Ok(Rule::Not(Box::new(rule)))
    }

    fn parse_windowed(&mut self, keyword: &str) -> Result<(Box<Rule>, usize), ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;
        let rule = self.parse_rule()?;
        self.expect_char(',')?;
        let count = self.parse_count()?;
        self.expect_char(')')?;
        Ok((Box::new(rule), count))
    }

    fn parse_pattern(&mut self) -> Result<Rule, ParseError> {
        self.expect_keyword("PATTERN")?;
        self.expect_char('(')?;
        let name = self.parse_identifier()?;
        self.skip_whitespace();

        let direction = if self.peek() == Some(',') {
            self.advance();
            self.skip_whitespace();
            let start = self.pos;
            let word = self.parse_identifier()?;
            let direction = word.parse::<TrendDirection>().map_err(|message| ParseError {
                message,
                position: start,
            })?;
            Some(direction)
        } else {
            None
        };

        self.expect_char(')')?;
        Ok(Rule::Pattern { name, direction })
    }

    fn parse_rule(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();

        if let Some(keyword) = COMPARISONS.into_iter().find(|k| self.peek_keyword(k)) {
            return self.parse_comparison(keyword);
        }
        if self.peek_keyword("BETWEEN") {
            return self.parse_between();
        }
        if self.peek_keyword("AND") {
            return Ok(Rule::And(self.parse_list("AND")?));
        }
        if self.peek_keyword("OR") {
            return Ok(Rule::Or(self.parse_list("OR")?));
        }
        if self.peek_keyword("NOT") {
            return self.parse_not();
        }
        if self.peek_keyword("CONSECUTIVE") {
            let (rule, count) = self.parse_windowed("CONSECUTIVE")?;
            return Ok(Rule::Consecutive { rule, count });
        }
        if self.peek_keyword("ANY_OF") {
            let (rule, count) = self.parse_windowed("ANY_OF")?;
            return Ok(Rule::AnyOf { rule, count });
        }
        if self.peek_keyword("PATTERN") {
            return self.parse_pattern();
        }

        Err(self.error(format!("expected rule, found '{}'", self.peek_word())))
    }

    fn parse(&mut self) -> Result<Rule, ParseError> {
        let rule = self.parse_rule()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after rule: '{}'",
                self.remaining()
            )));
        }
        Ok(rule)
    }
}

pub fn parse(input: &str) -> Result<Rule, ParseError> {
    Parser::new(input).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ind(name: &str) -> Operand {
        Operand::Indicator(name.into())
    }

    #[test]
    fn parse_above() {
        let rule = parse("ABOVE(close, 100)").unwrap();
        assert_eq!(
            rule,
            Rule::Above {
                left: Operand::Close,
                right: Operand::Constant(100.0)
            }
        );
    }

    #[test]
    fn parse_indicator_columns() {
        let rule = parse("CROSS_ABOVE(sma_20, sma_50)").unwrap();
        assert_eq!(
            rule,
            Rule::CrossAbove {
                left: ind("sma_20"),
                right: ind("sma_50")
            }
        );
    }

    #[test]
    fn cross_keyword_not_confused_with_prefix() {
        assert!(matches!(
            parse("CROSS_BELOW(close, ema_10)").unwrap(),
            Rule::CrossBelow { .. }
        ));
        assert!(matches!(
            parse("BELOW(close, ema_10)").unwrap(),
            Rule::Below { .. }
        ));
    }

    #[test]
    fn parse_between_and_negative_numbers() {
        let rule = parse("BETWEEN(macd_hist, -0.5, 0.5)").unwrap();
        assert_eq!(
            rule,
            Rule::Between {
                operand: ind("macd_hist"),
                lower: -0.5,
                upper: 0.5
            }
        );
    }

    #[test]
    fn between_bounds_must_be_ordered() {
        let err = parse("BETWEEN(rsi_14, 70, 30)").unwrap_err();
        assert!(err.message.contains("lower bound"));
    }

    #[test]
    fn parse_nested_composites() {
        let rule = parse(
            "AND(ABOVE(close, sma_200), OR(BELOW(rsi_14, 30), PATTERN(hammer, bullish)), NOT(EQUALS(volume, 0)))",
        )
        .unwrap();
        match rule {
            Rule::And(children) => {
                assert_eq!(children.len(), 3);
                assert!(matches!(children[1], Rule::Or(_)));
                assert!(matches!(children[2], Rule::Not(_)));
            }
            other => panic!("expected AND, got {other:?}"),
        }
    }

    #[test]
    fn and_requires_two_children() {
        let err = parse("AND(ABOVE(close, 1))").unwrap_err();
        assert!(err.message.contains("at least 2"));
    }

    #[test]
    fn parse_temporal() {
        let rule = parse("CONSECUTIVE(ABOVE(close, open), 3)").unwrap();
        assert!(matches!(rule, Rule::Consecutive { count: 3, .. }));
        let rule = parse("ANY_OF(CROSS_ABOVE(close, sma_20), 5)").unwrap();
        assert!(matches!(rule, Rule::AnyOf { count: 5, .. }));
    }

    #[test]
    fn zero_window_rejected() {
        let err = parse("ANY_OF(ABOVE(close, open), 0)").unwrap_err();
        assert!(err.message.contains("at least 1"));
    }

    #[test]
    fn parse_pattern_with_and_without_direction() {
        assert_eq!(
            parse("PATTERN(doji)").unwrap(),
            Rule::Pattern {
                name: "doji".into(),
                direction: None
            }
        );
        assert_eq!(
            parse("PATTERN(engulfing, bearish)").unwrap(),
            Rule::Pattern {
                name: "engulfing".into(),
                direction: Some(TrendDirection::Bearish)
            }
        );
        let err = parse("PATTERN(doji, sideways)").unwrap_err();
        assert_eq!(err.position, 14);
    }

    #[test]
    fn function_style_indicator_rejected() {
        let err = parse("ABOVE(SMA(20), close)").unwrap_err();
        assert_eq!(err.position, 6);
        assert!(err.message.contains("column name"));
    }

    #[test]
    fn error_reports_position() {
        let err = parse("ABOVE(close 100)").unwrap_err();
        assert_eq!(err.position, 12);
        assert!(err.message.contains("expected ','"));
    }

    #[test]
    fn trailing_input_rejected() {
        let err = parse("ABOVE(close, 1) extra").unwrap_err();
        assert!(err.message.contains("unexpected input"));
    }

    #[test]
    fn unknown_rule_keyword() {
        let err = parse("ABOVEISH(close, 1)").unwrap_err();
        assert_eq!(err.position, 0);
        assert!(err.message.contains("ABOVEISH"));
    }

    #[test]
    fn display_round_trips() {
        let text = "OR(CROSS_ABOVE(sma_20, sma_50), CONSECUTIVE(ABOVE(close, 100.5), 2))";
        assert_eq!(parse(text).unwrap().to_string(), text);
    }
}
