//! Rule AST for declarative strategies.
//!
//! - `Operand`: what can be compared (bar fields, constants, named indicators)
//! - `Rule`: comparison, composite, temporal and pattern variants
//!
//! `Display` renders a rule back into the DSL accepted by
//! [`rule_parser::parse`](super::rule_parser::parse).

use std::collections::BTreeSet;
use std::fmt;

use super::bar::TrendDirection;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Open,
    High,
    Low,
    Close,
    Volume,
    Constant(f64),
    /// Value of the named indicator column on the bar.
    Indicator(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    CrossAbove {
        left: Operand,
        right: Operand,
    },
    CrossBelow {
        left: Operand,
        right: Operand,
    },
    Above {
        left: Operand,
        right: Operand,
    },
    Below {
        left: Operand,
        right: Operand,
    },
    Between {
        operand: Operand,
        lower: f64,
        upper: f64,
    },
    Equals {
        left: Operand,
        right: Operand,
    },
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Not(Box<Rule>),
    Consecutive {
        rule: Box<Rule>,
        count: usize,
    },
    AnyOf {
        rule: Box<Rule>,
        count: usize,
    },
    /// A pattern annotation with this name is present on the bar.
    Pattern {
        name: String,
        direction: Option<TrendDirection>,
    },
}

impl Rule {
    /// Names of all indicator columns the rule reads.
    pub fn referenced_indicators(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_indicators(&mut names);
        names
    }

    fn collect_indicators(&self, names: &mut BTreeSet<String>) {
        fn add(names: &mut BTreeSet<String>, operand: &Operand) {
            if let Operand::Indicator(name) = operand {
                names.insert(name.clone());
            }
        }
        match self {
            Rule::CrossAbove { left, right }
            | Rule::CrossBelow { left, right }
            | Rule::Above { left, right }
            | Rule::Below { left, right }
            | Rule::Equals { left, right } => {
                add(names, left);
                add(names, right);
            }
            Rule::Between { operand, .. } => add(names, operand),
            Rule::And(rules) | Rule::Or(rules) => {
                for rule in rules {
                    rule.collect_indicators(names);
                }
            }
            Rule::Not(rule) | Rule::Consecutive { rule, .. } | Rule::AnyOf { rule, .. } => {
                rule.collect_indicators(names)
            }
            Rule::Pattern { .. } => {}
        }
    }

    /// How many bars before the current one the rule may look at.
    pub fn lookback(&self) -> usize {
        match self {
            Rule::CrossAbove { .. } | Rule::CrossBelow { .. } => 1,
            Rule::Above { .. }
            | Rule::Below { .. }
            | Rule::Between { .. }
            | Rule::Equals { .. }
            | Rule::Pattern { .. } => 0,
            Rule::And(rules) | Rule::Or(rules) => {
                rules.iter().map(Rule::lookback).max().unwrap_or(0)
            }
            Rule::Not(rule) => rule.lookback(),
            Rule::Consecutive { rule, count } | Rule::AnyOf { rule, count } => {
                rule.lookback() + count.saturating_sub(1)
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Open => f.write_str("open"),
            Operand::High => f.write_str("high"),
            Operand::Low => f.write_str("low"),
            Operand::Close => f.write_str("close"),
            Operand::Volume => f.write_str("volume"),
            Operand::Constant(v) => write!(f, "{v}"),
            Operand::Indicator(name) => f.write_str(name),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, keyword: &str, rules: &[Rule]) -> fmt::Result {
    write!(f, "{keyword}(")?;
    for (i, rule) in rules.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{rule}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::CrossAbove { left, right } => write!(f, "CROSS_ABOVE({left}, {right})"),
            Rule::CrossBelow { left, right } => write!(f, "CROSS_BELOW({left}, {right})"),
            Rule::Above { left, right } => write!(f, "ABOVE({left}, {right})"),
            Rule::Below { left, right } => write!(f, "BELOW({left}, {right})"),
            Rule::Equals { left, right } => write!(f, "EQUALS({left}, {right})"),
            Rule::Between {
                operand,
                lower,
                upper,
            } => write!(f, "BETWEEN({operand}, {lower}, {upper})"),
            Rule::And(rules) => write_list(f, "AND", rules),
            Rule::Or(rules) => write_list(f, "OR", rules),
            Rule::Not(rule) => write!(f, "NOT({rule})"),
            Rule::Consecutive { rule, count } => write!(f, "CONSECUTIVE({rule}, {count})"),
            Rule::AnyOf { rule, count } => write!(f, "ANY_OF({rule}, {count})"),
            Rule::Pattern {
                name,
                direction: None,
            } => write!(f, "PATTERN({name})"),
            Rule::Pattern {
                name,
                direction: Some(d),
            } => write!(f, "PATTERN({name}, {d})"),
        }
    }
}
