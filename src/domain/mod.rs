//! Core domain types and logic.

pub mod bar;
pub mod order;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod strategy;
pub mod backtest;
pub mod metrics;
pub mod sweep;
pub mod rule;
pub mod rule_parser;
pub mod rule_eval;
pub mod rule_strategy;
pub mod config_validation;
pub mod error;
