//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::text_report;
use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest as run_engine};
use crate::domain::bar::{Bar, validate_bars};
use crate::domain::config_validation::{
    get_number, get_parsed, validate_backtest_config, validate_strategy_config,
};
use crate::domain::error::TradesimError;
use crate::domain::metrics::TRADING_DAYS_PER_YEAR;
use crate::domain::portfolio::CashAccounting;
use crate::domain::rule::Rule;
use crate::domain::rule_parser;
use crate::domain::rule_strategy::{EntryOrder, RuleStrategy};
use crate::domain::sweep::run_sweep as run_engine_sweep;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Parser, Debug)]
#[command(name = "tradesim", about = "Event-driven strategy backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Strategy file; defaults to the [strategy] section of --config
        #[arg(short, long)]
        strategy: Option<PathBuf>,
        /// Bar CSV file; defaults to <data_dir>/<instrument>.csv
        #[arg(short, long)]
        data: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Run one backtest per stop-loss value
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: Option<PathBuf>,
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Stop-loss percentages, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        stop_loss: Vec<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Validate a strategy configuration
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Show bar count, range and indicator columns of a data directory
    Info {
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(long)]
        instrument: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            strategy,
            data,
            json,
        } => run_backtest(&config, strategy.as_deref(), data.as_deref(), json),
        Command::Sweep {
            config,
            strategy,
            data,
            stop_loss,
            json,
        } => run_sweep(&config, strategy.as_deref(), data.as_deref(), &stop_loss, json),
        Command::Validate { strategy } => run_validate(&strategy),
        Command::Info {
            data_dir,
            instrument,
        } => run_info(&data_dir, instrument.as_deref()),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })
}

/// Everything a run needs, loaded and validated.
struct Prepared {
    config: BacktestConfig,
    strategy: RuleStrategy,
    bars: Vec<Bar>,
}

fn prepare(
    config_path: &Path,
    strategy_path: Option<&Path>,
    data_path: Option<&Path>,
) -> Result<Prepared, ExitCode> {
    // Stage 1: Load config, with the strategy file layered on top
    eprintln!("Loading config from {}", config_path.display());
    let mut adapter = load_config(config_path)?;
    if let Some(strat_path) = strategy_path {
        eprintln!("Loading strategy from {}", strat_path.display());
        adapter = adapter.merge_file(strat_path).map_err(|e| report(&e))?;
    }

    // Stage 2: Validate
    validate_backtest_config(&adapter).map_err(|e| report(&e))?;
    validate_strategy_config(&adapter).map_err(|e| report(&e))?;

    // Stage 3: Build engine inputs
    let strategy = build_strategy(&adapter)?;
    eprintln!("Loaded strategy: {}", strategy.name);
    let config = build_backtest_config(&adapter).map_err(|e| report(&e))?;

    // Stage 4: Load and check bars
    let bars = load_bars(&adapter, data_path, &config.instrument).map_err(|e| report(&e))?;
    validate_bars(&bars).map_err(|e| report(&e))?;
    check_indicator_columns(&strategy, &bars);
    eprintln!("Loaded {} bars for {}", bars.len(), config.instrument);

    Ok(Prepared {
        config,
        strategy,
        bars,
    })
}

fn report(e: &TradesimError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

fn run_backtest(
    config_path: &Path,
    strategy_path: Option<&Path>,
    data_path: Option<&Path>,
    json: bool,
) -> ExitCode {
    let Prepared {
        config,
        mut strategy,
        bars,
    } = match prepare(config_path, strategy_path, data_path) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let result = match run_engine(config, &bars, &mut strategy) {
        Ok(r) => r,
        Err(e) => return report(&e),
    };

    if !result.status.is_completed() {
        eprintln!("warning: {}", text_report::format_status(&result.status));
    }

    if json {
        print_json(&result)
    } else {
        print_text(&result);
        ExitCode::SUCCESS
    }
}

fn run_sweep(
    config_path: &Path,
    strategy_path: Option<&Path>,
    data_path: Option<&Path>,
    stop_losses: &[f64],
    json: bool,
) -> ExitCode {
    if let Some(bad) = stop_losses.iter().find(|v| !(0.0..100.0).contains(*v)) {
        let e = TradesimError::InvalidConfig {
            field: "stop_loss".into(),
            reason: format!("{bad} is not a percentage in [0, 100)"),
        };
        return report(&e);
    }

    let Prepared {
        config,
        strategy,
        bars,
    } = match prepare(config_path, strategy_path, data_path) {
        Ok(p) => p,
        Err(code) => return code,
    };

    eprintln!("Running {} backtests...", stop_losses.len());
    let runs = match run_engine_sweep(config, &bars, stop_losses, |&pct| {
        Ok(strategy.clone().with_stop_loss_pct(pct))
    }) {
        Ok(r) => r,
        Err(e) => return report(&e),
    };

    if json {
        return print_json(&runs);
    }
    print!(
        "{}",
        text_report::format_sweep_table(
            runs.iter()
                .map(|r| (format!("stop_loss={}", r.params), &r.result))
        )
    );
    ExitCode::SUCCESS
}

fn print_text(result: &BacktestResult) {
    println!("{}", text_report::format_summary(result));
    println!("Monthly returns");
    println!("{}", text_report::format_returns_grid(&result.monthly_returns));
    println!("Trades");
    print!("{}", text_report::format_trade_log(&result.trades));
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{s}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to serialize result: {e}");
            ExitCode::from(1)
        }
    }
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, TradesimError> {
    let instrument = adapter
        .get_string("backtest", "instrument")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TradesimError::ConfigMissing {
            section: "backtest".into(),
            key: "instrument".into(),
        })?;

    let config = BacktestConfig {
        instrument,
        initial_cash: get_number(adapter, "backtest", "initial_cash", 100_000.0)?,
        commission_per_trade: get_number(adapter, "backtest", "commission_per_trade", 0.0)?,
        commission_pct: get_number(adapter, "backtest", "commission_pct", 0.0)?,
        periods_per_year: get_number(
            adapter,
            "backtest",
            "periods_per_year",
            TRADING_DAYS_PER_YEAR,
        )?,
        risk_free_rate: get_number(adapter, "backtest", "risk_free_rate", 0.0)?,
        cash_accounting: get_parsed(
            adapter,
            "backtest",
            "cash_accounting",
            CashAccounting::default(),
        )?,
    };
    config.validate()?;
    Ok(config)
}

fn parse_rule(adapter: &dyn ConfigPort, key: &str) -> Result<Rule, ExitCode> {
    let text = adapter.get_string("strategy", key).unwrap_or_default();
    rule_parser::parse(&text).map_err(|e| {
        eprintln!(
            "error: failed to parse {key}:\n{}",
            e.display_with_context(&text)
        );
        ExitCode::from(&TradesimError::from(e))
    })
}

pub fn build_strategy(adapter: &dyn ConfigPort) -> Result<RuleStrategy, ExitCode> {
    let name = adapter
        .get_string("strategy", "name")
        .unwrap_or_else(|| "Unnamed".to_string());
    let description = adapter
        .get_string("strategy", "description")
        .unwrap_or_default();

    let entry = parse_rule(adapter, "entry")?;
    let exit = parse_rule(adapter, "exit")?;

    let number = |key: &str, default: f64| {
        get_number(adapter, "strategy", key, default).map_err(|e| report(&e))
    };

    let entry_order = match adapter
        .get_string("strategy", "entry_order")
        .map(|s| s.trim().to_lowercase())
        .as_deref()
    {
        Some("limit") => EntryOrder::Limit {
            offset_pct: number("limit_offset_pct", 0.0)?,
        },
        _ => EntryOrder::Market,
    };

    Ok(RuleStrategy::new(name, entry, exit, number("quantity", 1.0)?)
        .with_description(description)
        .with_entry_order(entry_order)
        .with_stop_loss_pct(number("stop_loss", 0.0)?)
        .with_take_profit_pct(number("take_profit", 0.0)?))
}

/// `-d` wins; otherwise `<data_dir>/<instrument>.csv` via the CSV adapter.
pub fn load_bars(
    adapter: &dyn ConfigPort,
    data_path: Option<&Path>,
    instrument: &str,
) -> Result<Vec<Bar>, TradesimError> {
    match data_path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|e| TradesimError::Data {
                reason: format!("failed to read {}: {}", path.display(), e),
            })?;
            let bars = CsvAdapter::parse_bars(&content)?;
            if bars.is_empty() {
                return Err(TradesimError::NoData {
                    instrument: instrument.to_string(),
                });
            }
            Ok(bars)
        }
        None => {
            let dir = adapter
                .get_string("backtest", "data_dir")
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
            CsvAdapter::new(PathBuf::from(dir)).load_bars(instrument)
        }
    }
}

/// Warn about rule indicators that no bar carries; those comparisons are always false.
fn check_indicator_columns(strategy: &RuleStrategy, bars: &[Bar]) {
    let available = indicator_columns(bars);
    let mut referenced = strategy.entry.referenced_indicators();
    referenced.extend(strategy.exit.referenced_indicators());
    for name in referenced.difference(&available) {
        tracing::warn!(indicator = %name, "rule references an indicator absent from every bar");
        eprintln!("warning: indicator '{name}' not found in data");
    }
}

fn indicator_columns(bars: &[Bar]) -> BTreeSet<String> {
    bars.iter()
        .flat_map(|b| b.indicators.keys().cloned())
        .collect()
}

fn run_validate(strategy_path: &Path) -> ExitCode {
    eprintln!("Validating strategy: {}", strategy_path.display());
    let adapter = match load_config(strategy_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_strategy_config(&adapter) {
        return report(&e);
    }

    for (label, key) in [("Entry Rule", "entry"), ("Exit Rule", "exit")] {
        let rule = match parse_rule(&adapter, key) {
            Ok(r) => r,
            Err(code) => return code,
        };
        eprintln!("\n{label}:");
        eprintln!("  Parsed:     {rule}");
        eprintln!(
            "  Raw:        {}",
            adapter.get_string("strategy", key).unwrap_or_default()
        );
        let indicators: Vec<String> = rule.referenced_indicators().into_iter().collect();
        if !indicators.is_empty() {
            eprintln!("  Indicators: {}", indicators.join(", "));
        }
        eprintln!("  Lookback:   {} bars", rule.lookback());
    }

    eprintln!("\nStrategy configuration is valid.");
    ExitCode::SUCCESS
}

fn run_info(data_dir: &Path, instrument: Option<&str>) -> ExitCode {
    let adapter = CsvAdapter::new(data_dir.to_path_buf());

    let instruments = match instrument {
        Some(i) => vec![i.to_string()],
        None => match adapter.list_instruments() {
            Ok(list) => list,
            Err(e) => return report(&e),
        },
    };
    if instruments.is_empty() {
        eprintln!("no instruments found in {}", data_dir.display());
        return ExitCode::SUCCESS;
    }

    let mut first_error: Option<TradesimError> = None;
    for name in &instruments {
        let bars = match adapter.load_bars(name).and_then(|bars| {
            validate_bars(&bars)?;
            Ok(bars)
        }) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("{name}: error: {e}");
                first_error.get_or_insert(e);
                continue;
            }
        };

        // Non-empty after load_bars.
        let (first, last) = (&bars[0], &bars[bars.len() - 1]);
        let indicators: Vec<String> = indicator_columns(&bars).into_iter().collect();
        println!(
            "{}: {} bars, {} to {}",
            name,
            bars.len(),
            first.timestamp,
            last.timestamp
        );
        if !indicators.is_empty() {
            println!("  indicators: {}", indicators.join(", "));
        }
    }

    match first_error {
        Some(e) => (&e).into(),
        None => ExitCode::SUCCESS,
    }
}
