//! Parameter sweeps: many independent backtests over one bar feed.
//!
//! Each run gets its own strategy from the caller's factory; the only thing
//! shared between runs is the immutable bar slice.

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use super::backtest::{Backtest, BacktestConfig, BacktestResult};
use super::bar::{Bar, validate_bars};
use super::error::TradesimError;
use super::strategy::Strategy;

#[derive(Debug, Clone, Serialize)]
pub struct SweepRun<P> {
    pub params: P,
    pub result: BacktestResult,
}

pub struct ParamSweep {
    config: BacktestConfig,
    parallel: bool,
}

impl ParamSweep {
    pub fn new(config: BacktestConfig) -> Self {
        ParamSweep {
            config,
            parallel: true,
        }
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run one backtest per parameter set. Results come back in the order of
    /// `params` regardless of scheduling.
    pub fn run<P, S, F>(
        &self,
        bars: &[Bar],
        params: &[P],
        factory: F,
    ) -> Result<Vec<SweepRun<P>>, TradesimError>
    where
        P: Clone + Send + Sync,
        S: Strategy,
        F: Fn(&P) -> Result<S, TradesimError> + Sync,
    {
        self.config.validate()?;
        validate_bars(bars)?;
        info!(runs = params.len(), parallel = self.parallel, "parameter sweep started");

        let run_one = |p: &P| -> Result<SweepRun<P>, TradesimError> {
            let mut strategy = factory(p)?;
            let result = Backtest::new(self.config.clone()).run(bars, &mut strategy)?;
            Ok(SweepRun {
                params: p.clone(),
                result,
            })
        };

        if self.parallel {
            params.par_iter().map(run_one).collect()
        } else {
            params.iter().map(run_one).collect()
        }
    }
}

/// Parallel sweep with default settings.
pub fn run_sweep<P, S, F>(
    config: BacktestConfig,
    bars: &[Bar],
    params: &[P],
    factory: F,
) -> Result<Vec<SweepRun<P>>, TradesimError>
where
    P: Clone + Send + Sync,
    S: Strategy,
    F: Fn(&P) -> Result<S, TradesimError> + Sync,
{
    ParamSweep::new(config).run(bars, params, factory)
}
