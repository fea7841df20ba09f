//! Bar feed port trait.

use crate::domain::bar::Bar;
use crate::domain::error::TradesimError;

pub trait DataPort {
    /// All bars for `instrument`, oldest first.
    fn load_bars(&self, instrument: &str) -> Result<Vec<Bar>, TradesimError>;

    fn list_instruments(&self) -> Result<Vec<String>, TradesimError>;
}
