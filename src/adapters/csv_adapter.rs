//! CSV file data adapter.
//!
//! One file per instrument, `<base_path>/<instrument>.csv`:
//!
//! ```text
//! timestamp,open,high,low,close,volume[,<indicator>...][,patterns]
//! ```
//!
//! Extra numeric columns become indicator values; an empty cell means the
//! indicator is not available on that bar. The optional `patterns` column
//! holds `name:direction:reliability[:start:end]` entries separated by `;`.

use crate::domain::bar::{Bar, PatternMatch};
use crate::domain::error::TradesimError;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::PathBuf;

const PRICE_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];
const PATTERN_COLUMN: &str = "patterns";

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, instrument: &str) -> PathBuf {
        self.base_path.join(format!("{instrument}.csv"))
    }

    /// Parse CSV text into bars. Rows are returned in file order; ordering is
    /// checked later by the engine.
    pub fn parse_bars(content: &str) -> Result<Vec<Bar>, TradesimError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV header error: {e}")))?
            .iter()
            .map(|h| h.to_lowercase())
            .collect();

        for (i, expected) in PRICE_COLUMNS.iter().enumerate() {
            if headers.get(i).map(String::as_str) != Some(*expected) {
                return Err(data_error(format!(
                    "column {} must be '{expected}', found {:?}",
                    i + 1,
                    headers.get(i)
                )));
            }
        }
        let extra: Vec<(usize, &str)> = headers
            .iter()
            .enumerate()
            .skip(PRICE_COLUMNS.len())
            .map(|(i, h)| (i, h.as_str()))
            .collect();

        let mut bars = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let line = row + 2;
            let record = result.map_err(|e| data_error(format!("CSV parse error: {e}")))?;

            let field = |i: usize| -> Result<&str, TradesimError> {
                record
                    .get(i)
                    .ok_or_else(|| data_error(format!("line {line}: missing {} column", headers[i])))
            };
            let number = |i: usize| -> Result<f64, TradesimError> {
                let raw = field(i)?;
                raw.parse::<f64>().map_err(|e| {
                    data_error(format!("line {line}: invalid {} value '{raw}': {e}", headers[i]))
                })
            };

            let raw_ts = field(0)?;
            let timestamp = parse_timestamp(raw_ts)
                .ok_or_else(|| data_error(format!("line {line}: invalid timestamp '{raw_ts}'")))?;
            let mut bar = Bar::new(
                timestamp,
                number(1)?,
                number(2)?,
                number(3)?,
                number(4)?,
                number(5)?,
            );

            for &(i, name) in &extra {
                let raw = record.get(i).unwrap_or("");
                if name == PATTERN_COLUMN {
                    for pattern in parse_patterns(raw, row).map_err(|reason| {
                        data_error(format!("line {line}: {reason}"))
                    })? {
                        bar = bar.with_pattern(pattern);
                    }
                } else if !raw.is_empty() {
                    bar = bar.with_indicator(name, number(i)?);
                }
            }
            bars.push(bar);
        }
        Ok(bars)
    }
}

fn data_error(reason: String) -> TradesimError {
    TradesimError::Data { reason }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `hammer:bullish:0.8;doji:neutral:0.5:3:4`. Start/end default to the row.
fn parse_patterns(raw: &str, row: usize) -> Result<Vec<PatternMatch>, String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            if parts.len() != 3 && parts.len() != 5 {
                return Err(format!("malformed pattern '{entry}'"));
            }
            let reliability: f64 = parts[2]
                .parse()
                .map_err(|_| format!("invalid reliability in pattern '{entry}'"))?;
            if !(0.0..=1.0).contains(&reliability) {
                return Err(format!(
                    "reliability {reliability} in pattern '{entry}' is outside [0, 1]"
                ));
            }
            let (start_index, end_index) = if parts.len() == 5 {
                let start = parts[3]
                    .parse()
                    .map_err(|_| format!("invalid start index in pattern '{entry}'"))?;
                let end = parts[4]
                    .parse()
                    .map_err(|_| format!("invalid end index in pattern '{entry}'"))?;
                (start, end)
            } else {
                (row, row)
            };
            Ok(PatternMatch {
                pattern: parts[0].to_string(),
                start_index,
                end_index,
                reliability,
                direction: parts[1].parse()?,
            })
        })
        .collect()
}

impl DataPort for CsvAdapter {
    fn load_bars(&self, instrument: &str) -> Result<Vec<Bar>, TradesimError> {
        let path = self.csv_path(instrument);
        if !path.exists() {
            return Err(TradesimError::NoData {
                instrument: instrument.to_string(),
            });
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| data_error(format!("failed to read {}: {}", path.display(), e)))?;
        let bars = Self::parse_bars(&content)?;
        if bars.is_empty() {
            return Err(TradesimError::NoData {
                instrument: instrument.to_string(),
            });
        }
        tracing::debug!(instrument, bars = bars.len(), path = %path.display(), "loaded bars");
        Ok(bars)
    }

    fn list_instruments(&self) -> Result<Vec<String>, TradesimError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            data_error(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut instruments = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| data_error(format!("directory entry error: {e}")))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    instruments.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        instruments.sort();
        Ok(instruments)
    }
}
