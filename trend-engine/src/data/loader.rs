use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use common::{BacktestError, Bar, Result};

/// Load bars from a CSV file with columns `timestamp,open,high,low,close,volume`.
pub fn load_csv(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path).map_err(|e| BacktestError::DataLoadError(e.to_string()))?;
    read_csv(BufReader::new(file))
}

/// Column positions of the OHLCV fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl Columns {
    const POSITIONAL: Columns = Columns {
        timestamp: 0,
        open: 1,
        high: 2,
        low: 3,
        close: 4,
        volume: 5,
    };

    /// Locate columns by header name (exchange exports often add extra
    /// columns); falls back to positional order when any name is missing.
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };
        let located = (
            find(&["timestamp", "time", "date", "datetime", "open_time"]),
            find(&["open", "o"]),
            find(&["high", "h"]),
            find(&["low", "l"]),
            find(&["close", "c"]),
            find(&["volume", "vol", "v"]),
        );
        match located {
            (Some(timestamp), Some(open), Some(high), Some(low), Some(close), Some(volume)) => {
                Columns {
                    timestamp,
                    open,
                    high,
                    low,
                    close,
                    volume,
                }
            }
            _ => Self::POSITIONAL,
        }
    }

    fn width(&self) -> usize {
        [
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// Parse CSV bars from any reader. Rows too short to hold every column are
/// skipped.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = match csv_reader.headers() {
        Ok(headers) => Columns::from_headers(headers),
        Err(e) => return Err(BacktestError::CsvError(e.to_string())),
    };
    let width = columns.width();

    let mut bars = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|e| BacktestError::CsvError(e.to_string()))?;
        if record.len() < width {
            continue;
        }

        bars.push(Bar::new(
            parse_timestamp(&record[columns.timestamp])?,
            parse_price(&record[columns.open], "open")?,
            parse_price(&record[columns.high], "high")?,
            parse_price(&record[columns.low], "low")?,
            parse_price(&record[columns.close], "close")?,
            parse_price(&record[columns.volume], "volume")?,
        ));
    }

    Ok(bars)
}

/// Load bars from a JSON array
pub fn load_json(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path).map_err(|e| BacktestError::DataLoadError(e.to_string()))?;
    let reader = BufReader::new(file);
    let bars: Vec<Bar> = serde_json::from_reader(reader)?;
    Ok(bars)
}

fn parse_price(s: &str, field: &str) -> Result<f64> {
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| BacktestError::CsvError(format!("Invalid {}: {}", field, s)))
}

/// Parse timestamp from various formats
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];
    for fmt in &datetime_formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    for fmt in &["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
        }
    }

    // Unix seconds
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(BacktestError::CsvError(format!(
        "Unable to parse timestamp: {}",
        s
    )))
}
