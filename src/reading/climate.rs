//! World Bank CCKP timeseries payloads.
//!
//! The API answers `{"metadata": {...}, "data": {"AFG": {"1901-07": 12.1, ...}, ...}}`.
//! Saved copies sometimes nest the country map one level deeper, under
//! `data.data`. Entries that are not per-date objects are skipped, and so are
//! dates without a year.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use super::YearWindow;
use crate::{
    error::DecodeError,
    table::{Table, Value},
};

pub const COUNTRY_COLUMN: &str = "Country_Code";
pub const YEAR_COLUMN: &str = "Year";
pub const TEMPERATURE_COLUMN: &str = "Temperature";

#[derive(Debug, Deserialize)]
struct TimeseriesResponse {
    data: Option<BTreeMap<String, JsonValue>>,
}

/// Flattens the per-country map into `{Country_Code, Year, Temperature}` rows,
/// sorted by country then date.
pub fn decode_timeseries(bytes: &[u8], window: YearWindow) -> Result<Table, DecodeError> {
    let response: TimeseriesResponse = serde_json::from_slice(bytes)?;
    let mut countries = response.data.ok_or(DecodeError::MissingField("data"))?;
    if let Some(JsonValue::Object(nested)) = countries.remove("data") {
        countries = nested.into_iter().collect();
    }

    let mut table = Table::new([COUNTRY_COLUMN, YEAR_COLUMN, TEMPERATURE_COLUMN]);

    for (country, series) in countries {
        let JsonValue::Object(series) = series else {
            continue;
        };

        let series: BTreeMap<String, JsonValue> = series.into_iter().collect();
        for (date, temperature) in series {
            let Some(year) = parse_year(&date) else {
                warn!("{country}: skipping date `{date}` with no year");
                continue;
            };
            if !window.contains(year) {
                continue;
            }
            table
                .push_row(vec![
                    Value::Text(country.clone()),
                    Value::Integer(year),
                    Value::from(temperature.as_f64()),
                ])
                .map_err(|e| DecodeError::InvalidRecord(e.to_string()))?;
        }
    }

    Ok(table)
}

fn parse_year(date: &str) -> Option<i64> {
    let year: String = date
        .split('-')
        .next()?
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if year.is_empty() || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    year.parse().ok()
}

// -- Tests -------------------------------------------------------------------
