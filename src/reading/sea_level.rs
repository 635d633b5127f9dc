//! Global mean sea level readings.
//!
//! Three upstream shapes are understood: JPL whitespace-separated text
//! (`year_fraction gmsl_mm std_mm`), NOAA STAR regional CSV (decimal year in
//! the first column, one column per altimetry mission) and NOAA CO-OPS
//! monthly-mean JSON. All of them reduce to [`SeaLevelReading`]s. NASA CMR
//! granule searches only point at files, which are read as JPL text.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::YearWindow;
use crate::{
    error::{DecodeError, StoreError},
    table::{Table, Value},
};

pub const YEAR_COLUMN: &str = "Year";
pub const MONTH_COLUMN: &str = "Month";
pub const GMSL_COLUMN: &str = "GMSL_Variation_mm";
pub const STD_DEV_COLUMN: &str = "StdDev_mm";
pub const OBSERVATIONS_COLUMN: &str = "Total_Observations";
pub const RATE_COLUMN: &str = "Annual_Rate_mm";

const DEFAULT_JPL_STD_DEV_MM: f64 = 0.5;
const GAUGE_STD_DEV_MM: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeaLevelReading {
    pub year: i64,
    pub month: u32,
    pub gmsl_mm: f64,
    pub std_dev_mm: f64,
}

impl SeaLevelReading {
    fn from_decimal_year(year_fraction: f64, gmsl_mm: f64, std_dev_mm: f64) -> Self {
        let year = year_fraction.trunc() as i64;
        let month = (((year_fraction - year as f64) * 12.0) as u32 + 1).min(12);
        SeaLevelReading {
            year,
            month,
            gmsl_mm,
            std_dev_mm,
        }
    }
}

pub fn readings_to_table(readings: &[SeaLevelReading]) -> Result<Table, StoreError> {
    let mut table = Table::new([YEAR_COLUMN, MONTH_COLUMN, GMSL_COLUMN, STD_DEV_COLUMN]);
    for r in readings {
        table.push_row(vec![
            Value::Integer(r.year),
            Value::Integer(i64::from(r.month)),
            Value::Float(r.gmsl_mm),
            Value::Float(r.std_dev_mm),
        ])?;
    }
    Ok(table)
}

/// Reads a monthly table back into readings, skipping incomplete rows.
pub fn readings_from_table(table: &Table) -> Vec<SeaLevelReading> {
    let (Some(year), Some(month), Some(gmsl), Some(std)) = (
        table.column_index(YEAR_COLUMN),
        table.column_index(MONTH_COLUMN),
        table.column_index(GMSL_COLUMN),
        table.column_index(STD_DEV_COLUMN),
    ) else {
        return Vec::new();
    };

    table
        .rows()
        .iter()
        .filter_map(|row| {
            Some(SeaLevelReading {
                year: row[year].as_i64()?,
                month: u32::try_from(row[month].as_i64()?).ok()?,
                gmsl_mm: row[gmsl].as_f64()?,
                std_dev_mm: row[std].as_f64()?,
            })
        })
        .collect()
}

/// Parses JPL GMSL text. Lines with fewer than three numeric fields, comments
/// and header lines are skipped.
pub fn parse_jpl_text(text: &str) -> Vec<SeaLevelReading> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with('#')
                && !line.starts_with("HDR")
                && !line.to_lowercase().contains("year")
        })
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            let year_fraction = parts[0].parse::<f64>().ok()?;
            let gmsl_mm = parts[1].parse::<f64>().ok()?;
            let std_dev_mm = parts[2].parse::<f64>().unwrap_or(DEFAULT_JPL_STD_DEV_MM);
            Some(SeaLevelReading::from_decimal_year(
                year_fraction,
                gmsl_mm,
                std_dev_mm,
            ))
        })
        .collect()
}

/// Parses a NOAA STAR regional CSV. Only lines starting with a digit carry
/// data; the value is taken from the right-most populated mission column.
pub fn parse_star_csv(text: &str) -> Vec<SeaLevelReading> {
    text.lines()
        .filter(|line| line.starts_with(|c: char| c.is_ascii_digit()))
        .filter_map(|line| {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let year_fraction = cells.first()?.parse::<f64>().ok()?;
            let gmsl_mm = cells
                .iter()
                .skip(1)
                .rev()
                .find_map(|cell| cell.parse::<f64>().ok().filter(|v| v.is_finite()))?;
            Some(SeaLevelReading::from_decimal_year(
                year_fraction,
                gmsl_mm,
                GAUGE_STD_DEV_MM,
            ))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct GranuleSearch {
    feed: Option<GranuleFeed>,
}

#[derive(Debug, Deserialize)]
struct GranuleFeed {
    #[serde(default)]
    entry: Vec<Granule>,
}

#[derive(Debug, Deserialize)]
struct Granule {
    #[serde(default)]
    links: Vec<GranuleLink>,
}

#[derive(Debug, Deserialize)]
struct GranuleLink {
    href: Option<String>,
}

const GRANULES_SCANNED: usize = 10;
const TEXT_EXTENSIONS: [&str; 3] = [".txt", ".csv", ".ascii"];

/// Public text downloads linked from the first granules of a CMR search.
/// Links behind Earthdata login (`protected`) are left out.
pub fn public_data_links(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    let search: GranuleSearch = serde_json::from_slice(bytes)?;
    let feed = search.feed.ok_or(DecodeError::MissingField("feed"))?;

    Ok(feed
        .entry
        .into_iter()
        .take(GRANULES_SCANNED)
        .flat_map(|granule| granule.links)
        .filter_map(|link| link.href)
        .filter(|href| {
            let lower = href.to_lowercase();
            lower.contains("public") && TEXT_EXTENSIONS.iter().any(|ext| lower.contains(ext))
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct GaugeResponse {
    data: Option<Vec<GaugeEntry>>,
}

#[derive(Debug, Deserialize)]
struct GaugeEntry {
    month: String,
    #[serde(alias = "MSL")]
    v: String,
}

/// Parses one year of CO-OPS monthly means (metres) into millimetres.
pub fn parse_tide_gauge(bytes: &[u8], year: i64) -> Result<Vec<SeaLevelReading>, DecodeError> {
    let response: GaugeResponse = serde_json::from_slice(bytes)?;
    let entries = response.data.ok_or(DecodeError::MissingField("data"))?;

    entries
        .into_iter()
        .map(|entry| {
            let month = entry.month.trim().parse::<u32>().map_err(|_| {
                DecodeError::InvalidRecord(format!("month `{}`", entry.month))
            })?;
            let metres = entry
                .v
                .trim()
                .parse::<f64>()
                .map_err(|_| DecodeError::InvalidRecord(format!("level `{}`", entry.v)))?;
            Ok(SeaLevelReading {
                year,
                month,
                gmsl_mm: metres * 1000.0,
                std_dev_mm: GAUGE_STD_DEV_MM,
            })
        })
        .collect()
}

/// Averages readings that share a year and month.
pub fn average_by_month(readings: &[SeaLevelReading]) -> Vec<SeaLevelReading> {
    let mut groups: BTreeMap<(i64, u32), (f64, f64, usize)> = BTreeMap::new();
    for r in readings {
        let entry = groups.entry((r.year, r.month)).or_default();
        entry.0 += r.gmsl_mm;
        entry.1 += r.std_dev_mm;
        entry.2 += 1;
    }

    groups
        .into_iter()
        .map(|((year, month), (gmsl, std, n))| SeaLevelReading {
            year,
            month,
            gmsl_mm: gmsl / n as f64,
            std_dev_mm: std / n as f64,
        })
        .collect()
}

/// Fabricated series at the documented 3.85 mm/yr rise with slight
/// acceleration. Not a measurement.
pub fn synthesize(first_year: i64, last_year: i64) -> Vec<SeaLevelReading> {
    const BASE_RATE_MM: f64 = 3.85;
    const ACCELERATION_MM: f64 = 0.025;

    (first_year..=last_year)
        .flat_map(|year| {
            let elapsed = (year - first_year) as f64;
            let rate = BASE_RATE_MM + elapsed * ACCELERATION_MM;
            (1..=12u32).map(move |month| SeaLevelReading {
                year,
                month,
                gmsl_mm: elapsed * rate + (month as f64 / 12.0) * rate,
                std_dev_mm: 0.39,
            })
        })
        .collect()
}

pub fn filter_years(readings: Vec<SeaLevelReading>, window: YearWindow) -> Vec<SeaLevelReading> {
    readings
        .into_iter()
        .filter(|r| window.contains(r.year))
        .collect()
}

/// Shifts every reading so the mean of `baseline_year` is zero. Returns the
/// baseline that was subtracted, or `None` when that year has no readings.
pub fn rebase(readings: &mut [SeaLevelReading], baseline_year: i64) -> Option<f64> {
    let baseline: Vec<f64> = readings
        .iter()
        .filter(|r| r.year == baseline_year)
        .map(|r| r.gmsl_mm)
        .collect();
    if baseline.is_empty() {
        return None;
    }
    let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
    for r in readings.iter_mut() {
        r.gmsl_mm -= mean;
    }
    Some(mean)
}

/// Yearly means with the year-over-year rate. The first year has no
/// predecessor, it gets the mean of all rates (its own counted as zero).
pub fn to_yearly(readings: &[SeaLevelReading]) -> Result<Table, StoreError> {
    let mut years: BTreeMap<i64, (f64, f64, usize)> = BTreeMap::new();
    for r in readings {
        let entry = years.entry(r.year).or_default();
        entry.0 += r.gmsl_mm;
        entry.1 += r.std_dev_mm;
        entry.2 += 1;
    }

    let yearly: Vec<(i64, f64, f64, usize)> = years
        .into_iter()
        .map(|(year, (gmsl, std, n))| (year, gmsl / n as f64, std / n as f64, n))
        .collect();

    let mut rates: Vec<f64> = std::iter::once(0.0)
        .chain(yearly.windows(2).map(|w| w[1].1 - w[0].1))
        .collect();
    if !yearly.is_empty() {
        rates[0] = rates.iter().sum::<f64>() / rates.len() as f64;
    }

    let mut table = Table::new([
        YEAR_COLUMN,
        GMSL_COLUMN,
        STD_DEV_COLUMN,
        OBSERVATIONS_COLUMN,
        RATE_COLUMN,
    ]);
    for ((year, gmsl, std, n), rate) in yearly.into_iter().zip(rates) {
        table.push_row(vec![
            Value::Integer(year),
            Value::Float(gmsl),
            Value::Float(std),
            Value::Integer(n as i64),
            Value::Float(rate),
        ])?;
    }
    Ok(table)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(year: i64, month: u32, gmsl_mm: f64) -> SeaLevelReading {
        SeaLevelReading {
            year,
            month,
            gmsl_mm,
            std_dev_mm: 1.0,
        }
    }

    #[test]
    fn should_parse_jpl_text() {
        let text = "HDR Global Mean Sea Level\n# comment\nyear gmsl std\n\n2019.0417 10.5 0.8\n2019.9 12.0 abc\n2020.5 1.0\n";

        let readings = parse_jpl_text(text);

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0], SeaLevelReading { year: 2019, month: 1, gmsl_mm: 10.5, std_dev_mm: 0.8 });
        assert_eq!(readings[1].month, 11);
        assert_eq!(readings[1].std_dev_mm, 0.5);
    }

    #[test]
    fn should_parse_star_csv_from_last_populated_column() {
        let text = "year,TOPEX,Jason-3\n2019.50,,41.2\n2020.04,38.0,\nnot,a,row\n";

        let readings = parse_star_csv(text);

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].gmsl_mm, 41.2);
        assert_eq!(readings[0].month, 7);
        assert_eq!(readings[1].gmsl_mm, 38.0);
        assert_eq!(readings[1].month, 1);
    }

    #[test]
    fn should_parse_tide_gauge_in_millimetres() {
        let payload = br#"{"data": [{"year": "2019", "month": "2", "v": "0.125"}]}"#;

        let readings = parse_tide_gauge(payload, 2019).unwrap();

        assert_eq!(readings, vec![SeaLevelReading { year: 2019, month: 2, gmsl_mm: 125.0, std_dev_mm: 5.0 }]);
    }

    #[test]
    fn should_reject_tide_gauge_error_body() {
        let err = parse_tide_gauge(br#"{"error": {"message": "No data"}}"#, 2019).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("data")));
    }

    #[test]
    fn should_rebase_to_first_year_mean() {
        let mut readings = vec![reading(2019, 1, 10.0), reading(2019, 2, 20.0), reading(2020, 1, 25.0)];

        let baseline = rebase(&mut readings, 2019);

        assert_eq!(baseline, Some(15.0));
        assert_eq!(readings[0].gmsl_mm, -5.0);
        assert_eq!(readings[2].gmsl_mm, 10.0);
    }

    #[test]
    fn should_leave_readings_when_baseline_missing() {
        let mut readings = vec![reading(2020, 1, 25.0)];
        assert_eq!(rebase(&mut readings, 2019), None);
        assert_eq!(readings[0].gmsl_mm, 25.0);
    }

    #[test]
    fn should_aggregate_yearly_with_rates() {
        let readings = vec![
            reading(2019, 1, 0.0),
            reading(2019, 2, 2.0),
            reading(2020, 1, 5.0),
            reading(2021, 1, 11.0),
        ];

        let yearly = to_yearly(&readings).unwrap();

        assert_eq!(
            yearly.columns(),
            ["Year", "GMSL_Variation_mm", "StdDev_mm", "Total_Observations", "Annual_Rate_mm"]
        );
        let rates: Vec<f64> = yearly.column("Annual_Rate_mm").filter_map(Value::as_f64).collect();
        // rates are [mean(0, 4, 6), 4, 6]
        assert_eq!(rates, vec![10.0 / 3.0, 4.0, 6.0]);
        assert_eq!(yearly.rows()[0][3], Value::Integer(2));
    }

    #[test]
    fn should_synthesize_twelve_months_per_year() {
        let readings = synthesize(2019, 2024);
        assert_eq!(readings.len(), 72);
        assert!((readings[11].gmsl_mm - 3.85).abs() < 1e-9);
    }

    #[test]
    fn should_average_regions_by_month() {
        let averaged = average_by_month(&[reading(2019, 1, 2.0), reading(2019, 1, 4.0), reading(2019, 2, 1.0)]);
        assert_eq!(averaged.len(), 2);
        assert_eq!(averaged[0].gmsl_mm, 3.0);
    }

    #[test]
    fn should_read_back_monthly_table() {
        let readings = vec![reading(2019, 1, 1.5), reading(2019, 2, 2.0)];
        assert_eq!(readings_from_table(&readings_to_table(&readings).unwrap()), readings);
    }

    #[test]
    fn should_keep_public_text_links_only() {
        let payload = br#"{"feed": {"entry": [
            {"links": [
                {"href": "https://archive.podaac.earthdata.nasa.gov/public/gmsl/GMSL_V51.txt"},
                {"href": "https://archive.podaac.earthdata.nasa.gov/protected/gmsl/GMSL_V51.txt"},
                {"href": "https://archive.podaac.earthdata.nasa.gov/public/gmsl/GMSL_V51.nc"}
            ]},
            {"links": [{"rel": "metadata"}]},
            {}
        ]}}"#;

        let links = public_data_links(payload).unwrap();

        assert_eq!(
            links,
            vec!["https://archive.podaac.earthdata.nasa.gov/public/gmsl/GMSL_V51.txt".to_string()]
        );
    }

    #[test]
    fn should_require_granule_feed() {
        let err = public_data_links(br#"{"errors": ["bad short_name"]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("feed")));
    }
}
