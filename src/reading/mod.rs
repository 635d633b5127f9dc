//! Parsers that turn remote payloads into tables.

pub mod climate;
pub mod ocean_regions;
pub mod sdmx;
pub mod sea_level;

pub use sea_level::SeaLevelReading;

/// Inclusive year window applied while flattening.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct YearWindow {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl YearWindow {
    pub fn new(from: Option<i64>, to: Option<i64>) -> Self {
        YearWindow { from, to }
    }

    pub fn contains(&self, year: i64) -> bool {
        self.from.map_or(true, |from| year >= from) && self.to.map_or(true, |to| year <= to)
    }

    /// `years=2019..2023` style tag, `None` when unbounded.
    pub fn query(&self) -> Option<String> {
        if self.from.is_none() && self.to.is_none() {
            return None;
        }
        let bound = |year: Option<i64>| year.map(|y| y.to_string()).unwrap_or_default();
        Some(format!("years={}..{}", bound(self.from), bound(self.to)))
    }
}
