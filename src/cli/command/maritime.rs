//! Download OECD maritime transport CO2 emissions and save to disk.
//!
//! Two SDMX queries against the same dataflow: the world aggregate and the
//! per-country breakdown. Each one is refreshed and saved on its own.

use std::collections::BTreeSet;

use clap::ValueEnum;
use tracing::info;

use super::{refresh, Context, Dataset, RunSummary};
use crate::{
    download::{accept, SDMX_JSON},
    reading::sdmx::decode_table,
    table::Table,
};

pub const EMISSIONS_COLUMN: &str = "CO2_Emissions";
const AREA_COLUMN: &str = "REF_AREA";
const PERIOD_COLUMN: &str = "TIME_PERIOD";

const WORLD_URL: &str = "https://sdmx.oecd.org/public/rest/data/OECD.SDD.NAD.SEEA,DSD_MARITIME_TRANSPORT@DF_MARITIME_TRANSPORT,2.0/W.M.....EMISSIONS_POD..BULK_CARRIER+CHEM_TANKER+CONTAINER+GEN_CARGO+LIQ_GAS_TANKER+OIL_TANKER+OTHER_LIQ_TANKER+FERRY_PAX+CRUISE+FERRY_ROPAX+REFRIG_BULK+RO_RO+VEHICLE+YACHT+SERVICE_TUG+OFFSHORE+SERVICE_OTHER+MISC_FISH+MISC_OTHER.TER_DOM+TER_INT?dimensionAtObservation=AllDimensions";
const OECD_URL: &str = "https://sdmx.oecd.org/public/rest/data/OECD.SDD.NAD.SEEA,DSD_MARITIME_TRANSPORT@DF_MARITIME_TRANSPORT,/.M.....EMISSIONS_POD..BULK_CARRIER+CHEM_TANKER+CONTAINER+GEN_CARGO+LIQ_GAS_TANKER+OIL_TANKER+OTHER_LIQ_TANKER+FERRY_PAX+CRUISE+FERRY_ROPAX+REFRIG_BULK+RO_RO+VEHICLE+YACHT+SERVICE_TUG+OFFSHORE+SERVICE_OTHER+MISC_FISH+MISC_OTHER.TER_DOM+TER_INT?dimensionAtObservation=AllDimensions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MaritimeGroup {
    /// World total
    World,
    /// Individual OECD countries
    Oecd,
}

impl MaritimeGroup {
    pub const ALL: [MaritimeGroup; 2] = [MaritimeGroup::World, MaritimeGroup::Oecd];

    pub fn label(self) -> &'static str {
        match self {
            MaritimeGroup::World => "World Total",
            MaritimeGroup::Oecd => "OECD Country",
        }
    }

    pub fn stem(self) -> &'static str {
        match self {
            MaritimeGroup::World => "maritime_world_total",
            MaritimeGroup::Oecd => "maritime_oecd_countries",
        }
    }

    pub fn url(self) -> &'static str {
        match self {
            MaritimeGroup::World => WORLD_URL,
            MaritimeGroup::Oecd => OECD_URL,
        }
    }

    pub fn dataset(self) -> Dataset<'static> {
        Dataset {
            stem: self.stem(),
            url: self.url(),
            headers: accept(SDMX_JSON),
            query: None,
        }
    }
}

pub fn decode(body: &[u8], group: MaritimeGroup) -> Result<Table, crate::error::DecodeError> {
    decode_table(body, EMISSIONS_COLUMN).map(|table| table.with_group(group.label()))
}

pub async fn maritime(ctx: &Context<'_>, only: Option<MaritimeGroup>) -> RunSummary {
    let groups = match only {
        Some(group) => vec![group],
        None => MaritimeGroup::ALL.to_vec(),
    };

    let mut summary = RunSummary::new();
    for group in groups {
        info!("fetching {} emissions", group.label());
        let result = refresh(ctx, &group.dataset(), |body| decode(body, group)).await;
        if let Ok(Some(table)) = &result {
            EmissionSummary::of(table).log(group.label());
        }
        summary.record_refresh(group.stem(), &result);
    }

    summary
}

/// Headline figures for a freshly fetched emissions table.
#[derive(Debug, Default, PartialEq)]
pub struct EmissionSummary {
    pub rows: usize,
    pub areas: usize,
    pub first_period: Option<String>,
    pub last_period: Option<String>,
    pub periods: usize,
    pub total: f64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl EmissionSummary {
    pub fn of(table: &Table) -> Self {
        let areas: BTreeSet<String> = table
            .column(AREA_COLUMN)
            .map(ToString::to_string)
            .collect();
        let periods: BTreeSet<String> = table
            .column(PERIOD_COLUMN)
            .map(ToString::to_string)
            .collect();
        let emissions: Vec<f64> = table
            .column(EMISSIONS_COLUMN)
            .filter_map(|v| v.as_f64())
            .collect();

        let total: f64 = emissions.iter().sum();
        EmissionSummary {
            rows: table.len(),
            areas: areas.len(),
            first_period: periods.first().cloned(),
            last_period: periods.last().cloned(),
            periods: periods.len(),
            total,
            mean: (!emissions.is_empty()).then(|| total / emissions.len() as f64),
            min: emissions.iter().copied().reduce(f64::min),
            max: emissions.iter().copied().reduce(f64::max),
        }
    }

    fn log(&self, label: &str) {
        info!(
            rows = self.rows,
            areas = self.areas,
            periods = self.periods,
            "{label}: {} to {}",
            self.first_period.as_deref().unwrap_or("?"),
            self.last_period.as_deref().unwrap_or("?"),
        );
        if let (Some(mean), Some(min), Some(max)) = (self.mean, self.min, self.max) {
            info!(
                "{label} CO2 emissions: total {:.2}, mean {mean:.2}, min {min:.2}, max {max:.2}",
                self.total
            );
        }
    }
}

// -- Tests -------------------------------------------------------------------
