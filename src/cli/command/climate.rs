//! Download World Bank CCKP annual mean temperatures and save to disk.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use super::{refresh, Context, Dataset, RunSummary};
use crate::reading::{climate::decode_timeseries, YearWindow};

pub const STEM: &str = "climate_temperature";
const URL: &str = "https://cckpapi.worldbank.org/api/v1/cru-x0.5_timeseries_tas_timeseries_annual_1901-2024_mean_historical_cru_ts4.09_mean/global_countries?_format=json";

pub fn dataset(window: YearWindow) -> Dataset<'static> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    Dataset {
        stem: STEM,
        url: URL,
        headers,
        query: window.query(),
    }
}

pub async fn climate(ctx: &Context<'_>, window: YearWindow) -> RunSummary {
    let result = refresh(ctx, &dataset(window), |body| decode_timeseries(body, window)).await;

    let mut summary = RunSummary::new();
    summary.record_refresh(STEM, &result);
    summary
}

// -- Tests -------------------------------------------------------------------
