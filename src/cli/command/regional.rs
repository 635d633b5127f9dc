//! Download NOAA STAR sea level per ocean region and save the regional
//! tables along with the country to region mapping.

use anyhow::{anyhow, Context as _, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use super::{
    sea_level::{fetch_star_regions, STAR_BASE_URL},
    Context, RunSummary, Status,
};
use crate::{
    freshness::FetchMetadata,
    reading::{
        ocean_regions::{country_mapping, rebase_regions, regional_table, regional_yearly},
        sea_level::filter_years,
        YearWindow,
    },
    store,
};

pub const REGIONAL_STEM: &str = "sea_level_regional";
pub const REGIONAL_YEARLY_STEM: &str = "sea_level_by_region_yearly";
pub const MAPPING_STEM: &str = "country_ocean_mapping";

async fn fetch_and_save(ctx: &Context<'_>, window: YearWindow) -> Result<usize> {
    let (mut series, bytes) = fetch_star_regions(ctx.source, &ctx.policy).await;

    for s in series.iter_mut() {
        s.readings = filter_years(std::mem::take(&mut s.readings), window);
        if s.readings.is_empty() {
            warn!("{}: no readings inside the requested years", s.region);
        }
    }
    series.retain(|s| !s.readings.is_empty());
    if series.is_empty() {
        return Err(anyhow!("no region has readings inside the requested years"));
    }

    let baseline_year = window.from.or_else(|| {
        series
            .iter()
            .flat_map(|s| s.readings.iter().map(|r| r.year))
            .min()
    });
    if let Some(year) = baseline_year {
        rebase_regions(&mut series, year);
        info!("rebased every region so that {year} averages 0 mm");
    }

    let metadata = FetchMetadata {
        fetch_timestamp: Utc::now(),
        content_length: bytes,
        source: Some(format!("{STAR_BASE_URL} ({} regions)", series.len())),
        query: window.query(),
        ..Default::default()
    };

    let regional = regional_table(&series)?;
    store::save_dataset(&ctx.files(REGIONAL_STEM), &regional, &metadata, ctx.parquet)
        .context("saving regional sea level")?;
    store::save_dataset(
        &ctx.files(REGIONAL_YEARLY_STEM),
        &regional_yearly(&series)?,
        &metadata,
        ctx.parquet,
    )
    .context("saving yearly regional sea level")?;
    store::save_dataset(
        &ctx.files(MAPPING_STEM),
        &country_mapping()?,
        &FetchMetadata {
            fetch_timestamp: Utc::now(),
            source: Some("ocean region catalog".to_string()),
            ..Default::default()
        },
        ctx.parquet,
    )
    .context("saving country to ocean mapping")?;

    Ok(regional.len())
}

pub async fn regional(ctx: &Context<'_>, window: YearWindow) -> RunSummary {
    let mut summary = RunSummary::new();
    let status = match fetch_and_save(ctx, window).await {
        Ok(rows) => Status::Updated { rows },
        Err(e) => {
            error!("regional sea level: {e:#}");
            Status::Failed(format!("{e:#}"))
        }
    };
    summary.record(REGIONAL_STEM, status);
    summary
}

// -- Tests -------------------------------------------------------------------
