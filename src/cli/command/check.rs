//! Report which datasets are out of date without downloading them.

use reqwest::header::HeaderMap;

use super::{climate, maritime::MaritimeGroup, sea_level, Context, Dataset};
use crate::{
    freshness::{self, Freshness},
    reading::YearWindow,
};

/// Sea level comes from whichever source answered last time. Only a single
/// URL recorded in its metadata can be checked.
async fn check_sea_level(ctx: &Context<'_>) -> Freshness {
    let local = ctx.files(sea_level::MONTHLY_STEM).local_state();
    let url = local
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_deref())
        .filter(|source| source.starts_with("https://") && !source.contains(' '));

    match url {
        Some(url) => {
            freshness::check(ctx.source, url, &HeaderMap::new(), ctx.policy.timeout, &local).await
        }
        None if !local.data_present => Freshness::NeedsUpdate {
            reason: "no local data".to_string(),
            prefetched: None,
        },
        None => Freshness::NeedsUpdate {
            reason: "no single source to verify".to_string(),
            prefetched: None,
        },
    }
}

pub async fn check(ctx: &Context<'_>) -> Vec<(String, Freshness)> {
    let mut datasets: Vec<Dataset> = MaritimeGroup::ALL.iter().map(|g| g.dataset()).collect();
    datasets.push(climate::dataset(YearWindow::default()));

    let mut decisions = Vec::new();
    for dataset in datasets {
        let local = ctx.files(dataset.stem).local_state();
        let decision = freshness::check(
            ctx.source,
            dataset.url,
            &dataset.headers,
            ctx.policy.timeout,
            &local,
        )
        .await;
        decisions.push((dataset.stem.to_string(), decision));
    }

    let decision = check_sea_level(ctx).await;
    decisions.push((sea_level::MONTHLY_STEM.to_string(), decision));

    let width = decisions.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, decision) in &decisions {
        let state = if decision.needs_update() {
            "needs update"
        } else {
            "up to date"
        };
        println!("{name:<width$}  {state:<12}  {}", decision.reason());
    }

    decisions
}

// -- Tests -------------------------------------------------------------------
