pub mod check;
pub mod climate;
pub mod maritime;
pub mod regional;
pub mod sea_level;
pub mod show;

use std::{fmt, path::PathBuf};

use anyhow::{Context as _, Result};
use reqwest::header::HeaderMap;
use tracing::{error, info};

use crate::{
    download::{fetch_with_retry, HttpSource, RetryPolicy},
    error::DecodeError,
    freshness::{self, FetchMetadata, Freshness, LocalState},
    store::{self, DatasetFiles},
    table::Table,
};

pub use check::check;
pub use climate::climate;
pub use maritime::maritime;
pub use regional::regional;
pub use sea_level::sea_level;
pub use show::show;

/// Everything a dataset command needs from the command line.
pub struct Context<'a> {
    pub source: &'a dyn HttpSource,
    pub policy: RetryPolicy,
    pub output_dir: PathBuf,
    pub force: bool,
    pub parquet: bool,
}

impl Context<'_> {
    pub fn files(&self, stem: &str) -> DatasetFiles {
        DatasetFiles::new(&self.output_dir, stem)
    }
}

/// One HTTP resource that becomes one table on disk.
pub struct Dataset<'a> {
    pub stem: &'a str,
    pub url: &'a str,
    pub headers: HeaderMap,
    /// Recorded in the sidecar; a different value forces a refetch.
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Updated { rows: usize },
    UpToDate,
    Failed(String),
}

impl Status {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Status::Failed(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Updated { rows } => write!(f, "updated ({rows} rows)"),
            Status::UpToDate => f.write_str("up to date"),
            Status::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Outcome of every dataset touched in one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    results: Vec<(String, Status)>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, dataset: &str, status: Status) {
        self.results.push((dataset.to_string(), status));
    }

    /// Records the outcome of [`refresh`], logging failures.
    pub fn record_refresh(&mut self, dataset: &str, result: &Result<Option<Table>>) {
        let status = match result {
            Ok(Some(table)) => Status::Updated { rows: table.len() },
            Ok(None) => Status::UpToDate,
            Err(e) => {
                error!("{dataset}: {e:#}");
                Status::Failed(format!("{e:#}"))
            }
        };
        self.record(dataset, status);
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.results.extend(other.results);
    }

    #[cfg(test)]
    pub fn results(&self) -> &[(String, Status)] {
        &self.results
    }

    /// True when at least one dataset is usable after the run.
    pub fn any_succeeded(&self) -> bool {
        self.results.iter().any(|(_, status)| status.succeeded())
    }

    pub fn print(&self) {
        let width = self
            .results
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);

        println!("\nSummary");
        for (name, status) in &self.results {
            println!("  {name:<width$}  {status}");
        }
    }
}

/// Brings one dataset up to date. `Ok(None)` means the local copy was
/// already current.
pub async fn refresh<F>(ctx: &Context<'_>, dataset: &Dataset<'_>, parse: F) -> Result<Option<Table>>
where
    F: Fn(&[u8]) -> Result<Table, DecodeError>,
{
    let files = ctx.files(dataset.stem);

    let local = files.local_state();
    let prefetched = if ctx.force {
        info!("{}: forced refresh", dataset.stem);
        None
    } else if let Some(reason) = request_changed(ctx, dataset, &files, &local) {
        info!("{}: needs update ({reason})", dataset.stem);
        None
    } else {
        match freshness::check(ctx.source, dataset.url, &dataset.headers, ctx.policy.timeout, &local)
            .await
        {
            Freshness::UpToDate { reason } => {
                info!("{}: up to date ({reason})", dataset.stem);
                return Ok(None);
            }
            Freshness::NeedsUpdate { reason, prefetched } => {
                info!("{}: needs update ({reason})", dataset.stem);
                prefetched
            }
        }
    };

    let (table, response) = match prefetched {
        Some(response) => {
            let table = parse(&response.body)
                .with_context(|| format!("decoding {}", dataset.url))?;
            (table, response)
        }
        None => {
            let fetched = fetch_with_retry(ctx.source, dataset.url, &dataset.headers, &ctx.policy, &parse)
                .await
                .with_context(|| format!("fetching {}", dataset.stem))?;
            (fetched.value, fetched.response)
        }
    };

    let metadata = FetchMetadata {
        query: dataset.query.clone(),
        ..FetchMetadata::from_response(dataset.url, &response)
    };
    store::save_dataset(&files, &table, &metadata, ctx.parquet)
        .with_context(|| format!("saving {}", dataset.stem))?;

    Ok(Some(table))
}

/// Local files that answer a different request than this one are stale no
/// matter what the server says.
fn request_changed(
    ctx: &Context<'_>,
    dataset: &Dataset<'_>,
    files: &DatasetFiles,
    local: &LocalState,
) -> Option<String> {
    if !local.data_present {
        return None;
    }
    let saved = local.metadata.as_ref().and_then(|m| m.query.as_deref());
    if saved != dataset.query.as_deref() {
        return Some(format!(
            "request changed (saved {}, now {})",
            saved.unwrap_or("all"),
            dataset.query.as_deref().unwrap_or("all")
        ));
    }
    if ctx.parquet && !files.parquet().is_file() {
        return Some("parquet export missing".to_string());
    }
    None
}

// -- Tests -------------------------------------------------------------------
