//! Download global mean sea level and save monthly and yearly tables.
//!
//! Several upstream sources publish comparable series: AVISO+ text, files
//! found through a NASA CMR granule search, NASA JPL text, NOAA STAR regional
//! CSVs and a NOAA CO-OPS tide gauge. They are tried in that order and the
//! first one that yields readings wins. A synthesized series is only used
//! when explicitly allowed, and is always labelled as such.

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use tracing::{error, info, warn};

use super::{Context, RunSummary, Status};
use crate::{
    cli::create_progress_bar,
    download::{fetch_with_retry, HttpResponse, HttpSource, RetryPolicy},
    error::DecodeError,
    freshness::FetchMetadata,
    reading::{
        ocean_regions::{RegionalSeries, OCEAN_REGIONS},
        sea_level::{
            average_by_month, filter_years, parse_jpl_text, parse_star_csv, parse_tide_gauge,
            public_data_links, readings_from_table, readings_to_table, rebase, synthesize,
            to_yearly,
        },
        SeaLevelReading, YearWindow,
    },
    store,
    table::Table,
};

pub const MONTHLY_STEM: &str = "sea_level_monthly";
pub const YEARLY_STEM: &str = "sea_level_yearly";
pub const SYNTHETIC_SOURCE: &str = "synthesized (not real data)";

/// Years kept when none are given.
pub const FIRST_YEAR: i64 = 2019;
pub const LAST_YEAR: i64 = 2024;

const JPL_URLS: [&str; 2] = [
    "https://podaac-tools.jpl.nasa.gov/drive/files/allData/merged_alt/L2/TP_J1_OSTM/global_mean_sea_level/GMSL_TPJAOS_5.1_199209_202312.txt",
    "https://sealevel.jpl.nasa.gov/data/gmsl_2024rel2_global.txt",
];

const AVISO_URL: &str = "https://www.aviso.altimetry.fr/fileadmin/documents/data/products/sea-level-anomalies/global/msla_h_global.txt";

const CMR_URL: &str = "https://cmr.earthdata.nasa.gov/search/granules.json";
/// Collections searched, most likely to carry public text first.
const CMR_COLLECTIONS: [&str; 5] = [
    "SEA_LEVEL_GMSL",
    "MERGED_TP_J1_OSTM_OST_GMSL_ASCII_V51",
    "MERGED_TP_J1_OSTM_OST_GMSL_ASCII_V42",
    "SEA_SURFACE_HEIGHT_ALT_GRIDS_L4_2SATS_5DAY_6THDEG_V_JPL2205",
    "Jason_CS_S6A_L2_ALT_HR_NTC",
];
const CMR_FILES_PER_COLLECTION: usize = 3;

pub const STAR_BASE_URL: &str = "https://www.star.nesdis.noaa.gov/socd/lsa/SeaLevelRise/slr";

const COOPS_URL: &str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";
/// The Battery, New York.
const COOPS_STATION: &str = "8518750";

/// A monthly sea level table and the metadata describing where it came from.
#[derive(Debug, Clone)]
pub struct Sourced {
    pub table: Table,
    pub metadata: FetchMetadata,
}

impl Sourced {
    fn from_readings(readings: &[SeaLevelReading], metadata: FetchMetadata) -> Option<Self> {
        match readings_to_table(readings) {
            Ok(table) => Some(Sourced { table, metadata }),
            Err(e) => {
                warn!(error = %e, "readings do not fit the monthly table");
                None
            }
        }
    }
}

/// One way of obtaining a monthly sea level series.
#[async_trait]
pub trait SourceStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when this source could not produce any readings.
    async fn attempt(&self, source: &dyn HttpSource, policy: &RetryPolicy) -> Option<Sourced>;
}

/// Fetches one resource, treating every failure and empty result as `None`.
async fn fetch_readings<F>(
    source: &dyn HttpSource,
    url: &str,
    policy: &RetryPolicy,
    parse: F,
) -> Option<(Vec<SeaLevelReading>, HttpResponse)>
where
    F: Fn(&[u8]) -> Result<Vec<SeaLevelReading>, DecodeError> + Send,
{
    match fetch_with_retry(source, url, &HeaderMap::new(), policy, parse).await {
        Ok(fetched) if fetched.value.is_empty() => {
            warn!("{url}: no readings in response");
            None
        }
        Ok(fetched) => Some((fetched.value, fetched.response)),
        Err(e) => {
            warn!(error = %e, "{url}: unavailable");
            None
        }
    }
}

/// Reads the first JPL-layout text file that answers with readings.
async fn first_text_series(
    source: &dyn HttpSource,
    urls: &[String],
    policy: &RetryPolicy,
) -> Option<Sourced> {
    for url in urls {
        let parse = |body: &[u8]| Ok(parse_jpl_text(&String::from_utf8_lossy(body)));
        if let Some((readings, response)) = fetch_readings(source, url, policy, parse).await {
            info!(readings = readings.len(), "parsed text series from {url}");
            return Sourced::from_readings(&readings, FetchMetadata::from_response(url, &response));
        }
    }
    None
}

/// Whitespace-separated GMSL text files, tried one after another.
pub struct TextSeries {
    name: &'static str,
    urls: Vec<String>,
}

impl TextSeries {
    /// AVISO+ global anomalies, the Copernicus altimetry product.
    pub fn aviso() -> Self {
        TextSeries {
            name: "AVISO+ global",
            urls: vec![AVISO_URL.to_string()],
        }
    }

    pub fn jpl() -> Self {
        TextSeries {
            name: "NASA JPL GMSL",
            urls: JPL_URLS.iter().map(|url| url.to_string()).collect(),
        }
    }
}

#[async_trait]
impl SourceStrategy for TextSeries {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, source: &dyn HttpSource, policy: &RetryPolicy) -> Option<Sourced> {
        first_text_series(source, &self.urls, policy).await
    }
}

/// Searches NASA CMR collections for granules with public text files.
pub struct NasaCmr {
    collections: Vec<String>,
}

impl Default for NasaCmr {
    fn default() -> Self {
        NasaCmr {
            collections: CMR_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl NasaCmr {
    fn search_url(collection: &str) -> String {
        format!("{CMR_URL}?short_name={collection}&page_size=20&sort_key=-start_date")
    }
}

#[async_trait]
impl SourceStrategy for NasaCmr {
    fn name(&self) -> &str {
        "NASA CMR"
    }

    async fn attempt(&self, source: &dyn HttpSource, policy: &RetryPolicy) -> Option<Sourced> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        for collection in &self.collections {
            let url = Self::search_url(collection);
            let links = match fetch_with_retry(source, &url, &headers, policy, public_data_links).await
            {
                Ok(fetched) => fetched.value,
                Err(e) => {
                    warn!(error = %e, "{collection}: search failed");
                    continue;
                }
            };
            if links.is_empty() {
                info!("{collection}: no public text files");
                continue;
            }

            info!(files = links.len(), "{collection}: public files found");
            let links: Vec<String> = links.into_iter().take(CMR_FILES_PER_COLLECTION).collect();
            if let Some(sourced) = first_text_series(source, &links, policy).await {
                return Some(sourced);
            }
        }
        None
    }
}

/// Every STAR region that answers with readings, in catalog order.
pub async fn fetch_star_regions(
    source: &dyn HttpSource,
    policy: &RetryPolicy,
) -> (Vec<RegionalSeries>, u64) {
    let pb = create_progress_bar(OCEAN_REGIONS.len() as u64, "Downloading regions...".to_string());
    let mut series = Vec::new();
    let mut bytes = 0;

    for region in &OCEAN_REGIONS {
        pb.set_message(region.name);
        let url = format!("{STAR_BASE_URL}/{}", region.star_file());
        let parse = |body: &[u8]| Ok(parse_star_csv(&String::from_utf8_lossy(body)));
        if let Some((readings, response)) = fetch_readings(source, &url, policy, parse).await {
            bytes += response.body.len() as u64;
            series.push(RegionalSeries {
                region: region.name,
                readings,
            });
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(regions = series.len(), "fetched STAR regional series");
    (series, bytes)
}

/// NOAA STAR regional altimetry, averaged across every region that answers.
pub struct StarRegional;

#[async_trait]
impl SourceStrategy for StarRegional {
    fn name(&self) -> &str {
        "NOAA STAR regional"
    }

    async fn attempt(&self, source: &dyn HttpSource, policy: &RetryPolicy) -> Option<Sourced> {
        let (series, bytes) = fetch_star_regions(source, policy).await;
        let regions = series.len();
        let readings: Vec<SeaLevelReading> =
            series.into_iter().flat_map(|s| s.readings).collect();
        if readings.is_empty() {
            return None;
        }

        let metadata = FetchMetadata {
            fetch_timestamp: Utc::now(),
            content_length: bytes,
            source: Some(format!("{STAR_BASE_URL} ({regions} regions)")),
            ..Default::default()
        };
        Sourced::from_readings(&average_by_month(&readings), metadata)
    }
}

/// NOAA CO-OPS monthly means from a single tide gauge, one request per year.
pub struct TideGauge {
    station: String,
    window: YearWindow,
}

impl TideGauge {
    pub fn new(window: YearWindow) -> Self {
        TideGauge {
            station: COOPS_STATION.to_string(),
            window,
        }
    }

    fn url(&self, year: i64) -> String {
        format!(
            "{COOPS_URL}?product=monthly_mean&application=NOS.COOPS.TAC.WL\
             &begin_date={year}01&end_date={year}12&datum=MSL&station={}\
             &time_zone=GMT&units=metric&format=json",
            self.station
        )
    }
}

#[async_trait]
impl SourceStrategy for TideGauge {
    fn name(&self) -> &str {
        "NOAA CO-OPS tide gauge"
    }

    async fn attempt(&self, source: &dyn HttpSource, policy: &RetryPolicy) -> Option<Sourced> {
        let (Some(first), Some(last)) = (self.window.from, self.window.to) else {
            return None;
        };

        let mut readings = Vec::new();
        let mut bytes = 0;
        for year in first..=last {
            let parse = move |body: &[u8]| parse_tide_gauge(body, year);
            if let Some((months, response)) =
                fetch_readings(source, &self.url(year), policy, parse).await
            {
                info!(months = months.len(), "{year}: tide gauge months");
                readings.extend(months);
                bytes += response.body.len() as u64;
            }
        }

        if readings.is_empty() {
            return None;
        }
        let metadata = FetchMetadata {
            fetch_timestamp: Utc::now(),
            content_length: bytes,
            source: Some(format!("{COOPS_URL} (station {})", self.station)),
            ..Default::default()
        };
        Sourced::from_readings(&readings, metadata)
    }
}

/// Fabricated series for when nothing real is reachable.
pub struct Synthetic {
    window: YearWindow,
}

#[async_trait]
impl SourceStrategy for Synthetic {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn attempt(&self, _source: &dyn HttpSource, _policy: &RetryPolicy) -> Option<Sourced> {
        let (Some(first), Some(last)) = (self.window.from, self.window.to) else {
            return None;
        };
        warn!("every real source failed, writing SYNTHESIZED sea level data (not a measurement)");

        let metadata = FetchMetadata {
            fetch_timestamp: Utc::now(),
            source: Some(SYNTHETIC_SOURCE.to_string()),
            synthetic: true,
            ..Default::default()
        };
        Sourced::from_readings(&synthesize(first, last), metadata)
    }
}

/// Real sources in priority order, then the synthetic one if allowed.
pub fn strategies(window: YearWindow, allow_synthetic: bool) -> Vec<Box<dyn SourceStrategy>> {
    let mut strategies: Vec<Box<dyn SourceStrategy>> = vec![
        Box::new(TextSeries::aviso()),
        Box::new(NasaCmr::default()),
        Box::new(TextSeries::jpl()),
        Box::new(StarRegional),
        Box::new(TideGauge::new(window)),
    ];
    if allow_synthetic {
        strategies.push(Box::new(Synthetic { window }));
    }
    strategies
}

/// Runs the strategies in order and stops at the first that succeeds.
pub async fn first_success(
    strategies: &[Box<dyn SourceStrategy>],
    source: &dyn HttpSource,
    policy: &RetryPolicy,
) -> Option<Sourced> {
    for strategy in strategies {
        info!("trying {}", strategy.name());
        match strategy.attempt(source, policy).await {
            Some(sourced) => {
                info!(rows = sourced.table.len(), "{} succeeded", strategy.name());
                return Some(sourced);
            }
            None => warn!("{} failed", strategy.name()),
        }
    }
    None
}

/// Monthly and yearly tables derived from a raw monthly series.
pub fn post_process(monthly: &Table, window: YearWindow) -> Result<(Table, Table)> {
    let mut readings = filter_years(readings_from_table(monthly), window);
    if readings.is_empty() {
        return Err(anyhow!("no readings inside the requested years"));
    }

    let baseline_year = window
        .from
        .filter(|year| readings.iter().any(|r| r.year == *year))
        .or_else(|| readings.iter().map(|r| r.year).min());
    if let Some(year) = baseline_year {
        if let Some(baseline) = rebase(&mut readings, year) {
            info!(baseline_mm = baseline, "rebased so that {year} averages 0 mm");
        }
    }

    Ok((readings_to_table(&readings)?, to_yearly(&readings)?))
}

async fn fetch_and_save(ctx: &Context<'_>, window: YearWindow, allow_synthetic: bool) -> Result<usize> {
    let strategies = strategies(window, allow_synthetic);
    let sourced = first_success(&strategies, ctx.source, &ctx.policy)
        .await
        .ok_or_else(|| anyhow!("every sea level source failed"))?;

    let (monthly, yearly) = post_process(&sourced.table, window)?;

    store::save_dataset(&ctx.files(MONTHLY_STEM), &monthly, &sourced.metadata, ctx.parquet)
        .context("saving monthly sea level")?;
    store::save_dataset(&ctx.files(YEARLY_STEM), &yearly, &sourced.metadata, ctx.parquet)
        .context("saving yearly sea level")?;

    Ok(monthly.len())
}

pub async fn sea_level(ctx: &Context<'_>, window: YearWindow, allow_synthetic: bool) -> RunSummary {
    let mut summary = RunSummary::new();
    let status = match fetch_and_save(ctx, window, allow_synthetic).await {
        Ok(rows) => Status::Updated { rows },
        Err(e) => {
            error!("sea level: {e:#}");
            Status::Failed(format!("{e:#}"))
        }
    };
    summary.record(MONTHLY_STEM, status);
    summary
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cli::command::tests::context,
        download::testing::*,
        error::FetchError,
        table::Value,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tempfile::tempdir;

    fn window() -> YearWindow {
        YearWindow::new(Some(2019), Some(2020))
    }

    struct Counting {
        result: Option<Sourced>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceStrategy for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn attempt(&self, _: &dyn HttpSource, _: &RetryPolicy) -> Option<Sourced> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn counting(result: Option<Sourced>, calls: &Arc<AtomicUsize>) -> Box<dyn SourceStrategy> {
        Box::new(Counting {
            result,
            calls: Arc::clone(calls),
        })
    }

    fn sourced(gmsl: f64) -> Sourced {
        let readings = [SeaLevelReading {
            year: 2019,
            month: 1,
            gmsl_mm: gmsl,
            std_dev_mm: 1.0,
        }];
        Sourced::from_readings(&readings, FetchMetadata::default()).unwrap()
    }

    #[tokio::test]
    async fn should_stop_at_first_success() {
        let source = StubSource::new();
        let calls: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::default()).collect();
        let strategies = vec![
            counting(None, &calls[0]),
            counting(Some(sourced(1.0)), &calls[1]),
            counting(Some(sourced(2.0)), &calls[2]),
        ];

        let result = first_success(&strategies, &source, &RetryPolicy::default()).await;

        assert_eq!(result.unwrap().table.rows()[0][2], Value::Float(1.0));
        let counts: Vec<usize> = calls.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(counts, vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn should_return_none_when_every_strategy_fails() {
        let source = StubSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let strategies = vec![counting(None, &calls), counting(None, &calls)];

        assert!(first_success(&strategies, &source, &RetryPolicy::default())
            .await
            .is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn should_fall_through_to_second_jpl_file() {
        let source = StubSource::new()
            .with_get(status(404))
            .with_get(ok(b"HDR header\n2019.0417 10.0 0.4\n2019.125 12.0 0.4\n"));
        let jpl = TextSeries::jpl();
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };

        let sourced = jpl.attempt(&source, &policy).await.unwrap();

        assert_eq!(sourced.table.len(), 2);
        assert_eq!(sourced.metadata.source.as_deref(), Some(JPL_URLS[1]));
        assert!(!sourced.metadata.synthetic);
    }

    #[tokio::test]
    async fn should_collect_tide_gauge_years() {
        let source = StubSource::new()
            .with_get(ok(br#"{"data": [{"month": "1", "v": "0.100"}]}"#))
            .with_get(Err(FetchError::Network("reset".into())));
        let gauge = TideGauge::new(window());
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };

        let sourced = gauge.attempt(&source, &policy).await.unwrap();

        let readings = readings_from_table(&sourced.table);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].year, 2019);
        assert_eq!(readings[0].gmsl_mm, 100.0);
    }

    #[tokio::test]
    async fn should_read_public_file_found_through_cmr() {
        let search = br#"{"feed": {"entry": [{"links": [
            {"href": "https://archive.podaac.earthdata.nasa.gov/protected/gmsl/GMSL.txt"},
            {"href": "https://archive.podaac.earthdata.nasa.gov/public/gmsl/GMSL.txt"}
        ]}]}}"#;
        let source = StubSource::new()
            .with_get(ok(br#"{"feed": {"entry": []}}"#))
            .with_get(ok(search))
            .with_get(ok(b"2019.0417 10.0 0.4\n2019.125 12.0 0.4\n"));
        let cmr = NasaCmr {
            collections: vec!["EMPTY".into(), "GMSL".into()],
        };
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };

        let sourced = cmr.attempt(&source, &policy).await.unwrap();

        assert_eq!(sourced.table.len(), 2);
        assert_eq!(
            sourced.metadata.source.as_deref(),
            Some("https://archive.podaac.earthdata.nasa.gov/public/gmsl/GMSL.txt")
        );
        assert_eq!(source.get_calls(), 3);
    }

    #[test]
    fn should_build_cmr_search_url() {
        let url = NasaCmr::search_url("SEA_LEVEL_GMSL");
        assert!(url.starts_with(CMR_URL));
        assert!(url.contains("short_name=SEA_LEVEL_GMSL&page_size=20&sort_key=-start_date"));
    }

    #[tokio::test]
    async fn should_average_star_regions_that_answer() {
        let mut source = StubSource::new()
            .with_get(ok(b"2019.04,,10.0\n"))
            .with_get(ok(b"2019.04,20.0\n"));
        for _ in 2..OCEAN_REGIONS.len() {
            source = source.with_get(status(404));
        }
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };

        let sourced = StarRegional.attempt(&source, &policy).await.unwrap();

        let readings = readings_from_table(&sourced.table);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].gmsl_mm, 15.0);
        assert_eq!(
            sourced.metadata.source.as_deref(),
            Some(format!("{STAR_BASE_URL} (2 regions)").as_str())
        );
    }

    #[test]
    fn should_build_tide_gauge_query() {
        let url = TideGauge::new(window()).url(2021);

        assert!(url.starts_with(COOPS_URL));
        assert!(url.contains("&begin_date=202101&end_date=202112&"));
        assert!(url.contains("station=8518750"));
    }

    #[test]
    fn should_only_offer_synthetic_when_allowed() {
        let names: Vec<String> = strategies(window(), false)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "AVISO+ global",
                "NASA CMR",
                "NASA JPL GMSL",
                "NOAA STAR regional",
                "NOAA CO-OPS tide gauge"
            ]
        );
        let all = strategies(window(), true);
        assert_eq!(all.last().unwrap().name(), "synthetic");
    }

    #[test]
    fn should_rebase_and_aggregate() {
        let readings: Vec<SeaLevelReading> = [(2018, 5.0), (2019, 10.0), (2019, 20.0), (2020, 25.0)]
            .iter()
            .map(|&(year, gmsl_mm)| SeaLevelReading {
                year,
                month: 1,
                gmsl_mm,
                std_dev_mm: 1.0,
            })
            .collect();

        let (monthly, yearly) =
            post_process(&readings_to_table(&readings).unwrap(), window()).unwrap();

        assert_eq!(monthly.len(), 3);
        let gmsl: Vec<f64> = yearly
            .column("GMSL_Variation_mm")
            .filter_map(Value::as_f64)
            .collect();
        assert_eq!(gmsl, vec![0.0, 10.0]);
    }

    #[tokio::test]
    async fn should_label_synthetic_output() {
        let dir = tempdir().unwrap();
        let source = StubSource::new();
        let ctx = context(&source, &dir);

        let summary = sea_level(&ctx, window(), true).await;

        assert!(summary.any_succeeded());
        let metadata = store::read_metadata(&ctx.files(MONTHLY_STEM).meta())
            .unwrap()
            .unwrap();
        assert!(metadata.synthetic);
        assert_eq!(metadata.source.as_deref(), Some(SYNTHETIC_SOURCE));
        let yearly = store::read_csv(&ctx.files(YEARLY_STEM).csv()).unwrap();
        assert_eq!(yearly.len(), 2);
    }

    #[tokio::test]
    async fn should_fail_without_synthetic_fallback() {
        let dir = tempdir().unwrap();
        let source = StubSource::new();
        let ctx = context(&source, &dir);

        let summary = sea_level(&ctx, window(), false).await;

        assert!(!summary.any_succeeded());
        assert!(!ctx.files(MONTHLY_STEM).csv().exists());
    }
}
