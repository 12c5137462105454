//! Periodic throughput and latency reporting, and the JSON report at exit.

use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Barrier, PoisonError,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use hdrhistogram::Counter;
use itertools::Itertools;
use page_cache::PageCache;
use serde_with::serde_as;
use tracing::{error, info};
use traversal::{Config, StoreLayout};

use crate::{RunArgs, StatsState, MONITOR_PERIOD};

pub(crate) struct MonitorContext {
    pub(crate) args: Arc<RunArgs>,
    pub(crate) config: Config,
    pub(crate) layouts: StoreLayouts,
    pub(crate) cache: PageCache,
    pub(crate) stats_state: Arc<StatsState>,
    pub(crate) ready: Arc<Barrier>,
    /// Set if the monitor cannot start, so that the clients do not run unobserved.
    pub(crate) stop_clients: Arc<AtomicBool>,
}

#[derive(serde::Serialize)]
pub(crate) struct StoreLayouts {
    pub(crate) nodes: StoreLayout,
    pub(crate) relationships: StoreLayout,
}

const LATENCY_PERCENTILES: [f64; 7] = [50.0, 90.0, 99.0, 99.9, 99.99, 99.999, 99.9999];

fn latency_percentiles_serialize<S>(
    values: &[f64; LATENCY_PERCENTILES.len()],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serde::Serialize::serialize(
        &LATENCY_PERCENTILES
            .iter()
            .map(|p| format!("p{p}"))
            .zip(values.iter().cloned())
            .collect::<HashMap<_, _>>(),
        serializer,
    )
}

#[derive(Default)]
struct Counts {
    traversals: u64,
    records: u64,
    bytes: u64,
    read_retries: u64,
}

struct AggregatedStats {
    start: Instant,
    counts: Counts,
    latencies_histo: hdrhistogram::Histogram<u64>,
}

#[serde_as]
#[derive(serde::Serialize)]
struct AggregatedStatsSummary {
    #[serde_as(as = "serde_with::DurationMicroSeconds")]
    elapsed_us: Duration,
    throughput_traversals_per_sec: f64,
    throughput_records_per_sec: f64,
    throughput_bw_mibps: f64,
    read_retries: u64,
    latency_min_us: f64,
    latency_mean_us: f64,
    latency_max_us: f64,
    #[serde(serialize_with = "latency_percentiles_serialize")]
    latency_percentiles: [f64; LATENCY_PERCENTILES.len()],
}

impl std::fmt::Display for AggregatedStatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "t{:.2} TP: traversals/s={:.0} records/s={:.0} bw={:.2} retries={} LAT(us): min={:.0} mean={:.0} max={:.0} {}",
            self.elapsed_us.as_secs_f64(),
            self.throughput_traversals_per_sec,
            self.throughput_records_per_sec,
            self.throughput_bw_mibps,
            self.read_retries,
            self.latency_min_us,
            self.latency_mean_us,
            self.latency_max_us,
            self.latency_percentiles
                .iter()
                .zip(LATENCY_PERCENTILES.iter())
                .map(|(v, p)| format!("p{p}={v:.0}"))
                .join(" "),
        )
    }
}

impl AggregatedStats {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            counts: Counts::default(),
            latencies_histo: StatsState::make_latency_histogram(),
        }
    }

    fn reset(&mut self, start: Instant) {
        self.start = start;
        self.counts = Counts::default();
        self.latencies_histo.clear();
    }

    fn add(&mut self, traversals: u64, records: u64, bytes: u64, read_retries: u64) {
        self.counts.traversals += traversals;
        self.counts.records += records;
        self.counts.bytes += bytes;
        self.counts.read_retries += read_retries;
    }

    fn summary_since_start(&self) -> AggregatedStatsSummary {
        let elapsed = self.start.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        let histo = &self.latencies_histo;
        AggregatedStatsSummary {
            elapsed_us: elapsed,
            throughput_traversals_per_sec: (self.counts.traversals as f64) / elapsed_secs,
            throughput_records_per_sec: (self.counts.records as f64) / elapsed_secs,
            throughput_bw_mibps: (self.counts.bytes as f64) / ((1 << 20) as f64) / elapsed_secs,
            read_retries: self.counts.read_retries,
            latency_min_us: histo.min().as_f64() / 1000.0,
            latency_mean_us: histo.mean() / 1000.0,
            latency_max_us: histo.max().as_f64() / 1000.0,
            latency_percentiles: {
                let mut values = [0.0; LATENCY_PERCENTILES.len()];
                for (i, value_ref) in values.iter_mut().enumerate() {
                    *value_ref =
                        histo.value_at_percentile(LATENCY_PERCENTILES[i]).as_f64() / 1000.0;
                }
                values
            },
        }
    }
}

#[derive(serde::Serialize)]
struct CacheMetrics {
    max_pages: usize,
    page_size: usize,
    faults: u64,
    evictions: u64,
    flushes: u64,
}

impl CacheMetrics {
    fn of(cache: &PageCache) -> Self {
        let metrics = cache.metrics();
        CacheMetrics {
            max_pages: cache.max_pages(),
            page_size: cache.page_size(),
            faults: metrics.faults,
            evictions: metrics.evictions,
            flushes: metrics.flushes,
        }
    }
}

#[derive(serde::Serialize)]
struct BenchmarkOutput {
    args: RunArgs,
    config: Config,
    layouts: StoreLayouts,
    sorted_per_client_total_traversals: Vec<u64>,
    sorted_per_client_runtimes_secs: Vec<f64>,
    per_second: Vec<AggregatedStatsSummary>,
    totals: Vec<AggregatedStatsSummary>,
    cache: CacheMetrics,
}

/// Starts the monitor thread. It reports every [`MONITOR_PERIOD`] until the
/// clients' run times arrive on `stop_rx`, then writes the report to
/// `args.output`.
pub(crate) fn spawn(
    ctx: MonitorContext,
    mut stop_rx: tokio::sync::oneshot::Receiver<Vec<Duration>>,
) -> io::Result<JoinHandle<io::Result<()>>> {
    std::thread::Builder::new()
        .name("monitor".to_owned())
        .spawn(move || {
            let MonitorContext {
                args,
                config,
                layouts,
                cache,
                stats_state,
                ready,
                stop_clients,
            } = ctx;
            let mut per_client_total_traversals = vec![0u64; stats_state.counters.len()];
            let mut total = AggregatedStats::new();
            let mut this_round = AggregatedStats::new();
            let mut per_second = Vec::new();
            let mut total_summaries = Vec::new();

            let rt = start_after_barrier(
                &ready,
                tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build(),
                &stop_clients,
            )?;
            total.reset(Instant::now());

            let mut ticker = rt.block_on(async move { tokio::time::interval(MONITOR_PERIOD) });

            let mut exit: Option<Vec<Duration>> = None;
            while exit.is_none() {
                this_round.reset(Instant::now());
                rt.block_on(async {
                    let ticker = &mut ticker;
                    tokio::select! {
                        _ = ticker.tick() => {}
                        msg = &mut stop_rx => {
                            // a dropped sender means the clients are gone too
                            exit = Some(msg.unwrap_or_default());
                        }
                    };
                });

                for (client, counters) in stats_state.counters.iter().enumerate() {
                    let traversals = counters.traversals.swap(0, Ordering::Relaxed);
                    let records = counters.records.swap(0, Ordering::Relaxed);
                    let bytes = counters.bytes.swap(0, Ordering::Relaxed);
                    let read_retries = counters.read_retries.swap(0, Ordering::Relaxed);
                    per_client_total_traversals[client] += traversals;
                    this_round.add(traversals, records, bytes, read_retries);
                    total.add(traversals, records, bytes, read_retries);
                }
                for h in &stats_state.latencies_histo {
                    let mut h = h.lock().unwrap_or_else(PoisonError::into_inner);
                    total.latencies_histo += &*h;
                    this_round.latencies_histo += &*h;
                    h.clear();
                }

                let this_round_summary = this_round.summary_since_start();
                let total_summary = total.summary_since_start();

                info!("{this_round_summary}");
                info!("{total_summary}");

                per_second.push(this_round_summary);
                total_summaries.push(total_summary);
            }
            let client_run_times = exit.unwrap_or_default();

            info!("monitor shutting down");

            // the spread of per-client totals shows whether clients got a fair share of the cache
            let output = BenchmarkOutput {
                args: args.as_ref().clone(),
                config,
                layouts,
                sorted_per_client_total_traversals: per_client_total_traversals
                    .into_iter()
                    .sorted()
                    .collect(),
                sorted_per_client_runtimes_secs: client_run_times
                    .into_iter()
                    .sorted()
                    .map(|d| d.as_secs_f64())
                    .collect(),
                per_second,
                totals: total_summaries,
                cache: CacheMetrics::of(&cache),
            };
            info!("writing results to {:?}", args.output);
            std::fs::write(&args.output, serde_json::to_string(&output)?)?;

            let total_summary = total.summary_since_start();
            info!("total: {}", total_summary);
            Ok(())
        })
}

/// Joins the start barrier whether or not `setup` succeeded, so the clients
/// are never left waiting. A failed setup stops the run.
fn start_after_barrier<T>(
    ready: &Barrier,
    setup: io::Result<T>,
    stop: &AtomicBool,
) -> io::Result<T> {
    ready.wait();
    setup.map_err(|e| {
        error!("monitor failed to start, stopping the run: {e}");
        stop.store(true, Ordering::Relaxed);
        e
    })
}
