use std::{
    io,
    num::{NonZeroU64, NonZeroUsize},
    ops::ControlFlow,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc, Barrier, Mutex, PoisonError,
    },
    time::Duration,
};

use clap::Parser;
use crossbeam_utils::CachePadded;
use page_cache::PageCache;
use tracing::{error, info};
use traversal::{Config, Stores, Traversal, Workload};

mod clients;
mod monitor;
mod setup;

#[derive(serde::Serialize, clap::Parser, Clone)]
struct Args {
    /// Properties file with the cache and store settings.
    #[clap(long, default_value = Config::DEFAULT_PATH)]
    config: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Clone, clap::Subcommand, serde::Serialize)]
enum Command {
    /// Create or extend the store files with pseudo-random records.
    Setup {
        node_records: NonZeroU64,
        relationship_records: NonZeroU64,
    },
    /// Run traversals from concurrent clients and report throughput and latency.
    Run(RunArgs),
}

#[derive(Clone, clap::Args, serde::Serialize)]
struct RunArgs {
    num_clients: NonZeroUsize,
    #[clap(long, default_value = "until-ctrl-c")]
    run_duration: RunDuration,
    #[clap(long, default_value = "benchmark.output.json")]
    output: PathBuf,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
enum RunDuration {
    UntilCtrlC,
    FixedDuration(Duration),
    FixedTotalTraversalCount(u64),
    FixedPerClientTraversalCount(u64),
}

impl FromStr for RunDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "until-ctrl-c" => Ok(RunDuration::UntilCtrlC),
            x if x.ends_with("traversals-total") => {
                let stripped = &s[..s.len() - "traversals-total".len()];
                parse_count(stripped, s).map(RunDuration::FixedTotalTraversalCount)
            }
            x if x.ends_with("traversals-per-client") => {
                let stripped = &s[..s.len() - "traversals-per-client".len()];
                parse_count(stripped, s).map(RunDuration::FixedPerClientTraversalCount)
            }
            x => match humantime::parse_duration(x) {
                Ok(d) => Ok(RunDuration::FixedDuration(d)),
                Err(e) => Err(format!("invalid duration: {e}: {s:?}")),
            },
        }
    }
}

/// `N`, `N-`, `Nk-`, `Nm-` or `Ng-`, the prefix of a traversal count.
fn parse_count(stripped: &str, s: &str) -> Result<u64, String> {
    let stripped = stripped.strip_suffix('-').unwrap_or(stripped);
    let (stripped, multiplier) = if let Some(n) = stripped.strip_suffix('k') {
        (n, 1000)
    } else if let Some(n) = stripped.strip_suffix('m') {
        (n, 1000 * 1000)
    } else if let Some(n) = stripped.strip_suffix('g') {
        (n, 1000 * 1000 * 1000)
    } else {
        (stripped, 1)
    };
    match stripped.parse::<NonZeroU64>() {
        Ok(n) => n
            .get()
            .checked_mul(multiplier)
            .ok_or_else(|| format!("traversal count overflows: {s:?}")),
        Err(e) => Err(format!("invalid traversal count: {e}: {s:?}")),
    }
}

#[derive(Default)]
struct ClientCounters {
    traversals: AtomicU64,
    records: AtomicU64,
    bytes: AtomicU64,
    read_retries: AtomicU64,
}

/// Per-client counters and latencies, drained by the monitor every period.
struct StatsState {
    counters: Vec<CachePadded<ClientCounters>>,
    latencies_histo: Vec<CachePadded<Mutex<hdrhistogram::Histogram<u64>>>>,
}

impl StatsState {
    fn new(num_clients: usize) -> Self {
        StatsState {
            counters: (0..num_clients)
                .map(|_| CachePadded::new(ClientCounters::default()))
                .collect(),
            latencies_histo: (0..num_clients)
                .map(|_| CachePadded::new(Mutex::new(StatsState::make_latency_histogram())))
                .collect(),
        }
    }

    fn make_latency_histogram() -> hdrhistogram::Histogram<u64> {
        hdrhistogram::Histogram::new_with_bounds(1, 1_000_000_000, 3)
            .expect("latency histogram bounds are valid")
    }

    fn record_traversal(&self, client_num: usize, traversal: &Traversal, latency: Duration) {
        let counters = &self.counters[client_num];
        counters.traversals.fetch_add(1, Ordering::Relaxed);
        counters
            .records
            .fetch_add(traversal.records_read, Ordering::Relaxed);
        counters
            .bytes
            .fetch_add(traversal.bytes_read, Ordering::Relaxed);
        counters
            .read_retries
            .fetch_add(traversal.read_retries, Ordering::Relaxed);
        let mut h = self.latencies_histo[client_num]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        h.saturating_record(u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX));
    }
}

const MONITOR_PERIOD: Duration = Duration::from_secs(1);

fn main() {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter({
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        })
        .init();

    traversal::env_tunables::assert_no_unknown_env_vars();

    let args = Args::parse();

    let res = Config::load(&args.config)
        .map_err(traversal::Error::from)
        .and_then(|config| match &args.command {
            Command::Setup {
                node_records,
                relationship_records,
            } => setup::setup_stores(&config, node_records.get(), relationship_records.get())
                .map_err(traversal::Error::from),
            Command::Run(run_args) => run(Arc::new(run_args.clone()), config),
        });
    if let Err(e) = res {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Arc<RunArgs>, config: Config) -> traversal::Result<()> {
    let cache = PageCache::with_memory(config.max_ram, config.page_size)?;
    info!(
        max_pages = cache.max_pages(),
        page_size = cache.page_size(),
        "page cache ready"
    );
    let workload = Workload::new(Stores::map(&cache, &config)?, &config)?;

    let stop_clients = Arc::new(AtomicBool::new(false));
    let (stop_monitor_tx, stop_monitor_rx) = tokio::sync::oneshot::channel::<Vec<Duration>>();

    let works = setup_client_works(&args);
    let stats_state = Arc::new(StatsState::new(works.len()));

    if let RunDuration::FixedDuration(duration) = args.run_duration {
        let stop_clients = Arc::clone(&stop_clients);
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            info!("configured runtime expired, setting stop flag");
            stop_clients.store(true, Ordering::Relaxed);
        });
    }

    ctrlc::set_handler({
        let stop_clients = Arc::clone(&stop_clients);
        move || {
            info!("ctrl-c, setting stop flag");
            if stop_clients.fetch_or(true, Ordering::Relaxed) {
                error!("stop flag was already set, aborting");
                std::process::abort();
            } else {
                info!("first ctrl-c, stop flag set");
            }
        }
    })
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let clients_and_monitor_ready = Arc::new(Barrier::new(works.len() + 1));

    let monitor = monitor::spawn(
        monitor::MonitorContext {
            args: Arc::clone(&args),
            config: config.clone(),
            layouts: monitor::StoreLayouts {
                nodes: *workload.stores().nodes.layout(),
                relationships: *workload.stores().relationships.layout(),
            },
            cache: cache.clone(),
            stats_state: Arc::clone(&stats_state),
            ready: Arc::clone(&clients_and_monitor_ready),
            stop_clients: Arc::clone(&stop_clients),
        },
        stop_monitor_rx,
    )?;

    let res = clients::run(
        &workload,
        works,
        clients_and_monitor_ready,
        stop_clients,
        stats_state,
    );
    // the monitor only exits once it hears from us
    let _ = stop_monitor_tx.send(res.client_run_times);
    match monitor.join() {
        Ok(written) => written?,
        Err(panic) => std::panic::resume_unwind(panic),
    }

    match res.errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Clone)]
struct OpsLeft(Option<Arc<AtomicI64>>);

struct ClientWork {
    ops_left: OpsLeft,
}

impl OpsLeft {
    fn take_one_op(&self) -> ControlFlow<()> {
        match &self.0 {
            None => (),
            Some(ops_left) => {
                let ops_left = ops_left.fetch_sub(1, Ordering::Relaxed);
                if ops_left <= 0 {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }
}

fn setup_client_works(args: &RunArgs) -> Vec<ClientWork> {
    let ops = |count: u64| Arc::new(AtomicI64::new(i64::try_from(count).unwrap_or(i64::MAX)));
    let mut fixed_total_ops_left = None;
    let mut get_ops_left_for_client = || match args.run_duration {
        RunDuration::UntilCtrlC | RunDuration::FixedDuration(_) => OpsLeft(None),
        RunDuration::FixedTotalTraversalCount(total) => {
            let shared = fixed_total_ops_left.get_or_insert_with(|| ops(total));
            OpsLeft(Some(Arc::clone(shared)))
        }
        // a separate budget per client
        RunDuration::FixedPerClientTraversalCount(per_client) => OpsLeft(Some(ops(per_client))),
    };
    (0..args.num_clients.get())
        .map(|_| ClientWork {
            ops_left: get_ops_left_for_client(),
        })
        .collect()
}
