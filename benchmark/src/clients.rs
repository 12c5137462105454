use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Barrier,
    },
    time::{Duration, Instant},
};

use page_cache::PagedFile;
use tracing::{error, info};
use traversal::Workload;

use crate::{ClientWork, StatsState};

pub(crate) struct ClientsRunResult {
    pub(crate) client_run_times: Vec<Duration>,
    /// Traversals that failed; each one stopped the run.
    pub(crate) errors: Vec<traversal::Error>,
}

/// Runs one thread per client until `stop` is set or the clients use up their budgets.
pub(crate) fn run(
    workload: &Workload<PagedFile>,
    works: Vec<ClientWork>,
    clients_ready: Arc<Barrier>,
    stop: Arc<AtomicBool>,
    stats_state: Arc<StatsState>,
) -> ClientsRunResult {
    std::thread::scope(|scope| {
        let mut jhs = Vec::with_capacity(works.len());
        for (i, work) in works.into_iter().enumerate() {
            let stop = Arc::clone(&stop);
            let stats_state = Arc::clone(&stats_state);
            let clients_ready = Arc::clone(&clients_ready);
            jhs.push(scope.spawn(move || {
                clients_ready.wait();
                let start = Instant::now();
                if let Err(e) = client(i, workload, work, &stop, &stats_state) {
                    error!(client = i, "traversal failed, stopping the run: {e}");
                    stop.store(true, Ordering::Relaxed);
                    return Err(e);
                }
                Ok(start.elapsed())
            }));
        }

        let mut res = ClientsRunResult {
            client_run_times: Vec::with_capacity(jhs.len()),
            errors: Vec::new(),
        };
        for jh in jhs {
            match jh.join() {
                Ok(Ok(run_time)) => res.client_run_times.push(run_time),
                Ok(Err(e)) => res.errors.push(e),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        res
    })
}

fn client(
    i: usize,
    workload: &Workload<PagedFile>,
    work: ClientWork,
    stop: &AtomicBool,
    stats_state: &StatsState,
) -> traversal::Result<()> {
    info!("Client {i} starting");
    let mut rng = rand::thread_rng();
    while !stop.load(Ordering::Relaxed) {
        let ControlFlow::Continue(()) = work.ops_left.take_one_op() else {
            break;
        };
        let start = Instant::now();
        let traversal = workload.traverse(&mut rng)?;
        stats_state.record_traversal(i, &traversal, start.elapsed());
    }
    info!("Client {i} stopping");
    Ok(())
}
