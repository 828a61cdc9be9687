//! Composition of a whole run: build the topology, measure, aggregate. Also
//! runs a group of logical processes inside one OS process, one thread per
//! rank, optionally pinned to CPU cores.

use std::thread;

use core_affinity::{get_core_ids, set_for_current};
use log::{error, info, warn};

use crate::aggregate::{aggregate, Discard, ResultSink, COORDINATOR};
use crate::config::RunConfig;
use crate::driver::{measure, Measurement, Timing};
use crate::error::{Error, Result};
use crate::message::Communicator;
use crate::topology::Topology;
use crate::workload::Workload;

/// The outcome of a run on one process. `rows` is only present on the
/// coordinator.
#[derive(Clone, Debug)]
pub struct Report {
    pub rank: usize,
    pub grid_rank: Option<usize>,
    pub measurement: Measurement,
    pub rows: Option<Vec<Timing>>,
}

/// Run the benchmark on one process of the group behind `comm`. On failure
/// the peers are told to abort before the error is returned.
pub fn run_rank<C, W>(
    comm: &C,
    config: &RunConfig,
    workload: &mut W,
    sink: &mut dyn ResultSink,
) -> Result<Report>
where
    C: Communicator,
    W: Workload + ?Sized,
{
    let result = (|| -> Result<Report> {
        let topology = Topology::new(comm.rank(), comm.size(), config)?;
        let measurement = measure(comm, &topology, config, workload)?;
        let rows = aggregate(comm, measurement.timing, sink)?;

        Ok(Report {
            rank: comm.rank(),
            grid_rank: topology.grid_rank(),
            measurement,
            rows,
        })
    })();

    if let Err(e) = &result {
        // A peer's abort is already known to everyone.
        if !matches!(e, Error::Aborted { .. }) {
            error!("[{}] fatal: {}", comm.rank(), e);
            comm.abort(&e.to_string());
        }
    }
    result
}

/// Run every communicator of a group on its own thread. The coordinator
/// gets `sink`; `workload` is called once per rank to build that rank's
/// workload. Returns the reports in rank order, or the error that brought
/// the run down.
pub fn run_group<C, W, F>(
    comms: Vec<C>,
    config: &RunConfig,
    workload: F,
    sink: Box<dyn ResultSink + Send>,
    pin_cores: bool,
) -> Result<Vec<Report>>
where
    C: Communicator + Send + 'static,
    W: Workload + 'static,
    F: Fn(usize) -> W + Send + Sync + Clone + 'static,
{
    let cores = if pin_cores {
        match get_core_ids() {
            Some(cores) if !cores.is_empty() => cores,
            _ => {
                warn!("core ids unavailable, running unpinned");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let mut sink = Some(sink);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let rank = comm.rank();
            let core = cores.get(rank % cores.len().max(1)).copied();
            let discard: Box<dyn ResultSink + Send> = Box::new(Discard);
            let mut sink = match rank {
                COORDINATOR => sink.take().unwrap_or(discard),
                _ => discard,
            };
            let config = config.clone();
            let make_workload = workload.clone();

            thread::spawn(move || {
                if let Some(core) = core {
                    set_for_current(core);
                }
                let mut workload = make_workload(rank);
                run_rank(&comm, &config, &mut workload, sink.as_mut())
            })
        })
        .collect();

    info!("started {} ranks", handles.len());

    let results: Vec<Result<Report>> = handles
        .into_iter()
        .enumerate()
        .map(|(rank, handle)| {
            handle
                .join()
                .unwrap_or_else(|_| Err(Error::Transport(format!("rank {} panicked", rank))))
        })
        .collect();

    // Report the failure that started the abort rather than its echoes.
    let mut reports = Vec::with_capacity(results.len());
    let mut echo = None;
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e @ Error::Aborted { .. }) => echo = echo.or(Some(e)),
            Err(e) => return Err(e),
        }
    }
    match echo {
        Some(e) => Err(e),
        None => Ok(reports),
    }
}
