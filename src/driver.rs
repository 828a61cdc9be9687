use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{InboundMode, RunConfig};
use crate::error::Result;
use crate::exchange::{Direction, Exchange, SlotSet};
use crate::message::Communicator;
use crate::topology::Topology;
use crate::workload::Workload;




/**
 * Average wall-clock seconds per iteration of one process: `task` covers the
 * whole iteration (exchange, wait and compute), `compute` the workload call
 * alone.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub task: f64,
    pub compute: f64,
}

impl Timing {
    /**
     * Time per iteration not spent computing: issuing transfers and waiting
     * for neighbors.
     */
    pub fn overhead(&self) -> f64 {
        self.task - self.compute
    }
}




/**
 * Everything one process learns from a measured run
 */
#[derive(Clone, Debug)]
pub struct Measurement {
    pub timing: Timing,
    pub iterations: usize,
    pub transfers: usize,
    pub halo: Vec<Vec<f64>>,
}




/**
 * Run the measured iterations of one process. Each iteration pulls inputs
 * from the neighbors, waits for them together with the previous iteration's
 * outputs, runs the workload, and pushes its outputs for the next iteration.
 * A first round of outputs is pushed before the opening barrier so that
 * iteration 0 has something to wait on.
 *
 * Outbound buffers start out filled with this process's rank; the contents
 * are never interpreted.
 */
pub fn measure<C, W>(
    comm: &C,
    topology: &Topology,
    config: &RunConfig,
    workload: &mut W,
) -> Result<Measurement>
where
    C: Communicator,
    W: Workload + ?Sized,
{
    let rank = comm.rank();
    let exchanges = config.exchanges_data();
    let num_slots = topology.num_slots();

    let mut send = SlotSet::new(num_slots, config.payload_size, rank as f64);
    let mut recv = SlotSet::new(num_slots, config.payload_size, 0.0);
    let mut engine = Exchange::new(comm, topology, config.payload_size);

    let inbound = match config.inbound {
        InboundMode::Receive => Direction::Receive,
        InboundMode::Send => Direction::Send,
    };

    if exchanges {
        engine.exchange(Direction::Send, &mut send)?;
    }
    comm.barrier()?;

    info!(
        "[{}] measuring {} iterations over {} slots (payload {}, inbound {})",
        rank, config.iterations, num_slots, config.payload_size, config.inbound
    );

    let mut task_time = 0.0;
    let mut compute_time = 0.0;

    for iteration in 0..config.iterations {
        let task_start = Instant::now();

        if exchanges {
            engine.exchange(inbound, &mut recv)?;
            engine.wait(&mut [&mut send, &mut recv])?;
        }

        let compute_start = Instant::now();
        workload.perform(config)?;
        let compute = compute_start.elapsed().as_secs_f64();
        compute_time += compute;

        if exchanges {
            engine.exchange(Direction::Send, &mut send)?;
        }

        let task = task_start.elapsed().as_secs_f64();
        task_time += task;

        debug!(
            "[{}] iteration {}: task {:.6}s compute {:.6}s",
            rank, iteration, task, compute
        );
    }

    // The last outbound round is never waited on inside the loop.
    engine.wait(&mut [&mut send, &mut recv])?;

    let timing = Timing {
        task: task_time / config.iterations as f64,
        compute: compute_time / config.iterations as f64,
    };
    info!(
        "[{}] average task {:.6}s, compute {:.6}s",
        rank, timing.task, timing.compute
    );

    Ok(Measurement {
        timing,
        iterations: config.iterations,
        transfers: engine.issued(),
        halo: recv.buffers().to_vec(),
    })
}




#[cfg(test)]
mod test {

    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::message::{LocalCommunicator, Tag};

    fn sleeper(ms: u64) -> impl FnMut(&RunConfig) -> Result<()> {
        move |_: &RunConfig| {
            thread::sleep(Duration::from_millis(ms));
            Ok(())
        }
    }

    fn run_ring(procs: usize, config: RunConfig) -> Vec<(Measurement, usize)> {
        let handles: Vec<_> = LocalCommunicator::group(procs)
            .into_iter()
            .map(|comm| {
                let config = config.clone();
                thread::spawn(move || {
                    let topology = Topology::new(comm.rank(), comm.size(), &config).unwrap();
                    let measurement = measure(&comm, &topology, &config, &mut sleeper(1)).unwrap();
                    comm.barrier().unwrap();
                    (measurement, comm.unread(Tag::Halo))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn zero_dimensions_never_communicates() {
        let config = RunConfig {
            dimensions: 0,
            payload_size: 8,
            iterations: 3,
            ..RunConfig::default()
        };
        for (measurement, unread) in run_ring(2, config) {
            assert_eq!(measurement.transfers, 0);
            assert_eq!(unread, 0);
            assert!(measurement.halo.is_empty());
        }
    }

    #[test]
    fn zero_payload_never_communicates() {
        let config = RunConfig {
            dimensions: 1,
            payload_size: 0,
            iterations: 3,
            ..RunConfig::default()
        };
        for (measurement, unread) in run_ring(3, config) {
            assert_eq!(measurement.transfers, 0);
            assert_eq!(unread, 0);
        }
    }

    #[test]
    fn every_round_issues_four_transfers_on_a_ring() {
        let config = RunConfig {
            dimensions: 1,
            payload_size: 16,
            iterations: 4,
            ..RunConfig::default()
        };
        for (measurement, _) in run_ring(4, config) {
            // Pre-seed sends, then per iteration two receives and two sends.
            assert_eq!(measurement.transfers, 2 + 4 * 4);
        }
    }

    #[test]
    fn received_halo_comes_from_the_ring_neighbors() {
        let config = RunConfig {
            dimensions: 1,
            payload_size: 5,
            iterations: 2,
            ..RunConfig::default()
        };
        for (rank, (measurement, unread)) in run_ring(4, config).into_iter().enumerate() {
            assert_eq!(measurement.halo[0], vec![((rank + 3) % 4) as f64; 5]);
            assert_eq!(measurement.halo[1], vec![((rank + 1) % 4) as f64; 5]);
            // One more outbound round than inbound rounds.
            assert_eq!(unread, 2);
        }
    }

    #[test]
    fn literal_inbound_mode_only_sends() {
        let config = RunConfig {
            dimensions: 1,
            payload_size: 5,
            iterations: 3,
            inbound: InboundMode::Send,
            ..RunConfig::default()
        };
        for (measurement, unread) in run_ring(4, config) {
            assert_eq!(measurement.transfers, 2 + 3 * 4);
            // Nothing is ever received, so every send is still unread.
            assert_eq!(unread, measurement.transfers);
            assert!(measurement.halo.iter().all(|b| b.iter().all(|&x| x == 0.0)));
        }
    }

    #[test]
    fn task_time_encloses_compute_time() {
        for (measurement, _) in run_ring(2, RunConfig { iterations: 5, ..RunConfig::default() }) {
            assert!(measurement.timing.task >= measurement.timing.compute);
            assert!(measurement.timing.compute >= 0.001);
            assert!(measurement.timing.overhead() >= 0.0);
        }
    }

    #[test]
    fn workload_runs_once_per_iteration() {
        let comm = LocalCommunicator::group(1).pop().unwrap();
        let config = RunConfig {
            dimensions: 0,
            payload_size: 0,
            task_size: 64,
            iterations: 10,
            ..RunConfig::default()
        };
        let topology = Topology::new(0, 1, &config).unwrap();
        let mut calls = 0;
        let mut workload = |c: &RunConfig| -> Result<()> {
            assert_eq!(c.task_size, 64);
            calls += 1;
            Ok(())
        };
        let measurement = measure(&comm, &topology, &config, &mut workload).unwrap();
        assert_eq!(calls, 10);
        assert_eq!(measurement.iterations, 10);
    }

    #[test]
    fn workload_failure_stops_the_run() {
        let comm = LocalCommunicator::group(1).pop().unwrap();
        let config = RunConfig {
            dimensions: 0,
            ..RunConfig::default()
        };
        let topology = Topology::new(0, 1, &config).unwrap();
        let mut workload =
            |_: &RunConfig| -> Result<()> { Err(crate::error::Error::Workload("boom".to_string())) };
        assert!(matches!(
            measure(&comm, &topology, &config, &mut workload),
            Err(crate::error::Error::Workload(_))
        ));
    }
}
