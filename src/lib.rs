//! Grainbench is a proxy application for measuring how the granularity of
//! computation relative to communication affects throughput in iterative,
//! halo-exchange style codes. A group of processes is laid out on a periodic
//! D-dimensional grid; every iteration each process exchanges buffers with
//! its 2·D immediate neighbors using non-blocking transfers, runs a synthetic
//! compute task, and records both the full iteration time and the compute
//! time alone. The per-process averages are gathered into a result table.
//!
//! Processes talk through the [`message::Communicator`] trait, so the
//! measurement core runs unchanged over in-memory channels or TCP.

pub mod aggregate;
pub mod config;
pub mod driver;
pub mod error;
pub mod exchange;
pub mod launch;
pub mod message;
pub mod topology;
pub mod workload;

pub use config::{InboundMode, Layout, RunConfig};
pub use error::{Error, Result};
