use thiserror::Error;

/// Every failure in a benchmark run is fatal to the whole process group, so
/// there is a single error type; callers only log it and abort.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot arrange {procs} processes on a {dims}-dimensional grid with extents {extents:?}")]
    Topology {
        procs: usize,
        dims: usize,
        extents: Vec<usize>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request slot {0} re-armed while its previous transfer is still in flight")]
    SlotInFlight(usize),

    #[error("run aborted by rank {rank}: {reason}")]
    Aborted { rank: usize, reason: String },

    #[error("workload error: {0}")]
    Workload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
