use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use log::info;

use crate::driver::Timing;
use crate::error::Result;
use crate::message::Communicator;

/// Rank that collects and emits the results.
pub const COORDINATOR: usize = 0;

/// Default name of the result table.
pub const RESULT_FILE: &str = "SPTE_Results.out";

/// Column labels of the result table.
pub const HEADER: &str = "#Task\tCompute";

/// Destination of the gathered result table, written only by the
/// coordinator. Rows are in rank order.
pub trait ResultSink {
    fn emit(&mut self, rows: &[Timing]) -> Result<()>;
}

/// Writes the result table to any `Write`.
pub struct TableWriter<W: Write> {
    writer: W,
}

impl<W: Write> TableWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for TableWriter<W> {
    fn emit(&mut self, rows: &[Timing]) -> Result<()> {
        writeln!(self.writer, "{}", HEADER)?;
        for row in rows {
            writeln!(self.writer, "{}\t{}", row.task, row.compute)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the result table to a file, created (or truncated) on emission.
pub struct ResultFile {
    path: PathBuf,
}

impl ResultFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ResultFile {
    fn default() -> Self {
        Self::new(RESULT_FILE)
    }
}

impl ResultSink for ResultFile {
    fn emit(&mut self, rows: &[Timing]) -> Result<()> {
        let file = File::create(&self.path)?;
        TableWriter::new(BufWriter::new(file)).emit(rows)?;
        info!("wrote {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}

/// Accepts the table and drops it.
pub struct Discard;

impl ResultSink for Discard {
    fn emit(&mut self, _rows: &[Timing]) -> Result<()> {
        Ok(())
    }
}

/// Gather every process's timing at the coordinator, in rank order.
/// Returns `Some` only on the coordinator.
pub fn gather_timings<C: Communicator + ?Sized>(comm: &C, timing: Timing) -> Result<Option<Vec<Timing>>> {
    let encoded = rmp_serde::encode::to_vec(&timing)?;

    match comm.gather(COORDINATOR, encoded)? {
        None => Ok(None),
        Some(gathered) => Ok(Some(
            gathered
                .iter()
                .map(|bytes| rmp_serde::decode::from_slice(bytes))
                .collect::<std::result::Result<Vec<Timing>, _>>()?,
        )),
    }
}

/// Gather the timings, have the coordinator emit them, then hold every
/// process at a barrier until the coordinator is done.
pub fn aggregate<C: Communicator + ?Sized>(
    comm: &C,
    timing: Timing,
    sink: &mut dyn ResultSink,
) -> Result<Option<Vec<Timing>>> {
    let rows = gather_timings(comm, timing)?;

    if let Some(rows) = &rows {
        sink.emit(rows)?;
    }
    comm.barrier()?;
    Ok(rows)
}
