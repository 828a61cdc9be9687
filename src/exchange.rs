//! Non-blocking transfers to and from the immediate grid neighbors.
//!
//! Every process owns two [`SlotSet`]s, one for outbound and one for inbound
//! data. A slot set holds one buffer and one request per direction slot
//! (slot `2i` is the decrement neighbor on axis `i`, slot `2i + 1` the
//! increment neighbor). Transfers are issued with [`Exchange::exchange`],
//! which never blocks, and completed in bulk with [`Exchange::wait`].

use log::debug;

use crate::error::{Error, Result};
use crate::message::{util, Communicator, Completion, Tag};
use crate::topology::{slot, Side, Topology};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// The state of one request slot. A slot is re-armed only from `Idle`.
#[derive(Debug)]
pub enum Request {
    Idle,
    Send(Completion),
    Recv { source: usize },
}

impl Request {
    pub fn is_idle(&self) -> bool {
        matches!(self, Request::Idle)
    }
}

/// Per-slot buffers and the requests currently in flight through them.
#[derive(Debug)]
pub struct SlotSet {
    buffers: Vec<Vec<f64>>,
    requests: Vec<Request>,
}

impl SlotSet {
    /// Create `num_slots` buffers of `payload_size` elements, each filled
    /// with `fill`, and as many idle requests.
    pub fn new(num_slots: usize, payload_size: usize, fill: f64) -> Self {
        Self {
            buffers: vec![vec![fill; payload_size]; num_slots],
            requests: (0..num_slots).map(|_| Request::Idle).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, slot: usize) -> &[f64] {
        &self.buffers[slot]
    }

    /// Mutable access to a buffer. Fails while a transfer through the slot
    /// is outstanding.
    pub fn buffer_mut(&mut self, slot: usize) -> Result<&mut [f64]> {
        if !self.requests[slot].is_idle() {
            return Err(Error::SlotInFlight(slot));
        }
        Ok(&mut self.buffers[slot])
    }

    pub fn buffers(&self) -> &[Vec<f64>] {
        &self.buffers
    }

    pub fn request(&self, slot: usize) -> &Request {
        &self.requests[slot]
    }

    /// Number of slots with an outstanding transfer.
    pub fn in_flight(&self) -> usize {
        self.requests.iter().filter(|r| !r.is_idle()).count()
    }
}

/// The neighbor exchange engine of one process.
pub struct Exchange<'a, C: Communicator> {
    comm: &'a C,
    topology: &'a Topology,
    payload_size: usize,
    issued: usize,
}

impl<'a, C: Communicator> Exchange<'a, C> {
    pub fn new(comm: &'a C, topology: &'a Topology, payload_size: usize) -> Self {
        Self {
            comm,
            topology,
            payload_size,
            issued: 0,
        }
    }

    /// Total number of sends and receives issued so far.
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Issue one transfer per direction slot, in the given direction, through
    /// the given slot set. Returns without blocking. Without a grid there are
    /// no neighbors and nothing is issued.
    pub fn exchange(&mut self, direction: Direction, slots: &mut SlotSet) -> Result<()> {
        let grid = match self.topology {
            Topology::Degenerate => return Ok(()),
            Topology::Grid(grid) => grid,
        };

        for axis in 0..grid.dimensions() {
            for side in [Side::Decrement, Side::Increment] {
                let s = slot(axis, side);
                let neighbor = grid.neighbor(s);

                if !slots.requests[s].is_idle() {
                    return Err(Error::SlotInFlight(s));
                }

                slots.requests[s] = match direction {
                    Direction::Send => {
                        let payload = util::f64s_to_bytes(&slots.buffers[s][..self.payload_size]);
                        Request::Send(self.comm.post(neighbor, Tag::Halo, payload)?)
                    }
                    Direction::Receive => Request::Recv { source: neighbor },
                };
                self.issued += 1;

                debug!(
                    "[{}] {:?} slot {} (axis {}, {:?}) with rank {}",
                    self.comm.rank(),
                    direction,
                    s,
                    axis,
                    side,
                    neighbor
                );
            }
        }
        Ok(())
    }

    /// Block until every outstanding request in the given slot sets has
    /// completed. Received payloads are copied verbatim into their buffers.
    /// The first failure aborts the wait; the run is lost at that point.
    pub fn wait(&mut self, tables: &mut [&mut SlotSet]) -> Result<()> {
        for table in tables.iter_mut() {
            let SlotSet { buffers, requests } = &mut **table;

            for (s, request) in requests.iter_mut().enumerate() {
                match std::mem::replace(request, Request::Idle) {
                    Request::Idle => (),
                    Request::Send(completion) => completion.wait()?,
                    Request::Recv { source } => {
                        let bytes = self.comm.take(source, Tag::Halo)?;
                        util::bytes_into_f64s(&bytes, &mut buffers[s][..self.payload_size])
                            .map_err(|e| {
                                Error::Transport(format!("slot {} from rank {}: {}", s, source, e))
                            })?;
                    }
                }
            }
        }
        Ok(())
    }
}
