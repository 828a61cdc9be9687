use crossbeam_channel::Receiver;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Message classes. Delivery is FIFO per `(source, tag)` pair, so traffic of
/// one class never overtakes or blocks traffic of another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Halo,
    Barrier,
    Gather,
    Abort,
}

/// The unit of transfer between two ranks. The payload is opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: usize,
    pub tag: Tag,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::encode::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::decode::from_slice(bytes)?)
    }
}

/// Handle on an outbound transfer. A send has completed once the transport
/// no longer needs the sender's data: immediately for in-memory transports,
/// on acknowledgement by the peer for TCP.
#[derive(Debug)]
pub enum Completion {
    Ready,
    Pending(Receiver<Result<()>>),
}

impl Completion {
    /// Block until the transfer has completed, surfacing any transport
    /// failure.
    pub fn wait(self) -> Result<()> {
        match self {
            Completion::Ready => Ok(()),
            Completion::Pending(done) => done.recv().map_err(|_| {
                Error::Transport("transport shut down before the send completed".to_string())
            })?,
        }
    }
}

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, in-memory
/// channels, or a higher level abstraction like MPI.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator, including this one.
    fn size(&self) -> usize;

    /// Must be implemented to start sending a message to a peer (possibly
    /// this process itself). This method must return immediately; it is not
    /// allowed to block until a matching receive is posted.
    fn post(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<Completion>;

    /// Must be implemented to receive the next message with the given tag
    /// from the given peer, blocking until it arrives. Messages from one
    /// source with one tag are taken in the order they were posted.
    fn take(&self, source: usize, tag: Tag) -> Result<Vec<u8>>;

    /// Block until every rank has entered the barrier. Rank 0 collects one
    /// arrival from every peer and then releases them all.
    ///
    fn barrier(&self) -> Result<()> {
        let r = self.rank();
        let p = self.size();

        if r == 0 {
            for source in 1..p {
                self.take(source, Tag::Barrier)?;
            }
            let releases = (1..p)
                .map(|dest| self.post(dest, Tag::Barrier, Vec::new()))
                .collect::<Result<Vec<_>>>()?;
            for release in releases {
                release.wait()?;
            }
        } else {
            self.post(0, Tag::Barrier, Vec::new())?.wait()?;
            self.take(0, Tag::Barrier)?;
        }
        Ok(())
    }

    /// Collect one message from every rank at `root`, in rank order. Returns
    /// `Some` on the root and `None` everywhere else.
    ///
    fn gather(&self, root: usize, value: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
        if self.rank() != root {
            self.post(root, Tag::Gather, value)?.wait()?;
            return Ok(None);
        }
        let mut value = Some(value);
        let mut gathered = Vec::with_capacity(self.size());

        for source in 0..self.size() {
            if source == root {
                gathered.push(value.take().unwrap_or_default());
            } else {
                gathered.push(self.take(source, Tag::Gather)?);
            }
        }
        Ok(Some(gathered))
    }

    /// Tell every peer that this rank has failed. Best effort: the run is
    /// already lost, so delivery failures are only logged.
    ///
    fn abort(&self, reason: &str) {
        for dest in (0..self.size()).filter(|&d| d != self.rank()) {
            match self.post(dest, Tag::Abort, reason.as_bytes().to_vec()) {
                Ok(_) => debug!("[{}] abort posted to {}", self.rank(), dest),
                Err(e) => warn!("[{}] could not notify {} of abort: {}", self.rank(), dest, e),
            }
        }
    }
}
