use crossbeam_channel::Sender;

use super::comm::{Communicator, Completion, Envelope, Tag};
use super::mailbox::Mailbox;
use crate::error::{Error, Result};

/// A communicator whose peers live in the same OS process, connected by
/// unbounded crossbeam channels. Sends complete as soon as they are queued.
pub struct LocalCommunicator {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    mailbox: Mailbox,
}

impl LocalCommunicator {
    /// Create a fully connected group of `size` communicators; element `r`
    /// of the result has rank `r`.
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        let (sinks, sources): (Vec<_>, Vec<_>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, inbound)| LocalCommunicator {
                rank,
                peers: sinks.clone(),
                mailbox: Mailbox::new(inbound),
            })
            .collect()
    }

    /// Number of messages with the given tag that were delivered to this
    /// rank but never taken.
    pub fn unread(&self, tag: Tag) -> usize {
        self.mailbox.drain_inbound();
        self.mailbox.stashed(tag)
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn post(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<Completion> {
        let peer = self
            .peers
            .get(dest)
            .ok_or_else(|| Error::Transport(format!("no rank {} in a group of {}", dest, self.size())))?;

        peer.send(Envelope {
            source: self.rank,
            tag,
            payload,
        })
        .map_err(|_| Error::Transport(format!("rank {} is gone", dest)))?;

        Ok(Completion::Ready)
    }

    fn take(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        self.mailbox.take(source, tag)
    }
}
