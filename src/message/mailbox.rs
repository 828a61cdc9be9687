use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
};

use crossbeam_channel::Receiver;
use log::{debug, error};

use super::comm::{Envelope, Tag};
use crate::error::{Error, Result};

/// Matches inbound envelopes to the `(source, tag)` a caller asks for.
/// Envelopes that arrive before they are asked for are kept, in arrival
/// order, until a matching `take`. An `Abort` envelope fails the current and
/// every later `take`.
pub struct Mailbox {
    inbound: Receiver<Envelope>,
    stash: RefCell<HashMap<(usize, Tag), VecDeque<Vec<u8>>>>,
    aborted: RefCell<Option<(usize, String)>>,
}

impl Mailbox {
    pub fn new(inbound: Receiver<Envelope>) -> Self {
        Self {
            inbound,
            stash: RefCell::new(HashMap::new()),
            aborted: RefCell::new(None),
        }
    }

    pub fn take(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        if let Some(payload) = self
            .stash
            .borrow_mut()
            .get_mut(&(source, tag))
            .and_then(VecDeque::pop_front)
        {
            return Ok(payload);
        }

        loop {
            if let Some((rank, reason)) = self.aborted.borrow().clone() {
                return Err(Error::Aborted { rank, reason });
            }

            let envelope = self.inbound.recv().map_err(|_| {
                Error::Transport(format!(
                    "inbound channel closed while waiting for {:?} from {}",
                    tag, source
                ))
            })?;

            if envelope.tag != Tag::Abort && envelope.source == source && envelope.tag == tag {
                return Ok(envelope.payload);
            }
            debug!(
                "stashing {:?} message from {} while waiting for {:?} from {}",
                envelope.tag, envelope.source, tag, source
            );
            self.file(envelope);
        }
    }

    /// Record an abort, or stash anything else under its source and tag.
    fn file(&self, envelope: Envelope) {
        if envelope.tag == Tag::Abort {
            let reason = String::from_utf8_lossy(&envelope.payload).into_owned();
            error!("rank {} aborted the run: {}", envelope.source, reason);
            *self.aborted.borrow_mut() = Some((envelope.source, reason));
        } else {
            self.stash
                .borrow_mut()
                .entry((envelope.source, envelope.tag))
                .or_default()
                .push_back(envelope.payload);
        }
    }

    /// Number of messages that arrived but have not been taken yet. Only
    /// counts envelopes already pulled off the inbound channel.
    pub fn stashed(&self, tag: Tag) -> usize {
        self.stash
            .borrow()
            .iter()
            .filter(|((_, t), _)| *t == tag)
            .map(|(_, queue)| queue.len())
            .sum()
    }

    /// Pull everything currently sitting in the inbound channel into the
    /// stash without blocking.
    pub fn drain_inbound(&self) {
        for envelope in self.inbound.try_iter() {
            self.file(envelope);
        }
    }
}




#[cfg(test)]
mod test {

    use super::*;

    fn envelope(source: usize, tag: Tag, byte: u8) -> Envelope {
        Envelope {
            source,
            tag,
            payload: vec![byte],
        }
    }

    #[test]
    fn messages_from_one_source_are_taken_in_order() {
        let (sink, source) = crossbeam_channel::unbounded();
        let mailbox = Mailbox::new(source);
        sink.send(envelope(1, Tag::Halo, 10)).unwrap();
        sink.send(envelope(1, Tag::Halo, 11)).unwrap();
        assert_eq!(mailbox.take(1, Tag::Halo).unwrap(), vec![10]);
        assert_eq!(mailbox.take(1, Tag::Halo).unwrap(), vec![11]);
    }

    #[test]
    fn unrelated_messages_are_stashed_until_asked_for() {
        let (sink, source) = crossbeam_channel::unbounded();
        let mailbox = Mailbox::new(source);
        sink.send(envelope(2, Tag::Halo, 1)).unwrap();
        sink.send(envelope(1, Tag::Gather, 2)).unwrap();
        sink.send(envelope(1, Tag::Halo, 3)).unwrap();

        assert_eq!(mailbox.take(1, Tag::Halo).unwrap(), vec![3]);
        assert_eq!(mailbox.stashed(Tag::Halo), 1);
        assert_eq!(mailbox.stashed(Tag::Gather), 1);
        assert_eq!(mailbox.take(1, Tag::Gather).unwrap(), vec![2]);
        assert_eq!(mailbox.take(2, Tag::Halo).unwrap(), vec![1]);
        assert_eq!(mailbox.stashed(Tag::Halo), 0);
    }

    #[test]
    fn abort_fails_the_pending_take() {
        let (sink, source) = crossbeam_channel::unbounded();
        let mailbox = Mailbox::new(source);
        sink.send(Envelope {
            source: 4,
            tag: Tag::Abort,
            payload: b"bad grid".to_vec(),
        })
        .unwrap();

        match mailbox.take(0, Tag::Barrier) {
            Err(Error::Aborted { rank, reason }) => {
                assert_eq!(rank, 4);
                assert_eq!(reason, "bad grid");
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(matches!(mailbox.take(0, Tag::Barrier), Err(Error::Aborted { .. })));
    }

    #[test]
    fn abort_seen_while_draining_fails_the_next_take() {
        let (sink, source) = crossbeam_channel::unbounded();
        let mailbox = Mailbox::new(source);
        sink.send(envelope(1, Tag::Halo, 7)).unwrap();
        sink.send(Envelope {
            source: 1,
            tag: Tag::Abort,
            payload: b"x".to_vec(),
        })
        .unwrap();

        mailbox.drain_inbound();
        assert_eq!(mailbox.stashed(Tag::Halo), 1);
        assert_eq!(mailbox.stashed(Tag::Abort), 0);
        assert_eq!(mailbox.take(1, Tag::Halo).unwrap(), vec![7]);
        assert!(matches!(
            mailbox.take(1, Tag::Halo),
            Err(Error::Aborted { rank: 1, .. })
        ));
    }

    #[test]
    fn closed_inbound_channel_is_a_transport_error() {
        let (sink, source) = crossbeam_channel::unbounded::<Envelope>();
        drop(sink);
        let mailbox = Mailbox::new(source);
        assert!(matches!(mailbox.take(0, Tag::Halo), Err(Error::Transport(_))));
    }
}
