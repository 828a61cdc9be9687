use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

use super::backoff::{ExponentialBackoff, Retry};
use super::comm::{Communicator, Completion, Envelope, Tag};
use super::mailbox::Mailbox;
use super::util;
use crate::error::{Error, Result};

const RETRY_WAIT: Duration = Duration::from_millis(50);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(2000);
const CONNECT_ATTEMPTS: usize = 20;

/// A frame queued for the sender thread, with the channel on which its
/// completion is reported.
struct Outbound {
    dest: usize,
    frame: Vec<u8>,
    done: Sender<Result<()>>,
}

/// Owns the background threads of a TCP communicator: one listener, one
/// reader per inbound connection, and one serial sender.
pub struct TcpHost;

impl TcpHost {
    /// Bind this rank's address and start the transport threads. Peers are
    /// connected lazily, on the first message to each.
    pub fn start(rank: usize, peers: Vec<SocketAddr>) -> Result<TcpCommunicator> {
        let addr = *peers.get(rank).ok_or_else(|| {
            Error::Config(format!("rank {} has no address among {} peers", rank, peers.len()))
        })?;

        Self::start_bound(rank, TcpListener::bind(addr)?, peers)
    }

    /// Start a whole group on this machine, each rank listening on a loopback
    /// port picked by the operating system.
    pub fn group(size: usize) -> Result<Vec<TcpCommunicator>> {
        let listeners = (0..size)
            .map(|_| TcpListener::bind(loopback(0)))
            .collect::<io::Result<Vec<_>>>()?;
        let peers = listeners
            .iter()
            .map(TcpListener::local_addr)
            .collect::<io::Result<Vec<_>>>()?;

        listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| Self::start_bound(rank, listener, peers.clone()))
            .collect()
    }

    /// Loopback addresses for `size` ranks on consecutive ports from
    /// `base_port`.
    pub fn loopback_peers(base_port: u16, size: usize) -> Result<Vec<SocketAddr>> {
        (0..size)
            .map(|rank| {
                u16::try_from(rank)
                    .ok()
                    .and_then(|offset| base_port.checked_add(offset))
                    .map(loopback)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "{} ranks do not fit in the port range starting at {}",
                            size, base_port
                        ))
                    })
            })
            .collect()
    }

    fn start_bound(rank: usize, listener: TcpListener, peers: Vec<SocketAddr>) -> Result<TcpCommunicator> {
        let (inbound_sink, inbound_src) = crossbeam_channel::unbounded();
        Self::start_listener(listener, inbound_sink);

        let (outbound_sink, outbound_src) = crossbeam_channel::unbounded();
        let sender = Self::start_serial_sender(peers.clone(), outbound_src);

        Ok(TcpCommunicator {
            rank,
            num_peers: peers.len(),
            outbound: Some(outbound_sink),
            sender: Some(sender),
            mailbox: Mailbox::new(inbound_src),
        })
    }

    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        outbound: crossbeam_channel::Receiver<Outbound>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for Outbound { dest, frame, done } in outbound {
                let result = Self::deliver(&mut table, &peers, dest, &frame);
                if let Err(e) = &result {
                    error!("Failed to send message to rank {}: {}", dest, e);
                    table.remove(&dest);
                }
                // The poster may have stopped listening (e.g. an abort); nothing to do.
                let _ = done.send(result);
            }
            debug!("Outbound channel closed, sender shutting down");
        })
    }

    fn deliver(
        table: &mut HashMap<usize, TcpStream>,
        peers: &[SocketAddr],
        dest: usize,
        frame: &[u8],
    ) -> Result<()> {
        if !table.contains_key(&dest) {
            let addr = *peers
                .get(dest)
                .ok_or_else(|| Error::Transport(format!("no rank {} among {} peers", dest, peers.len())))?;
            table.insert(dest, Self::connect_with_retry(addr)?);
        }
        let client = table
            .get_mut(&dest)
            .ok_or_else(|| Error::Transport(format!("no connection to rank {}", dest)))?;

        util::write_frame(client, frame)?;
        let ack = util::read_u64(client)?;

        if ack != frame.len() as u64 {
            return Err(Error::Transport(format!(
                "Bytes read by receiver did not match bytes sent by this node. Sent {} bytes but receiver acked {} bytes",
                frame.len(),
                ack
            )));
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, inbound: Sender<Envelope>) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening to: {}", addr);
            }
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        Self::handle_connection(stream, inbound.clone());
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        })
    }

    fn handle_connection(mut stream: TcpStream, inbound: Sender<Envelope>) -> JoinHandle<()> {
        let remote = stream.peer_addr().ok();
        debug!("Receiving connection from {:?}", remote);

        thread::spawn(move || {
            let result = (|| -> Result<()> {
                stream.set_nodelay(true)?;
                while let Some(frame) = util::read_frame(&mut stream)? {
                    let envelope = Envelope::decode(&frame)?;
                    inbound
                        .send(envelope)
                        .map_err(|_| Error::Transport("inbound channel closed".to_string()))?;
                    util::write_u64(&mut stream, frame.len() as u64)?;
                }
                Ok(())
            })();

            match result {
                Ok(()) => debug!("Connection from {:?} closed", remote),
                Err(e) => warn!("Connection from {:?} failed: {}", remote, e),
            }
        })
    }

    fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream> {
        debug!("Connecting to {}...", addr);

        let stream = ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2)
            .take(CONNECT_ATTEMPTS)
            .retry(
                || TcpStream::connect(addr),
                |e, delay| {
                    debug!("Connect to {} failed ({}), retrying in {:?}", addr, e, delay);
                    thread::sleep(delay);
                },
            )
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "no connection attempts")))
            .map_err(|e| Error::Transport(format!("could not connect to {}: {}", addr, e)))?;

        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
}

/////////////////////////////////////////////////////
/////////////////////////////////////////////////////

/// A communicator over TCP. A send completes once the receiving rank's
/// transport has acknowledged the frame, whether or not a matching receive
/// has been posted there.
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    outbound: Option<Sender<Outbound>>,
    sender: Option<JoinHandle<()>>,
    mailbox: Mailbox,
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn post(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<Completion> {
        let frame = Envelope {
            source: self.rank,
            tag,
            payload,
        }
        .encode()?;

        let (done, completion) = crossbeam_channel::bounded(1);
        self.outbound
            .as_ref()
            .ok_or_else(|| Error::Transport("communicator is shut down".to_string()))?
            .send(Outbound { dest, frame, done })
            .map_err(|_| Error::Transport("sender thread has stopped".to_string()))?;

        Ok(Completion::Pending(completion))
    }

    fn take(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        self.mailbox.take(source, tag)
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        // Closing the outbound channel lets the sender flush what is queued
        // and exit. The listener stays up until the process exits.
        self.outbound.take();
        if let Some(sender) = self.sender.take() {
            if sender.join().is_err() {
                error!("[{}] sender thread panicked", self.rank);
            }
        }
    }
}




#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn message_to_self_is_acknowledged_and_received() {
        let group = TcpHost::group(1).unwrap();
        let comm = &group[0];
        comm.post(0, Tag::Halo, vec![9, 8, 7]).unwrap().wait().unwrap();
        assert_eq!(comm.take(0, Tag::Halo).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn group_ranks_reach_each_other() {
        let group = TcpHost::group(2).unwrap();
        group[0].post(1, Tag::Halo, vec![1]).unwrap().wait().unwrap();
        group[1].post(0, Tag::Halo, vec![2]).unwrap().wait().unwrap();
        assert_eq!(group[1].take(0, Tag::Halo).unwrap(), vec![1]);
        assert_eq!(group[0].take(1, Tag::Halo).unwrap(), vec![2]);
    }

    #[test]
    fn rank_without_address_is_a_configuration_error() {
        assert!(matches!(
            TcpHost::start(2, vec![loopback(0)]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn loopback_peers_use_consecutive_ports() {
        let peers = TcpHost::loopback_peers(7000, 3).unwrap();
        let ports: Vec<_> = peers.iter().map(SocketAddr::port).collect();
        assert_eq!(ports, vec![7000, 7001, 7002]);
        assert!(peers.iter().all(|p| p.ip().is_loopback()));
    }

    #[test]
    fn loopback_peers_past_the_last_port_are_rejected() {
        assert_eq!(TcpHost::loopback_peers(65534, 2).unwrap().len(), 2);
        assert!(matches!(TcpHost::loopback_peers(65534, 3), Err(Error::Config(_))));
        assert!(matches!(TcpHost::loopback_peers(1, 70_000), Err(Error::Config(_))));
    }
}
