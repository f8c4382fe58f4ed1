use super::{Envelope, KvState, Log, Message, Node, NodeID, BROADCAST, POLL_INTERVAL};
use crate::error::Result;

use ::log::{debug, error, info};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Instant;

/// The maximum size of a datagram.
const MAX_DATAGRAM: usize = 65_535;

/// A replica server. It owns the UDP socket and drives the Raft node:
/// each loop iteration waits up to POLL_INTERVAL for one inbound datagram,
/// steps it into the node, runs the node's time-based maintenance, and
/// flushes any outbound messages to the simulator. The node is the only
/// state mutator and nothing here blocks beyond the bounded socket wait.
pub struct Server {
    id: NodeID,
    node: Node,
    node_rx: crossbeam::channel::Receiver<Envelope>,
    socket: UdpSocket,
    simulator: SocketAddr,
}

impl Server {
    /// Creates a new replica server, binding an ephemeral localhost port.
    /// All outbound datagrams go to the simulator at the given port, which
    /// routes them to their dst (fanning out the broadcast address).
    pub fn new(id: NodeID, peers: Vec<NodeID>, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let (node_tx, node_rx) = crossbeam::channel::unbounded();
        let node = Node::new(
            id.clone(),
            peers.into_iter().collect(),
            Log::new(),
            KvState::new(),
            node_tx,
            Instant::now(),
        )?;

        let simulator = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        Ok(Self { id, node, node_rx, socket, simulator })
    }

    /// Announces the replica to the cluster, then runs the event loop.
    /// Does not return in the steady state.
    pub fn serve(mut self) -> Result<()> {
        info!("Replica {} serving via simulator port {}", self.id, self.simulator.port());
        self.transmit(Envelope {
            src: self.id.clone(),
            dst: BROADCAST.into(),
            leader: BROADCAST.into(),
            message: Message::Hello,
        });

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            // Wait up to the poll interval for one inbound datagram.
            // Malformed or misrouted datagrams are dropped.
            match self.socket.recv(&mut buf) {
                Ok(len) => match serde_json::from_slice::<Envelope>(&buf[..len]) {
                    Ok(msg) if msg.dst == self.id || msg.dst == BROADCAST => {
                        self.node = self.node.step(msg, Instant::now())?;
                    }
                    Ok(msg) => debug!("Ignoring message for other replica {}", msg.dst),
                    Err(err) => debug!("Discarding undecodable datagram: {}", err),
                },
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(err) => return Err(err.into()),
            }

            // Time-based maintenance: leader sends, election deadlines,
            // and applying committed entries.
            self.node = self.node.tick(Instant::now())?;

            // Flush outbound messages.
            while let Ok(msg) = self.node_rx.try_recv() {
                self.transmit(msg);
            }
        }
    }

    /// Encodes and sends an envelope to the simulator. Sends are
    /// fire-and-forget: the protocol handles lost datagrams, so transient
    /// send failures are only logged.
    fn transmit(&self, msg: Envelope) {
        match serde_json::to_vec(&msg) {
            Ok(bytes) => {
                if let Err(err) = self.socket.send_to(&bytes, self.simulator) {
                    error!("Failed sending to simulator: {}", err);
                }
            }
            Err(err) => error!("Failed encoding {:?}: {}", msg, err),
        }
    }
}
