mod candidate;
mod follower;
mod leader;

use super::{
    Envelope, Index, KvState, Log, Message, BROADCAST, ELECTION_TIMEOUT_MS, HEARTBEAT_INTERVAL,
    NO_PREV_ENTRY,
};
use crate::error::Result;
pub use candidate::Candidate;
pub use follower::Follower;
pub use leader::Leader;

use ::log::{debug, error};
use rand::Rng as _;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A node ID: a short opaque string assigned by the simulator.
pub type NodeID = String;

/// A leader term: a monotonically increasing logical clock of leadership
/// epochs. Starts at 0 before any election.
pub type Term = u64;

/// A snapshot of a node's observable state, for logging and inspection.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    /// The node's current term.
    pub term: Term,
    /// The node's current leader hint, BROADCAST when unknown.
    pub leader: NodeID,
    /// The last log index.
    pub last_index: Index,
    /// The commit index.
    pub commit_index: Index,
    /// The applied index.
    pub applied_index: Index,
}

/// A Raft node, with a dynamic role. The node is driven synchronously by
/// processing inbound messages via step() or by advancing time via tick().
/// These methods consume the current node and return a new one with a
/// possibly different role, i.e. node = node.step(msg, now)?. Outbound
/// messages are sent via the given node_tx channel.
///
/// This enum wraps the RawNode<Role> types, which implement the actual
/// node logic. It exists for ergonomic use across role transitions.
pub enum Node {
    Candidate(RawNode<Candidate>),
    Follower(RawNode<Follower>),
    Leader(RawNode<Leader>),
}

impl Node {
    /// Creates a new Raft node, starting as a leaderless follower, or
    /// becoming leader immediately if there are no peers.
    pub fn new(
        id: NodeID,
        peers: HashSet<NodeID>,
        log: Log,
        state: KvState,
        node_tx: crossbeam::channel::Sender<Envelope>,
        now: Instant,
    ) -> Result<Self> {
        let node = RawNode::new(id, peers, log, state, node_tx, now);
        if node.peers.is_empty() {
            // If there are no peers, become leader immediately.
            return Ok(node.into_candidate(now)?.into_leader(now)?.into());
        }
        Ok(node.into())
    }

    /// Returns the node ID.
    pub fn id(&self) -> &str {
        match self {
            Node::Candidate(n) => &n.id,
            Node::Follower(n) => &n.id,
            Node::Leader(n) => &n.id,
        }
    }

    /// Returns the node term.
    pub fn term(&self) -> Term {
        match self {
            Node::Candidate(n) => n.term,
            Node::Follower(n) => n.term,
            Node::Leader(n) => n.term,
        }
    }

    /// Returns a status snapshot of the node.
    pub fn status(&self) -> Status {
        match self {
            Node::Candidate(n) => n.status(),
            Node::Follower(n) => n.status(),
            Node::Leader(n) => n.status(),
        }
    }

    /// Reads a key from the node's applied state map. Only the leader's
    /// map serves client reads; this is for inspection.
    pub fn read(&self, key: &str) -> &str {
        match self {
            Node::Candidate(n) => n.state.get(key),
            Node::Follower(n) => n.state.get(key),
            Node::Leader(n) => n.state.get(key),
        }
    }

    /// Processes an inbound message.
    pub fn step(self, msg: Envelope, now: Instant) -> Result<Self> {
        debug!("Stepping {:?}", msg);
        match self {
            Node::Candidate(n) => n.step(msg, now),
            Node::Follower(n) => n.step(msg, now),
            Node::Leader(n) => n.step(msg, now),
        }
    }

    /// Runs per-role maintenance: applies committed entries, sends leader
    /// AppendEntries that have come due, and checks election deadlines.
    pub fn tick(self, now: Instant) -> Result<Self> {
        match self {
            Node::Candidate(n) => n.tick(now),
            Node::Follower(n) => n.tick(now),
            Node::Leader(n) => n.tick(now),
        }
    }
}

impl From<RawNode<Candidate>> for Node {
    fn from(n: RawNode<Candidate>) -> Self {
        Node::Candidate(n)
    }
}

impl From<RawNode<Follower>> for Node {
    fn from(n: RawNode<Follower>) -> Self {
        Node::Follower(n)
    }
}

impl From<RawNode<Leader>> for Node {
    fn from(n: RawNode<Leader>) -> Self {
        Node::Leader(n)
    }
}

/// A Raft role: leader, follower, or candidate.
pub trait Role {
    /// The leader hint advertised in outbound envelopes, given our own ID.
    fn leader_hint<'a>(&'a self, id: &'a str) -> &'a str;
}

/// A Raft node with the concrete role R.
///
/// This implements the typestate pattern, where individual node states
/// (roles) are encoded as RawNode<Role>.
pub struct RawNode<R: Role = Follower> {
    pub(super) id: NodeID,
    pub(super) peers: HashSet<NodeID>,
    pub(super) term: Term,
    pub(super) log: Log,
    pub(super) state: KvState,
    pub(super) node_tx: crossbeam::channel::Sender<Envelope>,
    pub(super) role: R,
}

impl<R: Role> RawNode<R> {
    /// Helper for role transitions.
    fn into_role<T: Role>(self, role: T) -> RawNode<T> {
        RawNode {
            id: self.id,
            peers: self.peers,
            term: self.term,
            log: self.log,
            state: self.state,
            node_tx: self.node_tx,
            role,
        }
    }

    /// Returns the size of the cluster.
    fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Returns the cluster quorum size (strict majority).
    fn quorum_size(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Returns the quorum value of the given unsorted vector, in
    /// descending order. The vector must have the same size as the cluster.
    fn quorum_value<T: Ord + Copy>(&self, mut values: Vec<T>) -> T {
        assert_eq!(values.len(), self.cluster_size(), "values must match cluster size");
        let index = self.quorum_size() - 1;
        *values.select_nth_unstable_by(index, |a, b: &T| a.cmp(b).reverse()).1
    }

    /// Sends a message to the given recipient.
    fn send(&self, to: &str, message: Message) -> Result<()> {
        let msg = Envelope {
            src: self.id.clone(),
            dst: to.to_owned(),
            leader: self.role.leader_hint(&self.id).to_owned(),
            message,
        };
        debug!("Sending {:?}", msg);
        Ok(self.node_tx.send(msg)?)
    }

    /// Broadcasts a message to all peers via the transport's fan-out
    /// address.
    fn broadcast(&self, message: Message) -> Result<()> {
        self.send(BROADCAST, message)
    }

    /// Samples a new election deadline from the randomized timeout range.
    fn rand_election_deadline(now: Instant) -> Instant {
        now + Duration::from_millis(rand::thread_rng().gen_range(ELECTION_TIMEOUT_MS))
    }

    /// Handles a message from a past term: stale aerpc/rvrpc get a failure
    /// response carrying our term, everything else is dropped.
    fn reject_stale(&self, msg: &Envelope) -> Result<()> {
        match msg.message {
            Message::Append { .. } => self.send(
                &msg.src,
                Message::AppendResponse { term: self.term, success: false, last_index: None },
            ),
            Message::Campaign { .. } => self
                .send(&msg.src, Message::CampaignResponse { term: self.term, granted: false }),
            _ => {
                debug!("Dropping message from past term ({:?})", msg);
                Ok(())
            }
        }
    }

    /// Applies any committed but unapplied entries to the state map. A
    /// missing entry would be a bug; it is surfaced to the operator rather
    /// than crashing the replica.
    fn maybe_apply(&mut self) -> Result<()> {
        while self.log.get_commit_index() > self.state.get_applied_index() {
            let index = self.state.get_applied_index() + 1;
            let Some(entry) = self.log.get(index) else {
                error!("Committed entry {} missing from log, cannot apply", index);
                return Ok(());
            };
            debug!("Applying {:?}", entry);
            self.state.apply(index, &entry.clone());
        }
        Ok(())
    }

    /// Returns a status snapshot of the node.
    fn status(&self) -> Status {
        Status {
            term: self.term,
            leader: self.role.leader_hint(&self.id).to_owned(),
            last_index: self.log.get_last_index().0,
            commit_index: self.log.get_commit_index(),
            applied_index: self.state.get_applied_index(),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::raft::Entry;
    use pretty_assertions::assert_eq;

    /// Builds a test log entry. The key, value, and MID are derived from n.
    pub fn entry(term: Term, n: u8) -> Entry {
        Entry {
            key: format!("k{n}"),
            value: format!("v{n}"),
            term,
            mid: format!("m{n}"),
            client: "C1".into(),
        }
    }

    /// Drains the outbound channel and asserts its contents.
    #[track_caller]
    pub fn assert_messages(rx: &crossbeam::channel::Receiver<Envelope>, msgs: Vec<Envelope>) {
        let mut actual = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            actual.push(msg);
        }
        assert_eq!(msgs, actual);
    }

    pub struct NodeAsserter<'a> {
        node: &'a Node,
    }

    impl<'a> NodeAsserter<'a> {
        fn log(&self) -> &Log {
            match self.node {
                Node::Candidate(n) => &n.log,
                Node::Follower(n) => &n.log,
                Node::Leader(n) => &n.log,
            }
        }

        fn state(&self) -> &KvState {
            match self.node {
                Node::Candidate(n) => &n.state,
                Node::Follower(n) => &n.state,
                Node::Leader(n) => &n.state,
            }
        }

        #[track_caller]
        pub fn term(self, term: Term) -> Self {
            assert_eq!(term, self.node.term(), "Unexpected node term");
            self
        }

        #[track_caller]
        pub fn last(self, index: Index) -> Self {
            assert_eq!(index, self.log().get_last_index().0, "Unexpected last index");
            self
        }

        #[track_caller]
        pub fn committed(self, index: Index) -> Self {
            assert_eq!(index, self.log().get_commit_index(), "Unexpected commit index");
            self
        }

        #[track_caller]
        pub fn applied(self, index: Index) -> Self {
            assert_eq!(index, self.state().get_applied_index(), "Unexpected applied index");
            self
        }

        #[track_caller]
        pub fn entry(self, index: Index, entry: Entry) -> Self {
            assert_eq!(Some(&entry), self.log().get(index), "Unexpected entry");
            self
        }

        #[track_caller]
        pub fn read(self, key: &str, value: &str) -> Self {
            assert_eq!(value, self.state().get(key), "Unexpected value for {key}");
            self
        }

        #[allow(clippy::wrong_self_convention)]
        #[track_caller]
        pub fn is_follower(self) -> Self {
            match self.node {
                Node::Follower(_) => self,
                Node::Candidate(_) => panic!("Expected follower, got candidate"),
                Node::Leader(_) => panic!("Expected follower, got leader"),
            }
        }

        #[allow(clippy::wrong_self_convention)]
        #[track_caller]
        pub fn is_candidate(self) -> Self {
            match self.node {
                Node::Candidate(_) => self,
                Node::Follower(_) => panic!("Expected candidate, got follower"),
                Node::Leader(_) => panic!("Expected candidate, got leader"),
            }
        }

        #[allow(clippy::wrong_self_convention)]
        #[track_caller]
        pub fn is_leader(self) -> Self {
            match self.node {
                Node::Leader(_) => self,
                Node::Follower(_) => panic!("Expected leader, got follower"),
                Node::Candidate(_) => panic!("Expected leader, got candidate"),
            }
        }

        #[track_caller]
        pub fn leader(self, leader: Option<&str>) -> Self {
            assert_eq!(
                leader,
                match self.node {
                    Node::Candidate(_) => None,
                    Node::Follower(n) => n.role.leader.as_deref(),
                    Node::Leader(n) => Some(n.id.as_str()),
                },
                "Unexpected leader",
            );
            self
        }

        #[track_caller]
        pub fn voted_for(self, voted_for: Option<&str>) -> Self {
            assert_eq!(
                voted_for,
                match self.node {
                    Node::Candidate(n) => Some(n.id.as_str()),
                    Node::Follower(n) => n.role.voted_for.as_deref(),
                    Node::Leader(n) => Some(n.id.as_str()),
                },
                "Unexpected voted_for",
            );
            self
        }
    }

    pub fn assert_node(node: &Node) -> NodeAsserter {
        NodeAsserter { node }
    }

    fn setup_rolenode(
        now: Instant,
    ) -> (RawNode<Follower>, crossbeam::channel::Receiver<Envelope>) {
        let (node_tx, node_rx) = crossbeam::channel::unbounded();
        let node = RawNode {
            id: "A".into(),
            peers: HashSet::from(["B".into(), "C".into()]),
            term: 1,
            log: Log::new(),
            state: KvState::new(),
            node_tx,
            role: Follower::new(None, None, now + Duration::from_millis(750)),
        };
        (node, node_rx)
    }

    #[test]
    fn new() {
        let now = Instant::now();
        let (node_tx, _node_rx) = crossbeam::channel::unbounded();
        let node = Node::new(
            "A".into(),
            HashSet::from(["B".into(), "C".into()]),
            Log::new(),
            KvState::new(),
            node_tx,
            now,
        )
        .unwrap();
        match node {
            Node::Follower(node) => {
                assert_eq!(node.id, "A");
                assert_eq!(node.term, 0);
                assert_eq!(node.peers, HashSet::from(["B".into(), "C".into()]));
            }
            _ => panic!("Expected node to start as follower"),
        }
    }

    #[test]
    fn new_single_becomes_leader() {
        let now = Instant::now();
        let (node_tx, node_rx) = crossbeam::channel::unbounded();
        let node = Node::new(
            "A".into(),
            HashSet::new(),
            Log::new(),
            KvState::new(),
            node_tx,
            now,
        )
        .unwrap();
        match &node {
            Node::Leader(n) => {
                assert_eq!(n.id, "A");
                assert_eq!(n.term, 1);
                assert!(n.peers.is_empty());
            }
            _ => panic!("Expected leader"),
        }
        // It campaigns and asserts leadership on the broadcast address.
        assert_messages(
            &node_rx,
            vec![
                Envelope {
                    src: "A".into(),
                    dst: BROADCAST.into(),
                    leader: BROADCAST.into(),
                    message: Message::Campaign { term: 1, last_index: 0, last_term: 0 },
                },
                Envelope {
                    src: "A".into(),
                    dst: BROADCAST.into(),
                    leader: "A".into(),
                    message: Message::Append {
                        term: 1,
                        prev_index: NO_PREV_ENTRY,
                        prev_term: NO_PREV_ENTRY,
                        entries: Vec::new(),
                        leader_commit: 0,
                    },
                },
            ],
        );
    }

    #[test]
    fn into_role() {
        let now = Instant::now();
        let (node, _rx) = setup_rolenode(now);
        let node = node.into_role(Candidate::new(now + Duration::from_millis(750)));
        assert_eq!(node.id, "A");
        assert_eq!(node.term, 1);
        assert_eq!(node.peers, HashSet::from(["B".into(), "C".into()]));
    }

    #[test]
    fn send() {
        let now = Instant::now();
        let (node, rx) = setup_rolenode(now);
        node.send("B", Message::CampaignResponse { term: 1, granted: false }).unwrap();
        assert_messages(
            &rx,
            vec![Envelope {
                src: "A".into(),
                dst: "B".into(),
                leader: BROADCAST.into(),
                message: Message::CampaignResponse { term: 1, granted: false },
            }],
        );
    }

    #[test]
    fn quorum_size() {
        let now = Instant::now();
        let (mut node, _rx) = setup_rolenode(now);
        for (peers, quorum) in [(0, 1), (1, 2), (2, 2), (3, 3), (4, 3), (5, 4), (6, 4)] {
            node.peers = (0..peers).map(|i| format!("P{i}")).collect();
            assert_eq!(node.quorum_size(), quorum);
        }
    }

    #[test]
    fn quorum_value() {
        let now = Instant::now();
        let (mut node, _rx) = setup_rolenode(now);
        node.peers = (0..4).map(|i| format!("P{i}")).collect();
        assert_eq!(node.quorum_value(vec![5, 0, 0, 3, 5]), 3);
        assert_eq!(node.quorum_value(vec![1, 1, 1, 2, 2]), 1);
        assert_eq!(node.quorum_value(vec![1, 1, 2, 2, 2]), 2);
    }
}
