use super::*;
use crate::raft::Entry;

use ::log::info;

/// A follower replicates entries from a leader and votes in elections.
#[derive(Clone, Debug, PartialEq)]
pub struct Follower {
    /// The leader in the current term, if known.
    pub(super) leader: Option<NodeID>,
    /// The node we voted for in the current term, if any.
    pub(super) voted_for: Option<NodeID>,
    /// When to start an election, unless the leader is heard from first.
    pub(super) election_deadline: Instant,
}

impl Follower {
    /// Creates a new follower role.
    pub fn new(
        leader: Option<NodeID>,
        voted_for: Option<NodeID>,
        election_deadline: Instant,
    ) -> Self {
        Self { leader, voted_for, election_deadline }
    }
}

impl Role for Follower {
    fn leader_hint<'a>(&'a self, _id: &'a str) -> &'a str {
        self.leader.as_deref().unwrap_or(BROADCAST)
    }
}

impl RawNode<Follower> {
    /// Creates a new node as a leaderless follower in term 0.
    pub fn new(
        id: NodeID,
        peers: HashSet<NodeID>,
        log: Log,
        state: KvState,
        node_tx: crossbeam::channel::Sender<Envelope>,
        now: Instant,
    ) -> Self {
        let role = Follower::new(None, None, Self::rand_election_deadline(now));
        Self { id, peers, term: 0, log, state, node_tx, role }
    }

    /// Transitions into a follower state: either adopting a higher term as
    /// a leaderless follower (resetting our vote), or following a leader
    /// discovered in the current term. Resamples the election deadline.
    fn into_follower(
        mut self,
        leader: Option<NodeID>,
        term: Term,
        now: Instant,
    ) -> Result<RawNode<Follower>> {
        assert!(term >= self.term, "term regression {} → {}", self.term, term);

        if term > self.term {
            info!("Discovered new term {}", term);
            self.term = term;
            self.role = Follower::new(leader, None, Self::rand_election_deadline(now));
        } else if let Some(leader) = leader {
            info!("Discovered leader {} in term {}, following", leader, term);
            let voted_for = self.role.voted_for.clone();
            self.role = Follower::new(Some(leader), voted_for, Self::rand_election_deadline(now));
        }
        Ok(self)
    }

    /// Transitions the follower into a candidate and campaigns for
    /// leadership.
    pub(super) fn into_candidate(mut self, now: Instant) -> Result<RawNode<Candidate>> {
        // Apply any pending entries, so we're caught up if we win.
        self.maybe_apply()?;
        let mut node = self.into_role(Candidate::new(Self::rand_election_deadline(now)));
        node.campaign(now)?;
        Ok(node)
    }

    /// Processes a message.
    pub fn step(mut self, msg: Envelope, now: Instant) -> Result<Node> {
        match msg.message.term() {
            // Respond to stale RPCs with our current term.
            Some(term) if term < self.term => {
                self.reject_stale(&msg)?;
                return Ok(self.into());
            }
            // Adopt a higher term as a leaderless follower, then
            // reprocess the message in it.
            Some(term) if term > self.term => {
                return self.into_follower(None, term, now)?.step(msg, now);
            }
            _ => {}
        }

        match msg.message {
            // The leader replicates entries (or asserts leadership with an
            // empty heartbeat). Accepting or rejecting both count as
            // hearing from the leader, so the election deadline resets
            // either way.
            Message::Append { prev_index, prev_term, entries, leader_commit, .. } => {
                self.role.election_deadline = Self::rand_election_deadline(now);
                if self.role.leader.is_none() {
                    let term = self.term;
                    self = self.into_follower(Some(msg.src.clone()), term, now)?;
                }
                self.accept_entries(&msg.src, prev_index, prev_term, entries, leader_commit)?;
            }

            // A candidate requests our vote.
            Message::Campaign { last_index, last_term, .. } => {
                self.role.election_deadline = Self::rand_election_deadline(now);

                // One vote per term, and only for a candidate whose log is
                // at least as up to date as ours.
                let granted = match &self.role.voted_for {
                    Some(voted_for) if *voted_for != msg.src => false,
                    _ => {
                        let (our_index, our_term) = self.log.get_last_index();
                        last_term > our_term || (last_term == our_term && last_index >= our_index)
                    }
                };
                if granted {
                    info!("Voting for {} in term {} election", msg.src, self.term);
                    self.role.voted_for = Some(msg.src.clone());
                }
                self.send(&msg.src, Message::CampaignResponse { term: self.term, granted })?;
            }

            // Client requests are redirected to the leader hint carried in
            // the envelope.
            Message::Get { mid, .. } | Message::Put { mid, .. } => {
                self.send(&msg.src, Message::Redirect { mid })?;
            }

            // Vote and append responses may straggle in after a role
            // change, and hellos or client replies are not for us.
            Message::AppendResponse { .. }
            | Message::CampaignResponse { .. }
            | Message::Hello
            | Message::Ok { .. }
            | Message::Fail { .. }
            | Message::Redirect { .. } => debug!("Ignoring {:?}", msg),
        }
        Ok(self.into())
    }

    /// Processes a clock tick: applies newly committed entries, then
    /// starts an election if the deadline has passed.
    pub fn tick(mut self, now: Instant) -> Result<Node> {
        self.maybe_apply()?;
        if now >= self.role.election_deadline {
            return Ok(self.into_candidate(now)?.into());
        }
        Ok(self.into())
    }

    /// The AppendEntries acceptance procedure. A prev_index of -1 is the
    /// no-previous-entry sentinel used by heartbeats, which never touch
    /// the log; a prev_index of 0 with entries replicates from the start.
    ///
    /// The commit index only advances over entries known to match the
    /// leader's log: up to the end of the entries just spliced in (whose
    /// base was checked), or, for a bare heartbeat, only when the entry at
    /// the leader's commit index carries the leader's own term. Anything
    /// else could be a divergent leftover from a deposed leader, and
    /// applying it would fork the state machines. The acknowledged LI is
    /// that verified index, which the leader folds into match_index.
    fn accept_entries(
        &mut self,
        from: &str,
        prev_index: i64,
        prev_term: i64,
        entries: Vec<Entry>,
        leader_commit: Index,
    ) -> Result<()> {
        // Reject if our log does not contain the previous entry.
        if prev_index >= 1 && !self.log.has(prev_index as Index, prev_term as Term) {
            debug!("Rejecting entries at base {}", prev_index);
            return self.send(
                from,
                Message::AppendResponse { term: self.term, success: false, last_index: None },
            );
        }

        let match_index = if prev_index >= 0 {
            let count = entries.len() as Index;
            self.log.splice(prev_index as Index, entries);
            prev_index as Index + count
        } else {
            // A heartbeat: nothing spliced, so the only prefix we can
            // vouch for is one ending in an entry from the leader's term,
            // which the leader itself must have replicated to us. The
            // sender's term equals ours here.
            let candidate = leader_commit.min(self.log.get_last_index().0);
            if self.log.has(candidate, self.term) {
                candidate
            } else {
                self.log.get_commit_index()
            }
        };

        if leader_commit > self.log.get_commit_index() {
            let commit_index = leader_commit.min(match_index);
            if commit_index > self.log.get_commit_index() {
                self.log.commit(commit_index);
                self.maybe_apply()?;
            }
        }

        self.send(
            from,
            Message::AppendResponse {
                term: self.term,
                success: true,
                last_index: Some(match_index),
            },
        )
    }
}
