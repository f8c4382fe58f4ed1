use super::*;

use ::log::info;

/// A candidate is campaigning to become leader.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// Votes received, including our own.
    pub(super) votes: HashSet<NodeID>,
    /// When to give up on this election and start a new one.
    pub(super) election_deadline: Instant,
}

impl Candidate {
    /// Creates a new candidate role.
    pub fn new(election_deadline: Instant) -> Self {
        Self { votes: HashSet::new(), election_deadline }
    }
}

impl Role for Candidate {
    fn leader_hint<'a>(&'a self, _id: &'a str) -> &'a str {
        BROADCAST
    }
}

impl RawNode<Candidate> {
    /// Campaigns for leadership in a new term: bump the term, vote for
    /// ourself, and solicit votes from all peers.
    pub(super) fn campaign(&mut self, now: Instant) -> Result<()> {
        let term = self.term + 1;
        info!("Starting election for term {}", term);
        self.term = term;
        self.role = Candidate::new(Self::rand_election_deadline(now));
        self.role.votes.insert(self.id.clone());

        let (last_index, last_term) = self.log.get_last_index();
        self.broadcast(Message::Campaign { term, last_index, last_term })
    }

    /// Steps down into a follower: either we discovered a higher term, or
    /// we lost the election to a leader in our own term.
    fn into_follower(
        mut self,
        term: Term,
        leader: Option<NodeID>,
        now: Instant,
    ) -> Result<RawNode<Follower>> {
        assert!(term >= self.term, "term regression {} → {}", self.term, term);

        let election_deadline = Self::rand_election_deadline(now);
        if term > self.term {
            info!("Discovered new term {}", term);
            self.term = term;
            Ok(self.into_role(Follower::new(leader, None, election_deadline)))
        } else {
            // We lost the election; we already voted for ourself this term.
            let voted_for = Some(self.id.clone());
            Ok(self.into_role(Follower::new(leader, voted_for, election_deadline)))
        }
    }

    /// Becomes leader after winning the election, initializing replication
    /// progress and asserting leadership with an immediate empty
    /// AppendEntries rather than waiting for the next send interval.
    pub(super) fn into_leader(self, now: Instant) -> Result<RawNode<Leader>> {
        info!("Won election for term {}, becoming leader", self.term);
        let (last_index, _) = self.log.get_last_index();
        let role = Leader::new(&self.peers, last_index, now);
        let mut node = self.into_role(role);
        node.heartbeat()?;
        node.maybe_commit_and_apply()?;
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
                return self.into_follower(term, None, now)?.step(msg, now);
            }
            _ => {}
        }

        match msg.message {
            // A leader won the election in our term. Follow it and let the
            // follower process the entries.
            Message::Append { .. } => {
                let term = self.term;
                return self.into_follower(term, Some(msg.src.clone()), now)?.step(msg, now);
            }

            // Don't vote for competing candidates; we voted for ourself.
            Message::Campaign { .. } => {
                self.send(&msg.src, Message::CampaignResponse { term: self.term, granted: false })?;
            }

            // Tally granted votes, and assume leadership at quorum.
            Message::CampaignResponse { granted: true, .. } => {
                self.role.votes.insert(msg.src.clone());
                if self.role.votes.len() >= self.quorum_size() {
                    return Ok(self.into_leader(now)?.into());
                }
            }

            // We didn't get this vote.
            Message::CampaignResponse { granted: false, .. } => {}

            // No leader is known during an election; clients must retry.
            Message::Get { mid, .. } | Message::Put { mid, .. } => {
                self.send(&msg.src, Message::Redirect { mid })?;
            }

            Message::AppendResponse { .. }
            | Message::Hello
            | Message::Ok { .. }
            | Message::Fail { .. }
            | Message::Redirect { .. } => debug!("Ignoring {:?}", msg),
        }
        Ok(self.into())
    }

    /// Processes a clock tick: applies newly committed entries, and starts
    /// a fresh election if this one has timed out (e.g. a split vote).
    pub fn tick(mut self, now: Instant) -> Result<Node> {
        self.maybe_apply()?;
        if now >= self.role.election_deadline {
            self.campaign(now)?;
        }
        Ok(self.into())
    }
}
