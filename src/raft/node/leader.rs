use super::*;
use crate::raft::Entry;

use ::log::info;
use itertools::Itertools as _;
use std::collections::HashMap;

/// Replication progress of a single peer.
#[derive(Clone, Debug)]
pub(super) struct Progress {
    /// The next log index to send.
    pub(super) next_index: Index,
    /// The highest log index known to be replicated.
    pub(super) match_index: Index,
    /// When the last AppendEntries was sent.
    pub(super) last_sent: Instant,
}

impl Progress {
    /// Attempts to advance the peer's match index, returning true if it
    /// did. Responses may arrive out of order, so the indexes never
    /// regress, and next_index never drops below match_index + 1.
    fn advance(&mut self, match_index: Index) -> bool {
        if match_index <= self.match_index {
            return false;
        }
        self.match_index = match_index;
        self.next_index = self.next_index.max(match_index + 1);
        true
    }

    /// Backs next_index off by one after a rejection, bounded below by 1
    /// and by the known match index.
    fn back_off(&mut self) {
        let floor = (self.match_index + 1).max(1);
        if self.next_index > floor {
            self.next_index -= 1;
        }
    }

    /// Regresses next_index to the given index when an acknowledgment
    /// shows the peer is further behind than assumed (e.g. it restarted
    /// with an empty log and heartbeats alone can't catch it up). Bounded
    /// below by match_index + 1; stale acknowledgments are ignored.
    fn regress_next(&mut self, next_index: Index) {
        if next_index < self.next_index && next_index > self.match_index {
            self.next_index = next_index;
        }
    }
}

/// A leader serves client requests and replicates its log to followers.
#[derive(Clone, Debug)]
pub struct Leader {
    /// Per-peer replication progress.
    pub(super) progress: HashMap<NodeID, Progress>,
}

impl Leader {
    /// Creates a new leader role. next_index starts just past our last
    /// entry; match_index is unknown until the peer responds.
    pub fn new(peers: &HashSet<NodeID>, last_index: Index, now: Instant) -> Self {
        let progress = peers
            .iter()
            .cloned()
            .map(|p| {
                (p, Progress { next_index: last_index + 1, match_index: 0, last_sent: now })
            })
            .collect();
        Self { progress }
    }
}

impl Role for Leader {
    fn leader_hint<'a>(&'a self, id: &'a str) -> &'a str {
        id
    }
}

impl RawNode<Leader> {
    /// Steps down after discovering a higher term. Writes that are not yet
    /// applied may be overwritten by the new leader, so their clients get
    /// an explicit failure now instead of being left hanging.
    fn into_follower(mut self, term: Term, now: Instant) -> Result<RawNode<Follower>> {
        assert!(term > self.term, "can only step down in a later term");
        info!("Discovered new term {}, stepping down", term);

        let (last_index, _) = self.log.get_last_index();
        for index in self.state.get_applied_index() + 1..=last_index {
            if let Some(entry) = self.log.get(index) {
                self.send(&entry.client, Message::Fail { mid: entry.mid.clone() })?;
            }
        }

        self.term = term;
        let election_deadline = Self::rand_election_deadline(now);
        Ok(self.into_role(Follower::new(None, None, election_deadline)))
    }

    /// Processes a message.
    pub fn step(mut self, msg: Envelope, now: Instant) -> Result<Node> {
        match msg.message.term() {
            // Respond to stale RPCs with our current term.
            Some(term) if term < self.term => {
                self.reject_stale(&msg)?;
                return Ok(self.into());
            }
            // Step down on any higher term, then reprocess the message.
            Some(term) if term > self.term => {
                return self.into_follower(term, now)?.step(msg, now);
            }
            _ => {}
        }

        match msg.message {
            // A client write. Append it to our log; the ok is sent to the
            // client once the entry is applied.
            Message::Put { mid, key, value } => {
                let entry =
                    Entry { key, value, term: self.term, mid, client: msg.src.clone() };
                self.log.append(entry);
                if self.peers.is_empty() {
                    self.maybe_commit_and_apply()?;
                }
            }

            // A client read, served directly from the applied map. A
            // missing key reads as the empty string.
            Message::Get { mid, key } => {
                let value = self.state.get(&key).to_owned();
                self.send(&msg.src, Message::Ok { mid, value: Some(value) })?;
            }

            // A peer acknowledged entries up to last_index. Record its
            // progress and attempt to commit.
            Message::AppendResponse { success: true, last_index: Some(last_index), .. } => {
                // A peer can only usefully match entries we have.
                let last_index = last_index.min(self.log.get_last_index().0);
                if let Some(progress) = self.role.progress.get_mut(&msg.src) {
                    let advanced = progress.advance(last_index);
                    progress.regress_next(last_index + 1);
                    if advanced {
                        self.maybe_commit_and_apply()?;
                    }
                }
            }

            // A peer rejected our entries because its log diverges. Back
            // off its next index by one and probe again immediately.
            Message::AppendResponse { success: false, .. } => {
                if let Some(progress) = self.role.progress.get_mut(&msg.src) {
                    progress.back_off();
                    self.send_append(&msg.src, now)?;
                }
            }

            Message::AppendResponse { .. } => {
                debug!("Ignoring malformed append response {:?}", msg)
            }

            // There can't be two leaders in our term; don't grant votes.
            Message::Campaign { .. } => {
                self.send(&msg.src, Message::CampaignResponse { term: self.term, granted: false })?;
            }

            // Straggling votes from the election we already won.
            Message::CampaignResponse { .. } => {}

            // Another leader in our term would violate election safety.
            Message::Append { .. } => {
                error!("Saw AppendEntries from {} in our term {}", msg.src, self.term)
            }

            Message::Hello | Message::Ok { .. } | Message::Fail { .. } | Message::Redirect { .. } => {
                debug!("Ignoring {:?}", msg)
            }
        }
        Ok(self.into())
    }

    /// Processes a clock tick: commits and applies what it can, then sends
    /// AppendEntries to every peer whose send interval has elapsed.
    pub fn tick(mut self, now: Instant) -> Result<Node> {
        self.maybe_commit_and_apply()?;

        let due: Vec<NodeID> = self
            .role
            .progress
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_sent) >= HEARTBEAT_INTERVAL)
            .map(|(peer, _)| peer.clone())
            .sorted()
            .collect();
        for peer in due {
            self.send_append(&peer, now)?;
        }
        Ok(self.into())
    }

    /// Broadcasts an empty AppendEntries to assert leadership.
    pub(super) fn heartbeat(&mut self) -> Result<()> {
        self.broadcast(Message::Append {
            term: self.term,
            prev_index: NO_PREV_ENTRY,
            prev_term: NO_PREV_ENTRY,
            entries: Vec::new(),
            leader_commit: self.log.get_commit_index(),
        })
    }

    /// Sends an AppendEntries to the given peer: pending entries from its
    /// next index if we have any, otherwise an empty heartbeat with the
    /// no-previous-entry sentinel.
    fn send_append(&mut self, peer: &str, now: Instant) -> Result<()> {
        let Some(progress) = self.role.progress.get(peer) else {
            debug!("No progress for sender {}, ignoring", peer);
            return Ok(());
        };
        let (last_index, _) = self.log.get_last_index();
        let message = if last_index >= progress.next_index {
            let prev_index = progress.next_index as i64 - 1;
            let prev_term = self
                .log
                .get(prev_index as Index)
                .map(|e| e.term as i64)
                .unwrap_or(NO_PREV_ENTRY);
            Message::Append {
                term: self.term,
                prev_index,
                prev_term,
                entries: self.log.entries_from(progress.next_index),
                leader_commit: self.log.get_commit_index(),
            }
        } else {
            Message::Append {
                term: self.term,
                prev_index: NO_PREV_ENTRY,
                prev_term: NO_PREV_ENTRY,
                entries: Vec::new(),
                leader_commit: self.log.get_commit_index(),
            }
        };
        self.send(peer, message)?;
        if let Some(progress) = self.role.progress.get_mut(peer) {
            progress.last_sent = now;
        }
        Ok(())
    }

    /// Commits any entries replicated to a quorum, applies them, and
    /// acknowledges the originating clients. We can only safely commit an
    /// entry from our own term by counting replicas (see figure 8 in the
    /// Raft paper).
    pub(super) fn maybe_commit_and_apply(&mut self) -> Result<()> {
        let (last_index, _) = self.log.get_last_index();
        let quorum_index = self.quorum_value(
            self.role
                .progress
                .values()
                .map(|p| p.match_index)
                .chain(std::iter::once(last_index))
                .collect(),
        );

        if quorum_index > self.log.get_commit_index() {
            match self.log.get(quorum_index) {
                Some(entry) if entry.term == self.term => {
                    self.log.commit(quorum_index);
                }
                Some(_) => {}
                None => error!("Quorum index {} missing from log", quorum_index),
            }
        }

        while self.log.get_commit_index() > self.state.get_applied_index() {
            let index = self.state.get_applied_index() + 1;
            let Some(entry) = self.log.get(index) else {
                error!("Committed entry {} missing from log, cannot apply", index);
                break;
            };
            let entry = entry.clone();
            debug!("Applying {:?}", entry);
            self.state.apply(index, &entry);
            self.send(&entry.client, Message::Ok { mid: entry.mid, value: None })?;
        }
        Ok(())
    }
}
