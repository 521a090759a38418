//! Sans-IO Raft node
//!
//! [`RaftNode`] holds one member's consensus state and reacts to events
//! (election timeout, heartbeat tick, inbound RPC, proposal) by mutating
//! itself and returning the messages it wants sent. It never sleeps, spawns
//! or touches a transport; [`ConsensusGroup`](crate::ConsensusGroup) drives
//! it with timers and delivers its output.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use elex_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, ConsensusResult};
use crate::log::ConsensusLog;
use crate::messages::{
    AppendEntries, AppendEntriesResponse, ConsensusMessage, InstallSnapshot, Outbound,
    RequestVote, RequestVoteResponse,
};
use crate::state_machine::KvStateMachine;

/// Upper bound on entries shipped in one `AppendEntries`
pub const MAX_ENTRIES_PER_APPEND: usize = 128;

/// Role of a node within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Output of one transition
#[derive(Debug, Default)]
pub struct Step {
    /// Messages to hand to the transport
    pub outbound: Vec<Outbound>,
    /// The election timer must be cancelled and rescheduled
    pub reset_election_timer: bool,
}

impl Step {
    fn send(&mut self, to: NodeId, message: ConsensusMessage) {
        self.outbound.push(Outbound { to, message });
    }
}

/// Counters describing a node's consensus activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusStats {
    pub elections_started: u64,
    pub elections_won: u64,
    pub terms_seen: u64,
    pub entries_appended: u64,
    pub entries_committed: u64,
    pub rejected_appends: u64,
    pub step_downs: u64,
    pub compactions: u64,
    pub snapshots_installed: u64,
}

/// Durable consensus state, persisted and restored as one unit
///
/// `state` is the applied key/value state; it covers at least the log's
/// compacted prefix, and committed entries after it are re-applied on
/// restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub log: ConsensusLog,
    pub commit_index: u64,
    #[serde(default)]
    pub state: KvStateMachine,
}

#[derive(Debug, Clone, Copy)]
struct PeerProgress {
    next_index: u64,
    match_index: u64,
}

/// One member of a Raft group
#[derive(Debug)]
pub struct RaftNode {
    id: NodeId,
    config: ConsensusConfig,
    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    log: ConsensusLog,
    commit_index: u64,
    leader: Option<NodeId>,
    machine: KvStateMachine,
    votes: HashSet<NodeId>,
    progress: HashMap<NodeId, PeerProgress>,
    stats: ConsensusStats,
    dirty: bool,
}

impl RaftNode {
    /// Create a follower at term 0 with an empty log
    pub fn new(id: NodeId, config: ConsensusConfig) -> Self {
        Self {
            id,
            config,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            log: ConsensusLog::new(),
            commit_index: 0,
            leader: None,
            machine: KvStateMachine::new(),
            votes: HashSet::new(),
            progress: HashMap::new(),
            stats: ConsensusStats::default(),
            dirty: false,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    /// Leader this node currently recognises
    pub fn leader(&self) -> Option<&NodeId> {
        self.leader.as_ref()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.machine.last_applied()
    }

    pub fn log(&self) -> &ConsensusLog {
        &self.log
    }

    pub fn state_machine(&self) -> &KvStateMachine {
        &self.machine
    }

    pub fn stats(&self) -> &ConsensusStats {
        &self.stats
    }

    /// Committed value of `key` as seen by this node
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.machine.get(key)
    }

    /// Return and clear the "durable state changed" flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Election timer fired: start a new election
    pub fn on_election_timeout(&mut self) -> Step {
        let mut step = Step::default();
        if self.role == Role::Leader {
            return step;
        }

        self.set_term(self.current_term + 1);
        self.role = Role::Candidate;
        self.voted_for = Some(self.id.clone());
        self.leader = None;
        self.votes.clear();
        self.votes.insert(self.id.clone());
        self.stats.elections_started = self.stats.elections_started.saturating_add(1);
        step.reset_election_timer = true;

        info!(node = %self.id, term = self.current_term, "Starting election");

        if self.votes.len() >= self.config.quorum() {
            self.become_leader(&mut step);
            return step;
        }

        let request = RequestVote {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in &self.config.peers {
            step.send(peer.clone(), ConsensusMessage::RequestVote(request.clone()));
        }
        step
    }

    /// Heartbeat timer fired: replicate to every follower
    pub fn heartbeat(&mut self) -> Step {
        let mut step = Step::default();
        if self.role == Role::Leader {
            self.broadcast_append(&mut step);
        }
        step
    }

    /// Dispatch an inbound RPC from `from`
    ///
    /// Messages from nodes outside the configured peer set are ignored.
    pub fn handle_message(&mut self, from: &NodeId, message: ConsensusMessage) -> Step {
        if !self.config.peers.contains(from) {
            debug!(node = %self.id, from = %from, kind = message.kind(), "Ignoring message from non-member");
            return Step::default();
        }

        match message {
            ConsensusMessage::RequestVote(request) => {
                let (response, mut step) = self.handle_request_vote(request);
                step.send(from.clone(), ConsensusMessage::RequestVoteResponse(response));
                step
            }
            ConsensusMessage::RequestVoteResponse(response) => {
                self.handle_vote_response(from, response)
            }
            ConsensusMessage::AppendEntries(request) => {
                let (response, mut step) = self.handle_append_entries(request);
                step.send(from.clone(), ConsensusMessage::AppendEntriesResponse(response));
                step
            }
            ConsensusMessage::AppendEntriesResponse(response) => {
                self.handle_append_response(from, response)
            }
            ConsensusMessage::InstallSnapshot(request) => {
                let (response, mut step) = self.handle_install_snapshot(request);
                step.send(from.clone(), ConsensusMessage::AppendEntriesResponse(response));
                step
            }
        }
    }

    /// Decide whether to grant a vote
    pub fn handle_request_vote(&mut self, request: RequestVote) -> (RequestVoteResponse, Step) {
        let mut step = Step::default();

        if request.term > self.current_term {
            self.become_follower(request.term, None);
        }

        let can_vote = self
            .voted_for
            .as_ref()
            .is_none_or(|voted| voted == &request.candidate_id);
        let up_to_date = self
            .log
            .is_at_least_as_up_to_date(request.last_log_index, request.last_log_term);
        let granted = request.term == self.current_term && can_vote && up_to_date;

        if granted {
            if self.voted_for.is_none() {
                self.voted_for = Some(request.candidate_id.clone());
                self.dirty = true;
            }
            step.reset_election_timer = true;
            debug!(node = %self.id, candidate = %request.candidate_id, term = self.current_term, "Vote granted");
        } else {
            debug!(
                node = %self.id,
                candidate = %request.candidate_id,
                term = request.term,
                current_term = self.current_term,
                up_to_date,
                "Vote refused"
            );
        }

        (
            RequestVoteResponse {
                term: self.current_term,
                vote_granted: granted,
            },
            step,
        )
    }

    /// Count a vote and take leadership on majority
    pub fn handle_vote_response(&mut self, from: &NodeId, response: RequestVoteResponse) -> Step {
        let mut step = Step::default();

        if response.term > self.current_term {
            self.become_follower(response.term, None);
            return step;
        }
        if self.role != Role::Candidate
            || response.term != self.current_term
            || !response.vote_granted
        {
            return step;
        }

        self.votes.insert(from.clone());
        if self.votes.len() >= self.config.quorum() {
            self.become_leader(&mut step);
        }
        step
    }

    /// Apply leader entries after the consistency check
    pub fn handle_append_entries(
        &mut self,
        request: AppendEntries,
    ) -> (AppendEntriesResponse, Step) {
        let mut step = Step::default();

        if request.term < self.current_term {
            self.stats.rejected_appends = self.stats.rejected_appends.saturating_add(1);
            debug!(
                node = %self.id,
                leader = %request.leader_id,
                term = request.term,
                current_term = self.current_term,
                "Rejecting stale AppendEntries"
            );
            return (self.append_response(false, 0), step);
        }

        if request.term > self.current_term || self.role != Role::Follower {
            if self.role == Role::Leader && request.term == self.current_term {
                warn!(node = %self.id, other = %request.leader_id, term = request.term, "Second leader observed in term");
            }
            self.become_follower(request.term, Some(request.leader_id.clone()));
        } else {
            self.leader = Some(request.leader_id.clone());
        }
        step.reset_election_timer = true;

        if !self.log.matches(request.prev_log_index, request.prev_log_term) {
            self.stats.rejected_appends = self.stats.rejected_appends.saturating_add(1);
            debug!(
                node = %self.id,
                prev_log_index = request.prev_log_index,
                prev_log_term = request.prev_log_term,
                last_index = self.log.last_index(),
                "Log inconsistency on AppendEntries"
            );
            return (self.append_response(false, 0), step);
        }

        let covered = request.prev_log_index + request.entries.len() as u64;
        if !request.entries.is_empty() {
            let before = self.log.last_index();
            self.log.append_from(request.prev_log_index, request.entries);
            self.dirty = true;
            if self.log.last_index() > before {
                self.stats.entries_appended = self
                    .stats
                    .entries_appended
                    .saturating_add(self.log.last_index() - before);
            }
        }

        let new_commit = request.leader_commit.min(covered);
        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.dirty = true;
            self.apply_committed();
        }

        (self.append_response(true, covered), step)
    }

    /// Replace the compacted prefix and applied state with the leader's
    ///
    /// Answered like an append: success with `match_index` at the snapshot
    /// point, so the leader resumes sending entries after it.
    pub fn handle_install_snapshot(
        &mut self,
        request: InstallSnapshot,
    ) -> (AppendEntriesResponse, Step) {
        let mut step = Step::default();

        if request.term < self.current_term {
            self.stats.rejected_appends = self.stats.rejected_appends.saturating_add(1);
            return (self.append_response(false, 0), step);
        }
        if request.term > self.current_term || self.role != Role::Follower {
            self.become_follower(request.term, Some(request.leader_id.clone()));
        } else {
            self.leader = Some(request.leader_id.clone());
        }
        step.reset_election_timer = true;

        let index = request.last_included_index;
        if request.state.last_applied() != index {
            warn!(
                node = %self.id,
                leader = %request.leader_id,
                index,
                applied = request.state.last_applied(),
                "Snapshot state does not match its index"
            );
            return (self.append_response(false, 0), step);
        }

        // Everything up to our commit index is already applied here
        if index > self.commit_index {
            self.log.install_snapshot(index, request.last_included_term);
            self.machine = request.state;
            self.commit_index = index;
            self.dirty = true;
            self.stats.snapshots_installed = self.stats.snapshots_installed.saturating_add(1);
            info!(
                node = %self.id,
                leader = %request.leader_id,
                index,
                term = request.last_included_term,
                "Snapshot installed"
            );
        }

        (self.append_response(true, index), step)
    }

    /// Track follower progress and advance the commit index
    pub fn handle_append_response(
        &mut self,
        from: &NodeId,
        response: AppendEntriesResponse,
    ) -> Step {
        let mut step = Step::default();

        if response.term > self.current_term {
            self.become_follower(response.term, None);
            return step;
        }
        if self.role != Role::Leader || response.term != self.current_term {
            return step;
        }

        let last_index = self.log.last_index();
        let Some(progress) = self.progress.get_mut(from) else {
            return step;
        };

        let resend = if response.success {
            progress.match_index = progress.match_index.max(response.match_index);
            progress.next_index = progress.match_index + 1;
            progress.next_index <= last_index
        } else {
            progress.next_index = progress
                .next_index
                .saturating_sub(1)
                .max(progress.match_index + 1)
                .max(1);
            true
        };

        if response.success {
            self.advance_commit();
        }
        if resend {
            let message = self.append_for(from);
            step.send(from.clone(), message);
        }
        step
    }

    /// Append a command as leader; returns its log index
    ///
    /// With no peers the entry commits and applies before this returns.
    pub fn propose(&mut self, command: Command, now: DateTime<Utc>) -> ConsensusResult<u64> {
        if self.role != Role::Leader {
            return Err(ConsensusError::NotLeader {
                leader: self.leader.clone(),
            });
        }
        command.validate()?;

        let index = self.log.append(self.current_term, command, now);
        self.dirty = true;
        self.stats.entries_appended = self.stats.entries_appended.saturating_add(1);
        debug!(node = %self.id, index, term = self.current_term, "Entry appended");

        self.advance_commit();
        Ok(index)
    }

    /// Durable state as a snapshot
    pub fn snapshot(&self) -> ConsensusSnapshot {
        ConsensusSnapshot {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
            log: self.log.clone(),
            commit_index: self.commit_index,
            state: self.machine.clone(),
        }
    }

    /// Replace all state with `snapshot`, re-applying committed entries
    ///
    /// The node comes back as a follower with no known leader.
    pub fn restore(&mut self, snapshot: ConsensusSnapshot) -> ConsensusResult<()> {
        if !snapshot.log.is_well_formed() {
            return Err(ConsensusError::InvalidSnapshot(
                "log indices are not sequential or terms decrease".to_string(),
            ));
        }
        if snapshot.commit_index > snapshot.log.last_index() {
            return Err(ConsensusError::InvalidSnapshot(format!(
                "commit index {} beyond last log index {}",
                snapshot.commit_index,
                snapshot.log.last_index()
            )));
        }
        let applied = snapshot.state.last_applied();
        if applied > snapshot.commit_index {
            return Err(ConsensusError::InvalidSnapshot(format!(
                "last applied {} beyond commit index {}",
                applied, snapshot.commit_index
            )));
        }
        if applied < snapshot.log.snapshot_index() {
            return Err(ConsensusError::InvalidSnapshot(format!(
                "state applied up to {} but log compacted up to {}",
                applied,
                snapshot.log.snapshot_index()
            )));
        }
        if snapshot.log.last_term() > snapshot.current_term {
            return Err(ConsensusError::InvalidSnapshot(format!(
                "log term {} ahead of current term {}",
                snapshot.log.last_term(),
                snapshot.current_term
            )));
        }

        self.current_term = snapshot.current_term;
        self.voted_for = snapshot.voted_for;
        self.log = snapshot.log;
        self.commit_index = snapshot.commit_index;
        self.role = Role::Follower;
        self.leader = None;
        self.votes.clear();
        self.progress.clear();
        self.machine = snapshot.state;
        self.apply_committed();
        self.dirty = false;

        info!(
            node = %self.id,
            term = self.current_term,
            commit_index = self.commit_index,
            entries = self.log.len(),
            "Consensus state restored"
        );
        Ok(())
    }

    fn set_term(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.stats.terms_seen = self.stats.terms_seen.saturating_add(1);
            self.dirty = true;
        }
    }

    fn become_follower(&mut self, term: u64, leader: Option<NodeId>) {
        if term > self.current_term {
            self.set_term(term);
            self.voted_for = None;
        }
        if self.role != Role::Follower {
            if self.role == Role::Leader {
                self.stats.step_downs = self.stats.step_downs.saturating_add(1);
            }
            info!(node = %self.id, from = %self.role, term = self.current_term, "Stepping down to follower");
        }
        self.role = Role::Follower;
        self.votes.clear();
        self.progress.clear();
        self.leader = leader;
    }

    fn become_leader(&mut self, step: &mut Step) {
        self.role = Role::Leader;
        self.leader = Some(self.id.clone());
        self.votes.clear();
        self.stats.elections_won = self.stats.elections_won.saturating_add(1);

        let next_index = self.log.last_index() + 1;
        self.progress = self
            .config
            .peers
            .iter()
            .map(|peer| {
                (
                    peer.clone(),
                    PeerProgress {
                        next_index,
                        match_index: 0,
                    },
                )
            })
            .collect();

        info!(node = %self.id, term = self.current_term, "Became leader");

        self.broadcast_append(step);
        self.advance_commit();
    }

    fn broadcast_append(&self, step: &mut Step) {
        for peer in &self.config.peers {
            step.send(peer.clone(), self.append_for(peer));
        }
    }

    fn append_for(&self, peer: &NodeId) -> ConsensusMessage {
        let next_index = self
            .progress
            .get(peer)
            .map_or(self.log.last_index() + 1, |progress| progress.next_index)
            .max(1);

        if next_index <= self.log.snapshot_index() {
            let last_included_index = self.machine.last_applied();
            debug!(node = %self.id, peer = %peer, next_index, last_included_index, "Sending snapshot");
            return ConsensusMessage::InstallSnapshot(InstallSnapshot {
                term: self.current_term,
                leader_id: self.id.clone(),
                last_included_index,
                last_included_term: self.log.term_at(last_included_index).unwrap_or(0),
                state: self.machine.clone(),
            });
        }

        let prev_log_index = next_index - 1;

        ConsensusMessage::AppendEntries(AppendEntries {
            term: self.current_term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term: self.log.term_at(prev_log_index).unwrap_or(0),
            entries: self.log.entries_from(next_index, MAX_ENTRIES_PER_APPEND),
            leader_commit: self.commit_index,
        })
    }

    fn append_response(&self, success: bool, match_index: u64) -> AppendEntriesResponse {
        AppendEntriesResponse {
            term: self.current_term,
            success,
            match_index,
        }
    }

    /// Commit the highest current-term index replicated on a majority
    fn advance_commit(&mut self) {
        if self.role != Role::Leader {
            return;
        }
        let quorum = self.config.quorum();
        let mut candidate = self.log.last_index();

        while candidate > self.commit_index {
            // Terms never decrease along the log, so older-term entries only
            // commit indirectly once a current-term entry above them does
            if self.log.term_at(candidate) != Some(self.current_term) {
                break;
            }
            let replicated = 1 + self
                .progress
                .values()
                .filter(|progress| progress.match_index >= candidate)
                .count();
            if replicated >= quorum {
                self.commit_index = candidate;
                self.dirty = true;
                debug!(node = %self.id, commit_index = candidate, "Commit index advanced");
                self.apply_committed();
                break;
            }
            candidate -= 1;
        }
    }

    fn apply_committed(&mut self) {
        while self.machine.last_applied() < self.commit_index {
            let next = self.machine.last_applied() + 1;
            let Some(entry) = self.log.get(next) else {
                warn!(node = %self.id, index = next, "Committed entry missing from log");
                break;
            };
            self.machine.apply(entry);
            self.stats.entries_committed = self.stats.entries_committed.saturating_add(1);
        }
        self.compact_applied();
    }

    /// Drop applied entries once the log outgrows `max_log_entries`
    fn compact_applied(&mut self) {
        if self.log.len() <= self.config.max_log_entries {
            return;
        }
        let upto = self.machine.last_applied();
        let dropped = self.log.compact(upto);
        if dropped > 0 {
            self.dirty = true;
            self.stats.compactions = self.stats.compactions.saturating_add(1);
            debug!(node = %self.id, upto, dropped, retained = self.log.len(), "Log compacted");
        }
    }
}
