//! Consensus RPC messages

use elex_core::{Category, NodeId};
use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::state_machine::KvStateMachine;

/// Vote solicitation from a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// Answer to a [`RequestVote`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// Log replication and heartbeat from the leader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

impl AppendEntries {
    /// Whether the request carries no entries
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Answer to an [`AppendEntries`]
///
/// `match_index` is the highest index known to be replicated on the
/// follower after a successful append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    pub match_index: u64,
}

/// Applied state shipped to a follower whose next entry was compacted
///
/// `state` covers every entry up to `last_included_index`. The follower
/// answers with an [`AppendEntriesResponse`] whose `match_index` is that
/// index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallSnapshot {
    pub term: u64,
    pub leader_id: NodeId,
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub state: KvStateMachine,
}

/// Every message exchanged between group members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsensusMessage {
    RequestVote(RequestVote),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntries),
    AppendEntriesResponse(AppendEntriesResponse),
    InstallSnapshot(InstallSnapshot),
}

impl ConsensusMessage {
    /// Term carried by the message
    pub fn term(&self) -> u64 {
        match self {
            ConsensusMessage::RequestVote(m) => m.term,
            ConsensusMessage::RequestVoteResponse(m) => m.term,
            ConsensusMessage::AppendEntries(m) => m.term,
            ConsensusMessage::AppendEntriesResponse(m) => m.term,
            ConsensusMessage::InstallSnapshot(m) => m.term,
        }
    }

    /// Short message name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::RequestVote(_) => "request_vote",
            ConsensusMessage::RequestVoteResponse(_) => "request_vote_response",
            ConsensusMessage::AppendEntries(_) => "append_entries",
            ConsensusMessage::AppendEntriesResponse(_) => "append_entries_response",
            ConsensusMessage::InstallSnapshot(_) => "install_snapshot",
        }
    }
}

/// A message tagged with its sender and the group it belongs to
///
/// One node may sit in several groups (one per category), so the receiving
/// side uses `category` to pick the group and `from` to address replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusEnvelope {
    pub category: Category,
    pub from: NodeId,
    pub message: ConsensusMessage,
}

/// Message addressed to one peer, produced by the sans-IO node
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: NodeId,
    pub message: ConsensusMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_tagging() {
        let message = ConsensusMessage::RequestVoteResponse(RequestVoteResponse {
            term: 3,
            vote_granted: true,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "request_vote_response");
        assert_eq!(json["term"], 3);
        assert_eq!(message.term(), 3);
        assert_eq!(message.kind(), "request_vote_response");

        let back: ConsensusMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }
}
