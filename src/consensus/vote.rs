//! Vote messages and tallying.

use std::collections::HashMap;

use itertools::Itertools;

use crate::error::{Error, Result};

/// A single vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionVote {
    Granted,
    Denied,
}

/// Request sent to each voter. `dest_uuid` is filled in per peer so a
/// misrouted response can be detected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteRequest {
    pub candidate_uuid: String,
    pub candidate_term: u64,
    pub tablet_id: String,
    pub dest_uuid: String,
    /// Latest log entry the candidate has; voters deny candidates whose
    /// log is behind their own.
    pub candidate_last_log: crate::types::OpId,
    /// A pre-election tests whether a real election would succeed without
    /// making any voter advance its term.
    pub is_pre_election: bool,
}

impl VoteRequest {
    pub fn new(
        candidate_uuid: impl Into<String>,
        candidate_term: u64,
        tablet_id: impl Into<String>,
    ) -> Self {
        Self {
            candidate_uuid: candidate_uuid.into(),
            candidate_term,
            tablet_id: tablet_id.into(),
            dest_uuid: String::new(),
            candidate_last_log: crate::types::OpId::new(0, 0),
            is_pre_election: false,
        }
    }

    pub fn last_logged(mut self, op_id: crate::types::OpId) -> Self {
        self.candidate_last_log = op_id;
        self
    }

    pub fn pre_election(mut self) -> Self {
        self.is_pre_election = true;
        self
    }
}

/// A voter's answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteResponse {
    pub responder_uuid: String,
    pub responder_term: u64,
    pub vote_granted: bool,
    /// Tablet-level error from the voter, e.g. the tablet is shutting
    /// down or not yet bootstrapped. Counts as a denial.
    pub error: Option<Error>,
}

impl VoteResponse {
    pub fn granted(responder_uuid: impl Into<String>, responder_term: u64) -> Self {
        Self {
            responder_uuid: responder_uuid.into(),
            responder_term,
            vote_granted: true,
            error: None,
        }
    }

    pub fn denied(responder_uuid: impl Into<String>, responder_term: u64) -> Self {
        Self {
            responder_uuid: responder_uuid.into(),
            responder_term,
            vote_granted: false,
            error: None,
        }
    }
}

/// Tallies votes for one election round and detects the decision.
#[derive(Debug)]
pub struct VoteCounter {
    num_voters: usize,
    majority_size: usize,
    votes: HashMap<String, ElectionVote>,
    yes_votes: usize,
    no_votes: usize,
}

impl VoteCounter {
    pub fn new(num_voters: usize, majority_size: usize) -> Result<Self> {
        if num_voters == 0 {
            return Err(Error::InvalidArgument(
                "vote counter needs at least one voter".to_string(),
            ));
        }
        if majority_size == 0 || majority_size > num_voters {
            return Err(Error::InvalidArgument(format!(
                "majority size {majority_size} out of range for {num_voters} voters"
            )));
        }
        Ok(Self {
            num_voters,
            majority_size,
            votes: HashMap::new(),
            yes_votes: 0,
            no_votes: 0,
        })
    }

    /// Record one vote. Returns `true` if this voter had already cast the
    /// same vote (a duplicate, which leaves the tally unchanged). A voter
    /// casting a *different* vote is a protocol violation.
    pub fn register_vote(&mut self, voter_uuid: &str, vote: ElectionVote) -> Result<bool> {
        if let Some(&prior) = self.votes.get(voter_uuid) {
            if prior != vote {
                return Err(Error::InvalidArgument(format!(
                    "peer {voter_uuid} voted a different way twice in the same election; \
                     first vote: {prior:?}, second vote: {vote:?}"
                )));
            }
            return Ok(true);
        }

        if self.yes_votes + self.no_votes == self.num_voters {
            return Err(Error::InvalidArgument(format!(
                "vote from peer {} would exceed the expected {} voters; votes already \
                 received from {{{}}}",
                voter_uuid,
                self.num_voters,
                self.votes.keys().sorted().join(", ")
            )));
        }

        self.votes.insert(voter_uuid.to_string(), vote);
        match vote {
            ElectionVote::Granted => self.yes_votes += 1,
            ElectionVote::Denied => self.no_votes += 1,
        }
        Ok(false)
    }

    /// Whether either outcome is already certain.
    pub fn is_decided(&self) -> bool {
        self.yes_votes >= self.majority_size
            || self.no_votes > self.num_voters - self.majority_size
    }

    /// The decision, or IllegalState if the tally is still open.
    pub fn get_decision(&self) -> Result<ElectionVote> {
        if self.yes_votes >= self.majority_size {
            return Ok(ElectionVote::Granted);
        }
        if self.no_votes > self.num_voters - self.majority_size {
            return Ok(ElectionVote::Denied);
        }
        Err(Error::IllegalState("vote not yet decided".to_string()))
    }

    pub fn total_votes_counted(&self) -> usize {
        self.yes_votes + self.no_votes
    }

    pub fn total_expected_votes(&self) -> usize {
        self.num_voters
    }

    pub fn are_all_votes_in(&self) -> bool {
        self.total_votes_counted() == self.num_voters
    }

    /// Human-readable tally for the decision log line.
    pub fn summary(&self) -> String {
        let mut yes_voters: Vec<&str> = Vec::new();
        let mut no_voters: Vec<&str> = Vec::new();
        for (uuid, vote) in self.votes.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            match vote {
                ElectionVote::Granted => yes_voters.push(uuid.as_str()),
                ElectionVote::Denied => no_voters.push(uuid.as_str()),
            }
        }
        format!(
            "received {} responses out of {} voters: {} yes votes; {} no votes. \
             yes voters: {}; no voters: {}",
            self.total_votes_counted(),
            self.num_voters,
            self.yes_votes,
            self.no_votes,
            yes_voters.join(", "),
            no_voters.join(", ")
        )
    }
}
