//! Voter-side vote request handling.
//!
//! Each replica answers vote requests with the classic rule: grant iff it
//! has not already voted for a different candidate in that term, its own
//! log is not ahead of the candidate's, and (for real elections) the
//! candidate's term is not behind its own. Granting a real election vote
//! advances the voter's term and records the choice durably for the term;
//! pre-election votes change nothing, which is the whole point of a
//! pre-election.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::consensus::election::{PeerProxy, PeerProxyFactory};
use crate::consensus::quorum::RaftPeer;
use crate::consensus::vote::{VoteRequest, VoteResponse};
use crate::error::{Error, Result};
use crate::types::OpId;

struct VoterInner {
    current_term: u64,
    /// Candidate this replica voted for in `current_term`, if any.
    voted_for: Option<String>,
    last_logged: OpId,
}

/// One replica's vote-granting state machine.
pub struct ReplicaVoter {
    uuid: String,
    tablet_id: String,
    inner: Mutex<VoterInner>,
}

impl ReplicaVoter {
    pub fn new(uuid: impl Into<String>, tablet_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.into(),
            tablet_id: tablet_id.into(),
            inner: Mutex::new(VoterInner {
                current_term: 0,
                voted_for: None,
                last_logged: OpId::new(0, 0),
            }),
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn current_term(&self) -> u64 {
        self.inner.lock().map(|i| i.current_term).unwrap_or(0)
    }

    /// Record the newest entry this replica has logged; used to refuse
    /// candidates with stale logs.
    pub fn set_last_logged(&self, op_id: OpId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.last_logged = op_id;
        Ok(())
    }

    /// Answer one vote request.
    pub fn handle_vote_request(&self, request: &VoteRequest) -> Result<VoteResponse> {
        if request.tablet_id != self.tablet_id {
            return Err(Error::InvalidArgument(format!(
                "vote request for tablet {} routed to voter of tablet {}",
                request.tablet_id, self.tablet_id
            )));
        }

        let mut inner = self.inner.lock()?;

        // A real election from a newer term advances ours and clears any
        // stale vote, before the grant decision is even made.
        if !request.is_pre_election && request.candidate_term > inner.current_term {
            inner.current_term = request.candidate_term;
            inner.voted_for = None;
        }

        let grant = self.decide(&inner, request);
        if grant && !request.is_pre_election {
            inner.voted_for = Some(request.candidate_uuid.clone());
        }

        tracing::debug!(
            voter = %self.uuid,
            candidate = %request.candidate_uuid,
            term = request.candidate_term,
            pre_election = request.is_pre_election,
            granted = grant,
            "processed vote request"
        );
        Ok(VoteResponse {
            responder_uuid: self.uuid.clone(),
            responder_term: inner.current_term,
            vote_granted: grant,
            error: None,
        })
    }

    fn decide(&self, inner: &VoterInner, request: &VoteRequest) -> bool {
        // Stale-term candidates are denied outright in a real election; a
        // pre-election compares terms without judging staleness the same
        // way, since the candidate will bump its term before running for
        // real.
        if !request.is_pre_election && request.candidate_term < inner.current_term {
            return false;
        }
        // One vote per term.
        if !request.is_pre_election {
            if let Some(voted_for) = &inner.voted_for {
                if *voted_for != request.candidate_uuid {
                    return false;
                }
            }
        }
        // Never elect a candidate whose log is behind ours.
        request.candidate_last_log >= inner.last_logged
    }
}

/// In-process loopback proxy: delivers vote requests straight to a
/// [`ReplicaVoter`]. Used by local multi-replica setups and tests; a
/// networked deployment supplies its own [`PeerProxy`] over RPC.
pub struct LocalPeerProxy {
    voter: Arc<ReplicaVoter>,
}

#[async_trait]
impl PeerProxy for LocalPeerProxy {
    async fn request_vote(&self, request: &VoteRequest) -> Result<VoteResponse> {
        self.voter.handle_vote_request(request)
    }

    fn peer_name(&self) -> String {
        format!("local:{}", self.voter.uuid())
    }
}

/// Builds [`LocalPeerProxy`]s for a set of in-process voters.
#[derive(Default)]
pub struct LocalPeerProxyFactory {
    voters: Vec<Arc<ReplicaVoter>>,
}

impl LocalPeerProxyFactory {
    pub fn new(voters: Vec<Arc<ReplicaVoter>>) -> Self {
        Self { voters }
    }
}

impl PeerProxyFactory for LocalPeerProxyFactory {
    fn new_proxy(&self, peer: &RaftPeer) -> Result<Arc<dyn PeerProxy>> {
        let voter = self
            .voters
            .iter()
            .find(|v| v.uuid() == peer.uuid)
            .ok_or_else(|| Error::NotFound(format!("no local voter with uuid {}", peer.uuid)))?;
        Ok(Arc::new(LocalPeerProxy {
            voter: voter.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::election::LeaderElection;
    use crate::consensus::quorum::RaftConfig;
    use crate::consensus::vote::{ElectionVote, VoteCounter};
    use std::sync::mpsc;
    use std::time::Duration;

    fn request(candidate: &str, term: u64) -> VoteRequest {
        VoteRequest::new(candidate, term, "tablet-1")
    }

    #[test]
    fn test_grants_first_candidate_in_term() {
        let voter = ReplicaVoter::new("b", "tablet-1");
        let response = voter.handle_vote_request(&request("a", 1)).unwrap();
        assert!(response.vote_granted);
        assert_eq!(response.responder_term, 1);
        assert_eq!(voter.current_term(), 1);
    }

    #[test]
    fn test_denies_second_candidate_in_same_term() {
        let voter = ReplicaVoter::new("c", "tablet-1");
        assert!(voter.handle_vote_request(&request("a", 1)).unwrap().vote_granted);
        // Same candidate asking again is re-granted (vote is sticky)...
        assert!(voter.handle_vote_request(&request("a", 1)).unwrap().vote_granted);
        // ...but a different candidate in the same term is refused.
        assert!(!voter.handle_vote_request(&request("b", 1)).unwrap().vote_granted);
    }

    #[test]
    fn test_denies_stale_term_and_reports_own() {
        let voter = ReplicaVoter::new("b", "tablet-1");
        voter.handle_vote_request(&request("a", 5)).unwrap();

        let response = voter.handle_vote_request(&request("c", 3)).unwrap();
        assert!(!response.vote_granted);
        assert_eq!(response.responder_term, 5);
    }

    #[test]
    fn test_denies_candidate_with_stale_log() {
        let voter = ReplicaVoter::new("b", "tablet-1");
        voter.set_last_logged(OpId::new(2, 30)).unwrap();

        let behind = request("a", 3).last_logged(OpId::new(2, 10));
        assert!(!voter.handle_vote_request(&behind).unwrap().vote_granted);

        let caught_up = request("a", 4).last_logged(OpId::new(2, 30));
        assert!(voter.handle_vote_request(&caught_up).unwrap().vote_granted);
    }

    #[test]
    fn test_pre_election_does_not_advance_term_or_bind_vote() {
        let voter = ReplicaVoter::new("b", "tablet-1");
        let pre = request("a", 7).pre_election();
        assert!(voter.handle_vote_request(&pre).unwrap().vote_granted);
        assert_eq!(voter.current_term(), 0);

        // The pre-election grant did not consume the term's real vote.
        assert!(voter.handle_vote_request(&request("c", 7)).unwrap().vote_granted);
    }

    #[test]
    fn test_wrong_tablet_rejected() {
        let voter = ReplicaVoter::new("b", "tablet-1");
        let request = VoteRequest::new("a", 1, "tablet-9");
        assert!(matches!(
            voter.handle_vote_request(&request),
            Err(Error::InvalidArgument(_))
        ));
    }

    fn three_node_config() -> RaftConfig {
        RaftConfig::new(vec![
            RaftPeer::voter("a", "a.local"),
            RaftPeer::voter("b", "b.local"),
            RaftPeer::voter("c", "c.local"),
        ])
        .expect("config failed")
    }

    fn run_election(
        candidate: &str,
        term: u64,
        factory: Arc<LocalPeerProxyFactory>,
    ) -> crate::consensus::election::ElectionResult {
        let mut counter = VoteCounter::new(3, 2).expect("counter failed");
        counter
            .register_vote(candidate, ElectionVote::Granted)
            .unwrap();
        let (tx, rx) = mpsc::channel();
        let election = LeaderElection::new(
            three_node_config(),
            factory,
            request(candidate, term),
            counter,
            Duration::from_secs(5),
            Box::new(move |result| {
                tx.send(result).expect("result receiver dropped");
            }),
        );
        election.run().expect("run failed");
        rx.recv_timeout(Duration::from_secs(5))
            .expect("election never decided")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_election_through_local_proxies() {
        let voters = vec![
            ReplicaVoter::new("b", "tablet-1"),
            ReplicaVoter::new("c", "tablet-1"),
        ];
        let factory = Arc::new(LocalPeerProxyFactory::new(voters.clone()));

        // Candidate A wins a fresh term.
        let result = run_election("a", 1, factory.clone());
        assert_eq!(result.decision, ElectionVote::Granted);

        // Candidate C cannot win the same term: voter B is bound to A and
        // voter A has no local endpoint to answer through.
        let result = run_election("c", 1, factory.clone());
        assert_eq!(result.decision, ElectionVote::Denied);
        assert_eq!(result.highest_voter_term, 1);

        // A newer term is up for grabs again.
        let result = run_election("c", 2, factory);
        assert_eq!(result.decision, ElectionVote::Granted);
        assert_eq!(voters[0].current_term(), 2);
    }
}
