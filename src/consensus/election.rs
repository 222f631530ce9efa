//! One round of leader election.
//!
//! A `LeaderElection` object drives exactly one vote round: it builds an
//! RPC proxy per voter, fires the vote requests concurrently, funnels
//! every response through a mutex-guarded state machine, and invokes the
//! decision callback exactly once, as soon as the outcome is certain.
//! That may be before any RPC completes (single-node configs) or before
//! all responses arrive (majority reached, or a voter revealed a higher
//! term).
//!
//! The callback is always invoked outside the lock. Each in-flight RPC
//! task holds a shared handle to the election, so the object stays alive
//! until the last response has been processed even if the caller dropped
//! its own handle at decision time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::consensus::quorum::{RaftConfig, RaftPeer};
use crate::consensus::vote::{ElectionVote, VoteCounter, VoteRequest, VoteResponse};
use crate::error::{Error, Result};

/// Asynchronous vote RPC stub for one peer.
#[async_trait]
pub trait PeerProxy: Send + Sync {
    async fn request_vote(&self, request: &VoteRequest) -> Result<VoteResponse>;

    /// Human-readable peer identity for logs.
    fn peer_name(&self) -> String;
}

/// Builds per-peer proxies. Construction may fail (e.g. the peer address
/// does not resolve); the election records such failures as denied votes.
pub trait PeerProxyFactory: Send + Sync {
    fn new_proxy(&self, peer: &RaftPeer) -> Result<Arc<dyn PeerProxy>>;
}

/// Outcome of one election round.
#[derive(Clone, Debug)]
pub struct ElectionResult {
    pub vote_request: VoteRequest,
    pub decision: ElectionVote,
    /// Highest term reported by any voter. When this exceeds the
    /// candidate's term the caller must step up its own term before
    /// trying again.
    pub highest_voter_term: u64,
    pub message: String,
    pub start_time: Instant,
}

/// Invoked exactly once with the final result.
pub type DecisionCallback = Box<dyn FnOnce(ElectionResult) + Send + 'static>;

struct VoterState {
    peer_uuid: String,
    proxy: Option<Arc<dyn PeerProxy>>,
    proxy_error: Option<Error>,
}

impl VoterState {
    fn peer_info(&self) -> String {
        match &self.proxy {
            Some(proxy) => format!("{} ({})", self.peer_uuid, proxy.peer_name()),
            None => self.peer_uuid.clone(),
        }
    }
}

struct ElectionState {
    vote_counter: VoteCounter,
    voter_state: HashMap<String, VoterState>,
    result: Option<ElectionResult>,
    has_responded: bool,
    highest_voter_term: u64,
}

pub struct LeaderElection {
    config: RaftConfig,
    proxy_factory: Arc<dyn PeerProxyFactory>,
    request: VoteRequest,
    timeout: Duration,
    start_time: Instant,
    state: Mutex<ElectionState>,
    decision_callback: Mutex<Option<DecisionCallback>>,
}

impl LeaderElection {
    /// The counter must be pre-seeded with the candidate's self-vote.
    pub fn new(
        config: RaftConfig,
        proxy_factory: Arc<dyn PeerProxyFactory>,
        request: VoteRequest,
        vote_counter: VoteCounter,
        timeout: Duration,
        decision_callback: DecisionCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            proxy_factory,
            request,
            timeout,
            start_time: Instant::now(),
            state: Mutex::new(ElectionState {
                vote_counter,
                voter_state: HashMap::new(),
                result: None,
                has_responded: false,
                highest_voter_term: 0,
            }),
            decision_callback: Mutex::new(Some(decision_callback)),
        })
    }

    fn election_term(&self) -> u64 {
        self.request.candidate_term
    }

    fn log_prefix(&self) -> String {
        format!(
            "T {} P {} [CANDIDATE]: Term {} {}election",
            self.request.tablet_id,
            self.request.candidate_uuid,
            self.request.candidate_term,
            if self.request.is_pre_election {
                "pre-"
            } else {
                ""
            }
        )
    }

    /// Run the round. Must be called from within a tokio runtime; vote
    /// RPCs are spawned as tasks that keep the election alive through a
    /// shared handle.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        tracing::debug!("{}: running leader election", self.log_prefix());

        // Build the per-voter proxies and check the voter arithmetic under
        // the lock, before any RPC is in flight.
        let other_voter_uuids = {
            let mut state = self.state.lock()?;
            let mut other_voter_uuids = Vec::new();
            for peer in self.config.peers() {
                if peer.uuid == self.request.candidate_uuid {
                    debug_assert!(
                        peer.is_voter(),
                        "non-voter {} tried to start an election",
                        peer.uuid
                    );
                    continue;
                }
                if !peer.is_voter() {
                    continue;
                }
                other_voter_uuids.push(peer.uuid.clone());

                let (proxy, proxy_error) = match self.proxy_factory.new_proxy(peer) {
                    Ok(proxy) => (Some(proxy), None),
                    Err(e) => (None, Some(e)),
                };
                state.voter_state.insert(
                    peer.uuid.clone(),
                    VoterState {
                        peer_uuid: peer.uuid.clone(),
                        proxy,
                        proxy_error,
                    },
                );
            }

            // The candidate votes for itself before the election starts.
            // On either precondition failure no RPC is in flight and no
            // decision will ever be delivered, so mark the election as
            // responded: the caller handles the returned error, and drop
            // must not treat it as a missed callback.
            if state.vote_counter.total_votes_counted() != 1 {
                state.has_responded = true;
                return Err(Error::IllegalState(format!(
                    "{}: candidate must vote for itself first; counted {}",
                    self.log_prefix(),
                    state.vote_counter.total_votes_counted()
                )));
            }
            // Existing votes plus future votes must add up to the total.
            if state.vote_counter.total_votes_counted() + other_voter_uuids.len()
                != state.vote_counter.total_expected_votes()
            {
                state.has_responded = true;
                return Err(Error::IllegalState(format!(
                    "{}: expected {} voters but found {} other voters; voter uuids: [{}]",
                    self.log_prefix(),
                    state.vote_counter.total_expected_votes(),
                    other_voter_uuids.len(),
                    other_voter_uuids.join(", ")
                )));
            }
            other_voter_uuids
        };

        // A single-node config has already won on its self-vote.
        self.check_for_decision();

        for voter_uuid in other_voter_uuids {
            let (proxy, proxy_error, peer_info) = {
                let state = self.state.lock()?;
                let voter = state
                    .voter_state
                    .get(&voter_uuid)
                    .expect("voter vanished from state");
                (voter.proxy.clone(), voter.proxy_error.clone(), voter.peer_info())
            };

            // A proxy we could not construct counts as a denial carrying
            // the construction error.
            if let Some(err) = proxy_error {
                tracing::warn!(
                    "{}: unable to construct an RPC proxy to peer {peer_info}: {err}; \
                     counting it as a 'no' vote",
                    self.log_prefix()
                );
                {
                    let mut state = self.state.lock()?;
                    self.record_vote(&mut state, &voter_uuid, ElectionVote::Denied);
                }
                self.check_for_decision();
                continue;
            }

            let proxy = proxy.expect("proxy present when no construction error");
            let mut request = self.request.clone();
            request.dest_uuid = voter_uuid.clone();
            let election = Arc::clone(self);
            let timeout = self.timeout;
            tokio::spawn(async move {
                let response = match tokio::time::timeout(timeout, proxy.request_vote(&request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::TimedOut(format!(
                        "vote request to {} timed out after {:?}",
                        request.dest_uuid, timeout
                    ))),
                };
                election.vote_response_callback(&request.dest_uuid, response);
            });
        }
        tracing::info!(
            "{}: requested votes from {} peers",
            self.log_prefix(),
            self.config.voter_count() - 1
        );
        Ok(())
    }

    /// Process one voter's response (or transport failure).
    fn vote_response_callback(&self, voter_uuid: &str, response: Result<VoteResponse>) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let Some(voter) = state.voter_state.get(voter_uuid) else {
                tracing::warn!(
                    "{}: response from unknown voter {voter_uuid}; ignoring",
                    self.log_prefix()
                );
                return;
            };
            let peer_info = voter.peer_info();

            match response {
                Err(e) => {
                    tracing::warn!(
                        "{}: RPC error from vote request to peer {peer_info}: {e}",
                        self.log_prefix()
                    );
                    self.record_vote(&mut state, voter_uuid, ElectionVote::Denied);
                }
                Ok(response) if response.error.is_some() => {
                    tracing::warn!(
                        "{}: tablet error from vote request to peer {peer_info}: {}",
                        self.log_prefix(),
                        response.error.as_ref().expect("checked above")
                    );
                    self.record_vote(&mut state, voter_uuid, ElectionVote::Denied);
                }
                // A peer whose identity changed means the config no longer
                // reflects reality; the vote cannot be trusted.
                Ok(response) if response.responder_uuid != voter_uuid => {
                    tracing::warn!(
                        "{}: peer uuid mismatch from vote request: expected {voter_uuid}, \
                         actual {}",
                        self.log_prefix(),
                        response.responder_uuid
                    );
                    self.record_vote(&mut state, voter_uuid, ElectionVote::Denied);
                }
                Ok(response) => {
                    state.highest_voter_term =
                        state.highest_voter_term.max(response.responder_term);
                    if response.vote_granted {
                        tracing::debug!(
                            "{}: vote granted by peer {peer_info}",
                            self.log_prefix()
                        );
                        self.record_vote(&mut state, voter_uuid, ElectionVote::Granted);
                    } else {
                        self.handle_vote_denied(&mut state, voter_uuid, &peer_info, &response);
                    }
                }
            }
        }
        // Decide outside the response lock scope.
        self.check_for_decision();
    }

    fn handle_vote_denied(
        &self,
        state: &mut ElectionState,
        voter_uuid: &str,
        peer_info: &str,
        response: &VoteResponse,
    ) {
        // A denial from a peer with a greater term cancels the election
        // outright, unless the decision already fired.
        if response.responder_term > self.election_term() {
            let msg = format!(
                "vote denied by peer {peer_info} with higher term {}",
                response.responder_term
            );
            tracing::info!("{}: {msg}; cancelling election", self.log_prefix());
            if state.result.is_none() {
                state.result = Some(ElectionResult {
                    vote_request: self.request.clone(),
                    decision: ElectionVote::Denied,
                    highest_voter_term: response.responder_term,
                    message: msg,
                    start_time: self.start_time,
                });
            }
            self.record_vote(state, voter_uuid, ElectionVote::Denied);
            return;
        }

        tracing::debug!("{}: vote denied by peer {peer_info}", self.log_prefix());
        self.record_vote(state, voter_uuid, ElectionVote::Denied);
    }

    fn record_vote(&self, state: &mut ElectionState, voter_uuid: &str, vote: ElectionVote) {
        match state.vote_counter.register_vote(voter_uuid, vote) {
            Ok(false) => {}
            Ok(true) => {
                tracing::warn!(
                    "{}: duplicate vote received from peer {voter_uuid}",
                    self.log_prefix()
                );
            }
            Err(e) => {
                tracing::warn!(
                    "{}: error registering vote for peer {voter_uuid}: {e}",
                    self.log_prefix()
                );
            }
        }
    }

    /// If the outcome just became certain, build the result and fire the
    /// callback. The callback runs outside the lock, and only once.
    fn check_for_decision(&self) {
        let to_respond = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.result.is_none() && state.vote_counter.is_decided() {
                let decision = state
                    .vote_counter
                    .get_decision()
                    .expect("decided counter must yield a decision");
                let won = decision == ElectionVote::Granted;
                tracing::info!(
                    "{}: election decided, candidate {}; {}",
                    self.log_prefix(),
                    if won { "won" } else { "lost" },
                    state.vote_counter.summary()
                );
                state.result = Some(ElectionResult {
                    vote_request: self.request.clone(),
                    decision,
                    highest_voter_term: state.highest_voter_term,
                    message: if won {
                        "achieved majority votes".to_string()
                    } else {
                        "could not achieve majority".to_string()
                    },
                    start_time: self.start_time,
                });
            }
            // Respond either on a fresh majority decision or on a
            // higher-term cancellation that populated the result directly.
            if state.result.is_some() && !state.has_responded {
                state.has_responded = true;
                state.result.clone()
            } else {
                None
            }
        };

        if let Some(result) = to_respond {
            let callback = self
                .decision_callback
                .lock()
                .ok()
                .and_then(|mut cb| cb.take());
            if let Some(callback) = callback {
                callback(result);
            }
        }
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The decision callback must fire exactly once per election.
        assert!(
            state.has_responded,
            "election for term {} dropped without reaching a decision",
            self.request.candidate_term
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::quorum::MemberRole;
    use std::sync::mpsc;

    struct StaticProxy {
        name: String,
        response: Result<VoteResponse>,
    }

    #[async_trait]
    impl PeerProxy for StaticProxy {
        async fn request_vote(&self, _request: &VoteRequest) -> Result<VoteResponse> {
            self.response.clone()
        }

        fn peer_name(&self) -> String {
            self.name.clone()
        }
    }

    /// Factory with a canned response (or construction failure) per peer.
    #[derive(Default)]
    struct TestProxyFactory {
        responses: HashMap<String, Result<VoteResponse>>,
        broken_peers: Vec<String>,
    }

    impl TestProxyFactory {
        fn respond(mut self, uuid: &str, response: Result<VoteResponse>) -> Self {
            self.responses.insert(uuid.to_string(), response);
            self
        }

        fn broken(mut self, uuid: &str) -> Self {
            self.broken_peers.push(uuid.to_string());
            self
        }
    }

    impl PeerProxyFactory for TestProxyFactory {
        fn new_proxy(&self, peer: &RaftPeer) -> Result<Arc<dyn PeerProxy>> {
            if self.broken_peers.contains(&peer.uuid) {
                return Err(Error::Io(format!("cannot resolve {}", peer.addr)));
            }
            let response = self
                .responses
                .get(&peer.uuid)
                .cloned()
                .unwrap_or_else(|| Ok(VoteResponse::denied(peer.uuid.clone(), 1)));
            Ok(Arc::new(StaticProxy {
                name: peer.addr.clone(),
                response,
            }))
        }
    }

    fn config(uuids: &[&str]) -> RaftConfig {
        RaftConfig::new(
            uuids
                .iter()
                .map(|u| RaftPeer::voter(*u, format!("{u}.example:7050")))
                .collect(),
        )
        .expect("config failed")
    }

    fn self_voted_counter(num_voters: usize) -> VoteCounter {
        let mut counter = VoteCounter::new(num_voters, num_voters / 2 + 1).expect("counter");
        counter.register_vote("a", ElectionVote::Granted).unwrap();
        counter
    }

    fn election_with(
        config: RaftConfig,
        factory: TestProxyFactory,
        request: VoteRequest,
    ) -> (Arc<LeaderElection>, mpsc::Receiver<ElectionResult>) {
        let num_voters = config.voter_count();
        let (tx, rx) = mpsc::channel();
        let election = LeaderElection::new(
            config,
            Arc::new(factory),
            request,
            self_voted_counter(num_voters),
            Duration::from_secs(5),
            Box::new(move |result| {
                tx.send(result).expect("result receiver dropped");
            }),
        );
        (election, rx)
    }

    fn await_result(rx: &mpsc::Receiver<ElectionResult>) -> ElectionResult {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("election never decided")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_node_election_wins_before_any_rpc() {
        let (election, rx) =
            election_with(config(&["a"]), TestProxyFactory::default(), VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");

        // The decision is available synchronously: no RPC was needed.
        let result = rx.try_recv().expect("decision must fire during run()");
        assert_eq!(result.decision, ElectionVote::Granted);
        assert_eq!(result.message, "achieved majority votes");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_three_node_election_all_grant() {
        let factory = TestProxyFactory::default()
            .respond("b", Ok(VoteResponse::granted("b", 1)))
            .respond("c", Ok(VoteResponse::granted("c", 1)));
        let (election, rx) =
            election_with(config(&["a", "b", "c"]), factory, VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");

        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Granted);
        assert_eq!(result.highest_voter_term, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_higher_term_cancels_election() {
        // B reports term 2 against our term 1; C's vote cannot save the
        // election no matter what it answers.
        let factory = TestProxyFactory::default()
            .respond("b", Ok(VoteResponse::denied("b", 2)))
            .respond("c", Err(Error::Io("connection refused".to_string())));
        let (election, rx) =
            election_with(config(&["a", "b", "c"]), factory, VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");

        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Denied);
        assert_eq!(result.highest_voter_term, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duplicate_response_leaves_tally_unchanged() {
        let factory = TestProxyFactory::default()
            .respond("b", Ok(VoteResponse::granted("b", 1)))
            .respond("c", Ok(VoteResponse::granted("c", 1)));
        let (election, rx) =
            election_with(config(&["a", "b", "c"]), factory, VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");
        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Granted);

        // A second, identical response from B is tolerated and changes
        // nothing; in particular the callback must not fire again.
        election.vote_response_callback("b", Ok(VoteResponse::granted("b", 1)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_proxy_construction_failure_counts_as_denial() {
        // B's proxy cannot be built; C grants, so the election still wins
        // 2-1.
        let factory = TestProxyFactory::default()
            .broken("b")
            .respond("c", Ok(VoteResponse::granted("c", 1)));
        let (election, rx) =
            election_with(config(&["a", "b", "c"]), factory, VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");

        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Granted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_proxies_broken_loses_election() {
        let factory = TestProxyFactory::default().broken("b").broken("c");
        let (election, rx) =
            election_with(config(&["a", "b", "c"]), factory, VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");

        // Both denials are recorded synchronously in run(), so the loss is
        // decided without any RPC.
        let result = rx.try_recv().expect("decision must fire during run()");
        assert_eq!(result.decision, ElectionVote::Denied);
        assert_eq!(result.message, "could not achieve majority");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_responder_uuid_mismatch_counts_as_denial() {
        // B answers with a different identity than the config expects.
        let factory = TestProxyFactory::default()
            .respond("b", Ok(VoteResponse::granted("zombie", 1)))
            .respond("c", Ok(VoteResponse::denied("c", 1)));
        let (election, rx) =
            election_with(config(&["a", "b", "c"]), factory, VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");

        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Denied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tablet_error_counts_as_denial() {
        let error_response = VoteResponse {
            responder_uuid: "b".to_string(),
            responder_term: 1,
            vote_granted: false,
            error: Some(Error::ServiceUnavailable("tablet shutting down".to_string())),
        };
        let factory = TestProxyFactory::default()
            .respond("b", Ok(error_response))
            .respond("c", Ok(VoteResponse::denied("c", 1)));
        let (election, rx) =
            election_with(config(&["a", "b", "c"]), factory, VoteRequest::new("a", 1, "tablet-1"));
        election.run().expect("run failed");

        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Denied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pre_election_round() {
        let factory = TestProxyFactory::default()
            .respond("b", Ok(VoteResponse::granted("b", 1)))
            .respond("c", Ok(VoteResponse::granted("c", 1)));
        let request = VoteRequest::new("a", 2, "tablet-1").pre_election();
        let (election, rx) = election_with(config(&["a", "b", "c"]), factory, request);
        election.run().expect("run failed");

        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Granted);
        assert!(result.vote_request.is_pre_election);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_learners_do_not_receive_vote_rpcs() {
        // Config has a learner; only voters a (self) and b count.
        let config = RaftConfig::new(vec![
            RaftPeer::voter("a", "a.example:7050"),
            RaftPeer::voter("b", "b.example:7050"),
            RaftPeer {
                uuid: "l".to_string(),
                addr: "l.example:7050".to_string(),
                role: MemberRole::Learner,
            },
        ])
        .expect("config failed");

        let factory = TestProxyFactory::default().respond("b", Ok(VoteResponse::granted("b", 1)));
        let (tx, rx) = mpsc::channel();
        let mut counter = VoteCounter::new(2, 2).expect("counter failed");
        counter.register_vote("a", ElectionVote::Granted).unwrap();
        let election = LeaderElection::new(
            config,
            Arc::new(factory),
            VoteRequest::new("a", 1, "tablet-1"),
            counter,
            Duration::from_secs(5),
            Box::new(move |result| {
                tx.send(result).expect("result receiver dropped");
            }),
        );
        election.run().expect("run failed");

        let result = await_result(&rx);
        assert_eq!(result.decision, ElectionVote::Granted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wrong_voter_arithmetic_rejected() {
        // Counter expects 5 voters but the config only brings 3.
        let factory = TestProxyFactory::default();
        let (tx, rx) = mpsc::channel();
        let mut counter = VoteCounter::new(5, 3).expect("counter failed");
        counter.register_vote("a", ElectionVote::Granted).unwrap();
        let election = LeaderElection::new(
            config(&["a", "b", "c"]),
            Arc::new(factory),
            VoteRequest::new("a", 1, "tablet-1"),
            counter,
            Duration::from_secs(5),
            Box::new(move |result| {
                tx.send(result).expect("result receiver dropped");
            }),
        );
        let err = election.run().unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));

        // The error is the caller's to handle: no callback fires, and
        // dropping the failed election must not panic.
        drop(election);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_self_vote_rejected() {
        // An unseeded counter violates the self-vote precondition.
        let factory = TestProxyFactory::default();
        let (tx, rx) = mpsc::channel();
        let counter = VoteCounter::new(3, 2).expect("counter failed");
        let election = LeaderElection::new(
            config(&["a", "b", "c"]),
            Arc::new(factory),
            VoteRequest::new("a", 1, "tablet-1"),
            counter,
            Duration::from_secs(5),
            Box::new(move |result| {
                tx.send(result).expect("result receiver dropped");
            }),
        );
        let err = election.run().unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));

        drop(election);
        assert!(rx.try_recv().is_err());
    }
}
