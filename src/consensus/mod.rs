//! Single-round leader election for the tablet's Raft group.
//!
//! Only the leader replica may accept writes. A candidate drives one round
//! of vote RPCs against the other voters in its config; the resulting
//! decision (won or lost) gates the tablet's write path for that term.

pub mod election;
pub mod quorum;
pub mod vote;
pub mod voter;

pub use election::{
    DecisionCallback, ElectionResult, LeaderElection, PeerProxy, PeerProxyFactory,
};
pub use quorum::{MemberRole, RaftConfig, RaftPeer};
pub use vote::{ElectionVote, VoteCounter, VoteRequest, VoteResponse};
pub use voter::{LocalPeerProxy, LocalPeerProxyFactory, ReplicaVoter};
