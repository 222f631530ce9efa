//! Raft group membership.

use crate::error::{Error, Result};

/// Role of a peer within the group. Only voters participate in elections
/// and count toward quorum; learners and observers replicate data without
/// voting rights.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    Voter,
    Learner,
    Observer,
}

/// One member of the Raft config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftPeer {
    pub uuid: String,
    pub addr: String,
    pub role: MemberRole,
}

impl RaftPeer {
    pub fn voter(uuid: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            addr: addr.into(),
            role: MemberRole::Voter,
        }
    }

    pub fn is_voter(&self) -> bool {
        self.role == MemberRole::Voter
    }
}

/// The membership of one Raft group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftConfig {
    peers: Vec<RaftPeer>,
}

impl RaftConfig {
    pub fn new(peers: Vec<RaftPeer>) -> Result<Self> {
        for (i, peer) in peers.iter().enumerate() {
            if peer.uuid.is_empty() {
                return Err(Error::InvalidArgument(
                    "peer with empty uuid in raft config".to_string(),
                ));
            }
            if peers[..i].iter().any(|p| p.uuid == peer.uuid) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate peer {} in raft config",
                    peer.uuid
                )));
            }
        }
        Ok(Self { peers })
    }

    pub fn peers(&self) -> &[RaftPeer] {
        &self.peers
    }

    pub fn peer(&self, uuid: &str) -> Option<&RaftPeer> {
        self.peers.iter().find(|p| p.uuid == uuid)
    }

    pub fn voters(&self) -> impl Iterator<Item = &RaftPeer> {
        self.peers.iter().filter(|p| p.is_voter())
    }

    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    /// Quorum size: floor(voters / 2) + 1.
    pub fn majority_size(&self) -> usize {
        self.voter_count() / 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_size() {
        for (voters, majority) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3)] {
            let peers = (0..voters)
                .map(|i| RaftPeer::voter(format!("peer-{i}"), format!("host{i}:7050")))
                .collect();
            let config = RaftConfig::new(peers).expect("config failed");
            assert_eq!(config.majority_size(), majority, "{voters} voters");
        }
    }

    #[test]
    fn test_non_voters_excluded_from_quorum() {
        let config = RaftConfig::new(vec![
            RaftPeer::voter("a", "host1:7050"),
            RaftPeer::voter("b", "host2:7050"),
            RaftPeer {
                uuid: "c".to_string(),
                addr: "host3:7050".to_string(),
                role: MemberRole::Learner,
            },
            RaftPeer {
                uuid: "d".to_string(),
                addr: "host4:7050".to_string(),
                role: MemberRole::Observer,
            },
        ])
        .expect("config failed");

        assert_eq!(config.voter_count(), 2);
        assert_eq!(config.majority_size(), 2);
        assert_eq!(config.peers().len(), 4);
    }

    #[test]
    fn test_duplicate_uuid_rejected() {
        let err = RaftConfig::new(vec![
            RaftPeer::voter("a", "host1:7050"),
            RaftPeer::voter("a", "host2:7050"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
