// Path: crates/api/src/peer.rs
//! Committee peer transport.

use kestrel_types::error::PeeringError;
use kestrel_types::messages::PeerMessage;
use std::sync::Arc;

/// Receives every message addressed to the local node.
pub type PeerHandler = Arc<dyn Fn(PeerMessage) + Send + Sync>;

/// Reliable, best-effort point-to-point and group messaging between the
/// members of one committee. Peers are addressed by committee index.
pub trait PeerTransport: Send + Sync {
    /// The committee index of the local node.
    fn self_index(&self) -> u16;

    /// The number of committee members, including the local node.
    fn committee_size(&self) -> u16;

    /// Installs the handler for incoming messages, replacing any previous one.
    fn attach(&self, handler: PeerHandler);

    /// Sends a message to one peer.
    fn send_to(&self, peer: u16, msg: PeerMessage) -> Result<(), PeeringError>;

    /// Sends a message to every other member.
    fn broadcast(&self, msg: PeerMessage) -> Result<(), PeeringError> {
        let me = self.self_index();
        for peer in (0..self.committee_size()).filter(|p| *p != me) {
            self.send_to(peer, msg.clone())?;
        }
        Ok(())
    }

    /// Sends a message to up to `n` other members chosen at random. Returns
    /// the chosen indexes.
    fn send_to_random(&self, n: usize, msg: PeerMessage) -> Result<Vec<u16>, PeeringError>;
}

/// The minimum number of members that must agree: `n - floor((n - 1) / 3)`.
pub fn quorum(committee_size: u16) -> u16 {
    committee_size - committee_size.saturating_sub(1) / 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_tolerates_a_third() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(7), 5);
        assert_eq!(quorum(10), 7);
    }
}
