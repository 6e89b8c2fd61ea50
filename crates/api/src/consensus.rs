// Path: crates/api/src/consensus.rs
//! The consensus black boxes: asynchronous common subset (ACS) and the
//! distributed signing scheme (DSS).
//!
//! Both report through one-shot callbacks. The callbacks run on the black
//! box's own task and must only enqueue a message for the controller.

use kestrel_types::error::ConsensusError;
use kestrel_types::ids::{Address, HashValue};
use std::collections::BTreeMap;

/// The decided set of proposals of one ACS instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcsOutput {
    /// The session the proposals were submitted to.
    pub session_id: u64,
    /// The log index of the round.
    pub log_index: u32,
    /// The encoded proposals, at least a quorum of them.
    pub values: Vec<Vec<u8>>,
}

/// Receives the ACS output.
pub type AcsCallback = Box<dyn FnOnce(AcsOutput) + Send>;

/// Agreement over batch proposals.
pub trait AcsRunner: Send + Sync {
    /// Submits the local proposal of a round.
    fn run(
        &self,
        proposal: Vec<u8>,
        session_id: u64,
        state_index: u32,
        log_index: u32,
        callback: AcsCallback,
    ) -> Result<(), ConsensusError>;
}

/// Identifies one DSS instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DssKey {
    /// Derived from the anchor the round works on.
    pub journal_id: HashValue,
    /// The round's log index.
    pub log_index: u32,
}

/// Receives the local nonce index proposal.
pub type IndexProposalCallback = Box<dyn FnOnce(Vec<u16>) + Send>;
/// Receives the final threshold signature.
pub type SignatureCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Threshold signing by the committee.
pub trait DssRunner: Send + Sync {
    /// Starts nonce generation of an instance. The local nonce index proposal
    /// arrives through `on_index_proposal`, the signature through `on_signature`.
    fn start(
        &self,
        key: DssKey,
        on_index_proposal: IndexProposalCallback,
        on_signature: SignatureCallback,
    ) -> Result<(), ConsensusError>;

    /// Hands the decided nonce index proposals of the contributors, keyed by
    /// validator index, together with the message to sign.
    fn decided_index_proposals(
        &self,
        key: DssKey,
        decided: BTreeMap<u16, Vec<u16>>,
        message: Vec<u8>,
    ) -> Result<(), ConsensusError>;

    /// The address the committee signs for.
    fn address(&self) -> Address;
}
