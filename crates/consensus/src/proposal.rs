// Path: crates/consensus/src/proposal.rs
//! The batch proposal each committee member submits to ACS.

use kestrel_types::codec::{from_bytes_canonical, to_bytes_canonical};
use kestrel_types::error::CodecError;
use kestrel_types::ids::{AgentId, HashValue, OutputId, RequestId};
use parity_scale_codec::{Decode, Encode};

/// One member's view of what the next block should contain.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BatchProposal {
    /// The proposer's committee index.
    pub validator_index: u16,
    /// The anchor the batch builds on.
    pub anchor_output_id: OutputId,
    /// Requests the proposer has ready, index-aligned with `request_hashes`.
    pub request_ids: Vec<RequestId>,
    pub request_hashes: Vec<HashValue>,
    /// The proposer's clock, at least one tick past the state timestamp.
    pub timestamp: u64,
    /// Where the proposer wants the validator fee share to go.
    pub fee_destination: AgentId,
    /// The proposer's signature over the anchor output id. Feeds the block entropy.
    pub sig_share_over_anchor_id: Vec<u8>,
    /// The proposer's DSS nonce index proposal.
    pub nonce_index_proposal: Vec<u16>,
}

impl BatchProposal {
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(self)
    }

    /// Parses a proposal and checks that ids and hashes line up.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let p: BatchProposal = from_bytes_canonical(bytes)?;
        if p.request_ids.len() != p.request_hashes.len() {
            return Err(CodecError::InvalidValue(format!(
                "{} request ids but {} hashes",
                p.request_ids.len(),
                p.request_hashes.len()
            )));
        }
        Ok(p)
    }
}
