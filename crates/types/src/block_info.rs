// Path: crates/types/src/block_info.rs
//! Records the block log keeps per block.

use crate::codec::{from_bytes_canonical, to_bytes_canonical};
use crate::error::CodecError;
use crate::ids::{Address, HashValue, TransactionId};
use crate::ledger::L1Commitment;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Summary of one block, written by the VM at block close.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct BlockInfo {
    /// The index of the block.
    pub block_index: u32,
    /// The block timestamp in unix nanoseconds.
    pub timestamp: u64,
    /// Requests processed in the block.
    pub total_requests: u16,
    /// Requests processed without error.
    pub num_successful_requests: u16,
    /// Off-ledger requests processed.
    pub num_off_ledger_requests: u16,
    /// The commitment of the parent state.
    pub previous_l1_commitment: L1Commitment,
    /// The commitment of this block's state. Unknown at close, filled in by the next block.
    pub l1_commitment: Option<L1Commitment>,
    /// The id of the anchor transaction. Unknown at close, filled in by the next block.
    pub anchor_transaction_id: Option<TransactionId>,
    /// Hash of the essence without the anchor output.
    pub transaction_sub_essence_hash: HashValue,
    /// Total base tokens held in L2 accounts after the block.
    pub total_base_tokens_in_l2_accounts: u64,
    /// Total base tokens locked as storage deposits in chain-owned outputs.
    pub total_storage_deposit: u64,
    /// Gas burned by all requests of the block.
    pub gas_burned: u64,
    /// Fees charged by all requests of the block.
    pub gas_fee_charged: u64,
}

impl BlockInfo {
    /// Canonical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(self)
    }

    /// Parses canonical bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        from_bytes_canonical(bytes)
    }

    /// Returns `true` if every processed request succeeded.
    pub fn all_successful(&self) -> bool {
        self.total_requests == self.num_successful_requests
    }
}

/// The state controller and governor in effect since a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ControlAddresses {
    /// The state controller address.
    pub state_address: Address,
    /// The governor address.
    pub governing_address: Address,
    /// The first block index these addresses controlled.
    pub since_block_index: u32,
}
