// Path: crates/types/src/keys/mod.rs
//! Defines well-known contract names and state keys.
//!
//! Every state key is `contract_hname (4 bytes, LE) || partition_key`. The
//! partition with hname `0` is reserved for chain-level values that the state
//! layer itself maintains.

use crate::ids::Hname;

/// The registry of deployed contracts.
pub const ROOT_CONTRACT: &str = "root";
/// The L2 account ledger.
pub const ACCOUNTS_CONTRACT: &str = "accounts";
/// Program blobs.
pub const BLOB_CONTRACT: &str = "blob";
/// Block info, receipts and events.
pub const BLOCKLOG_CONTRACT: &str = "blocklog";
/// Chain info, fee policy and rotation.
pub const GOVERNANCE_CONTRACT: &str = "governance";

/// All core contracts, in deployment order.
pub const CORE_CONTRACTS: [&str; 5] = [
    ROOT_CONTRACT,
    ACCOUNTS_CONTRACT,
    BLOB_CONTRACT,
    BLOCKLOG_CONTRACT,
    GOVERNANCE_CONTRACT,
];

/// The partition holding chain-level values.
pub const CHAIN_PARTITION: Hname = Hname(0);

/// The chain id, stored at origin.
pub const KEY_CHAIN_ID: &[u8] = b"c";
/// The block index of the state, LE `u32`.
pub const KEY_BLOCK_INDEX: &[u8] = b"i";
/// The timestamp of the state in unix nanoseconds, LE `u64`.
pub const KEY_TIMESTAMP: &[u8] = b"t";
/// The L1 commitment of the parent state.
pub const KEY_PREV_L1_COMMITMENT: &[u8] = b"p";

/// Builds the full state key of `key` in the partition of `contract`.
pub fn contract_key(contract: Hname, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + key.len());
    out.extend_from_slice(&contract.to_bytes());
    out.extend_from_slice(key);
    out
}

/// Builds the full state key of a chain-level value.
pub fn chain_key(key: &[u8]) -> Vec<u8> {
    contract_key(CHAIN_PARTITION, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_do_not_overlap() {
        let a = contract_key(Hname::from_name(ACCOUNTS_CONTRACT), b"x");
        let b = contract_key(Hname::from_name(BLOCKLOG_CONTRACT), b"x");
        assert_ne!(a, b);
        assert_eq!(chain_key(KEY_BLOCK_INDEX), vec![0, 0, 0, 0, b'i']);
    }
}
