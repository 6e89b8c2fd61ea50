// Path: crates/types/src/ledger.rs
//! L1-style outputs and transactions.
//!
//! The runtime does not depend on a particular L1 ledger encoding. These types
//! model the parts of an output-based ledger the core needs: the chain anchor,
//! plain outputs carrying requests and assets, foundries and NFTs.

use crate::assets::Assets;
use crate::codec::{from_bytes_canonical, to_bytes_canonical};
use crate::error::CodecError;
use crate::ids::{hash_data, Address, ChainId, HashValue, L1Address, NativeTokenId, NftId, OutputId, TransactionId};
use crate::request::RequestMetadata;
use parity_scale_codec::{Decode, Encode};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The commitment a chain publishes on L1: the state root and the hash of the block that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct L1Commitment {
    /// The Merkle root of the chain state.
    pub state_commitment: HashValue,
    /// The hash of the block that produced the state.
    pub block_hash: HashValue,
}

impl L1Commitment {
    /// Canonical bytes, stored in the anchor's state metadata.
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(self)
    }

    /// Parses the canonical bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        from_bytes_canonical(bytes)
    }
}

impl fmt::Display for L1Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            hex::encode(self.state_commitment),
            hex::encode(self.block_hash)
        )
    }
}

/// The chain anchor: the L1 output that carries the chain identity and its state commitment.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct AnchorOutput {
    /// The chain this output anchors.
    pub chain_id: ChainId,
    /// Base tokens held by the anchor (L2 totals plus the anchor's own storage deposit).
    pub amount: u64,
    /// Monotonic state index, incremented by every non-rotation block.
    pub state_index: u32,
    /// Encoded [`L1Commitment`] of the state at `state_index`.
    pub state_metadata: Vec<u8>,
    /// Number of foundries ever created by the chain.
    pub foundry_counter: u32,
    /// The address allowed to transition the state.
    pub state_controller: Address,
    /// The address allowed to change governance.
    pub governor: Address,
}

impl AnchorOutput {
    /// Decodes the commitment stored in the state metadata.
    pub fn l1_commitment(&self) -> Result<L1Commitment, CodecError> {
        L1Commitment::from_bytes(&self.state_metadata)
    }
}

/// An anchor output together with its L1 identity and the time it was confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct AnchorOutputWithId {
    /// The output itself.
    pub output: AnchorOutput,
    /// The output id on L1.
    pub id: OutputId,
    /// Confirmation time in unix nanoseconds.
    pub timestamp: u64,
}

impl AnchorOutputWithId {
    /// The state index of the anchor.
    pub fn state_index(&self) -> u32 {
        self.output.state_index
    }
}

/// Returns unlocked funds to a sender if the output is not consumed in time.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Expiration {
    /// The address that may claim the output after `time`.
    pub return_address: L1Address,
    /// Unix nanoseconds after which the chain may no longer consume the output.
    pub time: u64,
}

/// A plain output carrying base tokens, native tokens and optionally a request.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct BasicOutput {
    /// Base tokens.
    pub amount: u64,
    /// Native token balances.
    pub native_tokens: BTreeMap<NativeTokenId, U256>,
    /// The owner of the output.
    pub address: L1Address,
    /// The sender, if declared.
    pub sender: Option<L1Address>,
    /// Request metadata when the output is a request to a chain.
    pub metadata: Option<RequestMetadata>,
    /// Unix nanoseconds before which the output cannot be consumed.
    pub timelock: Option<u64>,
    /// Expiration unlock condition.
    pub expiration: Option<Expiration>,
}

impl BasicOutput {
    /// A bare output owned by `address`.
    pub fn new(address: L1Address, amount: u64) -> Self {
        Self {
            amount,
            native_tokens: BTreeMap::new(),
            address,
            sender: None,
            metadata: None,
            timelock: None,
            expiration: None,
        }
    }
}

/// The supply accounting of a foundry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SimpleTokenScheme {
    /// Tokens minted so far.
    pub minted_tokens: U256,
    /// Tokens melted so far.
    pub melted_tokens: U256,
    /// The maximum supply.
    pub maximum_supply: U256,
}

impl SimpleTokenScheme {
    /// Minted minus melted.
    pub fn circulating_supply(&self) -> U256 {
        self.minted_tokens.saturating_sub(self.melted_tokens)
    }
}

/// An output controlling the supply of one native token.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct FoundryOutput {
    /// The owning chain.
    pub chain_id: ChainId,
    /// The foundry serial number, unique per chain.
    pub serial_number: u32,
    /// Base tokens (storage deposit).
    pub amount: u64,
    /// Supply accounting.
    pub token_scheme: SimpleTokenScheme,
}

impl FoundryOutput {
    /// The id of the token this foundry controls.
    pub fn token_id(&self) -> NativeTokenId {
        NativeTokenId::from_foundry(&self.chain_id, self.serial_number)
    }
}

/// An output holding one NFT.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct NftOutput {
    /// The NFT identity.
    pub nft_id: NftId,
    /// Base tokens.
    pub amount: u64,
    /// Native token balances.
    pub native_tokens: BTreeMap<NativeTokenId, U256>,
    /// The owner.
    pub address: L1Address,
    /// The issuer, immutable.
    pub issuer: Option<L1Address>,
    /// Immutable metadata.
    pub immutable_metadata: Vec<u8>,
    /// The sender, if declared.
    pub sender: Option<L1Address>,
    /// Request metadata when the output is a request to a chain.
    pub metadata: Option<RequestMetadata>,
    /// Unix nanoseconds before which the output cannot be consumed.
    pub timelock: Option<u64>,
}

/// Any output the core produces or consumes.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum Output {
    /// The chain anchor.
    Anchor(AnchorOutput),
    /// A plain output.
    Basic(BasicOutput),
    /// A foundry.
    Foundry(FoundryOutput),
    /// An NFT output.
    Nft(NftOutput),
}

impl Output {
    /// Base tokens held by the output.
    pub fn amount(&self) -> u64 {
        match self {
            Output::Anchor(o) => o.amount,
            Output::Basic(o) => o.amount,
            Output::Foundry(o) => o.amount,
            Output::Nft(o) => o.amount,
        }
    }

    /// All fungible and non-fungible assets carried by the output.
    pub fn assets(&self) -> Assets {
        match self {
            Output::Anchor(o) => Assets::from_base_tokens(o.amount),
            Output::Basic(o) => Assets {
                base_tokens: o.amount,
                native_tokens: o.native_tokens.clone(),
                nfts: Default::default(),
            },
            Output::Foundry(o) => Assets::from_base_tokens(o.amount),
            Output::Nft(o) => Assets {
                base_tokens: o.amount,
                native_tokens: o.native_tokens.clone(),
                nfts: std::iter::once(o.nft_id).collect(),
            },
        }
    }

    /// Number of bytes the output occupies in its canonical encoding.
    pub fn encoded_len(&self) -> usize {
        self.encoded_size()
    }
}

/// The signed part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct TransactionEssence {
    /// Consumed outputs, in deterministic order.
    pub inputs: Vec<OutputId>,
    /// Hash over the consumed outputs' canonical bytes.
    pub inputs_commitment: HashValue,
    /// Produced outputs. Index 0 is always the next anchor.
    pub outputs: Vec<Output>,
}

impl TransactionEssence {
    /// Canonical bytes. This is the message the committee signs.
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(self)
    }

    /// Hash of the canonical bytes.
    pub fn hash(&self) -> HashValue {
        hash_data(&self.to_bytes())
    }
}

/// A transaction: essence plus the committee's threshold signature.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Transaction {
    /// The signed essence.
    pub essence: TransactionEssence,
    /// The threshold signature over the essence bytes.
    pub signature: Vec<u8>,
}

impl Transaction {
    /// The transaction id: hash of the full canonical bytes.
    pub fn id(&self) -> TransactionId {
        TransactionId(hash_data(&to_bytes_canonical(self)))
    }

    /// The id of the `index`-th produced output.
    pub fn output_id(&self, index: u16) -> OutputId {
        OutputId::new(self.id(), index)
    }

    /// Returns the produced anchor output, if output 0 is an anchor.
    pub fn anchor_output(&self) -> Option<AnchorOutputWithId> {
        match self.essence.outputs.first() {
            Some(Output::Anchor(a)) => Some(AnchorOutputWithId {
                output: a.clone(),
                id: self.output_id(0),
                timestamp: 0,
            }),
            _ => None,
        }
    }
}

/// The inclusion state of a transaction as reported by the L1 connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InclusionState {
    /// The transaction is confirmed.
    Included,
    /// Another transaction spending the same inputs was confirmed.
    Conflicting,
    /// The ledger does not know the transaction (yet).
    NoTransaction,
}

impl InclusionState {
    /// Parses the connector's string form. Unknown values yield `None` and are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "included" => Some(InclusionState::Included),
            "conflicting" => Some(InclusionState::Conflicting),
            "noTransaction" => Some(InclusionState::NoTransaction),
            _ => None,
        }
    }

    /// The connector's string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            InclusionState::Included => "included",
            InclusionState::Conflicting => "conflicting",
            InclusionState::NoTransaction => "noTransaction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusion_state_strings() {
        for s in [
            InclusionState::Included,
            InclusionState::Conflicting,
            InclusionState::NoTransaction,
        ] {
            assert_eq!(InclusionState::parse(s.as_str()), Some(s));
        }
        assert_eq!(InclusionState::parse("pending"), None);
    }

    #[test]
    fn anchor_commitment_lives_in_metadata() {
        let c = L1Commitment {
            state_commitment: [1; 32],
            block_hash: [2; 32],
        };
        let anchor = AnchorOutput {
            chain_id: ChainId([0; 32]),
            amount: 10,
            state_index: 3,
            state_metadata: c.to_bytes(),
            foundry_counter: 0,
            state_controller: Address([9; 32]),
            governor: Address([9; 32]),
        };
        assert_eq!(anchor.l1_commitment().unwrap(), c);
    }
}
