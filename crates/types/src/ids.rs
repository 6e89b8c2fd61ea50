// Path: crates/types/src/ids.rs
//! Identifiers used throughout the runtime.
//!
//! All identifiers have a fixed-width canonical encoding. Ordering on the
//! identifiers is byte-lexicographic, which the VM relies on whenever an
//! iteration order can influence a commitment.

use crate::error::CodecError;
use ed25519_dalek::VerifyingKey;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash value.
pub type HashValue = [u8; 32];

/// Hashes arbitrary bytes with SHA-256.
pub fn hash_data(data: &[u8]) -> HashValue {
    Sha256::digest(data).into()
}

/// Hashes the concatenation of several byte slices with SHA-256.
pub fn hash_parts(parts: &[&[u8]]) -> HashValue {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// A 32-bit hashed name identifying a contract or an entry point.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
pub struct Hname(pub u32);

impl Hname {
    /// Derives the hashed name of a contract or entry point.
    ///
    /// The values `0` and `u32::MAX` are reserved and never produced.
    pub fn from_name(name: &str) -> Self {
        let [a, b, c, d, ..] = hash_data(name.as_bytes());
        let v = u32::from_le_bytes([a, b, c, d]);
        if v == 0 || v == u32::MAX {
            return Hname(1);
        }
        Hname(v)
    }

    /// The little-endian encoding used as a state key prefix.
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Hname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Debug for Hname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hname({})", self)
    }
}

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize,
            Deserialize,
        )]
        pub struct $name(pub HashValue);

        impl $name {
            /// Returns the raw 32 bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Builds the identifier from a 32-byte slice.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| CodecError::InvalidLength {
                    expected: 32,
                    got: bytes.len(),
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0.get(..4).unwrap_or_default()))
            }
        }
    };
}

hash_id!(
    /// The identity of a chain, derived from its origin output.
    ChainId
);
hash_id!(
    /// An L1 address: the hash of an ed25519 public key.
    Address
);
hash_id!(
    /// The identifier of an L1 transaction: the hash of its canonical bytes.
    TransactionId
);
hash_id!(
    /// The identifier of an NFT.
    NftId
);

impl Address {
    /// Derives the address controlled by an ed25519 public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Address(hash_data(key.as_bytes()))
    }

    /// Derives the address controlled by raw ed25519 public key bytes.
    pub fn from_public_key_bytes(key: &[u8; 32]) -> Self {
        Address(hash_data(key))
    }
}

impl ChainId {
    /// Derives a chain id from the output that created the chain.
    pub fn from_origin_output(id: &OutputId) -> Self {
        ChainId(hash_parts(&[b"chain-id", &id.to_bytes()]))
    }
}

/// An address on the L1 ledger: either a key-controlled address or a chain.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize, Debug,
)]
pub enum L1Address {
    /// An ed25519 key-controlled address.
    Ed25519(Address),
    /// The address of a chain's anchor.
    Chain(ChainId),
}

impl fmt::Display for L1Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L1Address::Ed25519(a) => write!(f, "ed25519:{}", a),
            L1Address::Chain(c) => write!(f, "chain:{}", c),
        }
    }
}

/// The identity of an L2 account owner.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize, Debug,
)]
pub enum AgentId {
    /// The empty agent. Receives nothing.
    Nil,
    /// An L1 address, controlled by a key.
    Address(Address),
    /// A contract on some chain.
    Contract {
        /// The chain the contract lives on.
        chain_id: ChainId,
        /// The hashed name of the contract.
        hname: Hname,
    },
}

impl AgentId {
    /// The canonical bytes of the agent id, used as a state key component.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode()
    }

    /// Maps an L1 address to the agent that owns its funds on L2.
    pub fn from_l1_address(addr: &L1Address) -> Self {
        match addr {
            L1Address::Ed25519(a) => AgentId::Address(*a),
            L1Address::Chain(c) => AgentId::Contract {
                chain_id: *c,
                hname: Hname::default(),
            },
        }
    }

    /// Returns the L1 address an agent withdraws to, if any.
    pub fn l1_address(&self) -> Option<L1Address> {
        match self {
            AgentId::Nil => None,
            AgentId::Address(a) => Some(L1Address::Ed25519(*a)),
            AgentId::Contract { chain_id, .. } => Some(L1Address::Chain(*chain_id)),
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentId::Nil => write!(f, "nil"),
            AgentId::Address(a) => write!(f, "{}", a),
            AgentId::Contract { chain_id, hname } => write!(f, "{}@{}", hname, chain_id),
        }
    }
}

/// The identifier of an output on the L1 ledger.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
pub struct OutputId {
    /// The transaction that created the output.
    pub transaction_id: TransactionId,
    /// The position of the output in that transaction.
    pub index: u16,
}

impl OutputId {
    /// Creates an output id.
    pub fn new(transaction_id: TransactionId, index: u16) -> Self {
        Self {
            transaction_id,
            index,
        }
    }

    /// The 34-byte canonical encoding.
    pub fn to_bytes(&self) -> [u8; 34] {
        let mut out = [0u8; 34];
        let (tx, idx) = out.split_at_mut(32);
        tx.copy_from_slice(&self.transaction_id.0);
        idx.copy_from_slice(&self.index.to_le_bytes());
        out
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.index)
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({:?}:{})", self.transaction_id, self.index)
    }
}

/// The identifier of a request. On-ledger requests use their output id; off-ledger
/// requests use the hash of their essence with index 0.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
pub struct RequestId(pub OutputId);

impl RequestId {
    /// The first four bytes of the id as a little-endian `u32`. Used by the batch sort key.
    pub fn u32_prefix(&self) -> u32 {
        let [a, b, c, d, ..] = self.0.transaction_id.0;
        u32::from_le_bytes([a, b, c, d])
    }

    /// The canonical byte encoding.
    pub fn to_bytes(&self) -> [u8; 34] {
        self.0.to_bytes()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({:?})", self.0)
    }
}

/// Length of a native token id: chain address (33) + foundry serial (4) + scheme (1).
pub const NATIVE_TOKEN_ID_LEN: usize = 38;

const CHAIN_ADDRESS_TYPE: u8 = 8;
const SIMPLE_TOKEN_SCHEME: u8 = 0;

/// The identifier of a native token, equal to the id of the foundry that controls it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct NativeTokenId(pub [u8; NATIVE_TOKEN_ID_LEN]);

impl NativeTokenId {
    /// Derives the id of the token minted by a chain's foundry.
    pub fn from_foundry(chain_id: &ChainId, serial_number: u32) -> Self {
        let mut out = [0u8; NATIVE_TOKEN_ID_LEN];
        let (kind, rest) = out.split_at_mut(1);
        kind.copy_from_slice(&[CHAIN_ADDRESS_TYPE]);
        let (chain, rest) = rest.split_at_mut(32);
        chain.copy_from_slice(&chain_id.0);
        let (serial, scheme) = rest.split_at_mut(4);
        serial.copy_from_slice(&serial_number.to_le_bytes());
        scheme.copy_from_slice(&[SIMPLE_TOKEN_SCHEME]);
        NativeTokenId(out)
    }

    /// Builds the id from a 38-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let arr: [u8; NATIVE_TOKEN_ID_LEN] =
            bytes.try_into().map_err(|_| CodecError::InvalidLength {
                expected: NATIVE_TOKEN_ID_LEN,
                got: bytes.len(),
            })?;
        Ok(NativeTokenId(arr))
    }

    /// The serial number of the controlling foundry.
    pub fn foundry_serial_number(&self) -> u32 {
        let serial = self.0.get(33..37).unwrap_or(&[0, 0, 0, 0]);
        let mut arr = [0u8; 4];
        arr.copy_from_slice(serial);
        u32::from_le_bytes(arr)
    }
}

impl fmt::Display for NativeTokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NativeTokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeTokenId({})", self)
    }
}

impl Serialize for NativeTokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for NativeTokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        NativeTokenId::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}
