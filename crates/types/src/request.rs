// Path: crates/types/src/request.rs
//! Requests to a chain.
//!
//! A request is either on-ledger (an L1 output addressed to the chain) or
//! off-ledger (a signed message with a nonce). The two are a tagged variant;
//! everything the VM needs is exposed through [`Request`] accessors.

use crate::assets::Assets;
use crate::codec::to_bytes_canonical;
use crate::dict::Dict;
use crate::error::MempoolError;
use crate::ids::{hash_data, AgentId, ChainId, HashValue, Hname, L1Address, NftId, OutputId, RequestId, TransactionId};
use crate::ledger::{BasicOutput, Expiration, NftOutput};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The contract and entry point a request calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct CallTarget {
    /// The target contract.
    pub contract: Hname,
    /// The target entry point.
    pub entry_point: Hname,
}

impl CallTarget {
    /// Builds a target from contract and entry point names.
    pub fn new(contract: &str, entry_point: &str) -> Self {
        Self {
            contract: Hname::from_name(contract),
            entry_point: Hname::from_name(entry_point),
        }
    }
}

/// Request data embedded in an on-ledger output.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// The sending contract when the sender is a chain, otherwise zero.
    pub sender_contract: Hname,
    /// The call target.
    pub target: CallTarget,
    /// Call parameters.
    pub params: Dict,
    /// Assets the target may take from the sender's L2 account.
    pub allowance: Assets,
    /// The requested gas budget.
    pub gas_budget: u64,
}

/// The L1 output behind an on-ledger request.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum RequestOutput {
    /// A plain output.
    Basic(BasicOutput),
    /// An NFT output.
    Nft(NftOutput),
}

/// A request carried by an L1 output addressed to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct OnLedgerRequest {
    /// The id of the carrying output.
    pub output_id: OutputId,
    /// The carrying output.
    pub output: RequestOutput,
}

impl OnLedgerRequest {
    /// Request metadata, if the output carries any.
    pub fn metadata(&self) -> Option<&RequestMetadata> {
        match &self.output {
            RequestOutput::Basic(o) => o.metadata.as_ref(),
            RequestOutput::Nft(o) => o.metadata.as_ref(),
        }
    }

    /// The declared L1 sender.
    pub fn sender_address(&self) -> Option<L1Address> {
        match &self.output {
            RequestOutput::Basic(o) => o.sender,
            RequestOutput::Nft(o) => o.sender,
        }
    }

    /// The fungible and non-fungible assets carried by the output.
    pub fn assets(&self) -> Assets {
        match &self.output {
            RequestOutput::Basic(o) => Assets {
                base_tokens: o.amount,
                native_tokens: o.native_tokens.clone(),
                nfts: Default::default(),
            },
            RequestOutput::Nft(o) => Assets {
                base_tokens: o.amount,
                native_tokens: o.native_tokens.clone(),
                nfts: std::iter::once(o.nft_id).collect(),
            },
        }
    }

    /// The NFT output, if the request carries one.
    pub fn nft(&self) -> Option<&NftOutput> {
        match &self.output {
            RequestOutput::Nft(o) => Some(o),
            RequestOutput::Basic(_) => None,
        }
    }

    /// The time lock of the output.
    pub fn time_lock(&self) -> Option<u64> {
        match &self.output {
            RequestOutput::Basic(o) => o.timelock,
            RequestOutput::Nft(o) => o.timelock,
        }
    }

    /// The expiration condition of the output.
    pub fn expiration(&self) -> Option<&Expiration> {
        match &self.output {
            RequestOutput::Basic(o) => o.expiration.as_ref(),
            RequestOutput::Nft(_) => None,
        }
    }
}

/// A signed request delivered directly to the committee.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct OffLedgerRequest {
    /// The chain the request is addressed to.
    pub chain_id: ChainId,
    /// The call target.
    pub target: CallTarget,
    /// Call parameters.
    pub params: Dict,
    /// Assets the target may take from the sender's L2 account.
    pub allowance: Assets,
    /// The requested gas budget.
    pub gas_budget: u64,
    /// Replay-protection nonce.
    pub nonce: u64,
    /// The sender's ed25519 public key.
    pub public_key: [u8; 32],
    /// The ed25519 signature over [`OffLedgerRequest::essence_bytes`].
    pub signature: Vec<u8>,
}

impl OffLedgerRequest {
    /// Creates an unsigned request.
    pub fn new(
        chain_id: ChainId,
        target: CallTarget,
        params: Dict,
        nonce: u64,
        gas_budget: u64,
    ) -> Self {
        Self {
            chain_id,
            target,
            params,
            allowance: Assets::default(),
            gas_budget,
            nonce,
            public_key: [0u8; 32],
            signature: Vec::new(),
        }
    }

    /// Sets the allowance (builder style).
    pub fn with_allowance(mut self, allowance: Assets) -> Self {
        self.allowance = allowance;
        self
    }

    /// The signed bytes: everything except the signature.
    pub fn essence_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(
            &self.chain_id,
            &self.target,
            &self.params,
            &self.allowance,
            self.gas_budget,
            self.nonce,
            &self.public_key,
        ))
    }

    /// Signs the request with `key`, setting the public key and signature.
    pub fn sign(mut self, key: &SigningKey) -> Self {
        self.public_key = key.verifying_key().to_bytes();
        let sig: Signature = key.sign(&self.essence_bytes());
        self.signature = sig.to_bytes().to_vec();
        self
    }

    /// Verifies the ed25519 signature.
    pub fn verify_signature(&self) -> Result<(), MempoolError> {
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|e| MempoolError::InvalidSignature(e.to_string()))?;
        let sig = Signature::from_slice(&self.signature)
            .map_err(|e| MempoolError::InvalidSignature(e.to_string()))?;
        key.verify(&self.essence_bytes(), &sig)
            .map_err(|e| MempoolError::InvalidSignature(e.to_string()))
    }

    /// The request id: hash of the essence with output index 0.
    pub fn id(&self) -> RequestId {
        RequestId(OutputId::new(
            TransactionId(hash_data(&self.essence_bytes())),
            0,
        ))
    }

    /// The sender derived from the public key.
    pub fn sender(&self) -> AgentId {
        AgentId::Address(crate::ids::Address::from_public_key_bytes(&self.public_key))
    }
}

/// A request of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum Request {
    /// An on-ledger request.
    OnLedger(OnLedgerRequest),
    /// An off-ledger request.
    OffLedger(OffLedgerRequest),
}

impl Request {
    /// The request id.
    pub fn id(&self) -> RequestId {
        match self {
            Request::OnLedger(r) => RequestId(r.output_id),
            Request::OffLedger(r) => r.id(),
        }
    }

    /// The sender agent. On-ledger requests without a declared sender have the nil agent.
    pub fn sender(&self) -> AgentId {
        match self {
            Request::OnLedger(r) => match r.sender_address() {
                Some(L1Address::Chain(chain_id)) => AgentId::Contract {
                    chain_id,
                    hname: r
                        .metadata()
                        .map(|m| m.sender_contract)
                        .unwrap_or_default(),
                },
                Some(addr) => AgentId::from_l1_address(&addr),
                None => AgentId::Nil,
            },
            Request::OffLedger(r) => r.sender(),
        }
    }

    /// The call target. On-ledger outputs without metadata target nothing.
    pub fn target(&self) -> Option<CallTarget> {
        match self {
            Request::OnLedger(r) => r.metadata().map(|m| m.target),
            Request::OffLedger(r) => Some(r.target),
        }
    }

    /// Call parameters.
    pub fn params(&self) -> Dict {
        match self {
            Request::OnLedger(r) => r.metadata().map(|m| m.params.clone()).unwrap_or_default(),
            Request::OffLedger(r) => r.params.clone(),
        }
    }

    /// Assets carried by the request. Always empty for off-ledger requests.
    pub fn assets(&self) -> Assets {
        match self {
            Request::OnLedger(r) => r.assets(),
            Request::OffLedger(_) => Assets::default(),
        }
    }

    /// The allowance.
    pub fn allowance(&self) -> Assets {
        match self {
            Request::OnLedger(r) => r
                .metadata()
                .map(|m| m.allowance.clone())
                .unwrap_or_default(),
            Request::OffLedger(r) => r.allowance.clone(),
        }
    }

    /// The requested gas budget.
    pub fn gas_budget(&self) -> u64 {
        match self {
            Request::OnLedger(r) => r.metadata().map(|m| m.gas_budget).unwrap_or(0),
            Request::OffLedger(r) => r.gas_budget,
        }
    }

    /// The nonce of an off-ledger request.
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Request::OnLedger(_) => None,
            Request::OffLedger(r) => Some(r.nonce),
        }
    }

    /// The time lock of an on-ledger request.
    pub fn time_lock(&self) -> Option<u64> {
        match self {
            Request::OnLedger(r) => r.time_lock(),
            Request::OffLedger(_) => None,
        }
    }

    /// Returns `true` for off-ledger requests.
    pub fn is_off_ledger(&self) -> bool {
        matches!(self, Request::OffLedger(_))
    }

    /// The NFT id carried by an on-ledger request.
    pub fn nft_id(&self) -> Option<NftId> {
        match self {
            Request::OnLedger(r) => r.nft().map(|n| n.nft_id),
            Request::OffLedger(_) => None,
        }
    }

    /// Canonical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(self)
    }

    /// Hash of the canonical bytes. Used to check requests pulled from peers.
    pub fn hash(&self) -> HashValue {
        hash_data(&self.to_bytes())
    }
}
