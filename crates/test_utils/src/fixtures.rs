// Path: crates/test_utils/src/fixtures.rs
//! Keys and request builders.

use crate::l1::MockL1;
use ed25519_dalek::SigningKey;
use kestrel_types::assets::Assets;
use kestrel_types::dict::Dict;
use kestrel_types::ids::{Address, AgentId, ChainId, Hname, L1Address};
use kestrel_types::ledger::BasicOutput;
use kestrel_types::request::{CallTarget, OffLedgerRequest, OnLedgerRequest, RequestMetadata, RequestOutput};

/// Gas budget the builders attach unless told otherwise.
pub const DEFAULT_GAS_BUDGET: u64 = 1_000_000;

pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn address_of(key: &SigningKey) -> Address {
    Address::from_public_key(&key.verifying_key())
}

pub fn agent_of(key: &SigningKey) -> AgentId {
    AgentId::Address(address_of(key))
}

/// Node identity keys of a committee of `n`.
pub fn committee_keys(n: u16) -> Vec<SigningKey> {
    (0..n).map(|i| key(100u8.wrapping_add(i as u8))).collect()
}

/// The key the committee signs anchor transactions with.
pub fn committee_signing_key() -> SigningKey {
    key(99)
}

/// The key of the chain owner used throughout tests.
pub fn owner_key() -> SigningKey {
    key(7)
}

/// An on-ledger request from `sender` carrying `amount` base tokens, on a fresh output.
pub fn on_ledger_request(
    l1: &MockL1,
    chain_id: ChainId,
    sender: &SigningKey,
    amount: u64,
    target: CallTarget,
    params: Dict,
    gas_budget: u64,
) -> OnLedgerRequest {
    OnLedgerRequest {
        output_id: l1.fresh_output_id(),
        output: RequestOutput::Basic(BasicOutput {
            sender: Some(L1Address::Ed25519(address_of(sender))),
            metadata: Some(RequestMetadata {
                sender_contract: Hname(0),
                target,
                params,
                allowance: Assets::default(),
                gas_budget,
            }),
            ..BasicOutput::new(L1Address::Chain(chain_id), amount)
        }),
    }
}

/// The request that initializes a chain, sent by `owner`.
pub fn init_request(l1: &MockL1, chain_id: ChainId, owner: &SigningKey) -> OnLedgerRequest {
    on_ledger_request(
        l1,
        chain_id,
        owner,
        0,
        CallTarget::new("root", "init"),
        Dict::new(),
        DEFAULT_GAS_BUDGET,
    )
}

/// A plain deposit into the sender's L2 account.
pub fn deposit_request(l1: &MockL1, chain_id: ChainId, sender: &SigningKey, amount: u64) -> OnLedgerRequest {
    on_ledger_request(
        l1,
        chain_id,
        sender,
        amount,
        CallTarget::new("accounts", "deposit"),
        Dict::new(),
        DEFAULT_GAS_BUDGET,
    )
}

/// A signed off-ledger request.
pub fn off_ledger(
    key: &SigningKey,
    chain_id: ChainId,
    target: CallTarget,
    params: Dict,
    nonce: u64,
    gas_budget: u64,
) -> OffLedgerRequest {
    OffLedgerRequest::new(chain_id, target, params, nonce, gas_budget).sign(key)
}
