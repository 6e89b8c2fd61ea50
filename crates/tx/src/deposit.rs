// Path: crates/tx/src/deposit.rs
//! Storage deposits and the shape of the chain's internal outputs.

use kestrel_types::config::RentStructure;
use kestrel_types::ids::{ChainId, L1Address, NativeTokenId};
use kestrel_types::ledger::{BasicOutput, NftOutput, Output};
use kestrel_types::U256;
use std::collections::BTreeMap;

/// The minimum storage deposit of `output` under `rent`.
pub fn min_storage_deposit(rent: &RentStructure, output: &Output) -> u64 {
    rent.min_deposit_for_len(output.encoded_len())
}

/// The chain-owned output holding the whole L2 balance of one native token.
pub fn internal_native_token_output(
    chain_id: &ChainId,
    id: &NativeTokenId,
    balance: U256,
    deposit: u64,
) -> BasicOutput {
    let mut native_tokens = BTreeMap::new();
    native_tokens.insert(*id, balance);
    BasicOutput {
        native_tokens,
        ..BasicOutput::new(L1Address::Chain(*chain_id), deposit)
    }
}

/// The chain-owned output holding a received NFT.
///
/// Sender, request metadata, time lock and native tokens of the incoming
/// output are stripped; the amount is exactly the minimum deposit.
pub fn internal_nft_output(chain_id: &ChainId, incoming: &NftOutput, rent: &RentStructure) -> NftOutput {
    let mut out = NftOutput {
        nft_id: incoming.nft_id,
        amount: 0,
        native_tokens: BTreeMap::new(),
        address: L1Address::Chain(*chain_id),
        issuer: incoming.issuer,
        immutable_metadata: incoming.immutable_metadata.clone(),
        sender: None,
        metadata: None,
        timelock: None,
    };
    out.amount = min_storage_deposit(rent, &Output::Nft(out.clone()));
    out
}
