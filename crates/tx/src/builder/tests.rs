// Path: crates/tx/src/builder/tests.rs
use super::*;
use kestrel_types::ids::{Address, L1Address, TransactionId};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Default)]
struct MemLoader {
    native: HashMap<NativeTokenId, (OutputId, BasicOutput)>,
    foundries: HashMap<u32, (OutputId, FoundryOutput)>,
    nfts: HashMap<NftId, (OutputId, NftOutput)>,
}

impl OutputLoader for MemLoader {
    fn native_token_output(&self, id: &NativeTokenId) -> Result<Option<(OutputId, BasicOutput)>, StateError> {
        Ok(self.native.get(id).cloned())
    }
    fn foundry_output(&self, serial: u32) -> Result<Option<(OutputId, FoundryOutput)>, StateError> {
        Ok(self.foundries.get(&serial).cloned())
    }
    fn nft_output(&self, id: &NftId) -> Result<Option<(OutputId, NftOutput)>, StateError> {
        Ok(self.nfts.get(id).cloned())
    }
}

const CHAIN: ChainId = ChainId([1; 32]);

fn deposits() -> StorageDepositAssumption {
    RentStructure::default().storage_deposit_estimate()
}

fn anchor(amount: u64) -> AnchorOutputWithId {
    AnchorOutputWithId {
        output: AnchorOutput {
            chain_id: CHAIN,
            amount,
            state_index: 4,
            state_metadata: L1Commitment::default().to_bytes(),
            foundry_counter: 0,
            state_controller: Address([2; 32]),
            governor: Address([2; 32]),
        },
        id: OutputId::new(TransactionId([9; 32]), 0),
        timestamp: 0,
    }
}

fn builder(l2_base: u64) -> AnchorTransactionBuilder {
    let d = deposits();
    AnchorTransactionBuilder::new(anchor(l2_base + d.anchor_output), RentStructure::default(), d)
}

fn token(b: u8) -> NativeTokenId {
    NativeTokenId([b; 38])
}

fn deposit_request(n: u8, base: u64, tokens: &[(NativeTokenId, u64)]) -> OnLedgerRequest {
    let mut out = BasicOutput::new(L1Address::Chain(CHAIN), base);
    for (id, amount) in tokens {
        out.native_tokens.insert(*id, U256::from(*amount));
    }
    out.sender = Some(L1Address::Ed25519(Address([n; 32])));
    OnLedgerRequest {
        output_id: OutputId::new(TransactionId([n; 32]), 1),
        output: RequestOutput::Basic(out),
    }
}

#[test]
fn deposit_grows_the_anchor_and_balances() {
    let loader = MemLoader::default();
    let mut txb = builder(1_000);
    let adj = txb.consume(&deposit_request(3, 500_000, &[]), &loader).unwrap();
    assert_eq!(adj, 0);
    assert_eq!(txb.anchor_amount(), 501_000 + deposits().anchor_output);
    txb.check_balanced(&Assets::from_base_tokens(501_000)).unwrap();

    let commitment = L1Commitment {
        state_commitment: [5; 32],
        block_hash: [6; 32],
    };
    let essence = txb.build_transaction_essence(&commitment);
    assert_eq!(essence.inputs.len(), 2);
    assert_eq!(essence.inputs[0], txb.anchor().id);
    let Output::Anchor(next) = &essence.outputs[0] else {
        panic!("anchor must be output 0");
    };
    assert_eq!(next.state_index, 5);
    assert_eq!(next.l1_commitment().unwrap(), commitment);
    assert_eq!(next.amount, txb.anchor_amount());
}

#[test]
fn first_native_token_locks_a_deposit_and_last_withdrawal_frees_it() {
    let loader = MemLoader::default();
    let mut txb = builder(1_000_000);
    let start = txb.anchor_amount();
    let adj = txb
        .consume(&deposit_request(3, 100_000, &[(token(7), 50)]), &loader)
        .unwrap();
    assert_eq!(adj, -(deposits().native_token_output as i64));
    assert_eq!(txb.internal_outputs().len(), 1);

    let mut out = BasicOutput::new(L1Address::Ed25519(Address([4; 32])), 100_000);
    out.native_tokens.insert(token(7), U256::from(50));
    let adj = txb.add_output(Output::Basic(out), &loader).unwrap();
    assert_eq!(adj, deposits().native_token_output as i64);
    assert!(txb.internal_outputs().is_empty());
    assert_eq!(txb.anchor_amount(), start);
}

#[test]
fn existing_native_token_output_is_consumed_and_reproduced() {
    let mut loader = MemLoader::default();
    let existing = internal_native_token_output(&CHAIN, &token(7), U256::from(10), 777);
    let existing_id = OutputId::new(TransactionId([9; 32]), 1);
    loader.native.insert(token(7), (existing_id, existing));
    let mut txb = builder(0);
    let adj = txb.add_native_tokens(&token(7), U256::from(5), &loader).unwrap();
    assert_eq!(adj, 0);

    let essence = txb.build_transaction_essence(&L1Commitment::default());
    assert!(essence.inputs.contains(&existing_id));
    let internal = txb.internal_outputs();
    assert_eq!(internal[0].index, 1);
    assert_eq!(internal[0].output.amount(), 777);
    assert_eq!(
        internal[0].output.assets().native_tokens.get(&token(7)),
        Some(&U256::from(15))
    );

    let adj = txb.sub_native_tokens(&token(7), U256::from(15), &loader).unwrap();
    assert_eq!(adj, 777);
    assert_eq!(
        txb.removed_internal_outputs(),
        vec![InternalOutputKey::NativeToken(token(7))]
    );
}

#[test]
fn overdrawing_native_tokens_fails() {
    let loader = MemLoader::default();
    let mut txb = builder(0);
    assert_eq!(
        txb.sub_native_tokens(&token(1), U256::from(1), &loader),
        Err(BuildError::Tx(TxBuilderError::NotEnoughNativeTokens(token(1).to_string())))
    );
}

#[test]
fn foundry_lifecycle_returns_every_deposit() {
    let loader = MemLoader::default();
    let mut txb = builder(10_000_000);
    let start = txb.anchor_amount();
    let scheme = SimpleTokenScheme {
        maximum_supply: U256::from(1_000),
        ..Default::default()
    };
    let (serial, adj) = txb.create_new_foundry(scheme).unwrap();
    assert_eq!(serial, 1);
    assert!(adj < 0);
    assert_eq!(txb.foundry_counter(), 1);

    let token_id = NativeTokenId::from_foundry(&CHAIN, serial);
    let adj_mint = txb
        .modify_foundry_supply(serial, U256::from(100), true, &loader)
        .unwrap();
    assert_eq!(adj_mint, -(deposits().native_token_output as i64));
    assert_eq!(txb.internal_outputs().len(), 2);
    assert_eq!(
        txb.modify_foundry_supply(serial, U256::from(2_000), true, &loader),
        Err(BuildError::Tx(TxBuilderError::Overflow))
    );
    assert!(matches!(
        txb.destroy_foundry(serial, &loader),
        Err(BuildError::Tx(TxBuilderError::InconsistentL2WithL1(_)))
    ));

    txb.modify_foundry_supply(serial, U256::from(100), false, &loader)
        .unwrap();
    assert!(txb.native_tokens.get(&token_id).unwrap().balance.is_zero());
    txb.destroy_foundry(serial, &loader).unwrap();
    assert_eq!(txb.anchor_amount(), start);
    assert!(txb.internal_outputs().is_empty());
}

#[test]
fn unknown_foundry_is_reported() {
    let loader = MemLoader::default();
    let mut txb = builder(0);
    assert_eq!(
        txb.destroy_foundry(3, &loader),
        Err(BuildError::Tx(TxBuilderError::FoundryNotFound(3)))
    );
}

fn chain_nft(id: NftId, amount: u64) -> NftOutput {
    NftOutput {
        nft_id: id,
        amount,
        native_tokens: BTreeMap::new(),
        address: L1Address::Chain(CHAIN),
        issuer: None,
        immutable_metadata: vec![1, 2, 3],
        sender: None,
        metadata: None,
        timelock: None,
    }
}

#[test]
fn received_nft_gets_an_internal_output() {
    let loader = MemLoader::default();
    let mut txb = builder(0);
    let nft = chain_nft(NftId([8; 32]), 200_000);
    let req = OnLedgerRequest {
        output_id: OutputId::new(TransactionId([4; 32]), 0),
        output: RequestOutput::Nft(nft.clone()),
    };
    let adj = txb.consume(&req, &loader).unwrap();
    let internal = txb.internal_outputs();
    assert_eq!(internal.len(), 1);
    assert_eq!(adj, -(internal[0].output.amount() as i64));
    txb.check_balanced(
        &Assets::from_base_tokens((200_000 + adj) as u64).with_nft(nft.nft_id),
    )
    .unwrap();
}

#[test]
fn posting_a_held_nft_frees_its_deposit() {
    let mut loader = MemLoader::default();
    let id = NftId([8; 32]);
    let held = chain_nft(id, 40_000);
    loader
        .nfts
        .insert(id, (OutputId::new(TransactionId([9; 32]), 2), held));
    let mut txb = builder(1_000_000);

    let mut outgoing = chain_nft(id, 100_000);
    outgoing.address = L1Address::Ed25519(Address([4; 32]));
    let adj = txb.add_output(Output::Nft(outgoing), &loader).unwrap();
    assert_eq!(adj, 40_000);
    assert!(txb.internal_outputs().is_empty());
    assert_eq!(txb.removed_internal_outputs(), vec![InternalOutputKey::Nft(id)]);
    assert_eq!(txb.posted_outputs(), 1);

    let other = chain_nft(NftId([1; 32]), 100_000);
    assert!(matches!(
        txb.add_output(Output::Nft(other), &loader),
        Err(BuildError::Tx(TxBuilderError::NftNotFound(_)))
    ));
}

#[test]
fn posted_output_must_cover_its_deposit() {
    let loader = MemLoader::default();
    let mut txb = builder(1_000_000);
    let out = Output::Basic(BasicOutput::new(L1Address::Ed25519(Address([4; 32])), 1));
    assert!(matches!(
        txb.add_output(out, &loader),
        Err(BuildError::Tx(
            TxBuilderError::NotEnoughBaseTokensForStorageDeposit { available: 1, .. }
        ))
    ));
}

#[test]
fn posting_more_than_the_chain_holds_fails() {
    let loader = MemLoader::default();
    let mut txb = builder(10);
    let out = Output::Basic(BasicOutput::new(
        L1Address::Ed25519(Address([4; 32])),
        10_000_000,
    ));
    assert_eq!(
        txb.add_output(out, &loader),
        Err(BuildError::Tx(TxBuilderError::NotEnoughBaseTokensBalance))
    );
}

#[test]
fn input_limit_is_enforced() {
    let loader = MemLoader::default();
    let mut txb = builder(0);
    for i in 0..(MAX_INPUTS - 1) {
        let mut req = deposit_request(3, 1, &[]);
        req.output_id = OutputId::new(TransactionId([3; 32]), i as u16);
        txb.consume(&req, &loader).unwrap();
    }
    assert_eq!(txb.input_count(), MAX_INPUTS);
    assert_eq!(
        txb.consume(&deposit_request(4, 1, &[]), &loader),
        Err(BuildError::Tx(TxBuilderError::InputLimitExceeded))
    );
}

#[test]
fn native_token_limit_is_enforced() {
    let loader = MemLoader::default();
    let mut txb = builder(100_000_000);
    for i in 0..MAX_NATIVE_TOKENS {
        txb.add_native_tokens(&token(i as u8), U256::one(), &loader)
            .unwrap();
    }
    assert_eq!(
        txb.add_native_tokens(&token(200), U256::one(), &loader),
        Err(BuildError::Tx(TxBuilderError::TotalNativeTokensLimitExceeded))
    );
}

#[test]
fn imbalance_is_detected() {
    let txb = builder(1_000);
    assert!(txb.check_balanced(&Assets::from_base_tokens(1_000)).is_ok());
    assert!(matches!(
        txb.check_balanced(&Assets::from_base_tokens(999)),
        Err(TxBuilderError::InconsistentL2WithL1(_))
    ));
}

#[test]
fn a_clone_is_an_independent_snapshot() {
    let loader = MemLoader::default();
    let mut txb = builder(0);
    let snapshot = txb.clone();
    txb.consume(&deposit_request(3, 5_000, &[(token(1), 3)]), &loader)
        .unwrap();
    assert_eq!(snapshot.consumed_requests(), 0);
    assert!(snapshot.internal_outputs().is_empty());
    assert_ne!(snapshot.sub_essence_hash(), txb.sub_essence_hash());
}

proptest! {
    #[test]
    fn deposits_are_conserved(ops in prop::collection::vec((0u8..4, 1u64..50, any::<bool>()), 1..40)) {
        let loader = MemLoader::default();
        let mut txb = builder(100_000_000);
        let total = txb.anchor_amount();
        let mut settled = 0i64;
        for (t, amount, add) in ops {
            let res = if add {
                txb.add_native_tokens(&token(t), U256::from(amount), &loader)
            } else {
                txb.sub_native_tokens(&token(t), U256::from(amount), &loader)
            };
            if let Ok(adj) = res {
                settled += adj;
            }
            let locked: u64 = txb.internal_outputs().iter().map(|o| o.output.amount()).sum();
            prop_assert_eq!(txb.anchor_amount() + locked, total);
            prop_assert_eq!(total as i64 + settled, txb.anchor_amount() as i64);
        }
    }
}
