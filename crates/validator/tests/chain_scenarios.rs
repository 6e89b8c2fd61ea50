// Path: crates/validator/tests/chain_scenarios.rs
//! End-to-end runs of committees on the real clock.

mod common;

use common::{eventually, Cluster};
use kestrel_api::client::ChainClient;
use kestrel_test_utils::fixtures::{agent_of, deposit_request, key, off_ledger, owner_key, DEFAULT_GAS_BUDGET};
use kestrel_test_utils::programs::COUNTER;
use kestrel_types::dict::Dict;
use kestrel_types::error::{ChainError, MempoolError};
use kestrel_types::ids::{Address, Hname};
use kestrel_types::messages::PeerMsgType;
use kestrel_types::request::{CallTarget, Request};
use kestrel_vm::processors::native_program_hash;
use kestrel_vm::CoreError;
use parity_scale_codec::Encode;
use std::collections::BTreeMap;

fn deploy_counter(cluster: &Cluster, nonce: u64) -> kestrel_types::request::OffLedgerRequest {
    off_ledger(
        &owner_key(),
        cluster.chain_id,
        CallTarget::new("root", "deploy_contract"),
        Dict::new()
            .with("ph", native_program_hash(COUNTER).encode())
            .with("nm", COUNTER),
        nonce,
        DEFAULT_GAS_BUDGET,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_deposit_lands_in_the_block_after_init() {
    let cluster = Cluster::start(4, "");
    let init = cluster.init().await;
    assert_eq!(init.block_index, 1);

    let sender = key(42);
    let req = deposit_request(&cluster.l1, cluster.chain_id, &sender, 1_000_000);
    let id = Request::OnLedger(req.clone()).id();
    cluster.l1.send_request(req);

    let receipt = cluster.receipt(0, id).await;
    assert!(receipt.error.is_none(), "{:?}", receipt.error);
    assert_eq!(receipt.block_index, 2);
    assert_eq!(cluster.anchor_index(), 2);

    let expected = 1_000_000 - receipt.gas_fee_charged;
    assert!(receipt.gas_fee_charged > 0);
    for node in 0..4 {
        eventually("every node committed block 2", || {
            cluster.node(node).solid().index() == Some(2)
        })
        .await;
        assert_eq!(
            cluster.balance(node, &agent_of(&sender)).await.base_tokens,
            expected
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn off_ledger_requests_are_relayed_once_and_never_replayed() {
    let cluster = Cluster::start(4, "");
    cluster.init().await;

    let req = off_ledger(
        &owner_key(),
        cluster.chain_id,
        CallTarget::new("accounts", "deposit"),
        Dict::new(),
        1,
        100_000,
    );
    let node = cluster.node(0);
    let id = node.send_off_ledger(req.clone()).await.unwrap();
    eventually("all peers acknowledged the relay", || {
        node.request_acks(&id) == vec![1, 2, 3]
    })
    .await;

    let receipt = cluster.receipt(0, id).await;
    assert!(receipt.error.is_none(), "{:?}", receipt.error);

    let again = node.send_off_ledger(req.clone()).await;
    assert!(
        matches!(again, Err(ChainError::Mempool(MempoolError::AlreadyProcessed(_)))),
        "{:?}",
        again
    );
    eventually("node 3 committed the request", || {
        cluster.node(3).solid().index() == Some(receipt.block_index)
    })
    .await;
    assert!(matches!(
        cluster.node(3).send_off_ledger(req).await,
        Err(ChainError::Mempool(MempoolError::AlreadyProcessed(_)))
    ));

    let mut forged = off_ledger(
        &key(43),
        cluster.chain_id,
        CallTarget::new("accounts", "deposit"),
        Dict::new(),
        1,
        100_000,
    );
    forged.nonce = 2;
    assert!(matches!(
        node.send_off_ledger(forged).await,
        Err(ChainError::Mempool(MempoolError::InvalidSignature(_)))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_runaway_contract_burns_exactly_its_budget() {
    let cluster = Cluster::start(1, "");
    cluster.init().await;
    let node = cluster.node(0);

    let deploy = node.send_off_ledger(deploy_counter(&cluster, 1)).await.unwrap();
    let deployed = cluster.receipt(0, deploy).await;
    assert!(deployed.error.is_none(), "{:?}", deployed.error);

    let runaway = off_ledger(&owner_key(), cluster.chain_id, CallTarget::new(COUNTER, "loop"), Dict::new(), 2, 10_000);
    let id = node.send_off_ledger(runaway).await.unwrap();
    let receipt = cluster.receipt(0, id).await;
    let error = receipt.error.expect("the loop cannot finish");
    assert_eq!(CoreError::from_code(error.code), Some(CoreError::GasBudgetExceeded));
    assert_eq!(receipt.gas_budget, 10_000);
    assert_eq!(receipt.gas_burned, 10_000);

    // The chain keeps going.
    let inc = off_ledger(&owner_key(), cluster.chain_id, CallTarget::new(COUNTER, "increment"), Dict::new(), 3, 100_000);
    let id = node.send_off_ledger(inc).await.unwrap();
    assert!(cluster.receipt(0, id).await.error.is_none());
    let n: u64 = node
        .call_view(Hname::from_name(COUNTER), Hname::from_name("get"), Dict::new())
        .await
        .unwrap()
        .get_decoded("n")
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_full_block_leaves_the_rest_for_later_blocks() {
    let cluster = Cluster::start(1, "[gas]\nmax_gas_per_block = 500000\nmax_gas_per_request = 200000\n");
    cluster.init().await;
    let node = cluster.node(0);
    let deploy = node.send_off_ledger(deploy_counter(&cluster, 1)).await.unwrap();
    assert!(cluster.receipt(0, deploy).await.error.is_none());

    let mut ids = Vec::new();
    for nonce in 2..52 {
        let req = off_ledger(&owner_key(), cluster.chain_id, CallTarget::new(COUNTER, "loop"), Dict::new(), nonce, 100_000);
        ids.push(node.send_off_ledger(req).await.unwrap());
    }

    let mut per_block: BTreeMap<u32, usize> = BTreeMap::new();
    for id in ids {
        let receipt = cluster.receipt(0, id).await;
        assert_eq!(receipt.gas_burned, 100_000);
        *per_block.entry(receipt.block_index).or_default() += 1;
    }
    assert_eq!(per_block.values().sum::<usize>(), 50);
    assert!(per_block.values().all(|n| *n <= 5), "{:?}", per_block);
    assert!(per_block.len() >= 10);
    assert_eq!(node.status().mempool_size, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rotation_hands_the_chain_to_a_new_controller() {
    let cluster = Cluster::start(4, "");
    cluster.init().await;
    eventually("node 0 is a member", || cluster.node(0).status().consensus.member).await;
    let before = cluster.l1.latest_anchor(&cluster.chain_id).unwrap();

    let target = Address([5; 32]);
    let rotate = off_ledger(
        &owner_key(),
        cluster.chain_id,
        CallTarget::new("governance", "rotate_state_controller"),
        Dict::new().with("a", target.encode()),
        1,
        100_000,
    );
    cluster.node(0).send_off_ledger(rotate).await.unwrap();

    eventually("the anchor changed hands", || {
        cluster
            .l1
            .latest_anchor(&cluster.chain_id)
            .is_some_and(|a| a.output.state_controller == target)
    })
    .await;
    let after = cluster.l1.latest_anchor(&cluster.chain_id).unwrap();
    assert_eq!(after.state_index(), before.state_index());
    assert_eq!(after.output.state_metadata, before.output.state_metadata);

    for node in 0..4 {
        eventually("the old committee steps down", || {
            let status = cluster.node(node).status();
            status.consensus.anchor_id == Some(after.id) && !status.consensus.member
        })
        .await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_restarted_node_catches_up_from_its_peers() {
    let mut cluster = Cluster::start(4, "");
    cluster.init().await;
    cluster.stop_node(1).await;

    let sender = key(42);
    for amount in [300_000, 400_000] {
        let req = deposit_request(&cluster.l1, cluster.chain_id, &sender, amount);
        let id = Request::OnLedger(req.clone()).id();
        cluster.l1.send_request(req);
        assert!(cluster.receipt(0, id).await.error.is_none());
    }
    let target = cluster.anchor_index();
    assert_eq!(target, 3);

    cluster.start_node(1);
    eventually("node 1 is synced", || {
        let state = cluster.node(1).status().state;
        state.solid_index == Some(target) && state.synced
    })
    .await;
    assert!(cluster
        .network
        .delivered(PeerMsgType::Block)
        .iter()
        .any(|(_, to)| *to == 1));
    assert_eq!(
        cluster.balance(1, &agent_of(&sender)).await,
        cluster.balance(0, &agent_of(&sender)).await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_dismissed_chain_refuses_clients() {
    let cluster = Cluster::start(1, "");
    cluster.init().await;
    let node = cluster.node(0);
    node.dismiss("operator request");
    assert_eq!(node.status().dismissed.as_deref(), Some("operator request"));

    let req = off_ledger(&owner_key(), cluster.chain_id, CallTarget::new("accounts", "deposit"), Dict::new(), 1, 100_000);
    assert!(matches!(
        node.send_off_ledger(req).await,
        Err(ChainError::Dismissed(reason)) if reason == "operator request"
    ));
}
