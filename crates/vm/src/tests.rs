// Path: crates/vm/src/tests.rs
//! Batch-level tests: whole VM tasks run over an origin state.

use crate::partition::{load, save};
use crate::{
    call_view, run_task, BurnCode, CoreError, EntryPoint, Processor, ProcessorRegistry, Sandbox,
    VmError, VmOutput, VmTask, VmTaskResult,
};
use ed25519_dalek::SigningKey;
use kestrel_state::VirtualState;
use kestrel_types::assets::Assets;
use kestrel_types::config::{GasLimits, RentStructure, VmLimits};
use kestrel_types::dict::Dict;
use kestrel_types::fee_policy::GasFeePolicy;
use kestrel_types::ids::{
    Address, AgentId, ChainId, HashValue, Hname, L1Address, OutputId, RequestId, TransactionId,
};
use kestrel_types::ledger::{
    AnchorOutput, AnchorOutputWithId, BasicOutput, Expiration, Output, Transaction,
};
use kestrel_types::receipt::Event;
use kestrel_types::request::{
    CallTarget, OffLedgerRequest, OnLedgerRequest, Request, RequestMetadata, RequestOutput,
};
use parity_scale_codec::Encode;
use std::sync::Arc;

const COUNTER_ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::full("increment"),
    EntryPoint::full("fail_after_write"),
    EntryPoint::full("spin"),
    EntryPoint::full("boom"),
    EntryPoint::view("get"),
];

struct Counter;

impl Processor for Counter {
    fn entry_points(&self) -> &[EntryPoint] {
        COUNTER_ENTRY_POINTS
    }

    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError> {
        match entry_point {
            "increment" => {
                let n = load::<u64>(&mut ctx.state(), b"n")?.unwrap_or(0) + 1;
                save(&mut ctx.state(), b"n", &n)?;
                ctx.emit_event("incremented", n.encode())?;
                Ok(Dict::new().with("n", n.encode()))
            }
            "fail_after_write" => {
                save(&mut ctx.state(), b"n", &999u64)?;
                Err(CoreError::InvalidParams.with(["intentional"]))
            }
            "spin" => loop {
                ctx.burn(BurnCode::Compute, 1_000)?;
            },
            "boom" => panic!("boom"),
            "get" => {
                let n = load::<u64>(&mut ctx.state(), b"n")?.unwrap_or(0);
                Ok(Dict::new().with("n", n.encode()))
            }
            _ => Err(CoreError::EntryPointNotFound.with([entry_point])),
        }
    }
}

const T0: u64 = 1_000;
const ORIGIN_FUNDS: u64 = 1_000_000;
// Anchor deposit under the default rent structure.
const ANCHOR_DEPOSIT: u64 = 21_200;

fn chain() -> ChainId {
    ChainId([1; 32])
}

fn owner_key() -> SigningKey {
    SigningKey::from_bytes(&[7; 32])
}

fn stranger_key() -> SigningKey {
    SigningKey::from_bytes(&[8; 32])
}

fn address_of(key: &SigningKey) -> Address {
    Address::from_public_key(&key.verifying_key())
}

fn owner() -> AgentId {
    AgentId::Address(address_of(&owner_key()))
}

fn registry() -> (Arc<ProcessorRegistry>, HashValue) {
    let mut registry = ProcessorRegistry::new();
    let hash = registry.register_native("counter", Arc::new(Counter));
    (Arc::new(registry), hash)
}

fn origin_task(requests: Vec<Request>) -> VmTask {
    let state = VirtualState::origin(&chain());
    let anchor = AnchorOutputWithId {
        output: AnchorOutput {
            chain_id: chain(),
            amount: ORIGIN_FUNDS,
            state_index: 0,
            state_metadata: state.l1_commitment().to_bytes(),
            foundry_counter: 0,
            state_controller: Address([2; 32]),
            governor: Address([3; 32]),
        },
        id: OutputId::new(TransactionId([9; 32]), 0),
        timestamp: 0,
    };
    VmTask {
        processors: registry().0,
        anchor,
        state,
        baseline: None,
        requests,
        timestamp: T0,
        entropy: [5; 32],
        validator_fee_target: AgentId::Nil,
        gas_limits: GasLimits::default(),
        vm_limits: VmLimits::default(),
        rent: RentStructure::default(),
    }
}

/// The task of the block after `result`.
fn next_task(prev: &VmTask, result: &VmTaskResult, requests: Vec<Request>) -> VmTask {
    let VmOutput::Block { state, essence, .. } = &result.output else {
        panic!("expected a block, got {:?}", result.output);
    };
    let tx = Transaction {
        essence: essence.clone(),
        signature: Vec::new(),
    };
    VmTask {
        anchor: tx.anchor_output().unwrap(),
        state: state.clone(),
        requests,
        timestamp: prev.timestamp + 1_000,
        ..prev.clone()
    }
}

fn on_ledger(
    seed: u8,
    sender: Option<Address>,
    amount: u64,
    target: CallTarget,
    params: Dict,
) -> OnLedgerRequest {
    OnLedgerRequest {
        output_id: OutputId::new(TransactionId([seed; 32]), 0),
        output: RequestOutput::Basic(BasicOutput {
            sender: sender.map(L1Address::Ed25519),
            metadata: Some(RequestMetadata {
                sender_contract: Hname(0),
                target,
                params,
                allowance: Assets::default(),
                gas_budget: 1_000_000,
            }),
            ..BasicOutput::new(L1Address::Chain(chain()), amount)
        }),
    }
}

fn init_with(params: Dict) -> Request {
    Request::OnLedger(on_ledger(
        20,
        Some(address_of(&owner_key())),
        0,
        CallTarget::new("root", "init"),
        params,
    ))
}

fn init() -> Request {
    init_with(Dict::new())
}

fn off_ledger(key: &SigningKey, target: CallTarget, params: Dict, nonce: u64, budget: u64) -> Request {
    Request::OffLedger(OffLedgerRequest::new(chain(), target, params, nonce, budget).sign(key))
}

fn deploy(hash: HashValue, nonce: u64) -> Request {
    off_ledger(
        &owner_key(),
        CallTarget::new("root", "deploy_contract"),
        Dict::new().with("ph", hash.encode()).with("nm", "counter"),
        nonce,
        1_000_000,
    )
}

fn counter(ep: &str, nonce: u64, budget: u64) -> Request {
    off_ledger(&owner_key(), CallTarget::new("counter", ep), Dict::new(), nonce, budget)
}

fn view(task: &VmTask, state: &VirtualState, contract: &str, ep: &str, params: Dict) -> Result<Dict, VmError> {
    call_view(
        state,
        &task.processors,
        CallTarget::new(contract, ep),
        params,
        1_000_000,
    )
}

fn balance(task: &VmTask, state: &VirtualState, agent: &AgentId) -> Assets {
    view(task, state, "accounts", "balance", Dict::new().with("a", agent.encode()))
        .unwrap()
        .get_decoded("a")
        .unwrap()
}

fn block_state(result: &VmTaskResult) -> &VirtualState {
    match &result.output {
        VmOutput::Block { state, .. } => state,
        other => panic!("expected a block, got {:?}", other),
    }
}

fn error_of(result: &VmTaskResult, index: usize) -> Option<CoreError> {
    result.receipts[index]
        .error
        .as_ref()
        .map(|e| CoreError::from_code(e.code).unwrap())
}

#[test]
fn init_deploy_and_call_in_one_block() {
    let hash = registry().1;
    let increment = counter("increment", 2, 1_000_000);
    let task = origin_task(vec![init(), deploy(hash, 1), increment.clone()]);
    let result = run_task(&task).unwrap();

    assert_eq!(result.processed.len(), 3);
    assert!(result.receipts.iter().all(|r| r.error.is_none()));
    let VmOutput::Block { block, state, essence } = &result.output else {
        panic!("expected a block");
    };
    assert_eq!(block.block_index, 1);
    assert_eq!(state.block_index().unwrap(), 1);
    match essence.outputs.first() {
        Some(Output::Anchor(a)) => {
            assert_eq!(a.amount, ORIGIN_FUNDS);
            assert_eq!(a.state_index, 1);
            assert_eq!(a.l1_commitment().unwrap(), state.l1_commitment());
        }
        other => panic!("expected the anchor first, got {:?}", other),
    }

    let n: u64 = view(&task, state, "counter", "get", Dict::new())
        .unwrap()
        .get_decoded("n")
        .unwrap();
    assert_eq!(n, 1);
    // The owner pays its own fees to itself.
    assert_eq!(
        balance(&task, state, &owner()).base_tokens,
        ORIGIN_FUNDS - ANCHOR_DEPOSIT
    );

    let events: Vec<Event> = view(
        &task,
        state,
        "blocklog",
        "get_events_for_request",
        Dict::new().with("r", increment.id().encode()),
    )
    .unwrap()
    .get_decoded("e")
    .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, "incremented");
    assert_eq!(events[0].timestamp, T0 + 2);
}

#[test]
fn failed_requests_roll_back_but_pay() {
    let hash = registry().1;
    let task = origin_task(vec![
        init(),
        deploy(hash, 1),
        counter("increment", 2, 1_000_000),
        counter("fail_after_write", 3, 1_000_000),
    ]);
    let result = run_task(&task).unwrap();
    assert_eq!(result.processed.len(), 4);
    assert_eq!(error_of(&result, 3), Some(CoreError::InvalidParams));
    assert!(result.receipts[3].gas_fee_charged > 0);

    let state = block_state(&result);
    let n: u64 = view(&task, state, "counter", "get", Dict::new())
        .unwrap()
        .get_decoded("n")
        .unwrap();
    assert_eq!(n, 1);
}

#[test]
fn running_out_of_gas_burns_the_whole_budget() {
    let hash = registry().1;
    let task = origin_task(vec![init(), deploy(hash, 1), counter("spin", 2, 50_000)]);
    let result = run_task(&task).unwrap();
    let receipt = &result.receipts[2];
    assert_eq!(error_of(&result, 2), Some(CoreError::GasBudgetExceeded));
    assert_eq!(receipt.gas_budget, 50_000);
    assert_eq!(receipt.gas_burned, 50_000);
    assert_eq!(receipt.gas_fee_charged, 500);
    let (_, log) = &result.burn_logs[2];
    assert_eq!(log.total(), 50_000);
}

#[test]
fn full_blocks_leave_the_rest_for_later() {
    let hash = registry().1;
    let squeezed = counter("spin", 4, 100_000);
    let increment = counter("increment", 5, 100_000);
    let mut task = origin_task(vec![
        init(),
        deploy(hash, 1),
        counter("spin", 2, 100_000),
        counter("spin", 3, 100_000),
        squeezed,
        increment.clone(),
    ]);
    task.gas_limits = GasLimits {
        max_gas_per_block: 300_000,
        max_gas_per_request: 100_000,
        ..GasLimits::default()
    };
    let result = run_task(&task).unwrap();
    assert_eq!(result.processed.len(), 5);
    assert_eq!(result.unprocessed, vec![increment.id()]);
    assert!(matches!(result.output, VmOutput::Block { .. }));

    // The last spin only gets what the block has left.
    let last = &result.receipts[4];
    assert!(last.gas_budget < 100_000, "{}", last.gas_budget);
    assert_eq!(last.gas_burned, last.gas_budget);
    assert_eq!(error_of(&result, 4), Some(CoreError::GasBudgetExceeded));
    let total: u64 = result.receipts.iter().map(|r| r.gas_burned).sum();
    assert_eq!(total, 300_000);
}

#[test]
fn requests_wait_for_the_chain_to_be_initialized() {
    let req = counter("increment", 1, 1_000_000);
    let result = run_task(&origin_task(vec![req.clone()])).unwrap();
    assert!(matches!(result.output, VmOutput::Empty));
    assert_eq!(result.unprocessed, vec![req.id()]);
    assert!(result.receipts.is_empty());
}

#[test]
fn rotation_replaces_the_block() {
    let first = origin_task(vec![init()]);
    let r1 = run_task(&first).unwrap();

    let before = off_ledger(&owner_key(), CallTarget::new("accounts", "deposit"), Dict::new(), 1, 100_000);
    let rotate = off_ledger(
        &owner_key(),
        CallTarget::new("governance", "rotate_state_controller"),
        Dict::new().with("a", Address([5; 32]).encode()),
        2,
        100_000,
    );
    let after = off_ledger(&owner_key(), CallTarget::new("accounts", "deposit"), Dict::new(), 3, 100_000);
    let second = next_task(&first, &r1, vec![before.clone(), rotate.clone(), after.clone()]);
    let r2 = run_task(&second).unwrap();

    let VmOutput::Rotation { address, essence } = &r2.output else {
        panic!("expected a rotation, got {:?}", r2.output);
    };
    assert_eq!(*address, Address([5; 32]));
    assert_eq!(r2.processed, vec![rotate.id()]);
    assert!(r2.receipts.is_empty());
    assert!(r2.unprocessed.contains(&before.id()));
    assert!(r2.unprocessed.contains(&after.id()));
    match essence.outputs.first() {
        Some(Output::Anchor(a)) => {
            assert_eq!(a.state_controller, Address([5; 32]));
            assert_eq!(a.state_index, second.anchor.state_index());
            assert_eq!(a.state_metadata, second.anchor.output.state_metadata);
        }
        other => panic!("expected the anchor first, got {:?}", other),
    }
}

#[test]
fn rotating_to_the_current_controller_does_nothing() {
    let first = origin_task(vec![init()]);
    let r1 = run_task(&first).unwrap();
    let rotate = off_ledger(
        &owner_key(),
        CallTarget::new("governance", "rotate_state_controller"),
        Dict::new().with("a", Address([2; 32]).encode()),
        1,
        100_000,
    );
    let r2 = run_task(&next_task(&first, &r1, vec![rotate])).unwrap();
    assert!(matches!(r2.output, VmOutput::Block { .. }));
    assert_eq!(error_of(&r2, 0), None);
}

#[test]
fn one_rotation_per_state_index() {
    let first = origin_task(vec![init()]);
    let r1 = run_task(&first).unwrap();
    let rotate = off_ledger(
        &owner_key(),
        CallTarget::new("governance", "rotate_state_controller"),
        Dict::new().with("a", Address([8; 32]).encode()),
        1,
        100_000,
    );
    let mut second = next_task(&first, &r1, vec![rotate]);
    // The anchor arrives already rotated away from the recorded controller.
    second.anchor.output.state_controller = Address([6; 32]);
    let r2 = run_task(&second).unwrap();
    assert!(matches!(r2.output, VmOutput::Block { .. }));
    assert_eq!(error_of(&r2, 0), Some(CoreError::RotationAlreadyPerformed));
}

#[test]
fn stale_and_replayed_nonces_are_rejected() {
    let first = origin_task(vec![init()]);
    let r1 = run_task(&first).unwrap();
    let deposit = |nonce| {
        off_ledger(&owner_key(), CallTarget::new("accounts", "deposit"), Dict::new(), nonce, 100_000)
    };
    let high = deposit(20_000);
    let second = next_task(&first, &r1, vec![high.clone()]);
    let r2 = run_task(&second).unwrap();
    assert_eq!(r2.processed, vec![high.id()]);

    let stale = deposit(5_000);
    let fresh = deposit(15_000);
    let third = next_task(&second, &r2, vec![high.clone(), stale.clone(), fresh.clone()]);
    let r3 = run_task(&third).unwrap();
    assert_eq!(r3.rejected, vec![high.id(), stale.id()]);
    assert_eq!(r3.processed, vec![fresh.id()]);
}

#[test]
fn fees_are_split_with_the_validator() {
    let hash = registry().1;
    let policy = GasFeePolicy {
        validator_fee_share: 20,
        ..GasFeePolicy::default()
    };
    let mut task = origin_task(vec![
        init_with(Dict::new().with("g", policy.to_bytes())),
        deploy(hash, 1),
    ]);
    let validator = AgentId::Address(Address([4; 32]));
    task.validator_fee_target = validator;
    let result = run_task(&task).unwrap();
    let fee = result.receipts[1].gas_fee_charged;
    assert!(fee >= 100);
    let validator_share = fee * 20 / 100;

    let state = block_state(&result);
    assert_eq!(balance(&task, state, &validator).base_tokens, validator_share);
    assert_eq!(
        balance(&task, state, &owner()).base_tokens,
        ORIGIN_FUNDS - ANCHOR_DEPOSIT - validator_share
    );
}

#[test]
fn senders_without_funds_cannot_pay() {
    let stranger = off_ledger(
        &stranger_key(),
        CallTarget::new("accounts", "deposit"),
        Dict::new(),
        1,
        100_000,
    );
    let result = run_task(&origin_task(vec![init(), stranger])).unwrap();
    assert_eq!(error_of(&result, 1), Some(CoreError::NotEnoughFeesToPay));
    assert_eq!(result.receipts[1].gas_fee_charged, 0);
}

#[test]
fn on_ledger_deposits_credit_the_sender() {
    let stranger = address_of(&stranger_key());
    let deposit = Request::OnLedger(on_ledger(
        21,
        Some(stranger),
        50_000,
        CallTarget::new("accounts", "deposit"),
        Dict::new(),
    ));
    let task = origin_task(vec![init(), deposit]);
    let result = run_task(&task).unwrap();
    assert_eq!(error_of(&result, 1), None);
    assert_eq!(result.receipts[1].gas_fee_charged, 100);

    let VmOutput::Block { state, essence, .. } = &result.output else {
        panic!("expected a block");
    };
    assert_eq!(
        balance(&task, state, &AgentId::Address(stranger)).base_tokens,
        49_900
    );
    match essence.outputs.first() {
        Some(Output::Anchor(a)) => assert_eq!(a.amount, ORIGIN_FUNDS + 50_000),
        other => panic!("expected the anchor first, got {:?}", other),
    }
}

#[test]
fn time_locks_defer_and_expirations_reject() {
    let mut locked = on_ledger(22, None, 1_000, CallTarget::new("accounts", "deposit"), Dict::new());
    if let RequestOutput::Basic(o) = &mut locked.output {
        o.timelock = Some(u64::MAX);
    }
    let mut expired = on_ledger(23, None, 1_000, CallTarget::new("accounts", "deposit"), Dict::new());
    if let RequestOutput::Basic(o) = &mut expired.output {
        o.expiration = Some(Expiration {
            return_address: L1Address::Ed25519(Address([1; 32])),
            time: T0 / 2,
        });
    }
    let locked = Request::OnLedger(locked);
    let expired = Request::OnLedger(expired);
    let result = run_task(&origin_task(vec![init(), locked.clone(), expired.clone()])).unwrap();
    assert_eq!(result.unprocessed, vec![locked.id()]);
    assert_eq!(result.rejected, vec![expired.id()]);
}

#[test]
fn panics_fail_only_their_request() {
    let hash = registry().1;
    let task = origin_task(vec![
        init(),
        deploy(hash, 1),
        counter("boom", 2, 1_000_000),
        counter("increment", 3, 1_000_000),
    ]);
    let result = run_task(&task).unwrap();
    assert_eq!(error_of(&result, 2), Some(CoreError::Panic));
    assert_eq!(error_of(&result, 3), None);
}

#[test]
fn changed_rent_aborts_the_batch() {
    let first = origin_task(vec![init()]);
    let r1 = run_task(&first).unwrap();
    let mut second = next_task(&first, &r1, vec![counter("increment", 1, 100_000)]);
    second.rent = RentStructure {
        v_byte_cost: 200,
        ..RentStructure::default()
    };
    assert!(matches!(
        run_task(&second),
        Err(VmError::InconsistentStorageDepositAssumptions(_))
    ));
}

#[test]
fn mismatched_anchor_aborts_the_batch() {
    let mut task = origin_task(vec![init()]);
    task.anchor.output.state_index = 3;
    assert!(matches!(run_task(&task), Err(VmError::StateMismatch(_))));
}

#[test]
fn views_cannot_call_full_entry_points() {
    let hash = registry().1;
    let task = origin_task(vec![init(), deploy(hash, 1)]);
    let result = run_task(&task).unwrap();
    let err = view(&task, block_state(&result), "counter", "increment", Dict::new()).unwrap_err();
    assert!(CoreError::NotAView.matches(err.as_request().unwrap()));
    let receipt: Dict = view(
        &task,
        block_state(&result),
        "blocklog",
        "is_request_processed",
        Dict::new().with("r", RequestId::default().encode()),
    )
    .unwrap();
    assert!(!receipt.get_decoded::<bool>("p").unwrap());
}
