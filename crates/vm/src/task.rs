// Path: crates/vm/src/task.rs
//! A VM task: one batch of requests on top of one state and anchor.

use crate::context::{BlockContext, BlockParams, Step};
use crate::errors::VmError;
use crate::gas::BurnLog;
use crate::processors::ProcessorRegistry;
use kestrel_api::state::StateReader;
use kestrel_state::{Baseline, OptimisticReader, VirtualState};
use kestrel_types::block::Block;
use kestrel_types::config::{GasLimits, RentStructure, VmLimits};
use kestrel_types::ids::{Address, AgentId, HashValue, RequestId};
use kestrel_types::ledger::{AnchorOutputWithId, TransactionEssence};
use kestrel_types::receipt::RequestReceipt;
use kestrel_types::request::Request;
use std::sync::Arc;

/// Everything the VM needs to run a batch.
#[derive(Clone)]
pub struct VmTask {
    /// The contract processors of the chain.
    pub processors: Arc<ProcessorRegistry>,
    /// The anchor output the batch consumes.
    pub anchor: AnchorOutputWithId,
    /// The state the anchor commits to.
    pub state: VirtualState,
    /// Makes reads fail once the state manager moves on. `None` reads directly.
    pub baseline: Option<Baseline>,
    /// The requests, in execution order.
    pub requests: Vec<Request>,
    /// The batch timestamp in unix nanoseconds.
    pub timestamp: u64,
    /// Entropy agreed by the committee.
    pub entropy: HashValue,
    /// Receives the validator share of gas fees. `Nil` sends it to the chain owner.
    pub validator_fee_target: AgentId,
    /// Gas limits.
    pub gas_limits: GasLimits,
    /// Per-request limits.
    pub vm_limits: VmLimits,
    /// The rent structure of L1.
    pub rent: RentStructure,
}

/// What a batch produced.
#[derive(Debug, Clone)]
pub enum VmOutput {
    /// A new block and the transaction anchoring it.
    Block {
        /// The block.
        block: Block,
        /// The state after the block.
        state: VirtualState,
        /// The anchor transaction essence.
        essence: TransactionEssence,
    },
    /// A transaction handing the anchor to a new state controller. No block.
    Rotation {
        /// The new state controller.
        address: Address,
        /// The rotation transaction essence.
        essence: TransactionEssence,
    },
    /// No request could be processed.
    Empty,
}

/// The result of a batch.
#[derive(Debug, Clone)]
pub struct VmTaskResult {
    /// What the batch produced.
    pub output: VmOutput,
    /// Receipts of the processed requests.
    pub receipts: Vec<RequestReceipt>,
    /// Gas burned per code, per processed request.
    pub burn_logs: Vec<(RequestId, BurnLog)>,
    /// Requests that made it into the block.
    pub processed: Vec<RequestId>,
    /// Requests left for a later batch.
    pub unprocessed: Vec<RequestId>,
    /// Requests that can never be processed.
    pub rejected: Vec<RequestId>,
}

/// Runs a batch.
///
/// Fails only when the batch as a whole cannot run: the anchor does not match
/// the state, the state went stale under an optimistic read, or the chain's
/// storage deposit assumptions no longer hold.
pub fn run_task(task: &VmTask) -> Result<VmTaskResult, VmError> {
    let chain_id = task.state.chain_id()?;
    if chain_id != task.anchor.output.chain_id {
        return Err(VmError::StateMismatch(format!(
            "anchor of chain {}, state of chain {}",
            task.anchor.output.chain_id, chain_id
        )));
    }
    let state_index = task.state.block_index()?;
    if state_index != task.anchor.state_index() {
        return Err(VmError::StateMismatch(format!(
            "anchor at index {}, state at index {}",
            task.anchor.state_index(),
            state_index
        )));
    }
    let committed = task
        .anchor
        .output
        .l1_commitment()
        .map_err(|e| VmError::StateMismatch(e.to_string()))?;
    if committed != task.state.l1_commitment() {
        return Err(VmError::StateMismatch(format!(
            "anchor commits to {}, state is {}",
            committed,
            task.state.l1_commitment()
        )));
    }

    let optimistic = task
        .baseline
        .clone()
        .map(|b| OptimisticReader::new(&task.state, b));
    let reader: &dyn StateReader = match &optimistic {
        Some(r) => r,
        None => &task.state,
    };

    let block_index = state_index + 1;
    tracing::debug!(
        target: "vm",
        block_index,
        requests = task.requests.len(),
        "running batch"
    );
    let mut ctx = BlockContext::open(
        reader,
        &task.processors,
        BlockParams {
            anchor: task.anchor.clone(),
            block_index,
            timestamp: task.timestamp,
            entropy: task.entropy,
            validator_fee_target: task.validator_fee_target,
            gas_limits: task.gas_limits.clone(),
            vm_limits: task.vm_limits.clone(),
            rent: task.rent,
        },
    )?;

    let mut processed = Vec::new();
    let mut unprocessed = Vec::new();
    let mut rejected = Vec::new();
    let mut rotation = None;
    let mut requests = task.requests.iter();
    for req in requests.by_ref() {
        let id = req.id();
        match ctx.run_request(req)? {
            Step::Processed => processed.push(id),
            Step::Unprocessed => unprocessed.push(id),
            Step::Rejected => rejected.push(id),
            Step::BlockFull => {
                unprocessed.push(id);
                break;
            }
            Step::Rotation(address) => {
                rotation = Some((id, address));
                break;
            }
        }
    }
    unprocessed.extend(requests.map(Request::id));

    let burn_logs = ctx.take_burn_logs();
    if let Some((id, address)) = rotation {
        // The rotation replaces the block: everything else runs again later.
        unprocessed.extend(processed.drain(..).filter(|p| *p != id));
        let essence = ctx.rotate(address)?;
        return Ok(VmTaskResult {
            output: VmOutput::Rotation { address, essence },
            receipts: Vec::new(),
            burn_logs,
            processed: vec![id],
            unprocessed,
            rejected,
        });
    }

    let receipts = ctx.receipts().to_vec();
    let output = match ctx.close(&task.state)? {
        Some((block, state, essence)) => VmOutput::Block {
            block,
            state,
            essence,
        },
        None => VmOutput::Empty,
    };
    Ok(VmTaskResult {
        output,
        receipts,
        burn_logs,
        processed,
        unprocessed,
        rejected,
    })
}
