// Path: crates/vm/src/sandbox.rs
//! The sandbox: everything a contract may do while it runs.
//!
//! One [`ExecEnv`] lives for the whole block and carries the state overlay,
//! the transaction builder and the gas meter of the current request. Every
//! contract call gets a [`Sandbox`] that pairs the environment with the call
//! frame: the called contract, the caller, the parameters and the allowance.
//! All capabilities go through the sandbox, so a contract cannot touch the
//! partitions of other contracts or move assets it was not allowed to.

use crate::contracts::{accounts, blob, governance, root, AccountsLoader};
use crate::errors::{CoreError, VmError};
use crate::gas::{BurnCode, GasMeter};
use crate::partition::Partition;
use crate::processors::{EntryKind, Processor, ProcessorRegistry};
use kestrel_api::state::{StateOverlay, StateReader};
use kestrel_tx::AnchorTransactionBuilder;
use kestrel_types::assets::Assets;
use kestrel_types::config::VmLimits;
use kestrel_types::dict::Dict;
use kestrel_types::fee_policy::StorageDepositAssumption;
use kestrel_types::ids::{hash_data, hash_parts, Address, AgentId, ChainId, HashValue, Hname, RequestId};
use kestrel_types::keys::{chain_key, ACCOUNTS_CONTRACT, BLOB_CONTRACT, GOVERNANCE_CONTRACT, ROOT_CONTRACT};
use kestrel_types::ledger::{AnchorOutputWithId, Output};
use kestrel_types::receipt::Event;
use kestrel_types::request::CallTarget;
use parity_scale_codec::Decode;
use std::sync::Arc;

/// Most nested contract calls one request may make.
pub const MAX_CALL_DEPTH: u32 = 16;

/// Block-wide execution environment.
pub(crate) struct ExecEnv<'s> {
    pub state: StateOverlay<'s>,
    pub gas: GasMeter,
    pub processors: &'s ProcessorRegistry,
    pub chain_id: ChainId,
    pub block_index: u32,
    pub timestamp: u64,
    pub entropy: HashValue,
    pub limits: VmLimits,
    pub deposits: StorageDepositAssumption,
    pub txb: Option<AnchorTransactionBuilder>,
    pub request_id: Option<RequestId>,
    pub request_index: u16,
    pub events: Vec<Event>,
    pub posted_outputs: usize,
    pub rotate_to: Option<Address>,
    pub rotation_performed: bool,
}

impl<'s> ExecEnv<'s> {
    pub fn new(
        state: StateOverlay<'s>,
        processors: &'s ProcessorRegistry,
        chain_id: ChainId,
        block_index: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            state,
            gas: GasMeter::new(0),
            processors,
            chain_id,
            block_index,
            timestamp,
            entropy: [0u8; 32],
            limits: VmLimits::default(),
            deposits: StorageDepositAssumption::default(),
            txb: None,
            request_id: None,
            request_index: 0,
            events: Vec::new(),
            posted_outputs: 0,
            rotate_to: None,
            rotation_performed: false,
        }
    }

    /// An unmetered partition of `contract`.
    pub fn partition(&mut self, contract: &str) -> Partition<'_, 's> {
        Partition::unmetered(&mut self.state, Hname::from_name(contract))
    }

    /// Resets the per-request fields before the next request runs.
    pub fn begin_request(&mut self, id: RequestId, index: u16, timestamp: u64, gas_budget: u64) {
        self.gas = GasMeter::new(gas_budget);
        self.request_id = Some(id);
        self.request_index = index;
        self.timestamp = timestamp;
        self.events.clear();
        self.posted_outputs = 0;
        self.rotate_to = None;
    }
}

struct CallFrame {
    contract: Hname,
    caller: AgentId,
    params: Dict,
    allowance: Assets,
    kind: EntryKind,
    depth: u32,
}

/// The capabilities of one contract call.
pub struct Sandbox<'e, 's> {
    env: &'e mut ExecEnv<'s>,
    frame: CallFrame,
}

impl<'e, 's> Sandbox<'e, 's> {
    // --- Call context ---

    /// The call parameters.
    pub fn params(&self) -> &Dict {
        &self.frame.params
    }

    /// Decodes a required parameter.
    pub fn param<T: Decode>(&self, key: &str) -> Result<T, VmError> {
        self.frame
            .params
            .get_decoded(key)
            .map_err(|e| CoreError::InvalidParams.with([format!("{}: {}", key, e)]))
    }

    /// Decodes a parameter if it is present.
    pub fn opt_param<T: Decode>(&self, key: &str) -> Result<Option<T>, VmError> {
        match self.frame.params.get(key) {
            Some(_) => self.param(key).map(Some),
            None => Ok(None),
        }
    }

    /// The raw bytes of a required parameter.
    pub fn param_bytes(&self, key: &str) -> Result<Vec<u8>, VmError> {
        self.frame
            .params
            .get(key)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CoreError::InvalidParams.with([format!("{}: missing", key)]))
    }

    /// A required UTF-8 parameter.
    pub fn param_str(&self, key: &str) -> Result<String, VmError> {
        String::from_utf8(self.param_bytes(key)?)
            .map_err(|_| CoreError::InvalidParams.with([format!("{}: not utf-8", key)]))
    }

    /// The caller of the current entry point.
    pub fn caller(&self) -> AgentId {
        self.frame.caller
    }

    /// The contract being called.
    pub fn contract(&self) -> Hname {
        self.frame.contract
    }

    /// The agent id of the contract being called.
    pub fn contract_agent(&self) -> AgentId {
        AgentId::Contract {
            chain_id: self.env.chain_id,
            hname: self.frame.contract,
        }
    }

    /// The chain id.
    pub fn chain_id(&self) -> ChainId {
        self.env.chain_id
    }

    /// The timestamp of the current request in unix nanoseconds.
    pub fn timestamp(&self) -> u64 {
        self.env.timestamp
    }

    /// The index of the block being produced. Views see the latest committed index.
    pub fn block_index(&self) -> u32 {
        self.env.block_index
    }

    /// Returns `true` if the call may not change state.
    pub fn is_view(&self) -> bool {
        self.frame.kind == EntryKind::View
    }

    /// Per-request entropy derived from the batch entropy.
    pub fn entropy(&mut self) -> Result<HashValue, VmError> {
        self.burn(BurnCode::GetContext, 0)?;
        Ok(hash_parts(&[
            &self.env.entropy,
            &self.env.request_index.to_le_bytes(),
        ]))
    }

    /// The id of the request being executed. `None` in views.
    pub fn request_id(&mut self) -> Result<Option<RequestId>, VmError> {
        self.burn(BurnCode::GetContext, 0)?;
        Ok(self.env.request_id)
    }

    /// What is left of the allowance.
    pub fn allowance(&mut self) -> Result<Assets, VmError> {
        self.burn(BurnCode::GetAllowance, 0)?;
        Ok(self.frame.allowance.clone())
    }

    // --- Gas and state ---

    /// Burns gas.
    pub fn burn(&mut self, code: BurnCode, units: u64) -> Result<(), VmError> {
        self.env.gas.burn(code, units)
    }

    /// Hashes `data`, burning gas per byte.
    pub fn hash(&mut self, data: &[u8]) -> Result<HashValue, VmError> {
        self.burn(BurnCode::Hash, data.len() as u64)?;
        Ok(hash_data(data))
    }

    /// The partition of the called contract. Read-only in views.
    pub fn state(&mut self) -> Partition<'_, 's> {
        let writable = !self.is_view();
        Partition::metered(
            &mut self.env.state,
            &mut self.env.gas,
            self.frame.contract,
            writable,
        )
    }

    /// Emits an event. It is stored with the receipt if the request succeeds.
    pub fn emit_event(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), VmError> {
        self.ensure_full()?;
        let limits = &self.env.limits;
        if self.env.events.len() >= limits.max_events_per_request {
            return Err(CoreError::TooManyEvents.with([limits.max_events_per_request]));
        }
        if payload.len() > limits.max_event_size {
            return Err(CoreError::EventTooLarge.with([payload.len(), limits.max_event_size]));
        }
        self.burn(BurnCode::EmitEvent, payload.len() as u64)?;
        self.env.events.push(Event {
            contract: self.frame.contract,
            topic: topic.to_string(),
            payload,
            timestamp: self.env.timestamp,
        });
        Ok(())
    }

    // --- Assets ---

    /// The L2 balance of `agent`.
    pub fn balance(&mut self, agent: &AgentId) -> Result<Assets, VmError> {
        self.burn(BurnCode::GetBalance, 0)?;
        accounts::balance(&mut self.accounts(), agent)
    }

    /// Moves `assets` from the caller to `target`, spending the allowance.
    pub fn transfer_allowance_to(&mut self, target: &AgentId, assets: &Assets) -> Result<(), VmError> {
        self.ensure_full()?;
        self.burn(BurnCode::TransferAllowance, 0)?;
        self.spend_allowance(assets)?;
        let caller = self.frame.caller;
        accounts::move_assets(&mut self.accounts(), &caller, target, assets)
    }

    /// Moves the whole allowance into the called contract's account.
    pub fn take_allowance(&mut self) -> Result<Assets, VmError> {
        let assets = self.frame.allowance.clone();
        let me = self.contract_agent();
        self.transfer_allowance_to(&me, &assets)?;
        Ok(assets)
    }

    /// Posts an output to L1, paid from the called contract's account.
    pub fn send(&mut self, output: Output) -> Result<(), VmError> {
        let me = self.contract_agent();
        self.post_output(me, output)
    }

    // --- Calls and authorization ---

    /// Calls another contract. The caller of the nested call is this contract.
    pub fn call(
        &mut self,
        contract: Hname,
        entry_point: Hname,
        params: Dict,
        allowance: Assets,
    ) -> Result<Dict, VmError> {
        self.burn(BurnCode::CallContract, 0)?;
        let caller = self.contract_agent();
        dispatch(
            self.env,
            CallTarget {
                contract,
                entry_point,
            },
            caller,
            params,
            allowance,
            self.frame.depth + 1,
            self.is_view(),
        )
    }

    /// Fails with `Unauthorized` unless the caller is `agent`.
    pub fn require_caller(&self, agent: &AgentId) -> Result<(), VmError> {
        if &self.frame.caller == agent {
            Ok(())
        } else {
            Err(CoreError::Unauthorized.err())
        }
    }

    /// The chain owner.
    pub fn chain_owner(&mut self) -> Result<AgentId, VmError> {
        governance::chain_owner(&mut self.env.partition(GOVERNANCE_CONTRACT))
    }

    /// Fails with `Unauthorized` unless the caller owns the chain.
    pub fn require_chain_owner(&mut self) -> Result<(), VmError> {
        let owner = self.chain_owner()?;
        self.require_caller(&owner)
    }

    // --- Core contract internals ---

    pub(crate) fn ensure_full(&self) -> Result<(), VmError> {
        if self.is_view() {
            Err(CoreError::ReadOnlyState.err())
        } else {
            Ok(())
        }
    }

    pub(crate) fn partition(&mut self, contract: &str) -> Partition<'_, 's> {
        self.env.partition(contract)
    }

    /// A chain-level value maintained by the state layer.
    pub(crate) fn chain_value(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, VmError> {
        Ok(self.env.state.get(&chain_key(key))?)
    }

    pub(crate) fn accounts(&mut self) -> Partition<'_, 's> {
        self.env.partition(ACCOUNTS_CONTRACT)
    }

    pub(crate) fn processors(&self) -> &'s ProcessorRegistry {
        self.env.processors
    }

    pub(crate) fn deposits(&self) -> StorageDepositAssumption {
        self.env.deposits
    }

    pub(crate) fn spend_allowance(&mut self, assets: &Assets) -> Result<(), VmError> {
        if self.frame.allowance.spend_from_budget(assets) {
            Ok(())
        } else {
            Err(CoreError::NotEnoughFunds.with(["allowance"]))
        }
    }

    /// The transaction builder and a loader over the current state.
    pub(crate) fn txb(&mut self) -> Result<(&mut AnchorTransactionBuilder, AccountsLoader<'_>), VmError> {
        let ExecEnv { txb, state, .. } = &mut *self.env;
        let txb = txb.as_mut().ok_or_else(|| CoreError::ReadOnlyState.err())?;
        Ok((txb, AccountsLoader::new(&*state)))
    }

    /// Settles a storage-deposit adjustment of the transaction builder on `agent`.
    pub(crate) fn settle_deposit(&mut self, agent: &AgentId, adjustment: i64) -> Result<(), VmError> {
        let agent = accounts::payer(self.env.chain_id, agent);
        accounts::settle_deposit(&mut self.accounts(), &agent, adjustment)
    }

    /// Posts `output` to L1, debiting its assets from `from`.
    pub(crate) fn post_output(&mut self, from: AgentId, output: Output) -> Result<(), VmError> {
        self.ensure_full()?;
        self.burn(BurnCode::SendOutput, 0)?;
        let max = self.env.limits.max_posted_outputs_in_one_request;
        if self.env.posted_outputs >= max {
            return Err(CoreError::ExceededPostedOutputLimit.with([max]));
        }
        accounts::debit_or_fail(&mut self.accounts(), &from, &output.assets())?;
        let adjustment = {
            let (txb, loader) = self.txb()?;
            txb.add_output(output, &loader)?
        };
        self.settle_deposit(&from, adjustment)?;
        self.env.posted_outputs += 1;
        Ok(())
    }

    pub(crate) fn anchor(&self) -> Option<&AnchorOutputWithId> {
        self.env.txb.as_ref().map(|t| t.anchor())
    }

    pub(crate) fn request_rotation(&mut self, address: Address) {
        self.env.rotate_to = Some(address);
    }

    pub(crate) fn rotation_performed(&self) -> bool {
        self.env.rotation_performed
    }

    /// Calls `init` of a freshly deployed contract on behalf of the deployer.
    pub(crate) fn call_init(&mut self, contract: Hname, params: Dict) -> Result<Dict, VmError> {
        let caller = self.frame.caller;
        dispatch(
            self.env,
            CallTarget {
                contract,
                entry_point: Hname::from_name("init"),
            },
            caller,
            params,
            Assets::default(),
            self.frame.depth + 1,
            false,
        )
    }
}

/// Finds the processor behind `contract`.
fn resolve(env: &mut ExecEnv<'_>, contract: Hname) -> Result<Arc<dyn Processor>, VmError> {
    if let Some(p) = env.processors.core(contract) {
        return Ok(p);
    }
    let record = root::find_contract(&mut env.partition(ROOT_CONTRACT), contract)?
        .ok_or_else(|| CoreError::ContractNotFound.with([contract]))?;
    if let Some(p) = env.processors.by_program_hash(&record.program_hash) {
        return Ok(p);
    }
    blob::native_program_name(&mut env.partition(BLOB_CONTRACT), &record.program_hash)?
        .and_then(|name| env.processors.by_name(&name))
        .ok_or_else(|| CoreError::ContractNotFound.with([contract]))
}

/// Runs one entry point.
pub(crate) fn dispatch(
    env: &mut ExecEnv<'_>,
    target: CallTarget,
    caller: AgentId,
    params: Dict,
    allowance: Assets,
    depth: u32,
    view_only: bool,
) -> Result<Dict, VmError> {
    if depth > MAX_CALL_DEPTH {
        return Err(CoreError::CallDepthExceeded.with([MAX_CALL_DEPTH]));
    }
    let processor = resolve(env, target.contract)?;
    let ep = processor
        .find(target.entry_point)
        .ok_or_else(|| CoreError::EntryPointNotFound.with([target.entry_point]))?;
    if view_only && ep.kind == EntryKind::Full {
        return Err(CoreError::NotAView.with([ep.name]));
    }
    tracing::trace!(
        target: "vm",
        contract = %target.contract,
        entry_point = ep.name,
        depth,
        "call"
    );
    let mut sandbox = Sandbox {
        env,
        frame: CallFrame {
            contract: target.contract,
            caller,
            params,
            allowance,
            kind: ep.kind,
            depth,
        },
    };
    processor.call(&mut sandbox, ep.name)
}

