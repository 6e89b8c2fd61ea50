// Path: crates/vm/src/context.rs
//! The block context: opens a block on top of a state, runs requests one by
//! one and closes the block into a sealed block plus its anchor transaction.

use crate::contracts::{accounts, blocklog, governance, root, AccountsLoader};
use crate::errors::{CoreError, VmError};
use crate::gas::{BurnCode, BurnLog};
use crate::partition::Partition;
use crate::processors::ProcessorRegistry;
use crate::sandbox::{dispatch, ExecEnv};
use kestrel_api::state::{StateOverlay, StateReader};
use kestrel_state::VirtualState;
use kestrel_tx::{build_rotation_essence, AnchorTransactionBuilder, BuildError};
use kestrel_types::assets::Assets;
use kestrel_types::block::Block;
use kestrel_types::block_info::{BlockInfo, ControlAddresses};
use kestrel_types::config::{GasLimits, RentStructure, VmLimits};
use kestrel_types::error::{BlockError, TxBuilderError};
use kestrel_types::fee_policy::GasFeePolicy;
use kestrel_types::ids::{Address, AgentId, HashValue, Hname, RequestId};
use kestrel_types::keys::{ACCOUNTS_CONTRACT, BLOCKLOG_CONTRACT, GOVERNANCE_CONTRACT, ROOT_CONTRACT};
use kestrel_types::ledger::{AnchorOutputWithId, TransactionEssence};
use kestrel_types::receipt::{RequestReceipt, UnresolvedVmError};
use kestrel_types::request::{CallTarget, Request};
use kestrel_types::U256;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Executed, successfully or not. It has a receipt.
    Processed,
    /// Left for a later batch.
    Unprocessed,
    /// Can never be processed.
    Rejected,
    /// Does not fit the block's gas. Neither it nor later requests run.
    BlockFull,
    /// Executed and asked to rotate the state controller.
    Rotation(Address),
}

/// A block being produced.
pub(crate) struct BlockContext<'s> {
    env: ExecEnv<'s>,
    anchor: AnchorOutputWithId,
    gas_limits: GasLimits,
    validator_fee_target: AgentId,
    base_timestamp: u64,
    initialized: bool,
    block_gas: u64,
    block_fees: u64,
    num_successful: u16,
    num_off_ledger: u16,
    last_timestamp: u64,
    receipts: Vec<RequestReceipt>,
    burn_logs: Vec<(RequestId, BurnLog)>,
}

/// The parameters of a block.
pub(crate) struct BlockParams {
    pub anchor: AnchorOutputWithId,
    pub block_index: u32,
    pub timestamp: u64,
    pub entropy: HashValue,
    pub validator_fee_target: AgentId,
    pub gas_limits: GasLimits,
    pub vm_limits: VmLimits,
    pub rent: RentStructure,
}

impl<'s> BlockContext<'s> {
    /// Opens a block over `reader`, confirming the previous block against the anchor.
    pub fn open(
        reader: &'s dyn StateReader,
        processors: &'s ProcessorRegistry,
        params: BlockParams,
    ) -> Result<Self, VmError> {
        let anchor = params.anchor;
        let mut env = ExecEnv::new(
            StateOverlay::new(reader),
            processors,
            anchor.output.chain_id,
            params.block_index,
            params.timestamp,
        );
        env.entropy = params.entropy;
        env.limits = params.vm_limits;

        let estimate = params.rent.storage_deposit_estimate();
        let deposits = match governance::deposit_assumptions(&mut env.partition(GOVERNANCE_CONTRACT))? {
            Some(persisted) if persisted.is_exceeded_by(&estimate) => {
                return Err(VmError::InconsistentStorageDepositAssumptions(format!(
                    "persisted {:?}, rent structure needs {:?}",
                    persisted, estimate
                )));
            }
            Some(persisted) => persisted,
            None => estimate,
        };
        env.deposits = deposits;
        env.txb = Some(AnchorTransactionBuilder::new(anchor.clone(), params.rent, deposits));

        let initialized = root::is_initialized(&mut env.partition(ROOT_CONTRACT))?;
        if initialized {
            let tx = anchor.id.transaction_id;
            accounts::resolve_pending_outputs(&mut env.partition(ACCOUNTS_CONTRACT), tx)?;
            let commitment = anchor
                .output
                .l1_commitment()
                .map_err(|e| VmError::StateMismatch(e.to_string()))?;
            let previous = params.block_index.saturating_sub(1);
            let mut blocks = env.partition(BLOCKLOG_CONTRACT);
            blocklog::confirm_block(&mut blocks, previous, commitment, tx)?;
            let changed = match blocklog::control_addresses(&mut blocks)? {
                Some(c) => {
                    c.state_address != anchor.output.state_controller
                        || c.governing_address != anchor.output.governor
                }
                None => true,
            };
            if changed {
                blocklog::save_control_addresses(
                    &mut blocks,
                    &ControlAddresses {
                        state_address: anchor.output.state_controller,
                        governing_address: anchor.output.governor,
                        since_block_index: params.block_index,
                    },
                )?;
                env.rotation_performed = true;
                tracing::info!(
                    target: "vm",
                    state_controller = %anchor.output.state_controller,
                    block_index = params.block_index,
                    "new control addresses recorded"
                );
            }
        }

        Ok(Self {
            env,
            anchor,
            gas_limits: params.gas_limits,
            validator_fee_target: params.validator_fee_target,
            base_timestamp: params.timestamp,
            initialized,
            block_gas: 0,
            block_fees: 0,
            num_successful: 0,
            num_off_ledger: 0,
            last_timestamp: params.timestamp,
            receipts: Vec::new(),
            burn_logs: Vec::new(),
        })
    }

    /// Receipts of the requests processed so far.
    pub fn receipts(&self) -> &[RequestReceipt] {
        &self.receipts
    }

    /// Burn logs of the requests processed so far.
    pub fn take_burn_logs(&mut self) -> Vec<(RequestId, BurnLog)> {
        std::mem::take(&mut self.burn_logs)
    }

    fn restore(&mut self, checkpoint: (StateOverlay<'s>, Option<AnchorTransactionBuilder>)) {
        self.env.state = checkpoint.0;
        self.env.txb = checkpoint.1;
    }

    /// Gas the block can still burn, or `None` once less than the minimum
    /// charge of one request is left.
    fn gas_left_in_block(&self) -> Option<u64> {
        let left = self.gas_limits.max_gas_per_block.saturating_sub(self.block_gas);
        (left >= self.gas_limits.min_gas_per_request && left > 0).then_some(left)
    }

    fn checkpoint(&self) -> (StateOverlay<'s>, Option<AnchorTransactionBuilder>) {
        (self.env.state.clone(), self.env.txb.clone())
    }

    /// The fee-token balance of `payer`, saturated to `u64`.
    fn fee_balance(&mut self, payer: &AgentId, policy: &GasFeePolicy) -> Result<u64, VmError> {
        let balance = accounts::balance(&mut self.env.partition(ACCOUNTS_CONTRACT), payer)?;
        Ok(match &policy.gas_fee_token_id {
            None => balance.base_tokens,
            Some(id) => balance
                .native_tokens
                .get(id)
                .map(|v| if *v > U256::from(u64::MAX) { u64::MAX } else { v.as_u64() })
                .unwrap_or_default(),
        })
    }

    /// Runs one request.
    pub fn run_request(&mut self, req: &Request) -> Result<Step, VmError> {
        let id = req.id();
        let target = req.target();
        let is_init = target == Some(CallTarget::new(ROOT_CONTRACT, "init"));
        if !self.initialized && !is_init {
            return Ok(Step::Unprocessed);
        }
        let Ok(request_index) = u16::try_from(self.receipts.len()) else {
            return Ok(Step::BlockFull);
        };
        let timestamp = self.base_timestamp.saturating_add(u64::from(request_index));

        if let Request::OnLedger(r) = req {
            if r.time_lock().is_some_and(|t| t > timestamp) {
                return Ok(Step::Unprocessed);
            }
            if r.expiration().is_some_and(|e| e.time <= timestamp) {
                log::debug!("request {} expired", id);
                return Ok(Step::Rejected);
            }
        }
        if blocklog::is_request_processed(&mut self.env.partition(BLOCKLOG_CONTRACT), &id)? {
            log::debug!("request {} already processed", id);
            return Ok(Step::Rejected);
        }

        let sender = req.sender();
        let chain_id = self.env.chain_id;
        if let Request::OffLedger(r) = req {
            if r.chain_id != chain_id || r.verify_signature().is_err() {
                log::debug!("off-ledger request {} is invalid", id);
                return Ok(Step::Rejected);
            }
            let max = accounts::nonce(&mut self.env.partition(ACCOUNTS_CONTRACT), &sender)?;
            let tolerance = self.env.limits.off_ledger_nonce_tolerance;
            if max >= tolerance && r.nonce <= max - tolerance {
                log::debug!("off-ledger request {} has a stale nonce {}", id, r.nonce);
                return Ok(Step::Rejected);
            }
        }

        let Some(left_in_block) = self.gas_left_in_block() else {
            return Ok(Step::BlockFull);
        };
        let max_per_request = self.gas_limits.max_gas_per_request.min(left_in_block);
        let mut budget = if is_init {
            max_per_request
        } else {
            req.gas_budget().min(max_per_request)
        };

        if let Request::OffLedger(r) = req {
            let mut kv = self.env.partition(ACCOUNTS_CONTRACT);
            let max = accounts::nonce(&mut kv, &sender)?;
            accounts::set_nonce(&mut kv, &sender, max.max(r.nonce))?;
        }

        let payer = accounts::payer(chain_id, &sender);
        if let Request::OnLedger(r) = req {
            let before = self.checkpoint();
            let consumed = {
                let ExecEnv { txb, state, .. } = &mut self.env;
                let txb = txb
                    .as_mut()
                    .ok_or_else(|| VmError::StateMismatch("block is closed".into()))?;
                txb.consume(r, &AccountsLoader::new(&*state))
            };
            let adjustment = match consumed {
                Ok(a) => a,
                Err(BuildError::Tx(
                    TxBuilderError::InputLimitExceeded | TxBuilderError::OutputLimitExceeded,
                )) => {
                    self.restore(before);
                    return Ok(Step::Unprocessed);
                }
                Err(BuildError::Tx(e)) => {
                    self.restore(before);
                    log::debug!("request {} cannot be consumed: {}", id, e);
                    return Ok(Step::Rejected);
                }
                Err(BuildError::State(e)) => return Err(e.into()),
            };
            let credited = {
                let mut kv = self.env.partition(ACCOUNTS_CONTRACT);
                accounts::credit(&mut kv, &payer, &r.assets())
                    .and_then(|_| accounts::settle_deposit(&mut kv, &payer, adjustment))
            };
            match credited {
                Ok(()) => {}
                Err(VmError::Request(e)) => {
                    self.restore(before);
                    log::debug!("request {} rejected: {}", id, e);
                    return Ok(Step::Rejected);
                }
                Err(e) => return Err(e),
            }
        }

        let policy = governance::fee_policy(&mut self.env.partition(GOVERNANCE_CONTRACT))?;
        let mut fee_error = None;
        if !is_init {
            let available = self.fee_balance(&payer, &policy)?;
            let min_fee = policy.total_fee(self.gas_limits.min_gas_per_request);
            if available < min_fee {
                fee_error = Some(CoreError::NotEnoughFeesToPay.with([available, min_fee]));
            } else {
                budget = budget.min(policy.affordable_gas_budget(available));
            }
        }
        let charge_fees = !is_init && fee_error.is_none();

        self.env.begin_request(id, request_index, timestamp, budget);

        let result = match fee_error {
            Some(e) => Err(e),
            None => {
                let before = self.checkpoint();
                match self.execute(req, sender, target) {
                    Ok(()) => Ok(()),
                    Err(e) if e.aborts_batch() => return Err(e),
                    Err(e) => {
                        self.restore(before);
                        self.env.events.clear();
                        self.env.rotate_to = None;
                        Err(e)
                    }
                }
            }
        };
        let error: Option<UnresolvedVmError> = match result {
            Ok(()) => None,
            Err(VmError::Request(e)) => Some(e),
            Err(e) => return Err(e),
        };

        let gas_burned = self.env.gas.burned();
        let mut gas_fee_charged = 0;
        if charge_fees {
            gas_fee_charged = self.charge_fees(&payer, &policy, gas_burned)?;
        }
        self.block_gas = self.block_gas.saturating_add(gas_burned);
        self.block_fees = self.block_fees.saturating_add(gas_fee_charged);

        let receipt = RequestReceipt {
            request: req.clone(),
            error: error.clone(),
            gas_budget: budget,
            gas_burned,
            gas_fee_charged,
            block_index: self.env.block_index,
            request_index,
        };
        {
            let events = std::mem::take(&mut self.env.events);
            let mut blocks = self.env.partition(BLOCKLOG_CONTRACT);
            blocklog::save_receipt(&mut blocks, &receipt)?;
            if error.is_none() {
                blocklog::save_events(&mut blocks, receipt.block_index, request_index, &events)?;
            }
        }
        match &error {
            None => self.num_successful += 1,
            Some(e) => log::debug!("request {} failed: {}", id, crate::errors::resolve_message(e)),
        }
        if req.is_off_ledger() {
            self.num_off_ledger += 1;
        }
        if is_init && error.is_none() {
            self.initialized = true;
        }
        self.last_timestamp = timestamp;
        self.receipts.push(receipt);
        self.burn_logs.push((id, self.env.gas.log().clone()));
        tracing::debug!(
            target: "vm",
            request = %id,
            gas_burned,
            gas_fee_charged,
            ok = error.is_none(),
            "request processed"
        );

        match (error, self.env.rotate_to.take()) {
            (None, Some(address)) => Ok(Step::Rotation(address)),
            _ => Ok(Step::Processed),
        }
    }

    /// Calls the target and checks that L2 still matches the transaction.
    fn execute(
        &mut self,
        req: &Request,
        sender: AgentId,
        target: Option<CallTarget>,
    ) -> Result<(), VmError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<(), VmError> {
            if let Some(target) = target {
                self.env.gas.burn(BurnCode::CallContract, 0)?;
                dispatch(
                    &mut self.env,
                    target,
                    sender,
                    req.params(),
                    req.allowance(),
                    0,
                    false,
                )?;
            }
            let totals = accounts::total_assets(&mut self.env.partition(ACCOUNTS_CONTRACT))?;
            match &self.env.txb {
                Some(txb) => Ok(txb.check_balanced(&totals)?),
                None => Err(VmError::StateMismatch("block is closed".into())),
            }
        }));
        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::warn!(target: "vm", request = %req.id(), %message, "contract panicked");
                Err(CoreError::Panic.with([message]))
            }
        }
    }

    /// Charges the fee for `gas_burned` to `payer`, split between the chain
    /// owner and the validator fee target. Returns the total charged.
    fn charge_fees(
        &mut self,
        payer: &AgentId,
        policy: &GasFeePolicy,
        gas_burned: u64,
    ) -> Result<u64, VmError> {
        let gas = gas_burned.max(self.gas_limits.min_gas_per_request);
        let available = self.fee_balance(payer, policy)?;
        let (owner_share, validator_share) = policy.fee_from_gas(gas, available);
        let as_assets = |amount: u64| match policy.gas_fee_token_id {
            None => Assets::from_base_tokens(amount),
            Some(id) => Assets::default().with_native_token(id, U256::from(amount)),
        };
        let owner = governance::chain_owner(&mut self.env.partition(GOVERNANCE_CONTRACT))?;
        let validator = match self.validator_fee_target {
            AgentId::Nil => owner,
            other => other,
        };
        let mut kv = self.env.partition(ACCOUNTS_CONTRACT);
        if !accounts::debit(&mut kv, payer, &as_assets(owner_share + validator_share))? {
            return Err(VmError::Db(format!("fee balance of {} vanished", payer)));
        }
        accounts::credit(&mut kv, &owner, &as_assets(owner_share))?;
        accounts::credit(&mut kv, &validator, &as_assets(validator_share))?;
        Ok(owner_share + validator_share)
    }

    /// Seals the block. `None` if no request was processed.
    pub fn close(
        mut self,
        parent: &VirtualState,
    ) -> Result<Option<(Block, VirtualState, TransactionEssence)>, VmError> {
        if self.receipts.is_empty() {
            return Ok(None);
        }
        let txb = self
            .env
            .txb
            .take()
            .ok_or_else(|| VmError::StateMismatch("block is closed".into()))?;
        let totals = {
            let mut kv = self.env.partition(ACCOUNTS_CONTRACT);
            accounts::write_internal_outputs(
                &mut kv,
                &txb.internal_outputs(),
                &txb.removed_internal_outputs(),
            )?;
            accounts::total_assets(&mut kv)?
        };
        let info = BlockInfo {
            block_index: self.env.block_index,
            timestamp: self.last_timestamp,
            total_requests: u16::try_from(self.receipts.len()).unwrap_or(u16::MAX),
            num_successful_requests: self.num_successful,
            num_off_ledger_requests: self.num_off_ledger,
            previous_l1_commitment: parent.l1_commitment(),
            l1_commitment: None,
            anchor_transaction_id: None,
            transaction_sub_essence_hash: txb.sub_essence_hash(),
            total_base_tokens_in_l2_accounts: totals.base_tokens,
            total_storage_deposit: txb.total_storage_deposit(),
            gas_burned: self.block_gas,
            gas_fee_charged: self.block_fees,
        };
        blocklog::save_block_info(&mut self.env.partition(BLOCKLOG_CONTRACT), &info)?;

        let update = self.env.state.into_state_update();
        let (block, state) = parent
            .seal_block(update, self.last_timestamp)
            .map_err(|e| match e {
                BlockError::State(e) => VmError::from(e),
                other => VmError::Db(other.to_string()),
            })?;
        let essence = txb.build_transaction_essence(&state.l1_commitment());
        tracing::info!(
            target: "vm",
            block_index = block.block_index,
            requests = info.total_requests,
            successful = info.num_successful_requests,
            gas = info.gas_burned,
            "block sealed"
        );
        Ok(Some((block, state, essence)))
    }

    /// Drops the block and builds the transaction handing the anchor to `address`.
    pub fn rotate(self, address: Address) -> Result<TransactionEssence, VmError> {
        let mut fresh = StateOverlay::new(self.env.state.base());
        let pending = accounts::pending_outputs(&mut Partition::unmetered(
            &mut fresh,
            Hname::from_name(ACCOUNTS_CONTRACT),
        ))?;
        let essence = build_rotation_essence(&self.anchor, address, &pending)
            .map_err(|e| VmError::StateMismatch(e.to_string()))?;
        tracing::info!(target: "vm", new_controller = %address, "state controller rotation");
        Ok(essence)
    }
}
