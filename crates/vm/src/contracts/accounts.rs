// Path: crates/vm/src/contracts/accounts.rs
//! The `accounts` core contract: the L2 ledger.
//!
//! Every agent has one balance of base tokens, native tokens and NFTs. The
//! sum of all balances is kept alongside, and the VM checks it against the
//! anchor transaction after every request. The contract also stores the
//! records of the chain's internal outputs, the owners of its foundries and
//! the off-ledger nonce of each sender.

use crate::errors::{CoreError, VmError};
use crate::gas::BurnCode;
use crate::partition::{load, save, Kv};
use crate::processors::{EntryPoint, Processor};
use crate::sandbox::Sandbox;
use kestrel_api::state::StateReader;
use kestrel_tx::{
    FoundryRecord, InternalOutput, InternalOutputKey, NativeTokenRecord, NftRecord, OutputLoader,
};
use kestrel_types::assets::Assets;
use kestrel_types::codec::from_bytes_canonical;
use kestrel_types::dict::Dict;
use kestrel_types::error::StateError;
use kestrel_types::ids::{AgentId, ChainId, Hname, NativeTokenId, NftId, OutputId, TransactionId};
use kestrel_types::keys::{contract_key, ACCOUNTS_CONTRACT};
use kestrel_types::ledger::{BasicOutput, FoundryOutput, NftOutput, Output, SimpleTokenScheme};
use kestrel_types::U256;
use parity_scale_codec::{Decode, Encode};

const PREFIX_ACCOUNT: u8 = b'a';
const PREFIX_NONCE: u8 = b'n';
const PREFIX_NATIVE_TOKEN_OUTPUT: u8 = b'N';
const PREFIX_FOUNDRY_OUTPUT: u8 = b'F';
const PREFIX_NFT_OUTPUT: u8 = b'X';
const PREFIX_FOUNDRY_OWNER: u8 = b'f';
const KEY_TOTAL: &[u8] = b"t";
const KEY_PENDING: &[u8] = b"P";

const ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::full("deposit"),
    EntryPoint::full("withdraw"),
    EntryPoint::full("transfer_allowance_to"),
    EntryPoint::full("harvest"),
    EntryPoint::full("foundry_create_new"),
    EntryPoint::full("foundry_destroy"),
    EntryPoint::full("foundry_modify_supply"),
    EntryPoint::view("balance"),
    EntryPoint::view("total_assets"),
    EntryPoint::view("accounts"),
    EntryPoint::view("get_account_nonce"),
    EntryPoint::view("foundry_output"),
    EntryPoint::view("account_nfts"),
];

fn prefixed(prefix: u8, rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + rest.len());
    key.push(prefix);
    key.extend_from_slice(rest);
    key
}

fn account_key(agent: &AgentId) -> Vec<u8> {
    prefixed(PREFIX_ACCOUNT, &agent.to_bytes())
}

fn record_key(key: &InternalOutputKey) -> Vec<u8> {
    match key {
        InternalOutputKey::NativeToken(id) => prefixed(PREFIX_NATIVE_TOKEN_OUTPUT, &id.0),
        InternalOutputKey::Foundry(serial) => {
            prefixed(PREFIX_FOUNDRY_OUTPUT, &serial.to_be_bytes())
        }
        InternalOutputKey::Nft(id) => prefixed(PREFIX_NFT_OUTPUT, &id.0),
    }
}

fn foundry_owner_key(serial: u32) -> Vec<u8> {
    prefixed(PREFIX_FOUNDRY_OWNER, &serial.to_be_bytes())
}

/// The account that holds funds of senders without an identity.
pub fn common_account(chain_id: ChainId) -> AgentId {
    AgentId::Contract {
        chain_id,
        hname: Hname::from_name(ACCOUNTS_CONTRACT),
    }
}

/// The account that pays for `agent`: the agent itself, or the common account for nil.
pub fn payer(chain_id: ChainId, agent: &AgentId) -> AgentId {
    match agent {
        AgentId::Nil => common_account(chain_id),
        other => *other,
    }
}

// --- Balances ---

/// The balance of `agent`.
pub fn balance(kv: &mut dyn Kv, agent: &AgentId) -> Result<Assets, VmError> {
    Ok(load(kv, &account_key(agent))?.unwrap_or_default())
}

/// The sum of all balances.
pub fn total_assets(kv: &mut dyn Kv) -> Result<Assets, VmError> {
    Ok(load(kv, KEY_TOTAL)?.unwrap_or_default())
}

fn store_balance(kv: &mut dyn Kv, agent: &AgentId, assets: &Assets) -> Result<(), VmError> {
    if assets.is_empty() {
        kv.del(&account_key(agent))
    } else {
        save(kv, &account_key(agent), assets)
    }
}

/// Adds `assets` to the balance of `agent`.
pub fn credit(kv: &mut dyn Kv, agent: &AgentId, assets: &Assets) -> Result<(), VmError> {
    if assets.is_empty() {
        return Ok(());
    }
    let bal = balance(kv, agent)?
        .checked_add(assets)
        .ok_or_else(|| CoreError::Overflow.err())?;
    let total = total_assets(kv)?
        .checked_add(assets)
        .ok_or_else(|| CoreError::Overflow.err())?;
    store_balance(kv, agent, &bal)?;
    save(kv, KEY_TOTAL, &total)
}

/// Takes `assets` from the balance of `agent`. Returns `false` and changes
/// nothing if the balance does not cover them.
pub fn debit(kv: &mut dyn Kv, agent: &AgentId, assets: &Assets) -> Result<bool, VmError> {
    if assets.is_empty() {
        return Ok(true);
    }
    let mut bal = balance(kv, agent)?;
    if !bal.spend_from_budget(assets) {
        return Ok(false);
    }
    let mut total = total_assets(kv)?;
    if !total.spend_from_budget(assets) {
        return Err(CoreError::InconsistentL2WithL1.with(["account totals"]));
    }
    store_balance(kv, agent, &bal)?;
    save(kv, KEY_TOTAL, &total)?;
    Ok(true)
}

/// Like [`debit`], failing with `NotEnoughFunds`.
pub fn debit_or_fail(kv: &mut dyn Kv, agent: &AgentId, assets: &Assets) -> Result<(), VmError> {
    if debit(kv, agent, assets)? {
        Ok(())
    } else {
        Err(CoreError::NotEnoughFunds.with([agent]))
    }
}

/// Moves `assets` between two accounts.
pub fn move_assets(
    kv: &mut dyn Kv,
    from: &AgentId,
    to: &AgentId,
    assets: &Assets,
) -> Result<(), VmError> {
    if from == to {
        return if balance(kv, from)?.covers(assets) {
            Ok(())
        } else {
            Err(CoreError::NotEnoughFunds.with([from]))
        };
    }
    debit_or_fail(kv, from, assets)?;
    credit(kv, to, assets)
}

/// Applies a storage-deposit adjustment of the transaction builder to `agent`.
///
/// A negative adjustment is a deposit the agent pays for a new internal
/// output, a positive one a deposit released back to it.
pub fn settle_deposit(kv: &mut dyn Kv, agent: &AgentId, adjustment: i64) -> Result<(), VmError> {
    let amount = Assets::from_base_tokens(adjustment.unsigned_abs());
    if adjustment > 0 {
        credit(kv, agent, &amount)
    } else if adjustment < 0 {
        if debit(kv, agent, &amount)? {
            Ok(())
        } else {
            Err(CoreError::NotEnoughFundsForInternalStorageDeposit.err())
        }
    } else {
        Ok(())
    }
}

// --- Nonces ---

/// The highest off-ledger nonce seen from `agent`.
pub fn nonce(kv: &mut dyn Kv, agent: &AgentId) -> Result<u64, VmError> {
    Ok(load(kv, &prefixed(PREFIX_NONCE, &agent.to_bytes()))?.unwrap_or_default())
}

/// Records `nonce` for `agent`.
pub fn set_nonce(kv: &mut dyn Kv, agent: &AgentId, nonce: u64) -> Result<(), VmError> {
    save(kv, &prefixed(PREFIX_NONCE, &agent.to_bytes()), &nonce)
}

// --- Internal output records ---

/// Stores the records of the internal outputs a block produces and drops
/// those it consumes for good. The new records stay pending until the block's
/// transaction id is known.
pub fn write_internal_outputs(
    kv: &mut dyn Kv,
    outputs: &[InternalOutput],
    removed: &[InternalOutputKey],
) -> Result<(), VmError> {
    let mut pending = Vec::with_capacity(outputs.len());
    for out in outputs {
        let bytes = match (&out.key, &out.output) {
            (InternalOutputKey::NativeToken(_), Output::Basic(o)) => {
                NativeTokenRecord::pending(o.clone(), out.index).to_bytes()
            }
            (InternalOutputKey::Foundry(_), Output::Foundry(o)) => {
                FoundryRecord::pending(o.clone(), out.index).to_bytes()
            }
            (InternalOutputKey::Nft(_), Output::Nft(o)) => {
                NftRecord::pending(o.clone(), out.index).to_bytes()
            }
            (key, _) => {
                return Err(CoreError::InconsistentL2WithL1
                    .with([format!("internal output {:?} has the wrong kind", key)]))
            }
        };
        kv.set(&record_key(&out.key), &bytes)?;
        pending.push(out.key);
    }
    for key in removed {
        kv.del(&record_key(key))?;
    }
    if pending.is_empty() {
        kv.del(KEY_PENDING)
    } else {
        save(kv, KEY_PENDING, &pending)
    }
}

fn resolve_record<T: Encode + Decode>(
    kv: &mut dyn Kv,
    key: &[u8],
    tx: TransactionId,
) -> Result<(), VmError> {
    let Some(bytes) = kv.get(key)? else {
        return Ok(());
    };
    let mut record = kestrel_tx::OutputRecord::<T>::from_bytes(&bytes)
        .map_err(|e| VmError::Db(e.to_string()))?;
    record.resolve(tx);
    kv.set(key, &record.to_bytes())
}

/// Binds the pending records to the transaction that produced them.
pub fn resolve_pending_outputs(kv: &mut dyn Kv, tx: TransactionId) -> Result<(), VmError> {
    let pending: Vec<InternalOutputKey> = load(kv, KEY_PENDING)?.unwrap_or_default();
    for key in &pending {
        let rk = record_key(key);
        match key {
            InternalOutputKey::NativeToken(_) => resolve_record::<BasicOutput>(kv, &rk, tx)?,
            InternalOutputKey::Foundry(_) => resolve_record::<FoundryOutput>(kv, &rk, tx)?,
            InternalOutputKey::Nft(_) => resolve_record::<NftOutput>(kv, &rk, tx)?,
        }
    }
    if !pending.is_empty() {
        tracing::debug!(target: "vm", count = pending.len(), tx = %tx, "internal output records resolved");
        kv.del(KEY_PENDING)?;
    }
    Ok(())
}

/// The still-pending internal outputs with their output indices.
pub fn pending_outputs(kv: &mut dyn Kv) -> Result<Vec<(u16, Output)>, VmError> {
    let pending: Vec<InternalOutputKey> = load(kv, KEY_PENDING)?.unwrap_or_default();
    let mut out = Vec::with_capacity(pending.len());
    for key in &pending {
        let Some(bytes) = kv.get(&record_key(key))? else {
            continue;
        };
        let decoded = match key {
            InternalOutputKey::NativeToken(_) => NativeTokenRecord::from_bytes(&bytes)
                .map(|r| (r.output_index, Output::Basic(r.output))),
            InternalOutputKey::Foundry(_) => FoundryRecord::from_bytes(&bytes)
                .map(|r| (r.output_index, Output::Foundry(r.output))),
            InternalOutputKey::Nft(_) => {
                NftRecord::from_bytes(&bytes).map(|r| (r.output_index, Output::Nft(r.output)))
            }
        };
        out.push(decoded.map_err(|e| VmError::Db(e.to_string()))?);
    }
    Ok(out)
}

/// Loads internal outputs straight from a state reader.
pub struct AccountsLoader<'a> {
    state: &'a dyn StateReader,
}

impl<'a> AccountsLoader<'a> {
    /// A loader over `state`.
    pub fn new(state: &'a dyn StateReader) -> Self {
        Self { state }
    }

    fn record<T: Encode + Decode>(
        &self,
        key: &InternalOutputKey,
    ) -> Result<Option<(OutputId, T)>, StateError> {
        let full = contract_key(Hname::from_name(ACCOUNTS_CONTRACT), &record_key(key));
        let Some(bytes) = self.state.get(&full)? else {
            return Ok(None);
        };
        let record: kestrel_tx::OutputRecord<T> = from_bytes_canonical(&bytes)?;
        match record.output_id {
            Some(id) => Ok(Some((id, record.output))),
            None => Err(StateError::Validation(format!(
                "internal output {:?} is still pending",
                key
            ))),
        }
    }
}

impl OutputLoader for AccountsLoader<'_> {
    fn native_token_output(
        &self,
        id: &NativeTokenId,
    ) -> Result<Option<(OutputId, BasicOutput)>, StateError> {
        self.record(&InternalOutputKey::NativeToken(*id))
    }

    fn foundry_output(&self, serial: u32) -> Result<Option<(OutputId, FoundryOutput)>, StateError> {
        self.record(&InternalOutputKey::Foundry(serial))
    }

    fn nft_output(&self, id: &NftId) -> Result<Option<(OutputId, NftOutput)>, StateError> {
        self.record(&InternalOutputKey::Nft(*id))
    }
}

/// The balance of `agent` in any committed state.
pub fn balance_in(reader: &dyn StateReader, agent: &AgentId) -> Result<Assets, StateError> {
    let full = contract_key(Hname::from_name(ACCOUNTS_CONTRACT), &account_key(agent));
    match reader.get(&full)? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(Assets::default()),
    }
}

// --- Entry points ---

/// The `accounts` processor.
pub struct Accounts;

impl Processor for Accounts {
    fn entry_points(&self) -> &[EntryPoint] {
        ENTRY_POINTS
    }

    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError> {
        match entry_point {
            // Assets of on-ledger requests are credited before the call runs.
            "deposit" => Ok(Dict::new()),
            "withdraw" => withdraw(ctx),
            "transfer_allowance_to" => {
                let target: AgentId = ctx.param("a")?;
                let assets = ctx.allowance()?;
                ctx.transfer_allowance_to(&target, &assets)?;
                Ok(Dict::new())
            }
            "harvest" => harvest(ctx),
            "foundry_create_new" => foundry_create_new(ctx),
            "foundry_destroy" => foundry_destroy(ctx),
            "foundry_modify_supply" => foundry_modify_supply(ctx),
            "balance" => {
                let agent = ctx.opt_param("a")?.unwrap_or_else(|| ctx.caller());
                let bal = balance(&mut ctx.accounts(), &agent)?;
                Ok(Dict::new().with("a", bal.encode()))
            }
            "total_assets" => {
                let total = total_assets(&mut ctx.accounts())?;
                Ok(Dict::new().with("a", total.encode()))
            }
            "accounts" => {
                let mut out = Dict::new();
                for (key, value) in ctx.accounts().scan(&[PREFIX_ACCOUNT])? {
                    out.0.insert(key.get(1..).unwrap_or_default().to_vec(), value);
                }
                Ok(out)
            }
            "get_account_nonce" => {
                let agent = ctx.opt_param("a")?.unwrap_or_else(|| ctx.caller());
                let n = nonce(&mut ctx.accounts(), &agent)?;
                Ok(Dict::new().with("n", n.encode()))
            }
            "foundry_output" => {
                let serial: u32 = ctx.param("s")?;
                let bytes = ctx
                    .accounts()
                    .get(&record_key(&InternalOutputKey::Foundry(serial)))?
                    .ok_or_else(|| CoreError::NotFound.with(["foundry".to_string(), serial.to_string()]))?;
                let record = FoundryRecord::from_bytes(&bytes).map_err(|e| VmError::Db(e.to_string()))?;
                Ok(Dict::new().with("b", record.output.encode()))
            }
            "account_nfts" => {
                let agent = ctx.opt_param("a")?.unwrap_or_else(|| ctx.caller());
                let nfts: Vec<NftId> = balance(&mut ctx.accounts(), &agent)?.nfts.into_iter().collect();
                Ok(Dict::new().with("i", nfts.encode()))
            }
            _ => Err(CoreError::EntryPointNotFound.with([entry_point])),
        }
    }
}

/// Sends the allowance to the caller's L1 address.
fn withdraw(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    let caller = ctx.caller();
    let address = caller
        .l1_address()
        .ok_or_else(|| CoreError::InvalidParams.with(["caller has no L1 address"]))?;
    let assets = ctx.allowance()?;
    if assets.is_empty() {
        return Err(CoreError::BadAmount.with(["empty allowance"]));
    }
    let output = match assets.nfts.len() {
        0 => Output::Basic(BasicOutput {
            native_tokens: assets.native_tokens.clone(),
            ..BasicOutput::new(address, assets.base_tokens)
        }),
        1 => {
            let Some(nft_id) = assets.nfts.iter().next().copied() else {
                return Err(CoreError::NftNotFound.with(["none"]));
            };
            let held = {
                let (txb, loader) = ctx.txb()?;
                txb.nft_output(&nft_id, &loader)?
            };
            Output::Nft(NftOutput {
                amount: assets.base_tokens,
                native_tokens: assets.native_tokens.clone(),
                address,
                sender: None,
                metadata: None,
                timelock: None,
                ..held
            })
        }
        _ => {
            return Err(CoreError::InvalidParams.with(["withdraw one NFT at a time"]));
        }
    };
    ctx.spend_allowance(&assets)?;
    ctx.post_output(caller, output)?;
    log::info!("withdrawal of {} base tokens to {}", assets.base_tokens, address);
    Ok(Dict::new())
}

/// Moves funds of the common account to the chain owner.
fn harvest(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    ctx.require_chain_owner()?;
    let owner = ctx.caller();
    let common = common_account(ctx.chain_id());
    let available = balance(&mut ctx.accounts(), &common)?;
    let assets = match ctx.opt_param::<u64>("b")? {
        Some(amount) => Assets::from_base_tokens(amount),
        None => available,
    };
    move_assets(&mut ctx.accounts(), &common, &owner, &assets)?;
    Ok(Dict::new())
}

fn foundry_owner(ctx: &mut Sandbox<'_, '_>, serial: u32) -> Result<AgentId, VmError> {
    load(&mut ctx.accounts(), &foundry_owner_key(serial))?
        .ok_or_else(|| CoreError::FoundryNotFound.with([serial]))
}

fn foundry_create_new(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    ctx.ensure_full()?;
    ctx.burn(BurnCode::FoundryOp, 0)?;
    let maximum_supply: U256 = ctx.param("m")?;
    if maximum_supply.is_zero() {
        return Err(CoreError::BadAmount.with(["maximum supply"]));
    }
    let owner = ctx.caller();
    let (serial, adjustment) = {
        let (txb, _) = ctx.txb()?;
        txb.create_new_foundry(SimpleTokenScheme {
            maximum_supply,
            ..SimpleTokenScheme::default()
        })?
    };
    ctx.settle_deposit(&owner, adjustment)?;
    save(&mut ctx.accounts(), &foundry_owner_key(serial), &owner)?;
    log::info!("foundry {} created for {}", serial, owner);
    Ok(Dict::new().with("s", serial.encode()))
}

fn foundry_destroy(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    ctx.ensure_full()?;
    ctx.burn(BurnCode::FoundryOp, 0)?;
    let serial: u32 = ctx.param("s")?;
    let owner = foundry_owner(ctx, serial)?;
    ctx.require_caller(&owner)?;
    let adjustment = {
        let (txb, loader) = ctx.txb()?;
        txb.destroy_foundry(serial, &loader)?
    };
    ctx.settle_deposit(&owner, adjustment)?;
    ctx.accounts().del(&foundry_owner_key(serial))?;
    Ok(Dict::new())
}

fn foundry_modify_supply(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    ctx.ensure_full()?;
    ctx.burn(BurnCode::FoundryOp, 0)?;
    let serial: u32 = ctx.param("s")?;
    let delta: U256 = ctx.param("d")?;
    let melt = ctx.opt_param::<bool>("x")?.unwrap_or(false);
    if delta.is_zero() {
        return Err(CoreError::BadAmount.with(["zero supply change"]));
    }
    let owner = foundry_owner(ctx, serial)?;
    ctx.require_caller(&owner)?;
    let token_id = NativeTokenId::from_foundry(&ctx.chain_id(), serial);
    let tokens = Assets::default().with_native_token(token_id, delta);
    if melt {
        debit_or_fail(&mut ctx.accounts(), &owner, &tokens)?;
    }
    let adjustment = {
        let (txb, loader) = ctx.txb()?;
        txb.modify_foundry_supply(serial, delta, !melt, &loader)?
    };
    if !melt {
        credit(&mut ctx.accounts(), &owner, &tokens)?;
    }
    ctx.settle_deposit(&owner, adjustment)?;
    Ok(Dict::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partition;
    use kestrel_api::state::StateOverlay;
    use kestrel_state::VirtualState;
    use kestrel_types::ids::Address;

    fn alice() -> AgentId {
        AgentId::Address(Address([1; 32]))
    }

    fn bob() -> AgentId {
        AgentId::Address(Address([2; 32]))
    }

    #[test]
    fn credit_and_debit_keep_the_total() {
        let base = VirtualState::origin(&ChainId([1; 32]));
        let mut overlay = StateOverlay::new(&base);
        let mut kv = Partition::unmetered(&mut overlay, Hname::from_name(ACCOUNTS_CONTRACT));
        credit(&mut kv, &alice(), &Assets::from_base_tokens(100)).unwrap();
        move_assets(&mut kv, &alice(), &bob(), &Assets::from_base_tokens(40)).unwrap();
        assert_eq!(balance(&mut kv, &alice()).unwrap().base_tokens, 60);
        assert_eq!(balance(&mut kv, &bob()).unwrap().base_tokens, 40);
        assert_eq!(total_assets(&mut kv).unwrap().base_tokens, 100);

        assert!(!debit(&mut kv, &bob(), &Assets::from_base_tokens(41)).unwrap());
        assert_eq!(total_assets(&mut kv).unwrap().base_tokens, 100);
    }

    #[test]
    fn emptied_accounts_disappear() {
        let base = VirtualState::origin(&ChainId([1; 32]));
        let mut overlay = StateOverlay::new(&base);
        {
            let mut kv = Partition::unmetered(&mut overlay, Hname::from_name(ACCOUNTS_CONTRACT));
            credit(&mut kv, &alice(), &Assets::from_base_tokens(5)).unwrap();
            debit_or_fail(&mut kv, &alice(), &Assets::from_base_tokens(5)).unwrap();
            assert!(kv.scan(&[PREFIX_ACCOUNT]).unwrap().is_empty());
        }
        assert_eq!(balance_in(&overlay, &alice()).unwrap(), Assets::default());
    }

    #[test]
    fn deposit_adjustments_move_base_tokens() {
        let base = VirtualState::origin(&ChainId([1; 32]));
        let mut overlay = StateOverlay::new(&base);
        let mut kv = Partition::unmetered(&mut overlay, Hname::from_name(ACCOUNTS_CONTRACT));
        credit(&mut kv, &alice(), &Assets::from_base_tokens(10)).unwrap();
        settle_deposit(&mut kv, &alice(), -7).unwrap();
        assert_eq!(balance(&mut kv, &alice()).unwrap().base_tokens, 3);
        let err = settle_deposit(&mut kv, &alice(), -4).unwrap_err();
        assert!(CoreError::NotEnoughFundsForInternalStorageDeposit.matches(err.as_request().unwrap()));
        settle_deposit(&mut kv, &alice(), 7).unwrap();
        assert_eq!(balance(&mut kv, &alice()).unwrap().base_tokens, 10);
    }

    #[test]
    fn pending_records_resolve_against_the_next_anchor() {
        let chain = ChainId([1; 32]);
        let base = VirtualState::origin(&chain);
        let mut overlay = StateOverlay::new(&base);
        let token = NativeTokenId::from_foundry(&chain, 1);
        let out = BasicOutput {
            native_tokens: std::iter::once((token, U256::from(9))).collect(),
            ..BasicOutput::new(kestrel_types::ids::L1Address::Chain(chain), 500)
        };
        {
            let mut kv = Partition::unmetered(&mut overlay, Hname::from_name(ACCOUNTS_CONTRACT));
            write_internal_outputs(
                &mut kv,
                &[InternalOutput {
                    key: InternalOutputKey::NativeToken(token),
                    index: 1,
                    output: Output::Basic(out.clone()),
                }],
                &[],
            )
            .unwrap();
            assert_eq!(pending_outputs(&mut kv).unwrap(), vec![(1, Output::Basic(out.clone()))]);
        }
        assert!(AccountsLoader::new(&overlay).native_token_output(&token).is_err());
        {
            let mut kv = Partition::unmetered(&mut overlay, Hname::from_name(ACCOUNTS_CONTRACT));
            resolve_pending_outputs(&mut kv, TransactionId([4; 32])).unwrap();
            assert!(pending_outputs(&mut kv).unwrap().is_empty());
        }
        let (id, loaded) = AccountsLoader::new(&overlay)
            .native_token_output(&token)
            .unwrap()
            .unwrap();
        assert_eq!(id, OutputId::new(TransactionId([4; 32]), 1));
        assert_eq!(loaded, out);
    }
}
