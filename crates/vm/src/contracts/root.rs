// Path: crates/vm/src/contracts/root.rs
//! The `root` core contract: chain initialization and the contract registry.

use crate::contracts::{accounts, blob, blocklog, governance};
use crate::errors::{CoreError, VmError};
use crate::gas::BurnCode;
use crate::partition::{load, save, Kv};
use crate::processors::{core_program_hash, EntryPoint, Processor};
use crate::sandbox::Sandbox;
use kestrel_types::assets::Assets;
use kestrel_types::block_info::ControlAddresses;
use kestrel_types::dict::Dict;
use kestrel_types::fee_policy::GasFeePolicy;
use kestrel_types::ids::{AgentId, HashValue, Hname};
use kestrel_types::keys::{
    ACCOUNTS_CONTRACT, BLOB_CONTRACT, BLOCKLOG_CONTRACT, CORE_CONTRACTS, GOVERNANCE_CONTRACT,
};
use parity_scale_codec::{Decode, Encode};

const KEY_INITIALIZED: &[u8] = b"i";
const PREFIX_CONTRACT: u8 = b'c';

const ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::full("init"),
    EntryPoint::full("deploy_contract"),
    EntryPoint::view("find_contract"),
    EntryPoint::view("get_contract_records"),
];

/// A deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ContractRecord {
    /// The program behind the contract.
    pub program_hash: HashValue,
    /// The contract name. Its hname addresses the contract.
    pub name: String,
    /// Free text.
    pub description: String,
}

fn contract_key(hname: Hname) -> Vec<u8> {
    let mut key = vec![PREFIX_CONTRACT];
    key.extend_from_slice(&hname.to_bytes());
    key
}

/// Returns `true` once `init` has run.
pub fn is_initialized(kv: &mut dyn Kv) -> Result<bool, VmError> {
    kv.has(KEY_INITIALIZED)
}

/// The record of the contract with hname `hname`.
pub fn find_contract(kv: &mut dyn Kv, hname: Hname) -> Result<Option<ContractRecord>, VmError> {
    load(kv, &contract_key(hname))
}

/// The `root` processor.
pub struct Root;

impl Processor for Root {
    fn entry_points(&self) -> &[EntryPoint] {
        ENTRY_POINTS
    }

    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError> {
        match entry_point {
            "init" => init(ctx),
            "deploy_contract" => deploy_contract(ctx),
            "find_contract" => {
                let hname: Hname = ctx.param("hn")?;
                let record = find_contract(&mut ctx.state(), hname)?
                    .ok_or_else(|| CoreError::ContractNotFound.with([hname]))?;
                Ok(Dict::new().with("r", record.encode()))
            }
            "get_contract_records" => {
                let mut out = Dict::new();
                for (key, value) in ctx.state().scan(&[PREFIX_CONTRACT])? {
                    out.0.insert(key.get(1..).unwrap_or_default().to_vec(), value);
                }
                Ok(out)
            }
            _ => Err(CoreError::EntryPointNotFound.with([entry_point])),
        }
    }
}

/// Initializes the chain: registers the core contracts, makes the caller the
/// owner and moves the origin anchor's funds into the owner's account.
fn init(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    if is_initialized(&mut ctx.state())? {
        return Err(CoreError::AlreadyInitialized.err());
    }
    let owner = ctx.caller();
    if owner == AgentId::Nil {
        return Err(CoreError::Unauthorized.err());
    }
    let fee_policy = match ctx.params().get("g") {
        Some(bytes) => GasFeePolicy::from_bytes(bytes)
            .map_err(|e| CoreError::InvalidParams.with([format!("g: {}", e)]))?,
        None => GasFeePolicy::default(),
    };
    let anchor = ctx
        .anchor()
        .cloned()
        .ok_or_else(|| CoreError::ReadOnlyState.err())?;
    let deposits = ctx.deposits();

    {
        let mut kv = ctx.state();
        for name in CORE_CONTRACTS {
            let record = ContractRecord {
                program_hash: core_program_hash(name),
                name: name.to_string(),
                description: format!("core contract {}", name),
            };
            save(&mut kv, &contract_key(Hname::from_name(name)), &record)?;
        }
        kv.set(KEY_INITIALIZED, &[1])?;
    }

    governance::init(
        &mut ctx.partition(GOVERNANCE_CONTRACT),
        &owner,
        &fee_policy,
        &deposits,
    )?;

    let origin_funds = anchor
        .output
        .amount
        .checked_sub(deposits.anchor_output)
        .ok_or_else(|| CoreError::NotEnoughFundsForInternalStorageDeposit.err())?;
    accounts::credit(
        &mut ctx.partition(ACCOUNTS_CONTRACT),
        &owner,
        &Assets::from_base_tokens(origin_funds),
    )?;

    let since_block_index = ctx.block_index();
    blocklog::save_control_addresses(
        &mut ctx.partition(BLOCKLOG_CONTRACT),
        &ControlAddresses {
            state_address: anchor.output.state_controller,
            governing_address: anchor.output.governor,
            since_block_index,
        },
    )?;
    tracing::info!(target: "vm", owner = %owner, origin_funds, "chain initialized");
    Ok(Dict::new())
}

/// Registers a contract backed by a native program or a program blob.
fn deploy_contract(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    ctx.require_chain_owner()?;
    ctx.burn(BurnCode::DeployContract, 0)?;
    let program_hash: HashValue = ctx.param("ph")?;
    let name = ctx.param_str("nm")?;
    let description = match ctx.params().get("ds") {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => String::new(),
    };

    let processors = ctx.processors();
    let program = match processors.by_program_hash(&program_hash) {
        Some(p) => Some(p),
        None => blob::native_program_name(&mut ctx.partition(BLOB_CONTRACT), &program_hash)?
            .and_then(|n| processors.by_name(&n)),
    };
    let Some(program) = program else {
        return Err(CoreError::NotFound.with(["program".to_string(), hex::encode(program_hash)]));
    };

    let hname = Hname::from_name(&name);
    if processors.is_core(hname) || find_contract(&mut ctx.state(), hname)?.is_some() {
        return Err(CoreError::ContractAlreadyExists.with([name]));
    }
    save(
        &mut ctx.state(),
        &contract_key(hname),
        &ContractRecord {
            program_hash,
            name: name.clone(),
            description,
        },
    )?;
    log::info!("contract {} deployed as {}", name, hname);

    if program.find(Hname::from_name("init")).is_some() {
        let params = ctx.params().clone();
        ctx.call_init(hname, params)?;
    }
    Ok(Dict::new().with("hn", hname.encode()))
}
