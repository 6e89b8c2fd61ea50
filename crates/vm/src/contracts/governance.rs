// Path: crates/vm/src/contracts/governance.rs
//! The `governance` core contract: chain ownership, the gas fee policy, the
//! storage deposit assumptions and state controller rotation.

use crate::errors::{CoreError, VmError};
use crate::partition::{load, save, Kv};
use crate::processors::{EntryPoint, Processor};
use crate::sandbox::Sandbox;
use kestrel_types::dict::Dict;
use kestrel_types::fee_policy::{GasFeePolicy, StorageDepositAssumption};
use kestrel_types::ids::{Address, AgentId};
use parity_scale_codec::Encode;

const KEY_OWNER: &[u8] = b"o";
const KEY_DELEGATE: &[u8] = b"d";
const KEY_FEE_POLICY: &[u8] = b"g";
const KEY_DEPOSITS: &[u8] = b"s";

const ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::full("rotate_state_controller"),
    EntryPoint::full("set_fee_policy"),
    EntryPoint::full("delegate_chain_ownership"),
    EntryPoint::full("claim_chain_ownership"),
    EntryPoint::view("get_fee_policy"),
    EntryPoint::view("get_chain_info"),
];

/// Writes the initial governance values.
pub fn init(
    kv: &mut dyn Kv,
    owner: &AgentId,
    policy: &GasFeePolicy,
    deposits: &StorageDepositAssumption,
) -> Result<(), VmError> {
    save(kv, KEY_OWNER, owner)?;
    kv.set(KEY_FEE_POLICY, &policy.to_bytes())?;
    kv.set(KEY_DEPOSITS, &deposits.to_bytes())
}

/// The chain owner. `Nil` before the chain is initialized.
pub fn chain_owner(kv: &mut dyn Kv) -> Result<AgentId, VmError> {
    Ok(load(kv, KEY_OWNER)?.unwrap_or(AgentId::Nil))
}

/// The gas fee policy in effect.
pub fn fee_policy(kv: &mut dyn Kv) -> Result<GasFeePolicy, VmError> {
    match kv.get(KEY_FEE_POLICY)? {
        Some(bytes) => GasFeePolicy::from_bytes(&bytes).map_err(|e| VmError::Db(e.to_string())),
        None => Ok(GasFeePolicy::default()),
    }
}

/// The storage deposits the chain was initialized with.
pub fn deposit_assumptions(kv: &mut dyn Kv) -> Result<Option<StorageDepositAssumption>, VmError> {
    match kv.get(KEY_DEPOSITS)? {
        Some(bytes) => StorageDepositAssumption::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| VmError::Db(e.to_string())),
        None => Ok(None),
    }
}

/// The `governance` processor.
pub struct Governance;

impl Processor for Governance {
    fn entry_points(&self) -> &[EntryPoint] {
        ENTRY_POINTS
    }

    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError> {
        match entry_point {
            "rotate_state_controller" => rotate_state_controller(ctx),
            "set_fee_policy" => {
                ctx.require_chain_owner()?;
                let bytes = ctx.param_bytes("g")?;
                let policy = GasFeePolicy::from_bytes(&bytes)
                    .map_err(|e| CoreError::InvalidParams.with([format!("g: {}", e)]))?;
                ctx.state().set(KEY_FEE_POLICY, &policy.to_bytes())?;
                log::info!("gas fee policy set: {} gas per token", policy.gas_per_token);
                Ok(Dict::new())
            }
            "get_fee_policy" => {
                let policy = fee_policy(&mut ctx.state())?;
                Ok(Dict::new().with("g", policy.to_bytes()))
            }
            "delegate_chain_ownership" => {
                ctx.require_chain_owner()?;
                let delegate: AgentId = ctx.param("o")?;
                save(&mut ctx.state(), KEY_DELEGATE, &delegate)?;
                Ok(Dict::new())
            }
            "claim_chain_ownership" => {
                let delegate: Option<AgentId> = load(&mut ctx.state(), KEY_DELEGATE)?;
                let Some(delegate) = delegate else {
                    return Err(CoreError::Unauthorized.err());
                };
                ctx.require_caller(&delegate)?;
                let mut kv = ctx.state();
                save(&mut kv, KEY_OWNER, &delegate)?;
                kv.del(KEY_DELEGATE)?;
                log::info!("chain ownership claimed by {}", delegate);
                Ok(Dict::new())
            }
            "get_chain_info" => {
                let chain_id = ctx.chain_id();
                let mut kv = ctx.state();
                let owner = chain_owner(&mut kv)?;
                let policy = fee_policy(&mut kv)?;
                let mut out = Dict::new()
                    .with("c", chain_id.encode())
                    .with("o", owner.encode())
                    .with("g", policy.to_bytes());
                if let Some(d) = deposit_assumptions(&mut kv)? {
                    out.set("s", d.to_bytes().to_vec());
                }
                Ok(out)
            }
            _ => Err(CoreError::EntryPointNotFound.with([entry_point])),
        }
    }
}

/// Asks the VM to hand the anchor to a new state controller.
///
/// The request that rotates produces no block: the whole batch is replaced by
/// a rotation transaction. Rotating to the current controller does nothing.
fn rotate_state_controller(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    ctx.require_chain_owner()?;
    let address: Address = ctx.param("a")?;
    let anchor = ctx
        .anchor()
        .ok_or_else(|| CoreError::ReadOnlyState.err())?;
    let state_index = anchor.state_index();
    if address == anchor.output.state_controller {
        log::debug!("rotation to the current state controller ignored");
        return Ok(Dict::new());
    }
    if ctx.rotation_performed() {
        return Err(CoreError::RotationAlreadyPerformed.with([state_index]));
    }
    ctx.request_rotation(address);
    Ok(Dict::new())
}
