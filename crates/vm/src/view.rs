// Path: crates/vm/src/view.rs
//! External view calls: read-only entry points run against a committed state.

use crate::errors::{CoreError, VmError};
use crate::gas::GasMeter;
use crate::processors::ProcessorRegistry;
use crate::sandbox::{dispatch, ExecEnv};
use kestrel_api::state::{StateOverlay, StateReader};
use kestrel_types::assets::Assets;
use kestrel_types::codec::{decode_u32, decode_u64};
use kestrel_types::dict::Dict;
use kestrel_types::ids::{AgentId, ChainId};
use kestrel_types::keys::{chain_key, KEY_BLOCK_INDEX, KEY_CHAIN_ID, KEY_TIMESTAMP};
use kestrel_types::request::CallTarget;
use std::panic::{catch_unwind, AssertUnwindSafe};

fn chain_value(reader: &dyn StateReader, key: &[u8]) -> Result<Vec<u8>, VmError> {
    reader
        .get(&chain_key(key))?
        .ok_or_else(|| VmError::Db(format!("chain value {} missing", String::from_utf8_lossy(key))))
}

/// Calls a view entry point.
///
/// The call runs with no caller, cannot write state and burns at most
/// `gas_budget`. Calling a full entry point fails with `NotAView`.
pub fn call_view(
    reader: &dyn StateReader,
    processors: &ProcessorRegistry,
    target: CallTarget,
    params: Dict,
    gas_budget: u64,
) -> Result<Dict, VmError> {
    let chain_id = ChainId::from_slice(&chain_value(reader, KEY_CHAIN_ID)?)
        .map_err(|e| VmError::Db(e.to_string()))?;
    let block_index =
        decode_u32(&chain_value(reader, KEY_BLOCK_INDEX)?).map_err(|e| VmError::Db(e.to_string()))?;
    let timestamp =
        decode_u64(&chain_value(reader, KEY_TIMESTAMP)?).map_err(|e| VmError::Db(e.to_string()))?;

    let mut env = ExecEnv::new(
        StateOverlay::new(reader),
        processors,
        chain_id,
        block_index,
        timestamp,
    );
    env.gas = GasMeter::new(gas_budget);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        dispatch(
            &mut env,
            target,
            AgentId::Nil,
            params,
            Assets::default(),
            0,
            true,
        )
    }));
    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown".to_string());
            Err(CoreError::Panic.with([message]))
        }
    }
}
