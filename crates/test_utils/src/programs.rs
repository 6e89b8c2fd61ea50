// Path: crates/test_utils/src/programs.rs
//! Native contracts used by tests.

use kestrel_types::dict::Dict;
use kestrel_vm::partition::{load, save};
use kestrel_vm::{BurnCode, CoreError, EntryPoint, Processor, ProcessorRegistry, Sandbox, VmError};
use parity_scale_codec::Encode;
use std::sync::Arc;

/// The name the counter program is registered under.
pub const COUNTER: &str = "counter";

const ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::full("increment"),
    EntryPoint::full("loop"),
    EntryPoint::view("get"),
];

/// A counter with an entry point that never terminates.
pub struct TestCounter;

impl Processor for TestCounter {
    fn entry_points(&self) -> &[EntryPoint] {
        ENTRY_POINTS
    }

    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError> {
        match entry_point {
            "increment" => {
                let n = load::<u64>(&mut ctx.state(), b"n")?.unwrap_or(0) + 1;
                save(&mut ctx.state(), b"n", &n)?;
                ctx.emit_event("incremented", n.encode())?;
                Ok(Dict::new().with("n", n.encode()))
            }
            "loop" => loop {
                ctx.burn(BurnCode::Compute, 100)?;
            },
            "get" => {
                let n = load::<u64>(&mut ctx.state(), b"n")?.unwrap_or(0);
                Ok(Dict::new().with("n", n.encode()))
            }
            _ => Err(CoreError::EntryPointNotFound.with([entry_point])),
        }
    }
}

/// A registry with the core contracts and [`TestCounter`] as `counter`.
pub fn test_registry() -> Arc<ProcessorRegistry> {
    let mut registry = ProcessorRegistry::new();
    registry.register_native(COUNTER, Arc::new(TestCounter));
    Arc::new(registry)
}
