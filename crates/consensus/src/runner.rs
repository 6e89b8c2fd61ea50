// Path: crates/consensus/src/runner.rs
//! Where VM tasks run.

use kestrel_vm::{run_task, VmError, VmTask, VmTaskResult};
use tokio::runtime::Handle;

pub type VmDone = Box<dyn FnOnce(Result<VmTaskResult, VmError>) + Send>;

/// Runs a VM task and reports the result through `done`.
pub trait VmRunner: Send + Sync {
    fn run(&self, task: VmTask, done: VmDone);
}

/// Runs tasks on the blocking pool of a tokio runtime, off the controller loop.
#[derive(Debug, Clone)]
pub struct BlockingVmRunner {
    handle: Handle,
}

impl BlockingVmRunner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl VmRunner for BlockingVmRunner {
    fn run(&self, task: VmTask, done: VmDone) {
        self.handle.spawn_blocking(move || {
            let result = run_task(&task);
            if let Err(e) = &result {
                tracing::debug!(target: "consensus", error = %e, "vm task failed");
            }
            done(result)
        });
    }
}

/// Runs tasks on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineVmRunner;

impl VmRunner for InlineVmRunner {
    fn run(&self, task: VmTask, done: VmDone) {
        done(run_task(&task))
    }
}
