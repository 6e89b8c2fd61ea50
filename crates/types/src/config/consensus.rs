// Path: crates/types/src/config/consensus.rs
//! Timers of the consensus controller.

use serde::{Deserialize, Serialize};

/// Retry and delay settings of the consensus controller, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusTimers {
    /// Period of the controller tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Minimum age of a new state before a batch is proposed on it.
    #[serde(default = "default_propose_batch_delay_for_new_state_ms")]
    pub propose_batch_delay_for_new_state_ms: u64,
    /// Delay before re-proposing after an empty or failed round.
    #[serde(default = "default_propose_batch_retry_ms")]
    pub propose_batch_retry_ms: u64,
    /// Delay before retrying the VM while decided requests are still missing.
    #[serde(default = "default_vm_run_retry_ms")]
    pub vm_run_retry_to_wait_for_ready_requests_ms: u64,
    /// Posting delay per position in the posting permutation.
    #[serde(default = "default_post_tx_sequence_step_ms")]
    pub post_tx_sequence_step_ms: u64,
    /// Period between inclusion-state queries.
    #[serde(default = "default_pull_inclusion_state_retry_ms")]
    pub pull_inclusion_state_retry_ms: u64,
    /// Longest wait for a started VM run or DSS signing before the round resets.
    #[serde(default = "default_round_stall_timeout_ms")]
    pub round_stall_timeout_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    100
}
fn default_propose_batch_delay_for_new_state_ms() -> u64 {
    500
}
fn default_propose_batch_retry_ms() -> u64 {
    500
}
fn default_vm_run_retry_ms() -> u64 {
    500
}
fn default_post_tx_sequence_step_ms() -> u64 {
    3000
}
fn default_pull_inclusion_state_retry_ms() -> u64 {
    1000
}
fn default_round_stall_timeout_ms() -> u64 {
    60_000
}

impl Default for ConsensusTimers {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            propose_batch_delay_for_new_state_ms: default_propose_batch_delay_for_new_state_ms(),
            propose_batch_retry_ms: default_propose_batch_retry_ms(),
            vm_run_retry_to_wait_for_ready_requests_ms: default_vm_run_retry_ms(),
            post_tx_sequence_step_ms: default_post_tx_sequence_step_ms(),
            pull_inclusion_state_retry_ms: default_pull_inclusion_state_retry_ms(),
            round_stall_timeout_ms: default_round_stall_timeout_ms(),
        }
    }
}
