// Path: crates/types/src/config/mod.rs

//! Shared configuration structures for the kestrel runtime components.
//!
//! Every structure deserializes from TOML with per-field defaults, so a node
//! config only names what it overrides.

use crate::error::ChainError;
use crate::fee_policy::StorageDepositAssumption;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod consensus;
pub use consensus::*;

/// Timers of the state manager, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateManagerTimers {
    /// Period between pulls of the latest anchor while unsynced.
    #[serde(default = "default_pull_state_retry_ms")]
    pub pull_state_retry_ms: u64,
    /// Delay after a state candidate before the anchor is pulled explicitly.
    #[serde(default = "default_pull_state_after_candidate_ms")]
    pub pull_state_after_state_candidate_delay_ms: u64,
    /// Delay before a missing block is requested again.
    #[serde(default = "default_get_block_retry_ms")]
    pub get_block_retry_ms: u64,
    /// Period of the state manager tick.
    #[serde(default = "default_sm_timer_tick_ms")]
    pub timer_tick_ms: u64,
    /// Number of random peers asked for each missing block.
    #[serde(default = "default_nodes_to_request_block_from")]
    pub nodes_to_request_block_from: usize,
}

fn default_pull_state_retry_ms() -> u64 {
    10_000
}
fn default_pull_state_after_candidate_ms() -> u64 {
    3_000
}
fn default_get_block_retry_ms() -> u64 {
    3_000
}
fn default_sm_timer_tick_ms() -> u64 {
    100
}
fn default_nodes_to_request_block_from() -> usize {
    5
}

impl Default for StateManagerTimers {
    fn default() -> Self {
        Self {
            pull_state_retry_ms: default_pull_state_retry_ms(),
            pull_state_after_state_candidate_delay_ms: default_pull_state_after_candidate_ms(),
            get_block_retry_ms: default_get_block_retry_ms(),
            timer_tick_ms: default_sm_timer_tick_ms(),
            nodes_to_request_block_from: default_nodes_to_request_block_from(),
        }
    }
}

/// Mempool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Requests whose expiration falls within this margin of now are not proposed.
    #[serde(default = "default_expiry_margin_ms")]
    pub expiry_margin_ms: u64,
    /// Capacity of the recently-processed request id cache.
    #[serde(default = "default_recently_processed_cache")]
    pub recently_processed_cache: usize,
}

fn default_expiry_margin_ms() -> u64 {
    60_000
}
fn default_recently_processed_cache() -> usize {
    10_000
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            expiry_margin_ms: default_expiry_margin_ms(),
            recently_processed_cache: default_recently_processed_cache(),
        }
    }
}

/// Gas limits enforced by the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasLimits {
    /// Total gas all requests of one block may burn.
    #[serde(default = "default_max_gas_per_block")]
    pub max_gas_per_block: u64,
    /// Gas charged at least for every processed request.
    #[serde(default = "default_min_gas_per_request")]
    pub min_gas_per_request: u64,
    /// Budget of an external view call.
    #[serde(default = "default_max_gas_external_view_call")]
    pub max_gas_external_view_call: u64,
    /// Upper bound on a single request's budget.
    #[serde(default = "default_max_gas_per_request")]
    pub max_gas_per_request: u64,
}

fn default_max_gas_per_block() -> u64 {
    1_000_000_000
}
fn default_min_gas_per_request() -> u64 {
    10_000
}
fn default_max_gas_external_view_call() -> u64 {
    50_000_000
}
fn default_max_gas_per_request() -> u64 {
    50_000_000
}

impl Default for GasLimits {
    fn default() -> Self {
        Self {
            max_gas_per_block: default_max_gas_per_block(),
            min_gas_per_request: default_min_gas_per_request(),
            max_gas_external_view_call: default_max_gas_external_view_call(),
            max_gas_per_request: default_max_gas_per_request(),
        }
    }
}

impl GasLimits {
    /// Rejects limits under which some request could never fit into a block.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.max_gas_per_request > self.max_gas_per_block {
            return Err(ChainError::Init(format!(
                "max_gas_per_request {} exceeds max_gas_per_block {}",
                self.max_gas_per_request, self.max_gas_per_block
            )));
        }
        if self.min_gas_per_request > self.max_gas_per_request {
            return Err(ChainError::Init(format!(
                "min_gas_per_request {} exceeds max_gas_per_request {}",
                self.min_gas_per_request, self.max_gas_per_request
            )));
        }
        Ok(())
    }
}

/// Per-request limits enforced by the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmLimits {
    /// Outputs a single request may post.
    #[serde(default = "default_max_posted_outputs")]
    pub max_posted_outputs_in_one_request: usize,
    /// Events a single request may emit.
    #[serde(default = "default_max_events_per_request")]
    pub max_events_per_request: usize,
    /// Maximum size of one event payload in bytes.
    #[serde(default = "default_max_event_size")]
    pub max_event_size: usize,
    /// Off-ledger nonces older than `max_assumed - tolerance` are rejected.
    #[serde(default = "default_off_ledger_nonce_tolerance")]
    pub off_ledger_nonce_tolerance: u64,
}

fn default_max_posted_outputs() -> usize {
    4
}
fn default_max_events_per_request() -> usize {
    50
}
fn default_max_event_size() -> usize {
    512
}
fn default_off_ledger_nonce_tolerance() -> u64 {
    10_000
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            max_posted_outputs_in_one_request: default_max_posted_outputs(),
            max_events_per_request: default_max_events_per_request(),
            max_event_size: default_max_event_size(),
            off_ledger_nonce_tolerance: default_off_ledger_nonce_tolerance(),
        }
    }
}

/// The byte-cost model deciding minimum storage deposits of L1 outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentStructure {
    /// Base tokens per virtual byte.
    #[serde(default = "default_v_byte_cost")]
    pub v_byte_cost: u64,
    /// Weight of a data byte.
    #[serde(default = "default_v_byte_factor_data")]
    pub v_byte_factor_data: u64,
    /// Virtual bytes added to every output.
    #[serde(default = "default_v_byte_offset")]
    pub v_byte_offset: u64,
}

fn default_v_byte_cost() -> u64 {
    100
}
fn default_v_byte_factor_data() -> u64 {
    1
}
fn default_v_byte_offset() -> u64 {
    32
}

impl Default for RentStructure {
    fn default() -> Self {
        Self {
            v_byte_cost: default_v_byte_cost(),
            v_byte_factor_data: default_v_byte_factor_data(),
            v_byte_offset: default_v_byte_offset(),
        }
    }
}

impl RentStructure {
    /// The minimum storage deposit of an output whose canonical encoding has `len` bytes.
    pub fn min_deposit_for_len(&self, len: usize) -> u64 {
        let bytes = (len as u64)
            .saturating_mul(self.v_byte_factor_data)
            .saturating_add(self.v_byte_offset);
        bytes.saturating_mul(self.v_byte_cost)
    }
}

/// A reference encoding length of the anchor output, used by the storage-deposit estimate.
pub const ANCHOR_OUTPUT_REFERENCE_LEN: usize = 180;
/// A reference encoding length of an internal native-token output.
pub const NATIVE_TOKEN_OUTPUT_REFERENCE_LEN: usize = 120;

impl RentStructure {
    /// Storage deposits of the chain's internal outputs under this rent structure.
    pub fn storage_deposit_estimate(&self) -> StorageDepositAssumption {
        StorageDepositAssumption {
            anchor_output: self.min_deposit_for_len(ANCHOR_OUTPUT_REFERENCE_LEN),
            native_token_output: self.min_deposit_for_len(NATIVE_TOKEN_OUTPUT_REFERENCE_LEN),
        }
    }
}

/// Complete configuration of one chain on one node (`chain.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainNodeConfig {
    /// Consensus timers.
    #[serde(default)]
    pub consensus: ConsensusTimers,
    /// State manager timers.
    #[serde(default)]
    pub state_manager: StateManagerTimers,
    /// Mempool settings.
    #[serde(default)]
    pub mempool: MempoolConfig,
    /// Gas limits.
    #[serde(default)]
    pub gas: GasLimits,
    /// Per-request VM limits.
    #[serde(default)]
    pub vm: VmLimits,
    /// The rent structure of the L1 ledger.
    #[serde(default)]
    pub rent: RentStructure,
    /// Capacity of each component mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Directory of the candidate-block write-ahead log.
    #[serde(default = "default_wal_dir")]
    pub wal_dir: PathBuf,
    /// Directory of the committed block store.
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,
}

fn default_mailbox_capacity() -> usize {
    1000
}
fn default_wal_dir() -> PathBuf {
    PathBuf::from("wal")
}
fn default_db_dir() -> PathBuf {
    PathBuf::from("db")
}

impl Default for ChainNodeConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusTimers::default(),
            state_manager: StateManagerTimers::default(),
            mempool: MempoolConfig::default(),
            gas: GasLimits::default(),
            vm: VmLimits::default(),
            rent: RentStructure::default(),
            mailbox_capacity: default_mailbox_capacity(),
            wal_dir: default_wal_dir(),
            db_dir: default_db_dir(),
        }
    }
}

impl ChainNodeConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ChainError> {
        let cfg: Self = toml::from_str(s)
            .map_err(|e| ChainError::Init(format!("invalid chain config: {}", e)))?;
        cfg.gas.validate()?;
        Ok(cfg)
    }
}
