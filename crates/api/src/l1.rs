// Path: crates/api/src/l1.rs
//! The L1 ledger connector.
//!
//! All I/O is fire-and-forget: publishing and pulling return immediately and
//! responses arrive later through the [`L1Handlers`] registered for the chain.

use kestrel_types::error::L1Error;
use kestrel_types::ids::{ChainId, OutputId, TransactionId};
use kestrel_types::ledger::{AnchorOutputWithId, Transaction};
use kestrel_types::request::OnLedgerRequest;
use std::sync::Arc;

/// Called with every anchor observed on L1.
pub type AnchorHandler = Arc<dyn Fn(AnchorOutputWithId) + Send + Sync>;
/// Called with every on-ledger request addressed to the chain.
pub type OnLedgerRequestHandler = Arc<dyn Fn(OnLedgerRequest) + Send + Sync>;
/// Called with the inclusion state of a queried transaction as a raw string.
pub type InclusionStateHandler = Arc<dyn Fn(TransactionId, String) + Send + Sync>;

/// Callbacks through which a connector reports to a chain.
#[derive(Clone)]
pub struct L1Handlers {
    /// A new anchor was confirmed, or was pulled explicitly.
    pub on_new_anchor: AnchorHandler,
    /// A new request output is addressed to the chain.
    pub on_new_on_ledger_request: OnLedgerRequestHandler,
    /// Answer to [`L1Connector::pull_tx_inclusion_state`].
    pub on_tx_inclusion_state: InclusionStateHandler,
    /// Answer to [`L1Connector::pull_state_output_by_id`].
    pub on_state_output: AnchorHandler,
}

/// Connects a chain to its L1 ledger. Shared by all chains of a node and safe
/// for concurrent publishes.
pub trait L1Connector: Send + Sync {
    /// Starts delivering anchors and requests of `chain_id` to `handlers`.
    fn register_chain(&self, chain_id: ChainId, handlers: L1Handlers) -> Result<(), L1Error>;

    /// Stops delivering events of `chain_id`.
    fn unregister_chain(&self, chain_id: &ChainId);

    /// Publishes a state transition that advances the anchor to `state_index`.
    fn publish_state_transaction(
        &self,
        chain_id: &ChainId,
        state_index: u32,
        tx: Transaction,
    ) -> Result<(), L1Error>;

    /// Publishes a rotation transaction.
    fn publish_governance_transaction(
        &self,
        chain_id: &ChainId,
        tx: Transaction,
    ) -> Result<(), L1Error>;

    /// Requests the latest anchor. The answer arrives through `on_new_anchor`.
    fn pull_latest_output(&self, chain_id: &ChainId);

    /// Requests an anchor by output id. The answer arrives through `on_state_output`.
    fn pull_state_output_by_id(&self, chain_id: &ChainId, id: OutputId);

    /// Requests the inclusion state of a transaction. The answer arrives through
    /// `on_tx_inclusion_state`.
    fn pull_tx_inclusion_state(&self, chain_id: &ChainId, tx_id: TransactionId);
}
