// Path: crates/consensus/src/messages.rs
//! Inputs and outputs of the consensus controller.

use kestrel_api::consensus::{AcsOutput, DssKey};
use kestrel_state::{Baseline, VirtualState};
use kestrel_types::block::Block;
use kestrel_types::ids::{OutputId, RequestId, TransactionId};
use kestrel_types::ledger::AnchorOutputWithId;
use kestrel_types::messages::{SignedResultAckMsg, SignedResultMsg};
use kestrel_types::request::Request;
use kestrel_vm::{VmError, VmTaskResult};
use std::sync::Arc;

/// Everything the controller reacts to. Callbacks of the ACS, DSS and VM
/// collaborators come back through a [`ConsensusSink`] as one of these.
#[derive(Debug)]
pub enum ConsensusMsg {
    /// The state manager has the state the anchor commits to.
    StateReceived {
        anchor: AnchorOutputWithId,
        state: VirtualState,
        baseline: Option<Baseline>,
    },
    Acs(AcsOutput),
    DssIndexProposal { key: DssKey, proposal: Vec<u16> },
    DssSignature { key: DssKey, signature: Vec<u8> },
    VmResult {
        anchor_id: OutputId,
        log_index: u32,
        result: Result<VmTaskResult, VmError>,
    },
    /// The L1 connector answered an inclusion state query.
    TxInclusionState { tx_id: TransactionId, state: String },
    MissingRequestIds { from: u16, ids: Vec<RequestId> },
    MissingRequest(Request),
    SignedResult { from: u16, msg: SignedResultMsg },
    SignedResultAck { from: u16, msg: SignedResultAckMsg },
    Tick,
}

/// Where collaborator callbacks deliver their results.
pub type ConsensusSink = Arc<dyn Fn(ConsensusMsg) + Send + Sync>;

/// What the controller tells the chain runtime.
#[derive(Debug, Clone)]
pub enum ControllerOutput {
    /// The block the committee signed, for the state manager to hold until
    /// its anchor shows up.
    StateCandidate {
        block: Block,
        state: VirtualState,
        approving_output: OutputId,
    },
    /// The round's transaction was confirmed by L1.
    TransactionIncluded {
        tx_id: TransactionId,
        anchor: Option<AnchorOutputWithId>,
        processed: Vec<RequestId>,
    },
    /// The node cannot continue on this chain.
    Dismiss(String),
}
