// Path: crates/types/src/error/mod.rs
//! Core error types for the kestrel chain runtime.

use thiserror::Error;

/// Errors raised by the canonical codec and hand-written binary formats.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The bytes could not be decoded into the requested type.
    #[error("Decode failed: {0}")]
    Decode(String),
    /// A fixed-width field had the wrong length.
    #[error("Invalid length. Expected {expected}, got {got}")]
    InvalidLength {
        /// The required number of bytes.
        expected: usize,
        /// The number of bytes provided.
        got: usize,
    },
    /// A decoded value was outside its permitted range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Errors related to the state tree, the virtual state or optimistic reads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The requested key was not found in the state.
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    /// State validation failed.
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Applying a state change failed.
    #[error("Apply failed: {0}")]
    Apply(String),
    /// A stored value could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
    /// The solid state advanced past a reader's baseline. Callers retry from scratch.
    #[error("State invalidated: the solid state index advanced past the read baseline")]
    StateInvalidated,
    /// A storage layer failure. Fatal for the running batch.
    #[error("Database error: {0}")]
    Db(String),
    /// The requested historical root is not retained.
    #[error("Unknown state root: {0}")]
    UnknownRoot(String),
}

impl From<CodecError> for StateError {
    fn from(e: CodecError) -> Self {
        StateError::Decode(e.to_string())
    }
}

/// Errors related to block validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// The block's index does not follow the parent state.
    #[error("Invalid block index. Expected {expected}, got {got}")]
    InvalidIndex {
        /// The expected block index.
        expected: u32,
        /// The index of the received block.
        got: u32,
    },
    /// The block's previous-commitment field does not match the parent state.
    #[error("Mismatched previous L1 commitment. Expected {expected}, got {got}")]
    MismatchedPreviousCommitment {
        /// The commitment of the parent state.
        expected: String,
        /// The commitment recorded in the block.
        got: String,
    },
    /// Replaying the block does not reproduce the committed state commitment.
    #[error("Mismatched state commitment. Expected {expected}, got {got}")]
    MismatchedStateCommitment {
        /// The commitment approved on L1 or by the next block.
        expected: String,
        /// The commitment produced by replaying the block.
        got: String,
    },
    /// The block could not be decoded.
    #[error("Block decode failed: {0}")]
    Codec(#[from] CodecError),
    /// Applying the block's mutations failed.
    #[error("Block apply failed: {0}")]
    State(#[from] StateError),
}

/// Errors raised by the anchor transaction builder. Each aborts the triggering request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxBuilderError {
    /// The transaction cannot hold more inputs.
    #[error("Input limit exceeded")]
    InputLimitExceeded,
    /// The transaction cannot hold more outputs.
    #[error("Output limit exceeded")]
    OutputLimitExceeded,
    /// Too many distinct native tokens are touched by the transaction.
    #[error("Total native tokens limit exceeded")]
    TotalNativeTokensLimitExceeded,
    /// The chain has not enough base tokens to cover an internal output's storage deposit.
    #[error("Not enough funds for internal storage deposit")]
    NotEnoughFundsForInternalStorageDeposit,
    /// A posted output carries less than its minimum storage deposit.
    #[error("Not enough base tokens for storage deposit: available {available} < required {required}")]
    NotEnoughBaseTokensForStorageDeposit {
        /// Base tokens carried by the output.
        available: u64,
        /// Minimum storage deposit of the output.
        required: u64,
    },
    /// The on-chain base token total would go negative.
    #[error("Not enough base tokens balance")]
    NotEnoughBaseTokensBalance,
    /// A native token balance would go negative.
    #[error("Not enough native tokens: {0}")]
    NotEnoughNativeTokens(String),
    /// An arithmetic overflow in token accounting.
    #[error("Arithmetic overflow")]
    Overflow,
    /// L2 accounting disagrees with the assets held in L1 outputs.
    #[error("Inconsistent L2 with L1: {0}")]
    InconsistentL2WithL1(String),
    /// The referenced foundry is not owned by the chain.
    #[error("Foundry not found: {0}")]
    FoundryNotFound(u32),
    /// The referenced NFT is not owned by the chain.
    #[error("NFT not found: {0}")]
    NftNotFound(String),
}

/// Errors related to the consensus controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The ACS result is inconsistent with the local view.
    #[error("Consensus mismatch: {0}")]
    ConsensusMismatch(String),
    /// L1 reports a conflicting transaction as included.
    #[error("Inclusion conflict: {0}")]
    InclusionConflict(String),
    /// A batch proposal could not be built or decoded.
    #[error("Invalid batch proposal: {0}")]
    InvalidProposal(String),
    /// The DSS black box rejected a call.
    #[error("DSS error: {0}")]
    Dss(String),
    /// The ACS black box rejected a call.
    #[error("ACS error: {0}")]
    Acs(String),
    /// The controller has no current state to work on.
    #[error("No current state")]
    NoState,
    /// An error occurred while accessing the state.
    #[error("State access error: {0}")]
    StateAccess(#[from] StateError),
}

/// Errors raised by the mempool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    /// Some decided request ids are not known locally. Carries their batch positions.
    #[error("Missing requests at positions {0:?}")]
    MissingRequests(Vec<usize>),
    /// An off-ledger request failed signature verification.
    #[error("Invalid request signature: {0}")]
    InvalidSignature(String),
    /// The request targets another chain.
    #[error("Request targets a different chain")]
    WrongChain,
    /// The request was already processed according to the block log.
    #[error("Request already processed: {0}")]
    AlreadyProcessed(String),
}

/// Errors surfaced by an L1 connector.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum L1Error {
    /// The chain was not registered with the connector.
    #[error("Chain not registered: {0}")]
    NotRegistered(String),
    /// The ledger rejected a transaction.
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    /// The connection to the ledger failed.
    #[error("L1 connection error: {0}")]
    Connection(String),
}

/// Errors related to peer messaging.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeeringError {
    /// The message tag is not one of the known peer message types.
    #[error("Unknown peer message type: {0}")]
    UnknownMsgType(u8),
    /// No peer with the given committee index.
    #[error("Unknown peer index: {0}")]
    UnknownPeer(u16),
    /// The message payload could not be decoded.
    #[error("Peer message decode failed: {0}")]
    Codec(#[from] CodecError),
    /// The transport is closed.
    #[error("Peer transport closed")]
    Closed,
}

/// Errors at the boundary of a running chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A bounded component mailbox rejected a message.
    #[error("Mailbox of {0} is full")]
    MailboxFull(&'static str),
    /// The chain's event loops have stopped.
    #[error("Chain is closed")]
    Closed,
    /// The chain was dismissed.
    #[error("Chain dismissed: {0}")]
    Dismissed(String),
    /// A state error surfaced at the chain boundary.
    #[error("State error: {0}")]
    State(#[from] StateError),
    /// A mempool error surfaced at the chain boundary.
    #[error("Mempool error: {0}")]
    Mempool(#[from] MempoolError),
    /// A peering error surfaced at the chain boundary.
    #[error("Peering error: {0}")]
    Peering(#[from] PeeringError),
    /// A configuration or storage bootstrap error.
    #[error("Initialization failed: {0}")]
    Init(String),
    /// A view call failed inside the VM.
    #[error("View call failed: {0}")]
    View(String),
    /// A request-level wait timed out.
    #[error("Timed out: {0}")]
    Timeout(String),
}
