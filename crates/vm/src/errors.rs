// Path: crates/vm/src/errors.rs
//! VM errors.
//!
//! A request-level failure travels as an [`UnresolvedVmError`]: a template
//! code plus its arguments. That form is what receipts store, so the message
//! text never touches the state commitment. Core templates live under the
//! reserved contract hname `0`; [`resolve_message`] renders any error for logs
//! and clients.

use kestrel_tx::BuildError;
use kestrel_types::error::{StateError, TxBuilderError};
use kestrel_types::ids::Hname;
use kestrel_types::receipt::{UnresolvedVmError, VmErrorCode};
use thiserror::Error;

/// The contract hname under which core error templates are registered.
pub const CORE_ERROR_CONTRACT: Hname = Hname(0);

/// An error raised while executing a request or a batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The request failed. Its effects are rolled back and the error lands in its receipt.
    #[error("{}", resolve_message(.0))]
    Request(UnresolvedVmError),
    /// The optimistic baseline of the state went stale. Aborts the batch.
    #[error("state invalidated")]
    StateInvalidated,
    /// The state could not be read or decoded. Aborts the batch.
    #[error("database error: {0}")]
    Db(String),
    /// The rent structure needs larger deposits than the chain persisted.
    #[error("inconsistent storage deposit assumptions: {0}")]
    InconsistentStorageDepositAssumptions(String),
    /// The task's anchor does not belong to its state.
    #[error("anchor and state disagree: {0}")]
    StateMismatch(String),
}

impl VmError {
    /// Returns `true` for errors that abandon the whole batch.
    pub fn aborts_batch(&self) -> bool {
        !matches!(self, VmError::Request(_))
    }

    /// The request-level error, if this is one.
    pub fn as_request(&self) -> Option<&UnresolvedVmError> {
        match self {
            VmError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UnresolvedVmError> for VmError {
    fn from(e: UnresolvedVmError) -> Self {
        VmError::Request(e)
    }
}

impl From<StateError> for VmError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::StateInvalidated => VmError::StateInvalidated,
            other => VmError::Db(other.to_string()),
        }
    }
}

impl From<TxBuilderError> for VmError {
    fn from(e: TxBuilderError) -> Self {
        match e {
            TxBuilderError::InputLimitExceeded => {
                CoreError::TransactionLimitExceeded.with(["inputs"])
            }
            TxBuilderError::OutputLimitExceeded => {
                CoreError::TransactionLimitExceeded.with(["outputs"])
            }
            TxBuilderError::TotalNativeTokensLimitExceeded => {
                CoreError::TransactionLimitExceeded.with(["native tokens"])
            }
            TxBuilderError::NotEnoughFundsForInternalStorageDeposit => {
                CoreError::NotEnoughFundsForInternalStorageDeposit.err()
            }
            TxBuilderError::NotEnoughBaseTokensForStorageDeposit {
                available,
                required,
            } => CoreError::NotEnoughBaseTokensForStorageDeposit.with([available, required]),
            TxBuilderError::NotEnoughBaseTokensBalance => {
                CoreError::NotEnoughFunds.with(["base tokens"])
            }
            TxBuilderError::NotEnoughNativeTokens(id) => CoreError::NotEnoughFunds.with([id]),
            TxBuilderError::Overflow => CoreError::Overflow.err(),
            TxBuilderError::InconsistentL2WithL1(msg) => CoreError::InconsistentL2WithL1.with([msg]),
            TxBuilderError::FoundryNotFound(serial) => CoreError::FoundryNotFound.with([serial]),
            TxBuilderError::NftNotFound(id) => CoreError::NftNotFound.with([id]),
        }
    }
}

impl From<BuildError> for VmError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Tx(e) => e.into(),
            BuildError::State(e) => e.into(),
        }
    }
}

/// Errors any contract call can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CoreError {
    /// No contract is deployed under the hname.
    ContractNotFound = 1,
    /// The contract has no such entry point.
    EntryPointNotFound,
    /// A full entry point was called in a read-only context.
    NotAView,
    /// A parameter is missing or malformed.
    InvalidParams,
    /// The caller may not call the entry point.
    Unauthorized,
    /// The sender cannot pay the minimum fee.
    NotEnoughFeesToPay,
    /// An account or allowance holds less than requested.
    NotEnoughFunds,
    /// An amount is zero or otherwise unusable.
    BadAmount,
    /// Token arithmetic overflowed.
    Overflow,
    /// The request burned its whole gas budget.
    GasBudgetExceeded,
    /// The request posted more outputs than allowed.
    ExceededPostedOutputLimit,
    /// The chain cannot lock the deposit of a new internal output.
    NotEnoughFundsForInternalStorageDeposit,
    /// A posted output carries less than its storage deposit.
    NotEnoughBaseTokensForStorageDeposit,
    /// L2 accounting disagrees with the L1 outputs.
    InconsistentL2WithL1,
    /// The anchor transaction is full.
    TransactionLimitExceeded,
    /// The chain owns no such foundry.
    FoundryNotFound,
    /// The chain holds no such NFT.
    NftNotFound,
    /// The request emitted too many events.
    TooManyEvents,
    /// An event payload is too large.
    EventTooLarge,
    /// Nested calls went too deep.
    CallDepthExceeded,
    /// A view tried to write state or move assets.
    ReadOnlyState,
    /// The chain was initialized already.
    AlreadyInitialized,
    /// A contract with the same name exists.
    ContractAlreadyExists,
    /// A record the call needs does not exist.
    NotFound,
    /// The state controller was already rotated at this state index.
    RotationAlreadyPerformed,
    /// The contract panicked.
    Panic,
}

impl CoreError {
    /// The template id.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// The full error code.
    pub fn code(self) -> VmErrorCode {
        VmErrorCode {
            contract: CORE_ERROR_CONTRACT,
            id: self.id(),
        }
    }

    /// The message template. `%v` placeholders take the arguments in order.
    pub fn template(self) -> &'static str {
        match self {
            CoreError::ContractNotFound => "contract %v not found",
            CoreError::EntryPointNotFound => "entry point %v not found",
            CoreError::NotAView => "entry point %v is not a view",
            CoreError::InvalidParams => "invalid params: %v",
            CoreError::Unauthorized => "unauthorized access",
            CoreError::NotEnoughFeesToPay => "not enough fees to pay: available %v, required %v",
            CoreError::NotEnoughFunds => "not enough funds: %v",
            CoreError::BadAmount => "bad amount: %v",
            CoreError::Overflow => "arithmetic overflow",
            CoreError::GasBudgetExceeded => "gas budget exceeded: %v",
            CoreError::ExceededPostedOutputLimit => "exceeded posted output limit: %v",
            CoreError::NotEnoughFundsForInternalStorageDeposit => {
                "not enough funds for internal storage deposit"
            }
            CoreError::NotEnoughBaseTokensForStorageDeposit => {
                "not enough base tokens for storage deposit: available %v, required %v"
            }
            CoreError::InconsistentL2WithL1 => "inconsistent L2 with L1: %v",
            CoreError::TransactionLimitExceeded => "transaction %v limit exceeded",
            CoreError::FoundryNotFound => "foundry %v not found",
            CoreError::NftNotFound => "NFT %v not found",
            CoreError::TooManyEvents => "too many events: limit %v",
            CoreError::EventTooLarge => "event too large: %v > %v",
            CoreError::CallDepthExceeded => "call depth exceeded: %v",
            CoreError::ReadOnlyState => "state is read-only",
            CoreError::AlreadyInitialized => "chain already initialized",
            CoreError::ContractAlreadyExists => "contract %v already exists",
            CoreError::NotFound => "%v %v not found",
            CoreError::RotationAlreadyPerformed => "rotation already performed at state index %v",
            CoreError::Panic => "panic: %v",
        }
    }

    /// The error with template arguments.
    pub fn with<I, S>(self, params: I) -> VmError
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        VmError::Request(UnresolvedVmError::new(
            self.code(),
            params.into_iter().map(|p| p.to_string()).collect(),
        ))
    }

    /// The error without arguments.
    pub fn err(self) -> VmError {
        self.with(std::iter::empty::<String>())
    }

    /// Maps a code back to a core error.
    pub fn from_code(code: VmErrorCode) -> Option<CoreError> {
        if code.contract != CORE_ERROR_CONTRACT {
            return None;
        }
        ALL_CORE_ERRORS.iter().copied().find(|e| e.id() == code.id)
    }

    /// Returns `true` if `err` carries this code.
    pub fn matches(self, err: &UnresolvedVmError) -> bool {
        err.code == self.code()
    }
}

const ALL_CORE_ERRORS: [CoreError; 26] = [
    CoreError::ContractNotFound,
    CoreError::EntryPointNotFound,
    CoreError::NotAView,
    CoreError::InvalidParams,
    CoreError::Unauthorized,
    CoreError::NotEnoughFeesToPay,
    CoreError::NotEnoughFunds,
    CoreError::BadAmount,
    CoreError::Overflow,
    CoreError::GasBudgetExceeded,
    CoreError::ExceededPostedOutputLimit,
    CoreError::NotEnoughFundsForInternalStorageDeposit,
    CoreError::NotEnoughBaseTokensForStorageDeposit,
    CoreError::InconsistentL2WithL1,
    CoreError::TransactionLimitExceeded,
    CoreError::FoundryNotFound,
    CoreError::NftNotFound,
    CoreError::TooManyEvents,
    CoreError::EventTooLarge,
    CoreError::CallDepthExceeded,
    CoreError::ReadOnlyState,
    CoreError::AlreadyInitialized,
    CoreError::ContractAlreadyExists,
    CoreError::NotFound,
    CoreError::RotationAlreadyPerformed,
    CoreError::Panic,
];

/// Renders an error for humans.
///
/// Core codes fill their template; contract-defined codes print the code and
/// the raw arguments. Unused arguments are appended, missing ones stay `%v`.
pub fn resolve_message(err: &UnresolvedVmError) -> String {
    let Some(core) = CoreError::from_code(err.code) else {
        return format!("contract error {}: {}", err.code, err.params.join(", "));
    };
    let mut params = err.params.iter();
    let mut out = String::new();
    let mut pieces = core.template().split("%v").peekable();
    while let Some(piece) = pieces.next() {
        out.push_str(piece);
        if pieces.peek().is_some() {
            match params.next() {
                Some(p) => out.push_str(p),
                None => out.push_str("%v"),
            }
        }
    }
    let rest: Vec<&str> = params.map(String::as_str).collect();
    if !rest.is_empty() {
        out.push_str(" [");
        out.push_str(&rest.join(", "));
        out.push(']');
    }
    out
}
