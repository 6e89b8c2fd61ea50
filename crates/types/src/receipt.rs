// Path: crates/types/src/receipt.rs
//! Request receipts and VM error codes.

use crate::ids::{Hname, RequestId};
use crate::request::Request;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an error template registered by a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct VmErrorCode {
    /// The contract that registered the template. Core errors use hname 0.
    pub contract: Hname,
    /// The template id within the contract.
    pub id: u16,
}

impl fmt::Display for VmErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.contract, self.id)
    }
}

/// A VM error in its stored form: a code plus the template arguments.
///
/// Receipts store this form so the message text never influences the state commitment.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct UnresolvedVmError {
    /// The error template.
    pub code: VmErrorCode,
    /// Arguments for the template's placeholders.
    pub params: Vec<String>,
}

impl UnresolvedVmError {
    /// Creates an error with the given code and arguments.
    pub fn new(code: VmErrorCode, params: Vec<String>) -> Self {
        Self { code, params }
    }
}

impl fmt::Display for UnresolvedVmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm error {} {:?}", self.code, self.params)
    }
}

/// The outcome of one processed request, stored in the block log.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct RequestReceipt {
    /// The processed request.
    pub request: Request,
    /// The error, if the request failed.
    pub error: Option<UnresolvedVmError>,
    /// The gas budget the request ran with.
    pub gas_budget: u64,
    /// Gas actually burned.
    pub gas_burned: u64,
    /// Fee charged for the burned gas.
    pub gas_fee_charged: u64,
    /// The block the request was processed in.
    pub block_index: u32,
    /// The position of the request within the block.
    pub request_index: u16,
}

impl RequestReceipt {
    /// The key under which the receipt is looked up.
    pub fn lookup_key(&self) -> RequestLookupKey {
        RequestLookupKey {
            block_index: self.block_index,
            request_index: self.request_index,
        }
    }

    /// The id of the processed request.
    pub fn request_id(&self) -> RequestId {
        self.request.id()
    }
}

/// Points to a receipt: block index plus position within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize)]
pub struct RequestLookupKey {
    /// The block index.
    pub block_index: u32,
    /// The request index within the block.
    pub request_index: u16,
}

impl RequestLookupKey {
    /// Fixed 6-byte key: block index LE followed by request index LE.
    pub fn to_bytes(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        let (b, r) = out.split_at_mut(4);
        b.copy_from_slice(&self.block_index.to_le_bytes());
        r.copy_from_slice(&self.request_index.to_le_bytes());
        out
    }
}

/// An event emitted by a contract during a request.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Event {
    /// The emitting contract.
    pub contract: Hname,
    /// Event topic.
    pub topic: String,
    /// Event payload.
    pub payload: Vec<u8>,
    /// Block timestamp in unix nanoseconds.
    pub timestamp: u64,
}
