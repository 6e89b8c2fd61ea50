// Path: crates/api/src/client.rs
//! The client-facing surface of a running chain.

use async_trait::async_trait;
use kestrel_types::dict::Dict;
use kestrel_types::error::ChainError;
use kestrel_types::ids::{Hname, RequestId};
use kestrel_types::receipt::RequestReceipt;
use kestrel_types::request::OffLedgerRequest;
use std::time::Duration;

/// Submits requests to a chain and queries it.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Verifies, pools and relays an off-ledger request.
    async fn send_off_ledger(&self, request: OffLedgerRequest) -> Result<RequestId, ChainError>;

    /// Runs a view entry point against the solid state.
    async fn call_view(
        &self,
        contract: Hname,
        entry_point: Hname,
        params: Dict,
    ) -> Result<Dict, ChainError>;

    /// Waits until the request has a receipt in the block log.
    async fn await_receipt(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<RequestReceipt, ChainError>;
}
