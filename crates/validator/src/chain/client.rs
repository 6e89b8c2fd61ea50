// Path: crates/validator/src/chain/client.rs
use super::ChainNode;
use async_trait::async_trait;
use kestrel_api::client::ChainClient;
use kestrel_types::dict::Dict;
use kestrel_types::error::{ChainError, StateError};
use kestrel_types::ids::{Hname, RequestId};
use kestrel_types::keys::BLOCKLOG_CONTRACT;
use kestrel_types::messages::{OffLedgerRequestMsg, PeerMessage, PeerMsgType};
use kestrel_types::receipt::RequestReceipt;
use kestrel_types::request::{CallTarget, OffLedgerRequest, Request};
use kestrel_vm::{call_view, VmError};
use parity_scale_codec::Encode;
use std::time::Duration;

const RECEIPT_POLL: Duration = Duration::from_millis(20);

impl ChainNode {
    fn ensure_running(&self) -> Result<(), ChainError> {
        match self.shared.dismissed() {
            Some(reason) => Err(ChainError::Dismissed(reason)),
            None => Ok(()),
        }
    }

    async fn view(&self, target: CallTarget, params: Dict) -> Result<Dict, ChainError> {
        let solid = self.solid.clone();
        let processors = self.processors.clone();
        let budget = self.gas.max_gas_external_view_call;
        let outcome = tokio::task::spawn_blocking(move || {
            solid.read(|reader| {
                match call_view(reader, &processors, target, params.clone(), budget) {
                    Err(VmError::StateInvalidated) => Err(StateError::StateInvalidated),
                    other => Ok(other),
                }
            })
        })
        .await
        .map_err(|e| ChainError::View(e.to_string()))??;
        outcome.map_err(|e| ChainError::View(e.to_string()))
    }
}

#[async_trait]
impl ChainClient for ChainNode {
    async fn send_off_ledger(&self, request: OffLedgerRequest) -> Result<RequestId, ChainError> {
        self.ensure_running()?;
        let id = request.id();
        let added = self
            .mempool
            .receive_checked(Request::OffLedger(request.clone()))?;
        if added {
            let peering_id = *self.shared.peering_id.read();
            if let Some(peering_id) = peering_id {
                let msg = PeerMessage::new(
                    peering_id,
                    self.peers.self_index(),
                    PeerMsgType::OffLedgerRequest,
                    &OffLedgerRequestMsg { request },
                );
                self.peers.broadcast(msg)?;
            }
            tracing::debug!(target: "chain", request = %id, "off-ledger request relayed");
        }
        Ok(id)
    }

    async fn call_view(
        &self,
        contract: Hname,
        entry_point: Hname,
        params: Dict,
    ) -> Result<Dict, ChainError> {
        self.ensure_running()?;
        self.view(
            CallTarget {
                contract,
                entry_point,
            },
            params,
        )
        .await
    }

    async fn await_receipt(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<RequestReceipt, ChainError> {
        let target = CallTarget::new(BLOCKLOG_CONTRACT, "get_request_receipt");
        let params = Dict::new().with("r", id.encode());
        let wait = async {
            loop {
                self.ensure_running()?;
                match self.view(target, params.clone()).await {
                    Ok(found) if found.get("r").is_some() => {
                        return found
                            .get_decoded::<RequestReceipt>("r")
                            .map_err(|e| ChainError::View(e.to_string()));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::trace!(target: "chain", request = %id, error = %e, "receipt lookup failed"),
                }
                tokio::time::sleep(RECEIPT_POLL).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ChainError::Timeout(format!("no receipt for {} after {:?}", id, timeout)))?
    }
}
