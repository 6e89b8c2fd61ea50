// Path: crates/validator/src/chain/dispatch.rs
//! Routes L1 events and peer messages to the components of one chain.

use super::mailbox::Mailbox;
use super::Shared;
use crate::mempool::Mempool;
use crate::statemgr::StateMsg;
use kestrel_api::l1::L1Handlers;
use kestrel_api::mempool::RequestPool;
use kestrel_api::peer::PeerTransport;
use kestrel_consensus::ConsensusMsg;
use kestrel_types::block::Block;
use kestrel_types::error::ChainError;
use kestrel_types::ledger::AnchorOutputWithId;
use kestrel_types::messages::{
    BlockMsg, GetBlockMsg, MissingRequestIdsMsg, MissingRequestMsg, OffLedgerRequestMsg,
    PeerMessage, PeerMsgType, PeeringId, RequestAckMsg,
};
use kestrel_types::request::Request;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct Dispatcher {
    pub(crate) shared: Arc<Shared>,
    pub(crate) mempool: Arc<Mempool>,
    pub(crate) consensus: Mailbox<ConsensusMsg>,
    pub(crate) state: Mailbox<StateMsg>,
    pub(crate) peers: Arc<dyn PeerTransport>,
}

fn dropped(mailbox: &'static str, e: ChainError) {
    debug!(target: "chain", mailbox, error = %e, "message not posted");
}

impl Dispatcher {
    fn on_anchor(&self, anchor: AnchorOutputWithId) {
        if anchor.output.chain_id != self.shared.chain_id {
            return;
        }
        let peering_id = PeeringId::new(&self.shared.chain_id, &anchor.output.state_controller);
        self.shared.peering_ids.write().insert(peering_id);
        *self.shared.peering_id.write() = Some(peering_id);
        if let Err(e) = self.state.post_control(StateMsg::Anchor(anchor)) {
            dropped(self.state.name(), e);
        }
    }

    /// The callbacks registered with the L1 connector.
    pub(crate) fn l1_handlers(self: &Arc<Self>) -> L1Handlers {
        let on_anchor = self.clone();
        let on_output = self.clone();
        let on_request = self.clone();
        let on_inclusion = self.clone();
        L1Handlers {
            on_new_anchor: Arc::new(move |anchor| on_anchor.on_anchor(anchor)),
            on_state_output: Arc::new(move |anchor| on_output.on_anchor(anchor)),
            on_new_on_ledger_request: Arc::new(move |request| {
                on_request.mempool.receive(vec![Request::OnLedger(request)]);
            }),
            on_tx_inclusion_state: Arc::new(move |tx_id, state| {
                if let Err(e) = on_inclusion
                    .consensus
                    .post_control(ConsensusMsg::TxInclusionState { tx_id, state })
                {
                    dropped(on_inclusion.consensus.name(), e);
                }
            }),
        }
    }

    pub(crate) fn on_peer_message(&self, msg: PeerMessage) {
        if !self.shared.peering_ids.read().contains(&msg.peering_id) {
            debug!(target: "chain", from = msg.sender_index, "message of an unknown peer group dropped");
            return;
        }
        let from = msg.sender_index;
        let routed = match msg.msg_type {
            PeerMsgType::GetBlock => msg.decode_payload::<GetBlockMsg>().map(|m| {
                self.to_state(StateMsg::GetBlock {
                    from,
                    peering_id: msg.peering_id,
                    index: m.block_index,
                })
            }),
            PeerMsgType::Block => msg.decode_payload::<BlockMsg>().and_then(|m| {
                let block = Block::from_bytes(&m.block_bytes)?;
                self.to_state(StateMsg::Block { from, block });
                Ok(())
            }),
            PeerMsgType::SignedResult => msg
                .decode_payload()
                .map(|m| self.to_consensus(ConsensusMsg::SignedResult { from, msg: m })),
            PeerMsgType::SignedResultAck => msg
                .decode_payload()
                .map(|m| self.to_consensus(ConsensusMsg::SignedResultAck { from, msg: m })),
            PeerMsgType::MissingRequestIds => msg
                .decode_payload::<MissingRequestIdsMsg>()
                .map(|m| self.to_consensus(ConsensusMsg::MissingRequestIds { from, ids: m.ids })),
            PeerMsgType::MissingRequest => msg
                .decode_payload::<MissingRequestMsg>()
                .map(|m| self.to_consensus(ConsensusMsg::MissingRequest(m.request))),
            PeerMsgType::OffLedgerRequest => msg
                .decode_payload::<OffLedgerRequestMsg>()
                .map(|m| self.on_relayed_request(from, msg.peering_id, m)),
            PeerMsgType::RequestAck => msg.decode_payload::<RequestAckMsg>().map(|m| {
                self.shared
                    .request_acks
                    .lock()
                    .get_or_insert_mut(m.request_id, Default::default)
                    .insert(from);
            }),
        };
        if let Err(e) = routed {
            debug!(target: "chain", from, msg_type = ?msg.msg_type, error = %e, "undecodable peer message");
        }
    }

    fn to_state(&self, msg: StateMsg) {
        if let Err(e) = self.state.post(msg) {
            dropped(self.state.name(), e);
        }
    }

    fn to_consensus(&self, msg: ConsensusMsg) {
        if let Err(e) = self.consensus.post(msg) {
            dropped(self.consensus.name(), e);
        }
    }

    fn on_relayed_request(&self, from: u16, peering_id: PeeringId, m: OffLedgerRequestMsg) {
        let id = m.request.id();
        match self.mempool.receive_checked(Request::OffLedger(m.request)) {
            Ok(_) => {
                let ack = PeerMessage::new(
                    peering_id,
                    self.peers.self_index(),
                    PeerMsgType::RequestAck,
                    &RequestAckMsg { request_id: id },
                );
                if let Err(e) = self.peers.send_to(from, ack) {
                    debug!(target: "chain", to = from, error = %e, "request ack not sent");
                }
            }
            Err(e) => debug!(target: "chain", from, request = %id, error = %e, "relayed request refused"),
        }
    }
}
