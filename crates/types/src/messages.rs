// Path: crates/types/src/messages.rs
//! Peer message tags and payloads.
//!
//! Every message travels as a [`PeerMessage`]: a one-byte type tag, the
//! sender's committee index and a SCALE-encoded payload.

use crate::codec::{from_bytes_canonical, to_bytes_canonical};
use crate::error::{CodecError, PeeringError};
use crate::ids::{Address, ChainId, HashValue, OutputId, RequestId};
use crate::request::{OffLedgerRequest, Request};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single-byte tag of a peer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PeerMsgType {
    /// Asks a peer for the block with a given index.
    GetBlock = 1,
    /// Carries an encoded block.
    Block = 2,
    /// Announces the essence hash a node signed.
    SignedResult = 3,
    /// Acknowledges a [`PeerMsgType::SignedResult`].
    SignedResultAck = 4,
    /// Relays an off-ledger request.
    OffLedgerRequest = 5,
    /// Asks peers for requests decided by ACS but unknown locally.
    MissingRequestIds = 6,
    /// Answers a [`PeerMsgType::MissingRequestIds`] with one request.
    MissingRequest = 7,
    /// Acknowledges a relayed off-ledger request.
    RequestAck = 8,
}

impl PeerMsgType {
    /// The wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PeerMsgType {
    type Error = PeeringError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => PeerMsgType::GetBlock,
            2 => PeerMsgType::Block,
            3 => PeerMsgType::SignedResult,
            4 => PeerMsgType::SignedResultAck,
            5 => PeerMsgType::OffLedgerRequest,
            6 => PeerMsgType::MissingRequestIds,
            7 => PeerMsgType::MissingRequest,
            8 => PeerMsgType::RequestAck,
            other => return Err(PeeringError::UnknownMsgType(other)),
        })
    }
}

/// Identifies the peer group of a committee: `chain_id XOR state_controller`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize)]
pub struct PeeringId(pub HashValue);

impl PeeringId {
    /// Derives the peering id of the committee controlling `chain_id` through `state_controller`.
    pub fn new(chain_id: &ChainId, state_controller: &Address) -> Self {
        let mut out = [0u8; 32];
        for ((o, c), s) in out.iter_mut().zip(chain_id.0.iter()).zip(state_controller.0.iter()) {
            *o = c ^ s;
        }
        PeeringId(out)
    }
}

impl fmt::Debug for PeeringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeeringId({})", hex::encode(self.0.get(..4).unwrap_or_default()))
    }
}

/// A message exchanged between committee members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// The committee the message belongs to.
    pub peering_id: PeeringId,
    /// The committee index of the sender.
    pub sender_index: u16,
    /// The message type.
    pub msg_type: PeerMsgType,
    /// The encoded payload.
    pub data: Vec<u8>,
}

impl PeerMessage {
    /// Encodes a payload into a message.
    pub fn new<T: Encode>(
        peering_id: PeeringId,
        sender_index: u16,
        msg_type: PeerMsgType,
        payload: &T,
    ) -> Self {
        Self {
            peering_id,
            sender_index,
            msg_type,
            data: to_bytes_canonical(payload),
        }
    }

    /// Decodes the payload.
    pub fn decode_payload<T: Decode>(&self) -> Result<T, CodecError> {
        from_bytes_canonical(&self.data)
    }

    /// Wire form: tag, sender index (LE), peering id, payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + 32 + self.data.len());
        out.push(self.msg_type.tag());
        out.extend_from_slice(&self.sender_index.to_le_bytes());
        out.extend_from_slice(&self.peering_id.0);
        out.extend_from_slice(&self.data);
        out
    }

    /// Parses the wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PeeringError> {
        if bytes.len() < 35 {
            return Err(PeeringError::Codec(CodecError::InvalidLength {
                expected: 35,
                got: bytes.len(),
            }));
        }
        let (head, rest) = bytes.split_at(3);
        let (peering, data) = rest.split_at(32);
        let (tag, sender) = head.split_at(1);
        let msg_type = PeerMsgType::try_from(tag.first().copied().unwrap_or_default())?;
        let sender_index = u16::from_le_bytes([
            sender.first().copied().unwrap_or_default(),
            sender.get(1).copied().unwrap_or_default(),
        ]);
        let mut id = [0u8; 32];
        id.copy_from_slice(peering);
        Ok(Self {
            peering_id: PeeringId(id),
            sender_index,
            msg_type,
            data: data.to_vec(),
        })
    }
}

/// Payload of [`PeerMsgType::GetBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct GetBlockMsg {
    /// The requested block index.
    pub block_index: u32,
}

/// Payload of [`PeerMsgType::Block`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlockMsg {
    /// The encoded block.
    pub block_bytes: Vec<u8>,
}

/// Payload of [`PeerMsgType::SignedResult`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SignedResultMsg {
    /// Hash of the essence the sender produced.
    pub essence_hash: HashValue,
    /// The anchor the result was computed on.
    pub chain_input_id: OutputId,
    /// The sender's log index.
    pub log_index: u32,
}

/// Payload of [`PeerMsgType::SignedResultAck`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SignedResultAckMsg {
    /// The anchor the acknowledged result was computed on.
    pub chain_input_id: OutputId,
    /// The acknowledged log index.
    pub log_index: u32,
    /// Whether the receiver's own result matched.
    pub matches: bool,
}

/// Payload of [`PeerMsgType::OffLedgerRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct OffLedgerRequestMsg {
    /// The relayed request.
    pub request: OffLedgerRequest,
}

/// Payload of [`PeerMsgType::MissingRequestIds`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct MissingRequestIdsMsg {
    /// The requests the sender lacks.
    pub ids: Vec<RequestId>,
}

/// Payload of [`PeerMsgType::MissingRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct MissingRequestMsg {
    /// The requested request.
    pub request: Request,
}

/// Payload of [`PeerMsgType::RequestAck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RequestAckMsg {
    /// The acknowledged request.
    pub request_id: RequestId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_keeps_header_fields() {
        let msg = PeerMessage::new(
            PeeringId([9; 32]),
            3,
            PeerMsgType::GetBlock,
            &GetBlockMsg { block_index: 77 },
        );
        let back = PeerMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(back, msg);
        assert_eq!(
            back.decode_payload::<GetBlockMsg>().unwrap().block_index,
            77
        );
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let mut bytes = PeerMessage::new(
            PeeringId([0; 32]),
            0,
            PeerMsgType::RequestAck,
            &RequestAckMsg {
                request_id: RequestId::default(),
            },
        )
        .to_bytes();
        bytes[0] = 0xEE;
        assert_eq!(
            PeerMessage::from_bytes(&bytes),
            Err(PeeringError::UnknownMsgType(0xEE))
        );
    }

    #[test]
    fn peering_id_is_xor() {
        let id = PeeringId::new(&ChainId([0b1010; 32]), &Address([0b0110; 32]));
        assert_eq!(id.0, [0b1100; 32]);
    }
}
