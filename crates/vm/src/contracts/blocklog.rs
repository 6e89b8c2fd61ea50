// Path: crates/vm/src/contracts/blocklog.rs
//! The `blocklog` core contract: block info, receipts, events and the
//! history of control addresses.
//!
//! Indices in keys are big-endian so prefix scans return blocks and requests
//! in order.

use crate::errors::{CoreError, VmError};
use crate::partition::{load, save, Kv};
use crate::processors::{EntryPoint, Processor};
use crate::sandbox::Sandbox;
use kestrel_api::state::StateReader;
use kestrel_types::block_info::{BlockInfo, ControlAddresses};
use kestrel_types::codec::{decode_u32, from_bytes_canonical};
use kestrel_types::dict::Dict;
use kestrel_types::error::StateError;
use kestrel_types::ids::{Hname, RequestId, TransactionId};
use kestrel_types::keys::{contract_key, BLOCKLOG_CONTRACT, KEY_BLOCK_INDEX};
use kestrel_types::ledger::L1Commitment;
use kestrel_types::receipt::{Event, RequestLookupKey, RequestReceipt};
use parity_scale_codec::Encode;

const PREFIX_BLOCK: u8 = b'b';
const PREFIX_RECEIPT: u8 = b'r';
const PREFIX_LOOKUP: u8 = b'q';
const PREFIX_EVENT: u8 = b'e';
const KEY_CONTROL: &[u8] = b"c";

const ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::view("get_block_info"),
    EntryPoint::view("get_latest_block_info"),
    EntryPoint::view("get_request_receipt"),
    EntryPoint::view("get_request_receipts_for_block"),
    EntryPoint::view("is_request_processed"),
    EntryPoint::view("get_events_for_request"),
    EntryPoint::view("get_events_for_block"),
    EntryPoint::view("control_addresses"),
];

fn block_key(index: u32) -> Vec<u8> {
    let mut key = vec![PREFIX_BLOCK];
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn receipt_key(block: u32, request: u16) -> Vec<u8> {
    let mut key = vec![PREFIX_RECEIPT];
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(&request.to_be_bytes());
    key
}

fn lookup_key(id: &RequestId) -> Vec<u8> {
    let mut key = vec![PREFIX_LOOKUP];
    key.extend_from_slice(&id.to_bytes());
    key
}

fn event_prefix(block: u32, request: Option<u16>) -> Vec<u8> {
    let mut key = vec![PREFIX_EVENT];
    key.extend_from_slice(&block.to_be_bytes());
    if let Some(r) = request {
        key.extend_from_slice(&r.to_be_bytes());
    }
    key
}

/// Stores the info of a closed block.
pub fn save_block_info(kv: &mut dyn Kv, info: &BlockInfo) -> Result<(), VmError> {
    save(kv, &block_key(info.block_index), info)
}

/// The info of block `index`.
pub fn block_info(kv: &mut dyn Kv, index: u32) -> Result<Option<BlockInfo>, VmError> {
    load(kv, &block_key(index))
}

/// Fills in the L1 data of block `index` once its anchor is confirmed.
pub fn confirm_block(
    kv: &mut dyn Kv,
    index: u32,
    commitment: L1Commitment,
    tx: TransactionId,
) -> Result<(), VmError> {
    let Some(mut info) = block_info(kv, index)? else {
        return Ok(());
    };
    if info.l1_commitment.is_some() {
        return Ok(());
    }
    info.l1_commitment = Some(commitment);
    info.anchor_transaction_id = Some(tx);
    save_block_info(kv, &info)
}

/// Stores a receipt and the lookup entry of its request.
pub fn save_receipt(kv: &mut dyn Kv, receipt: &RequestReceipt) -> Result<(), VmError> {
    save(
        kv,
        &receipt_key(receipt.block_index, receipt.request_index),
        receipt,
    )?;
    save(kv, &lookup_key(&receipt.request_id()), &receipt.lookup_key())
}

/// The receipt of request `id`.
pub fn receipt_for_request(kv: &mut dyn Kv, id: &RequestId) -> Result<Option<RequestReceipt>, VmError> {
    match load::<RequestLookupKey>(kv, &lookup_key(id))? {
        Some(l) => load(kv, &receipt_key(l.block_index, l.request_index)),
        None => Ok(None),
    }
}

/// All receipts of block `index`, in request order.
pub fn receipts_for_block(kv: &mut dyn Kv, index: u32) -> Result<Vec<RequestReceipt>, VmError> {
    let mut prefix = vec![PREFIX_RECEIPT];
    prefix.extend_from_slice(&index.to_be_bytes());
    kv.scan(&prefix)?
        .into_iter()
        .map(|(_, v)| from_bytes_canonical(&v).map_err(|e| VmError::Db(e.to_string())))
        .collect()
}

/// Returns `true` if request `id` has a receipt.
pub fn is_request_processed(kv: &mut dyn Kv, id: &RequestId) -> Result<bool, VmError> {
    kv.has(&lookup_key(id))
}

/// Stores the events of one request.
pub fn save_events(kv: &mut dyn Kv, block: u32, request: u16, events: &[Event]) -> Result<(), VmError> {
    let prefix = event_prefix(block, Some(request));
    for (i, event) in (0u16..).zip(events) {
        let mut key = prefix.clone();
        key.extend_from_slice(&i.to_be_bytes());
        save(kv, &key, event)?;
    }
    Ok(())
}

fn scan_events(kv: &mut dyn Kv, prefix: &[u8]) -> Result<Vec<Event>, VmError> {
    kv.scan(prefix)?
        .into_iter()
        .map(|(_, v)| from_bytes_canonical(&v).map_err(|e| VmError::Db(e.to_string())))
        .collect()
}

/// The events of request `id`.
pub fn events_for_request(kv: &mut dyn Kv, id: &RequestId) -> Result<Vec<Event>, VmError> {
    match load::<RequestLookupKey>(kv, &lookup_key(id))? {
        Some(l) => scan_events(kv, &event_prefix(l.block_index, Some(l.request_index))),
        None => Ok(Vec::new()),
    }
}

/// The events of block `index`.
pub fn events_for_block(kv: &mut dyn Kv, index: u32) -> Result<Vec<Event>, VmError> {
    scan_events(kv, &event_prefix(index, None))
}

/// The control addresses in effect.
pub fn control_addresses(kv: &mut dyn Kv) -> Result<Option<ControlAddresses>, VmError> {
    load(kv, KEY_CONTROL)
}

/// Records new control addresses.
pub fn save_control_addresses(kv: &mut dyn Kv, addresses: &ControlAddresses) -> Result<(), VmError> {
    save(kv, KEY_CONTROL, addresses)
}

/// Where the receipt of request `id` lives, read from any state.
pub fn request_lookup(
    reader: &dyn StateReader,
    id: &RequestId,
) -> Result<Option<RequestLookupKey>, StateError> {
    let key = contract_key(Hname::from_name(BLOCKLOG_CONTRACT), &lookup_key(id));
    match reader.get(&key)? {
        Some(bytes) => Ok(Some(from_bytes_canonical(&bytes)?)),
        None => Ok(None),
    }
}

/// The `blocklog` processor.
pub struct Blocklog;

impl Processor for Blocklog {
    fn entry_points(&self) -> &[EntryPoint] {
        ENTRY_POINTS
    }

    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError> {
        match entry_point {
            "get_block_info" => {
                let index: u32 = ctx.param("n")?;
                block_info_dict(ctx, index)
            }
            "get_latest_block_info" => {
                let raw = ctx
                    .chain_value(KEY_BLOCK_INDEX)?
                    .ok_or_else(|| VmError::Db("block index missing".into()))?;
                let index = decode_u32(&raw).map_err(|e| VmError::Db(e.to_string()))?;
                block_info_dict(ctx, index)
            }
            "get_request_receipt" => {
                let id: RequestId = ctx.param("r")?;
                let receipt = receipt_for_request(&mut ctx.state(), &id)?;
                Ok(match receipt {
                    Some(r) => Dict::new().with("r", r.encode()),
                    None => Dict::new(),
                })
            }
            "get_request_receipts_for_block" => {
                let index: u32 = ctx.param("n")?;
                let receipts = receipts_for_block(&mut ctx.state(), index)?;
                Ok(Dict::new().with("r", receipts.encode()))
            }
            "is_request_processed" => {
                let id: RequestId = ctx.param("r")?;
                let done = is_request_processed(&mut ctx.state(), &id)?;
                Ok(Dict::new().with("p", done.encode()))
            }
            "get_events_for_request" => {
                let id: RequestId = ctx.param("r")?;
                let events = events_for_request(&mut ctx.state(), &id)?;
                Ok(Dict::new().with("e", events.encode()))
            }
            "get_events_for_block" => {
                let index: u32 = ctx.param("n")?;
                let events = events_for_block(&mut ctx.state(), index)?;
                Ok(Dict::new().with("e", events.encode()))
            }
            "control_addresses" => {
                let c = control_addresses(&mut ctx.state())?
                    .ok_or_else(|| CoreError::NotFound.with(["control", "addresses"]))?;
                Ok(Dict::new().with("c", c.encode()))
            }
            _ => Err(CoreError::EntryPointNotFound.with([entry_point])),
        }
    }
}

fn block_info_dict(ctx: &mut Sandbox<'_, '_>, index: u32) -> Result<Dict, VmError> {
    let info = block_info(&mut ctx.state(), index)?
        .ok_or_else(|| CoreError::NotFound.with(["block".to_string(), index.to_string()]))?;
    Ok(Dict::new().with("n", index.encode()).with("i", info.to_bytes()))
}
