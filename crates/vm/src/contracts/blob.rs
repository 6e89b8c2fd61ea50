// Path: crates/vm/src/contracts/blob.rs
//! The `blob` core contract: content-addressed sets of named fields.
//!
//! A blob whose field `v` is `native` names a native program in field `p`;
//! the root contract deploys contracts from such blobs.

use crate::errors::{CoreError, VmError};
use crate::gas::BurnCode;
use crate::partition::{load, save, Kv};
use crate::processors::{EntryPoint, Processor};
use crate::sandbox::Sandbox;
use kestrel_types::dict::Dict;
use kestrel_types::ids::{hash_data, HashValue};
use parity_scale_codec::Encode;
use std::collections::BTreeMap;

const PREFIX_FIELD: u8 = b'f';
const PREFIX_INFO: u8 = b'i';

/// The field holding the program kind.
pub const FIELD_VM_TYPE: &str = "v";
/// The field holding the program body.
pub const FIELD_PROGRAM: &str = "p";
/// The program kind of native programs.
pub const VM_TYPE_NATIVE: &[u8] = b"native";

const ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::full("store_blob"),
    EntryPoint::view("get_blob_info"),
    EntryPoint::view("get_blob_field"),
];

fn field_key(hash: &HashValue, field: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + hash.len() + field.len());
    key.push(PREFIX_FIELD);
    key.extend_from_slice(hash);
    key.extend_from_slice(field);
    key
}

fn info_key(hash: &HashValue) -> Vec<u8> {
    let mut key = vec![PREFIX_INFO];
    key.extend_from_slice(hash);
    key
}

/// The hash a set of fields is stored under.
pub fn blob_hash(fields: &BTreeMap<Vec<u8>, Vec<u8>>) -> HashValue {
    hash_data(&fields.encode())
}

/// The size of every field of blob `hash`, if it exists.
pub fn blob_info(kv: &mut dyn Kv, hash: &HashValue) -> Result<Option<BTreeMap<Vec<u8>, u32>>, VmError> {
    load(kv, &info_key(hash))
}

/// One field of blob `hash`.
pub fn blob_field(kv: &mut dyn Kv, hash: &HashValue, field: &[u8]) -> Result<Option<Vec<u8>>, VmError> {
    kv.get(&field_key(hash, field))
}

/// The native program a blob names, if it is a native program blob.
pub fn native_program_name(kv: &mut dyn Kv, hash: &HashValue) -> Result<Option<String>, VmError> {
    match blob_field(kv, hash, FIELD_VM_TYPE.as_bytes())? {
        Some(kind) if kind == VM_TYPE_NATIVE => {}
        _ => return Ok(None),
    }
    Ok(blob_field(kv, hash, FIELD_PROGRAM.as_bytes())?
        .and_then(|p| String::from_utf8(p).ok()))
}

/// The `blob` processor.
pub struct Blob;

impl Processor for Blob {
    fn entry_points(&self) -> &[EntryPoint] {
        ENTRY_POINTS
    }

    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError> {
        match entry_point {
            "store_blob" => store_blob(ctx),
            "get_blob_info" => {
                let hash: HashValue = ctx.param("h")?;
                let info = blob_info(&mut ctx.state(), &hash)?
                    .ok_or_else(|| CoreError::NotFound.with(["blob".to_string(), hex::encode(hash)]))?;
                let mut out = Dict::new();
                for (field, size) in info {
                    out.0.insert(field, size.encode());
                }
                Ok(out)
            }
            "get_blob_field" => {
                let hash: HashValue = ctx.param("h")?;
                let field = ctx.param_bytes("f")?;
                let value = blob_field(&mut ctx.state(), &hash, &field)?.ok_or_else(|| {
                    CoreError::NotFound.with([
                        "blob field".to_string(),
                        String::from_utf8_lossy(&field).into_owned(),
                    ])
                })?;
                Ok(Dict::new().with("b", value))
            }
            _ => Err(CoreError::EntryPointNotFound.with([entry_point])),
        }
    }
}

fn store_blob(ctx: &mut Sandbox<'_, '_>) -> Result<Dict, VmError> {
    ctx.ensure_full()?;
    let fields = ctx.params().0.clone();
    if fields.is_empty() {
        return Err(CoreError::InvalidParams.with(["blob has no fields"]));
    }
    let total: usize = fields.iter().map(|(k, v)| k.len() + v.len()).sum();
    ctx.burn(BurnCode::StoreBlob, total as u64)?;
    let encoded = fields.encode();
    let hash = ctx.hash(&encoded)?;

    let mut kv = ctx.state();
    if kv.has(&info_key(&hash))? {
        return Ok(Dict::new().with("h", hash.to_vec()));
    }
    let mut sizes = BTreeMap::new();
    for (field, value) in &fields {
        kv.set(&field_key(&hash, field), value)?;
        sizes.insert(field.clone(), u32::try_from(value.len()).unwrap_or(u32::MAX));
    }
    save(&mut kv, &info_key(&hash), &sizes)?;
    log::info!("blob {} stored, {} bytes", hex::encode(hash), total);
    Ok(Dict::new().with("h", hash.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partition;
    use kestrel_api::state::StateOverlay;
    use kestrel_state::VirtualState;
    use kestrel_types::ids::{ChainId, Hname};
    use kestrel_types::keys::BLOB_CONTRACT;

    #[test]
    fn native_blobs_name_their_program() {
        let base = VirtualState::origin(&ChainId([1; 32]));
        let mut overlay = StateOverlay::new(&base);
        let mut kv = Partition::unmetered(&mut overlay, Hname::from_name(BLOB_CONTRACT));
        let hash = [4u8; 32];
        kv.set(&field_key(&hash, b"v"), b"native").unwrap();
        kv.set(&field_key(&hash, b"p"), b"counter").unwrap();
        assert_eq!(
            native_program_name(&mut kv, &hash).unwrap(),
            Some("counter".to_string())
        );

        let other = [5u8; 32];
        kv.set(&field_key(&other, b"v"), b"wasm").unwrap();
        kv.set(&field_key(&other, b"p"), b"counter").unwrap();
        assert_eq!(native_program_name(&mut kv, &other).unwrap(), None);
    }

    #[test]
    fn hash_covers_every_field() {
        let mut a = BTreeMap::new();
        a.insert(b"v".to_vec(), b"native".to_vec());
        let mut b = a.clone();
        assert_eq!(blob_hash(&a), blob_hash(&b));
        b.insert(b"p".to_vec(), b"x".to_vec());
        assert_ne!(blob_hash(&a), blob_hash(&b));
    }
}
