// Path: crates/vm/src/partition.rs
//! Contract partitions of the state.
//!
//! Every contract owns the keys prefixed with its hname. A [`Partition`]
//! strips that prefix and, when the call runs under a gas meter, burns gas
//! for each access. The VM itself uses unmetered partitions for bookkeeping
//! it does outside of any contract call.

use crate::errors::{CoreError, VmError};
use crate::gas::{BurnCode, GasMeter};
use kestrel_api::state::{StateAccess, StateOverlay, StateReader};
use kestrel_types::codec::{from_bytes_canonical, to_bytes_canonical};
use kestrel_types::ids::Hname;
use kestrel_types::keys::contract_key;
use parity_scale_codec::{Decode, Encode};

const HNAME_LEN: usize = 4;

/// Key-value access scoped to one contract.
pub trait Kv {
    /// Reads a value.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, VmError>;
    /// Writes a value.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), VmError>;
    /// Deletes a value.
    fn del(&mut self, key: &[u8]) -> Result<(), VmError>;
    /// Returns every pair under `prefix`, sorted by key, with partition-relative keys.
    fn scan(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, VmError>;

    /// Returns `true` if the key is present.
    fn has(&mut self, key: &[u8]) -> Result<bool, VmError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Reads and decodes a value.
pub fn load<T: Decode>(kv: &mut dyn Kv, key: &[u8]) -> Result<Option<T>, VmError> {
    match kv.get(key)? {
        Some(bytes) => from_bytes_canonical(&bytes)
            .map(Some)
            .map_err(|e| VmError::Db(format!("{} at {}", e, hex::encode(key)))),
        None => Ok(None),
    }
}

/// Encodes and writes a value.
pub fn save<T: Encode>(kv: &mut dyn Kv, key: &[u8], value: &T) -> Result<(), VmError> {
    kv.set(key, &to_bytes_canonical(value))
}

/// A contract's partition of the block's state overlay.
pub struct Partition<'a, 's> {
    state: &'a mut StateOverlay<'s>,
    gas: Option<&'a mut GasMeter>,
    contract: Hname,
    writable: bool,
}

impl<'a, 's> Partition<'a, 's> {
    /// A partition charging `gas` for every access.
    pub fn metered(
        state: &'a mut StateOverlay<'s>,
        gas: &'a mut GasMeter,
        contract: Hname,
        writable: bool,
    ) -> Self {
        Self {
            state,
            gas: Some(gas),
            contract,
            writable,
        }
    }

    /// A writable partition with no gas accounting.
    pub fn unmetered(state: &'a mut StateOverlay<'s>, contract: Hname) -> Self {
        Self {
            state,
            gas: None,
            contract,
            writable: true,
        }
    }

    /// The owning contract.
    pub fn contract(&self) -> Hname {
        self.contract
    }

    fn burn(&mut self, code: BurnCode, units: usize) -> Result<(), VmError> {
        match self.gas.as_deref_mut() {
            Some(gas) => gas.burn(code, units as u64),
            None => Ok(()),
        }
    }

    fn ensure_writable(&self) -> Result<(), VmError> {
        if self.writable {
            Ok(())
        } else {
            Err(CoreError::ReadOnlyState.err())
        }
    }
}

impl Kv for Partition<'_, '_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, VmError> {
        let value = self.state.get(&contract_key(self.contract, key))?;
        self.burn(BurnCode::StorageRead, value.as_ref().map_or(0, Vec::len))?;
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), VmError> {
        self.ensure_writable()?;
        self.burn(BurnCode::StorageWrite, key.len() + value.len())?;
        self.state.insert(&contract_key(self.contract, key), value)?;
        Ok(())
    }

    fn del(&mut self, key: &[u8]) -> Result<(), VmError> {
        self.ensure_writable()?;
        self.burn(BurnCode::StorageDelete, 0)?;
        self.state.delete(&contract_key(self.contract, key))?;
        Ok(())
    }

    fn scan(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, VmError> {
        let pairs = self.state.prefix_scan(&contract_key(self.contract, prefix))?;
        let bytes: usize = pairs.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.burn(BurnCode::StorageScan, bytes)?;
        Ok(pairs
            .into_iter()
            .map(|(k, v)| (k.get(HNAME_LEN..).unwrap_or_default().to_vec(), v))
            .collect())
    }
}

/// A read-only partition of any state reader, for queries outside a VM run.
pub struct ReaderPartition<'a> {
    reader: &'a dyn StateReader,
    contract: Hname,
}

impl<'a> ReaderPartition<'a> {
    /// Scopes `reader` to `contract`.
    pub fn new(reader: &'a dyn StateReader, contract: Hname) -> Self {
        Self { reader, contract }
    }
}

impl Kv for ReaderPartition<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, VmError> {
        Ok(self.reader.get(&contract_key(self.contract, key))?)
    }

    fn set(&mut self, _key: &[u8], _value: &[u8]) -> Result<(), VmError> {
        Err(CoreError::ReadOnlyState.err())
    }

    fn del(&mut self, _key: &[u8]) -> Result<(), VmError> {
        Err(CoreError::ReadOnlyState.err())
    }

    fn scan(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, VmError> {
        Ok(self
            .reader
            .prefix_scan(&contract_key(self.contract, prefix))?
            .into_iter()
            .map(|(k, v)| (k.get(HNAME_LEN..).unwrap_or_default().to_vec(), v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_state::VirtualState;
    use kestrel_types::ids::ChainId;

    #[test]
    fn partitions_are_isolated_and_metered() {
        let base = VirtualState::origin(&ChainId([1; 32]));
        let mut overlay = StateOverlay::new(&base);
        let mut gas = GasMeter::new(1_000_000);
        {
            let mut p = Partition::metered(&mut overlay, &mut gas, Hname(5), true);
            p.set(b"k1", b"v1").unwrap();
            p.set(b"k2", b"v2").unwrap();
        }
        assert!(gas.burned() > 0);
        let mut other = Partition::unmetered(&mut overlay, Hname(6));
        assert_eq!(other.get(b"k1").unwrap(), None);
        let mut mine = Partition::unmetered(&mut overlay, Hname(5));
        let keys: Vec<Vec<u8>> = mine.scan(b"k").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec()]);
    }

    #[test]
    fn read_only_partitions_refuse_writes() {
        let base = VirtualState::origin(&ChainId([1; 32]));
        let mut overlay = StateOverlay::new(&base);
        let mut gas = GasMeter::new(1_000_000);
        let mut p = Partition::metered(&mut overlay, &mut gas, Hname(5), false);
        let err = p.set(b"k", b"v").unwrap_err();
        assert!(CoreError::ReadOnlyState.matches(err.as_request().unwrap()));
        let mut r = ReaderPartition::new(&base, Hname(5));
        assert!(r.del(b"k").is_err());
    }

    #[test]
    fn typed_values_round_trip() {
        let base = VirtualState::origin(&ChainId([1; 32]));
        let mut overlay = StateOverlay::new(&base);
        let mut p = Partition::unmetered(&mut overlay, Hname(9));
        save(&mut p, b"n", &42u64).unwrap();
        assert_eq!(load::<u64>(&mut p, b"n").unwrap(), Some(42));
        assert_eq!(load::<u64>(&mut p, b"missing").unwrap(), None);
    }
}
