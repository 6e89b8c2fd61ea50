// Path: crates/vm/src/processors.rs
//! Contract processors and the registry that resolves them.
//!
//! A processor is the code behind a contract. Core contracts are built in and
//! resolved by hname; every other contract is deployed by the root contract
//! with a program hash, which resolves either directly to a registered native
//! program or to a blob naming one.

use crate::contracts;
use crate::errors::VmError;
use crate::sandbox::Sandbox;
use kestrel_types::dict::Dict;
use kestrel_types::ids::{hash_parts, HashValue, Hname};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Whether an entry point may change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Reads and writes state.
    Full,
    /// Reads state only.
    View,
}

/// A named entry point of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    /// The entry point name.
    pub name: &'static str,
    /// Full or view.
    pub kind: EntryKind,
}

impl EntryPoint {
    /// A full entry point.
    pub const fn full(name: &'static str) -> Self {
        Self {
            name,
            kind: EntryKind::Full,
        }
    }

    /// A view entry point.
    pub const fn view(name: &'static str) -> Self {
        Self {
            name,
            kind: EntryKind::View,
        }
    }

    /// The hashed name requests use to address the entry point.
    pub fn hname(&self) -> Hname {
        Hname::from_name(self.name)
    }
}

/// The code of a contract.
pub trait Processor: Send + Sync {
    /// Every entry point the contract exposes.
    fn entry_points(&self) -> &[EntryPoint];

    /// Runs the entry point called `entry_point`.
    fn call(&self, ctx: &mut Sandbox<'_, '_>, entry_point: &str) -> Result<Dict, VmError>;

    /// Looks up an entry point by hname.
    fn find(&self, ep: Hname) -> Option<EntryPoint> {
        self.entry_points().iter().copied().find(|e| e.hname() == ep)
    }
}

/// The program hash a native program is registered under.
pub fn native_program_hash(name: &str) -> HashValue {
    hash_parts(&[b"native:", name.as_bytes()])
}

/// The program hash of a core contract.
pub fn core_program_hash(name: &str) -> HashValue {
    hash_parts(&[b"core:", name.as_bytes()])
}

/// Resolves contracts to processors. One registry serves one chain.
#[derive(Clone)]
pub struct ProcessorRegistry {
    core: BTreeMap<Hname, Arc<dyn Processor>>,
    native: HashMap<HashValue, Arc<dyn Processor>>,
    names: HashMap<String, HashValue>,
}

impl ProcessorRegistry {
    /// A registry holding the core contracts.
    pub fn new() -> Self {
        let mut core: BTreeMap<Hname, Arc<dyn Processor>> = BTreeMap::new();
        for (name, processor) in contracts::core_processors() {
            core.insert(Hname::from_name(name), processor);
        }
        Self {
            core,
            native: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// Registers a native program. Returns its program hash.
    pub fn register_native(&mut self, name: &str, processor: Arc<dyn Processor>) -> HashValue {
        let hash = native_program_hash(name);
        self.native.insert(hash, processor);
        self.names.insert(name.to_string(), hash);
        hash
    }

    /// The core contract with hname `hname`.
    pub fn core(&self, hname: Hname) -> Option<Arc<dyn Processor>> {
        self.core.get(&hname).cloned()
    }

    /// Returns `true` if `hname` belongs to a core contract.
    pub fn is_core(&self, hname: Hname) -> bool {
        self.core.contains_key(&hname)
    }

    /// The native program registered under `hash`.
    pub fn by_program_hash(&self, hash: &HashValue) -> Option<Arc<dyn Processor>> {
        self.native.get(hash).cloned()
    }

    /// The native program registered as `name`.
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.names.get(name).and_then(|h| self.by_program_hash(h))
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("core", &self.core.keys().collect::<Vec<_>>())
            .field("native", &self.names.keys().collect::<Vec<_>>())
            .finish()
    }
}
