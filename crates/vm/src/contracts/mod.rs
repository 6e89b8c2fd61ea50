// Path: crates/vm/src/contracts/mod.rs
//! The core contracts every chain is born with.

pub mod accounts;
pub mod blob;
pub mod blocklog;
pub mod governance;
pub mod root;

pub use accounts::AccountsLoader;

use crate::processors::Processor;
use kestrel_types::keys::{
    ACCOUNTS_CONTRACT, BLOB_CONTRACT, BLOCKLOG_CONTRACT, GOVERNANCE_CONTRACT, ROOT_CONTRACT,
};
use std::sync::Arc;

/// The processors of the core contracts, by name.
pub(crate) fn core_processors() -> Vec<(&'static str, Arc<dyn Processor>)> {
    vec![
        (ROOT_CONTRACT, Arc::new(root::Root) as Arc<dyn Processor>),
        (ACCOUNTS_CONTRACT, Arc::new(accounts::Accounts)),
        (BLOB_CONTRACT, Arc::new(blob::Blob)),
        (BLOCKLOG_CONTRACT, Arc::new(blocklog::Blocklog)),
        (GOVERNANCE_CONTRACT, Arc::new(governance::Governance)),
    ]
}
