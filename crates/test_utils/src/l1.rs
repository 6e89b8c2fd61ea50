// Path: crates/test_utils/src/l1.rs
//! An in-memory L1 ledger.
//!
//! The ledger keeps a UTXO set, confirms published transactions whose inputs
//! are unspent and whose signature belongs to the consumed anchor's state
//! controller, and reports anchors and requests to every registered node.

use crate::dss::verify_threshold_signature;
use kestrel_api::clock::Clock;
use kestrel_api::l1::{L1Connector, L1Handlers};
use kestrel_state::VirtualState;
use kestrel_types::error::L1Error;
use kestrel_types::ids::{hash_parts, Address, ChainId, L1Address, OutputId, TransactionId};
use kestrel_types::ledger::{AnchorOutput, AnchorOutputWithId, InclusionState, Output, Transaction};
use kestrel_types::request::{OnLedgerRequest, RequestOutput};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct Ledger {
    utxo: HashMap<OutputId, Output>,
    anchors: HashMap<ChainId, AnchorOutputWithId>,
    anchors_by_id: HashMap<OutputId, AnchorOutputWithId>,
    handlers: BTreeMap<(ChainId, u16), L1Handlers>,
    included: HashSet<TransactionId>,
    conflicting: HashSet<TransactionId>,
    published: Vec<Transaction>,
    held: Vec<(ChainId, Transaction)>,
    hold: bool,
    next_id: u64,
}

impl Ledger {
    fn fresh_output_id(&mut self) -> OutputId {
        self.next_id += 1;
        OutputId::new(
            TransactionId(hash_parts(&[b"mock-l1", &self.next_id.to_le_bytes()])),
            0,
        )
    }

    fn handlers_of(&self, chain_id: &ChainId) -> Vec<L1Handlers> {
        self.handlers
            .iter()
            .filter(|((c, _), _)| c == chain_id)
            .map(|(_, h)| h.clone())
            .collect()
    }
}

/// Work to do after the ledger lock is released.
enum Notify {
    Anchor(Vec<L1Handlers>, AnchorOutputWithId),
    Request(Vec<L1Handlers>, OnLedgerRequest),
}

fn notify(events: Vec<Notify>) {
    for event in events {
        match event {
            Notify::Anchor(handlers, anchor) => {
                for h in handlers {
                    (h.on_new_anchor)(anchor.clone());
                }
            }
            Notify::Request(handlers, req) => {
                for h in handlers {
                    (h.on_new_on_ledger_request)(req.clone());
                }
            }
        }
    }
}

pub struct MockL1 {
    clock: Arc<dyn Clock>,
    ledger: Mutex<Ledger>,
}

impl MockL1 {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            ledger: Mutex::new(Ledger::default()),
        })
    }

    /// The connector used by node `node`.
    pub fn connector(self: &Arc<Self>, node: u16) -> Arc<dyn L1Connector> {
        Arc::new(L1Node {
            l1: self.clone(),
            node,
        })
    }

    /// Creates a chain: an origin anchor holding `amount` base tokens and
    /// committing to the origin state.
    pub fn create_chain(&self, state_controller: Address, governor: Address, amount: u64) -> AnchorOutputWithId {
        let mut ledger = self.ledger.lock();
        let id = ledger.fresh_output_id();
        let chain_id = ChainId::from_origin_output(&id);
        let anchor = AnchorOutputWithId {
            output: AnchorOutput {
                chain_id,
                amount,
                state_index: 0,
                state_metadata: VirtualState::origin(&chain_id).l1_commitment().to_bytes(),
                foundry_counter: 0,
                state_controller,
                governor,
            },
            id,
            timestamp: self.clock.now_ns(),
        };
        ledger.utxo.insert(id, Output::Anchor(anchor.output.clone()));
        ledger.anchors.insert(chain_id, anchor.clone());
        ledger.anchors_by_id.insert(id, anchor.clone());
        anchor
    }

    /// A fresh, unused output id for building request outputs.
    pub fn fresh_output_id(&self) -> OutputId {
        self.ledger.lock().fresh_output_id()
    }

    /// Puts a request output on the ledger and reports it to the target chain.
    pub fn send_request(&self, request: OnLedgerRequest) {
        let events = {
            let mut ledger = self.ledger.lock();
            let output = match &request.output {
                RequestOutput::Basic(o) => Output::Basic(o.clone()),
                RequestOutput::Nft(o) => Output::Nft(o.clone()),
            };
            let target = match &output {
                Output::Basic(o) => o.address,
                Output::Nft(o) => o.address,
                _ => return,
            };
            ledger.utxo.insert(request.output_id, output);
            match target {
                L1Address::Chain(chain_id) => {
                    vec![Notify::Request(ledger.handlers_of(&chain_id), request)]
                }
                L1Address::Ed25519(_) => Vec::new(),
            }
        };
        notify(events);
    }

    pub fn latest_anchor(&self, chain_id: &ChainId) -> Option<AnchorOutputWithId> {
        self.ledger.lock().anchors.get(chain_id).cloned()
    }

    /// Every transaction published so far, including duplicates.
    pub fn published(&self) -> Vec<Transaction> {
        self.ledger.lock().published.clone()
    }

    /// Returns `true` if the output exists and is unspent.
    pub fn is_unspent(&self, id: &OutputId) -> bool {
        self.ledger.lock().utxo.contains_key(id)
    }

    /// Holds published transactions instead of confirming them.
    pub fn set_hold(&self, hold: bool) {
        self.ledger.lock().hold = hold;
    }

    /// Confirms every held transaction.
    pub fn release_held(&self) {
        let held = std::mem::take(&mut self.ledger.lock().held);
        for (chain_id, tx) in held {
            let events = self.ledger.lock().confirm(&chain_id, tx, self.clock.now_ns());
            if let Ok(events) = events {
                notify(events);
            }
        }
    }

    /// Drops every held transaction; their inclusion state becomes conflicting.
    pub fn conflict_held(&self) {
        let mut ledger = self.ledger.lock();
        let held = std::mem::take(&mut ledger.held);
        for (_, tx) in held {
            ledger.conflicting.insert(tx.id());
        }
    }

    fn publish(&self, chain_id: &ChainId, tx: Transaction) -> Result<(), L1Error> {
        let events = {
            let mut ledger = self.ledger.lock();
            ledger.published.push(tx.clone());
            let id = tx.id();
            if ledger.included.contains(&id) || ledger.held.iter().any(|(_, t)| t.id() == id) {
                return Ok(());
            }
            if ledger.hold {
                ledger.held.push((*chain_id, tx));
                return Ok(());
            }
            ledger.confirm(chain_id, tx, self.clock.now_ns())?
        };
        notify(events);
        Ok(())
    }

    fn inclusion_state(&self, tx_id: &TransactionId) -> InclusionState {
        let ledger = self.ledger.lock();
        if ledger.included.contains(tx_id) {
            InclusionState::Included
        } else if ledger.conflicting.contains(tx_id) {
            InclusionState::Conflicting
        } else {
            InclusionState::NoTransaction
        }
    }
}

impl Ledger {
    fn confirm(&mut self, chain_id: &ChainId, tx: Transaction, now: u64) -> Result<Vec<Notify>, L1Error> {
        let tx_id = tx.id();
        let current = self
            .anchors
            .get(chain_id)
            .cloned()
            .ok_or_else(|| L1Error::NotRegistered(chain_id.to_string()))?;
        if tx.essence.inputs.first() != Some(&current.id)
            || tx.essence.inputs.iter().any(|i| !self.utxo.contains_key(i))
        {
            self.conflicting.insert(tx_id);
            return Err(L1Error::Rejected(format!("transaction {} spends spent outputs", tx_id)));
        }
        let signer = verify_threshold_signature(&tx.signature, &tx.essence.to_bytes());
        if signer != Some(current.output.state_controller) {
            return Err(L1Error::Rejected(format!(
                "transaction {} is not signed by the state controller",
                tx_id
            )));
        }

        for input in &tx.essence.inputs {
            self.utxo.remove(input);
        }
        self.included.insert(tx_id);
        let mut events = Vec::new();
        for (index, output) in tx.essence.outputs.iter().enumerate() {
            let id = tx.output_id(index as u16);
            self.utxo.insert(id, output.clone());
            match output {
                Output::Anchor(a) => {
                    let anchor = AnchorOutputWithId {
                        output: a.clone(),
                        id,
                        timestamp: now,
                    };
                    self.anchors.insert(a.chain_id, anchor.clone());
                    self.anchors_by_id.insert(id, anchor.clone());
                    events.push(Notify::Anchor(self.handlers_of(&a.chain_id), anchor));
                }
                Output::Basic(b) if b.metadata.is_some() => {
                    if let L1Address::Chain(target) = b.address {
                        let req = OnLedgerRequest {
                            output_id: id,
                            output: RequestOutput::Basic(b.clone()),
                        };
                        events.push(Notify::Request(self.handlers_of(&target), req));
                    }
                }
                _ => {}
            }
        }
        tracing::debug!(target: "l1", tx = %tx_id, outputs = tx.essence.outputs.len(), "transaction confirmed");
        Ok(events)
    }
}

struct L1Node {
    l1: Arc<MockL1>,
    node: u16,
}

impl L1Node {
    fn handlers(&self, chain_id: &ChainId) -> Option<L1Handlers> {
        self.l1.ledger.lock().handlers.get(&(*chain_id, self.node)).cloned()
    }
}

impl L1Connector for L1Node {
    fn register_chain(&self, chain_id: ChainId, handlers: L1Handlers) -> Result<(), L1Error> {
        let (anchor, pending) = {
            let mut ledger = self.l1.ledger.lock();
            ledger.handlers.insert((chain_id, self.node), handlers.clone());
            let anchor = ledger.anchors.get(&chain_id).cloned();
            let pending: Vec<OnLedgerRequest> = ledger
                .utxo
                .iter()
                .filter_map(|(id, o)| match o {
                    Output::Basic(b) if b.address == L1Address::Chain(chain_id) && b.metadata.is_some() => {
                        Some(OnLedgerRequest {
                            output_id: *id,
                            output: RequestOutput::Basic(b.clone()),
                        })
                    }
                    _ => None,
                })
                .collect();
            (anchor, pending)
        };
        if let Some(anchor) = anchor {
            (handlers.on_new_anchor)(anchor);
        }
        for req in pending {
            (handlers.on_new_on_ledger_request)(req);
        }
        Ok(())
    }

    fn unregister_chain(&self, chain_id: &ChainId) {
        self.l1.ledger.lock().handlers.remove(&(*chain_id, self.node));
    }

    fn publish_state_transaction(&self, chain_id: &ChainId, state_index: u32, tx: Transaction) -> Result<(), L1Error> {
        match tx.anchor_output() {
            Some(a) if a.state_index() == state_index => self.l1.publish(chain_id, tx),
            _ => Err(L1Error::Rejected(format!(
                "state transaction does not produce index {}",
                state_index
            ))),
        }
    }

    fn publish_governance_transaction(&self, chain_id: &ChainId, tx: Transaction) -> Result<(), L1Error> {
        self.l1.publish(chain_id, tx)
    }

    fn pull_latest_output(&self, chain_id: &ChainId) {
        let anchor = self.l1.latest_anchor(chain_id);
        if let (Some(anchor), Some(h)) = (anchor, self.handlers(chain_id)) {
            (h.on_new_anchor)(anchor);
        }
    }

    fn pull_state_output_by_id(&self, chain_id: &ChainId, id: OutputId) {
        let anchor = self.l1.ledger.lock().anchors_by_id.get(&id).cloned();
        if let (Some(anchor), Some(h)) = (anchor, self.handlers(chain_id)) {
            (h.on_state_output)(anchor);
        }
    }

    fn pull_tx_inclusion_state(&self, chain_id: &ChainId, tx_id: TransactionId) {
        let state = self.l1.inclusion_state(&tx_id);
        if let Some(h) = self.handlers(chain_id) {
            (h.on_tx_inclusion_state)(tx_id, state.as_str().to_string());
        }
    }
}
