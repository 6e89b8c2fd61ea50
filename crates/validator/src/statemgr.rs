// Path: crates/validator/src/statemgr.rs
//! The state manager of one chain.
//!
//! It keeps the solid state in step with the anchor observed on L1. When the
//! anchor is ahead, the missing blocks come from the consensus write-ahead log
//! or from peers. Blocks are first authenticated backwards through the hash
//! chain that ends at the anchor commitment, then replayed forwards from the
//! solid state with every intermediate commitment checked. A committed chain
//! that does not connect to the local solid state means the node diverged
//! from L1, and the chain is dismissed.

use crate::solid::SolidView;
use kestrel_api::clock::Clock;
use kestrel_api::l1::L1Connector;
use kestrel_api::peer::PeerTransport;
use kestrel_api::storage::BlockWal;
use kestrel_state::{Baseline, StateStore, VirtualState};
use kestrel_storage::BlockStore;
use kestrel_telemetry::sinks::StateMetricsSink;
use kestrel_types::block::Block;
use kestrel_types::config::StateManagerTimers;
use kestrel_types::error::BlockError;
use kestrel_types::ids::{ChainId, OutputId};
use kestrel_types::ledger::{AnchorOutputWithId, L1Commitment};
use kestrel_types::messages::{BlockMsg, GetBlockMsg, PeerMessage, PeerMsgType, PeeringId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MS: u64 = 1_000_000;

/// Committed versions kept in memory below the solid index.
const RETAINED_VERSIONS: u32 = 16;

/// Inputs of the state manager.
#[derive(Debug)]
pub enum StateMsg {
    /// An anchor reported by L1, either pushed or pulled.
    Anchor(AnchorOutputWithId),
    /// A block consensus signed, to be adopted once its anchor is confirmed.
    Candidate {
        block: Block,
        state: VirtualState,
        approving_output: OutputId,
    },
    /// A peer asks for a committed block.
    GetBlock {
        from: u16,
        peering_id: PeeringId,
        index: u32,
    },
    /// A peer answered a block request.
    Block { from: u16, block: Block },
    /// Consensus took over the state synced with this anchor.
    Acknowledged(OutputId),
    Tick,
}

/// What the state manager tells the chain runtime.
#[derive(Debug, Clone)]
pub enum StateOutput {
    /// The solid state matches `anchor`.
    Synced {
        anchor: AnchorOutputWithId,
        state: VirtualState,
        baseline: Baseline,
    },
    Dismiss(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateManagerStatus {
    pub solid_index: Option<u32>,
    pub anchor_id: Option<OutputId>,
    pub anchor_index: Option<u32>,
    pub synced: bool,
    /// Gap indexes still waiting for a block.
    pub requested: Vec<u32>,
    pub candidates: usize,
    pub dismissed: bool,
}

struct Candidate {
    block: Block,
    state: VirtualState,
    pull_at: u64,
}

pub struct StateManager {
    chain_id: ChainId,
    timers: StateManagerTimers,
    store: StateStore,
    blocks: BlockStore,
    wal: Arc<dyn BlockWal>,
    solid: SolidView,
    peers: Arc<dyn PeerTransport>,
    l1: Arc<dyn L1Connector>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn StateMetricsSink>,
    anchor: Option<AnchorOutputWithId>,
    delivered: Option<OutputId>,
    acknowledged: Option<OutputId>,
    /// When an unacknowledged delivery is repeated.
    redeliver_at: u64,
    candidates: HashMap<OutputId, Candidate>,
    fetched: BTreeMap<u32, Block>,
    /// Gap index to the time it may be requested again.
    requested: BTreeMap<u32, u64>,
    next_pull: u64,
    outputs: Vec<StateOutput>,
    dismissed: bool,
}

impl StateManager {
    /// Rebuilds the solid state from `blocks` and publishes it to `solid`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_id: ChainId,
        timers: StateManagerTimers,
        blocks: BlockStore,
        wal: Arc<dyn BlockWal>,
        solid: SolidView,
        peers: Arc<dyn PeerTransport>,
        l1: Arc<dyn L1Connector>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn StateMetricsSink>,
    ) -> Result<Self, BlockError> {
        let state = blocks.load_state(&chain_id)?;
        let index = state.block_index()?;
        let mut store = StateStore::new();
        store.commit(state.clone())?;
        solid.publish(state, index);
        info!(target: "statemgr", chain = %chain_id, solid_index = index, "state loaded");
        Ok(Self {
            chain_id,
            timers,
            store,
            blocks,
            wal,
            solid,
            peers,
            l1,
            clock,
            metrics,
            anchor: None,
            delivered: None,
            acknowledged: None,
            redeliver_at: 0,
            candidates: HashMap::new(),
            fetched: BTreeMap::new(),
            requested: BTreeMap::new(),
            next_pull: 0,
            outputs: Vec::new(),
            dismissed: false,
        })
    }

    pub fn handle(&mut self, msg: StateMsg) {
        if self.dismissed {
            return;
        }
        match msg {
            StateMsg::Anchor(anchor) => self.on_anchor(anchor),
            StateMsg::Candidate {
                block,
                state,
                approving_output,
            } => self.on_candidate(block, state, approving_output),
            StateMsg::GetBlock {
                from,
                peering_id,
                index,
            } => {
                self.on_get_block(from, peering_id, index);
                return;
            }
            StateMsg::Block { from, block } => self.on_block(from, block),
            StateMsg::Acknowledged(anchor_id) => {
                self.acknowledged = Some(anchor_id);
                return;
            }
            StateMsg::Tick => self.on_tick(),
        }
        self.sync();
    }

    pub fn take_outputs(&mut self) -> Vec<StateOutput> {
        std::mem::take(&mut self.outputs)
    }

    pub fn status(&self) -> StateManagerStatus {
        let solid_index = self.solid_index();
        StateManagerStatus {
            solid_index: Some(solid_index),
            anchor_id: self.anchor.as_ref().map(|a| a.id),
            anchor_index: self.anchor.as_ref().map(|a| a.state_index()),
            synced: self.anchor.is_some() && self.delivered == self.anchor.as_ref().map(|a| a.id),
            requested: self.requested.keys().copied().collect(),
            candidates: self.candidates.len(),
            dismissed: self.dismissed,
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_ns()
    }

    fn solid_index(&self) -> u32 {
        self.store.latest_index().unwrap_or(0)
    }

    fn dismiss(&mut self, reason: String) {
        warn!(target: "statemgr", chain = %self.chain_id, %reason, "dismissing chain");
        self.dismissed = true;
        self.outputs.push(StateOutput::Dismiss(reason));
    }

    fn on_anchor(&mut self, anchor: AnchorOutputWithId) {
        if anchor.output.chain_id != self.chain_id {
            return;
        }
        if let Some(current) = &self.anchor {
            if current.id == anchor.id || anchor.state_index() < current.state_index() {
                return;
            }
        }
        debug!(
            target: "statemgr",
            state_index = anchor.state_index(),
            anchor = %anchor.id,
            "anchor observed"
        );
        self.anchor = Some(anchor);
    }

    fn on_candidate(&mut self, block: Block, state: VirtualState, approving_output: OutputId) {
        if block.block_index <= self.solid_index() {
            return;
        }
        let pull_at = self
            .now()
            .saturating_add(self.timers.pull_state_after_state_candidate_delay_ms * MS);
        debug!(
            target: "statemgr",
            block_index = block.block_index,
            approving = %approving_output,
            "state candidate stored"
        );
        self.candidates.insert(
            approving_output,
            Candidate {
                block,
                state,
                pull_at,
            },
        );
    }

    fn on_get_block(&mut self, from: u16, peering_id: PeeringId, index: u32) {
        let block = match self.blocks.get(index) {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!(target: "statemgr", from, index, "requested block not stored");
                return;
            }
            Err(e) => {
                warn!(target: "statemgr", index, error = %e, "block store read failed");
                return;
            }
        };
        let msg = PeerMessage::new(
            peering_id,
            self.peers.self_index(),
            PeerMsgType::Block,
            &BlockMsg {
                block_bytes: block.to_bytes(),
            },
        );
        if let Err(e) = self.peers.send_to(from, msg) {
            debug!(target: "statemgr", to = from, error = %e, "block reply not sent");
        }
    }

    fn on_block(&mut self, from: u16, block: Block) {
        let index = block.block_index;
        let target = self.anchor.as_ref().map(|a| a.state_index()).unwrap_or(0);
        if index <= self.solid_index() || index > target || self.fetched.contains_key(&index) {
            return;
        }
        debug!(target: "statemgr", from, index, "block received");
        self.fetched.insert(index, block);
    }

    fn on_tick(&mut self) {
        let now = self.now();
        let anchor_id = self.anchor.as_ref().map(|a| a.id);
        for (id, c) in self.candidates.iter_mut() {
            if c.pull_at <= now && Some(*id) != anchor_id {
                self.l1.pull_state_output_by_id(&self.chain_id, *id);
                c.pull_at = now.saturating_add(self.timers.pull_state_retry_ms * MS);
            }
        }
        let synced = self.anchor.is_some() && self.delivered == anchor_id;
        if synced && self.acknowledged != anchor_id && now >= self.redeliver_at {
            debug!(target: "statemgr", anchor = ?anchor_id, "synced state not acknowledged, delivering again");
            self.delivered = None;
        }
        if !synced && now >= self.next_pull {
            self.l1.pull_latest_output(&self.chain_id);
            self.next_pull = now.saturating_add(self.timers.pull_state_retry_ms * MS);
        }
    }

    /// Advances the solid state towards the anchor as far as local knowledge allows.
    fn sync(&mut self) {
        while !self.dismissed {
            let Some(anchor) = self.anchor.clone() else {
                return;
            };
            let commitment = match anchor.output.l1_commitment() {
                Ok(c) => c,
                Err(e) => {
                    self.dismiss(format!("anchor {} carries no commitment: {}", anchor.id, e));
                    return;
                }
            };
            let target = anchor.state_index();
            let solid_index = self.solid_index();
            self.metrics.set_sync_gap(target.saturating_sub(solid_index));

            if target <= solid_index {
                let local = self.store.state_at(target).map(|s| s.l1_commitment());
                match local {
                    Some(c) if c == commitment => {
                        if target == solid_index {
                            self.deliver(anchor);
                        }
                    }
                    Some(c) => self.dismiss(format!(
                        "state {} diverges from L1: local {}, anchor {}",
                        target, c, commitment
                    )),
                    None => {}
                }
                return;
            }
            if self.adopt_candidate(&anchor, &commitment) {
                continue;
            }
            match self.replay_gap(target, commitment) {
                Ok(true) => continue,
                Ok(false) => {
                    self.request_missing(&anchor, solid_index, target);
                    return;
                }
                Err(reason) => {
                    self.dismiss(reason);
                    return;
                }
            }
        }
    }

    fn adopt_candidate(&mut self, anchor: &AnchorOutputWithId, commitment: &L1Commitment) -> bool {
        let Some(c) = self.candidates.get(&anchor.id) else {
            return false;
        };
        let Some(solid) = self.store.latest() else {
            return false;
        };
        let follows = c.block.block_index == anchor.state_index()
            && c.block.previous_l1_commitment == Some(solid.l1_commitment());
        if !follows || c.state.l1_commitment() != *commitment {
            warn!(
                target: "statemgr",
                approving = %anchor.id,
                "candidate does not match its anchor"
            );
            self.candidates.remove(&anchor.id);
            return false;
        }
        let Some(c) = self.candidates.remove(&anchor.id) else {
            return false;
        };
        match self.commit(&c.block, c.state) {
            Ok(()) => {
                self.metrics.inc_blocks_committed();
                true
            }
            Err(reason) => {
                self.dismiss(reason);
                false
            }
        }
    }

    /// Collects the gap `solid+1..=target` walking back from the anchor, then
    /// replays it. `Ok(false)` means some block is still unknown.
    fn replay_gap(&mut self, target: u32, commitment: L1Commitment) -> Result<bool, String> {
        let solid_index = self.solid_index();
        let mut chain: Vec<(Block, L1Commitment)> = Vec::new();
        let mut expected = commitment;
        for index in (solid_index + 1..=target).rev() {
            let block = match self.fetched.get(&index) {
                Some(b) => b.clone(),
                None => match self.wal.read(&expected.block_hash) {
                    Ok(Some(b)) if b.block_index == index => b,
                    _ => return Ok(false),
                },
            };
            if block.hash() != expected.block_hash {
                warn!(target: "statemgr", index, "block does not hash to its commitment, dropping it");
                self.fetched.remove(&index);
                self.requested.insert(index, 0);
                return Ok(false);
            }
            let Some(previous) = block.previous_l1_commitment else {
                return Err(format!("block {} has no parent commitment", index));
            };
            chain.push((block, expected));
            expected = previous;
        }

        let Some(mut state) = self.store.latest().cloned() else {
            return Err("no solid state".into());
        };
        for (block, approved) in chain.into_iter().rev() {
            state = state
                .apply_block_checked(&block, &approved)
                .map_err(|e| format!("block {} does not replay onto the solid state: {}", block.block_index, e))?;
            self.commit(&block, state.clone())?;
            self.metrics.inc_blocks_synced();
        }
        Ok(true)
    }

    fn commit(&mut self, block: &Block, state: VirtualState) -> Result<(), String> {
        let index = block.block_index;
        self.blocks
            .put(block)
            .map_err(|e| format!("block store write failed: {}", e))?;
        self.store
            .commit(state.clone())
            .map_err(|e| format!("state commit failed: {}", e))?;
        self.solid.publish(state, index);

        self.fetched.retain(|i, _| *i > index);
        self.requested.retain(|i, _| *i > index);
        self.candidates.retain(|_, c| c.block.block_index > index);
        self.store.prune_below(index.saturating_sub(RETAINED_VERSIONS));
        info!(target: "statemgr", block_index = index, "block committed");
        Ok(())
    }

    fn request_missing(&mut self, anchor: &AnchorOutputWithId, solid_index: u32, target: u32) {
        let now = self.now();
        let peering_id = PeeringId::new(&self.chain_id, &anchor.output.state_controller);
        for index in solid_index + 1..=target {
            if self.fetched.contains_key(&index) {
                continue;
            }
            if self.requested.get(&index).is_some_and(|at| *at > now) {
                continue;
            }
            let msg = PeerMessage::new(
                peering_id,
                self.peers.self_index(),
                PeerMsgType::GetBlock,
                &GetBlockMsg { block_index: index },
            );
            match self
                .peers
                .send_to_random(self.timers.nodes_to_request_block_from, msg)
            {
                Ok(to) => debug!(target: "statemgr", index, peers = ?to, "block requested"),
                Err(e) => debug!(target: "statemgr", index, error = %e, "block request failed"),
            }
            self.requested
                .insert(index, now.saturating_add(self.timers.get_block_retry_ms * MS));
        }
    }

    fn deliver(&mut self, anchor: AnchorOutputWithId) {
        if self.delivered == Some(anchor.id) {
            return;
        }
        let Some(state) = self.store.state_at(anchor.state_index()).cloned() else {
            return;
        };
        info!(
            target: "statemgr",
            state_index = anchor.state_index(),
            anchor = %anchor.id,
            "synced with L1"
        );
        self.delivered = Some(anchor.id);
        self.redeliver_at = self
            .now()
            .saturating_add(self.timers.pull_state_retry_ms * MS);
        self.outputs.push(StateOutput::Synced {
            anchor,
            state,
            baseline: self.solid.baseline(),
        });
    }
}
