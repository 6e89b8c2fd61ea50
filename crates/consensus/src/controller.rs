// Path: crates/consensus/src/controller.rs
//! The consensus controller of one chain on one committee node.
//!
//! A round runs on one anchor. The node proposes the requests it has ready,
//! ACS decides a batch, the VM turns it into a transaction essence, DSS signs
//! the essence and the contributors post the transaction in a permuted order
//! until L1 reports it included. The controller is a plain state machine:
//! every [`ConsensusMsg`] goes through [`Controller::handle`], which records
//! what arrived and then lets `take_action` advance whatever can advance.
//! Collaborators answer asynchronously through the [`ConsensusSink`].

use crate::batch::{decide_batch, posting_permutation, sort_requests, DecideParams, DecidedBatch};
use crate::messages::{ConsensusMsg, ConsensusSink, ControllerOutput};
use crate::proposal::BatchProposal;
use crate::runner::VmRunner;
use crate::workflow::Workflow;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use kestrel_api::clock::Clock;
use kestrel_api::consensus::{AcsOutput, AcsRunner, DssKey, DssRunner};
use kestrel_api::l1::L1Connector;
use kestrel_api::mempool::RequestPool;
use kestrel_api::peer::{quorum, PeerTransport};
use kestrel_api::storage::BlockWal;
use kestrel_state::{Baseline, VirtualState};
use kestrel_telemetry::sinks::ConsensusMetricsSink;
use kestrel_telemetry::time::Timer;
use kestrel_types::block::Block;
use kestrel_types::config::{ConsensusTimers, GasLimits, RentStructure, VmLimits};
use kestrel_types::ids::{hash_parts, AgentId, ChainId, HashValue, OutputId, RequestId, TransactionId};
use kestrel_types::ledger::{AnchorOutputWithId, InclusionState, Transaction, TransactionEssence};
use kestrel_types::messages::{
    MissingRequestIdsMsg, MissingRequestMsg, PeerMessage, PeerMsgType, PeeringId, SignedResultAckMsg,
    SignedResultMsg,
};
use kestrel_types::request::Request;
use kestrel_vm::{ProcessorRegistry, VmError, VmOutput, VmTask, VmTaskResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MS: u64 = 1_000_000;

/// Static settings of a controller.
#[derive(Clone)]
pub struct ControllerConfig {
    pub chain_id: ChainId,
    /// The node's own key. Signs the share that feeds the block entropy.
    pub node_key: SigningKey,
    /// Node keys of the committee, by validator index.
    pub committee: Vec<VerifyingKey>,
    pub self_index: u16,
    /// Where this node proposes the validator fee share to go.
    pub fee_destination: AgentId,
    pub timers: ConsensusTimers,
    pub gas: GasLimits,
    pub vm: VmLimits,
    pub rent: RentStructure,
}

/// Everything the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub acs: Arc<dyn AcsRunner>,
    pub dss: Arc<dyn DssRunner>,
    pub mempool: Arc<dyn RequestPool>,
    pub l1: Arc<dyn L1Connector>,
    pub peers: Arc<dyn PeerTransport>,
    pub wal: Arc<dyn BlockWal>,
    pub clock: Arc<dyn Clock>,
    pub vm: Arc<dyn VmRunner>,
    pub processors: Arc<ProcessorRegistry>,
    pub metrics: Arc<dyn ConsensusMetricsSink>,
}

/// A snapshot of the controller for status queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusStatus {
    pub anchor_id: Option<OutputId>,
    pub state_index: Option<u32>,
    pub log_index: u32,
    /// Whether the node belongs to the committee controlling the anchor.
    pub member: bool,
    pub workflow: Vec<&'static str>,
    pub final_tx: Option<TransactionId>,
    pub dismissed: bool,
}

/// What the VM produced for the round.
struct RoundResult {
    essence: TransactionEssence,
    block: Option<(Block, VirtualState)>,
    processed: Vec<RequestId>,
}

struct FinalTx {
    tx: Transaction,
    id: TransactionId,
    rotation: bool,
    processed: Vec<RequestId>,
}

struct Round {
    anchor: AnchorOutputWithId,
    state: VirtualState,
    baseline: Option<Baseline>,
    state_timestamp: u64,
    member: bool,
    peering_id: PeeringId,
    session_id: u64,
    journal_id: HashValue,
    log_index: u32,
    flags: Workflow,
    index_proposal: Option<Vec<u16>>,
    batch: Option<DecidedBatch>,
    own_seq: Option<usize>,
    result: Option<RoundResult>,
    signature: Option<Vec<u8>>,
    final_tx: Option<FinalTx>,
    peer_results: BTreeMap<u16, HashValue>,
    delay_batch_proposal_until: u64,
    delay_run_vm_until: u64,
    post_tx_deadline: u64,
    pull_inclusion_state_deadline: u64,
    /// When a pending VM run or DSS signing is given up. Zero when none is pending.
    stalled_after: u64,
}

impl Round {
    fn dss_key(&self) -> DssKey {
        DssKey {
            journal_id: self.journal_id,
            log_index: self.log_index,
        }
    }

    fn is_current(&self, anchor_id: &OutputId, log_index: u32) -> bool {
        self.anchor.id == *anchor_id && self.log_index == log_index
    }

    fn clear(&mut self) {
        self.flags = Workflow::STATE_RECEIVED;
        self.index_proposal = None;
        self.batch = None;
        self.own_seq = None;
        self.result = None;
        self.signature = None;
        self.final_tx = None;
        self.peer_results.clear();
        self.delay_run_vm_until = 0;
        self.post_tx_deadline = 0;
        self.pull_inclusion_state_deadline = 0;
        self.stalled_after = 0;
    }
}

/// Why a step abandoned the round.
type Step = Result<(), &'static str>;

fn session_id_of(anchor_id: &OutputId) -> u64 {
    let [a, b, c, d, e, f, g, h, ..] = hash_parts(&[b"acs-session", &anchor_id.to_bytes()]);
    u64::from_le_bytes([a, b, c, d, e, f, g, h])
}

fn start_dss(dss: &dyn DssRunner, sink: &ConsensusSink, key: DssKey) {
    let on_index = sink.clone();
    let on_signature = sink.clone();
    let started = dss.start(
        key,
        Box::new(move |proposal| on_index(ConsensusMsg::DssIndexProposal { key, proposal })),
        Box::new(move |signature| on_signature(ConsensusMsg::DssSignature { key, signature })),
    );
    if let Err(e) = started {
        warn!(target: "consensus", log_index = key.log_index, error = %e, "failed to start DSS");
    }
}

pub struct Controller {
    config: ControllerConfig,
    co: Collaborators,
    sink: ConsensusSink,
    quorum: usize,
    round: Option<Round>,
    outputs: Vec<ControllerOutput>,
    dismissed: bool,
}

impl Controller {
    pub fn new(config: ControllerConfig, co: Collaborators, sink: ConsensusSink) -> Self {
        let quorum = usize::from(quorum(co.peers.committee_size()));
        Self {
            config,
            co,
            sink,
            quorum,
            round: None,
            outputs: Vec::new(),
            dismissed: false,
        }
    }

    /// Processes one message and advances the round as far as it can go.
    pub fn handle(&mut self, msg: ConsensusMsg) {
        if self.dismissed {
            return;
        }
        match msg {
            ConsensusMsg::StateReceived {
                anchor,
                state,
                baseline,
            } => self.on_state_received(anchor, state, baseline),
            ConsensusMsg::Acs(output) => {
                if let Err(reason) = self.on_acs(output) {
                    self.reset(reason);
                }
            }
            ConsensusMsg::DssIndexProposal { key, proposal } => self.on_index_proposal(key, proposal),
            ConsensusMsg::DssSignature { key, signature } => self.on_signature(key, signature),
            ConsensusMsg::VmResult {
                anchor_id,
                log_index,
                result,
            } => {
                if let Err(reason) = self.on_vm_result(anchor_id, log_index, result) {
                    self.reset(reason);
                }
            }
            ConsensusMsg::TxInclusionState { tx_id, state } => self.on_inclusion_state(tx_id, &state),
            ConsensusMsg::MissingRequestIds { from, ids } => self.on_missing_request_ids(from, ids),
            ConsensusMsg::MissingRequest(request) => self.on_missing_request(request),
            ConsensusMsg::SignedResult { from, msg } => self.on_signed_result(from, msg),
            ConsensusMsg::SignedResultAck { from, msg } => {
                if !msg.matches {
                    warn!(
                        target: "consensus",
                        from,
                        log_index = msg.log_index,
                        "peer reports a different VM result"
                    );
                }
            }
            ConsensusMsg::Tick => {}
        }
        self.take_action();
    }

    /// Drains what the controller produced since the last call.
    pub fn take_outputs(&mut self) -> Vec<ControllerOutput> {
        std::mem::take(&mut self.outputs)
    }

    pub fn status(&self) -> ConsensusStatus {
        match &self.round {
            Some(r) => ConsensusStatus {
                anchor_id: Some(r.anchor.id),
                state_index: Some(r.anchor.state_index()),
                log_index: r.log_index,
                member: r.member,
                workflow: r.flags.names(),
                final_tx: r.final_tx.as_ref().map(|f| f.id),
                dismissed: self.dismissed,
            },
            None => ConsensusStatus {
                dismissed: self.dismissed,
                ..ConsensusStatus::default()
            },
        }
    }

    fn now(&self) -> u64 {
        self.co.clock.now_ns()
    }

    fn dismiss(&mut self, reason: String) {
        warn!(target: "consensus", chain = %self.config.chain_id, %reason, "dismissing consensus");
        self.dismissed = true;
        self.outputs.push(ControllerOutput::Dismiss(reason));
    }

    fn reset(&mut self, reason: &'static str) {
        let now = self.now();
        let Some(round) = self.round.as_mut() else {
            return;
        };
        round.clear();
        round.log_index += 1;
        round.delay_batch_proposal_until =
            now.saturating_add(self.config.timers.propose_batch_retry_ms * MS);
        self.co.metrics.inc_workflow_resets(reason);
        info!(
            target: "consensus",
            state_index = round.anchor.state_index(),
            log_index = round.log_index,
            reason,
            "round reset"
        );
        if round.member {
            start_dss(self.co.dss.as_ref(), &self.sink, round.dss_key());
        }
    }

    fn on_state_received(&mut self, anchor: AnchorOutputWithId, state: VirtualState, baseline: Option<Baseline>) {
        if let Some(round) = self.round.as_mut() {
            if round.anchor.id == anchor.id {
                round.state = state;
                round.baseline = baseline;
                return;
            }
        }
        if let Some(prev) = self.round.take() {
            self.complete_by_anchor(prev, &anchor);
        }

        let state_timestamp = match state.timestamp() {
            Ok(ts) => ts,
            Err(e) => {
                self.dismiss(format!("state of anchor {} unreadable: {}", anchor.id, e));
                return;
            }
        };
        let member = self.co.dss.address() == anchor.output.state_controller;
        let mut round = Round {
            peering_id: PeeringId::new(&self.config.chain_id, &anchor.output.state_controller),
            session_id: session_id_of(&anchor.id),
            journal_id: hash_parts(&[b"journal", &anchor.id.to_bytes()]),
            anchor,
            state,
            baseline,
            state_timestamp,
            member,
            log_index: 0,
            flags: Workflow::STATE_RECEIVED,
            index_proposal: None,
            batch: None,
            own_seq: None,
            result: None,
            signature: None,
            final_tx: None,
            peer_results: BTreeMap::new(),
            delay_batch_proposal_until: 0,
            delay_run_vm_until: 0,
            post_tx_deadline: 0,
            pull_inclusion_state_deadline: 0,
            stalled_after: 0,
        };
        round.clear();
        debug!(
            target: "consensus",
            anchor = %round.anchor.id,
            state_index = round.anchor.state_index(),
            member,
            "new round"
        );
        if member {
            start_dss(self.co.dss.as_ref(), &self.sink, round.dss_key());
        }
        self.round = Some(round);
    }

    /// The previous round's transaction produced `anchor`, so it was included
    /// even if the inclusion query never answered.
    fn complete_by_anchor(&mut self, prev: Round, anchor: &AnchorOutputWithId) {
        if prev.flags.contains(Workflow::COMPLETED) {
            return;
        }
        let Some(fin) = prev.final_tx else {
            return;
        };
        if fin.tx.output_id(0) != anchor.id {
            return;
        }
        self.co.mempool.remove(&fin.processed);
        self.co.metrics.inc_blocks_produced();
        self.outputs.push(ControllerOutput::TransactionIncluded {
            tx_id: fin.id,
            anchor: Some(anchor.clone()),
            processed: fin.processed,
        });
    }

    fn on_index_proposal(&mut self, key: DssKey, proposal: Vec<u16>) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.dss_key() != key {
            return;
        }
        round.index_proposal = Some(proposal);
        round.flags.insert(Workflow::INDEX_PROPOSAL_RECEIVED);
    }

    fn on_acs(&mut self, output: AcsOutput) -> Step {
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if output.log_index != round.log_index {
            debug!(target: "consensus", log_index = output.log_index, "stale ACS output");
            return Ok(());
        }
        if output.session_id != round.session_id {
            warn!(target: "consensus", session = output.session_id, "ACS output of a foreign session");
            return Err("acs_session_mismatch");
        }
        if round.flags.contains(Workflow::CONSENSUS_BATCH_KNOWN) {
            return Ok(());
        }
        let batch = decide_batch(
            &output.values,
            &DecideParams {
                anchor_id: round.anchor.id,
                committee: &self.config.committee,
                quorum: self.quorum,
                state_timestamp: round.state_timestamp,
            },
        )
        .map_err(|e| {
            warn!(target: "consensus", error = %e, "ACS output rejected");
            "acs_invalid"
        })?;
        if batch.is_empty() {
            debug!(target: "consensus", contributors = batch.contributors.len(), "empty batch decided");
            return Err("empty_batch");
        }
        info!(
            target: "consensus",
            state_index = round.anchor.state_index(),
            log_index = round.log_index,
            requests = batch.request_ids.len(),
            contributors = batch.contributors.len(),
            "batch decided"
        );
        round.own_seq = batch.contribution_of(self.config.self_index);
        round.batch = Some(batch);
        round.flags.insert(Workflow::CONSENSUS_BATCH_KNOWN);
        Ok(())
    }

    fn on_vm_result(
        &mut self,
        anchor_id: OutputId,
        log_index: u32,
        result: Result<VmTaskResult, VmError>,
    ) -> Step {
        let now = self.now();
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if !round.is_current(&anchor_id, log_index) || round.result.is_some() {
            return Ok(());
        }
        let result = match result {
            Ok(r) => r,
            Err(VmError::StateInvalidated) => return Err("state_invalidated"),
            Err(VmError::StateMismatch(msg)) => {
                warn!(target: "consensus", %msg, "VM refused the state");
                return Err("state_mismatch");
            }
            Err(VmError::Db(msg)) => {
                self.dismiss(format!("state database failure: {}", msg));
                return Ok(());
            }
            Err(e) => {
                warn!(target: "consensus", error = %e, "VM task failed");
                return Err("vm_failed");
            }
        };
        if !result.rejected.is_empty() {
            self.co.mempool.remove(&result.rejected);
        }
        let (essence, block) = match result.output {
            VmOutput::Empty => return Err("vm_empty"),
            VmOutput::Block {
                block,
                state,
                essence,
            } => (essence, Some((block, state))),
            VmOutput::Rotation { address, essence } => {
                info!(target: "consensus", new_controller = %address, "rotation signed next");
                (essence, None)
            }
        };
        let Some(batch) = round.batch.as_ref() else {
            return Ok(());
        };
        let essence_hash = essence.hash();
        self.co
            .dss
            .decided_index_proposals(round.dss_key(), batch.index_proposals.clone(), essence.to_bytes())
            .map_err(|e| {
                warn!(target: "consensus", error = %e, "DSS refused the decided index proposals");
                "dss_failed"
            })?;
        round.flags.insert(Workflow::DSS_SIGNING_STARTED);
        round.stalled_after = now.saturating_add(self.config.timers.round_stall_timeout_ms.saturating_mul(MS));
        round.result = Some(RoundResult {
            essence,
            block,
            processed: result.processed,
        });

        let announce = PeerMessage::new(
            round.peering_id,
            self.config.self_index,
            PeerMsgType::SignedResult,
            &SignedResultMsg {
                essence_hash,
                chain_input_id: round.anchor.id,
                log_index: round.log_index,
            },
        );
        if let Err(e) = self.co.peers.broadcast(announce) {
            debug!(target: "consensus", error = %e, "signed result broadcast failed");
        }
        let stored: Vec<(u16, HashValue)> = round.peer_results.iter().map(|(k, v)| (*k, *v)).collect();
        for (from, hash) in stored {
            self.ack_signed_result(from, hash == essence_hash);
        }
        Ok(())
    }

    fn on_signature(&mut self, key: DssKey, signature: Vec<u8>) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.dss_key() != key || !round.flags.contains(Workflow::DSS_SIGNING_STARTED) {
            return;
        }
        round.signature = Some(signature);
        round.stalled_after = 0;
        round.flags.insert(Workflow::VM_RESULT_SIGNED);
    }

    fn on_inclusion_state(&mut self, tx_id: TransactionId, state: &str) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        let Some(fin) = round.final_tx.as_ref() else {
            return;
        };
        if fin.id != tx_id || round.flags.contains(Workflow::COMPLETED) {
            return;
        }
        match InclusionState::parse(state) {
            Some(InclusionState::Included) => {
                round.flags.insert(Workflow::TRANSACTION_SEEN | Workflow::COMPLETED);
                round.flags.remove(Workflow::IN_PROGRESS);
                self.co.mempool.remove(&fin.processed);
                self.co.metrics.inc_blocks_produced();
                info!(
                    target: "consensus",
                    tx = %tx_id,
                    state_index = round.anchor.state_index(),
                    requests = fin.processed.len(),
                    "transaction included"
                );
                self.outputs.push(ControllerOutput::TransactionIncluded {
                    tx_id,
                    anchor: fin.tx.anchor_output(),
                    processed: fin.processed.clone(),
                });
            }
            Some(InclusionState::Conflicting) => {
                warn!(target: "consensus", tx = %tx_id, "transaction conflicts on L1");
                self.reset("conflicting");
            }
            Some(InclusionState::NoTransaction) | None => {}
        }
    }

    fn on_missing_request_ids(&mut self, from: u16, ids: Vec<RequestId>) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        for id in ids {
            let Some(request) = self.co.mempool.get(&id) else {
                continue;
            };
            let msg = PeerMessage::new(
                round.peering_id,
                self.config.self_index,
                PeerMsgType::MissingRequest,
                &MissingRequestMsg { request },
            );
            if let Err(e) = self.co.peers.send_to(from, msg) {
                debug!(target: "consensus", from, error = %e, "missing request reply failed");
            }
        }
    }

    fn on_missing_request(&mut self, request: Request) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        let Some(batch) = round.batch.as_ref() else {
            return;
        };
        let id = request.id();
        let wanted = batch
            .request_ids
            .iter()
            .zip(&batch.request_hashes)
            .any(|(i, h)| *i == id && *h == request.hash());
        if !wanted || self.co.mempool.has(&id) {
            return;
        }
        self.co.mempool.receive(vec![request]);
        round.delay_run_vm_until = 0;
    }

    fn on_signed_result(&mut self, from: u16, msg: SignedResultMsg) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if !round.is_current(&msg.chain_input_id, msg.log_index) {
            return;
        }
        round.peer_results.insert(from, msg.essence_hash);
        let own = round.result.as_ref().map(|r| r.essence.hash());
        if let Some(own) = own {
            self.ack_signed_result(from, own == msg.essence_hash);
        }
    }

    fn ack_signed_result(&self, to: u16, matches: bool) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if !matches {
            warn!(target: "consensus", peer = to, log_index = round.log_index, "peer signed a different essence");
        }
        let ack = PeerMessage::new(
            round.peering_id,
            self.config.self_index,
            PeerMsgType::SignedResultAck,
            &SignedResultAckMsg {
                chain_input_id: round.anchor.id,
                log_index: round.log_index,
                matches,
            },
        );
        if let Err(e) = self.co.peers.send_to(to, ack) {
            debug!(target: "consensus", peer = to, error = %e, "signed result ack failed");
        }
    }

    fn take_action(&mut self) {
        if self.dismissed {
            return;
        }
        let metrics = self.co.metrics.clone();
        let _timer = Timer::new(|secs| metrics.observe_take_action_duration(secs));
        match self.round.as_ref() {
            Some(r) if r.member => {}
            _ => return,
        }
        let now = self.now();
        let steps: [fn(&mut Self, u64) -> Step; 6] = [
            Self::reset_if_stalled,
            Self::propose_batch_if_needed,
            Self::run_vm_if_needed,
            Self::check_quorum,
            Self::post_transaction_if_needed,
            Self::pull_inclusion_state_if_needed,
        ];
        for step in steps {
            if let Err(reason) = step(self, now) {
                self.reset(reason);
                return;
            }
            if self.dismissed {
                return;
            }
        }
    }

    /// Gives up on a VM run or a DSS signing that never reported back.
    fn reset_if_stalled(&mut self, now: u64) -> Step {
        let Some(round) = self.round.as_ref() else {
            return Ok(());
        };
        if round.stalled_after == 0 || now < round.stalled_after {
            return Ok(());
        }
        if round.flags.contains(Workflow::VM_STARTED) && round.result.is_none() {
            warn!(target: "consensus", log_index = round.log_index, "VM result overdue");
            return Err("vm_timeout");
        }
        if round.flags.contains(Workflow::DSS_SIGNING_STARTED) && round.signature.is_none() {
            warn!(target: "consensus", log_index = round.log_index, "DSS signature overdue");
            return Err("dss_timeout");
        }
        Ok(())
    }

    fn propose_batch_if_needed(&mut self, now: u64) -> Step {
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if !round.flags.contains(Workflow::STATE_RECEIVED | Workflow::INDEX_PROPOSAL_RECEIVED)
            || round.flags.contains(Workflow::BATCH_PROPOSAL_SENT)
        {
            return Ok(());
        }
        let not_before = round.delay_batch_proposal_until.max(
            round
                .state_timestamp
                .saturating_add(self.config.timers.propose_batch_delay_for_new_state_ms * MS),
        );
        if now < not_before {
            return Ok(());
        }
        let ready = self.co.mempool.ready_now(now);
        if ready.is_empty() {
            round.delay_batch_proposal_until =
                now.saturating_add(self.config.timers.propose_batch_retry_ms * MS);
            return Ok(());
        }
        let mut ready: Vec<(RequestId, HashValue)> = ready.iter().map(|r| (r.id(), r.hash())).collect();
        ready.sort_unstable();
        let (request_ids, request_hashes) = ready.into_iter().unzip();

        let proposal = BatchProposal {
            validator_index: self.config.self_index,
            anchor_output_id: round.anchor.id,
            request_ids,
            request_hashes,
            timestamp: now.max(round.state_timestamp.saturating_add(1)),
            fee_destination: self.config.fee_destination,
            sig_share_over_anchor_id: self
                .config
                .node_key
                .sign(&round.anchor.id.to_bytes())
                .to_bytes()
                .to_vec(),
            nonce_index_proposal: round.index_proposal.clone().unwrap_or_default(),
        };
        let sink = self.sink.clone();
        let sent = self.co.acs.run(
            proposal.to_bytes(),
            round.session_id,
            round.anchor.state_index(),
            round.log_index,
            Box::new(move |output| sink(ConsensusMsg::Acs(output))),
        );
        if let Err(e) = sent {
            warn!(target: "consensus", error = %e, "ACS refused the proposal");
            round.delay_batch_proposal_until =
                now.saturating_add(self.config.timers.propose_batch_retry_ms * MS);
            return Ok(());
        }
        debug!(
            target: "consensus",
            state_index = round.anchor.state_index(),
            log_index = round.log_index,
            requests = proposal.request_ids.len(),
            "batch proposed"
        );
        round.flags.insert(Workflow::BATCH_PROPOSAL_SENT | Workflow::IN_PROGRESS);
        self.co.metrics.inc_acs_rounds();
        Ok(())
    }

    fn run_vm_if_needed(&mut self, now: u64) -> Step {
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if !round.flags.contains(Workflow::CONSENSUS_BATCH_KNOWN)
            || round.flags.contains(Workflow::VM_STARTED)
            || now < round.delay_run_vm_until
        {
            return Ok(());
        }
        let Some(batch) = round.batch.as_ref() else {
            return Ok(());
        };
        let resolved = self
            .co
            .mempool
            .ready_from_ids(&batch.request_ids, &batch.request_hashes);
        if !resolved.all_arrived {
            let ids: Vec<RequestId> = resolved
                .missing
                .iter()
                .filter_map(|i| batch.request_ids.get(*i).copied())
                .collect();
            debug!(target: "consensus", missing = ids.len(), "decided requests missing, asking peers");
            let ask = PeerMessage::new(
                round.peering_id,
                self.config.self_index,
                PeerMsgType::MissingRequestIds,
                &MissingRequestIdsMsg { ids },
            );
            if let Err(e) = self.co.peers.broadcast(ask) {
                debug!(target: "consensus", error = %e, "missing request broadcast failed");
            }
            round.delay_run_vm_until = now.saturating_add(
                self.config.timers.vm_run_retry_to_wait_for_ready_requests_ms * MS,
            );
            return Ok(());
        }

        let mut requests = resolved.requests;
        sort_requests(&mut requests, &batch.entropy);
        let task = VmTask {
            processors: self.co.processors.clone(),
            anchor: round.anchor.clone(),
            state: round.state.clone(),
            baseline: round.baseline.clone(),
            requests,
            timestamp: batch.timestamp,
            entropy: batch.entropy,
            validator_fee_target: batch.fee_destination,
            gas_limits: self.config.gas.clone(),
            vm_limits: self.config.vm.clone(),
            rent: self.config.rent,
        };
        round.flags.insert(Workflow::VM_STARTED);
        round.stalled_after = now.saturating_add(self.config.timers.round_stall_timeout_ms.saturating_mul(MS));
        let anchor_id = round.anchor.id;
        let log_index = round.log_index;
        let sink = self.sink.clone();
        self.co.vm.run(
            task,
            Box::new(move |result| {
                sink(ConsensusMsg::VmResult {
                    anchor_id,
                    log_index,
                    result,
                })
            }),
        );
        Ok(())
    }

    fn check_quorum(&mut self, now: u64) -> Step {
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if !round.flags.contains(Workflow::VM_RESULT_SIGNED)
            || round.flags.contains(Workflow::TRANSACTION_FINALIZED)
        {
            return Ok(());
        }
        let (Some(result), Some(signature)) = (round.result.as_ref(), round.signature.clone()) else {
            return Ok(());
        };
        let tx = Transaction {
            essence: result.essence.clone(),
            signature,
        };
        let tx_id = tx.id();
        if let Some((block, state)) = &result.block {
            if let Err(e) = self.co.wal.write(block) {
                let reason = format!("block {} not written to the WAL: {}", block.block_index, e);
                self.dismiss(reason);
                return Ok(());
            }
            self.outputs.push(ControllerOutput::StateCandidate {
                block: block.clone(),
                state: state.clone(),
                approving_output: tx.output_id(0),
            });
        }

        let contributors = round.batch.as_ref().map_or(0, |b| b.contributors.len());
        let position = round
            .own_seq
            .and_then(|seq| posting_permutation(contributors, &tx_id).get(seq).copied());
        if let Some(pos) = position {
            round.post_tx_deadline =
                now.saturating_add(pos as u64 * self.config.timers.post_tx_sequence_step_ms * MS);
        }
        round.pull_inclusion_state_deadline = now;
        info!(
            target: "consensus",
            tx = %tx_id,
            state_index = round.anchor.state_index(),
            posting_position = ?position,
            "transaction finalized"
        );
        round.final_tx = Some(FinalTx {
            rotation: result.block.is_none(),
            processed: result.processed.clone(),
            id: tx_id,
            tx,
        });
        round.flags.insert(Workflow::TRANSACTION_FINALIZED);
        Ok(())
    }

    fn post_transaction_if_needed(&mut self, now: u64) -> Step {
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if !round.flags.contains(Workflow::TRANSACTION_FINALIZED)
            || round
                .flags
                .contains(Workflow::TRANSACTION_POSTED)
            || round.flags.contains(Workflow::TRANSACTION_SEEN)
            || round.own_seq.is_none()
            || now < round.post_tx_deadline
        {
            return Ok(());
        }
        let Some(fin) = round.final_tx.as_ref() else {
            return Ok(());
        };
        let chain_id = &self.config.chain_id;
        let published = if fin.rotation {
            self.co.l1.publish_governance_transaction(chain_id, fin.tx.clone())
        } else {
            self.co
                .l1
                .publish_state_transaction(chain_id, round.anchor.state_index() + 1, fin.tx.clone())
        };
        match published {
            Ok(()) => {
                debug!(target: "consensus", tx = %fin.id, rotation = fin.rotation, "transaction posted");
                round.flags.insert(Workflow::TRANSACTION_POSTED);
            }
            Err(e) => {
                warn!(target: "consensus", tx = %fin.id, error = %e, "posting failed, will retry");
                round.post_tx_deadline =
                    now.saturating_add(self.config.timers.pull_inclusion_state_retry_ms * MS);
            }
        }
        Ok(())
    }

    fn pull_inclusion_state_if_needed(&mut self, now: u64) -> Step {
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if !round.flags.contains(Workflow::TRANSACTION_FINALIZED)
            || round.flags.contains(Workflow::TRANSACTION_SEEN)
            || now < round.pull_inclusion_state_deadline
        {
            return Ok(());
        }
        let Some(fin) = round.final_tx.as_ref() else {
            return Ok(());
        };
        round.pull_inclusion_state_deadline =
            now.saturating_add(self.config.timers.pull_inclusion_state_retry_ms * MS);
        self.co.l1.pull_tx_inclusion_state(&self.config.chain_id, fin.id);
        Ok(())
    }
}
