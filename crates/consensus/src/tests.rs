// Path: crates/consensus/src/tests.rs
//! Whole rounds over in-process ACS, DSS, L1 and peer doubles.

use crate::runner::{VmDone, VmRunner};
use crate::{Collaborators, ConsensusMsg, Controller, ControllerConfig, ControllerOutput, InlineVmRunner};
use kestrel_api::l1::L1Handlers;
use kestrel_api::mempool::{RequestPool, ResolvedRequests};
use kestrel_api::storage::BlockWal;
use kestrel_state::VirtualState;
use kestrel_telemetry::sinks::ConsensusMetricsSink;
use kestrel_test_utils::fixtures::{
    address_of, committee_keys, committee_signing_key, init_request, key, off_ledger, owner_key,
};
use kestrel_test_utils::programs::test_registry;
use kestrel_test_utils::{LocalAcs, LocalDss, LocalNetwork, ManualClock, MockL1};
use kestrel_types::block::Block;
use kestrel_types::dict::Dict;
use kestrel_types::error::StateError;
use kestrel_types::ids::{AgentId, ChainId, HashValue, RequestId};
use kestrel_types::ledger::AnchorOutputWithId;
use kestrel_types::messages::{MissingRequestIdsMsg, MissingRequestMsg, PeerMessage, PeerMsgType};
use kestrel_types::request::{CallTarget, Request};
use kestrel_vm::VmTask;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

const START_NS: u64 = 1_000_000_000_000;

#[derive(Default)]
struct TestPool {
    requests: Mutex<BTreeMap<RequestId, Request>>,
}

impl RequestPool for TestPool {
    fn receive(&self, requests: Vec<Request>) -> Vec<RequestId> {
        let mut pool = self.requests.lock();
        requests
            .into_iter()
            .map(|r| {
                let id = r.id();
                pool.insert(id, r);
                id
            })
            .collect()
    }

    fn ready_now(&self, _now_ns: u64) -> Vec<Request> {
        self.requests.lock().values().cloned().collect()
    }

    fn ready_from_ids(&self, ids: &[RequestId], hashes: &[HashValue]) -> ResolvedRequests {
        let pool = self.requests.lock();
        let mut out = ResolvedRequests::default();
        for (i, (id, hash)) in ids.iter().zip(hashes).enumerate() {
            match pool.get(id) {
                Some(r) if r.hash() == *hash => out.requests.push(r.clone()),
                _ => out.missing.push(i),
            }
        }
        out.all_arrived = out.missing.is_empty();
        out
    }

    fn remove(&self, ids: &[RequestId]) {
        let mut pool = self.requests.lock();
        for id in ids {
            pool.remove(id);
        }
    }

    fn has(&self, id: &RequestId) -> bool {
        self.requests.lock().contains_key(id)
    }

    fn get(&self, id: &RequestId) -> Option<Request> {
        self.requests.lock().get(id).cloned()
    }

    fn size(&self) -> usize {
        self.requests.lock().len()
    }
}

#[derive(Default)]
struct MemWal(Mutex<HashMap<HashValue, Block>>);

impl BlockWal for MemWal {
    fn write(&self, block: &Block) -> Result<(), StateError> {
        self.0.lock().insert(block.hash(), block.clone());
        Ok(())
    }

    fn read(&self, hash: &HashValue) -> Result<Option<Block>, StateError> {
        Ok(self.0.lock().get(hash).cloned())
    }

    fn contains(&self, hash: &HashValue) -> bool {
        self.0.lock().contains_key(hash)
    }
}

#[derive(Debug, Default)]
struct CountingMetrics {
    resets: Mutex<Vec<&'static str>>,
    blocks: Mutex<u64>,
}

impl ConsensusMetricsSink for CountingMetrics {
    fn inc_blocks_produced(&self) {
        *self.blocks.lock() += 1;
    }
    fn inc_workflow_resets(&self, reason: &'static str) {
        self.resets.lock().push(reason);
    }
    fn inc_acs_rounds(&self) {}
    fn observe_take_action_duration(&self, _duration_secs: f64) {}
}

type Queue = Arc<Mutex<VecDeque<ConsensusMsg>>>;

/// Accepts tasks and never reports back.
struct SilentVm;

impl VmRunner for SilentVm {
    fn run(&self, _task: VmTask, _done: VmDone) {}
}

struct Node {
    ctrl: Controller,
    queue: Queue,
    pool: Arc<TestPool>,
    wal: Arc<MemWal>,
    metrics: Arc<CountingMetrics>,
    outputs: Vec<ControllerOutput>,
}

struct Committee {
    nodes: Vec<Node>,
    l1: Arc<MockL1>,
    clock: ManualClock,
    network: Arc<LocalNetwork>,
    chain_id: ChainId,
    anchor: AnchorOutputWithId,
}

fn peer_to_consensus(msg: PeerMessage) -> Option<ConsensusMsg> {
    let from = msg.sender_index;
    match msg.msg_type {
        PeerMsgType::SignedResult => msg
            .decode_payload()
            .ok()
            .map(|m| ConsensusMsg::SignedResult { from, msg: m }),
        PeerMsgType::SignedResultAck => msg
            .decode_payload()
            .ok()
            .map(|m| ConsensusMsg::SignedResultAck { from, msg: m }),
        PeerMsgType::MissingRequestIds => msg
            .decode_payload::<MissingRequestIdsMsg>()
            .ok()
            .map(|m| ConsensusMsg::MissingRequestIds { from, ids: m.ids }),
        PeerMsgType::MissingRequest => msg
            .decode_payload::<MissingRequestMsg>()
            .ok()
            .map(|m| ConsensusMsg::MissingRequest(m.request)),
        _ => None,
    }
}

impl Committee {
    /// A committee of `n` controlling a fresh chain. `controller` overrides the
    /// anchor's state controller.
    fn new(n: u16, controller: Option<ed25519_dalek::SigningKey>) -> Self {
        Self::with_vm(n, controller, Arc::new(InlineVmRunner))
    }

    fn with_vm(n: u16, controller: Option<ed25519_dalek::SigningKey>, vm: Arc<dyn VmRunner>) -> Self {
        let quorum = usize::from(kestrel_api::peer::quorum(n));
        let clock = ManualClock::new(START_NS);
        let l1 = MockL1::new(Arc::new(clock.clone()));
        let dss = LocalDss::new(committee_signing_key(), quorum);
        let state_controller = controller
            .map(|k| address_of(&k))
            .unwrap_or_else(|| dss.address());
        let anchor = l1.create_chain(state_controller, address_of(&owner_key()), 1_000_000);
        let chain_id = anchor.output.chain_id;
        let acs = LocalAcs::new(quorum);
        let network = LocalNetwork::new(n);
        let keys = committee_keys(n);
        let committee: Vec<_> = keys.iter().map(|k| k.verifying_key()).collect();

        let mut nodes = Vec::new();
        for (i, node_key) in keys.into_iter().enumerate() {
            let i = i as u16;
            let queue: Queue = Arc::default();
            let pool = Arc::new(TestPool::default());
            let wal = Arc::new(MemWal::default());
            let metrics = Arc::new(CountingMetrics::default());

            let (p, q) = (pool.clone(), queue.clone());
            l1.connector(i)
                .register_chain(
                    chain_id,
                    L1Handlers {
                        on_new_anchor: Arc::new(|_| {}),
                        on_new_on_ledger_request: Arc::new(move |r| {
                            p.receive(vec![Request::OnLedger(r)]);
                        }),
                        on_tx_inclusion_state: Arc::new(move |tx_id, state| {
                            q.lock().push_back(ConsensusMsg::TxInclusionState { tx_id, state })
                        }),
                        on_state_output: Arc::new(|_| {}),
                    },
                )
                .unwrap();
            let peers = network.handle(i);
            let q = queue.clone();
            peers.attach(Arc::new(move |msg| {
                if let Some(m) = peer_to_consensus(msg) {
                    q.lock().push_back(m);
                }
            }));

            let q = queue.clone();
            let ctrl = Controller::new(
                ControllerConfig {
                    chain_id,
                    node_key,
                    committee: committee.clone(),
                    self_index: i,
                    fee_destination: AgentId::Nil,
                    timers: Default::default(),
                    gas: Default::default(),
                    vm: Default::default(),
                    rent: Default::default(),
                },
                Collaborators {
                    acs: acs.handle(i),
                    dss: dss.handle(i),
                    mempool: pool.clone(),
                    l1: l1.connector(i),
                    peers,
                    wal: wal.clone(),
                    clock: Arc::new(clock.clone()),
                    vm: vm.clone(),
                    processors: test_registry(),
                    metrics: metrics.clone(),
                },
                Arc::new(move |msg| q.lock().push_back(msg)),
            );
            nodes.push(Node {
                ctrl,
                queue,
                pool,
                wal,
                metrics,
                outputs: Vec::new(),
            });
        }
        Self {
            nodes,
            l1,
            clock,
            network,
            chain_id,
            anchor,
        }
    }

    fn start(&mut self) {
        for node in &self.nodes {
            node.queue.lock().push_back(ConsensusMsg::StateReceived {
                anchor: self.anchor.clone(),
                state: VirtualState::origin(&self.chain_id),
                baseline: None,
            });
        }
        self.pump();
    }

    /// Delivers queued messages one per node in turn until every queue is empty.
    fn pump(&mut self) {
        for _ in 0..10_000 {
            let mut progressed = false;
            for node in &mut self.nodes {
                let msg = node.queue.lock().pop_front();
                if let Some(msg) = msg {
                    node.ctrl.handle(msg);
                    node.outputs.extend(node.ctrl.take_outputs());
                    progressed = true;
                }
            }
            if !progressed {
                return;
            }
        }
        panic!("message pump did not settle");
    }

    fn tick(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        for node in &self.nodes {
            node.queue.lock().push_back(ConsensusMsg::Tick);
        }
        self.pump();
    }

    fn add_off_ledger(&self, nodes: &[usize], nonce: u64) -> Request {
        let req = Request::OffLedger(off_ledger(
            &key(42),
            self.chain_id,
            CallTarget::new("counter", "increment"),
            Dict::new(),
            nonce,
            1_000_000,
        ));
        for i in nodes {
            self.nodes[*i].pool.receive(vec![req.clone()]);
        }
        req
    }
}

fn included(node: &Node) -> bool {
    node.outputs
        .iter()
        .any(|o| matches!(o, ControllerOutput::TransactionIncluded { .. }))
}

#[test]
fn single_node_produces_and_posts_a_block() {
    let mut c = Committee::new(1, None);
    let init = init_request(&c.l1, c.chain_id, &owner_key());
    c.l1.send_request(init.clone());
    assert_eq!(c.nodes[0].pool.size(), 1);
    c.start();

    let published = c.l1.published();
    assert_eq!(published.len(), 1);
    let anchor = c.l1.latest_anchor(&c.chain_id).unwrap();
    assert_eq!(anchor.state_index(), 1);
    assert_eq!(anchor.id, published[0].output_id(0));

    let node = &c.nodes[0];
    let candidate = node.outputs.iter().find_map(|o| match o {
        ControllerOutput::StateCandidate {
            block,
            state,
            approving_output,
        } => Some((block.clone(), state.clone(), *approving_output)),
        _ => None,
    });
    let (block, state, approving) = candidate.expect("a state candidate");
    assert_eq!(block.block_index, 1);
    assert_eq!(approving, anchor.id);
    assert_eq!(anchor.output.l1_commitment().unwrap(), state.l1_commitment());
    assert!(node.wal.contains(&block.hash()));

    assert!(included(node));
    assert_eq!(node.pool.size(), 0);
    assert_eq!(*node.metrics.blocks.lock(), 1);
    let status = node.ctrl.status();
    assert!(status.workflow.contains(&"completed"));
    assert_eq!(status.final_tx, Some(published[0].id()));
}

#[test]
fn nothing_is_proposed_without_requests() {
    let mut c = Committee::new(1, None);
    c.start();
    c.tick(2_000);
    assert!(c.l1.published().is_empty());
    let status = c.nodes[0].ctrl.status();
    assert_eq!(status.workflow, vec!["state_received", "index_proposal_received"]);
}

#[test]
fn nodes_outside_the_committee_stay_idle() {
    let mut c = Committee::new(1, Some(key(55)));
    c.l1.send_request(init_request(&c.l1, c.chain_id, &owner_key()));
    c.start();
    c.tick(2_000);
    let status = c.nodes[0].ctrl.status();
    assert!(!status.member);
    assert_eq!(status.state_index, Some(0));
    assert!(c.l1.published().is_empty());
}

#[test]
fn exactly_one_contributor_posts_first() {
    let mut c = Committee::new(4, None);
    c.l1.send_request(init_request(&c.l1, c.chain_id, &owner_key()));
    c.start();

    assert_eq!(c.l1.published().len(), 1);
    assert_eq!(c.l1.latest_anchor(&c.chain_id).unwrap().state_index(), 1);
    let finalized = c
        .nodes
        .iter()
        .filter(|n| n.ctrl.status().workflow.contains(&"transaction_finalized"))
        .count();
    assert_eq!(finalized, 4);

    // Everyone else learns about the inclusion from the next inclusion query,
    // before the second posting slot opens.
    c.tick(1_000);
    assert_eq!(c.l1.published().len(), 1);
    assert!(c.nodes.iter().all(included));
    assert!(c.nodes.iter().all(|n| n.pool.size() == 0));

    c.tick(10_000);
    assert_eq!(c.l1.published().len(), 1);
}

#[test]
fn missing_requests_are_pulled_from_peers() {
    let mut c = Committee::new(4, None);
    let shared = c.add_off_ledger(&[0, 1, 2], 1);
    // Node 3 proposes something else and comes after the decided quorum.
    let other = c.add_off_ledger(&[3], 2);
    c.l1.send_request(init_request(&c.l1, c.chain_id, &owner_key()));
    c.start();

    assert!(!c.network.delivered(PeerMsgType::MissingRequestIds).is_empty());
    assert!(c
        .network
        .delivered(PeerMsgType::MissingRequest)
        .iter()
        .all(|(_, to)| *to == 3));
    assert!(c.nodes[3].pool.has(&shared.id()));
    let status = c.nodes[3].ctrl.status();
    assert!(status.workflow.contains(&"transaction_finalized"));

    c.tick(1_000);
    assert!(c.nodes.iter().all(included));
    assert!(c.nodes[3].pool.has(&other.id()));
}

#[test]
fn disjoint_proposals_reset_every_node_alike() {
    let mut c = Committee::new(4, None);
    for i in 0..4usize {
        c.add_off_ledger(&[i], 10 + i as u64);
    }
    c.start();

    assert!(c.l1.published().is_empty());
    for node in &c.nodes {
        let status = node.ctrl.status();
        assert_eq!(status.log_index, 1);
        assert_eq!(node.metrics.resets.lock().as_slice(), &["empty_batch"]);
    }
}

#[test]
fn conflicting_transactions_restart_the_round() {
    let mut c = Committee::new(1, None);
    c.l1.send_request(init_request(&c.l1, c.chain_id, &owner_key()));
    c.l1.set_hold(true);
    c.start();
    assert_eq!(c.l1.published().len(), 1);
    assert!(!included(&c.nodes[0]));

    c.l1.conflict_held();
    c.l1.set_hold(false);
    c.tick(1_000);
    let status = c.nodes[0].ctrl.status();
    assert_eq!(status.log_index, 1);
    assert_eq!(c.nodes[0].metrics.resets.lock().as_slice(), &["conflicting"]);

    c.tick(1_000);
    assert_eq!(c.l1.published().len(), 2);
    assert!(included(&c.nodes[0]));
    assert_eq!(c.l1.latest_anchor(&c.chain_id).unwrap().state_index(), 1);
}

#[test]
fn a_new_anchor_completes_the_previous_round() {
    let mut c = Committee::new(1, None);
    c.l1.send_request(init_request(&c.l1, c.chain_id, &owner_key()));
    c.l1.set_hold(true);
    c.start();
    c.l1.release_held();

    let anchor = c.l1.latest_anchor(&c.chain_id).unwrap();
    let state = c.nodes[0]
        .outputs
        .iter()
        .find_map(|o| match o {
            ControllerOutput::StateCandidate { state, .. } => Some(state.clone()),
            _ => None,
        })
        .unwrap();
    c.nodes[0].queue.lock().push_back(ConsensusMsg::StateReceived {
        anchor: anchor.clone(),
        state,
        baseline: None,
    });
    c.pump();

    assert!(included(&c.nodes[0]));
    assert_eq!(c.nodes[0].pool.size(), 0);
    let status = c.nodes[0].ctrl.status();
    assert_eq!(status.anchor_id, Some(anchor.id));
    assert_eq!(status.log_index, 0);
}

#[test]
fn a_vm_run_that_never_reports_resets_the_round() {
    let mut c = Committee::with_vm(1, None, Arc::new(SilentVm));
    c.l1.send_request(init_request(&c.l1, c.chain_id, &owner_key()));
    c.start();
    assert!(c.nodes[0].ctrl.status().workflow.contains(&"vm_started"));

    c.tick(1_000);
    assert!(c.nodes[0].metrics.resets.lock().is_empty());

    c.tick(60_000);
    let status = c.nodes[0].ctrl.status();
    assert_eq!(status.log_index, 1);
    assert!(!status.workflow.contains(&"vm_started"));
    assert_eq!(c.nodes[0].metrics.resets.lock().as_slice(), &["vm_timeout"]);
    assert!(c.l1.published().is_empty());
    assert_eq!(c.nodes[0].pool.size(), 1);
}
