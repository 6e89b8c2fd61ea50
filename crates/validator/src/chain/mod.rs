// Path: crates/validator/src/chain/mod.rs
//! The per-chain runtime.
//!
//! A chain runs two event loops, one for consensus and one for the state
//! manager. Each owns its component and drains a [`Mailbox`]; everything
//! else only posts into those mailboxes. Peer messages are bounded and
//! rejected when full; L1 callbacks, ACS/DSS/VM completions and hand-offs
//! between the loops travel on the control lane. A periodic tick wakes each
//! loop so deadlines fire without traffic.

mod client;
mod dispatch;
pub mod mailbox;

use crate::mempool::Mempool;
use crate::solid::SolidView;
use crate::statemgr::{StateManager, StateManagerStatus, StateMsg, StateOutput};
use dispatch::Dispatcher;
use ed25519_dalek::{SigningKey, VerifyingKey};
use kestrel_api::clock::Clock;
use kestrel_api::consensus::{AcsRunner, DssRunner};
use kestrel_api::l1::L1Connector;
use kestrel_api::mempool::RequestPool;
use kestrel_api::peer::PeerTransport;
use kestrel_consensus::{
    BlockingVmRunner, Collaborators, ConsensusMsg, ConsensusStatus, Controller, ControllerConfig,
    ControllerOutput,
};
use kestrel_storage::{BlockStore, BlockWalFile};
use kestrel_telemetry::sinks::MetricsSink;
use kestrel_types::config::{ChainNodeConfig, GasLimits};
use kestrel_types::error::ChainError;
use kestrel_types::ids::{AgentId, ChainId, RequestId};
use kestrel_types::messages::PeeringId;
use kestrel_vm::processors::ProcessorRegistry;
use lru::LruCache;
use mailbox::{Inbox, Mailbox};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

const REQUEST_ACK_CACHE: usize = 1024;

/// Identity and settings of one chain on this node.
#[derive(Clone)]
pub struct ChainParams {
    pub chain_id: ChainId,
    pub node_key: SigningKey,
    /// Node keys of the committee, in peer index order.
    pub committee: Vec<VerifyingKey>,
    pub fee_destination: AgentId,
    pub config: ChainNodeConfig,
}

/// Node-wide services the chain is plugged into.
#[derive(Clone)]
pub struct ChainServices {
    pub acs: Arc<dyn AcsRunner>,
    pub dss: Arc<dyn DssRunner>,
    pub l1: Arc<dyn L1Connector>,
    pub peers: Arc<dyn PeerTransport>,
    pub clock: Arc<dyn Clock>,
    pub processors: Arc<ProcessorRegistry>,
}

/// A point-in-time view of a running chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    pub chain_id: ChainId,
    pub consensus: ConsensusStatus,
    pub state: StateManagerStatus,
    pub mempool_size: usize,
    pub dismissed: Option<String>,
}

/// State shared between the loops, the dispatcher and the client surface.
pub(crate) struct Shared {
    pub(crate) chain_id: ChainId,
    pub(crate) peering_ids: RwLock<HashSet<PeeringId>>,
    /// Peer group of the latest anchor.
    pub(crate) peering_id: RwLock<Option<PeeringId>>,
    pub(crate) request_acks: Mutex<LruCache<RequestId, BTreeSet<u16>>>,
    consensus_status: Mutex<ConsensusStatus>,
    state_status: Mutex<StateManagerStatus>,
    dismissed: Mutex<Option<String>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn new(chain_id: ChainId) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            chain_id,
            peering_ids: RwLock::new(HashSet::new()),
            peering_id: RwLock::new(None),
            request_acks: Mutex::new(LruCache::new(
                NonZeroUsize::new(REQUEST_ACK_CACHE).unwrap_or(NonZeroUsize::MIN),
            )),
            consensus_status: Mutex::new(ConsensusStatus::default()),
            state_status: Mutex::new(StateManagerStatus::default()),
            dismissed: Mutex::new(None),
            shutdown,
        }
    }

    /// Stops both loops. The first reason wins.
    pub(crate) fn dismiss(&self, reason: String) {
        {
            let mut dismissed = self.dismissed.lock();
            if dismissed.is_some() {
                return;
            }
            error!(target: "chain", chain = %self.chain_id, %reason, "chain dismissed");
            *dismissed = Some(reason);
        }
        self.shutdown.send_replace(true);
    }

    pub(crate) fn dismissed(&self) -> Option<String> {
        self.dismissed.lock().clone()
    }
}

/// One chain running on this node.
pub struct ChainNode {
    shared: Arc<Shared>,
    mempool: Arc<Mempool>,
    solid: SolidView,
    peers: Arc<dyn PeerTransport>,
    l1: Arc<dyn L1Connector>,
    processors: Arc<ProcessorRegistry>,
    gas: GasLimits,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ChainNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainNode")
            .field("chain_id", &self.shared.chain_id)
            .field("mempool", &self.mempool)
            .finish()
    }
}

impl ChainNode {
    /// Opens the chain's stores, spawns its loops on the current runtime and
    /// registers it with L1 and the peer transport.
    pub fn start<M: MetricsSink + 'static>(
        params: ChainParams,
        services: ChainServices,
        metrics: Arc<M>,
    ) -> Result<Self, ChainError> {
        let handle = Handle::try_current().map_err(|e| ChainError::Init(e.to_string()))?;
        let ChainParams {
            chain_id,
            node_key,
            committee,
            fee_destination,
            config,
        } = params;
        config.gas.validate()?;

        let blocks = BlockStore::open(config.db_dir.join(format!("{}.redb", chain_id)))?;
        let wal = Arc::new(
            BlockWalFile::open(&config.wal_dir.join(chain_id.to_string()))
                .map_err(|e| ChainError::Init(format!("write-ahead log: {:#}", e)))?,
        );
        let solid = SolidView::new();
        let mempool = Arc::new(
            Mempool::new(
                chain_id,
                config.mempool.clone(),
                services.clock.clone(),
                metrics.clone(),
            )
            .with_solid_view(solid.clone()),
        );
        let (consensus_box, consensus_inbox) =
            mailbox::channel("consensus", config.mailbox_capacity, metrics.clone());
        let (state_box, state_inbox) =
            mailbox::channel("statemgr", config.mailbox_capacity, metrics.clone());

        let statemgr = StateManager::new(
            chain_id,
            config.state_manager.clone(),
            blocks,
            wal.clone(),
            solid.clone(),
            services.peers.clone(),
            services.l1.clone(),
            services.clock.clone(),
            metrics.clone(),
        )
        .map_err(|e| ChainError::Init(format!("state: {}", e)))?;

        let sink_box = consensus_box.clone();
        let controller = Controller::new(
            ControllerConfig {
                chain_id,
                node_key,
                committee,
                self_index: services.peers.self_index(),
                fee_destination,
                timers: config.consensus.clone(),
                gas: config.gas.clone(),
                vm: config.vm.clone(),
                rent: config.rent.clone(),
            },
            Collaborators {
                acs: services.acs.clone(),
                dss: services.dss.clone(),
                mempool: mempool.clone(),
                l1: services.l1.clone(),
                peers: services.peers.clone(),
                wal,
                clock: services.clock.clone(),
                vm: Arc::new(BlockingVmRunner::new(handle.clone())),
                processors: services.processors.clone(),
                metrics: metrics.clone(),
            },
            Arc::new(move |msg| {
                if let Err(e) = sink_box.post_control(msg) {
                    debug!(target: "chain", error = %e, "consensus callback after shutdown");
                }
            }),
        );

        let shared = Arc::new(Shared::new(chain_id));
        let dispatcher = Arc::new(Dispatcher {
            shared: shared.clone(),
            mempool: mempool.clone(),
            consensus: consensus_box.clone(),
            state: state_box.clone(),
            peers: services.peers.clone(),
        });
        let on_peer = dispatcher.clone();
        services
            .peers
            .attach(Arc::new(move |msg| on_peer.on_peer_message(msg)));

        let tasks = vec![
            spawn_loop(
                &handle,
                "consensus",
                shared.clone(),
                consensus_loop(
                    controller,
                    consensus_inbox,
                    state_box,
                    Duration::from_millis(config.consensus.tick_interval_ms.max(1)),
                    shared.clone(),
                ),
            ),
            spawn_loop(
                &handle,
                "statemgr",
                shared.clone(),
                state_loop(
                    statemgr,
                    state_inbox,
                    consensus_box,
                    Duration::from_millis(config.state_manager.timer_tick_ms.max(1)),
                    shared.clone(),
                ),
            ),
        ];

        services
            .l1
            .register_chain(chain_id, dispatcher.l1_handlers())
            .map_err(|e| ChainError::Init(format!("L1 registration: {}", e)))?;
        info!(target: "chain", chain = %chain_id, index = services.peers.self_index(), "chain started");

        Ok(Self {
            shared,
            mempool,
            solid,
            peers: services.peers,
            l1: services.l1,
            processors: services.processors,
            gas: config.gas,
            tasks,
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.shared.chain_id
    }

    /// Stops the chain's loops with `reason`. The node no longer takes part
    /// in consensus for this chain.
    pub fn dismiss(&self, reason: impl Into<String>) {
        self.shared.dismiss(reason.into());
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus {
            chain_id: self.shared.chain_id,
            consensus: self.shared.consensus_status.lock().clone(),
            state: self.shared.state_status.lock().clone(),
            mempool_size: self.mempool.size(),
            dismissed: self.shared.dismissed(),
        }
    }

    /// Peers that acknowledged the relay of an off-ledger request.
    pub fn request_acks(&self, id: &RequestId) -> Vec<u16> {
        self.shared
            .request_acks
            .lock()
            .peek(id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn solid(&self) -> &SolidView {
        &self.solid
    }

    /// Stops the loops, waits for them and unregisters from L1. The stores
    /// are closed once this returns.
    pub async fn stop(mut self) {
        self.shared.shutdown.send_replace(true);
        for joined in futures::future::join_all(self.tasks.drain(..)).await {
            if let Err(e) = joined {
                debug!(target: "chain", error = %e, "loop supervisor ended abnormally");
            }
        }
        self.l1.unregister_chain(&self.shared.chain_id);
        info!(target: "chain", chain = %self.shared.chain_id, "chain stopped");
    }
}

/// Runs `fut` and dismisses the chain if it panics.
fn spawn_loop(
    handle: &Handle,
    name: &'static str,
    shared: Arc<Shared>,
    fut: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<()> {
    let inner = handle.spawn(fut);
    handle.spawn(async move {
        if let Err(e) = inner.await {
            if e.is_panic() {
                shared.dismiss(format!("{} loop panicked", name));
            }
        }
    })
}

async fn consensus_loop(
    mut controller: Controller,
    mut inbox: Inbox<ConsensusMsg>,
    state: Mailbox<StateMsg>,
    tick: Duration,
    shared: Arc<Shared>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let msg = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            Some(msg) = inbox.recv() => msg,
            _ = ticker.tick() => ConsensusMsg::Tick,
        };
        let received = match &msg {
            ConsensusMsg::StateReceived { anchor, .. } => Some(anchor.id),
            _ => None,
        };
        controller.handle(msg);
        if let Some(anchor_id) = received {
            if let Err(e) = state.post_control(StateMsg::Acknowledged(anchor_id)) {
                debug!(target: "chain", error = %e, "state acknowledgement after shutdown");
            }
        }
        for output in controller.take_outputs() {
            match output {
                ControllerOutput::StateCandidate {
                    block,
                    state: candidate,
                    approving_output,
                } => {
                    if let Err(e) = state.post_control(StateMsg::Candidate {
                        block,
                        state: candidate,
                        approving_output,
                    }) {
                        debug!(target: "chain", error = %e, "state candidate after shutdown");
                    }
                }
                ControllerOutput::TransactionIncluded {
                    tx_id, processed, ..
                } => {
                    info!(target: "chain", tx = %tx_id, requests = processed.len(), "transaction included");
                }
                ControllerOutput::Dismiss(reason) => shared.dismiss(reason),
            }
        }
        *shared.consensus_status.lock() = controller.status();
    }
    debug!(target: "chain", chain = %shared.chain_id, "consensus loop stopped");
}

async fn state_loop(
    mut statemgr: StateManager,
    mut inbox: Inbox<StateMsg>,
    consensus: Mailbox<ConsensusMsg>,
    tick: Duration,
    shared: Arc<Shared>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let msg = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            Some(msg) = inbox.recv() => msg,
            _ = ticker.tick() => StateMsg::Tick,
        };
        statemgr.handle(msg);
        for output in statemgr.take_outputs() {
            match output {
                StateOutput::Synced {
                    anchor,
                    state,
                    baseline,
                } => {
                    if let Err(e) = consensus.post_control(ConsensusMsg::StateReceived {
                        anchor,
                        state,
                        baseline: Some(baseline),
                    }) {
                        debug!(target: "chain", error = %e, "synced state after shutdown");
                    }
                }
                StateOutput::Dismiss(reason) => shared.dismiss(reason),
            }
        }
        *shared.state_status.lock() = statemgr.status();
    }
    debug!(target: "chain", chain = %shared.chain_id, "state loop stopped");
}
