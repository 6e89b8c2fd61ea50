// Path: crates/validator/tests/common/mod.rs
//! A committee of chain nodes over in-process L1, ACS, DSS and peer doubles,
//! running on the real clock.

#![allow(dead_code)]

use ed25519_dalek::{SigningKey, VerifyingKey};
use kestrel_api::clock::SystemClock;
use kestrel_api::client::ChainClient;
use kestrel_api::peer::quorum;
use kestrel_telemetry::sinks::NopSink;
use kestrel_test_utils::fixtures::{address_of, committee_keys, committee_signing_key, init_request, owner_key};
use kestrel_test_utils::programs::test_registry;
use kestrel_test_utils::{LocalAcs, LocalDss, LocalNetwork, MockL1};
use kestrel_types::assets::Assets;
use kestrel_types::config::ChainNodeConfig;
use kestrel_types::dict::Dict;
use kestrel_types::ids::{AgentId, ChainId, Hname, RequestId};
use kestrel_types::receipt::RequestReceipt;
use kestrel_types::request::Request;
use kestrel_validator::{ChainNode, ChainParams, ChainServices};
use parity_scale_codec::Encode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(30);
pub const CHAIN_FUNDS: u64 = 10_000_000;

fn config(dir: &TempDir, overrides: &str) -> ChainNodeConfig {
    let toml = format!(
        r#"
mailbox_capacity = 1000
wal_dir = "{wal}"
db_dir = "{db}"

[consensus]
tick_interval_ms = 10
propose_batch_delay_for_new_state_ms = 10
propose_batch_retry_ms = 50
vm_run_retry_to_wait_for_ready_requests_ms = 20
post_tx_sequence_step_ms = 100
pull_inclusion_state_retry_ms = 50

[state_manager]
pull_state_retry_ms = 200
pull_state_after_state_candidate_delay_ms = 100
get_block_retry_ms = 100
timer_tick_ms = 10
nodes_to_request_block_from = 3
{overrides}
"#,
        wal = dir.path().join("wal").display(),
        db = dir.path().join("db").display(),
    );
    ChainNodeConfig::from_toml_str(&toml).unwrap()
}

pub struct Cluster {
    pub l1: Arc<MockL1>,
    pub network: Arc<LocalNetwork>,
    pub chain_id: ChainId,
    acs: Arc<LocalAcs>,
    dss: Arc<LocalDss>,
    keys: Vec<SigningKey>,
    committee: Vec<VerifyingKey>,
    dirs: Vec<TempDir>,
    overrides: String,
    pub nodes: Vec<Option<ChainNode>>,
}

impl Cluster {
    /// Starts `n` nodes on a fresh chain. `overrides` is appended to every
    /// node's TOML config.
    pub fn start(n: u16, overrides: &str) -> Self {
        let q = usize::from(quorum(n));
        let l1 = MockL1::new(Arc::new(SystemClock));
        let dss = LocalDss::new(committee_signing_key(), q);
        let anchor = l1.create_chain(dss.address(), address_of(&owner_key()), CHAIN_FUNDS);
        let keys = committee_keys(n);
        let mut cluster = Self {
            chain_id: anchor.output.chain_id,
            l1,
            network: LocalNetwork::new(n),
            acs: LocalAcs::new(q),
            dss,
            committee: keys.iter().map(|k| k.verifying_key()).collect(),
            keys,
            dirs: (0..n).map(|_| tempfile::tempdir().unwrap()).collect(),
            overrides: overrides.to_string(),
            nodes: (0..n).map(|_| None).collect(),
        };
        for i in 0..n {
            cluster.start_node(i);
        }
        cluster
    }

    pub fn start_node(&mut self, i: u16) {
        let idx = usize::from(i);
        self.network.set_online(i, true);
        let node = ChainNode::start(
            ChainParams {
                chain_id: self.chain_id,
                node_key: self.keys[idx].clone(),
                committee: self.committee.clone(),
                fee_destination: AgentId::Nil,
                config: config(&self.dirs[idx], &self.overrides),
            },
            ChainServices {
                acs: self.acs.handle(i),
                dss: self.dss.handle(i),
                l1: self.l1.connector(i),
                peers: self.network.handle(i),
                clock: Arc::new(SystemClock),
                processors: test_registry(),
            },
            Arc::new(NopSink),
        )
        .unwrap();
        self.nodes[idx] = Some(node);
    }

    pub async fn stop_node(&mut self, i: u16) {
        self.network.set_online(i, false);
        if let Some(node) = self.nodes[usize::from(i)].take() {
            node.stop().await;
        }
    }

    pub fn node(&self, i: usize) -> &ChainNode {
        self.nodes[i].as_ref().unwrap()
    }

    pub fn anchor_index(&self) -> u32 {
        self.l1.latest_anchor(&self.chain_id).unwrap().state_index()
    }

    /// Sends the init request and waits until the chain is at index 1.
    pub async fn init(&self) -> RequestReceipt {
        let req = init_request(&self.l1, self.chain_id, &owner_key());
        let id = Request::OnLedger(req.clone()).id();
        self.l1.send_request(req);
        let receipt = self.receipt(0, id).await;
        assert!(receipt.error.is_none(), "init failed: {:?}", receipt.error);
        receipt
    }

    pub async fn receipt(&self, node: usize, id: RequestId) -> RequestReceipt {
        self.node(node).await_receipt(id, WAIT).await.unwrap()
    }

    pub async fn balance(&self, node: usize, agent: &AgentId) -> Assets {
        self.node(node)
            .call_view(
                Hname::from_name("accounts"),
                Hname::from_name("balance"),
                Dict::new().with("a", agent.encode()),
            )
            .await
            .unwrap()
            .get_decoded("a")
            .unwrap()
    }
}

/// Polls `f` until it holds.
pub async fn eventually(what: &str, mut f: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(WAIT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting until {}", what);
}
