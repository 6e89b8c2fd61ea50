// Path: crates/validator/src/mempool.rs
//! The pending request pool of one chain.

use crate::solid::SolidView;
use ahash::RandomState;
use kestrel_api::clock::Clock;
use kestrel_api::mempool::{RequestPool, ResolvedRequests};
use kestrel_telemetry::sinks::MempoolMetricsSink;
use kestrel_types::config::MempoolConfig;
use kestrel_types::error::MempoolError;
use kestrel_types::ids::{ChainId, HashValue, L1Address, RequestId};
use kestrel_types::request::{OnLedgerRequest, Request, RequestOutput};
use kestrel_vm::contracts::blocklog;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const SHARD_COUNT: usize = 16;
const MS: u64 = 1_000_000;

#[derive(Debug)]
struct Entry {
    request: Request,
    /// Local arrival time, used to keep proposals stable between ticks.
    received_ns: u64,
}

fn target_chain(r: &OnLedgerRequest) -> Option<ChainId> {
    let address = match &r.output {
        RequestOutput::Basic(o) => o.address,
        RequestOutput::Nft(o) => o.address,
    };
    match address {
        L1Address::Chain(chain_id) => Some(chain_id),
        L1Address::Ed25519(_) => None,
    }
}

/// A sharded pool keyed by request id.
///
/// Requests already in the block log never enter: the pool checks a bounded
/// cache of ids it drained itself and, when it has a [`SolidView`], the
/// block log of the solid state. On-ledger requests whose expiration falls
/// within the expiry margin can never be proposed again and are evicted.
/// `total` only changes under the lock of the shard that changed.
pub struct Mempool {
    chain_id: ChainId,
    config: MempoolConfig,
    shards: Vec<Mutex<HashMap<RequestId, Entry>>>,
    hasher: RandomState,
    total: AtomicUsize,
    recently_processed: Mutex<LruCache<RequestId, ()>>,
    solid: Option<SolidView>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MempoolMetricsSink>,
}

impl std::fmt::Debug for Mempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("chain_id", &self.chain_id)
            .field("size", &self.size())
            .finish()
    }
}

impl Mempool {
    pub fn new(
        chain_id: ChainId,
        config: MempoolConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MempoolMetricsSink>,
    ) -> Self {
        let cap = NonZeroUsize::new(config.recently_processed_cache.max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(HashMap::new()));
        }
        Self {
            chain_id,
            config,
            shards,
            hasher: RandomState::new(),
            total: AtomicUsize::new(0),
            recently_processed: Mutex::new(LruCache::new(cap)),
            solid: None,
            clock,
            metrics,
        }
    }

    /// Filters requests against the block log of `solid`.
    pub fn with_solid_view(mut self, solid: SolidView) -> Self {
        self.solid = Some(solid);
        self
    }

    // The modulo keeps the index in range.
    #[allow(clippy::indexing_slicing)]
    fn shard(&self, id: &RequestId) -> &Mutex<HashMap<RequestId, Entry>> {
        let index = (self.hasher.hash_one(id) as usize) % SHARD_COUNT;
        &self.shards[index]
    }

    fn is_processed(&self, id: &RequestId) -> bool {
        if self.recently_processed.lock().contains(id) {
            return true;
        }
        let Some(solid) = &self.solid else {
            return false;
        };
        match solid.read(|reader| blocklog::request_lookup(reader, id)) {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::debug!(target: "mempool", request = %id, error = %e, "block log lookup failed");
                false
            }
        }
    }

    /// Adds one request. Returns `false` when it was already pending.
    pub fn receive_checked(&self, request: Request) -> Result<bool, MempoolError> {
        match &request {
            Request::OffLedger(r) => {
                if r.chain_id != self.chain_id {
                    return Err(MempoolError::WrongChain);
                }
                r.verify_signature()?;
            }
            Request::OnLedger(r) => {
                if target_chain(r) != Some(self.chain_id) {
                    return Err(MempoolError::WrongChain);
                }
            }
        }
        let id = request.id();
        if self.is_processed(&id) {
            return Err(MempoolError::AlreadyProcessed(id.to_string()));
        }

        let added = {
            let mut shard = self.shard(&id).lock();
            if shard.contains_key(&id) {
                None
            } else {
                shard.insert(
                    id,
                    Entry {
                        request,
                        received_ns: self.clock.now_ns(),
                    },
                );
                Some(self.total.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };
        if let Some(size) = added {
            self.metrics.inc_requests_received();
            self.metrics.set_mempool_size(size);
            tracing::debug!(target: "mempool", request = %id, size, "request pooled");
        }
        Ok(added.is_some())
    }

    /// An on-ledger request too close to its expiration to be proposed.
    fn is_expired(&self, request: &Request, now_ns: u64) -> bool {
        let Request::OnLedger(r) = request else {
            return false;
        };
        let margin = self.config.expiry_margin_ms.saturating_mul(MS);
        r.expiration()
            .is_some_and(|e| e.time <= now_ns.saturating_add(margin))
    }

    fn is_time_locked(request: &Request, now_ns: u64) -> bool {
        match request {
            Request::OnLedger(r) => r.time_lock().is_some_and(|t| t > now_ns),
            Request::OffLedger(_) => false,
        }
    }
}

impl RequestPool for Mempool {
    fn receive(&self, requests: Vec<Request>) -> Vec<RequestId> {
        let mut accepted = Vec::new();
        for request in requests {
            let id = request.id();
            match self.receive_checked(request) {
                Ok(true) => accepted.push(id),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(target: "mempool", request = %id, error = %e, "request dropped");
                }
            }
        }
        accepted
    }

    fn ready_now(&self, now_ns: u64) -> Vec<Request> {
        let mut ready: Vec<(u64, Request)> = Vec::new();
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|id, entry| {
                if self.is_expired(&entry.request, now_ns) {
                    tracing::debug!(target: "mempool", request = %id, "expired request evicted");
                    return false;
                }
                if !Self::is_time_locked(&entry.request, now_ns) {
                    ready.push((entry.received_ns, entry.request.clone()));
                }
                true
            });
            let gone = before - shard.len();
            if gone > 0 {
                self.total.fetch_sub(gone, Ordering::SeqCst);
                evicted += gone;
            }
        }
        if evicted > 0 {
            self.metrics.set_mempool_size(self.size());
        }
        ready.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id().cmp(&b.1.id())));
        ready.into_iter().map(|(_, r)| r).collect()
    }

    fn ready_from_ids(&self, ids: &[RequestId], hashes: &[HashValue]) -> ResolvedRequests {
        let mut out = ResolvedRequests::default();
        for (i, (id, hash)) in ids.iter().zip(hashes).enumerate() {
            let shard = self.shard(id).lock();
            match shard.get(id) {
                Some(e) if e.request.hash() == *hash => out.requests.push(e.request.clone()),
                _ => out.missing.push(i),
            }
        }
        out.all_arrived = out.missing.is_empty();
        out
    }

    fn remove(&self, ids: &[RequestId]) {
        let mut removed = 0;
        for id in ids {
            let mut shard = self.shard(id).lock();
            if shard.remove(id).is_some() {
                self.total.fetch_sub(1, Ordering::SeqCst);
                removed += 1;
            }
        }
        {
            let mut recent = self.recently_processed.lock();
            for id in ids {
                recent.put(*id, ());
            }
        }
        let size = self.size();
        self.metrics.set_mempool_size(size);
        tracing::debug!(target: "mempool", removed, size, "requests drained");
    }

    fn has(&self, id: &RequestId) -> bool {
        self.shard(id).lock().contains_key(id)
    }

    fn get(&self, id: &RequestId) -> Option<Request> {
        self.shard(id).lock().get(id).map(|e| e.request.clone())
    }

    fn size(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}
