// Path: crates/api/src/mempool.rs
//! The pending request pool as seen by the consensus controller.

use kestrel_types::ids::{HashValue, RequestId};
use kestrel_types::request::Request;

/// The projection of a decided id list onto the local pool.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRequests {
    /// The requests found, in the order of the decided ids.
    pub requests: Vec<Request>,
    /// Positions of the decided ids that are not known locally.
    pub missing: Vec<usize>,
    /// `true` when `missing` is empty.
    pub all_arrived: bool,
}

/// A pool of pending requests keyed by request id.
pub trait RequestPool: Send + Sync {
    /// Adds requests, deduplicating by id and dropping already-processed ones.
    /// Returns the ids that were newly accepted.
    fn receive(&self, requests: Vec<Request>) -> Vec<RequestId>;

    /// Requests that can be proposed at `now_ns`.
    fn ready_now(&self, now_ns: u64) -> Vec<Request>;

    /// Looks up a decided batch. A request is only taken when its hash matches.
    fn ready_from_ids(&self, ids: &[RequestId], hashes: &[HashValue]) -> ResolvedRequests;

    /// Drains requests after a commit.
    fn remove(&self, ids: &[RequestId]);

    /// Returns `true` if the request is pending.
    fn has(&self, id: &RequestId) -> bool;

    /// Returns a pending request.
    fn get(&self, id: &RequestId) -> Option<Request>;

    /// Number of pending requests.
    fn size(&self) -> usize;
}
