// Path: crates/test_utils/src/network.rs
//! An in-process peer network. Delivery is synchronous; messages to or from
//! an offline node are dropped.

use kestrel_api::peer::{PeerHandler, PeerTransport};
use kestrel_types::error::PeeringError;
use kestrel_types::messages::{PeerMessage, PeerMsgType};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct NetInner {
    handlers: HashMap<u16, PeerHandler>,
    offline: HashSet<u16>,
    delivered: Vec<(u16, u16, PeerMsgType)>,
}

pub struct LocalNetwork {
    size: u16,
    inner: Mutex<NetInner>,
}

impl LocalNetwork {
    pub fn new(size: u16) -> Arc<Self> {
        Arc::new(Self {
            size,
            inner: Mutex::new(NetInner::default()),
        })
    }

    /// The transport of node `index`.
    pub fn handle(self: &Arc<Self>, index: u16) -> Arc<dyn PeerTransport> {
        Arc::new(PeerNode {
            net: self.clone(),
            index,
        })
    }

    pub fn set_online(&self, index: u16, online: bool) {
        let mut inner = self.inner.lock();
        if online {
            inner.offline.remove(&index);
        } else {
            inner.offline.insert(index);
        }
    }

    /// Delivered messages of one type as `(from, to)` pairs.
    pub fn delivered(&self, msg_type: PeerMsgType) -> Vec<(u16, u16)> {
        self.inner
            .lock()
            .delivered
            .iter()
            .filter(|(_, _, t)| *t == msg_type)
            .map(|(f, t, _)| (*f, *t))
            .collect()
    }

    fn deliver(&self, from: u16, to: u16, msg: PeerMessage) -> Result<(), PeeringError> {
        if to >= self.size {
            return Err(PeeringError::UnknownPeer(to));
        }
        let handler = {
            let mut inner = self.inner.lock();
            if inner.offline.contains(&from) || inner.offline.contains(&to) {
                return Ok(());
            }
            let Some(handler) = inner.handlers.get(&to).cloned() else {
                return Ok(());
            };
            inner.delivered.push((from, to, msg.msg_type));
            handler
        };
        handler(msg);
        Ok(())
    }
}

struct PeerNode {
    net: Arc<LocalNetwork>,
    index: u16,
}

impl PeerTransport for PeerNode {
    fn self_index(&self) -> u16 {
        self.index
    }

    fn committee_size(&self) -> u16 {
        self.net.size
    }

    fn attach(&self, handler: PeerHandler) {
        self.net.inner.lock().handlers.insert(self.index, handler);
    }

    fn send_to(&self, peer: u16, msg: PeerMessage) -> Result<(), PeeringError> {
        self.net.deliver(self.index, peer, msg)
    }

    fn send_to_random(&self, n: usize, msg: PeerMessage) -> Result<Vec<u16>, PeeringError> {
        let mut others: Vec<u16> = (0..self.net.size).filter(|p| *p != self.index).collect();
        others.shuffle(&mut rand::thread_rng());
        others.truncate(n);
        for peer in &others {
            self.send_to(*peer, msg.clone())?;
        }
        Ok(others)
    }
}
