// Path: crates/test_utils/src/acs.rs
//! An ACS committee that agrees on the first quorum of proposals it sees.

use kestrel_api::consensus::{AcsCallback, AcsOutput, AcsRunner};
use kestrel_types::error::ConsensusError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct Instance {
    proposals: BTreeMap<u16, Vec<u8>>,
    waiting: Vec<AcsCallback>,
    decided: Option<Vec<Vec<u8>>>,
}

/// Instances are keyed by `(session_id, log_index)`. Once `quorum` members
/// proposed, the decided set is frozen and delivered to every proposer,
/// including late ones.
pub struct LocalAcs {
    quorum: usize,
    instances: Mutex<HashMap<(u64, u32), Instance>>,
}

impl LocalAcs {
    pub fn new(quorum: usize) -> Arc<Self> {
        Arc::new(Self {
            quorum,
            instances: Mutex::new(HashMap::new()),
        })
    }

    /// The runner used by committee member `node`.
    pub fn handle(self: &Arc<Self>, node: u16) -> Arc<dyn AcsRunner> {
        Arc::new(AcsNode {
            acs: self.clone(),
            node,
        })
    }

    /// Number of proposals submitted to an instance so far.
    pub fn proposals(&self, session_id: u64, log_index: u32) -> usize {
        self.instances
            .lock()
            .get(&(session_id, log_index))
            .map(|i| i.proposals.len())
            .unwrap_or(0)
    }
}

struct AcsNode {
    acs: Arc<LocalAcs>,
    node: u16,
}

impl AcsRunner for AcsNode {
    fn run(
        &self,
        proposal: Vec<u8>,
        session_id: u64,
        _state_index: u32,
        log_index: u32,
        callback: AcsCallback,
    ) -> Result<(), ConsensusError> {
        let fire: Vec<(AcsCallback, Vec<Vec<u8>>)> = {
            let mut instances = self.acs.instances.lock();
            let instance = instances.entry((session_id, log_index)).or_default();
            if instance.proposals.contains_key(&self.node) {
                return Err(ConsensusError::Acs(format!(
                    "node {} already proposed in session {} log {}",
                    self.node, session_id, log_index
                )));
            }
            instance.proposals.insert(self.node, proposal);
            instance.waiting.push(callback);
            if instance.decided.is_none() && instance.proposals.len() >= self.acs.quorum {
                instance.decided = Some(instance.proposals.values().cloned().collect());
            }
            match &instance.decided {
                Some(values) => instance
                    .waiting
                    .drain(..)
                    .map(|cb| (cb, values.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };
        for (cb, values) in fire {
            cb(AcsOutput {
                session_id,
                log_index,
                values,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decides_once_quorum_proposed() {
        let acs = LocalAcs::new(2);
        let out = Arc::new(Mutex::new(Vec::new()));
        for node in 0..3u16 {
            let out = out.clone();
            acs.handle(node)
                .run(
                    vec![node as u8],
                    7,
                    1,
                    0,
                    Box::new(move |o| out.lock().push((node, o.values))),
                )
                .unwrap();
        }
        let out = out.lock();
        assert_eq!(out.len(), 3);
        for (_, values) in out.iter() {
            assert_eq!(values, &vec![vec![0u8], vec![1u8]]);
        }
    }
}
