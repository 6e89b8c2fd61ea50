// Path: crates/test_utils/src/dss.rs
//! A DSS committee backed by one shared ed25519 key.
//!
//! Signatures have the form `public_key || signature`, which [`MockL1`]
//! checks against the state controller of the consumed anchor.
//!
//! [`MockL1`]: crate::l1::MockL1

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use kestrel_api::consensus::{DssKey, DssRunner, IndexProposalCallback, SignatureCallback};
use kestrel_types::error::ConsensusError;
use kestrel_types::ids::Address;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Signs `message` the way the committee does.
pub fn threshold_signature(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let mut out = key.verifying_key().to_bytes().to_vec();
    out.extend_from_slice(&key.sign(message).to_bytes());
    out
}

/// Checks a committee signature and returns the signing address.
pub fn verify_threshold_signature(signature: &[u8], message: &[u8]) -> Option<Address> {
    if signature.len() != 96 {
        return None;
    }
    let (pk, sig) = signature.split_at(32);
    let pk: [u8; 32] = pk.try_into().ok()?;
    let key = VerifyingKey::from_bytes(&pk).ok()?;
    let sig = Signature::from_slice(sig).ok()?;
    key.verify(message, &sig).ok()?;
    Some(Address::from_public_key(&key))
}

#[derive(Default)]
struct Instance {
    on_signature: BTreeMap<u16, SignatureCallback>,
    messages: BTreeMap<u16, Vec<u8>>,
    signed: Option<(Vec<u8>, Vec<u8>)>,
}

pub struct LocalDss {
    key: SigningKey,
    quorum: usize,
    instances: Mutex<HashMap<DssKey, Instance>>,
}

impl LocalDss {
    pub fn new(key: SigningKey, quorum: usize) -> Arc<Self> {
        Arc::new(Self {
            key,
            quorum,
            instances: Mutex::new(HashMap::new()),
        })
    }

    /// The runner used by committee member `node`.
    pub fn handle(self: &Arc<Self>, node: u16) -> Arc<dyn DssRunner> {
        Arc::new(DssNode {
            dss: self.clone(),
            node,
        })
    }

    /// The address the committee controls.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.key.verifying_key())
    }

    fn submit(&self, node: u16, key: DssKey, message: Vec<u8>) -> Vec<(SignatureCallback, Vec<u8>)> {
        let mut instances = self.instances.lock();
        let instance = instances.entry(key).or_default();
        instance.messages.insert(node, message.clone());
        if instance.signed.is_none() {
            let agreeing = instance.messages.values().filter(|m| **m == message).count();
            if agreeing >= self.quorum {
                let sig = threshold_signature(&self.key, &message);
                instance.signed = Some((message, sig));
            }
        }
        let Some((signed_msg, sig)) = instance.signed.clone() else {
            return Vec::new();
        };
        let ready: Vec<u16> = instance
            .messages
            .iter()
            .filter(|(_, m)| **m == signed_msg)
            .map(|(n, _)| *n)
            .collect();
        ready
            .into_iter()
            .filter_map(|n| instance.on_signature.remove(&n))
            .map(|cb| (cb, sig.clone()))
            .collect()
    }
}

struct DssNode {
    dss: Arc<LocalDss>,
    node: u16,
}

impl DssRunner for DssNode {
    fn start(
        &self,
        key: DssKey,
        on_index_proposal: IndexProposalCallback,
        on_signature: SignatureCallback,
    ) -> Result<(), ConsensusError> {
        {
            let mut instances = self.dss.instances.lock();
            let instance = instances.entry(key).or_default();
            if instance.on_signature.insert(self.node, on_signature).is_some() {
                return Err(ConsensusError::Dss(format!(
                    "node {} started instance {:?} twice",
                    self.node, key
                )));
            }
        }
        on_index_proposal(vec![self.node]);
        Ok(())
    }

    fn decided_index_proposals(
        &self,
        key: DssKey,
        decided: BTreeMap<u16, Vec<u16>>,
        message: Vec<u8>,
    ) -> Result<(), ConsensusError> {
        if decided.len() < self.dss.quorum {
            return Err(ConsensusError::Dss(format!(
                "{} index proposals, quorum is {}",
                decided.len(),
                self.dss.quorum
            )));
        }
        for (cb, sig) in self.dss.submit(self.node, key, message) {
            cb(sig);
        }
        Ok(())
    }

    fn address(&self) -> Address {
        self.dss.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DssKey {
        DssKey {
            journal_id: [1; 32],
            log_index: 0,
        }
    }

    #[test]
    fn signs_once_quorum_agrees() {
        let dss = LocalDss::new(SigningKey::from_bytes(&[4; 32]), 2);
        let sigs = Arc::new(Mutex::new(Vec::new()));
        for node in 0..3u16 {
            let sigs = sigs.clone();
            dss.handle(node)
                .start(key(), Box::new(|_| {}), Box::new(move |s| sigs.lock().push((node, s))))
                .unwrap();
        }
        let decided: BTreeMap<u16, Vec<u16>> = (0..2u16).map(|n| (n, vec![n])).collect();
        dss.handle(0).decided_index_proposals(key(), decided.clone(), b"m".to_vec()).unwrap();
        assert!(sigs.lock().is_empty());
        dss.handle(2).decided_index_proposals(key(), decided.clone(), b"other".to_vec()).unwrap();
        assert!(sigs.lock().is_empty());
        dss.handle(1).decided_index_proposals(key(), decided, b"m".to_vec()).unwrap();

        let sigs = sigs.lock();
        assert_eq!(sigs.len(), 2);
        assert_eq!(
            verify_threshold_signature(&sigs[0].1, b"m"),
            Some(dss.address())
        );
        assert!(verify_threshold_signature(&sigs[0].1, b"other").is_none());
    }
}
