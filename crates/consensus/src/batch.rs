// Path: crates/consensus/src/batch.rs
//! Turning an ACS output into a block: the decided batch, its parameters,
//! the execution order of its requests and the posting order of its
//! transaction.
//!
//! Everything here is a pure function of the ACS output, so every honest
//! member derives the same batch.

use crate::proposal::BatchProposal;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use kestrel_types::error::ConsensusError;
use kestrel_types::ids::{hash_data, hash_parts, AgentId, HashValue, OutputId, RequestId, TransactionId};
use kestrel_types::request::Request;
use std::collections::{BTreeMap, BTreeSet};

/// What a member needs to know to check an ACS output.
#[derive(Debug, Clone, Copy)]
pub struct DecideParams<'a> {
    /// The anchor the round works on.
    pub anchor_id: OutputId,
    /// Node keys of the committee, by validator index.
    pub committee: &'a [VerifyingKey],
    pub quorum: usize,
    /// Timestamp of the state the batch builds on.
    pub state_timestamp: u64,
}

/// The batch agreed by ACS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecidedBatch {
    /// Validator indexes of the contributing proposals, ascending.
    pub contributors: Vec<u16>,
    /// Requests present in at least a quorum of proposals.
    pub request_ids: Vec<RequestId>,
    pub request_hashes: Vec<HashValue>,
    pub timestamp: u64,
    pub entropy: HashValue,
    pub fee_destination: AgentId,
    /// DSS nonce index proposals by contributor.
    pub index_proposals: BTreeMap<u16, Vec<u16>>,
}

impl DecidedBatch {
    pub fn is_empty(&self) -> bool {
        self.request_ids.is_empty()
    }

    /// The position of `validator_index` among the contributors.
    pub fn contribution_of(&self, validator_index: u16) -> Option<usize> {
        self.contributors.iter().position(|c| *c == validator_index)
    }
}

fn mismatch(msg: impl Into<String>) -> ConsensusError {
    ConsensusError::ConsensusMismatch(msg.into())
}

fn check_share(key: &VerifyingKey, anchor_id: &OutputId, share: &[u8]) -> bool {
    Signature::from_slice(share)
        .map(|sig| key.verify(&anchor_id.to_bytes(), &sig).is_ok())
        .unwrap_or(false)
}

/// Validates the proposals of an ACS output and derives the batch.
///
/// Any invalid, foreign or duplicate proposal rejects the whole output.
pub fn decide_batch(values: &[Vec<u8>], params: &DecideParams<'_>) -> Result<DecidedBatch, ConsensusError> {
    if values.len() < params.quorum {
        return Err(mismatch(format!(
            "{} proposals, quorum is {}",
            values.len(),
            params.quorum
        )));
    }
    let mut proposals = Vec::with_capacity(values.len());
    let mut seen = BTreeSet::new();
    for bytes in values {
        let p = BatchProposal::from_bytes(bytes)
            .map_err(|e| ConsensusError::InvalidProposal(e.to_string()))?;
        if p.anchor_output_id != params.anchor_id {
            return Err(mismatch(format!(
                "proposal of {} builds on {}, expected {}",
                p.validator_index, p.anchor_output_id, params.anchor_id
            )));
        }
        let key = params
            .committee
            .get(usize::from(p.validator_index))
            .ok_or_else(|| mismatch(format!("validator index {} out of range", p.validator_index)))?;
        if !seen.insert(p.validator_index) {
            return Err(mismatch(format!("duplicate proposal of {}", p.validator_index)));
        }
        if !check_share(key, &params.anchor_id, &p.sig_share_over_anchor_id) {
            return Err(mismatch(format!("bad signature share of {}", p.validator_index)));
        }
        proposals.push(p);
    }
    proposals.sort_by_key(|p| p.validator_index);

    let mut counts: BTreeMap<(RequestId, HashValue), usize> = BTreeMap::new();
    for p in &proposals {
        let unique: BTreeSet<(RequestId, HashValue)> = p
            .request_ids
            .iter()
            .copied()
            .zip(p.request_hashes.iter().copied())
            .collect();
        for pair in unique {
            *counts.entry(pair).or_insert(0) += 1;
        }
    }
    let mut request_ids = Vec::new();
    let mut request_hashes = Vec::new();
    for ((id, hash), count) in counts {
        if count >= params.quorum && request_ids.last() != Some(&id) {
            request_ids.push(id);
            request_hashes.push(hash);
        }
    }

    let mut timestamps: Vec<u64> = proposals.iter().map(|p| p.timestamp).collect();
    timestamps.sort_unstable();
    let median = timestamps
        .get(timestamps.len().saturating_sub(1) / 2)
        .copied()
        .unwrap_or_default();
    let timestamp = median.max(params.state_timestamp.saturating_add(1));

    let mut shares: Vec<&[u8]> = proposals
        .iter()
        .map(|p| p.sig_share_over_anchor_id.as_slice())
        .collect();
    shares.sort_unstable();
    let entropy = hash_data(&shares.concat());

    Ok(DecidedBatch {
        contributors: proposals.iter().map(|p| p.validator_index).collect(),
        request_ids,
        request_hashes,
        timestamp,
        entropy,
        fee_destination: majority_fee_destination(&proposals),
        index_proposals: proposals
            .iter()
            .map(|p| (p.validator_index, p.nonce_index_proposal.clone()))
            .collect(),
    })
}

/// The most proposed fee destination; ties go to the smallest.
fn majority_fee_destination(proposals: &[BatchProposal]) -> AgentId {
    let mut votes: BTreeMap<AgentId, usize> = BTreeMap::new();
    for p in proposals {
        *votes.entry(p.fee_destination).or_insert(0) += 1;
    }
    let mut best: Option<(AgentId, usize)> = None;
    for (agent, count) in votes {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((agent, count));
        }
    }
    best.map(|(a, _)| a).unwrap_or(AgentId::Nil)
}

/// Orders requests for execution by `((id prefix + entropy prefix) & 0xFFFF, id)`.
///
/// The proposer cannot pick the order: it depends on the entropy, which is
/// only known after ACS.
pub fn sort_requests(requests: &mut [Request], entropy: &HashValue) {
    let [a, b, c, d, ..] = *entropy;
    let salt = u32::from_le_bytes([a, b, c, d]);
    requests.sort_by_cached_key(|r| {
        let id = r.id();
        (id.u32_prefix().wrapping_add(salt) & 0xFFFF, id)
    });
}

/// A permutation of `0..n` seeded by the transaction id. Contributor `i`
/// posts after waiting `permutation[i]` sequence steps.
///
/// Fisher-Yates where swap `i` draws from `sha256(tx_id || i as u64 le)`,
/// so every node derives the same order.
pub fn posting_permutation(n: usize, tx_id: &TransactionId) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let digest = hash_parts(&[&tx_id.0, &(i as u64).to_le_bytes()]);
        let [a, b, c, d, e, f, g, h, ..] = digest;
        let draw = u64::from_le_bytes([a, b, c, d, e, f, g, h]);
        let j = (draw % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use kestrel_types::dict::Dict;
    use kestrel_types::ids::{ChainId, TransactionId};
    use kestrel_types::request::{CallTarget, OffLedgerRequest};
    use proptest::prelude::*;

    fn keys() -> Vec<SigningKey> {
        (0..4u8).map(|i| SigningKey::from_bytes(&[i + 1; 32])).collect()
    }

    fn anchor() -> OutputId {
        OutputId::new(TransactionId([7; 32]), 0)
    }

    fn rid(n: u8) -> RequestId {
        RequestId(OutputId::new(TransactionId([n; 32]), 0))
    }

    fn proposal(keys: &[SigningKey], index: u16, reqs: &[u8], ts: u64, fee: AgentId) -> Vec<u8> {
        let key = &keys[index as usize];
        BatchProposal {
            validator_index: index,
            anchor_output_id: anchor(),
            request_ids: reqs.iter().map(|n| rid(*n)).collect(),
            request_hashes: reqs.iter().map(|n| [*n; 32]).collect(),
            timestamp: ts,
            fee_destination: fee,
            sig_share_over_anchor_id: key.sign(&anchor().to_bytes()).to_bytes().to_vec(),
            nonce_index_proposal: vec![index],
        }
        .to_bytes()
    }

    fn decide(keys: &[SigningKey], values: &[Vec<u8>], state_ts: u64) -> Result<DecidedBatch, ConsensusError> {
        let committee: Vec<VerifyingKey> = keys.iter().map(|k| k.verifying_key()).collect();
        decide_batch(
            values,
            &DecideParams {
                anchor_id: anchor(),
                committee: &committee,
                quorum: 3,
                state_timestamp: state_ts,
            },
        )
    }

    #[test]
    fn keeps_requests_a_quorum_agrees_on() {
        let k = keys();
        let values = vec![
            proposal(&k, 3, &[1, 2, 3], 30, AgentId::Nil),
            proposal(&k, 0, &[1, 2], 10, AgentId::Nil),
            proposal(&k, 1, &[1, 3, 2], 20, AgentId::Nil),
        ];
        let batch = decide(&k, &values, 0).unwrap();
        assert_eq!(batch.contributors, vec![0, 1, 3]);
        assert_eq!(batch.request_ids, vec![rid(1), rid(2)]);
        assert_eq!(batch.request_hashes, vec![[1; 32], [2; 32]]);
        assert_eq!(batch.timestamp, 20);
        assert_eq!(batch.contribution_of(3), Some(2));
        assert_eq!(batch.contribution_of(2), None);
        assert_eq!(batch.index_proposals.get(&1), Some(&vec![1]));
    }

    #[test]
    fn timestamp_is_the_lower_median_past_the_state() {
        let k = keys();
        let values = vec![
            proposal(&k, 0, &[1], 10, AgentId::Nil),
            proposal(&k, 1, &[1], 40, AgentId::Nil),
            proposal(&k, 2, &[1], 20, AgentId::Nil),
            proposal(&k, 3, &[1], 30, AgentId::Nil),
        ];
        assert_eq!(decide(&k, &values, 0).unwrap().timestamp, 20);
        assert_eq!(decide(&k, &values, 25).unwrap().timestamp, 26);
    }

    #[test]
    fn fee_destination_majority_then_smallest() {
        let k = keys();
        let a = AgentId::Address(kestrel_types::ids::Address([1; 32]));
        let b = AgentId::Address(kestrel_types::ids::Address([2; 32]));
        let values = vec![
            proposal(&k, 0, &[1], 1, b),
            proposal(&k, 1, &[1], 1, b),
            proposal(&k, 2, &[1], 1, a),
        ];
        assert_eq!(decide(&k, &values, 0).unwrap().fee_destination, b);
        let values = vec![
            proposal(&k, 0, &[1], 1, b),
            proposal(&k, 1, &[1], 1, a),
            proposal(&k, 2, &[1], 1, AgentId::Nil),
            proposal(&k, 3, &[1], 1, a),
        ];
        assert_eq!(decide(&k, &values, 0).unwrap().fee_destination, a);
    }

    #[test]
    fn entropy_ignores_arrival_order() {
        let k = keys();
        let mut values = vec![
            proposal(&k, 0, &[1], 1, AgentId::Nil),
            proposal(&k, 1, &[1], 1, AgentId::Nil),
            proposal(&k, 2, &[1], 1, AgentId::Nil),
        ];
        let first = decide(&k, &values, 0).unwrap();
        values.reverse();
        assert_eq!(decide(&k, &values, 0).unwrap(), first);
    }

    #[test]
    fn invalid_outputs_are_rejected() {
        let k = keys();
        let too_few = vec![proposal(&k, 0, &[1], 1, AgentId::Nil)];
        assert!(matches!(decide(&k, &too_few, 0), Err(ConsensusError::ConsensusMismatch(_))));

        let dup = vec![
            proposal(&k, 0, &[1], 1, AgentId::Nil),
            proposal(&k, 0, &[1], 1, AgentId::Nil),
            proposal(&k, 1, &[1], 1, AgentId::Nil),
        ];
        assert!(decide(&k, &dup, 0).is_err());

        let mut forged = BatchProposal::from_bytes(&proposal(&k, 2, &[1], 1, AgentId::Nil)).unwrap();
        forged.validator_index = 3;
        let values = vec![
            proposal(&k, 0, &[1], 1, AgentId::Nil),
            proposal(&k, 1, &[1], 1, AgentId::Nil),
            forged.to_bytes(),
        ];
        assert!(decide(&k, &values, 0).is_err());

        let mut foreign = BatchProposal::from_bytes(&proposal(&k, 2, &[1], 1, AgentId::Nil)).unwrap();
        foreign.anchor_output_id = OutputId::new(TransactionId([8; 32]), 0);
        let values = vec![
            proposal(&k, 0, &[1], 1, AgentId::Nil),
            proposal(&k, 1, &[1], 1, AgentId::Nil),
            foreign.to_bytes(),
        ];
        assert!(decide(&k, &values, 0).is_err());
    }

    #[test]
    fn disjoint_proposals_decide_an_empty_batch() {
        let k = keys();
        let values = vec![
            proposal(&k, 0, &[1], 1, AgentId::Nil),
            proposal(&k, 1, &[2], 1, AgentId::Nil),
            proposal(&k, 2, &[3], 1, AgentId::Nil),
        ];
        assert!(decide(&k, &values, 0).unwrap().is_empty());
    }

    fn off_ledger(nonce: u64) -> Request {
        Request::OffLedger(
            OffLedgerRequest::new(ChainId([1; 32]), CallTarget::new("a", "b"), Dict::new(), nonce, 1)
                .sign(&SigningKey::from_bytes(&[5; 32])),
        )
    }

    #[test]
    fn posting_order_is_fixed_by_the_transaction() {
        assert_eq!(posting_permutation(5, &TransactionId([7; 32])), vec![1, 0, 3, 4, 2]);
        assert_eq!(posting_permutation(8, &TransactionId([1; 32])), vec![0, 7, 4, 3, 2, 6, 1, 5]);
        assert_eq!(posting_permutation(1, &TransactionId([7; 32])), vec![0]);
        assert!(posting_permutation(0, &TransactionId([7; 32])).is_empty());
    }

    proptest! {
        #[test]
        fn sort_depends_only_on_the_set(nonces in proptest::collection::btree_set(0u64..1_000, 1..20), seed in any::<[u8; 32]>()) {
            let mut forward: Vec<Request> = nonces.iter().map(|n| off_ledger(*n)).collect();
            let mut backward = forward.clone();
            backward.reverse();
            sort_requests(&mut forward, &seed);
            sort_requests(&mut backward, &seed);
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn posting_order_is_a_permutation(n in 1usize..20, seed in any::<[u8; 32]>()) {
            let perm = posting_permutation(n, &TransactionId(seed));
            let mut sorted = perm.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..n).collect::<Vec<_>>());
            prop_assert_eq!(perm, posting_permutation(n, &TransactionId(seed)));
        }
    }
}
