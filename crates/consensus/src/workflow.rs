// Path: crates/consensus/src/workflow.rs
//! The progress flags of one consensus round.

use std::fmt;
use std::ops::BitOr;

/// A set of workflow flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Workflow(u16);

impl Workflow {
    pub const STATE_RECEIVED: Workflow = Workflow(1 << 0);
    pub const INDEX_PROPOSAL_RECEIVED: Workflow = Workflow(1 << 1);
    pub const BATCH_PROPOSAL_SENT: Workflow = Workflow(1 << 2);
    pub const CONSENSUS_BATCH_KNOWN: Workflow = Workflow(1 << 3);
    pub const VM_STARTED: Workflow = Workflow(1 << 4);
    pub const DSS_SIGNING_STARTED: Workflow = Workflow(1 << 5);
    pub const VM_RESULT_SIGNED: Workflow = Workflow(1 << 6);
    pub const TRANSACTION_FINALIZED: Workflow = Workflow(1 << 7);
    pub const TRANSACTION_POSTED: Workflow = Workflow(1 << 8);
    pub const TRANSACTION_SEEN: Workflow = Workflow(1 << 9);
    pub const COMPLETED: Workflow = Workflow(1 << 10);
    pub const IN_PROGRESS: Workflow = Workflow(1 << 11);

    const NAMES: [(Workflow, &'static str); 12] = [
        (Self::STATE_RECEIVED, "state_received"),
        (Self::INDEX_PROPOSAL_RECEIVED, "index_proposal_received"),
        (Self::BATCH_PROPOSAL_SENT, "batch_proposal_sent"),
        (Self::CONSENSUS_BATCH_KNOWN, "consensus_batch_known"),
        (Self::VM_STARTED, "vm_started"),
        (Self::DSS_SIGNING_STARTED, "dss_signing_started"),
        (Self::VM_RESULT_SIGNED, "vm_result_signed"),
        (Self::TRANSACTION_FINALIZED, "transaction_finalized"),
        (Self::TRANSACTION_POSTED, "transaction_posted"),
        (Self::TRANSACTION_SEEN, "transaction_seen"),
        (Self::COMPLETED, "completed"),
        (Self::IN_PROGRESS, "in_progress"),
    ];

    pub const fn empty() -> Self {
        Workflow(0)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Returns `true` if every flag of `other` is set.
    pub fn contains(self, other: Workflow) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Workflow) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Workflow) {
        self.0 &= !other.0;
    }

    /// Names of the set flags, in pipeline order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Workflow {
    type Output = Workflow;

    fn bitor(self, rhs: Workflow) -> Workflow {
        Workflow(self.0 | rhs.0)
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Workflow[{}]", self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_and_clear() {
        let mut w = Workflow::STATE_RECEIVED;
        w.insert(Workflow::BATCH_PROPOSAL_SENT | Workflow::IN_PROGRESS);
        assert!(w.contains(Workflow::STATE_RECEIVED | Workflow::IN_PROGRESS));
        assert!(!w.contains(Workflow::VM_STARTED));
        w.remove(Workflow::IN_PROGRESS);
        assert_eq!(w.names(), vec!["state_received", "batch_proposal_sent"]);
        assert_eq!(format!("{:?}", w), "Workflow[state_received|batch_proposal_sent]");
    }
}
