// Path: crates/vm/src/gas.rs
//! Gas: the fixed burn table, the per-request meter and the burn log.

use crate::errors::{CoreError, VmError};
use std::collections::BTreeMap;
use std::fmt;

/// A sandbox operation with a fixed gas cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BurnCode {
    /// Calling a contract entry point.
    CallContract,
    /// Reading call context: caller, chain id, timestamp, entropy.
    GetContext,
    /// Reading the allowance.
    GetAllowance,
    /// Reading an L2 balance.
    GetBalance,
    /// A state read, per byte returned.
    StorageRead,
    /// A state write, per byte of key and value.
    StorageWrite,
    /// A state delete.
    StorageDelete,
    /// A prefix scan, per byte returned.
    StorageScan,
    /// Emitting an event, per payload byte.
    EmitEvent,
    /// Moving assets between L2 accounts.
    TransferAllowance,
    /// Posting an output to L1.
    SendOutput,
    /// Creating, destroying or changing the supply of a foundry.
    FoundryOp,
    /// Deploying a contract.
    DeployContract,
    /// Storing a blob, per byte.
    StoreBlob,
    /// Hashing, per byte.
    Hash,
    /// Contract-defined computation, per unit.
    Compute,
}

impl BurnCode {
    /// Gas for one operation over `units` bytes or items.
    pub fn cost(self, units: u64) -> u64 {
        let (base, per_unit): (u64, u64) = match self {
            BurnCode::CallContract => (1_000, 0),
            BurnCode::GetContext => (10, 0),
            BurnCode::GetAllowance => (10, 0),
            BurnCode::GetBalance => (20, 0),
            BurnCode::StorageRead => (100, 1),
            BurnCode::StorageWrite => (200, 10),
            BurnCode::StorageDelete => (100, 0),
            BurnCode::StorageScan => (100, 2),
            BurnCode::EmitEvent => (100, 1),
            BurnCode::TransferAllowance => (100, 0),
            BurnCode::SendOutput => (1_000, 0),
            BurnCode::FoundryOp => (1_000, 0),
            BurnCode::DeployContract => (10_000, 0),
            BurnCode::StoreBlob => (1_000, 1),
            BurnCode::Hash => (50, 1),
            BurnCode::Compute => (0, 1),
        };
        base.saturating_add(units.saturating_mul(per_unit))
    }
}

impl fmt::Display for BurnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Gas burned per code during one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BurnLog {
    entries: BTreeMap<BurnCode, u64>,
}

impl BurnLog {
    fn record(&mut self, code: BurnCode, gas: u64) {
        let entry = self.entries.entry(code).or_default();
        *entry = entry.saturating_add(gas);
    }

    /// Gas burned under `code`.
    pub fn get(&self, code: BurnCode) -> u64 {
        self.entries.get(&code).copied().unwrap_or_default()
    }

    /// Gas burned under all codes.
    pub fn total(&self) -> u64 {
        self.entries.values().fold(0, |acc, g| acc.saturating_add(*g))
    }

    /// Entries in code order.
    pub fn iter(&self) -> impl Iterator<Item = (BurnCode, u64)> + '_ {
        self.entries.iter().map(|(c, g)| (*c, *g))
    }
}

/// Counts gas against a budget.
#[derive(Debug, Clone)]
pub struct GasMeter {
    budget: u64,
    burned: u64,
    log: BurnLog,
}

impl GasMeter {
    /// A meter with `budget` gas.
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            burned: 0,
            log: BurnLog::default(),
        }
    }

    /// The budget.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Gas burned so far.
    pub fn burned(&self) -> u64 {
        self.burned
    }

    /// Gas left.
    pub fn remaining(&self) -> u64 {
        self.budget - self.burned
    }

    /// The burn log.
    pub fn log(&self) -> &BurnLog {
        &self.log
    }

    /// Burns the cost of `code` over `units`.
    ///
    /// An operation that does not fit burns the rest of the budget and fails
    /// with `GasBudgetExceeded`.
    pub fn burn(&mut self, code: BurnCode, units: u64) -> Result<(), VmError> {
        let cost = code.cost(units);
        if cost > self.remaining() {
            self.log.record(code, self.remaining());
            self.burned = self.budget;
            return Err(CoreError::GasBudgetExceeded.with([self.budget]));
        }
        self.log.record(code, cost);
        self.burned += cost;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeding_burns_the_whole_budget() {
        let mut meter = GasMeter::new(10_000);
        meter.burn(BurnCode::StorageRead, 10).unwrap();
        assert_eq!(meter.burned(), 110);
        let err = meter.burn(BurnCode::Compute, 20_000).unwrap_err();
        assert!(CoreError::GasBudgetExceeded.matches(err.as_request().unwrap()));
        assert_eq!(meter.burned(), 10_000);
        assert_eq!(meter.log().total(), 10_000);
        assert_eq!(meter.log().get(BurnCode::Compute), 9_890);
    }

    #[test]
    fn zero_budget_fails_the_first_call() {
        let mut meter = GasMeter::new(0);
        assert!(meter.burn(BurnCode::CallContract, 0).is_err());
        assert_eq!(meter.burned(), 0);
    }

    proptest::proptest! {
        #[test]
        fn the_meter_never_overdraws(
            budget in 0u64..200_000,
            burns in proptest::collection::vec(
                (proptest::sample::select(vec![
                    BurnCode::CallContract,
                    BurnCode::StorageRead,
                    BurnCode::StorageWrite,
                    BurnCode::EmitEvent,
                    BurnCode::Compute,
                ]), 0u64..5_000),
                0..40,
            ),
        ) {
            let mut meter = GasMeter::new(budget);
            for (code, units) in burns {
                let before = meter.burned();
                match meter.burn(code, units) {
                    Ok(()) => proptest::prop_assert_eq!(meter.burned(), before + code.cost(units)),
                    Err(_) => {
                        proptest::prop_assert_eq!(meter.burned(), budget);
                        break;
                    }
                }
            }
            proptest::prop_assert!(meter.burned() <= budget);
            proptest::prop_assert_eq!(meter.log().total(), meter.burned());
        }
    }

    #[test]
    fn costs_saturate() {
        assert_eq!(BurnCode::StorageWrite.cost(u64::MAX), u64::MAX);
        assert_eq!(BurnCode::Compute.cost(7), 7);
    }
}
