// Path: crates/types/src/assets.rs
//! Asset bundles: base tokens, native tokens and NFTs.

use crate::ids::{NativeTokenId, NftId};
use parity_scale_codec::{Decode, Encode};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A bundle of assets. Used for L2 balances, request allowances and
/// the assets carried by an L1 output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Assets {
    /// Base token amount.
    pub base_tokens: u64,
    /// Native token balances. Zero balances are never stored.
    pub native_tokens: BTreeMap<NativeTokenId, U256>,
    /// NFT ids.
    pub nfts: BTreeSet<NftId>,
}

impl Assets {
    /// A bundle holding only base tokens.
    pub fn from_base_tokens(amount: u64) -> Self {
        Self {
            base_tokens: amount,
            ..Default::default()
        }
    }

    /// Adds a native token amount (builder style).
    pub fn with_native_token(mut self, id: NativeTokenId, amount: U256) -> Self {
        if !amount.is_zero() {
            let entry = self.native_tokens.entry(id).or_insert_with(U256::zero);
            *entry = entry.saturating_add(amount);
        }
        self
    }

    /// Adds an NFT (builder style).
    pub fn with_nft(mut self, id: NftId) -> Self {
        self.nfts.insert(id);
        self
    }

    /// Returns `true` if the bundle holds nothing.
    pub fn is_empty(&self) -> bool {
        self.base_tokens == 0 && self.native_tokens.is_empty() && self.nfts.is_empty()
    }

    /// Returns `true` if this bundle contains at least `other`.
    pub fn covers(&self, other: &Assets) -> bool {
        if self.base_tokens < other.base_tokens {
            return false;
        }
        for (id, amount) in &other.native_tokens {
            match self.native_tokens.get(id) {
                Some(have) if have >= amount => {}
                _ => return false,
            }
        }
        other.nfts.iter().all(|id| self.nfts.contains(id))
    }

    /// Adds `other` to this bundle. Returns `None` on overflow, leaving `self` unchanged.
    pub fn checked_add(&self, other: &Assets) -> Option<Assets> {
        let mut ret = self.clone();
        ret.base_tokens = ret.base_tokens.checked_add(other.base_tokens)?;
        for (id, amount) in &other.native_tokens {
            let entry = ret.native_tokens.entry(*id).or_insert_with(U256::zero);
            *entry = entry.checked_add(*amount)?;
        }
        ret.native_tokens.retain(|_, v| !v.is_zero());
        ret.nfts.extend(other.nfts.iter().copied());
        Some(ret)
    }

    /// Subtracts `other` from this bundle if it is covered. Returns `false` and
    /// leaves `self` untouched otherwise.
    pub fn spend_from_budget(&mut self, other: &Assets) -> bool {
        if !self.covers(other) {
            return false;
        }
        self.base_tokens -= other.base_tokens;
        for (id, amount) in &other.native_tokens {
            if let Some(have) = self.native_tokens.get_mut(id) {
                *have -= *amount;
            }
        }
        self.native_tokens.retain(|_, v| !v.is_zero());
        for id in &other.nfts {
            self.nfts.remove(id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(b: u8) -> NativeTokenId {
        NativeTokenId([b; 38])
    }

    #[test]
    fn spend_from_budget_is_all_or_nothing() {
        let mut budget = Assets::from_base_tokens(100).with_native_token(token(1), U256::from(5));
        let too_much = Assets::from_base_tokens(50).with_native_token(token(1), U256::from(6));
        assert!(!budget.spend_from_budget(&too_much));
        assert_eq!(budget.base_tokens, 100);

        let ok = Assets::from_base_tokens(50).with_native_token(token(1), U256::from(5));
        assert!(budget.spend_from_budget(&ok));
        assert_eq!(budget, Assets::from_base_tokens(50));
    }

    #[test]
    fn checked_add_detects_overflow() {
        let a = Assets::from_base_tokens(u64::MAX);
        assert!(a.checked_add(&Assets::from_base_tokens(1)).is_none());
        let b = Assets::from_base_tokens(1).with_nft(NftId([3; 32]));
        let sum = b.checked_add(&Assets::from_base_tokens(2)).unwrap();
        assert_eq!(sum.base_tokens, 3);
        assert_eq!(sum.nfts.len(), 1);
    }
}
