// Path: crates/types/src/fee_policy.rs
//! The gas-fee policy and the storage-deposit assumptions, both persisted on chain.

use crate::codec::decode_u64;
use crate::error::CodecError;
use crate::ids::{NativeTokenId, NATIVE_TOKEN_ID_LEN};
use serde::{Deserialize, Serialize};

/// The default conversion rate between gas units and fee tokens.
pub const DEFAULT_GAS_PER_TOKEN: u64 = 100;

/// How gas is converted into fees and how fees are split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasFeePolicy {
    /// The token fees are paid in. `None` means base tokens.
    pub gas_fee_token_id: Option<NativeTokenId>,
    /// Gas units bought by one fee token. Zero disables fees.
    pub gas_per_token: u64,
    /// Percentage (0..=100) of each fee credited to the validator fee destination.
    pub validator_fee_share: u8,
}

impl Default for GasFeePolicy {
    fn default() -> Self {
        Self {
            gas_fee_token_id: None,
            gas_per_token: DEFAULT_GAS_PER_TOKEN,
            validator_fee_share: 0,
        }
    }
}

impl GasFeePolicy {
    /// Encodes as: presence flag (1), token id (38, if present), gas per token (8, LE), share (1).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + NATIVE_TOKEN_ID_LEN + 9);
        match &self.gas_fee_token_id {
            Some(id) => {
                out.push(1);
                out.extend_from_slice(&id.0);
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.gas_per_token.to_le_bytes());
        out.push(self.validator_fee_share);
        out
    }

    /// Parses the encoding produced by [`GasFeePolicy::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let (flag, rest) = bytes
            .split_first()
            .ok_or(CodecError::InvalidLength { expected: 10, got: 0 })?;
        let (gas_fee_token_id, rest) = match flag {
            0 => (None, rest),
            1 => {
                if rest.len() < NATIVE_TOKEN_ID_LEN {
                    return Err(CodecError::InvalidLength {
                        expected: 1 + NATIVE_TOKEN_ID_LEN + 9,
                        got: bytes.len(),
                    });
                }
                let (id, rest) = rest.split_at(NATIVE_TOKEN_ID_LEN);
                (Some(NativeTokenId::from_slice(id)?), rest)
            }
            other => {
                return Err(CodecError::InvalidValue(format!(
                    "fee token presence flag {}",
                    other
                )))
            }
        };
        if rest.len() != 9 {
            return Err(CodecError::InvalidLength {
                expected: 9,
                got: rest.len(),
            });
        }
        let (gas, share) = rest.split_at(8);
        let validator_fee_share = share.first().copied().unwrap_or_default();
        if validator_fee_share > 100 {
            return Err(CodecError::InvalidValue(format!(
                "validator fee share {} > 100",
                validator_fee_share
            )));
        }
        Ok(Self {
            gas_fee_token_id,
            gas_per_token: decode_u64(gas)?,
            validator_fee_share,
        })
    }

    /// The fee for `gas` units, capped at `available`.
    ///
    /// Returns `(owner_share, validator_share)`.
    pub fn fee_from_gas(&self, gas: u64, available: u64) -> (u64, u64) {
        if self.gas_per_token == 0 {
            return (0, 0);
        }
        let fee = gas.div_ceil(self.gas_per_token).min(available);
        let validator = ((fee as u128 * self.validator_fee_share as u128) / 100) as u64;
        (fee - validator, validator)
    }

    /// The total fee for `gas` units with no availability cap.
    pub fn total_fee(&self, gas: u64) -> u64 {
        let (owner, validator) = self.fee_from_gas(gas, u64::MAX);
        owner + validator
    }

    /// The largest gas budget `available` fee tokens can pay for.
    pub fn affordable_gas_budget(&self, available: u64) -> u64 {
        if self.gas_per_token == 0 {
            return u64::MAX;
        }
        available.saturating_mul(self.gas_per_token)
    }
}

/// Storage deposits the chain assumes for its internal outputs.
///
/// Persisted at init. A later rent structure whose estimate exceeds these values
/// makes the chain refuse to run batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDepositAssumption {
    /// Storage deposit of the anchor output.
    pub anchor_output: u64,
    /// Storage deposit of one internal native-token output.
    pub native_token_output: u64,
}

impl StorageDepositAssumption {
    /// Two little-endian `u64` values.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let (a, n) = out.split_at_mut(8);
        a.copy_from_slice(&self.anchor_output.to_le_bytes());
        n.copy_from_slice(&self.native_token_output.to_le_bytes());
        out
    }

    /// Parses the 16-byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != 16 {
            return Err(CodecError::InvalidLength {
                expected: 16,
                got: bytes.len(),
            });
        }
        let (a, n) = bytes.split_at(8);
        Ok(Self {
            anchor_output: decode_u64(a)?,
            native_token_output: decode_u64(n)?,
        })
    }

    /// Returns `true` if `estimate` needs more than these assumptions cover.
    pub fn is_exceeded_by(&self, estimate: &StorageDepositAssumption) -> bool {
        estimate.anchor_output > self.anchor_output
            || estimate.native_token_output > self.native_token_output
    }
}
