// Path: crates/tx/src/records.rs
//! Records of the chain's internal outputs, stored by the accounts contract.
//!
//! A record produced by a block knows only its output index until the block's
//! transaction is confirmed. The VM resolves it to a full output id when the
//! next block starts, from the transaction id of the anchor it consumes.

use kestrel_types::codec::{from_bytes_canonical, to_bytes_canonical};
use kestrel_types::error::CodecError;
use kestrel_types::ids::{OutputId, TransactionId};
use kestrel_types::ledger::{BasicOutput, FoundryOutput, NftOutput};
use parity_scale_codec::{Decode, Encode};

/// An internal output and where it lives on L1.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct OutputRecord<T> {
    /// The output.
    pub output: T,
    /// Index of the output in the transaction that produced it.
    pub output_index: u16,
    /// Full id once the producing transaction is known.
    pub output_id: Option<OutputId>,
}

/// The internal output of one native token.
pub type NativeTokenRecord = OutputRecord<BasicOutput>;
/// A foundry owned by the chain.
pub type FoundryRecord = OutputRecord<FoundryOutput>;
/// An NFT held by the chain.
pub type NftRecord = OutputRecord<NftOutput>;

impl<T: Encode + Decode> OutputRecord<T> {
    /// A record of an output produced by the block being built.
    pub fn pending(output: T, output_index: u16) -> Self {
        Self {
            output,
            output_index,
            output_id: None,
        }
    }

    /// Returns `true` until [`OutputRecord::resolve`] ran.
    pub fn is_pending(&self) -> bool {
        self.output_id.is_none()
    }

    /// Binds the record to the transaction that produced it.
    pub fn resolve(&mut self, tx: TransactionId) {
        self.output_id = Some(OutputId::new(tx, self.output_index));
    }

    /// Canonical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(self)
    }

    /// Parses canonical bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        from_bytes_canonical(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::ids::{ChainId, L1Address};
    use kestrel_types::ledger::SimpleTokenScheme;
    use kestrel_types::U256;

    #[test]
    fn resolution_binds_the_index() {
        let mut rec = NativeTokenRecord::pending(
            BasicOutput::new(L1Address::Chain(ChainId([1; 32])), 10),
            3,
        );
        assert!(rec.is_pending());
        rec.resolve(TransactionId([7; 32]));
        assert_eq!(rec.output_id, Some(OutputId::new(TransactionId([7; 32]), 3)));
        assert_eq!(NativeTokenRecord::from_bytes(&rec.to_bytes()).unwrap(), rec);
    }

    #[test]
    fn foundry_record_keeps_the_scheme() {
        let rec = FoundryRecord::pending(
            FoundryOutput {
                chain_id: ChainId([1; 32]),
                serial_number: 2,
                amount: 5,
                token_scheme: SimpleTokenScheme {
                    minted_tokens: U256::from(9),
                    melted_tokens: U256::from(4),
                    maximum_supply: U256::from(100),
                },
            },
            1,
        );
        let back = FoundryRecord::from_bytes(&rec.to_bytes()).unwrap();
        assert_eq!(back.output.token_scheme.circulating_supply(), U256::from(5));
    }
}
