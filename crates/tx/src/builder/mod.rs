// Path: crates/tx/src/builder/mod.rs
//! The anchor transaction builder.
//!
//! The builder tracks the anchor's base tokens and every chain-owned output a
//! block touches: one output per native token, foundries and NFTs. Internal
//! outputs are loaded lazily through an [`OutputLoader`] the first time an
//! operation needs them. Each operation returns the storage-deposit adjustment
//! it caused: negative when a new internal output locks base tokens taken from
//! the anchor, positive when a removed output releases them. The VM settles
//! that adjustment on L2 so the anchor keeps holding exactly the L2 base-token
//! total plus its own deposit.
//!
//! The builder is cheap to clone. The VM snapshots it before each request and
//! restores the clone on failure.

use crate::deposit::{internal_native_token_output, internal_nft_output, min_storage_deposit};
use crate::inputs_commitment;
use kestrel_types::assets::Assets;
use kestrel_types::codec::to_bytes_canonical;
use kestrel_types::config::RentStructure;
use kestrel_types::error::{StateError, TxBuilderError};
use kestrel_types::fee_policy::StorageDepositAssumption;
use kestrel_types::ids::{hash_data, ChainId, HashValue, NativeTokenId, NftId, OutputId};
use kestrel_types::ledger::{
    AnchorOutput, AnchorOutputWithId, BasicOutput, FoundryOutput, L1Commitment, NftOutput, Output,
    SimpleTokenScheme, TransactionEssence,
};
use kestrel_types::request::{OnLedgerRequest, RequestOutput};
use kestrel_types::U256;
use parity_scale_codec::{Decode, Encode};
use std::collections::BTreeMap;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Most inputs one transaction may consume.
pub const MAX_INPUTS: usize = 128;
/// Most outputs one transaction may produce.
pub const MAX_OUTPUTS: usize = 128;
/// Most distinct native tokens one transaction may touch.
pub const MAX_NATIVE_TOKENS: usize = 64;

/// A builder operation failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The operation broke a ledger rule. Aborts the triggering request.
    #[error(transparent)]
    Tx(#[from] TxBuilderError),
    /// Loading an internal output from state failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Reads the chain's current internal outputs.
pub trait OutputLoader {
    /// The output holding the chain's balance of `id`.
    fn native_token_output(
        &self,
        id: &NativeTokenId,
    ) -> Result<Option<(OutputId, BasicOutput)>, StateError>;

    /// The foundry with serial number `serial`.
    fn foundry_output(&self, serial: u32) -> Result<Option<(OutputId, FoundryOutput)>, StateError>;

    /// The output holding NFT `id`.
    fn nft_output(&self, id: &NftId) -> Result<Option<(OutputId, NftOutput)>, StateError>;
}

/// Identifies an internal output across blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub enum InternalOutputKey {
    /// The output of one native token.
    NativeToken(NativeTokenId),
    /// A foundry.
    Foundry(u32),
    /// An NFT.
    Nft(NftId),
}

/// An internal output the transaction produces, with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalOutput {
    /// Which internal output this is.
    pub key: InternalOutputKey,
    /// Index in the essence outputs.
    pub index: u16,
    /// The output.
    pub output: Output,
}

#[derive(Debug, Clone)]
struct NativeTokenBalance {
    input: Option<(OutputId, BasicOutput)>,
    balance: U256,
}

impl NativeTokenBalance {
    /// The deposit held by the output: the existing one, or the assumption for a new one.
    fn deposit(&self, assumed: u64) -> u64 {
        self.input.as_ref().map(|(_, o)| o.amount).unwrap_or(assumed)
    }
}

#[derive(Debug, Clone)]
struct Tracked<T> {
    input: Option<(OutputId, T)>,
    output: Option<T>,
}

/// Builds the transaction that consumes the current anchor.
#[derive(Debug, Clone)]
pub struct AnchorTransactionBuilder {
    anchor: AnchorOutputWithId,
    rent: RentStructure,
    deposits: StorageDepositAssumption,
    anchor_amount: u64,
    foundry_counter: u32,
    consumed: Vec<OnLedgerRequest>,
    native_tokens: BTreeMap<NativeTokenId, NativeTokenBalance>,
    foundries: BTreeMap<u32, Tracked<FoundryOutput>>,
    nfts: BTreeMap<NftId, Tracked<NftOutput>>,
    posted: Vec<Output>,
}

impl AnchorTransactionBuilder {
    /// Starts a transaction consuming `anchor`.
    pub fn new(
        anchor: AnchorOutputWithId,
        rent: RentStructure,
        deposits: StorageDepositAssumption,
    ) -> Self {
        Self {
            anchor_amount: anchor.output.amount,
            foundry_counter: anchor.output.foundry_counter,
            anchor,
            rent,
            deposits,
            consumed: Vec::new(),
            native_tokens: BTreeMap::new(),
            foundries: BTreeMap::new(),
            nfts: BTreeMap::new(),
            posted: Vec::new(),
        }
    }

    /// The consumed anchor.
    pub fn anchor(&self) -> &AnchorOutputWithId {
        &self.anchor
    }

    /// The chain the anchor belongs to.
    pub fn chain_id(&self) -> ChainId {
        self.anchor.output.chain_id
    }

    /// Base tokens the next anchor will hold.
    pub fn anchor_amount(&self) -> u64 {
        self.anchor_amount
    }

    /// Foundries ever created, including this block's.
    pub fn foundry_counter(&self) -> u32 {
        self.foundry_counter
    }

    /// Number of on-ledger requests consumed so far.
    pub fn consumed_requests(&self) -> usize {
        self.consumed.len()
    }

    /// Number of outputs posted by contracts so far.
    pub fn posted_outputs(&self) -> usize {
        self.posted.len()
    }

    fn debit_anchor(&mut self, amount: u64, err: TxBuilderError) -> Result<(), TxBuilderError> {
        self.anchor_amount = self.anchor_amount.checked_sub(amount).ok_or(err)?;
        Ok(())
    }

    fn credit_anchor(&mut self, amount: u64) -> Result<(), TxBuilderError> {
        self.anchor_amount = self
            .anchor_amount
            .checked_add(amount)
            .ok_or(TxBuilderError::Overflow)?;
        Ok(())
    }

    /// Locks or releases an internal output's deposit when it appears or disappears.
    fn settle_deposit(&mut self, was_held: bool, now_held: bool, deposit: u64) -> Result<i64, TxBuilderError> {
        match (was_held, now_held) {
            (false, true) => {
                self.debit_anchor(deposit, TxBuilderError::NotEnoughFundsForInternalStorageDeposit)?;
                Ok(-(deposit as i64))
            }
            (true, false) => {
                self.credit_anchor(deposit)?;
                Ok(deposit as i64)
            }
            _ => Ok(0),
        }
    }

    /// Consumes an on-ledger request: its base tokens join the anchor, its
    /// native tokens and NFT move into internal outputs.
    pub fn consume(
        &mut self,
        req: &OnLedgerRequest,
        loader: &dyn OutputLoader,
    ) -> Result<i64, BuildError> {
        if self.input_count() + 1 > MAX_INPUTS {
            return Err(TxBuilderError::InputLimitExceeded.into());
        }
        let assets = req.assets();
        self.credit_anchor(assets.base_tokens)?;
        let mut adjustment = 0i64;
        for (id, amount) in &assets.native_tokens {
            adjustment += self.add_native_tokens(id, *amount, loader)?;
        }
        if let Some(nft) = req.nft() {
            let internal = internal_nft_output(&self.chain_id(), nft, &self.rent);
            let deposit = internal.amount;
            self.debit_anchor(deposit, TxBuilderError::NotEnoughFundsForInternalStorageDeposit)?;
            self.nfts.insert(
                nft.nft_id,
                Tracked {
                    input: None,
                    output: Some(internal),
                },
            );
            adjustment -= deposit as i64;
        }
        self.consumed.push(req.clone());
        self.check_limits()?;
        Ok(adjustment)
    }

    fn ensure_native_token(
        &mut self,
        id: &NativeTokenId,
        loader: &dyn OutputLoader,
    ) -> Result<(), BuildError> {
        if self.native_tokens.contains_key(id) {
            return Ok(());
        }
        let input = loader.native_token_output(id)?;
        let balance = input
            .as_ref()
            .and_then(|(_, o)| o.native_tokens.get(id).copied())
            .unwrap_or_default();
        self.native_tokens
            .insert(*id, NativeTokenBalance { input, balance });
        Ok(())
    }

    /// Adds `amount` of a native token to the chain's holdings.
    pub fn add_native_tokens(
        &mut self,
        id: &NativeTokenId,
        amount: U256,
        loader: &dyn OutputLoader,
    ) -> Result<i64, BuildError> {
        self.change_native_tokens(id, amount, true, loader)
    }

    /// Removes `amount` of a native token from the chain's holdings.
    pub fn sub_native_tokens(
        &mut self,
        id: &NativeTokenId,
        amount: U256,
        loader: &dyn OutputLoader,
    ) -> Result<i64, BuildError> {
        self.change_native_tokens(id, amount, false, loader)
    }

    fn change_native_tokens(
        &mut self,
        id: &NativeTokenId,
        amount: U256,
        add: bool,
        loader: &dyn OutputLoader,
    ) -> Result<i64, BuildError> {
        if amount.is_zero() {
            return Ok(0);
        }
        self.ensure_native_token(id, loader)?;
        let assumed = self.deposits.native_token_output;
        let Some(nt) = self.native_tokens.get_mut(id) else {
            return Err(TxBuilderError::NotEnoughNativeTokens(id.to_string()).into());
        };
        let was_held = !nt.balance.is_zero();
        nt.balance = if add {
            nt.balance.checked_add(amount).ok_or(TxBuilderError::Overflow)?
        } else {
            nt.balance
                .checked_sub(amount)
                .ok_or_else(|| TxBuilderError::NotEnoughNativeTokens(id.to_string()))?
        };
        let now_held = !nt.balance.is_zero();
        let deposit = nt.deposit(assumed);
        let adjustment = self.settle_deposit(was_held, now_held, deposit)?;
        self.check_limits()?;
        Ok(adjustment)
    }

    fn ensure_foundry(&mut self, serial: u32, loader: &dyn OutputLoader) -> Result<(), BuildError> {
        if self.foundries.contains_key(&serial) {
            return Ok(());
        }
        let Some((id, output)) = loader.foundry_output(serial)? else {
            return Err(TxBuilderError::FoundryNotFound(serial).into());
        };
        self.foundries.insert(
            serial,
            Tracked {
                input: Some((id, output.clone())),
                output: Some(output),
            },
        );
        Ok(())
    }

    /// Creates a foundry. Returns its serial number and the deposit adjustment.
    pub fn create_new_foundry(&mut self, scheme: SimpleTokenScheme) -> Result<(u32, i64), BuildError> {
        let serial = self
            .foundry_counter
            .checked_add(1)
            .ok_or(TxBuilderError::Overflow)?;
        let mut output = FoundryOutput {
            chain_id: self.chain_id(),
            serial_number: serial,
            amount: 0,
            token_scheme: scheme,
        };
        output.amount = min_storage_deposit(&self.rent, &Output::Foundry(output.clone()));
        let deposit = output.amount;
        self.debit_anchor(deposit, TxBuilderError::NotEnoughFundsForInternalStorageDeposit)?;
        self.foundry_counter = serial;
        self.foundries.insert(
            serial,
            Tracked {
                input: None,
                output: Some(output),
            },
        );
        self.check_limits()?;
        tracing::debug!(target: "vm", serial, deposit, "foundry created");
        Ok((serial, -(deposit as i64)))
    }

    /// Destroys a foundry with no circulating supply, releasing its deposit.
    pub fn destroy_foundry(&mut self, serial: u32, loader: &dyn OutputLoader) -> Result<i64, BuildError> {
        self.ensure_foundry(serial, loader)?;
        let freed = match self.foundries.get(&serial).and_then(|t| t.output.as_ref()) {
            Some(o) if o.token_scheme.circulating_supply().is_zero() => o.amount,
            Some(_) => {
                return Err(TxBuilderError::InconsistentL2WithL1(format!(
                    "foundry {} still has circulating supply",
                    serial
                ))
                .into())
            }
            None => return Err(TxBuilderError::FoundryNotFound(serial).into()),
        };
        if let Some(t) = self.foundries.get_mut(&serial) {
            t.output = None;
        }
        self.credit_anchor(freed)?;
        Ok(freed as i64)
    }

    /// Mints (`mint == true`) or melts `delta` tokens of a foundry. Minted
    /// tokens join the chain's holdings; melted ones leave them.
    pub fn modify_foundry_supply(
        &mut self,
        serial: u32,
        delta: U256,
        mint: bool,
        loader: &dyn OutputLoader,
    ) -> Result<i64, BuildError> {
        self.ensure_foundry(serial, loader)?;
        let Some(output) = self.foundries.get_mut(&serial).and_then(|t| t.output.as_mut()) else {
            return Err(TxBuilderError::FoundryNotFound(serial).into());
        };
        let token_id = output.token_id();
        let scheme = &mut output.token_scheme;
        if mint {
            let minted = scheme
                .minted_tokens
                .checked_add(delta)
                .ok_or(TxBuilderError::Overflow)?;
            if minted.saturating_sub(scheme.melted_tokens) > scheme.maximum_supply {
                return Err(TxBuilderError::Overflow.into());
            }
            scheme.minted_tokens = minted;
        } else {
            if scheme.circulating_supply() < delta {
                return Err(TxBuilderError::NotEnoughNativeTokens(token_id.to_string()).into());
            }
            scheme.melted_tokens = scheme
                .melted_tokens
                .checked_add(delta)
                .ok_or(TxBuilderError::Overflow)?;
        }
        self.change_native_tokens(&token_id, delta, mint, loader)
    }

    fn ensure_nft(&mut self, id: &NftId, loader: &dyn OutputLoader) -> Result<(), BuildError> {
        if self.nfts.contains_key(id) {
            return Ok(());
        }
        let Some((oid, output)) = loader.nft_output(id)? else {
            return Err(TxBuilderError::NftNotFound(id.to_string()).into());
        };
        self.nfts.insert(
            *id,
            Tracked {
                input: Some((oid, output.clone())),
                output: Some(output),
            },
        );
        Ok(())
    }

    /// The chain's output holding NFT `id`, as the transaction will produce it.
    pub fn nft_output(&mut self, id: &NftId, loader: &dyn OutputLoader) -> Result<NftOutput, BuildError> {
        self.ensure_nft(id, loader)?;
        self.nfts
            .get(id)
            .and_then(|t| t.output.clone())
            .ok_or_else(|| TxBuilderError::NftNotFound(id.to_string()).into())
    }

    /// Adds an output posted by a contract. Its base and native tokens leave
    /// the chain; an NFT it carries leaves the chain's internal NFT output.
    pub fn add_output(&mut self, output: Output, loader: &dyn OutputLoader) -> Result<i64, BuildError> {
        let required = min_storage_deposit(&self.rent, &output);
        if output.amount() < required {
            return Err(TxBuilderError::NotEnoughBaseTokensForStorageDeposit {
                available: output.amount(),
                required,
            }
            .into());
        }
        let mut adjustment = 0i64;
        match &output {
            Output::Basic(_) => {}
            Output::Nft(nft) => {
                self.ensure_nft(&nft.nft_id, loader)?;
                let freed = self
                    .nfts
                    .get_mut(&nft.nft_id)
                    .and_then(|t| t.output.take())
                    .map(|o| o.amount)
                    .ok_or_else(|| TxBuilderError::NftNotFound(nft.nft_id.to_string()))?;
                self.credit_anchor(freed)?;
                adjustment += freed as i64;
            }
            Output::Anchor(_) | Output::Foundry(_) => {
                return Err(TxBuilderError::InconsistentL2WithL1(
                    "only basic and NFT outputs can be posted".into(),
                )
                .into())
            }
        }
        self.debit_anchor(output.amount(), TxBuilderError::NotEnoughBaseTokensBalance)?;
        for (id, amount) in output.assets().native_tokens {
            adjustment += self.sub_native_tokens(&id, amount, loader)?;
        }
        self.posted.push(output);
        self.check_limits()?;
        Ok(adjustment)
    }

    /// Inputs the transaction consumes so far.
    pub fn input_count(&self) -> usize {
        1 + self.consumed.len()
            + self.native_tokens.values().filter(|n| n.input.is_some()).count()
            + self.foundries.values().filter(|f| f.input.is_some()).count()
            + self.nfts.values().filter(|n| n.input.is_some()).count()
    }

    /// Outputs the transaction produces so far.
    pub fn output_count(&self) -> usize {
        1 + self.native_tokens.values().filter(|n| !n.balance.is_zero()).count()
            + self.foundries.values().filter(|f| f.output.is_some()).count()
            + self.nfts.values().filter(|n| n.output.is_some()).count()
            + self.posted.len()
    }

    fn check_limits(&self) -> Result<(), TxBuilderError> {
        if self.input_count() > MAX_INPUTS {
            return Err(TxBuilderError::InputLimitExceeded);
        }
        if self.output_count() > MAX_OUTPUTS {
            return Err(TxBuilderError::OutputLimitExceeded);
        }
        if self.native_tokens.len() > MAX_NATIVE_TOKENS {
            return Err(TxBuilderError::TotalNativeTokensLimitExceeded);
        }
        Ok(())
    }

    /// Checks that the chain's L2 totals match what its L1 outputs hold.
    ///
    /// Base tokens are compared in full; native tokens and NFTs only where
    /// this transaction touched them.
    pub fn check_balanced(&self, l2_totals: &Assets) -> Result<(), TxBuilderError> {
        let expected = l2_totals
            .base_tokens
            .checked_add(self.deposits.anchor_output)
            .ok_or(TxBuilderError::Overflow)?;
        if expected != self.anchor_amount {
            return Err(TxBuilderError::InconsistentL2WithL1(format!(
                "anchor holds {} base tokens, L2 accounts hold {} plus deposit {}",
                self.anchor_amount, l2_totals.base_tokens, self.deposits.anchor_output
            )));
        }
        for (id, nt) in &self.native_tokens {
            let on_l2 = l2_totals.native_tokens.get(id).copied().unwrap_or_default();
            if on_l2 != nt.balance {
                return Err(TxBuilderError::InconsistentL2WithL1(format!(
                    "native token {}: L1 {} vs L2 {}",
                    id, nt.balance, on_l2
                )));
            }
        }
        for (id, nft) in &self.nfts {
            if nft.output.is_some() != l2_totals.nfts.contains(id) {
                return Err(TxBuilderError::InconsistentL2WithL1(format!("NFT {}", id)));
            }
        }
        Ok(())
    }

    /// The internal outputs the transaction produces, in essence order:
    /// native tokens, then foundries, then NFTs, starting right after the anchor.
    pub fn internal_outputs(&self) -> Vec<InternalOutput> {
        let chain_id = self.chain_id();
        let assumed = self.deposits.native_token_output;
        let native = self.native_tokens.iter().filter(|(_, n)| !n.balance.is_zero()).map(|(id, n)| {
            (
                InternalOutputKey::NativeToken(*id),
                Output::Basic(internal_native_token_output(&chain_id, id, n.balance, n.deposit(assumed))),
            )
        });
        let foundries = self
            .foundries
            .iter()
            .filter_map(|(serial, f)| f.output.clone().map(|o| (InternalOutputKey::Foundry(*serial), Output::Foundry(o))));
        let nfts = self
            .nfts
            .iter()
            .filter_map(|(id, n)| n.output.clone().map(|o| (InternalOutputKey::Nft(*id), Output::Nft(o))));
        native
            .chain(foundries)
            .chain(nfts)
            .zip(1u16..)
            .map(|((key, output), index)| InternalOutput { key, index, output })
            .collect()
    }

    /// Internal outputs consumed and not produced again.
    pub fn removed_internal_outputs(&self) -> Vec<InternalOutputKey> {
        let native = self
            .native_tokens
            .iter()
            .filter(|(_, n)| n.input.is_some() && n.balance.is_zero())
            .map(|(id, _)| InternalOutputKey::NativeToken(*id));
        let foundries = self
            .foundries
            .iter()
            .filter(|(_, f)| f.input.is_some() && f.output.is_none())
            .map(|(s, _)| InternalOutputKey::Foundry(*s));
        let nfts = self
            .nfts
            .iter()
            .filter(|(_, n)| n.input.is_some() && n.output.is_none())
            .map(|(id, _)| InternalOutputKey::Nft(*id));
        native.chain(foundries).chain(nfts).collect()
    }

    /// Base tokens locked as deposits in the chain's outputs this transaction produces.
    pub fn total_storage_deposit(&self) -> u64 {
        self.internal_outputs()
            .iter()
            .map(|o| o.output.amount())
            .fold(self.deposits.anchor_output, u64::saturating_add)
    }

    fn inputs(&self) -> Vec<(OutputId, Output)> {
        let mut inputs = vec![(self.anchor.id, Output::Anchor(self.anchor.output.clone()))];
        inputs.extend(self.consumed.iter().map(|r| {
            let out = match &r.output {
                RequestOutput::Basic(b) => Output::Basic(b.clone()),
                RequestOutput::Nft(n) => Output::Nft(n.clone()),
            };
            (r.output_id, out)
        }));
        inputs.extend(
            self.native_tokens
                .values()
                .filter_map(|n| n.input.clone().map(|(id, o)| (id, Output::Basic(o)))),
        );
        inputs.extend(
            self.foundries
                .values()
                .filter_map(|f| f.input.clone().map(|(id, o)| (id, Output::Foundry(o)))),
        );
        inputs.extend(
            self.nfts
                .values()
                .filter_map(|n| n.input.clone().map(|(id, o)| (id, Output::Nft(o)))),
        );
        inputs
    }

    fn next_anchor(&self, commitment: &L1Commitment) -> AnchorOutput {
        let current = &self.anchor.output;
        AnchorOutput {
            chain_id: current.chain_id,
            amount: self.anchor_amount,
            state_index: current.state_index.saturating_add(1),
            state_metadata: commitment.to_bytes(),
            foundry_counter: self.foundry_counter,
            state_controller: current.state_controller,
            governor: current.governor,
        }
    }

    /// Hash of everything in the essence except the anchor output, which
    /// depends on the state commitment not yet known when the block log records it.
    pub fn sub_essence_hash(&self) -> HashValue {
        let (ids, consumed): (Vec<_>, Vec<_>) = self.inputs().into_iter().unzip();
        let outputs: Vec<Output> = self
            .internal_outputs()
            .into_iter()
            .map(|o| o.output)
            .chain(self.posted.iter().cloned())
            .collect();
        hash_data(&to_bytes_canonical(&(ids, inputs_commitment(&consumed), outputs)))
    }

    /// Assembles the essence with the next anchor committing to `commitment`.
    pub fn build_transaction_essence(&self, commitment: &L1Commitment) -> TransactionEssence {
        let (inputs, consumed): (Vec<_>, Vec<_>) = self.inputs().into_iter().unzip();
        let mut outputs = vec![Output::Anchor(self.next_anchor(commitment))];
        outputs.extend(self.internal_outputs().into_iter().map(|o| o.output));
        outputs.extend(self.posted.iter().cloned());
        TransactionEssence {
            inputs,
            inputs_commitment: inputs_commitment(&consumed),
            outputs,
        }
    }
}
