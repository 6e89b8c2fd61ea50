// Path: crates/tx/src/rotate.rs
//! The rotation transaction: hands the anchor to a new state controller.

use crate::inputs_commitment;
use kestrel_types::error::TxBuilderError;
use kestrel_types::ids::{Address, OutputId};
use kestrel_types::ledger::{AnchorOutput, AnchorOutputWithId, Output, TransactionEssence};

/// Builds the essence that moves `anchor` to `new_controller` without a state change.
///
/// `pending` are the internal outputs produced by the transaction that
/// created `anchor`, keyed by their output index there. They are consumed and
/// produced again at the same indices, so records that only know an output
/// index stay valid whichever of the two transactions they are resolved against.
pub fn build_rotation_essence(
    anchor: &AnchorOutputWithId,
    new_controller: Address,
    pending: &[(u16, Output)],
) -> Result<TransactionEssence, TxBuilderError> {
    let mut sorted: Vec<&(u16, Output)> = pending.iter().collect();
    sorted.sort_by_key(|(index, _)| *index);
    for (expected, (index, _)) in (1u16..).zip(sorted.iter()) {
        if *index != expected {
            return Err(TxBuilderError::InconsistentL2WithL1(format!(
                "internal output indices are not contiguous: expected {}, got {}",
                expected, index
            )));
        }
    }

    let tx = anchor.id.transaction_id;
    let mut inputs = vec![anchor.id];
    let mut consumed = vec![Output::Anchor(anchor.output.clone())];
    for (index, output) in &sorted {
        inputs.push(OutputId::new(tx, *index));
        consumed.push(output.clone());
    }

    let next = AnchorOutput {
        state_controller: new_controller,
        ..anchor.output.clone()
    };
    let mut outputs = vec![Output::Anchor(next)];
    outputs.extend(sorted.into_iter().map(|(_, o)| o.clone()));
    tracing::info!(
        target: "vm",
        state_index = anchor.output.state_index,
        new_controller = %new_controller,
        carried = outputs.len() - 1,
        "rotation transaction built"
    );
    Ok(TransactionEssence {
        inputs,
        inputs_commitment: inputs_commitment(&consumed),
        outputs,
    })
}
