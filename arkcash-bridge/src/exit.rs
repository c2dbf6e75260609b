//! Cooperative exit planning: VTXO selection and address checks.

use crate::custodial::{ExitOutput, SettlementRequest, Vtxo};
use crate::error::{BridgeError, BridgeResult};

/// Take VTXOs in listed order until they cover `amount`.
pub fn select_vtxos(vtxos: &[Vtxo], amount: u64) -> BridgeResult<Vec<Vtxo>> {
    let mut selected = Vec::new();
    let mut accumulated = 0u64;
    for vtxo in vtxos {
        if accumulated >= amount {
            break;
        }
        accumulated = accumulated.saturating_add(vtxo.value);
        selected.push(vtxo.clone());
    }

    if accumulated < amount {
        return Err(BridgeError::InsufficientVtxos {
            required: amount,
            available: accumulated,
        });
    }
    Ok(selected)
}

/// Build the settlement for sending `amount` to `address`.
pub fn plan_exit(
    vtxos: &[Vtxo],
    address: &str,
    amount: u64,
    min_address_len: usize,
) -> BridgeResult<SettlementRequest> {
    let address = address.trim();
    if address.len() < min_address_len {
        return Err(BridgeError::InvalidAddress(address.to_string()));
    }
    if amount == 0 {
        return Err(BridgeError::InvalidAmount(amount));
    }

    Ok(SettlementRequest {
        inputs: select_vtxos(vtxos, amount)?,
        outputs: vec![ExitOutput {
            address: address.to_string(),
            amount,
        }],
    })
}
