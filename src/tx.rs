//! Transaction parsing and spent-output plumbing.
//!
//! The interpreter consumes `Transaction` and `TxOut` values produced by
//! collaborators; this module is the boundary where raw bytes become those
//! values and where the caller-supplied prevout set is validated against
//! the transaction's shape.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use bitcoin::{consensus, Amount, ScriptBuf, Transaction, TxOut};

use crate::Error;

/// One previous output handed in by the caller for verification.
#[derive(Debug, Clone)]
pub struct Utxo {
    /// Value in satoshis.
    pub value: u64,
    /// The scriptPubkey locking the output.
    pub script_pubkey: Vec<u8>,
}

/// A parsed spending transaction.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    /// Parses wire bytes, requiring the canonical encoding (no trailing
    /// garbage, no non-minimal integers).
    pub fn parse(tx_bytes: &[u8]) -> Result<Self, Error> {
        let tx: Transaction =
            consensus::deserialize(tx_bytes).map_err(|_| Error::ERR_TX_DESERIALIZE)?;

        let canonical = consensus::serialize(&tx);
        if canonical.len() != tx_bytes.len() {
            return Err(Error::ERR_TX_SIZE_MISMATCH);
        }

        Ok(Self { tx })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Ensures `input_index` names an existing input.
    pub fn ensure_input_index(&self, input_index: usize) -> Result<(), Error> {
        if input_index >= self.tx.input.len() {
            Err(Error::ERR_TX_INDEX)
        } else {
            Ok(())
        }
    }
}

/// The full prevout set referenced by a transaction, required whenever
/// taproot rules are in force (the taproot digest commits to every spent
/// output).
#[derive(Debug, Clone)]
pub struct SpentOutputs {
    txouts: Vec<TxOut>,
}

impl SpentOutputs {
    /// Builds the set, requiring one prevout per transaction input.
    pub fn new(expected: usize, utxos: &[Utxo]) -> Result<Self, Error> {
        if utxos.len() != expected {
            return Err(Error::ERR_SPENT_OUTPUTS_MISMATCH);
        }

        let txouts = utxos
            .iter()
            .map(|utxo| TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: ScriptBuf::from_bytes(utxo.script_pubkey.clone()),
            })
            .collect();

        Ok(Self { txouts })
    }

    pub fn txouts(&self) -> &[TxOut] {
        &self.txouts
    }
}
