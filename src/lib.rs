#![cfg_attr(not(feature = "std"), no_std)]
//! Pure-Rust Bitcoin script verification.
//!
//! This crate reproduces the consensus behavior of Bitcoin's script
//! interpreter: the stack-machine VM, the legacy / segwit-v0 / taproot
//! signature-hash constructions, and the signature and locktime checks
//! that feed it. [`verify_script`] answers "does this script input satisfy
//! this script output, under these rules" for one transaction input at a
//! time; the byte-slice helpers below wrap it with transaction parsing for
//! callers holding raw wire data.

#[cfg(all(feature = "external-secp", not(feature = "std")))]
compile_error!(
    "The `external-secp` feature requires `std` because it relies on the global secp256k1 context."
);

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod checker;
mod error;
pub mod interpreter;
pub mod num;
pub mod script;
pub mod sighash;
mod tx;

use core::fmt;

pub use checker::{
    NullSignatureChecker, Secp256k1Backend, SigBackend, SignatureChecker, TapExecData,
    TransactionSignatureChecker,
};
pub use error::ScriptError;
pub use interpreter::{verify_script, Interpreter, Stack};
pub use script::{Chunk, PushChunk, Script};
pub use sighash::{signature_hash, SigVersion, SighashOptions, TxSigHashes};
pub use tx::{SpentOutputs, TransactionContext, Utxo};

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Evaluate P2SH (BIP16) subscripts.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Enforce strict ECDSA encoding (BIP62).
pub const VERIFY_STRICTENC: u32 = 1 << 1;
/// Enforce strict DER (BIP66) compliance.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Require signatures to use low-S form (BIP62).
pub const VERIFY_LOW_S: u32 = 1 << 3;
/// Enforce NULLDUMMY (BIP147).
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
/// Require scriptSig to be push only.
pub const VERIFY_SIGPUSHONLY: u32 = 1 << 5;
/// Require minimal data encodings (BIP62).
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
/// Discourage use of upgradable NOP opcodes.
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
/// Require a clean stack after evaluation.
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;
/// Enable CHECKLOCKTIMEVERIFY (BIP65).
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
/// Enable CHECKSEQUENCEVERIFY (BIP112).
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;
/// Enable WITNESS (BIP141).
pub const VERIFY_WITNESS: u32 = 1 << 11;
/// Discourage unknown witness program versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM: u32 = 1 << 12;
/// Require minimal encodings for IF/NOTIF arguments in segwit v0.
pub const VERIFY_MINIMALIF: u32 = 1 << 13;
/// Enforce NULLFAIL behaviour (BIP146).
pub const VERIFY_NULLFAIL: u32 = 1 << 14;
/// Require compressed pubkeys in segwit v0 contexts.
pub const VERIFY_WITNESS_PUBKEYTYPE: u32 = 1 << 15;
/// Enable TAPROOT (BIPs 341 & 342).
pub const VERIFY_TAPROOT: u32 = 1 << 17;
/// Discourage unknown Taproot leaf versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION: u32 = 1 << 18;
/// Discourage unknown OP_SUCCESS opcodes inside tapscript.
pub const VERIFY_DISCOURAGE_OP_SUCCESS: u32 = 1 << 19;
/// Discourage unknown Taproot public key versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE: u32 = 1 << 20;

/// Aggregate of all soft-fork flags prior to Taproot activation.
pub const VERIFY_ALL_PRE_TAPROOT: u32 = VERIFY_P2SH
    | VERIFY_DERSIG
    | VERIFY_NULLDUMMY
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS;

const SUPPORTED_FLAGS: u32 = VERIFY_P2SH
    | VERIFY_STRICTENC
    | VERIFY_DERSIG
    | VERIFY_LOW_S
    | VERIFY_NULLDUMMY
    | VERIFY_SIGPUSHONLY
    | VERIFY_MINIMALDATA
    | VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | VERIFY_CLEANSTACK
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS
    | VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM
    | VERIFY_MINIMALIF
    | VERIFY_NULLFAIL
    | VERIFY_WITNESS_PUBKEYTYPE
    | VERIFY_TAPROOT
    | VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION
    | VERIFY_DISCOURAGE_OP_SUCCESS
    | VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE;

/// Validated, immutable verification flag set.
///
/// Script validity is always relative to a flag set; the same script may
/// pass under one and fail under another, which is how soft forks are
/// staged. Flags are fixed for the duration of one `verify_script` call.
#[derive(Debug, Clone, Copy)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    /// Validates raw bits. Unknown bits and CLEANSTACK without WITNESS
    /// are construction errors, not script failures.
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(Error::ERR_INVALID_FLAGS);
        }
        let bits = Self::apply_implied_bits(bits);
        if bits & VERIFY_CLEANSTACK != 0 && bits & VERIFY_WITNESS == 0 {
            return Err(Error::ERR_INVALID_FLAGS);
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Taproot commits to every spent output, so the full prevout set
    /// must accompany it.
    pub fn requires_spent_outputs(self) -> bool {
        self.0 & VERIFY_TAPROOT != 0
    }

    fn apply_implied_bits(mut bits: u32) -> u32 {
        if bits & VERIFY_TAPROOT != 0 {
            bits |= VERIFY_WITNESS;
        }
        if bits & VERIFY_WITNESS != 0 {
            bits |= VERIFY_P2SH;
        }
        bits
    }
}

/// Preconditions violated before script evaluation could begin.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The script itself was invalid; see the accompanying [`ScriptError`].
    ERR_SCRIPT,
    /// An invalid input index for the spending transaction.
    ERR_TX_INDEX,
    /// The transaction bytes carried trailing data.
    ERR_TX_SIZE_MISMATCH,
    /// The transaction failed to deserialize.
    ERR_TX_DESERIALIZE,
    /// Input amount is required if WITNESS is used.
    ERR_AMOUNT_REQUIRED,
    /// Script verification flags are invalid.
    ERR_INVALID_FLAGS,
    /// Verifying a Taproot input requires the spent outputs.
    ERR_SPENT_OUTPUTS_REQUIRED,
    /// The supplied spent outputs don't match the transaction.
    ERR_SPENT_OUTPUTS_MISMATCH,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        let description = match *self {
            ERR_SCRIPT => "script verification failed",
            ERR_TX_INDEX => "an invalid index for the spending transaction",
            ERR_TX_SIZE_MISMATCH => "transaction bytes carried trailing data",
            ERR_TX_DESERIALIZE => "an error deserializing the transaction",
            ERR_AMOUNT_REQUIRED => "input amount is required if WITNESS is used",
            ERR_INVALID_FLAGS => "script verification flags are invalid",
            ERR_SPENT_OUTPUTS_REQUIRED => "verifying a taproot input requires previous outputs",
            ERR_SPENT_OUTPUTS_MISMATCH => "spent outputs don't match the transaction",
        };

        f.write_str(description)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Detailed failure information from the diagnostic verification APIs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// High-level precondition or evaluation error.
    pub error: Error,
    /// The interpreter's rejection reason, `Ok` when evaluation never ran.
    pub script_error: ScriptError,
}

/// Verifies a single spend with the full post-activation flag set,
/// enabling taproot rules when the prevout set is supplied.
pub fn verify(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo]>,
    input_index: usize,
) -> Result<(), Error> {
    let flags = match spent_outputs {
        Some(_) => VERIFY_ALL_PRE_TAPROOT | VERIFY_TAPROOT,
        None => VERIFY_ALL_PRE_TAPROOT,
    };

    verify_with_flags(
        spent_output_script,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
}

/// Same as [`verify`] but also reports the interpreter's [`ScriptError`].
pub fn verify_with_details(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo]>,
    input_index: usize,
) -> Result<(), ScriptFailure> {
    let flags = match spent_outputs {
        Some(_) => VERIFY_ALL_PRE_TAPROOT | VERIFY_TAPROOT,
        None => VERIFY_ALL_PRE_TAPROOT,
    };

    perform_verification(
        spent_output_script,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
}

/// Same as [`verify`] but with explicit verification flags.
pub fn verify_with_flags(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo]>,
    input_index: usize,
    flags: u32,
) -> Result<(), Error> {
    perform_verification(
        spent_output_script,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
    .map_err(|failure| failure.error)
}

/// Same as [`verify_with_flags`] but also reports the interpreter's
/// [`ScriptError`].
pub fn verify_with_flags_detailed(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo]>,
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    perform_verification(
        spent_output_script,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
}

fn precondition(error: Error) -> ScriptFailure {
    ScriptFailure {
        error,
        script_error: ScriptError::Ok,
    }
}

fn perform_verification(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo]>,
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    let tx_ctx = TransactionContext::parse(spending_transaction).map_err(precondition)?;
    tx_ctx.ensure_input_index(input_index).map_err(precondition)?;
    let flags = ScriptFlags::from_bits(flags).map_err(precondition)?;

    let spent_outputs = spent_outputs
        .map(|raw| SpentOutputs::new(tx_ctx.tx().input.len(), raw))
        .transpose()
        .map_err(precondition)?;
    let mut amount = amount;
    if let Some(set) = spent_outputs.as_ref() {
        let prevout = &set.txouts()[input_index];
        if prevout.script_pubkey.as_bytes() != spent_output_script {
            return Err(precondition(Error::ERR_SPENT_OUTPUTS_MISMATCH));
        }
        amount = prevout.value.to_sat();
    }
    if flags.requires_spent_outputs() && spent_outputs.is_none() {
        return Err(precondition(Error::ERR_SPENT_OUTPUTS_REQUIRED));
    }

    let backend = Secp256k1Backend;
    let tx = tx_ctx.tx();
    let mut checker = TransactionSignatureChecker::new(
        tx,
        input_index,
        amount,
        spent_outputs.as_ref().map(|set| set.txouts()),
        &backend,
    );

    let script_sig = Script::parse(tx.input[input_index].script_sig.as_bytes());
    let script_pubkey = Script::parse(spent_output_script);
    verify_script(
        &script_sig,
        &script_pubkey,
        &tx.input[input_index].witness,
        flags,
        &mut checker,
    )
    .map_err(|script_error| ScriptFailure {
        error: Error::ERR_SCRIPT,
        script_error,
    })
}
