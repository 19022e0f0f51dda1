//! Signature and locktime checking.
//!
//! The interpreter talks to a [`SignatureChecker`]; the production
//! implementation binds a borrowed transaction, the input index under
//! evaluation, the spent amount (legacy/segwit) or the full prevout set
//! (taproot) to the sighash generators. Elliptic-curve verification is
//! behind the [`SigBackend`] capability so a native and a pure-Rust
//! implementation can be swapped without this module noticing; nothing
//! here holds process-wide mutable state.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(all(feature = "std", not(feature = "external-secp")))]
use std::sync::OnceLock;

use bitcoin::{
    absolute::LOCK_TIME_THRESHOLD,
    secp256k1::{
        self, ecdsa::Signature as EcdsaSignature, schnorr::Signature as SchnorrSignature, Message,
        Parity, PublicKey, Scalar, Secp256k1, XOnlyPublicKey,
    },
    Sequence, Transaction, TxOut,
};

use crate::{
    error::ScriptError,
    script::Script,
    sighash::{
        is_valid_taproot_hash_type, legacy_signature_hash, segwit_v0_signature_hash,
        taproot_signature_hash, SigVersion, TxSigHashes, SIGHASH_DEFAULT,
    },
};

/// BIP68: sequence numbers with this bit set carry no relative locktime.
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
/// BIP68: set means the relative locktime is time-based, clear height-based.
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
/// BIP68: bits holding the relative locktime value.
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000ffff;

/// Stateless elliptic-curve verification capability.
///
/// Implementations parse the raw encodings themselves; malformed
/// signatures or keys are unverifiable (`false`), never errors. Strictness
/// of encodings is policy and stays with the interpreter.
pub trait SigBackend {
    /// ECDSA over secp256k1. `sig` is DER without the hash-type byte;
    /// lax parsing and low-S normalization follow consensus behavior.
    fn verify_ecdsa(&self, msg: &[u8; 32], sig: &[u8], pubkey: &[u8]) -> bool;

    /// BIP340 Schnorr over an x-only key.
    fn verify_schnorr(&self, msg: &[u8; 32], sig: &[u8; 64], pubkey: &[u8; 32]) -> bool;

    /// Whether `output_key` (with the given parity) is `internal_key`
    /// tweaked by `tweak`, the EC half of the BIP341 commitment check.
    fn verify_taproot_tweak(
        &self,
        internal_key: &[u8; 32],
        tweak: &[u8; 32],
        output_key: &[u8; 32],
        parity_odd: bool,
    ) -> bool;
}

#[cfg(all(feature = "external-secp", feature = "std"))]
type VerificationContext = Secp256k1<secp256k1::All>;
#[cfg(not(all(feature = "external-secp", feature = "std")))]
type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

#[cfg(all(feature = "std", not(feature = "external-secp")))]
static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    #[cfg(all(feature = "std", feature = "external-secp"))]
    {
        // `bitcoin::secp256k1` re-exports the `global` module when the
        // upstream crate is built with `global-context`; piggyback on that
        // singleton instead of creating ad-hoc contexts.
        f(&*bitcoin::secp256k1::global::SECP256K1)
    }
    #[cfg(all(feature = "std", not(feature = "external-secp")))]
    {
        f(SECP256K1.get_or_init(Secp256k1::verification_only))
    }
    #[cfg(not(feature = "std"))]
    {
        let ctx = Secp256k1::verification_only();
        f(&ctx)
    }
}

/// The default backend, a verify-only secp256k1 context.
#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1Backend;

impl SigBackend for Secp256k1Backend {
    fn verify_ecdsa(&self, msg: &[u8; 32], sig: &[u8], pubkey: &[u8]) -> bool {
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return false;
        };
        let Ok(mut signature) = EcdsaSignature::from_der_lax(sig) else {
            return false;
        };
        signature.normalize_s();
        let message = Message::from_digest(*msg);
        with_verification_ctx(|secp| secp.verify_ecdsa(&message, &signature, &pubkey).is_ok())
    }

    fn verify_schnorr(&self, msg: &[u8; 32], sig: &[u8; 64], pubkey: &[u8; 32]) -> bool {
        let Ok(pubkey) = XOnlyPublicKey::from_slice(pubkey) else {
            return false;
        };
        let Ok(signature) = SchnorrSignature::from_slice(sig) else {
            return false;
        };
        let message = Message::from_digest(*msg);
        with_verification_ctx(|secp| secp.verify_schnorr(&signature, &message, &pubkey).is_ok())
    }

    fn verify_taproot_tweak(
        &self,
        internal_key: &[u8; 32],
        tweak: &[u8; 32],
        output_key: &[u8; 32],
        parity_odd: bool,
    ) -> bool {
        let Ok(internal) = XOnlyPublicKey::from_slice(internal_key) else {
            return false;
        };
        let Ok(output) = XOnlyPublicKey::from_slice(output_key) else {
            return false;
        };
        let Ok(tweak) = Scalar::from_be_bytes(*tweak) else {
            return false;
        };
        let parity = if parity_odd { Parity::Odd } else { Parity::Even };
        with_verification_ctx(|secp| internal.tweak_add_check(secp, &output, parity, tweak))
    }
}

/// Taproot execution context threaded from the witness-program dispatch
/// into signature checks: the annex, the executed leaf, and the position
/// of the last executed OP_CODESEPARATOR (opcode index, `u32::MAX` when
/// none ran).
#[derive(Debug, Clone)]
pub struct TapExecData {
    pub annex: Option<Vec<u8>>,
    pub tapleaf_hash: Option<[u8; 32]>,
    pub codeseparator_pos: u32,
}

impl Default for TapExecData {
    fn default() -> Self {
        Self {
            annex: None,
            tapleaf_hash: None,
            codeseparator_pos: u32::MAX,
        }
    }
}

/// What the interpreter needs from its signing context.
pub trait SignatureChecker {
    /// Verifies a DER signature (with trailing hash-type byte) over the
    /// digest selected by `sig_version`. An empty or unparseable
    /// signature is plain `false`, not an error.
    fn check_ecdsa_signature(
        &mut self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &Script,
        sig_version: SigVersion,
    ) -> bool;

    /// Verifies a BIP340 signature (64 bytes, or 65 with an explicit
    /// hash type). Size and hash-type violations are hard errors.
    fn check_schnorr_signature(
        &mut self,
        sig: &[u8],
        pubkey: &[u8; 32],
        sig_version: SigVersion,
        exec: &TapExecData,
    ) -> Result<bool, ScriptError>;

    /// EC half of the BIP341 script-path commitment check.
    fn check_taproot_tweak(
        &self,
        internal_key: &[u8; 32],
        tweak: &[u8; 32],
        output_key: &[u8; 32],
        parity_odd: bool,
    ) -> bool;

    /// CHECKLOCKTIMEVERIFY comparison against the transaction.
    fn check_lock_time(&self, lock_time: i64) -> bool;

    /// CHECKSEQUENCEVERIFY comparison against the checked input.
    fn check_sequence(&self, sequence: i64) -> bool;
}

/// Rejects every signature; for evaluating scripts with no transaction
/// context.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSignatureChecker;

impl SignatureChecker for NullSignatureChecker {
    fn check_ecdsa_signature(&mut self, _: &[u8], _: &[u8], _: &Script, _: SigVersion) -> bool {
        false
    }

    fn check_schnorr_signature(
        &mut self,
        _: &[u8],
        _: &[u8; 32],
        _: SigVersion,
        _: &TapExecData,
    ) -> Result<bool, ScriptError> {
        Ok(false)
    }

    fn check_taproot_tweak(&self, _: &[u8; 32], _: &[u8; 32], _: &[u8; 32], _: bool) -> bool {
        false
    }

    fn check_lock_time(&self, _: i64) -> bool {
        false
    }

    fn check_sequence(&self, _: i64) -> bool {
        false
    }
}

/// Binds one transaction input to the sighash generators and the EC
/// backend. Created fresh per `verify_script` call; borrows everything.
pub struct TransactionSignatureChecker<'tx> {
    tx: &'tx Transaction,
    input_index: usize,
    amount: u64,
    spent_outputs: Option<&'tx [TxOut]>,
    sighashes: TxSigHashes,
    backend: &'tx dyn SigBackend,
}

impl<'tx> TransactionSignatureChecker<'tx> {
    pub fn new(
        tx: &'tx Transaction,
        input_index: usize,
        amount: u64,
        spent_outputs: Option<&'tx [TxOut]>,
        backend: &'tx dyn SigBackend,
    ) -> Self {
        Self {
            tx,
            input_index,
            amount,
            spent_outputs,
            sighashes: TxSigHashes::new(tx, spent_outputs),
            backend,
        }
    }
}

impl<'tx> SignatureChecker for TransactionSignatureChecker<'tx> {
    fn check_ecdsa_signature(
        &mut self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &Script,
        sig_version: SigVersion,
    ) -> bool {
        if sig.is_empty() {
            return false;
        }
        let (sig_der, hash_type) = sig.split_at(sig.len() - 1);
        let hash_type = hash_type[0] as u32;

        let digest = match sig_version {
            SigVersion::Base => {
                legacy_signature_hash(self.tx, self.input_index, script_code, hash_type)
            }
            SigVersion::WitnessV0 => segwit_v0_signature_hash(
                self.tx,
                &self.sighashes,
                self.input_index,
                script_code,
                self.amount,
                hash_type,
            ),
            SigVersion::Taproot | SigVersion::Tapscript => return false,
        };

        self.backend.verify_ecdsa(&digest, sig_der, pubkey)
    }

    fn check_schnorr_signature(
        &mut self,
        sig: &[u8],
        pubkey: &[u8; 32],
        sig_version: SigVersion,
        exec: &TapExecData,
    ) -> Result<bool, ScriptError> {
        let (sig_bytes, hash_type) = match sig.len() {
            64 => (&sig[..], SIGHASH_DEFAULT),
            65 => {
                let hash_type = sig[64];
                // An explicit 0x00 trailer must be omitted instead.
                if hash_type == SIGHASH_DEFAULT {
                    return Err(ScriptError::SchnorrSigHashType);
                }
                (&sig[..64], hash_type)
            }
            _ => return Err(ScriptError::SchnorrSigSize),
        };
        if !is_valid_taproot_hash_type(hash_type) {
            return Err(ScriptError::SchnorrSigHashType);
        }

        let spent = self.spent_outputs.ok_or(ScriptError::SchnorrSig)?;
        let leaf = match sig_version {
            SigVersion::Taproot => None,
            SigVersion::Tapscript => {
                let leaf_hash = exec.tapleaf_hash.ok_or(ScriptError::SchnorrSig)?;
                Some((leaf_hash, exec.codeseparator_pos))
            }
            SigVersion::Base | SigVersion::WitnessV0 => return Err(ScriptError::SchnorrSig),
        };

        let digest = taproot_signature_hash(
            self.tx,
            &self.sighashes,
            spent,
            self.input_index,
            hash_type,
            exec.annex.as_deref(),
            leaf,
        )?;

        let mut sig64 = [0u8; 64];
        sig64.copy_from_slice(sig_bytes);
        Ok(self.backend.verify_schnorr(&digest, &sig64, pubkey))
    }

    fn check_taproot_tweak(
        &self,
        internal_key: &[u8; 32],
        tweak: &[u8; 32],
        output_key: &[u8; 32],
        parity_odd: bool,
    ) -> bool {
        self.backend
            .verify_taproot_tweak(internal_key, tweak, output_key, parity_odd)
    }

    fn check_lock_time(&self, lock_time: i64) -> bool {
        let tx_lock_time = self.tx.lock_time.to_consensus_u32() as i64;
        let threshold = LOCK_TIME_THRESHOLD as i64;

        // Both sides must live in the same domain (block height vs. unix
        // time, split at 500,000,000).
        let same_domain = (tx_lock_time < threshold && lock_time < threshold)
            || (tx_lock_time >= threshold && lock_time >= threshold);
        if !same_domain {
            return false;
        }
        if lock_time > tx_lock_time {
            return false;
        }
        // A final sequence opts the input out of locktime entirely, which
        // would let the spender bypass CLTV.
        if self.tx.input[self.input_index].sequence == Sequence::MAX {
            return false;
        }
        true
    }

    fn check_sequence(&self, sequence: i64) -> bool {
        let tx_sequence = self.tx.input[self.input_index].sequence.to_consensus_u32() as i64;

        // Relative locktimes only exist from transaction version 2 on.
        if self.tx.version.0 < 2 {
            return false;
        }
        if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 != 0 {
            return false;
        }

        let locktime_mask = (SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK) as i64;
        let type_flag = SEQUENCE_LOCKTIME_TYPE_FLAG as i64;
        let tx_masked = tx_sequence & locktime_mask;
        let masked = sequence & locktime_mask;

        let same_domain = (tx_masked < type_flag && masked < type_flag)
            || (tx_masked >= type_flag && masked >= type_flag);
        if !same_domain {
            return false;
        }
        if masked > tx_masked {
            return false;
        }
        true
    }
}

/// BIP66 strict DER: structure of the signature with its trailing
/// hash-type byte.
pub fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 {
        return false;
    }
    if sig[1] as usize != sig.len() - 3 {
        return false;
    }

    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;

    if sig[2] != 0x02 {
        return false;
    }
    if len_r == 0 {
        return false;
    }
    if sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && sig[5] & 0x80 == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 {
        return false;
    }
    if len_s == 0 {
        return false;
    }
    if len_r + len_s + 7 != sig.len() {
        return false;
    }
    if sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && sig[len_r + 7] & 0x80 == 0 {
        return false;
    }
    true
}

/// LOW_S: the S component is already in its normalized half of the order.
pub fn is_low_der_signature(sig: &[u8]) -> bool {
    if !is_valid_signature_encoding(sig) || sig.len() < 2 {
        return false;
    }
    let Ok(signature) = EcdsaSignature::from_der(&sig[..sig.len() - 1]) else {
        return false;
    };
    let mut normalized = signature;
    normalized.normalize_s();
    normalized == signature
}

/// STRICTENC: the trailing hash-type byte names a defined base type.
pub fn is_defined_hashtype_signature(sig: &[u8]) -> bool {
    if sig.is_empty() {
        return false;
    }
    matches!(sig[sig.len() - 1] & 0x1f, 0x01..=0x03)
}

/// STRICTENC: compressed or uncompressed SEC encoding.
pub fn is_valid_pubkey_encoding(pubkey: &[u8]) -> bool {
    if pubkey.len() == 33 {
        matches!(pubkey[0], 0x02 | 0x03)
    } else if pubkey.len() == 65 {
        pubkey[0] == 0x04
    } else {
        false
    }
}

/// WITNESS_PUBKEYTYPE: compressed SEC encoding only.
pub fn is_compressed_pubkey(pubkey: &[u8]) -> bool {
    pubkey.len() == 33 && matches!(pubkey[0], 0x02 | 0x03)
}
