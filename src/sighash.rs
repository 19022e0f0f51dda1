//! The three signature-hash constructions.
//!
//! Legacy (pre-BIP143), segwit v0 (BIP143) and taproot/tapscript
//! (BIP341/342) digests are computed here as pure functions of the
//! transaction, the input under evaluation and the hash-type byte. The
//! once-per-transaction intermediate hashes shared by the segwit and
//! taproot layouts live in [`TxSigHashes`], mirroring Core's
//! `PrecomputedTransactionData`. Byte layouts are fixed by the BIPs; there
//! is no tolerance for reordering or padding.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use bitcoin::{
    consensus::{encode::VarInt, Encodable},
    hashes::{sha256, sha256d, Hash, HashEngine},
    Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};

use crate::{error::ScriptError, script::Script};

/// Implied hash type of a 64-byte taproot signature.
pub const SIGHASH_DEFAULT: u8 = 0x00;
pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Base-type mask applied to the legacy/segwit hash-type word.
const BASE_TYPE_MASK: u32 = 0x1f;
/// Output-type mask applied to the taproot hash-type byte.
const TAPROOT_OUTPUT_MASK: u8 = 0x03;

/// Digest committed when SIGHASH_SINGLE points past the last output (and
/// when the input index is out of range): the "one array" consensus quirk.
const UINT256_ONE: [u8; 32] = [
    1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0,
];

/// Which digest construction and opcode-semantics variant applies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SigVersion {
    /// Legacy scripts, including P2SH redeem scripts.
    Base,
    /// BIP143 (P2WPKH and P2WSH).
    WitnessV0,
    /// BIP341 key-path spends.
    Taproot,
    /// BIP342 script-path leaf execution.
    Tapscript,
}

/// Per-transaction intermediate hashes shared by the BIP143 and BIP341
/// layouts. Computed once per checker, reused across inputs and opcodes.
#[derive(Debug, Clone)]
pub struct TxSigHashes {
    /// Single SHA256 of all input outpoints.
    pub sha_prevouts: [u8; 32],
    /// Single SHA256 of all input sequence numbers.
    pub sha_sequences: [u8; 32],
    /// Single SHA256 of all outputs in CTxOut serialization.
    pub sha_outputs: [u8; 32],
    /// Double-SHA256 counterparts used by BIP143.
    pub hash_prevouts: [u8; 32],
    pub hash_sequences: [u8; 32],
    pub hash_outputs: [u8; 32],
    /// Single SHA256 of all spent amounts / scriptPubkeys; present only
    /// when the full prevout set is known (taproot).
    pub sha_amounts: Option<[u8; 32]>,
    pub sha_script_pubkeys: Option<[u8; 32]>,
}

impl TxSigHashes {
    pub fn new(tx: &Transaction, spent_outputs: Option<&[TxOut]>) -> Self {
        let mut prevouts = sha256::Hash::engine();
        let mut sequences = sha256::Hash::engine();
        for input in &tx.input {
            encode_into(&input.previous_output, &mut prevouts);
            encode_into(&input.sequence, &mut sequences);
        }
        let mut outputs = sha256::Hash::engine();
        for output in &tx.output {
            encode_into(output, &mut outputs);
        }

        let sha_prevouts = finish(prevouts);
        let sha_sequences = finish(sequences);
        let sha_outputs = finish(outputs);

        let (sha_amounts, sha_script_pubkeys) = match spent_outputs {
            Some(spent) => {
                let mut amounts = sha256::Hash::engine();
                let mut scripts = sha256::Hash::engine();
                for txout in spent {
                    encode_into(&txout.value.to_sat(), &mut amounts);
                    encode_into(&txout.script_pubkey, &mut scripts);
                }
                (Some(finish(amounts)), Some(finish(scripts)))
            }
            None => (None, None),
        };

        Self {
            sha_prevouts,
            sha_sequences,
            sha_outputs,
            hash_prevouts: hash_again(&sha_prevouts),
            hash_sequences: hash_again(&sha_sequences),
            hash_outputs: hash_again(&sha_outputs),
            sha_amounts,
            sha_script_pubkeys,
        }
    }
}

/// Legacy digest: double-SHA256 of the modified transaction with the
/// hash-type word appended.
///
/// The scriptCode replaces the signed input's scriptSig with every
/// OP_CODESEPARATOR removed; other scriptSigs are emptied. Out-of-range
/// input indices and the SIGHASH_SINGLE mismatch return the "one array"
/// rather than failing, matching the historical behavior signatures have
/// been created against.
pub fn legacy_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    hash_type: u32,
) -> [u8; 32] {
    if input_index >= tx.input.len() {
        return UINT256_ONE;
    }
    let base_type = hash_type & BASE_TYPE_MASK;
    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY as u32 != 0;
    if base_type == SIGHASH_SINGLE as u32 && input_index >= tx.output.len() {
        return UINT256_ONE;
    }

    let script_code = ScriptBuf::from_bytes(script_code.without_codeseparators().serialize());

    let mut signing = Transaction {
        version: tx.version,
        lock_time: tx.lock_time,
        input: Vec::new(),
        output: Vec::new(),
    };

    if anyone_can_pay {
        let txin = &tx.input[input_index];
        signing.input.push(TxIn {
            previous_output: txin.previous_output,
            script_sig: script_code,
            sequence: txin.sequence,
            witness: Witness::default(),
        });
    } else {
        let zero_sequences =
            base_type == SIGHASH_NONE as u32 || base_type == SIGHASH_SINGLE as u32;
        signing.input = tx
            .input
            .iter()
            .enumerate()
            .map(|(n, txin)| TxIn {
                previous_output: txin.previous_output,
                script_sig: if n == input_index {
                    script_code.clone()
                } else {
                    ScriptBuf::new()
                },
                sequence: if n != input_index && zero_sequences {
                    Sequence::ZERO
                } else {
                    txin.sequence
                },
                witness: Witness::default(),
            })
            .collect();
    }

    signing.output = if base_type == SIGHASH_NONE as u32 {
        Vec::new()
    } else if base_type == SIGHASH_SINGLE as u32 {
        // Outputs up to and including ours, the others nulled out.
        tx.output
            .iter()
            .take(input_index + 1)
            .enumerate()
            .map(|(n, out)| {
                if n == input_index {
                    out.clone()
                } else {
                    TxOut {
                        value: Amount::from_sat(u64::MAX),
                        script_pubkey: ScriptBuf::new(),
                    }
                }
            })
            .collect()
    } else {
        tx.output.clone()
    };

    let mut engine = sha256d::Hash::engine();
    encode_into(&signing, &mut engine);
    encode_into(&hash_type, &mut engine);
    sha256d::Hash::from_engine(engine).to_byte_array()
}

/// BIP143 digest for segwit v0 inputs.
pub fn segwit_v0_signature_hash(
    tx: &Transaction,
    sighashes: &TxSigHashes,
    input_index: usize,
    script_code: &Script,
    amount: u64,
    hash_type: u32,
) -> [u8; 32] {
    let zero = [0u8; 32];
    let base_type = hash_type & BASE_TYPE_MASK;
    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY as u32 != 0;
    let commits_outputs =
        base_type != SIGHASH_SINGLE as u32 && base_type != SIGHASH_NONE as u32;

    let mut engine = sha256d::Hash::engine();
    encode_into(&tx.version, &mut engine);

    if anyone_can_pay {
        engine.input(&zero);
    } else {
        engine.input(&sighashes.hash_prevouts);
    }
    if !anyone_can_pay && commits_outputs {
        engine.input(&sighashes.hash_sequences);
    } else {
        engine.input(&zero);
    }

    let txin = &tx.input[input_index];
    encode_into(&txin.previous_output, &mut engine);
    encode_into(&ScriptBuf::from_bytes(script_code.serialize()), &mut engine);
    encode_into(&amount, &mut engine);
    encode_into(&txin.sequence, &mut engine);

    if commits_outputs {
        engine.input(&sighashes.hash_outputs);
    } else if base_type == SIGHASH_SINGLE as u32 && input_index < tx.output.len() {
        let mut single = sha256d::Hash::engine();
        encode_into(&tx.output[input_index], &mut single);
        engine.input(&sha256d::Hash::from_engine(single).to_byte_array());
    } else {
        engine.input(&zero);
    }

    encode_into(&tx.lock_time, &mut engine);
    encode_into(&hash_type, &mut engine);
    sha256d::Hash::from_engine(engine).to_byte_array()
}

/// BIP341/342 digest.
///
/// `leaf` carries the tapleaf hash and the last executed codeseparator
/// position for script-path spends, and is `None` on the key path. The
/// caller validates the hash-type byte beforehand; failures here (missing
/// prevout data, SIGHASH_SINGLE without a matching output) surface as
/// `SchnorrSig`, the error Core reports for an uncomputable taproot digest.
pub fn taproot_signature_hash(
    tx: &Transaction,
    sighashes: &TxSigHashes,
    prevouts: &[TxOut],
    input_index: usize,
    hash_type: u8,
    annex: Option<&[u8]>,
    leaf: Option<([u8; 32], u32)>,
) -> Result<[u8; 32], ScriptError> {
    if prevouts.len() != tx.input.len() || input_index >= tx.input.len() {
        return Err(ScriptError::SchnorrSig);
    }

    let output_type = if hash_type == SIGHASH_DEFAULT {
        SIGHASH_ALL
    } else {
        hash_type & TAPROOT_OUTPUT_MASK
    };
    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;

    let mut engine = tagged_engine(b"TapSighash");
    engine.input(&[0u8]); // epoch
    engine.input(&[hash_type]);
    encode_into(&tx.version, &mut engine);
    encode_into(&tx.lock_time, &mut engine);

    if !anyone_can_pay {
        let sha_amounts = sighashes.sha_amounts.ok_or(ScriptError::SchnorrSig)?;
        let sha_script_pubkeys = sighashes
            .sha_script_pubkeys
            .ok_or(ScriptError::SchnorrSig)?;
        engine.input(&sighashes.sha_prevouts);
        engine.input(&sha_amounts);
        engine.input(&sha_script_pubkeys);
        engine.input(&sighashes.sha_sequences);
    }
    if output_type == SIGHASH_ALL {
        engine.input(&sighashes.sha_outputs);
    }

    // spend_type = (ext_flag * 2) + annex_present.
    let mut spend_type = 0u8;
    if annex.is_some() {
        spend_type |= 1;
    }
    if leaf.is_some() {
        spend_type |= 2;
    }
    engine.input(&[spend_type]);

    if anyone_can_pay {
        let txin = &tx.input[input_index];
        let prevout = &prevouts[input_index];
        encode_into(&txin.previous_output, &mut engine);
        encode_into(&prevout.value.to_sat(), &mut engine);
        encode_into(&prevout.script_pubkey, &mut engine);
        encode_into(&txin.sequence, &mut engine);
    } else {
        encode_into(&(input_index as u32), &mut engine);
    }

    if let Some(annex) = annex {
        let mut annex_engine = sha256::Hash::engine();
        encode_into(&VarInt(annex.len() as u64), &mut annex_engine);
        annex_engine.input(annex);
        engine.input(&finish(annex_engine));
    }

    if output_type == SIGHASH_SINGLE {
        let output = tx
            .output
            .get(input_index)
            .ok_or(ScriptError::SchnorrSig)?;
        let mut single = sha256::Hash::engine();
        encode_into(output, &mut single);
        engine.input(&finish(single));
    }

    if let Some((leaf_hash, codeseparator_pos)) = leaf {
        engine.input(&leaf_hash);
        engine.input(&[0u8]); // key version
        engine.input(&codeseparator_pos.to_le_bytes());
    }

    Ok(finish(engine))
}

/// The hash-type bytes a taproot signature may carry.
pub fn is_valid_taproot_hash_type(hash_type: u8) -> bool {
    matches!(hash_type, 0x00..=0x03 | 0x81..=0x83)
}

/// Construction-specific inputs for [`signature_hash`]: legacy and segwit
/// commit to a scriptCode (and segwit to the spent amount), taproot to the
/// prevout set, the annex and, on the script path, the executed leaf.
#[derive(Debug, Clone, Copy, Default)]
pub struct SighashOptions<'a> {
    pub script_code: Option<&'a Script>,
    pub amount: u64,
    pub prevouts: Option<&'a [TxOut]>,
    pub annex: Option<&'a [u8]>,
    pub leaf: Option<([u8; 32], u32)>,
}

/// Computes the digest to sign for one input, dispatching on
/// `sig_version`. This is the entry point for signing code that must
/// produce the digest before a full script exists; the interpreter's
/// checker calls the specific constructions directly.
pub fn signature_hash(
    tx: &Transaction,
    sighashes: &TxSigHashes,
    input_index: usize,
    hash_type: u32,
    sig_version: SigVersion,
    opts: &SighashOptions<'_>,
) -> Result<[u8; 32], ScriptError> {
    match sig_version {
        SigVersion::Base => {
            let script_code = opts.script_code.ok_or(ScriptError::Unknown)?;
            Ok(legacy_signature_hash(tx, input_index, script_code, hash_type))
        }
        SigVersion::WitnessV0 => {
            let script_code = opts.script_code.ok_or(ScriptError::Unknown)?;
            Ok(segwit_v0_signature_hash(
                tx,
                sighashes,
                input_index,
                script_code,
                opts.amount,
                hash_type,
            ))
        }
        SigVersion::Taproot | SigVersion::Tapscript => {
            let hash_type = u8::try_from(hash_type).map_err(|_| ScriptError::SchnorrSigHashType)?;
            if !is_valid_taproot_hash_type(hash_type) {
                return Err(ScriptError::SchnorrSigHashType);
            }
            let prevouts = opts.prevouts.ok_or(ScriptError::Unknown)?;
            let leaf = match sig_version {
                SigVersion::Tapscript => {
                    Some(opts.leaf.ok_or(ScriptError::Unknown)?)
                }
                _ => None,
            };
            taproot_signature_hash(
                tx,
                sighashes,
                prevouts,
                input_index,
                hash_type,
                opts.annex,
                leaf,
            )
        }
    }
}

/// SHA256 engine primed with `SHA256(tag) || SHA256(tag)` (BIP340 tagged
/// hashing).
pub fn tagged_engine(tag: &[u8]) -> sha256::HashEngine {
    let tag_hash = sha256::Hash::hash(tag).to_byte_array();
    let mut engine = sha256::Hash::engine();
    engine.input(&tag_hash);
    engine.input(&tag_hash);
    engine
}

/// `SHA256(SHA256(tag) || SHA256(tag) || msg)`.
pub fn tagged_hash(tag: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut engine = tagged_engine(tag);
    engine.input(msg);
    finish(engine)
}

/// BIP341 leaf commitment: `TapLeaf` over the leaf version and the
/// length-prefixed script.
pub fn tap_leaf_hash(leaf_version: u8, script: &[u8]) -> [u8; 32] {
    let mut engine = tagged_engine(b"TapLeaf");
    engine.input(&[leaf_version]);
    encode_into(&VarInt(script.len() as u64), &mut engine);
    engine.input(script);
    finish(engine)
}

/// BIP341 branch commitment; children sort lexicographically.
pub fn tap_branch_hash(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut engine = tagged_engine(b"TapBranch");
    if a <= b {
        engine.input(a);
        engine.input(b);
    } else {
        engine.input(b);
        engine.input(a);
    }
    finish(engine)
}

/// BIP341 output-key tweak: `TapTweak` over the internal key and the
/// merkle root (absent for a key-path-only output).
pub fn tap_tweak_hash(internal_key: &[u8; 32], merkle_root: Option<&[u8; 32]>) -> [u8; 32] {
    let mut engine = tagged_engine(b"TapTweak");
    engine.input(internal_key);
    if let Some(root) = merkle_root {
        engine.input(root);
    }
    finish(engine)
}

fn encode_into<T: Encodable>(value: &T, engine: &mut impl bitcoin::io::Write) {
    value
        .consensus_encode(engine)
        .expect("hash engines don't error");
}

fn finish(engine: sha256::HashEngine) -> [u8; 32] {
    sha256::Hash::from_engine(engine).to_byte_array()
}

fn hash_again(single: &[u8; 32]) -> [u8; 32] {
    sha256::Hash::hash(single).to_byte_array()
}
