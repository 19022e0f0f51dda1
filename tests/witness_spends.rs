//! End-to-end segwit and taproot spends: keys are fixed, signatures are
//! real, and every spend runs through the full verification entry point.

use bitcoin::{
    absolute::LockTime,
    blockdata::script::{Builder, PushBytesBuf},
    consensus,
    hashes::{hash160, sha256, Hash},
    key::{Keypair, TapTweak},
    opcodes::all,
    secp256k1::{Message, Secp256k1, SecretKey, XOnlyPublicKey},
    sighash::{EcdsaSighashType, Prevouts, SegwitV0Sighash, SighashCache, TapSighashType},
    taproot::{TapLeafHash, TapNodeHash, TAPROOT_LEAF_TAPSCRIPT},
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use bitcoinscript::{
    verify_with_flags, verify_with_flags_detailed, Error, ScriptError, Utxo,
    VERIFY_ALL_PRE_TAPROOT, VERIFY_TAPROOT,
};

const TAPROOT_FLAGS: u32 = VERIFY_ALL_PRE_TAPROOT | VERIFY_TAPROOT;

fn spending_tx() -> Transaction {
    Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: bitcoin::Txid::from_byte_array([0x99; 32]),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence(0xfffffffd),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(90_000),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        }],
    }
}

fn segwit_digest(tx: &Transaction, script_code: &ScriptBuf, amount: u64) -> [u8; 32] {
    let mut engine = SegwitV0Sighash::engine();
    SighashCache::new(tx)
        .segwit_v0_encode_signing_data_to(
            &mut engine,
            0,
            script_code,
            Amount::from_sat(amount),
            EcdsaSighashType::All,
        )
        .unwrap();
    SegwitV0Sighash::from_engine(engine).to_byte_array()
}

fn expect_script_error(result: Result<(), bitcoinscript::ScriptFailure>) -> ScriptError {
    let failure = result.expect_err("verification must fail");
    assert_eq!(failure.error, Error::ERR_SCRIPT);
    failure.script_error
}

#[test]
fn p2wpkh_spend_verifies() {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x07; 32]).unwrap();
    let pubkey = secret.public_key(&secp).serialize();
    let program = hash160::Hash::hash(&pubkey);

    let script_pubkey = Builder::new()
        .push_opcode(all::OP_PUSHBYTES_0)
        .push_slice(program.to_byte_array())
        .into_script();
    let script_code = Builder::new()
        .push_opcode(all::OP_DUP)
        .push_opcode(all::OP_HASH160)
        .push_slice(program.to_byte_array())
        .push_opcode(all::OP_EQUALVERIFY)
        .push_opcode(all::OP_CHECKSIG)
        .into_script();

    let amount = 100_000u64;
    let mut tx = spending_tx();
    let digest = segwit_digest(&tx, &script_code, amount);
    let mut sig = secp
        .sign_ecdsa(&Message::from_digest(digest), &secret)
        .serialize_der()
        .to_vec();
    sig.push(0x01);
    let mut witness = Witness::new();
    witness.push(sig);
    witness.push(pubkey);
    tx.input[0].witness = witness;

    let tx_bytes = consensus::serialize(&tx);
    verify_with_flags(
        script_pubkey.as_bytes(),
        amount,
        &tx_bytes,
        None,
        0,
        VERIFY_ALL_PRE_TAPROOT,
    )
    .expect("valid p2wpkh spend");

    // The committed amount is part of the digest: a different value must
    // fail signature verification.
    let err = expect_script_error(verify_with_flags_detailed(
        script_pubkey.as_bytes(),
        amount + 1,
        &tx_bytes,
        None,
        0,
        VERIFY_ALL_PRE_TAPROOT,
    ));
    assert_eq!(err, ScriptError::EvalFalse);
}

#[test]
fn p2sh_wrapped_p2wpkh_spend_verifies() {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x08; 32]).unwrap();
    let pubkey = secret.public_key(&secp).serialize();
    let program = hash160::Hash::hash(&pubkey);

    let redeem = Builder::new()
        .push_opcode(all::OP_PUSHBYTES_0)
        .push_slice(program.to_byte_array())
        .into_script();
    let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
    let script_code = Builder::new()
        .push_opcode(all::OP_DUP)
        .push_opcode(all::OP_HASH160)
        .push_slice(program.to_byte_array())
        .push_opcode(all::OP_EQUALVERIFY)
        .push_opcode(all::OP_CHECKSIG)
        .into_script();

    let amount = 70_000u64;
    let mut tx = spending_tx();
    tx.input[0].script_sig = Builder::new()
        .push_slice(PushBytesBuf::try_from(redeem.as_bytes().to_vec()).unwrap())
        .into_script();
    let digest = segwit_digest(&tx, &script_code, amount);
    let mut sig = secp
        .sign_ecdsa(&Message::from_digest(digest), &secret)
        .serialize_der()
        .to_vec();
    sig.push(0x01);
    let mut witness = Witness::new();
    witness.push(sig);
    witness.push(pubkey);
    tx.input[0].witness = witness;

    let tx_bytes = consensus::serialize(&tx);
    verify_with_flags(
        script_pubkey.as_bytes(),
        amount,
        &tx_bytes,
        None,
        0,
        VERIFY_ALL_PRE_TAPROOT,
    )
    .expect("valid p2sh-p2wpkh spend");

    // A scriptSig that is not exactly the single redeem push is malleated.
    let mut malleated = tx.clone();
    malleated.input[0].script_sig = Builder::new()
        .push_opcode(all::OP_PUSHBYTES_0)
        .push_slice(PushBytesBuf::try_from(redeem.as_bytes().to_vec()).unwrap())
        .into_script();
    let err = expect_script_error(verify_with_flags_detailed(
        script_pubkey.as_bytes(),
        amount,
        &consensus::serialize(&malleated),
        None,
        0,
        VERIFY_ALL_PRE_TAPROOT,
    ));
    assert_eq!(err, ScriptError::WitnessMalleatedP2SH);
}

#[test]
fn p2wsh_spend_verifies() {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x09; 32]).unwrap();
    let pubkey = secret.public_key(&secp).serialize();

    let witness_script = Builder::new()
        .push_slice(PushBytesBuf::try_from(pubkey.to_vec()).unwrap())
        .push_opcode(all::OP_CHECKSIG)
        .into_script();
    let script_hash = sha256::Hash::hash(witness_script.as_bytes());
    let script_pubkey = Builder::new()
        .push_opcode(all::OP_PUSHBYTES_0)
        .push_slice(script_hash.to_byte_array())
        .into_script();

    let amount = 55_000u64;
    let mut tx = spending_tx();
    let digest = segwit_digest(&tx, &witness_script, amount);
    let mut sig = secp
        .sign_ecdsa(&Message::from_digest(digest), &secret)
        .serialize_der()
        .to_vec();
    sig.push(0x01);
    let mut witness = Witness::new();
    witness.push(sig);
    witness.push(witness_script.as_bytes());
    tx.input[0].witness = witness;

    let tx_bytes = consensus::serialize(&tx);
    verify_with_flags(
        script_pubkey.as_bytes(),
        amount,
        &tx_bytes,
        None,
        0,
        VERIFY_ALL_PRE_TAPROOT,
    )
    .expect("valid p2wsh spend");
}

#[test]
fn witness_program_with_empty_witness_is_rejected() {
    let script_pubkey = Builder::new()
        .push_opcode(all::OP_PUSHBYTES_0)
        .push_slice([0x42u8; 32])
        .into_script();

    let tx = spending_tx();
    let err = expect_script_error(verify_with_flags_detailed(
        script_pubkey.as_bytes(),
        10_000,
        &consensus::serialize(&tx),
        None,
        0,
        VERIFY_ALL_PRE_TAPROOT,
    ));
    assert_eq!(err, ScriptError::WitnessProgramWitnessEmpty);
}

#[test]
fn stray_witness_on_non_witness_spend_is_rejected() {
    let script_pubkey = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
    let mut tx = spending_tx();
    let mut witness = Witness::new();
    witness.push([0x01]);
    tx.input[0].witness = witness;

    let err = expect_script_error(verify_with_flags_detailed(
        script_pubkey.as_bytes(),
        10_000,
        &consensus::serialize(&tx),
        None,
        0,
        VERIFY_ALL_PRE_TAPROOT,
    ));
    assert_eq!(err, ScriptError::WitnessUnexpected);
}

fn taproot_prevout(script_pubkey: &ScriptBuf, value: u64) -> Vec<Utxo> {
    vec![Utxo {
        value,
        script_pubkey: script_pubkey.as_bytes().to_vec(),
    }]
}

#[test]
fn taproot_key_path_spend_verifies() {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_seckey_slice(&secp, &[0x0a; 32]).unwrap();
    let (internal_key, _) = keypair.x_only_public_key();
    let tweaked = internal_key.tap_tweak(&secp, None).0;

    let script_pubkey = Builder::new()
        .push_opcode(all::OP_PUSHNUM_1)
        .push_slice(tweaked.serialize())
        .into_script();
    let amount = 80_000u64;
    let prevouts = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: script_pubkey.clone(),
    }];

    let mut tx = spending_tx();
    let digest = SighashCache::new(&tx)
        .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
        .unwrap();
    let signing_keypair = keypair.tap_tweak(&secp, None).to_inner();
    let sig = secp.sign_schnorr_no_aux_rand(
        &Message::from_digest(digest.to_byte_array()),
        &signing_keypair,
    );
    let mut witness = Witness::new();
    witness.push(sig.serialize());
    tx.input[0].witness = witness;

    let tx_bytes = consensus::serialize(&tx);
    verify_with_flags(
        script_pubkey.as_bytes(),
        amount,
        &tx_bytes,
        Some(&taproot_prevout(&script_pubkey, amount)),
        0,
        TAPROOT_FLAGS,
    )
    .expect("valid key-path spend");

    // Flipping one committed output value changes the digest and breaks
    // the signature.
    let mut mutated = tx.clone();
    mutated.output[0].value = Amount::from_sat(90_001);
    let err = expect_script_error(verify_with_flags_detailed(
        script_pubkey.as_bytes(),
        amount,
        &consensus::serialize(&mutated),
        Some(&taproot_prevout(&script_pubkey, amount)),
        0,
        TAPROOT_FLAGS,
    ));
    assert_eq!(err, ScriptError::SchnorrSig);
}

#[test]
fn taproot_key_path_with_annex_verifies() {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_seckey_slice(&secp, &[0x0b; 32]).unwrap();
    let (internal_key, _) = keypair.x_only_public_key();
    let tweaked = internal_key.tap_tweak(&secp, None).0;

    let script_pubkey = Builder::new()
        .push_opcode(all::OP_PUSHNUM_1)
        .push_slice(tweaked.serialize())
        .into_script();
    let amount = 40_000u64;
    let prevouts = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: script_pubkey.clone(),
    }];

    let annex_bytes = vec![0x50u8, 0x11, 0x22];
    let mut tx = spending_tx();
    let digest = SighashCache::new(&tx)
        .taproot_signature_hash(
            0,
            &Prevouts::All(&prevouts),
            Some(bitcoin::sighash::Annex::new(&annex_bytes).unwrap()),
            None,
            TapSighashType::Default,
        )
        .unwrap();
    let signing_keypair = keypair.tap_tweak(&secp, None).to_inner();
    let sig = secp.sign_schnorr_no_aux_rand(
        &Message::from_digest(digest.to_byte_array()),
        &signing_keypair,
    );
    let mut witness = Witness::new();
    witness.push(sig.serialize());
    witness.push(&annex_bytes);
    tx.input[0].witness = witness;

    verify_with_flags(
        script_pubkey.as_bytes(),
        amount,
        &consensus::serialize(&tx),
        Some(&taproot_prevout(&script_pubkey, amount)),
        0,
        TAPROOT_FLAGS,
    )
    .expect("annexed key-path spend");
}

struct ScriptPathFixture {
    script_pubkey: ScriptBuf,
    leaf_script: ScriptBuf,
    control: Vec<u8>,
    leaf_hash: TapLeafHash,
}

fn script_path_fixture(secp: &Secp256k1<bitcoin::secp256k1::All>, internal_key: XOnlyPublicKey, leaf_script: ScriptBuf) -> ScriptPathFixture {
    let leaf_hash = TapLeafHash::from_script(&leaf_script, bitcoin::taproot::LeafVersion::TapScript);
    let merkle_root = TapNodeHash::from(leaf_hash);
    let (output_key, parity) = internal_key.tap_tweak(secp, Some(merkle_root));

    let mut control = Vec::with_capacity(33);
    control.push(TAPROOT_LEAF_TAPSCRIPT | u8::from(parity == bitcoin::secp256k1::Parity::Odd));
    control.extend_from_slice(&internal_key.serialize());

    let script_pubkey = Builder::new()
        .push_opcode(all::OP_PUSHNUM_1)
        .push_slice(output_key.serialize())
        .into_script();

    ScriptPathFixture {
        script_pubkey,
        leaf_script,
        control,
        leaf_hash,
    }
}

#[test]
fn tapscript_checksig_spend_verifies() {
    let secp = Secp256k1::new();
    let internal = Keypair::from_seckey_slice(&secp, &[0x0c; 32]).unwrap();
    let leaf_key = Keypair::from_seckey_slice(&secp, &[0x0d; 32]).unwrap();
    let (leaf_xonly, _) = leaf_key.x_only_public_key();

    let leaf_script = Builder::new()
        .push_slice(leaf_xonly.serialize())
        .push_opcode(all::OP_CHECKSIG)
        .into_script();
    let fixture = script_path_fixture(&secp, internal.x_only_public_key().0, leaf_script);

    let amount = 60_000u64;
    let prevouts = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: fixture.script_pubkey.clone(),
    }];

    let mut tx = spending_tx();
    let digest = SighashCache::new(&tx)
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&prevouts),
            fixture.leaf_hash,
            TapSighashType::Default,
        )
        .unwrap();
    let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(digest.to_byte_array()), &leaf_key);
    let mut witness = Witness::new();
    witness.push(sig.serialize());
    witness.push(fixture.leaf_script.as_bytes());
    witness.push(&fixture.control);
    tx.input[0].witness = witness;

    let tx_bytes = consensus::serialize(&tx);
    verify_with_flags(
        fixture.script_pubkey.as_bytes(),
        amount,
        &tx_bytes,
        Some(&taproot_prevout(&fixture.script_pubkey, amount)),
        0,
        TAPROOT_FLAGS,
    )
    .expect("valid tapscript spend");

    // Corrupting the control block breaks the merkle commitment.
    let mut bad = tx.clone();
    let mut bad_witness: Vec<Vec<u8>> = bad.input[0].witness.iter().map(|e| e.to_vec()).collect();
    bad_witness[2][1] ^= 0x01;
    bad.input[0].witness = Witness::from(bad_witness);
    let err = expect_script_error(verify_with_flags_detailed(
        fixture.script_pubkey.as_bytes(),
        amount,
        &consensus::serialize(&bad),
        Some(&taproot_prevout(&fixture.script_pubkey, amount)),
        0,
        TAPROOT_FLAGS,
    ));
    assert_eq!(err, ScriptError::WitnessProgramMismatch);
}

#[test]
fn tapscript_checksigadd_threshold_verifies() {
    let secp = Secp256k1::new();
    let internal = Keypair::from_seckey_slice(&secp, &[0x0e; 32]).unwrap();
    let key1 = Keypair::from_seckey_slice(&secp, &[0x0f; 32]).unwrap();
    let key2 = Keypair::from_seckey_slice(&secp, &[0x10; 32]).unwrap();

    // `<X1> CHECKSIG <X2> CHECKSIGADD 2 NUMEQUAL`, the multi_a pattern.
    let leaf_script = Builder::new()
        .push_slice(key1.x_only_public_key().0.serialize())
        .push_opcode(all::OP_CHECKSIG)
        .push_slice(key2.x_only_public_key().0.serialize())
        .push_opcode(all::OP_CHECKSIGADD)
        .push_opcode(all::OP_PUSHNUM_2)
        .push_opcode(all::OP_NUMEQUAL)
        .into_script();
    let fixture = script_path_fixture(&secp, internal.x_only_public_key().0, leaf_script);

    let amount = 45_000u64;
    let prevouts = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: fixture.script_pubkey.clone(),
    }];

    let mut tx = spending_tx();
    let digest = SighashCache::new(&tx)
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&prevouts),
            fixture.leaf_hash,
            TapSighashType::Default,
        )
        .unwrap();
    let message = Message::from_digest(digest.to_byte_array());
    let sig1 = secp.sign_schnorr_no_aux_rand(&message, &key1);
    let sig2 = secp.sign_schnorr_no_aux_rand(&message, &key2);

    // Stack order: sig2 below sig1, consumed by CHECKSIGADD and CHECKSIG
    // respectively.
    let mut witness = Witness::new();
    witness.push(sig2.serialize());
    witness.push(sig1.serialize());
    witness.push(fixture.leaf_script.as_bytes());
    witness.push(&fixture.control);
    tx.input[0].witness = witness;

    verify_with_flags(
        fixture.script_pubkey.as_bytes(),
        amount,
        &consensus::serialize(&tx),
        Some(&taproot_prevout(&fixture.script_pubkey, amount)),
        0,
        TAPROOT_FLAGS,
    )
    .expect("2-of-2 checksigadd spend");
}
