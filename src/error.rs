//! Script evaluation failure codes.

use core::fmt;

/// Reason a script was rejected.
///
/// Mirrors Bitcoin Core's `ScriptError_t`: every rejection path in the
/// interpreter and the signature checker sets exactly one of these. The set
/// is closed; callers match exhaustively.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// No error recorded.
    Ok,
    Unknown,
    EvalFalse,
    OpReturn,

    // Size and count ceilings.
    ScriptSize,
    PushSize,
    OpCount,
    StackSize,
    SigCount,
    PubkeyCount,

    // Failed verify opcodes.
    Verify,
    EqualVerify,
    CheckMultiSigVerify,
    CheckSigVerify,
    NumEqualVerify,

    // Structural failures.
    BadOpcode,
    DisabledOpcode,
    InvalidStackOperation,
    InvalidAltstackOperation,
    UnbalancedConditional,

    // Locktimes.
    NegativeLockTime,
    UnsatisfiedLockTime,

    // Malleability and strictness flags.
    SigHashType,
    SigDer,
    MinimalData,
    SigPushOnly,
    SigHighS,
    SigNullDummy,
    PubkeyType,
    CleanStack,
    MinimalIf,
    NullFail,

    // Softfork safety.
    DiscourageUpgradableNops,
    DiscourageUpgradableWitnessProgram,
    DiscourageUpgradableTaprootVersion,
    DiscourageOpSuccess,
    DiscourageUpgradablePubkeyType,

    // Segregated witness.
    WitnessProgramWrongLength,
    WitnessProgramWitnessEmpty,
    WitnessProgramMismatch,
    WitnessMalleated,
    WitnessMalleatedP2SH,
    WitnessUnexpected,
    WitnessPubkeyType,

    // Taproot.
    SchnorrSigSize,
    SchnorrSigHashType,
    SchnorrSig,
    TaprootWrongControlSize,
    TapscriptValidationWeight,
    TapscriptCheckMultiSig,
}

impl ScriptError {
    /// Human-readable description, matching Core's `ScriptErrorString`.
    pub fn description(self) -> &'static str {
        use ScriptError::*;

        match self {
            Ok => "No error",
            Unknown => "unknown error",
            EvalFalse => "Script evaluated without error but finished with a false/empty top stack element",
            OpReturn => "OP_RETURN was encountered",
            ScriptSize => "Script is too big",
            PushSize => "Push value size limit exceeded",
            OpCount => "Operation limit exceeded",
            StackSize => "Stack size limit exceeded",
            SigCount => "Signature count negative or greater than pubkey count",
            PubkeyCount => "Pubkey count negative or limit exceeded",
            Verify => "Script failed an OP_VERIFY operation",
            EqualVerify => "Script failed an OP_EQUALVERIFY operation",
            CheckMultiSigVerify => "Script failed an OP_CHECKMULTISIGVERIFY operation",
            CheckSigVerify => "Script failed an OP_CHECKSIGVERIFY operation",
            NumEqualVerify => "Script failed an OP_NUMEQUALVERIFY operation",
            BadOpcode => "Opcode missing or not understood",
            DisabledOpcode => "Attempted to use a disabled opcode",
            InvalidStackOperation => "Operation not valid with the current stack size",
            InvalidAltstackOperation => "Operation not valid with the current altstack size",
            UnbalancedConditional => "Invalid OP_IF construction",
            NegativeLockTime => "Negative locktime",
            UnsatisfiedLockTime => "Locktime requirement not satisfied",
            SigHashType => "Signature hash type missing or not understood",
            SigDer => "Non-canonical DER signature",
            MinimalData => "Data push larger than necessary",
            SigPushOnly => "Only push operators allowed in signatures",
            SigHighS => "Non-canonical signature: S value is unnecessarily high",
            SigNullDummy => "Dummy CHECKMULTISIG argument must be zero",
            PubkeyType => "Public key is neither compressed or uncompressed",
            CleanStack => "Stack size must be exactly one after execution",
            MinimalIf => "OP_IF/NOTIF argument must be minimal",
            NullFail => "Signature must be zero for failed CHECK(MULTI)SIG operation",
            DiscourageUpgradableNops => "NOPx reserved for soft-fork upgrades",
            DiscourageUpgradableWitnessProgram => "Witness version reserved for soft-fork upgrades",
            DiscourageUpgradableTaprootVersion => "Taproot version reserved for soft-fork upgrades",
            DiscourageOpSuccess => "OP_SUCCESSx reserved for soft-fork upgrades",
            DiscourageUpgradablePubkeyType => "Public key version reserved for soft-fork upgrades",
            WitnessProgramWrongLength => "Witness program has incorrect length",
            WitnessProgramWitnessEmpty => "Witness program was passed an empty witness",
            WitnessProgramMismatch => "Witness program hash mismatch",
            WitnessMalleated => "Witness requires empty scriptSig",
            WitnessMalleatedP2SH => "Witness requires only-redeemscript scriptSig",
            WitnessUnexpected => "Witness provided for non-witness script",
            WitnessPubkeyType => "Using non-compressed keys in segwit",
            SchnorrSigSize => "Invalid Schnorr signature size",
            SchnorrSigHashType => "Invalid Schnorr signature hash type",
            SchnorrSig => "Invalid Schnorr signature",
            TaprootWrongControlSize => "Invalid Taproot control block size",
            TapscriptValidationWeight => "Too much signature validation relative to witness weight",
            TapscriptCheckMultiSig => "OP_CHECKMULTISIG(VERIFY) is not available in tapscript",
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScriptError {}
