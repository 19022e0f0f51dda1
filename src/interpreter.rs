//! The script virtual machine.
//!
//! [`verify_script`] is the public entry point: it evaluates scriptSig and
//! scriptPubKey sequentially on one operand stack, then dispatches any
//! witness program (v0 P2WPKH/P2WSH, v1 taproot key path or tapscript leaf)
//! and any P2SH redeem script, under a read-only [`ScriptFlags`] bitmask
//! and a borrowed [`SignatureChecker`]. Every rejection is a
//! [`ScriptError`]; the first violated invariant wins and evaluation stops.
//! The scripting language has no backward jumps, so the fixed op-count and
//! stack ceilings bound every execution.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use bitcoin::{
    hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash},
    opcodes::{all, Opcode},
    taproot::{
        TAPROOT_ANNEX_PREFIX, TAPROOT_CONTROL_BASE_SIZE, TAPROOT_CONTROL_MAX_SIZE,
        TAPROOT_CONTROL_NODE_SIZE, TAPROOT_LEAF_MASK, TAPROOT_LEAF_TAPSCRIPT,
    },
    Witness,
};

use crate::{
    checker::{SignatureChecker, TapExecData, SEQUENCE_LOCKTIME_DISABLE_FLAG},
    error::ScriptError,
    num,
    script::{Chunk, Script, MAX_PUBKEYS_PER_MULTISIG},
    sighash::{tap_branch_hash, tap_leaf_hash, tap_tweak_hash, SigVersion},
    ScriptFlags, VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY, VERIFY_CLEANSTACK,
    VERIFY_DISCOURAGE_OP_SUCCESS, VERIFY_DISCOURAGE_UPGRADABLE_NOPS,
    VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE, VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION,
    VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM, VERIFY_MINIMALDATA, VERIFY_MINIMALIF,
    VERIFY_NULLDUMMY, VERIFY_NULLFAIL, VERIFY_P2SH, VERIFY_SIGPUSHONLY, VERIFY_TAPROOT,
    VERIFY_WITNESS,
};

/// Combined stack plus altstack item ceiling.
pub const MAX_STACK_SIZE: usize = 1000;
/// Serialized script size ceiling (legacy and segwit v0 only).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Stack element size ceiling.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Executed non-push opcode ceiling (legacy and segwit v0 only).
pub const MAX_OPS_PER_SCRIPT: usize = 201;

const VALIDATION_WEIGHT_PER_SIGOP_PASSED: i64 = 50;
const VALIDATION_WEIGHT_OFFSET: i64 = 50;

/// The operand stack. Items are plain byte strings; booleans and numbers
/// are interpretations, not representations.
#[derive(Debug, Default, Clone)]
pub struct Stack {
    items: Vec<Vec<u8>>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Vec<u8>) -> Result<(), ScriptError> {
        if item.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        self.items.push(item);
        Ok(())
    }

    pub fn push_bool(&mut self, value: bool) -> Result<(), ScriptError> {
        self.push(if value { vec![1] } else { Vec::new() })
    }

    pub fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.items.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    /// Element `depth` entries below the top.
    pub fn peek(&self, depth: usize) -> Result<&[u8], ScriptError> {
        if depth >= self.items.len() {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(&self.items[self.items.len() - 1 - depth])
    }

    fn require(&self, count: usize) -> Result<(), ScriptError> {
        if self.items.len() < count {
            Err(ScriptError::InvalidStackOperation)
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    fn top_is_true(&self) -> bool {
        self.items.last().map_or(false, |item| cast_to_bool(item))
    }
}

/// Empty or all zero bytes is false, with the negative-zero exception
/// (a lone 0x80 in the final position).
pub fn cast_to_bool(item: &[u8]) -> bool {
    for (i, &byte) in item.iter().enumerate() {
        if byte != 0 {
            if i == item.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

/// Verifies that `script_sig`, `witness` and the flag set satisfy
/// `script_pubkey` for the input bound into `checker`.
pub fn verify_script(
    script_sig: &Script,
    script_pubkey: &Script,
    witness: &Witness,
    flags: ScriptFlags,
    checker: &mut dyn SignatureChecker,
) -> Result<(), ScriptError> {
    Interpreter::new(flags, checker).verify(script_sig, script_pubkey, witness)
}

/// Execution state scoped to one `verify_script` call.
pub struct Interpreter<'a> {
    flags: ScriptFlags,
    checker: &'a mut dyn SignatureChecker,
    stack: Stack,
    cond_stack: Vec<bool>,
    op_count: usize,
    exec_data: TapExecData,
    validation_weight_left: Option<i64>,
}

impl<'a> Interpreter<'a> {
    pub fn new(flags: ScriptFlags, checker: &'a mut dyn SignatureChecker) -> Self {
        Self {
            flags,
            checker,
            stack: Stack::new(),
            cond_stack: Vec::new(),
            op_count: 0,
            exec_data: TapExecData::default(),
            validation_weight_left: None,
        }
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn verify(
        &mut self,
        script_sig: &Script,
        script_pubkey: &Script,
        witness: &Witness,
    ) -> Result<(), ScriptError> {
        let flags = self.flags.bits();

        if flags & VERIFY_SIGPUSHONLY != 0 && !script_sig.is_push_only() {
            return Err(ScriptError::SigPushOnly);
        }

        self.eval(script_sig, SigVersion::Base)?;
        let p2sh_stack = if flags & VERIFY_P2SH != 0 && script_pubkey.is_p2sh() {
            Some(self.stack.clone())
        } else {
            None
        };
        self.eval(script_pubkey, SigVersion::Base)?;
        if !self.stack.top_is_true() {
            return Err(ScriptError::EvalFalse);
        }

        let mut had_witness = false;
        if flags & VERIFY_WITNESS != 0 {
            if let Some((version, program)) = script_pubkey.witness_program() {
                had_witness = true;
                // Anything in scriptSig would be malleable.
                if !script_sig.is_empty() {
                    return Err(ScriptError::WitnessMalleated);
                }
                let program = program.to_vec();
                self.execute_witness_program(version, &program, witness, false)?;
                self.stack = Stack {
                    items: vec![vec![1]],
                };
            }
        }

        if let Some(stack) = p2sh_stack {
            if !script_sig.is_push_only() {
                return Err(ScriptError::SigPushOnly);
            }
            self.stack = stack;
            if self.stack.is_empty() {
                return Err(ScriptError::EvalFalse);
            }
            let redeem_bytes = self.stack.pop()?;
            let redeem_script = Script::parse(&redeem_bytes);
            self.eval(&redeem_script, SigVersion::Base)?;
            if !self.stack.top_is_true() {
                return Err(ScriptError::EvalFalse);
            }

            if flags & VERIFY_WITNESS != 0 {
                if let Some((version, program)) = redeem_script.witness_program() {
                    had_witness = true;
                    if *script_sig != Script::single_push(&redeem_bytes)? {
                        return Err(ScriptError::WitnessMalleatedP2SH);
                    }
                    let program = program.to_vec();
                    self.execute_witness_program(version, &program, witness, true)?;
                    self.stack = Stack {
                        items: vec![vec![1]],
                    };
                }
            }
        }

        if flags & VERIFY_CLEANSTACK != 0 && self.stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }

        if flags & VERIFY_WITNESS != 0 && !had_witness && !witness.is_empty() {
            return Err(ScriptError::WitnessUnexpected);
        }

        Ok(())
    }

    /// Runs one script against the current stack.
    pub fn eval(&mut self, script: &Script, sig_version: SigVersion) -> Result<(), ScriptError> {
        let legacy_limits =
            matches!(sig_version, SigVersion::Base | SigVersion::WitnessV0);
        if legacy_limits && script.serialized_len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptSize);
        }

        self.cond_stack.clear();
        self.op_count = 0;
        let mut altstack: Vec<Vec<u8>> = Vec::new();
        // First chunk of the signing scriptCode; moved past each executed
        // OP_CODESEPARATOR.
        let mut code_separator = 0usize;

        for (index, chunk) in script.chunks().iter().enumerate() {
            let executing = self.cond_stack.iter().all(|&branch| branch);

            match chunk {
                Chunk::Push(push) => {
                    if push.data().len() > MAX_SCRIPT_ELEMENT_SIZE {
                        return Err(ScriptError::PushSize);
                    }
                    if executing {
                        if self.flags.bits() & VERIFY_MINIMALDATA != 0 && !push.is_minimal() {
                            return Err(ScriptError::MinimalData);
                        }
                        self.stack.push(push.data().to_vec())?;
                    }
                }
                Chunk::Op(opcode) => {
                    let op = Opcode::from(*opcode);

                    if legacy_limits {
                        // Pushes and OP_RESERVED stay under the ceiling.
                        if *opcode > all::OP_PUSHNUM_16.to_u8() {
                            self.op_count += 1;
                            if self.op_count > MAX_OPS_PER_SCRIPT {
                                return Err(ScriptError::OpCount);
                            }
                        }
                        if is_disabled(op) {
                            return Err(ScriptError::DisabledOpcode);
                        }
                    }

                    if matches!(op, all::OP_VERIF | all::OP_VERNOTIF) {
                        return Err(ScriptError::BadOpcode);
                    }

                    if matches!(op, all::OP_IF | all::OP_NOTIF | all::OP_ELSE | all::OP_ENDIF) {
                        self.handle_conditional(op, executing, sig_version)?;
                    } else if executing {
                        self.execute_opcode(
                            op,
                            index,
                            script,
                            &mut code_separator,
                            &mut altstack,
                            sig_version,
                        )?;
                    }
                }
            }

            if self.stack.len() + altstack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
        }

        if script.is_truncated() {
            return Err(ScriptError::BadOpcode);
        }
        if !self.cond_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn handle_conditional(
        &mut self,
        op: Opcode,
        executing: bool,
        sig_version: SigVersion,
    ) -> Result<(), ScriptError> {
        use all::*;

        match op {
            OP_IF | OP_NOTIF => {
                let mut value = false;
                if executing {
                    let condition = self
                        .stack
                        .pop()
                        .map_err(|_| ScriptError::UnbalancedConditional)?;
                    let minimal_required = match sig_version {
                        SigVersion::Tapscript => true,
                        SigVersion::WitnessV0 => self.flags.bits() & VERIFY_MINIMALIF != 0,
                        _ => false,
                    };
                    if minimal_required
                        && !(condition.is_empty() || (condition.len() == 1 && condition[0] == 1))
                    {
                        return Err(ScriptError::MinimalIf);
                    }
                    value = cast_to_bool(&condition);
                    if op == OP_NOTIF {
                        value = !value;
                    }
                }
                self.cond_stack.push(value);
            }
            OP_ELSE => {
                let top = self
                    .cond_stack
                    .last_mut()
                    .ok_or(ScriptError::UnbalancedConditional)?;
                *top = !*top;
            }
            _ => {
                if self.cond_stack.pop().is_none() {
                    return Err(ScriptError::UnbalancedConditional);
                }
            }
        }
        Ok(())
    }

    fn execute_opcode(
        &mut self,
        op: Opcode,
        chunk_index: usize,
        script: &Script,
        code_separator: &mut usize,
        altstack: &mut Vec<Vec<u8>>,
        sig_version: SigVersion,
    ) -> Result<(), ScriptError> {
        use all::*;

        let opcode = op.to_u8();
        let require_minimal = self.flags.bits() & VERIFY_MINIMALDATA != 0;

        if opcode >= OP_PUSHNUM_1.to_u8() && opcode <= OP_PUSHNUM_16.to_u8() {
            let value = i64::from(opcode - OP_PUSHNUM_1.to_u8() + 1);
            return self.stack.push(num::encode(value));
        }

        match op {
            OP_PUSHNUM_NEG1 => self.stack.push(num::encode(-1))?,

            OP_NOP => {}
            OP_NOP1 | OP_NOP4 | OP_NOP5 | OP_NOP6 | OP_NOP7 | OP_NOP8 | OP_NOP9 | OP_NOP10 => {
                if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_NOPS != 0 {
                    return Err(ScriptError::DiscourageUpgradableNops);
                }
            }

            OP_CLTV => {
                if self.flags.bits() & VERIFY_CHECKLOCKTIMEVERIFY != 0 {
                    // 5-byte operand: nLockTime can exceed the 4-byte
                    // arithmetic range.
                    let lock_time =
                        num::decode(self.stack.peek(0)?, require_minimal, num::EXTENDED_MAX_LEN)?;
                    if lock_time < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    if !self.checker.check_lock_time(lock_time) {
                        return Err(ScriptError::UnsatisfiedLockTime);
                    }
                }
            }
            OP_CSV => {
                if self.flags.bits() & VERIFY_CHECKSEQUENCEVERIFY != 0 {
                    let sequence =
                        num::decode(self.stack.peek(0)?, require_minimal, num::EXTENDED_MAX_LEN)?;
                    if sequence < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    // An operand with the disable bit set is a NOP, kept
                    // for upgrades.
                    if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 == 0
                        && !self.checker.check_sequence(sequence)
                    {
                        return Err(ScriptError::UnsatisfiedLockTime);
                    }
                }
            }

            OP_TOALTSTACK => {
                let item = self.stack.pop()?;
                altstack.push(item);
            }
            OP_FROMALTSTACK => {
                let item = altstack
                    .pop()
                    .ok_or(ScriptError::InvalidAltstackOperation)?;
                self.stack.push(item)?;
            }

            OP_2DROP => {
                self.stack.require(2)?;
                self.stack.pop()?;
                self.stack.pop()?;
            }
            OP_2DUP => {
                self.stack.require(2)?;
                let first = self.stack.peek(1)?.to_vec();
                let second = self.stack.peek(0)?.to_vec();
                self.stack.push(first)?;
                self.stack.push(second)?;
            }
            OP_3DUP => {
                self.stack.require(3)?;
                let first = self.stack.peek(2)?.to_vec();
                let second = self.stack.peek(1)?.to_vec();
                let third = self.stack.peek(0)?.to_vec();
                self.stack.push(first)?;
                self.stack.push(second)?;
                self.stack.push(third)?;
            }
            OP_2OVER => {
                self.stack.require(4)?;
                let first = self.stack.peek(3)?.to_vec();
                let second = self.stack.peek(2)?.to_vec();
                self.stack.push(first)?;
                self.stack.push(second)?;
            }
            OP_2ROT => {
                self.stack.require(6)?;
                let len = self.stack.len();
                let moved: Vec<Vec<u8>> = self.stack.items.drain(len - 6..len - 4).collect();
                for item in moved {
                    self.stack.push(item)?;
                }
            }
            OP_2SWAP => {
                self.stack.require(4)?;
                let len = self.stack.len();
                self.stack.items.swap(len - 4, len - 2);
                self.stack.items.swap(len - 3, len - 1);
            }
            OP_IFDUP => {
                let top = self.stack.peek(0)?.to_vec();
                if cast_to_bool(&top) {
                    self.stack.push(top)?;
                }
            }
            OP_DEPTH => {
                let depth = num::encode(self.stack.len() as i64);
                self.stack.push(depth)?;
            }
            OP_DROP => {
                self.stack.pop()?;
            }
            OP_DUP => {
                let top = self.stack.peek(0)?.to_vec();
                self.stack.push(top)?;
            }
            OP_NIP => {
                self.stack.require(2)?;
                let len = self.stack.len();
                self.stack.items.remove(len - 2);
            }
            OP_OVER => {
                let item = self.stack.peek(1)?.to_vec();
                self.stack.push(item)?;
            }
            OP_PICK | OP_ROLL => {
                let depth = num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                if depth < 0 || depth as usize >= self.stack.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let position = self.stack.len() - 1 - depth as usize;
                let item = if op == OP_ROLL {
                    self.stack.items.remove(position)
                } else {
                    self.stack.items[position].clone()
                };
                self.stack.push(item)?;
            }
            OP_ROT => {
                self.stack.require(3)?;
                let len = self.stack.len();
                self.stack.items.swap(len - 3, len - 2);
                self.stack.items.swap(len - 2, len - 1);
            }
            OP_SWAP => {
                self.stack.require(2)?;
                let len = self.stack.len();
                self.stack.items.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                self.stack.require(2)?;
                let len = self.stack.len();
                let top = self.stack.items[len - 1].clone();
                self.stack.items.insert(len - 2, top);
            }

            OP_SIZE => {
                let size = num::encode(self.stack.peek(0)?.len() as i64);
                self.stack.push(size)?;
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                self.stack.require(2)?;
                let a = self.stack.pop()?;
                let b = self.stack.pop()?;
                self.stack.push_bool(a == b)?;
                if op == OP_EQUALVERIFY {
                    self.verify_top(ScriptError::EqualVerify)?;
                }
            }
            OP_VERIFY => self.verify_top(ScriptError::Verify)?,
            OP_RETURN => return Err(ScriptError::OpReturn),

            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let operand =
                    num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                let result = match op {
                    OP_1ADD => operand + 1,
                    OP_1SUB => operand - 1,
                    OP_NEGATE => -operand,
                    OP_ABS => operand.abs(),
                    OP_NOT => i64::from(operand == 0),
                    _ => i64::from(operand != 0),
                };
                self.stack.push(num::encode(result))?;
            }
            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                let b = num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                let a = num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                let result = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => i64::from(a != 0 && b != 0),
                    OP_BOOLOR => i64::from(a != 0 || b != 0),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(a == b),
                    OP_NUMNOTEQUAL => i64::from(a != b),
                    OP_LESSTHAN => i64::from(a < b),
                    OP_GREATERTHAN => i64::from(a > b),
                    OP_LESSTHANOREQUAL => i64::from(a <= b),
                    OP_GREATERTHANOREQUAL => i64::from(a >= b),
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                self.stack.push(num::encode(result))?;
                if op == OP_NUMEQUALVERIFY {
                    self.verify_top(ScriptError::NumEqualVerify)?;
                }
            }
            OP_WITHIN => {
                let max = num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                let min = num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                let value =
                    num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                self.stack.push_bool(value >= min && value < max)?;
            }

            OP_RIPEMD160 => {
                let data = self.stack.pop()?;
                self.stack
                    .push(ripemd160::Hash::hash(&data).to_byte_array().to_vec())?;
            }
            OP_SHA1 => {
                let data = self.stack.pop()?;
                self.stack
                    .push(sha1::Hash::hash(&data).to_byte_array().to_vec())?;
            }
            OP_SHA256 => {
                let data = self.stack.pop()?;
                self.stack
                    .push(sha256::Hash::hash(&data).to_byte_array().to_vec())?;
            }
            OP_HASH160 => {
                let data = self.stack.pop()?;
                self.stack
                    .push(hash160::Hash::hash(&data).to_byte_array().to_vec())?;
            }
            OP_HASH256 => {
                let data = self.stack.pop()?;
                self.stack
                    .push(sha256d::Hash::hash(&data).to_byte_array().to_vec())?;
            }

            OP_CODESEPARATOR => {
                *code_separator = chunk_index + 1;
                if sig_version == SigVersion::Tapscript {
                    self.exec_data.codeseparator_pos = chunk_index as u32;
                }
            }

            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                self.stack.require(2)?;
                let pubkey = self.stack.pop()?;
                let sig = self.stack.pop()?;
                let success =
                    self.eval_checksig(&sig, &pubkey, script, *code_separator, sig_version)?;
                self.stack.push_bool(success)?;
                if op == OP_CHECKSIGVERIFY {
                    self.verify_top(ScriptError::CheckSigVerify)?;
                }
            }
            OP_CHECKSIGADD => {
                if sig_version != SigVersion::Tapscript {
                    return Err(ScriptError::BadOpcode);
                }
                self.stack.require(3)?;
                let pubkey = self.stack.pop()?;
                let accumulator =
                    num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
                let sig = self.stack.pop()?;
                let success =
                    self.eval_checksig(&sig, &pubkey, script, *code_separator, sig_version)?;
                self.stack
                    .push(num::encode(accumulator + i64::from(success)))?;
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                self.execute_checkmultisig(script, *code_separator, sig_version)?;
                if op == OP_CHECKMULTISIGVERIFY {
                    self.verify_top(ScriptError::CheckMultiSigVerify)?;
                }
            }

            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn verify_top(&mut self, error: ScriptError) -> Result<(), ScriptError> {
        let value = self.stack.pop()?;
        if !cast_to_bool(&value) {
            return Err(error);
        }
        Ok(())
    }

    fn eval_checksig(
        &mut self,
        sig: &[u8],
        pubkey: &[u8],
        script: &Script,
        code_separator: usize,
        sig_version: SigVersion,
    ) -> Result<bool, ScriptError> {
        match sig_version {
            SigVersion::Base | SigVersion::WitnessV0 => {
                let mut script_code = script.script_code(code_separator);
                // Only legacy scripts drop the signature from the code
                // they commit to.
                if sig_version == SigVersion::Base {
                    let sig_push = Script::single_push(sig)?;
                    script_code = script_code.find_and_delete(&sig_push).0;
                }
                self.check_signature_encoding(sig)?;
                self.check_pubkey_encoding(pubkey, sig_version)?;
                let success =
                    self.checker
                        .check_ecdsa_signature(sig, pubkey, &script_code, sig_version);
                if !success && self.flags.bits() & VERIFY_NULLFAIL != 0 && !sig.is_empty() {
                    return Err(ScriptError::NullFail);
                }
                Ok(success)
            }
            SigVersion::Tapscript => self.eval_checksig_tapscript(sig, pubkey),
            SigVersion::Taproot => Err(ScriptError::BadOpcode),
        }
    }

    fn eval_checksig_tapscript(
        &mut self,
        sig: &[u8],
        pubkey: &[u8],
    ) -> Result<bool, ScriptError> {
        let success = !sig.is_empty();
        if success {
            // The sigops-to-witness-size ratio test.
            self.consume_validation_weight()?;
        }

        if pubkey.is_empty() {
            return Err(ScriptError::PubkeyType);
        } else if pubkey.len() == 32 {
            if success {
                let mut key = [0u8; 32];
                key.copy_from_slice(pubkey);
                let valid = self.checker.check_schnorr_signature(
                    sig,
                    &key,
                    SigVersion::Tapscript,
                    &self.exec_data,
                )?;
                if !valid {
                    return Err(ScriptError::SchnorrSig);
                }
            }
        } else if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE != 0 {
            // Unknown pubkey types succeed with any non-empty signature,
            // reserved for future soft forks.
            return Err(ScriptError::DiscourageUpgradablePubkeyType);
        }

        Ok(success)
    }

    fn execute_checkmultisig(
        &mut self,
        script: &Script,
        code_separator: usize,
        sig_version: SigVersion,
    ) -> Result<(), ScriptError> {
        if sig_version == SigVersion::Tapscript {
            return Err(ScriptError::TapscriptCheckMultiSig);
        }
        let require_minimal = self.flags.bits() & VERIFY_MINIMALDATA != 0;

        let keys_count =
            num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
        if keys_count < 0 || keys_count > MAX_PUBKEYS_PER_MULTISIG as i64 {
            return Err(ScriptError::PubkeyCount);
        }
        let keys_count = keys_count as usize;
        self.op_count += keys_count;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            return Err(ScriptError::OpCount);
        }

        let mut keys = Vec::with_capacity(keys_count);
        for _ in 0..keys_count {
            keys.push(self.stack.pop()?);
        }

        let sigs_count =
            num::decode(&self.stack.pop()?, require_minimal, num::DEFAULT_MAX_LEN)?;
        if sigs_count < 0 || sigs_count > keys_count as i64 {
            return Err(ScriptError::SigCount);
        }
        let sigs_count = sigs_count as usize;
        let mut sigs = Vec::with_capacity(sigs_count);
        for _ in 0..sigs_count {
            sigs.push(self.stack.pop()?);
        }

        let mut script_code = script.script_code(code_separator);
        if sig_version == SigVersion::Base {
            for sig in &sigs {
                let sig_push = Script::single_push(sig)?;
                script_code = script_code.find_and_delete(&sig_push).0;
            }
        }

        // Signatures must appear in the same relative order as their keys;
        // scan both lists top-down, spending a key per attempt.
        let mut success = true;
        let mut isig = 0usize;
        let mut ikey = 0usize;
        while success && isig < sigs.len() {
            self.check_signature_encoding(&sigs[isig])?;
            self.check_pubkey_encoding(&keys[ikey], sig_version)?;
            let ok = self.checker.check_ecdsa_signature(
                &sigs[isig],
                &keys[ikey],
                &script_code,
                sig_version,
            );
            if ok {
                isig += 1;
            }
            ikey += 1;
            if sigs.len() - isig > keys.len() - ikey {
                success = false;
            }
        }

        // On failure every signature must be the empty placeholder.
        if !success
            && self.flags.bits() & VERIFY_NULLFAIL != 0
            && sigs.iter().any(|sig| !sig.is_empty())
        {
            return Err(ScriptError::NullFail);
        }

        // The historical extra stack item consumed by CHECKMULTISIG.
        let dummy = self.stack.pop()?;
        if self.flags.bits() & VERIFY_NULLDUMMY != 0 && !dummy.is_empty() {
            return Err(ScriptError::SigNullDummy);
        }

        self.stack.push_bool(success)
    }

    fn check_signature_encoding(&self, sig: &[u8]) -> Result<(), ScriptError> {
        use crate::{VERIFY_DERSIG, VERIFY_LOW_S, VERIFY_STRICTENC};

        if sig.is_empty() {
            return Ok(());
        }
        let flags = self.flags.bits();
        if flags & (VERIFY_DERSIG | VERIFY_LOW_S | VERIFY_STRICTENC) != 0
            && !crate::checker::is_valid_signature_encoding(sig)
        {
            return Err(ScriptError::SigDer);
        }
        if flags & VERIFY_LOW_S != 0 && !crate::checker::is_low_der_signature(sig) {
            return Err(ScriptError::SigHighS);
        }
        if flags & VERIFY_STRICTENC != 0 && !crate::checker::is_defined_hashtype_signature(sig) {
            return Err(ScriptError::SigHashType);
        }
        Ok(())
    }

    fn check_pubkey_encoding(
        &self,
        pubkey: &[u8],
        sig_version: SigVersion,
    ) -> Result<(), ScriptError> {
        use crate::{VERIFY_STRICTENC, VERIFY_WITNESS_PUBKEYTYPE};

        let flags = self.flags.bits();
        if flags & VERIFY_STRICTENC != 0 && !crate::checker::is_valid_pubkey_encoding(pubkey) {
            return Err(ScriptError::PubkeyType);
        }
        if sig_version == SigVersion::WitnessV0
            && flags & VERIFY_WITNESS_PUBKEYTYPE != 0
            && !crate::checker::is_compressed_pubkey(pubkey)
        {
            return Err(ScriptError::WitnessPubkeyType);
        }
        Ok(())
    }

    fn consume_validation_weight(&mut self) -> Result<(), ScriptError> {
        let weight = self
            .validation_weight_left
            .as_mut()
            .ok_or(ScriptError::Unknown)?;
        *weight -= VALIDATION_WEIGHT_PER_SIGOP_PASSED;
        if *weight < 0 {
            return Err(ScriptError::TapscriptValidationWeight);
        }
        Ok(())
    }

    fn execute_witness_program(
        &mut self,
        version: u8,
        program: &[u8],
        witness: &Witness,
        is_p2sh: bool,
    ) -> Result<(), ScriptError> {
        let mut items: Vec<Vec<u8>> = witness.iter().map(|elem| elem.to_vec()).collect();

        if version == 0 {
            match program.len() {
                32 => {
                    // P2WSH: last element reveals the script committed to
                    // by the program.
                    if items.is_empty() {
                        return Err(ScriptError::WitnessProgramWitnessEmpty);
                    }
                    let script_bytes = items.pop().expect("non-empty witness");
                    if sha256::Hash::hash(&script_bytes).to_byte_array().as_slice() != program {
                        return Err(ScriptError::WitnessProgramMismatch);
                    }
                    let witness_script = Script::parse(&script_bytes);
                    self.execute_witness_script(items, &witness_script, SigVersion::WitnessV0)
                }
                20 => {
                    // P2WPKH: implicit P2PKH over the program.
                    if items.len() != 2 {
                        return Err(ScriptError::WitnessProgramMismatch);
                    }
                    let mut implied = Script::new();
                    implied.append_opcode(all::OP_DUP);
                    implied.append_opcode(all::OP_HASH160);
                    implied.append_data(program)?;
                    implied.append_opcode(all::OP_EQUALVERIFY);
                    implied.append_opcode(all::OP_CHECKSIG);
                    self.execute_witness_script(items, &implied, SigVersion::WitnessV0)
                }
                _ => Err(ScriptError::WitnessProgramWrongLength),
            }
        } else if version == 1 && program.len() == 32 && !is_p2sh {
            if self.flags.bits() & VERIFY_TAPROOT == 0 {
                return Ok(());
            }
            self.execute_taproot_program(program, items)
        } else if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM != 0 {
            Err(ScriptError::DiscourageUpgradableWitnessProgram)
        } else {
            Ok(())
        }
    }

    fn execute_taproot_program(
        &mut self,
        program: &[u8],
        mut items: Vec<Vec<u8>>,
    ) -> Result<(), ScriptError> {
        if items.is_empty() {
            return Err(ScriptError::WitnessProgramWitnessEmpty);
        }

        // The validation weight budget is based on the serialized size of
        // the complete witness, annex and control block included.
        let witness_weight = serialized_witness_size(&items);

        self.exec_data = TapExecData::default();
        if items.len() >= 2 {
            let last = items.last().expect("len checked");
            if !last.is_empty() && last[0] == TAPROOT_ANNEX_PREFIX {
                self.exec_data.annex = items.pop();
            }
        }

        if items.len() == 1 {
            // Key path: the single element is a signature by the output
            // key itself.
            let signature = &items[0];
            let mut output_key = [0u8; 32];
            output_key.copy_from_slice(program);
            let valid = self.checker.check_schnorr_signature(
                signature,
                &output_key,
                SigVersion::Taproot,
                &self.exec_data,
            )?;
            if !valid {
                return Err(ScriptError::SchnorrSig);
            }
            return Ok(());
        }

        // Script path: control block on top, leaf script below it.
        let control = items.pop().expect("len checked");
        let script_bytes = items.pop().expect("len checked");
        if control.len() < TAPROOT_CONTROL_BASE_SIZE
            || control.len() > TAPROOT_CONTROL_MAX_SIZE
            || (control.len() - TAPROOT_CONTROL_BASE_SIZE) % TAPROOT_CONTROL_NODE_SIZE != 0
        {
            return Err(ScriptError::TaprootWrongControlSize);
        }

        let leaf_version = control[0] & TAPROOT_LEAF_MASK;
        let leaf_hash = tap_leaf_hash(leaf_version, &script_bytes);

        // Merkle walk up the control block path, then the tweak equation.
        let mut node = leaf_hash;
        for sibling in control[TAPROOT_CONTROL_BASE_SIZE..].chunks_exact(TAPROOT_CONTROL_NODE_SIZE)
        {
            let mut branch = [0u8; 32];
            branch.copy_from_slice(sibling);
            node = tap_branch_hash(&node, &branch);
        }
        let mut internal_key = [0u8; 32];
        internal_key.copy_from_slice(&control[1..TAPROOT_CONTROL_BASE_SIZE]);
        let tweak = tap_tweak_hash(&internal_key, Some(&node));
        let mut output_key = [0u8; 32];
        output_key.copy_from_slice(program);
        if !self
            .checker
            .check_taproot_tweak(&internal_key, &tweak, &output_key, control[0] & 1 == 1)
        {
            return Err(ScriptError::WitnessProgramMismatch);
        }
        self.exec_data.tapleaf_hash = Some(leaf_hash);

        if leaf_version == TAPROOT_LEAF_TAPSCRIPT {
            let leaf_script = Script::parse(&script_bytes);
            // OP_SUCCESSx overrides everything else in the leaf.
            if leaf_script.contains_op_success() {
                if self.flags.bits() & VERIFY_DISCOURAGE_OP_SUCCESS != 0 {
                    return Err(ScriptError::DiscourageOpSuccess);
                }
                return Ok(());
            }
            if leaf_script.is_truncated() {
                return Err(ScriptError::BadOpcode);
            }
            self.validation_weight_left = Some(witness_weight + VALIDATION_WEIGHT_OFFSET);
            self.execute_witness_script(items, &leaf_script, SigVersion::Tapscript)
        } else if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION != 0 {
            Err(ScriptError::DiscourageUpgradableTaprootVersion)
        } else {
            Ok(())
        }
    }

    fn execute_witness_script(
        &mut self,
        items: Vec<Vec<u8>>,
        script: &Script,
        sig_version: SigVersion,
    ) -> Result<(), ScriptError> {
        if sig_version == SigVersion::Tapscript && items.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
        for item in &items {
            if item.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
        }
        self.stack = Stack { items };
        self.eval(script, sig_version)?;
        // Witness scripts implicitly require clean-stack behavior.
        if self.stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }
        if !self.stack.top_is_true() {
            return Err(ScriptError::EvalFalse);
        }
        Ok(())
    }
}

fn is_disabled(op: Opcode) -> bool {
    use all::*;

    matches!(
        op,
        OP_CAT
            | OP_SUBSTR
            | OP_LEFT
            | OP_RIGHT
            | OP_INVERT
            | OP_AND
            | OP_OR
            | OP_XOR
            | OP_2MUL
            | OP_2DIV
            | OP_MUL
            | OP_DIV
            | OP_MOD
            | OP_LSHIFT
            | OP_RSHIFT
    )
}

/// Serialized size of the witness stack, the base of the tapscript
/// validation weight budget.
fn serialized_witness_size(items: &[Vec<u8>]) -> i64 {
    let mut total = compact_size_len(items.len() as u64);
    for item in items {
        total += compact_size_len(item.len() as u64) + item.len() as u64;
    }
    total as i64
}

fn compact_size_len(value: u64) -> u64 {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::NullSignatureChecker;
    use crate::{ScriptFlags, VERIFY_MINIMALDATA, VERIFY_NONE, VERIFY_P2SH};

    fn eval_bytes(bytes: &[u8], flags: u32) -> Result<Stack, ScriptError> {
        let mut checker = NullSignatureChecker;
        let flags = ScriptFlags::from_bits(flags).unwrap();
        let mut interpreter = Interpreter::new(flags, &mut checker);
        interpreter.eval(&Script::parse(bytes), SigVersion::Base)?;
        Ok(interpreter.stack().clone())
    }

    #[test]
    fn arithmetic_and_comparison() {
        // 2 3 ADD 5 NUMEQUAL
        let stack = eval_bytes(&[0x52, 0x53, 0x93, 0x55, 0x9c], VERIFY_NONE).unwrap();
        assert_eq!(stack.items(), [vec![1]]);

        // 5 1SUB 4 EQUALVERIFY fails on the empty stack afterwards.
        let err = eval_bytes(&[0x55, 0x8c, 0x54, 0x88, 0x69], VERIFY_NONE).unwrap_err();
        assert_eq!(err, ScriptError::InvalidStackOperation);
    }

    #[test]
    fn negative_zero_is_false() {
        assert!(!cast_to_bool(&[0x80]));
        assert!(!cast_to_bool(&[0x00, 0x00]));
        assert!(cast_to_bool(&[0x00, 0x80, 0x00]));
        assert!(cast_to_bool(&[0x01]));
    }

    #[test]
    fn conditionals_take_branches() {
        // 1 IF 2 ELSE 3 ENDIF
        let stack = eval_bytes(&[0x51, 0x63, 0x52, 0x67, 0x53, 0x68], VERIFY_NONE).unwrap();
        assert_eq!(stack.items(), [num::encode(2)]);

        // 0 IF 2 ELSE 3 ENDIF
        let stack = eval_bytes(&[0x00, 0x63, 0x52, 0x67, 0x53, 0x68], VERIFY_NONE).unwrap();
        assert_eq!(stack.items(), [num::encode(3)]);

        // Unterminated IF.
        let err = eval_bytes(&[0x51, 0x63], VERIFY_NONE).unwrap_err();
        assert_eq!(err, ScriptError::UnbalancedConditional);

        // ELSE without IF.
        let err = eval_bytes(&[0x67], VERIFY_NONE).unwrap_err();
        assert_eq!(err, ScriptError::UnbalancedConditional);
    }

    #[test]
    fn skipped_branches_still_enforce_structure() {
        // 0 IF CAT ENDIF 1: disabled opcode fails even unexecuted.
        let err = eval_bytes(&[0x00, 0x63, 0x7e, 0x68, 0x51], VERIFY_NONE).unwrap_err();
        assert_eq!(err, ScriptError::DisabledOpcode);

        // 0 IF VERIF ENDIF 1: reserved conditional fails even unexecuted.
        let err = eval_bytes(&[0x00, 0x63, 0x65, 0x68, 0x51], VERIFY_NONE).unwrap_err();
        assert_eq!(err, ScriptError::BadOpcode);
    }

    #[test]
    fn altstack_round_trip() {
        // 5 TOALTSTACK FROMALTSTACK
        let stack = eval_bytes(&[0x55, 0x6b, 0x6c], VERIFY_NONE).unwrap();
        assert_eq!(stack.items(), [num::encode(5)]);

        let err = eval_bytes(&[0x6c], VERIFY_NONE).unwrap_err();
        assert_eq!(err, ScriptError::InvalidAltstackOperation);
    }

    #[test]
    fn minimaldata_rejects_padded_push() {
        // PUSHDATA1 of one byte must use the direct push.
        let script = [0x4c, 0x01, 0x07];
        assert!(eval_bytes(&script, VERIFY_NONE).is_ok());
        let err = eval_bytes(&script, VERIFY_MINIMALDATA).unwrap_err();
        assert_eq!(err, ScriptError::MinimalData);
    }

    #[test]
    fn op_count_ceiling() {
        // 1 followed by 201 NOPs is fine; one more breaks the ceiling.
        let mut script = vec![0x51];
        script.extend(core::iter::repeat(0x61).take(MAX_OPS_PER_SCRIPT));
        assert!(eval_bytes(&script, VERIFY_NONE).is_ok());
        script.push(0x61);
        assert_eq!(
            eval_bytes(&script, VERIFY_NONE).unwrap_err(),
            ScriptError::OpCount
        );
    }

    #[test]
    fn truncated_script_fails_bad_opcode() {
        let err = eval_bytes(&[0x51, 0x4c, 0x20, 0x01], VERIFY_NONE).unwrap_err();
        assert_eq!(err, ScriptError::BadOpcode);
    }

    #[test]
    fn op_return_rejects() {
        assert_eq!(
            eval_bytes(&[0x6a], VERIFY_NONE).unwrap_err(),
            ScriptError::OpReturn
        );
    }

    #[test]
    fn stack_manipulation_ops() {
        // 1 2 SWAP → [2, 1]
        let stack = eval_bytes(&[0x51, 0x52, 0x7c], VERIFY_NONE).unwrap();
        assert_eq!(stack.items(), [num::encode(2), num::encode(1)]);

        // 1 2 3 ROT → [2, 3, 1]
        let stack = eval_bytes(&[0x51, 0x52, 0x53, 0x7b], VERIFY_NONE).unwrap();
        assert_eq!(
            stack.items(),
            [num::encode(2), num::encode(3), num::encode(1)]
        );

        // 1 2 1 PICK → [1, 2, 1]
        let stack = eval_bytes(&[0x51, 0x52, 0x51, 0x79], VERIFY_NONE).unwrap();
        assert_eq!(
            stack.items(),
            [num::encode(1), num::encode(2), num::encode(1)]
        );

        // DEPTH on an empty stack pushes zero.
        let stack = eval_bytes(&[0x74], VERIFY_NONE).unwrap();
        assert_eq!(stack.items(), [Vec::<u8>::new()]);
    }

    #[test]
    fn verify_script_p2sh_redeem() {
        // Redeem script OP_1; scriptSig pushes it; scriptPubkey is the
        // P2SH template over its HASH160.
        let redeem = Script::parse(&[0x51]);
        let redeem_bytes = redeem.serialize();
        let script_sig = Script::single_push(&redeem_bytes).unwrap();
        let hash = hash160::Hash::hash(&redeem_bytes);
        let mut script_pubkey = Script::new();
        script_pubkey.append_opcode(all::OP_HASH160);
        script_pubkey.append_data(hash.as_byte_array()).unwrap();
        script_pubkey.append_opcode(all::OP_EQUAL);
        assert!(script_pubkey.is_p2sh());

        let mut checker = NullSignatureChecker;
        let flags = ScriptFlags::from_bits(VERIFY_P2SH).unwrap();
        verify_script(
            &script_sig,
            &script_pubkey,
            &Witness::new(),
            flags,
            &mut checker,
        )
        .unwrap();
    }

    #[test]
    fn verify_script_rejects_false_result() {
        let mut checker = NullSignatureChecker;
        let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
        let err = verify_script(
            &Script::parse(&[0x00]),
            &Script::new(),
            &Witness::new(),
            flags,
            &mut checker,
        )
        .unwrap_err();
        assert_eq!(err, ScriptError::EvalFalse);
    }
}
