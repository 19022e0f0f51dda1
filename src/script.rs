//! Chunk-based script value model.
//!
//! A [`Script`] is an ordered sequence of [`Chunk`]s, each either a plain
//! opcode or a data push that remembers which push encoding carried it, so
//! that serialization round-trips non-minimal encodings byte for byte.
//! Parsing never fails: a push whose length prefix overruns the end of the
//! buffer terminates the parse, the well-formed prefix is kept and the
//! damage recorded, and the interpreter reports `BadOpcode` when execution
//! reaches the damaged tail. This mirrors the historical consensus rule
//! that malformed scripts are rejected at execution time, not decode time.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use bitcoin::opcodes::{all, Opcode};

use crate::error::ScriptError;

/// Maximum number of public keys in a CHECKMULTISIG.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// A data push together with the push opcode that encodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushChunk {
    opcode: u8,
    data: Vec<u8>,
}

impl PushChunk {
    fn new(opcode: u8, data: Vec<u8>) -> Self {
        Self { opcode, data }
    }

    /// Smallest encoding of `data`, as `CScript << data` produces.
    fn minimal(data: Vec<u8>) -> Self {
        let opcode = match data.len() {
            len @ 0..=75 => len as u8,
            76..=0xff => all::OP_PUSHDATA1.to_u8(),
            0x100..=0xffff => all::OP_PUSHDATA2.to_u8(),
            _ => all::OP_PUSHDATA4.to_u8(),
        };
        Self { opcode, data }
    }

    /// The push opcode byte (`0x00`–`0x4e`).
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// The pushed payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the payload could not have used a shorter push encoding
    /// (including the OP_N / OP_1NEGATE forms for single-byte values).
    pub fn is_minimal(&self) -> bool {
        match self.data.len() {
            0 => self.opcode == all::OP_PUSHBYTES_0.to_u8(),
            1 if self.data[0] == 0x81 => false,
            1 if (1..=16).contains(&self.data[0]) => false,
            len @ 1..=75 => self.opcode as usize == len,
            76..=0xff => self.opcode == all::OP_PUSHDATA1.to_u8(),
            0x100..=0xffff => self.opcode == all::OP_PUSHDATA2.to_u8(),
            _ => self.opcode == all::OP_PUSHDATA4.to_u8(),
        }
    }

    fn length_prefix_width(&self) -> usize {
        match self.opcode {
            0x4c => 1,
            0x4d => 2,
            0x4e => 4,
            _ => 0,
        }
    }

    fn encoded_len(&self) -> usize {
        1 + self.length_prefix_width() + self.data.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode);
        let len = self.data.len();
        match self.length_prefix_width() {
            0 => {}
            1 => out.push(len as u8),
            2 => out.extend_from_slice(&(len as u16).to_le_bytes()),
            _ => out.extend_from_slice(&(len as u32).to_le_bytes()),
        }
        out.extend_from_slice(&self.data);
    }
}

/// One decoded script element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A non-push opcode (anything above OP_PUSHDATA4).
    Op(u8),
    /// A data push, including the empty push OP_0.
    Push(PushChunk),
}

impl Chunk {
    fn encoded_len(&self) -> usize {
        match self {
            Chunk::Op(_) => 1,
            Chunk::Push(push) => push.encoded_len(),
        }
    }

    fn is_op(&self, opcode: Opcode) -> bool {
        matches!(self, Chunk::Op(byte) if *byte == opcode.to_u8())
    }
}

/// An immutable sequence of script chunks.
///
/// Built once through the append operations (or [`Script::parse`]) and
/// compared structurally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    chunks: Vec<Chunk>,
    truncated: bool,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes` into chunks, keeping the well-formed prefix of a
    /// damaged script and recording the truncation.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut chunks = Vec::new();
        let mut truncated = false;
        let mut cursor = 0usize;

        while cursor < bytes.len() {
            let opcode = bytes[cursor];
            cursor += 1;

            if opcode > all::OP_PUSHDATA4.to_u8() {
                chunks.push(Chunk::Op(opcode));
                continue;
            }

            let prefix_width = match opcode {
                0x4c => 1,
                0x4d => 2,
                0x4e => 4,
                _ => 0,
            };
            if bytes.len() - cursor < prefix_width {
                truncated = true;
                break;
            }
            let len = if prefix_width == 0 {
                opcode as usize
            } else {
                let mut len = 0usize;
                for i in 0..prefix_width {
                    len |= (bytes[cursor + i] as usize) << (8 * i);
                }
                len
            };
            cursor += prefix_width;
            match cursor.checked_add(len) {
                Some(end) if end <= bytes.len() => {
                    chunks.push(Chunk::Push(PushChunk::new(
                        opcode,
                        bytes[cursor..end].to_vec(),
                    )));
                    cursor = end;
                }
                _ => {
                    truncated = true;
                    break;
                }
            }
        }

        Self { chunks, truncated }
    }

    /// Re-encodes the chunks. The dropped tail of a truncated script is not
    /// reproduced.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        for chunk in &self.chunks {
            match chunk {
                Chunk::Op(opcode) => out.push(*opcode),
                Chunk::Push(push) => push.encode_into(&mut out),
            }
        }
        out
    }

    pub fn serialized_len(&self) -> usize {
        self.chunks.iter().map(Chunk::encoded_len).sum()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && !self.truncated
    }

    /// Whether the original encoding carried a damaged trailing push.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Appends a non-push opcode.
    pub fn append_opcode(&mut self, opcode: Opcode) {
        self.chunks.push(Chunk::Op(opcode.to_u8()));
    }

    /// Appends `data` under its minimal push encoding.
    ///
    /// Data of 2^32 bytes or more cannot be carried by any push encoding
    /// and is rejected.
    pub fn append_data(&mut self, data: &[u8]) -> Result<(), ScriptError> {
        if data.len() > u32::MAX as usize {
            return Err(ScriptError::PushSize);
        }
        self.chunks.push(Chunk::Push(PushChunk::minimal(data.to_vec())));
        Ok(())
    }

    /// The canonical one-push script `CScript() << data`.
    pub fn single_push(data: &[u8]) -> Result<Self, ScriptError> {
        let mut script = Self::new();
        script.append_data(data)?;
        Ok(script)
    }

    /// Every chunk is a push or a small constant (opcode at or below
    /// OP_16); a truncated script is not push-only.
    pub fn is_push_only(&self) -> bool {
        if self.truncated {
            return false;
        }
        self.chunks.iter().all(|chunk| match chunk {
            Chunk::Push(_) => true,
            Chunk::Op(opcode) => *opcode <= all::OP_PUSHNUM_16.to_u8(),
        })
    }

    /// Exactly one chunk, and it is a data push.
    pub fn is_single_push(&self) -> bool {
        !self.truncated && self.chunks.len() == 1 && matches!(self.chunks[0], Chunk::Push(_))
    }

    /// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn is_p2pkh(&self) -> bool {
        matches!(
            self.chunks.as_slice(),
            [a, b, Chunk::Push(hash), c, d]
                if a.is_op(all::OP_DUP)
                    && b.is_op(all::OP_HASH160)
                    && hash.opcode() == 20
                    && hash.data().len() == 20
                    && c.is_op(all::OP_EQUALVERIFY)
                    && d.is_op(all::OP_CHECKSIG)
        )
    }

    /// `OP_HASH160 <20 bytes> OP_EQUAL`, the exact 23-byte BIP16 template.
    pub fn is_p2sh(&self) -> bool {
        matches!(
            self.chunks.as_slice(),
            [a, Chunk::Push(hash), b]
                if a.is_op(all::OP_HASH160)
                    && hash.opcode() == 20
                    && hash.data().len() == 20
                    && b.is_op(all::OP_EQUAL)
        )
    }

    /// `OP_0 <20 bytes>`.
    pub fn is_p2wpkh(&self) -> bool {
        matches!(self.witness_program(), Some((0, program)) if program.len() == 20)
    }

    /// `OP_0 <32 bytes>`.
    pub fn is_p2wsh(&self) -> bool {
        matches!(self.witness_program(), Some((0, program)) if program.len() == 32)
    }

    /// `OP_1 <32 bytes>`.
    pub fn is_p2tr(&self) -> bool {
        matches!(self.witness_program(), Some((1, program)) if program.len() == 32)
    }

    /// Starts with OP_RETURN.
    pub fn is_op_return(&self) -> bool {
        self.chunks.first().map_or(false, |chunk| chunk.is_op(all::OP_RETURN))
    }

    /// `OP_m <33/65-byte key>... OP_n OP_CHECKMULTISIG` with `m <= n` and
    /// the key count matching `n`.
    pub fn is_multisig(&self) -> bool {
        let [first, keys @ .., count, tail] = self.chunks.as_slice() else {
            return false;
        };
        if self.truncated || !tail.is_op(all::OP_CHECKMULTISIG) {
            return false;
        }
        let (Some(required), Some(total)) = (decode_small_int(first), decode_small_int(count))
        else {
            return false;
        };
        if required == 0 || required > total || keys.len() != total as usize {
            return false;
        }
        keys.iter().all(|chunk| {
            matches!(chunk, Chunk::Push(push) if push.data().len() == 33 || push.data().len() == 65)
        })
    }

    /// A version opcode (OP_0 or OP_1..OP_16) followed by one direct push
    /// of 2–40 bytes and nothing else.
    pub fn is_witness_program(&self) -> bool {
        self.witness_program().is_some()
    }

    /// Witness version and program when this is a witness program.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        if self.truncated {
            return None;
        }
        let [version, Chunk::Push(program)] = self.chunks.as_slice() else {
            return None;
        };
        let version = match version {
            Chunk::Push(push) if push.opcode() == 0 && push.data().is_empty() => 0,
            Chunk::Op(opcode) => decode_op_n(*opcode)?,
            _ => return None,
        };
        let len = program.data().len();
        if program.opcode() as usize != len || !(2..=40).contains(&len) {
            return None;
        }
        Some((version, program.data()))
    }

    /// The tail used as signing scriptCode: everything from chunk `from`
    /// (one past the last executed OP_CODESEPARATOR) to the end.
    pub fn script_code(&self, from: usize) -> Script {
        Script {
            chunks: self.chunks[from.min(self.chunks.len())..].to_vec(),
            truncated: self.truncated,
        }
    }

    /// Drops every OP_CODESEPARATOR, as the legacy sighash serializer does.
    pub fn without_codeseparators(&self) -> Script {
        Script {
            chunks: self
                .chunks
                .iter()
                .filter(|chunk| !chunk.is_op(all::OP_CODESEPARATOR))
                .cloned()
                .collect(),
            truncated: self.truncated,
        }
    }

    /// Byte-exact removal of `pattern` at chunk boundaries, Core's
    /// `FindAndDelete`. Returns the filtered script and the number of
    /// occurrences removed. Matches never start inside a chunk.
    pub fn find_and_delete(&self, pattern: &Script) -> (Script, usize) {
        let pattern = pattern.serialize();
        let haystack = self.serialize();
        if pattern.is_empty() || haystack.len() < pattern.len() {
            return (self.clone(), 0);
        }

        let mut result = Vec::with_capacity(haystack.len());
        let mut removed = 0usize;
        let mut cursor = 0usize;
        while cursor < haystack.len() {
            while haystack.len() - cursor >= pattern.len()
                && haystack[cursor..cursor + pattern.len()] == pattern[..]
            {
                cursor += pattern.len();
                removed += 1;
            }
            let end = next_chunk_end(&haystack, cursor);
            result.extend_from_slice(&haystack[cursor..end]);
            cursor = end;
        }

        (Script::parse(&result), removed)
    }

    /// Legacy signature-operation count. `accurate` uses the preceding
    /// OP_N for CHECKMULTISIG where available; the pessimistic mode
    /// charges the full 20.
    pub fn count_sigops(&self, accurate: bool) -> u32 {
        let mut total = 0u32;
        let mut last_op: Option<u8> = None;
        for chunk in &self.chunks {
            match chunk {
                Chunk::Op(opcode) => {
                    if chunk.is_op(all::OP_CHECKSIG) || chunk.is_op(all::OP_CHECKSIGVERIFY) {
                        total = total.saturating_add(1);
                    } else if chunk.is_op(all::OP_CHECKMULTISIG)
                        || chunk.is_op(all::OP_CHECKMULTISIGVERIFY)
                    {
                        let add = match last_op.and_then(decode_op_n) {
                            Some(n) if accurate => n as u32,
                            _ => MAX_PUBKEYS_PER_MULTISIG as u32,
                        };
                        total = total.saturating_add(add);
                    }
                    last_op = Some(*opcode);
                }
                Chunk::Push(_) => last_op = None,
            }
        }
        total
    }

    /// Whether any chunk is an OP_SUCCESSx opcode (tapscript semantics).
    pub fn contains_op_success(&self) -> bool {
        self.chunks.iter().any(|chunk| match chunk {
            Chunk::Op(opcode) => is_op_success(*opcode),
            Chunk::Push(_) => false,
        })
    }
}

/// Decodes OP_0/OP_1..OP_16 chunks to their small-integer value.
fn decode_small_int(chunk: &Chunk) -> Option<u8> {
    match chunk {
        Chunk::Op(opcode) => decode_op_n(*opcode),
        Chunk::Push(push) if push.opcode() == 0 && push.data().is_empty() => Some(0),
        Chunk::Push(_) => None,
    }
}

/// OP_1..OP_16 to 1..16; OP_0 is a push, not an OP_N.
fn decode_op_n(opcode: u8) -> Option<u8> {
    if (all::OP_PUSHNUM_1.to_u8()..=all::OP_PUSHNUM_16.to_u8()).contains(&opcode) {
        Some(opcode - all::OP_PUSHNUM_1.to_u8() + 1)
    } else {
        None
    }
}

/// End offset of the chunk starting at `cursor`; a damaged push swallows
/// the rest of the buffer, as `GetOp` leaves it for the tail copy.
fn next_chunk_end(bytes: &[u8], cursor: usize) -> usize {
    if cursor >= bytes.len() {
        return bytes.len();
    }
    let opcode = bytes[cursor];
    if opcode > all::OP_PUSHDATA4.to_u8() {
        return cursor + 1;
    }
    let prefix_width = match opcode {
        0x4c => 1,
        0x4d => 2,
        0x4e => 4,
        _ => 0,
    };
    let mut offset = cursor + 1;
    if bytes.len() - offset < prefix_width {
        return bytes.len();
    }
    let len = if prefix_width == 0 {
        opcode as usize
    } else {
        let mut len = 0usize;
        for i in 0..prefix_width {
            len |= (bytes[offset + i] as usize) << (8 * i);
        }
        len
    };
    offset += prefix_width;
    match offset.checked_add(len) {
        Some(end) if end <= bytes.len() => end,
        _ => bytes.len(),
    }
}

/// Bitcoin Core's `IsOpSuccess` table.
pub fn is_op_success(opcode: u8) -> bool {
    matches!(
        opcode,
        80 | 98 | 126..=129 | 131..=134 | 137..=138 | 141..=142 | 149..=153 | 187..=254
    )
}
