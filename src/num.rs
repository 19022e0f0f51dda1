//! Script number codec.
//!
//! Arithmetic opcodes operate on `CScriptNum`-style integers: a
//! minimal-length little-endian magnitude with the sign carried in the top
//! bit of the final byte. Zero is the empty byte string. Operands are
//! limited to 4 bytes on input ([`DEFAULT_MAX_LEN`]) but intermediate
//! results may serialize to 5, which is why CLTV/CSV read their operands
//! with [`EXTENDED_MAX_LEN`].

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::error::ScriptError;

/// Operand width accepted by arithmetic opcodes.
pub const DEFAULT_MAX_LEN: usize = 4;
/// Operand width accepted by CHECKLOCKTIMEVERIFY / CHECKSEQUENCEVERIFY.
pub const EXTENDED_MAX_LEN: usize = 5;

/// Encodes `value` in minimal-length sign-and-magnitude form.
pub fn encode(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut magnitude = value.unsigned_abs();
    while magnitude > 0 {
        result.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }

    // If the natural encoding's top bit is set it would read back as the
    // sign; spill into one extra byte instead.
    let last = result.last_mut().expect("non-zero value has at least one byte");
    if *last & 0x80 != 0 {
        result.push(if value < 0 { 0x80 } else { 0x00 });
    } else if value < 0 {
        *last |= 0x80;
    }

    result
}

/// Decodes a script number of at most `max_len` bytes.
///
/// Oversized or (when `require_minimal`) non-minimal operands fail with
/// [`ScriptError::Unknown`], the catch-all Core reports for arithmetic
/// operand violations.
pub fn decode(bytes: &[u8], require_minimal: bool, max_len: usize) -> Result<i64, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::Unknown);
    }
    if require_minimal && !is_minimally_encoded(bytes, max_len) {
        return Err(ScriptError::Unknown);
    }
    Ok(decode_unchecked(bytes))
}

/// Decodes without width or minimality checks; the empty string is zero.
pub fn decode_unchecked(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }

    let mut result: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= (byte as i64) << (8 * i);
    }

    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        -(result & mask)
    } else {
        result
    }
}

/// True when `bytes` is the shortest encoding of its value.
pub fn is_minimally_encoded(bytes: &[u8], max_len: usize) -> bool {
    if bytes.len() > max_len {
        return false;
    }
    if bytes.is_empty() {
        return true;
    }

    // A final byte carrying only the sign bit is redundant unless the byte
    // before it needs its top bit free.
    let last = bytes[bytes.len() - 1];
    if last & 0x7f == 0 {
        if bytes.len() == 1 {
            return false;
        }
        if bytes[bytes.len() - 2] & 0x80 == 0 {
            return false;
        }
    }

    true
}
