//! Unsigned LEB128 varints used by the multihash and CID binary forms.

use crate::errors::StorageError;

/// Longest encoding of a `u64` (ceil(64 / 7)).
const MAX_VARINT_LEN: usize = 10;

/// Append the varint encoding of `value` to `out`.
pub(crate) fn encode(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decode a varint from the front of `input`.
///
/// Returns the value and the number of bytes consumed. Non-minimal encodings
/// are rejected so that every value has exactly one binary form.
pub(crate) fn decode(input: &[u8]) -> Result<(u64, usize), StorageError> {
    let mut value: u64 = 0;
    for (i, &byte) in input.iter().enumerate().take(MAX_VARINT_LEN) {
        let part = u64::from(byte & 0x7f);
        if i == MAX_VARINT_LEN - 1 && part > 1 {
            return Err(StorageError::invalid("varint overflows u64"));
        }
        value |= part << (7 * i);
        if byte & 0x80 == 0 {
            if byte == 0 && i > 0 {
                return Err(StorageError::invalid("non-minimal varint"));
            }
            return Ok((value, i + 1));
        }
    }
    Err(StorageError::invalid("truncated varint"))
}
