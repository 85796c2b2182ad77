//! RLEW run-length word decoder
//!
//! Every word is copied through unless it equals the installation's RLEW tag,
//! in which case the next two words are a repeat count and the value to
//! repeat. A literal equal to the tag cannot be represented; encoders always
//! emit such words as a run of length one.

use crate::error::{FormatError, FormatResult};

/// Convert little-endian bytes to words. A trailing odd byte is dropped.
pub fn words_from_le_bytes(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Expand `source` into exactly `expanded_len_bytes / 2` words.
pub fn expand(source: &[u16], expanded_len_bytes: usize, rlew_tag: u16) -> FormatResult<Vec<u16>> {
    let expected = expanded_len_bytes / 2;
    let mut out = Vec::with_capacity(expected);
    let mut input = source.iter().copied();

    let exhausted = |produced: usize| FormatError::InputExhausted {
        codec: "rlew",
        produced,
        expected,
    };

    while out.len() < expected {
        let value = input.next().ok_or_else(|| exhausted(out.len()))?;
        if value != rlew_tag {
            out.push(value);
            continue;
        }

        let count = usize::from(input.next().ok_or_else(|| exhausted(out.len()))?);
        let value = input.next().ok_or_else(|| exhausted(out.len()))?;
        let available = expected - out.len();
        if count > available {
            return Err(FormatError::OutputOverrun {
                codec: "rlew",
                needed: count,
                available,
            });
        }
        out.extend(std::iter::repeat_n(value, count));
    }

    Ok(out)
}
