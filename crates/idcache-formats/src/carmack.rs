//! Carmack dictionary-expansion decoder
//!
//! The stream is read as little-endian word pairs where the low byte is a
//! count and the high byte a tag. Two tag values introduce back-references:
//!
//! - [`NEAR_TAG`]: copy `count` words starting `offset` words behind the
//!   output cursor, `offset` being the next byte.
//! - [`FAR_TAG`]: copy `count` words starting at absolute word `offset`,
//!   `offset` being the next little-endian `u16`.
//!
//! A count of zero escapes the tag: the next byte is the low half of a literal
//! word whose high half equals the tag. Every other word is a literal.
//!
//! Near copies may overlap the tail they are reading from, so copies run
//! one word at a time.

use crate::error::{FormatError, FormatResult};

/// Tag byte of a near (relative) back-reference.
pub const NEAR_TAG: u8 = 0xA7;

/// Tag byte of a far (absolute) back-reference.
pub const FAR_TAG: u8 = 0xA8;

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl ByteReader<'_> {
    fn next(&mut self, produced: usize, expected: usize) -> FormatResult<u8> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or(FormatError::InputExhausted {
                codec: "carmack",
                produced,
                expected,
            })?;
        self.pos += 1;
        Ok(byte)
    }
}

/// Expand a Carmack stream into `expanded_len_bytes / 2` words.
pub fn expand(source: &[u8], expanded_len_bytes: usize) -> FormatResult<Vec<u16>> {
    let expected = expanded_len_bytes / 2;
    let mut out: Vec<u16> = Vec::with_capacity(expected);
    let mut input = ByteReader {
        data: source,
        pos: 0,
    };

    while out.len() < expected {
        let count = input.next(out.len(), expected)?;
        let tag = input.next(out.len(), expected)?;

        if tag != NEAR_TAG && tag != FAR_TAG {
            out.push(u16::from_le_bytes([count, tag]));
            continue;
        }

        if count == 0 {
            let low = input.next(out.len(), expected)?;
            out.push(u16::from_le_bytes([low, tag]));
            continue;
        }

        let count = usize::from(count);
        let start = if tag == NEAR_TAG {
            let offset = usize::from(input.next(out.len(), expected)?);
            out.len().checked_sub(offset)
        } else {
            let lo = input.next(out.len(), expected)?;
            let hi = input.next(out.len(), expected)?;
            Some(usize::from(u16::from_le_bytes([lo, hi])))
        };

        // The source must begin inside already written output; it may run
        // into words this same copy produces.
        let start = match start {
            Some(start) if start < out.len() => start,
            _ => {
                return Err(FormatError::BackReferenceOutOfRange {
                    position: out.len(),
                    source_index: start.map_or(-1, |s| s as isize),
                    count,
                });
            }
        };

        let available = expected - out.len();
        if count > available {
            return Err(FormatError::OutputOverrun {
                codec: "carmack",
                needed: count,
                available,
            });
        }

        for i in 0..count {
            let word = out[start + i];
            out.push(word);
        }
    }

    Ok(out)
}
