//! Reference encoders used to produce round-trip inputs for the decoders
//!
//! These mirror the offline tools that built the data files. They are only
//! compiled for tests or with the `test-utils` feature.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::carmack::{FAR_TAG, NEAR_TAG};
use crate::huffman::{HUFFMAN_NODE_COUNT, HUFFMAN_ROOT, HuffNode, HuffmanTable};

/// Build a dictionary covering all 256 byte values, weighted by `data`.
///
/// With 256 leaves the tree has exactly 255 internal nodes, and the last
/// merged node lands at index 254 (the root).
pub fn build_huffman_table(data: &[u8]) -> HuffmanTable {
    let mut freq = [1u64; 256];
    for &b in data {
        freq[usize::from(b)] += 1;
    }

    // (weight, tiebreak, reference)
    let mut heap: BinaryHeap<Reverse<(u64, usize, u16)>> = freq
        .iter()
        .enumerate()
        .map(|(sym, &w)| Reverse((w, sym, sym as u16)))
        .collect();

    let mut nodes = [HuffNode::default(); HUFFMAN_NODE_COUNT];
    let mut next = 0usize;
    while heap.len() > 1 {
        let Some(Reverse((w0, _, r0))) = heap.pop() else {
            break;
        };
        let Some(Reverse((w1, _, r1))) = heap.pop() else {
            break;
        };
        nodes[next] = HuffNode { bit0: r0, bit1: r1 };
        heap.push(Reverse((w0 + w1, 256 + next, 256 + next as u16)));
        next += 1;
    }
    assert_eq!(next - 1, HUFFMAN_ROOT);
    HuffmanTable::new(nodes)
}

/// Encode `data` with `table`, packing bits least-significant first.
pub fn huffman_encode(table: &HuffmanTable, data: &[u8]) -> Vec<u8> {
    let mut codes: Vec<Vec<bool>> = vec![Vec::new(); 256];
    let mut stack = vec![(HUFFMAN_ROOT, Vec::new())];
    while let Some((index, prefix)) = stack.pop() {
        let node = table.nodes()[index];
        for (bit, child) in [(false, node.bit0), (true, node.bit1)] {
            let mut path: Vec<bool> = prefix.clone();
            path.push(bit);
            if child < 256 {
                codes[usize::from(child)] = path;
            } else {
                stack.push((usize::from(child - 256), path));
            }
        }
    }

    let mut out = Vec::new();
    let mut byte = 0u8;
    let mut bit = 0u8;
    for &sym in data {
        for &set in &codes[usize::from(sym)] {
            if set {
                byte |= 1 << bit;
            }
            bit += 1;
            if bit == 8 {
                out.push(byte);
                byte = 0;
                bit = 0;
            }
        }
    }
    if bit != 0 {
        out.push(byte);
    }
    out
}

/// Encode words with near and far back-references.
pub fn carmack_encode(words: &[u16]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < words.len() {
        let match_len = |start: usize| {
            let mut len = 0;
            while pos + len < words.len() && len < 255 && words[start + len] == words[pos + len] {
                len += 1;
            }
            len
        };

        let mut near = (0, 0);
        for start in pos.saturating_sub(255)..pos {
            let len = match_len(start);
            if len > near.1 {
                near = (pos - start, len);
            }
        }
        let mut far = (0, 0);
        for start in 0..pos.min(0x1_0000) {
            let len = match_len(start);
            if len > far.1 {
                far = (start, len);
            }
        }

        if near.1 >= 2 && near.1 >= far.1 {
            out.extend_from_slice(&[near.1 as u8, NEAR_TAG, near.0 as u8]);
            pos += near.1;
        } else if far.1 >= 3 {
            let offset = (far.0 as u16).to_le_bytes();
            out.extend_from_slice(&[far.1 as u8, FAR_TAG, offset[0], offset[1]]);
            pos += far.1;
        } else {
            let [lo, hi] = words[pos].to_le_bytes();
            if hi == NEAR_TAG || hi == FAR_TAG {
                out.extend_from_slice(&[0, hi, lo]);
            } else {
                out.extend_from_slice(&[lo, hi]);
            }
            pos += 1;
        }
    }
    out
}

/// Encode words with runs collapsed to `tag, count, value` triples.
pub fn rlew_encode(words: &[u16], tag: u16) -> Vec<u16> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < words.len() {
        let value = words[pos];
        let mut run = 1;
        while pos + run < words.len() && words[pos + run] == value && run < usize::from(u16::MAX) {
            run += 1;
        }
        if run > 3 || value == tag {
            out.extend_from_slice(&[tag, run as u16, value]);
        } else {
            out.extend(std::iter::repeat_n(value, run));
        }
        pos += run;
    }
    out
}

/// Encode a word plane the way map planes are stored on disk.
pub fn encode_plane(plane: &[u16], rlew_tag: u16) -> Vec<u8> {
    let mut rlew = vec![(plane.len() * 2) as u16];
    rlew.extend(rlew_encode(plane, rlew_tag));
    let carmack = carmack_encode(&rlew);
    let mut out = ((rlew.len() * 2) as u16).to_le_bytes().to_vec();
    out.extend(carmack);
    out
}
