//! Huffman coding of a vocabulary for the hierarchical softmax.
//!
//! A vocabulary of `n` items gives a tree with `n - 1` internal nodes,
//! numbered `0..n - 1` in the order they are created; the root is node
//! `n - 2`. An item's `point` lists the internal nodes on the way from the
//! root to the item, and `code[d]` says which child of `point[d]` to take.

use std::cmp::Reverse;

use crate::error::VocabError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HuffmanCode {
    pub code: Vec<u8>,
    pub point: Vec<u32>,
}

/// Build the Huffman tree for items with the given counts.
///
/// Frequent items get short codes. Fails if there are fewer than two items or
/// if any code would be longer than `max_len`.
pub fn encode(counts: &[u64], max_len: usize) -> Result<Vec<HuffmanCode>, VocabError> {
    let n = counts.len();
    if n < 2 {
        return Err(VocabError::TooSmall(n));
    }

    // Leaves by descending count. The caller's order is nearly sorted already,
    // which the stable sort handles in about linear time.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| Reverse(counts[i]));

    // Nodes 0..n are leaves in `order`, nodes n..2n-1 are internal.
    let mut count = vec![0u64; n * 2 - 1];
    let mut binary = vec![0u8; n * 2 - 1]; // which child a node is of its parent (0 or 1)
    let mut parent_node = vec![0usize; n * 2 - 1];
    for (pos, &i) in order.iter().enumerate() {
        count[pos] = counts[i];
    }

    // Two queues: leaves are taken from the end of the sorted list, internal
    // nodes in creation order. Both are sorted, so the two smallest pending
    // nodes are always at the queue heads.
    let mut leaf = n;
    let mut internal = n;
    for a in 0..(n - 1) {
        let created = n + a;
        let min1 = take_smallest(&count, &mut leaf, &mut internal, created);
        let min2 = take_smallest(&count, &mut leaf, &mut internal, created);
        count[created] = count[min1] + count[min2];
        parent_node[min1] = created;
        parent_node[min2] = created;
        binary[min2] = 1;
    }

    // Now assign binary code to each item
    let root = n * 2 - 2;
    let mut codes = vec![HuffmanCode::default(); n];
    for (pos, &i) in order.iter().enumerate() {
        let mut code = vec![];
        let mut point = vec![];
        let mut b = pos;
        while b != root {
            code.push(binary[b]);
            b = parent_node[b];
            point.push((b - n) as u32);
        }
        if code.len() > max_len {
            return Err(VocabError::CodeTooLong {
                index: i,
                len: code.len(),
                max: max_len,
            });
        }
        code.reverse();
        point.reverse();
        codes[i] = HuffmanCode { code, point };
    }
    Ok(codes)
}

/// Pop the head of whichever queue holds the smaller count. On a tie the
/// leaf goes first, which keeps the tree shallow.
fn take_smallest(count: &[u64], leaf: &mut usize, internal: &mut usize, created: usize) -> usize {
    let internal_ready = *internal < created;
    if *leaf > 0 && (!internal_ready || count[*leaf - 1] <= count[*internal]) {
        *leaf -= 1;
        *leaf
    } else {
        *internal += 1;
        *internal - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Check that the codes describe one consistent binary tree: every path
    /// starts at the root, following the same bit from the same node always
    /// leads to the same place, and no code is a prefix of another.
    fn check_tree(codes: &[HuffmanCode]) {
        let n = codes.len();
        let root = (n - 2) as u32;
        // (node, bit) -> next node, or leaf item
        let mut edges: HashMap<(u32, u8), Result<u32, usize>> = HashMap::new();
        for (i, c) in codes.iter().enumerate() {
            assert_eq!(c.code.len(), c.point.len());
            assert_eq!(c.point[0], root);
            for d in 0..c.code.len() {
                let next = match c.point.get(d + 1) {
                    Some(&p) => Ok(p),
                    None => Err(i),
                };
                let prev = edges.insert((c.point[d], c.code[d]), next);
                if let Some(prev) = prev {
                    assert_eq!(prev, next, "item {i} disagrees about node {}", c.point[d]);
                }
            }
        }
        // a full binary tree with n leaves has 2(n-1) edges
        assert_eq!(edges.len(), 2 * (n - 1));

        for (i, a) in codes.iter().enumerate() {
            for (j, b) in codes.iter().enumerate() {
                if i != j {
                    assert!(!b.code.starts_with(&a.code), "{i} is a prefix of {j}");
                }
            }
        }
    }

    #[test]
    fn test_two_items() {
        let codes = encode(&[5, 3], 40).unwrap();
        assert_eq!(codes[0].point, [0]);
        assert_eq!(codes[1].point, [0]);
        assert_ne!(codes[0].code, codes[1].code);
        // the rarer item is taken first and gets bit 0
        assert_eq!(codes[1].code, [0]);
        assert_eq!(codes[0].code, [1]);
    }

    #[test]
    fn test_lengths_follow_frequency() {
        let counts = [100, 40, 30, 20, 5, 5];
        let codes = encode(&counts, 40).unwrap();
        check_tree(&codes);
        for i in 1..counts.len() {
            assert!(codes[i - 1].code.len() <= codes[i].code.len());
        }
        // Optimal total cost for these counts.
        let cost: u64 = counts
            .iter()
            .zip(&codes)
            .map(|(&c, code)| c * code.code.len() as u64)
            .sum();
        assert_eq!(cost, 400);
    }

    #[test]
    fn test_unsorted_input() {
        // The start symbol is pinned first whatever its count.
        let codes = encode(&[1, 50, 20, 20, 3], 40).unwrap();
        check_tree(&codes);
        assert_eq!(codes[1].code.len(), 1);
        assert!(codes[0].code.len() >= codes[4].code.len());
    }

    #[test]
    fn test_too_small() {
        assert_eq!(encode(&[7], 40), Err(VocabError::TooSmall(1)));
        assert_eq!(encode(&[], 40), Err(VocabError::TooSmall(0)));
    }

    #[test]
    fn test_code_too_long() {
        // Fibonacci counts give the deepest possible tree.
        let mut counts = vec![1u64, 1];
        while counts.len() < 12 {
            let k = counts.len();
            counts.push(counts[k - 1] + counts[k - 2]);
        }
        counts.reverse();
        let codes = encode(&counts, 40).unwrap();
        check_tree(&codes);
        assert_eq!(codes.iter().map(|c| c.code.len()).max(), Some(11));
        assert!(matches!(
            encode(&counts, 10),
            Err(VocabError::CodeTooLong { len: 11, max: 10, .. })
        ));
    }
}
