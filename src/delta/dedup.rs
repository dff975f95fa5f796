// Cross-image deduplication.
//
// Blocks present bit-identically in both images carry no signal for the
// diff tool and only inflate the expanded files. Identity is approximated
// by the (length, hash) pair; a hash collision leaves a block in both
// lists, which is harmless.

use log::debug;

use super::collect::BlockDesc;

fn key(d: &BlockDesc) -> (u32, u32) {
    (d.length, d.hash)
}

/// Advance past the run of equal-key entries starting at `from`.
fn run_end(list: &[BlockDesc], from: usize) -> usize {
    let k = key(&list[from]);
    let mut end = from + 1;
    while end < list.len() && key(&list[end]) == k {
        end += 1;
    }
    end
}

/// Remove every block that appears (by length and hash) in both lists.
///
/// Matching runs are erased wholesale from both sides, regardless of how
/// many entries each side's run holds or at which offsets they live.
pub fn dedup_pair(a: &mut Vec<BlockDesc>, b: &mut Vec<BlockDesc>) {
    a.sort_unstable_by_key(key);
    b.sort_unstable_by_key(key);

    let mut keep_a = vec![true; a.len()];
    let mut keep_b = vec![true; b.len()];

    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        let ka = key(&a[i]);
        let kb = key(&b[j]);
        if ka == kb {
            let ia = run_end(a, i);
            let jb = run_end(b, j);
            keep_a[i..ia].fill(false);
            keep_b[j..jb].fill(false);
            i = ia;
            j = jb;
        } else if ka < kb {
            i += 1;
        } else {
            j += 1;
        }
    }

    let before = (a.len(), b.len());
    let mut it = keep_a.iter();
    a.retain(|_| *it.next().unwrap());
    let mut it = keep_b.iter();
    b.retain(|_| *it.next().unwrap());

    debug!(
        "dedup: {} -> {} source blocks, {} -> {} target blocks",
        before.0,
        a.len(),
        before.1,
        b.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(offset: u64, length: u32, hash: u32) -> BlockDesc {
        BlockDesc {
            offset,
            length,
            uncompressed_length: 0,
            hash,
        }
    }

    #[test]
    fn removes_mutual_blocks_only() {
        let mut a = vec![desc(0, 100, 1), desc(200, 100, 2), desc(400, 50, 3)];
        let mut b = vec![desc(0, 100, 2), desc(900, 50, 3), desc(100, 64, 9)];
        dedup_pair(&mut a, &mut b);

        assert_eq!(a.len(), 1);
        assert_eq!(a[0].hash, 1);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].hash, 9);
    }

    #[test]
    fn unequal_run_lengths_are_erased_wholesale() {
        // Three copies on one side, one on the other: all four go.
        let mut a = vec![desc(0, 100, 7), desc(200, 100, 7), desc(400, 100, 7)];
        let mut b = vec![desc(800, 100, 7)];
        dedup_pair(&mut a, &mut b);
        assert!(a.is_empty());
        assert!(b.is_empty());
    }

    #[test]
    fn same_hash_different_length_is_not_a_match() {
        let mut a = vec![desc(0, 100, 7)];
        let mut b = vec![desc(0, 101, 7)];
        dedup_pair(&mut a, &mut b);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn identical_lists_empty_out() {
        let blocks = vec![desc(0, 10, 1), desc(10, 20, 2), desc(30, 30, 3)];
        let mut a = blocks.clone();
        let mut b = blocks;
        dedup_pair(&mut a, &mut b);
        assert!(a.is_empty());
        assert!(b.is_empty());
    }

    #[test]
    fn is_symmetric() {
        let left = vec![desc(0, 10, 1), desc(50, 20, 2), desc(90, 20, 2)];
        let right = vec![desc(7, 20, 2), desc(40, 10, 4)];

        let (mut a1, mut b1) = (left.clone(), right.clone());
        dedup_pair(&mut a1, &mut b1);
        let (mut b2, mut a2) = (right, left);
        dedup_pair(&mut b2, &mut a2);

        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
    }
}
