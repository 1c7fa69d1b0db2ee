//! Parity of a permutation by cycle decomposition.

use crate::error::{Result, VmcError};

/// Longest permutation accepted by [`permutation_sign`].
pub const MAX_PERMUTATION_LEN: usize = 64;

/// Sign of `permutation`, a rearrangement of `0..L` with `L <= 64`.
///
/// Returns `(-1)^(L - cycles)`: `+1` for even permutations, `-1` for odd ones.
/// An entry outside `0..L`, or a cycle that does not close on its start,
/// means the input is not a permutation and is reported as corrupted data.
pub fn permutation_sign(permutation: &[usize]) -> Result<i32> {
    let length = permutation.len();
    if length > MAX_PERMUTATION_LEN {
        return Err(VmcError::PermutationTooLong { length });
    }
    let invalid = || VmcError::InvalidPermutation {
        permutation: permutation.to_vec(),
    };

    let mut seen: u64 = 0;
    let mut cycles = 0;
    for start in 0..length {
        if seen & (1 << start) != 0 {
            continue;
        }
        cycles += 1;
        let mut current = start;
        loop {
            seen |= 1 << current;
            current = permutation[current];
            if current >= length {
                return Err(invalid());
            }
            if seen & (1 << current) != 0 {
                break;
            }
        }
        if current != start {
            return Err(invalid());
        }
    }

    Ok(if (length - cycles) % 2 == 0 { 1 } else { -1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn inversion_sign(p: &[usize]) -> i32 {
        let mut inversions = 0;
        for i in 0..p.len() {
            for j in i + 1..p.len() {
                if p[i] > p[j] {
                    inversions += 1;
                }
            }
        }
        if inversions % 2 == 0 { 1 } else { -1 }
    }

    // Heap's algorithm
    fn all_permutations(n: usize) -> Vec<Vec<usize>> {
        let mut a: Vec<usize> = (0..n).collect();
        let mut c = vec![0; n];
        let mut out = vec![a.clone()];
        let mut i = 0;
        while i < n {
            if c[i] < i {
                if i % 2 == 0 {
                    a.swap(0, i);
                } else {
                    a.swap(c[i], i);
                }
                out.push(a.clone());
                c[i] += 1;
                i = 0;
            } else {
                c[i] = 0;
                i += 1;
            }
        }
        out
    }

    #[test]
    fn test_sign_matches_inversion_count_exhaustively() {
        for n in 0..=6 {
            let perms = all_permutations(n);
            assert_eq!(perms.len(), (1..=n).product::<usize>().max(1));
            for p in perms {
                assert_eq!(permutation_sign(&p).unwrap(), inversion_sign(&p), "{:?}", p);
            }
        }
    }

    #[test]
    fn test_sign_matches_inversion_count_for_long_permutations() {
        let mut rng = StdRng::seed_from_u64(7);
        for len in [17, 33, 63, 64] {
            for _ in 0..20 {
                let mut p: Vec<usize> = (0..len).collect();
                p.shuffle(&mut rng);
                assert_eq!(permutation_sign(&p).unwrap(), inversion_sign(&p));
            }
        }
    }

    #[test]
    fn test_fixed_points_and_transpositions() {
        assert_eq!(permutation_sign(&[0, 1, 2, 3]).unwrap(), 1);
        assert_eq!(permutation_sign(&[1, 0, 2, 3]).unwrap(), -1);
        assert_eq!(permutation_sign(&[1, 2, 0]).unwrap(), 1);
        assert_eq!(permutation_sign(&[3, 1, 2, 0]).unwrap(), -1);
    }

    #[test]
    fn test_too_long_is_rejected() {
        let p: Vec<usize> = (0..65).collect();
        assert!(matches!(
            permutation_sign(&p),
            Err(VmcError::PermutationTooLong { length: 65 })
        ));
    }

    #[test]
    fn test_out_of_range_and_repeated_entries_are_rejected() {
        assert!(matches!(
            permutation_sign(&[0, 4, 1]),
            Err(VmcError::InvalidPermutation { .. })
        ));
        assert!(matches!(
            permutation_sign(&[1, 1, 0]),
            Err(VmcError::InvalidPermutation { .. })
        ));
    }
}
