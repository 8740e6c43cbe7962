// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.

use flutter_rust_bridge::frb;
use ndarray::Array1;
use log::warn;

fn to_f64(v: &[f32]) -> Array1<f64> {
    v.iter().map(|x| f64::from(*x)).collect()
}

/// Euclidean length, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f64 {
    let a = to_f64(v);
    a.dot(&a).sqrt()
}

/// Cosine similarity between two vectors.
///
/// Accumulates in f64 so every platform ranks identically. Returns 0.0 when
/// the lengths differ or either norm is zero.
#[frb(sync)]
pub fn cosine_similarity(vec_a: &[f32], vec_b: &[f32]) -> f64 {
    if vec_a.len() != vec_b.len() {
        warn!("[cosine] Vector length mismatch: a={}, b={}", vec_a.len(), vec_b.len());
        return 0.0;
    }

    let a = to_f64(vec_a);
    let b = to_f64(vec_b);

    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 { return 0.0; }
    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < EPS);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < EPS);
    }

    #[test]
    fn test_length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_known_value() {
        // [1,2,3,4] . [2,3,4,5] = 40; |a| = sqrt(30); |b| = sqrt(54)
        let expected = 40.0 / (30.0f64.sqrt() * 54.0f64.sqrt());
        let got = cosine_similarity(&[1.0, 2.0, 3.0, 4.0], &[2.0, 3.0, 4.0, 5.0]);
        assert!((got - expected).abs() < EPS);
    }

    #[test]
    fn test_l2_norm() {
        assert_eq!(l2_norm(&[3.0, 4.0]), 5.0);
        assert_eq!(l2_norm(&[]), 0.0);
    }

    fn pair() -> impl Strategy<Value = (Vec<f32>, Vec<f32>)> {
        (1usize..64).prop_flat_map(|n| {
            (
                prop::collection::vec(-1000.0f32..1000.0, n),
                prop::collection::vec(-1000.0f32..1000.0, n),
            )
        })
    }

    proptest! {
        #[test]
        fn symmetric((a, b) in pair()) {
            prop_assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        }

        #[test]
        fn bounded((a, b) in pair()) {
            let s = cosine_similarity(&a, &b);
            prop_assert!((-1.0 - 1e-9..=1.0 + 1e-9).contains(&s));
        }

        #[test]
        fn zero_vector_scores_zero(a in prop::collection::vec(-1000.0f32..1000.0, 1..64)) {
            let zeros = vec![0.0f32; a.len()];
            prop_assert_eq!(cosine_similarity(&a, &zeros), 0.0);
            prop_assert_eq!(cosine_similarity(&zeros, &a), 0.0);
        }
    }
}
