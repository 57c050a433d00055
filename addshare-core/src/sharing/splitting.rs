//! Splitting and reconstruction of additive shares.
//!
//! See the [sharing module] documentation.
//!
//! [sharing module]: crate::sharing

use derive_more::{From, Index, Into};
use rand::{distributions::Uniform, Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::model::{LayerUpdate, ModelUpdate, Tensor};

/// Half-width of the uniform range the random shares are drawn from.
///
/// Any distribution preserves the exact-sum invariant; this range keeps the
/// reconstruction error negligible at `f64` precision while dominating the
/// magnitude of typical neural-network weights.
const SHARE_RANGE: f64 = 1e3;

/// An ordered sequence of additive shares whose element-wise sum equals the
/// tensor they were split from.
#[derive(Debug, Clone, PartialEq, From, Index, Into)]
pub struct ShareSet(Vec<Tensor>);

#[allow(clippy::len_without_is_empty)]
impl ShareSet {
    /// Gets the number of shares of this set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Creates an iterator that yields references to the shares of this set.
    pub fn iter(&self) -> std::slice::Iter<Tensor> {
        self.0.iter()
    }

    /// Removes and returns the last share of this set.
    pub fn pop(&mut self) -> Option<Tensor> {
        self.0.pop()
    }
}

impl IntoIterator for ShareSet {
    type Item = Tensor;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Splits `tensor` into `n` additive shares using a [`ChaCha20Rng`] seeded
/// from OS entropy.
///
/// # Panics
/// Panics if `n == 0`.
pub fn split(tensor: &Tensor, n: usize) -> ShareSet {
    split_with_rng(tensor, n, &mut ChaCha20Rng::from_entropy())
}

/// Splits `tensor` into `n` additive shares using the given randomness
/// source.
///
/// The first `n - 1` shares are uniform random tensors of the same length as
/// `tensor`; the last share is `tensor` minus their element-wise sum.
///
/// # Panics
/// Panics if `n == 0`.
pub fn split_with_rng<R: Rng>(tensor: &Tensor, n: usize, rng: &mut R) -> ShareSet {
    assert!(n >= 1, "cannot split a tensor into zero shares");

    let uniform = Uniform::new(-SHARE_RANGE, SHARE_RANGE);
    let mut shares: Vec<Tensor> = (0..n - 1)
        .map(|_| (0..tensor.len()).map(|_| rng.sample(uniform)).collect())
        .collect();

    let last = tensor
        .iter()
        .enumerate()
        .map(|(i, value)| value - shares.iter().map(|share| share[i]).sum::<f64>())
        .collect();
    shares.push(last);

    ShareSet(shares)
}

/// Reconstructs the original tensor by exact summation of its shares.
///
/// # Panics
/// Panics if the set is empty or the shares disagree in length. Both are
/// programming errors: shares produced by [`split`] always agree.
pub fn reconstruct(shares: &ShareSet) -> Tensor {
    let first = shares.iter().next().expect("cannot reconstruct from an empty share set");
    let mut sum = first.clone();
    for share in shares.iter().skip(1) {
        assert_eq!(
            share.len(),
            sum.len(),
            "shares of mismatched length cannot belong to the same tensor"
        );
        for (acc, value) in sum.iter_mut().zip(share.iter()) {
            *acc += value;
        }
    }
    sum
}

/// Splits every layer component of `update` into `n` shares and rejoins them
/// by layer name, yielding `n` update-shaped shares.
///
/// # Panics
/// Panics if `n == 0`.
pub fn split_update(update: &ModelUpdate, n: usize) -> Vec<ModelUpdate> {
    split_update_with_rng(update, n, &mut ChaCha20Rng::from_entropy())
}

/// Like [`split_update`], but with the given randomness source.
pub fn split_update_with_rng<R: Rng>(
    update: &ModelUpdate,
    n: usize,
    rng: &mut R,
) -> Vec<ModelUpdate> {
    assert!(n >= 1, "cannot split an update into zero shares");

    let mut shares = vec![ModelUpdate::new(); n];
    for (name, layer) in update.iter() {
        let weight_shares = split_with_rng(&layer.weights, n, rng);
        let bias_shares = split_with_rng(&layer.bias, n, rng);
        for ((share, weights), bias) in shares
            .iter_mut()
            .zip(weight_shares.into_iter())
            .zip(bias_shares.into_iter())
        {
            share.insert(name.clone(), LayerUpdate { weights, bias });
        }
    }
    shares
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn assert_close(a: &Tensor, b: &Tensor) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < TOLERANCE, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_split_reconstruct_is_exact() {
        let tensor = Tensor::from(vec![0.25, -1.5, 3.125, 0.0, 42.0]);
        for n in &[1, 2, 3, 7] {
            let shares = split(&tensor, *n);
            assert_eq!(shares.len(), *n);
            assert_close(&reconstruct(&shares), &tensor);
        }
    }

    #[test]
    fn test_single_share_is_the_tensor_itself() {
        let tensor = Tensor::from(vec![1.0, 2.0]);
        let shares = split(&tensor, 1);
        assert_eq!(shares.iter().next().unwrap(), &tensor);
    }

    #[test]
    fn test_shares_do_not_reveal_the_tensor() {
        // With randomized shares, neither a single share nor the sum of all
        // but one equals the original tensor.
        let tensor = Tensor::from(vec![1.0, 2.0, 3.0]);
        let mut shares = split(&tensor, 3);
        for share in shares.iter() {
            assert_ne!(share, &tensor);
        }
        // Drop one share: the remaining ones no longer determine the tensor.
        shares.pop();
        assert_ne!(reconstruct(&shares), tensor);
    }

    #[test]
    fn test_split_is_randomized_across_calls() {
        let tensor = Tensor::from(vec![1.0, 2.0, 3.0]);
        let first = split(&tensor, 2);
        let second = split(&tensor, 2);
        assert_ne!(first.iter().next(), second.iter().next());
    }

    #[test]
    fn test_split_update_preserves_layer_names() {
        let mut update = ModelUpdate::new();
        update.insert(
            "dense_1",
            LayerUpdate {
                weights: Tensor::from(vec![1.0, -2.0]),
                bias: Tensor::from(vec![0.5]),
            },
        );
        update.insert(
            "dense_2",
            LayerUpdate {
                weights: Tensor::from(vec![3.0]),
                bias: Tensor::from(vec![-0.25]),
            },
        );

        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let shares = split_update_with_rng(&update, 4, &mut rng);
        assert_eq!(shares.len(), 4);
        for share in &shares {
            assert_eq!(
                share.layer_names().collect::<Vec<_>>(),
                update.layer_names().collect::<Vec<_>>()
            );
        }

        // Per-layer reconstruction from the update-shaped shares.
        for name in &["dense_1", "dense_2"] {
            let weight_shares: ShareSet = shares
                .iter()
                .map(|share| share.get(name).unwrap().weights.clone())
                .collect::<Vec<_>>()
                .into();
            assert_close(
                &reconstruct(&weight_shares),
                &update.get(name).unwrap().weights,
            );
        }
    }

    #[test]
    #[should_panic(expected = "zero shares")]
    fn test_split_into_zero_shares_panics() {
        split(&Tensor::from(vec![1.0]), 0);
    }

    #[test]
    #[should_panic(expected = "mismatched length")]
    fn test_reconstruct_with_mismatched_shapes_panics() {
        let shares = ShareSet::from(vec![
            Tensor::from(vec![1.0, 2.0]),
            Tensor::from(vec![1.0]),
        ]);
        reconstruct(&shares);
    }
}
