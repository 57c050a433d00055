//! Additive secret sharing of model updates.
//!
//! # Splitting
//!
//! [`split`] cuts a tensor `t` into `n` shares: the first `n - 1` are drawn
//! uniformly at random and the last one is `t - Σ shares[0..n-1]`, so the
//! shares always sum back to `t` exactly (up to the floating-point
//! accumulation order used at reconstruction). Without knowledge of `n - 1`
//! of the shares, the remaining share reveals nothing about `t` beyond the
//! numeric range of the randomness. [`split_update`] applies the scheme
//! independently to every layer component of a [`ModelUpdate`] and rejoins
//! the pieces by layer name, yielding `n` update-shaped shares.
//!
//! # Accumulation
//!
//! During the exchange phase a participant folds the one share it kept and
//! the one share received from each peer into a [`ShareAccumulator`]; the
//! result is its *partial sum*, which is meaningless in isolation. The
//! coordinator folds the partial sums of all participants into a
//! [`RunningAverage`], dividing each contribution by the participant count
//! *before* accumulating so that intermediate magnitudes stay bounded. Since
//! every share appears in exactly one partial sum, the finished average is
//! the true cross-participant mean of the original updates.
//!
//! Shape agreement inside the pure algorithms ([`split`], [`reconstruct`])
//! is a programming invariant and violations panic. The accumulators, in
//! contrast, take shares and partial sums off the wire, so they validate
//! layer names and tensor lengths first and reject mismatches without
//! corrupting previously accumulated contributions.
//!
//! [`ModelUpdate`]: crate::model::ModelUpdate

mod aggregation;
mod splitting;

pub use self::{
    aggregation::{AccumulationError, RunningAverage, ShareAccumulator},
    splitting::{reconstruct, split, split_update, split_update_with_rng, split_with_rng, ShareSet},
};
