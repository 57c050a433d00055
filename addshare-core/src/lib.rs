//! # AddShare: secure federated averaging with additive secret sharing
//!
//! AddShare coordinates a federated-learning round among a fixed set of
//! participants and one coordinator. The coordinator learns the **average**
//! of the participants' model updates without ever observing an individual
//! update: every participant splits its update into `n` additive shares
//! (one per node), distributes `n - 1` of them pairwise, keeps one, and
//! forwards only the element-wise sum of the shares it holds. Because every
//! generated share ends up in exactly one partial sum, the grand total of
//! the partial sums equals the grand total of the original updates, while no
//! single partial sum is interpretable on its own.
//!
//! This crate contains the protocol-agnostic building blocks shared by the
//! participant and coordinator engines:
//!
//! - [`model`]: tensors, named per-layer weight updates and the global model.
//! - [`sharing`]: the additive secret-sharing scheme and the accumulators
//!   used to build partial sums and the global average.
//! - [`message`]: the closed set of wire messages and their JSON codec.
//! - [`transport`]: the injectable delivery capability with bounded retries.
//! - [`crypto`]: the optional sealed-box payload transform for updates.
//! - [`ledger`]: the append-only round ledger used for crash recovery.
//!
//! The engines themselves live in the `addshare-participant` and
//! `addshare-coordinator` crates.

pub mod crypto;
pub mod ledger;
pub mod message;
pub mod model;
pub mod sharing;
pub mod transport;

#[cfg(feature = "testutils")]
pub mod testutils;

pub use self::message::{Message, ParticipantId, Payload, Source};
