//! The interface between the engine and the local learning framework.

use std::{convert::Infallible, time::Duration};

use async_trait::async_trait;

use addshare_core::model::{GlobalModel, ModelUpdate};

/// The outcome of one local training step.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// The locally trained weight update.
    pub update: ModelUpdate,
    /// The accuracy the trained model reached on the local test split.
    pub accuracy: f64,
    /// Training wall time.
    pub duration: Duration,
}

/// The local learning step, consumed as a black box.
///
/// How the model is built from the architecture description and what the
/// training data looks like is entirely up to the implementor.
#[async_trait]
pub trait Trainer: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Trains on the given global model and reports the resulting update.
    async fn train(&mut self, model: &GlobalModel) -> Result<TrainingReport, Self::Error>;
}

/// A trainer that does no learning: it reports the global weights back
/// unchanged with accuracy 0. Useful for running the protocol stack without
/// an ML backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrainer;

#[async_trait]
impl Trainer for NoopTrainer {
    type Error = Infallible;

    async fn train(&mut self, model: &GlobalModel) -> Result<TrainingReport, Self::Error> {
        Ok(TrainingReport {
            update: model.weights.clone(),
            accuracy: 0.0,
            duration: Duration::from_secs(0),
        })
    }
}
