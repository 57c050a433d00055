//! The interface between the engine and the model evaluation backend.

use std::convert::Infallible;

use async_trait::async_trait;

use addshare_core::model::GlobalModel;

/// Evaluates the freshly averaged global model, consumed as a black box.
#[async_trait]
pub trait ModelEvaluator: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Measures the accuracy of the given model on the evaluation data.
    async fn evaluate(&mut self, model: &GlobalModel) -> Result<f64, Self::Error>;
}

/// An evaluator that does no evaluation and always reports accuracy 0.
/// Useful for running the protocol stack without an ML backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvaluator;

#[async_trait]
impl ModelEvaluator for NoopEvaluator {
    type Error = Infallible;

    async fn evaluate(&mut self, _model: &GlobalModel) -> Result<f64, Self::Error> {
        Ok(0.0)
    }
}
