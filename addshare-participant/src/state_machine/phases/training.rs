use async_trait::async_trait;
use tracing::info;

use addshare_core::{message::Payload, transport::Transport};

use crate::{
    state_machine::{
        phases::{Exchange, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
    traits::{Trainer, TrainingReport},
};

/// The training state: runs the local learning step.
///
/// Requests arriving while training runs stay queued in the request channel
/// and are picked up by the exchange phase.
#[derive(Debug)]
pub struct Training {
    report: Option<TrainingReport>,
}

#[async_trait]
impl<T, L> Phase<T, L> for PhaseState<Training, T, L>
where
    T: Transport,
    L: Trainer,
{
    const NAME: PhaseName = PhaseName::Training;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let model = self
            .shared
            .state
            .global_model
            .as_ref()
            .ok_or(PhaseError::Internal("no global model to train on"))?
            .clone();

        info!("running the local training step");
        let report = self
            .shared
            .trainer
            .train(&model)
            .await
            .map_err(|err| PhaseError::Training(Box::new(err)))?;
        info!(
            "training finished in {:?} with accuracy {}",
            report.duration, report.accuracy
        );
        self.private.report = Some(report);

        self.shared
            .send_to_coordinator(Payload::TrainingComplete)
            .await?;
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, L>> {
        let PhaseState { private, shared } = self;
        // Safe unwrap: process() stored the report before it returned Ok.
        let report = private.report.unwrap();
        Some(PhaseState::<Exchange, _, _>::new(shared, report).into())
    }
}

impl<T, L> PhaseState<Training, T, L> {
    /// Creates a new training phase.
    pub fn new(shared: Shared<T, L>) -> Self {
        Self {
            private: Training { report: None },
            shared,
        }
    }
}
