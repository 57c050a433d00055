use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use addshare_core::{message::Payload, transport::Transport};

use crate::{
    state_machine::{
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared, Training},
        StateMachine,
    },
    traits::ModelEvaluator,
};

/// The idle state: starts a new round.
#[derive(Debug)]
pub struct Idle;

#[async_trait]
impl<T, E> Phase<T, E> for PhaseState<Idle, T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    const NAME: PhaseName = PhaseName::Idle;

    /// Announces the round: records the round start instant and broadcasts
    /// the current global model to every participant.
    async fn process(&mut self) -> Result<(), PhaseError> {
        self.shared.state.round_start = Some(Instant::now());

        let model = self.shared.state.global_model.clone();
        info!(
            "announcing round {} to {} participants",
            self.shared.state.round_id,
            self.shared.state.participants.len()
        );
        self.shared
            .broadcast(Payload::StartTraining {
                participants: self.shared.state.participants.clone(),
                architecture: model.architecture,
                weights: model.weights,
            })
            .await?;
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, E>> {
        Some(PhaseState::<Training, _, _>::new(self.shared).into())
    }
}

impl<T, E> PhaseState<Idle, T, E> {
    /// Creates a new idle phase.
    ///
    /// The round id is bumped here, when the phase is instantiated, so that
    /// it is already correct for everything the phase logs and sends.
    pub fn new(mut shared: Shared<T, E>) -> Self {
        shared.state.round_id += 1;
        debug!("new round ID = {}", shared.state.round_id);
        Self {
            private: Idle,
            shared,
        }
    }
}
