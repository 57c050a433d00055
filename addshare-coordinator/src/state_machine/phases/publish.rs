use async_trait::async_trait;
use tracing::info;

use addshare_core::{ledger::CoordinatorRecord, sharing::RunningAverage, transport::Transport};

use crate::{
    state_machine::{
        phases::{Idle, Phase, PhaseError, PhaseName, PhaseState, Shared, Shutdown},
        StateMachine,
    },
    traits::ModelEvaluator,
};

/// The publish state: replaces the global weights with the averaged update,
/// evaluates the new model and records the finished round in the ledger.
#[derive(Debug)]
pub struct Publish {
    average: Option<RunningAverage>,
    accuracy: f64,
}

#[async_trait]
impl<T, E> Phase<T, E> for PhaseState<Publish, T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    const NAME: PhaseName = PhaseName::Publish;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let average = self
            .private
            .average
            .take()
            .ok_or(PhaseError::Internal("the round was already published"))?;
        if !average.is_complete() {
            return Err(PhaseError::Internal(
                "not all partial sums have been folded into the average",
            ));
        }
        self.shared.state.global_model.weights = average.into_model_update();

        info!("evaluating the new global model");
        let model = self.shared.state.global_model.clone();
        self.private.accuracy = self
            .shared
            .evaluator
            .evaluate(&model)
            .await
            .map_err(|err| PhaseError::Evaluation(Box::new(err)))?;

        let state = &mut self.shared.state;
        let elapsed = state
            .round_start
            .take()
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or_default();
        state.ledger.append(CoordinatorRecord {
            round: state.round_id,
            accuracy: self.private.accuracy,
            elapsed,
        })?;
        info!(
            "round {} published with accuracy {}",
            state.round_id, self.private.accuracy
        );
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, E>> {
        Some(if self.shared.state.round_id < self.shared.state.max_rounds {
            PhaseState::<Idle, _, _>::new(self.shared).into()
        } else {
            PhaseState::<Shutdown, _, _>::new(self.shared).into()
        })
    }
}

impl<T, E> PhaseState<Publish, T, E> {
    /// Creates a new publish phase for the finished round.
    pub fn new(shared: Shared<T, E>, average: RunningAverage) -> Self {
        Self {
            private: Publish {
                average: Some(average),
                accuracy: 0.0,
            },
            shared,
        }
    }

    #[cfg(test)]
    pub fn average(&self) -> &RunningAverage {
        // Safe unwrap: only called on a freshly constructed phase.
        self.private.average.as_ref().unwrap()
    }
}
