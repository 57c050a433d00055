use async_trait::async_trait;
use tracing::{debug, info};

use addshare_core::{model::GlobalModel, transport::Transport};

use crate::{
    state_machine::{
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared, Shutdown, Training},
        requests::{RequestError, StartTrainingRequest, StateMachineRequest},
        StateMachine,
    },
    traits::Trainer,
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Train,
    End,
}

/// The idle state: parked between rounds, waiting for the coordinator to
/// either announce a new round or end the session.
#[derive(Debug)]
pub struct Idle {
    outcome: Option<Outcome>,
}

#[async_trait]
impl<T, L> Phase<T, L> for PhaseState<Idle, T, L>
where
    T: Transport,
    L: Trainer,
{
    const NAME: PhaseName = PhaseName::Idle;

    async fn process(&mut self) -> Result<(), PhaseError> {
        while self.private.outcome.is_none() {
            let (req, span, resp_tx) = self.next_request().await?;
            let _enter = span.enter();
            let response = match req {
                StateMachineRequest::StartTraining(req) => self.handle_start_training(req),
                StateMachineRequest::EndSession(weights) => {
                    info!("session over, adopting the final model");
                    if let Some(model) = self.shared.state.global_model.as_mut() {
                        model.weights = weights.clone();
                    }
                    self.shared.state.final_weights = Some(weights);
                    self.private.outcome = Some(Outcome::End);
                    Ok(())
                }
                _ => Err(RequestError::MessageRejected),
            };
            let _ = resp_tx.send(response);
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, L>> {
        Some(match self.private.outcome {
            Some(Outcome::Train) => PhaseState::<Training, _, _>::new(self.shared).into(),
            _ => PhaseState::<Shutdown, _, _>::new(self.shared).into(),
        })
    }
}

impl<T, L> PhaseState<Idle, T, L> {
    /// Creates a new idle phase.
    pub fn new(shared: Shared<T, L>) -> Self {
        Self {
            private: Idle { outcome: None },
            shared,
        }
    }

    fn handle_start_training(&mut self, req: StartTrainingRequest) -> Result<(), RequestError> {
        let StartTrainingRequest {
            participants,
            architecture,
            weights,
        } = req;

        if !participants.contains(&self.shared.state.id) {
            debug!("round announcement does not list this participant");
            return Err(RequestError::MessageRejected);
        }

        let state = &mut self.shared.state;
        state.peers = participants
            .into_iter()
            .filter(|id| *id != state.id)
            .collect();
        state.round_id += 1;
        state.global_model = Some(GlobalModel::new(architecture, weights));
        info!(
            "round {} announced with {} peers",
            state.round_id,
            state.peers.len()
        );

        self.private.outcome = Some(Outcome::Train);
        Ok(())
    }
}
