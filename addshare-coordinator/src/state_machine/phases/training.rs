use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info};

use addshare_core::{
    message::{ParticipantId, Payload},
    transport::Transport,
};

use crate::{
    state_machine::{
        phases::{Aggregation, Phase, PhaseError, PhaseName, PhaseState, Shared},
        requests::{RequestError, StateMachineRequest},
        StateMachine,
    },
    traits::ModelEvaluator,
};

/// The training state: waits until every participant reports that its local
/// training finished, then triggers the share exchange.
#[derive(Debug)]
pub struct Training {
    /// Participants that have not reported training completion yet.
    pending: HashSet<ParticipantId>,
}

#[async_trait]
impl<T, E> Phase<T, E> for PhaseState<Training, T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    const NAME: PhaseName = PhaseName::Training;

    async fn process(&mut self) -> Result<(), PhaseError> {
        while !self.private.pending.is_empty() {
            let (req, span, resp_tx) = self.next_request().await?;
            let _enter = span.enter();
            let response = match req {
                StateMachineRequest::TrainingComplete(sender) => {
                    self.handle_training_complete(sender)
                }
                _ => Err(RequestError::MessageRejected),
            };
            let _ = resp_tx.send(response);
        }

        info!("all participants trained, triggering the share exchange");
        self.shared.broadcast(Payload::StartSecretSharing).await?;
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, E>> {
        Some(PhaseState::<Aggregation, _, _>::new(self.shared).into())
    }
}

impl<T, E> PhaseState<Training, T, E> {
    /// Creates a new training phase awaiting all participants.
    pub fn new(shared: Shared<T, E>) -> Self {
        let pending = shared.state.participants.iter().copied().collect();
        Self {
            private: Training { pending },
            shared,
        }
    }

    fn handle_training_complete(&mut self, sender: ParticipantId) -> Result<(), RequestError> {
        if !self.shared.state.participants.contains(&sender) {
            return Err(RequestError::UnknownParticipant(sender));
        }
        // Repeated notifications are harmless.
        self.private.pending.remove(&sender);
        debug!(
            "{}/{} participants still training",
            self.private.pending.len(),
            self.shared.state.participants.len()
        );
        Ok(())
    }
}
