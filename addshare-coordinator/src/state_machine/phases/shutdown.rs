use async_trait::async_trait;
use tracing::{info, warn};

use addshare_core::{message::Payload, transport::Transport};

use crate::{
    state_machine::{
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared},
        requests::RequestError,
        StateMachine,
    },
    traits::ModelEvaluator,
};

/// The shutdown state: tells every participant that the session is over and
/// performs a clean shutdown of the request channel.
#[derive(Debug)]
pub struct Shutdown;

#[async_trait]
impl<T, E> Phase<T, E> for PhaseState<Shutdown, T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    const NAME: PhaseName = PhaseName::Shutdown;

    async fn process(&mut self) -> Result<(), PhaseError> {
        info!("ending the session");
        let weights = self.shared.state.global_model.weights.clone();
        let participants = self.shared.state.participants.clone();
        for participant in participants {
            // A participant that already went away must not keep the others
            // from being notified.
            if let Err(err) = self
                .shared
                .send_to_participant(
                    participant,
                    Payload::EndSession {
                        weights: weights.clone(),
                    },
                )
                .await
            {
                warn!("failed to notify participant {}: {}", participant, err);
            }
        }

        self.shared.request_rx.close();
        while let Some((_, _, resp_tx)) = self.shared.request_rx.recv().await {
            let _ = resp_tx.send(Err(RequestError::MessageRejected));
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, E>> {
        None
    }
}

impl<T, E> PhaseState<Shutdown, T, E> {
    /// Creates a new shutdown phase.
    pub fn new(shared: Shared<T, E>) -> Self {
        Self {
            private: Shutdown,
            shared,
        }
    }
}
