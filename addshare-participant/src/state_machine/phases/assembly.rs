use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use addshare_core::{
    crypto::encrypt_update,
    ledger::ParticipantRecord,
    message::Payload,
    sharing::ShareAccumulator,
    transport::Transport,
};

use crate::{
    state_machine::{
        phases::{Idle, Phase, PhaseError, PhaseName, PhaseState, Shared},
        requests::{RequestError, StateMachineRequest},
        StateMachine,
    },
    traits::Trainer,
};

/// The assembly state: holds the accumulated shares until the coordinator
/// releases this participant, then submits the partial sum and records the
/// finished round in the ledger.
#[derive(Debug)]
pub struct Assembly {
    accumulator: Option<ShareAccumulator>,
    accuracy: f64,
    training_time: Duration,
    sharing_time: Duration,
}

#[async_trait]
impl<T, L> Phase<T, L> for PhaseState<Assembly, T, L>
where
    T: Transport,
    L: Trainer,
{
    const NAME: PhaseName = PhaseName::Assembly;

    async fn process(&mut self) -> Result<(), PhaseError> {
        loop {
            let (req, span, resp_tx) = self.next_request().await?;
            let _enter = span.enter();
            match req {
                StateMachineRequest::StartAssembly => {
                    let _ = resp_tx.send(Ok(()));
                    break;
                }
                _ => {
                    let _ = resp_tx.send(Err(RequestError::MessageRejected));
                }
            }
        }

        self.submit_partial_sum().await?;

        let state = &mut self.shared.state;
        state.ledger.append(ParticipantRecord {
            round: state.round_id,
            accuracy: self.private.accuracy,
            training_time: self.private.training_time.as_secs_f64(),
            secret_sharing_time: self.private.sharing_time.as_secs_f64(),
        })?;
        info!("round {} recorded in the ledger", state.round_id);
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, L>> {
        Some(PhaseState::<Idle, _, _>::new(self.shared).into())
    }
}

impl<T, L> PhaseState<Assembly, T, L> {
    /// Creates a new assembly phase.
    pub fn new(
        shared: Shared<T, L>,
        accumulator: ShareAccumulator,
        accuracy: f64,
        training_time: Duration,
        sharing_time: Duration,
    ) -> Self {
        Self {
            private: Assembly {
                accumulator: Some(accumulator),
                accuracy,
                training_time,
                sharing_time,
            },
            shared,
        }
    }
}

impl<T: Transport, L> PhaseState<Assembly, T, L> {
    /// Folds the accumulated shares into the partial sum and sends it to the
    /// coordinator, sealed when a coordinator public key is configured.
    async fn submit_partial_sum(&mut self) -> Result<(), PhaseError> {
        let accumulator = self
            .private
            .accumulator
            .take()
            .ok_or(PhaseError::Internal("the partial sum was already submitted"))?;
        let partial_sum = accumulator.into_partial_sum();

        let payload = match &self.shared.state.coordinator_public_key {
            Some(public_key) => Payload::UpdateEncrypted {
                chunks: encrypt_update(public_key, &partial_sum)?,
            },
            None => Payload::Update { partial_sum },
        };
        info!("submitting the partial sum as `{}`", payload.kind());
        self.shared.send_to_coordinator(payload).await?;
        Ok(())
    }
}
