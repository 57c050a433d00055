use derive_more::Display;
use futures::StreamExt;
use tracing::{debug, error, error_span, info, warn, Span};
use tracing_futures::Instrument;

use addshare_core::{
    message::{Message, ParticipantId, Payload, Source},
    transport::{Transport, TransportError},
};

use crate::{
    state_machine::{
        coordinator::CoordinatorState,
        phases::{Failure, PhaseError},
        requests::{RequestReceiver, ResponseSender, StateMachineRequest},
        StateMachine,
    },
    traits::ModelEvaluator,
};

/// The name of the current phase.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PhaseName {
    #[display(fmt = "Idle")]
    Idle,
    #[display(fmt = "Training")]
    Training,
    #[display(fmt = "Aggregation")]
    Aggregation,
    #[display(fmt = "Publish")]
    Publish,
    #[display(fmt = "Failure")]
    Failure,
    #[display(fmt = "Shutdown")]
    Shutdown,
}

/// A trait that must be implemented by a state in order to move to a next state.
#[async_trait::async_trait]
pub trait Phase<T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), PhaseError>;

    /// Moves from this phase to the next phase.
    fn next(self) -> Option<StateMachine<T, E>>;
}

/// The coordinator state and the I/O interfaces that are shared and
/// accessible by all `PhaseState`s.
pub struct Shared<T, E> {
    /// The coordinator state.
    pub(in crate::state_machine) state: CoordinatorState,
    /// The request receiver half.
    pub(in crate::state_machine) request_rx: RequestReceiver,
    /// The outbound message transport.
    pub(in crate::state_machine) transport: T,
    /// The model evaluation backend.
    pub(in crate::state_machine) evaluator: E,
}

impl<T, E> Shared<T, E> {
    /// Creates a new shared state.
    pub fn new(
        state: CoordinatorState,
        request_rx: RequestReceiver,
        transport: T,
        evaluator: E,
    ) -> Self {
        Self {
            state,
            request_rx,
            transport,
            evaluator,
        }
    }
}

impl<T: Transport, E> Shared<T, E> {
    /// Sends a payload to one participant.
    pub async fn send_to_participant(
        &mut self,
        participant: ParticipantId,
        payload: Payload,
    ) -> Result<(), TransportError> {
        let message = Message::new(Source::Coordinator, payload);
        self.transport
            .send(Source::Participant(participant), &message)
            .await
    }

    /// Sends a payload to every participant, in canonical order.
    pub async fn broadcast(&mut self, payload: Payload) -> Result<(), TransportError> {
        let participants = self.state.participants.clone();
        for participant in participants {
            self.send_to_participant(participant, payload.clone()).await?;
        }
        Ok(())
    }
}

/// The state corresponding to a phase of the AddShare protocol.
///
/// This contains the state-dependent `private` state and the
/// state-independent `shared` state which is shared across state
/// transitions.
pub struct PhaseState<S, T, E> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared<T, E>,
}

impl<S, T, E> PhaseState<S, T, E>
where
    S: Send,
    T: Transport,
    E: ModelEvaluator,
    Self: Phase<T, E>,
{
    /// Runs the current phase to completion, then transitions to the next
    /// phase or moves to [`Failure`] if the phase tasks failed.
    ///
    /// Requests that queued up during the phase stay in the channel: partial
    /// sums may arrive while another participant has not yet reported its
    /// sharing completion, and the next phase must still see them.
    pub async fn run_phase(mut self) -> Option<StateMachine<T, E>> {
        let phase = Self::NAME;
        let span = error_span!("phase", name = %phase, round_id = self.shared.state.round_id);

        async move {
            info!("starting phase");

            if let Err(err) = self.process().await {
                warn!("failed to perform the phase tasks");
                return Some(self.into_failure_state(err));
            }
            info!("phase ran successfully");

            debug!("transitioning to the next phase");
            self.next()
        }
        .instrument(span)
        .await
    }

    fn into_failure_state(self, err: PhaseError) -> StateMachine<T, E> {
        PhaseState::<Failure, _, _>::new(self.shared, err).into()
    }
}

impl<S, T, E> PhaseState<S, T, E> {
    /// Receives the next [`StateMachineRequest`].
    ///
    /// # Errors
    /// Returns [`PhaseError::RequestChannel`] when all sender halves have
    /// been dropped.
    pub async fn next_request(
        &mut self,
    ) -> Result<(StateMachineRequest, Span, ResponseSender), PhaseError> {
        debug!("waiting for the next incoming request");
        self.shared.request_rx.next().await.ok_or_else(|| {
            error!("request receiver broken: senders have been dropped");
            PhaseError::RequestChannel("all message senders have been dropped!")
        })
    }
}
