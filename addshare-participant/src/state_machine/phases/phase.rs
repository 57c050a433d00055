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
        participant::ParticipantState,
        phases::{Failure, PhaseError},
        requests::{RequestReceiver, ResponseSender, StateMachineRequest},
        StateMachine,
    },
    traits::Trainer,
};

/// The name of the current phase.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PhaseName {
    #[display(fmt = "Idle")]
    Idle,
    #[display(fmt = "Training")]
    Training,
    #[display(fmt = "Exchange")]
    Exchange,
    #[display(fmt = "Assembly")]
    Assembly,
    #[display(fmt = "Failure")]
    Failure,
    #[display(fmt = "Shutdown")]
    Shutdown,
}

/// A trait that must be implemented by a state in order to move to a next state.
#[async_trait::async_trait]
pub trait Phase<T, L>
where
    T: Transport,
    L: Trainer,
{
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), PhaseError>;

    /// Moves from this phase to the next phase.
    fn next(self) -> Option<StateMachine<T, L>>;
}

/// The participant state and the I/O interfaces that are shared and
/// accessible by all `PhaseState`s.
pub struct Shared<T, L> {
    /// The participant state.
    pub(in crate::state_machine) state: ParticipantState,
    /// The request receiver half.
    pub(in crate::state_machine) request_rx: RequestReceiver,
    /// The outbound message transport.
    pub(in crate::state_machine) transport: T,
    /// The local learning step.
    pub(in crate::state_machine) trainer: L,
}

impl<T, L> Shared<T, L> {
    /// Creates a new shared state.
    pub fn new(state: ParticipantState, request_rx: RequestReceiver, transport: T, trainer: L) -> Self {
        Self {
            state,
            request_rx,
            transport,
            trainer,
        }
    }
}

impl<T: Transport, L> Shared<T, L> {
    /// Sends a payload to the coordinator, stamped with this participant's id.
    pub async fn send_to_coordinator(&mut self, payload: Payload) -> Result<(), TransportError> {
        let message = Message::new(Source::Participant(self.state.id), payload);
        self.transport.send(Source::Coordinator, &message).await
    }

    /// Sends a payload to a peer, stamped with this participant's id.
    pub async fn send_to_peer(
        &mut self,
        peer: ParticipantId,
        payload: Payload,
    ) -> Result<(), TransportError> {
        let message = Message::new(Source::Participant(self.state.id), payload);
        self.transport.send(Source::Participant(peer), &message).await
    }
}

/// The state corresponding to a phase of the AddShare protocol.
///
/// This contains the state-dependent `private` state and the
/// state-independent `shared` state which is shared across state
/// transitions.
pub struct PhaseState<S, T, L> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared participant state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared<T, L>,
}

impl<S, T, L> PhaseState<S, T, L>
where
    S: Send,
    T: Transport,
    L: Trainer,
    Self: Phase<T, L>,
{
    /// Runs the current phase to completion, then transitions to the next
    /// phase or moves to [`Failure`] if the phase tasks failed.
    ///
    /// Requests that queued up during the phase are deliberately left in the
    /// channel: a share may arrive before this node's own exchange trigger,
    /// and the next phase must still see it.
    pub async fn run_phase(mut self) -> Option<StateMachine<T, L>> {
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

    fn into_failure_state(self, err: PhaseError) -> StateMachine<T, L> {
        PhaseState::<Failure, _, _>::new(self.shared, err).into()
    }
}

impl<S, T, L> PhaseState<S, T, L> {
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
