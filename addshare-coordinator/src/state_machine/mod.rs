//! The state machine that drives the coordinator through the AddShare
//! protocol.
//!
//! # Phase states
//!
//! **Idle**
//!
//! Starts a round: bumps the round id, records the round start instant and
//! broadcasts the global model to every participant.
//!
//! **Training**
//!
//! Waits until every participant reported training completion, then
//! broadcasts the share exchange trigger.
//!
//! **Aggregation**
//!
//! Releases each participant for assembly as soon as it reports sharing
//! completion and folds the submitted partial sums into the running
//! average; completes when every partial sum arrived.
//!
//! **Publish**
//!
//! Replaces the global weights with the averaged update, evaluates the new
//! model through the [`ModelEvaluator`] black box and records the round in
//! the ledger. Moves back to idle, or to shutdown once the configured
//! number of rounds is reached.
//!
//! **Failure / Shutdown**
//!
//! A phase error halts the session. Shutdown notifies every participant
//! with the final weights and performs a clean shutdown of the request
//! channel.
//!
//! # Requests
//!
//! Inbound messages are converted to [`StateMachineRequest`]s and pushed
//! through the channel created by [`StateMachine::new`]; the engine handles
//! them strictly one at a time and answers every sender individually.
//!
//! [`ModelEvaluator`]: crate::traits::ModelEvaluator
//! [`StateMachineRequest`]: crate::state_machine::requests::StateMachineRequest

pub mod coordinator;
pub mod phases;
pub mod requests;

use derive_more::From;

use addshare_core::transport::Transport;

use self::{
    coordinator::CoordinatorState,
    phases::{
        Aggregation,
        Failure,
        Idle,
        PhaseState,
        Publish,
        Shared,
        Shutdown,
        Training,
    },
    requests::{RequestReceiver, RequestSender},
};
use crate::traits::ModelEvaluator;

/// The state machine with all its states.
#[derive(From)]
pub enum StateMachine<T, E> {
    Idle(PhaseState<Idle, T, E>),
    Training(PhaseState<Training, T, E>),
    Aggregation(PhaseState<Aggregation, T, E>),
    Publish(PhaseState<Publish, T, E>),
    Failure(PhaseState<Failure, T, E>),
    Shutdown(PhaseState<Shutdown, T, E>),
}

impl<T, E> StateMachine<T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    /// Creates a new state machine along with the sender half of its request
    /// channel.
    ///
    /// The machine starts a fresh round, or goes straight to shutdown when
    /// the ledger shows that all configured rounds already ran.
    pub fn new(state: CoordinatorState, transport: T, evaluator: E) -> (Self, RequestSender) {
        let (request_rx, request_tx) = RequestReceiver::new();
        let finished = state.round_id >= state.max_rounds;
        let shared = Shared::new(state, request_rx, transport, evaluator);
        let machine = if finished {
            PhaseState::<Shutdown, _, _>::new(shared).into()
        } else {
            PhaseState::<Idle, _, _>::new(shared).into()
        };
        (machine, request_tx)
    }

    /// Moves the state machine to the next state and consumes the current
    /// one. Returns the next state or `None` once the machine shut down.
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::Idle(state) => state.run_phase().await,
            StateMachine::Training(state) => state.run_phase().await,
            StateMachine::Aggregation(state) => state.run_phase().await,
            StateMachine::Publish(state) => state.run_phase().await,
            StateMachine::Failure(state) => state.run_phase().await,
            StateMachine::Shutdown(state) => state.run_phase().await,
        }
    }

    /// Runs the state machine until it shuts down.
    pub async fn run(mut self) {
        loop {
            self = match self.next().await {
                Some(machine) => machine,
                None => return,
            };
        }
    }
}
