//! The state machine that drives a participant through the AddShare
//! protocol.
//!
//! # Phase states
//!
//! **Idle**
//!
//! Parked between rounds. A round announcement captures the peer set, bumps
//! the local round and adopts the announced global model; a session end
//! adopts the final weights and moves to shutdown.
//!
//! **Training**
//!
//! Runs the [`Trainer`] black box on the announced model and reports
//! completion to the coordinator. Inbound messages keep queueing while
//! training runs.
//!
//! **Exchange**
//!
//! Splits the local update into one additive share per node, keeps one,
//! sends one distinct share to every peer and collects one share from each
//! of them, in any arrival order. Reports `sharing-complete` exactly once.
//!
//! **Assembly**
//!
//! Waits for the coordinator's per-participant release, submits the partial
//! sum (sealed if a coordinator key is configured) and records the round in
//! the ledger.
//!
//! **Failure / Shutdown**
//!
//! A phase error halts the node: it is logged and the machine performs a
//! clean shutdown of the request channel.
//!
//! # Requests
//!
//! Inbound messages are converted to [`StateMachineRequest`]s and pushed
//! through the channel created by [`StateMachine::new`]; the engine handles
//! them strictly one at a time and answers every sender individually.
//!
//! [`Trainer`]: crate::traits::Trainer
//! [`StateMachineRequest`]: crate::state_machine::requests::StateMachineRequest

pub mod participant;
pub mod phases;
pub mod requests;

use derive_more::From;

use addshare_core::transport::Transport;

use self::{
    participant::ParticipantState,
    phases::{Assembly, Exchange, Failure, Idle, PhaseState, Shared, Shutdown, Training},
    requests::{RequestReceiver, RequestSender},
};
use crate::traits::Trainer;

/// The state machine with all its states.
#[derive(From)]
pub enum StateMachine<T, L> {
    Idle(PhaseState<Idle, T, L>),
    Training(PhaseState<Training, T, L>),
    Exchange(PhaseState<Exchange, T, L>),
    Assembly(PhaseState<Assembly, T, L>),
    Failure(PhaseState<Failure, T, L>),
    Shutdown(PhaseState<Shutdown, T, L>),
}

impl<T, L> StateMachine<T, L>
where
    T: Transport,
    L: Trainer,
{
    /// Creates a new state machine starting in the idle phase, along with
    /// the sender half of its request channel.
    pub fn new(state: ParticipantState, transport: T, trainer: L) -> (Self, RequestSender) {
        let (request_rx, request_tx) = RequestReceiver::new();
        let shared = Shared::new(state, request_rx, transport, trainer);
        (PhaseState::<Idle, _, _>::new(shared).into(), request_tx)
    }

    /// Moves the state machine to the next state and consumes the current
    /// one. Returns the next state or `None` once the machine shut down.
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::Idle(state) => state.run_phase().await,
            StateMachine::Training(state) => state.run_phase().await,
            StateMachine::Exchange(state) => state.run_phase().await,
            StateMachine::Assembly(state) => state.run_phase().await,
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
