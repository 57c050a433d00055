use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use addshare_core::{
    ledger::LedgerError,
    transport::{Transport, TransportError},
};

use crate::{
    state_machine::{
        phases::{Phase, PhaseName, PhaseState, Shared, Shutdown},
        StateMachine,
    },
    traits::ModelEvaluator,
};

/// Errors which can occur during the execution of a phase.
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("request channel error: {0}")]
    RequestChannel(&'static str),
    #[error("sending a message failed: {0}")]
    Transport(#[from] TransportError),
    #[error("evaluating the global model failed: {0}")]
    Evaluation(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("writing the round ledger failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// The failure state.
///
/// A phase error halts the session: the error is logged and the machine
/// shuts down, telling the participants that the session is over.
#[derive(Debug)]
pub struct Failure {
    error: PhaseError,
}

#[async_trait]
impl<T, E> Phase<T, E> for PhaseState<Failure, T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    const NAME: PhaseName = PhaseName::Failure;

    async fn process(&mut self) -> Result<(), PhaseError> {
        error!("phase failed: {}", self.private.error);
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, E>> {
        Some(PhaseState::<Shutdown, _, _>::new(self.shared).into())
    }
}

impl<T, E> PhaseState<Failure, T, E> {
    /// Creates a new failure phase.
    pub fn new(shared: Shared<T, E>, error: PhaseError) -> Self {
        Self {
            private: Failure { error },
            shared,
        }
    }
}
