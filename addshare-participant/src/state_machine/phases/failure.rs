use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use addshare_core::{
    crypto::CryptoError,
    ledger::LedgerError,
    transport::{Transport, TransportError},
};

use crate::{
    state_machine::{
        phases::{Phase, PhaseName, PhaseState, Shared, Shutdown},
        StateMachine,
    },
    traits::Trainer,
};

/// Errors which can occur during the execution of a phase.
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("request channel error: {0}")]
    RequestChannel(&'static str),
    #[error("sending a message failed: {0}")]
    Transport(#[from] TransportError),
    #[error("local training failed: {0}")]
    Training(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("encrypting the partial sum failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("writing the round ledger failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// The failure state.
///
/// A phase error halts the node: there is no self-healing, the error is
/// logged and the machine shuts down.
#[derive(Debug)]
pub struct Failure {
    error: PhaseError,
}

#[async_trait]
impl<T, L> Phase<T, L> for PhaseState<Failure, T, L>
where
    T: Transport,
    L: Trainer,
{
    const NAME: PhaseName = PhaseName::Failure;

    async fn process(&mut self) -> Result<(), PhaseError> {
        error!("phase failed: {}", self.private.error);
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, L>> {
        Some(PhaseState::<Shutdown, _, _>::new(self.shared).into())
    }
}

impl<T, L> PhaseState<Failure, T, L> {
    /// Creates a new failure phase.
    pub fn new(shared: Shared<T, L>, error: PhaseError) -> Self {
        Self {
            private: Failure { error },
            shared,
        }
    }
}
