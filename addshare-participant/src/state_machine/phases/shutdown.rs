use async_trait::async_trait;

use addshare_core::transport::Transport;

use crate::{
    state_machine::{
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared},
        requests::RequestError,
        StateMachine,
    },
    traits::Trainer,
};

/// The shutdown state.
#[derive(Debug)]
pub struct Shutdown;

#[async_trait]
impl<T, L> Phase<T, L> for PhaseState<Shutdown, T, L>
where
    T: Transport,
    L: Trainer,
{
    const NAME: PhaseName = PhaseName::Shutdown;

    /// Shuts down the state machine by performing a clean shutdown of the
    /// request channel: it is closed and all remaining requests are answered
    /// with a rejection.
    async fn process(&mut self) -> Result<(), PhaseError> {
        self.shared.request_rx.close();
        while let Some((_, _, resp_tx)) = self.shared.request_rx.recv().await {
            let _ = resp_tx.send(Err(RequestError::MessageRejected));
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, L>> {
        None
    }
}

impl<T, L> PhaseState<Shutdown, T, L> {
    /// Creates a new shutdown phase.
    pub fn new(shared: Shared<T, L>) -> Self {
        Self {
            private: Shutdown,
            shared,
        }
    }
}
