use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::{debug, info};
use tracing_futures::Instrument;

use addshare_core::{
    message::{ParticipantId, Payload},
    sharing::{split_update, ShareAccumulator},
    transport::Transport,
};

use crate::{
    state_machine::{
        phases::{Assembly, Phase, PhaseError, PhaseName, PhaseState, Shared},
        requests::{ModelShareRequest, RequestError, StateMachineRequest},
        StateMachine,
    },
    traits::{Trainer, TrainingReport},
};

/// The exchange state: distributes one share of the local update to every
/// peer and collects one share from each of them.
///
/// The coordinator's exchange trigger and the peers' shares may arrive in
/// any order, so sending and receiving are tracked independently: the phase
/// is complete once all shares went out *and* every peer contributed. Only
/// then is `sharing-complete` reported, exactly once.
#[derive(Debug)]
pub struct Exchange {
    report: TrainingReport,
    /// The running sum of the kept share and the received peer shares.
    accumulator: ShareAccumulator,
    sent_all: bool,
    received: HashSet<ParticipantId>,
    started: Option<Instant>,
    sharing_time: Duration,
}

#[async_trait]
impl<T, L> Phase<T, L> for PhaseState<Exchange, T, L>
where
    T: Transport,
    L: Trainer,
{
    const NAME: PhaseName = PhaseName::Exchange;

    async fn process(&mut self) -> Result<(), PhaseError> {
        while !self.is_complete() {
            let (req, span, resp_tx) = self.next_request().await?;
            match req {
                StateMachineRequest::StartSecretSharing => {
                    if self.private.sent_all {
                        debug!("repeated exchange trigger");
                        let _ = resp_tx.send(Err(RequestError::MessageRejected));
                        continue;
                    }
                    match self.distribute_shares().instrument(span).await {
                        Ok(()) => {
                            let _ = resp_tx.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = resp_tx.send(Err(RequestError::InternalError(
                                "failed to distribute the shares",
                            )));
                            return Err(err);
                        }
                    }
                }
                StateMachineRequest::ModelShare(share) => {
                    let response = span.in_scope(|| self.handle_share(share));
                    let _ = resp_tx.send(response);
                }
                _ => {
                    let _ = resp_tx.send(Err(RequestError::MessageRejected));
                }
            }
        }

        self.private.sharing_time = self
            .private
            .started
            .map(|started| started.elapsed())
            .unwrap_or_default();
        info!(
            "share exchange finished in {:?}, reporting completion",
            self.private.sharing_time
        );
        self.shared
            .send_to_coordinator(Payload::SharingComplete)
            .await?;
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, L>> {
        let PhaseState { private, shared } = self;
        let Exchange {
            report,
            accumulator,
            sharing_time,
            ..
        } = private;
        Some(
            PhaseState::<Assembly, _, _>::new(
                shared,
                accumulator,
                report.accuracy,
                report.duration,
                sharing_time,
            )
            .into(),
        )
    }
}

impl<T, L> PhaseState<Exchange, T, L> {
    /// Creates a new exchange phase for the given training outcome.
    pub fn new(shared: Shared<T, L>, report: TrainingReport) -> Self {
        let accumulator = ShareAccumulator::new(&report.update);
        Self {
            private: Exchange {
                report,
                accumulator,
                sent_all: false,
                received: HashSet::new(),
                started: None,
                sharing_time: Duration::from_secs(0),
            },
            shared,
        }
    }

    fn is_complete(&self) -> bool {
        self.private.sent_all && self.private.received.len() == self.shared.state.peers.len()
    }

    /// Starts the exchange clock on the first sharing event.
    fn touch_clock(&mut self) {
        if self.private.started.is_none() {
            self.private.started = Some(Instant::now());
        }
    }

    fn handle_share(&mut self, req: ModelShareRequest) -> Result<(), RequestError> {
        self.touch_clock();
        let ModelShareRequest { sender, share } = req;
        if !self.shared.state.peers.contains(&sender) {
            return Err(RequestError::UnknownPeer(sender));
        }
        if self.private.received.contains(&sender) {
            return Err(RequestError::DuplicateShare(sender));
        }
        self.private.accumulator.accumulate(&share)?;
        self.private.received.insert(sender);
        debug!(
            "share {}/{} received",
            self.private.received.len(),
            self.shared.state.peers.len()
        );
        Ok(())
    }
}

impl<T: Transport, L> PhaseState<Exchange, T, L> {
    /// Splits the local update into one share per node, keeps the last share
    /// and sends the others out, one distinct share per peer in peer order.
    async fn distribute_shares(&mut self) -> Result<(), PhaseError> {
        self.touch_clock();
        let share_count = self.shared.state.peers.len() + 1;
        let mut shares = split_update(&self.private.report.update, share_count);

        // Safe unwrap: share_count >= 1, so the split yielded at least one share.
        let own = shares.pop().unwrap();
        self.private
            .accumulator
            .accumulate(&own)
            .map_err(|_| PhaseError::Internal("own share does not match the update template"))?;

        info!("distributing {} shares", shares.len());
        let peers = self.shared.state.peers.clone();
        for (peer, share) in peers.into_iter().zip(shares) {
            self.shared
                .send_to_peer(peer, Payload::ModelShare { share })
                .await?;
        }
        self.private.sent_all = true;
        Ok(())
    }
}
