use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use tracing_futures::Instrument;

use addshare_core::{
    crypto::decrypt_update,
    message::{ParticipantId, Payload},
    model::ModelUpdate,
    sharing::RunningAverage,
    transport::Transport,
};

use crate::{
    state_machine::{
        phases::{Phase, PhaseError, PhaseName, PhaseState, Publish, Shared},
        requests::{
            EncryptedUpdateRequest,
            RequestError,
            StateMachineRequest,
            UpdateRequest,
        },
        StateMachine,
    },
    traits::ModelEvaluator,
};

/// The aggregation state: releases each participant for assembly as soon as
/// it reports sharing completion, and folds the submitted partial sums into
/// the running average.
///
/// Releases are per participant, so a fast participant's partial sum may
/// arrive while a slow one has not yet reported sharing completion; both
/// kinds of requests are therefore handled by this single phase, in any
/// order. The phase completes exactly when every participant's partial sum
/// has been folded in.
///
/// A sharing completion is acknowledged *before* the assembly release is
/// sent: over the HTTP transport the sender's engine is blocked inside its
/// own send until that verdict arrives, so releasing first would leave both
/// engines waiting on each other.
#[derive(Debug)]
pub struct Aggregation {
    /// Participants whose partial sum is still outstanding.
    pending: HashSet<ParticipantId>,
    /// Participants already released for assembly.
    released: HashSet<ParticipantId>,
    average: RunningAverage,
}

#[async_trait]
impl<T, E> Phase<T, E> for PhaseState<Aggregation, T, E>
where
    T: Transport,
    E: ModelEvaluator,
{
    const NAME: PhaseName = PhaseName::Aggregation;

    async fn process(&mut self) -> Result<(), PhaseError> {
        while !self.private.pending.is_empty() {
            let (req, span, resp_tx) = self.next_request().await?;
            match req {
                StateMachineRequest::SharingComplete(sender) => {
                    match span.in_scope(|| self.note_sharing_complete(sender)) {
                        Ok(release) => {
                            // The sender awaits this verdict inside its own
                            // send, so it is answered before the release
                            // goes out.
                            let _ = resp_tx.send(Ok(()));
                            if release {
                                self.release_for_assembly(sender).instrument(span).await?;
                            }
                        }
                        Err(err) => {
                            let _ = resp_tx.send(Err(err));
                        }
                    }
                }
                StateMachineRequest::Update(update) => {
                    let response = span.in_scope(|| self.handle_update(update));
                    let _ = resp_tx.send(response);
                }
                StateMachineRequest::UpdateEncrypted(update) => {
                    let response = span.in_scope(|| self.handle_encrypted_update(update));
                    let _ = resp_tx.send(response);
                }
                _ => {
                    let _ = resp_tx.send(Err(RequestError::MessageRejected));
                }
            }
        }
        info!("all partial sums received");
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, E>> {
        let PhaseState { private, shared } = self;
        Some(PhaseState::<Publish, _, _>::new(shared, private.average).into())
    }
}

impl<T, E> PhaseState<Aggregation, T, E> {
    /// Creates a new aggregation phase awaiting all partial sums.
    pub fn new(shared: Shared<T, E>) -> Self {
        let pending = shared.state.participants.iter().copied().collect();
        let average = RunningAverage::new(
            &shared.state.global_model.weights,
            shared.state.participants.len(),
        );
        Self {
            private: Aggregation {
                pending,
                released: HashSet::new(),
                average,
            },
            shared,
        }
    }

    fn handle_update(&mut self, req: UpdateRequest) -> Result<(), RequestError> {
        let UpdateRequest {
            sender,
            partial_sum,
        } = req;
        self.accumulate(sender, &partial_sum)
    }

    fn accumulate(
        &mut self,
        sender: ParticipantId,
        partial_sum: &ModelUpdate,
    ) -> Result<(), RequestError> {
        if !self.shared.state.participants.contains(&sender) {
            return Err(RequestError::UnknownParticipant(sender));
        }
        if !self.private.pending.contains(&sender) {
            return Err(RequestError::DuplicateUpdate(sender));
        }
        self.private.average.accumulate(partial_sum)?;
        self.private.pending.remove(&sender);
        debug!(
            "{}/{} partial sums outstanding",
            self.private.pending.len(),
            self.shared.state.participants.len()
        );
        Ok(())
    }

    /// Notes a sharing completion and returns whether an assembly release
    /// must be sent. Repeated notifications are acknowledged without one.
    fn note_sharing_complete(&mut self, sender: ParticipantId) -> Result<bool, RequestError> {
        if !self.shared.state.participants.contains(&sender) {
            return Err(RequestError::UnknownParticipant(sender));
        }
        if self.private.released.contains(&sender) {
            debug!("participant {} was already released", sender);
            return Ok(false);
        }
        self.private.released.insert(sender);
        Ok(true)
    }

    fn handle_encrypted_update(&mut self, req: EncryptedUpdateRequest) -> Result<(), RequestError> {
        let EncryptedUpdateRequest { sender, chunks } = req;
        let keys = self
            .shared
            .state
            .keys
            .as_ref()
            .ok_or(RequestError::InternalError(
                "received a sealed partial sum but no key pair is configured",
            ))?;
        let partial_sum = decrypt_update(keys, &chunks).map_err(|err| {
            warn!("failed to open the sealed partial sum: {}", err);
            RequestError::DecryptionFailed
        })?;
        self.accumulate(sender, &partial_sum)
    }
}

impl<T: Transport, E> PhaseState<Aggregation, T, E> {
    /// Sends the assembly release to `sender`. A delivery failure fails the
    /// phase.
    async fn release_for_assembly(&mut self, sender: ParticipantId) -> Result<(), PhaseError> {
        self.shared
            .send_to_participant(sender, Payload::StartAssembly)
            .await?;
        info!("participant {} released for assembly", sender);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing::Span;

    use addshare_core::{
        crypto::{encrypt_update, EncryptKeyPair},
        ledger::RoundLedger,
        message::Source,
        model::{GlobalModel, LayerUpdate, ModelArchitecture, Tensor},
        testutils::RecordingTransport,
    };

    use super::*;
    use crate::{
        state_machine::{coordinator::CoordinatorState, requests::RequestReceiver},
        traits::NoopEvaluator,
    };

    fn update(values: &[f64]) -> ModelUpdate {
        let mut update = ModelUpdate::new();
        update.insert(
            "dense",
            LayerUpdate {
                weights: Tensor::from(values.to_vec()),
                bias: Tensor::from(vec![0.0]),
            },
        );
        update
    }

    fn aggregation_phase(
        keys: Option<EncryptKeyPair>,
    ) -> (
        PhaseState<Aggregation, RecordingTransport, NoopEvaluator>,
        crate::state_machine::requests::RequestSender,
        RecordingTransport,
    ) {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let ledger = RoundLedger::open(std::env::temp_dir().join(format!(
            "addshare-aggregation-test-{}-{}.csv",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        )))
        .unwrap();
        let mut state = CoordinatorState::new(
            vec![ParticipantId::new(4001), ParticipantId::new(4002)],
            1,
            GlobalModel::new(ModelArchitecture::new("mlp"), update(&[0.0])),
            keys,
            ledger,
        );
        state.round_id = 1;

        let (request_rx, request_tx) = RequestReceiver::new();
        let transport = RecordingTransport::new();
        let shared = Shared::new(state, request_rx, transport.clone(), NoopEvaluator);
        (
            PhaseState::<Aggregation, _, _>::new(shared),
            request_tx,
            transport,
        )
    }

    fn update_from(id: u16, values: &[f64]) -> StateMachineRequest {
        StateMachineRequest::Update(UpdateRequest {
            sender: ParticipantId::new(id),
            partial_sum: update(values),
        })
    }

    fn sealed_update_from(
        id: u16,
        values: &[f64],
        public_key: &addshare_core::crypto::PublicKey,
    ) -> StateMachineRequest {
        StateMachineRequest::UpdateEncrypted(EncryptedUpdateRequest {
            sender: ParticipantId::new(id),
            chunks: encrypt_update(public_key, &update(values)).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_completes_once_every_partial_sum_arrived() {
        let (phase, requests, transport) = aggregation_phase(None);
        let machine = tokio::spawn(phase.run_phase());

        requests
            .request(
                StateMachineRequest::SharingComplete(ParticipantId::new(4001)),
                Span::none(),
            )
            .await
            .unwrap();
        // A fast participant may submit before a slow one reports sharing
        // completion.
        requests
            .request(update_from(4001, &[2.0]), Span::none())
            .await
            .unwrap();
        requests
            .request(
                StateMachineRequest::SharingComplete(ParticipantId::new(4002)),
                Span::none(),
            )
            .await
            .unwrap();
        requests
            .request(update_from(4002, &[4.0]), Span::none())
            .await
            .unwrap();

        let next = machine.await.unwrap();
        match next {
            Some(StateMachine::Publish(publish)) => {
                let mean = publish.average().clone().into_model_update();
                assert_eq!(mean.get("dense").unwrap().weights, Tensor::from(vec![3.0]));
            }
            _ => panic!("expected a transition to the publish phase"),
        }

        let releases: Vec<_> = transport
            .sent()
            .into_iter()
            .filter(|(_, message)| message.payload == Payload::StartAssembly)
            .collect();
        assert_eq!(
            releases,
            vec![
                (
                    Source::Participant(ParticipantId::new(4001)),
                    addshare_core::message::Message::new(
                        Source::Coordinator,
                        Payload::StartAssembly
                    )
                ),
                (
                    Source::Participant(ParticipantId::new(4002)),
                    addshare_core::message::Message::new(
                        Source::Coordinator,
                        Payload::StartAssembly
                    )
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_and_invalid_requests() {
        let (phase, requests, transport) = aggregation_phase(None);
        let machine = tokio::spawn(phase.run_phase());

        requests
            .request(
                StateMachineRequest::SharingComplete(ParticipantId::new(4001)),
                Span::none(),
            )
            .await
            .unwrap();
        // A repeated notification is acknowledged but not re-released.
        requests
            .request(
                StateMachineRequest::SharingComplete(ParticipantId::new(4001)),
                Span::none(),
            )
            .await
            .unwrap();
        assert!(matches!(
            requests
                .request(
                    StateMachineRequest::SharingComplete(ParticipantId::new(4999)),
                    Span::none(),
                )
                .await,
            Err(RequestError::UnknownParticipant(_))
        ));

        requests
            .request(update_from(4001, &[2.0]), Span::none())
            .await
            .unwrap();
        assert!(matches!(
            requests.request(update_from(4001, &[9.0]), Span::none()).await,
            Err(RequestError::DuplicateUpdate(_))
        ));
        // A malformed partial sum must not corrupt the average.
        assert!(matches!(
            requests
                .request(update_from(4002, &[1.0, 1.0]), Span::none())
                .await,
            Err(RequestError::Accumulation(_))
        ));
        requests
            .request(update_from(4002, &[4.0]), Span::none())
            .await
            .unwrap();

        let next = machine.await.unwrap();
        match next {
            Some(StateMachine::Publish(publish)) => {
                let mean = publish.average().clone().into_model_update();
                assert_eq!(mean.get("dense").unwrap().weights, Tensor::from(vec![3.0]));
            }
            _ => panic!("expected a transition to the publish phase"),
        }

        let releases = transport
            .sent()
            .into_iter()
            .filter(|(_, message)| message.payload == Payload::StartAssembly)
            .count();
        assert_eq!(releases, 1);
    }

    #[tokio::test]
    async fn test_sealed_partial_sums_are_opened_and_averaged() {
        sodiumoxide::init().unwrap();
        let keys = EncryptKeyPair::generate();
        let (phase, requests, _transport) = aggregation_phase(Some(keys.clone()));
        let machine = tokio::spawn(phase.run_phase());

        // One participant seals its partial sum, the other submits plaintext.
        requests
            .request(sealed_update_from(4001, &[2.0], &keys.public), Span::none())
            .await
            .unwrap();
        requests
            .request(update_from(4002, &[4.0]), Span::none())
            .await
            .unwrap();

        let next = machine.await.unwrap();
        match next {
            Some(StateMachine::Publish(publish)) => {
                let mean = publish.average().clone().into_model_update();
                assert_eq!(mean.get("dense").unwrap().weights, Tensor::from(vec![3.0]));
            }
            _ => panic!("expected a transition to the publish phase"),
        }
    }

    #[tokio::test]
    async fn test_undecryptable_partial_sums_are_rejected() {
        sodiumoxide::init().unwrap();
        let keys = EncryptKeyPair::generate();
        let stranger = EncryptKeyPair::generate();
        let (phase, requests, _transport) = aggregation_phase(Some(keys.clone()));
        let machine = tokio::spawn(phase.run_phase());

        // Sealed to the wrong public key: the chunks cannot be opened and the
        // submission must not count towards the average.
        assert!(matches!(
            requests
                .request(sealed_update_from(4001, &[9.0], &stranger.public), Span::none())
                .await,
            Err(RequestError::DecryptionFailed)
        ));

        requests
            .request(sealed_update_from(4001, &[2.0], &keys.public), Span::none())
            .await
            .unwrap();
        requests
            .request(update_from(4002, &[4.0]), Span::none())
            .await
            .unwrap();

        let next = machine.await.unwrap();
        match next {
            Some(StateMachine::Publish(publish)) => {
                let mean = publish.average().clone().into_model_update();
                assert_eq!(mean.get("dense").unwrap().weights, Tensor::from(vec![3.0]));
            }
            _ => panic!("expected a transition to the publish phase"),
        }
    }

    #[tokio::test]
    async fn test_sealed_partial_sum_without_a_key_pair_is_rejected() {
        sodiumoxide::init().unwrap();
        let keys = EncryptKeyPair::generate();
        let (phase, requests, _transport) = aggregation_phase(None);
        let machine = tokio::spawn(phase.run_phase());

        assert!(matches!(
            requests
                .request(sealed_update_from(4001, &[2.0], &keys.public), Span::none())
                .await,
            Err(RequestError::InternalError(_))
        ));

        requests
            .request(update_from(4001, &[2.0]), Span::none())
            .await
            .unwrap();
        requests
            .request(update_from(4002, &[4.0]), Span::none())
            .await
            .unwrap();
        let next = machine.await.unwrap();
        assert!(matches!(next, Some(StateMachine::Publish(_))));
    }
}
