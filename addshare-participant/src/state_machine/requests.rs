//! The request channel that feeds the participant state machine.
//!
//! Inbound wire messages are converted to [`StateMachineRequest`]s and
//! pushed through an unbounded channel together with a tracing span and a
//! oneshot response channel, so the engine handles them strictly one at a
//! time while every sender gets an individual verdict.

use std::{
    convert::TryFrom,
    pin::Pin,
    task::{Context, Poll},
};

use derive_more::From;
use displaydoc::Display;
use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::Span;

use addshare_core::{
    message::{Message, ParticipantId, Payload, Source},
    model::{ModelArchitecture, ModelUpdate},
    sharing::AccumulationError,
};

/// Errors which can occur while the state machine handles a request.
#[derive(Debug, Display, Error)]
pub enum RequestError {
    /// The message was rejected: it does not belong to the current phase.
    MessageRejected,
    /// The message kind `{0}` is not addressed to a participant.
    UnexpectedMessage(&'static str),
    /// The sender {0} is not a peer of the current round.
    UnknownPeer(ParticipantId),
    /// The peer {0} already contributed a share this round.
    DuplicateShare(ParticipantId),
    /// Invalid share: {0}.
    Accumulation(#[from] AccumulationError),
    /// The request could not be processed due to an internal error: {0}.
    InternalError(&'static str),
}

/// A round announcement.
#[derive(Debug)]
pub struct StartTrainingRequest {
    /// All participants of the round, in canonical order.
    pub participants: Vec<ParticipantId>,
    pub architecture: ModelArchitecture,
    pub weights: ModelUpdate,
}

/// One additive share received from a peer.
#[derive(Debug)]
pub struct ModelShareRequest {
    pub sender: ParticipantId,
    pub share: ModelUpdate,
}

/// A [`StateMachine`] request.
///
/// [`StateMachine`]: crate::state_machine::StateMachine
#[derive(Debug)]
pub enum StateMachineRequest {
    StartTraining(StartTrainingRequest),
    StartSecretSharing,
    ModelShare(ModelShareRequest),
    StartAssembly,
    EndSession(ModelUpdate),
}

impl TryFrom<Message> for StateMachineRequest {
    type Error = RequestError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let Message { source, payload } = message;
        match (source, payload) {
            (
                Source::Coordinator,
                Payload::StartTraining {
                    participants,
                    architecture,
                    weights,
                },
            ) => Ok(StateMachineRequest::StartTraining(StartTrainingRequest {
                participants,
                architecture,
                weights,
            })),
            (Source::Coordinator, Payload::StartSecretSharing) => {
                Ok(StateMachineRequest::StartSecretSharing)
            }
            (Source::Participant(sender), Payload::ModelShare { share }) => {
                Ok(StateMachineRequest::ModelShare(ModelShareRequest {
                    sender,
                    share,
                }))
            }
            (Source::Coordinator, Payload::StartAssembly) => {
                Ok(StateMachineRequest::StartAssembly)
            }
            (Source::Coordinator, Payload::EndSession { weights }) => {
                Ok(StateMachineRequest::EndSession(weights))
            }
            // A share claiming to come from the coordinator is spoofed or
            // misrouted; everything else is coordinator-bound traffic.
            (_, payload) => Err(RequestError::UnexpectedMessage(payload.kind())),
        }
    }
}

/// A handle to send requests to the state machine.
#[derive(Clone, From, Debug)]
pub struct RequestSender(mpsc::UnboundedSender<(StateMachineRequest, Span, ResponseSender)>);

impl RequestSender {
    /// Sends a request and awaits the engine's verdict.
    ///
    /// # Errors
    /// Fails if the state machine has already shut down and the request
    /// channel has been closed as a result.
    pub async fn request(&self, req: StateMachineRequest, span: Span) -> Result<(), RequestError> {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<(), RequestError>>();
        self.0.send((req, span, resp_tx)).map_err(|_| {
            RequestError::InternalError(
                "failed to send request to the state machine: state machine is shutting down",
            )
        })?;
        resp_rx.await.map_err(|_| {
            RequestError::InternalError("failed to receive response from the state machine")
        })?
    }
}

/// The channel over which the state machine answers a single request.
pub(in crate::state_machine) type ResponseSender = oneshot::Sender<Result<(), RequestError>>;

/// The receiver half of the request channel.
#[derive(From, Debug)]
pub struct RequestReceiver(mpsc::UnboundedReceiver<(StateMachineRequest, Span, ResponseSender)>);

impl Stream for RequestReceiver {
    type Item = (StateMachineRequest, Span, ResponseSender);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().0).poll_recv(cx)
    }
}

impl RequestReceiver {
    /// Creates a new request channel and returns both halves.
    pub fn new() -> (Self, RequestSender) {
        let (tx, rx) = mpsc::unbounded_channel::<(StateMachineRequest, Span, ResponseSender)>();
        (RequestReceiver::from(rx), RequestSender::from(tx))
    }

    /// Closes the channel. Queued requests can still be received.
    pub fn close(&mut self) {
        self.0.close()
    }

    /// Receives the next request.
    pub async fn recv(&mut self) -> Option<(StateMachineRequest, Span, ResponseSender)> {
        self.0.recv().await
    }
}
