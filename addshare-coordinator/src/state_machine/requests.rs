//! The request channel that feeds the coordinator state machine.

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
    crypto::EncryptedChunk,
    message::{Message, ParticipantId, Payload, Source},
    model::ModelUpdate,
    sharing::AccumulationError,
};

/// Errors which can occur while the state machine handles a request.
#[derive(Debug, Display, Error)]
pub enum RequestError {
    /// The message was rejected: it does not belong to the current phase.
    MessageRejected,
    /// The message kind `{0}` is not addressed to the coordinator.
    UnexpectedMessage(&'static str),
    /// The sender {0} is not a participant of this session.
    UnknownParticipant(ParticipantId),
    /// The participant {0} already submitted its partial sum this round.
    DuplicateUpdate(ParticipantId),
    /// Invalid partial sum: {0}.
    Accumulation(#[from] AccumulationError),
    /// The encrypted partial sum could not be opened.
    DecryptionFailed,
    /// The request could not be processed due to an internal error: {0}.
    InternalError(&'static str),
}

/// A plaintext partial sum submission.
#[derive(Debug)]
pub struct UpdateRequest {
    pub sender: ParticipantId,
    pub partial_sum: ModelUpdate,
}

/// A sealed partial sum submission.
#[derive(Debug)]
pub struct EncryptedUpdateRequest {
    pub sender: ParticipantId,
    pub chunks: Vec<EncryptedChunk>,
}

/// A [`StateMachine`] request.
///
/// [`StateMachine`]: crate::state_machine::StateMachine
#[derive(Debug)]
pub enum StateMachineRequest {
    TrainingComplete(ParticipantId),
    SharingComplete(ParticipantId),
    Update(UpdateRequest),
    UpdateEncrypted(EncryptedUpdateRequest),
}

impl TryFrom<Message> for StateMachineRequest {
    type Error = RequestError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let sender = match message.source {
            Source::Participant(id) => id,
            // The coordinator does not talk to itself.
            Source::Coordinator => {
                return Err(RequestError::UnexpectedMessage(message.payload.kind()))
            }
        };
        match message.payload {
            Payload::TrainingComplete => Ok(StateMachineRequest::TrainingComplete(sender)),
            Payload::SharingComplete => Ok(StateMachineRequest::SharingComplete(sender)),
            Payload::Update { partial_sum } => Ok(StateMachineRequest::Update(UpdateRequest {
                sender,
                partial_sum,
            })),
            Payload::UpdateEncrypted { chunks } => Ok(StateMachineRequest::UpdateEncrypted(
                EncryptedUpdateRequest { sender, chunks },
            )),
            payload => Err(RequestError::UnexpectedMessage(payload.kind())),
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
