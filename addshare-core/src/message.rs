//! The AddShare wire messages and their JSON codec.
//!
//! Every message carries its [`Source`] and exactly one [`Payload`] variant.
//! The payload set is closed: a message whose `kind` tag is not one of the
//! variants below fails to decode, and handlers match exhaustively instead
//! of dispatching on strings.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    crypto::EncryptedChunk,
    model::{ModelArchitecture, ModelUpdate},
};

/// The identity of a participant.
///
/// Participants are addressed by the port their message endpoint listens on,
/// so the id doubles as the delivery address.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    From,
    Into,
    Serialize,
    Deserialize,
)]
pub struct ParticipantId(u16);

impl ParticipantId {
    pub fn new(id: u16) -> Self {
        ParticipantId(id)
    }
}

/// The sender or recipient of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Coordinator,
    Participant(ParticipantId),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Coordinator => write!(f, "coordinator"),
            Source::Participant(id) => write!(f, "participant {}", id),
        }
    }
}

/// The closed set of message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Payload {
    /// Coordinator → all participants: a new round begins.
    StartTraining {
        /// All participants of this round, in canonical order.
        participants: Vec<ParticipantId>,
        architecture: ModelArchitecture,
        weights: ModelUpdate,
    },
    /// Participant → coordinator: local training finished.
    TrainingComplete,
    /// Coordinator → all participants: begin the share exchange.
    StartSecretSharing,
    /// Participant → peer: one additive share of the sender's update.
    ModelShare { share: ModelUpdate },
    /// Participant → coordinator: all shares sent and received.
    SharingComplete,
    /// Coordinator → one participant: release the partial sum.
    StartAssembly,
    /// Participant → coordinator: the plaintext partial sum.
    #[serde(rename = "fl-update")]
    Update { partial_sum: ModelUpdate },
    /// Participant → coordinator: the partial sum sealed to the
    /// coordinator's public key.
    #[serde(rename = "fl-update-encrypted")]
    UpdateEncrypted { chunks: Vec<EncryptedChunk> },
    /// Coordinator → all participants: the session is over.
    EndSession { weights: ModelUpdate },
}

impl Payload {
    /// Gets the wire name of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::StartTraining { .. } => "start-training",
            Payload::TrainingComplete => "training-complete",
            Payload::StartSecretSharing => "start-secret-sharing",
            Payload::ModelShare { .. } => "model-share",
            Payload::SharingComplete => "sharing-complete",
            Payload::StartAssembly => "start-assembly",
            Payload::Update { .. } => "fl-update",
            Payload::UpdateEncrypted { .. } => "fl-update-encrypted",
            Payload::EndSession { .. } => "end-session",
        }
    }
}

/// A full wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source: Source,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Errors returned by the message codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// failed to serialize the message
    #[error("failed to serialize the message: {0}")]
    Serialize(#[source] serde_json::Error),
    /// failed to deserialize the message
    #[error("failed to deserialize the message: {0}")]
    Deserialize(#[source] serde_json::Error),
}

impl Message {
    pub fn new(source: Source, payload: Payload) -> Self {
        Message { source, payload }
    }

    /// Serializes this message to its JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Serialize)
    }

    /// Deserializes a message from its JSON wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Deserialize)
    }
}
