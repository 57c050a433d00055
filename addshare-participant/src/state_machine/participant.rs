//! The state shared across all phases of the participant engine.

use addshare_core::{
    crypto::PublicKey,
    ledger::{ParticipantRecord, RoundLedger},
    message::ParticipantId,
    model::{GlobalModel, ModelUpdate},
};

/// The participant state.
#[derive(Debug)]
pub struct ParticipantState {
    /// This participant's id, which is also the port its endpoint listens on.
    pub id: ParticipantId,
    /// The current round. Resumed from the ledger at startup and bumped on
    /// every round announcement.
    pub round_id: u64,
    /// The other participants of the current round, in canonical order.
    pub peers: Vec<ParticipantId>,
    /// The most recently announced global model.
    pub global_model: Option<GlobalModel>,
    /// The final weights received with the session end, if any.
    pub final_weights: Option<ModelUpdate>,
    /// The append-only record of finished rounds.
    pub ledger: RoundLedger<ParticipantRecord>,
    /// When set, partial sums are sealed to this key before submission.
    pub coordinator_public_key: Option<PublicKey>,
}

impl ParticipantState {
    /// Creates the initial state, resuming the round count from the ledger.
    pub fn new(
        id: ParticipantId,
        ledger: RoundLedger<ParticipantRecord>,
        coordinator_public_key: Option<PublicKey>,
    ) -> Self {
        let round_id = ledger.last_round().unwrap_or(0);
        Self {
            id,
            round_id,
            peers: Vec::new(),
            global_model: None,
            final_weights: None,
            ledger,
            coordinator_public_key,
        }
    }
}
