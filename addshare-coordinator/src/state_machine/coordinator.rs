//! The state shared across all phases of the coordinator engine.

use std::time::Instant;

use addshare_core::{
    crypto::EncryptKeyPair,
    ledger::{CoordinatorRecord, RoundLedger},
    message::ParticipantId,
    model::GlobalModel,
};

/// The coordinator state.
#[derive(Debug)]
pub struct CoordinatorState {
    /// The current round. Resumed from the ledger at startup and bumped at
    /// the start of every round.
    pub round_id: u64,
    /// The number of rounds after which the session ends.
    pub max_rounds: u64,
    /// All participants of the session, in canonical order.
    pub participants: Vec<ParticipantId>,
    /// The global model, replaced by the averaged update every round.
    pub global_model: GlobalModel,
    /// When set, participants may submit sealed partial sums.
    pub keys: Option<EncryptKeyPair>,
    /// The instant the current round was announced.
    pub round_start: Option<Instant>,
    /// The append-only record of finished rounds.
    pub ledger: RoundLedger<CoordinatorRecord>,
}

impl CoordinatorState {
    /// Creates the initial state, resuming the round count from the ledger.
    pub fn new(
        participants: Vec<ParticipantId>,
        max_rounds: u64,
        global_model: GlobalModel,
        keys: Option<EncryptKeyPair>,
        ledger: RoundLedger<CoordinatorRecord>,
    ) -> Self {
        let round_id = ledger.last_round().unwrap_or(0);
        Self {
            round_id,
            max_rounds,
            participants,
            global_model,
            keys,
            round_start: None,
            ledger,
        }
    }
}
