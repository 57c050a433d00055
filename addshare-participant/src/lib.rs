//! The AddShare participant engine.
//!
//! A participant sits in a loop of rounds driven by the coordinator: it
//! trains a local model, splits the resulting update into additive shares,
//! exchanges shares with its peers, and submits the element-wise sum of the
//! shares it holds once the coordinator releases it. The engine is a typed
//! phase state machine fed by a serialized request channel; the
//! accompanying [`rest`] endpoint turns inbound HTTP messages into requests.

pub mod rest;
pub mod settings;
pub mod state_machine;
pub mod traits;

pub use self::{
    settings::{Settings, SettingsError},
    traits::{NoopTrainer, Trainer, TrainingReport},
};
