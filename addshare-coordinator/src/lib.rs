//! The AddShare coordinator engine.
//!
//! The coordinator owns the global model and drives the session round by
//! round: it announces training, waits for every participant to finish,
//! triggers the share exchange, releases each participant for assembly as
//! soon as it reports completion, and averages the submitted partial sums
//! into the new global model. Because every partial sum is the blend of
//! shares from all participants, the coordinator never observes an
//! individual update.

pub mod rest;
pub mod settings;
pub mod state_machine;
pub mod traits;

pub use self::{
    settings::{Settings, SettingsError},
    traits::{ModelEvaluator, NoopEvaluator},
};
