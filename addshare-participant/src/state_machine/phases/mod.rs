//! The phases of the participant state machine.

mod assembly;
mod exchange;
mod failure;
mod idle;
mod phase;
mod shutdown;
mod training;

pub use self::{
    assembly::Assembly,
    exchange::Exchange,
    failure::{Failure, PhaseError},
    idle::Idle,
    phase::{Phase, PhaseName, PhaseState, Shared},
    shutdown::Shutdown,
    training::Training,
};
