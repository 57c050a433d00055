//! The phases of the coordinator state machine.

mod aggregation;
mod failure;
mod idle;
mod phase;
mod publish;
mod shutdown;
mod training;

pub use self::{
    aggregation::Aggregation,
    failure::{Failure, PhaseError},
    idle::Idle,
    phase::{Phase, PhaseName, PhaseState, Shared},
    publish::Publish,
    shutdown::Shutdown,
    training::Training,
};
