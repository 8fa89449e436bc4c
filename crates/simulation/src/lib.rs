//! Fixed-timestep driver for discrete RBC transport simulations.
//!
//! Orchestrates the per-step contract: partial rheology refresh, pressure
//! solve, flow and sign derivation, topology reclassification, capacity
//! update, RBC propagation, hematocrit recomputation, then sampling and
//! periodic checkpointing.

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod sampler;

pub use checkpoint::CheckpointState;
pub use config::{EvolveOptions, SampleWindow, SimulationConfig, SolveMethod};
pub use driver::{Simulation, StepReport};
pub use sampler::SampleSeries;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Network error: {0}")]
    Network(#[from] vasculature::NetworkError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
