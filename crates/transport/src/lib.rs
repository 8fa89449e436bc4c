//! Discrete red blood cell transport.
//!
//! Three cooperating pieces, executed in sequence each timestep:
//!
//! - the topology classifier, which keeps every vertex's flow class and
//!   inflow/outflow edge lists consistent with the current flow signs;
//! - the inlet injector, which feeds new RBCs into hematocrit-boundary
//!   edges with lognormally distributed spacing;
//! - the propagator, which advects every RBC, routes overshooters across
//!   bifurcations, and resolves traffic jams.

pub mod classifier;
pub mod injector;
pub mod propagator;

pub use classifier::{classify_all, refresh_after_sign_change};
pub use injector::{inject, InjectorCache, SpacingDistribution};
pub use propagator::{Propagator, StepOutcome};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Spacing distribution fit did not converge for line density {0}")]
    DistributionFit(f64),

    #[error("Line density {0} outside (0, 1)")]
    InvalidLineDensity(f64),
}

pub type Result<T> = std::result::Result<T, TransportError>;
