//! Simulation configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use hemodynamics::SolveMethod;
pub use vasculature::InitialHematocrit;

/// Construction-time configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Use the in vivo (true) or in vitro (false) rheology fits
    pub invivo: bool,

    /// Diameter below which vessels count as capillaries (µm)
    pub d_threshold: f64,

    /// Initial filling of the capillary bed
    pub initial_hematocrit: InitialHematocrit,

    /// Dynamic plasma viscosity override (Pa·s); literature value if absent
    pub plasma_viscosity: Option<f64>,

    /// Accumulate per-edge bifurcation crossing counts
    pub analyze_bif_events: bool,

    /// PRNG seed for the stochastic inlet spacing
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            invivo: true,
            d_threshold: 10.0,
            initial_hematocrit: InitialHematocrit::Tube(0.0),
            plasma_viscosity: None,
            analyze_bif_events: false,
            seed: 42,
        }
    }
}

/// Sampling window: first sample at `start`, then every `step`, until `stop`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SampleWindow {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

/// Parameters of one `evolve` call.
#[derive(Debug, Clone)]
pub struct EvolveOptions {
    /// Simulated duration to add (s)
    pub duration: f64,

    /// Fixed timestep (s)
    pub dt: f64,

    /// Pressure solver selection
    pub method: SolveMethod,

    /// Sampling window, offset by the persisted sample time when resuming
    pub sample: Option<SampleWindow>,

    /// Sample every step regardless of the window
    pub sample_detailed: bool,

    /// Relative tolerance of the pressure solve
    pub precision: f64,

    /// Fresh start (true) or continuation from persisted time (false)
    pub init: bool,

    /// Where checkpoints are written; no files when absent
    pub output_dir: Option<PathBuf>,
}

impl Default for EvolveOptions {
    fn default() -> Self {
        Self {
            duration: 0.1,
            dt: 1e-3,
            method: SolveMethod::Iterative,
            sample: None,
            sample_detailed: false,
            precision: 1e-12,
            init: true,
            output_dir: None,
        }
    }
}
