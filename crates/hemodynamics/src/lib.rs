//! Network hemodynamics: the pressure system and derived flow fields.
//!
//! Assembles the sparse conductance system A·p = b from the current
//! effective resistances and boundary conditions, solves it with a
//! preconditioned Krylov method, and derives per-edge flow, RBC velocity
//! and flow sign from the solution.

pub mod assembly;
pub mod flow;
pub mod solver;

pub use assembly::PressureSystem;
pub use flow::{
    rbc_flow_balance, update_flow_and_velocity, update_flow_sign, verify_mass_balance,
    verify_pressure_consistency,
};
pub use solver::{SolveMethod, SolveReport};

/// Interior vertex flow imbalance above this value is reported (µm³/s).
pub const MASS_BALANCE_TOLERANCE: f64 = 1e-4;
