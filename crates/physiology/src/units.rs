//! Unit conventions.
//!
//! Internal (default) units used throughout the simulation:
//!
//! ```text
//! length:    µm
//! time:      s
//! pressure:  Pa
//! flow:      µm³/s
//! velocity:  µm/s
//! viscosity: Pa·s
//! ```
//!
//! Boundary pressures are configured in mmHg and converted at the solver
//! boundary; everything in between stays in default units.

/// 1 mmHg in Pa
pub const MMHG_TO_PA: f64 = 133.322;

/// Convert a pressure from mmHg to default units (Pa).
pub fn mmhg_to_default(p_mmhg: f64) -> f64 {
    p_mmhg * MMHG_TO_PA
}

/// Convert a pressure from default units (Pa) back to mmHg.
pub fn default_to_mmhg(p_default: f64) -> f64 {
    p_default / MMHG_TO_PA
}
