//! Empirical blood rheology for microvascular flow.
//!
//! Pure functions describing how red blood cells alter the apparent
//! viscosity of blood in narrow vessels, following the Pries-Secomb
//! empirical fits:
//!
//! - Relative apparent viscosity (in vitro and in vivo variants)
//! - Fåhræus effect: tube ↔ discharge hematocrit conversion
//! - RBC velocity factor (cells travel faster than bulk blood)
//!
//! All fits are parameterized by vessel diameter in µm. They are validated
//! down to 3 µm; callers clamp smaller diameters before evaluating
//! (see [`constants::MIN_FIT_DIAMETER_UM`]).

pub mod pries;
pub mod units;

pub use pries::{
    discharge_to_tube_hematocrit, dynamic_plasma_viscosity, rbc_volume,
    relative_apparent_blood_viscosity, tube_to_discharge_hematocrit, velocity_factor,
};
pub use units::{default_to_mmhg, mmhg_to_default, MMHG_TO_PA};

/// Physical constants
pub mod constants {
    /// Human red blood cell volume (µm³)
    pub const RBC_VOLUME: f64 = 92.0;

    /// Dynamic plasma viscosity (Pa·s)
    pub const PLASMA_VISCOSITY: f64 = 1.2e-3;

    /// Smallest diameter (µm) for which the empirical fits are validated
    pub const MIN_FIT_DIAMETER_UM: f64 = 3.0;

    /// Upper clamp for discharge hematocrit
    pub const MAX_DISCHARGE_HEMATOCRIT: f64 = 0.95;
}
