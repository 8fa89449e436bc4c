//! Per-edge rheological state: resistances, spacing, hematocrit, capacity.
//!
//! Every function takes an optional edge subset; `None` updates the whole
//! network. The driver passes the subsets accumulated by the propagator so
//! only touched edges are recomputed between solves.

use crate::network::{EdgeId, VascularNetwork};
use physiology::constants::MAX_DISCHARGE_HEMATOCRIT;

fn for_each_edge(net: &mut VascularNetwork, edges: Option<&[EdgeId]>, mut f: impl FnMut(&mut crate::EdgeState)) {
    match edges {
        None => {
            for e in net.edges.iter_mut() {
                f(e);
            }
        }
        Some(ids) => {
            for &ei in ids {
                f(&mut net.edges[ei]);
            }
        }
    }
}

/// Poiseuille resistance of the plasma-filled vessel.
pub fn update_nominal_and_specific_resistance(
    net: &mut VascularNetwork,
    plasma_viscosity: f64,
    edges: Option<&[EdgeId]>,
) {
    for_each_edge(net, edges, |e| {
        e.specific_resistance =
            128.0 * plasma_viscosity / (std::f64::consts::PI * e.diameter.powi(4));
        e.resistance = e.length * e.specific_resistance;
    });
}

/// Viscosity-corrected resistance from the current discharge hematocrit.
pub fn update_effective_resistance(net: &mut VascularNetwork, invivo: bool, edges: Option<&[EdgeId]>) {
    for_each_edge(net, edges, |e| {
        let htd = physiology::tube_to_discharge_hematocrit(e.htt, e.diameter, invivo)
            .min(MAX_DISCHARGE_HEMATOCRIT);
        e.eff_resistance = e.resistance
            * physiology::relative_apparent_blood_viscosity(e.diam_calc_eff, htd, invivo);
    });
}

/// Minimum inter-RBC spacing and packing capacity from geometry.
pub fn update_min_dist_and_n_max(net: &mut VascularNetwork, edges: Option<&[EdgeId]>) {
    let vrbc = physiology::rbc_volume();
    for_each_edge(net, edges, |e| {
        e.min_dist = vrbc / e.crosssection;
        e.n_max = (e.length / e.min_dist).floor() as usize;
    });
}

/// Tube and discharge hematocrit from the current RBC count.
pub fn update_hematocrit(net: &mut VascularNetwork, invivo: bool, edges: Option<&[EdgeId]>) {
    for_each_edge(net, edges, |e| {
        e.htt = e.rbc.len() as f64 * e.min_dist / e.length;
        e.htd = physiology::tube_to_discharge_hematocrit(e.htt, e.diameter, invivo)
            .min(MAX_DISCHARGE_HEMATOCRIT);
    });
}

/// Free RBC slots upstream of the first cell, clamped so that
/// `rbc_in_max + n_rbc ≤ n_max`.
pub fn update_rbc_in_max(net: &mut VascularNetwork, edges: Option<&[EdgeId]>) {
    for_each_edge(net, edges, |e| {
        let slots = (e.dist_to_first() / e.min_dist).floor() as usize;
        e.rbc_in_max = slots.min(e.n_max.saturating_sub(e.rbc.len()));
    });
}
