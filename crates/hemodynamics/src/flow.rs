//! Flow, RBC velocity, flow sign, and balance diagnostics.

use tracing::warn;

use crate::MASS_BALANCE_TOLERANCE;
use vasculature::{VascularNetwork, VertexId};

/// Per-edge flow magnitude and RBC velocity from the pressure solution.
///
/// flow = |Δp| / effResistance; v = 4·flow·vf / (π d²) with the velocity
/// factor clamped to ≥ 1, or the plasma velocity when the edge carries no
/// RBCs.
pub fn update_flow_and_velocity(net: &mut VascularNetwork, invivo: bool) {
    for e in 0..net.edge_count() {
        let (src, tgt) = (net.edges[e].source, net.edges[e].target);
        let dp = (net.vertices[src].pressure - net.vertices[tgt].pressure).abs();
        let edge = &mut net.edges[e];
        edge.flow = dp / edge.eff_resistance;
        let vf = if edge.htt > 0.0 {
            physiology::velocity_factor(edge.diameter, invivo, edge.htt).max(1.0)
        } else {
            1.0
        };
        edge.v = 4.0 * edge.flow * vf / (std::f64::consts::PI * edge.diameter * edge.diameter);
    }
}

/// Flow sign relative to the source→target convention; the previous sign is
/// kept in `sign_old` to drive the incremental topology refresh.
pub fn update_flow_sign(net: &mut VascularNetwork) {
    for e in 0..net.edge_count() {
        let (src, tgt) = (net.edges[e].source, net.edges[e].target);
        let dp = net.vertices[src].pressure - net.vertices[tgt].pressure;
        let edge = &mut net.edges[e];
        edge.sign_old = edge.sign;
        edge.sign = if dp > 0.0 {
            1
        } else if dp < 0.0 {
            -1
        } else {
            0
        };
    }
}

/// Sign of a pressure difference; exactly equal pressures carry no flow.
fn flow_sign(dp: f64) -> f64 {
    if dp > 0.0 {
        1.0
    } else if dp < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Signed flow sum at every vertex; interior vertices violating the
/// tolerance are logged. Returns the violating vertex ids.
pub fn verify_mass_balance(net: &VascularNetwork) -> Vec<VertexId> {
    let mut violations = Vec::new();
    for v in 0..net.vertex_count() {
        let sum: f64 = net
            .adjacent(v)
            .iter()
            .map(|&(e, n)| {
                let dp = net.vertices[v].pressure - net.vertices[n].pressure;
                net.edges[e].flow * flow_sign(dp)
            })
            .sum();
        let boundary = net.vertices[v].arterial || net.vertices[v].venous;
        if sum.abs() > MASS_BALANCE_TOLERANCE && !boundary {
            warn!(
                vertex = v,
                flow_sum = sum,
                "mass balance violated at interior vertex"
            );
            violations.push(v);
        }
    }
    violations
}

/// Interior vertices that are local pressure maxima, with the largest
/// pressure drop to a neighbor. A well-posed solution has none.
pub fn verify_pressure_consistency(net: &VascularNetwork) -> Vec<(VertexId, f64)> {
    let mut maxima = Vec::new();
    for v in 0..net.vertex_count() {
        if net.vertices[v].p_bc.is_some() {
            continue;
        }
        let diffs: Vec<f64> = net
            .adjacent(v)
            .iter()
            .map(|&(_, n)| net.vertices[v].pressure - net.vertices[n].pressure)
            .collect();
        if !diffs.is_empty() && diffs.iter().all(|&d| d > 0.0) {
            maxima.push((v, diffs.iter().cloned().fold(f64::MIN, f64::max)));
        }
    }
    maxima
}

/// Signed RBC flux sum per vertex: Σ 4·flow·vf·htt/(π d²)·sgn(Δp).
/// Diagnostic only; a steady state balances this at interior vertices.
pub fn rbc_flow_balance(net: &VascularNetwork, invivo: bool) -> Vec<f64> {
    (0..net.vertex_count())
        .map(|v| {
            net.adjacent(v)
                .iter()
                .map(|&(e, n)| {
                    let edge = &net.edges[e];
                    let dp = net.vertices[v].pressure - net.vertices[n].pressure;
                    let vf = physiology::velocity_factor(edge.diameter, invivo, edge.htt);
                    4.0 * edge.flow * vf * edge.htt
                        / (std::f64::consts::PI * edge.diameter * edge.diameter)
                        * flow_sign(dp)
                })
                .sum()
        })
        .collect()
}
