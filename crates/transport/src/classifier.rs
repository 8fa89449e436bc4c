//! Vertex flow-topology classification.
//!
//! Each vertex is assigned one of the seven [`VertexType`] classes from the
//! pressures of its neighbors. A full pass runs once at initialization;
//! afterwards only vertices incident to an edge whose flow sign changed are
//! refreshed. Boundary vertices whose flow direction reverses swap their
//! arterial/venous role unless a residual boundary condition pins them.

use tracing::{error, warn};

use vasculature::{EdgeId, VascularNetwork, VertexId, VertexType};

/// Flow above which a supposedly stagnant vertex is reported (µm³/s).
const STAGNANT_FLOW_TOLERANCE: f64 = 5.0e-8;

/// Flow above which a pinned boundary reversal is reported (µm³/s).
const BOUNDARY_REVERSAL_TOLERANCE: f64 = 1e-6;

struct Partition {
    inflow: Vec<EdgeId>,
    outflow: Vec<EdgeId>,
    no_flow: Vec<EdgeId>,
}

/// Split the incident edges of `v` by comparing neighbor pressures, and
/// refresh the capillary flag of interface vertices from their inflow
/// diameters.
fn partition_edges(net: &mut VascularNetwork, v: VertexId, d_threshold: f64) -> Partition {
    let pressure = net.vertices[v].pressure;
    let mut part = Partition {
        inflow: Vec::new(),
        outflow: Vec::new(),
        no_flow: Vec::new(),
    };
    let interface = net.interface_vertices.contains(&v);
    let mut cap = true;
    for (e, n) in net.adjacent(v) {
        let np = net.vertices[n].pressure;
        if pressure > np {
            part.outflow.push(e);
        } else if pressure < np {
            part.inflow.push(e);
            if net.edges[e].diameter > d_threshold {
                cap = false;
            }
        } else {
            part.no_flow.push(e);
        }
    }
    if interface {
        net.vertices[v].is_cap = cap;
    }
    part
}

fn type_from_counts(n_in: usize, n_out: usize) -> Option<VertexType> {
    if n_out > n_in && n_in >= 1 {
        Some(VertexType::Divergent)
    } else if n_in > n_out && n_out >= 1 {
        Some(VertexType::Convergent)
    } else if n_in == 1 && n_out == 1 {
        Some(VertexType::Connecting)
    } else if n_in == 2 && n_out == 2 {
        Some(VertexType::DoubleConnecting)
    } else {
        None
    }
}

fn mark_stagnant(net: &mut VascularNetwork, v: VertexId) {
    for (e, _) in net.adjacent(v) {
        if net.edges[e].flow > STAGNANT_FLOW_TOLERANCE {
            error!(
                vertex = v,
                edge = e,
                flow = net.edges[e].flow,
                diameter = net.edges[e].diameter,
                "vertex classified no-flow but carries flow"
            );
        }
        net.edges[e].no_flow = true;
    }
    net.vertices[v].v_type = VertexType::NoFlow;
    net.vertices[v].inflow.clear();
    net.vertices[v].outflow.clear();
}

fn rebuild_boundary_lists(net: &mut VascularNetwork) {
    net.arterial = (0..net.vertex_count())
        .filter(|&v| net.vertices[v].arterial)
        .collect();
    net.venous = (0..net.vertex_count())
        .filter(|&v| net.vertices[v].venous)
        .collect();
}

/// Full classification pass over every vertex (initialization).
pub fn classify_all(net: &mut VascularNetwork, d_threshold: f64) {
    for v in 0..net.vertex_count() {
        let part = partition_edges(net, v, d_threshold);
        match type_from_counts(part.inflow.len(), part.outflow.len()) {
            Some(t) => {
                net.vertices[v].v_type = t;
                net.vertices[v].inflow = part.inflow;
                net.vertices[v].outflow = part.outflow;
            }
            None => {
                if net.vertices[v].arterial {
                    net.vertices[v].v_type = VertexType::Source;
                    net.vertices[v].inflow = part.inflow;
                    net.vertices[v].outflow = part.outflow;
                } else if net.vertices[v].venous {
                    net.vertices[v].v_type = VertexType::Sink;
                    net.vertices[v].inflow = part.inflow;
                    net.vertices[v].outflow = part.outflow;
                } else {
                    mark_stagnant(net, v);
                }
            }
        }
    }
    rebuild_boundary_lists(net);
}

/// Incremental refresh over vertices incident to a sign flip.
///
/// `inlet_htt_bc` supplies the hematocrit boundary condition installed on an
/// outflow boundary that reverses into an inlet.
pub fn refresh_after_sign_change(
    net: &mut VascularNetwork,
    d_threshold: f64,
    inlet_htt_bc: Option<f64>,
) {
    let mut vertices: Vec<VertexId> = Vec::new();
    for e in &net.edges {
        // Edges that were and stayed sign zero are not flips.
        if e.sign != e.sign_old && !(e.sign == 0 && e.sign_old == 0) {
            vertices.push(e.source);
            vertices.push(e.target);
        }
    }
    if vertices.is_empty() {
        return;
    }
    vertices.sort_unstable();
    vertices.dedup();

    for v in vertices {
        let part = partition_edges(net, v, d_threshold);
        match type_from_counts(part.inflow.len(), part.outflow.len()) {
            Some(t) => {
                if net.vertices[v].v_type == VertexType::NoFlow {
                    for &e in part.inflow.iter().chain(part.outflow.iter()) {
                        net.edges[e].no_flow = false;
                    }
                }
                net.vertices[v].v_type = t;
                net.vertices[v].inflow = part.inflow;
                net.vertices[v].outflow = part.outflow;
            }
            None if net.vertices[v].arterial => {
                if net.vertices[v].r_bc.is_some() {
                    report_pinned_reversal(net, v, "inlet");
                } else {
                    warn!(vertex = v, "inflow boundary reversed; relabeling as outlet");
                    net.vertices[v].arterial = false;
                    net.vertices[v].venous = true;
                    net.vertices[v].v_type = VertexType::Sink;
                    net.vertices[v].inflow = part.inflow;
                    net.vertices[v].outflow = part.outflow;
                    if let Some(&(e, _)) = net.adjacent(v).first() {
                        let edge = &mut net.edges[e];
                        edge.htt_bc = None;
                        edge.pos_first_last = None;
                        edge.v_last = None;
                        edge.keep_rbcs = None;
                    }
                }
            }
            None if net.vertices[v].venous => {
                if net.vertices[v].r_bc.is_some() {
                    report_pinned_reversal(net, v, "outlet");
                } else {
                    warn!(vertex = v, "outflow boundary reversed; relabeling as inlet");
                    net.vertices[v].venous = false;
                    net.vertices[v].arterial = true;
                    net.vertices[v].v_type = VertexType::Source;
                    net.vertices[v].inflow = part.inflow;
                    net.vertices[v].outflow = part.outflow;
                    if let Some(&(e, _)) = net.adjacent(v).first() {
                        match inlet_htt_bc {
                            Some(htt) => {
                                net.edges[e].htt_bc = Some(htt);
                                net.reset_feed_state(e);
                            }
                            None => warn!(
                                vertex = v,
                                edge = e,
                                "no inlet hematocrit available for reversed boundary"
                            ),
                        }
                    }
                }
            }
            None => mark_stagnant(net, v),
        }
    }
    rebuild_boundary_lists(net);
}

fn report_pinned_reversal(net: &VascularNetwork, v: VertexId, role: &str) {
    for (e, _) in net.adjacent(v) {
        if net.edges[e].flow > BOUNDARY_REVERSAL_TOLERANCE {
            error!(
                vertex = v,
                role,
                edge = e,
                flow = net.edges[e].flow,
                sign = net.edges[e].sign,
                sign_old = net.edges[e].sign_old,
                "flow direction of pinned boundary vertex changed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vasculature::builder::assign_capillary_classes;
    use vasculature::NetworkBuilder;

    /// Y-shaped net: v0 -> v1, v1 -> v2, v1 -> v3; pressures set by hand.
    fn y_network() -> VascularNetwork {
        let mut b = NetworkBuilder::new();
        let v0 = b.add_vertex();
        let v1 = b.add_vertex();
        let v2 = b.add_vertex();
        let v3 = b.add_vertex();
        b.add_edge(v0, v1, 100.0, 6.0).unwrap();
        b.add_edge(v1, v2, 100.0, 5.0).unwrap();
        b.add_edge(v1, v3, 100.0, 5.0).unwrap();
        b.set_arterial(v0).unwrap();
        b.set_venous(v2).unwrap();
        b.set_venous(v3).unwrap();
        let mut net = b.build().unwrap();
        assign_capillary_classes(&mut net, 10.0);
        net
    }

    fn set_pressures(net: &mut VascularNetwork, ps: &[f64]) {
        for (v, &p) in ps.iter().enumerate() {
            net.vertices[v].pressure = p;
        }
        for e in 0..net.edge_count() {
            let (s, t) = (net.edges[e].source, net.edges[e].target);
            let dp = net.vertices[s].pressure - net.vertices[t].pressure;
            net.edges[e].sign_old = net.edges[e].sign;
            net.edges[e].sign = if dp > 0.0 {
                1
            } else if dp < 0.0 {
                -1
            } else {
                0
            };
        }
    }

    #[test]
    fn classifies_divergent_and_boundaries() {
        let mut net = y_network();
        set_pressures(&mut net, &[100.0, 60.0, 10.0, 20.0]);
        classify_all(&mut net, 10.0);

        assert_eq!(net.vertices[0].v_type, VertexType::Source);
        assert_eq!(net.vertices[1].v_type, VertexType::Divergent);
        assert_eq!(net.vertices[2].v_type, VertexType::Sink);
        assert_eq!(net.vertices[3].v_type, VertexType::Sink);
        assert_eq!(net.vertices[1].inflow, vec![0]);
        let mut out = net.vertices[1].outflow.clone();
        out.sort_unstable();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn classifies_connecting_chain() {
        let mut b = NetworkBuilder::new();
        let v0 = b.add_vertex();
        let v1 = b.add_vertex();
        let v2 = b.add_vertex();
        b.add_edge(v0, v1, 100.0, 5.0).unwrap();
        b.add_edge(v1, v2, 100.0, 5.0).unwrap();
        b.set_arterial(v0).unwrap();
        b.set_venous(v2).unwrap();
        let mut net = b.build().unwrap();
        assign_capillary_classes(&mut net, 10.0);
        set_pressures(&mut net, &[10.0, 5.0, 1.0]);
        classify_all(&mut net, 10.0);
        assert_eq!(net.vertices[1].v_type, VertexType::Connecting);
    }

    #[test]
    fn equal_pressures_mark_no_flow() {
        let mut net = y_network();
        set_pressures(&mut net, &[5.0, 5.0, 5.0, 5.0]);
        classify_all(&mut net, 10.0);
        assert_eq!(net.vertices[1].v_type, VertexType::NoFlow);
        assert!(net.edges.iter().all(|e| e.no_flow));
    }

    #[test]
    fn sign_flip_relabels_boundaries() {
        let mut b = NetworkBuilder::new();
        let v0 = b.add_vertex();
        let v1 = b.add_vertex();
        let e = b.add_edge(v0, v1, 100.0, 5.0).unwrap();
        b.set_arterial(v0).unwrap();
        b.set_venous(v1).unwrap();
        b.set_tube_hematocrit_bc(e, 0.3).unwrap();
        let mut net = b.build().unwrap();
        assign_capillary_classes(&mut net, 10.0);
        set_pressures(&mut net, &[10.0, 0.0]);
        classify_all(&mut net, 10.0);
        assert_eq!(net.arterial, vec![0]);

        // Reverse the gradient; the boundaries swap roles.
        set_pressures(&mut net, &[0.0, 10.0]);
        refresh_after_sign_change(&mut net, 10.0, Some(0.3));
        assert_eq!(net.vertices[0].v_type, VertexType::Sink);
        assert_eq!(net.vertices[1].v_type, VertexType::Source);
        assert_eq!(net.arterial, vec![1]);
        assert_eq!(net.venous, vec![0]);
        // The feed state follows the new inlet.
        assert_eq!(net.edges[0].htt_bc, Some(0.3));
    }

    #[test]
    fn no_flow_recovery_clears_edge_flags() {
        let mut net = y_network();
        set_pressures(&mut net, &[5.0, 5.0, 5.0, 5.0]);
        classify_all(&mut net, 10.0);
        assert!(net.edges[0].no_flow);

        set_pressures(&mut net, &[100.0, 60.0, 10.0, 20.0]);
        refresh_after_sign_change(&mut net, 10.0, None);
        assert_eq!(net.vertices[1].v_type, VertexType::Divergent);
        assert!(!net.edges[0].no_flow);
        assert!(!net.edges[1].no_flow);
    }
}
