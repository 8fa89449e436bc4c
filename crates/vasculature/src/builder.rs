//! Network construction and initial RBC seeding.

use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::network::{EdgeState, VascularNetwork, VertexId, VertexState, VertexType};
use crate::{NetworkError, Result};
use physiology::constants::MIN_FIT_DIAMETER_UM;

/// How the capillary bed is filled at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InitialHematocrit {
    /// Target tube hematocrit
    Tube(f64),
    /// Target discharge hematocrit (converted per edge diameter)
    Discharge(f64),
    /// Keep the RBC positions already present (continued simulation)
    Current,
}

/// Builds a [`VascularNetwork`] with geometry and boundary conditions.
#[derive(Debug, Default)]
pub struct NetworkBuilder {
    vertices: Vec<VertexState>,
    edges: Vec<EdgeState>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self) -> VertexId {
        self.vertices.push(VertexState {
            p_bc: None,
            r_bc: None,
            pressure: 0.0,
            inflow: Vec::new(),
            outflow: Vec::new(),
            is_cap: true,
            v_type: VertexType::NoFlow,
            arterial: false,
            venous: false,
        });
        self.vertices.len() - 1
    }

    /// Add a vessel segment. `length` and `diameter` in µm.
    pub fn add_edge(
        &mut self,
        source: VertexId,
        target: VertexId,
        length: f64,
        diameter: f64,
    ) -> Result<usize> {
        if source >= self.vertices.len() {
            return Err(NetworkError::UnknownVertex(source));
        }
        if target >= self.vertices.len() {
            return Err(NetworkError::UnknownVertex(target));
        }
        if length <= 0.0 || diameter <= 0.0 {
            return Err(NetworkError::InvalidGeometry(format!(
                "edge {}→{}: length {} µm, diameter {} µm",
                source, target, length, diameter
            )));
        }
        let crosssection = std::f64::consts::PI * diameter * diameter / 4.0;
        self.edges.push(EdgeState {
            source,
            target,
            length,
            diameter,
            crosssection,
            diam_calc_eff: diameter.max(MIN_FIT_DIAMETER_UM),
            min_dist: 0.0,
            n_max: 0,
            specific_resistance: 0.0,
            resistance: 0.0,
            eff_resistance: 0.0,
            rbc: Vec::new(),
            htt: 0.0,
            htd: 0.0,
            flow: 0.0,
            v: 0.0,
            sign: 0,
            sign_old: 0,
            rbc_in_max: 0,
            htt_bc: None,
            pos_first_last: None,
            v_last: None,
            keep_rbcs: None,
            no_flow: false,
        });
        Ok(self.edges.len() - 1)
    }

    /// Pressure boundary condition in mmHg.
    pub fn set_pressure_bc(&mut self, v: VertexId, p_mmhg: f64) -> Result<()> {
        self.vertex_mut(v)?.p_bc = Some(p_mmhg);
        Ok(())
    }

    /// Residual (flow) boundary condition, default units.
    pub fn set_residual_bc(&mut self, v: VertexId, r: f64) -> Result<()> {
        self.vertex_mut(v)?.r_bc = Some(r);
        Ok(())
    }

    /// Mark an arterial inflow boundary vertex.
    pub fn set_arterial(&mut self, v: VertexId) -> Result<()> {
        self.vertex_mut(v)?.arterial = true;
        Ok(())
    }

    /// Mark a venous outflow boundary vertex.
    pub fn set_venous(&mut self, v: VertexId) -> Result<()> {
        self.vertex_mut(v)?.venous = true;
        Ok(())
    }

    /// Inflow tube-hematocrit boundary condition on a feed edge.
    pub fn set_tube_hematocrit_bc(&mut self, e: usize, htt: f64) -> Result<()> {
        if !(0.0..1.0).contains(&htt) {
            return Err(NetworkError::InvalidBoundaryCondition(format!(
                "tube hematocrit BC {} outside [0, 1)",
                htt
            )));
        }
        self.edges
            .get_mut(e)
            .ok_or(NetworkError::UnknownEdge(e))?
            .htt_bc = Some(htt);
        Ok(())
    }

    /// Inflow discharge-hematocrit boundary condition, converted to the tube
    /// value for the edge's diameter.
    pub fn set_discharge_hematocrit_bc(&mut self, e: usize, htd: f64, invivo: bool) -> Result<()> {
        let d = self
            .edges
            .get(e)
            .ok_or(NetworkError::UnknownEdge(e))?
            .diameter;
        let htt = physiology::discharge_to_tube_hematocrit(htd, d, invivo);
        self.set_tube_hematocrit_bc(e, htt)
    }

    /// Preset RBC positions (continued simulations).
    pub fn set_rbc_positions(&mut self, e: usize, positions: Vec<f64>) -> Result<()> {
        self.edges
            .get_mut(e)
            .ok_or(NetworkError::UnknownEdge(e))?
            .rbc = positions;
        Ok(())
    }

    fn vertex_mut(&mut self, v: VertexId) -> Result<&mut VertexState> {
        self.vertices.get_mut(v).ok_or(NetworkError::UnknownVertex(v))
    }

    pub fn build(self) -> Result<VascularNetwork> {
        Ok(VascularNetwork::new(self.vertices, self.edges))
    }
}

/// Record the vertices whose incident diameters straddle `d_threshold` and
/// settle `is_cap` for all the others.
pub fn assign_capillary_classes(net: &mut VascularNetwork, d_threshold: f64) {
    net.interface_vertices.clear();
    for v in 0..net.vertex_count() {
        let mut small = 0usize;
        let mut total = 0usize;
        for (e, _) in net.adjacent(v) {
            total += 1;
            if net.edges[e].diameter < d_threshold {
                small += 1;
            }
        }
        if small == total {
            net.vertices[v].is_cap = true;
        } else if small == 0 {
            net.vertices[v].is_cap = false;
        } else {
            net.interface_vertices.push(v);
        }
    }
}

/// Fill edges with RBCs according to the initial hematocrit.
///
/// N = round(ht·n_max) occupied slots are drawn as a random subset of the
/// n_max packing slots; each RBC sits at the center of its slot. Feed edges
/// use their own hematocrit BC as the target. `Current` keeps whatever
/// positions are present.
pub fn seed_rbcs<R: Rng>(
    net: &mut VascularNetwork,
    initial: InitialHematocrit,
    invivo: bool,
    rng: &mut R,
) {
    if initial == InitialHematocrit::Current {
        return;
    }
    for e in net.edges.iter_mut() {
        let n_max = e.n_max.max(1);
        let htt = match e.htt_bc {
            Some(bc) => bc,
            None => match initial {
                InitialHematocrit::Tube(ht0) => ht0,
                InitialHematocrit::Discharge(hd0) => {
                    physiology::discharge_to_tube_hematocrit(hd0, e.diameter, invivo)
                }
                InitialHematocrit::Current => unreachable!(),
            },
        };
        let n = ((htt * n_max as f64).round() as usize).min(n_max);
        let mut slots: Vec<usize> = sample(rng, n_max, n).into_vec();
        slots.sort_unstable();
        e.rbc = slots
            .iter()
            .map(|&s| s as f64 * e.min_dist + e.min_dist / 2.0)
            .collect();
    }
}
