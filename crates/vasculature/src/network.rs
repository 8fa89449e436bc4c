//! Network topology and per-edge / per-vertex simulation state.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

pub type EdgeId = usize;
pub type VertexId = usize;

/// Local flow topology of a vertex.
///
/// Discriminants match the persisted numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexType {
    /// Inflow boundary (arterial side)
    Source = 1,
    /// Outflow boundary (venous side)
    Sink = 2,
    /// More outflow than inflow edges
    Divergent = 3,
    /// More inflow than outflow edges
    Convergent = 4,
    /// One in, one out
    Connecting = 5,
    /// Two in, two out
    DoubleConnecting = 6,
    /// All incident edges at equal pressure
    NoFlow = 7,
}

/// State of a single vessel segment.
///
/// Geometry is immutable after construction; everything else is rewritten
/// by the per-timestep loop. RBC positions are kept sorted ascending in the
/// source→target coordinate, regardless of the instantaneous flow sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeState {
    /// Source vertex (topological convention, not flow direction)
    pub source: VertexId,

    /// Target vertex
    pub target: VertexId,

    /// Vessel length (µm)
    pub length: f64,

    /// Vessel diameter (µm)
    pub diameter: f64,

    /// Lumen cross-section π d²/4 (µm²)
    pub crosssection: f64,

    /// Diameter clamped to the validated domain of the empirical fits (µm)
    pub diam_calc_eff: f64,

    /// Minimum center-to-center RBC spacing V_rbc / A (µm)
    pub min_dist: f64,

    /// Packing capacity ⌊length / min_dist⌋
    pub n_max: usize,

    /// 128 µ_plasma / (π d⁴)  (Pa·s/µm⁴)
    pub specific_resistance: f64,

    /// length · specific_resistance (Pa·s/µm³)
    pub resistance: f64,

    /// resistance · ν_rel(d_eff, htd) (Pa·s/µm³)
    pub eff_resistance: f64,

    /// RBC positions, ascending, in [0, length] (µm)
    pub rbc: Vec<f64>,

    /// Tube hematocrit n·min_dist/length
    pub htt: f64,

    /// Discharge hematocrit, clamped to 0.95
    pub htd: f64,

    /// |Δp| / eff_resistance (µm³/s)
    pub flow: f64,

    /// RBC velocity; plasma velocity when htt = 0 (µm/s)
    pub v: f64,

    /// sgn(p_source − p_target) ∈ {−1, 0, +1}
    pub sign: i8,

    /// Sign before the most recent pressure solve
    pub sign_old: i8,

    /// Free RBC slots upstream of the first cell
    pub rbc_in_max: usize,

    /// Inflow tube-hematocrit boundary condition (feed edges only)
    pub htt_bc: Option<f64>,

    /// Where the last injected head would be by now (feed edges)
    pub pos_first_last: Option<f64>,

    /// Velocity at the time of the last injection attempt (feed edges)
    pub v_last: Option<f64>,

    /// Spacing drawn but not yet placed (feed edges)
    pub keep_rbcs: Option<f64>,

    /// Edge excluded from propagation (both endpoints at equal pressure)
    pub no_flow: bool,
}

impl EdgeState {
    pub fn n_rbc(&self) -> usize {
        self.rbc.len()
    }

    /// Distance from the upstream end to the first RBC, in flow direction.
    /// Full length if the edge is empty.
    pub fn dist_to_first(&self) -> f64 {
        if self.rbc.is_empty() {
            self.length
        } else if self.sign >= 0 {
            self.rbc[0]
        } else {
            self.length - self.rbc[self.rbc.len() - 1]
        }
    }

    /// Splice RBCs in at the upstream end.
    ///
    /// `entry_positions` are distances from the upstream end in flow
    /// direction, ascending (closest to the entry first). They must all lie
    /// upstream of the current first RBC.
    pub fn splice_entry(&mut self, entry_positions: &[f64]) {
        if entry_positions.is_empty() {
            return;
        }
        if self.sign >= 0 {
            let mut merged = Vec::with_capacity(self.rbc.len() + entry_positions.len());
            merged.extend_from_slice(entry_positions);
            merged.extend_from_slice(&self.rbc);
            self.rbc = merged;
        } else {
            self.rbc
                .extend(entry_positions.iter().rev().map(|p| self.length - p));
        }
    }

    /// Remove `count` RBCs at the downstream end.
    pub fn remove_at_exit(&mut self, count: usize) {
        let n = self.rbc.len().min(count);
        if self.sign >= 0 {
            self.rbc.truncate(self.rbc.len() - n);
        } else {
            self.rbc.drain(..n);
        }
    }

    /// Count RBCs whose advected position has left [0, length].
    pub fn count_overshoots(&self) -> usize {
        if self.sign >= 0 {
            self.rbc.iter().rev().take_while(|&&p| p > self.length).count()
        } else {
            self.rbc.iter().take_while(|&&p| p < 0.0).count()
        }
    }

    /// Overshoot distances of the `count` leading overshooters, ascending
    /// (the head of the train comes last).
    pub fn overshoot_distances(&self, count: usize) -> Vec<f64> {
        let n = self.rbc.len();
        if self.sign >= 0 {
            self.rbc[n - count..].iter().map(|p| p - self.length).collect()
        } else {
            // Leading cells are the most negative; reverse to ascending.
            self.rbc[..count].iter().rev().map(|p| -p).collect()
        }
    }
}

/// State of a single branch point or boundary vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexState {
    /// Pressure boundary condition (mmHg), if any
    pub p_bc: Option<f64>,

    /// Residual (flow) boundary condition, if any
    pub r_bc: Option<f64>,

    /// Solved pressure (Pa)
    pub pressure: f64,

    /// Edges currently flowing into this vertex
    pub inflow: Vec<EdgeId>,

    /// Edges currently flowing out of this vertex
    pub outflow: Vec<EdgeId>,

    /// Capillary vertex (drives bifurcation preference by velocity)
    pub is_cap: bool,

    /// Current flow-topology class
    pub v_type: VertexType,

    /// Arterial inflow boundary flag
    pub arterial: bool,

    /// Venous outflow boundary flag
    pub venous: bool,
}

/// The single mutable shared structure of the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VascularNetwork {
    pub vertices: Vec<VertexState>,
    pub edges: Vec<EdgeState>,

    /// Vertices whose incident diameters straddle the capillary threshold;
    /// their `is_cap` flag is refreshed from inflow diameters each pass.
    pub interface_vertices: Vec<VertexId>,

    /// Current arterial boundary vertices
    pub arterial: Vec<VertexId>,

    /// Current venous boundary vertices
    pub venous: Vec<VertexId>,

    #[serde(skip)]
    graph: UnGraph<(), EdgeId>,
}

impl VascularNetwork {
    pub(crate) fn new(vertices: Vec<VertexState>, edges: Vec<EdgeState>) -> Self {
        let mut net = Self {
            vertices,
            edges,
            interface_vertices: Vec::new(),
            arterial: Vec::new(),
            venous: Vec::new(),
            graph: UnGraph::default(),
        };
        net.rebuild_graph();
        net
    }

    /// Rebuild the topology graph from the edge list. Needed after
    /// deserialization (the graph itself is not persisted).
    pub fn rebuild_graph(&mut self) {
        let mut graph = UnGraph::with_capacity(self.vertices.len(), self.edges.len());
        for _ in 0..self.vertices.len() {
            graph.add_node(());
        }
        for (ei, e) in self.edges.iter().enumerate() {
            graph.add_edge(NodeIndex::new(e.source), NodeIndex::new(e.target), ei);
        }
        self.graph = graph;
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Incident (edge, neighbor) pairs of a vertex. Self-loops report the
    /// vertex itself as neighbor.
    pub fn adjacent(&self, v: VertexId) -> Vec<(EdgeId, VertexId)> {
        self.graph
            .edges(NodeIndex::new(v))
            .map(|er| {
                let other = if er.source().index() == v {
                    er.target().index()
                } else {
                    er.source().index()
                };
                (*er.weight(), other)
            })
            .collect()
    }

    /// The endpoint of `e` that is not `v` (or `v` for a self-loop).
    pub fn opposite(&self, v: VertexId, e: EdgeId) -> VertexId {
        let edge = &self.edges[e];
        if edge.source == v {
            edge.target
        } else {
            edge.source
        }
    }

    /// Downstream vertex of an edge under its current flow sign.
    pub fn downstream_vertex(&self, e: EdgeId) -> VertexId {
        let edge = &self.edges[e];
        if edge.sign >= 0 {
            edge.target
        } else {
            edge.source
        }
    }

    /// Connected components as vertex lists (singleton vertices included).
    pub fn connected_components(&self) -> Vec<Vec<VertexId>> {
        let n = self.vertices.len();
        let mut uf = UnionFind::<usize>::new(n);
        for e in &self.edges {
            uf.union(e.source, e.target);
        }
        let mut groups: Vec<Vec<VertexId>> = Vec::new();
        let mut root_to_group = vec![usize::MAX; n];
        for v in 0..n {
            let root = uf.find(v);
            if root_to_group[root] == usize::MAX {
                root_to_group[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[root_to_group[root]].push(v);
        }
        groups
    }

    /// Total lumen volume Σ A·L (µm³).
    pub fn total_volume(&self) -> f64 {
        self.edges.iter().map(|e| e.crosssection * e.length).sum()
    }

    /// Total RBC count over all edges.
    pub fn total_rbc_count(&self) -> usize {
        self.edges.iter().map(|e| e.rbc.len()).sum()
    }

    /// Edge ids carrying a hematocrit boundary condition.
    pub fn feed_edges(&self) -> Vec<EdgeId> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.htt_bc.is_some())
            .map(|(i, _)| i)
            .collect()
    }

    /// Record where the head of a feed edge sits, for the injector.
    /// Called after the initial solve and when a boundary reverses to
    /// arterial.
    pub fn reset_feed_state(&mut self, e: EdgeId) {
        let edge = &mut self.edges[e];
        edge.pos_first_last = Some(edge.dist_to_first());
        edge.v_last = Some(edge.v);
    }
}
