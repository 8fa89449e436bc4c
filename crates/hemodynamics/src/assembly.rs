//! Sparse assembly of the vertex-pressure system.
//!
//! Row semantics (mixed dimensions, so no re-indexing is needed):
//! - pressure-BC vertex: identity row, b = pBC (scaled to default units);
//! - interior vertex: Laplacian row with conductances 1/effResistance,
//!   diagonal Σg, off-diagonal −g per parallel edge; neighbors holding a
//!   pressure BC contribute pBC·g to the right-hand side instead of an
//!   off-diagonal; a residual BC adds to the right-hand side directly.
//!
//! Self-loops carry no pressure gradient and are skipped.

use nalgebra::DVector;
use sprs::{CsMat, TriMat};
use tracing::info;

use crate::solver::{self, SolveMethod, SolveReport};
use vasculature::{rheology, EdgeId, VascularNetwork, VertexId};

/// The assembled system, kept as a row store so that partial updates can
/// rebuild individual rows between solves.
#[derive(Debug, Clone)]
pub struct PressureSystem {
    rows: Vec<Vec<(usize, f64)>>,
    b: DVector<f64>,
    x: DVector<f64>,
}

impl PressureSystem {
    pub fn new(n: usize) -> Self {
        Self {
            rows: vec![Vec::new(); n],
            b: DVector::zeros(n),
            x: DVector::zeros(n),
        }
    }

    /// Plant a zero-pressure BC in every connected component that has none,
    /// so the system is well posed. Returns the vertices planted.
    pub fn ensure_well_posed(net: &mut VascularNetwork) -> Vec<VertexId> {
        let mut planted = Vec::new();
        for component in net.connected_components() {
            if component.iter().all(|&v| net.vertices[v].p_bc.is_none()) {
                let v = component[0];
                net.vertices[v].p_bc = Some(0.0);
                planted.push(v);
            }
        }
        if !planted.is_empty() {
            info!(
                count = planted.len(),
                "planted zero-pressure boundary conditions in unconstrained components"
            );
        }
        planted
    }

    /// Rebuild rows. With `changed = None` the whole system is assembled;
    /// otherwise only the changed vertices, their neighbors, and the
    /// incident edges' effective resistances are refreshed.
    pub fn assemble(
        &mut self,
        net: &mut VascularNetwork,
        invivo: bool,
        changed: Option<&[VertexId]>,
    ) {
        let (vertex_list, edge_list): (Vec<VertexId>, Option<Vec<EdgeId>>) = match changed {
            None => ((0..net.vertex_count()).collect(), None),
            Some(vs) => {
                let mut vertices = Vec::new();
                let mut edges = Vec::new();
                for &v in vs {
                    vertices.push(v);
                    for (e, n) in net.adjacent(v) {
                        vertices.push(n);
                        edges.push(e);
                    }
                }
                vertices.sort_unstable();
                vertices.dedup();
                edges.sort_unstable();
                edges.dedup();
                (vertices, Some(edges))
            }
        };

        rheology::update_effective_resistance(net, invivo, edge_list.as_deref());

        for &i in &vertex_list {
            self.rebuild_row(net, i);
        }
    }

    fn rebuild_row(&mut self, net: &VascularNetwork, i: VertexId) {
        let row = &mut self.rows[i];
        row.clear();
        self.b[i] = 0.0;

        if let Some(p_bc) = net.vertices[i].p_bc {
            row.push((i, 1.0));
            self.b[i] = physiology::mmhg_to_default(p_bc);
            return;
        }

        let mut diagonal = 0.0;
        for (e, j) in net.adjacent(i) {
            if j == i {
                continue;
            }
            let conductance = 1.0 / net.edges[e].eff_resistance;
            diagonal += conductance;
            if let Some(p_bc) = net.vertices[j].p_bc {
                self.b[i] += physiology::mmhg_to_default(p_bc) * conductance;
            } else {
                // Parallel edges accumulate on the same off-diagonal.
                match row.iter_mut().find(|(col, _)| *col == j) {
                    Some((_, val)) => *val -= conductance,
                    None => row.push((j, -conductance)),
                }
            }
        }
        row.push((i, diagonal));
        if let Some(r_bc) = net.vertices[i].r_bc {
            self.b[i] += r_bc;
        }
    }

    /// Solve A·p = b and write |p| into the vertex pressures (small negative
    /// pressures can arise numerically and are physically zero). The previous
    /// solution warm-starts the iterative method.
    pub fn solve(&mut self, net: &mut VascularNetwork, precision: f64) -> SolveReport {
        self.solve_with(net, SolveMethod::Iterative, precision)
    }

    pub fn solve_with(
        &mut self,
        net: &mut VascularNetwork,
        method: SolveMethod,
        precision: f64,
    ) -> SolveReport {
        let report = match method {
            SolveMethod::Iterative => {
                let a = self.to_csr();
                solver::pcg(&a, &self.b, &mut self.x, precision)
            }
            SolveMethod::Direct => self.solve_direct(),
        };
        if !report.converged {
            tracing::warn!(
                iterations = report.iterations,
                residual = report.residual,
                "pressure solve did not converge; committing the last iterate"
            );
        }
        for (v, p) in self.x.iter().enumerate() {
            net.vertices[v].pressure = p.abs();
        }
        report
    }

    fn solve_direct(&mut self) -> SolveReport {
        let n = self.rows.len();
        let mut dense = nalgebra::DMatrix::<f64>::zeros(n, n);
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, val) in row {
                dense[(i, j)] += val;
            }
        }
        match dense.lu().solve(&self.b) {
            Some(x) => {
                self.x = x;
                SolveReport {
                    converged: true,
                    iterations: 1,
                    residual: self.residual_norm(),
                }
            }
            None => SolveReport {
                converged: false,
                iterations: 1,
                residual: self.residual_norm(),
            },
        }
    }

    /// 2-norm of A·x − b for the current iterate.
    pub fn residual_norm(&self) -> f64 {
        let a = self.to_csr();
        (solver::spmv(&a, &self.x) - &self.b).norm()
    }

    fn to_csr(&self) -> CsMat<f64> {
        let n = self.rows.len();
        let mut tri = TriMat::new((n, n));
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, val) in row {
                tri.add_triplet(i, j, val);
            }
        }
        tri.to_csr()
    }
}
