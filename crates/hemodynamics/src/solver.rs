//! Jacobi-preconditioned conjugate gradient solver.
//!
//! The assembled system is symmetric positive definite: boundary-condition
//! rows are pure identity and their couplings are moved to the right-hand
//! side, leaving a Laplacian plus identity blocks. CG with a diagonal
//! preconditioner and warm start converges in a few dozen iterations on
//! typical microvascular networks.

use nalgebra::DVector;
use sprs::CsMat;

/// How the pressure system is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMethod {
    /// Dense LU factorization; exact, for small networks
    Direct,
    /// Jacobi-preconditioned conjugate gradient with warm start
    Iterative,
}

/// Outcome of a pressure solve.
#[derive(Debug, Clone, Copy)]
pub struct SolveReport {
    pub converged: bool,
    pub iterations: usize,
    /// 2-norm of the final residual
    pub residual: f64,
}

/// Sparse matrix-vector product y = A·x.
pub fn spmv(a: &CsMat<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(a.rows());
    for (i, row) in a.outer_iterator().enumerate() {
        let mut acc = 0.0;
        for (j, &val) in row.iter() {
            acc += val * x[j];
        }
        y[i] = acc;
    }
    y
}

/// Solve A·x = b in place, warm-starting from the incoming `x`.
///
/// `tol` is relative to ‖b‖; iteration is capped at 10·n.
pub fn pcg(a: &CsMat<f64>, b: &DVector<f64>, x: &mut DVector<f64>, tol: f64) -> SolveReport {
    let n = b.len();
    if n == 0 {
        return SolveReport {
            converged: true,
            iterations: 0,
            residual: 0.0,
        };
    }
    let diag_inv: DVector<f64> = DVector::from_iterator(
        n,
        (0..n).map(|i| {
            let d = a.get(i, i).copied().unwrap_or(0.0);
            if d.abs() > 0.0 {
                1.0 / d
            } else {
                1.0
            }
        }),
    );

    let b_norm = b.norm();
    let threshold = if b_norm > 0.0 { tol * b_norm } else { tol };
    let max_iter = 10 * n;

    let mut r = b - spmv(a, x);
    if r.norm() <= threshold {
        return SolveReport {
            converged: true,
            iterations: 0,
            residual: r.norm(),
        };
    }
    let mut z = r.component_mul(&diag_inv);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for k in 1..=max_iter {
        let ap = spmv(a, &p);
        let p_ap = p.dot(&ap);
        if p_ap.abs() < f64::MIN_POSITIVE {
            return SolveReport {
                converged: false,
                iterations: k,
                residual: r.norm(),
            };
        }
        let alpha = rz / p_ap;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);

        let r_norm = r.norm();
        if r_norm <= threshold {
            return SolveReport {
                converged: true,
                iterations: k,
                residual: r_norm,
            };
        }

        z = r.component_mul(&diag_inv);
        let rz_next = r.dot(&z);
        let beta = rz_next / rz;
        rz = rz_next;
        p = &z + &p * beta;
    }

    SolveReport {
        converged: false,
        iterations: max_iter,
        residual: r.norm(),
    }
}
