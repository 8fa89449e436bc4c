//! Inlet RBC injection with lognormally distributed spacing.
//!
//! The dimensionless line density z of an inlet follows a logit-normal law:
//! z = 1/(1 + exp(u)) with u ~ N(µ, σ). The pair (µ, σ) is fitted once per
//! distinct hematocrit boundary value so that the law's mean matches the
//! boundary line density and its standard deviation 0.1, then cached for
//! the rest of the simulation.

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, TransportError};
use vasculature::EdgeState;

/// Target standard deviation of the inlet line density.
const STD_LD: f64 = 0.1;

/// Convergence tolerance of the moment fit.
const FIT_XTOL: f64 = 1e-20;

const FIT_MAX_ITER: usize = 200;

/// Intervals of the Simpson rule used for the moment integrals.
const QUAD_INTERVALS: usize = 4096;

/// Fitted spacing distribution of one inlet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpacingDistribution {
    pub mu: f64,
    pub sigma: f64,
}

/// Line-density PDF f(z; µ, σ) on (0, 1).
fn line_density_pdf(z: f64, mu: f64, sigma: f64) -> f64 {
    let w = (1.0 / z - 1.0).ln() - mu;
    1.0 / ((z - z * z) * sigma * (2.0 * std::f64::consts::PI).sqrt())
        * (-w * w / (2.0 * sigma * sigma)).exp()
}

/// Simpson integral of g over (0, 1); the integrand vanishes at both ends.
fn integrate_unit<F: Fn(f64) -> f64>(g: F) -> f64 {
    let a = 1e-9;
    let b = 1.0 - 1e-9;
    let h = (b - a) / QUAD_INTERVALS as f64;
    let mut sum = g(a) + g(b);
    for k in 1..QUAD_INTERVALS {
        let z = a + k as f64 * h;
        sum += g(z) * if k % 2 == 1 { 4.0 } else { 2.0 };
    }
    sum * h / 3.0
}

/// Mean and variance of the line density for given (µ, σ).
fn moments(mu: f64, sigma: f64, mean_ld: f64) -> (f64, f64) {
    let mean = integrate_unit(|z| z * line_density_pdf(z, mu, sigma));
    let var = integrate_unit(|z| (z - mean_ld).powi(2) * line_density_pdf(z, mu, sigma));
    (mean, var)
}

impl SpacingDistribution {
    /// Fit (µ, σ) so that mean = `mean_ld` and std = 0.1, by a damped Newton
    /// iteration on the two moment equations with a finite-difference
    /// Jacobian.
    pub fn fit(mean_ld: f64) -> Result<Self> {
        if !(0.0 < mean_ld && mean_ld < 1.0) {
            return Err(TransportError::InvalidLineDensity(mean_ld));
        }
        let target_var = STD_LD * STD_LD;
        let residual = |mu: f64, sigma: f64| {
            let (m, v) = moments(mu, sigma, mean_ld);
            (m - mean_ld, v - target_var)
        };

        let (mut mu, mut sigma) = if mean_ld < 0.35 {
            (0.89, 0.5)
        } else {
            (mean_ld, STD_LD)
        };

        let (mut r0, mut r1) = residual(mu, sigma);
        for iter in 0..FIT_MAX_ITER {
            let norm = r0.hypot(r1);
            if norm < 1e-10 {
                debug!(mean_ld, mu, sigma, iter, "spacing distribution fitted");
                return Ok(Self { mu, sigma });
            }
            // Central-difference Jacobian.
            let d = 1e-6;
            let (ra0, ra1) = residual(mu + d, sigma);
            let (rb0, rb1) = residual(mu - d, sigma);
            let (rc0, rc1) = residual(mu, sigma + d);
            let (rd0, rd1) = residual(mu, sigma - d);
            let j00 = (ra0 - rb0) / (2.0 * d);
            let j10 = (ra1 - rb1) / (2.0 * d);
            let j01 = (rc0 - rd0) / (2.0 * d);
            let j11 = (rc1 - rd1) / (2.0 * d);
            let det = j00 * j11 - j01 * j10;
            if det.abs() < 1e-30 {
                break;
            }
            let step_mu = (r0 * j11 - r1 * j01) / det;
            let step_sigma = (r1 * j00 - r0 * j10) / det;

            // Damp until the residual shrinks.
            let mut scale = 1.0;
            let mut accepted = false;
            for _ in 0..25 {
                let mu_new = mu - scale * step_mu;
                let sigma_new = (sigma - scale * step_sigma).max(1e-6);
                let (n0, n1) = residual(mu_new, sigma_new);
                if n0.hypot(n1) < norm {
                    mu = mu_new;
                    sigma = sigma_new;
                    r0 = n0;
                    r1 = n1;
                    accepted = true;
                    break;
                }
                scale *= 0.5;
            }
            if !accepted || (scale * step_mu).hypot(scale * step_sigma) < FIT_XTOL {
                break;
            }
        }
        if r0.hypot(r1) < 1e-8 {
            return Ok(Self { mu, sigma });
        }
        Err(TransportError::DistributionFit(mean_ld))
    }

    /// Draw one inter-RBC spacing: minDist·(1 + exp(µ + σ·𝓝(0,1))).
    pub fn draw_spacing<R: Rng>(&self, min_dist: f64, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        min_dist + min_dist * (self.mu + self.sigma * z).exp()
    }
}

/// Fitted distributions, keyed by hematocrit boundary value. Fits are
/// expensive (quadrature inside a root find), so each distinct value is
/// computed once per simulation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectorCache {
    fits: Vec<(f64, SpacingDistribution)>,
}

impl InjectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_fit(&mut self, htt_bc: f64) -> Result<SpacingDistribution> {
        if let Some(&(_, dist)) = self.fits.iter().find(|(h, _)| *h == htt_bc) {
            return Ok(dist);
        }
        let dist = SpacingDistribution::fit(htt_bc)?;
        self.fits.push((htt_bc, dist));
        Ok(dist)
    }
}

/// Inject new RBCs at the upstream end of a feed edge.
///
/// Walks upstream from the current head (or from where the last head would
/// have drifted, if the edge is empty), placing cells one drawn spacing
/// apart while free capacity remains. A spacing that does not fit is kept
/// for the next step. Returns the number of cells placed.
pub fn inject<R: Rng>(
    edge: &mut EdgeState,
    dist: &SpacingDistribution,
    dt: f64,
    rng: &mut R,
) -> usize {
    let min_dist = edge.min_dist;
    let was_empty = edge.rbc.is_empty();
    let mut free = edge.n_max.saturating_sub(edge.rbc.len());
    let mut placed: Vec<f64> = Vec::new();

    let mut pos_first = if !was_empty {
        edge.dist_to_first()
    } else {
        edge.pos_first_last.unwrap_or(edge.length) + edge.v_last.unwrap_or(0.0) * dt
    };

    while pos_first >= min_dist && free > 0 {
        let (spacing, carried) = match edge.keep_rbcs.take() {
            Some(s) => (s, true),
            None => (dist.draw_spacing(min_dist, rng), false),
        };
        if pos_first - spacing >= 0.0 {
            pos_first -= spacing;
            placed.push(pos_first);
            free -= 1;
            edge.pos_first_last = Some(pos_first);
            edge.v_last = Some(edge.v);
        } else if carried {
            // The stored spacing still does not fit; keep it.
            edge.keep_rbcs = Some(spacing);
            edge.pos_first_last = Some(pos_first);
            if !was_empty {
                edge.v_last = Some(edge.v);
            }
            break;
        } else {
            edge.keep_rbcs = Some(spacing);
            edge.v_last = Some(edge.v);
            edge.pos_first_last = Some(*placed.last().unwrap_or(&pos_first));
            break;
        }
    }

    if placed.is_empty() {
        if was_empty {
            // Keep tracking where the last head would have drifted to.
            edge.pos_first_last = Some(pos_first);
        }
        return 0;
    }
    placed.reverse(); // ascending from the entry
    edge.splice_entry(&placed);
    placed.len()
}
