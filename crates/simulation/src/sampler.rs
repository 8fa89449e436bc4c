//! Snapshots and running averages of the network fields.

use serde::{Deserialize, Serialize};

use vasculature::VascularNetwork;

/// Per-step snapshots keyed by time, plus running averages that survive
/// checkpoint boundaries via `averaged_count` weighting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleSeries {
    pub time: Vec<f64>,
    pub flow: Vec<Vec<f64>>,
    pub v: Vec<Vec<f64>>,
    pub htt: Vec<Vec<f64>>,
    pub htd: Vec<Vec<f64>>,
    pub n_rbc: Vec<Vec<f64>>,
    pub eff_resistance: Vec<Vec<f64>>,
    /// Vertex pressures in mmHg
    pub pressure: Vec<Vec<f64>>,
    pub averages: RunningAverages,
}

/// Weighted averages over all samples taken so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunningAverages {
    pub averaged_count: usize,
    pub flow: Vec<f64>,
    pub v: Vec<f64>,
    pub htt: Vec<f64>,
    pub htd: Vec<f64>,
    pub n_rbc: Vec<f64>,
    pub eff_resistance: Vec<f64>,
    pub pressure: Vec<f64>,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one snapshot of the edge and vertex fields.
    pub fn record(&mut self, net: &VascularNetwork, t: f64) {
        self.time.push(t);
        self.flow.push(net.edges.iter().map(|e| e.flow).collect());
        self.v.push(net.edges.iter().map(|e| e.v).collect());
        self.htt.push(net.edges.iter().map(|e| e.htt).collect());
        self.htd.push(net.edges.iter().map(|e| e.htd).collect());
        self.n_rbc
            .push(net.edges.iter().map(|e| e.rbc.len() as f64).collect());
        self.eff_resistance
            .push(net.edges.iter().map(|e| e.eff_resistance).collect());
        self.pressure.push(
            net.vertices
                .iter()
                .map(|v| physiology::default_to_mmhg(v.pressure))
                .collect(),
        );
    }

    /// Fold the pending snapshots into the running averages and drop them.
    pub fn merge_averages(&mut self) {
        let n_new = self.time.len();
        if n_new == 0 {
            return;
        }
        let n_old = self.averages.averaged_count;
        merge_field(&mut self.averages.flow, &self.flow, n_old, n_new);
        merge_field(&mut self.averages.v, &self.v, n_old, n_new);
        merge_field(&mut self.averages.htt, &self.htt, n_old, n_new);
        merge_field(&mut self.averages.htd, &self.htd, n_old, n_new);
        merge_field(&mut self.averages.n_rbc, &self.n_rbc, n_old, n_new);
        merge_field(
            &mut self.averages.eff_resistance,
            &self.eff_resistance,
            n_old,
            n_new,
        );
        merge_field(&mut self.averages.pressure, &self.pressure, n_old, n_new);
        self.averages.averaged_count = n_old + n_new;
        self.clear_snapshots();
    }

    fn clear_snapshots(&mut self) {
        self.time.clear();
        self.flow.clear();
        self.v.clear();
        self.htt.clear();
        self.htd.clear();
        self.n_rbc.clear();
        self.eff_resistance.clear();
        self.pressure.clear();
    }
}

/// avg ← (n_old·avg + n_new·mean(snapshots)) / (n_old + n_new)
fn merge_field(avg: &mut Vec<f64>, snapshots: &[Vec<f64>], n_old: usize, n_new: usize) {
    let width = snapshots[0].len();
    let mut mean = vec![0.0; width];
    for snap in snapshots {
        for (m, &s) in mean.iter_mut().zip(snap.iter()) {
            *m += s;
        }
    }
    for m in mean.iter_mut() {
        *m /= n_new as f64;
    }
    if avg.is_empty() || n_old == 0 {
        *avg = mean;
    } else {
        let total = (n_old + n_new) as f64;
        for (a, m) in avg.iter_mut().zip(mean.iter()) {
            *a = (n_old as f64 * *a + n_new as f64 * *m) / total;
        }
    }
}
