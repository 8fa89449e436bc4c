//! Opaque checkpoint serialization.
//!
//! The whole network plus driver bookkeeping, written with bincode. A pair
//! of files is emitted at every backup point: the network state and the
//! sample series accumulated since the previous backup.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::sampler::SampleSeries;
use crate::Result;
use vasculature::VascularNetwork;

/// Everything needed to continue a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub network: VascularNetwork,

    /// Simulated time reached (s)
    pub dt_final: f64,

    /// Sample-clock time reached (s)
    pub iter_final_sample: f64,

    /// Number of backups written so far
    pub backup_counter: u32,

    /// Per-step totals of RBCs crossing bifurcations (analysis mode)
    pub rbc_moved_all: Vec<usize>,

    /// Per-step (edge, crossings) lists (analysis mode)
    pub rbcs_moved_per_edge: Vec<Vec<(usize, usize)>>,

    /// Sample snapshots and running averages
    pub samples: SampleSeries,
}

pub fn write(path: &Path, state: &CheckpointState) -> Result<()> {
    let file = File::create(path)?;
    bincode::serialize_into(BufWriter::new(file), state)?;
    Ok(())
}

pub fn read(path: &Path) -> Result<CheckpointState> {
    let file = File::open(path)?;
    let mut state: CheckpointState = bincode::deserialize_from(BufReader::new(file))?;
    // The topology graph is not persisted; rebuild it from the edge list.
    state.network.rebuild_graph();
    Ok(state)
}
