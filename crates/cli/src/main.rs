//! Run a discrete RBC transport simulation from a JSON network description.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use simulation::{
    CheckpointState, EvolveOptions, SampleWindow, Simulation, SimulationConfig, SolveMethod,
};
use vasculature::{InitialHematocrit, NetworkBuilder, VascularNetwork};

#[derive(Parser)]
#[command(name = "microhemo", about = "Discrete RBC transport in microvascular networks")]
struct Args {
    /// Network description (JSON)
    network: PathBuf,

    /// Simulated duration (s)
    #[arg(long, default_value_t = 0.1)]
    duration: f64,

    /// Fixed timestep (s)
    #[arg(long, default_value_t = 1e-3)]
    dt: f64,

    /// Initial tube hematocrit
    #[arg(long, default_value_t = 0.0)]
    ht0: f64,

    /// Initial discharge hematocrit (overrides --ht0)
    #[arg(long)]
    hd0: Option<f64>,

    /// Use the in vitro rheology fits instead of in vivo
    #[arg(long)]
    invitro: bool,

    /// Capillary diameter threshold (µm)
    #[arg(long, default_value_t = 10.0)]
    d_threshold: f64,

    /// PRNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Sampling window start,stop,step (s)
    #[arg(long, value_delimiter = ',')]
    sample: Option<Vec<f64>>,

    /// Directory for checkpoints and the final state
    #[arg(long)]
    out: Option<PathBuf>,

    /// Continue from a checkpoint instead of starting fresh
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Solve the pressure system with a dense direct factorization
    #[arg(long)]
    direct: bool,

    /// Record per-edge bifurcation crossing counts
    #[arg(long)]
    analyze_bif_events: bool,
}

#[derive(Debug, Deserialize)]
struct NetworkSpec {
    vertices: Vec<VertexSpec>,
    edges: Vec<EdgeSpec>,
}

#[derive(Debug, Deserialize)]
struct VertexSpec {
    /// Pressure boundary condition (mmHg)
    #[serde(default)]
    pressure_bc: Option<f64>,
    /// Residual boundary condition (µm³/s)
    #[serde(default)]
    residual_bc: Option<f64>,
    #[serde(default)]
    arterial: bool,
    #[serde(default)]
    venous: bool,
}

#[derive(Debug, Deserialize)]
struct EdgeSpec {
    source: usize,
    target: usize,
    /// Length (µm)
    length: f64,
    /// Diameter (µm)
    diameter: f64,
    /// Inflow tube hematocrit
    #[serde(default)]
    tube_hematocrit_bc: Option<f64>,
}

fn build_network(spec: &NetworkSpec) -> Result<VascularNetwork> {
    let mut b = NetworkBuilder::new();
    for vs in &spec.vertices {
        let v = b.add_vertex();
        if let Some(p) = vs.pressure_bc {
            b.set_pressure_bc(v, p)?;
        }
        if let Some(r) = vs.residual_bc {
            b.set_residual_bc(v, r)?;
        }
        if vs.arterial {
            b.set_arterial(v)?;
        }
        if vs.venous {
            b.set_venous(v)?;
        }
    }
    for es in &spec.edges {
        let e = b.add_edge(es.source, es.target, es.length, es.diameter)?;
        if let Some(htt) = es.tube_hematocrit_bc {
            b.set_tube_hematocrit_bc(e, htt)?;
        }
    }
    Ok(b.build()?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();

    let config = SimulationConfig {
        invivo: !args.invitro,
        d_threshold: args.d_threshold,
        initial_hematocrit: match args.hd0 {
            Some(hd0) => InitialHematocrit::Discharge(hd0),
            None => InitialHematocrit::Tube(args.ht0),
        },
        plasma_viscosity: None,
        analyze_bif_events: args.analyze_bif_events,
        seed: args.seed,
    };

    let (mut sim, init) = match &args.resume {
        Some(path) => {
            let state: CheckpointState = simulation::checkpoint::read(path)
                .with_context(|| format!("reading checkpoint {}", path.display()))?;
            info!(t = state.dt_final, "resuming from checkpoint");
            (Simulation::from_checkpoint(state, config)?, false)
        }
        None => {
            let text = fs::read_to_string(&args.network)
                .with_context(|| format!("reading {}", args.network.display()))?;
            let spec: NetworkSpec =
                serde_json::from_str(&text).context("parsing network description")?;
            let net = build_network(&spec)?;
            info!(
                vertices = net.vertex_count(),
                edges = net.edge_count(),
                "network loaded"
            );
            (Simulation::new(net, config)?, true)
        }
    };

    if let Some(w) = &args.sample {
        anyhow::ensure!(w.len() == 3, "--sample expects start,stop,step");
    }

    if let Some(dir) = &args.out {
        fs::create_dir_all(dir)?;
    }

    sim.evolve(&EvolveOptions {
        duration: args.duration,
        dt: args.dt,
        method: if args.direct {
            SolveMethod::Direct
        } else {
            SolveMethod::Iterative
        },
        sample: args.sample.as_deref().map(|w| SampleWindow {
            start: w[0],
            stop: w[1],
            step: w[2],
        }),
        sample_detailed: false,
        precision: 1e-12,
        init,
        output_dir: args.out.clone(),
    })?;

    info!(
        t = sim.time(),
        rbcs = sim.net().total_rbc_count(),
        "simulation complete"
    );
    Ok(())
}
