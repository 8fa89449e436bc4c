//! The fixed-dt evolution loop.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::checkpoint::{self, CheckpointState};
use crate::config::{EvolveOptions, SimulationConfig};
use crate::sampler::SampleSeries;
use crate::Result;
use hemodynamics::{
    update_flow_and_velocity, update_flow_sign, verify_mass_balance, PressureSystem, SolveMethod,
};
use transport::{classifier, InjectorCache, Propagator, StepOutcome};
use vasculature::{builder, rheology, VascularNetwork, VertexId};

/// What one timestep did.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub solve: hemodynamics::SolveReport,
    pub outcome: StepOutcome,
}

/// A running discrete RBC transport simulation.
pub struct Simulation {
    net: VascularNetwork,
    config: SimulationConfig,
    system: PressureSystem,
    injectors: InjectorCache,
    propagator: Propagator,
    samples: SampleSeries,
    rng: StdRng,

    /// Simulated time (s); persisted as `dt_final`
    t: f64,
    /// Sample clock (s); persisted as `iter_final_sample`
    t_sample: f64,
    backup_counter: u32,

    /// Solver used by `step`; set from the evolve options
    method: SolveMethod,

    /// Vertices to relinearize next step; `None` forces a full rebuild
    vertex_update: Option<Vec<VertexId>>,

    /// Hematocrit BC installed on boundaries that reverse into inlets
    default_inlet_htt: Option<f64>,

    rbc_moved_all: Vec<usize>,
    rbcs_moved_per_edge: Vec<Vec<(usize, usize)>>,

    /// Estimated network turnover time V / Σ inflow (s)
    pub turnover_time: f64,
}

impl Simulation {
    /// Set up a simulation: resistances, initial RBC filling, the first full
    /// pressure solve, and the initial topology classification.
    pub fn new(mut net: VascularNetwork, config: SimulationConfig) -> Result<Self> {
        let plasma_viscosity = config
            .plasma_viscosity
            .unwrap_or_else(physiology::dynamic_plasma_viscosity);
        let mut rng = StdRng::seed_from_u64(config.seed);

        rheology::update_nominal_and_specific_resistance(&mut net, plasma_viscosity, None);
        rheology::update_min_dist_and_n_max(&mut net, None);
        builder::assign_capillary_classes(&mut net, config.d_threshold);
        builder::seed_rbcs(&mut net, config.initial_hematocrit, config.invivo, &mut rng);
        rheology::update_hematocrit(&mut net, config.invivo, None);

        PressureSystem::ensure_well_posed(&mut net);
        let mut system = PressureSystem::new(net.vertex_count());
        system.assemble(&mut net, config.invivo, None);
        system.solve(&mut net, 1e-12);
        update_flow_and_velocity(&mut net, config.invivo);
        update_flow_sign(&mut net);
        verify_mass_balance(&net);

        for e in net.feed_edges() {
            net.reset_feed_state(e);
        }
        classifier::classify_all(&mut net, config.d_threshold);
        rheology::update_rbc_in_max(&mut net, None);

        // Fit the inlet spacing distributions up front; they are constants
        // of the simulation.
        let mut injectors = InjectorCache::new();
        let mut default_inlet_htt = None;
        for e in net.feed_edges() {
            if let Some(htt) = net.edges[e].htt_bc {
                injectors.get_or_fit(htt)?;
                default_inlet_htt.get_or_insert(htt);
            }
        }

        let volume = net.total_volume();
        let inflow_sum: f64 = net
            .arterial
            .iter()
            .flat_map(|&v| net.adjacent(v))
            .map(|(e, _)| net.edges[e].flow)
            .sum();
        let turnover_time = if inflow_sum > 0.0 {
            volume / inflow_sum
        } else {
            f64::INFINITY
        };
        info!(volume, inflow_sum, turnover_time, "network initialized");

        let propagator = Propagator::new(net.edge_count(), config.analyze_bif_events);
        Ok(Self {
            net,
            config,
            system,
            injectors,
            propagator,
            samples: SampleSeries::new(),
            rng,
            t: 0.0,
            t_sample: 0.0,
            backup_counter: 0,
            method: SolveMethod::Iterative,
            vertex_update: None,
            default_inlet_htt,
            rbc_moved_all: Vec::new(),
            rbcs_moved_per_edge: Vec::new(),
            turnover_time,
        })
    }

    /// Continue from a checkpoint. The persisted RBC positions are kept.
    pub fn from_checkpoint(state: CheckpointState, mut config: SimulationConfig) -> Result<Self> {
        config.initial_hematocrit = crate::config::InitialHematocrit::Current;
        let mut sim = Self::new(state.network, config)?;
        sim.t = state.dt_final;
        sim.t_sample = state.iter_final_sample;
        sim.backup_counter = state.backup_counter;
        sim.samples = state.samples;
        sim.rbc_moved_all = state.rbc_moved_all;
        sim.rbcs_moved_per_edge = state.rbcs_moved_per_edge;
        Ok(sim)
    }

    pub fn net(&self) -> &VascularNetwork {
        &self.net
    }

    /// Mutable network access. External mutation (e.g. changed boundary
    /// conditions) invalidates the partial relinearization, so the next
    /// step rebuilds the full system.
    pub fn net_mut(&mut self) -> &mut VascularNetwork {
        self.vertex_update = None;
        &mut self.net
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn samples(&self) -> &SampleSeries {
        &self.samples
    }

    /// One timestep of the coupled loop.
    pub fn step(&mut self, dt: f64, precision: f64) -> Result<StepReport> {
        let changed = self.vertex_update.take();
        self.system
            .assemble(&mut self.net, self.config.invivo, changed.as_deref());
        let solve = self
            .system
            .solve_with(&mut self.net, self.method, precision);

        update_flow_and_velocity(&mut self.net, self.config.invivo);
        update_flow_sign(&mut self.net);
        verify_mass_balance(&self.net);

        classifier::refresh_after_sign_change(
            &mut self.net,
            self.config.d_threshold,
            self.default_inlet_htt,
        );
        rheology::update_rbc_in_max(&mut self.net, None);

        let outcome =
            self.propagator
                .propagate(&mut self.net, &mut self.injectors, dt, &mut self.rng)?;
        rheology::update_hematocrit(&mut self.net, self.config.invivo, Some(&outcome.edge_update));

        self.vertex_update = Some(outcome.vertex_update.clone());
        if self.config.analyze_bif_events {
            self.rbc_moved_all.push(outcome.moved_across_bifurcations);
            self.rbcs_moved_per_edge
                .push(outcome.rbcs_moved_per_edge.clone());
        }

        self.t += dt;
        self.t_sample += dt;
        Ok(StepReport { solve, outcome })
    }

    /// Evolve the network for `duration` simulated seconds.
    ///
    /// With `init = false` the run continues at the persisted time and the
    /// sampling window shifts accordingly. Checkpoints are written every
    /// 10% of the requested duration when an output directory is set.
    pub fn evolve(&mut self, opts: &EvolveOptions) -> Result<()> {
        self.method = opts.method;
        let mut sample_window = opts.sample;
        if opts.init {
            self.t = 0.0;
            self.t_sample = 0.0;
            self.samples = SampleSeries::new();
        } else if let Some(w) = sample_window.as_mut() {
            w.start += self.t_sample + w.step;
            w.stop += self.t_sample;
        }

        let t_end = self.t + opts.duration;
        let backup_interval = 0.1 * opts.duration;
        let mut next_backup = self.t + backup_interval;
        let mut next_sample = sample_window.map(|w| w.start);

        info!(
            t_start = self.t,
            t_end,
            dt = opts.dt,
            "evolving network"
        );

        while self.t < t_end - 1e-12 {
            let report = self.step(opts.dt, opts.precision)?;
            if !report.solve.converged {
                warn!(t = self.t, residual = report.solve.residual, "solver did not converge");
            }

            if opts.sample_detailed {
                self.samples.record(&self.net, self.t_sample);
            } else if let (Some(w), Some(start)) = (sample_window, next_sample) {
                if self.t_sample >= start && self.t_sample <= w.stop {
                    self.samples.record(&self.net, self.t_sample);
                    next_sample = Some(self.t_sample + w.step);
                    if self.t > next_backup {
                        self.write_backup(opts.output_dir.as_deref())?;
                        next_backup += backup_interval;
                    }
                }
            }
        }

        // Final consistent state: full assembly and solve.
        self.vertex_update = None;
        self.system.assemble(&mut self.net, self.config.invivo, None);
        self.system
            .solve_with(&mut self.net, opts.method, opts.precision);
        update_flow_and_velocity(&mut self.net, self.config.invivo);
        update_flow_sign(&mut self.net);
        verify_mass_balance(&self.net);

        if sample_window.is_some() || opts.sample_detailed {
            self.samples.record(&self.net, self.t_sample);
        }
        self.samples.merge_averages();
        if let Some(dir) = opts.output_dir.as_deref() {
            let state = self.to_checkpoint();
            checkpoint::write(&dir.join("network_final.bin"), &state)?;
        }
        info!(t = self.t, rbcs = self.net.total_rbc_count(), "evolution finished");
        Ok(())
    }

    fn write_backup(&mut self, dir: Option<&Path>) -> Result<()> {
        self.samples.merge_averages();
        self.backup_counter += 1;
        if let Some(dir) = dir {
            let state = self.to_checkpoint();
            let path = dir.join(format!("network_backup_{}.bin", self.backup_counter));
            checkpoint::write(&path, &state)?;
            info!(backup = self.backup_counter, path = %path.display(), "checkpoint written");
        }
        Ok(())
    }

    fn to_checkpoint(&self) -> CheckpointState {
        CheckpointState {
            network: self.net.clone(),
            dt_final: self.t,
            iter_final_sample: self.t_sample,
            backup_counter: self.backup_counter,
            rbc_moved_all: self.rbc_moved_all.clone(),
            rbcs_moved_per_edge: self.rbcs_moved_per_edge.clone(),
            samples: self.samples.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vasculature::NetworkBuilder;

    fn straight_tube(htt_bc: Option<f64>) -> VascularNetwork {
        let mut b = NetworkBuilder::new();
        let v0 = b.add_vertex();
        let v1 = b.add_vertex();
        let e = b.add_edge(v0, v1, 100.0, 5.0).unwrap();
        b.set_pressure_bc(v0, 10.0).unwrap();
        b.set_pressure_bc(v1, 0.0).unwrap();
        b.set_arterial(v0).unwrap();
        b.set_venous(v1).unwrap();
        if let Some(htt) = htt_bc {
            b.set_tube_hematocrit_bc(e, htt).unwrap();
        }
        b.build().unwrap()
    }

    #[test]
    fn construction_solves_and_classifies() {
        let net = straight_tube(None);
        let sim = Simulation::new(net, SimulationConfig::default()).unwrap();
        let net = sim.net();
        assert!(net.vertices[0].pressure > net.vertices[1].pressure);
        assert_eq!(net.edges[0].sign, 1);
        assert!(net.edges[0].flow > 0.0);
        assert!(sim.turnover_time.is_finite());
    }

    #[test]
    fn empty_network_steps_are_noop() {
        let net = straight_tube(None);
        let mut sim = Simulation::new(net, SimulationConfig::default()).unwrap();
        let p_before: Vec<f64> = sim.net().vertices.iter().map(|v| v.pressure).collect();
        for _ in 0..3 {
            let report = sim.step(1e-3, 1e-12).unwrap();
            assert_eq!(report.outcome.injected, 0);
            assert_eq!(report.outcome.absorbed, 0);
        }
        for (v, &p) in sim.net().vertices.iter().zip(p_before.iter()) {
            assert!((v.pressure - p).abs() < 1e-6 * p.max(1.0));
        }
    }

    #[test]
    fn rbc_count_is_conserved_per_step() {
        let net = straight_tube(Some(0.3));
        let mut sim = Simulation::new(net, SimulationConfig::default()).unwrap();
        for _ in 0..50 {
            let before = sim.net().total_rbc_count();
            let report = sim.step(1e-3, 1e-12).unwrap();
            let after = sim.net().total_rbc_count();
            assert_eq!(
                after,
                before + report.outcome.injected - report.outcome.absorbed
            );
        }
    }

    #[test]
    fn checkpoint_continuation_resumes_time() {
        let net = straight_tube(Some(0.3));
        let mut sim = Simulation::new(net, SimulationConfig::default()).unwrap();
        sim.evolve(&EvolveOptions {
            duration: 0.01,
            dt: 1e-3,
            ..Default::default()
        })
        .unwrap();
        let state = sim.to_checkpoint();
        assert!((state.dt_final - 0.01).abs() < 1e-9);

        let mut resumed =
            Simulation::from_checkpoint(state, SimulationConfig::default()).unwrap();
        let rbcs = resumed.net().total_rbc_count();
        assert!((resumed.time() - 0.01).abs() < 1e-9);
        // Positions survived the round trip.
        assert_eq!(rbcs, sim.net().total_rbc_count());
        resumed
            .evolve(&EvolveOptions {
                duration: 0.01,
                dt: 1e-3,
                init: false,
                ..Default::default()
            })
            .unwrap();
        assert!((resumed.time() - 0.02).abs() < 1e-9);
    }
}
