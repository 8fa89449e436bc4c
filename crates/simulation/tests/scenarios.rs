//! End-to-end scenarios on small networks.

use simulation::{EvolveOptions, SampleWindow, Simulation, SimulationConfig};
use vasculature::{rheology, InitialHematocrit, NetworkBuilder, VascularNetwork, VertexType};

fn straight_tube() -> VascularNetwork {
    let mut b = NetworkBuilder::new();
    let v0 = b.add_vertex();
    let v1 = b.add_vertex();
    let e = b.add_edge(v0, v1, 100.0, 5.0).unwrap();
    b.set_pressure_bc(v0, 10.0).unwrap();
    b.set_pressure_bc(v1, 0.0).unwrap();
    b.set_arterial(v0).unwrap();
    b.set_venous(v1).unwrap();
    b.set_tube_hematocrit_bc(e, 0.3).unwrap();
    b.build().unwrap()
}

/// A pressurized feed edge fills to its boundary hematocrit and stays there;
/// the time-averaged tube hematocrit over the second half of the run matches
/// the boundary value.
#[test]
fn straight_tube_reaches_boundary_hematocrit() {
    let net = straight_tube();
    let mut sim = Simulation::new(net, SimulationConfig::default()).unwrap();
    sim.evolve(&EvolveOptions {
        duration: 0.5,
        dt: 1e-3,
        sample: Some(SampleWindow {
            start: 0.25,
            stop: 0.5,
            step: 1e-3,
        }),
        ..Default::default()
    })
    .unwrap();

    let e = &sim.net().edges[0];
    assert!(e.flow > 0.0);
    let htt_avg = sim.samples().averages.htt[0];
    assert!(
        htt_avg > 0.25 && htt_avg < 0.35,
        "tube hematocrit settled at {}",
        htt_avg
    );
    // The train respects spacing and bounds.
    for w in e.rbc.windows(2) {
        assert!(w[1] - w[0] >= e.min_dist - 1e-9);
    }
    assert!(e.rbc.iter().all(|&p| (0.0..=e.length).contains(&p)));
    assert!(e.rbc.len() <= e.n_max);

    // Time-averaged fill count ≈ httBC·nMax.
    let expected = 0.3 * e.n_max as f64;
    let n_avg = sim.samples().averages.n_rbc[0];
    assert!(
        (n_avg - expected).abs() <= 1.5,
        "expected about {} cells on average, found {}",
        expected,
        n_avg
    );
}

/// Lowering the inlet pressure below the outlet inverts the edge sign and
/// relabels both boundary vertices on the next step.
#[test]
fn sign_flip_relabels_boundaries() {
    let net = straight_tube();
    let mut sim = Simulation::new(net, SimulationConfig::default()).unwrap();
    sim.step(1e-3, 1e-12).unwrap();
    assert_eq!(sim.net().edges[0].sign, 1);
    assert_eq!(sim.net().vertices[0].v_type, VertexType::Source);

    // Drop the inlet below the outlet (pressures stay nonnegative; the
    // solver takes |p|).
    sim.net_mut().vertices[0].p_bc = Some(0.0);
    sim.net_mut().vertices[1].p_bc = Some(10.0);
    sim.step(1e-3, 1e-12).unwrap();

    let net = sim.net();
    assert_eq!(net.edges[0].sign, -1);
    assert_eq!(net.vertices[0].v_type, VertexType::Sink);
    assert_eq!(net.vertices[1].v_type, VertexType::Source);
    assert!(net.vertices[0].venous);
    assert!(net.vertices[1].arterial);
    // The hematocrit BC moved with the inlet role.
    assert_eq!(net.edges[0].htt_bc, Some(0.3));
}

/// Deterministic pseudo-random 100-vertex network: a ring plus chords.
fn random_network(n: usize) -> VascularNetwork {
    let mut b = NetworkBuilder::new();
    let vs: Vec<_> = (0..n).map(|_| b.add_vertex()).collect();
    let mut state = 0x2545f4914f6cdd1du64;
    let mut next = || {
        // xorshift
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    for i in 0..n {
        let j = (i + 1) % n;
        let d = 4.0 + (next() % 800) as f64 / 100.0;
        let l = 60.0 + (next() % 8000) as f64 / 100.0;
        b.add_edge(vs[i], vs[j], l, d).unwrap();
    }
    for _ in 0..n / 2 {
        let i = (next() as usize) % n;
        let j = (next() as usize) % n;
        if i != j {
            let d = 4.0 + (next() % 800) as f64 / 100.0;
            let l = 60.0 + (next() % 8000) as f64 / 100.0;
            b.add_edge(vs[i], vs[j], l, d).unwrap();
        }
    }
    b.set_pressure_bc(vs[0], 40.0).unwrap();
    b.set_pressure_bc(vs[n / 2], 5.0).unwrap();
    b.set_arterial(vs[0]).unwrap();
    b.set_venous(vs[n / 2]).unwrap();
    b.build().unwrap()
}

/// Mass balance at every interior vertex of a 100-vertex random network.
#[test]
fn random_network_mass_balance() {
    let net = random_network(100);
    let sim = Simulation::new(net, SimulationConfig::default()).unwrap();
    let net = sim.net();

    let max_flow = net
        .edges
        .iter()
        .map(|e| e.flow)
        .fold(0.0f64, f64::max);
    assert!(max_flow > 0.0);

    for v in 0..net.vertex_count() {
        if v == 0 || v == 50 {
            continue;
        }
        let sum: f64 = net
            .adjacent(v)
            .iter()
            .map(|&(e, nb)| {
                let dp = net.vertices[v].pressure - net.vertices[nb].pressure;
                let s = if dp > 0.0 {
                    1.0
                } else if dp < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                net.edges[e].flow * s
            })
            .sum();
        assert!(
            sum.abs() <= 1e-6 * max_flow,
            "vertex {} imbalance {} vs max flow {}",
            v,
            sum,
            max_flow
        );
    }
}

/// Non-capillary bifurcations route by flow, capillary ones by velocity.
/// With flows and cross-sections arranged so the two orderings disagree,
/// a single overshooter lands on a different branch in each regime.
#[test]
fn bifurcation_preference_by_vertex_class() {
    // Branch A: more flow, lower velocity. Branch B: less flow, higher
    // velocity (smaller lumen).
    for (diam, expect_a) in [(12.0, true), (5.0, false)] {
        let mut b = NetworkBuilder::new();
        let v0 = b.add_vertex();
        let v1 = b.add_vertex();
        let v2 = b.add_vertex();
        let v3 = b.add_vertex();
        b.add_edge(v0, v1, 100.0, diam).unwrap();
        let ea = b.add_edge(v1, v2, 100.0, diam).unwrap();
        let eb = b.add_edge(v1, v3, 100.0, diam * 0.6).unwrap();
        b.set_arterial(v0).unwrap();
        b.set_venous(v2).unwrap();
        b.set_venous(v3).unwrap();
        let mut net = b.build().unwrap();
        rheology::update_min_dist_and_n_max(&mut net, None);
        vasculature::builder::assign_capillary_classes(&mut net, 10.0);

        for (v, p) in [(v0, 100.0), (v1, 60.0), (v2, 10.0), (v3, 20.0)] {
            net.vertices[v].pressure = p;
        }
        for e in 0..net.edge_count() {
            let (s, t) = (net.edges[e].source, net.edges[e].target);
            net.edges[e].sign = if net.vertices[s].pressure > net.vertices[t].pressure {
                1
            } else {
                -1
            };
            net.edges[e].v = 100.0;
        }
        net.edges[ea].flow = 2.0;
        net.edges[eb].flow = 1.5;
        // Velocity ordering flips: 1.5 / (0.6²) > 2.0 / 1².
        transport::classify_all(&mut net, 10.0);
        rheology::update_rbc_in_max(&mut net, None);
        assert_eq!(net.vertices[v1].is_cap, diam < 10.0);

        let md = net.edges[0].min_dist;
        net.edges[0].rbc = vec![100.0 - 0.25 * md];
        let mut prop = transport::Propagator::new(net.edge_count(), false);
        let mut cache = transport::InjectorCache::new();
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(1);
        prop.propagate(&mut net, &mut cache, 0.5 * md / 100.0, &mut rng)
            .unwrap();

        let (on_a, on_b) = (net.edges[ea].rbc.len(), net.edges[eb].rbc.len());
        if expect_a {
            assert_eq!((on_a, on_b), (1, 0), "non-capillary routes by flow");
        } else {
            assert_eq!((on_a, on_b), (0, 1), "capillary routes by velocity");
        }
    }
}

/// A full downstream edge admits nothing; every overshooter is repositioned
/// against the wall of its own edge with minimum spacing.
#[test]
fn traffic_jam_leaves_overshooters_in_place() {
    let mut b = NetworkBuilder::new();
    let v0 = b.add_vertex();
    let v1 = b.add_vertex();
    let v2 = b.add_vertex();
    b.add_edge(v0, v1, 100.0, 5.0).unwrap();
    b.add_edge(v1, v2, 100.0, 5.0).unwrap();
    b.set_arterial(v0).unwrap();
    b.set_venous(v2).unwrap();
    let mut net = b.build().unwrap();
    rheology::update_min_dist_and_n_max(&mut net, None);
    vasculature::builder::assign_capillary_classes(&mut net, 10.0);
    for (v, p) in [(0usize, 30.0), (1, 20.0), (2, 10.0)] {
        net.vertices[v].pressure = p;
    }
    for e in net.edges.iter_mut() {
        e.sign = 1;
        e.v = 100.0;
        e.flow = 1.0;
    }
    transport::classify_all(&mut net, 10.0);

    let md = net.edges[0].min_dist;
    net.edges[0].rbc = vec![100.0 - 1.25 * md, 100.0 - 0.25 * md];
    // Pack the downstream edge completely.
    let n_max = net.edges[1].n_max;
    net.edges[1].rbc = (0..n_max).map(|i| i as f64 * md + md / 2.0).collect();
    rheology::update_rbc_in_max(&mut net, None);
    assert_eq!(net.edges[1].rbc_in_max, 0);

    let before_downstream = net.edges[1].rbc.clone();
    let mut prop = transport::Propagator::new(net.edge_count(), false);
    let mut cache = transport::InjectorCache::new();
    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(1);
    prop.propagate(&mut net, &mut cache, 1.5 * md / 100.0, &mut rng)
        .unwrap();

    assert_eq!(net.edges[0].rbc.len(), 2);
    assert_eq!(net.edges[0].rbc[1], 100.0);
    assert!((net.edges[0].rbc[0] - (100.0 - md)).abs() < 1e-12);
    // Note the jammed edge also advects and its own overshooters pour into
    // the sink, so only the count upstream is frozen.
    assert!(net.edges[1].rbc.len() <= before_downstream.len());
}

/// Injector state is untouched by a zero-length evolution window.
#[test]
fn no_time_no_movement() {
    let net = straight_tube();
    let mut sim = Simulation::new(net, SimulationConfig::default()).unwrap();
    let positions = sim.net().edges[0].rbc.clone();
    sim.evolve(&EvolveOptions {
        duration: 0.0,
        dt: 1e-3,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(sim.net().edges[0].rbc, positions);
}

/// Seeding from a discharge hematocrit converts per edge diameter.
#[test]
fn discharge_seeding_matches_tube_conversion() {
    let mut b = NetworkBuilder::new();
    let v0 = b.add_vertex();
    let v1 = b.add_vertex();
    b.add_edge(v0, v1, 200.0, 6.0).unwrap();
    b.set_pressure_bc(v0, 10.0).unwrap();
    b.set_pressure_bc(v1, 0.0).unwrap();
    b.set_arterial(v0).unwrap();
    b.set_venous(v1).unwrap();
    let net = b.build().unwrap();

    let sim = Simulation::new(
        net,
        SimulationConfig {
            initial_hematocrit: InitialHematocrit::Discharge(0.45),
            ..Default::default()
        },
    )
    .unwrap();
    let e = &sim.net().edges[0];
    let htt = physiology::discharge_to_tube_hematocrit(0.45, 6.0, true);
    let expected = (htt * e.n_max as f64).round() as usize;
    assert_eq!(e.rbc.len(), expected);
}
