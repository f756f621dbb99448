//! End-to-end scenarios exercising more than one module at a time: a
//! program's `assume`/`observe`/`value` trace run through a whole strategy,
//! the abstract analyser's predicted plan checked against what the runtime
//! actually did, and the particle-filter driver layered on top of both.

use siren_symbolic_core::abs_distr::AbsSymDistr;
use siren_symbolic_core::abs_expr::AbsSymExpr;
use siren_symbolic_core::abs_strategy::ssi::AbsSsiState;
use siren_symbolic_core::abs_strategy::AbsSymStrategy;
use siren_symbolic_core::distr::SymDistr;
use siren_symbolic_core::error::CoreError;
use siren_symbolic_core::expr::SymExpr;
use siren_symbolic_core::identifier::{Annotation, Identifier};
use siren_symbolic_core::particle::{Particle, ProbState};
use siren_symbolic_core::plan::DistrEnc;
use siren_symbolic_core::strategy::bp::BpState;
use siren_symbolic_core::strategy::ds::DsState;
use siren_symbolic_core::strategy::ssi::SsiState;
use siren_symbolic_core::strategy::SymStrategy;
use siren_symbolic_core::value::Value;

/// Assume a fresh `p` and eight sequential coin flips observed `true`, one
/// flip fully resolved (assumed, then observed) before the next is even
/// assumed. Every strategy sees the same conjugate pattern at each step, so
/// all three keep `p` symbolic and land on the same exact posterior.
fn eight_heads<S: SymStrategy>(strategy: &mut S) -> siren_symbolic_core::state::RandomVar {
    let p = strategy.assume(Some(Identifier::new("p")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
    for i in 0..8 {
        let coin = strategy.assume(Some(Identifier::new(format!("coin{i}"))), None, SymDistr::Bernoulli(SymExpr::rv(p)));
        strategy.observe(coin, Value::Bool(true)).unwrap();
    }
    p
}

#[test]
fn sequential_beta_bernoulli_posterior_stays_symbolic_under_ssi_and_ds() {
    let mut ssi = SsiState::with_seed(Some(1));
    let p_ssi = eight_heads(&mut ssi);
    ssi.marginalize(p_ssi).unwrap();
    match ssi.state().distr(p_ssi) {
        SymDistr::Beta(_, _) => {}
        other => panic!("expected p to remain Beta-distributed under ssi, got {other}"),
    }
    assert!((ssi.state().distr(p_ssi).mean() - 0.9).abs() < 1e-9);

    let mut ds = DsState::with_seed(Some(1));
    let p_ds = eight_heads(&mut ds);
    ds.marginalize(p_ds).unwrap();
    match ds.state().distr(p_ds) {
        SymDistr::Beta(_, _) => {}
        other => panic!("expected p to remain Beta-distributed under ds, got {other}"),
    }
    assert!((ds.state().distr(p_ds).mean() - 0.9).abs() < 1e-9);
}

/// Belief propagation's conjugate table is the same six rules, tried without
/// retry; when a program never actually needs the "other dependents" check
/// ssi/ds apply (because each coin is resolved before the next is even
/// assumed), it reaches the identical symbolic posterior.
#[test]
fn sequential_beta_bernoulli_posterior_also_stays_symbolic_under_bp() {
    let mut bp = BpState::with_seed(Some(1));
    let p = eight_heads(&mut bp);
    bp.marginalize(p).unwrap();
    match bp.state().distr(p) {
        SymDistr::Beta(_, _) => {}
        other => panic!("expected p to remain Beta-distributed under bp, got {other}"),
    }
    assert!((bp.state().distr(p).mean() - 0.9).abs() < 1e-9);
}

/// Two live children of the same parent, both assumed before either is
/// observed, is exactly the shape ssi's "other dependents" check exists to
/// catch: hoisting the parent past one child would silently invalidate the
/// other's model of it. ssi backs off and forces the parent to a concrete
/// sample instead. Belief propagation runs no such check and swaps ahead
/// regardless, so for this particular shape it is the one left symbolic —
/// the inverse of the usual "bp forces more" intuition, and a direct
/// consequence of which safety check each strategy does or doesn't run.
#[test]
fn two_children_of_one_parent_forces_ssi_but_not_bp() {
    let mut ssi = SsiState::with_seed(Some(7));
    let x0 = ssi.assume(Some(Identifier::new("x0")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
    let c1 = ssi.assume(Some(Identifier::new("c1")), None, SymDistr::Bernoulli(SymExpr::rv(x0)));
    let _c2 = ssi.assume(Some(Identifier::new("c2")), None, SymDistr::Bernoulli(SymExpr::rv(x0)));
    ssi.observe(c1, Value::Bool(true)).unwrap();
    match ssi.state().distr(x0) {
        SymDistr::Delta(_, true) => {}
        other => panic!("expected ssi to force x0 to a sampled delta, got {other}"),
    }

    let mut bp = BpState::with_seed(Some(7));
    let x0 = bp.assume(Some(Identifier::new("x0")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
    let c1 = bp.assume(Some(Identifier::new("c1")), None, SymDistr::Bernoulli(SymExpr::rv(x0)));
    let _c2 = bp.assume(Some(Identifier::new("c2")), None, SymDistr::Bernoulli(SymExpr::rv(x0)));
    bp.observe(c1, Value::Bool(true)).unwrap();
    match bp.state().distr(x0) {
        SymDistr::Beta(_, _) => {}
        other => panic!("expected bp to leave x0 symbolic, got {other}"),
    }
}

/// Delayed sampling's `has_other_children` is the same safety check as
/// ssi's `has_other_deps_on`, applied to its single-parent chain instead of
/// a general DAG: a parent with two live children can't be grafted past
/// either one without invalidating the other, so `graft` forces it.
#[test]
fn two_children_of_one_parent_forces_ds_too() {
    let mut ds = DsState::with_seed(Some(7));
    let x0 = ds.assume(Some(Identifier::new("x0")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
    let c1 = ds.assume(Some(Identifier::new("c1")), None, SymDistr::Bernoulli(SymExpr::rv(x0)));
    let _c2 = ds.assume(Some(Identifier::new("c2")), None, SymDistr::Bernoulli(SymExpr::rv(x0)));
    ds.observe(c1, Value::Bool(true)).unwrap();
    match ds.state().distr(x0) {
        SymDistr::Delta(_, true) => {}
        other => panic!("expected ds to force x0 to a sampled delta, got {other}"),
    }
}

/// A single linear-Gaussian update, the core step of a Kalman filter: an
/// observation folds into the prior via the closed-form formula rather than
/// a sample, so the posterior mean is exact and requires no RNG draw at all.
#[test]
fn gaussian_observation_updates_prior_mean_exactly() {
    let mut ssi = SsiState::with_seed(Some(3));
    let x0 = ssi.assume(Some(Identifier::new("x0")), None, SymDistr::Normal(SymExpr::float(0.0), SymExpr::float(1.0)));
    let obs = ssi.assume(Some(Identifier::new("obs")), None, SymDistr::Normal(SymExpr::rv(x0), SymExpr::float(1.0)));
    ssi.observe(obs, Value::Float(2.0)).unwrap();
    ssi.marginalize(x0).unwrap();
    match ssi.state().distr(x0) {
        SymDistr::Normal(_, _) => {}
        other => panic!("expected x0 to remain Normal-distributed, got {other}"),
    }
    assert!((ssi.state().distr(x0).mean() - 1.0).abs() < 1e-9);
}

/// A variable annotated `symbolic` must never be forced to a sampled value:
/// querying it directly when no conjugate rule applies surfaces the
/// annotation violation instead of silently sampling anyway.
#[test]
fn forcing_an_annotated_symbolic_variable_is_rejected() {
    let mut ds = DsState::with_seed(Some(4));
    let x = ds.assume(Some(Identifier::new("x")), Some(Annotation::Symbolic), SymDistr::Bernoulli(SymExpr::float(0.3)));
    let err = ds.value(x).unwrap_err();
    assert_eq!(err, CoreError::RuntimeViolatedAnnotation { name: Identifier::new("x") });
}

/// A particle population whose final expressions are both observed
/// `Beta(1,1)` coins conditioned on opposite outcomes resamples into a
/// population of the same size, every survivor's weight reset to zero.
#[test]
fn particle_population_resamples_and_resets_weights() {
    fn coin_particle(seed: u64, observed: bool) -> Particle<SsiState, ()> {
        let mut s = SsiState::with_seed(Some(seed));
        let p = s.assume(Some(Identifier::new("p")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
        let coin = s.assume(Some(Identifier::new("coin")), None, SymDistr::Bernoulli(SymExpr::rv(p)));
        s.observe(coin, Value::Bool(observed)).unwrap();
        let mut particle = Particle::new((), s);
        particle.finish(SymExpr::rv(p));
        particle
    }

    let particles = vec![coin_particle(21, true), coin_particle(22, false), coin_particle(23, true)];
    let mut prob_state: ProbState<SsiState, ()> = ProbState::new(particles, Some(99));
    for (i, particle) in prob_state.particles_mut().iter_mut().enumerate() {
        particle.add_log_weight(i as f64 - 1.0);
    }
    prob_state.resample().unwrap();
    assert_eq!(prob_state.len(), 3);
    assert!(prob_state.particles().iter().all(|p| p.log_weight() == 0.0));
}

/// A particle population where every particle underflowed to zero weight
/// degenerates to a uniform resampling distribution rather than panicking
/// or dividing by zero.
#[test]
fn resampling_degenerate_weights_falls_back_to_uniform() {
    fn trivial_particle(seed: u64) -> Particle<SsiState, ()> {
        let mut s = SsiState::with_seed(Some(seed));
        let x = s.assume(Some(Identifier::new("x")), None, SymDistr::Bernoulli(SymExpr::float(0.5)));
        let mut particle = Particle::new((), s);
        particle.finish(SymExpr::rv(x));
        particle
    }

    let particles = vec![trivial_particle(1), trivial_particle(2), trivial_particle(3), trivial_particle(4)];
    let mut prob_state: ProbState<SsiState, ()> = ProbState::new(particles, Some(5));
    for particle in prob_state.particles_mut() {
        particle.update_weight(f64::NEG_INFINITY);
    }
    let probabilities = prob_state.normalized_probabilities();
    assert_eq!(probabilities, vec![0.25, 0.25, 0.25, 0.25]);
    prob_state.resample().unwrap();
    assert_eq!(prob_state.len(), 4);
}

/// The abstract analyser's predicted plan for the sequential coin program,
/// plus one independent variable queried directly (and so necessarily
/// forced), never under-commits relative to what a concrete particle
/// actually ended up doing: every name the runtime plan names, the abstract
/// plan names at least as conservatively. `p` itself stays at the implicit
/// `symbolic` default on both sides (absent from both maps); `independent`
/// is the only name either plan actually records.
#[test]
fn abstract_plan_soundly_over_approximates_the_runtime_plan() {
    let mut abs = AbsSsiState::new();
    let abs_p = abs.assume(Some(Identifier::new("p")), None, AbsSymDistr::Beta(AbsSymExpr::float(1.0), AbsSymExpr::float(1.0)));
    for i in 0..8 {
        let coin = abs.assume(Some(Identifier::new(format!("coin{i}"))), None, AbsSymDistr::Bernoulli(AbsSymExpr::rv(abs_p)));
        abs.observe(coin, siren_symbolic_core::value::AbsValue::Known(Value::Bool(true))).unwrap();
    }
    let independent = abs.assume(Some(Identifier::new("independent")), None, AbsSymDistr::Bernoulli(AbsSymExpr::float(0.5)));
    abs.value(independent).unwrap();
    let predicted = abs.state().plan.clone();
    assert_eq!(predicted.get(&Identifier::new("p")), None);
    assert_eq!(predicted.get(&Identifier::new("independent")), Some(DistrEnc::Sample));

    let mut ssi = SsiState::with_seed(Some(1));
    let p = eight_heads(&mut ssi);
    let independent = ssi.assume(Some(Identifier::new("independent")), None, SymDistr::Bernoulli(SymExpr::float(0.5)));
    ssi.value(independent).unwrap();
    let mut particle = Particle::new((), ssi);
    particle.finish(SymExpr::rv(p));
    let runtime = particle.plan();
    assert_eq!(runtime.get(&Identifier::new("independent")), Some(DistrEnc::Sample));
    assert_eq!(runtime.get(&Identifier::new("p")), None);

    assert!(predicted.soundly_over_approximates(&runtime));
}

/// `two_children_of_one_parent_forces_ssi_but_not_bp` showed concretely that
/// ssi forces `x0` to a sample in this shape; the abstract analyser predicts
/// exactly that outcome ahead of time, marking `x0` `sample` without ever
/// running the program.
#[test]
fn abstract_analyser_predicts_the_forced_sample_ahead_of_time() {
    let mut abs = AbsSsiState::new();
    let x0 = abs.assume(Some(Identifier::new("x0")), None, AbsSymDistr::Beta(AbsSymExpr::float(1.0), AbsSymExpr::float(1.0)));
    let c1 = abs.assume(Some(Identifier::new("c1")), None, AbsSymDistr::Bernoulli(AbsSymExpr::rv(x0)));
    let _c2 = abs.assume(Some(Identifier::new("c2")), None, AbsSymDistr::Bernoulli(AbsSymExpr::rv(x0)));
    abs.observe(c1, siren_symbolic_core::value::AbsValue::Known(Value::Bool(true))).unwrap();
    assert_eq!(abs.state().plan.get(&Identifier::new("x0")), Some(DistrEnc::Sample));
}
