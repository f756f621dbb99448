//! Particle filter infrastructure: weighted particles, the mixtures their
//! final expressions collapse into, and the driver-facing `ProbState` that
//! runs a population of them side by side.
//!
//! Grounded on `siren/inference/interface.py`'s `Particle`, `Mixture`, and
//! `ProbState` classes, and the free `mean` function they share. A particle
//! pairs an opaque, driver-owned continuation with a strategy-backed state
//! and a log-scale importance weight; resampling draws a fresh population
//! from the current weights and zeroes them out.

use crate::error::{CoreError, CoreResult};
use crate::expr::SymExpr;
use crate::plan::{DistrEnc, InferencePlan};
use crate::strategy::SymStrategy;
use crate::value::Value;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::rc::Rc;

/// Mirrors the dual nature of the Python `Particle.cont` field: an opaque
/// driver-owned handle while the particle is still running, or a ground
/// `SymExpr` once it has finished.
#[derive(Clone)]
pub enum Continuation<C> {
    Suspended(C),
    Done(SymExpr),
}

/// One trajectory through the program being interpreted: its own state, a
/// log-scale weight, and whether it has run to completion.
#[derive(Clone)]
pub struct Particle<S, C> {
    cont: Continuation<C>,
    state: S,
    log_weight: f64,
    finished: bool,
}

impl<S: SymStrategy + Clone, C: Clone> Particle<S, C> {
    pub fn new(cont: C, state: S) -> Self {
        Particle { cont: Continuation::Suspended(cont), state, log_weight: 0.0, finished: false }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn log_weight(&self) -> f64 {
        self.log_weight
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn final_expr(&self) -> &SymExpr {
        match &self.cont {
            Continuation::Done(e) => e,
            Continuation::Suspended(_) => panic!("final_expr: particle has not finished"),
        }
    }

    pub fn update_cont(&mut self, cont: C) {
        self.cont = Continuation::Suspended(cont);
    }

    pub fn update_weight(&mut self, log_weight: f64) {
        self.log_weight = log_weight;
    }

    pub fn add_log_weight(&mut self, delta: f64) {
        self.log_weight += delta;
    }

    pub fn finish(&mut self, expr: SymExpr) {
        self.cont = Continuation::Done(expr);
        self.finished = true;
    }

    /// Re-evaluate every live variable's distribution in place, the way a
    /// driver calls between steps to keep the state from accumulating
    /// unevaluated expression trees across particles.
    pub fn simplify(&mut self) -> CoreResult<()> {
        let vars: Vec<_> = self.state.state().vars().collect();
        for rv in vars {
            let evaluated = self.state.state_mut().eval_distr(&self.state.state().distr(rv).clone());
            self.state.state_mut().set_distr(rv, evaluated)?;
        }
        Ok(())
    }

    /// This particle's own prediction of how each program-visible variable
    /// ended up encoded. Mirrors the abstract analyser's convention: a name
    /// absent from the map stayed at the lattice bottom, `symbolic`; only a
    /// variable actually forced to a sampled `Delta` gets an explicit
    /// `sample` entry. Joining these across every particle in a `ProbState`
    /// gives the runtime counterpart to the abstract analyser's predicted
    /// `InferencePlan`.
    pub fn plan(&self) -> InferencePlan {
        let mut plan = InferencePlan::new();
        for rv in self.state.state().vars() {
            if self.state.state().is_sampled(rv) {
                if let Some(pv) = self.state.state().pv(rv) {
                    plan.mark(pv.clone(), DistrEnc::Sample);
                }
            }
        }
        plan
    }
}

/// Free-standing mean computation mirroring the Python `mean` function:
/// recurses through arithmetic and `ite` structure, marginalizing any
/// `RandomVar` leaf it reaches through the strategy in use.
pub fn mean<S: SymStrategy>(expr: &SymExpr, strategy: &mut S) -> CoreResult<f64> {
    let expr = strategy.state_mut().eval(expr);
    match &expr {
        SymExpr::Const(v) => Ok(v.as_f64().expect("mean: constant is not numeric")),
        SymExpr::RandomVar(rv) => {
            strategy.marginalize(*rv)?;
            Ok(strategy.state().distr(*rv).mean())
        }
        SymExpr::Add(a, b) => Ok(mean(a, strategy)? + mean(b, strategy)?),
        SymExpr::Mul(a, b) => Ok(mean(a, strategy)? * mean(b, strategy)?),
        SymExpr::Div(a, b) => Ok(mean(a, strategy)? / mean(b, strategy)?),
        SymExpr::Ite(c, t, f) => {
            if mean(c, strategy)? != 0.0 {
                mean(t, strategy)
            } else {
                mean(f, strategy)
            }
        }
        other => panic!("mean: {other} is not a numeric expression"),
    }
}

/// A collapsed distribution over final expressions: each paired with the
/// state needed to interpret it and the probability mass it carries.
pub struct Mixture<S> {
    entries: Vec<(SymExpr, S, f64)>,
}

impl<S: SymStrategy + Clone> Mixture<S> {
    pub fn new(entries: Vec<(SymExpr, S, f64)>) -> Self {
        assert!(!entries.is_empty(), "Mixture::new: empty distribution");
        Mixture { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: `new` rejects an empty entry list.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SymExpr, S, f64)> {
        self.entries.iter()
    }

    pub fn is_pair_mixture(&self) -> bool {
        self.entries.iter().all(|(e, _, _)| matches!(e, SymExpr::Pair(_, _)))
    }

    pub fn get_pair_mixture(&self) -> (Mixture<S>, Mixture<S>) {
        let mut fst = Vec::with_capacity(self.entries.len());
        let mut snd = Vec::with_capacity(self.entries.len());
        for (e, state, w) in &self.entries {
            match e {
                SymExpr::Pair(a, b) => {
                    fst.push((a.as_ref().clone(), state.clone(), *w));
                    snd.push((b.as_ref().clone(), state.clone(), *w));
                }
                other => panic!("get_pair_mixture: {other} is not a pair"),
            }
        }
        (Mixture::new(fst), Mixture::new(snd))
    }

    pub fn is_lst_mixture(&self) -> bool {
        self.entries.iter().all(|(e, _, _)| matches!(e, SymExpr::Lst(_)))
    }

    /// One `Mixture` per list position, padded by omission rather than with
    /// a zero entry: a particle whose list is shorter than the longest
    /// simply contributes no entry at that position.
    pub fn get_lst_mixture(&self) -> Vec<Mixture<S>> {
        let lists: Vec<(&[SymExpr], &S, f64)> = self
            .entries
            .iter()
            .map(|(e, state, w)| match e {
                SymExpr::Lst(es) => (es.as_slice(), state, *w),
                other => panic!("get_lst_mixture: {other} is not a list"),
            })
            .collect();
        let max_len = lists.iter().map(|(es, _, _)| es.len()).max().unwrap_or(0);
        (0..max_len)
            .map(|i| {
                let column: Vec<_> = lists
                    .iter()
                    .filter_map(|(es, state, w)| es.get(i).map(|e| (e.clone(), (*state).clone(), *w)))
                    .collect();
                Mixture::new(column)
            })
            .collect()
    }

    pub fn mean(&mut self) -> f64 {
        if self.entries.len() == 1 {
            let (e, state, _) = &mut self.entries[0];
            return mean(e, state).expect("mixture entry cannot fail to marginalize");
        }
        self.entries
            .iter_mut()
            .map(|(e, state, w)| *w * mean(e, state).expect("mixture entry cannot fail to marginalize"))
            .sum()
    }
}

fn get_mean<S: SymStrategy + Clone>(mut mixture: Mixture<S>) -> Value {
    if mixture.is_pair_mixture() {
        let (fst, snd) = mixture.get_pair_mixture();
        return Value::Pair(Box::new(get_mean(fst)), Box::new(get_mean(snd)));
    }
    if mixture.is_lst_mixture() {
        let lst = mixture.get_lst_mixture();
        return Value::List(lst.into_iter().map(get_mean).collect());
    }
    Value::Float(mixture.mean())
}

/// A population of particles run side by side and periodically resampled
/// according to their importance weights.
pub struct ProbState<S, C> {
    rng: Rc<RefCell<StdRng>>,
    particles: Vec<Particle<S, C>>,
}

impl<S: SymStrategy + Clone, C: Clone> ProbState<S, C> {
    pub fn new(particles: Vec<Particle<S, C>>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        ProbState { rng: Rc::new(RefCell::new(rng)), particles }
    }

    pub fn particles(&self) -> &[Particle<S, C>] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle<S, C>] {
        &mut self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn simplify(&mut self) -> CoreResult<()> {
        for p in &mut self.particles {
            p.simplify()?;
        }
        Ok(())
    }

    pub fn finished(&self) -> bool {
        self.particles.iter().all(|p| p.finished())
    }

    /// Normalise log-weights onto a probability simplex. Degenerates to a
    /// uniform distribution, with a warning, if every particle's weight
    /// underflowed to `-inf`.
    pub fn normalized_probabilities(&self) -> Vec<f64> {
        let mut scores: Vec<f64> = self.particles.iter().map(|p| p.log_weight()).collect();
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if max == f64::NEG_INFINITY {
            log::warn!("all particles have 0 weight");
            scores = vec![0.0; scores.len()];
        }
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let sum: f64 = exp.iter().sum();
        exp.iter().map(|e| e / sum).collect()
    }

    /// Collapse final expressions into a deduplicated weighted mixture,
    /// keyed by each expression's printed form under its own particle's
    /// state: two syntactically different expressions that happen to
    /// evaluate to the same value are kept as distinct entries, same as the
    /// Python original.
    pub fn mixture(&mut self) -> Mixture<S> {
        let probabilities = self.normalized_probabilities();
        let mut by_key: Vec<(String, SymExpr, S, f64)> = Vec::new();
        for (p, prob) in self.particles.iter_mut().zip(probabilities) {
            let final_expr = p.final_expr().clone();
            let evaluated = p.state_mut().state_mut().eval(&final_expr);
            let key = p.state_mut().state_mut().str_expr(&evaluated);
            match by_key.iter_mut().find(|(k, ..)| *k == key) {
                Some((_, _, _, w)) => *w += prob,
                None => by_key.push((key, evaluated, p.state().clone(), prob)),
            }
        }
        Mixture::new(by_key.into_iter().map(|(_, e, s, w)| (e, s, w)).collect())
    }

    pub fn result(&mut self) -> Value {
        get_mean(self.mixture())
    }

    /// Resample with replacement according to each particle's normalised
    /// weight, then reset every survivor's weight to zero.
    ///
    /// Cloning a particle's state shares the same `Rc<RefCell<StdRng>>` as
    /// the original (see [`crate::state::SymState`]), so unlike the Python
    /// original there is no need to special-case the first draw of an index
    /// to avoid copying: cloning every draw is equally cheap and behaves
    /// identically.
    pub fn resample(&mut self) -> CoreResult<()> {
        let probabilities = self.normalized_probabilities();
        let dist = WeightedIndex::new(&probabilities)
            .map_err(|e| CoreError::Invariant(format!("resample: {e}")))?;
        let idxs: Vec<usize> = {
            let mut rng = self.rng.borrow_mut();
            (0..self.particles.len()).map(|_| dist.sample(&mut *rng)).collect()
        };
        let mut new_particles: Vec<Particle<S, C>> =
            idxs.iter().map(|&i| self.particles[i].clone()).collect();
        for p in &mut new_particles {
            p.update_weight(0.0);
        }
        self.particles = new_particles;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distr::SymDistr;
    use crate::identifier::Identifier;
    use crate::strategy::ssi::SsiState;
    use crate::value::Value;

    fn coin_particle(seed: u64, observed: bool) -> Particle<SsiState, ()> {
        let mut s = SsiState::with_seed(Some(seed));
        let p = s.assume(Some(Identifier::new("p")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
        let coin = s.assume(Some(Identifier::new("coin")), None, SymDistr::Bernoulli(SymExpr::rv(p)));
        s.observe(coin, Value::Bool(observed)).unwrap();
        let mut particle = Particle::new((), s);
        particle.finish(SymExpr::rv(p));
        particle
    }

    #[test]
    fn normalized_probabilities_degenerates_to_uniform_on_all_negative_infinity() {
        let particles = vec![coin_particle(1, true), coin_particle(2, true)];
        let mut prob_state: ProbState<SsiState, ()> = ProbState::new(particles, Some(9));
        for p in prob_state.particles_mut() {
            p.update_weight(f64::NEG_INFINITY);
        }
        let probs = prob_state.normalized_probabilities();
        assert_eq!(probs, vec![0.5, 0.5]);
    }

    #[test]
    fn mixture_deduplicates_identical_final_keys() {
        let particles = vec![coin_particle(10, true), coin_particle(11, true)];
        let mut prob_state: ProbState<SsiState, ()> = ProbState::new(particles, Some(4));
        let mixture = prob_state.mixture();
        assert_eq!(mixture.len(), 1);
    }

    #[test]
    fn resample_resets_every_weight_to_zero() {
        let particles = vec![coin_particle(20, true), coin_particle(21, false)];
        let mut prob_state: ProbState<SsiState, ()> = ProbState::new(particles, Some(6));
        for (i, p) in prob_state.particles_mut().iter_mut().enumerate() {
            p.update_weight(i as f64);
        }
        prob_state.resample().unwrap();
        assert!(prob_state.particles().iter().all(|p| p.log_weight() == 0.0));
        assert_eq!(prob_state.len(), 2);
    }

    #[test]
    fn particle_plan_marks_sampled_variable_as_sample() {
        let mut s = SsiState::with_seed(Some(2));
        let x = s.assume(Some(Identifier::new("x")), None, SymDistr::Normal(SymExpr::float(0.0), SymExpr::float(1.0)));
        s.value(x).unwrap();
        let mut particle = Particle::new((), s);
        particle.finish(SymExpr::rv(x));
        let plan = particle.plan();
        assert_eq!(plan.get(&Identifier::new("x")), Some(DistrEnc::Sample));
    }
}
