//! Belief Propagation: the cheapest strategy. A variable's direct parents
//! are each tried once against the conjugate table; a parent that doesn't
//! match is forced immediately rather than walked further up its own
//! ancestry, so no multi-hop hoist or retry loop is needed.

use crate::conjugate::try_conjugate;
use crate::distr::SymDistr;
use crate::error::CoreResult;
use crate::expr::SymExpr;
use crate::identifier::{Annotation, Identifier};
use crate::sampling;
use crate::state::{RandomVar, SymState};
use crate::strategy::SymStrategy;
use crate::value::Value;

#[derive(Clone)]
pub struct BpState {
    state: SymState,
}

impl BpState {
    pub fn new() -> Self {
        BpState { state: SymState::new() }
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        BpState { state: SymState::with_seed(seed) }
    }

    /// Resolve every direct parent of `rv`, one hop each: swap it out if a
    /// conjugate rule matches, otherwise force it to a concrete value.
    fn resolve_parents(&mut self, rv: RandomVar) -> CoreResult<()> {
        loop {
            let parents = self.state.distr(rv).rvs();
            let Some(&par) = parents.first() else {
                return Ok(());
            };
            match try_conjugate(&mut self.state, par, rv) {
                Some((marginal, posterior)) => {
                    self.state.set_distr(rv, marginal)?;
                    self.state.set_distr(par, posterior)?;
                }
                None => {
                    log::debug!("resolve_parents({rv}): forcing non-conjugate parent {par}");
                    self.value(par)?;
                    // Forcing `par` alone leaves it referenced in `rv`'s own
                    // expression; re-evaluate so the now-`Delta` parent is
                    // substituted away and the loop makes progress.
                    let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
                    self.state.set_distr(rv, evaluated)?;
                }
            }
        }
    }
}

impl Default for BpState {
    fn default() -> Self {
        Self::new()
    }
}

impl SymStrategy for BpState {
    fn state(&self) -> &SymState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SymState {
        &mut self.state
    }

    fn assume(
        &mut self,
        name: Option<Identifier>,
        annotation: Option<Annotation>,
        distribution: SymDistr,
    ) -> RandomVar {
        let rv = self.state.new_var();
        if let (Some(pv), Some(ann)) = (&name, annotation) {
            self.state.annotations.insert(pv.clone(), ann);
        }
        self.state.insert(rv, name, distribution);
        rv
    }

    fn observe(&mut self, rv: RandomVar, value: Value) -> CoreResult<()> {
        self.resolve_parents(rv)?;
        self.state.set_distr(rv, SymDistr::Delta(SymExpr::Const(value), false))
    }

    fn value(&mut self, rv: RandomVar) -> CoreResult<Value> {
        self.resolve_parents(rv)?;
        let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
        match &evaluated {
            SymDistr::Delta(v, _) => {
                let value = v.as_const().cloned().expect("resolve_parents left a non-constant Delta");
                self.state.set_distr(rv, evaluated.clone())?;
                Ok(value)
            }
            distr => {
                log::debug!("value({rv}): forcing a sample from {distr}");
                let rng = self.state.rng();
                let drawn = sampling::sample(&mut rng.borrow_mut(), distr);
                self.state
                    .set_distr(rv, SymDistr::Delta(SymExpr::Const(drawn.clone()), true))?;
                Ok(drawn)
            }
        }
    }

    fn marginalize(&mut self, rv: RandomVar) -> CoreResult<()> {
        self.resolve_parents(rv)?;
        let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
        self.state.set_distr(rv, evaluated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    #[test]
    fn independent_bernoulli_samples_a_bool() {
        let mut s = BpState::with_seed(Some(11));
        let x = s.assume(Some(Identifier::new("x")), None, SymDistr::Bernoulli(SymExpr::float(0.5)));
        let v = s.value(x).unwrap();
        assert!(matches!(v, Value::Bool(_)));
    }

    #[test]
    fn observing_a_child_updates_its_direct_parent() {
        let mut s = BpState::with_seed(Some(13));
        let p = s.assume(Some(Identifier::new("p")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
        let coin = s.assume(Some(Identifier::new("coin")), None, SymDistr::Bernoulli(SymExpr::rv(p)));
        s.observe(coin, Value::Bool(true)).unwrap();
        match s.state().distr(p) {
            SymDistr::Beta(_, _) => {}
            other => panic!("expected p to remain Beta-distributed, got {other}"),
        }
    }
}
