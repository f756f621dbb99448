//! Delayed Sampling: like `ssi`, but a node is only hoisted ("grafted") as
//! far as the single chain of ancestors it actually needs, and a `value`
//! query walks that chain root-to-leaf ("realize") rather than
//! re-discovering the whole ancestor set on every call.

use crate::conjugate::try_conjugate;
use crate::distr::SymDistr;
use crate::error::{CoreError, CoreResult, NonConjugate};
use crate::expr::SymExpr;
use crate::identifier::{Annotation, Identifier};
use crate::sampling;
use crate::state::{RandomVar, SymState};
use crate::strategy::SymStrategy;
use crate::value::Value;

#[derive(Clone)]
pub struct DsState {
    state: SymState,
}

impl DsState {
    pub fn new() -> Self {
        DsState { state: SymState::new() }
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        DsState { state: SymState::with_seed(seed) }
    }

    fn single_parent(&self, rv: RandomVar) -> Option<RandomVar> {
        self.state.distr(rv).rvs().first().copied()
    }

    fn has_other_children(&self, par: RandomVar, except: RandomVar) -> bool {
        self.state
            .vars()
            .any(|other| other != par && other != except && self.state.rv_depends_on_transitive(other, par))
    }

    /// Walk `rv`'s single parent chain up to the first node with no parent,
    /// eliminating each link in that chain via a conjugate swap (root
    /// first). Stops and reports the first ancestor that blocks a swap.
    fn graft(&mut self, rv: RandomVar) -> Result<(), NonConjugate> {
        let mut chain = Vec::new();
        let mut cur = rv;
        while let Some(par) = self.single_parent(cur) {
            chain.push(par);
            cur = par;
        }
        for par in chain.into_iter().rev() {
            let child = self
                .state
                .vars()
                .find(|v| self.single_parent(*v) == Some(par) && *v != par)
                .unwrap_or(rv);
            if self.has_other_children(par, child) {
                return Err(NonConjugate(par));
            }
            match try_conjugate(&mut self.state, par, child) {
                Some((marginal, posterior)) => {
                    self.state
                        .set_distr(child, marginal)
                        .expect("grafted child update cannot violate an annotation");
                    self.state
                        .set_distr(par, posterior)
                        .expect("grafted parent update cannot violate an annotation");
                }
                None => return Err(NonConjugate(par)),
            }
        }
        Ok(())
    }

    fn graft_and_eval(&mut self, rv: RandomVar) -> CoreResult<()> {
        loop {
            match self.graft(rv) {
                Ok(()) => break,
                Err(NonConjugate(blocking)) => {
                    log::debug!("graft({rv}): forcing non-conjugate ancestor {blocking}");
                    self.value(blocking)?;
                }
            }
        }
        let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
        self.state.set_distr(rv, evaluated)
    }
}

impl Default for DsState {
    fn default() -> Self {
        Self::new()
    }
}

impl SymStrategy for DsState {
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
        self.graft_and_eval(rv)?;
        self.state.set_distr(rv, SymDistr::Delta(SymExpr::Const(value), false))
    }

    fn value(&mut self, rv: RandomVar) -> CoreResult<Value> {
        self.graft_and_eval(rv)?;
        match self.state.distr(rv).clone() {
            SymDistr::Delta(v, _) => Ok(v.as_const().cloned().expect("graft_and_eval left a non-constant Delta")),
            distr => {
                log::debug!("value({rv}): forcing a sample from {distr}");
                let rng = self.state.rng();
                let drawn = sampling::sample(&mut rng.borrow_mut(), &distr);
                self.state
                    .set_distr(rv, SymDistr::Delta(SymExpr::Const(drawn.clone()), true))?;
                Ok(drawn)
            }
        }
    }

    fn marginalize(&mut self, rv: RandomVar) -> CoreResult<()> {
        self.graft_and_eval(rv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    #[test]
    fn chain_of_gaussians_realizes_leaf() {
        let mut s = DsState::with_seed(Some(3));
        let x0 = s.assume(
            Some(Identifier::new("x0")),
            None,
            SymDistr::Normal(SymExpr::float(0.0), SymExpr::float(1.0)),
        );
        let x1 = s.assume(
            Some(Identifier::new("x1")),
            None,
            SymDistr::Normal(SymExpr::rv(x0), SymExpr::float(1.0)),
        );
        let v = s.value(x1).unwrap();
        assert!(matches!(v, Value::Float(_)));
    }

    #[test]
    fn observing_leaf_updates_root_in_place() {
        let mut s = DsState::with_seed(Some(5));
        let mu = s.assume(
            Some(Identifier::new("mu")),
            None,
            SymDistr::Normal(SymExpr::float(0.0), SymExpr::float(1.0)),
        );
        let obs = s.assume(Some(Identifier::new("obs")), None, SymDistr::Normal(SymExpr::rv(mu), SymExpr::float(0.5)));
        s.observe(obs, Value::Float(1.0)).unwrap();
        match s.state().distr(mu) {
            SymDistr::Normal(_, _) => {}
            other => panic!("expected mu to remain Normal-distributed, got {other}"),
        }
    }
}
