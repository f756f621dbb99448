//! Semi-Symbolic Inference: on every `observe`/`value`, hoist the target
//! variable past all of its parents via conjugate swaps before touching it,
//! falling back to forcing a parent only when no swap applies.

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
pub struct SsiState {
    state: SymState,
}

impl SsiState {
    pub fn new() -> Self {
        SsiState { state: SymState::new() }
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        SsiState { state: SymState::with_seed(seed) }
    }

    /// Is there any live variable, other than `child`, whose distribution
    /// depends on `par`? Swapping `par` past `child` would silently sever
    /// that other dependent, so the swap is refused.
    fn has_other_deps_on(&self, par: RandomVar, child: RandomVar) -> bool {
        self.state
            .vars()
            .any(|other| other != par && other != child && self.state.rv_depends_on_transitive(other, par))
            || self
                .state
                .ctx
                .bindings
                .values()
                .any(|e| !matches!(e, SymExpr::RandomVar(rv) if *rv == child) && self.state.depends_on(e, par, true))
    }

    fn can_swap(&mut self, par: RandomVar, child: RandomVar) -> bool {
        if self.has_other_deps_on(par, child) {
            return false;
        }
        try_conjugate(&mut self.state, par, child).is_some()
    }

    /// Reverse the `par -> child` edge: `child` becomes independent of `par`
    /// (its distribution becomes the marginal), and `par`'s distribution is
    /// replaced by its posterior, which now depends on `child` instead.
    fn swap(&mut self, par: RandomVar, child: RandomVar) -> CoreResult<()> {
        let (marginal, posterior) = try_conjugate(&mut self.state, par, child).ok_or_else(|| {
            CoreError::Invariant(format!("swap({par}, {child}) called without a matching conjugate rule"))
        })?;
        self.state.set_distr(child, marginal)?;
        self.state.set_distr(par, posterior)?;
        Ok(())
    }

    /// Eliminate every parent of `rv` one swap at a time. Picks the most
    /// recently introduced parent first (highest id), since that is the
    /// ancestor least likely to have dependents other than `rv` itself.
    /// Returns the parent that needs forcing when no rule applies.
    fn hoist(&mut self, rv: RandomVar) -> Result<(), NonConjugate> {
        loop {
            let mut parents = self.state.distr(rv).rvs();
            if parents.is_empty() {
                return Ok(());
            }
            parents.sort_by_key(|p| p.raw());
            let par = *parents.last().expect("non-empty parents");
            if !self.can_swap(par, rv) {
                return Err(NonConjugate(par));
            }
            self.swap(par, rv)
                .expect("can_swap confirmed a conjugate rule applies; swap cannot fail");
        }
    }

    /// Retry `hoist` until `rv` has no parents left, forcing whichever
    /// parent blocks a swap and trying again.
    fn hoist_and_eval(&mut self, rv: RandomVar) -> CoreResult<()> {
        loop {
            match self.hoist(rv) {
                Ok(()) => break,
                Err(NonConjugate(blocking_par)) => {
                    log::debug!("hoist({rv}): forcing non-conjugate parent {blocking_par}");
                    self.value(blocking_par)?;
                }
            }
        }
        let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
        self.state.set_distr(rv, evaluated)
    }
}

impl Default for SsiState {
    fn default() -> Self {
        Self::new()
    }
}

impl SymStrategy for SsiState {
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
        self.hoist_and_eval(rv)?;
        self.state.set_distr(rv, SymDistr::Delta(SymExpr::Const(value), false))
    }

    fn value(&mut self, rv: RandomVar) -> CoreResult<Value> {
        self.hoist_and_eval(rv)?;
        match self.state.distr(rv).clone() {
            SymDistr::Delta(v, _) => Ok(v
                .as_const()
                .cloned()
                .expect("hoist_and_eval left a non-constant Delta value")),
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
        self.hoist_and_eval(rv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    fn state() -> SsiState {
        SsiState::with_seed(Some(7))
    }

    #[test]
    fn observe_on_a_leaf_sets_a_delta() {
        let mut s = state();
        let p = s.assume(Some(Identifier::new("p")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
        let coin = s.assume(
            Some(Identifier::new("coin")),
            None,
            SymDistr::Bernoulli(SymExpr::rv(p)),
        );
        s.observe(coin, Value::Bool(true)).unwrap();
        assert!(s.state().is_sampled(coin) || matches!(s.state().distr(coin), SymDistr::Delta(_, false)));
    }

    #[test]
    fn beta_bernoulli_hoist_keeps_p_symbolic() {
        let mut s = state();
        let p = s.assume(Some(Identifier::new("p")), None, SymDistr::Beta(SymExpr::float(1.0), SymExpr::float(1.0)));
        let coin = s.assume(Some(Identifier::new("coin")), None, SymDistr::Bernoulli(SymExpr::rv(p)));
        s.observe(coin, Value::Bool(true)).unwrap();
        // p is updated in place to Beta(2,1); still symbolic, never forced.
        match s.state().distr(p) {
            SymDistr::Beta(_, _) => {}
            other => panic!("expected p to remain Beta-distributed, got {other}"),
        }
    }

    #[test]
    fn value_on_independent_gaussian_samples_a_float() {
        let mut s = state();
        let x = s.assume(
            Some(Identifier::new("x")),
            None,
            SymDistr::Normal(SymExpr::float(0.0), SymExpr::float(1.0)),
        );
        let v = s.value(x).unwrap();
        assert!(matches!(v, Value::Float(_)));
        assert!(s.state().is_sampled(x));
    }

    #[test]
    fn symbolic_annotation_violation_surfaces_as_core_error() {
        let mut s = state();
        let x = s.assume(
            Some(Identifier::new("x")),
            Some(Annotation::Symbolic),
            SymDistr::Normal(SymExpr::float(0.0), SymExpr::float(1.0)),
        );
        // x has no parent to hoist and no conjugate partner, so value() must
        // force it directly, violating the symbolic annotation.
        let err = s.value(x).unwrap_err();
        assert!(matches!(err, CoreError::RuntimeViolatedAnnotation { .. }));
    }
}
