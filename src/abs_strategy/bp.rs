//! Abstract twin of [`crate::strategy::bp`]: resolve each direct parent once
//! against the conjugate table, forcing it immediately on a mismatch rather
//! than walking further up its ancestry. No multi-hop hoist means no
//! `UnkD`-as-blocked-subgraph special case either — a mismatched parent,
//! `UnkD` or otherwise, is simply forced and its own plan entry marked
//! `sample`, never `dynamic`. This is why belief propagation's predicted plan
//! tends to mark more variables `sample` than `ssi`/`ds` would for the same
//! program: it never gets the chance to recognise a shared unknown ancestor
//! and escalate it to `dynamic`.

use crate::abs_distr::AbsSymDistr;
use crate::abs_expr::AbsSymExpr;
use crate::abs_state::{AbsRandomVar, AbsSymState};
use crate::abs_strategy::AbsSymStrategy;
use crate::error::CoreResult;
use crate::identifier::{Annotation, Identifier};
use crate::plan::DistrEnc;
use crate::value::AbsValue;
use std::collections::HashSet;

pub struct AbsBpState {
    state: AbsSymState,
}

impl AbsBpState {
    pub fn new() -> Self {
        AbsBpState { state: AbsSymState::new() }
    }

    fn resolve_parents(&mut self, rv: AbsRandomVar) -> CoreResult<()> {
        loop {
            let parents = self.state.distr(rv).rvs();
            let Some(&par) = parents.first() else {
                return Ok(());
            };
            match crate::abs_conjugate::try_conjugate(&mut self.state, par, rv) {
                Some((marginal, posterior)) => {
                    self.state.set_distr(rv, marginal)?;
                    self.state.set_distr(par, posterior)?;
                }
                None => {
                    log::debug!("resolve_parents({rv}): forcing non-conjugate parent {par}");
                    self.value(par)?;
                    // Forcing `par` alone doesn't remove it from `rv`'s own
                    // expression tree; re-evaluate so the now-`Delta` parent
                    // is substituted away and the loop can terminate.
                    let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
                    self.state.set_distr(rv, evaluated)?;
                }
            }
        }
    }
}

impl Default for AbsBpState {
    fn default() -> Self {
        Self::new()
    }
}

impl AbsSymStrategy for AbsBpState {
    fn state(&self) -> &AbsSymState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AbsSymState {
        &mut self.state
    }

    fn assume(
        &mut self,
        name: Option<Identifier>,
        annotation: Option<Annotation>,
        distribution: AbsSymDistr,
    ) -> AbsRandomVar {
        let rv = self.state.new_var();
        if let (Some(pv), Some(ann)) = (&name, annotation) {
            self.state.annotations.insert(pv.clone(), ann);
        }
        let pv: HashSet<Identifier> = name.into_iter().collect();
        self.state.insert(rv, pv, distribution);
        rv
    }

    fn observe(&mut self, rv: AbsRandomVar, value: AbsValue) -> CoreResult<()> {
        self.resolve_parents(rv)?;
        self.state.set_distr(rv, AbsSymDistr::Delta(AbsSymExpr::Const(value), false))
    }

    fn value(&mut self, rv: AbsRandomVar) -> CoreResult<AbsValue> {
        self.resolve_parents(rv)?;
        let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
        match evaluated {
            AbsSymDistr::Delta(_, _) => {
                self.state.set_distr(rv, evaluated)?;
            }
            _ => {
                log::debug!("value({rv}): marking plan sample");
                self.state.set_distr(rv, AbsSymDistr::Delta(AbsSymExpr::unknown(), true))?;
                self.state.mark_plan(rv, DistrEnc::Sample);
            }
        }
        Ok(AbsValue::Unknown)
    }

    fn marginalize(&mut self, rv: AbsRandomVar) -> CoreResult<()> {
        self.resolve_parents(rv)?;
        let evaluated = self.state.eval_distr(&self.state.distr(rv).clone());
        self.state.set_distr(rv, evaluated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    fn state() -> AbsBpState {
        AbsBpState::new()
    }

    #[test]
    fn independent_bernoulli_marks_plan_sample() {
        let mut s = state();
        let x = s.assume(Some(Identifier::new("x")), None, AbsSymDistr::Bernoulli(AbsSymExpr::float(0.5)));
        let v = s.value(x).unwrap();
        assert!(v.is_unknown());
        assert_eq!(s.state().plan.get(&Identifier::new("x")), Some(DistrEnc::Sample));
    }

    #[test]
    fn observing_a_child_updates_its_direct_parent_without_marking_plan() {
        let mut s = state();
        let p = s.assume(Some(Identifier::new("p")), None, AbsSymDistr::Beta(AbsSymExpr::float(1.0), AbsSymExpr::float(1.0)));
        let coin = s.assume(Some(Identifier::new("coin")), None, AbsSymDistr::Bernoulli(AbsSymExpr::rv(p)));
        s.observe(coin, AbsValue::Known(crate::value::Value::Bool(true))).unwrap();
        match s.state().distr(p) {
            AbsSymDistr::Beta(_, _) => {}
            other => panic!("expected p to remain Beta-distributed, got {other}"),
        }
        assert_eq!(s.state().plan.get(&Identifier::new("p")), None);
    }

    #[test]
    fn forcing_a_mismatched_parent_marks_it_sample_not_dynamic() {
        // BP never escalates to `dynamic`: a direct parent that fails the
        // conjugate table is forced once via `value`, whether or not its own
        // distribution is `UnkD`.
        let mut s = state();
        let unk_par = s.assume(Some(Identifier::new("unk_par")), None, AbsSymDistr::UnkD(std::collections::BTreeSet::new()));
        let child = s.assume(Some(Identifier::new("child")), None, AbsSymDistr::Bernoulli(AbsSymExpr::rv(unk_par)));
        s.value(child).unwrap();
        assert_eq!(s.state().plan.get(&Identifier::new("unk_par")), Some(DistrEnc::Sample));
        assert_eq!(s.state().plan.get(&Identifier::new("child")), Some(DistrEnc::Sample));
    }
}
