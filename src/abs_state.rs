//! The abstract symbolic state: structurally the concrete [`crate::state`]
//! plus `UnkC`/`UnkE`/`UnkD` "unknown" tops, and an [`InferencePlan`]
//! accumulator built up as the abstract interpreter forces variables it
//! cannot keep symbolic.
//!
//! Program-visible names are tracked as a *set* per node rather than a
//! single optional name (unlike the concrete `SymState`): the abstract
//! interpreter runs a program once regardless of branching, so a single
//! abstract node can stand in for variables bound at more than one program
//! point (e.g. either arm of an `if` assigning to the same surface name, or
//! a name rebound across loop iterations that the analysis does not unroll).

use crate::abs_distr::AbsSymDistr;
use crate::abs_expr::{self, AbsSymExpr};
use crate::error::{CoreError, CoreResult};
use crate::identifier::{Annotation, Identifier};
use crate::plan::InferencePlan;
use crate::value::AbsValue;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Identity of a random variable node in an `AbsSymState`. Distinct from
/// the concrete `RandomVar`: the two graphs are never mixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbsRandomVar(u64);

impl AbsRandomVar {
    pub fn from_raw(id: u64) -> Self {
        AbsRandomVar(id)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AbsRandomVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rv{}", self.0)
    }
}

/// Abstract twin of `Context`: the interpreter's variable environment over
/// abstract expressions, referenced only for `clean`'s liveness roots.
#[derive(Clone, Debug, Default)]
pub struct AbsContext {
    pub bindings: HashMap<Identifier, AbsSymExpr>,
}

impl AbsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Identifier) -> Option<&AbsSymExpr> {
        self.bindings.get(name)
    }

    pub fn set(&mut self, name: Identifier, value: AbsSymExpr) {
        self.bindings.insert(name, value);
    }

    pub fn temp_var(&self, prefix: &str) -> Identifier {
        let mut i = 0u64;
        loop {
            let candidate = Identifier::new(format!("{prefix}_{i}"));
            if !self.bindings.contains_key(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }
}

/// The abstract symbolic state shared by every abstract strategy twin
/// (SSI, DS, BP). No RNG: `value` never draws a concrete number, it always
/// installs `Delta(UnkC, sampled=true)`, so there is nothing to seed.
#[derive(Clone)]
pub struct AbsSymState {
    state: HashMap<AbsRandomVar, (HashSet<Identifier>, AbsSymDistr)>,
    pub ctx: AbsContext,
    counter: u64,
    pub annotations: HashMap<Identifier, Annotation>,
    /// The inference plan under construction. `assume` leaves a variable's
    /// entry absent (unknown) until `observe`/`value`/hoist either confirms
    /// it stays symbolic or forces it to `sample`/`dynamic`.
    pub plan: InferencePlan,
}

impl AbsSymState {
    pub fn new() -> Self {
        AbsSymState {
            state: HashMap::new(),
            ctx: AbsContext::new(),
            counter: 0,
            annotations: HashMap::new(),
            plan: InferencePlan::new(),
        }
    }

    pub fn new_var(&mut self) -> AbsRandomVar {
        self.counter += 1;
        AbsRandomVar(self.counter)
    }

    pub fn vars(&self) -> impl Iterator<Item = AbsRandomVar> + '_ {
        self.state.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn distr(&self, rv: AbsRandomVar) -> &AbsSymDistr {
        &self
            .state
            .get(&rv)
            .unwrap_or_else(|| panic!("{rv} is not a live variable in this abstract state"))
            .1
    }

    pub fn pv(&self, rv: AbsRandomVar) -> &HashSet<Identifier> {
        &self
            .state
            .get(&rv)
            .unwrap_or_else(|| panic!("{rv} is not a live variable in this abstract state"))
            .0
    }

    pub(crate) fn insert(&mut self, rv: AbsRandomVar, pv: HashSet<Identifier>, distr: AbsSymDistr) {
        self.state.insert(rv, (pv, distr));
    }

    /// Replace `rv`'s distribution. Installing a sampled `Delta` when any of
    /// `rv`'s program-visible names is annotated `symbolic` is rejected.
    pub fn set_distr(&mut self, rv: AbsRandomVar, distribution: AbsSymDistr) -> CoreResult<()> {
        if distribution.is_sampled_delta() {
            for pv in self.pv(rv).clone() {
                if self.annotations.get(&pv) == Some(&Annotation::Symbolic) {
                    return Err(CoreError::RuntimeViolatedAnnotation { name: pv });
                }
            }
        }
        let entry = self
            .state
            .get_mut(&rv)
            .unwrap_or_else(|| panic!("{rv} is not a live variable in this abstract state"));
        entry.1 = distribution;
        Ok(())
    }

    pub fn is_sampled(&self, rv: AbsRandomVar) -> bool {
        self.distr(rv).is_sampled_delta()
    }

    /// Mark every program-visible name of `rv` as `sample` in the plan
    /// under construction. Called whenever abstract forcing happens.
    pub fn mark_plan(&mut self, rv: AbsRandomVar, enc: crate::plan::DistrEnc) {
        for pv in self.pv(rv).clone() {
            self.plan.mark(pv, enc);
        }
    }

    pub fn ex_add(&self, e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
        abs_expr::abs_ex_add(e1, e2)
    }
    pub fn ex_mul(&self, e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
        abs_expr::abs_ex_mul(e1, e2)
    }
    pub fn ex_div(&self, e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
        abs_expr::abs_ex_div(e1, e2)
    }
    pub fn ex_ite(&self, cond: AbsSymExpr, t: AbsSymExpr, f: AbsSymExpr) -> AbsSymExpr {
        abs_expr::abs_ex_ite(cond, t, f)
    }
    pub fn ex_eq(&self, e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
        abs_expr::abs_ex_eq(e1, e2)
    }
    pub fn ex_lt(&self, e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
        abs_expr::abs_ex_lt(e1, e2)
    }

    pub fn eval(&mut self, expr: &AbsSymExpr) -> AbsSymExpr {
        match expr {
            AbsSymExpr::Const(_) | AbsSymExpr::UnkE(_) => expr.clone(),
            AbsSymExpr::RandomVar(rv) => match self.distr(*rv).clone() {
                AbsSymDistr::Delta(v, _) => self.eval(&v),
                distr => {
                    let evaluated = self.eval_distr(&distr);
                    self.set_distr(*rv, evaluated)
                        .expect("eval: re-evaluating in place violated an annotation");
                    AbsSymExpr::RandomVar(*rv)
                }
            },
            AbsSymExpr::Add(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                abs_expr::abs_ex_add(a, b)
            }
            AbsSymExpr::Mul(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                abs_expr::abs_ex_mul(a, b)
            }
            AbsSymExpr::Div(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                abs_expr::abs_ex_div(a, b)
            }
            AbsSymExpr::Ite(c, t, f) => {
                let (c, t, f) = (self.eval(c), self.eval(t), self.eval(f));
                abs_expr::abs_ex_ite(c, t, f)
            }
            AbsSymExpr::Eq(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                abs_expr::abs_ex_eq(a, b)
            }
            AbsSymExpr::Lt(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                abs_expr::abs_ex_lt(a, b)
            }
            AbsSymExpr::Lst(es) => {
                let evaluated: Vec<AbsSymExpr> = es.iter().map(|e| self.eval(e)).collect();
                if let Some(consts) = all_known(&evaluated) {
                    AbsSymExpr::Const(AbsValue::Known(crate::value::Value::List(consts)))
                } else {
                    AbsSymExpr::Lst(evaluated)
                }
            }
            AbsSymExpr::Pair(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                match (&a, &b) {
                    (AbsSymExpr::Const(AbsValue::Known(v1)), AbsSymExpr::Const(AbsValue::Known(v2))) => {
                        AbsSymExpr::Const(AbsValue::Known(crate::value::Value::Pair(
                            Box::new(v1.clone()),
                            Box::new(v2.clone()),
                        )))
                    }
                    _ => AbsSymExpr::Pair(Box::new(a), Box::new(b)),
                }
            }
        }
    }

    pub fn eval_distr(&mut self, distr: &AbsSymDistr) -> AbsSymDistr {
        match distr {
            AbsSymDistr::Normal(mu, var) => AbsSymDistr::Normal(self.eval(mu), self.eval(var)),
            AbsSymDistr::Bernoulli(p) => AbsSymDistr::Bernoulli(self.eval(p)),
            AbsSymDistr::Beta(a, b) => AbsSymDistr::Beta(self.eval(a), self.eval(b)),
            AbsSymDistr::Binomial(n, p) => AbsSymDistr::Binomial(self.eval(n), self.eval(p)),
            AbsSymDistr::BetaBinomial(n, a, b) => {
                AbsSymDistr::BetaBinomial(self.eval(n), self.eval(a), self.eval(b))
            }
            AbsSymDistr::NegativeBinomial(n, p) => {
                AbsSymDistr::NegativeBinomial(self.eval(n), self.eval(p))
            }
            AbsSymDistr::Gamma(a, b) => AbsSymDistr::Gamma(self.eval(a), self.eval(b)),
            AbsSymDistr::Poisson(l) => AbsSymDistr::Poisson(self.eval(l)),
            AbsSymDistr::StudentT(mu, tau2, nu) => {
                AbsSymDistr::StudentT(self.eval(mu), self.eval(tau2), self.eval(nu))
            }
            AbsSymDistr::Categorical(lo, hi, probs) => {
                AbsSymDistr::Categorical(self.eval(lo), self.eval(hi), self.eval(probs))
            }
            AbsSymDistr::Delta(v, sampled) => AbsSymDistr::Delta(self.eval(v), *sampled),
            AbsSymDistr::UnkD(parents) => AbsSymDistr::UnkD(parents.clone()),
        }
    }

    /// Structural dependency search, fully recursing through `UnkE`/`UnkD`
    /// regardless of `transitive` once one is reached (matching the
    /// reference's `depends_on`; see `crate::abs_strategy::ssi` for the
    /// separate, intentionally-stopped walker used inside `can_swap`).
    pub fn depends_on(&self, expr: &AbsSymExpr, rv: AbsRandomVar, transitive: bool) -> bool {
        match expr {
            AbsSymExpr::Const(_) => false,
            AbsSymExpr::RandomVar(other) => {
                if *other == rv {
                    true
                } else if transitive {
                    self.rv_depends_on_transitive(*other, rv)
                } else {
                    false
                }
            }
            AbsSymExpr::UnkE(parents) => {
                parents.contains(&rv)
                    || parents
                        .iter()
                        .any(|p| self.depends_on(&AbsSymExpr::RandomVar(*p), rv, true))
            }
            AbsSymExpr::Add(a, b) | AbsSymExpr::Mul(a, b) | AbsSymExpr::Div(a, b) => {
                self.depends_on(a, rv, transitive) || self.depends_on(b, rv, transitive)
            }
            AbsSymExpr::Eq(a, b) | AbsSymExpr::Lt(a, b) | AbsSymExpr::Pair(a, b) => {
                self.depends_on(a, rv, transitive) || self.depends_on(b, rv, transitive)
            }
            AbsSymExpr::Ite(c, t, f) => {
                self.depends_on(c, rv, transitive)
                    || self.depends_on(t, rv, transitive)
                    || self.depends_on(f, rv, transitive)
            }
            AbsSymExpr::Lst(es) => es.iter().any(|e| self.depends_on(e, rv, transitive)),
        }
    }

    pub fn rv_depends_on_transitive(&self, other: AbsRandomVar, rv: AbsRandomVar) -> bool {
        match self.distr(other) {
            AbsSymDistr::UnkD(parents) => {
                parents.contains(&rv)
                    || parents
                        .iter()
                        .any(|p| self.depends_on(&AbsSymExpr::RandomVar(*p), rv, true))
            }
            d => d.params().into_iter().any(|p| self.depends_on(p, rv, true)),
        }
    }

    /// Garbage-collect variables unreachable from `ctx`, transitively
    /// through live nodes' distributions (including `UnkD` parent sets).
    /// Repeats to a fixpoint.
    pub fn clean(&mut self) {
        let mut used: HashSet<AbsRandomVar> = self.ctx.bindings.values().flat_map(|e| e.rvs()).collect();
        loop {
            let mut grown = used.clone();
            for rv in &used {
                if self.state.contains_key(rv) {
                    grown.extend(self.distr(*rv).rvs());
                }
            }
            if grown.len() == used.len() {
                break;
            }
            used = grown;
        }
        self.state.retain(|rv, _| used.contains(rv));
    }
}

impl Default for AbsSymState {
    fn default() -> Self {
        Self::new()
    }
}

fn all_known(es: &[AbsSymExpr]) -> Option<Vec<crate::value::Value>> {
    let mut out = Vec::with_capacity(es.len());
    for e in es {
        match e.as_const() {
            Some(AbsValue::Known(v)) => out.push(v.clone()),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_var_is_monotone() {
        let mut s = AbsSymState::new();
        let a = s.new_var();
        let b = s.new_var();
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn clean_removes_unreachable_vars() {
        let mut s = AbsSymState::new();
        let rv = s.new_var();
        s.insert(rv, HashSet::new(), AbsSymDistr::Delta(AbsSymExpr::int(1), false));
        s.clean();
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn clean_keeps_vars_reachable_from_unkd_parents() {
        let mut s = AbsSymState::new();
        let parent = s.new_var();
        s.insert(parent, HashSet::new(), AbsSymDistr::Delta(AbsSymExpr::int(1), false));
        let child = s.new_var();
        s.insert(child, HashSet::new(), AbsSymDistr::UnkD([parent].into_iter().collect()));
        s.ctx.set(Identifier::new("x"), AbsSymExpr::rv(child));
        s.clean();
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn set_distr_rejects_sampled_delta_on_symbolic_annotation() {
        let mut s = AbsSymState::new();
        let rv = s.new_var();
        let pv = Identifier::new("x");
        s.insert(
            rv,
            [pv.clone()].into_iter().collect(),
            AbsSymDistr::Bernoulli(AbsSymExpr::float(0.5)),
        );
        s.annotations.insert(pv.clone(), Annotation::Symbolic);
        let result = s.set_distr(rv, AbsSymDistr::Delta(AbsSymExpr::bool(true), true));
        assert_eq!(result, Err(CoreError::RuntimeViolatedAnnotation { name: pv }));
    }
}
