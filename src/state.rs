//! The concrete symbolic state: a map of live random variables to their
//! program-visible name and current distribution, plus the evaluator that
//! every strategy shares.

use crate::distr::SymDistr;
use crate::error::{CoreError, CoreResult};
use crate::expr::{self, SymExpr};
use crate::identifier::{Annotation, Identifier};
use crate::value::Value;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Identity of a random variable node in a `SymState`. Ids are assigned by a
/// monotone counter and never reused; comparisons are by id only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RandomVar(u64);

impl RandomVar {
    /// Only for use by the fresh-id generator and by tests that need a
    /// specific id without going through `SymState::new_var`.
    pub fn from_raw(id: u64) -> Self {
        RandomVar(id)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RandomVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rv{}", self.0)
    }
}

/// The interpreter's variable environment, referenced only for `clean`'s
/// liveness roots. Populated by the (out of scope) driver.
#[derive(Clone, Debug, Default)]
pub struct Context {
    pub bindings: HashMap<Identifier, SymExpr>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Identifier) -> Option<&SymExpr> {
        self.bindings.get(name)
    }

    pub fn set(&mut self, name: Identifier, value: SymExpr) {
        self.bindings.insert(name, value);
    }

    /// A fresh identifier not already bound in this context.
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

/// The concrete symbolic state shared by every concrete strategy (SSI, DS,
/// BP). Strategies compose this struct rather than inheriting from it.
#[derive(Clone)]
pub struct SymState {
    state: HashMap<RandomVar, (Option<Identifier>, SymDistr)>,
    pub ctx: Context,
    counter: u64,
    pub annotations: HashMap<Identifier, Annotation>,
    /// Shared by reference across clones: a particle copy continues the same
    /// random stream its parent was on rather than forking it.
    rng: Rc<RefCell<StdRng>>,
}

impl SymState {
    pub fn new() -> Self {
        Self::with_seed(None)
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        SymState {
            state: HashMap::new(),
            ctx: Context::new(),
            counter: 0,
            annotations: HashMap::new(),
            rng: Rc::new(RefCell::new(rng)),
        }
    }

    pub fn new_var(&mut self) -> RandomVar {
        self.counter += 1;
        RandomVar(self.counter)
    }

    pub fn rng(&self) -> Rc<RefCell<StdRng>> {
        Rc::clone(&self.rng)
    }

    pub fn vars(&self) -> impl Iterator<Item = RandomVar> + '_ {
        self.state.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn distr(&self, rv: RandomVar) -> &SymDistr {
        &self
            .state
            .get(&rv)
            .unwrap_or_else(|| panic!("{rv} is not a live variable in this state"))
            .1
    }

    pub fn pv(&self, rv: RandomVar) -> Option<&Identifier> {
        self.state.get(&rv).and_then(|(pv, _)| pv.as_ref())
    }

    /// Insert a brand-new node. Only `assume` (per strategy) should call
    /// this; every other mutation goes through `set_distr`.
    pub(crate) fn insert(&mut self, rv: RandomVar, pv: Option<Identifier>, distr: SymDistr) {
        self.state.insert(rv, (pv, distr));
    }

    /// Replace `rv`'s distribution. Installing a sampled `Delta` for a
    /// variable annotated `symbolic` is rejected.
    pub fn set_distr(&mut self, rv: RandomVar, distribution: SymDistr) -> CoreResult<()> {
        if distribution.is_sampled_delta() {
            if let Some(pv) = self.pv(rv).cloned() {
                if self.annotations.get(&pv) == Some(&Annotation::Symbolic) {
                    return Err(CoreError::RuntimeViolatedAnnotation { name: pv });
                }
            }
        }
        let entry = self
            .state
            .get_mut(&rv)
            .unwrap_or_else(|| panic!("{rv} is not a live variable in this state"));
        entry.1 = distribution;
        Ok(())
    }

    pub fn is_sampled(&self, rv: RandomVar) -> bool {
        self.distr(rv).is_sampled_delta()
    }

    // -- smart constructors, kept as inherent methods so callers can build
    // expressions directly off the state that owns their RandomVars --

    pub fn ex_add(&self, e1: SymExpr, e2: SymExpr) -> SymExpr {
        expr::ex_add(e1, e2)
    }
    pub fn ex_mul(&self, e1: SymExpr, e2: SymExpr) -> SymExpr {
        expr::ex_mul(e1, e2)
    }
    pub fn ex_div(&self, e1: SymExpr, e2: SymExpr) -> SymExpr {
        expr::ex_div(e1, e2)
    }
    pub fn ex_ite(&self, cond: SymExpr, t: SymExpr, f: SymExpr) -> SymExpr {
        expr::ex_ite(cond, t, f)
    }
    pub fn ex_eq(&self, e1: SymExpr, e2: SymExpr) -> SymExpr {
        expr::ex_eq(e1, e2)
    }
    pub fn ex_lt(&self, e1: SymExpr, e2: SymExpr) -> SymExpr {
        expr::ex_lt(e1, e2)
    }

    /// Simplify `expr` to normal form. For a `RandomVar` leaf: substitute its
    /// value if it is a `Delta`, otherwise re-evaluate its distribution in
    /// place (memoising progress) and leave the reference as-is.
    pub fn eval(&mut self, expr: &SymExpr) -> SymExpr {
        match expr {
            SymExpr::Const(_) => expr.clone(),
            SymExpr::RandomVar(rv) => match self.distr(*rv).clone() {
                SymDistr::Delta(v, _) => self.eval(&v),
                distr => {
                    let evaluated = self.eval_distr(&distr);
                    // set_distr cannot fail here: re-evaluating in place never
                    // installs a sampled Delta for a distribution that wasn't
                    // already one.
                    self.set_distr(*rv, evaluated)
                        .expect("eval: re-evaluating in place violated an annotation");
                    SymExpr::RandomVar(*rv)
                }
            },
            SymExpr::Add(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                expr::ex_add(a, b)
            }
            SymExpr::Mul(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                expr::ex_mul(a, b)
            }
            SymExpr::Div(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                expr::ex_div(a, b)
            }
            SymExpr::Ite(c, t, f) => {
                let (c, t, f) = (self.eval(c), self.eval(t), self.eval(f));
                expr::ex_ite(c, t, f)
            }
            SymExpr::Eq(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                expr::ex_eq(a, b)
            }
            SymExpr::Lt(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                expr::ex_lt(a, b)
            }
            SymExpr::Lst(es) => {
                let evaluated: Vec<SymExpr> = es.iter().map(|e| self.eval(e)).collect();
                if let Some(consts) = all_const(&evaluated) {
                    SymExpr::Const(Value::List(consts))
                } else {
                    SymExpr::Lst(evaluated)
                }
            }
            SymExpr::Pair(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                match (&a, &b) {
                    (SymExpr::Const(v1), SymExpr::Const(v2)) => {
                        SymExpr::Const(Value::Pair(Box::new(v1.clone()), Box::new(v2.clone())))
                    }
                    _ => SymExpr::Pair(Box::new(a), Box::new(b)),
                }
            }
        }
    }

    pub fn eval_distr(&mut self, distr: &SymDistr) -> SymDistr {
        match distr {
            SymDistr::Normal(mu, var) => SymDistr::Normal(self.eval(mu), self.eval(var)),
            SymDistr::Bernoulli(p) => SymDistr::Bernoulli(self.eval(p)),
            SymDistr::Beta(a, b) => SymDistr::Beta(self.eval(a), self.eval(b)),
            SymDistr::Binomial(n, p) => SymDistr::Binomial(self.eval(n), self.eval(p)),
            SymDistr::BetaBinomial(n, a, b) => {
                SymDistr::BetaBinomial(self.eval(n), self.eval(a), self.eval(b))
            }
            SymDistr::NegativeBinomial(n, p) => {
                SymDistr::NegativeBinomial(self.eval(n), self.eval(p))
            }
            SymDistr::Gamma(a, b) => SymDistr::Gamma(self.eval(a), self.eval(b)),
            SymDistr::Poisson(l) => SymDistr::Poisson(self.eval(l)),
            SymDistr::StudentT(mu, tau2, nu) => {
                SymDistr::StudentT(self.eval(mu), self.eval(tau2), self.eval(nu))
            }
            SymDistr::Categorical(lo, hi, probs) => {
                SymDistr::Categorical(self.eval(lo), self.eval(hi), self.eval(probs))
            }
            SymDistr::Delta(v, sampled) => SymDistr::Delta(self.eval(v), *sampled),
        }
    }

    /// Structural dependency search. When a `RandomVar` other than `rv` is
    /// reached and `transitive` is set, recurse into that variable's
    /// *current* distribution.
    pub fn depends_on(&self, expr: &SymExpr, rv: RandomVar, transitive: bool) -> bool {
        match expr {
            SymExpr::Const(_) => false,
            SymExpr::RandomVar(other) => {
                if *other == rv {
                    true
                } else if transitive {
                    self.rv_depends_on_transitive(*other, rv)
                } else {
                    false
                }
            }
            SymExpr::Add(a, b) | SymExpr::Mul(a, b) | SymExpr::Div(a, b) => {
                self.depends_on(a, rv, transitive) || self.depends_on(b, rv, transitive)
            }
            SymExpr::Eq(a, b) | SymExpr::Lt(a, b) | SymExpr::Pair(a, b) => {
                self.depends_on(a, rv, transitive) || self.depends_on(b, rv, transitive)
            }
            SymExpr::Ite(c, t, f) => {
                self.depends_on(c, rv, transitive)
                    || self.depends_on(t, rv, transitive)
                    || self.depends_on(f, rv, transitive)
            }
            SymExpr::Lst(es) => es.iter().any(|e| self.depends_on(e, rv, transitive)),
        }
    }

    /// Dispatch table: which parameters of `other`'s current distribution to
    /// traverse when checking transitive dependence on `rv`.
    pub fn rv_depends_on_transitive(&self, other: RandomVar, rv: RandomVar) -> bool {
        self.distr(other)
            .params()
            .into_iter()
            .any(|p| self.depends_on(p, rv, true))
    }

    /// Force every sub-expression to a ground `Const`, sampling any
    /// non-delta `RandomVar` encountered along the way via `value`.
    /// Requires the caller to supply a sampler (strategy-specific `value`).
    pub fn value_expr(
        &mut self,
        expr: &SymExpr,
        mut value_rv: impl FnMut(&mut SymState, RandomVar) -> CoreResult<Value>,
    ) -> CoreResult<Value> {
        match expr {
            SymExpr::Const(v) => Ok(v.clone()),
            SymExpr::RandomVar(rv) => value_rv(self, *rv),
            SymExpr::Add(a, b) => {
                let a = self.value_expr(a, &mut value_rv)?.as_f64().unwrap();
                let b = self.value_expr(b, &mut value_rv)?.as_f64().unwrap();
                Ok(Value::Float(a + b))
            }
            SymExpr::Mul(a, b) => {
                let a = self.value_expr(a, &mut value_rv)?.as_f64().unwrap();
                let b = self.value_expr(b, &mut value_rv)?.as_f64().unwrap();
                Ok(Value::Float(a * b))
            }
            SymExpr::Div(a, b) => {
                let a = self.value_expr(a, &mut value_rv)?.as_f64().unwrap();
                let b = self.value_expr(b, &mut value_rv)?.as_f64().unwrap();
                Ok(Value::Float(a / b))
            }
            SymExpr::Ite(c, t, f) => {
                let c = self.value_expr(c, &mut value_rv)?.as_bool().unwrap();
                if c {
                    self.value_expr(t, &mut value_rv)
                } else {
                    self.value_expr(f, &mut value_rv)
                }
            }
            SymExpr::Eq(a, b) => {
                let a = self.value_expr(a, &mut value_rv)?;
                let b = self.value_expr(b, &mut value_rv)?;
                Ok(Value::Bool(a == b))
            }
            SymExpr::Lt(a, b) => {
                let a = self.value_expr(a, &mut value_rv)?.as_f64().unwrap();
                let b = self.value_expr(b, &mut value_rv)?.as_f64().unwrap();
                Ok(Value::Bool(a < b))
            }
            SymExpr::Lst(es) => {
                let mut out = Vec::with_capacity(es.len());
                for e in es {
                    out.push(self.value_expr(e, &mut value_rv)?);
                }
                Ok(Value::List(out))
            }
            SymExpr::Pair(a, b) => {
                let a = self.value_expr(a, &mut value_rv)?;
                let b = self.value_expr(b, &mut value_rv)?;
                Ok(Value::Pair(Box::new(a), Box::new(b)))
            }
        }
    }

    /// Garbage-collect variables unreachable from `ctx`, transitively
    /// through live nodes' distributions. Repeats to a fixpoint.
    pub fn clean(&mut self) {
        let mut used: std::collections::HashSet<RandomVar> = self
            .ctx
            .bindings
            .values()
            .flat_map(|e| e.rvs())
            .collect();
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

    pub fn str_expr(&mut self, expr: &SymExpr) -> String {
        let e = self.eval(expr);
        match e {
            SymExpr::Const(v) => v.to_string(),
            SymExpr::RandomVar(rv) => self.str_distr(rv),
            other => other.to_string(),
        }
    }

    fn str_distr(&mut self, rv: RandomVar) -> String {
        self.distr(rv).to_string()
    }
}

impl Default for SymState {
    fn default() -> Self {
        Self::new()
    }
}

fn all_const(es: &[SymExpr]) -> Option<Vec<Value>> {
    let mut out = Vec::with_capacity(es.len());
    for e in es {
        out.push(e.as_const()?.clone());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_var_is_monotone() {
        let mut s = SymState::new();
        let a = s.new_var();
        let b = s.new_var();
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn eval_is_idempotent_on_consts() {
        let mut s = SymState::new();
        let e = expr::ex_add(SymExpr::int(1), SymExpr::int(2));
        let once = s.eval(&e);
        let twice = s.eval(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn clean_removes_unreachable_vars() {
        let mut s = SymState::new();
        let rv = s.new_var();
        s.insert(rv, None, SymDistr::Delta(SymExpr::int(1), false));
        s.clean();
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn clean_keeps_vars_reachable_from_ctx() {
        let mut s = SymState::new();
        let rv = s.new_var();
        s.insert(rv, None, SymDistr::Delta(SymExpr::int(1), false));
        s.ctx.set(Identifier::new("x"), SymExpr::rv(rv));
        s.clean();
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn set_distr_rejects_sampled_delta_on_symbolic_annotation() {
        let mut s = SymState::new();
        let rv = s.new_var();
        let pv = Identifier::new("x");
        s.insert(rv, Some(pv.clone()), SymDistr::Bernoulli(SymExpr::float(0.5)));
        s.annotations.insert(pv.clone(), Annotation::Symbolic);
        let result = s.set_distr(rv, SymDistr::Delta(SymExpr::bool(true), true));
        assert_eq!(result, Err(CoreError::RuntimeViolatedAnnotation { name: pv }));
    }
}
