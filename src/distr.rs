//! Symbolic distribution algebra: the fixed set of conjugate-eligible
//! distribution families, each parameterised by `SymExpr`s.

use crate::expr::SymExpr;
use crate::state::RandomVar;
use std::fmt;

/// A symbolic distribution. Every parameter is itself a `SymExpr`, so a
/// distribution can reference other `RandomVar`s through its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum SymDistr {
    Normal(SymExpr, SymExpr),
    Bernoulli(SymExpr),
    Beta(SymExpr, SymExpr),
    Binomial(SymExpr, SymExpr),
    BetaBinomial(SymExpr, SymExpr, SymExpr),
    NegativeBinomial(SymExpr, SymExpr),
    Gamma(SymExpr, SymExpr),
    Poisson(SymExpr),
    StudentT(SymExpr, SymExpr, SymExpr),
    Categorical(SymExpr, SymExpr, SymExpr),
    /// A point mass. `sampled` distinguishes a variable forced by `value`
    /// (true) from one pinned by `observe` (false) — an annotated-symbolic
    /// variable may be `observe`d but must never be forced.
    Delta(SymExpr, bool),
}

impl SymDistr {
    /// The `RandomVar`s directly referenced by this distribution's
    /// parameters, in first-occurrence order. Used by `parents(rv)` in
    /// every hoist algorithm.
    pub fn rvs(&self) -> Vec<RandomVar> {
        let mut out = Vec::new();
        for p in self.params() {
            for rv in p.rvs() {
                if !out.contains(&rv) {
                    out.push(rv);
                }
            }
        }
        out
    }

    /// The parameter expressions, in the fixed order each variant declares
    /// them. Used both by `rvs()` and by the `rv_depends_on_transitive`
    /// dispatch table in `crate::conjugate`.
    pub fn params(&self) -> Vec<&SymExpr> {
        match self {
            SymDistr::Normal(a, b) => vec![a, b],
            SymDistr::Bernoulli(p) => vec![p],
            SymDistr::Beta(a, b) => vec![a, b],
            SymDistr::Binomial(n, p) => vec![n, p],
            SymDistr::BetaBinomial(n, a, b) => vec![n, a, b],
            SymDistr::NegativeBinomial(n, p) => vec![n, p],
            SymDistr::Gamma(a, b) => vec![a, b],
            SymDistr::Poisson(l) => vec![l],
            SymDistr::StudentT(mu, tau2, nu) => vec![mu, tau2, nu],
            SymDistr::Categorical(lo, hi, probs) => vec![lo, hi, probs],
            SymDistr::Delta(v, _) => vec![v],
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, SymDistr::Delta(_, _))
    }

    pub fn is_sampled_delta(&self) -> bool {
        matches!(self, SymDistr::Delta(_, true))
    }

    /// Closed-form mean, used for final result reporting once every
    /// parameter has evaluated to a `Const`. Panics if a parameter is not a
    /// constant; callers are expected to call `eval_distr` first.
    pub fn mean(&self) -> f64 {
        let c = |e: &SymExpr| {
            e.as_const()
                .and_then(|v| v.as_f64())
                .expect("SymDistr::mean: parameter is not a constant")
        };
        match self {
            SymDistr::Normal(mu, _) => c(mu),
            SymDistr::Bernoulli(p) => c(p),
            SymDistr::Beta(a, b) => c(a) / (c(a) + c(b)),
            SymDistr::Binomial(n, p) => c(n) * c(p),
            SymDistr::BetaBinomial(n, a, b) => c(n) * c(a) / (c(a) + c(b)),
            SymDistr::NegativeBinomial(n, p) => c(n) * (1.0 - c(p)) / c(p),
            SymDistr::Gamma(a, b) => c(a) / c(b),
            SymDistr::Poisson(l) => c(l),
            SymDistr::StudentT(mu, _, nu) => {
                if c(nu) > 1.0 {
                    c(mu)
                } else {
                    f64::NAN
                }
            }
            SymDistr::Categorical(lo, hi, probs) => {
                let probs = match probs.as_const() {
                    Some(crate::value::Value::List(ps)) => ps.clone(),
                    _ => panic!("SymDistr::mean: Categorical probs is not a constant list"),
                };
                let lo = c(lo);
                probs
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (lo + i as f64) * p.as_f64().unwrap())
                    .sum::<f64>()
                    * if c(hi) >= lo { 1.0 } else { 0.0 }
            }
            SymDistr::Delta(v, _) => c(v),
        }
    }
}

impl fmt::Display for SymDistr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymDistr::Normal(mu, var) => write!(f, "Normal({mu}, {var})"),
            SymDistr::Bernoulli(p) => write!(f, "Bernoulli({p})"),
            SymDistr::Beta(a, b) => write!(f, "Beta({a}, {b})"),
            SymDistr::Binomial(n, p) => write!(f, "Binomial({n}, {p})"),
            SymDistr::BetaBinomial(n, a, b) => write!(f, "BetaBinomial({n}, {a}, {b})"),
            SymDistr::NegativeBinomial(n, p) => write!(f, "NegativeBinomial({n}, {p})"),
            SymDistr::Gamma(a, b) => write!(f, "Gamma({a}, {b})"),
            SymDistr::Poisson(l) => write!(f, "Poisson({l})"),
            SymDistr::StudentT(mu, tau2, nu) => write!(f, "StudentT({mu}, {tau2}, {nu})"),
            SymDistr::Categorical(lo, hi, probs) => write!(f, "Categorical({lo}, {hi}, {probs})"),
            SymDistr::Delta(v, sampled) => write!(f, "Delta({v}, {sampled})"),
        }
    }
}
