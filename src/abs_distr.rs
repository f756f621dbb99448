//! Abstract symbolic distribution algebra: the same fixed distribution
//! families as [`crate::distr`], plus `UnkD`, the join-lattice top for a
//! distribution abstract interpretation could not pin down to one of the
//! six known families (e.g. a `Categorical` whose bounds come from
//! unresolved data).

use crate::abs_expr::AbsSymExpr;
use crate::abs_state::AbsRandomVar;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum AbsSymDistr {
    Normal(AbsSymExpr, AbsSymExpr),
    Bernoulli(AbsSymExpr),
    Beta(AbsSymExpr, AbsSymExpr),
    Binomial(AbsSymExpr, AbsSymExpr),
    BetaBinomial(AbsSymExpr, AbsSymExpr, AbsSymExpr),
    NegativeBinomial(AbsSymExpr, AbsSymExpr),
    Gamma(AbsSymExpr, AbsSymExpr),
    Poisson(AbsSymExpr),
    StudentT(AbsSymExpr, AbsSymExpr, AbsSymExpr),
    Categorical(AbsSymExpr, AbsSymExpr, AbsSymExpr),
    Delta(AbsSymExpr, bool),
    /// Unknown distribution; the join-lattice top. `parents` over-
    /// approximates every `AbsRandomVar` it could depend on.
    UnkD(BTreeSet<AbsRandomVar>),
}

impl AbsSymDistr {
    /// The parameter expressions, in the fixed order each variant declares
    /// them. `UnkD` has no structured parameters (its dependency set is
    /// carried directly); callers that need the dependency set for `UnkD`
    /// should use `rvs()` instead.
    pub fn params(&self) -> Vec<&AbsSymExpr> {
        match self {
            AbsSymDistr::Normal(a, b) => vec![a, b],
            AbsSymDistr::Bernoulli(p) => vec![p],
            AbsSymDistr::Beta(a, b) => vec![a, b],
            AbsSymDistr::Binomial(n, p) => vec![n, p],
            AbsSymDistr::BetaBinomial(n, a, b) => vec![n, a, b],
            AbsSymDistr::NegativeBinomial(n, p) => vec![n, p],
            AbsSymDistr::Gamma(a, b) => vec![a, b],
            AbsSymDistr::Poisson(l) => vec![l],
            AbsSymDistr::StudentT(mu, tau2, nu) => vec![mu, tau2, nu],
            AbsSymDistr::Categorical(lo, hi, probs) => vec![lo, hi, probs],
            AbsSymDistr::Delta(v, _) => vec![v],
            AbsSymDistr::UnkD(_) => vec![],
        }
    }

    /// Every `AbsRandomVar` this distribution directly depends on: the
    /// union of its parameters' `parents()` (which already folds in any
    /// nested `UnkE`), or its own declared parent set if it is `UnkD`.
    pub fn rvs(&self) -> Vec<AbsRandomVar> {
        if let AbsSymDistr::UnkD(parents) = self {
            return parents.iter().copied().collect();
        }
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

    pub fn is_delta(&self) -> bool {
        matches!(self, AbsSymDistr::Delta(_, _))
    }

    pub fn is_sampled_delta(&self) -> bool {
        matches!(self, AbsSymDistr::Delta(_, true))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, AbsSymDistr::UnkD(_))
    }
}

impl fmt::Display for AbsSymDistr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsSymDistr::Normal(mu, var) => write!(f, "Normal({mu}, {var})"),
            AbsSymDistr::Bernoulli(p) => write!(f, "Bernoulli({p})"),
            AbsSymDistr::Beta(a, b) => write!(f, "Beta({a}, {b})"),
            AbsSymDistr::Binomial(n, p) => write!(f, "Binomial({n}, {p})"),
            AbsSymDistr::BetaBinomial(n, a, b) => write!(f, "BetaBinomial({n}, {a}, {b})"),
            AbsSymDistr::NegativeBinomial(n, p) => write!(f, "NegativeBinomial({n}, {p})"),
            AbsSymDistr::Gamma(a, b) => write!(f, "Gamma({a}, {b})"),
            AbsSymDistr::Poisson(l) => write!(f, "Poisson({l})"),
            AbsSymDistr::StudentT(mu, tau2, nu) => write!(f, "StudentT({mu}, {tau2}, {nu})"),
            AbsSymDistr::Categorical(lo, hi, probs) => write!(f, "Categorical({lo}, {hi}, {probs})"),
            AbsSymDistr::Delta(v, sampled) => write!(f, "Delta({v}, {sampled})"),
            AbsSymDistr::UnkD(parents) => {
                write!(f, "UnkD(")?;
                for (i, p) in parents.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
        }
    }
}
