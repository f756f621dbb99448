//! Symbolic expression algebra: a closed tree of arithmetic, choice, and
//! composite nodes over `Const` values and `RandomVar` references.

use crate::state::RandomVar;
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;

/// A symbolic expression. `RandomVar` leaves are resolved by identity against
/// whichever state owns them; the tree itself carries no state reference.
#[derive(Clone, Debug, PartialEq)]
pub enum SymExpr {
    Const(Value),
    RandomVar(RandomVar),
    Add(Box<SymExpr>, Box<SymExpr>),
    Mul(Box<SymExpr>, Box<SymExpr>),
    Div(Box<SymExpr>, Box<SymExpr>),
    Ite(Box<SymExpr>, Box<SymExpr>, Box<SymExpr>),
    Eq(Box<SymExpr>, Box<SymExpr>),
    Lt(Box<SymExpr>, Box<SymExpr>),
    Lst(Vec<SymExpr>),
    Pair(Box<SymExpr>, Box<SymExpr>),
}

impl SymExpr {
    pub fn rv(id: RandomVar) -> SymExpr {
        SymExpr::RandomVar(id)
    }

    pub fn int(v: i64) -> SymExpr {
        SymExpr::Const(Value::Int(v))
    }

    pub fn float(v: f64) -> SymExpr {
        SymExpr::Const(Value::Float(v))
    }

    pub fn bool(v: bool) -> SymExpr {
        SymExpr::Const(Value::Bool(v))
    }

    pub fn as_const(&self) -> Option<&Value> {
        match self {
            SymExpr::Const(v) => Some(v),
            _ => None,
        }
    }

    /// The `RandomVar`s directly (non-transitively) referenced by this
    /// expression, in first-occurrence order (hoist's topological sort
    /// depends on this being deterministic, not just a set).
    pub fn rvs(&self) -> Vec<RandomVar> {
        let mut out = Vec::new();
        self.collect_rvs(&mut out);
        out
    }

    /// Same as `rvs` but deduplicated, for membership tests.
    pub fn rvs_set(&self) -> HashSet<RandomVar> {
        self.rvs().into_iter().collect()
    }

    fn collect_rvs(&self, out: &mut Vec<RandomVar>) {
        match self {
            SymExpr::Const(_) => {}
            SymExpr::RandomVar(rv) => {
                if !out.contains(rv) {
                    out.push(*rv);
                }
            }
            SymExpr::Add(a, b) | SymExpr::Mul(a, b) | SymExpr::Div(a, b) => {
                a.collect_rvs(out);
                b.collect_rvs(out);
            }
            SymExpr::Eq(a, b) | SymExpr::Lt(a, b) | SymExpr::Pair(a, b) => {
                a.collect_rvs(out);
                b.collect_rvs(out);
            }
            SymExpr::Ite(c, t, f) => {
                c.collect_rvs(out);
                t.collect_rvs(out);
                f.collect_rvs(out);
            }
            SymExpr::Lst(es) => {
                for e in es {
                    e.collect_rvs(out);
                }
            }
        }
    }

    /// Purely syntactic substitution of one `RandomVar` leaf for a
    /// replacement expression (no re-evaluation).
    pub fn subst_rv(&self, target: RandomVar, replacement: &SymExpr) -> SymExpr {
        match self {
            SymExpr::Const(_) => self.clone(),
            SymExpr::RandomVar(rv) => {
                if *rv == target {
                    replacement.clone()
                } else {
                    self.clone()
                }
            }
            SymExpr::Add(a, b) => SymExpr::Add(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            SymExpr::Mul(a, b) => SymExpr::Mul(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            SymExpr::Div(a, b) => SymExpr::Div(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            SymExpr::Ite(c, t, f) => SymExpr::Ite(
                Box::new(c.subst_rv(target, replacement)),
                Box::new(t.subst_rv(target, replacement)),
                Box::new(f.subst_rv(target, replacement)),
            ),
            SymExpr::Eq(a, b) => SymExpr::Eq(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            SymExpr::Lt(a, b) => SymExpr::Lt(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            SymExpr::Lst(es) => {
                SymExpr::Lst(es.iter().map(|e| e.subst_rv(target, replacement)).collect())
            }
            SymExpr::Pair(a, b) => SymExpr::Pair(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
        }
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymExpr::Const(v) => write!(f, "{v}"),
            SymExpr::RandomVar(rv) => write!(f, "{rv}"),
            SymExpr::Add(a, b) => write!(f, "({a} + {b})"),
            SymExpr::Mul(a, b) => write!(f, "({a} * {b})"),
            SymExpr::Div(a, b) => write!(f, "({a} / {b})"),
            SymExpr::Ite(c, t, e) => write!(f, "ite({c}, {t}, {e})"),
            SymExpr::Eq(a, b) => write!(f, "({a} == {b})"),
            SymExpr::Lt(a, b) => write!(f, "({a} < {b})"),
            SymExpr::Lst(es) => {
                write!(f, "[")?;
                for (i, e) in es.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            SymExpr::Pair(a, b) => write!(f, "({a}, {b})"),
        }
    }
}

fn fold_numeric(v1: &Value, v2: &Value, op: impl Fn(f64, f64) -> f64) -> Option<Value> {
    let (a, b) = (v1.as_f64()?, v2.as_f64()?);
    let result = op(a, b);
    if v1.both_int(v2) && result.fract() == 0.0 {
        Some(Value::Int(result as i64))
    } else {
        Some(Value::Float(result))
    }
}

/// `ex_add`: fold constants, hoist a leading `Const` out of chained `Add`s,
/// and drop an additive zero.
pub fn ex_add(e1: SymExpr, e2: SymExpr) -> SymExpr {
    match (e1, e2) {
        (SymExpr::Const(v1), SymExpr::Const(v2)) => {
            SymExpr::Const(fold_numeric(&v1, &v2, |a, b| a + b).expect("ex_add: non-numeric const"))
        }
        (SymExpr::Const(v1), SymExpr::Add(l, r)) => {
            if let SymExpr::Const(v2) = *l {
                ex_add(SymExpr::Const(fold_numeric(&v1, &v2, |a, b| a + b).unwrap()), *r)
            } else if let SymExpr::Const(v3) = *r {
                ex_add(SymExpr::Const(fold_numeric(&v1, &v3, |a, b| a + b).unwrap()), *l)
            } else {
                SymExpr::Add(Box::new(SymExpr::Const(v1)), Box::new(SymExpr::Add(l, r)))
            }
        }
        (SymExpr::Add(l, r), e3) => {
            if let SymExpr::Const(v1) = *l {
                ex_add(SymExpr::Const(v1), ex_add(*r, e3))
            } else {
                SymExpr::Add(Box::new(SymExpr::Add(l, r)), Box::new(e3))
            }
        }
        (SymExpr::Const(v), e2) if is_zero(&v) => e2,
        (e1, SymExpr::Const(v)) if is_zero(&v) => e1,
        (e1, e2) => SymExpr::Add(Box::new(e1), Box::new(e2)),
    }
}

/// `ex_mul`: fold constants, distribute a constant over a constant-headed sum,
/// and annihilate on a multiplicative zero.
pub fn ex_mul(e1: SymExpr, e2: SymExpr) -> SymExpr {
    match (e1, e2) {
        (SymExpr::Const(v1), SymExpr::Const(v2)) => {
            SymExpr::Const(fold_numeric(&v1, &v2, |a, b| a * b).expect("ex_mul: non-numeric const"))
        }
        (SymExpr::Const(v1), SymExpr::Mul(l, r)) => {
            if let SymExpr::Const(v2) = *l {
                ex_mul(SymExpr::Const(fold_numeric(&v1, &v2, |a, b| a * b).unwrap()), *r)
            } else if let SymExpr::Const(v3) = *r {
                ex_mul(SymExpr::Const(fold_numeric(&v1, &v3, |a, b| a * b).unwrap()), *l)
            } else {
                SymExpr::Mul(Box::new(SymExpr::Const(v1)), Box::new(SymExpr::Mul(l, r)))
            }
        }
        (SymExpr::Const(v1), SymExpr::Add(l, r)) => {
            if let SymExpr::Const(v2) = *l {
                ex_add(
                    SymExpr::Const(fold_numeric(&v1, &v2, |a, b| a * b).unwrap()),
                    ex_mul(SymExpr::Const(v1), *r),
                )
            } else {
                SymExpr::Mul(Box::new(SymExpr::Const(v1)), Box::new(SymExpr::Add(l, r)))
            }
        }
        (SymExpr::Const(v), _) if is_zero(&v) => SymExpr::Const(Value::Int(0)),
        (_, SymExpr::Const(v)) if is_zero(&v) => SymExpr::Const(Value::Int(0)),
        (e1, e2) => SymExpr::Mul(Box::new(e1), Box::new(e2)),
    }
}

/// `ex_div`: fold constants, drop a divisor of `1`.
pub fn ex_div(e1: SymExpr, e2: SymExpr) -> SymExpr {
    match (e1, e2) {
        (SymExpr::Const(v1), SymExpr::Const(v2)) => SymExpr::Const(Value::Float(
            v1.as_f64().expect("ex_div: non-numeric const") / v2.as_f64().expect("ex_div: non-numeric const"),
        )),
        (e1, SymExpr::Const(v)) if is_one(&v) => e1,
        (e1, e2) => SymExpr::Div(Box::new(e1), Box::new(e2)),
    }
}

/// `ex_ite`: collapse when the condition is a constant boolean.
pub fn ex_ite(cond: SymExpr, t: SymExpr, f: SymExpr) -> SymExpr {
    match cond {
        SymExpr::Const(Value::Bool(true)) => t,
        SymExpr::Const(Value::Bool(false)) => f,
        cond => SymExpr::Ite(Box::new(cond), Box::new(t), Box::new(f)),
    }
}

/// `ex_eq`: fold when both sides are constants.
pub fn ex_eq(e1: SymExpr, e2: SymExpr) -> SymExpr {
    match (e1, e2) {
        (SymExpr::Const(v1), SymExpr::Const(v2)) => SymExpr::Const(Value::Bool(v1 == v2)),
        (e1, e2) => SymExpr::Eq(Box::new(e1), Box::new(e2)),
    }
}

/// `ex_lt`: fold when both sides are constants.
pub fn ex_lt(e1: SymExpr, e2: SymExpr) -> SymExpr {
    match (e1, e2) {
        (SymExpr::Const(v1), SymExpr::Const(v2)) => {
            SymExpr::Const(Value::Bool(v1.as_f64().unwrap() < v2.as_f64().unwrap()))
        }
        (e1, e2) => SymExpr::Lt(Box::new(e1), Box::new(e2)),
    }
}

fn is_zero(v: &Value) -> bool {
    matches!(v.as_f64(), Some(x) if x == 0.0)
}

fn is_one(v: &Value) -> bool {
    matches!(v.as_f64(), Some(x) if x == 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(v: i64) -> SymExpr {
        SymExpr::int(v)
    }

    #[test]
    fn add_folds_constants() {
        assert_eq!(ex_add(c(2), c(3)), c(5));
    }

    #[test]
    fn add_drops_zero() {
        let rv = SymExpr::rv(RandomVar::from_raw(1));
        assert_eq!(ex_add(c(0), rv.clone()), rv);
        assert_eq!(ex_add(rv.clone(), c(0)), rv);
    }

    #[test]
    fn mul_annihilates_on_zero() {
        let rv = SymExpr::rv(RandomVar::from_raw(1));
        assert_eq!(ex_mul(c(0), rv.clone()), c(0));
        assert_eq!(ex_mul(rv, c(0)), c(0));
    }

    #[test]
    fn div_drops_one() {
        let rv = SymExpr::rv(RandomVar::from_raw(1));
        assert_eq!(ex_div(rv.clone(), c(1)), rv);
    }

    #[test]
    fn ite_collapses_on_const_cond() {
        let rv = SymExpr::rv(RandomVar::from_raw(1));
        let other = SymExpr::rv(RandomVar::from_raw(2));
        assert_eq!(ex_ite(SymExpr::bool(true), rv.clone(), other.clone()), rv);
        assert_eq!(ex_ite(SymExpr::bool(false), rv, other.clone()), other);
    }

    #[test]
    fn mul_distributes_over_const_headed_add() {
        // 2 * (3 + rv) == 6 + 2*rv
        let rv = SymExpr::rv(RandomVar::from_raw(1));
        let lhs = ex_mul(c(2), ex_add(c(3), rv.clone()));
        let rhs = ex_add(c(6), ex_mul(c(2), rv));
        assert_eq!(lhs, rhs);
    }
}
