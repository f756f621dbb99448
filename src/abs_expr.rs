//! Abstract symbolic expression algebra: the same closed tree as
//! [`crate::expr`], plus `UnkE`, the join-lattice top produced whenever an
//! operation touches an unknown constant or an already-unknown
//! sub-expression. `UnkE` carries the set of `AbsRandomVar`s the unknown
//! quantity transitively depends on, so that dependency-tracking machinery
//! downstream (`depends_on`, the plan accumulator) stays sound without
//! having to inspect the unknown value itself.

use crate::abs_state::AbsRandomVar;
use crate::value::{AbsValue, Value};
use std::collections::BTreeSet;
use std::fmt;

/// An abstract symbolic expression. Structurally identical to `SymExpr`
/// except `Const` carries an `AbsValue` (which may be `UnkC`) and there is
/// an additional `UnkE` variant for expressions abstract evaluation could
/// not resolve at all.
#[derive(Clone, Debug, PartialEq)]
pub enum AbsSymExpr {
    Const(AbsValue),
    RandomVar(AbsRandomVar),
    Add(Box<AbsSymExpr>, Box<AbsSymExpr>),
    Mul(Box<AbsSymExpr>, Box<AbsSymExpr>),
    Div(Box<AbsSymExpr>, Box<AbsSymExpr>),
    Ite(Box<AbsSymExpr>, Box<AbsSymExpr>, Box<AbsSymExpr>),
    Eq(Box<AbsSymExpr>, Box<AbsSymExpr>),
    Lt(Box<AbsSymExpr>, Box<AbsSymExpr>),
    Lst(Vec<AbsSymExpr>),
    Pair(Box<AbsSymExpr>, Box<AbsSymExpr>),
    /// Unknown expression; the join-lattice top. `parents` is a sound
    /// over-approximation of every `AbsRandomVar` the real value could
    /// depend on.
    UnkE(BTreeSet<AbsRandomVar>),
}

impl AbsSymExpr {
    pub fn rv(id: AbsRandomVar) -> AbsSymExpr {
        AbsSymExpr::RandomVar(id)
    }

    pub fn known(v: Value) -> AbsSymExpr {
        AbsSymExpr::Const(AbsValue::Known(v))
    }

    pub fn int(v: i64) -> AbsSymExpr {
        Self::known(Value::Int(v))
    }

    pub fn float(v: f64) -> AbsSymExpr {
        Self::known(Value::Float(v))
    }

    pub fn bool(v: bool) -> AbsSymExpr {
        Self::known(Value::Bool(v))
    }

    pub fn unknown() -> AbsSymExpr {
        AbsSymExpr::Const(AbsValue::Unknown)
    }

    pub fn as_const(&self) -> Option<&AbsValue> {
        match self {
            AbsSymExpr::Const(v) => Some(v),
            _ => None,
        }
    }

    /// `Some(parents)` if `self` is unknown at the top level: either a naked
    /// `UnkC` (empty dependency set) or an `UnkE` (its declared parents).
    pub fn unk_parents(&self) -> Option<BTreeSet<AbsRandomVar>> {
        match self {
            AbsSymExpr::Const(AbsValue::Unknown) => Some(BTreeSet::new()),
            AbsSymExpr::UnkE(parents) => Some(parents.clone()),
            _ => None,
        }
    }

    /// Every `AbsRandomVar` this expression could depend on: direct
    /// `RandomVar` leaves plus any `UnkE`'s declared parent set. Used to
    /// build a sound dependency set when a smart constructor must collapse
    /// an expression to `UnkE`.
    pub fn parents(&self) -> BTreeSet<AbsRandomVar> {
        let mut out = BTreeSet::new();
        self.collect_parents(&mut out);
        out
    }

    fn collect_parents(&self, out: &mut BTreeSet<AbsRandomVar>) {
        match self {
            AbsSymExpr::Const(_) => {}
            AbsSymExpr::RandomVar(rv) => {
                out.insert(*rv);
            }
            AbsSymExpr::UnkE(parents) => out.extend(parents.iter().copied()),
            AbsSymExpr::Add(a, b) | AbsSymExpr::Mul(a, b) | AbsSymExpr::Div(a, b) => {
                a.collect_parents(out);
                b.collect_parents(out);
            }
            AbsSymExpr::Eq(a, b) | AbsSymExpr::Lt(a, b) | AbsSymExpr::Pair(a, b) => {
                a.collect_parents(out);
                b.collect_parents(out);
            }
            AbsSymExpr::Ite(c, t, f) => {
                c.collect_parents(out);
                t.collect_parents(out);
                f.collect_parents(out);
            }
            AbsSymExpr::Lst(es) => {
                for e in es {
                    e.collect_parents(out);
                }
            }
        }
    }

    /// The `AbsRandomVar`s directly (non-transitively) referenced, in
    /// first-occurrence order; mirrors `SymExpr::rvs` for the topo-sort used
    /// by the abstract hoist.
    pub fn rvs(&self) -> Vec<AbsRandomVar> {
        let mut out = Vec::new();
        self.collect_rvs(&mut out);
        out
    }

    fn collect_rvs(&self, out: &mut Vec<AbsRandomVar>) {
        match self {
            AbsSymExpr::Const(_) => {}
            AbsSymExpr::RandomVar(rv) => {
                if !out.contains(rv) {
                    out.push(*rv);
                }
            }
            AbsSymExpr::UnkE(parents) => {
                for p in parents {
                    if !out.contains(p) {
                        out.push(*p);
                    }
                }
            }
            AbsSymExpr::Add(a, b) | AbsSymExpr::Mul(a, b) | AbsSymExpr::Div(a, b) => {
                a.collect_rvs(out);
                b.collect_rvs(out);
            }
            AbsSymExpr::Eq(a, b) | AbsSymExpr::Lt(a, b) | AbsSymExpr::Pair(a, b) => {
                a.collect_rvs(out);
                b.collect_rvs(out);
            }
            AbsSymExpr::Ite(c, t, f) => {
                c.collect_rvs(out);
                t.collect_rvs(out);
                f.collect_rvs(out);
            }
            AbsSymExpr::Lst(es) => {
                for e in es {
                    e.collect_rvs(out);
                }
            }
        }
    }

    pub fn subst_rv(&self, target: AbsRandomVar, replacement: &AbsSymExpr) -> AbsSymExpr {
        match self {
            AbsSymExpr::Const(_) | AbsSymExpr::UnkE(_) => self.clone(),
            AbsSymExpr::RandomVar(rv) => {
                if *rv == target {
                    replacement.clone()
                } else {
                    self.clone()
                }
            }
            AbsSymExpr::Add(a, b) => AbsSymExpr::Add(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            AbsSymExpr::Mul(a, b) => AbsSymExpr::Mul(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            AbsSymExpr::Div(a, b) => AbsSymExpr::Div(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            AbsSymExpr::Ite(c, t, f) => AbsSymExpr::Ite(
                Box::new(c.subst_rv(target, replacement)),
                Box::new(t.subst_rv(target, replacement)),
                Box::new(f.subst_rv(target, replacement)),
            ),
            AbsSymExpr::Eq(a, b) => AbsSymExpr::Eq(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            AbsSymExpr::Lt(a, b) => AbsSymExpr::Lt(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
            AbsSymExpr::Lst(es) => {
                AbsSymExpr::Lst(es.iter().map(|e| e.subst_rv(target, replacement)).collect())
            }
            AbsSymExpr::Pair(a, b) => AbsSymExpr::Pair(
                Box::new(a.subst_rv(target, replacement)),
                Box::new(b.subst_rv(target, replacement)),
            ),
        }
    }
}

impl fmt::Display for AbsSymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsSymExpr::Const(v) => write!(f, "{v}"),
            AbsSymExpr::RandomVar(rv) => write!(f, "{rv}"),
            AbsSymExpr::Add(a, b) => write!(f, "({a} + {b})"),
            AbsSymExpr::Mul(a, b) => write!(f, "({a} * {b})"),
            AbsSymExpr::Div(a, b) => write!(f, "({a} / {b})"),
            AbsSymExpr::Ite(c, t, e) => write!(f, "ite({c}, {t}, {e})"),
            AbsSymExpr::Eq(a, b) => write!(f, "({a} == {b})"),
            AbsSymExpr::Lt(a, b) => write!(f, "({a} < {b})"),
            AbsSymExpr::Lst(es) => {
                write!(f, "[")?;
                for (i, e) in es.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            AbsSymExpr::Pair(a, b) => write!(f, "({a}, {b})"),
            AbsSymExpr::UnkE(parents) => {
                write!(f, "Unk(")?;
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

fn fold_numeric(v1: &Value, v2: &Value, op: impl Fn(f64, f64) -> f64) -> Option<Value> {
    let (a, b) = (v1.as_f64()?, v2.as_f64()?);
    let result = op(a, b);
    if v1.both_int(v2) && result.fract() == 0.0 {
        Some(Value::Int(result as i64))
    } else {
        Some(Value::Float(result))
    }
}

fn is_zero(v: &AbsValue) -> bool {
    matches!(v.as_f64(), Some(x) if x == 0.0)
}

fn is_one(v: &AbsValue) -> bool {
    matches!(v.as_f64(), Some(x) if x == 1.0)
}

/// If either operand is unknown (a naked `UnkC` or an `UnkE`), collapse the
/// whole operation to `UnkE` over the union of both operands' parents. This
/// is the soundness hook every abstract smart constructor routes through
/// first.
fn propagate_unknown(operands: &[&AbsSymExpr]) -> Option<AbsSymExpr> {
    if operands.iter().any(|e| e.unk_parents().is_some()) {
        let mut parents = BTreeSet::new();
        for e in operands {
            parents.extend(e.parents());
        }
        Some(AbsSymExpr::UnkE(parents))
    } else {
        None
    }
}

pub fn abs_ex_add(e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
    if let Some(unk) = propagate_unknown(&[&e1, &e2]) {
        return unk;
    }
    match (e1, e2) {
        (AbsSymExpr::Const(AbsValue::Known(v1)), AbsSymExpr::Const(AbsValue::Known(v2))) => {
            AbsSymExpr::known(fold_numeric(&v1, &v2, |a, b| a + b).expect("abs_ex_add: non-numeric const"))
        }
        (AbsSymExpr::Const(v1), AbsSymExpr::Add(l, r)) => {
            if let AbsSymExpr::Const(v2) = *l {
                abs_ex_add(
                    AbsSymExpr::known(fold_numeric(v1.as_f64_value(), v2.as_f64_value(), |a, b| a + b).expect("abs expr: non-numeric const")),
                    *r,
                )
            } else if let AbsSymExpr::Const(v3) = *r {
                abs_ex_add(
                    AbsSymExpr::known(fold_numeric(v1.as_f64_value(), v3.as_f64_value(), |a, b| a + b).expect("abs expr: non-numeric const")),
                    *l,
                )
            } else {
                AbsSymExpr::Add(Box::new(AbsSymExpr::Const(v1)), Box::new(AbsSymExpr::Add(l, r)))
            }
        }
        (AbsSymExpr::Add(l, r), e3) => {
            if let AbsSymExpr::Const(v1) = *l {
                abs_ex_add(AbsSymExpr::Const(v1), abs_ex_add(*r, e3))
            } else {
                AbsSymExpr::Add(Box::new(AbsSymExpr::Add(l, r)), Box::new(e3))
            }
        }
        (AbsSymExpr::Const(v), e2) if is_zero(&v) => e2,
        (e1, AbsSymExpr::Const(v)) if is_zero(&v) => e1,
        (e1, e2) => AbsSymExpr::Add(Box::new(e1), Box::new(e2)),
    }
}

pub fn abs_ex_mul(e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
    if let Some(unk) = propagate_unknown(&[&e1, &e2]) {
        return unk;
    }
    match (e1, e2) {
        (AbsSymExpr::Const(AbsValue::Known(v1)), AbsSymExpr::Const(AbsValue::Known(v2))) => {
            AbsSymExpr::known(fold_numeric(&v1, &v2, |a, b| a * b).expect("abs_ex_mul: non-numeric const"))
        }
        (AbsSymExpr::Const(v1), AbsSymExpr::Mul(l, r)) => {
            if let AbsSymExpr::Const(v2) = *l {
                abs_ex_mul(
                    AbsSymExpr::known(fold_numeric(v1.as_f64_value(), v2.as_f64_value(), |a, b| a * b).expect("abs expr: non-numeric const")),
                    *r,
                )
            } else if let AbsSymExpr::Const(v3) = *r {
                abs_ex_mul(
                    AbsSymExpr::known(fold_numeric(v1.as_f64_value(), v3.as_f64_value(), |a, b| a * b).expect("abs expr: non-numeric const")),
                    *l,
                )
            } else {
                AbsSymExpr::Mul(Box::new(AbsSymExpr::Const(v1)), Box::new(AbsSymExpr::Mul(l, r)))
            }
        }
        (AbsSymExpr::Const(v1), AbsSymExpr::Add(l, r)) => {
            if let AbsSymExpr::Const(v2) = *l {
                abs_ex_add(
                    AbsSymExpr::known(fold_numeric(v1.as_f64_value(), v2.as_f64_value(), |a, b| a * b).expect("abs expr: non-numeric const")),
                    abs_ex_mul(AbsSymExpr::Const(v1), *r),
                )
            } else {
                AbsSymExpr::Mul(Box::new(AbsSymExpr::Const(v1)), Box::new(AbsSymExpr::Add(l, r)))
            }
        }
        (AbsSymExpr::Const(v), _) if is_zero(&v) => AbsSymExpr::int(0),
        (_, AbsSymExpr::Const(v)) if is_zero(&v) => AbsSymExpr::int(0),
        (e1, e2) => AbsSymExpr::Mul(Box::new(e1), Box::new(e2)),
    }
}

pub fn abs_ex_div(e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
    if let Some(unk) = propagate_unknown(&[&e1, &e2]) {
        return unk;
    }
    match (e1, e2) {
        (AbsSymExpr::Const(AbsValue::Known(v1)), AbsSymExpr::Const(AbsValue::Known(v2))) => AbsSymExpr::float(
            v1.as_f64().expect("abs_ex_div: non-numeric const") / v2.as_f64().expect("abs_ex_div: non-numeric const"),
        ),
        (e1, AbsSymExpr::Const(v)) if is_one(&v) => e1,
        (e1, e2) => AbsSymExpr::Div(Box::new(e1), Box::new(e2)),
    }
}

pub fn abs_ex_ite(cond: AbsSymExpr, t: AbsSymExpr, f: AbsSymExpr) -> AbsSymExpr {
    if let Some(unk) = propagate_unknown(&[&cond, &t, &f]) {
        return unk;
    }
    match cond {
        AbsSymExpr::Const(AbsValue::Known(Value::Bool(true))) => t,
        AbsSymExpr::Const(AbsValue::Known(Value::Bool(false))) => f,
        cond => AbsSymExpr::Ite(Box::new(cond), Box::new(t), Box::new(f)),
    }
}

pub fn abs_ex_eq(e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
    if let Some(unk) = propagate_unknown(&[&e1, &e2]) {
        return unk;
    }
    match (e1, e2) {
        (AbsSymExpr::Const(AbsValue::Known(v1)), AbsSymExpr::Const(AbsValue::Known(v2))) => {
            AbsSymExpr::bool(v1 == v2)
        }
        (e1, e2) => AbsSymExpr::Eq(Box::new(e1), Box::new(e2)),
    }
}

pub fn abs_ex_lt(e1: AbsSymExpr, e2: AbsSymExpr) -> AbsSymExpr {
    if let Some(unk) = propagate_unknown(&[&e1, &e2]) {
        return unk;
    }
    match (e1, e2) {
        (AbsSymExpr::Const(AbsValue::Known(v1)), AbsSymExpr::Const(AbsValue::Known(v2))) => {
            AbsSymExpr::bool(v1.as_f64().unwrap() < v2.as_f64().unwrap())
        }
        (e1, e2) => AbsSymExpr::Lt(Box::new(e1), Box::new(e2)),
    }
}

/// Helper trait so `fold_numeric` can be called against an `AbsValue` known
/// to be `Known` without re-matching at every call site above.
trait KnownValue {
    fn as_f64_value(&self) -> &Value;
}

impl KnownValue for AbsValue {
    fn as_f64_value(&self) -> &Value {
        match self {
            AbsValue::Known(v) => v,
            AbsValue::Unknown => panic!("as_f64_value: called on AbsValue::Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_folds_known_constants() {
        assert_eq!(abs_ex_add(AbsSymExpr::int(2), AbsSymExpr::int(3)), AbsSymExpr::int(5));
    }

    #[test]
    fn add_with_unknown_collapses_to_unke() {
        let rv = AbsRandomVar::from_raw(1);
        let unk = abs_ex_add(AbsSymExpr::unknown(), AbsSymExpr::rv(rv));
        match unk {
            AbsSymExpr::UnkE(parents) => assert!(parents.contains(&rv)),
            other => panic!("expected UnkE, got {other}"),
        }
    }

    #[test]
    fn mul_annihilates_on_known_zero() {
        let rv = AbsRandomVar::from_raw(1);
        assert_eq!(abs_ex_mul(AbsSymExpr::int(0), AbsSymExpr::rv(rv)), AbsSymExpr::int(0));
    }

    #[test]
    fn ite_collapses_on_known_bool_cond() {
        let rv = AbsRandomVar::from_raw(1);
        let other = AbsRandomVar::from_raw(2);
        assert_eq!(
            abs_ex_ite(AbsSymExpr::bool(true), AbsSymExpr::rv(rv), AbsSymExpr::rv(other)),
            AbsSymExpr::rv(rv)
        );
    }
}
