//! Abstract twin of [`crate::conjugate`]: the same six pairwise rewrites,
//! operating over `AbsSymExpr`/`AbsSymDistr` so that an unresolved
//! parameter (`UnkC`/`UnkE`) simply fails the structural match and falls
//! through to the next rule, the same way a non-matching shape does in the
//! concrete version. No rule here ever needs to special-case `UnkE`
//! explicitly: `as_const`/`is_const_int` already return `None` on it.

use crate::abs_distr::AbsSymDistr;
use crate::abs_expr::AbsSymExpr;
use crate::abs_state::{AbsRandomVar, AbsSymState};
use crate::value::Value;

pub fn is_scaled(state: &mut AbsSymState, expr: &AbsSymExpr, e: &AbsSymExpr) -> Option<AbsSymExpr> {
    if expr == e {
        return Some(AbsSymExpr::int(1));
    }
    match expr {
        AbsSymExpr::Const(_) | AbsSymExpr::RandomVar(_) | AbsSymExpr::UnkE(_) => None,
        AbsSymExpr::Add(e1, e2) => {
            let s1 = is_scaled(state, e1, e)?;
            let s2 = is_scaled(state, e2, e)?;
            Some(state.ex_add(s1, s2))
        }
        AbsSymExpr::Mul(e1, e2) => {
            let s1 = is_scaled(state, e1, e);
            let s2 = is_scaled(state, e2, e);
            match (s1, s2) {
                (None, None) => None,
                (None, Some(s2)) => Some(state.ex_mul(s2, (**e1).clone())),
                (Some(s1), None) => Some(state.ex_mul(s1, (**e2).clone())),
                (Some(s1), Some(s2)) => Some(state.ex_mul(s1, s2)),
            }
        }
        AbsSymExpr::Div(e1, e2) => {
            let s1 = is_scaled(state, e1, e);
            let s2 = is_scaled(state, e2, e);
            match (s1, s2) {
                (Some(_), Some(_)) => None,
                (None, Some(s2)) => Some(state.ex_div((**e1).clone(), s2)),
                (Some(s1), None) => Some(state.ex_div(s1, (**e2).clone())),
                (None, None) => None,
            }
        }
        AbsSymExpr::Ite(..)
        | AbsSymExpr::Eq(..)
        | AbsSymExpr::Lt(..)
        | AbsSymExpr::Lst(_)
        | AbsSymExpr::Pair(..) => None,
    }
}

pub fn abs_is_affine(
    state: &mut AbsSymState,
    expr: &AbsSymExpr,
    rv: AbsRandomVar,
) -> Option<(AbsSymExpr, AbsSymExpr)> {
    match expr {
        AbsSymExpr::Const(_) | AbsSymExpr::UnkE(_) => Some((AbsSymExpr::int(0), expr.clone())),
        AbsSymExpr::RandomVar(other) => {
            if *other == rv {
                Some((AbsSymExpr::int(1), AbsSymExpr::int(0)))
            } else {
                Some((AbsSymExpr::int(0), expr.clone()))
            }
        }
        AbsSymExpr::Add(e1, e2) => {
            let (a1, b1) = abs_is_affine(state, e1, rv)?;
            let (a2, b2) = abs_is_affine(state, e2, rv)?;
            Some((state.ex_add(a1, a2), state.ex_add(b1, b2)))
        }
        AbsSymExpr::Mul(e1, e2) => {
            let (a1, b1) = abs_is_affine(state, e1, rv)?;
            let (a2, b2) = abs_is_affine(state, e2, rv)?;
            let ea1 = state.eval(&a1);
            let ea2 = state.eval(&a2);
            match (is_zero(&ea1), is_zero(&ea2)) {
                (true, true) => Some((AbsSymExpr::int(0), state.ex_mul(b1, b2))),
                (false, true) => Some((state.ex_mul(ea1, b2), state.ex_mul(b1, b2))),
                (true, false) => Some((state.ex_mul(b1, ea2), state.ex_mul(b1, b2))),
                (false, false) => None,
            }
        }
        AbsSymExpr::Div(e1, e2) => {
            let (a1, b1) = abs_is_affine(state, e1, rv)?;
            let (_a2, b2) = abs_is_affine(state, e2, rv)?;
            let ea2 = state.eval(&_a2);
            if is_zero(&ea2) {
                Some((state.ex_div(a1, b2.clone()), state.ex_div(b1, b2)))
            } else {
                None
            }
        }
        AbsSymExpr::Ite(..)
        | AbsSymExpr::Eq(..)
        | AbsSymExpr::Lt(..)
        | AbsSymExpr::Lst(_)
        | AbsSymExpr::Pair(..) => None,
    }
}

fn is_zero(e: &AbsSymExpr) -> bool {
    matches!(e.as_const().and_then(|v| v.as_f64()), Some(x) if x == 0.0)
}

fn is_const_int(e: &AbsSymExpr) -> Option<i64> {
    match e.as_const()? {
        crate::value::AbsValue::Known(Value::Int(i)) => Some(*i),
        crate::value::AbsValue::Known(Value::Float(f)) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

pub fn gaussian_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    let (prior, likelihood) = (state.distr(par).clone(), state.distr(child).clone());
    let (mu0, var0, mu, var) = match (&prior, &likelihood) {
        (AbsSymDistr::Normal(mu0, var0), AbsSymDistr::Normal(mu, var)) => {
            (mu0.clone(), var0.clone(), mu.clone(), var.clone())
        }
        _ => return None,
    };
    let (a, b) = abs_is_affine(state, &mu, par)?;
    if state.depends_on(&mu0, child, true)
        || state.depends_on(&var0, child, true)
        || state.depends_on(&var, par, true)
    {
        return None;
    }

    let mu01 = state.ex_add(state.ex_mul(a.clone(), mu0), b.clone());
    let var01 = state.ex_mul(state.ex_mul(a.clone(), a.clone()), var0);

    let denom = state.ex_add(
        state.ex_div(AbsSymExpr::int(1), var01.clone()),
        state.ex_div(AbsSymExpr::int(1), var.clone()),
    );
    let var02 = state.ex_div(AbsSymExpr::int(1), denom);

    let sum1 = state.ex_add(
        state.ex_div(mu01.clone(), var01.clone()),
        state.ex_div(AbsSymExpr::rv(child), var.clone()),
    );
    let mu02 = state.ex_mul(sum1, var02.clone());

    let mu1_new = state.ex_div(state.ex_add(mu02, state.ex_mul(AbsSymExpr::int(-1), b)), a.clone());
    let var1_new = state.ex_div(var02, state.ex_mul(a.clone(), a));

    let mu0_new = mu01;
    let var0_new = state.ex_add(var01, var);

    Some((
        AbsSymDistr::Normal(mu0_new, var0_new),
        AbsSymDistr::Normal(mu1_new, var1_new),
    ))
}

pub fn bernoulli_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    let (prior, likelihood) = (state.distr(par).clone(), state.distr(child).clone());
    let (p1, p2) = match (&prior, &likelihood) {
        (AbsSymDistr::Bernoulli(p1), AbsSymDistr::Bernoulli(p2)) => (p1.clone(), p2.clone()),
        _ => return None,
    };
    if !state.depends_on(&p2, par, false) || state.depends_on(&p1, child, true) {
        return None;
    }

    let p2_new = state.ex_add(
        state.ex_mul(p1.clone(), p2.subst_rv(par, &AbsSymExpr::bool(true))),
        state.ex_mul(
            state.ex_add(AbsSymExpr::int(1), state.ex_mul(AbsSymExpr::int(-1), p1.clone())),
            p2.subst_rv(par, &AbsSymExpr::bool(false)),
        ),
    );

    let p1_num_sub = state.ex_ite(
        AbsSymExpr::rv(child),
        p2.clone(),
        state.ex_add(AbsSymExpr::int(1), state.ex_mul(AbsSymExpr::int(-1), p2.clone())),
    );
    let p1_num = state.ex_mul(p1, p1_num_sub.subst_rv(par, &AbsSymExpr::bool(true)));
    let p1_denom = state.ex_ite(
        AbsSymExpr::rv(child),
        p2_new.clone(),
        state.ex_add(AbsSymExpr::int(1), state.ex_mul(AbsSymExpr::int(-1), p2_new.clone())),
    );
    let p1_new = state.ex_div(p1_num, p1_denom);

    Some((AbsSymDistr::Bernoulli(p2_new), AbsSymDistr::Bernoulli(p1_new)))
}

pub fn beta_bernoulli_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    let (prior, likelihood) = (state.distr(par).clone(), state.distr(child).clone());
    let (a, b, p) = match (&prior, &likelihood) {
        (AbsSymDistr::Beta(a, b), AbsSymDistr::Bernoulli(p)) => (a.clone(), b.clone(), p.clone()),
        _ => return None,
    };
    if p != AbsSymExpr::rv(par) || state.depends_on(&a, child, true) || state.depends_on(&b, child, true) {
        return None;
    }

    let p_new = state.ex_div(a.clone(), state.ex_add(a.clone(), b.clone()));
    let a_new = state.ex_add(a, state.ex_ite(AbsSymExpr::rv(child), AbsSymExpr::int(1), AbsSymExpr::int(0)));
    let b_new = state.ex_add(b, state.ex_ite(AbsSymExpr::rv(child), AbsSymExpr::int(0), AbsSymExpr::int(1)));

    Some((AbsSymDistr::Bernoulli(p_new), AbsSymDistr::Beta(a_new, b_new)))
}

/// As in the concrete version, the returned marginal keeps the unupdated
/// prior `(n, a, b)` rather than the posterior. Preserved verbatim.
pub fn beta_binomial_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    let (prior, likelihood) = (state.distr(par).clone(), state.distr(child).clone());
    let (a, b, n, p) = match (&prior, &likelihood) {
        (AbsSymDistr::Beta(a, b), AbsSymDistr::Binomial(n, p)) => (a.clone(), b.clone(), n.clone(), p.clone()),
        _ => return None,
    };
    let n_val = is_const_int(&n)?;
    if is_const_int(&a).is_none() || p != AbsSymExpr::rv(par) {
        return None;
    }
    if state.depends_on(&a, child, true) || state.depends_on(&b, child, true) {
        return None;
    }

    let a_new = state.ex_add(a.clone(), AbsSymExpr::rv(child));
    let b_new = state.ex_add(
        b.clone(),
        state.ex_add(AbsSymExpr::int(n_val), state.ex_mul(AbsSymExpr::int(-1), AbsSymExpr::rv(child))),
    );

    Some((AbsSymDistr::BetaBinomial(n, a, b), AbsSymDistr::Beta(a_new, b_new)))
}

pub fn gamma_poisson_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    let (prior, likelihood) = (state.distr(par).clone(), state.distr(child).clone());
    let (a, b, l) = match (&prior, &likelihood) {
        (AbsSymDistr::Gamma(a, b), AbsSymDistr::Poisson(l)) => (a.clone(), b.clone(), l.clone()),
        _ => return None,
    };
    let a_val = is_const_int(&a)?;
    if l != AbsSymExpr::rv(par) || state.depends_on(&b, child, true) {
        return None;
    }

    let n_new = AbsSymExpr::int(a_val);
    let p_new = state.ex_div(b.clone(), state.ex_add(AbsSymExpr::int(1), b.clone()));

    let a_new = state.ex_add(a, AbsSymExpr::rv(child));
    let b_new = state.ex_add(b, AbsSymExpr::int(1));

    Some((AbsSymDistr::NegativeBinomial(n_new, p_new), AbsSymDistr::Gamma(a_new, b_new)))
}

pub fn gamma_normal_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    let (prior, likelihood) = (state.distr(par).clone(), state.distr(child).clone());
    let (a, b, mu, var) = match (&prior, &likelihood) {
        (AbsSymDistr::Gamma(a, b), AbsSymDistr::Normal(mu, var)) => {
            (a.clone(), b.clone(), mu.clone(), var.clone())
        }
        _ => return None,
    };
    let mu_val = mu.as_const().and_then(|v| v.as_f64())?;
    let expected_var = state.ex_div(AbsSymExpr::int(1), AbsSymExpr::rv(par));
    if var != expected_var || state.depends_on(&a, child, true) || state.depends_on(&b, child, true) {
        return None;
    }

    let tau2 = state.ex_div(b.clone(), a.clone());
    let nu = state.ex_mul(AbsSymExpr::int(2), a.clone());

    let a_new = state.ex_add(a, AbsSymExpr::float(0.5));
    let b_inner = state.ex_add(AbsSymExpr::rv(child), AbsSymExpr::float(-mu_val));
    let b_new = state.ex_add(b, state.ex_mul(AbsSymExpr::float(0.5), state.ex_mul(b_inner.clone(), b_inner)));

    Some((AbsSymDistr::StudentT(mu, tau2, nu), AbsSymDistr::Gamma(a_new, b_new)))
}

/// Preserves the same verbatim oddity as [`crate::conjugate::normal_inverse_gamma_normal_conjugate`]:
/// the `b_new` update multiplies by `lam / (lam / 1)` where `lam + 1` looks
/// intended. Do not "fix" without revisiting both twins together.
pub fn normal_inverse_gamma_normal_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    let (prior, likelihood) = (state.distr(par).clone(), state.distr(child).clone());
    let (mu0, var1, mu, var2) = match (&prior, &likelihood) {
        (AbsSymDistr::Normal(mu0, var1), AbsSymDistr::Normal(mu, var2)) => {
            (mu0.clone(), var1.clone(), mu.clone(), var2.clone())
        }
        _ => return None,
    };

    let var2_inner = match &var2 {
        AbsSymExpr::Div(one, inner) if matches!(one.as_const(), Some(crate::value::AbsValue::Known(Value::Int(1)))) => {
            match inner.as_ref() {
                AbsSymExpr::RandomVar(rv) => *rv,
                _ => return None,
            }
        }
        _ => return None,
    };
    let (a, b) = match state.distr(var2_inner).clone() {
        AbsSymDistr::Gamma(a, b) => (a, b),
        _ => return None,
    };

    let k = is_scaled(state, &var1, &var2)?;
    let k_eval = state.eval(&k);
    if is_zero(&k_eval) {
        return None;
    }
    let lam = state.ex_div(AbsSymExpr::int(1), k_eval);

    let mu0_val = mu0.as_const().and_then(|v| v.as_f64())?;
    if mu != AbsSymExpr::rv(par) || state.depends_on(&mu0, child, true) || state.depends_on(&var1, child, true) {
        return None;
    }

    let mu0_new = state.ex_div(
        state.ex_add(state.ex_mul(lam.clone(), mu0.clone()), AbsSymExpr::rv(child)),
        state.ex_add(lam.clone(), AbsSymExpr::int(1)),
    );
    let lam_new = state.ex_add(lam.clone(), AbsSymExpr::int(1));

    let a_new = state.ex_add(a.clone(), AbsSymExpr::float(0.5));
    let b_inner = state.ex_add(AbsSymExpr::rv(child), AbsSymExpr::float(-mu0_val));
    let lam_over_lam_over_one = state.ex_div(lam.clone(), state.ex_div(lam.clone(), AbsSymExpr::int(1)));
    let b_new = state.ex_add(
        b.clone(),
        state.ex_mul(
            lam_over_lam_over_one,
            state.ex_div(state.ex_mul(b_inner.clone(), b_inner), AbsSymExpr::int(2)),
        ),
    );

    state
        .set_distr(var2_inner, AbsSymDistr::Gamma(a_new, b_new))
        .expect("normal_inverse_gamma_normal_conjugate: updating precision node violated an annotation");

    let var_new = state.ex_div(AbsSymExpr::int(1), state.ex_mul(lam_new, AbsSymExpr::rv(var2_inner)));

    let mu_new = mu0.clone();
    let tau2_new = state.ex_div(
        state.ex_mul(b, state.ex_add(lam.clone(), AbsSymExpr::int(1))),
        state.ex_mul(a.clone(), lam),
    );
    let nu_new = state.ex_mul(AbsSymExpr::int(2), a);

    Some((
        AbsSymDistr::StudentT(mu_new, tau2_new, nu_new),
        AbsSymDistr::Normal(mu0_new, var_new),
    ))
}

/// Dispatch by shape, same fixed order as the concrete table. `UnkD` never
/// matches any arm and falls through to `None`, which is correct: an
/// already-unknown parent or child cannot be conjugate-updated, only forced.
pub fn try_conjugate(
    state: &mut AbsSymState,
    par: AbsRandomVar,
    child: AbsRandomVar,
) -> Option<(AbsSymDistr, AbsSymDistr)> {
    match (state.distr(par), state.distr(child)) {
        (AbsSymDistr::Normal(..), AbsSymDistr::Normal(..)) => gaussian_conjugate(state, par, child)
            .or_else(|| normal_inverse_gamma_normal_conjugate(state, par, child)),
        (AbsSymDistr::Bernoulli(_), AbsSymDistr::Bernoulli(_)) => bernoulli_conjugate(state, par, child),
        (AbsSymDistr::Beta(..), AbsSymDistr::Bernoulli(_)) => beta_bernoulli_conjugate(state, par, child),
        (AbsSymDistr::Beta(..), AbsSymDistr::Binomial(..)) => beta_binomial_conjugate(state, par, child),
        (AbsSymDistr::Gamma(..), AbsSymDistr::Poisson(_)) => gamma_poisson_conjugate(state, par, child),
        (AbsSymDistr::Gamma(..), AbsSymDistr::Normal(..)) => gamma_normal_conjugate(state, par, child),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn beta_bernoulli_conjugate_matches_on_shape() {
        let mut s = AbsSymState::new();
        let par = s.new_var();
        s.insert(par, HashSet::new(), AbsSymDistr::Beta(AbsSymExpr::int(1), AbsSymExpr::int(1)));
        let child = s.new_var();
        s.insert(child, HashSet::new(), AbsSymDistr::Bernoulli(AbsSymExpr::rv(par)));
        let result = beta_bernoulli_conjugate(&mut s, par, child);
        assert!(matches!(result, Some((AbsSymDistr::Bernoulli(_), AbsSymDistr::Beta(_, _)))));
    }

    #[test]
    fn gaussian_conjugate_fails_when_mean_depends_on_unknown_var() {
        let mut s = AbsSymState::new();
        let unk = s.new_var();
        s.insert(unk, HashSet::new(), AbsSymDistr::UnkD([].into_iter().collect()));
        let par = s.new_var();
        s.insert(
            par,
            HashSet::new(),
            AbsSymDistr::Normal(AbsSymExpr::rv(unk), AbsSymExpr::int(1)),
        );
        let child = s.new_var();
        s.insert(
            child,
            HashSet::new(),
            AbsSymDistr::Normal(AbsSymExpr::rv(par), AbsSymExpr::int(1)),
        );
        // mu of the child is exactly `par`, so is_affine succeeds; the rule
        // still applies since mu0/var0/var don't depend on child.
        assert!(gaussian_conjugate(&mut s, par, child).is_some());
    }

    #[test]
    fn try_conjugate_returns_none_for_non_conjugate_shapes() {
        let mut s = AbsSymState::new();
        let par = s.new_var();
        s.insert(par, HashSet::new(), AbsSymDistr::Poisson(AbsSymExpr::float(1.0)));
        let child = s.new_var();
        s.insert(child, HashSet::new(), AbsSymDistr::Bernoulli(AbsSymExpr::float(0.5)));
        assert!(try_conjugate(&mut s, par, child).is_none());
    }
}
