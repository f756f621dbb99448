//! Draws a concrete value from a fully-evaluated `SymDistr` (every parameter
//! already a `Const`). Used by `value`/`force` in every concrete strategy.
//!
//! The teacher and the rest of the retrieval pack depend only on `rand`
//! (not `rand_distr`), so sampling is implemented directly against
//! `rand::Rng` using standard textbook algorithms (Box-Muller for Normal,
//! Marsaglia-Tsang for Gamma, Knuth's product method for Poisson) rather
//! than pulling in a distributions crate for a handful of draws.

use crate::distr::SymDistr;
use crate::value::Value;
use rand::Rng;
use std::f64::consts::PI;

fn param(e: &crate::expr::SymExpr) -> f64 {
    e.as_const()
        .and_then(|v| v.as_f64())
        .expect("sampling: distribution parameter is not a constant; call eval_distr first")
}

fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Marsaglia-Tsang: `Gamma(shape, rate)` with rate (inverse scale), matching
/// this crate's `Gamma(a, b)` parameterisation (mean `a/b`).
fn sample_gamma(rng: &mut impl Rng, shape: f64, rate: f64) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.gen_range(0.0..1.0);
        return sample_gamma(rng, shape + 1.0, rate) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let mut x;
        let mut v;
        loop {
            x = standard_normal(rng);
            v = 1.0 + c * x;
            if v > 0.0 {
                break;
            }
        }
        v = v * v * v;
        let u: f64 = rng.gen_range(0.0..1.0);
        if u < 1.0 - 0.0331 * x * x * x * x || u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v / rate;
        }
    }
}

fn sample_beta(rng: &mut impl Rng, a: f64, b: f64) -> f64 {
    let x = sample_gamma(rng, a, 1.0);
    let y = sample_gamma(rng, b, 1.0);
    x / (x + y)
}

fn sample_poisson(rng: &mut impl Rng, lambda: f64) -> i64 {
    // Knuth's algorithm; fine for the moderate rates a symbolic PPL core
    // actually forces (large lambda would want a transformed-rejection
    // method instead).
    let l = (-lambda).exp();
    let mut k = 0i64;
    let mut p = 1.0;
    loop {
        k += 1;
        p *= rng.gen_range(0.0..1.0_f64);
        if p <= l {
            return k - 1;
        }
    }
}

fn sample_binomial(rng: &mut impl Rng, n: i64, p: f64) -> i64 {
    (0..n).filter(|_| rng.gen_range(0.0..1.0) < p).count() as i64
}

fn sample_negative_binomial(rng: &mut impl Rng, n: f64, p: f64) -> i64 {
    // Gamma-Poisson mixture: NegativeBinomial(n, p) = Poisson(Gamma(n, p/(1-p))).
    let rate = p / (1.0 - p).max(f64::EPSILON);
    let lambda = sample_gamma(rng, n, rate);
    sample_poisson(rng, lambda)
}

fn sample_student_t(rng: &mut impl Rng, mu: f64, tau2: f64, nu: f64) -> f64 {
    let z = standard_normal(rng);
    let chi2 = 2.0 * sample_gamma(rng, nu / 2.0, 1.0);
    let t = z / (chi2 / nu).sqrt();
    mu + tau2.sqrt() * t
}

/// Draw a value for `distr`. Every parameter must already be a `Const`
/// (call `eval_distr` first).
pub fn sample(rng: &mut impl Rng, distr: &SymDistr) -> Value {
    match distr {
        SymDistr::Normal(mu, var) => {
            let (mu, var) = (param(mu), param(var));
            Value::Float(mu + var.sqrt() * standard_normal(rng))
        }
        SymDistr::Bernoulli(p) => Value::Bool(rng.gen_range(0.0..1.0) < param(p)),
        SymDistr::Beta(a, b) => Value::Float(sample_beta(rng, param(a), param(b))),
        SymDistr::Binomial(n, p) => Value::Int(sample_binomial(rng, param(n) as i64, param(p))),
        SymDistr::BetaBinomial(n, a, b) => {
            let p = sample_beta(rng, param(a), param(b));
            Value::Int(sample_binomial(rng, param(n) as i64, p))
        }
        SymDistr::NegativeBinomial(n, p) => {
            Value::Int(sample_negative_binomial(rng, param(n), param(p)))
        }
        SymDistr::Gamma(a, b) => Value::Float(sample_gamma(rng, param(a), param(b))),
        SymDistr::Poisson(l) => Value::Int(sample_poisson(rng, param(l))),
        SymDistr::StudentT(mu, tau2, nu) => {
            Value::Float(sample_student_t(rng, param(mu), param(tau2), param(nu)))
        }
        SymDistr::Categorical(lo, hi, probs) => {
            let lo = param(lo) as i64;
            let hi = param(hi) as i64;
            let probs = match probs.as_const() {
                Some(Value::List(ps)) => ps.iter().map(|p| p.as_f64().unwrap()).collect::<Vec<_>>(),
                _ => panic!("sampling: Categorical probs is not a constant list"),
            };
            let u: f64 = rng.gen_range(0.0..1.0);
            let mut cum = 0.0;
            for (i, p) in probs.iter().enumerate() {
                cum += p;
                if u < cum {
                    return Value::Int(lo + i as i64);
                }
            }
            Value::Int(hi)
        }
        SymDistr::Delta(v, _) => v.as_const().cloned().expect("sampling: Delta value is not a constant"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn bernoulli_respects_extremes() {
        let mut rng = StdRng::seed_from_u64(0);
        let always_true = SymDistr::Bernoulli(crate::expr::SymExpr::float(1.0));
        for _ in 0..20 {
            assert_eq!(sample(&mut rng, &always_true), Value::Bool(true));
        }
        let always_false = SymDistr::Bernoulli(crate::expr::SymExpr::float(0.0));
        for _ in 0..20 {
            assert_eq!(sample(&mut rng, &always_false), Value::Bool(false));
        }
    }

    #[test]
    fn normal_mean_is_approximately_right() {
        let mut rng = StdRng::seed_from_u64(42);
        let distr = SymDistr::Normal(crate::expr::SymExpr::float(5.0), crate::expr::SymExpr::float(1.0));
        let n = 20_000;
        let sum: f64 = (0..n)
            .map(|_| match sample(&mut rng, &distr) {
                Value::Float(v) => v,
                _ => unreachable!(),
            })
            .sum();
        assert!((sum / n as f64 - 5.0).abs() < 0.1);
    }
}
