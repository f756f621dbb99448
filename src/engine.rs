//! Strategy-dispatch facade: picks SSI, DS, or BP, and concrete-or-abstract
//! family, from a single configuration value rather than requiring a driver
//! to name a concrete strategy type at every call site.

use crate::abs_distr::AbsSymDistr;
use crate::abs_state::{AbsRandomVar, AbsSymState};
use crate::abs_strategy::bp::AbsBpState;
use crate::abs_strategy::ds::AbsDsState;
use crate::abs_strategy::ssi::AbsSsiState;
use crate::abs_strategy::AbsSymStrategy;
use crate::distr::SymDistr;
use crate::error::CoreResult;
use crate::identifier::{Annotation, Identifier};
use crate::state::{RandomVar, SymState};
use crate::strategy::bp::BpState;
use crate::strategy::ds::DsState;
use crate::strategy::ssi::SsiState;
use crate::strategy::SymStrategy;
use crate::value::{AbsValue, Value};

/// Which hoist algorithm a driver asked for. Independent of whether it runs
/// concretely (sampling) or abstractly (predicting an `InferencePlan`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Ssi,
    Ds,
    Bp,
}

/// Construction-time knobs for running a program: how many particles to
/// track, the seed to thread through every particle's own `SymState`, and
/// which `Method` each particle's state uses.
#[derive(Clone, Copy, Debug)]
pub struct InferenceConfig {
    pub n_particles: usize,
    pub seed: Option<u64>,
    pub method: Method,
}

impl InferenceConfig {
    pub fn new(n_particles: usize, seed: Option<u64>, method: Method) -> Self {
        InferenceConfig { n_particles, seed, method }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig { n_particles: 1, seed: None, method: Method::Ssi }
    }
}

/// Concrete strategy, chosen at runtime rather than at the call site's type.
/// Every `SymStrategy` call is forwarded to whichever variant was built.
pub enum AnyStrategy {
    Ssi(SsiState),
    Ds(DsState),
    Bp(BpState),
}

impl AnyStrategy {
    pub fn new(method: Method, seed: Option<u64>) -> Self {
        match method {
            Method::Ssi => AnyStrategy::Ssi(SsiState::with_seed(seed)),
            Method::Ds => AnyStrategy::Ds(DsState::with_seed(seed)),
            Method::Bp => AnyStrategy::Bp(BpState::with_seed(seed)),
        }
    }
}

impl Clone for AnyStrategy {
    fn clone(&self) -> Self {
        match self {
            AnyStrategy::Ssi(s) => AnyStrategy::Ssi(s.clone()),
            AnyStrategy::Ds(s) => AnyStrategy::Ds(s.clone()),
            AnyStrategy::Bp(s) => AnyStrategy::Bp(s.clone()),
        }
    }
}

impl SymStrategy for AnyStrategy {
    fn state(&self) -> &SymState {
        match self {
            AnyStrategy::Ssi(s) => s.state(),
            AnyStrategy::Ds(s) => s.state(),
            AnyStrategy::Bp(s) => s.state(),
        }
    }

    fn state_mut(&mut self) -> &mut SymState {
        match self {
            AnyStrategy::Ssi(s) => s.state_mut(),
            AnyStrategy::Ds(s) => s.state_mut(),
            AnyStrategy::Bp(s) => s.state_mut(),
        }
    }

    fn assume(
        &mut self,
        name: Option<Identifier>,
        annotation: Option<Annotation>,
        distribution: SymDistr,
    ) -> RandomVar {
        match self {
            AnyStrategy::Ssi(s) => s.assume(name, annotation, distribution),
            AnyStrategy::Ds(s) => s.assume(name, annotation, distribution),
            AnyStrategy::Bp(s) => s.assume(name, annotation, distribution),
        }
    }

    fn observe(&mut self, rv: RandomVar, value: Value) -> CoreResult<()> {
        match self {
            AnyStrategy::Ssi(s) => s.observe(rv, value),
            AnyStrategy::Ds(s) => s.observe(rv, value),
            AnyStrategy::Bp(s) => s.observe(rv, value),
        }
    }

    fn value(&mut self, rv: RandomVar) -> CoreResult<Value> {
        match self {
            AnyStrategy::Ssi(s) => s.value(rv),
            AnyStrategy::Ds(s) => s.value(rv),
            AnyStrategy::Bp(s) => s.value(rv),
        }
    }

    fn marginalize(&mut self, rv: RandomVar) -> CoreResult<()> {
        match self {
            AnyStrategy::Ssi(s) => s.marginalize(rv),
            AnyStrategy::Ds(s) => s.marginalize(rv),
            AnyStrategy::Bp(s) => s.marginalize(rv),
        }
    }
}

/// Abstract twin of [`AnyStrategy`]: same dispatch, predicting an
/// `InferencePlan` instead of drawing values.
pub enum AnyAbsStrategy {
    Ssi(AbsSsiState),
    Ds(AbsDsState),
    Bp(AbsBpState),
}

impl AnyAbsStrategy {
    pub fn new(method: Method) -> Self {
        match method {
            Method::Ssi => AnyAbsStrategy::Ssi(AbsSsiState::new()),
            Method::Ds => AnyAbsStrategy::Ds(AbsDsState::new()),
            Method::Bp => AnyAbsStrategy::Bp(AbsBpState::new()),
        }
    }
}

impl AbsSymStrategy for AnyAbsStrategy {
    fn state(&self) -> &AbsSymState {
        match self {
            AnyAbsStrategy::Ssi(s) => s.state(),
            AnyAbsStrategy::Ds(s) => s.state(),
            AnyAbsStrategy::Bp(s) => s.state(),
        }
    }

    fn state_mut(&mut self) -> &mut AbsSymState {
        match self {
            AnyAbsStrategy::Ssi(s) => s.state_mut(),
            AnyAbsStrategy::Ds(s) => s.state_mut(),
            AnyAbsStrategy::Bp(s) => s.state_mut(),
        }
    }

    fn assume(
        &mut self,
        name: Option<Identifier>,
        annotation: Option<Annotation>,
        distribution: AbsSymDistr,
    ) -> AbsRandomVar {
        match self {
            AnyAbsStrategy::Ssi(s) => s.assume(name, annotation, distribution),
            AnyAbsStrategy::Ds(s) => s.assume(name, annotation, distribution),
            AnyAbsStrategy::Bp(s) => s.assume(name, annotation, distribution),
        }
    }

    fn observe(&mut self, rv: AbsRandomVar, value: AbsValue) -> CoreResult<()> {
        match self {
            AnyAbsStrategy::Ssi(s) => s.observe(rv, value),
            AnyAbsStrategy::Ds(s) => s.observe(rv, value),
            AnyAbsStrategy::Bp(s) => s.observe(rv, value),
        }
    }

    fn value(&mut self, rv: AbsRandomVar) -> CoreResult<AbsValue> {
        match self {
            AnyAbsStrategy::Ssi(s) => s.value(rv),
            AnyAbsStrategy::Ds(s) => s.value(rv),
            AnyAbsStrategy::Bp(s) => s.value(rv),
        }
    }

    fn marginalize(&mut self, rv: AbsRandomVar) -> CoreResult<()> {
        match self {
            AnyAbsStrategy::Ssi(s) => s.marginalize(rv),
            AnyAbsStrategy::Ds(s) => s.marginalize(rv),
            AnyAbsStrategy::Bp(s) => s.marginalize(rv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distr::SymDistr;
    use crate::expr::SymExpr;
    use crate::identifier::Identifier;

    #[test]
    fn config_selects_the_requested_method() {
        let cfg = InferenceConfig::new(4, Some(1), Method::Ds);
        let strat = AnyStrategy::new(cfg.method, cfg.seed);
        assert!(matches!(strat, AnyStrategy::Ds(_)));
    }

    #[test]
    fn facade_dispatches_assume_and_value_to_the_chosen_strategy() {
        let mut strat = AnyStrategy::new(Method::Bp, Some(42));
        let x = strat.assume(Some(Identifier::new("x")), None, SymDistr::Bernoulli(SymExpr::float(0.5)));
        let v = strat.value(x).unwrap();
        assert!(matches!(v, Value::Bool(_)));
    }

    #[test]
    fn abstract_facade_predicts_a_plan_entry() {
        let mut strat = AnyAbsStrategy::new(Method::Ssi);
        let x = strat.assume(Some(Identifier::new("x")), None, AbsSymDistr::Bernoulli(crate::abs_expr::AbsSymExpr::float(0.5)));
        strat.value(x).unwrap();
        assert_eq!(
            strat.state().plan.get(&Identifier::new("x")),
            Some(crate::plan::DistrEnc::Sample)
        );
    }
}
