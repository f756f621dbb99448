//! The three concrete inference strategies: Semi-Symbolic Inference (SSI),
//! Delayed Sampling (DS), and Belief Propagation (BP). Each specialises the
//! shared `SymState` with its own `assume`/`observe`/`value`/`marginalize`
//! and hoist algorithm.

pub mod bp;
pub mod ds;
pub mod ssi;

use crate::distr::SymDistr;
use crate::error::CoreResult;
use crate::identifier::{Annotation, Identifier};
use crate::state::{RandomVar, SymState};
use crate::value::Value;

/// Shared surface every concrete strategy exposes to a driver. `state`/
/// `state_mut` give access to the strategy-agnostic evaluator, accessors,
/// and `clean`.
pub trait SymStrategy {
    fn state(&self) -> &SymState;
    fn state_mut(&mut self) -> &mut SymState;

    fn assume(
        &mut self,
        name: Option<Identifier>,
        annotation: Option<Annotation>,
        distribution: SymDistr,
    ) -> RandomVar;

    fn observe(&mut self, rv: RandomVar, value: Value) -> CoreResult<()>;

    fn value(&mut self, rv: RandomVar) -> CoreResult<Value>;

    /// Ensure `rv`'s distribution references no other live `RandomVar`.
    fn marginalize(&mut self, rv: RandomVar) -> CoreResult<()>;
}
