//! Abstract twins of the three concrete inference strategies. Each predicts,
//! ahead of execution, which `DistrEnc` a program-visible name will end up
//! at, by running the identical hoist machinery over `AbsSymState` instead
//! of sampling concrete values.

pub mod bp;
pub mod ds;
pub mod ssi;

use crate::abs_distr::AbsSymDistr;
use crate::abs_state::{AbsRandomVar, AbsSymState};
use crate::error::CoreResult;
use crate::identifier::{Annotation, Identifier};
use crate::value::AbsValue;

/// Shared surface every abstract strategy exposes. `value` never draws a
/// concrete number: it always installs `Delta(UnkC, sampled=true)` and
/// returns `AbsValue::Unknown`, marking the forced variable's plan entry
/// `sample`.
pub trait AbsSymStrategy {
    fn state(&self) -> &AbsSymState;
    fn state_mut(&mut self) -> &mut AbsSymState;

    fn assume(
        &mut self,
        name: Option<Identifier>,
        annotation: Option<Annotation>,
        distribution: AbsSymDistr,
    ) -> AbsRandomVar;

    fn observe(&mut self, rv: AbsRandomVar, value: AbsValue) -> CoreResult<()>;

    fn value(&mut self, rv: AbsRandomVar) -> CoreResult<AbsValue>;

    fn marginalize(&mut self, rv: AbsRandomVar) -> CoreResult<()>;
}
