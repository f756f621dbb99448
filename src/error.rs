//! Errors surfaced to the driver, and the internal control-flow signal used
//! by the hoist recovery loop.

use crate::abs_state::AbsRandomVar;
use crate::identifier::Identifier;
use crate::state::RandomVar;
use thiserror::Error;

/// Errors that can cross the boundary into the driver.
///
/// `NonConjugate` never appears here: it is caught and resolved internally by
/// forcing the offending variable (see [`crate::strategy::ssi`]).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A variable annotated `symbolic` was forced to a sampled `Delta`.
    #[error("{name} is annotated as symbolic but will be sampled")]
    RuntimeViolatedAnnotation { name: Identifier },

    /// A distribution-variant combination that the conjugate table does not
    /// recognise reached a context that assumed it would always succeed
    /// (e.g. `can_swap` said yes but the dispatch table had no arm). This is
    /// a programmer error in the core, not a user-program error.
    #[error("symbolic state invariant violated: {0}")]
    Invariant(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Internal signal raised by `hoist` when a swap needs a non-conjugate
/// parent to be forced before it can proceed. Always caught within the
/// strategy that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NonConjugate(pub(crate) RandomVar);

/// Abstract twin of `NonConjugate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AbsNonConjugate(pub(crate) AbsRandomVar);
