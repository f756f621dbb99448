//! The inference plan: a map from program-visible names to how each ended
//! up encoded, with join semantics shared by the runtime (across particles)
//! and the abstract analyser (across branches it could not resolve).

use crate::identifier::Identifier;
use std::collections::HashMap;
use std::fmt;

/// `Symbolic < Sample < Dynamic` in the join lattice: `Sample` dominates
/// `Symbolic`, `Dynamic` is the unconditional top.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DistrEnc {
    Symbolic,
    Sample,
    Dynamic,
}

impl DistrEnc {
    pub fn join(self, other: DistrEnc) -> DistrEnc {
        self.max(other)
    }
}

impl fmt::Display for DistrEnc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistrEnc::Symbolic => write!(f, "symbolic"),
            DistrEnc::Sample => write!(f, "sample"),
            DistrEnc::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// A mapping from user-named variables to their eventual encoding. Both the
/// runtime state (joined across particles) and the abstract analyser
/// produce one of these.
#[derive(Clone, Debug, Default)]
pub struct InferencePlan {
    entries: HashMap<Identifier, DistrEnc>,
}

impl InferencePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Identifier) -> Option<DistrEnc> {
        self.entries.get(name).copied()
    }

    /// Record `enc` for `name`, joining with anything already recorded
    /// rather than overwriting (a variable that was `sample` in one branch
    /// stays `sample` even if a later branch would have left it `symbolic`).
    pub fn mark(&mut self, name: Identifier, enc: DistrEnc) {
        self.entries
            .entry(name)
            .and_modify(|e| *e = e.join(enc))
            .or_insert(enc);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &DistrEnc)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Join two plans (e.g. across particles): every name present in either
    /// ends up present in the result, at the join of the two encodings.
    pub fn join(&self, other: &InferencePlan) -> InferencePlan {
        let mut out = self.clone();
        for (name, enc) in other.iter() {
            out.mark(name.clone(), *enc);
        }
        out
    }

    /// Does `self` over-approximate `ground` at every name `ground` names
    /// (`self[v] >= ground[v]`)? Used to check that a statically predicted
    /// plan never under-commits relative to what the runtime actually did.
    pub fn soundly_over_approximates(&self, ground: &InferencePlan) -> bool {
        ground
            .iter()
            .all(|(name, enc)| self.get(name).is_some_and(|abs_enc| abs_enc >= *enc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_dominates_symbolic() {
        assert_eq!(DistrEnc::Symbolic.join(DistrEnc::Sample), DistrEnc::Sample);
        assert_eq!(DistrEnc::Sample.join(DistrEnc::Symbolic), DistrEnc::Sample);
    }

    #[test]
    fn dynamic_is_top() {
        assert_eq!(DistrEnc::Dynamic.join(DistrEnc::Sample), DistrEnc::Dynamic);
        assert_eq!(DistrEnc::Dynamic.join(DistrEnc::Symbolic), DistrEnc::Dynamic);
    }

    #[test]
    fn mark_joins_rather_than_overwrites() {
        let mut plan = InferencePlan::new();
        let x = Identifier::new("x");
        plan.mark(x.clone(), DistrEnc::Symbolic);
        plan.mark(x.clone(), DistrEnc::Sample);
        assert_eq!(plan.get(&x), Some(DistrEnc::Sample));
    }
}
