//! Ground values carried by `Const`/`AbsConst` nodes, and `AbsValue`, the
//! abstract twin that adds `UnkC` (unknown constant) as a join-lattice top.

use std::fmt;

/// A concrete value a `SymExpr::Const` can carry: a closed enum over the
/// numeric/boolean/composite values the grammar actually produces.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Pair(Box<Value>, Box<Value>),
}

impl Value {
    /// Numeric view used by arithmetic smart constructors; integers are
    /// promoted to `f64` for folding, matching Python's numeric tower.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True if folding `self` against `other` should produce an `Int` rather
    /// than a `Float` (both operands are integral).
    pub fn both_int(&self, other: &Value) -> bool {
        matches!((self, other), (Value::Int(_), Value::Int(_)))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(es) => {
                write!(f, "[")?;
                for (i, e) in es.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Value::Pair(a, b) => write!(f, "({a}, {b})"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// The payload of an `AbsConst`: either a known ground value, or `UnkC`, the
/// join-lattice top for constants — produced whenever the abstract
/// interpreter cannot determine a value ahead of execution (e.g. a
/// `BetaBinomial`'s `n` when the surface program computes it from runtime
/// data).
#[derive(Clone, Debug, PartialEq)]
pub enum AbsValue {
    Known(Value),
    Unknown,
}

impl AbsValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AbsValue::Known(v) => v.as_f64(),
            AbsValue::Unknown => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbsValue::Known(v) => v.as_bool(),
            AbsValue::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, AbsValue::Unknown)
    }
}

impl fmt::Display for AbsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsValue::Known(v) => write!(f, "{v}"),
            AbsValue::Unknown => write!(f, "?"),
        }
    }
}

impl From<Value> for AbsValue {
    fn from(v: Value) -> Self {
        AbsValue::Known(v)
    }
}
