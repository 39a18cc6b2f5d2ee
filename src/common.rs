//! Shared vocabulary for the reasoning core: variables, type labels,
//! attribute values, value predicates, and concept identities.
//!
//! Everything here is a plain, hashable value object — patterns,
//! concludables, and unifiers are built from these and must themselves be
//! usable as cache keys.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A pattern variable: named (written by the user) or anonymous (introduced
/// by normalization, e.g. the reserved conclusion slot or the hidden
/// attribute variable in `$x has age 10`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Var {
    Name(String),
    Anon(u32),
}

impl Var {
    /// A named variable, e.g. `Var::named("x")` for `$x`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// An anonymous variable with a normalization-assigned ordinal.
    pub fn anon(ordinal: u32) -> Self {
        Self::Anon(ordinal)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anon(_))
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Self::Name(_))
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "${name}"),
            Self::Anon(ordinal) => write!(f, "$_{ordinal}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Type labels
// ---------------------------------------------------------------------------

/// A schema type label. Role types are scoped by their relation type
/// (`employment:employee`); thing types are unscoped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub scope: Option<String>,
}

impl Label {
    /// An unscoped thing-type label.
    pub fn of(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    /// A role label scoped by its relation type.
    pub fn scoped(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    pub fn is_role(&self) -> bool {
        self.scope.is_some()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{scope}:{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute values
// ---------------------------------------------------------------------------

/// An attribute value. Longs and doubles compare across variants
/// (`1 == 1.0`); strings are case-sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    /// Milliseconds since the epoch.
    DateTime(i64),
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Boolean(b) => b.hash(state),
            Self::Long(l) => l.hash(state),
            Self::Double(d) => d.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::DateTime(t) => t.hash(state),
        }
    }
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Long(l) => Some(*l as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Whether a concrete `candidate` satisfies the constraint
    /// `<predicate> self`, where `self` is the constraint operand: the
    /// operand `1` with `Predicate::Gt` accepts `2` but not `0`.
    ///
    /// Longs and doubles coerce to a common numeric domain; all other
    /// cross-variant comparisons fail. `Like` treats the operand as a regex
    /// pattern, `Contains` as a substring, both against `candidate`.
    pub fn accepts(&self, predicate: Predicate, candidate: &Value) -> bool {
        let other = candidate;
        use std::cmp::Ordering;
        match predicate {
            Predicate::Like => match (self, other) {
                (Self::String(pattern), Self::String(s)) => regex::Regex::new(pattern)
                    .map(|re| re.is_match(s))
                    .unwrap_or(false),
                _ => false,
            },
            Predicate::Contains => match (self, other) {
                (Self::String(needle), Self::String(s)) => s.contains(needle.as_str()),
                _ => false,
            },
            _ => {
                let ordering = match (self, other) {
                    (Self::Boolean(a), Self::Boolean(b)) => b.cmp(a),
                    (Self::String(a), Self::String(b)) => b.cmp(a),
                    (Self::DateTime(a), Self::DateTime(b)) => b.cmp(a),
                    _ => match (self.as_f64(), other.as_f64()) {
                        (Some(a), Some(b)) => {
                            if b < a {
                                Ordering::Less
                            } else if b > a {
                                Ordering::Greater
                            } else {
                                Ordering::Equal
                            }
                        }
                        _ => return false,
                    },
                };
                match predicate {
                    Predicate::Eq => ordering == Ordering::Equal,
                    Predicate::Neq => ordering != Ordering::Equal,
                    Predicate::Gt => ordering == Ordering::Greater,
                    Predicate::Gte => ordering != Ordering::Less,
                    Predicate::Lt => ordering == Ordering::Less,
                    Predicate::Lte => ordering != Ordering::Greater,
                    Predicate::Like | Predicate::Contains => unreachable!(),
                }
            }
        }
    }
}

/// The declared value kind of an attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Long,
    Double,
    String,
    DateTime,
}

impl ValueType {
    /// Whether a concrete value may be stored under this value type.
    /// Longs widen losslessly into doubles; no other coercion is allowed.
    pub fn admits(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Boolean, Value::Boolean(_))
                | (Self::Long, Value::Long(_))
                | (Self::Double, Value::Double(_))
                | (Self::Double, Value::Long(_))
                | (Self::String, Value::String(_))
                | (Self::DateTime, Value::DateTime(_))
        )
    }
}

/// A value-comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Contains,
}

impl Predicate {
    /// Whether this operator can be satisfied by a rule-inferred value.
    ///
    /// A rule can only infer an equality, so `$x >= $y` and `$x <= $y` can
    /// be answered by mapping both sides onto the same inferred attribute,
    /// while `$x > $y` never can.
    pub fn compatible_with_inferred_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Gte | Self::Lte)
    }
}

// ---------------------------------------------------------------------------
// Concepts
// ---------------------------------------------------------------------------

/// Identity of a stored thing (entity, relation, or attribute instance).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ThingId(pub u64);

impl fmt::Display for ThingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A concept a variable can be bound to: a stored thing or a schema type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Concept {
    Thing(ThingId),
    Type(Label),
}

impl Concept {
    pub fn as_thing(&self) -> Option<ThingId> {
        match self {
            Self::Thing(id) => Some(*id),
            Self::Type(_) => None,
        }
    }

    pub fn as_type(&self) -> Option<&Label> {
        match self {
            Self::Type(label) => Some(label),
            Self::Thing(_) => None,
        }
    }
}

/// A binding of pattern variables to concepts.
pub type ConceptMap = BTreeMap<Var, Concept>;
