//! Interfaces to the external collaborators: the schema (type) graph, the
//! type-inference pass, the persisted rule store, and the data store the
//! materialiser reads and writes through.
//!
//! The reasoning core never owns schema or data state. Everything it needs
//! from the surrounding database is expressed as one of the traits below,
//! implemented by the enclosing transaction machinery (or by the in-memory
//! fixtures under `tests/`).

use serde::{Deserialize, Serialize};

use crate::common::{Label, ThingId, Value, ValueType};
use crate::error::{LogicResult, StoreError};
use crate::pattern::{Conjunction, Constraint, Pattern, TypeAnnotations};

// ---------------------------------------------------------------------------
// Schema graph
// ---------------------------------------------------------------------------

/// Read access to the type graph.
pub trait SchemaTypes: Send + Sync {
    /// The label itself plus all of its transitive subtypes. For a scoped
    /// role label, sub-roles of specializing relation types are included.
    fn subtype_labels(&self, label: &Label) -> Vec<Label>;

    /// Whether the type is declared abstract (cannot be instantiated).
    fn is_abstract(&self, label: &Label) -> bool;

    /// Resolve a role by name on a relation type, returning the scoped role
    /// label (`employment` + `"employee"` -> `employment:employee`).
    fn relates(&self, relation_type: &Label, role_name: &str) -> Option<Label>;

    /// The declared value type of an attribute type, if it is one.
    fn value_type(&self, attribute_type: &Label) -> Option<ValueType>;
}

/// The external type-inference pass: annotates each variable of a
/// conjunction with its possible types. A variable annotated with an empty
/// set makes the conjunction unsatisfiable.
pub trait TypeAnnotator: Send + Sync {
    fn annotate(&self, conjunction: &Conjunction) -> LogicResult<TypeAnnotations>;
}

// ---------------------------------------------------------------------------
// Rule store
// ---------------------------------------------------------------------------

/// Persisted rule structures and the incrementally-maintained
/// "rules concluding type T" indices.
pub trait RuleStore: Send + Sync {
    fn put(&self, structure: &RuleStructure) -> LogicResult<()>;
    fn get(&self, label: &str) -> LogicResult<Option<RuleStructure>>;
    fn delete(&self, label: &str) -> LogicResult<()>;
    fn all(&self) -> Vec<RuleStructure>;

    fn index_concluding_type(&self, type_label: &Label, rule_label: &str);
    fn unindex_concluding_type(&self, type_label: &Label, rule_label: &str);
    fn rules_concluding_type(&self, type_label: &Label) -> Vec<String>;

    fn index_concluding_has(&self, attribute_type: &Label, rule_label: &str);
    fn unindex_concluding_has(&self, attribute_type: &Label, rule_label: &str);
    fn rules_concluding_has(&self, attribute_type: &Label) -> Vec<String>;

    /// Remove the rule's entries from every concluding-type index,
    /// whichever types they were registered under.
    fn unindex_rule(&self, rule_label: &str);
}

/// The persisted form of a rule, as stored in the schema store. The `when`
/// pattern is normalized by `Rule::new`; `then` is the raw conclusion
/// conjunction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStructure {
    pub label: String,
    pub when: Pattern,
    pub then: Vec<Constraint>,
}

impl RuleStructure {
    pub fn new(label: impl Into<String>, when: Pattern, then: Vec<Constraint>) -> Self {
        Self {
            label: label.into(),
            when,
            then,
        }
    }

    /// Parse a rule structure from JSON.
    pub fn from_json(json: &str) -> LogicResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            StoreError::Serialization {
                message: format!("JSON parse error: {e}"),
            }
            .into()
        })
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> LogicResult<String> {
        serde_json::to_string(self).map_err(|e| {
            StoreError::Serialization {
                message: format!("JSON encode error: {e}"),
            }
            .into()
        })
    }
}

// ---------------------------------------------------------------------------
// Data store
// ---------------------------------------------------------------------------

/// An ownership edge between an owner and an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub inferred: bool,
}

/// Read/write access to stored things, scoped to the enclosing transaction.
///
/// Reads back a lazy candidate sequence for the materialiser's
/// existing-relation search; writes are conditional inserts that mark new
/// facts as inferred. Not thread-safe: the transaction's write-isolation
/// discipline serializes concurrent materialization externally.
pub trait DataStore {
    /// Relations of the given type (or a subtype) containing at least the
    /// given role players, in storage order.
    fn relations_with_players(
        &self,
        relation_type: &Label,
        players: &[(Label, ThingId)],
    ) -> Box<dyn Iterator<Item = ThingId> + '_>;

    /// The full (role, player) edge list of a relation.
    fn role_players(&self, relation: ThingId) -> Vec<(Label, ThingId)>;

    fn is_inferred(&self, thing: ThingId) -> bool;

    fn type_of(&self, thing: ThingId) -> Option<Label>;

    /// The value of an attribute instance.
    fn attribute_value(&self, attribute: ThingId) -> Option<Value>;

    /// The ownership edge between owner and attribute, if any.
    fn ownership(&self, owner: ThingId, attribute: ThingId) -> Option<Ownership>;

    /// Insert a new relation of the given type with the given role-player
    /// edges (respecting multiplicity), marked inferred.
    fn insert_relation(&mut self, relation_type: &Label, players: &[(Label, ThingId)]) -> ThingId;

    /// Get or create the attribute instance with this exact value.
    fn put_attribute(&mut self, attribute_type: &Label, value: &Value) -> LogicResult<ThingId>;

    /// Create or overwrite the ownership edge with the given inferred flag.
    fn set_has(&mut self, owner: ThingId, attribute: ThingId, inferred: bool);
}
