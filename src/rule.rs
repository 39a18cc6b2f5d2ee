//! Rules: a validated condition in disjunctive normal form plus exactly one
//! conclusion.
//!
//! A rule is created from its persisted `RuleStructure`. Creation normalizes
//! the condition, recognizes the conclusion shape (relation, has-with-type,
//! or has-without-type), annotates both sides with the external
//! type-inference pass, and validates eagerly. A rule that survives
//! `Rule::new` is well-formed for the lifetime of the schema it was
//! validated against. The manager registers the concluded types in the rule
//! store's indices once the structure is persisted.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::common::{Label, Predicate, Value, Var};
use crate::concludable::Concludable;
use crate::error::{LogicError, LogicResult, RuleError};
use crate::pattern::{Conjunction, Constraint, Disjunction, Operand, TypeAnnotations};
use crate::schema::{RuleStore, RuleStructure, SchemaTypes, TypeAnnotator};

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// One satisfiable way of triggering the rule: a conjunction of positive
/// constraints with negated sub-disjunctions attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionBranch {
    pub conjunction: Conjunction,
}

impl ConditionBranch {
    /// The concludable fragments of the positive part of this branch.
    pub fn concludables(&self) -> Vec<Concludable> {
        Concludable::extract(&self.conjunction)
    }

    pub fn negations(&self) -> &[Disjunction] {
        &self.conjunction.negations
    }

    pub fn satisfiable(&self) -> bool {
        self.conjunction.annotations.satisfiable()
    }
}

/// The rule's condition: a disjunction of annotated branches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub branches: Vec<ConditionBranch>,
}

impl Condition {
    /// Branches that type inference did not rule out.
    pub fn live_branches(&self) -> impl Iterator<Item = &ConditionBranch> {
        self.branches.iter().filter(|b| b.satisfiable())
    }
}

// ---------------------------------------------------------------------------
// Conclusion
// ---------------------------------------------------------------------------

/// A (role, player) slot of a relation conclusion, with the role resolved
/// to its scoped label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcludedRolePlayer {
    pub role_var: Var,
    pub role_label: Label,
    pub player: Var,
}

/// `then { $r (employee: $x) isa employment; }`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationConclusion {
    pub relation: Var,
    pub type_var: Var,
    pub type_label: Label,
    pub players: Vec<ConcludedRolePlayer>,
}

/// Where a concluded attribute's value comes from: spelled out in the
/// conclusion, or bound by the condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueSource {
    Constant(Value),
    Variable(Var),
}

/// `then { $x has age 10; }` or `then { $x has age $a; }` — the attribute
/// type is named, so the concluded attribute can be created if absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HasWithTypeConclusion {
    pub owner: Var,
    pub attribute: Var,
    pub type_var: Var,
    pub attribute_type: Label,
    pub value: ValueSource,
}

/// `then { $x has $a; }` — the attribute variable is bound by the
/// condition, so only the ownership edge is concluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HasWithoutTypeConclusion {
    pub owner: Var,
    pub attribute: Var,
}

/// The single fact shape a rule concludes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conclusion {
    Relation(RelationConclusion),
    HasWithType(HasWithTypeConclusion),
    HasWithoutType(HasWithoutTypeConclusion),
}

impl Conclusion {
    pub fn as_relation(&self) -> Option<&RelationConclusion> {
        match self {
            Self::Relation(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn as_has_with_type(&self) -> Option<&HasWithTypeConclusion> {
        match self {
            Self::HasWithType(has) => Some(has),
            _ => None,
        }
    }

    pub fn as_has_without_type(&self) -> Option<&HasWithoutTypeConclusion> {
        match self {
            Self::HasWithoutType(has) => Some(has),
            _ => None,
        }
    }

    /// Every variable the conclusion binds or reads.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        match self {
            Self::Relation(rel) => {
                vars.insert(rel.relation.clone());
                vars.insert(rel.type_var.clone());
                for rp in &rel.players {
                    vars.insert(rp.role_var.clone());
                    vars.insert(rp.player.clone());
                }
            }
            Self::HasWithType(has) => {
                vars.insert(has.owner.clone());
                vars.insert(has.attribute.clone());
                vars.insert(has.type_var.clone());
                if let ValueSource::Variable(v) = &has.value {
                    vars.insert(v.clone());
                }
            }
            Self::HasWithoutType(has) => {
                vars.insert(has.owner.clone());
                vars.insert(has.attribute.clone());
            }
        }
        vars
    }

    /// Variables the conclusion reads from the condition answer (everything
    /// except the thing the conclusion itself creates).
    pub fn retrieved_variables(&self) -> BTreeSet<Var> {
        let mut vars = self.variables();
        match self {
            Self::Relation(rel) => {
                vars.remove(&rel.relation);
                vars.remove(&rel.type_var);
                for rp in &rel.players {
                    vars.remove(&rp.role_var);
                }
            }
            Self::HasWithType(has) => {
                vars.remove(&has.attribute);
                vars.remove(&has.type_var);
            }
            Self::HasWithoutType(_) => {}
        }
        vars
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A validated rule. Identity is the label: two rules with the same label
/// are the same rule, so `Rule` hashes and compares by label alone.
#[derive(Debug, Clone)]
pub struct Rule {
    label: String,
    structure: RuleStructure,
    condition: Condition,
    conclusion: Conclusion,
    then_annotations: TypeAnnotations,
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label.hash(state);
    }
}

impl Rule {
    /// Create a rule from its persisted structure: normalize, recognize the
    /// conclusion, annotate, and validate.
    pub fn new(
        structure: RuleStructure,
        schema: &dyn SchemaTypes,
        annotator: &dyn TypeAnnotator,
    ) -> LogicResult<Self> {
        let rule = Self::build(structure, schema, annotator)?;
        rule.validate(schema)?;
        info!(rule = %rule.label, "rule defined");
        Ok(rule)
    }

    /// Re-create a rule from an already-stored structure, deferring
    /// validation (used when reloading after a schema change).
    pub fn load(
        structure: RuleStructure,
        schema: &dyn SchemaTypes,
        annotator: &dyn TypeAnnotator,
    ) -> LogicResult<Self> {
        Self::build(structure, schema, annotator)
    }

    fn build(
        structure: RuleStructure,
        schema: &dyn SchemaTypes,
        annotator: &dyn TypeAnnotator,
    ) -> LogicResult<Self> {
        let label = structure.label.clone();

        let mut branches = Vec::new();
        for conjunction in structure.when.normalise().branches {
            let annotations = annotator.annotate(&conjunction)?;
            branches.push(ConditionBranch {
                conjunction: conjunction.with_annotations(annotations),
            });
        }
        let condition = Condition { branches };

        let conclusion = recognize_conclusion(&label, &structure.then, schema)?;

        let then_conjunction = Conjunction::new(structure.then.clone());
        let then_annotations = annotator.annotate(&then_conjunction)?;

        Ok(Self {
            label,
            structure,
            condition,
            conclusion,
            then_annotations,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn structure(&self) -> &RuleStructure {
        &self.structure
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn conclusion(&self) -> &Conclusion {
        &self.conclusion
    }

    pub fn then_annotations(&self) -> &TypeAnnotations {
        &self.then_annotations
    }

    /// Validate the rule against the current schema.
    pub fn validate(&self, schema: &dyn SchemaTypes) -> LogicResult<()> {
        self.validate_when_satisfiable()?;
        self.validate_then_satisfiable()?;
        self.validate_no_abstract_insert(schema)?;
        self.validate_value_type(schema)?;
        self.validate_insertable()?;
        Ok(())
    }

    /// Incoherent only when every branch is type-unsatisfiable; a dead
    /// branch among live ones is reported as a warning and skipped at
    /// compile time.
    fn validate_when_satisfiable(&self) -> LogicResult<()> {
        let live = self.condition.live_branches().count();
        if live == 0 {
            return Err(RuleError::WhenIncoherent {
                rule: self.label.clone(),
            }
            .into());
        }
        let dead = self.condition.branches.len() - live;
        if dead > 0 {
            warn!(rule = %self.label, dead, "condition has unanswerable branches");
        }
        Ok(())
    }

    fn validate_then_satisfiable(&self) -> LogicResult<()> {
        if !self.then_annotations.satisfiable() {
            return Err(RuleError::ThenIncoherent {
                rule: self.label.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn validate_no_abstract_insert(&self, schema: &dyn SchemaTypes) -> LogicResult<()> {
        let inserted: Vec<Label> = match &self.conclusion {
            Conclusion::Relation(rel) => {
                let mut labels = vec![rel.type_label.clone()];
                labels.extend(rel.players.iter().map(|rp| rp.role_label.clone()));
                labels
            }
            Conclusion::HasWithType(has) => vec![has.attribute_type.clone()],
            // Only an ownership edge is created; the attribute exists.
            Conclusion::HasWithoutType(_) => Vec::new(),
        };
        for label in inserted {
            if schema.is_abstract(&label) {
                return Err(RuleError::ThenInsertsAbstractTypes {
                    rule: self.label.clone(),
                    type_label: label.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn validate_value_type(&self, schema: &dyn SchemaTypes) -> LogicResult<()> {
        if let Conclusion::HasWithType(has) = &self.conclusion {
            if let ValueSource::Constant(value) = &has.value {
                let admits = schema
                    .value_type(&has.attribute_type)
                    .is_some_and(|vt| vt.admits(value));
                if !admits {
                    return Err(RuleError::ThenIllegalValueType {
                        rule: self.label.clone(),
                        attribute_type: has.attribute_type.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Every type the condition can produce for a variable shared with the
    /// conclusion must also be insertable by the conclusion. Insertability
    /// decomposes per variable, so the check is a per-variable subset test
    /// against the conclusion's annotations, per live branch.
    fn validate_insertable(&self) -> LogicResult<()> {
        let shared = self.conclusion.retrieved_variables();
        for branch in self.condition.live_branches() {
            for var in &shared {
                let Some(condition_types) = branch.conjunction.annotations.get(var) else {
                    continue;
                };
                if let Some(conclusion_types) = self.then_annotations.get(var) {
                    if !condition_types.is_subset(conclusion_types) {
                        return Err(RuleError::ConclusionIllegalInsert {
                            rule: self.label.clone(),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Register the concluded types in the rule store's indices.
    pub fn index(&self, store: &dyn RuleStore) {
        match &self.conclusion {
            Conclusion::Relation(rel) => {
                store.index_concluding_type(&rel.type_label, &self.label);
            }
            Conclusion::HasWithType(has) => {
                store.index_concluding_has(&has.attribute_type, &self.label);
                store.index_concluding_type(&has.attribute_type, &self.label);
            }
            Conclusion::HasWithoutType(has) => {
                if let Some(types) = self.then_annotations.get(&has.attribute) {
                    for attribute_type in types {
                        store.index_concluding_has(attribute_type, &self.label);
                    }
                }
            }
        }
    }

    /// Remove the rule from the concluding-type indices (on delete).
    pub fn unindex(&self, store: &dyn RuleStore) {
        match &self.conclusion {
            Conclusion::Relation(rel) => {
                store.unindex_concluding_type(&rel.type_label, &self.label);
            }
            Conclusion::HasWithType(has) => {
                store.unindex_concluding_has(&has.attribute_type, &self.label);
                store.unindex_concluding_type(&has.attribute_type, &self.label);
            }
            Conclusion::HasWithoutType(has) => {
                if let Some(types) = self.then_annotations.get(&has.attribute) {
                    for attribute_type in types {
                        store.unindex_concluding_has(attribute_type, &self.label);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conclusion recognition
// ---------------------------------------------------------------------------

/// Recognize the conclusion shape, trying relation, then has-with-type,
/// then has-without-type. Anything else slipped past upstream validation.
fn recognize_conclusion(
    rule: &str,
    then: &[Constraint],
    schema: &dyn SchemaTypes,
) -> LogicResult<Conclusion> {
    if let Some(conclusion) = recognize_relation(rule, then, schema)? {
        return Ok(Conclusion::Relation(conclusion));
    }
    if let Some(conclusion) = recognize_has(rule, then)? {
        return Ok(conclusion);
    }
    Err(LogicError::internal(format!(
        "conclusion of rule '{rule}' matched no recognized shape"
    )))
}

fn recognize_relation(
    rule: &str,
    then: &[Constraint],
    schema: &dyn SchemaTypes,
) -> LogicResult<Option<RelationConclusion>> {
    let Some((relation, inline_isa, players)) = then.iter().find_map(|c| match c {
        Constraint::Relation {
            relation,
            isa,
            players,
        } => Some((relation, isa.as_ref(), players)),
        _ => None,
    }) else {
        return Ok(None);
    };

    // The type may be spelled inline or as a separate isa on the relation
    // variable.
    let isa = inline_isa.cloned().or_else(|| {
        then.iter().find_map(|c| match c {
            Constraint::Isa { thing, isa } if thing == relation => Some(isa.clone()),
            _ => None,
        })
    });
    let Some(isa) = isa else {
        return Err(LogicError::internal(format!(
            "relation conclusion of rule '{rule}' has no type"
        )));
    };
    let Some(type_label) = isa.label.clone() else {
        return Err(LogicError::internal(format!(
            "relation conclusion of rule '{rule}' has a variable type"
        )));
    };

    let mut concluded = Vec::with_capacity(players.len());
    for rp in players {
        let Some(role) = &rp.role else {
            return Err(LogicError::internal(format!(
                "relation conclusion of rule '{rule}' has an unlabelled role"
            )));
        };
        let Some(written) = &role.label else {
            return Err(LogicError::internal(format!(
                "relation conclusion of rule '{rule}' has a variable role"
            )));
        };
        let role_label = if written.is_role() {
            written.clone()
        } else {
            schema
                .relates(&type_label, &written.name)
                .ok_or_else(|| RuleError::ThenIncoherent {
                    rule: rule.to_string(),
                })?
        };
        concluded.push(ConcludedRolePlayer {
            role_var: role.var.clone(),
            role_label,
            player: rp.player.clone(),
        });
    }

    Ok(Some(RelationConclusion {
        relation: relation.clone(),
        type_var: isa.var,
        type_label,
        players: concluded,
    }))
}

fn recognize_has(rule: &str, then: &[Constraint]) -> LogicResult<Option<Conclusion>> {
    let Some((owner, attribute)) = then.iter().find_map(|c| match c {
        Constraint::Has { owner, attribute } => Some((owner.clone(), attribute.clone())),
        _ => None,
    }) else {
        return Ok(None);
    };

    let attribute_isa = then.iter().find_map(|c| match c {
        Constraint::Isa { thing, isa } if *thing == attribute => {
            isa.label.clone().map(|label| (isa.var.clone(), label))
        }
        _ => None,
    });

    let Some((type_var, attribute_type)) = attribute_isa else {
        return Ok(Some(Conclusion::HasWithoutType(HasWithoutTypeConclusion {
            owner,
            attribute,
        })));
    };

    // A spelled-out value must be an equality; the attribute variable
    // itself carries the value when the condition binds it.
    let value = then.iter().find_map(|c| match c {
        Constraint::Value {
            owner: value_owner,
            predicate,
            operand,
        } if *value_owner == attribute => Some((*predicate, operand.clone())),
        _ => None,
    });
    let value = match value {
        Some((Predicate::Eq, Operand::Constant(v))) => ValueSource::Constant(v),
        Some((Predicate::Eq, Operand::Variable(v))) => ValueSource::Variable(v),
        Some((predicate, _)) => {
            return Err(LogicError::internal(format!(
                "has conclusion of rule '{rule}' assigns through {predicate:?}"
            )));
        }
        None => ValueSource::Variable(attribute.clone()),
    };

    Ok(Some(Conclusion::HasWithType(HasWithTypeConclusion {
        owner,
        attribute,
        type_var,
        attribute_type,
        value,
    })))
}
