//! Unification between a query concludable and a rule conclusion.
//!
//! A unifier maps each query variable onto the set of conclusion variables
//! it stands for, together with the requirements an answer pulled back
//! through the mapping must still satisfy (type membership, explicit isa,
//! value predicates). Unification is structural: it consults type
//! annotations and the schema's subtype closure, never stored data.
//! `Unifier::un_unify` is the runtime half: it projects a conclusion answer
//! back into query space, rejecting it when multi-mapped variables disagree
//! or a requirement fails.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::common::{Concept, ConceptMap, Label, Predicate, Value, Var};
use crate::concludable::{
    Concludable, HasConcludable, IsaConcludable, RelationConcludable, ValueConcludable,
};
use crate::pattern::{Operand, TypeAnnotations};
use crate::rule::{
    Conclusion, HasWithTypeConclusion, HasWithoutTypeConclusion, RelationConclusion, Rule,
    ValueSource,
};
use crate::schema::{DataStore, SchemaTypes};

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

/// Constraints a pulled-back answer must satisfy, keyed by query variable.
/// Emitted during unification wherever a query-side label or literal was
/// compared structurally rather than mapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirements {
    /// The concept's type must be one of these labels.
    pub types: BTreeMap<Var, BTreeSet<Label>>,
    /// The thing's type must be one of these labels (written `isa`).
    pub isa: BTreeMap<Var, BTreeSet<Label>>,
    /// The attribute's value must satisfy each predicate.
    pub predicates: BTreeMap<Var, Vec<(Predicate, Value)>>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.isa.is_empty() && self.predicates.is_empty()
    }

    fn satisfied_by(&self, answer: &ConceptMap, data: &dyn DataStore) -> bool {
        for (var, labels) in self.types.iter().chain(self.isa.iter()) {
            let Some(concept) = answer.get(var) else {
                return false;
            };
            let label = match concept {
                Concept::Type(label) => Some(label.clone()),
                Concept::Thing(id) => data.type_of(*id),
            };
            if !label.is_some_and(|l| labels.contains(&l)) {
                return false;
            }
        }
        for (var, predicates) in &self.predicates {
            let Some(id) = answer.get(var).and_then(Concept::as_thing) else {
                return false;
            };
            let Some(value) = data.attribute_value(id) else {
                return false;
            };
            if !predicates
                .iter()
                .all(|(predicate, operand)| operand.accepts(*predicate, &value))
            {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// A mapping from query variables onto sets of conclusion variables, plus
/// the requirements pulled-back answers must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unifier {
    mapping: BTreeMap<Var, BTreeSet<Var>>,
    requirements: Requirements,
}

impl Unifier {
    pub fn builder() -> UnifierBuilder {
        UnifierBuilder::default()
    }

    pub fn mapping(&self) -> &BTreeMap<Var, BTreeSet<Var>> {
        &self.mapping
    }

    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// All unifiers between a query concludable and a rule's conclusion.
    pub fn unify(
        concludable: &Concludable,
        rule: &Rule,
        schema: &dyn SchemaTypes,
    ) -> HashSet<Unifier> {
        Self::unify_with(
            concludable,
            rule.conclusion(),
            rule.then_annotations(),
            schema,
        )
    }

    /// As `unify`, against a bare conclusion and its type annotations.
    pub fn unify_with(
        concludable: &Concludable,
        conclusion: &Conclusion,
        conclusion_types: &TypeAnnotations,
        schema: &dyn SchemaTypes,
    ) -> HashSet<Unifier> {
        match (concludable, conclusion) {
            (Concludable::Isa(isa), Conclusion::Relation(rel)) => {
                unify_isa_relation(isa, rel, schema).into_iter().collect()
            }
            (Concludable::Isa(isa), Conclusion::HasWithType(has)) => {
                unify_isa_has(isa, has, schema).into_iter().collect()
            }
            (Concludable::Value(value), Conclusion::HasWithType(has)) => {
                unify_value_has(value, has).into_iter().collect()
            }
            (Concludable::Has(query), Conclusion::HasWithType(has)) => {
                unify_has_typed(query, has, conclusion_types, schema)
                    .into_iter()
                    .collect()
            }
            (Concludable::Has(query), Conclusion::HasWithoutType(has)) => {
                unify_has_untyped(query, has, conclusion_types, schema)
                    .into_iter()
                    .collect()
            }
            (Concludable::Relation(query), Conclusion::Relation(rel)) => {
                unify_relations(query, rel, conclusion_types, schema)
            }
            _ => HashSet::new(),
        }
    }

    /// Project a conclusion answer back into query space. `None` when a
    /// mapped conclusion variable is unbound, multi-mapped query variables
    /// disagree, or a requirement fails.
    pub fn un_unify(&self, rule_answer: &ConceptMap, data: &dyn DataStore) -> Option<ConceptMap> {
        let mut answer = ConceptMap::new();
        for (query, rule_vars) in &self.mapping {
            let mut concept: Option<&Concept> = None;
            for rule_var in rule_vars {
                let bound = rule_answer.get(rule_var)?;
                match concept {
                    Some(existing) if existing != bound => return None,
                    _ => concept = Some(bound),
                }
            }
            answer.insert(query.clone(), concept?.clone());
        }
        self.requirements
            .satisfied_by(&answer, data)
            .then_some(answer)
    }
}

/// Accumulates a unifier; repeated type requirements on one variable
/// intersect.
#[derive(Debug, Default)]
pub struct UnifierBuilder {
    mapping: BTreeMap<Var, BTreeSet<Var>>,
    requirements: Requirements,
}

impl UnifierBuilder {
    pub fn map(&mut self, query: Var, rule_var: Var) -> &mut Self {
        self.mapping.entry(query).or_default().insert(rule_var);
        self
    }

    pub fn require_types(&mut self, query: Var, labels: BTreeSet<Label>) -> &mut Self {
        self.requirements
            .types
            .entry(query)
            .and_modify(|existing| *existing = existing.intersection(&labels).cloned().collect())
            .or_insert(labels);
        self
    }

    pub fn require_isa(&mut self, query: Var, labels: BTreeSet<Label>) -> &mut Self {
        self.requirements
            .isa
            .entry(query)
            .and_modify(|existing| *existing = existing.intersection(&labels).cloned().collect())
            .or_insert(labels);
        self
    }

    pub fn require_predicate(&mut self, query: Var, predicate: Predicate, value: Value) -> &mut Self {
        self.requirements
            .predicates
            .entry(query)
            .or_default()
            .push((predicate, value));
        self
    }

    pub fn build(self) -> Unifier {
        Unifier {
            mapping: self.mapping,
            requirements: self.requirements,
        }
    }
}

// ---------------------------------------------------------------------------
// Pairwise unification
// ---------------------------------------------------------------------------

fn closure(schema: &dyn SchemaTypes, label: &Label) -> BTreeSet<Label> {
    schema.subtype_labels(label).into_iter().collect()
}

/// Whether the annotated possible types of a query variable admit the
/// concluded label. Unannotated variables admit anything.
fn admits(types: &TypeAnnotations, var: &Var, concluded: &Label) -> bool {
    types.get(var).is_none_or(|set| set.contains(concluded))
}

/// Whether two optional annotation sets can agree on at least one type.
fn overlaps(a: Option<&BTreeSet<Label>>, b: Option<&BTreeSet<Label>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.intersection(b).next().is_some(),
        _ => true,
    }
}

fn require_annotated(builder: &mut UnifierBuilder, types: &TypeAnnotations, var: &Var) {
    if let Some(labels) = types.get(var) {
        builder.require_types(var.clone(), labels.clone());
    }
}

fn unify_isa_relation(
    query: &IsaConcludable,
    conclusion: &RelationConclusion,
    schema: &dyn SchemaTypes,
) -> Option<Unifier> {
    // A relation has no value, so a folded value constraint can never hold.
    if query.value.is_some() {
        return None;
    }
    if !admits(&query.types, &query.thing, &conclusion.type_label) {
        return None;
    }
    let mut builder = Unifier::builder();
    if let Some(label) = &query.isa.label {
        let subtypes = closure(schema, label);
        if !subtypes.contains(&conclusion.type_label) {
            return None;
        }
        builder.require_isa(query.thing.clone(), subtypes);
    }
    builder.map(query.thing.clone(), conclusion.relation.clone());
    builder.map(query.isa.var.clone(), conclusion.type_var.clone());
    require_annotated(&mut builder, &query.types, &query.thing);
    Some(builder.build())
}

fn unify_isa_has(
    query: &IsaConcludable,
    conclusion: &HasWithTypeConclusion,
    schema: &dyn SchemaTypes,
) -> Option<Unifier> {
    if !admits(&query.types, &query.thing, &conclusion.attribute_type) {
        return None;
    }
    let mut builder = Unifier::builder();
    if let Some(label) = &query.isa.label {
        let subtypes = closure(schema, label);
        if !subtypes.contains(&conclusion.attribute_type) {
            return None;
        }
        builder.require_isa(query.thing.clone(), subtypes);
    }
    if let Some((predicate, operand)) = &query.value {
        match &conclusion.value {
            ValueSource::Constant(concluded) => {
                if !operand.accepts(*predicate, concluded) {
                    return None;
                }
            }
            ValueSource::Variable(_) => {
                builder.require_predicate(query.thing.clone(), *predicate, operand.clone());
            }
        }
    }
    builder.map(query.thing.clone(), conclusion.attribute.clone());
    builder.map(query.isa.var.clone(), conclusion.type_var.clone());
    require_annotated(&mut builder, &query.types, &query.thing);
    Some(builder.build())
}

fn unify_value_has(
    query: &ValueConcludable,
    conclusion: &HasWithTypeConclusion,
) -> Option<Unifier> {
    if !admits(&query.types, &query.owner, &conclusion.attribute_type) {
        return None;
    }
    let mut builder = Unifier::builder();
    match &query.operand {
        Operand::Constant(operand) => match &conclusion.value {
            ValueSource::Constant(concluded) => {
                if !operand.accepts(query.predicate, concluded) {
                    return None;
                }
            }
            ValueSource::Variable(_) => {
                builder.require_predicate(query.owner.clone(), query.predicate, operand.clone());
            }
        },
        Operand::Variable(other) => {
            // A rule only ever infers an equality, so both operands land on
            // the one concluded attribute.
            if !query.predicate.compatible_with_inferred_equality() {
                return None;
            }
            builder.map(other.clone(), conclusion.attribute.clone());
        }
    }
    builder.map(query.owner.clone(), conclusion.attribute.clone());
    require_annotated(&mut builder, &query.types, &query.owner);
    Some(builder.build())
}

fn unify_has_typed(
    query: &HasConcludable,
    conclusion: &HasWithTypeConclusion,
    conclusion_types: &TypeAnnotations,
    schema: &dyn SchemaTypes,
) -> Option<Unifier> {
    if !overlaps(
        query.types.get(&query.owner),
        conclusion_types.get(&conclusion.owner),
    ) {
        return None;
    }
    if !admits(&query.types, &query.attribute, &conclusion.attribute_type) {
        return None;
    }
    let mut builder = Unifier::builder();
    if let Some(label) = &query.attribute_type {
        let subtypes = closure(schema, label);
        if !subtypes.contains(&conclusion.attribute_type) {
            return None;
        }
        builder.require_isa(query.attribute.clone(), subtypes);
    }
    if let Some((predicate, operand)) = &query.value {
        match &conclusion.value {
            ValueSource::Constant(concluded) => {
                if !operand.accepts(*predicate, concluded) {
                    return None;
                }
            }
            ValueSource::Variable(_) => {
                builder.require_predicate(query.attribute.clone(), *predicate, operand.clone());
            }
        }
    }
    builder.map(query.owner.clone(), conclusion.owner.clone());
    builder.map(query.attribute.clone(), conclusion.attribute.clone());
    require_annotated(&mut builder, &query.types, &query.owner);
    require_annotated(&mut builder, &query.types, &query.attribute);
    Some(builder.build())
}

fn unify_has_untyped(
    query: &HasConcludable,
    conclusion: &HasWithoutTypeConclusion,
    conclusion_types: &TypeAnnotations,
    schema: &dyn SchemaTypes,
) -> Option<Unifier> {
    if !overlaps(
        query.types.get(&query.owner),
        conclusion_types.get(&conclusion.owner),
    ) {
        return None;
    }
    if !overlaps(
        query.types.get(&query.attribute),
        conclusion_types.get(&conclusion.attribute),
    ) {
        return None;
    }
    let mut builder = Unifier::builder();
    if let Some(label) = &query.attribute_type {
        builder.require_isa(query.attribute.clone(), closure(schema, label));
    }
    if let Some((predicate, operand)) = &query.value {
        builder.require_predicate(query.attribute.clone(), *predicate, operand.clone());
    }
    builder.map(query.owner.clone(), conclusion.owner.clone());
    builder.map(query.attribute.clone(), conclusion.attribute.clone());
    require_annotated(&mut builder, &query.types, &query.owner);
    require_annotated(&mut builder, &query.types, &query.attribute);
    Some(builder.build())
}

// ---------------------------------------------------------------------------
// Relation unification
// ---------------------------------------------------------------------------

fn unify_relations(
    query: &RelationConcludable,
    conclusion: &RelationConclusion,
    conclusion_types: &TypeAnnotations,
    schema: &dyn SchemaTypes,
) -> HashSet<Unifier> {
    if !admits(&query.types, &query.relation, &conclusion.type_label) {
        return HashSet::new();
    }
    let mut relation_requirement = None;
    if let Some(isa) = &query.isa {
        if let Some(label) = &isa.label {
            let subtypes = closure(schema, label);
            if !subtypes.contains(&conclusion.type_label) {
                return HashSet::new();
            }
            relation_requirement = Some(subtypes);
        }
    }

    // Per query player, the conclusion slots it could stand for.
    let options: Vec<Vec<usize>> = query
        .players
        .iter()
        .map(|qp| {
            let role_subtypes = qp
                .role
                .as_ref()
                .and_then(|r| r.label.as_ref())
                .map(|label| closure(schema, label));
            conclusion
                .players
                .iter()
                .enumerate()
                .filter(|(_, cp)| {
                    role_subtypes
                        .as_ref()
                        .is_none_or(|subtypes| subtypes.contains(&cp.role_label))
                        && overlaps(
                            query.types.get(&qp.player),
                            conclusion_types.get(&cp.player),
                        )
                })
                .map(|(index, _)| index)
                .collect()
        })
        .collect();

    let mut unifiers = HashSet::new();
    for assignment in SlotAssignments::new(options, conclusion.players.len()) {
        let mut builder = Unifier::builder();
        builder.map(query.relation.clone(), conclusion.relation.clone());
        require_annotated(&mut builder, &query.types, &query.relation);
        if let Some(subtypes) = &relation_requirement {
            builder.require_isa(query.relation.clone(), subtypes.clone());
        }
        if let Some(isa) = &query.isa {
            builder.map(isa.var.clone(), conclusion.type_var.clone());
        }
        for (query_index, slot) in assignment.into_iter().enumerate() {
            let qp = &query.players[query_index];
            let cp = &conclusion.players[slot];
            builder.map(qp.player.clone(), cp.player.clone());
            require_annotated(&mut builder, &query.types, &qp.player);
            // A written role label was already checked when the slots were
            // paired; only variable roles are retrieved and mapped.
            if let Some(role) = &qp.role {
                if role.label.is_none() {
                    builder.map(role.var.clone(), cp.role_var.clone());
                }
            }
        }
        unifiers.insert(builder.build());
    }
    unifiers
}

/// Depth-first enumeration of injective assignments of query players onto
/// conclusion slots, driven by an explicit frame stack.
struct SlotAssignments {
    options: Vec<Vec<usize>>,
    stack: Vec<Vec<usize>>,
}

impl SlotAssignments {
    fn new(options: Vec<Vec<usize>>, slots: usize) -> Self {
        // More distinct query players than conclusion slots can never be
        // assigned injectively.
        let stack = if options.len() <= slots {
            vec![Vec::new()]
        } else {
            Vec::new()
        };
        Self { options, stack }
    }
}

impl Iterator for SlotAssignments {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        while let Some(assigned) = self.stack.pop() {
            let depth = assigned.len();
            if depth == self.options.len() {
                return Some(assigned);
            }
            for &slot in self.options[depth].iter().rev() {
                if !assigned.contains(&slot) {
                    let mut extended = assigned.clone();
                    extended.push(slot);
                    self.stack.push(extended);
                }
            }
        }
        None
    }
}
