//! Shared in-memory fixture: a tiny employment schema and collaborator
//! implementations backing the cross-component tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use maat::common::{Label, ThingId, Value, ValueType};
use maat::error::LogicResult;
use maat::pattern::{Conjunction, Constraint, TypeAnnotations};
use maat::schema::{DataStore, Ownership, RuleStore, RuleStructure, SchemaTypes, TypeAnnotator};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// person, company, employment (employee) with subtype
/// part-time-employment (part-time-employee), age: long, name: string,
/// marked: boolean.
pub struct FixtureSchema {
    subtypes: BTreeMap<Label, Vec<Label>>,
    relates: BTreeMap<(Label, String), Label>,
    value_types: BTreeMap<Label, ValueType>,
    pub abstract_types: BTreeSet<Label>,
}

impl FixtureSchema {
    pub fn new() -> Self {
        let employment = Label::of("employment");
        let part_time = Label::of("part-time-employment");
        let employee = Label::scoped("employment", "employee");
        let part_time_employee = Label::scoped("part-time-employment", "part-time-employee");

        let subtypes = BTreeMap::from([
            (employment.clone(), vec![employment.clone(), part_time.clone()]),
            (
                employee.clone(),
                vec![employee.clone(), part_time_employee.clone()],
            ),
        ]);
        let relates = BTreeMap::from([
            ((employment, "employee".to_string()), employee),
            (
                (part_time.clone(), "part-time-employee".to_string()),
                part_time_employee.clone(),
            ),
            // Role specialization: the sub-relation relates the sub-role.
            ((part_time, "employee".to_string()), part_time_employee),
        ]);
        let value_types = BTreeMap::from([
            (Label::of("age"), ValueType::Long),
            (Label::of("name"), ValueType::String),
            (Label::of("marked"), ValueType::Boolean),
        ]);
        Self {
            subtypes,
            relates,
            value_types,
            abstract_types: BTreeSet::new(),
        }
    }
}

impl SchemaTypes for FixtureSchema {
    fn subtype_labels(&self, label: &Label) -> Vec<Label> {
        self.subtypes
            .get(label)
            .cloned()
            .unwrap_or_else(|| vec![label.clone()])
    }

    fn is_abstract(&self, label: &Label) -> bool {
        self.abstract_types.contains(label)
    }

    fn relates(&self, relation_type: &Label, role_name: &str) -> Option<Label> {
        self.relates
            .get(&(relation_type.clone(), role_name.to_string()))
            .cloned()
    }

    fn value_type(&self, attribute_type: &Label) -> Option<ValueType> {
        self.value_types.get(attribute_type).copied()
    }
}

// ---------------------------------------------------------------------------
// Type annotator
// ---------------------------------------------------------------------------

/// Annotates each isa-constrained variable with the subtype closure of its
/// written label; everything else stays unconstrained.
pub struct FixtureAnnotator {
    pub schema: Arc<FixtureSchema>,
}

impl TypeAnnotator for FixtureAnnotator {
    fn annotate(&self, conjunction: &Conjunction) -> LogicResult<TypeAnnotations> {
        let mut annotations = TypeAnnotations::new();
        for constraint in &conjunction.constraints {
            match constraint {
                Constraint::Isa { thing, isa } => {
                    if let Some(label) = &isa.label {
                        annotations.set(thing.clone(), self.schema.subtype_labels(label));
                    }
                }
                Constraint::Relation {
                    relation,
                    isa: Some(isa),
                    ..
                } => {
                    if let Some(label) = &isa.label {
                        annotations.set(relation.clone(), self.schema.subtype_labels(label));
                    }
                }
                _ => {}
            }
        }
        Ok(annotations)
    }
}

// ---------------------------------------------------------------------------
// Rule store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRuleStore {
    structures: Mutex<HashMap<String, RuleStructure>>,
    type_index: Mutex<HashMap<Label, BTreeSet<String>>>,
    has_index: Mutex<HashMap<Label, BTreeSet<String>>>,
}

impl RuleStore for MemoryRuleStore {
    fn put(&self, structure: &RuleStructure) -> LogicResult<()> {
        self.structures
            .lock()
            .unwrap()
            .insert(structure.label.clone(), structure.clone());
        Ok(())
    }

    fn get(&self, label: &str) -> LogicResult<Option<RuleStructure>> {
        Ok(self.structures.lock().unwrap().get(label).cloned())
    }

    fn delete(&self, label: &str) -> LogicResult<()> {
        self.structures.lock().unwrap().remove(label);
        Ok(())
    }

    fn all(&self) -> Vec<RuleStructure> {
        let mut all: Vec<RuleStructure> =
            self.structures.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.label.cmp(&b.label));
        all
    }

    fn index_concluding_type(&self, type_label: &Label, rule_label: &str) {
        self.type_index
            .lock()
            .unwrap()
            .entry(type_label.clone())
            .or_default()
            .insert(rule_label.to_string());
    }

    fn unindex_concluding_type(&self, type_label: &Label, rule_label: &str) {
        if let Some(rules) = self.type_index.lock().unwrap().get_mut(type_label) {
            rules.remove(rule_label);
        }
    }

    fn rules_concluding_type(&self, type_label: &Label) -> Vec<String> {
        self.type_index
            .lock()
            .unwrap()
            .get(type_label)
            .map(|rules| rules.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn index_concluding_has(&self, attribute_type: &Label, rule_label: &str) {
        self.has_index
            .lock()
            .unwrap()
            .entry(attribute_type.clone())
            .or_default()
            .insert(rule_label.to_string());
    }

    fn unindex_concluding_has(&self, attribute_type: &Label, rule_label: &str) {
        if let Some(rules) = self.has_index.lock().unwrap().get_mut(attribute_type) {
            rules.remove(rule_label);
        }
    }

    fn rules_concluding_has(&self, attribute_type: &Label) -> Vec<String> {
        self.has_index
            .lock()
            .unwrap()
            .get(attribute_type)
            .map(|rules| rules.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn unindex_rule(&self, rule_label: &str) {
        for rules in self.type_index.lock().unwrap().values_mut() {
            rules.remove(rule_label);
        }
        for rules in self.has_index.lock().unwrap().values_mut() {
            rules.remove(rule_label);
        }
    }
}

// ---------------------------------------------------------------------------
// Data store
// ---------------------------------------------------------------------------

struct StoredRelation {
    relation_type: Label,
    players: Vec<(Label, ThingId)>,
    inferred: bool,
}

#[derive(Default)]
pub struct MemoryDataStore {
    next_id: u64,
    entities: BTreeMap<ThingId, Label>,
    relations: BTreeMap<ThingId, StoredRelation>,
    attributes: BTreeMap<ThingId, (Label, Value)>,
    ownerships: BTreeMap<(ThingId, ThingId), bool>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> ThingId {
        self.next_id += 1;
        ThingId(self.next_id)
    }

    pub fn insert_entity(&mut self, entity_type: Label) -> ThingId {
        let id = self.next();
        self.entities.insert(id, entity_type);
        id
    }

    pub fn insert_asserted_relation(
        &mut self,
        relation_type: Label,
        players: Vec<(Label, ThingId)>,
    ) -> ThingId {
        let id = self.next();
        self.relations.insert(
            id,
            StoredRelation {
                relation_type,
                players,
                inferred: false,
            },
        );
        id
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }
}

impl DataStore for MemoryDataStore {
    fn relations_with_players(
        &self,
        relation_type: &Label,
        players: &[(Label, ThingId)],
    ) -> Box<dyn Iterator<Item = ThingId> + '_> {
        let required: BTreeSet<(Label, ThingId)> = players.iter().cloned().collect();
        let relation_type = relation_type.clone();
        Box::new(self.relations.iter().filter_map(move |(id, stored)| {
            let stored_pairs: BTreeSet<(Label, ThingId)> =
                stored.players.iter().cloned().collect();
            (stored.relation_type == relation_type && required.is_subset(&stored_pairs))
                .then_some(*id)
        }))
    }

    fn role_players(&self, relation: ThingId) -> Vec<(Label, ThingId)> {
        self.relations
            .get(&relation)
            .map(|stored| stored.players.clone())
            .unwrap_or_default()
    }

    fn is_inferred(&self, thing: ThingId) -> bool {
        self.relations
            .get(&thing)
            .is_some_and(|stored| stored.inferred)
    }

    fn type_of(&self, thing: ThingId) -> Option<Label> {
        self.entities
            .get(&thing)
            .cloned()
            .or_else(|| {
                self.relations
                    .get(&thing)
                    .map(|stored| stored.relation_type.clone())
            })
            .or_else(|| self.attributes.get(&thing).map(|(label, _)| label.clone()))
    }

    fn attribute_value(&self, attribute: ThingId) -> Option<Value> {
        self.attributes
            .get(&attribute)
            .map(|(_, value)| value.clone())
    }

    fn ownership(&self, owner: ThingId, attribute: ThingId) -> Option<Ownership> {
        self.ownerships
            .get(&(owner, attribute))
            .map(|&inferred| Ownership { inferred })
    }

    fn insert_relation(&mut self, relation_type: &Label, players: &[(Label, ThingId)]) -> ThingId {
        let id = self.next();
        self.relations.insert(
            id,
            StoredRelation {
                relation_type: relation_type.clone(),
                players: players.to_vec(),
                inferred: true,
            },
        );
        id
    }

    fn put_attribute(&mut self, attribute_type: &Label, value: &Value) -> LogicResult<ThingId> {
        let existing = self.attributes.iter().find_map(|(id, (label, stored))| {
            (label == attribute_type && stored == value).then_some(*id)
        });
        Ok(match existing {
            Some(id) => id,
            None => {
                let id = self.next();
                self.attributes
                    .insert(id, (attribute_type.clone(), value.clone()));
                id
            }
        })
    }

    fn set_has(&mut self, owner: ThingId, attribute: ThingId, inferred: bool) {
        self.ownerships.insert((owner, attribute), inferred);
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn manager() -> maat::manager::LogicManager {
    manager_with_schema(FixtureSchema::new())
}

pub fn manager_with_schema(schema: FixtureSchema) -> maat::manager::LogicManager {
    let schema = Arc::new(schema);
    maat::manager::LogicManager::new(
        schema.clone(),
        Arc::new(FixtureAnnotator { schema }),
        Arc::new(MemoryRuleStore::default()),
    )
}
