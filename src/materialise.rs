//! Materialization: turning a satisfied rule condition into a stored,
//! inferred fact.
//!
//! Materialization is deduplicating by construction. Before inserting, the
//! store is searched for an existing fact with the same shape: an exact
//! (role, player) multiset for relations, the exact ownership edge for
//! attributes. An existing inferred fact is reused; an existing asserted
//! fact means the conclusion is already concretely satisfied and yields
//! nothing, which keeps reasoning answers disjoint from plain matches.
//! Role comparison is by exact label; a conclusion relating a supertype
//! role never reuses a relation stored under a subtype role.

use std::collections::BTreeMap;

use tracing::debug;

use crate::common::{Concept, ConceptMap, Label, ThingId, Value, Var};
use crate::error::{LogicError, LogicResult};
use crate::rule::{Conclusion, HasWithTypeConclusion, RelationConclusion, ValueSource};
use crate::schema::DataStore;

/// The outcome of materializing one conclusion instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materialisation {
    /// The concluded thing: the relation, or the owned attribute.
    pub concluded: ThingId,
    /// Whether an existing inferred fact was reused instead of inserted.
    pub reused: bool,
}

/// Writes rule conclusions into a data store, reusing equivalent inferred
/// facts instead of duplicating them.
pub struct Materialiser<'a> {
    data: &'a mut dyn DataStore,
}

impl<'a> Materialiser<'a> {
    pub fn new(data: &'a mut dyn DataStore) -> Self {
        Self { data }
    }

    /// Materialize a conclusion under a condition answer.
    ///
    /// `Ok(None)` means the conclusion already holds as an asserted fact, so
    /// there is nothing inferred to record.
    pub fn materialise(
        &mut self,
        conclusion: &Conclusion,
        bindings: &ConceptMap,
    ) -> LogicResult<Option<Materialisation>> {
        match conclusion {
            Conclusion::Relation(rel) => self.materialise_relation(rel, bindings),
            Conclusion::HasWithType(has) => {
                let owner = bound_thing(bindings, &has.owner)?;
                let attribute = self.concluded_attribute(has, bindings)?;
                self.materialise_ownership(owner, attribute)
            }
            Conclusion::HasWithoutType(has) => {
                let owner = bound_thing(bindings, &has.owner)?;
                let attribute = bound_thing(bindings, &has.attribute)?;
                self.materialise_ownership(owner, attribute)
            }
        }
    }

    /// Materialize and bind every conclusion variable, producing the full
    /// conclusion answer that unifiers project back into query space.
    pub fn materialise_and_bind(
        &mut self,
        conclusion: &Conclusion,
        bindings: &ConceptMap,
    ) -> LogicResult<Option<ConceptMap>> {
        let Some(materialisation) = self.materialise(conclusion, bindings)? else {
            return Ok(None);
        };
        let mut answer = ConceptMap::new();
        match conclusion {
            Conclusion::Relation(rel) => {
                answer.insert(rel.relation.clone(), Concept::Thing(materialisation.concluded));
                answer.insert(rel.type_var.clone(), Concept::Type(rel.type_label.clone()));
                for rp in &rel.players {
                    answer.insert(rp.role_var.clone(), Concept::Type(rp.role_label.clone()));
                    answer.insert(rp.player.clone(), bound(bindings, &rp.player)?);
                }
            }
            Conclusion::HasWithType(has) => {
                answer.insert(has.owner.clone(), bound(bindings, &has.owner)?);
                answer.insert(
                    has.attribute.clone(),
                    Concept::Thing(materialisation.concluded),
                );
                answer.insert(
                    has.type_var.clone(),
                    Concept::Type(has.attribute_type.clone()),
                );
                if let ValueSource::Variable(var) = &has.value {
                    answer.insert(var.clone(), bound(bindings, var)?);
                }
            }
            Conclusion::HasWithoutType(has) => {
                answer.insert(has.owner.clone(), bound(bindings, &has.owner)?);
                answer.insert(has.attribute.clone(), bound(bindings, &has.attribute)?);
            }
        }
        Ok(Some(answer))
    }

    fn materialise_relation(
        &mut self,
        conclusion: &RelationConclusion,
        bindings: &ConceptMap,
    ) -> LogicResult<Option<Materialisation>> {
        let mut players = Vec::with_capacity(conclusion.players.len());
        for rp in &conclusion.players {
            players.push((rp.role_label.clone(), bound_thing(bindings, &rp.player)?));
        }
        let desired = multiset(&players);

        let candidates: Vec<ThingId> = self
            .data
            .relations_with_players(&conclusion.type_label, &players)
            .collect();
        for candidate in candidates {
            if self.data.type_of(candidate).as_ref() != Some(&conclusion.type_label) {
                continue;
            }
            if multiset(&self.data.role_players(candidate)) != desired {
                continue;
            }
            if self.data.is_inferred(candidate) {
                debug!(relation = %candidate, "reusing inferred relation");
                return Ok(Some(Materialisation {
                    concluded: candidate,
                    reused: true,
                }));
            }
            // Already asserted: nothing inferred to record.
            return Ok(None);
        }

        let inserted = self.data.insert_relation(&conclusion.type_label, &players);
        debug!(relation = %inserted, relation_type = %conclusion.type_label, "inserted inferred relation");
        Ok(Some(Materialisation {
            concluded: inserted,
            reused: false,
        }))
    }

    fn concluded_attribute(
        &mut self,
        conclusion: &HasWithTypeConclusion,
        bindings: &ConceptMap,
    ) -> LogicResult<ThingId> {
        let value: Value = match &conclusion.value {
            ValueSource::Constant(value) => value.clone(),
            ValueSource::Variable(var) => {
                let thing = bound_thing(bindings, var)?;
                self.data.attribute_value(thing).ok_or_else(|| {
                    LogicError::internal(format!("variable {var} is bound to a valueless thing"))
                })?
            }
        };
        self.data.put_attribute(&conclusion.attribute_type, &value)
    }

    fn materialise_ownership(
        &mut self,
        owner: ThingId,
        attribute: ThingId,
    ) -> LogicResult<Option<Materialisation>> {
        match self.data.ownership(owner, attribute) {
            Some(edge) if !edge.inferred => Ok(None),
            Some(_) => {
                debug!(%owner, %attribute, "reusing inferred ownership");
                Ok(Some(Materialisation {
                    concluded: attribute,
                    reused: true,
                }))
            }
            None => {
                self.data.set_has(owner, attribute, true);
                debug!(%owner, %attribute, "inserted inferred ownership");
                Ok(Some(Materialisation {
                    concluded: attribute,
                    reused: false,
                }))
            }
        }
    }
}

fn bound(bindings: &ConceptMap, var: &Var) -> LogicResult<Concept> {
    bindings
        .get(var)
        .cloned()
        .ok_or_else(|| LogicError::internal(format!("condition answer does not bind {var}")))
}

fn bound_thing(bindings: &ConceptMap, var: &Var) -> LogicResult<ThingId> {
    bound(bindings, var)?
        .as_thing()
        .ok_or_else(|| LogicError::internal(format!("{var} is bound to a type, expected a thing")))
}

fn multiset(players: &[(Label, ThingId)]) -> BTreeMap<(Label, ThingId), usize> {
    let mut counts = BTreeMap::new();
    for (role, player) in players {
        *counts.entry((role.clone(), *player)).or_insert(0) += 1;
    }
    counts
}
