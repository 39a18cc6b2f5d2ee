//! Concludables: canonical, hashable fragments of a query pattern that a
//! rule conclusion might satisfy.
//!
//! Extraction folds related constraints into one fragment: the `isa` of a
//! relation or has-attribute variable belongs to that fragment rather than
//! standing alone, and a constant value on an isa-bound attribute is folded
//! into its `has`. This mirrors how conclusions are shaped, so unification
//! can compare like with like.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::common::{Label, Predicate, Value, Var};
use crate::pattern::{
    Conjunction, Constraint, Disjunction, IsaRef, Operand, RolePlayer, TypeAnnotations,
};

// ---------------------------------------------------------------------------
// Concludable variants
// ---------------------------------------------------------------------------

/// `$thing isa <type>` as a standalone fragment, with a folded constant
/// value where one was written on the same variable (`$a isa age; $a > 5`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IsaConcludable {
    pub thing: Var,
    pub isa: IsaRef,
    pub value: Option<(Predicate, Value)>,
    pub types: TypeAnnotations,
}

/// `$owner <predicate> <operand>` as a standalone fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueConcludable {
    pub owner: Var,
    pub predicate: Predicate,
    pub operand: Operand,
    pub types: TypeAnnotations,
}

/// `$owner has <attribute>`, with the attribute's folded type and constant
/// value where the query spelled them out (`$x has age 10`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HasConcludable {
    pub owner: Var,
    pub attribute: Var,
    pub attribute_type: Option<Label>,
    pub value: Option<(Predicate, Value)>,
    pub types: TypeAnnotations,
}

/// A relation fragment: owner variable, optional folded `isa`, and the
/// ordered multiset of (role, player) slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationConcludable {
    pub relation: Var,
    pub isa: Option<IsaRef>,
    pub players: Vec<RolePlayer>,
    pub types: TypeAnnotations,
}

/// A canonical fragment of a query pattern that a rule conclusion might
/// satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Concludable {
    Isa(IsaConcludable),
    Value(ValueConcludable),
    Has(HasConcludable),
    Relation(RelationConcludable),
}

impl Concludable {
    /// Every variable of the fragment.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        match self {
            Self::Isa(isa) => {
                vars.insert(isa.thing.clone());
                vars.insert(isa.isa.var.clone());
            }
            Self::Value(value) => {
                vars.insert(value.owner.clone());
                if let Operand::Variable(v) = &value.operand {
                    vars.insert(v.clone());
                }
            }
            Self::Has(has) => {
                vars.insert(has.owner.clone());
                vars.insert(has.attribute.clone());
            }
            Self::Relation(rel) => {
                vars.insert(rel.relation.clone());
                if let Some(isa) = &rel.isa {
                    vars.insert(isa.var.clone());
                }
                for rp in &rel.players {
                    if let Some(role) = &rp.role {
                        vars.insert(role.var.clone());
                    }
                    vars.insert(rp.player.clone());
                }
            }
        }
        vars
    }

    /// Derive the concludables of a conjunction. Deterministic: relations,
    /// then has, then isa, then value, each in constraint order, with the
    /// folding skip-rules applied.
    pub fn extract(conjunction: &Conjunction) -> Vec<Concludable> {
        Self::extract_with_sources(conjunction)
            .into_iter()
            .map(|(concludable, _)| concludable)
            .collect()
    }

    /// As `extract`, pairing each concludable with the constraints it
    /// covers. Needed when partitioning a conjunction into resolvables: a
    /// concludable no rule applies to falls back to plain retrieval of its
    /// source constraints.
    pub fn extract_with_sources(conjunction: &Conjunction) -> Vec<(Concludable, Vec<Constraint>)> {
        Extractor::new(conjunction).concludables()
    }
}

// ---------------------------------------------------------------------------
// Resolvables
// ---------------------------------------------------------------------------

/// One unit of a compiled conjunction: answerable by rules, by plain
/// retrieval, or by a negated sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolvable {
    Concludable(Concludable),
    Retrievable(Vec<Constraint>),
    Negated(Disjunction),
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

struct Extractor<'a> {
    conjunction: &'a Conjunction,
    isa_owners_to_skip: BTreeSet<Var>,
    value_owners_to_skip: BTreeSet<Var>,
    out: Vec<(Concludable, Vec<Constraint>)>,
}

impl<'a> Extractor<'a> {
    fn new(conjunction: &'a Conjunction) -> Self {
        Self {
            conjunction,
            isa_owners_to_skip: BTreeSet::new(),
            value_owners_to_skip: BTreeSet::new(),
            out: Vec::new(),
        }
    }

    fn concludables(mut self) -> Vec<(Concludable, Vec<Constraint>)> {
        for constraint in &self.conjunction.constraints {
            if let Constraint::Relation {
                relation,
                isa,
                players,
            } = constraint
            {
                self.from_relation(relation, isa.as_ref(), players);
            }
        }
        for constraint in &self.conjunction.constraints {
            if let Constraint::Has { owner, attribute } = constraint {
                self.from_has(owner, attribute);
            }
        }
        for constraint in &self.conjunction.constraints {
            if let Constraint::Isa { thing, isa } = constraint {
                self.from_isa(thing, isa);
            }
        }
        for constraint in &self.conjunction.constraints {
            if let Constraint::Value {
                owner,
                predicate,
                operand,
            } = constraint
            {
                self.from_value(owner, *predicate, operand);
            }
        }
        self.out
    }

    fn from_relation(&mut self, relation: &Var, isa: Option<&IsaRef>, players: &[RolePlayer]) {
        let folded_isa = if isa.is_none() {
            self.isa_of(relation)
        } else {
            None
        };
        let isa = isa.cloned().or_else(|| folded_isa.clone());
        let mut vars: BTreeSet<Var> = BTreeSet::new();
        vars.insert(relation.clone());
        if let Some(isa) = &isa {
            vars.insert(isa.var.clone());
        }
        for rp in players {
            if let Some(role) = &rp.role {
                vars.insert(role.var.clone());
            }
            vars.insert(rp.player.clone());
        }

        let mut sources = vec![Constraint::Relation {
            relation: relation.clone(),
            isa: isa.clone().filter(|_| folded_isa.is_none()),
            players: players.to_vec(),
        }];
        if let Some(folded) = folded_isa {
            sources.push(Constraint::Isa {
                thing: relation.clone(),
                isa: folded,
            });
        }

        self.out.push((
            Concludable::Relation(RelationConcludable {
                relation: relation.clone(),
                isa,
                players: players.to_vec(),
                types: self.conjunction.annotations.restrict_to(vars.iter()),
            }),
            sources,
        ));
        self.isa_owners_to_skip.insert(relation.clone());
    }

    fn from_has(&mut self, owner: &Var, attribute: &Var) {
        let attribute_isa = self.isa_of(attribute);
        let attribute_type = attribute_isa.as_ref().and_then(|isa| isa.label.clone());
        let value = self.constant_value_of(attribute);

        let mut sources = vec![Constraint::Has {
            owner: owner.clone(),
            attribute: attribute.clone(),
        }];
        if let Some(isa) = &attribute_isa {
            sources.push(Constraint::Isa {
                thing: attribute.clone(),
                isa: isa.clone(),
            });
        }
        if let Some((predicate, constant)) = &value {
            sources.push(Constraint::Value {
                owner: attribute.clone(),
                predicate: *predicate,
                operand: Operand::Constant(constant.clone()),
            });
        }

        self.isa_owners_to_skip.insert(attribute.clone());
        if value.is_some() {
            self.value_owners_to_skip.insert(attribute.clone());
        }

        let vars = [owner.clone(), attribute.clone()];
        self.out.push((
            Concludable::Has(HasConcludable {
                owner: owner.clone(),
                attribute: attribute.clone(),
                attribute_type,
                value,
                types: self.conjunction.annotations.restrict_to(vars.iter()),
            }),
            sources,
        ));
    }

    fn from_isa(&mut self, thing: &Var, isa: &IsaRef) {
        if self.isa_owners_to_skip.contains(thing) {
            return;
        }
        let value = self.constant_value_of(thing);

        let mut sources = vec![Constraint::Isa {
            thing: thing.clone(),
            isa: isa.clone(),
        }];
        if let Some((predicate, constant)) = &value {
            sources.push(Constraint::Value {
                owner: thing.clone(),
                predicate: *predicate,
                operand: Operand::Constant(constant.clone()),
            });
        }

        let vars = [thing.clone(), isa.var.clone()];
        self.out.push((
            Concludable::Isa(IsaConcludable {
                thing: thing.clone(),
                isa: isa.clone(),
                value,
                types: self.conjunction.annotations.restrict_to(vars.iter()),
            }),
            sources,
        ));
        self.isa_owners_to_skip.insert(thing.clone());
        self.value_owners_to_skip.insert(thing.clone());
    }

    fn from_value(&mut self, owner: &Var, predicate: Predicate, operand: &Operand) {
        // Constant values on isa-bound variables were folded away above;
        // variable comparisons always stand alone.
        if matches!(operand, Operand::Constant(_)) && self.value_owners_to_skip.contains(owner) {
            return;
        }
        let mut vars = vec![owner.clone()];
        if let Operand::Variable(v) = operand {
            vars.push(v.clone());
        }
        let source = Constraint::Value {
            owner: owner.clone(),
            predicate,
            operand: operand.clone(),
        };
        self.out.push((
            Concludable::Value(ValueConcludable {
                owner: owner.clone(),
                predicate,
                operand: operand.clone(),
                types: self.conjunction.annotations.restrict_to(vars.iter()),
            }),
            vec![source],
        ));
    }

    fn isa_of(&self, var: &Var) -> Option<IsaRef> {
        self.conjunction.constraints.iter().find_map(|c| match c {
            Constraint::Isa { thing, isa } if thing == var => Some(isa.clone()),
            _ => None,
        })
    }

    fn constant_value_of(&self, var: &Var) -> Option<(Predicate, Value)> {
        self.conjunction.constraints.iter().find_map(|c| match c {
            Constraint::Value {
                owner,
                predicate,
                operand: Operand::Constant(value),
            } if owner == var => Some((*predicate, value.clone())),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::RoleRef;

    fn var(name: &str) -> Var {
        Var::named(name)
    }

    #[test]
    fn relation_folds_its_isa() {
        // $r (employee: $x); $r isa employment
        let conjunction = Conjunction::new(vec![
            Constraint::Relation {
                relation: var("r"),
                isa: None,
                players: vec![RolePlayer::new(
                    Some(RoleRef::label(
                        Var::anon(1),
                        Label::scoped("employment", "employee"),
                    )),
                    var("x"),
                )],
            },
            Constraint::Isa {
                thing: var("r"),
                isa: IsaRef::label(Var::anon(0), Label::of("employment")),
            },
        ]);

        let concludables = Concludable::extract(&conjunction);
        assert_eq!(concludables.len(), 1);
        match &concludables[0] {
            Concludable::Relation(rel) => {
                assert_eq!(rel.isa.as_ref().unwrap().label, Some(Label::of("employment")));
                assert_eq!(rel.players.len(), 1);
            }
            other => panic!("expected relation concludable, got {other:?}"),
        }
    }

    #[test]
    fn has_with_literal_folds_isa_and_value() {
        // $x has age 10  ==  $x has $_a; $_a isa age; $_a = 10
        let attr = Var::anon(0);
        let conjunction = Conjunction::new(vec![
            Constraint::Has {
                owner: var("x"),
                attribute: attr.clone(),
            },
            Constraint::Isa {
                thing: attr.clone(),
                isa: IsaRef::label(Var::anon(1), Label::of("age")),
            },
            Constraint::Value {
                owner: attr.clone(),
                predicate: Predicate::Eq,
                operand: Operand::Constant(Value::Long(10)),
            },
        ]);

        let concludables = Concludable::extract(&conjunction);
        assert_eq!(concludables.len(), 1);
        match &concludables[0] {
            Concludable::Has(has) => {
                assert_eq!(has.attribute_type, Some(Label::of("age")));
                assert_eq!(has.value, Some((Predicate::Eq, Value::Long(10))));
            }
            other => panic!("expected has concludable, got {other:?}"),
        }
    }

    #[test]
    fn standalone_isa_and_value_are_extracted() {
        // $x isa person; $a > 5 (unrelated variables)
        let conjunction = Conjunction::new(vec![
            Constraint::Isa {
                thing: var("x"),
                isa: IsaRef::label(Var::anon(0), Label::of("person")),
            },
            Constraint::Value {
                owner: var("a"),
                predicate: Predicate::Gt,
                operand: Operand::Constant(Value::Long(5)),
            },
        ]);

        let concludables = Concludable::extract(&conjunction);
        assert_eq!(concludables.len(), 2);
        assert!(matches!(concludables[0], Concludable::Isa(_)));
        assert!(matches!(concludables[1], Concludable::Value(_)));
    }

    #[test]
    fn value_on_isa_bound_variable_is_folded_away() {
        // $a isa age; $a > 5 — the value belongs to the isa fragment.
        let conjunction = Conjunction::new(vec![
            Constraint::Isa {
                thing: var("a"),
                isa: IsaRef::label(Var::anon(0), Label::of("age")),
            },
            Constraint::Value {
                owner: var("a"),
                predicate: Predicate::Gt,
                operand: Operand::Constant(Value::Long(5)),
            },
        ]);

        let concludables = Concludable::extract(&conjunction);
        assert_eq!(concludables.len(), 1);
        match &concludables[0] {
            Concludable::Isa(isa) => {
                assert_eq!(isa.value, Some((Predicate::Gt, Value::Long(5))));
            }
            other => panic!("expected isa concludable, got {other:?}"),
        }
    }

    #[test]
    fn sources_cover_the_folded_constraints() {
        let attr = Var::anon(0);
        let conjunction = Conjunction::new(vec![
            Constraint::Has {
                owner: var("x"),
                attribute: attr.clone(),
            },
            Constraint::Isa {
                thing: attr.clone(),
                isa: IsaRef::label(Var::anon(1), Label::of("age")),
            },
            Constraint::Value {
                owner: attr,
                predicate: Predicate::Eq,
                operand: Operand::Constant(Value::Long(10)),
            },
        ]);

        let extracted = Concludable::extract_with_sources(&conjunction);
        assert_eq!(extracted.len(), 1);
        let (_, sources) = &extracted[0];
        assert_eq!(sources.len(), 3);
        for constraint in &conjunction.constraints {
            assert!(sources.contains(constraint));
        }
    }

    #[test]
    fn annotations_are_restricted_to_fragment_variables() {
        let mut annotations = TypeAnnotations::new();
        annotations.set(var("x"), [Label::of("person")]);
        annotations.set(var("unrelated"), [Label::of("company")]);
        let conjunction = Conjunction::new(vec![Constraint::Isa {
            thing: var("x"),
            isa: IsaRef::label(Var::anon(0), Label::of("person")),
        }])
        .with_annotations(annotations);

        let concludables = Concludable::extract(&conjunction);
        match &concludables[0] {
            Concludable::Isa(isa) => {
                assert!(isa.types.get(&var("x")).is_some());
                assert!(isa.types.get(&var("unrelated")).is_none());
            }
            other => panic!("expected isa concludable, got {other:?}"),
        }
    }
}
