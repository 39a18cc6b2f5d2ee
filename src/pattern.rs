//! Pattern trees and their canonical forms.
//!
//! Patterns arrive from the excluded parser/type-inference collaborators as
//! plain data: constraint fragments composed with conjunction, disjunction,
//! and negation. A rule condition is normalized here into a disjunction of
//! conjunctions (DNF), each branch keeping its negated sub-disjunctions
//! attached. Type annotations are produced externally and carried on the
//! conjunction so that unification can reason about variable types without
//! touching the schema graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::common::{Label, Predicate, Value, Var};

// ---------------------------------------------------------------------------
// Constraint fragments
// ---------------------------------------------------------------------------

/// A type reference in an `isa` position: always a variable, carrying the
/// written label when the query/rule spelled one out (`isa employment`
/// introduces an anonymous type variable constrained to that label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IsaRef {
    pub var: Var,
    pub label: Option<Label>,
}

impl IsaRef {
    pub fn label(var: Var, label: Label) -> Self {
        Self {
            var,
            label: Some(label),
        }
    }

    pub fn variable(var: Var) -> Self {
        Self { var, label: None }
    }
}

/// A role reference on a relation player: a variable, plus the written role
/// label if one was spelled out (`(employee: $x)` vs `($role: $x)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub var: Var,
    pub label: Option<Label>,
}

impl RoleRef {
    pub fn label(var: Var, label: Label) -> Self {
        Self {
            var,
            label: Some(label),
        }
    }

    pub fn variable(var: Var) -> Self {
        Self { var, label: None }
    }
}

/// One (role, player) slot of a relation constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolePlayer {
    pub role: Option<RoleRef>,
    pub player: Var,
}

impl RolePlayer {
    pub fn new(role: Option<RoleRef>, player: Var) -> Self {
        Self { role, player }
    }
}

/// The operand of a value constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Constant(Value),
    Variable(Var),
}

/// An atomic pattern constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraint {
    /// `$thing isa <type>`.
    Isa { thing: Var, isa: IsaRef },
    /// `$owner <predicate> <operand>`, e.g. `$x >= 10` or `$x = $y`.
    Value {
        owner: Var,
        predicate: Predicate,
        operand: Operand,
    },
    /// `$owner has $attribute`.
    Has { owner: Var, attribute: Var },
    /// `$relation (role: $player, ...) [isa <type>]`.
    Relation {
        relation: Var,
        isa: Option<IsaRef>,
        players: Vec<RolePlayer>,
    },
}

impl Constraint {
    /// Every variable mentioned by this constraint, including hidden type
    /// and role variables.
    pub fn variables(&self) -> Vec<Var> {
        match self {
            Self::Isa { thing, isa } => vec![thing.clone(), isa.var.clone()],
            Self::Value { owner, operand, .. } => {
                let mut vars = vec![owner.clone()];
                if let Operand::Variable(v) = operand {
                    vars.push(v.clone());
                }
                vars
            }
            Self::Has { owner, attribute } => vec![owner.clone(), attribute.clone()],
            Self::Relation {
                relation,
                isa,
                players,
            } => {
                let mut vars = vec![relation.clone()];
                if let Some(isa) = isa {
                    vars.push(isa.var.clone());
                }
                for rp in players {
                    if let Some(role) = &rp.role {
                        vars.push(role.var.clone());
                    }
                    vars.push(rp.player.clone());
                }
                vars
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Type annotations
// ---------------------------------------------------------------------------

/// Possible types per variable, produced by the external type-inference
/// pass. An absent variable is unconstrained; a present variable with an
/// empty set is unsatisfiable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeAnnotations(BTreeMap<Var, BTreeSet<Label>>);

impl TypeAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: &Var) -> Option<&BTreeSet<Label>> {
        self.0.get(var)
    }

    pub fn set(&mut self, var: Var, types: impl IntoIterator<Item = Label>) {
        self.0.insert(var, types.into_iter().collect());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &BTreeSet<Label>)> {
        self.0.iter()
    }

    /// Unsatisfiable iff some annotated variable has no possible type.
    pub fn satisfiable(&self) -> bool {
        self.0.values().all(|types| !types.is_empty())
    }

    /// The annotations restricted to the given variables.
    pub fn restrict_to<'a>(&self, vars: impl IntoIterator<Item = &'a Var>) -> Self {
        let mut restricted = BTreeMap::new();
        for var in vars {
            if let Some(types) = self.0.get(var) {
                restricted.insert(var.clone(), types.clone());
            }
        }
        Self(restricted)
    }

    /// Merge another annotation map in, intersecting where both constrain
    /// the same variable.
    pub fn merge(&mut self, other: &TypeAnnotations) {
        for (var, types) in &other.0 {
            self.0
                .entry(var.clone())
                .and_modify(|existing| {
                    *existing = existing.intersection(types).cloned().collect();
                })
                .or_insert_with(|| types.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Conjunction / disjunction
// ---------------------------------------------------------------------------

/// A conjunction of constraints with negated sub-disjunctions attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conjunction {
    pub constraints: Vec<Constraint>,
    pub negations: Vec<Disjunction>,
    pub annotations: TypeAnnotations,
}

impl Conjunction {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self {
            constraints,
            negations: Vec::new(),
            annotations: TypeAnnotations::new(),
        }
    }

    pub fn with_negation(mut self, negated: Disjunction) -> Self {
        self.negations.push(negated);
        self
    }

    pub fn with_annotations(mut self, annotations: TypeAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// All variables of the positive constraints.
    pub fn variables(&self) -> BTreeSet<Var> {
        self.constraints
            .iter()
            .flat_map(Constraint::variables)
            .collect()
    }

    fn merge(mut self, other: Conjunction) -> Conjunction {
        self.constraints.extend(other.constraints);
        self.negations.extend(other.negations);
        self.annotations.merge(&other.annotations);
        self
    }
}

/// A disjunction of conjunctive branches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Disjunction {
    pub branches: Vec<Conjunction>,
}

impl Disjunction {
    pub fn new(branches: Vec<Conjunction>) -> Self {
        Self { branches }
    }
}

// ---------------------------------------------------------------------------
// Pattern trees and DNF normalization
// ---------------------------------------------------------------------------

/// An un-normalized pattern as produced by the parser collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    Constraint(Constraint),
    Conjunction(Vec<Pattern>),
    Disjunction(Vec<Pattern>),
    Negation(Box<Pattern>),
}

impl Pattern {
    /// Normalize to a disjunction of conjunctions. Disjunctions nested
    /// under conjunctions are distributed; negated sub-patterns are
    /// normalized in place and stay attached to their branch.
    pub fn normalise(&self) -> Disjunction {
        Disjunction::new(self.branches())
    }

    fn branches(&self) -> Vec<Conjunction> {
        match self {
            Self::Constraint(constraint) => vec![Conjunction::new(vec![constraint.clone()])],
            Self::Negation(inner) => {
                vec![Conjunction::new(Vec::new()).with_negation(inner.normalise())]
            }
            Self::Disjunction(parts) => parts.iter().flat_map(Self::branches).collect(),
            Self::Conjunction(parts) => {
                let mut acc = vec![Conjunction::new(Vec::new())];
                for part in parts {
                    let part_branches = part.branches();
                    let mut distributed = Vec::with_capacity(acc.len() * part_branches.len());
                    for existing in &acc {
                        for branch in &part_branches {
                            distributed.push(existing.clone().merge(branch.clone()));
                        }
                    }
                    acc = distributed;
                }
                acc
            }
        }
    }
}
