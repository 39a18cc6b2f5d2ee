//! Rule-set validation: negation cycles are rejected with the offending
//! rule path; acyclic sets pass; revalidation after schema changes.

mod common;

use maat::common::{Label, Predicate, Value, Var};
use maat::error::{LogicError, StratificationError};
use maat::pattern::{Constraint, IsaRef, Operand, Pattern, RolePlayer, RoleRef};
use maat::schema::RuleStructure;

use common::manager;

fn person(var: &str) -> Pattern {
    Pattern::Constraint(Constraint::Isa {
        thing: Var::named(var),
        isa: IsaRef::label(Var::anon(0), Label::of("person")),
    })
}

fn employment_pattern(player: &str) -> Pattern {
    Pattern::Constraint(Constraint::Relation {
        relation: Var::named("r"),
        isa: Some(IsaRef::label(Var::anon(5), Label::of("employment"))),
        players: vec![RolePlayer::new(
            Some(RoleRef::label(
                Var::anon(6),
                Label::scoped("employment", "employee"),
            )),
            Var::named(player),
        )],
    })
}

fn employment_conclusion(player: &str) -> Vec<Constraint> {
    vec![Constraint::Relation {
        relation: Var::anon(1),
        isa: Some(IsaRef::label(Var::anon(2), Label::of("employment"))),
        players: vec![RolePlayer::new(
            Some(RoleRef::label(Var::anon(3), Label::of("employee"))),
            Var::named(player),
        )],
    }]
}

fn marked_pattern(owner: &str) -> Pattern {
    Pattern::Conjunction(vec![
        Pattern::Constraint(Constraint::Has {
            owner: Var::named(owner),
            attribute: Var::named("m"),
        }),
        Pattern::Constraint(Constraint::Isa {
            thing: Var::named("m"),
            isa: IsaRef::label(Var::anon(7), Label::of("marked")),
        }),
    ])
}

fn marked_conclusion(owner: &str) -> Vec<Constraint> {
    let attr = Var::anon(1);
    vec![
        Constraint::Has {
            owner: Var::named(owner),
            attribute: attr.clone(),
        },
        Constraint::Isa {
            thing: attr.clone(),
            isa: IsaRef::label(Var::anon(2), Label::of("marked")),
        },
        Constraint::Value {
            owner: attr,
            predicate: Predicate::Eq,
            operand: Operand::Constant(Value::Boolean(true)),
        },
    ]
}

#[test]
fn self_negating_rule_is_a_contradiction() {
    let manager = manager();
    manager
        .put_rule(RuleStructure::new(
            "unemployed-get-jobs",
            Pattern::Conjunction(vec![
                person("x"),
                Pattern::Negation(Box::new(employment_pattern("x"))),
            ]),
            employment_conclusion("x"),
        ))
        .unwrap();

    let result = manager.validate_stratifiable(&manager.rules().unwrap());
    match result {
        Err(LogicError::Stratification(StratificationError::ContradictoryRuleCycle { cycle })) => {
            assert_eq!(cycle, vec!["unemployed-get-jobs"; 2]);
        }
        other => panic!("expected a contradiction, got {other:?}"),
    }
}

#[test]
fn transitive_negation_cycle_reports_the_path() {
    let manager = manager();
    manager
        .put_rule(RuleStructure::new(
            "unmarked-are-employed",
            Pattern::Conjunction(vec![
                person("x"),
                Pattern::Negation(Box::new(marked_pattern("x"))),
            ]),
            employment_conclusion("x"),
        ))
        .unwrap();
    manager
        .put_rule(RuleStructure::new(
            "employees-are-marked",
            employment_pattern("y"),
            marked_conclusion("y"),
        ))
        .unwrap();

    let result = manager.validate_stratifiable(&manager.rules().unwrap());
    match result {
        Err(LogicError::Stratification(StratificationError::ContradictoryRuleCycle { cycle })) => {
            assert_eq!(cycle.first().map(String::as_str), Some("unmarked-are-employed"));
            assert_eq!(cycle.last().map(String::as_str), Some("unmarked-are-employed"));
            assert!(cycle.contains(&"employees-are-marked".to_string()));
        }
        other => panic!("expected a contradiction, got {other:?}"),
    }
}

#[test]
fn negating_an_underivable_pattern_is_fine() {
    let manager = manager();
    manager
        .put_rule(RuleStructure::new(
            "unmarked-are-employed",
            Pattern::Conjunction(vec![
                person("x"),
                Pattern::Negation(Box::new(marked_pattern("x"))),
            ]),
            employment_conclusion("x"),
        ))
        .unwrap();
    // No rule concludes `marked`, so the negation cannot loop back.
    manager
        .validate_stratifiable(&manager.rules().unwrap())
        .unwrap();
}

#[test]
fn deleting_a_rule_breaks_the_cycle() {
    let manager = manager();
    manager
        .put_rule(RuleStructure::new(
            "unmarked-are-employed",
            Pattern::Conjunction(vec![
                person("x"),
                Pattern::Negation(Box::new(marked_pattern("x"))),
            ]),
            employment_conclusion("x"),
        ))
        .unwrap();
    manager
        .put_rule(RuleStructure::new(
            "employees-are-marked",
            employment_pattern("y"),
            marked_conclusion("y"),
        ))
        .unwrap();
    assert!(manager
        .validate_stratifiable(&manager.rules().unwrap())
        .is_err());

    manager.delete_rule("employees-are-marked").unwrap();
    manager
        .validate_stratifiable(&manager.rules().unwrap())
        .unwrap();
}

#[test]
fn revalidation_checks_the_whole_rule_set() {
    let manager = manager();
    manager
        .put_rule(RuleStructure::new(
            "people-have-jobs",
            person("x"),
            employment_conclusion("x"),
        ))
        .unwrap();
    manager
        .put_rule(RuleStructure::new(
            "employees-are-marked",
            employment_pattern("y"),
            marked_conclusion("y"),
        ))
        .unwrap();
    manager.revalidate_and_reindex_rules().unwrap();

    manager
        .put_rule(RuleStructure::new(
            "unmarked-are-employed",
            Pattern::Conjunction(vec![
                person("z"),
                Pattern::Negation(Box::new(marked_pattern("z"))),
            ]),
            employment_conclusion("z"),
        ))
        .unwrap();
    assert!(matches!(
        manager.revalidate_and_reindex_rules(),
        Err(LogicError::Stratification(_))
    ));
}
