//! End-to-end scenarios exercising declaration, rule derivation,
//! aggregation, negation, dedup, and stratification across a tick.

use std::collections::HashSet;

use inputlayer::config::Config;
use inputlayer::error::Error;
use inputlayer::goal::{ArithExpr, BodyGoal, CmpOp, Goal, Term};
use inputlayer::predicate::{ColumnSpec, UpdateMode};
use inputlayer::program::Program;
use inputlayer::value::{DataType, Value};

fn int_rows(predicate_name: &str, program: &Program) -> HashSet<i64> {
    program
        .predicate(predicate_name)
        .unwrap()
        .borrow()
        .rows()
        .map(|(_, row)| row.field(0).as_int().unwrap())
        .collect()
}

fn pair_rows(predicate_name: &str, program: &Program) -> HashSet<(i64, i64)> {
    program
        .predicate(predicate_name)
        .unwrap()
        .borrow()
        .rows()
        .map(|(_, row)| (row.field(0).as_int().unwrap(), row.field(1).as_int().unwrap()))
        .collect()
}

/// S1 — exhaustive conjunction: R(a) :- P(a), Q(a).
#[test]
fn exhaustive_conjunction() {
    let mut program = Program::new(Config::default());
    program.declare_predicate("p", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::StaticBase).unwrap();
    program.declare_predicate("q", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::StaticBase).unwrap();
    program.declare_predicate("r", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::Rules(vec![])).unwrap();

    let p = program.predicate("p").unwrap();
    for v in [1, 2, 3, 4, 5, 6] {
        p.borrow_mut().add_row(vec![Value::Int(v)]).unwrap();
    }
    let q = program.predicate("q").unwrap();
    for v in [2, 4, 6, 8, 10] {
        q.borrow_mut().add_row(vec![Value::Int(v)]).unwrap();
    }

    let rule = Goal::new("r", vec![Term::var("a")]).if_(vec![
        BodyGoal::atom("p", vec![Term::var("a")]),
        BodyGoal::atom("q", vec![Term::var("a")]),
    ]);
    program.add_rule("r", rule).unwrap();
    program.end_predicates().unwrap();
    program.tick().unwrap();

    assert_eq!(int_rows("r", &program), HashSet::from([2, 4, 6]));
}

/// S2 — key join: Mapped(d,n) :- Day(d), NextDay(d,n).
#[test]
fn key_join() {
    let days = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
    let mut program = Program::new(Config::default());
    program.declare_predicate("day", vec![ColumnSpec::new("d", DataType::String)], false, UpdateMode::StaticBase).unwrap();
    program
        .declare_predicate(
            "next_day",
            vec![ColumnSpec::new("d", DataType::String).key(), ColumnSpec::new("n", DataType::String)],
            false,
            UpdateMode::StaticBase,
        )
        .unwrap();
    program
        .declare_predicate(
            "mapped",
            vec![ColumnSpec::new("d", DataType::String), ColumnSpec::new("n", DataType::String)],
            false,
            UpdateMode::Rules(vec![]),
        )
        .unwrap();

    let day = program.predicate("day").unwrap();
    let next_day = program.predicate("next_day").unwrap();
    for (i, d) in days.iter().enumerate() {
        day.borrow_mut().add_row(vec![Value::string(*d)]).unwrap();
        let n = days[(i + 1) % days.len()];
        next_day.borrow_mut().add_row(vec![Value::string(*d), Value::string(n)]).unwrap();
    }

    let rule = Goal::new("mapped", vec![Term::var("d"), Term::var("n")]).if_(vec![
        BodyGoal::atom("day", vec![Term::var("d")]),
        BodyGoal::atom("next_day", vec![Term::var("d"), Term::var("n")]),
    ]);
    program.add_rule("mapped", rule).unwrap();
    program.end_predicates().unwrap();
    program.tick().unwrap();

    let mapped = program.predicate("mapped").unwrap();
    let next_day = program.predicate("next_day").unwrap();
    assert_eq!(mapped.borrow().table.len(), next_day.borrow().table.len());
    let mapped_set: HashSet<(String, String)> = mapped
        .borrow()
        .rows()
        .map(|(_, row)| (row.field(0).as_str().unwrap().to_string(), row.field(1).as_str().unwrap().to_string()))
        .collect();
    let next_set: HashSet<(String, String)> = next_day
        .borrow()
        .rows()
        .map(|(_, row)| (row.field(0).as_str().unwrap().to_string(), row.field(1).as_str().unwrap().to_string()))
        .collect();
    assert_eq!(mapped_set, next_set);
}

/// S3 — self-join through a general index: Q(i,j) :- P(i,j), P(j,i).
#[test]
fn self_join_through_general_index() {
    let mut program = Program::new(Config::default());
    program
        .declare_predicate(
            "p",
            vec![ColumnSpec::new("i", DataType::Int).indexed(), ColumnSpec::new("j", DataType::Int).indexed()],
            false,
            UpdateMode::StaticBase,
        )
        .unwrap();
    program
        .declare_predicate(
            "q",
            vec![ColumnSpec::new("i", DataType::Int), ColumnSpec::new("j", DataType::Int)],
            false,
            UpdateMode::Rules(vec![]),
        )
        .unwrap();

    let p = program.predicate("p").unwrap();
    for a in 0..10 {
        let mut b = 0;
        while b < 19 {
            p.borrow_mut().add_row(vec![Value::Int(a), Value::Int(b)]).unwrap();
            b += 2;
        }
    }

    let rule = Goal::new("q", vec![Term::var("i"), Term::var("j")]).if_(vec![
        BodyGoal::atom("p", vec![Term::var("i"), Term::var("j")]),
        BodyGoal::atom("p", vec![Term::var("j"), Term::var("i")]),
    ]);
    program.add_rule("q", rule).unwrap();
    program.end_predicates().unwrap();
    program.tick().unwrap();

    let expected: HashSet<(i64, i64)> = (0..10)
        .flat_map(|a| (0..10).map(move |b| (a, b)))
        .filter(|(a, b)| a % 2 == 0 && b % 2 == 0)
        .collect();
    assert_eq!(pair_rows("q", &program), expected);
}

/// S4 — aggregation: Q(n) :- n == Sum(m | P(m), m % 2 == 0).
#[test]
fn aggregation_sums_even_values() {
    let mut program = Program::new(Config::default());
    program.declare_predicate("p", vec![ColumnSpec::new("n", DataType::Int)], false, UpdateMode::StaticBase).unwrap();
    program.declare_predicate("q", vec![ColumnSpec::new("n", DataType::Int)], false, UpdateMode::Rules(vec![])).unwrap();

    let p = program.predicate("p").unwrap();
    for v in 1..=6 {
        p.borrow_mut().add_row(vec![Value::Int(v)]).unwrap();
    }

    let generator = BodyGoal::And(vec![
        BodyGoal::atom("p", vec![Term::var("m")]),
        BodyGoal::Compare(CmpOp::Eq, ArithExpr::modulo(ArithExpr::var("m"), ArithExpr::int(2)), ArithExpr::int(0)),
    ]);
    let rule = Goal::new("q", vec![Term::var("n")]).if_(vec![BodyGoal::Aggregate {
        kind: inputlayer::goal::AggKind::Sum,
        result: Term::var("n"),
        term: Term::var("m"),
        generator: Box::new(generator),
    }]);
    program.add_rule("q", rule).unwrap();
    program.end_predicates().unwrap();
    program.tick().unwrap();

    assert_eq!(int_rows("q", &program), HashSet::from([12]));
}

/// S5 — negation: U(i,j) :- T(i,j), not S(i,j) where S(i,j) :- T(i,j), i<j.
#[test]
fn negation_keeps_complement() {
    let mut program = Program::new(Config::default());
    program
        .declare_predicate("t", vec![ColumnSpec::new("i", DataType::Int), ColumnSpec::new("j", DataType::Int)], false, UpdateMode::StaticBase)
        .unwrap();
    program
        .declare_predicate("s", vec![ColumnSpec::new("i", DataType::Int), ColumnSpec::new("j", DataType::Int)], false, UpdateMode::Rules(vec![]))
        .unwrap();
    program
        .declare_predicate("u", vec![ColumnSpec::new("i", DataType::Int), ColumnSpec::new("j", DataType::Int)], false, UpdateMode::Rules(vec![]))
        .unwrap();

    let t = program.predicate("t").unwrap();
    for i in 0..10 {
        for j in 0..10 {
            t.borrow_mut().add_row(vec![Value::Int(i), Value::Int(j)]).unwrap();
        }
    }

    let s_rule = Goal::new("s", vec![Term::var("i"), Term::var("j")]).if_(vec![
        BodyGoal::atom("t", vec![Term::var("i"), Term::var("j")]),
        BodyGoal::Compare(CmpOp::Lt, ArithExpr::var("i"), ArithExpr::var("j")),
    ]);
    program.add_rule("s", s_rule).unwrap();

    let u_rule = Goal::new("u", vec![Term::var("i"), Term::var("j")]).if_(vec![
        BodyGoal::atom("t", vec![Term::var("i"), Term::var("j")]),
        BodyGoal::not(BodyGoal::atom("s", vec![Term::var("i"), Term::var("j")])),
    ]);
    program.add_rule("u", u_rule).unwrap();

    program.end_predicates().unwrap();
    program.tick().unwrap();

    let u = pair_rows("u", &program);
    assert_eq!(u.len(), 55);
    assert!(u.iter().all(|(a, b)| a >= b));
}

/// S6 — dedup: a unique base predicate receiving Add(1), Add(1), Add(2)
/// has final length 2, preserving order of first appearance.
#[test]
fn dedup_preserves_first_appearance_order() {
    let mut program = Program::new(Config::default());
    program.declare_predicate("p", vec![ColumnSpec::new("a", DataType::Int)], true, UpdateMode::StaticBase).unwrap();
    let p = program.predicate("p").unwrap();
    let id1 = p.borrow_mut().add_row(vec![Value::Int(1)]).unwrap();
    let id2 = p.borrow_mut().add_row(vec![Value::Int(1)]).unwrap();
    p.borrow_mut().add_row(vec![Value::Int(2)]).unwrap();

    assert_eq!(id1, id2);
    assert_eq!(p.borrow().table.len(), 2);
    let ordered: Vec<i64> = p.borrow().rows().map(|(_, row)| row.field(0).as_int().unwrap()).collect();
    assert_eq!(ordered, vec![1, 2]);
}

/// S7 — stratification: a two-cycle between rule-derived predicates is rejected.
#[test]
fn mutually_recursive_rules_are_rejected() {
    let mut program = Program::new(Config::default());
    program.declare_predicate("p", vec![ColumnSpec::new("n", DataType::Int)], false, UpdateMode::Rules(vec![])).unwrap();
    program.declare_predicate("q", vec![ColumnSpec::new("n", DataType::Int)], false, UpdateMode::Rules(vec![])).unwrap();

    program
        .add_rule("q", Goal::new("q", vec![Term::var("n")]).if_(vec![BodyGoal::atom("p", vec![Term::var("n")])]))
        .unwrap();
    program
        .add_rule("p", Goal::new("p", vec![Term::var("n")]).if_(vec![BodyGoal::atom("q", vec![Term::var("n")])]))
        .unwrap();

    let err = program.end_predicates().unwrap_err();
    assert!(matches!(err, Error::InvalidProgram(_)));
}

/// S8 — dynamic inference: a `DynamicBase` predicate with a counter-returning
/// impure function feeding its `.Add` sub-predicate is classified dynamic
/// and grows by one row every tick.
#[test]
fn impure_rule_is_dynamic_and_grows_every_tick() {
    let mut program = Program::new(Config::default());
    let next = std::rc::Rc::new(std::cell::RefCell::new(0i64));
    program.primitives_mut().register_impure_function("next_tick_count", move |_args| {
        let mut n = next.borrow_mut();
        *n += 1;
        Ok(Value::Int(*n))
    });
    program.declare_predicate("seed", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::StaticBase).unwrap();
    program.predicate("seed").unwrap().borrow_mut().add_row(vec![Value::Int(0)]).unwrap();

    program
        .declare_predicate("counter", vec![ColumnSpec::new("n", DataType::Int)], false, UpdateMode::DynamicBase)
        .unwrap();
    let add_rule = Goal::new("counter.Add", vec![Term::var("n")]).if_(vec![
        BodyGoal::atom("seed", vec![Term::var("_a")]),
        BodyGoal::Eval { var: "n".to_string(), expr: ArithExpr::call("next_tick_count", vec![]) },
    ]);
    program.add_rule("counter.Add", add_rule).unwrap();
    program.end_predicates().unwrap();

    assert!(program.predicate("counter").unwrap().borrow().dynamic);

    for tick in 1..=5u64 {
        program.tick().unwrap();
        assert_eq!(program.predicate("counter").unwrap().borrow().table.len(), tick as usize);
    }
}

/// S9 — `reset()` rolls a `DynamicBase` predicate's `.Add`-queued growth
/// back to its post-`end_predicates()` seed, and clears a `Rules`-derived
/// predicate for the next `tick()` to recompute.
#[test]
fn reset_restores_post_build_state() {
    let mut program = Program::new(Config::default());
    program.declare_predicate("seed", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::StaticBase).unwrap();
    program.predicate("seed").unwrap().borrow_mut().add_row(vec![Value::Int(1)]).unwrap();

    program
        .declare_predicate("counter", vec![ColumnSpec::new("n", DataType::Int)], false, UpdateMode::DynamicBase)
        .unwrap();
    program.predicate("counter").unwrap().borrow_mut().add_row(vec![Value::Int(0)]).unwrap();
    let add_rule = Goal::new("counter.Add", vec![Term::var("a")]).if_(vec![BodyGoal::atom("seed", vec![Term::var("a")])]);
    program.add_rule("counter.Add", add_rule).unwrap();

    program
        .declare_predicate("doubled", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::Rules(vec![]))
        .unwrap();
    let doubled_rule = Goal::new("doubled", vec![Term::var("a")]).if_(vec![BodyGoal::atom("seed", vec![Term::var("a")])]);
    program.add_rule("doubled", doubled_rule).unwrap();

    program.end_predicates().unwrap();
    program.tick().unwrap();
    assert_eq!(program.predicate("counter").unwrap().borrow().table.len(), 2);
    assert_eq!(int_rows("doubled", &program), HashSet::from([1]));

    program.tick().unwrap();
    assert_eq!(program.predicate("counter").unwrap().borrow().table.len(), 3);

    program.reset().unwrap();
    assert_eq!(int_rows("counter", &program), HashSet::from([0]));
    assert_eq!(program.predicate("doubled").unwrap().borrow().table.len(), 0);

    program.tick().unwrap();
    assert_eq!(program.predicate("counter").unwrap().borrow().table.len(), 2);
    assert_eq!(int_rows("doubled", &program), HashSet::from([1]));
}

/// S10 — `Problems` is a user-populated diagnostics channel: a host rule
/// attached to `Problems.Add` flags a condition, read back via
/// `Program::problems()`, and the engine itself never writes to it.
#[test]
fn problems_is_populated_only_by_host_rules() {
    let mut program = Program::new(Config::default());
    program
        .declare_predicate("overdue", vec![ColumnSpec::new("name", DataType::String)], false, UpdateMode::StaticBase)
        .unwrap();
    program.predicate("overdue").unwrap().borrow_mut().add_row(vec![Value::string("invoice-7")]).unwrap();

    let flag_rule = Goal::new("Problems.Add", vec![Term::str("overdue"), Term::var("name")])
        .if_(vec![BodyGoal::atom("overdue", vec![Term::var("name")])]);
    program.add_rule("Problems.Add", flag_rule).unwrap();

    program.end_predicates().unwrap();
    assert!(program.problems().is_empty());

    program.tick().unwrap();
    assert_eq!(program.problems(), vec![("overdue".to_string(), "invoice-7".to_string())]);
}
