//! # inputlayer
//!
//! An embedded, in-memory deductive database for simulation and agent
//! workloads: declare typed predicates, attach Datalog-style rules to the
//! ones you want derived, and advance the whole program one tick at a time.
//!
//! ## Model
//!
//! A [`Program`] owns every [`Predicate`](predicate::Predicate) — a named,
//! typed relation backed by a [`TupleTable`](table::TupleTable) and whatever
//! [`TableIndex`](index::TableIndex)es its columns ask for. A predicate's
//! extent comes from one of four places: seeded once and left alone
//! (`StaticBase`), seeded then mutated per-tick through `.Add`/`.Set`
//! (`DynamicBase`), re-derived every tick from a set of compiled rules
//! (`Rules`), or computed by a [`TableOperator`](operators::TableOperator)
//! over other predicates (`Operator`).
//!
//! Rules are built with the [`Goal`](goal::Goal) builder API — `head.if_(body)`
//! or `head.fact()` — and compiled by [`compile::compile_rule`] into a
//! [`CompiledRule`](rule::CompiledRule): a head [`Pattern`](pattern::Pattern)
//! plus a body [`Call`](call::Call) tree of backtracking cursors. Declaration
//! happens inside a `declare_predicate`/`add_rule` bracket; [`Program::end_predicates`]
//! closes it, computing strongly-connected components over the rule
//! dependency graph and rejecting any cycle before the program can run.
//!
//! ## Example
//!
//! ```
//! use inputlayer::config::Config;
//! use inputlayer::goal::{BodyGoal, Goal, Term};
//! use inputlayer::predicate::{ColumnSpec, UpdateMode};
//! use inputlayer::program::Program;
//! use inputlayer::value::{DataType, Value};
//!
//! let mut program = Program::new(Config::default());
//! program
//!     .declare_predicate("edge", vec![ColumnSpec::new("a", DataType::Int), ColumnSpec::new("b", DataType::Int)], false, UpdateMode::StaticBase)
//!     .unwrap();
//! program
//!     .declare_predicate("reachable", vec![ColumnSpec::new("a", DataType::Int), ColumnSpec::new("b", DataType::Int)], false, UpdateMode::Rules(vec![]))
//!     .unwrap();
//!
//! program.predicate("edge").unwrap().borrow_mut().add_row(vec![Value::Int(1), Value::Int(2)]).unwrap();
//! program.predicate("edge").unwrap().borrow_mut().add_row(vec![Value::Int(2), Value::Int(3)]).unwrap();
//!
//! let base = Goal::new("reachable", vec![Term::var("x"), Term::var("y")])
//!     .if_(vec![BodyGoal::atom("edge", vec![Term::var("x"), Term::var("y")])]);
//! let step = Goal::new("reachable", vec![Term::var("x"), Term::var("z")]).if_(vec![
//!     BodyGoal::atom("reachable", vec![Term::var("x"), Term::var("y")]),
//!     BodyGoal::atom("edge", vec![Term::var("y"), Term::var("z")]),
//! ]);
//! program.add_rule("reachable", base).unwrap();
//! program.add_rule("reachable", step).unwrap();
//!
//! program.end_predicates().unwrap();
//! program.tick().unwrap();
//! assert_eq!(program.predicate("reachable").unwrap().borrow().table.len(), 3);
//! ```
//!
//! ## Module organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`value`] | The typed [`Value`](value::Value) register contents and [`DataType`](value::DataType) witnesses |
//! | [`row`] | Arity-generic [`Row`](row::Row) storage and [`RowId`](row::RowId) |
//! | [`cell`] | Shared mutable [`Cell`](cell::Cell) registers and constant interning |
//! | [`pattern`] | Per-column [`MatchOp`](pattern::MatchOp) directives and [`Pattern`](pattern::Pattern) |
//! | [`table`] | [`TupleTable`](table::TupleTable): append, scan, and compact rows |
//! | [`index`] | Row-set, key, and general indices attached to a table |
//! | [`predicate`] | [`Predicate`](predicate::Predicate): schema, extent, and update recipe |
//! | [`goal`] | The host-facing AST: [`Term`](goal::Term), [`BodyGoal`](goal::BodyGoal), [`Goal`](goal::Goal) |
//! | [`primitive`] | Registry of host-supplied test/function primitives |
//! | [`call`] | Compiled backtracking cursors (the `Call` tree) |
//! | [`rule`] | [`CompiledRule`](rule::CompiledRule) and its per-tick executor |
//! | [`compile`] | Translates a [`RuleDef`](goal::RuleDef) into a `CompiledRule` |
//! | [`operators`] | Table operators: `CountsBy`, `Closure`, `EquivalenceClass`, greedy/random assignment |
//! | [`program`] | [`Program`](program::Program): predicate registry, stratification, the tick loop |
//! | [`config`] | Hierarchical configuration for storage tuning, seeding, and logging |
//! | [`error`] | The crate's [`Error`](error::Error) enum |

pub mod call;
pub mod cell;
pub mod compile;
pub mod config;
pub mod error;
pub mod goal;
pub mod index;
pub mod operators;
pub mod pattern;
pub mod predicate;
pub mod primitive;
pub mod program;
pub mod row;
pub mod rule;
pub mod table;
pub mod value;

pub use error::{Error, Result};
pub use program::Program;
pub use value::{DataType, Value};
