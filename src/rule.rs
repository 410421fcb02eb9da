//! Compiled rules and the executor that runs them once per tick.

use crate::call::Call;
use crate::error::Error;
use crate::pattern::Pattern;
use crate::predicate::PredicateRef;
use crate::row::Row;

/// One compiled rule: a head pattern over the owning predicate's columns,
/// and a body call tree (usually an `And` of subgoals) that must succeed
/// for the head to be written.
pub struct CompiledRule {
    /// Index of this rule within its predicate's rule list; used to
    /// attribute a `RuleExecution` error to the rule that raised it.
    pub index: usize,
    pub head: Pattern,
    pub body: Call,
    /// Whether this rule's body calls an impure primitive/function or
    /// samples randomly. Forces the owning predicate to be dynamic.
    pub calls_impure: bool,
}

impl CompiledRule {
    pub fn new(index: usize, head: Pattern, body: Call, calls_impure: bool) -> Self {
        CompiledRule { index, head, body, calls_impure }
    }

    /// Run every solution of the body to completion, writing one head row
    /// per solution into `target`. A primitive or function raised error is
    /// wrapped with this rule's index and the owning predicate's name
    /// before being returned; the caller is expected to log it against the
    /// `Exceptions` predicate and continue with the next rule.
    pub fn evaluate(&self, predicate_name: &str, target: &PredicateRef) -> Result<usize, Error> {
        self.run(predicate_name, |row| {
            target.borrow_mut().table.add(row)?;
            Ok(())
        })
    }

    /// Run every solution, queuing each head row as an `.Add` append on
    /// `target` (applied at end-of-tick). Only meaningful against a
    /// `DynamicBase` predicate.
    pub fn evaluate_into_add(&self, predicate_name: &str, target: &PredicateRef) -> Result<usize, Error> {
        self.run(predicate_name, |row| {
            target.borrow_mut().queue_add(row);
            Ok(())
        })
    }

    /// Run every solution, splitting each head row on `target`'s key
    /// columns and queuing a `.Set` column-update for every remaining
    /// column (applied at end-of-tick, after `.Add`). Only meaningful
    /// against a `DynamicBase` predicate declaring a `Key`/`JointKey` column.
    pub fn evaluate_into_set(&self, predicate_name: &str, target: &PredicateRef) -> Result<usize, Error> {
        self.run(predicate_name, |row| {
            let mut t = target.borrow_mut();
            let key_columns = t.key_columns();
            if key_columns.is_empty() {
                return Err(Error::invalid_program(format!(
                    "'{predicate_name}.Set' requires the target predicate to declare a Key/JointKey column"
                )));
            }
            let fields = row.fields().to_vec();
            let key: Vec<_> = key_columns.iter().map(|&i| fields[i].clone()).collect();
            for (i, value) in fields.into_iter().enumerate() {
                if !key_columns.contains(&i) {
                    t.queue_set(key.clone(), i, value);
                }
            }
            Ok(())
        })
    }

    /// Drive the body to exhaustion, handing each materialized head row to
    /// `sink`. Shared by `evaluate`/`evaluate_into_add`/`evaluate_into_set`,
    /// which differ only in where a successful solution's row ends up.
    fn run(&self, predicate_name: &str, mut sink: impl FnMut(Row) -> Result<(), Error>) -> Result<usize, Error> {
        self.body.reset();
        let mut written = 0;
        loop {
            match self.body.next_solution() {
                Ok(true) => {
                    let row = self.head.materialize();
                    sink(row)?;
                    written += 1;
                }
                Ok(false) => break,
                Err(cause) => {
                    return Err(Error::RuleExecution {
                        predicate: predicate_name.to_string(),
                        rule_index: self.index,
                        subgoal_index: 0,
                        cause: cause.to_string(),
                    });
                }
            }
        }
        self.body.reset();
        Ok(written)
    }
}
