//! Patterns and match operations.
//!
//! A [`Pattern`] is an arity-N array of per-column [`MatchOp`]s. `matches`
//! attempts the pattern against an existing row (table scans, index probes);
//! `materialize` runs it the other direction, building a fresh row out of
//! the pattern's cells (used once per rule success, to write the head
//! tuple).

use crate::cell::Cell;
use crate::row::Row;
use crate::value::Value;

/// One column's role in a pattern.
#[derive(Clone, Debug)]
pub enum MatchOp {
    /// Row field must equal the cell's current (already-bound) value.
    Read(Cell),
    /// Row field is copied into the cell; always succeeds as a match step.
    Write(Cell),
    /// Row field must equal this interned constant's value. Behaves like
    /// `Read` during matching; kept distinct so head compilation and
    /// diagnostics can tell "matched a literal" from "matched a variable".
    Constant(Cell),
    /// No constraint, no side effect.
    Ignore,
}

impl MatchOp {
    /// Is this column bound (must already hold a value) when matching?
    pub fn is_read_position(&self) -> bool {
        matches!(self, MatchOp::Read(_) | MatchOp::Constant(_))
    }

    /// Attempt this one column's directive against `field`. Shared by
    /// [`Pattern::matches`] and by the `In` call, which matches a bare
    /// value (a list element) rather than a whole row.
    pub(crate) fn match_value(&self, field: &Value) -> bool {
        match self {
            MatchOp::Read(cell) | MatchOp::Constant(cell) => cell
                .get()
                .map(|v| v.canonical_eq(field))
                .unwrap_or(false),
            MatchOp::Write(cell) => {
                cell.set(field.clone());
                true
            }
            MatchOp::Ignore => true,
        }
    }

    /// Value to place in a materialized row's column for this op.
    fn materialize_value(&self) -> Value {
        match self {
            MatchOp::Read(cell) | MatchOp::Write(cell) | MatchOp::Constant(cell) => {
                cell.get().expect("head pattern cell must be bound")
            }
            MatchOp::Ignore => {
                panic!("Ignore op cannot appear in a head pattern column")
            }
        }
    }
}

/// The per-column directives for one goal (a table scan, an index probe, or
/// a rule's head).
#[derive(Clone, Debug)]
pub struct Pattern(Vec<MatchOp>);

impl Pattern {
    pub fn new(ops: Vec<MatchOp>) -> Self {
        Pattern(ops)
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn ops(&self) -> &[MatchOp] {
        &self.0
    }

    /// True if every column is a `Read`/`Constant` — "instantiated" per the
    /// glossary — so a row-set/key probe can be used instead of a scan.
    pub fn is_instantiated(&self) -> bool {
        self.0.iter().all(MatchOp::is_read_position)
    }

    /// Column indices that must already be bound before this pattern runs.
    pub fn read_columns(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, op)| op.is_read_position())
            .map(|(i, _)| i)
            .collect()
    }

    /// Attempt the pattern against `row`, short-circuiting left to right.
    /// `Write` ops mutate their cell as they are reached; if a later column
    /// fails, those writes are stale but harmless because the caller only
    /// trusts cell contents after a `true` return.
    pub fn matches(&self, row: &Row) -> bool {
        if row.arity() != self.0.len() {
            return false;
        }
        for (i, op) in self.0.iter().enumerate() {
            if !op.match_value(row.field(i)) {
                return false;
            }
        }
        true
    }

    /// Read the pattern's current Read/Constant-bound values, in column
    /// order, without attempting a match — used to build a probe key for a
    /// row-set/key/general index lookup.
    pub fn instantiated_values(&self) -> Option<Vec<Value>> {
        self.0
            .iter()
            .map(|op| match op {
                MatchOp::Read(c) | MatchOp::Constant(c) => c.get(),
                _ => None,
            })
            .collect()
    }

    /// Build a fresh row from the pattern's cells — used to write a rule's
    /// head tuple into its predicate's table.
    pub fn materialize(&self) -> Row {
        Row::new(self.0.iter().map(MatchOp::materialize_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_match_round_trips() {
        let cell = Cell::new_var();
        let pattern = Pattern::new(vec![MatchOp::Write(cell.clone()), MatchOp::Ignore]);
        let row = Row::new(vec![Value::Int(5), Value::Bool(true)]);
        assert!(pattern.matches(&row));
        assert_eq!(cell.get(), Some(Value::Int(5)));
    }

    #[test]
    fn read_rejects_mismatch() {
        let cell = Cell::new_const(Value::Int(1));
        let pattern = Pattern::new(vec![MatchOp::Read(cell)]);
        assert!(!pattern.matches(&Row::new(vec![Value::Int(2)])));
        assert!(pattern.matches(&Row::new(vec![Value::Int(1)])));
    }

    #[test]
    fn materialize_builds_row_from_cells() {
        let a = Cell::new_var();
        a.set(Value::Int(9));
        let b = Cell::new_const(Value::Bool(false));
        let pattern = Pattern::new(vec![MatchOp::Write(a), MatchOp::Constant(b)]);
        let row = pattern.materialize();
        assert_eq!(row.fields(), &[Value::Int(9), Value::Bool(false)]);
    }

    #[test]
    fn instantiated_pattern_has_no_write_ops() {
        let cell = Cell::new_const(Value::Int(1));
        let instantiated = Pattern::new(vec![MatchOp::Constant(cell.clone()), MatchOp::Read(cell)]);
        assert!(instantiated.is_instantiated());

        let with_write = Pattern::new(vec![MatchOp::Write(Cell::new_var())]);
        assert!(!with_write.is_instantiated());
    }
}
