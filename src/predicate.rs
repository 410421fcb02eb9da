//! Predicates: a named, typed relation, its table, its indices, and the
//! rules (or operator) that derive its extent.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::config::TableConfig;
use crate::error::Error;
use crate::index::{GeneralIndex, KeyIndex, RowSetIndex, TableIndex};
use crate::operators::TableOperator;
use crate::row::{Row, RowId};
use crate::rule::CompiledRule;
use crate::table::TupleTable;
use crate::value::{DataType, Value};

/// How a column participates in lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// No index over this column alone.
    None,
    /// A multi-row general index over this column alone.
    Indexed,
    /// This column alone is a unique key (single-column `KeyIndex`).
    Key,
    /// This column is one part of a composite key; all `JointKey` columns
    /// of a predicate combine into a single `KeyIndex`.
    JointKey,
}

/// One column's declaration.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
    pub index_mode: IndexMode,
    /// Index priority: when more than one index could answer a goal,
    /// higher priority wins.
    pub priority: i32,
    pub default: Option<Value>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnSpec {
            name: name.into(),
            data_type,
            index_mode: IndexMode::None,
            priority: 0,
            default: None,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.index_mode = IndexMode::Indexed;
        self
    }

    pub fn key(mut self) -> Self {
        self.index_mode = IndexMode::Key;
        self
    }

    pub fn joint_key(mut self) -> Self {
        self.index_mode = IndexMode::JointKey;
        self
    }

    pub fn priority(mut self, p: i32) -> Self {
        self.priority = p;
        self
    }

    pub fn default(mut self, v: Value) -> Self {
        self.default = Some(v);
        self
    }
}

/// How a predicate's extent is produced and kept current across ticks.
pub enum UpdateMode {
    /// Seeded once at build time (`Initially`/`AddRow`), never touched again.
    StaticBase,
    /// Seeded at build time, then modified per-tick by `.Add`/`.Set`.
    DynamicBase,
    /// Re-derived each tick: the table is cleared, then every rule runs.
    Rules(Vec<CompiledRule>),
    /// Computed by an opaque transform over declared input predicates.
    Operator(TableOperator),
}

impl UpdateMode {
    pub fn is_rules(&self) -> bool {
        matches!(self, UpdateMode::Rules(_))
    }
}

/// A named, typed relation: schema, extent, indices, and derivation recipe.
pub struct Predicate {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub table: TupleTable,
    pub mode: UpdateMode,
    /// Predicates this one's rules directly depend on (by name). Populated
    /// at rule-compile time, consumed by stratification.
    pub dependencies: HashSet<String>,
    /// Whether this predicate must be recomputed every tick; set by
    /// dynamicity inference at `end_predicates()`.
    pub dynamic: bool,
    fresh_this_tick: bool,
    pending_adds: Vec<Row>,
    pending_sets: Vec<(Vec<Value>, usize, Value)>,
    /// Rows present right after `end_predicates()` builds this predicate,
    /// snapshotted for `reset()` to restore a `DynamicBase` table to.
    initial_rows: Vec<Row>,
    /// Rules attached to this predicate's `.Add` sub-predicate (valid only
    /// for `DynamicBase`); each success queues a new row via `queue_add`.
    pub(crate) add_rules: Vec<CompiledRule>,
    /// Rules attached to this predicate's `.Set` sub-predicate (valid only
    /// for `DynamicBase`); each success queues one `queue_set` per non-key
    /// column of the materialized row.
    pub(crate) set_rules: Vec<CompiledRule>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>, unique: bool, mode: UpdateMode) -> Self {
        Self::with_capacity(name, columns, unique, mode, &TableConfig::default())
    }

    /// Like [`Self::new`], sizing the table and its general indices up front
    /// from `table_config` (`Config::tables`) instead of growing from empty.
    pub fn with_capacity(
        name: impl Into<String>,
        columns: Vec<ColumnSpec>,
        unique: bool,
        mode: UpdateMode,
        table_config: &TableConfig,
    ) -> Self {
        let name = name.into();
        let mut table = TupleTable::with_capacity(name.clone(), columns.len(), unique, table_config.initial_capacity);

        if unique {
            table.add_index(TableIndex::RowSet(RowSetIndex::new(vec![])));
        }

        let joint_key_cols: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.index_mode == IndexMode::JointKey)
            .map(|(i, _)| i)
            .collect();
        if !joint_key_cols.is_empty() {
            table.add_index(TableIndex::Key(KeyIndex::new(joint_key_cols, i32::MAX)));
        }

        // Only `DynamicBase` predicates ever call `.Set` (the sole path that
        // removes a row from a general index, to replace it with an updated
        // one); every other mode's general indices are declared immutable so
        // an accidental `Remove` elsewhere raises `Error::IndexContract`
        // instead of silently desyncing the index.
        let general_indices_mutable = matches!(mode, UpdateMode::DynamicBase);
        for (i, col) in columns.iter().enumerate() {
            match col.index_mode {
                IndexMode::Key => {
                    table.add_index(TableIndex::Key(KeyIndex::new(vec![i], col.priority)));
                }
                IndexMode::Indexed => {
                    table.add_index(TableIndex::General(GeneralIndex::with_capacity(
                        vec![i],
                        col.priority,
                        general_indices_mutable,
                        table_config.general_index.initial_capacity,
                    )));
                }
                IndexMode::None | IndexMode::JointKey => {}
            }
        }

        // Base predicates are seeded and current from the moment they're
        // built; Rules/Operator predicates haven't derived anything yet, so
        // the first tick must compute them regardless of dynamicity.
        let fresh_this_tick = matches!(mode, UpdateMode::StaticBase | UpdateMode::DynamicBase);

        Predicate {
            name,
            columns,
            table,
            mode,
            dependencies: HashSet::new(),
            dynamic: false,
            fresh_this_tick,
            pending_adds: Vec::new(),
            pending_sets: Vec::new(),
            initial_rows: Vec::new(),
            add_rules: Vec::new(),
            set_rules: Vec::new(),
        }
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Append a row directly. Valid for static and dynamic base predicates
    /// at build time, and for dynamic base predicates via an `.Add`
    /// sub-predicate at tick time.
    pub fn add_row(&mut self, values: Vec<Value>) -> Result<RowId, Error> {
        self.table.add(Row::new(values))
    }

    /// Queue a value to replace `column` of the row keyed by `key`. `.Set`
    /// sub-predicates batch column-updates keyed by a key index and apply
    /// at end-of-tick.
    pub fn queue_set(&mut self, key: Vec<Value>, column: usize, value: Value) {
        self.pending_sets.push((key, column, value));
    }

    /// Queue a row to append at end-of-tick via an `.Add` sub-predicate.
    pub fn queue_add(&mut self, row: Row) {
        self.pending_adds.push(row);
    }

    /// Apply queued `.Add`/`.Set` mutations. `.Set` applies after rule
    /// evaluation and after `.Add`.
    pub(crate) fn apply_pending(&mut self) -> Result<(), Error> {
        let adds = std::mem::take(&mut self.pending_adds);
        for row in adds {
            self.table.add(row)?;
        }

        let sets = std::mem::take(&mut self.pending_sets);
        for (key, column, value) in sets {
            let row_id = self.key_row_id(&key);
            if let Some(id) = row_id {
                if let Some(existing) = self.table.get(id) {
                    let mut fields = existing.fields().to_vec();
                    fields[column] = value;
                    self.table.remove(id)?;
                    self.table.add(Row::new(fields))?;
                }
            }
        }
        Ok(())
    }

    fn key_row_id(&self, key: &[Value]) -> Option<RowId> {
        self.table.indices().iter().find_map(|idx| match idx {
            TableIndex::Key(k) if k.columns() == self.key_columns().as_slice() => {
                k.row_with_key(key)
            }
            _ => None,
        })
    }

    pub(crate) fn key_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.index_mode == IndexMode::Key || c.index_mode == IndexMode::JointKey)
            .map(|(i, _)| i)
            .collect()
    }

    /// The row matching a single-column key, or `None`.
    pub fn lookup_key(&self, column: usize, key: &Value) -> Option<(RowId, &Row)> {
        self.table.indices().iter().find_map(|idx| match idx {
            TableIndex::Key(k) if k.columns() == [column] => {
                k.row_with_key(std::slice::from_ref(key))
                    .and_then(|id| self.table.get(id).map(|r| (id, r)))
            }
            _ => None,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.table.iter()
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh_this_tick
    }

    pub fn mark_stale(&mut self) {
        if self.dynamic {
            self.fresh_this_tick = false;
        }
    }

    pub fn mark_fresh(&mut self) {
        self.fresh_this_tick = true;
    }

    /// Capture the current table contents as the post-build state `reset()`
    /// restores to. Called once by `end_predicates()`.
    pub(crate) fn snapshot_initial(&mut self) {
        self.initial_rows = self.table.iter().map(|(_, row)| row.clone()).collect();
    }

    /// Restore this predicate to its post-build state: static bases are
    /// untouched, dynamic bases revert to their snapshotted rows (discarding
    /// any `.Add`/`.Set` mutations since), and derived tables are cleared and
    /// marked stale so the next tick recomputes them.
    pub(crate) fn reset_to_initial(&mut self) -> Result<(), Error> {
        self.pending_adds.clear();
        self.pending_sets.clear();
        match &self.mode {
            UpdateMode::StaticBase => {}
            UpdateMode::DynamicBase => {
                self.table.clear();
                let rows = self.initial_rows.clone();
                for row in rows {
                    self.table.add(row)?;
                }
                self.fresh_this_tick = true;
            }
            UpdateMode::Rules(_) | UpdateMode::Operator(_) => {
                self.table.clear();
                self.fresh_this_tick = false;
            }
        }
        Ok(())
    }
}

/// A shared handle to a predicate, cloned into every `Call` and rule that
/// references it. Single-threaded, so plain `Rc<RefCell<_>>` with no
/// internal locking.
pub type PredicateRef = Rc<RefCell<Predicate>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_column_rejects_colliding_key() {
        let columns = vec![ColumnSpec::new("k", DataType::Int).key(), ColumnSpec::new("v", DataType::Int)];
        let mut p = Predicate::new("p", columns, false, UpdateMode::StaticBase);
        p.add_row(vec![Value::Int(1), Value::Int(10)]).unwrap();
        let err = p.add_row(vec![Value::Int(1), Value::Int(99)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn lookup_key_finds_row() {
        let columns = vec![ColumnSpec::new("k", DataType::Int).key(), ColumnSpec::new("v", DataType::Int)];
        let mut p = Predicate::new("p", columns, false, UpdateMode::StaticBase);
        p.add_row(vec![Value::Int(1), Value::Int(10)]).unwrap();
        let (_, row) = p.lookup_key(0, &Value::Int(1)).unwrap();
        assert_eq!(row.field(1), &Value::Int(10));
        assert!(p.lookup_key(0, &Value::Int(2)).is_none());
    }
}
