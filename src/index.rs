//! Indices: three variants over a table, each re-derivable from the table's
//! rows and each exposing the lookup its `Call` flavor needs.
//!
//! - [`RowSetIndex`] — full-tuple membership, used for dedup and for fully
//!   instantiated probes.
//! - [`KeyIndex`] — single-row-per-key lookup; a colliding insert is fatal.
//! - [`GeneralIndex`] — multi-row-per-key chains via a parallel "next row
//!   with same value" array.

use std::collections::HashMap;

use crate::error::Error;
use crate::pattern::Pattern;
use crate::row::{Row, RowId};
use crate::value::Value;

/// One index attached to a [`crate::table::TupleTable`].
pub enum TableIndex {
    RowSet(RowSetIndex),
    Key(KeyIndex),
    General(GeneralIndex),
}

impl TableIndex {
    pub fn columns(&self) -> &[usize] {
        match self {
            TableIndex::RowSet(_) => &[],
            TableIndex::Key(k) => &k.columns,
            TableIndex::General(g) => &g.columns,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            TableIndex::RowSet(r) => r.priority,
            TableIndex::Key(k) => k.priority,
            TableIndex::General(g) => g.priority,
        }
    }

    pub(crate) fn on_insert(&mut self, id: RowId, row: &Row) {
        match self {
            TableIndex::RowSet(r) => r.insert(id, row),
            TableIndex::Key(k) => k.insert_unchecked(id, row),
            TableIndex::General(g) => g.insert(id, row),
        }
    }

    /// Remove `row` (at `id`) from this index. Fails with
    /// [`Error::IndexContract`] if this is a [`GeneralIndex`] that was
    /// declared immutable — `spec.md` §4.2/§7: general-index mutation
    /// requires the index to opt in.
    pub(crate) fn on_remove(&mut self, id: RowId, row: &Row) -> Result<(), Error> {
        match self {
            TableIndex::RowSet(r) => {
                r.remove(row);
                Ok(())
            }
            TableIndex::Key(k) => {
                k.remove(row);
                Ok(())
            }
            TableIndex::General(g) => {
                if !g.mutable {
                    return Err(Error::index_contract(format!(
                        "general index on columns {:?} is not mutable; Remove requires mutable=true",
                        g.columns
                    )));
                }
                g.remove(id, row);
                Ok(())
            }
        }
    }

    /// Read-only precondition check for [`Self::on_remove`]: lets a caller
    /// that removes across several indices verify all of them accept the
    /// removal before mutating any.
    pub(crate) fn check_removable(&self) -> Result<(), Error> {
        if let TableIndex::General(g) = self {
            if !g.mutable {
                return Err(Error::index_contract(format!(
                    "general index on columns {:?} is not mutable; Remove requires mutable=true",
                    g.columns
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        match self {
            TableIndex::RowSet(r) => r.map.clear(),
            TableIndex::Key(k) => k.map.clear(),
            TableIndex::General(g) => g.clear(),
        }
    }

    /// Does this index's column set match the pattern's bound (Read)
    /// positions? A row-set index matches only a fully instantiated
    /// pattern; key/general indices match when their declared columns are
    /// exactly the pattern's bound columns.
    pub fn can_match_on(&self, pattern: &Pattern) -> bool {
        match self {
            TableIndex::RowSet(_) => pattern.is_instantiated(),
            TableIndex::Key(k) => pattern.read_columns() == k.columns,
            TableIndex::General(g) => pattern.read_columns() == g.columns,
        }
    }
}

/// Full-tuple hash-set membership index; backs table dedup and instantiated
/// probes. Collisions are resolved by `HashMap`'s own open addressing.
pub struct RowSetIndex {
    columns: Vec<usize>,
    priority: i32,
    map: HashMap<Vec<Value>, RowId>,
}

impl RowSetIndex {
    pub fn new(columns: Vec<usize>) -> Self {
        RowSetIndex {
            columns,
            priority: i32::MAX, // row-set always wins when applicable
            map: HashMap::new(),
        }
    }

    fn insert(&mut self, id: RowId, row: &Row) {
        self.map.insert(row.fields().to_vec(), id);
    }

    fn remove(&mut self, row: &Row) {
        self.map.remove(row.fields());
    }

    pub fn row_with_tuple(&self, tuple: &[Value]) -> Option<RowId> {
        self.map.get(tuple).copied()
    }
}

/// Unique-key hash index: one row id per key. Inserting a colliding key is
/// a [`crate::error::Error::DuplicateKey`] at the table layer (checked
/// before mutation, see [`crate::table::TupleTable::add`]); this type only
/// tracks the mapping.
pub struct KeyIndex {
    columns: Vec<usize>,
    priority: i32,
    map: HashMap<Vec<Value>, RowId>,
}

impl KeyIndex {
    pub fn new(columns: Vec<usize>, priority: i32) -> Self {
        KeyIndex {
            columns,
            priority,
            map: HashMap::new(),
        }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    fn insert_unchecked(&mut self, id: RowId, row: &Row) {
        self.map.insert(row.project(&self.columns), id);
    }

    fn remove(&mut self, row: &Row) {
        self.map.remove(&row.project(&self.columns));
    }

    pub fn row_with_key(&self, key: &[Value]) -> Option<RowId> {
        self.map.get(key).copied()
    }
}

/// Multi-row-per-key hash index. `next[row_id]` threads a singly-linked
/// chain of rows sharing a key, head-first: the most recently inserted row
/// for a given key enumerates first.
pub struct GeneralIndex {
    columns: Vec<usize>,
    priority: i32,
    mutable: bool,
    heads: HashMap<Vec<Value>, RowId>,
    next: Vec<RowId>,
}

impl GeneralIndex {
    pub fn new(columns: Vec<usize>, priority: i32, mutable: bool) -> Self {
        Self::with_capacity(columns, priority, mutable, 0)
    }

    /// Like [`Self::new`], reserving `initial_capacity` buckets up front
    /// (`Config::tables.general_index.initial_capacity`).
    pub fn with_capacity(columns: Vec<usize>, priority: i32, mutable: bool, initial_capacity: usize) -> Self {
        GeneralIndex {
            columns,
            priority,
            mutable,
            heads: HashMap::with_capacity(initial_capacity),
            next: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    fn ensure_slot(&mut self, id: RowId) {
        if self.next.len() <= id.index() {
            self.next.resize(id.index() + 1, RowId::NONE);
        }
    }

    fn insert(&mut self, id: RowId, row: &Row) {
        self.ensure_slot(id);
        let key = row.project(&self.columns);
        let prev_head = self.heads.get(&key).copied().unwrap_or(RowId::NONE);
        self.next[id.index()] = prev_head;
        self.heads.insert(key, id);
    }

    /// Remove `id` from its chain. Requires the index to be declared
    /// mutable; the caller ([`crate::table::TupleTable::remove`]) is
    /// trusted to have checked that already, since mutability is enforced
    /// at the predicate API boundary.
    fn remove(&mut self, id: RowId, row: &Row) {
        let key = row.project(&self.columns);
        let Some(&head) = self.heads.get(&key) else {
            return;
        };
        if head == id {
            let new_head = self.next.get(id.index()).copied().unwrap_or(RowId::NONE);
            if new_head.is_none() {
                self.heads.remove(&key);
            } else {
                self.heads.insert(key, new_head);
            }
            return;
        }
        let mut cursor = head;
        while !cursor.is_none() {
            let nxt = self.next[cursor.index()];
            if nxt == id {
                self.next[cursor.index()] = self.next.get(id.index()).copied().unwrap_or(RowId::NONE);
                break;
            }
            cursor = nxt;
        }
    }

    fn clear(&mut self) {
        self.heads.clear();
        self.next.clear();
    }

    pub fn first_row_with_value(&self, key: &[Value]) -> RowId {
        self.heads.get(key).copied().unwrap_or(RowId::NONE)
    }

    pub fn next_row_with_value(&self, prev: RowId) -> RowId {
        self.next.get(prev.index()).copied().unwrap_or(RowId::NONE)
    }

    /// Cardinality of each distinct key — the primitive `CountsBy` builds on.
    pub fn counts_by_key(&self) -> impl Iterator<Item = (&Vec<Value>, usize)> {
        self.heads.keys().map(move |key| {
            let mut count = 0;
            let mut cursor = self.first_row_with_value(key);
            while !cursor.is_none() {
                count += 1;
                cursor = self.next_row_with_value(cursor);
            }
            (key, count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(a: i64, b: i64) -> Row {
        Row::new(vec![Value::Int(a), Value::Int(b)])
    }

    #[test]
    fn key_index_round_trips() {
        let mut idx = KeyIndex::new(vec![0], 0);
        idx.insert_unchecked(RowId(0), &row(1, 10));
        idx.insert_unchecked(RowId(1), &row(2, 20));
        assert_eq!(idx.row_with_key(&[Value::Int(1)]), Some(RowId(0)));
        assert_eq!(idx.row_with_key(&[Value::Int(9)]), None);
    }

    #[test]
    fn general_index_chains_enumerate_all_rows_no_dupes() {
        let mut idx = GeneralIndex::new(vec![0], 0, true);
        idx.insert(RowId(0), &row(1, 100));
        idx.insert(RowId(1), &row(1, 200));
        idx.insert(RowId(2), &row(2, 300));

        let key = vec![Value::Int(1)];
        let mut seen = vec![];
        let mut cursor = idx.first_row_with_value(&key);
        while !cursor.is_none() {
            seen.push(cursor);
            cursor = idx.next_row_with_value(cursor);
        }
        seen.sort();
        assert_eq!(seen, vec![RowId(0), RowId(1)]);
    }

    #[test]
    fn general_index_remove_relinks_chain() {
        let mut idx = GeneralIndex::new(vec![0], 0, true);
        idx.insert(RowId(0), &row(1, 1));
        idx.insert(RowId(1), &row(1, 2));
        idx.insert(RowId(2), &row(1, 3));

        idx.remove(RowId(1), &row(1, 2));

        let key = vec![Value::Int(1)];
        let mut seen = vec![];
        let mut cursor = idx.first_row_with_value(&key);
        while !cursor.is_none() {
            seen.push(cursor);
            cursor = idx.next_row_with_value(cursor);
        }
        seen.sort();
        assert_eq!(seen, vec![RowId(0), RowId(2)]);
    }

    #[test]
    fn counts_by_key_reports_cardinality() {
        let mut idx = GeneralIndex::new(vec![0], 0, false);
        idx.insert(RowId(0), &row(1, 0));
        idx.insert(RowId(1), &row(1, 0));
        idx.insert(RowId(2), &row(2, 0));
        let counts: HashMap<_, _> = idx.counts_by_key().map(|(k, c)| (k.clone(), c)).collect();
        assert_eq!(counts.get(&vec![Value::Int(1)]), Some(&2));
        assert_eq!(counts.get(&vec![Value::Int(2)]), Some(&1));
    }

    #[test]
    fn immutable_general_index_rejects_remove() {
        let mut table_index = TableIndex::General(GeneralIndex::new(vec![0], 0, false));
        table_index.on_insert(RowId(0), &row(1, 1));
        let err = table_index.on_remove(RowId(0), &row(1, 1)).unwrap_err();
        assert!(matches!(err, Error::IndexContract(_)));
        assert!(table_index.check_removable().is_err());
    }

    #[test]
    fn mutable_general_index_allows_remove() {
        let mut table_index = TableIndex::General(GeneralIndex::new(vec![0], 0, true));
        table_index.on_insert(RowId(0), &row(1, 1));
        assert!(table_index.check_removable().is_ok());
        assert!(table_index.on_remove(RowId(0), &row(1, 1)).is_ok());
    }
}
