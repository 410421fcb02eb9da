//! The tuple table: a growing, arity-generic row store for one predicate's
//! extent, with optional row-set dedup and caller-driven compaction.

use crate::error::Error;
use crate::index::TableIndex;
use crate::row::{Row, RowId};

/// Append-only-by-default row sequence for a single predicate.
pub struct TupleTable {
    predicate_name: String,
    arity: usize,
    unique: bool,
    rows: Vec<Option<Row>>,
    live_count: usize,
    indices: Vec<TableIndex>,
}

impl TupleTable {
    pub fn new(predicate_name: impl Into<String>, arity: usize, unique: bool) -> Self {
        Self::with_capacity(predicate_name, arity, unique, 0)
    }

    /// Like [`Self::new`], reserving `initial_capacity` rows up front
    /// (`Config::tables.initial_capacity` for host-declared predicates).
    pub fn with_capacity(predicate_name: impl Into<String>, arity: usize, unique: bool, initial_capacity: usize) -> Self {
        TupleTable {
            predicate_name: predicate_name.into(),
            arity,
            unique,
            rows: Vec::with_capacity(initial_capacity),
            live_count: 0,
            indices: Vec::new(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    /// Number of live rows. Compaction via [`Self::reclaim`] may decrease
    /// this; otherwise it only grows.
    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Attach an index, back-filling it from the rows already present.
    pub fn add_index(&mut self, mut index: TableIndex) {
        for (i, slot) in self.rows.iter().enumerate() {
            if let Some(row) = slot {
                index.on_insert(RowId(i as u32), row);
            }
        }
        self.indices.push(index);
    }

    pub fn indices(&self) -> &[TableIndex] {
        &self.indices
    }

    /// Read-only reference to row `i`, if live.
    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(id.index())?.as_ref()
    }

    /// Iterate live rows in ascending row-id order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.rows.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref().map(|row| (RowId(i as u32), row))
        })
    }

    /// Append a copy of `row`. If `unique` is set and an equal row already
    /// exists (per the row-set index), no new row is appended and the
    /// existing id is returned instead.
    pub fn add(&mut self, row: Row) -> Result<RowId, Error> {
        if row.arity() != self.arity {
            return Err(Error::invalid_program(format!(
                "arity mismatch inserting into '{}': expected {}, got {}",
                self.predicate_name,
                self.arity,
                row.arity()
            )));
        }

        if self.unique {
            if let Some(existing) = self.find_by_row_set(&row) {
                return Ok(existing);
            }
        }

        // Key indices fail fatally on any colliding key before any mutation
        // is committed, even if the colliding row's contents are identical:
        // a second insert would repoint the key to a new row id and orphan
        // the first, still-live one.
        for index in &self.indices {
            if let TableIndex::Key(key_index) = index {
                let key = row.project(key_index.columns());
                if key_index.row_with_key(&key).is_some() {
                    return Err(Error::DuplicateKey {
                        predicate: self.predicate_name.clone(),
                        key: format!("{key:?}"),
                    });
                }
            }
        }

        let id = RowId(self.rows.len() as u32);
        for index in &mut self.indices {
            index.on_insert(id, &row);
        }
        self.rows.push(Some(row));
        self.live_count += 1;
        Ok(id)
    }

    /// Remove (tombstone) a live row, updating general/key indices. Used by
    /// `.Set`/`.Add` sub-predicate machinery and table operators that
    /// replace rows; does not renumber ids (see [`Self::reclaim`] for that).
    ///
    /// Fails with [`Error::IndexContract`] if any attached general index was
    /// declared immutable, in which case the row is left untouched (the
    /// mutability check runs before any index is actually mutated).
    pub fn remove(&mut self, id: RowId) -> Result<(), Error> {
        let Some(row) = self.rows.get(id.index()).and_then(Option::as_ref) else {
            return Ok(());
        };
        for index in &self.indices {
            index.check_removable()?;
        }
        let row = row.clone();
        for index in &mut self.indices {
            index.on_remove(id, &row)?;
        }
        self.rows[id.index()] = None;
        self.live_count -= 1;
        Ok(())
    }

    /// Clear every row (used by `Rules`-mode predicates, which refill their
    /// table from scratch each tick).
    pub fn clear(&mut self) {
        self.rows.clear();
        self.live_count = 0;
        for index in &mut self.indices {
            index.clear();
        }
    }

    /// Compact live rows to the front, renumbering row ids and rebuilding
    /// every index. `is_reclaimable` decides which rows are dropped.
    pub fn reclaim(&mut self, mut is_reclaimable: impl FnMut(RowId, &Row) -> bool) {
        let mut kept = Vec::with_capacity(self.live_count);
        for (i, slot) in self.rows.drain(..).enumerate() {
            if let Some(row) = slot {
                if !is_reclaimable(RowId(i as u32), &row) {
                    kept.push(row);
                }
            }
        }
        self.live_count = kept.len();
        for index in &mut self.indices {
            index.clear();
        }
        self.rows = kept.into_iter().map(Some).collect();
        for (i, slot) in self.rows.iter().enumerate() {
            if let Some(row) = slot {
                for index in &mut self.indices {
                    index.on_insert(RowId(i as u32), row);
                }
            }
        }
    }

    fn find_by_row_set(&self, row: &Row) -> Option<RowId> {
        for index in &self.indices {
            if let TableIndex::RowSet(row_set) = index {
                return row_set.row_with_tuple(row.fields());
            }
        }
        // No row-set index attached: fall back to a linear scan. Correct,
        // just not O(1); predicates declared `unique` should attach one.
        self.iter().find(|(_, r)| *r == row).map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RowSetIndex;
    use crate::value::Value;

    fn row(n: i64) -> Row {
        Row::new(vec![Value::Int(n)])
    }

    #[test]
    fn add_grows_and_assigns_sequential_ids() {
        let mut t = TupleTable::new("p", 1, false);
        let a = t.add(row(1)).unwrap();
        let b = t.add(row(2)).unwrap();
        assert_eq!(a, RowId(0));
        assert_eq!(b, RowId(1));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn unique_table_dedups_and_preserves_first_order() {
        let mut t = TupleTable::new("p", 1, true);
        t.add_index(TableIndex::RowSet(RowSetIndex::new(vec![0, 1].into_iter().take(0).collect())));
        let a = t.add(row(1)).unwrap();
        let dup = t.add(row(1)).unwrap();
        let b = t.add(row(2)).unwrap();
        assert_eq!(a, dup);
        assert_eq!(t.len(), 2);
        let ids: Vec<_> = t.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn reclaim_compacts_and_renumbers() {
        let mut t = TupleTable::new("p", 1, false);
        t.add(row(1)).unwrap();
        t.add(row(2)).unwrap();
        t.add(row(3)).unwrap();
        t.reclaim(|_, r| r.field(0) == &Value::Int(2));
        assert_eq!(t.len(), 2);
        let values: Vec<_> = t.iter().map(|(_, r)| r.field(0).clone()).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let mut t = TupleTable::new("p", 2, false);
        assert!(t.add(row(1)).is_err());
    }

    #[test]
    fn remove_against_immutable_general_index_is_rejected_and_leaves_row_live() {
        use crate::index::GeneralIndex;

        let mut t = TupleTable::new("p", 1, false);
        t.add_index(TableIndex::General(GeneralIndex::new(vec![0], 0, false)));
        let id = t.add(row(1)).unwrap();

        let err = t.remove(id).unwrap_err();
        assert!(matches!(err, Error::IndexContract(_)));
        assert_eq!(t.len(), 1);
        assert!(t.get(id).is_some());
    }

    #[test]
    fn remove_against_mutable_general_index_succeeds() {
        use crate::index::GeneralIndex;

        let mut t = TupleTable::new("p", 1, false);
        t.add_index(TableIndex::General(GeneralIndex::new(vec![0], 0, true)));
        let id = t.add(row(1)).unwrap();

        t.remove(id).unwrap();
        assert_eq!(t.len(), 0);
        assert!(t.get(id).is_none());
    }
}
