//! Sorted unique-key list for one named index.
//!
//! Keys are kept in index order so that lookups are a binary search. An
//! append that breaks the order flags a re-sort; outside a batch the sort
//! runs immediately, inside a batch it is deferred to
//! [`end_update`](IndexManager::end_update), so a batch of N mutations costs
//! at most one sort.

use crate::{
    error::{Error, Result},
    record::{Record, column_value},
    schema::{CompositeKeyStrategy, ID_COLUMN, IndexDef, PRIMARY_INDEX},
    types::{IndexKey, SortOrder},
};

/// One unique index.
#[derive(Debug, Clone)]
pub struct IndexManager {
    name: String,
    columns: Vec<String>,
    order: SortOrder,
    strategy: CompositeKeyStrategy,
    keys: Vec<IndexKey>,
    updating: bool,
    sort_required: bool,
    sort_count: usize,
}

impl IndexManager {
    /// Creates an empty index for a declaration.
    pub fn new(def: &IndexDef, strategy: CompositeKeyStrategy) -> Self {
        Self {
            name: def.name.clone(),
            columns: def.columns.clone(),
            order: def.order,
            strategy,
            keys: Vec::new(),
            updating: false,
            sort_required: false,
            sort_count: 0,
        }
    }

    /// Creates the implicit ascending index over the primary key.
    pub fn primary() -> Self {
        Self::new(&IndexDef::unique(PRIMARY_INDEX, [ID_COLUMN]), CompositeKeyStrategy::Tuple)
    }

    /// Index name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source columns in declared order.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Key ordering.
    #[inline]
    pub fn order(&self) -> SortOrder {
        self.order
    }

    /// Computes the key a row has in this index.
    ///
    /// Returns `None` when any source column is `Null` or has no key kind;
    /// such rows are not indexed.
    pub fn key_for<R: Record>(&self, row: &R) -> Option<IndexKey> {
        let mut parts = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            parts.push(IndexKey::from_value(&column_value(row, column)?)?);
        }
        if parts.len() == 1 {
            return parts.pop();
        }
        Some(match self.strategy {
            CompositeKeyStrategy::Tuple => IndexKey::Composite(parts),
            CompositeKeyStrategy::Concatenated => IndexKey::concatenated(&parts),
        })
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &IndexKey) -> bool {
        self.position(key).is_some()
    }

    /// Adds a key.
    ///
    /// Duplicates are not rejected here; callers validate uniqueness before
    /// mutating so that a failed operation leaves the index untouched.
    pub fn add(&mut self, key: IndexKey) {
        if let Some(last) = self.keys.last() {
            if self.order.compare(&key, last).is_lt() {
                self.sort_required = true;
            }
        }
        self.keys.push(key);
        if !self.updating && self.sort_required {
            self.sort();
        }
    }

    /// Removes a key, returning `false` if it was not present.
    pub fn remove(&mut self, key: &IndexKey) -> bool {
        match self.position(key) {
            Some(position) => {
                self.keys.remove(position);
                true
            },
            None => false,
        }
    }

    /// Drops every key.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.sort_required = false;
    }

    /// Starts a batch: sorting is suspended until [`end_update`](Self::end_update).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyUpdating`] if a batch is already open.
    pub fn begin_update(&mut self) -> Result<()> {
        if self.updating {
            return Err(Error::AlreadyUpdating { scope: self.name.clone() });
        }
        self.updating = true;
        Ok(())
    }

    /// Ends a batch, sorting once if any mutation required it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotUpdating`] if no batch is open.
    pub fn end_update(&mut self) -> Result<()> {
        if !self.updating {
            return Err(Error::NotUpdating { scope: self.name.clone() });
        }
        self.updating = false;
        if self.sort_required {
            self.sort();
        }
        Ok(())
    }

    /// Whether a batch is open.
    #[inline]
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Number of physical sorts performed so far.
    #[inline]
    pub fn sort_count(&self) -> usize {
        self.sort_count
    }

    /// Keys in index order (only guaranteed sorted outside a batch).
    #[inline]
    pub fn keys(&self) -> &[IndexKey] {
        &self.keys
    }

    /// Number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the index holds no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// First key present more than once, if any.
    pub fn first_duplicate(&self) -> Option<&IndexKey> {
        if self.sort_required {
            let mut seen = std::collections::HashSet::new();
            return self.keys.iter().find(|key| !seen.insert(*key));
        }
        self.keys.windows(2).find(|pair| pair[0] == pair[1]).map(|pair| &pair[0])
    }

    fn position(&self, key: &IndexKey) -> Option<usize> {
        if self.sort_required {
            return self.keys.iter().position(|k| k == key);
        }
        self.keys.binary_search_by(|probe| self.order.compare(probe, key)).ok()
    }

    fn sort(&mut self) {
        let order = self.order;
        self.keys.sort_by(|a, b| order.compare(a, b));
        self.sort_required = false;
        self.sort_count += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::types::ColumnValue;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct City {
        id: i64,
        country: String,
        name: Option<String>,
    }

    impl Record for City {
        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }

        fn column(&self, name: &str) -> Option<ColumnValue> {
            match name {
                "id" => Some(self.id.into()),
                "country" => Some(self.country.as_str().into()),
                "name" => Some(self.name.clone().into()),
                _ => None,
            }
        }
    }

    fn ascending() -> IndexManager {
        IndexManager::new(&IndexDef::unique("ix", ["id"]), CompositeKeyStrategy::Tuple)
    }

    #[test]
    fn test_add_in_order_never_sorts() {
        let mut index = ascending();
        for i in 0..10 {
            index.add(IndexKey::I64(i));
        }
        assert_eq!(index.sort_count(), 0);
        assert!(index.contains(&IndexKey::I64(7)));
        assert!(!index.contains(&IndexKey::I64(10)));
    }

    #[test]
    fn test_out_of_order_add_sorts_immediately_outside_batch() {
        let mut index = ascending();
        for i in (0..5).rev() {
            index.add(IndexKey::I64(i));
        }
        assert_eq!(index.sort_count(), 4);
        assert_eq!(index.keys(), &[0, 1, 2, 3, 4].map(IndexKey::I64));
    }

    #[test]
    fn test_batch_sorts_once() {
        let mut index = ascending();
        index.begin_update().unwrap();
        for i in (0..100).rev() {
            index.add(IndexKey::I64(i));
        }
        assert!(index.contains(&IndexKey::I64(42)));
        assert!(index.remove(&IndexKey::I64(50)));
        index.end_update().unwrap();

        assert_eq!(index.sort_count(), 1);
        assert_eq!(index.len(), 99);
        assert!(index.keys().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_nested_begin_and_unbalanced_end_fail() {
        let mut index = ascending();
        assert!(matches!(index.end_update(), Err(Error::NotUpdating { .. })));
        index.begin_update().unwrap();
        let err = index.begin_update().unwrap_err();
        assert!(matches!(err, Error::AlreadyUpdating { ref scope } if scope == "ix"));
        assert!(err.is_usage());
        index.end_update().unwrap();
    }

    #[test]
    fn test_descending_order() {
        let def = IndexDef::unique("ix", ["id"]).descending();
        let mut index = IndexManager::new(&def, CompositeKeyStrategy::Tuple);
        for i in [3, 9, 1] {
            index.add(IndexKey::I64(i));
        }
        assert_eq!(index.keys(), &[9, 3, 1].map(IndexKey::I64));
        assert!(index.contains(&IndexKey::I64(3)));
    }

    #[test]
    fn test_composite_key_preserves_column_order() {
        let def = IndexDef::unique("ix", ["country", "id"]);
        let tuple = IndexManager::new(&def, CompositeKeyStrategy::Tuple);
        let city = City { id: 4, country: "GB".into(), name: None };
        assert_eq!(
            tuple.key_for(&city),
            Some(IndexKey::Composite(vec![IndexKey::from("GB"), IndexKey::I64(4)]))
        );

        let concatenated = IndexManager::new(&def, CompositeKeyStrategy::Concatenated);
        assert_eq!(concatenated.key_for(&city), Some(IndexKey::from("GB4")));
    }

    #[test]
    fn test_null_column_is_not_indexed() {
        let index =
            IndexManager::new(&IndexDef::unique("ix", ["name"]), CompositeKeyStrategy::Tuple);
        assert_eq!(index.key_for(&City { id: 1, country: "GB".into(), name: None }), None);
    }

    #[test]
    fn test_first_duplicate() {
        let mut index = ascending();
        index.begin_update().unwrap();
        for i in [5, 1, 5] {
            index.add(IndexKey::I64(i));
        }
        assert_eq!(index.first_duplicate(), Some(&IndexKey::I64(5)));
        index.end_update().unwrap();
        assert_eq!(index.first_duplicate(), Some(&IndexKey::I64(5)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(i64),
        Remove(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0i64..200).prop_map(Op::Add), (0i64..200).prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn prop_keys_ordered_after_batch(
            ops in proptest::collection::vec(op(), 0..200),
            descending in any::<bool>(),
        ) {
            let mut def = IndexDef::unique("ix", ["id"]);
            if descending {
                def = def.descending();
            }
            let mut index = IndexManager::new(&def, CompositeKeyStrategy::Tuple);
            index.begin_update().unwrap();
            for op in ops {
                match op {
                    Op::Add(v) => index.add(IndexKey::I64(v)),
                    Op::Remove(v) => {
                        index.remove(&IndexKey::I64(v));
                    },
                }
            }
            index.end_update().unwrap();

            prop_assert!(index.sort_count() <= 1);
            let ordered = index.keys().windows(2).all(|w| {
                if descending { w[0] >= w[1] } else { w[0] <= w[1] }
            });
            prop_assert!(ordered);
        }
    }
}
