use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Rows written through a table since the counts were last taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl WriteCounts {
    pub fn is_empty(&self) -> bool {
        self.inserts == 0 && self.updates == 0 && self.deletes == 0
    }

    pub fn total(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }

    pub(crate) fn merge(&mut self, other: WriteCounts) {
        self.inserts += other.inserts;
        self.updates += other.updates;
        self.deletes += other.deletes;
    }
}

/// Ordered rows keyed by `K`. Every mutation is counted.
#[derive(Debug, Clone)]
pub struct Table<K, V> {
    rows: BTreeMap<K, V>,
    writes: WriteCounts,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            writes: WriteCounts::default(),
        }
    }
}

impl<K: Ord, V> Table<K, V> {
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.rows.get(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.rows.contains_key(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.rows.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, K, V> {
        self.rows.keys()
    }

    pub fn values(&self) -> btree_map::Values<'_, K, V> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert or replace a row, returning the replaced one.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let old = self.rows.insert(key, value);
        if old.is_some() {
            self.writes.updates += 1;
        } else {
            self.writes.inserts += 1;
        }
        old
    }

    /// Mutable access; counts as an update when the row exists.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let row = self.rows.get_mut(key);
        if row.is_some() {
            self.writes.updates += 1;
        }
        row
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let old = self.rows.remove(key);
        if old.is_some() {
            self.writes.deletes += 1;
        }
        old
    }

    /// Keep rows matching the predicate and return how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|k, v| keep(k, v));
        let dropped = before - self.rows.len();
        self.writes.deletes += u64::try_from(dropped).unwrap_or(u64::MAX);
        dropped
    }

    pub(crate) fn take_writes(&mut self) -> WriteCounts {
        std::mem::take(&mut self.writes)
    }
}
