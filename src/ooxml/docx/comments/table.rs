/// An insertion-ordered keyed table.
///
/// The three comment ledgers are each a `Table` keyed by a stable id. Rows
/// keep the order they were loaded or created in, which is also the order
/// they are serialized in, and can be put back at their old position when an
/// edit is rolled back.
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub(crate) struct Table<K, V> {
    rows: Vec<(K, V)>,
    /// Position of each key in `rows`
    index: HashMap<K, usize>,
}

// `index` is derived from `rows`, so comparing rows is enough.
impl<K: PartialEq, V: PartialEq> PartialEq for Table<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
    }
}

impl<K: Eq, V: Eq> Eq for Table<K, V> {}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash, V> Table<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&i| &self.rows[i].1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let i = *self.index.get(key)?;
        Some(&mut self.rows[i].1)
    }

    /// Append a row. Returns the row back if the key is taken.
    pub fn push(&mut self, key: K, value: V) -> Result<(), (K, V)> {
        self.insert_at(self.rows.len(), key, value)
    }

    /// Insert a row at `position` (clamped to the end).
    pub fn insert_at(&mut self, position: usize, key: K, value: V) -> Result<(), (K, V)> {
        if self.index.contains_key(&key) {
            return Err((key, value));
        }
        let position = position.min(self.rows.len());
        self.rows.insert(position, (key, value));
        self.reindex_from(position);
        Ok(())
    }

    /// Remove a row, returning its position and value.
    pub fn remove(&mut self, key: &K) -> Option<(usize, V)> {
        let position = self.index.remove(key)?;
        let (_, value) = self.rows.remove(position);
        self.reindex_from(position);
        Some((position, value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.rows.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.rows.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.iter().map(|(_, v)| v)
    }

    fn reindex_from(&mut self, position: usize) {
        for (i, (key, _)) in self.rows.iter().enumerate().skip(position) {
            self.index.insert(*key, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_index() {
        let mut t = Table::new();
        t.push(3u32, "c").unwrap();
        t.push(1, "a").unwrap();
        t.push(2, "b").unwrap();
        assert_eq!(t.keys().copied().collect::<Vec<_>>(), vec![3, 1, 2]);
        assert_eq!(t.push(1, "dup"), Err((1, "dup")));

        assert_eq!(t.remove(&1), Some((1, "a")));
        assert_eq!(t.get(&2), Some(&"b"));
        assert!(!t.contains(&1));
        assert_eq!(t.remove(&1), None);

        t.insert_at(1, 1, "a").unwrap();
        assert_eq!(t.values().copied().collect::<Vec<_>>(), vec!["c", "a", "b"]);
        *t.get_mut(&3).unwrap() = "C";
        assert_eq!(t.iter().next(), Some((&3, &"C")));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_insert_position_clamped() {
        let mut t = Table::new();
        t.insert_at(10, 'x', 0).unwrap();
        t.insert_at(0, 'y', 1).unwrap();
        assert_eq!(t.keys().copied().collect::<Vec<_>>(), vec!['y', 'x']);
        assert_eq!(t.get(&'x'), Some(&0));
    }

    #[test]
    fn test_equality_follows_row_order() {
        let mut a = Table::new();
        a.push(1u32, "a").unwrap();
        a.push(2, "b").unwrap();

        let mut b = Table::new();
        b.push(2u32, "b").unwrap();
        b.insert_at(0, 1, "a").unwrap();
        assert_eq!(a, b);

        let mut c = Table::new();
        c.push(2u32, "b").unwrap();
        c.push(1, "a").unwrap();
        assert_ne!(a, c);

        c.remove(&2);
        c.push(2, "b").unwrap();
        assert_eq!(a, c);
    }
}
