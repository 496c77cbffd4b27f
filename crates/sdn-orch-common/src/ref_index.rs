//! Holder-counted reverse index.
//!
//! A `RefIndex` maps a key to a value together with the set of holders that
//! currently reference it. Entries are never created implicitly and are
//! removed exactly when their last holder releases them, so the index
//! cannot accumulate stale keys.
//!
//! The controller uses it for the star-center index: host id -> host ref,
//! held by every overlay for which that host is the elected center.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Entry<V, H> {
    value: V,
    holders: BTreeSet<H>,
}

/// Reverse index whose entries live as long as at least one holder.
///
/// # Example
///
/// ```
/// use sdn_orch_common::RefIndex;
///
/// let mut index: RefIndex<&str, &str, u32> = RefIndex::new();
/// index.assign("host-1", "ref-1", 7);
/// index.assign("host-1", "ref-1", 8);
///
/// assert!(!index.release(&"host-1", &7));
/// assert!(index.release(&"host-1", &8));
/// assert!(!index.contains_key(&"host-1"));
/// ```
#[derive(Debug, Clone)]
pub struct RefIndex<K, V, H> {
    inner: HashMap<K, Entry<V, H>>,
}

impl<K, V, H> RefIndex<K, V, H>
where
    K: Eq + Hash + Clone,
    H: Ord + Clone,
{
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the value for `key`. Never creates entries.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key).map(|e| &e.value)
    }

    /// Returns the holders of `key`, in order.
    pub fn holders(&self, key: &K) -> Vec<H> {
        self.inner
            .get(key)
            .map(|e| e.holders.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Records that `holder` references `key`.
    ///
    /// The value is replaced if the key already exists.
    pub fn assign(&mut self, key: K, value: V, holder: H) {
        match self.inner.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.holders.insert(holder);
            }
            None => {
                self.inner.insert(
                    key,
                    Entry {
                        value,
                        holders: BTreeSet::from([holder]),
                    },
                );
            }
        }
    }

    /// Drops `holder`'s reference to `key`.
    ///
    /// Returns true if that was the last holder and the entry was removed.
    pub fn release(&mut self, key: &K, holder: &H) -> bool {
        let Some(entry) = self.inner.get_mut(key) else {
            return false;
        };
        entry.holders.remove(holder);
        if entry.holders.is_empty() {
            self.inner.remove(key);
            true
        } else {
            false
        }
    }

    /// Drops every reference `holder` has. Returns the keys that went away.
    pub fn release_holder(&mut self, holder: &H) -> Vec<K> {
        let mut removed = Vec::new();
        self.inner.retain(|key, entry| {
            entry.holders.remove(holder);
            if entry.holders.is_empty() {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Removes `key` regardless of holders and returns who held it.
    pub fn remove(&mut self, key: &K) -> Vec<H> {
        self.inner
            .remove(key)
            .map(|e| e.holders.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<K, V, H> Default for RefIndex<K, V, H>
where
    K: Eq + Hash + Clone,
    H: Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_get_never_creates() {
        let index: RefIndex<String, String, u32> = RefIndex::new();
        assert!(index.get(&"missing".to_string()).is_none());
        assert!(index.holders(&"missing".to_string()).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_entry_removed_with_last_holder() {
        let mut index = RefIndex::new();
        index.assign("h1", "ref-1", "net-a");
        index.assign("h1", "ref-1", "net-b");
        assert_eq!(index.holders(&"h1"), vec!["net-a", "net-b"]);

        assert!(!index.release(&"h1", &"net-a"));
        assert_eq!(index.get(&"h1"), Some(&"ref-1"));

        assert!(index.release(&"h1", &"net-b"));
        assert!(index.is_empty());

        // Releasing again is harmless.
        assert!(!index.release(&"h1", &"net-b"));
    }

    #[test]
    fn test_release_holder() {
        let mut index = RefIndex::new();
        index.assign("h1", (), 1);
        index.assign("h2", (), 1);
        index.assign("h2", (), 2);

        let mut removed = index.release_holder(&1);
        removed.sort();
        assert_eq!(removed, vec!["h1"]);
        assert_eq!(index.holders(&"h2"), vec![2]);
    }

    #[test]
    fn test_remove_returns_holders() {
        let mut index = RefIndex::new();
        index.assign("h1", (), 3);
        index.assign("h1", (), 1);
        assert_eq!(index.remove(&"h1"), vec![1, 3]);
        assert!(!index.contains_key(&"h1"));
    }
}
