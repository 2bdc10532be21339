use std::hash::Hash;
use std::ops::{Deref, DerefMut};

use ahash::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};

/// A hash table with ahash's faster (non-DoS-resistant) hasher, used for
/// every index this crate keeps — bound sockets, connected sockets, listener
/// pending/accept membership is a `Vec`/`VecDeque` instead since it's ordered.
///
/// # Test
///
/// ```
/// use vsockd_core::table::Table;
///
/// let mut table: Table<u32, &str> = Table::default();
/// table.insert(1, "one");
/// assert_eq!(table.get(&1), Some(&"one"));
/// assert_eq!(table.remove(&1), Some("one"));
/// assert!(table.is_empty());
/// ```
#[derive(Debug)]
pub struct Table<K, V>(HashMap<K, V>);

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self(HashMap::default())
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = HashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K, V> DerefMut for Table<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K, V> AsRef<HashMap<K, V>> for Table<K, V> {
    fn as_ref(&self) -> &HashMap<K, V> {
        &self.0
    }
}

/// Bundles a `RwLockReadGuard` over a [`Table`] together with a key, so a
/// reference obtained under the lock can be handed back to a caller without
/// that caller needing to know the table's lock type.
pub struct ReadLock<'a, K, V> {
    key: K,
    lock: RwLockReadGuard<'a, Table<K, V>>,
}

impl<'a, K, V> ReadLock<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(lock: RwLockReadGuard<'a, Table<K, V>>, key: K) -> Self {
        Self { key, lock }
    }

    pub fn get_ref(&self) -> Option<&V> {
        self.lock.get(&self.key)
    }
}

pub fn read<K, V>(lock: &RwLock<Table<K, V>>, key: K) -> ReadLock<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    ReadLock::new(lock.read(), key)
}
