//! Collection type aliases.

/// [`BuildHasher`][std::hash::BuildHasher] used by the collections in this module.
///
/// Currently, [`foldhash`][foldhash] is used as the underlying implementation.
///
/// [foldhash]: http://github.com/orlp/foldhash
pub type FastBuildHasher = foldhash::quality::RandomState;

/// A hash set based on `hashbrown` ([`HashSet`][hashbrown::HashSet]) using [`FastBuildHasher`].
pub type FastHashSet<T> = hashbrown::HashSet<T, FastBuildHasher>;

/// A hash map based on `hashbrown` ([`HashMap`][hashbrown::HashMap]) using [`FastBuildHasher`].
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;

/// A hash map with stable insertion order based on `indexmap` ([`IndexMap`][indexmap::IndexMap]) using
/// [`FastBuildHasher`].
pub type FastIndexMap<K, V> = indexmap::IndexMap<K, V, FastBuildHasher>;

/// A hash set with stable insertion order based on `indexmap` ([`IndexSet`][indexmap::IndexSet]) using
/// [`FastBuildHasher`].
///
/// Each value is assigned the position at which it was first inserted, which makes this suitable as a string table.
pub type FastIndexSet<T> = indexmap::IndexSet<T, FastBuildHasher>;
