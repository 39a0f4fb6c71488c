//! Type identity and dense index allocation.
//!
//! ## Cross-module Type Identity
//!
//! [`TypeKey`] is derived from the type's **name** (as reported by
//! [`std::any::type_name`]) using the FNV-1a 64-bit hash algorithm. Modules
//! are compiled separately, so per-binary statics cannot agree on identity;
//! a name hash computed by the same compiler can.
//!
//! [`TypeIndexer`] turns keys into dense indices in first-seen order. Every
//! registration path goes through the indexer owned by the shared
//! [`Context`](crate::Context), so all modules observe the same indices.

use std::collections::HashMap;

/// A stable identifier for a Rust type, derived from its name using the
/// FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(pub u64);

impl TypeKey {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`TypeKey`] for a type name.
    ///
    /// # Algorithm (FNV-1a 64-bit)
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Compute the [`TypeKey`] for a Rust type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::from_name(std::any::type_name::<T>())
    }
}

/// Assigns dense, monotonically increasing indices to type keys.
///
/// An index is handed out the first time a key is seen and never changes or
/// gets reassigned afterwards.
#[derive(Debug, Default)]
pub struct TypeIndexer {
    indices: HashMap<TypeKey, usize>,
}

impl TypeIndexer {
    /// Create an empty indexer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            indices: HashMap::new(),
        }
    }

    /// Returns the index for `T`, allocating the next one if `T` is new.
    pub fn index_of<T: ?Sized + 'static>(&mut self) -> usize {
        self.index_of_key(TypeKey::of::<T>())
    }

    /// Returns the index for `key`, allocating the next one if it is new.
    pub fn index_of_key(&mut self, key: TypeKey) -> usize {
        let next = self.indices.len();
        *self.indices.entry(key).or_insert(next)
    }

    /// Returns the index for `T` without allocating.
    #[must_use]
    pub fn get<T: ?Sized + 'static>(&self) -> Option<usize> {
        self.indices.get(&TypeKey::of::<T>()).copied()
    }

    /// Number of distinct types seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns `true` if no type has been indexed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Physics;
    struct Audio;
    struct Network;

    #[test]
    fn test_type_key_is_stable() {
        assert_eq!(TypeKey::of::<Physics>(), TypeKey::of::<Physics>());
        assert_ne!(TypeKey::of::<Physics>(), TypeKey::of::<Audio>());
    }

    #[test]
    fn test_type_key_matches_type_name() {
        assert_eq!(
            TypeKey::of::<Physics>(),
            TypeKey::from_name(std::any::type_name::<Physics>())
        );
    }

    #[test]
    fn test_fnv1a_known_vector() {
        // FNV-1a 64-bit of empty string is the offset basis itself.
        assert_eq!(TypeKey::from_name(""), TypeKey(0xcbf2_9ce4_8422_2325));
        assert_eq!(TypeKey::from_name("a"), TypeKey(0xaf63_dc4c_8601_ec8c));
    }

    #[test]
    fn test_index_of_is_idempotent() {
        let mut indexer = TypeIndexer::new();
        let first = indexer.index_of::<Physics>();
        assert_eq!(indexer.index_of::<Physics>(), first);
        assert_eq!(indexer.len(), 1);
    }

    #[test]
    fn test_indices_are_contiguous_in_first_seen_order() {
        let mut indexer = TypeIndexer::new();
        assert_eq!(indexer.index_of::<Audio>(), 0);
        assert_eq!(indexer.index_of::<Network>(), 1);
        assert_eq!(indexer.index_of::<Physics>(), 2);
        assert_eq!(indexer.index_of::<Audio>(), 0);
        assert_eq!(indexer.len(), 3);
    }

    #[test]
    fn test_get_does_not_allocate() {
        let mut indexer = TypeIndexer::new();
        assert_eq!(indexer.get::<Physics>(), None);
        assert!(indexer.is_empty());
        indexer.index_of::<Physics>();
        assert_eq!(indexer.get::<Physics>(), Some(0));
    }
}
