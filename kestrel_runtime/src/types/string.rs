//! String objects with a cached hash.

use std::cell::Cell;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Immutable string payload. The hash is computed once on demand; attribute
/// and global lookups hit it constantly.
pub struct StrObject {
    s: Box<str>,
    hash: Cell<u64>,
}

const HASH_UNSET: u64 = 0;

impl StrObject {
    pub fn new(s: impl Into<Box<str>>) -> StrObject {
        StrObject {
            s: s.into(),
            hash: Cell::new(HASH_UNSET),
        }
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.s
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.s.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.s.is_empty()
    }

    /// Cached content hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        let cached = self.hash.get();
        if cached != HASH_UNSET {
            return cached;
        }
        let mut hasher = FxHasher::default();
        self.s.hash(&mut hasher);
        let mut h = hasher.finish();
        if h == HASH_UNSET {
            h = 1;
        }
        self.hash.set(h);
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_cached_and_content_based() {
        let a = StrObject::new("spam");
        let b = StrObject::new("spam");
        let c = StrObject::new("eggs");
        assert_eq!(a.hash(), a.hash());
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }
}
