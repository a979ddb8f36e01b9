//! Attribute-lookup hint table (the inline cache).
//!
//! One evaluator owns one table. A hint records where an attribute was
//! found in an instance dictionary: the dictionary's mask at the time (the
//! guard), the entry-table offset, the attribute name and the receiver's
//! class. Slots are addressed by a hash of `(class, name)`; slot 0 is the
//! reserved invalid hint, so a fresh instruction (hint position 0) can
//! never match.
//!
//! Hints hold no references. Every field is revalidated against live
//! state before use — a stale class or key pointer simply fails the
//! identity check.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use kestrel_runtime::Obj;

pub const MAX_HINTS: usize = 1 << 15;

/// Reserved never-matching slot.
pub const INVALID_HINT_POS: u16 = 0;

#[derive(Clone, Copy)]
pub struct Hint {
    /// Guard: the instance dictionary's mask when the hint was recorded.
    pub mask: u64,
    /// Cached offset into the dictionary's entry table.
    pub entry: u32,
    /// The attribute name (interned; compared by identity, not owned).
    pub key: Obj,
    /// The receiver's class (identity only, not owned).
    pub class: Obj,
}

impl Hint {
    const fn invalid() -> Hint {
        Hint {
            mask: u64::MAX,
            entry: u32::MAX,
            key: Obj::null(),
            class: Obj::null(),
        }
    }
}

pub struct HintTable {
    slots: Box<[Hint]>,
}

impl HintTable {
    pub fn new() -> HintTable {
        HintTable {
            slots: vec![Hint::invalid(); MAX_HINTS].into_boxed_slice(),
        }
    }

    /// Table position for a `(class, name)` pair; never 0.
    #[inline]
    pub fn position(class: Obj, key: Obj) -> u16 {
        let mut hasher = FxHasher::default();
        class.id().hash(&mut hasher);
        key.id().hash(&mut hasher);
        (hasher.finish() as usize % (MAX_HINTS - 1) + 1) as u16
    }

    #[inline(always)]
    pub fn get(&self, pos: u16) -> Hint {
        self.slots[pos as usize]
    }

    /// Record a hint; slot 0 is never written.
    #[inline]
    pub fn record(&mut self, pos: u16, hint: Hint) {
        debug_assert_ne!(pos, INVALID_HINT_POS);
        self.slots[pos as usize] = hint;
    }
}

impl Default for HintTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_runtime::object::Payload;

    #[test]
    fn test_position_never_zero() {
        let a = Obj::alloc(Payload::Int(1));
        let b = Obj::alloc(Payload::Int(2));
        for _ in 0..64 {
            assert_ne!(HintTable::position(a, b), 0);
        }
        a.decref();
        b.decref();
    }

    #[test]
    fn test_invalid_slot_never_matches() {
        let table = HintTable::new();
        let hint = table.get(INVALID_HINT_POS);
        // No live dict has an all-ones mask.
        assert_eq!(hint.mask, u64::MAX);
        assert!(hint.key.is_null());
    }

    #[test]
    fn test_record_round_trip() {
        let mut table = HintTable::new();
        let key = Obj::alloc(Payload::Int(5));
        let class = Obj::alloc(Payload::Int(6));
        let pos = HintTable::position(class, key);
        table.record(
            pos,
            Hint {
                mask: 7,
                entry: 3,
                key,
                class,
            },
        );
        let h = table.get(pos);
        assert_eq!(h.mask, 7);
        assert_eq!(h.entry, 3);
        assert_eq!(h.key, key);
        key.decref();
        class.decref();
    }
}
