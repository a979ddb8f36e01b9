//! String interning.
//!
//! Attribute and global names are interned so the evaluator's inline-cache
//! guards can compare keys by pointer identity. The interner owns one
//! reference to each interned string for its own lifetime.

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use crate::object::{Obj, ObjHandle, Payload};
use crate::types::string::StrObject;

#[derive(Default)]
pub struct Interner {
    map: RefCell<FxHashMap<Box<str>, Obj>>,
}

impl Interner {
    pub fn new() -> Interner {
        Interner::default()
    }

    /// Intern `s`, returning an owned reference to the canonical object.
    pub fn intern(&self, s: &str) -> ObjHandle {
        if let Some(&obj) = self.map.borrow().get(s) {
            return ObjHandle::from_borrowed(obj);
        }
        let obj = Obj::alloc(Payload::Str(StrObject::new(s)));
        obj.incref(); // table's own reference
        self.map.borrow_mut().insert(Box::from(s), obj);
        ObjHandle::from_owned(obj)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.borrow().len()
    }
}

impl Drop for Interner {
    fn drop(&mut self) {
        for (_, obj) in self.map.borrow_mut().drain() {
            obj.decref();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::live_object_count;

    #[test]
    fn test_identity() {
        let interner = Interner::new();
        let a = interner.intern("x");
        let b = interner.intern("x");
        let c = interner.intern("y");
        assert_eq!(a.get(), b.get());
        assert_ne!(a.get(), c.get());
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_drop_releases_table() {
        let before = live_object_count();
        {
            let interner = Interner::new();
            let h = interner.intern("name");
            drop(h);
        }
        assert_eq!(live_object_count(), before);
    }
}
