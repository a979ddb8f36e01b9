//! Class, instance and module payloads.
//!
//! Classes are the classic kind: a name, a bases tuple and a dict of
//! methods/attributes. Method resolution is depth-first left-to-right
//! over the bases.

use crate::object::{Obj, Payload};

pub struct ClassObject {
    /// Class name string (owned).
    pub name: Obj,
    /// Tuple of base classes (owned).
    pub bases: Obj,
    /// Attribute/method dict (owned).
    pub dict: Obj,
    /// Set for the builtin exception hierarchy; instances of such classes
    /// render as their argument and participate in handler matching.
    pub is_exception: bool,
}

impl ClassObject {
    /// Look `name` up on this class and then its bases, depth-first.
    /// Returns a borrowed reference.
    pub fn mro_lookup(&self, name: Obj, hash: u64) -> Option<Obj> {
        if let Payload::Dict(d) = self.dict.payload() {
            if let Some(v) = d.borrow().get(name, hash) {
                return Some(v);
            }
        }
        if let Payload::Tuple(bases) = self.bases.payload() {
            for &base in bases.iter() {
                if let Payload::Class(cls) = base.payload() {
                    if let Some(v) = cls.mro_lookup(name, hash) {
                        return Some(v);
                    }
                }
            }
        }
        None
    }

    pub fn name_str(&self) -> &str {
        match self.name.payload() {
            Payload::Str(s) => s.as_str(),
            _ => "?",
        }
    }
}

/// True when `cls` is `of` or derives from it.
pub fn is_subclass(cls: Obj, of: Obj) -> bool {
    if cls == of {
        return true;
    }
    if let Payload::Class(c) = cls.payload() {
        if let Payload::Tuple(bases) = c.bases.payload() {
            return bases.iter().any(|&b| is_subclass(b, of));
        }
    }
    false
}

/// An instance of a user-defined (or exception) class.
pub struct InstanceObject {
    /// Owning reference to the class.
    pub class: Obj,
    /// Instance attribute dict (owned).
    pub dict: Obj,
}

/// An imported module: a name and its attribute dict.
pub struct ModuleObject {
    pub name: Obj,
    pub dict: Obj,
}
