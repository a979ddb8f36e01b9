//! The runtime: singletons, interner, exception types, builtin scope.
//!
//! One `Runtime` backs one embedding of the evaluator. It owns everything
//! with process-wide identity — the `None`/`True`/`False` singletons, the
//! interned-string table, the exception hierarchy, the builtin scope and
//! the module registry — and hands out references on request.
//!
//! Evaluation assumes exclusive access to the runtime. Entry points take a
//! scoped [`RuntimeGuard`] whose destructor releases the claim on every
//! exit path, including unwinds.

use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;

use crate::builtins;
use crate::intern::Interner;
use crate::object::{Obj, ObjHandle, Payload};
use crate::types::dict::DictObject;
use crate::types::exceptions::{new_exception_instance, ExcTypes, Raised};
use crate::types::function::BuiltinObject;
use crate::types::string::StrObject;

pub struct Runtime {
    interner: Interner,
    none: ObjHandle,
    true_: ObjHandle,
    false_: ObjHandle,
    pub excs: ExcTypes,
    builtins: ObjHandle,
    /// Default metaclass: callable that builds a class from
    /// `(name, bases, dict)`.
    default_metaclass: ObjHandle,
    modules: FxHashMap<Box<str>, ObjHandle>,
    entered: Cell<bool>,
}

impl Runtime {
    pub fn new() -> Runtime {
        let mut rt = Runtime {
            interner: Interner::new(),
            none: ObjHandle::from_owned(Obj::alloc(Payload::None)),
            true_: ObjHandle::from_owned(Obj::alloc(Payload::Bool(true))),
            false_: ObjHandle::from_owned(Obj::alloc(Payload::Bool(false))),
            excs: ExcTypes::bootstrap(),
            builtins: ObjHandle::from_owned(Obj::alloc(Payload::Dict(RefCell::new(
                DictObject::new(),
            )))),
            default_metaclass: ObjHandle::from_owned(Obj::alloc(Payload::Builtin(
                BuiltinObject {
                    name: "classobj",
                    f: builtins::builtin_classobj,
                },
            ))),
            modules: FxHashMap::default(),
            entered: Cell::new(false),
        };
        builtins::install(&mut rt);
        rt
    }

    /// Claim the runtime for an evaluation. Mirrors the host's lock scope:
    /// one claim at a time, released on every exit path.
    pub fn enter(&self) -> RuntimeGuard<'_> {
        debug_assert!(!self.entered.get(), "runtime entered twice");
        self.entered.set(true);
        RuntimeGuard { rt: self }
    }

    // =========================================================================
    // Singletons
    // =========================================================================

    #[inline]
    pub fn none(&self) -> ObjHandle {
        self.none.clone()
    }

    #[inline]
    pub fn none_obj(&self) -> Obj {
        self.none.get()
    }

    #[inline]
    pub fn is_none(&self, v: Obj) -> bool {
        v == self.none.get()
    }

    #[inline]
    pub fn bool_obj(&self, b: bool) -> ObjHandle {
        if b {
            self.true_.clone()
        } else {
            self.false_.clone()
        }
    }

    #[inline]
    pub fn true_obj(&self) -> Obj {
        self.true_.get()
    }

    #[inline]
    pub fn false_obj(&self) -> Obj {
        self.false_.get()
    }

    #[inline]
    pub fn default_metaclass(&self) -> Obj {
        self.default_metaclass.get()
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    #[inline]
    pub fn new_int(&self, v: i64) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::Int(v)))
    }

    #[inline]
    pub fn new_float(&self, v: f64) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::Float(v)))
    }

    #[inline]
    pub fn new_str(&self, s: &str) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::Str(StrObject::new(s))))
    }

    #[inline]
    pub fn new_string(&self, s: String) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::Str(StrObject::new(s))))
    }

    /// Intern a name; interned strings are pointer-identical per content.
    #[inline]
    pub fn intern(&self, s: &str) -> ObjHandle {
        self.interner.intern(s)
    }

    /// Build a tuple, taking over the item references.
    pub fn new_tuple(&self, items: Vec<Obj>) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::Tuple(items.into_boxed_slice())))
    }

    /// Build a list, taking over the item references.
    pub fn new_list(&self, items: Vec<Obj>) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::List(RefCell::new(items))))
    }

    pub fn new_dict(&self) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::Dict(RefCell::new(DictObject::new()))))
    }

    /// Build a closure cell, taking over `value` (which may be null).
    pub fn new_cell(&self, value: Obj) -> ObjHandle {
        ObjHandle::from_owned(Obj::alloc(Payload::ClosureCell(Cell::new(value))))
    }

    // =========================================================================
    // Builtin scope and modules
    // =========================================================================

    /// The builtin dict (borrowed).
    #[inline]
    pub fn builtins(&self) -> Obj {
        self.builtins.get()
    }

    pub(crate) fn register_module(&mut self, name: &str, module: ObjHandle) {
        self.modules.insert(Box::from(name), module);
    }

    pub fn lookup_module(&self, name: &str) -> Option<ObjHandle> {
        self.modules.get(name).cloned()
    }

    // =========================================================================
    // Raising
    // =========================================================================

    /// Build a raised failure: an instance of `class` carrying `msg`.
    pub fn raise_instance_of(&self, class: &ObjHandle, msg: &str) -> Raised {
        let text = self.new_str(msg);
        let args = self.new_tuple(vec![text.into_raw()]);
        let value = new_exception_instance(class.get(), args);
        Raised::new(class.clone(), Some(value))
    }

    pub fn raise_type_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.type_error, msg)
    }

    pub fn raise_value_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.value_error, msg)
    }

    pub fn raise_name_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.name_error, msg)
    }

    pub fn raise_attribute_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.attribute_error, msg)
    }

    pub fn raise_system_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.system_error, msg)
    }

    pub fn raise_import_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.import_error, msg)
    }

    pub fn raise_zero_division(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.zero_division_error, msg)
    }

    pub fn raise_overflow_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.overflow_error, msg)
    }

    pub fn raise_index_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.index_error, msg)
    }

    pub fn raise_key_error(&self, msg: &str) -> Raised {
        self.raise_instance_of(&self.excs.key_error, msg)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped claim on the runtime; releases on drop.
pub struct RuntimeGuard<'rt> {
    rt: &'rt Runtime,
}

impl Drop for RuntimeGuard<'_> {
    fn drop(&mut self) {
        self.rt.entered.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons_are_shared() {
        let rt = Runtime::new();
        assert_eq!(rt.bool_obj(true).get(), rt.true_obj());
        assert_eq!(rt.none().get(), rt.none_obj());
        assert!(rt.is_none(rt.none_obj()));
    }

    #[test]
    fn test_guard_scope() {
        let rt = Runtime::new();
        {
            let _g = rt.enter();
            assert!(rt.entered.get());
        }
        assert!(!rt.entered.get());
    }

    #[test]
    fn test_raise_carries_instance() {
        let rt = Runtime::new();
        let raised = rt.raise_type_error("boom");
        assert_eq!(raised.exc_type.get(), rt.excs.type_error.get());
        let value = raised.value.as_ref().unwrap();
        let text = crate::protocol::str_of(&rt, value.get()).unwrap();
        assert_eq!(text, "boom");
    }
}
