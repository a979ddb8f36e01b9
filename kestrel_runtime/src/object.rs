//! Refcounted host objects.
//!
//! Objects are heap boxes carrying a reference count and a payload. The
//! evaluator and the protocols manipulate them through [`Obj`], a copyable
//! pointer with explicit `incref`/`decref`, mirroring the discipline of a
//! C host runtime: whoever stores an `Obj` owns exactly one reference and
//! releases it when the store dies. [`ObjHandle`] is the owning wrapper
//! used at API boundaries where RAII is wanted.
//!
//! Everything here is single-threaded. The live-object counter exists so
//! tests can assert that evaluation is reference-neutral.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use kestrel_compiler::RegisterCode;

use crate::types::class::{ClassObject, InstanceObject, ModuleObject};
use crate::types::dict::DictObject;
use crate::types::function::{BuiltinObject, FunctionObject, MethodObject};
use crate::types::iter::IterObject;
use crate::types::string::StrObject;
use crate::types::traceback::TraceEntry;

thread_local! {
    static LIVE_OBJECTS: Cell<i64> = const { Cell::new(0) };
}

/// Number of host objects currently alive on this thread.
pub fn live_object_count() -> i64 {
    LIVE_OBJECTS.with(|c| c.get())
}

/// One heap object: reference count plus payload.
pub struct PyObject {
    refcnt: Cell<usize>,
    pub payload: Payload,
}

/// The concrete value held by an object.
pub enum Payload {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StrObject),
    Tuple(Box<[Obj]>),
    List(RefCell<Vec<Obj>>),
    Dict(RefCell<DictObject>),
    /// `slice(start, stop)`; either bound may be the `None` singleton.
    Slice { start: Obj, stop: Obj },
    /// Shared mutable box backing closures; the slot may be empty (null).
    ClosureCell(Cell<Obj>),
    Code(Arc<RegisterCode>),
    Function(FunctionObject),
    Method(MethodObject),
    Builtin(BuiltinObject),
    Class(ClassObject),
    Instance(InstanceObject),
    Module(ModuleObject),
    Iter(RefCell<IterObject>),
    Traceback(RefCell<Vec<TraceEntry>>),
}

/// A possibly-null pointer to a host object.
///
/// `Obj` is `Copy` and carries no ownership by itself; reference ownership
/// is a protocol between the code that increfs and the store that will
/// eventually decref. Identity comparison is pointer equality.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Obj(*const PyObject);

impl Obj {
    /// The null sentinel (unset register, absent optional field).
    #[inline(always)]
    pub const fn null() -> Obj {
        Obj(std::ptr::null())
    }

    #[inline(always)]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Allocate a new object with refcount 1.
    pub fn alloc(payload: Payload) -> Obj {
        LIVE_OBJECTS.with(|c| c.set(c.get() + 1));
        Obj(Box::into_raw(Box::new(PyObject {
            refcnt: Cell::new(1),
            payload,
        })))
    }

    /// Access the payload.
    ///
    /// The pointer must be non-null and the caller must hold a reference
    /// keeping the object alive for `'a`.
    #[inline(always)]
    pub fn payload<'a>(self) -> &'a Payload {
        debug_assert!(!self.0.is_null(), "payload() on null object");
        unsafe { &(*self.0).payload }
    }

    #[inline(always)]
    pub fn incref(self) {
        debug_assert!(!self.0.is_null(), "incref on null object");
        let rc = unsafe { &(*self.0).refcnt };
        rc.set(rc.get() + 1);
    }

    /// Null-tolerant incref.
    #[inline(always)]
    pub fn xincref(self) {
        if !self.is_null() {
            self.incref();
        }
    }

    #[inline(always)]
    pub fn decref(self) {
        debug_assert!(!self.0.is_null(), "decref on null object");
        let rc = unsafe { &(*self.0).refcnt };
        let n = rc.get();
        debug_assert!(n > 0, "decref past zero");
        if n == 1 {
            dealloc(self.0);
        } else {
            rc.set(n - 1);
        }
    }

    /// Null-tolerant decref.
    #[inline(always)]
    pub fn xdecref(self) {
        if !self.is_null() {
            self.decref();
        }
    }

    /// Current reference count (diagnostics and tests).
    #[inline]
    pub fn refcount(self) -> usize {
        debug_assert!(!self.0.is_null());
        unsafe { (*self.0).refcnt.get() }
    }

    /// Stable identity for hint addressing and `is` comparison.
    #[inline(always)]
    pub fn id(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for Obj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "Obj(null)")
        } else {
            write!(f, "Obj({:p}: {})", self.0, crate::protocol::type_name(*self))
        }
    }
}

/// Destroy an object whose last reference was just dropped.
///
/// Children are released before the box is freed; a deep structure unwinds
/// recursively.
fn dealloc(ptr: *const PyObject) {
    let boxed = unsafe { Box::from_raw(ptr as *mut PyObject) };
    release_children(&boxed.payload);
    LIVE_OBJECTS.with(|c| c.set(c.get() - 1));
    drop(boxed);
}

fn release_children(payload: &Payload) {
    match payload {
        Payload::None
        | Payload::Bool(_)
        | Payload::Int(_)
        | Payload::Float(_)
        | Payload::Str(_)
        | Payload::Code(_)
        | Payload::Builtin(_)
        | Payload::Traceback(_) => {}
        Payload::Tuple(items) => {
            for &item in items.iter() {
                item.xdecref();
            }
        }
        Payload::List(items) => {
            for &item in items.borrow().iter() {
                item.decref();
            }
        }
        Payload::Dict(dict) => {
            dict.borrow_mut().release_entries();
        }
        Payload::Slice { start, stop } => {
            start.xdecref();
            stop.xdecref();
        }
        Payload::ClosureCell(slot) => {
            slot.get().xdecref();
        }
        Payload::Function(f) => {
            f.globals.xdecref();
            f.defaults.xdecref();
            f.closure.xdecref();
            f.name.decref();
        }
        Payload::Method(m) => {
            m.func.decref();
            m.receiver.decref();
        }
        Payload::Class(c) => {
            c.name.decref();
            c.bases.decref();
            c.dict.decref();
        }
        Payload::Instance(i) => {
            i.class.decref();
            i.dict.decref();
        }
        Payload::Module(m) => {
            m.name.decref();
            m.dict.decref();
        }
        Payload::Iter(it) => {
            it.borrow().seq.decref();
        }
    }
}

/// An owning, non-null object reference with RAII release.
pub struct ObjHandle(Obj);

impl ObjHandle {
    /// Take over an existing reference (no incref).
    #[inline]
    pub fn from_owned(obj: Obj) -> ObjHandle {
        debug_assert!(!obj.is_null(), "ObjHandle::from_owned(null)");
        ObjHandle(obj)
    }

    /// Borrow-and-own: increfs.
    #[inline]
    pub fn from_borrowed(obj: Obj) -> ObjHandle {
        obj.incref();
        ObjHandle(obj)
    }

    /// The underlying pointer; the handle keeps owning its reference.
    #[inline(always)]
    pub fn get(&self) -> Obj {
        self.0
    }

    #[inline(always)]
    pub fn payload(&self) -> &Payload {
        self.0.payload()
    }

    /// Give up RAII and transfer the reference to the caller.
    #[inline]
    pub fn into_raw(self) -> Obj {
        let obj = self.0;
        std::mem::forget(self);
        obj
    }
}

impl Clone for ObjHandle {
    fn clone(&self) -> Self {
        ObjHandle::from_borrowed(self.0)
    }
}

impl Drop for ObjHandle {
    fn drop(&mut self) {
        self.0.decref();
    }
}

impl std::fmt::Debug for ObjHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_release() {
        let before = live_object_count();
        let obj = Obj::alloc(Payload::Int(42));
        assert_eq!(obj.refcount(), 1);
        assert_eq!(live_object_count(), before + 1);
        obj.decref();
        assert_eq!(live_object_count(), before);
    }

    #[test]
    fn test_container_releases_children() {
        let before = live_object_count();
        let a = Obj::alloc(Payload::Int(1));
        let b = Obj::alloc(Payload::Int(2));
        // The tuple takes over both references.
        let t = Obj::alloc(Payload::Tuple(vec![a, b].into_boxed_slice()));
        assert_eq!(live_object_count(), before + 3);
        t.decref();
        assert_eq!(live_object_count(), before);
    }

    #[test]
    fn test_handle_raii() {
        let before = live_object_count();
        {
            let h = ObjHandle::from_owned(Obj::alloc(Payload::Float(1.5)));
            let h2 = h.clone();
            assert_eq!(h.get().refcount(), 2);
            drop(h2);
            assert_eq!(h.get().refcount(), 1);
        }
        assert_eq!(live_object_count(), before);
    }
}
