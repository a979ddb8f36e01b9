//! The builtin exception hierarchy and the raised-failure triple.

use std::cell::RefCell;

use crate::object::{Obj, ObjHandle, Payload};
use crate::types::class::ClassObject;
use crate::types::dict::DictObject;
use crate::types::string::StrObject;

/// A live host exception in flight: (type, value, traceback).
///
/// The value is usually an exception instance; a bare `raise Class` leaves
/// it empty. The traceback accumulates one entry per unwound frame.
pub struct Raised {
    pub exc_type: ObjHandle,
    pub value: Option<ObjHandle>,
    pub traceback: Option<ObjHandle>,
}

impl Raised {
    pub fn new(exc_type: ObjHandle, value: Option<ObjHandle>) -> Raised {
        Raised {
            exc_type,
            value,
            traceback: None,
        }
    }
}

impl std::fmt::Debug for Raised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.exc_type.payload() {
            Payload::Class(c) => c.name_str().to_owned(),
            _ => "<non-class>".to_owned(),
        };
        write!(f, "Raised({name})")
    }
}

/// The builtin exception type objects, created once per [`crate::Runtime`].
pub struct ExcTypes {
    pub base_exception: ObjHandle,
    pub exception: ObjHandle,
    pub type_error: ObjHandle,
    pub value_error: ObjHandle,
    pub name_error: ObjHandle,
    pub attribute_error: ObjHandle,
    pub system_error: ObjHandle,
    pub import_error: ObjHandle,
    pub zero_division_error: ObjHandle,
    pub overflow_error: ObjHandle,
    pub stop_iteration: ObjHandle,
    pub index_error: ObjHandle,
    pub key_error: ObjHandle,
}

impl ExcTypes {
    pub fn bootstrap() -> ExcTypes {
        let base_exception = new_exception_class("BaseException", None);
        let exception = new_exception_class("Exception", Some(base_exception.get()));
        let derive = |name| new_exception_class(name, Some(exception.get()));
        ExcTypes {
            type_error: derive("TypeError"),
            value_error: derive("ValueError"),
            name_error: derive("NameError"),
            attribute_error: derive("AttributeError"),
            system_error: derive("SystemError"),
            import_error: derive("ImportError"),
            zero_division_error: derive("ZeroDivisionError"),
            overflow_error: derive("OverflowError"),
            stop_iteration: derive("StopIteration"),
            index_error: derive("IndexError"),
            key_error: derive("KeyError"),
            base_exception,
            exception,
        }
    }
}

fn new_exception_class(name: &str, base: Option<Obj>) -> ObjHandle {
    let name_obj = Obj::alloc(Payload::Str(StrObject::new(name)));
    let bases = match base {
        Some(b) => {
            b.incref();
            Obj::alloc(Payload::Tuple(vec![b].into_boxed_slice()))
        }
        None => Obj::alloc(Payload::Tuple(Box::from([]))),
    };
    let dict = Obj::alloc(Payload::Dict(RefCell::new(DictObject::new())));
    ObjHandle::from_owned(Obj::alloc(Payload::Class(ClassObject {
        name: name_obj,
        bases,
        dict,
        is_exception: true,
    })))
}

/// Build an exception instance: an instance of `class` whose dict carries
/// the constructor arguments under `args`.
pub fn new_exception_instance(class: Obj, args: ObjHandle) -> ObjHandle {
    let dict = DictObject::new();
    let dict_obj = Obj::alloc(Payload::Dict(RefCell::new(dict)));
    let key = Obj::alloc(Payload::Str(StrObject::new("args")));
    if let Payload::Dict(d) = dict_obj.payload() {
        d.borrow_mut()
            .insert(key, crate::protocol::str_hash(key), args.get());
    }
    key.decref();
    drop(args);
    class.incref();
    ObjHandle::from_owned(Obj::alloc(Payload::Instance(
        crate::types::class::InstanceObject {
            class,
            dict: dict_obj,
        },
    )))
}

/// Fetch an exception instance's `args` tuple, if it has one (borrowed).
pub fn exception_args(instance: Obj) -> Option<Obj> {
    if let Payload::Instance(inst) = instance.payload() {
        if let Payload::Dict(d) = inst.dict.payload() {
            let key = Obj::alloc(Payload::Str(StrObject::new("args")));
            let found = d.borrow().get(key, crate::protocol::str_hash(key));
            key.decref();
            return found;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::class::is_subclass;

    #[test]
    fn test_hierarchy() {
        let excs = ExcTypes::bootstrap();
        assert!(is_subclass(
            excs.value_error.get(),
            excs.exception.get()
        ));
        assert!(is_subclass(
            excs.value_error.get(),
            excs.base_exception.get()
        ));
        assert!(!is_subclass(
            excs.value_error.get(),
            excs.type_error.get()
        ));
    }
}
