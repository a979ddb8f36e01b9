//! The builtin scope and the module registry behind `__import__`.

use crate::object::{Obj, ObjHandle, Payload};
use crate::protocol;
use crate::runtime::Runtime;
use crate::types::class::{ClassObject, ModuleObject};
use crate::types::function::{BuiltinFn, BuiltinObject};
use crate::RtResult;

/// Populate the builtin dict and the module registry.
pub(crate) fn install(rt: &mut Runtime) {
    let entries: &[(&str, BuiltinFn)] = &[
        ("len", builtin_len),
        ("range", builtin_range),
        ("str", builtin_str),
        ("repr", builtin_repr),
        ("abs", builtin_abs),
        ("isinstance", builtin_isinstance),
        ("__import__", builtin_import),
    ];
    for &(name, f) in entries {
        let obj = ObjHandle::from_owned(Obj::alloc(Payload::Builtin(BuiltinObject { name, f })));
        set_builtin(rt, name, obj.get());
    }

    // Exception types are reachable by name, like any host scope.
    let excs = [
        ("BaseException", rt.excs.base_exception.get()),
        ("Exception", rt.excs.exception.get()),
        ("TypeError", rt.excs.type_error.get()),
        ("ValueError", rt.excs.value_error.get()),
        ("NameError", rt.excs.name_error.get()),
        ("AttributeError", rt.excs.attribute_error.get()),
        ("SystemError", rt.excs.system_error.get()),
        ("ImportError", rt.excs.import_error.get()),
        ("ZeroDivisionError", rt.excs.zero_division_error.get()),
        ("OverflowError", rt.excs.overflow_error.get()),
        ("StopIteration", rt.excs.stop_iteration.get()),
        ("IndexError", rt.excs.index_error.get()),
        ("KeyError", rt.excs.key_error.get()),
    ];
    for (name, cls) in excs {
        set_builtin(rt, name, cls);
    }

    let math = make_math_module(rt);
    rt.register_module("math", math);
}

fn set_builtin(rt: &Runtime, name: &str, value: Obj) {
    let key = rt.intern(name);
    let hash = protocol::str_hash(key.get());
    if let Payload::Dict(d) = rt.builtins().payload() {
        d.borrow_mut().insert(key.get(), hash, value);
    }
}

fn dict_set(rt: &Runtime, dict: Obj, name: &str, value: Obj) {
    let key = rt.intern(name);
    let hash = protocol::str_hash(key.get());
    if let Payload::Dict(d) = dict.payload() {
        d.borrow_mut().insert(key.get(), hash, value);
    }
}

fn make_math_module(rt: &Runtime) -> ObjHandle {
    let dict = rt.new_dict();
    let fns: &[(&str, BuiltinFn)] = &[("floor", math_floor), ("sqrt", math_sqrt)];
    for &(name, f) in fns {
        let obj = ObjHandle::from_owned(Obj::alloc(Payload::Builtin(BuiltinObject { name, f })));
        dict_set(rt, dict.get(), name, obj.get());
    }
    let name = rt.new_str("math");
    ObjHandle::from_owned(Obj::alloc(Payload::Module(ModuleObject {
        name: name.into_raw(),
        dict: dict.into_raw(),
    })))
}

fn arity(rt: &Runtime, name: &str, args: &[Obj], min: usize, max: usize) -> RtResult<()> {
    if args.len() < min || args.len() > max {
        return Err(rt.raise_type_error(&format!(
            "{name}() takes {min} to {max} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn int_arg(rt: &Runtime, name: &str, v: Obj) -> RtResult<i64> {
    match v.payload() {
        Payload::Int(i) => Ok(*i),
        Payload::Bool(b) => Ok(*b as i64),
        _ => Err(rt.raise_type_error(&format!(
            "{name}() expected an integer, got {}",
            protocol::type_name(v)
        ))),
    }
}

pub fn builtin_len(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "len", args, 1, 1)?;
    let n = match args[0].payload() {
        Payload::Str(s) => s.as_str().chars().count(),
        Payload::Tuple(items) => items.len(),
        Payload::List(items) => items.borrow().len(),
        Payload::Dict(d) => d.borrow().len(),
        _ => {
            return Err(rt.raise_type_error(&format!(
                "object of type '{}' has no len()",
                protocol::type_name(args[0])
            )));
        }
    };
    Ok(rt.new_int(n as i64))
}

/// `range([start,] stop[, step])` — materialised as a list.
pub fn builtin_range(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "range", args, 1, 3)?;
    let (start, stop, step) = match args.len() {
        1 => (0, int_arg(rt, "range", args[0])?, 1),
        2 => (
            int_arg(rt, "range", args[0])?,
            int_arg(rt, "range", args[1])?,
            1,
        ),
        _ => (
            int_arg(rt, "range", args[0])?,
            int_arg(rt, "range", args[1])?,
            int_arg(rt, "range", args[2])?,
        ),
    };
    if step == 0 {
        return Err(rt.raise_value_error("range() step argument must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(rt.new_int(i).into_raw());
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(rt.new_list(items))
}

pub fn builtin_str(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "str", args, 0, 1)?;
    match args.first() {
        Some(&v) => protocol::object_str(rt, v),
        None => Ok(rt.new_str("")),
    }
}

pub fn builtin_repr(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "repr", args, 1, 1)?;
    protocol::object_repr(rt, args[0])
}

pub fn builtin_abs(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "abs", args, 1, 1)?;
    match args[0].payload() {
        Payload::Int(i) => match i.checked_abs() {
            Some(v) => Ok(rt.new_int(v)),
            None => Err(rt.raise_overflow_error("integer absolute value overflow")),
        },
        Payload::Bool(b) => Ok(rt.new_int(*b as i64)),
        Payload::Float(f) => Ok(rt.new_float(f.abs())),
        _ => Err(rt.raise_type_error(&format!(
            "bad operand type for abs(): '{}'",
            protocol::type_name(args[0])
        ))),
    }
}

pub fn builtin_isinstance(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "isinstance", args, 2, 2)?;
    let classinfo = args[1];
    let valid = match classinfo.payload() {
        Payload::Class(_) => true,
        Payload::Tuple(items) => items
            .iter()
            .all(|&c| matches!(c.payload(), Payload::Class(_))),
        _ => false,
    };
    if !valid {
        return Err(rt.raise_type_error(
            "isinstance() arg 2 must be a class or tuple of classes",
        ));
    }
    Ok(rt.bool_obj(protocol::exception_matches(args[0], classinfo)))
}

/// `__import__(name, globals, locals, fromlist[, level])`, resolved against
/// the runtime's module registry.
pub fn builtin_import(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "__import__", args, 1, 5)?;
    let name = match args[0].payload() {
        Payload::Str(s) => s.as_str().to_owned(),
        _ => {
            return Err(rt.raise_type_error("__import__() argument 1 must be a string"));
        }
    };
    match rt.lookup_module(&name) {
        Some(module) => Ok(module),
        None => Err(rt.raise_import_error(&format!("No module named {name}"))),
    }
}

/// The default metaclass: `classobj(name, bases, dict)`.
///
/// A class deriving from the exception hierarchy is itself marked as an
/// exception class so `raise`/`except` treat it uniformly.
pub fn builtin_classobj(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "classobj", args, 3, 3)?;
    let (name, bases, dict) = (args[0], args[1], args[2]);
    if !matches!(name.payload(), Payload::Str(_)) {
        return Err(rt.raise_type_error("class name must be a string"));
    }
    let Payload::Tuple(base_items) = bases.payload() else {
        return Err(rt.raise_type_error("class bases must be a tuple"));
    };
    if !matches!(dict.payload(), Payload::Dict(_)) {
        return Err(rt.raise_type_error("class dict must be a dict"));
    }
    let is_exception = base_items.iter().any(|&b| match b.payload() {
        Payload::Class(c) => c.is_exception,
        _ => false,
    });
    name.incref();
    bases.incref();
    dict.incref();
    Ok(ObjHandle::from_owned(Obj::alloc(Payload::Class(
        ClassObject {
            name,
            bases,
            dict,
            is_exception,
        },
    ))))
}

// =============================================================================
// math module
// =============================================================================

fn math_floor(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "floor", args, 1, 1)?;
    match args[0].payload() {
        Payload::Float(f) => Ok(rt.new_int(f.floor() as i64)),
        Payload::Int(i) => Ok(rt.new_int(*i)),
        Payload::Bool(b) => Ok(rt.new_int(*b as i64)),
        _ => Err(rt.raise_type_error("a float is required")),
    }
}

fn math_sqrt(rt: &Runtime, args: &[Obj]) -> RtResult<ObjHandle> {
    arity(rt, "sqrt", args, 1, 1)?;
    let v = match args[0].payload() {
        Payload::Float(f) => *f,
        Payload::Int(i) => *i as f64,
        Payload::Bool(b) => *b as i64 as f64,
        _ => {
            return Err(rt.raise_type_error("a float is required"));
        }
    };
    if v < 0.0 {
        return Err(rt.raise_value_error("math domain error"));
    }
    Ok(rt.new_float(v.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_forms() {
        let rt = Runtime::new();
        let r = builtin_range(&rt, &[rt.new_int(3).get()]).unwrap();
        if let Payload::List(items) = r.payload() {
            assert_eq!(items.borrow().len(), 3);
        } else {
            panic!("range did not build a list");
        }

        let lo = rt.new_int(2);
        let hi = rt.new_int(8);
        let step = rt.new_int(3);
        let r = builtin_range(&rt, &[lo.get(), hi.get(), step.get()]).unwrap();
        if let Payload::List(items) = r.payload() {
            let items = items.borrow();
            let vals: Vec<i64> = items
                .iter()
                .map(|&v| match v.payload() {
                    Payload::Int(i) => *i,
                    _ => panic!(),
                })
                .collect();
            assert_eq!(vals, vec![2, 5]);
        }
    }

    #[test]
    fn test_import_hits_registry() {
        let rt = Runtime::new();
        let name = rt.new_str("math");
        let m = builtin_import(&rt, &[name.get()]).unwrap();
        assert!(matches!(m.payload(), Payload::Module(_)));

        let missing = rt.new_str("nosuch");
        assert!(builtin_import(&rt, &[missing.get()]).is_err());
    }

    #[test]
    fn test_classobj_propagates_exception_flag() {
        let rt = Runtime::new();
        let name = rt.new_str("MyError");
        let base = rt.excs.value_error.clone();
        base.get().incref();
        let bases = rt.new_tuple(vec![base.get()]);
        let dict = rt.new_dict();
        let cls = builtin_classobj(&rt, &[name.get(), bases.get(), dict.get()]).unwrap();
        match cls.payload() {
            Payload::Class(c) => assert!(c.is_exception),
            _ => panic!("not a class"),
        }
    }
}
