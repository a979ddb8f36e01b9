//! Imports: `IMPORT_NAME`, `IMPORT_FROM`, `IMPORT_STAR`.

use kestrel_compiler::OpView;
use kestrel_runtime::object::{Obj, Payload};
use kestrel_runtime::protocol;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;
use crate::register::Register;

/// `IMPORT_NAME`: invoke the builtins' `__import__` with
/// `(name, globals, locals, fromlist, level)`; (fromlist, level, dst).
pub fn import_name(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rfrom = op.reg(buf, 0) as usize;
    let rlevel = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;
    let name = frame.names[op.arg as usize];

    let rt = ev.runtime();
    let import_key = rt.intern("__import__");
    let import_fn = match frame.builtins.payload() {
        Payload::Dict(d) => d
            .borrow()
            .get(import_key.get(), protocol::str_hash(import_key.get())),
        _ => None,
    };
    let Some(import_fn) = import_fn else {
        return Err(rt.raise_import_error("__import__ not found in builtins."));
    };

    let globals = if frame.globals.is_null() {
        rt.none_obj()
    } else {
        frame.globals
    };
    let locals = if frame.locals.is_null() {
        rt.none_obj()
    } else {
        frame.locals
    };
    let fromlist = frame.registers[rfrom].as_obj();
    let level = frame.registers[rlevel].as_obj();
    let args = [
        Register::from_obj(name),
        Register::from_obj(globals),
        Register::from_obj(locals),
        Register::from_obj(fromlist),
        Register::from_obj(level),
    ];
    let module = ev.call_object(import_fn, &args, &[])?;
    frame.registers[dst].store_obj::<true>(module.into_raw());
    Ok(Flow::Next)
}

/// `IMPORT_FROM`: fetch one attribute from a module; a missing attribute
/// surfaces as an import-error.
pub fn import_from(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rmod = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 1) as usize;
    let name = frame.names[op.arg as usize];

    let rt = ev.runtime();
    let module = frame.registers[rmod].as_obj();
    let value = match protocol::object_get_attr(rt, module, name) {
        Ok(v) => v,
        Err(raised) => {
            if raised.exc_type.get() == rt.excs.attribute_error.get() {
                let text = match name.payload() {
                    Payload::Str(s) => s.as_str().to_owned(),
                    _ => "?".to_owned(),
                };
                return Err(rt.raise_import_error(&format!("cannot import name {text}")));
            }
            return Err(raised);
        }
    };
    frame.registers[dst].store_obj::<true>(value.into_raw());
    Ok(Flow::Next)
}

/// `IMPORT_STAR`: write every public module attribute into locals.
/// `__all__` drives the selection when present; otherwise the module dict
/// keys with leading underscores filtered out.
pub fn import_star(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rmod = op.reg(buf, 0) as usize;

    let rt = ev.runtime();
    let module = frame.registers[rmod].as_obj();
    let Payload::Module(m) = module.payload() else {
        return Err(rt.raise_type_error("import * target is not a module"));
    };

    let all_key = rt.intern("__all__");
    let all = match m.dict.payload() {
        Payload::Dict(d) => d.borrow().get(all_key.get(), protocol::str_hash(all_key.get())),
        _ => None,
    };
    let skip_underscores = all.is_none();

    let mut names: Vec<Obj> = Vec::new();
    match all {
        Some(list) => match list.payload() {
            Payload::List(items) => {
                for &v in items.borrow().iter() {
                    v.incref();
                    names.push(v);
                }
            }
            Payload::Tuple(items) => {
                for &v in items.iter() {
                    v.incref();
                    names.push(v);
                }
            }
            _ => {
                return Err(rt.raise_type_error("__all__ must be a sequence"));
            }
        },
        None => {
            if let Payload::Dict(d) = m.dict.payload() {
                for (k, _) in d.borrow().items() {
                    k.incref();
                    names.push(k);
                }
            }
        }
    }

    let locals = frame.locals_dict(rt);
    for name in names {
        let text_skips = skip_underscores
            && matches!(name.payload(), Payload::Str(s) if s.as_str().starts_with('_'));
        if !text_skips {
            let value = match m.dict.payload() {
                Payload::Dict(d) => d.borrow().get(name, protocol::str_hash(name)),
                _ => None,
            };
            if let Some(value) = value {
                if let Payload::Dict(d) = locals.payload() {
                    d.borrow_mut()
                        .insert(name, protocol::str_hash(name), value);
                }
            }
        }
        name.decref();
    }
    Ok(Flow::Next)
}
