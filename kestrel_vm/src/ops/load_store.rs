//! Register moves, globals, names, locals, and the refcount micro-ops.

use kestrel_compiler::OpView;
use kestrel_runtime::object::{Obj, Payload};
use kestrel_runtime::protocol;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;

/// `LOAD_FAST`/`STORE_FAST`: both are a register move in register form.
pub fn load_fast(_ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let src = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 1) as usize;

    let regs = &mut frame.registers;
    let copied = regs[src];
    copied.incref();
    regs[dst].store_reg::<true>(&copied);
    Ok(Flow::Next)
}

fn dict_get_borrowed(dict: Obj, key: Obj) -> Option<Obj> {
    if dict.is_null() {
        return None;
    }
    match dict.payload() {
        Payload::Dict(d) => d.borrow().get(key, protocol::str_hash(key)),
        _ => None,
    }
}

fn dict_set(dict: Obj, key: Obj, value: Obj) {
    if dict.is_null() {
        return;
    }
    if let Payload::Dict(d) = dict.payload() {
        d.borrow_mut().insert(key, protocol::str_hash(key), value);
    }
}

fn dict_remove(dict: Obj, key: Obj) -> bool {
    if dict.is_null() {
        return false;
    }
    match dict.payload() {
        Payload::Dict(d) => d.borrow_mut().remove(key, protocol::str_hash(key)),
        _ => false,
    }
}

fn name_text(name: Obj) -> String {
    match name.payload() {
        Payload::Str(s) => s.as_str().to_owned(),
        _ => "?".to_owned(),
    }
}

/// `LOAD_GLOBAL`: globals, then builtins; locals are skipped.
pub fn load_global(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let dst = op.reg(buf, 0) as usize;
    let name = frame.names[op.arg as usize];

    let value = dict_get_borrowed(frame.globals, name)
        .or_else(|| dict_get_borrowed(frame.builtins, name));
    match value {
        Some(v) => {
            v.incref();
            frame.registers[dst].store_obj::<true>(v);
            Ok(Flow::Next)
        }
        None => Err(ev.runtime().raise_name_error(&format!(
            "Global name {} not defined.",
            name_text(name)
        ))),
    }
}

pub fn store_global(_ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let src = op.reg(buf, 0) as usize;
    let name = frame.names[op.arg as usize];

    let value = frame.registers[src].as_obj();
    dict_set(frame.globals, name, value);
    Ok(Flow::Next)
}

pub fn delete_global(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let name = frame.names[op.arg as usize];
    if dict_remove(frame.globals, name) {
        Ok(Flow::Next)
    } else {
        Err(ev.runtime().raise_name_error(&format!(
            "Global name {} not defined.",
            name_text(name)
        )))
    }
}

/// `LOAD_NAME`: locals, then globals, then builtins.
pub fn load_name(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let dst = op.reg(buf, 0) as usize;
    let name = frame.names[op.arg as usize];

    let locals = if frame.locals.is_null() {
        frame.locals_dict(ev.runtime())
    } else {
        frame.locals
    };
    let value = dict_get_borrowed(locals, name)
        .or_else(|| dict_get_borrowed(frame.globals, name))
        .or_else(|| dict_get_borrowed(frame.builtins, name));
    match value {
        Some(v) => {
            v.incref();
            frame.registers[dst].store_obj::<true>(v);
            Ok(Flow::Next)
        }
        None => Err(ev
            .runtime()
            .raise_name_error(&format!("Name {} not defined.", name_text(name)))),
    }
}

pub fn store_name(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let src = op.reg(buf, 0) as usize;
    let name = frame.names[op.arg as usize];

    let locals = if frame.locals.is_null() {
        frame.locals_dict(ev.runtime())
    } else {
        frame.locals
    };
    let value = frame.registers[src].as_obj();
    dict_set(locals, name, value);
    Ok(Flow::Next)
}

pub fn delete_name(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let name = frame.names[op.arg as usize];
    if !frame.locals.is_null() && dict_remove(frame.locals, name) {
        Ok(Flow::Next)
    } else {
        Err(ev
            .runtime()
            .raise_name_error(&format!("Name {} not defined.", name_text(name))))
    }
}

/// `LOAD_LOCALS`: materialise and load the locals mapping.
pub fn load_locals(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let dst = op.reg(buf, 0) as usize;

    let locals = frame.locals_dict(ev.runtime());
    locals.incref();
    frame.registers[dst].store_obj::<true>(locals);
    Ok(Flow::Next)
}

// =============================================================================
// Refcount micro-opcodes
// =============================================================================

/// `INCREF`: an explicit ownership transition factored out by the
/// compiler. Imbalanced pairs are a compiler bug, not a runtime concern.
pub fn incref(_ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r = op.reg(buf, 0) as usize;
    let obj = frame.registers[r].as_obj();
    debug_assert!(!obj.is_null());
    obj.incref();
    Ok(Flow::Next)
}

pub fn decref(_ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r = op.reg(buf, 0) as usize;
    let obj = frame.registers[r].as_obj();
    debug_assert!(!obj.is_null());
    obj.decref();
    Ok(Flow::Next)
}
