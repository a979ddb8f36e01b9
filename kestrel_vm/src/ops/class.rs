//! `BUILD_CLASS`: metaclass resolution and the metaclass call.
//!
//! Resolution order: an explicit `__metaclass__` in the methods dict, then
//! the first base's class, then a module-level `__metaclass__`, then the
//! default class type.

use kestrel_compiler::OpView;
use kestrel_runtime::object::{Obj, Payload};
use kestrel_runtime::protocol;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;
use crate::register::Register;

/// Registers: (methods, bases, name, dst).
pub fn build_class(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rmethods = op.reg(buf, 0) as usize;
    let rbases = op.reg(buf, 1) as usize;
    let rname = op.reg(buf, 2) as usize;
    let dst = op.reg(buf, 3) as usize;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let methods = regs[rmethods].as_obj();
    let bases = regs[rbases].as_obj();
    let name = regs[rname].as_obj();

    let meta_key = rt.intern("__metaclass__");
    let key_hash = protocol::str_hash(meta_key.get());

    let mut metaclass = Obj::null();
    if let Payload::Dict(d) = methods.payload() {
        if let Some(m) = d.borrow().get(meta_key.get(), key_hash) {
            metaclass = m;
        }
    }
    if metaclass.is_null() {
        if let Payload::Tuple(base_items) = bases.payload() {
            if !base_items.is_empty() {
                // A classic base's class is the default class type.
                metaclass = rt.default_metaclass();
            }
        }
    }
    if metaclass.is_null() && !frame.globals.is_null() {
        if let Payload::Dict(d) = frame.globals.payload() {
            if let Some(m) = d.borrow().get(meta_key.get(), key_hash) {
                metaclass = m;
            }
        }
    }
    if metaclass.is_null() {
        metaclass = rt.default_metaclass();
    }

    let args = [
        Register::from_obj(name),
        Register::from_obj(bases),
        Register::from_obj(methods),
    ];
    let class = ev.call_object(metaclass, &args, &[])?;
    frame.registers[dst].store_obj::<true>(class.into_raw());
    Ok(Flow::Next)
}
