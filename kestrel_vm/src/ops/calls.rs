//! Calls and callable construction.
//!
//! The immediate argument encodes the call shape: low byte = positional
//! count, next byte = keyword-pair count. A callee with compiled register
//! code executes in a nested frame through the same evaluator, with the
//! argument registers passed directly (no boxing); everything else is
//! boxed and dispatched through the host call protocol.

use smallvec::SmallVec;

use kestrel_compiler::OpView;
use kestrel_runtime::object::{Obj, ObjHandle, Payload};

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;
use crate::register::Register;

fn call_function_impl<const HAS_VAR: bool, const HAS_KW: bool>(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let na = (op.arg & 0xff) as usize;
    let nk = ((op.arg >> 8) & 0xff) as usize;
    let mut n = na + 2 * nk;
    if HAS_VAR {
        n += 1;
    }
    if HAS_KW {
        n += 1;
    }
    debug_assert_eq!(n + 2, op.num_regs as usize);
    let dst = op.reg(buf, n + 1) as usize;
    let callee_idx = op.reg(buf, 0) as usize;

    let mut args: SmallVec<[Register; 8]> = (0..na)
        .map(|i| frame.registers[op.reg(buf, 1 + i) as usize])
        .collect();

    // Keyword pairs arrive after the positionals.
    let mut kw_owned: Vec<(ObjHandle, ObjHandle)> = Vec::with_capacity(nk);
    for i in 0..nk {
        let rk = op.reg(buf, 1 + na + 2 * i) as usize;
        let rv = op.reg(buf, 1 + na + 2 * i + 1) as usize;
        let k = frame.registers[rk].to_owned_obj();
        let v = frame.registers[rv].to_owned_obj();
        kw_owned.push((k, v));
    }

    // `*args`: splice the sequence register into the positionals.
    let mut var_owned: Vec<ObjHandle> = Vec::new();
    if HAS_VAR {
        let rseq = op.reg(buf, 1 + na + 2 * nk) as usize;
        let seq = frame.registers[rseq].to_owned_obj();
        match seq.payload() {
            Payload::Tuple(items) => {
                for &item in items.iter() {
                    var_owned.push(ObjHandle::from_borrowed(item));
                }
            }
            Payload::List(items) => {
                for &item in items.borrow().iter() {
                    var_owned.push(ObjHandle::from_borrowed(item));
                }
            }
            _ => {
                return Err(ev
                    .runtime()
                    .raise_type_error("argument after * must be a sequence"));
            }
        }
        for h in &var_owned {
            args.push(Register::from_obj(h.get()));
        }
    }

    // `**kwargs`: merge the dict register into the keyword pairs.
    if HAS_KW {
        let mut idx = 1 + na + 2 * nk;
        if HAS_VAR {
            idx += 1;
        }
        let rdict = op.reg(buf, idx) as usize;
        let dict = frame.registers[rdict].to_owned_obj();
        match dict.payload() {
            Payload::Dict(d) => {
                for (k, v) in d.borrow().items() {
                    kw_owned.push((ObjHandle::from_borrowed(k), ObjHandle::from_borrowed(v)));
                }
            }
            _ => {
                return Err(ev
                    .runtime()
                    .raise_type_error("argument after ** must be a dict"));
            }
        }
    }

    let kw_pairs: Vec<(Obj, Obj)> = kw_owned.iter().map(|(k, v)| (k.get(), v.get())).collect();

    let callee = frame.registers[callee_idx].as_obj();
    let result = ev.call_object(callee, &args, &kw_pairs)?;
    frame.registers[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

pub fn call_function(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    call_function_impl::<false, false>(ev, frame, op)
}

pub fn call_function_var(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    call_function_impl::<true, false>(ev, frame, op)
}

pub fn call_function_kw(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    call_function_impl::<false, true>(ev, frame, op)
}

pub fn call_function_var_kw(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
) -> VmResult<Flow> {
    call_function_impl::<true, true>(ev, frame, op)
}

// =============================================================================
// Callable construction
// =============================================================================

fn new_function(
    ev: &Evaluator,
    frame: &RegisterFrame,
    code_obj: Obj,
    defaults: Obj,
    closure: Obj,
) -> VmResult<ObjHandle> {
    let rt = ev.runtime();
    let Payload::Code(code) = code_obj.payload() else {
        return Err(rt.raise_system_error("MAKE_FUNCTION on a non-code object"));
    };
    frame.globals.xincref();
    let name = rt.new_str(&code.name);
    Ok(ObjHandle::from_owned(Obj::alloc(Payload::Function(
        kestrel_runtime::types::function::FunctionObject {
            code: code.clone(),
            globals: frame.globals,
            defaults,
            closure,
            name: name.into_raw(),
        },
    ))))
}

/// `MAKE_FUNCTION`: (code, default*, dst); arg = default count.
pub fn make_function(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let ndef = op.arg as usize;
    let rcode = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, ndef + 1) as usize;

    let defaults = if ndef > 0 {
        let items: Vec<Obj> = (0..ndef)
            .map(|i| {
                let r = op.reg(buf, 1 + i) as usize;
                frame.registers[r].to_owned_obj().into_raw()
            })
            .collect();
        ev.runtime().new_tuple(items).into_raw()
    } else {
        Obj::null()
    };

    let code_obj = frame.registers[rcode].as_obj();
    let func = new_function(ev, frame, code_obj, defaults, Obj::null())?;
    frame.registers[dst].store_obj::<true>(func.into_raw());
    Ok(Flow::Next)
}

/// `MAKE_CLOSURE`: (code, closure-tuple, default*, dst).
pub fn make_closure(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let ndef = op.arg as usize;
    let rcode = op.reg(buf, 0) as usize;
    let rclosure = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, ndef + 2) as usize;

    let closure = frame.registers[rclosure].as_obj();
    if !matches!(closure.payload(), Payload::Tuple(_)) {
        return Err(ev
            .runtime()
            .raise_system_error("MAKE_CLOSURE closure is not a tuple"));
    }
    closure.incref();

    let buf = &frame.code.instructions;
    let defaults = if ndef > 0 {
        let items: Vec<Obj> = (0..ndef)
            .map(|i| {
                let r = op.reg(buf, 2 + i) as usize;
                frame.registers[r].to_owned_obj().into_raw()
            })
            .collect();
        ev.runtime().new_tuple(items).into_raw()
    } else {
        Obj::null()
    };

    let code_obj = frame.registers[rcode].as_obj();
    let func = new_function(ev, frame, code_obj, defaults, closure)?;
    frame.registers[dst].store_obj::<true>(func.into_raw());
    Ok(Flow::Next)
}
