//! Subscript handlers: generic, list/dict specialisations, dict helpers,
//! slices, and the fixed-key `CONST_INDEX` read.

use kestrel_compiler::{OpView, INVALID_REGISTER};
use kestrel_runtime::object::{Obj, ObjHandle, Payload};
use kestrel_runtime::protocol;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;
use crate::register::RegType;

/// `dst = container[key]`. A list with an integer-mode key takes the
/// direct indexed load with negative-index normalization; everything else
/// goes through the item protocol.
pub fn binary_subscr(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rc = op.reg(buf, 0) as usize;
    let rk = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;

    let regs = &mut frame.registers;
    let container = regs[rc].as_obj();

    if regs[rk].get_type() == RegType::Int {
        if let Payload::List(items) = container.payload() {
            let items = items.borrow();
            let mut i = regs[rk].as_int();
            if i < 0 {
                i += items.len() as i64;
            }
            if i >= 0 && (i as usize) < items.len() {
                let v = items[i as usize];
                v.incref();
                drop(items);
                regs[dst].store_obj::<true>(v);
                return Ok(Flow::Next);
            }
        }
    }

    let key = regs[rk].as_obj();
    let result = protocol::object_get_item(ev.runtime(), container, key)?;
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

/// `BINARY_SUBSCR_LIST`: the compiler proved the container is a list, so
/// only the key check remains.
pub fn binary_subscr_list(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
) -> VmResult<Flow> {
    binary_subscr(ev, frame, op)
}

/// `BINARY_SUBSCR_DICT`: direct dict probe, falling back to the item
/// protocol when the key is absent (for the error path).
pub fn binary_subscr_dict(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rc = op.reg(buf, 0) as usize;
    let rk = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let container = regs[rc].as_obj();
    let key = regs[rk].as_obj();

    if let Payload::Dict(d) = container.payload() {
        let hash = protocol::object_hash(rt, key)?;
        let found = d.borrow().get(key, hash);
        if let Some(v) = found {
            v.incref();
            regs[dst].store_obj::<true>(v);
            return Ok(Flow::Next);
        }
    }
    let result = protocol::object_get_item(rt, container, key)?;
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

/// `container[key] = value`; registers are (key, container, value).
pub fn store_subscr(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rk = op.reg(buf, 0) as usize;
    let rc = op.reg(buf, 1) as usize;
    let rv = op.reg(buf, 2) as usize;

    let regs = &mut frame.registers;
    let key = regs[rk].as_obj();
    let container = regs[rc].as_obj();
    let value = regs[rv].as_obj();
    protocol::object_set_item(ev.runtime(), container, key, value)?;
    Ok(Flow::Next)
}

/// `STORE_SUBSCR_LIST`: unboxed index goes through the list-set path with
/// no negative-index normalization (the compiler only specialises when
/// negative indices are excluded).
pub fn store_subscr_list(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rk = op.reg(buf, 0) as usize;
    let rc = op.reg(buf, 1) as usize;
    let rv = op.reg(buf, 2) as usize;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let container = regs[rc].as_obj();
    let value = regs[rv].as_obj();

    if regs[rk].get_type() == RegType::Int {
        let idx = regs[rk].as_int();
        if let Payload::List(items) = container.payload() {
            let mut items = items.borrow_mut();
            if idx < 0 || idx as usize >= items.len() {
                return Err(rt.raise_index_error("list assignment index out of range"));
            }
            value.incref();
            let old = items[idx as usize];
            items[idx as usize] = value;
            drop(items);
            old.decref();
            return Ok(Flow::Next);
        }
    }

    let key = regs[rk].as_obj();
    protocol::object_set_item(rt, container, key, value)?;
    Ok(Flow::Next)
}

pub fn store_subscr_dict(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    store_subscr(ev, frame, op)
}

/// `STORE_MAP`: registers are (key, value, dict).
pub fn store_map(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rk = op.reg(buf, 0) as usize;
    let rv = op.reg(buf, 1) as usize;
    let rd = op.reg(buf, 2) as usize;

    let regs = &mut frame.registers;
    let key = regs[rk].as_obj();
    let value = regs[rv].as_obj();
    let dict = regs[rd].as_obj();
    protocol::object_set_item(ev.runtime(), dict, key, value)?;
    Ok(Flow::Next)
}

pub fn list_append(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rl = op.reg(buf, 0) as usize;
    let rv = op.reg(buf, 1) as usize;

    let regs = &mut frame.registers;
    let list = regs[rl].as_obj();
    let value = regs[rv].as_obj();
    match list.payload() {
        Payload::List(items) => {
            value.incref();
            items.borrow_mut().push(value);
            Ok(Flow::Next)
        }
        _ => Err(ev
            .runtime()
            .raise_type_error("list.append target is not a list")),
    }
}

/// `CONST_INDEX`: read a container at a small fixed key.
pub fn const_index(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rc = op.reg(buf, 0) as usize;
    let dst_idx = op.reg(buf, 1);
    if dst_idx == INVALID_REGISTER {
        return Ok(Flow::Next);
    }
    let dst = dst_idx as usize;
    let key_value = op.arg;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let container = regs[rc].as_obj();
    let key = rt.new_int(key_value as i64);
    let result = protocol::object_get_item(rt, container, key.get())?;
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

// =============================================================================
// Dict micro-opcodes
// =============================================================================

pub fn dict_contains(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rd = op.reg(buf, 0) as usize;
    let rk = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let dict = regs[rd].as_obj();
    let key = regs[rk].as_obj();
    let contained = protocol::sequence_contains(rt, dict, key)?;
    let result = rt.bool_obj(contained);
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

/// `DICT_GET`: a missing key yields `None` rather than raising.
pub fn dict_get(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rd = op.reg(buf, 0) as usize;
    let rk = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let dict = regs[rd].as_obj();
    let key = regs[rk].as_obj();
    let result = dict_lookup(rt, dict, key)?.unwrap_or_else(|| rt.none());
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

/// `DICT_GET_DEFAULT`: (dict, key, default, dst).
pub fn dict_get_default(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rd = op.reg(buf, 0) as usize;
    let rk = op.reg(buf, 1) as usize;
    let rdef = op.reg(buf, 2) as usize;
    let dst = op.reg(buf, 3) as usize;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let dict = regs[rd].as_obj();
    let key = regs[rk].as_obj();
    let result = match dict_lookup(rt, dict, key)? {
        Some(v) => v,
        None => ObjHandle::from_borrowed(regs[rdef].as_obj()),
    };
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

fn dict_lookup(
    rt: &kestrel_runtime::Runtime,
    dict: Obj,
    key: Obj,
) -> VmResult<Option<ObjHandle>> {
    match dict.payload() {
        Payload::Dict(d) => {
            let hash = protocol::object_hash(rt, key)?;
            Ok(d.borrow().get(key, hash).map(ObjHandle::from_borrowed))
        }
        _ => Err(rt.raise_type_error("expected a dict")),
    }
}

// =============================================================================
// Slices
// =============================================================================

#[inline]
fn optional_reg(frame: &mut RegisterFrame, op: &OpView, i: usize) -> Obj {
    let idx = op.reg(&frame.code.instructions, i);
    if idx == INVALID_REGISTER {
        Obj::null()
    } else {
        frame.registers[idx as usize].as_obj()
    }
}

/// `SLICE`: (seq, left?, right?, dst).
pub fn slice(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rs = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 3) as usize;

    let left = optional_reg(frame, op, 1);
    let right = optional_reg(frame, op, 2);
    let seq = frame.registers[rs].as_obj();
    let result = protocol::apply_slice(ev.runtime(), seq, left, right)?;
    frame.registers[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

/// `STORE_SLICE`: (seq, left?, right?, value).
pub fn store_slice(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rs = op.reg(buf, 0) as usize;
    let rv = op.reg(buf, 3) as usize;

    let left = optional_reg(frame, op, 1);
    let right = optional_reg(frame, op, 2);
    let seq = frame.registers[rs].as_obj();
    let value = frame.registers[rv].as_obj();
    protocol::assign_slice(ev.runtime(), seq, left, right, value)?;
    Ok(Flow::Next)
}
