//! Binary and unary arithmetic handlers.
//!
//! The three-register binary form carries (src1, src2, dst). When both
//! operands are integer-mode the operation runs unboxed; overflow (a
//! `None` from the checked op) falls back to the boxed numeric protocol,
//! and the result lands in the destination without revisiting the type
//! check.

use kestrel_compiler::OpView;
use kestrel_runtime::object::{Obj, ObjHandle};
use kestrel_runtime::{protocol, RtResult, Runtime};

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;
use crate::register::RegType;

type IntOp = fn(i64, i64) -> Option<i64>;
type ObjOp = fn(&Runtime, Obj, Obj) -> RtResult<ObjHandle>;

#[inline(always)]
fn binary_with_spec(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
    int_op: IntOp,
    obj_op: ObjOp,
) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r1 = op.reg(buf, 0) as usize;
    let r2 = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;

    let regs = &mut frame.registers;
    if regs[r1].get_type() == RegType::Int && regs[r2].get_type() == RegType::Int {
        if let Some(v) = int_op(regs[r1].as_int(), regs[r2].as_int()) {
            regs[dst].store_int::<true>(v);
            return Ok(Flow::Next);
        }
    }

    let a = regs[r1].as_obj();
    let b = regs[r2].as_obj();
    let result = obj_op(ev.runtime(), a, b)?;
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

#[inline(always)]
fn binary(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView, obj_op: ObjOp) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r1 = op.reg(buf, 0) as usize;
    let r2 = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;

    let regs = &mut frame.registers;
    let a = regs[r1].as_obj();
    let b = regs[r2].as_obj();
    let result = obj_op(ev.runtime(), a, b)?;
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

pub fn binary_add(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, i64::checked_add, protocol::number_add)
}

pub fn binary_subtract(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, i64::checked_sub, protocol::number_subtract)
}

pub fn binary_multiply(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, i64::checked_mul, protocol::number_multiply)
}

fn int_divide(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    protocol::floor_div_i64(a, b)
}

pub fn binary_divide(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, int_divide, protocol::number_divide)
}

pub fn binary_floor_divide(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, int_divide, protocol::number_floor_divide)
}

pub fn binary_true_divide(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
) -> VmResult<Flow> {
    binary(ev, frame, op, protocol::number_true_divide)
}

pub fn binary_or(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, |a, b| Some(a | b), protocol::number_or)
}

pub fn binary_xor(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, |a, b| Some(a ^ b), protocol::number_xor)
}

pub fn binary_and(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary_with_spec(ev, frame, op, |a, b| Some(a & b), protocol::number_and)
}

pub fn binary_lshift(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    // Shift-range and overflow checks live in the protocol.
    binary(ev, frame, op, protocol::number_lshift)
}

pub fn binary_rshift(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary(ev, frame, op, protocol::number_rshift)
}

pub fn binary_power(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    binary(ev, frame, op, protocol::number_power)
}

/// Modulo has its own handler: the unboxed path is taken only when both
/// operands are non-negative (operator semantics differ from machine
/// remainder below zero), and a string left operand formats instead.
pub fn binary_modulo(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r1 = op.reg(buf, 0) as usize;
    let r2 = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;

    let regs = &mut frame.registers;
    if regs[r1].get_type() == RegType::Int && regs[r2].get_type() == RegType::Int {
        let a = regs[r1].as_int();
        let b = regs[r2].as_int();
        if a >= 0 && b > 0 {
            regs[dst].store_int::<true>(a % b);
            return Ok(Flow::Next);
        }
    }

    let a = regs[r1].as_obj();
    let b = regs[r2].as_obj();
    let result = protocol::number_remainder(ev.runtime(), a, b)?;
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

// =============================================================================
// Unary family
// =============================================================================

#[inline(always)]
fn unary(
    ev: &Evaluator,
    frame: &mut RegisterFrame,
    op: &OpView,
    f: fn(&Runtime, Obj) -> RtResult<ObjHandle>,
) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let src = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 1) as usize;

    let regs = &mut frame.registers;
    let v = regs[src].as_obj();
    let result = f(ev.runtime(), v)?;
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

pub fn unary_negative(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    unary(ev, frame, op, protocol::unary_negative)
}

pub fn unary_positive(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    unary(ev, frame, op, protocol::unary_positive)
}

pub fn unary_invert(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    unary(ev, frame, op, protocol::unary_invert)
}

pub fn unary_convert(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    unary(ev, frame, op, protocol::object_repr)
}

pub fn unary_not(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let src = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 1) as usize;

    let regs = &mut frame.registers;
    let v = regs[src].as_obj();
    let result = ev.runtime().bool_obj(!protocol::object_is_true(v));
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}
