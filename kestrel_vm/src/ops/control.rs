//! Control flow: jumps, conditional branches, iteration.

use kestrel_compiler::OpView;
use kestrel_runtime::protocol;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;

pub fn jump_absolute(_ev: &Evaluator, _frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    Ok(Flow::Jump(op.label))
}

/// `BREAK_LOOP` carries the loop-exit label directly in register form.
pub fn break_loop(_ev: &Evaluator, _frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    Ok(Flow::Jump(op.label))
}

/// Truthiness-directed branches. Identity with the boolean singletons
/// short-circuits the truth protocol.
pub fn jump_if_false(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r = op.reg(buf, 0) as usize;
    let rt = ev.runtime();
    let v = frame.registers[r].as_obj();
    let falsy = v == rt.false_obj() || (v != rt.true_obj() && !protocol::object_is_true(v));
    if falsy {
        Ok(Flow::Jump(op.label))
    } else {
        Ok(Flow::Next)
    }
}

pub fn jump_if_true(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r = op.reg(buf, 0) as usize;
    let rt = ev.runtime();
    let v = frame.registers[r].as_obj();
    let truthy = v == rt.true_obj() || (v != rt.false_obj() && protocol::object_is_true(v));
    if truthy {
        Ok(Flow::Jump(op.label))
    } else {
        Ok(Flow::Next)
    }
}

/// `GET_ITER`: acquire an iterator for the following `FOR_ITER`.
pub fn get_iter(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let src = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 1) as usize;

    let regs = &mut frame.registers;
    let v = regs[src].as_obj();
    let iter = protocol::object_get_iter(ev.runtime(), v)?;
    regs[dst].store_obj::<true>(iter.into_raw());
    Ok(Flow::Next)
}

/// `FOR_ITER`: store the next element and fall through, or branch to the
/// label at end of iteration.
pub fn for_iter(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let riter = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 1) as usize;

    let regs = &mut frame.registers;
    let iter = regs[riter].as_obj();
    match protocol::iter_next(ev.runtime(), iter)? {
        Some(value) => {
            regs[dst].store_obj::<true>(value.into_raw());
            Ok(Flow::Next)
        }
        None => Ok(Flow::Jump(op.label)),
    }
}
