//! Container construction: tuples, lists, maps, slices.

use kestrel_compiler::{OpView, INVALID_REGISTER};
use kestrel_runtime::object::{Obj, Payload};

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;

/// Gather `count` element registers as owned references.
fn collect_elements(frame: &mut RegisterFrame, op: &OpView, count: usize) -> Vec<Obj> {
    let buf = &frame.code.instructions;
    let indices: Vec<usize> = (0..count).map(|i| op.reg(buf, i) as usize).collect();
    let regs = &mut frame.registers;
    indices
        .into_iter()
        .map(|i| regs[i].to_owned_obj().into_raw())
        .collect()
}

pub fn build_tuple(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let count = op.arg as usize;
    let items = collect_elements(frame, op, count);
    let dst = op.reg(&frame.code.instructions, count) as usize;
    let tuple = ev.runtime().new_tuple(items);
    frame.registers[dst].store_obj::<true>(tuple.into_raw());
    Ok(Flow::Next)
}

pub fn build_list(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let count = op.arg as usize;
    let items = collect_elements(frame, op, count);
    let dst = op.reg(&frame.code.instructions, count) as usize;
    let list = ev.runtime().new_list(items);
    frame.registers[dst].store_obj::<true>(list.into_raw());
    Ok(Flow::Next)
}

/// `BUILD_MAP` ignores the size hint in the immediate argument.
pub fn build_map(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let dst = op.reg(buf, 0) as usize;
    let dict = ev.runtime().new_dict();
    frame.registers[dst].store_obj::<true>(dict.into_raw());
    Ok(Flow::Next)
}

/// `BUILD_SLICE`: (start, stop, step?, dst); only two-bound slices are
/// produced by the translator, the step slot stays invalid.
pub fn build_slice(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rstart = op.reg(buf, 0);
    let rstop = op.reg(buf, 1);
    let dst = op.reg(buf, 3) as usize;

    let rt = ev.runtime();
    let regs = &mut frame.registers;
    let bound = |regs: &mut crate::frame::RegisterFile, idx: u16| -> Obj {
        if idx == INVALID_REGISTER {
            rt.none_obj()
        } else {
            regs[idx as usize].as_obj()
        }
    };
    let start = bound(regs, rstart);
    let stop = bound(regs, rstop);
    start.incref();
    stop.incref();
    let slice = Obj::alloc(Payload::Slice { start, stop });
    regs[dst].store_obj::<true>(slice);
    Ok(Flow::Next)
}
