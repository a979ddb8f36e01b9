//! `COMPARE_OP`: integer fast path, then the slow-path outcome switch.

use kestrel_compiler::bytecode::opcode::cmp;
use kestrel_compiler::OpView;
use kestrel_runtime::{protocol, ObjHandle};

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;
use crate::register::RegType;

/// Integer-integer outcome per operator code; `None` defers to the slow
/// path (containment, exception matching, rich comparison).
#[inline(always)]
fn int_compare(a: i64, b: i64, arg: u16) -> Option<bool> {
    match arg {
        cmp::LT => Some(a < b),
        cmp::LE => Some(a <= b),
        cmp::EQ => Some(a == b),
        cmp::NE => Some(a != b),
        cmp::GT => Some(a > b),
        cmp::GE => Some(a >= b),
        cmp::IS => Some(a == b),
        cmp::IS_NOT => Some(a != b),
        _ => None,
    }
}

pub fn compare_op(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let r1 = op.reg(buf, 0) as usize;
    let r2 = op.reg(buf, 1) as usize;
    let dst = op.reg(buf, 2) as usize;
    let arg = op.arg;

    let rt = ev.runtime();
    let regs = &mut frame.registers;

    if regs[r1].get_type() == RegType::Int && regs[r2].get_type() == RegType::Int {
        if let Some(outcome) = int_compare(regs[r1].as_int(), regs[r2].as_int(), arg) {
            let result = rt.bool_obj(outcome);
            regs[dst].store_obj::<true>(result.into_raw());
            return Ok(Flow::Next);
        }
    }

    let a = regs[r1].as_obj();
    let b = regs[r2].as_obj();
    let result: ObjHandle = match arg {
        cmp::IS => rt.bool_obj(a == b),
        cmp::IS_NOT => rt.bool_obj(a != b),
        cmp::IN => rt.bool_obj(protocol::sequence_contains(rt, b, a)?),
        cmp::NOT_IN => rt.bool_obj(!protocol::sequence_contains(rt, b, a)?),
        cmp::EXC_MATCH => rt.bool_obj(protocol::exception_matches(a, b)),
        _ => protocol::rich_compare(rt, arg, a, b)?,
    };
    regs[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}
