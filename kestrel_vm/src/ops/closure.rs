//! Closure cells: `LOAD_CLOSURE`, `LOAD_DEREF`, `STORE_DEREF`.

use kestrel_compiler::OpView;
use kestrel_runtime::object::Payload;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;

/// Load the cell object itself (for building closure tuples).
pub fn load_closure(_ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let dst = op.reg(buf, 0) as usize;

    let cell = frame.freevars[op.arg as usize];
    cell.incref();
    frame.registers[dst].store_obj::<true>(cell);
    Ok(Flow::Next)
}

/// Read through a cell.
pub fn load_deref(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let dst = op.reg(buf, 0) as usize;

    let cell = frame.freevars[op.arg as usize];
    let value = match cell.payload() {
        Payload::ClosureCell(slot) => slot.get(),
        _ => {
            return Err(ev.runtime().raise_system_error("deref of a non-cell"));
        }
    };
    if value.is_null() {
        return Err(ev
            .runtime()
            .raise_name_error("free variable referenced before assignment"));
    }
    value.incref();
    frame.registers[dst].store_obj::<true>(value);
    Ok(Flow::Next)
}

/// Write through a cell; the old occupant is released after the store.
pub fn store_deref(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let src = op.reg(buf, 0) as usize;

    let value = frame.registers[src].as_obj();
    let cell = frame.freevars[op.arg as usize];
    match cell.payload() {
        Payload::ClosureCell(slot) => {
            value.incref();
            let old = slot.replace(value);
            old.xdecref();
            Ok(Flow::Next)
        }
        _ => Err(ev.runtime().raise_system_error("deref of a non-cell")),
    }
}
