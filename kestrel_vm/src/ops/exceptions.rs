//! Exception setup and raising.
//!
//! `SETUP_EXCEPT`/`SETUP_FINALLY` push the handler's absolute offset onto
//! the frame's handler stack together with three register indices; when a
//! failure unwinds into the handler, the dispatch loop writes the raised
//! (type, value, traceback) triple into those registers. An invalid index
//! discards that component.

use kestrel_compiler::{OpView, INVALID_REGISTER};
use kestrel_runtime::object::{ObjHandle, Payload};
use kestrel_runtime::Raised;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::{HandlerEntry, RegisterFrame};

pub fn setup_except(_ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let regs = [op.reg(buf, 0), op.reg(buf, 1), op.reg(buf, 2)];
    frame.handlers.push(HandlerEntry {
        target: op.label,
        regs,
    });
    Ok(Flow::Next)
}

/// `RAISE_VARARGS`: (type-or-instance, value?, traceback?), each slot
/// optional via the invalid-register sentinel.
pub fn raise_varargs(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rtype = op.reg(buf, 0);
    let rvalue = op.reg(buf, 1);
    let rtb = op.reg(buf, 2);

    let rt = ev.runtime();
    if rtype == INVALID_REGISTER {
        return Err(rt.raise_type_error(
            "exceptions must be classes or instances, not NoneType",
        ));
    }

    let regs = &mut frame.registers;
    let exc = regs[rtype as usize].as_obj();

    let mut raised = match exc.payload() {
        Payload::Instance(inst) => Raised::new(
            ObjHandle::from_borrowed(inst.class),
            Some(ObjHandle::from_borrowed(exc)),
        ),
        Payload::Class(_) => {
            let value = if rvalue != INVALID_REGISTER {
                let v = regs[rvalue as usize].as_obj();
                if rt.is_none(v) {
                    None
                } else {
                    Some(ObjHandle::from_borrowed(v))
                }
            } else {
                None
            };
            Raised::new(ObjHandle::from_borrowed(exc), value)
        }
        _ => {
            return Err(rt.raise_type_error(&format!(
                "exceptions must be classes or instances, not {}",
                kestrel_runtime::protocol::type_name(exc)
            )));
        }
    };

    if rtb != INVALID_REGISTER {
        let tb = regs[rtb as usize].as_obj();
        if !rt.is_none(tb) {
            raised.traceback = Some(ObjHandle::from_borrowed(tb));
        }
    }

    Err(raised)
}
