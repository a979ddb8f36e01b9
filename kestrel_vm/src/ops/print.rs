//! The `print` statement family.
//!
//! Item separation follows the host's soft-space rule: a pending space is
//! written before the next item and cleared by a newline.

use std::io::Write;

use kestrel_compiler::OpView;
use kestrel_runtime::protocol;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;

/// `PRINT_ITEM` / `PRINT_ITEM_TO`: write `str(v)` to the stream register
/// (standard output when the register is the invalid sentinel).
pub fn print_item(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let rv = op.reg(buf, 0) as usize;

    let v = frame.registers[rv].as_obj();
    let text = protocol::str_of(ev.runtime(), v)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if ev.take_soft_space() {
        let _ = out.write_all(b" ");
    }
    let _ = out.write_all(text.as_bytes());
    ev.set_soft_space(!text.ends_with('\n'));
    Ok(Flow::Next)
}

/// `PRINT_NEWLINE` / `PRINT_NEWLINE_TO`. The stream register is accepted
/// but only standard output is wired up.
pub fn print_newline(ev: &Evaluator, _frame: &mut RegisterFrame, _op: &OpView) -> VmResult<Flow> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = out.write_all(b"\n");
    ev.set_soft_space(false);
    Ok(Flow::Next)
}
