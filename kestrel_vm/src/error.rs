//! Failure kinds and traceback accumulation.
//!
//! The evaluator distinguishes three failure kinds, all of which travel as
//! a [`Raised`] triple:
//!
//! - language-level exceptions, raised by handler slow paths and by
//!   `RAISE_VARARGS`;
//! - internal assertions (bad opcode, invalid jump target), mapped to the
//!   host's system-error type;
//! - host-level failures, which the protocols already produce as `Raised`.

use std::cell::RefCell;
use std::sync::Arc;

use kestrel_compiler::bytecode::opcode;
use kestrel_runtime::object::{Obj, ObjHandle, Payload};
use kestrel_runtime::types::traceback::TraceEntry;
use kestrel_runtime::{Raised, Runtime};

pub type VmResult<T> = Result<T, Raised>;

/// A compiler invariant was violated: the opcode has no handler.
pub fn bad_opcode(rt: &Runtime, op: u8) -> Raised {
    rt.raise_system_error(&format!("Bad opcode {}", opcode::name(op)))
}

/// The program counter left the instruction buffer or hit a stop code.
pub fn invalid_jump(rt: &Runtime) -> Raised {
    rt.raise_system_error("Invalid jump.")
}

/// Append this frame's entry to the failure's traceback, creating the
/// traceback object on first use. Frames chain outermost-last.
pub fn push_traceback(raised: &mut Raised, func: &Arc<str>, offset: u32) {
    let entry = TraceEntry {
        func: func.clone(),
        offset,
    };
    match &raised.traceback {
        Some(tb) => {
            if let Payload::Traceback(entries) = tb.payload() {
                entries.borrow_mut().push(entry);
            }
        }
        None => {
            let tb = ObjHandle::from_owned(Obj::alloc(Payload::Traceback(RefCell::new(
                vec![entry],
            ))));
            raised.traceback = Some(tb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traceback_chains_outermost_last() {
        let rt = Runtime::new();
        let mut raised = rt.raise_value_error("x");
        let inner: Arc<str> = Arc::from("inner");
        let outer: Arc<str> = Arc::from("outer");
        push_traceback(&mut raised, &inner, 10);
        push_traceback(&mut raised, &outer, 20);

        let tb = raised.traceback.as_ref().unwrap();
        if let Payload::Traceback(entries) = tb.payload() {
            let entries = entries.borrow();
            assert_eq!(&*entries[0].func, "inner");
            assert_eq!(&*entries[1].func, "outer");
        } else {
            panic!("not a traceback");
        }
    }
}
