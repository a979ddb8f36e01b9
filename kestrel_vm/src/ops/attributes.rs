//! Attribute access, including the hinted `LOAD_ATTR` fast path.
//!
//! The load algorithm, in order:
//!
//! 1. hint guard — if the cached dictionary mask matches the instance
//!    dict's current mask and the entry at the cached offset carries the
//!    attribute name by identity, that entry's value is the result;
//! 2. class MRO lookup (a data descriptor would win here);
//! 3. instance dict lookup — on success a fresh hint is recorded in the
//!    evaluator's table and the instruction's hint slot is patched;
//! 4. the class attribute, bound through the non-data descriptor rule;
//! 5. otherwise an attribute-error.

use kestrel_compiler::OpView;
use kestrel_runtime::object::{Obj, ObjHandle, Payload};
use kestrel_runtime::protocol;

use super::Flow;
use crate::error::VmResult;
use crate::eval::Evaluator;
use crate::frame::RegisterFrame;
#[cfg(feature = "getattr-hints")]
use crate::hints::{Hint, HintTable};

pub fn load_attr(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let robj = op.reg(buf, 0) as usize;
    let dst = op.reg(buf, 1) as usize;
    let name = frame.names[op.arg as usize];

    let obj = frame.registers[robj].as_obj();
    let result = instance_getattr(ev, frame, op, obj, name)?;
    frame.registers[dst].store_obj::<true>(result.into_raw());
    Ok(Flow::Next)
}

#[cfg_attr(not(feature = "getattr-hints"), allow(unused_variables))]
fn instance_getattr(
    ev: &Evaluator,
    frame: &RegisterFrame,
    op: &OpView,
    obj: Obj,
    name: Obj,
) -> VmResult<ObjHandle> {
    let rt = ev.runtime();

    let Payload::Instance(inst) = obj.payload() else {
        // Modules, classes and everything else take the generic protocol.
        return protocol::object_get_attr(rt, obj, name);
    };
    let Payload::Dict(dict) = inst.dict.payload() else {
        return Err(rt.raise_system_error("instance dict is not a dict"));
    };

    #[cfg(feature = "getattr-hints")]
    {
        let hint = ev.hint_at(op.hint);
        let d = dict.borrow();
        if hint.mask == d.mask() as u64 {
            if let Some(entry) = d.entry_at(hint.entry as usize) {
                if entry.key == name {
                    return Ok(ObjHandle::from_borrowed(entry.value));
                }
            }
        }
    }

    let hash = protocol::str_hash(name);

    // MRO result is computed up front: a data descriptor found here would
    // shadow the instance dict. The host defines none today, so it only
    // applies after the dict misses.
    let class_attr = match inst.class.payload() {
        Payload::Class(cls) => cls.mro_lookup(name, hash),
        _ => None,
    };

    let found = dict.borrow().get(name, hash);
    if let Some(value) = found {
        #[cfg(feature = "getattr-hints")]
        {
            let d = dict.borrow();
            if let Some(offset) = d.lookup_offset(name, hash) {
                let pos = HintTable::position(inst.class, name);
                ev.record_hint(
                    pos,
                    Hint {
                        mask: d.mask() as u64,
                        entry: offset as u32,
                        key: name,
                        class: inst.class,
                    },
                );
                op.patch_hint(&frame.code.instructions, pos);
            }
        }
        return Ok(ObjHandle::from_borrowed(value));
    }

    if let Some(attr) = class_attr {
        return Ok(protocol::bind_class_attr(attr, obj));
    }

    protocol::object_get_attr(rt, obj, name)
}

/// `obj.name = value`; registers are (obj, value).
pub fn store_attr(ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let buf = &frame.code.instructions;
    let robj = op.reg(buf, 0) as usize;
    let rv = op.reg(buf, 1) as usize;
    let name = frame.names[op.arg as usize];

    let regs = &mut frame.registers;
    let obj = regs[robj].as_obj();
    let value = regs[rv].as_obj();
    protocol::object_set_attr(ev.runtime(), obj, name, value)?;
    Ok(Flow::Next)
}
