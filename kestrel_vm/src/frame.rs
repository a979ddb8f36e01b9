//! Per-invocation state: the frame and its register file.
//!
//! A frame owns its register file, its free-variable cells and its
//! interned name table; it borrows nothing from the caller except the
//! code object (shared) and takes its own references on the globals,
//! locals and builtins mappings. Destruction releases every owned
//! reference, on the normal path and during unwinds alike.
//!
//! Construction follows the call convention:
//!
//! 1. fix globals from the callable (caller override wins), locals per
//!    code kind, builtins from the runtime;
//! 2. create cell-vars (boxing matching arguments) and borrow free-vars
//!    from the callable's closure;
//! 3. pre-load the constant region;
//! 4. install a bound method's receiver as the first parameter;
//! 5. validate the argument count against defaults;
//! 6. fill parameters from arguments, then defaults;
//! 7. reset the remaining temporaries to the null sentinel.

use std::sync::Arc;

use smallvec::SmallVec;

use kestrel_compiler::{Literal, RegisterCode};
use kestrel_runtime::object::{Obj, ObjHandle, Payload};
use kestrel_runtime::protocol;
use kestrel_runtime::Runtime;

use crate::error::VmResult;
use crate::register::Register;

/// Stack-allocation ceiling for the register file.
pub const MAX_REGISTERS: usize = 1024;

#[cfg(feature = "stack-alloc-registers")]
pub type RegisterFile = SmallVec<[Register; MAX_REGISTERS]>;

#[cfg(not(feature = "stack-alloc-registers"))]
pub type RegisterFile = Vec<Register>;

/// One entry of the exception-handler stack: where to resume, and which
/// registers receive the (type, value, traceback) triple. An invalid
/// register index discards that component.
#[derive(Debug, Clone, Copy)]
pub struct HandlerEntry {
    pub target: u32,
    pub regs: [u16; 3],
}

pub struct RegisterFrame {
    pub code: Arc<RegisterCode>,
    pub registers: RegisterFile,
    /// Cell objects: cell-vars first, then borrowed free-vars (owned).
    pub freevars: SmallVec<[Obj; 8]>,
    /// Interned name objects aligned with `code.names` (owned).
    pub names: SmallVec<[Obj; 8]>,
    /// Globals mapping (owned, may be null for disassembly frames).
    pub globals: Obj,
    /// Locals mapping (owned, null until materialised for functions).
    pub locals: Obj,
    /// Builtins mapping (owned).
    pub builtins: Obj,
    /// Exception-handler stack; pushed by `SETUP_*`, popped on failure.
    pub handlers: Vec<HandlerEntry>,
}

impl RegisterFrame {
    /// Build a frame for `code`. `callable` is the function or bound
    /// method being invoked (null for module and disassembly frames);
    /// `globals`/`locals` are borrowed overrides.
    pub fn new(
        rt: &Runtime,
        code: Arc<RegisterCode>,
        callable: Obj,
        args: &[Register],
        globals: Obj,
        locals: Obj,
    ) -> VmResult<RegisterFrame> {
        // Unwrap a bound method up front; the receiver is bound in step 4.
        let (function, receiver) = if callable.is_null() {
            (Obj::null(), Obj::null())
        } else if let Payload::Method(m) = callable.payload() {
            (m.func, m.receiver)
        } else {
            (callable, Obj::null())
        };

        // 1. Scope mappings.
        let resolved_globals = if !globals.is_null() {
            globals
        } else if !function.is_null() {
            match function.payload() {
                Payload::Function(f) => f.globals,
                _ => Obj::null(),
            }
        } else {
            Obj::null()
        };
        resolved_globals.xincref();
        locals.xincref();
        let builtins = rt.builtins();
        builtins.incref();

        let num_registers = code.num_registers as usize;
        let mut registers: RegisterFile = RegisterFile::with_capacity(num_registers);
        registers.resize(num_registers, Register::null());

        let mut frame = RegisterFrame {
            code,
            registers,
            freevars: SmallVec::new(),
            names: SmallVec::new(),
            globals: resolved_globals,
            locals,
            builtins,
            handlers: Vec::new(),
        };
        let code = frame.code.clone();

        // Interned names: hint guards compare these by identity.
        for name in code.names.iter() {
            frame.names.push(rt.intern(name).into_raw());
        }

        // 2. Free-variable array: fresh cells for cell-vars (boxing a
        // matching argument), borrowed cells from the closure for
        // free-vars.
        if code.num_cells() > 0 {
            for cellname in code.cellvars.iter() {
                let mut boxed = Obj::null();
                for (arg_idx, argname) in code.varnames.iter().take(args.len()).enumerate() {
                    if argname == cellname {
                        boxed = args[arg_idx].to_owned_obj().into_raw();
                        break;
                    }
                }
                frame.freevars.push(rt.new_cell(boxed).into_raw());
            }
            let closure = if function.is_null() {
                Obj::null()
            } else {
                match function.payload() {
                    Payload::Function(f) => f.closure,
                    _ => Obj::null(),
                }
            };
            if !closure.is_null() {
                if let Payload::Tuple(cells) = closure.payload() {
                    for &cell in cells.iter() {
                        cell.incref();
                        frame.freevars.push(cell);
                    }
                }
            } else {
                for _ in 0..code.num_freevars() {
                    frame.freevars.push(rt.new_cell(Obj::null()).into_raw());
                }
            }
        }

        // 3. Constant region.
        for (i, lit) in code.consts.iter().enumerate() {
            let obj = materialize(rt, lit);
            frame.registers[i].store_obj::<false>(obj.into_raw());
        }

        // 4/5/6. Parameter binding.
        let mut offset = code.num_consts();
        let mut needed = code.arg_count as usize;
        if !receiver.is_null() {
            receiver.incref();
            frame.registers[offset].store_obj::<false>(receiver);
            offset += 1;
            needed = needed.saturating_sub(1);
        }

        if !function.is_null() {
            let defaults = match function.payload() {
                Payload::Function(f) => f.defaults,
                _ => Obj::null(),
            };
            let num_defaults = if defaults.is_null() {
                0
            } else {
                match defaults.payload() {
                    Payload::Tuple(items) => items.len(),
                    _ => 0,
                }
            };
            if args.len() + num_defaults < needed {
                return Err(rt.raise_type_error(&format!(
                    "Wrong number of arguments for {}, expected {}, got {}.",
                    code.name,
                    needed - num_defaults,
                    args.len()
                )));
            }
            if args.len() > needed {
                return Err(rt.raise_type_error(&format!(
                    "Too many arguments for {}, expected {}, got {}.",
                    code.name,
                    needed,
                    args.len()
                )));
            }
            let default_start = needed - num_defaults;
            for i in 0..needed {
                if i < args.len() {
                    args[i].incref();
                    frame.registers[offset].store_reg::<false>(&args[i]);
                } else if let Payload::Tuple(items) = defaults.payload() {
                    let value = items[i - default_start];
                    value.incref();
                    frame.registers[offset].store_obj::<false>(value);
                }
                offset += 1;
            }
        }

        // 7. Temporaries are already the null sentinel from construction.
        Ok(frame)
    }

    /// Materialise the locals mapping from the named-variable registers,
    /// creating the dict on first use. Module frames share globals and
    /// never reach this path with a null dict.
    pub fn locals_dict(&mut self, rt: &Runtime) -> Obj {
        if self.locals.is_null() {
            self.locals = rt.new_dict().into_raw();
        }
        let num_consts = self.code.num_consts();
        for i in 0..self.code.varnames.len() {
            let name = self.code.varnames[i].clone();
            let reg = &mut self.registers[num_consts + i];
            if reg.get_type() == crate::register::RegType::Obj && reg.peek_obj().is_null() {
                continue;
            }
            let value = reg.as_obj();
            let key = rt.intern(&name);
            let hash = protocol::str_hash(key.get());
            if let Payload::Dict(d) = self.locals.payload() {
                d.borrow_mut().insert(key.get(), hash, value);
            }
        }
        self.locals
    }

    /// Seed the named-variable registers from a locals mapping (used when
    /// evaluation takes over an existing host frame).
    pub fn fill_locals(&mut self, rt: &Runtime, ldict: Obj) {
        let num_consts = self.code.num_consts();
        for i in 0..self.code.varnames.len() {
            let name = self.code.varnames[i].clone();
            let key = rt.intern(&name);
            let hash = protocol::str_hash(key.get());
            let value = match ldict.payload() {
                Payload::Dict(d) => d.borrow().get(key.get(), hash),
                _ => None,
            };
            if let Some(value) = value {
                value.incref();
                self.registers[num_consts + i].store_obj::<true>(value);
            }
        }
        ldict.incref();
        let old = self.locals;
        self.locals = ldict;
        old.xdecref();
    }
}

impl Drop for RegisterFrame {
    fn drop(&mut self) {
        for reg in self.registers.iter() {
            reg.decref();
        }
        for &cell in self.freevars.iter() {
            cell.decref();
        }
        for &name in self.names.iter() {
            name.decref();
        }
        self.globals.xdecref();
        self.locals.xdecref();
        self.builtins.xdecref();
    }
}

fn materialize(rt: &Runtime, lit: &Literal) -> ObjHandle {
    match lit {
        Literal::None => rt.none(),
        Literal::True => rt.bool_obj(true),
        Literal::False => rt.bool_obj(false),
        Literal::Int(v) => rt.new_int(*v),
        Literal::Float(v) => rt.new_float(*v),
        Literal::Str(s) => rt.new_str(s),
        Literal::Code(code) => ObjHandle::from_owned(Obj::alloc(Payload::Code(code.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_compiler::CodeBuilder;
    use kestrel_runtime::live_object_count;

    #[test]
    fn test_frame_constants_and_temps() {
        let rt = Runtime::new();
        let before = live_object_count();
        {
            let mut b = CodeBuilder::new("f");
            let c = b.const_int(5);
            let t = b.temp();
            b.emit_move(c, t);
            b.emit_return(t);
            let code = b.finish();

            let frame =
                RegisterFrame::new(&rt, code, Obj::null(), &[], Obj::null(), Obj::null()).unwrap();
            // Constant region is pre-loaded; temporaries are null.
            assert!(matches!(
                frame.registers[0].to_owned_obj().payload(),
                Payload::Int(5)
            ));
            assert!(frame.registers[1].peek_obj().is_null());
        }
        assert_eq!(live_object_count(), before);
    }

    #[test]
    fn test_cellvar_boxes_matching_argument() {
        let rt = Runtime::new();
        let mut b = CodeBuilder::new("f");
        let p = b.param("x");
        b.cellvar("x");
        b.emit_return(p);
        let code = b.finish();

        let arg_val = rt.new_int(11);
        let args = [Register::from_obj(arg_val.get())];

        // A function callable is required for argument binding.
        let gdict = rt.new_dict();
        let name = rt.new_str("f");
        let func = ObjHandle::from_owned(Obj::alloc(Payload::Function(
            kestrel_runtime::types::function::FunctionObject {
                code: code.clone(),
                globals: {
                    gdict.get().incref();
                    gdict.get()
                },
                defaults: Obj::null(),
                closure: Obj::null(),
                name: name.into_raw(),
            },
        )));

        let frame =
            RegisterFrame::new(&rt, code, func.get(), &args, Obj::null(), Obj::null()).unwrap();
        assert_eq!(frame.freevars.len(), 1);
        match frame.freevars[0].payload() {
            Payload::ClosureCell(slot) => {
                let inner = slot.get();
                assert!(matches!(inner.payload(), Payload::Int(11)));
            }
            _ => panic!("expected a cell"),
        }
    }

    #[test]
    fn test_arg_count_validation() {
        let rt = Runtime::new();
        let mut b = CodeBuilder::new("g");
        let p = b.param("a");
        b.param("b");
        b.emit_return(p);
        let code = b.finish();

        let gdict = rt.new_dict();
        let name = rt.new_str("g");
        let func = ObjHandle::from_owned(Obj::alloc(Payload::Function(
            kestrel_runtime::types::function::FunctionObject {
                code: code.clone(),
                globals: {
                    gdict.get().incref();
                    gdict.get()
                },
                defaults: Obj::null(),
                closure: Obj::null(),
                name: name.into_raw(),
            },
        )));

        let one = rt.new_int(1);
        let args = [Register::from_obj(one.get())];
        let err = RegisterFrame::new(&rt, code, func.get(), &args, Obj::null(), Obj::null());
        assert!(err.is_err());
    }
}
