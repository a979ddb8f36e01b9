//! The evaluator: dispatch, unwinding, entry points.
//!
//! Dispatch comes in two build-selectable flavours with identical
//! semantics: a function-pointer table indexed by the opcode byte
//! (`threaded-dispatch`, the default) and a central `match` loop. Both
//! drive the same handler functions; the table carries a stop-code
//! sentinel for every unused opcode number.
//!
//! A raised failure unwinds to the innermost frame handler when one is
//! installed (the handler's registers receive the exception triple) and
//! otherwise leaves the frame after appending a traceback entry. The
//! frame's destructor releases every register on both paths.
//!
//! Disassembly shares this skeleton: the same decoder advances the same
//! program counter, but handlers are skipped and each record is written
//! to the accumulator instead. `RETURN_VALUE` emits and terminates.

use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::sync::Arc;

use once_cell::sync::Lazy;

use kestrel_compiler::bytecode::instr;
use kestrel_compiler::{OpView, Opcode, RegisterCode, INVALID_REGISTER};
use kestrel_runtime::object::{Obj, ObjHandle, Payload};
use kestrel_runtime::types::exceptions::new_exception_instance;
use kestrel_runtime::types::function::MethodObject;
use kestrel_runtime::{protocol, Raised, Runtime};
use smallvec::SmallVec;

use crate::error::{self, VmResult};
use crate::frame::{HandlerEntry, RegisterFrame};
use crate::hints::{Hint, HintTable};
use crate::ops::{self, Flow, OpHandler};
use crate::register::Register;

/// Safety valve: abort after this many dispatched operations.
const MAX_OPERATIONS: u64 = 1_000_000_000;

static EVAL_LOG_WANTED: Lazy<bool> = Lazy::new(|| std::env::var_os("EVAL_LOG").is_some());

/// Per-opcode tracing, debug builds only, gated on `EVAL_LOG`.
#[inline(always)]
fn eval_log_enabled() -> bool {
    cfg!(debug_assertions) && *EVAL_LOG_WANTED
}

/// Which dispatch loop to run. The build default follows the
/// `threaded-dispatch` feature; both are always compiled so the test
/// suite can hold them to identical behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Switch,
    Table,
}

impl DispatchMode {
    #[inline]
    pub fn build_default() -> DispatchMode {
        if cfg!(feature = "threaded-dispatch") {
            DispatchMode::Table
        } else {
            DispatchMode::Switch
        }
    }
}

/// The long-lived evaluator: runtime, hint table, counters.
pub struct Evaluator {
    rt: Runtime,
    hints: RefCell<HintTable>,
    op_count: Cell<u64>,
    soft_space: Cell<bool>,
    disasm: RefCell<String>,
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator::with_runtime(Runtime::new())
    }

    pub fn with_runtime(rt: Runtime) -> Evaluator {
        Evaluator {
            rt,
            hints: RefCell::new(HintTable::new()),
            op_count: Cell::new(0),
            soft_space: Cell::new(false),
            disasm: RefCell::new(String::new()),
        }
    }

    #[inline(always)]
    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    #[inline(always)]
    pub(crate) fn hint_at(&self, pos: u16) -> Hint {
        self.hints.borrow().get(pos)
    }

    #[inline]
    pub(crate) fn record_hint(&self, pos: u16, hint: Hint) {
        self.hints.borrow_mut().record(pos, hint);
    }

    #[inline]
    pub(crate) fn take_soft_space(&self) -> bool {
        self.soft_space.replace(false)
    }

    #[inline]
    pub(crate) fn set_soft_space(&self, v: bool) {
        self.soft_space.set(v);
    }

    /// Operations dispatched so far (diagnostics).
    pub fn operation_count(&self) -> u64 {
        self.op_count.get()
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Evaluate a module body against its module dict; the result value is
    /// discarded.
    pub fn eval_module(&self, code: Arc<RegisterCode>, module_dict: &ObjHandle) -> VmResult<()> {
        let _guard = self.rt.enter();
        let mut frame = RegisterFrame::new(
            &self.rt,
            code,
            Obj::null(),
            &[],
            module_dict.get(),
            module_dict.get(),
        )?;
        let result = self.eval_frame(&mut frame)?;
        result.decref();
        Ok(())
    }

    /// Evaluate a callable with positional arguments and keyword pairs,
    /// returning the result.
    pub fn eval_callable(
        &self,
        callable: &ObjHandle,
        args: &[ObjHandle],
        kwargs: &[(ObjHandle, ObjHandle)],
    ) -> VmResult<ObjHandle> {
        let _guard = self.rt.enter();
        let arg_regs: SmallVec<[Register; 8]> =
            args.iter().map(|h| Register::from_obj(h.get())).collect();
        let kw: Vec<(Obj, Obj)> = kwargs.iter().map(|(k, v)| (k.get(), v.get())).collect();
        self.call_object(callable.get(), &arg_regs, &kw)
    }

    /// Disassemble a callable (or bare code object) into text.
    pub fn disassemble(&self, callable: &ObjHandle) -> VmResult<String> {
        let code = match callable.payload() {
            Payload::Function(f) => f.code.clone(),
            Payload::Method(m) => match m.func.payload() {
                Payload::Function(f) => f.code.clone(),
                _ => {
                    return Err(self.rt.raise_type_error("Expected code or function"));
                }
            },
            Payload::Code(c) => c.clone(),
            _ => {
                return Err(self.rt.raise_type_error("Expected code or function"));
            }
        };
        let _guard = self.rt.enter();
        let mut frame =
            RegisterFrame::new(&self.rt, code, Obj::null(), &[], Obj::null(), Obj::null())?;
        self.disasm.borrow_mut().clear();
        let result = self.run::<true>(&mut frame, DispatchMode::build_default())?;
        result.decref();
        Ok(std::mem::take(&mut *self.disasm.borrow_mut()))
    }

    /// Build a function object binding `code` to a globals dict. This is
    /// what the translator does when it hands compiled code back to the
    /// host; embedders and tests use it to get a callable.
    pub fn make_function(&self, code: Arc<RegisterCode>, globals: &ObjHandle) -> ObjHandle {
        globals.get().incref();
        let name = self.rt.new_str(&code.name);
        ObjHandle::from_owned(Obj::alloc(Payload::Function(
            kestrel_runtime::types::function::FunctionObject {
                code,
                globals: globals.get(),
                defaults: Obj::null(),
                closure: Obj::null(),
                name: name.into_raw(),
            },
        )))
    }

    // =========================================================================
    // Frame evaluation
    // =========================================================================

    /// Evaluate a frame to its result register (one owned reference).
    pub fn eval_frame(&self, frame: &mut RegisterFrame) -> VmResult<Register> {
        self.run::<false>(frame, DispatchMode::build_default())
    }

    /// Evaluate with an explicit dispatch flavour (the equivalence tests
    /// drive both).
    pub fn eval_frame_with(
        &self,
        frame: &mut RegisterFrame,
        mode: DispatchMode,
    ) -> VmResult<Register> {
        self.run::<false>(frame, mode)
    }

    fn run<const DISASM: bool>(
        &self,
        frame: &mut RegisterFrame,
        mode: DispatchMode,
    ) -> VmResult<Register> {
        let code = frame.code.clone();
        let buf = &code.instructions;
        let len = buf.len();
        let mut pc: usize = 0;

        loop {
            if pc >= len {
                if DISASM {
                    return Ok(Register::null());
                }
                let mut raised = error::invalid_jump(&self.rt);
                error::push_traceback(&mut raised, &code.name, pc as u32);
                return Err(raised);
            }
            let view = instr::decode(buf, pc);

            if DISASM {
                let mut out = self.disasm.borrow_mut();
                let _ = writeln!(out, "{pc:5} {}", view.format(buf));
                if view.opcode == Opcode::ReturnValue.as_u8() {
                    return Ok(Register::null());
                }
                pc += view.size as usize;
                continue;
            }

            if eval_log_enabled() {
                log::trace!("{pc:5} {} {}", code.name, view.format(buf));
            }

            let outcome = self.tick().and_then(|_| match mode {
                DispatchMode::Table => {
                    let handler = (*DISPATCH_TABLE)[view.opcode as usize];
                    handler(self, frame, &view)
                }
                DispatchMode::Switch => dispatch_switch(self, frame, &view),
            });

            match outcome {
                Ok(Flow::Next) => pc += view.size as usize,
                Ok(Flow::Jump(target)) => pc = target as usize,
                Ok(Flow::Return(r)) => {
                    let reg = frame.registers[r as usize];
                    reg.incref();
                    return Ok(reg);
                }
                Err(raised) => match frame.handlers.pop() {
                    Some(entry) => {
                        if eval_log_enabled() {
                            log::trace!("unwind to handler at {}", entry.target);
                        }
                        deliver_exception(&self.rt, frame, &entry, raised);
                        pc = entry.target as usize;
                    }
                    None => {
                        let mut raised = raised;
                        error::push_traceback(&mut raised, &code.name, pc as u32);
                        return Err(raised);
                    }
                },
            }
        }
    }

    #[inline(always)]
    fn tick(&self) -> VmResult<()> {
        let n = self.op_count.get() + 1;
        self.op_count.set(n);
        if n > MAX_OPERATIONS {
            return Err(self.rt.raise_system_error("Execution entered infinite loop."));
        }
        Ok(())
    }

    // =========================================================================
    // The host call protocol (recursive call-through)
    // =========================================================================

    /// Call any callable. Compiled functions and bound methods execute in
    /// a nested frame through this same evaluator; classes instantiate;
    /// builtins box their arguments and cross into native code.
    pub(crate) fn call_object(
        &self,
        callee: Obj,
        args: &[Register],
        kwargs: &[(Obj, Obj)],
    ) -> VmResult<ObjHandle> {
        if callee.is_null() {
            return Err(self.rt.raise_system_error("call of a null object"));
        }
        match callee.payload() {
            Payload::Function(f) => {
                if !kwargs.is_empty() {
                    return Err(self.rt.raise_value_error("Keywords not yet supported."));
                }
                self.call_code(f.code.clone(), callee, args)
            }
            Payload::Method(m) => {
                if !kwargs.is_empty() {
                    return Err(self.rt.raise_value_error("Keywords not yet supported."));
                }
                match m.func.payload() {
                    Payload::Function(f) => self.call_code(f.code.clone(), callee, args),
                    _ => Err(self.rt.raise_type_error("bound method of a non-function")),
                }
            }
            Payload::Class(_) => self.instantiate(callee, args, kwargs),
            Payload::Builtin(b) => {
                if !kwargs.is_empty() {
                    return Err(self.rt.raise_type_error(&format!(
                        "{}() takes no keyword arguments",
                        b.name
                    )));
                }
                let owned: SmallVec<[ObjHandle; 8]> =
                    args.iter().map(|r| r.to_owned_obj()).collect();
                let raw: SmallVec<[Obj; 8]> = owned.iter().map(|h| h.get()).collect();
                (b.f)(&self.rt, &raw)
            }
            _ => Err(self.rt.raise_type_error(&format!(
                "'{}' object is not callable",
                protocol::type_name(callee)
            ))),
        }
    }

    /// Run compiled code in a child frame, transferring the result.
    fn call_code(
        &self,
        code: Arc<RegisterCode>,
        callable: Obj,
        args: &[Register],
    ) -> VmResult<ObjHandle> {
        let mut frame =
            RegisterFrame::new(&self.rt, code, callable, args, Obj::null(), Obj::null())?;
        let mut result = self.eval_frame(&mut frame)?;
        let obj = result.as_obj();
        Ok(ObjHandle::from_owned(obj))
    }

    /// Calling a class builds an instance. Exception classes record their
    /// arguments; other classes run `__init__` when they define one.
    fn instantiate(
        &self,
        class: Obj,
        args: &[Register],
        kwargs: &[(Obj, Obj)],
    ) -> VmResult<ObjHandle> {
        let rt = &self.rt;
        if !kwargs.is_empty() {
            return Err(rt.raise_value_error("Keywords not yet supported."));
        }
        let Payload::Class(cls) = class.payload() else {
            return Err(rt.raise_system_error("instantiate of a non-class"));
        };

        if cls.is_exception {
            let items: Vec<Obj> = args.iter().map(|r| r.to_owned_obj().into_raw()).collect();
            let tuple = rt.new_tuple(items);
            return Ok(new_exception_instance(class, tuple));
        }

        let dict = rt.new_dict();
        class.incref();
        let instance = ObjHandle::from_owned(Obj::alloc(Payload::Instance(
            kestrel_runtime::types::class::InstanceObject {
                class,
                dict: dict.into_raw(),
            },
        )));

        let init_name = rt.intern("__init__");
        let init = cls.mro_lookup(init_name.get(), protocol::str_hash(init_name.get()));
        match init {
            Some(f) if matches!(f.payload(), Payload::Function(_)) => {
                f.incref();
                instance.get().incref();
                let method = ObjHandle::from_owned(Obj::alloc(Payload::Method(MethodObject {
                    func: f,
                    receiver: instance.get(),
                })));
                let result = self.call_object(method.get(), args, &[])?;
                drop(result);
            }
            Some(_) => {
                return Err(rt.raise_type_error("__init__ must be a function"));
            }
            None => {
                if !args.is_empty() {
                    return Err(rt.raise_type_error("this constructor takes no arguments"));
                }
            }
        }
        Ok(instance)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the raised triple into the handler's registers; an invalid index
/// discards that component.
fn deliver_exception(rt: &Runtime, frame: &mut RegisterFrame, entry: &HandlerEntry, raised: Raised) {
    let Raised {
        exc_type,
        value,
        traceback,
    } = raised;
    let value = value.unwrap_or_else(|| rt.none());
    let tb = traceback.unwrap_or_else(|| rt.none());
    for (idx, handle) in [
        (entry.regs[0], exc_type),
        (entry.regs[1], value),
        (entry.regs[2], tb),
    ] {
        if idx != INVALID_REGISTER {
            frame.registers[idx as usize].store_obj::<true>(handle.into_raw());
        }
    }
}

// =============================================================================
// Dispatch wiring
// =============================================================================

fn op_return_value(_ev: &Evaluator, frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    let r = op.reg(&frame.code.instructions, 0);
    Ok(Flow::Return(r))
}

/// Landed on an unused opcode number: the jump target was wrong.
fn op_stop_code(ev: &Evaluator, _frame: &mut RegisterFrame, _op: &OpView) -> VmResult<Flow> {
    Err(error::invalid_jump(&ev.rt))
}

/// A known opcode with no register-form implementation.
fn op_bad(ev: &Evaluator, _frame: &mut RegisterFrame, op: &OpView) -> VmResult<Flow> {
    Err(error::bad_opcode(&ev.rt, op.opcode))
}

/// Opcode bytes as match patterns.
mod ob {
    use kestrel_compiler::Opcode;

    macro_rules! bytes {
        ($($const_name:ident = $variant:ident;)*) => {
            $(pub const $const_name: u8 = Opcode::$variant.as_u8();)*
        };
    }

    bytes! {
        POP_TOP = PopTop; ROT_TWO = RotTwo; ROT_THREE = RotThree;
        DUP_TOP = DupTop; ROT_FOUR = RotFour; NOP = Nop;
        UNARY_POSITIVE = UnaryPositive; UNARY_NEGATIVE = UnaryNegative;
        UNARY_NOT = UnaryNot; UNARY_CONVERT = UnaryConvert;
        UNARY_INVERT = UnaryInvert;
        BINARY_POWER = BinaryPower; BINARY_MULTIPLY = BinaryMultiply;
        BINARY_DIVIDE = BinaryDivide; BINARY_MODULO = BinaryModulo;
        BINARY_ADD = BinaryAdd; BINARY_SUBTRACT = BinarySubtract;
        BINARY_SUBSCR = BinarySubscr;
        BINARY_FLOOR_DIVIDE = BinaryFloorDivide;
        BINARY_TRUE_DIVIDE = BinaryTrueDivide;
        INPLACE_FLOOR_DIVIDE = InplaceFloorDivide;
        INPLACE_TRUE_DIVIDE = InplaceTrueDivide;
        STORE_MAP = StoreMap; INPLACE_ADD = InplaceAdd;
        INPLACE_SUBTRACT = InplaceSubtract; INPLACE_MULTIPLY = InplaceMultiply;
        INPLACE_DIVIDE = InplaceDivide; INPLACE_MODULO = InplaceModulo;
        STORE_SUBSCR = StoreSubscr; DELETE_SUBSCR = DeleteSubscr;
        BINARY_LSHIFT = BinaryLshift; BINARY_RSHIFT = BinaryRshift;
        BINARY_AND = BinaryAnd; BINARY_XOR = BinaryXor; BINARY_OR = BinaryOr;
        INPLACE_POWER = InplacePower; GET_ITER = GetIter;
        PRINT_EXPR = PrintExpr; PRINT_ITEM = PrintItem;
        PRINT_NEWLINE = PrintNewline; PRINT_ITEM_TO = PrintItemTo;
        PRINT_NEWLINE_TO = PrintNewlineTo;
        INPLACE_LSHIFT = InplaceLshift; INPLACE_RSHIFT = InplaceRshift;
        INPLACE_AND = InplaceAnd; INPLACE_XOR = InplaceXor;
        INPLACE_OR = InplaceOr;
        BREAK_LOOP = BreakLoop; WITH_CLEANUP = WithCleanup;
        LOAD_LOCALS = LoadLocals; RETURN_VALUE = ReturnValue;
        IMPORT_STAR = ImportStar; EXEC_STMT = ExecStmt;
        YIELD_VALUE = YieldValue; POP_BLOCK = PopBlock;
        END_FINALLY = EndFinally; BUILD_CLASS = BuildClass;
        STORE_NAME = StoreName; DELETE_NAME = DeleteName;
        UNPACK_SEQUENCE = UnpackSequence; FOR_ITER = ForIter;
        LIST_APPEND = ListAppend; STORE_ATTR = StoreAttr;
        DELETE_ATTR = DeleteAttr; STORE_GLOBAL = StoreGlobal;
        DELETE_GLOBAL = DeleteGlobal; DUP_TOPX = DupTopx;
        LOAD_CONST = LoadConst; LOAD_NAME = LoadName;
        BUILD_TUPLE = BuildTuple; BUILD_LIST = BuildList;
        BUILD_SET = BuildSet; BUILD_MAP = BuildMap;
        LOAD_ATTR = LoadAttr; COMPARE_OP = CompareOp;
        IMPORT_NAME = ImportName; IMPORT_FROM = ImportFrom;
        JUMP_FORWARD = JumpForward;
        JUMP_IF_FALSE_OR_POP = JumpIfFalseOrPop;
        JUMP_IF_TRUE_OR_POP = JumpIfTrueOrPop;
        JUMP_ABSOLUTE = JumpAbsolute;
        POP_JUMP_IF_FALSE = PopJumpIfFalse; POP_JUMP_IF_TRUE = PopJumpIfTrue;
        LOAD_GLOBAL = LoadGlobal; CONTINUE_LOOP = ContinueLoop;
        SETUP_LOOP = SetupLoop; SETUP_EXCEPT = SetupExcept;
        SETUP_FINALLY = SetupFinally;
        LOAD_FAST = LoadFast; STORE_FAST = StoreFast;
        DELETE_FAST = DeleteFast; RAISE_VARARGS = RaiseVarargs;
        CALL_FUNCTION = CallFunction; MAKE_FUNCTION = MakeFunction;
        BUILD_SLICE = BuildSlice; MAKE_CLOSURE = MakeClosure;
        LOAD_CLOSURE = LoadClosure; LOAD_DEREF = LoadDeref;
        STORE_DEREF = StoreDeref;
        CALL_FUNCTION_VAR = CallFunctionVar; CALL_FUNCTION_KW = CallFunctionKw;
        CALL_FUNCTION_VAR_KW = CallFunctionVarKw; SETUP_WITH = SetupWith;
        EXTENDED_ARG = ExtendedArg; SET_ADD = SetAdd; MAP_ADD = MapAdd;
        INCREF = Incref; DECREF = Decref; CONST_INDEX = ConstIndex;
        BINARY_SUBSCR_LIST = BinarySubscrList;
        BINARY_SUBSCR_DICT = BinarySubscrDict;
        STORE_SUBSCR_LIST = StoreSubscrList;
        STORE_SUBSCR_DICT = StoreSubscrDict;
        DICT_CONTAINS = DictContains; DICT_GET = DictGet;
        DICT_GET_DEFAULT = DictGetDefault;
    }

    pub const SLICE_FIRST: u8 = 30;
    pub const SLICE_LAST: u8 = 33;
    pub const STORE_SLICE_FIRST: u8 = 40;
    pub const STORE_SLICE_LAST: u8 = 43;
    pub const DELETE_SLICE_FIRST: u8 = 50;
    pub const DELETE_SLICE_LAST: u8 = 53;
}

/// Handler for one opcode byte; shared by both dispatch flavours so they
/// cannot diverge.
fn handler_for(op: u8) -> OpHandler {
    use ops::*;

    match op {
        ob::RETURN_VALUE => op_return_value,

        ob::UNARY_POSITIVE => arithmetic::unary_positive,
        ob::UNARY_NEGATIVE => arithmetic::unary_negative,
        ob::UNARY_NOT => arithmetic::unary_not,
        ob::UNARY_CONVERT => arithmetic::unary_convert,
        ob::UNARY_INVERT => arithmetic::unary_invert,

        ob::BINARY_ADD | ob::INPLACE_ADD => arithmetic::binary_add,
        ob::BINARY_SUBTRACT | ob::INPLACE_SUBTRACT => arithmetic::binary_subtract,
        ob::BINARY_MULTIPLY | ob::INPLACE_MULTIPLY => arithmetic::binary_multiply,
        ob::BINARY_DIVIDE | ob::INPLACE_DIVIDE => arithmetic::binary_divide,
        ob::BINARY_MODULO | ob::INPLACE_MODULO => arithmetic::binary_modulo,
        ob::BINARY_FLOOR_DIVIDE | ob::INPLACE_FLOOR_DIVIDE => arithmetic::binary_floor_divide,
        ob::BINARY_TRUE_DIVIDE | ob::INPLACE_TRUE_DIVIDE => arithmetic::binary_true_divide,
        ob::BINARY_POWER | ob::INPLACE_POWER => arithmetic::binary_power,
        ob::BINARY_LSHIFT | ob::INPLACE_LSHIFT => arithmetic::binary_lshift,
        ob::BINARY_RSHIFT | ob::INPLACE_RSHIFT => arithmetic::binary_rshift,
        ob::BINARY_AND | ob::INPLACE_AND => arithmetic::binary_and,
        ob::BINARY_XOR | ob::INPLACE_XOR => arithmetic::binary_xor,
        ob::BINARY_OR | ob::INPLACE_OR => arithmetic::binary_or,

        ob::COMPARE_OP => compare::compare_op,

        ob::BINARY_SUBSCR => subscript::binary_subscr,
        ob::BINARY_SUBSCR_LIST => subscript::binary_subscr_list,
        ob::BINARY_SUBSCR_DICT => subscript::binary_subscr_dict,
        ob::STORE_SUBSCR => subscript::store_subscr,
        ob::STORE_SUBSCR_LIST => subscript::store_subscr_list,
        ob::STORE_SUBSCR_DICT => subscript::store_subscr_dict,
        ob::STORE_MAP => subscript::store_map,
        ob::LIST_APPEND => subscript::list_append,
        ob::CONST_INDEX => subscript::const_index,
        ob::DICT_CONTAINS => subscript::dict_contains,
        ob::DICT_GET => subscript::dict_get,
        ob::DICT_GET_DEFAULT => subscript::dict_get_default,
        ob::SLICE_FIRST..=ob::SLICE_LAST => subscript::slice,
        ob::STORE_SLICE_FIRST..=ob::STORE_SLICE_LAST => subscript::store_slice,

        ob::LOAD_ATTR => attributes::load_attr,
        ob::STORE_ATTR => attributes::store_attr,

        ob::LOAD_FAST | ob::STORE_FAST => load_store::load_fast,
        ob::LOAD_LOCALS => load_store::load_locals,
        ob::LOAD_NAME => load_store::load_name,
        ob::STORE_NAME => load_store::store_name,
        ob::DELETE_NAME => load_store::delete_name,
        ob::LOAD_GLOBAL => load_store::load_global,
        ob::STORE_GLOBAL => load_store::store_global,
        ob::DELETE_GLOBAL => load_store::delete_global,
        ob::INCREF => load_store::incref,
        ob::DECREF => load_store::decref,

        ob::LOAD_CLOSURE => closure::load_closure,
        ob::LOAD_DEREF => closure::load_deref,
        ob::STORE_DEREF => closure::store_deref,

        ob::GET_ITER => control::get_iter,
        ob::FOR_ITER => control::for_iter,
        ob::JUMP_ABSOLUTE => control::jump_absolute,
        ob::BREAK_LOOP => control::break_loop,
        ob::JUMP_IF_FALSE_OR_POP | ob::POP_JUMP_IF_FALSE => control::jump_if_false,
        ob::JUMP_IF_TRUE_OR_POP | ob::POP_JUMP_IF_TRUE => control::jump_if_true,

        ob::BUILD_TUPLE => containers::build_tuple,
        ob::BUILD_LIST => containers::build_list,
        ob::BUILD_MAP => containers::build_map,
        ob::BUILD_SLICE => containers::build_slice,
        ob::BUILD_CLASS => class::build_class,

        ob::CALL_FUNCTION => calls::call_function,
        ob::CALL_FUNCTION_VAR => calls::call_function_var,
        ob::CALL_FUNCTION_KW => calls::call_function_kw,
        ob::CALL_FUNCTION_VAR_KW => calls::call_function_var_kw,
        ob::MAKE_FUNCTION => calls::make_function,
        ob::MAKE_CLOSURE => calls::make_closure,

        ob::IMPORT_NAME => imports::import_name,
        ob::IMPORT_FROM => imports::import_from,
        ob::IMPORT_STAR => imports::import_star,

        ob::SETUP_EXCEPT | ob::SETUP_FINALLY => exceptions::setup_except,
        ob::RAISE_VARARGS => exceptions::raise_varargs,

        ob::PRINT_ITEM | ob::PRINT_ITEM_TO => print::print_item,
        ob::PRINT_NEWLINE | ob::PRINT_NEWLINE_TO => print::print_newline,

        // Known stack-form opcodes with no register implementation.
        ob::POP_TOP
        | ob::ROT_TWO
        | ob::ROT_THREE
        | ob::DUP_TOP
        | ob::ROT_FOUR
        | ob::NOP
        | ob::DELETE_SUBSCR
        | ob::WITH_CLEANUP
        | ob::EXEC_STMT
        | ob::YIELD_VALUE
        | ob::POP_BLOCK
        | ob::END_FINALLY
        | ob::DELETE_ATTR
        | ob::DUP_TOPX
        | ob::LOAD_CONST
        | ob::BUILD_SET
        | ob::UNPACK_SEQUENCE
        | ob::JUMP_FORWARD
        | ob::CONTINUE_LOOP
        | ob::SETUP_LOOP
        | ob::SETUP_WITH
        | ob::DELETE_FAST
        | ob::EXTENDED_ARG
        | ob::SET_ADD
        | ob::MAP_ADD
        | ob::PRINT_EXPR
        | ob::DELETE_SLICE_FIRST..=ob::DELETE_SLICE_LAST => op_bad,

        _ => op_stop_code,
    }
}

/// The threaded-dispatch table: 256 entries, stop-code sentinels on every
/// unused number.
static DISPATCH_TABLE: Lazy<[OpHandler; 256]> = Lazy::new(|| {
    let mut table = [op_stop_code as OpHandler; 256];
    for (op, slot) in table.iter_mut().enumerate() {
        *slot = handler_for(op as u8);
    }
    table
});

/// The switch flavour: one central dispatch over the opcode byte.
#[inline(always)]
fn dispatch_switch(ev: &Evaluator, frame: &mut RegisterFrame, view: &OpView) -> VmResult<Flow> {
    handler_for(view.opcode)(ev, frame, view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_stop_sentinels() {
        // Unused numbers must map to the stop-code handler.
        let unused = [6u8, 7, 8, 14, 16, 117, 118, 123, 127, 144, 158, 200, 255];
        for op in unused {
            assert_eq!(
                (*DISPATCH_TABLE)[op as usize] as usize,
                op_stop_code as OpHandler as usize
            );
        }
    }

    #[test]
    fn test_table_matches_switch_choice() {
        for op in 0..=255u8 {
            assert_eq!(
                (*DISPATCH_TABLE)[op as usize] as usize,
                handler_for(op) as usize
            );
        }
    }
}
