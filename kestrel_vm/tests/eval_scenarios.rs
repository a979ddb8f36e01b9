//! End-to-end evaluation scenarios.
//!
//! Each test hand-assembles the register translation of a small source
//! program and drives it through the public entry points.

use std::sync::Arc;

use kestrel_compiler::bytecode::opcode::cmp;
use kestrel_compiler::{CodeBuilder, Literal, Opcode, RegisterCode, INVALID_REGISTER};
use kestrel_runtime::object::Payload;
use kestrel_runtime::protocol;
use kestrel_runtime::ObjHandle;
use kestrel_vm::Evaluator;

fn as_int(h: &ObjHandle) -> i64 {
    match h.payload() {
        Payload::Int(i) => *i,
        Payload::Bool(b) => *b as i64,
        other => panic!("expected an int, got {}", type_of(other)),
    }
}

fn type_of(p: &Payload) -> &'static str {
    match p {
        Payload::Float(_) => "float",
        Payload::Str(_) => "str",
        Payload::None => "None",
        _ => "object",
    }
}

fn as_str(h: &ObjHandle) -> String {
    match h.payload() {
        Payload::Str(s) => s.as_str().to_owned(),
        _ => panic!("expected a str"),
    }
}

/// `def f(n): s = 0\n  for i in range(n): s += i*i\n  return s`
fn sum_of_squares_code() -> Arc<RegisterCode> {
    let mut b = CodeBuilder::new("f");
    let c0 = b.const_int(0);
    let n = b.param("n");
    let s = b.local("s");
    let i = b.local("i");
    let t_fn = b.temp();
    let t_list = b.temp();
    let t_iter = b.temp();
    let t_sq = b.temp();
    let range_name = b.name("range");

    b.emit_move(c0, s);
    b.emit(Opcode::LoadGlobal, &[t_fn], range_name);
    b.emit(Opcode::CallFunction, &[t_fn, n, t_list], 1);
    b.emit(Opcode::GetIter, &[t_list, t_iter], 0);

    let head = b.label();
    let done = b.label();
    b.bind(head);
    b.emit_branch(Opcode::ForIter, &[t_iter, i], 0, done);
    b.emit(Opcode::BinaryMultiply, &[i, i, t_sq], 0);
    b.emit(Opcode::InplaceAdd, &[s, t_sq, s], 0);
    b.emit_jump(head);
    b.bind(done);
    b.emit_return(s);
    b.finish()
}

#[test]
fn test_sum_of_squares() {
    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let f = ev.make_function(sum_of_squares_code(), &globals);

    let n = ev.runtime().new_int(1000);
    let result = ev.eval_callable(&f, &[n], &[]).unwrap();
    assert_eq!(as_int(&result), 332833500);
}

/// `def fib(n): a, b = 0, 1\n  while n > 0: a, b = b, a + b; n -= 1\n  return a`
fn fib_code() -> Arc<RegisterCode> {
    let mut b = CodeBuilder::new("fib");
    let c0 = b.const_int(0);
    let c1 = b.const_int(1);
    let n = b.param("n");
    let a = b.local("a");
    let bb = b.local("b");
    let t_sum = b.temp();
    let t_cond = b.temp();

    b.emit_move(c0, a);
    b.emit_move(c1, bb);

    let head = b.label();
    let done = b.label();
    b.bind(head);
    b.emit(Opcode::CompareOp, &[n, c0, t_cond], cmp::GT);
    b.emit_branch(Opcode::PopJumpIfFalse, &[t_cond], 0, done);
    b.emit(Opcode::BinaryAdd, &[a, bb, t_sum], 0);
    b.emit_move(bb, a);
    b.emit_move(t_sum, bb);
    b.emit(Opcode::InplaceSubtract, &[n, c1, n], 0);
    b.emit_jump(head);
    b.bind(done);
    b.emit_return(a);
    b.finish()
}

#[test]
fn test_fib() {
    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let fib = ev.make_function(fib_code(), &globals);

    let n = ev.runtime().new_int(30);
    let result = ev.eval_callable(&fib, &[n], &[]).unwrap();
    assert_eq!(as_int(&result), 832040);
}

/// Module body for:
/// `class P:\n  def __init__(s, x): s.x = x\n  def get(s): return s.x`
fn class_module_code() -> Arc<RegisterCode> {
    // __init__
    let init_code = {
        let mut b = CodeBuilder::new("__init__");
        let c_none = b.const_none();
        let s = b.param("s");
        let x = b.param("x");
        let x_name = b.name("x");
        b.emit(Opcode::StoreAttr, &[s, x], x_name);
        b.emit_return(c_none);
        b.finish()
    };

    // get
    let get_code = {
        let mut b = CodeBuilder::new("get");
        let s = b.param("s");
        let t = b.temp();
        let x_name = b.name("x");
        b.emit(Opcode::LoadAttr, &[s, t], x_name);
        b.emit_return(t);
        b.finish()
    };

    let mut b = CodeBuilder::new("<module>");
    let c_none = b.const_none();
    let c_name = b.const_str("P");
    let c_init_name = b.const_str("__init__");
    let c_get_name = b.const_str("get");
    let c_init_code = b.const_(Literal::Code(init_code));
    let c_get_code = b.const_(Literal::Code(get_code));
    let t_methods = b.temp();
    let t_bases = b.temp();
    let t_init = b.temp();
    let t_get = b.temp();
    let t_cls = b.temp();
    let p_name = b.name("P");

    b.emit(Opcode::BuildMap, &[t_methods], 0);
    b.emit(Opcode::MakeFunction, &[c_init_code, t_init], 0);
    b.emit(Opcode::StoreMap, &[c_init_name, t_init, t_methods], 0);
    b.emit(Opcode::MakeFunction, &[c_get_code, t_get], 0);
    b.emit(Opcode::StoreMap, &[c_get_name, t_get, t_methods], 0);
    b.emit(Opcode::BuildTuple, &[t_bases], 0);
    b.emit(Opcode::BuildClass, &[t_methods, t_bases, c_name, t_cls], 0);
    b.emit(Opcode::StoreGlobal, &[t_cls], p_name);
    b.emit_return(c_none);
    b.finish()
}

#[test]
fn test_class_attribute_cache() {
    let ev = Evaluator::new();
    let rt = ev.runtime();
    let module_dict = rt.new_dict();
    ev.eval_module(class_module_code(), &module_dict).unwrap();

    // Fetch the class the module defined.
    let p_key = rt.intern("P");
    let class = match module_dict.payload() {
        Payload::Dict(d) => {
            let v = d
                .borrow()
                .get(p_key.get(), protocol::str_hash(p_key.get()))
                .expect("class P not defined");
            ObjHandle::from_borrowed(v)
        }
        _ => unreachable!(),
    };

    let seven = rt.new_int(7);
    let instance = ev.eval_callable(&class, &[seven], &[]).unwrap();

    let get_name = rt.intern("get");
    let method = protocol::object_get_attr(rt, instance.get(), get_name.get()).unwrap();

    // First call populates the hint; the second hits it.
    let first = ev.eval_callable(&method, &[], &[]).unwrap();
    assert_eq!(as_int(&first), 7);
    let second = ev.eval_callable(&method, &[], &[]).unwrap();
    assert_eq!(as_int(&second), 7);
}

/// `def f():\n  try: raise ValueError("x")\n  except ValueError as e: return str(e)`
fn exception_round_trip_code() -> Arc<RegisterCode> {
    let mut b = CodeBuilder::new("f");
    let c_msg = b.const_str("x");
    let t_type = b.temp();
    let t_value = b.temp();
    let t_tb = b.temp();
    let t_cls = b.temp();
    let t_inst = b.temp();
    let t_match = b.temp();
    let t_str = b.temp();
    let t_res = b.temp();
    let ve_name = b.name("ValueError");
    let str_name = b.name("str");

    let handler = b.label();
    let reraise = b.label();

    b.emit_branch(Opcode::SetupExcept, &[t_type, t_value, t_tb], 0, handler);
    b.emit(Opcode::LoadGlobal, &[t_cls], ve_name);
    b.emit(Opcode::CallFunction, &[t_cls, c_msg, t_inst], 1);
    b.emit(
        Opcode::RaiseVarargs,
        &[t_inst, INVALID_REGISTER, INVALID_REGISTER],
        0,
    );

    b.bind(handler);
    b.emit(Opcode::LoadGlobal, &[t_cls], ve_name);
    b.emit(Opcode::CompareOp, &[t_type, t_cls, t_match], cmp::EXC_MATCH);
    b.emit_branch(Opcode::PopJumpIfFalse, &[t_match], 0, reraise);
    b.emit(Opcode::LoadGlobal, &[t_str], str_name);
    b.emit(Opcode::CallFunction, &[t_str, t_value, t_res], 1);
    b.emit_return(t_res);

    b.bind(reraise);
    b.emit(Opcode::RaiseVarargs, &[t_type, t_value, t_tb], 0);
    b.finish()
}

#[test]
fn test_exception_round_trip() {
    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let f = ev.make_function(exception_round_trip_code(), &globals);

    let result = ev.eval_callable(&f, &[], &[]).unwrap();
    assert_eq!(as_str(&result), "x");
}

/// `def mk():\n  x = [10]\n  def g(): return x[0]\n  return g`
fn closure_codes() -> Arc<RegisterCode> {
    let g_code = {
        let mut b = CodeBuilder::new("g");
        let c0 = b.const_int(0);
        b.freevar("x");
        let t_x = b.temp();
        let t_res = b.temp();
        b.emit(Opcode::LoadDeref, &[t_x], 0);
        b.emit(Opcode::BinarySubscr, &[t_x, c0, t_res], 0);
        b.emit_return(t_res);
        b.finish()
    };

    let mut b = CodeBuilder::new("mk");
    let c10 = b.const_int(10);
    let c_g_code = b.const_(Literal::Code(g_code));
    b.cellvar("x");
    let t_list = b.temp();
    let t_cell = b.temp();
    let t_closure = b.temp();
    let t_g = b.temp();

    b.emit(Opcode::BuildList, &[c10, t_list], 1);
    b.emit(Opcode::StoreDeref, &[t_list], 0);
    b.emit(Opcode::LoadClosure, &[t_cell], 0);
    b.emit(Opcode::BuildTuple, &[t_cell, t_closure], 1);
    b.emit(Opcode::MakeClosure, &[c_g_code, t_closure, t_g], 0);
    b.emit_return(t_g);
    b.finish()
}

#[test]
fn test_closure() {
    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let mk = ev.make_function(closure_codes(), &globals);

    let g = ev.eval_callable(&mk, &[], &[]).unwrap();
    assert!(matches!(g.payload(), Payload::Function(_)));
    let result = ev.eval_callable(&g, &[], &[]).unwrap();
    assert_eq!(as_int(&result), 10);
}

/// `def f(): import math; return math.floor(2.7)`
fn import_code() -> Arc<RegisterCode> {
    let mut b = CodeBuilder::new("f");
    let c_none = b.const_none();
    let c_level = b.const_int(-1);
    let c_val = b.const_(Literal::Float(2.7));
    let t_mod = b.temp();
    let t_floor = b.temp();
    let t_res = b.temp();
    let math_name = b.name("math");
    let floor_name = b.name("floor");

    b.emit(Opcode::ImportName, &[c_none, c_level, t_mod], math_name);
    b.emit(Opcode::LoadAttr, &[t_mod, t_floor], floor_name);
    b.emit(Opcode::CallFunction, &[t_floor, c_val, t_res], 1);
    b.emit_return(t_res);
    b.finish()
}

#[test]
fn test_import_math_floor() {
    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let f = ev.make_function(import_code(), &globals);

    let result = ev.eval_callable(&f, &[], &[]).unwrap();
    assert_eq!(as_int(&result), 2);
}

#[test]
fn test_default_arguments_bind_trailing_params() {
    // def add(a, b=5): return a + b
    let code = {
        let mut b = CodeBuilder::new("add");
        let a = b.param("a");
        let bp = b.param("b");
        let t = b.temp();
        b.emit(Opcode::BinaryAdd, &[a, bp, t], 0);
        b.emit_return(t);
        b.finish()
    };

    let ev = Evaluator::new();
    let rt = ev.runtime();
    let globals = rt.new_dict();
    let plain = ev.make_function(code.clone(), &globals);

    // Rebuild with a defaults tuple, the way MAKE_FUNCTION does.
    let defaults = rt.new_tuple(vec![rt.new_int(5).into_raw()]);
    let func = match plain.payload() {
        Payload::Function(f) => {
            f.globals.incref();
            let name = rt.new_str("add");
            ObjHandle::from_owned(kestrel_runtime::Obj::alloc(Payload::Function(
                kestrel_runtime::types::function::FunctionObject {
                    code: f.code.clone(),
                    globals: f.globals,
                    defaults: defaults.into_raw(),
                    closure: kestrel_runtime::Obj::null(),
                    name: name.into_raw(),
                },
            )))
        }
        _ => unreachable!(),
    };

    let two = rt.new_int(2);
    let result = ev.eval_callable(&func, &[two], &[]).unwrap();
    assert_eq!(as_int(&result), 7);

    let three = rt.new_int(3);
    let four = rt.new_int(4);
    let result = ev.eval_callable(&func, &[three, four], &[]).unwrap();
    assert_eq!(as_int(&result), 7);
}

#[test]
fn test_unimplemented_opcode_traps() {
    let mut b = CodeBuilder::new("f");
    let c = b.const_none();
    b.emit(Opcode::YieldValue, &[c], 0);
    b.emit_return(c);
    let code = b.finish();

    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let f = ev.make_function(code, &globals);
    let err = ev.eval_callable(&f, &[], &[]).unwrap_err();
    assert_eq!(err.exc_type.get(), ev.runtime().excs.system_error.get());
}
