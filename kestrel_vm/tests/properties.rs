//! Cross-cutting evaluator properties: reference discipline, dispatch
//! equivalence, disassembly totality, integer fast-path correctness.

use std::sync::Arc;

use kestrel_compiler::bytecode::opcode::cmp;
use kestrel_compiler::{CodeBuilder, Opcode, RegisterCode};
use kestrel_runtime::object::Payload;
use kestrel_runtime::{live_object_count, Obj, ObjHandle};
use kestrel_vm::{DispatchMode, Evaluator, Register, RegisterFrame};

fn as_int(h: &ObjHandle) -> i64 {
    match h.payload() {
        Payload::Int(i) => *i,
        Payload::Bool(b) => *b as i64,
        _ => panic!("expected an int"),
    }
}

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

fn binop_code(op: Opcode) -> Arc<RegisterCode> {
    let mut b = CodeBuilder::new("binop");
    let x = b.param("x");
    let y = b.param("y");
    let t = b.temp();
    b.emit(op, &[x, y, t], 0);
    b.emit_return(t);
    b.finish()
}

#[test]
fn test_reference_discipline() {
    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let fib = ev.make_function(fib_code(), &globals);

    // Warm up so one-time allocations (interned names) settle.
    let n = ev.runtime().new_int(10);
    let warm = ev.eval_callable(&fib, &[n.clone()], &[]).unwrap();
    drop(warm);
    drop(n);

    let baseline = live_object_count();
    for _ in 0..3 {
        let n = ev.runtime().new_int(25);
        let result = ev.eval_callable(&fib, &[n.clone()], &[]).unwrap();
        assert_eq!(as_int(&result), 75025);
        drop(result);
        drop(n);
        assert_eq!(live_object_count(), baseline);
    }
}

#[test]
fn test_dispatch_equivalence() {
    let ev = Evaluator::new();
    let rt = ev.runtime();
    let globals = rt.new_dict();
    let fib = ev.make_function(fib_code(), &globals);

    for input in [0i64, 1, 2, 10, 30] {
        let mut results = Vec::new();
        for mode in [DispatchMode::Switch, DispatchMode::Table] {
            let n = rt.new_int(input);
            let args = [Register::from_obj(n.get())];
            let mut frame = RegisterFrame::new(
                rt,
                fib_code(),
                fib.get(),
                &args,
                Obj::null(),
                Obj::null(),
            )
            .unwrap();
            let mut reg = ev.eval_frame_with(&mut frame, mode).unwrap();
            let out = ObjHandle::from_owned(reg.as_obj());
            results.push(as_int(&out));
        }
        assert_eq!(results[0], results[1], "dispatch flavours diverged");
    }
}

#[test]
fn test_determinism() {
    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let fib = ev.make_function(fib_code(), &globals);

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let n = ev.runtime().new_int(20);
        let result = ev.eval_callable(&fib, &[n], &[]).unwrap();
        outputs.push(as_int(&result));
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_disassembly_is_total_and_effect_free() {
    // A body with a global store: disassembly must not execute it.
    let mut b = CodeBuilder::new("f");
    let c = b.const_int(99);
    let g_name = b.name("g");
    b.emit(Opcode::StoreGlobal, &[c], g_name);
    b.emit_return(c);
    let code = b.finish();

    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let f = ev.make_function(code, &globals);

    let text = ev.disassemble(&f).unwrap();
    assert!(text.contains("STORE_GLOBAL"));
    assert!(text.contains("RETURN_VALUE"));

    // The global scope is untouched.
    match globals.payload() {
        Payload::Dict(d) => assert!(d.borrow().is_empty()),
        _ => unreachable!(),
    }
}

#[test]
fn test_integer_fast_path_matches_reference() {
    let ev = Evaluator::new();
    let rt = ev.runtime();
    let globals = rt.new_dict();

    let cases: &[(Opcode, fn(i128, i128) -> i128)] = &[
        (Opcode::BinaryAdd, |a, b| a + b),
        (Opcode::BinarySubtract, |a, b| a - b),
        (Opcode::BinaryMultiply, |a, b| a * b),
    ];
    let inputs: &[(i64, i64)] = &[
        (0, 0),
        (2, 3),
        (-7, 5),
        (123456789, 987654321),
        (i64::MAX, 1),
        (i64::MIN, 1),
        (i64::MAX, -1),
        (1 << 31, 1 << 31),
        (1 << 33, 1 << 33),
    ];

    for &(op, reference) in cases {
        let f = ev.make_function(binop_code(op), &globals);
        for &(x, y) in inputs {
            let expected = reference(x as i128, y as i128);
            let xv = rt.new_int(x);
            let yv = rt.new_int(y);
            let outcome = ev.eval_callable(&f, &[xv, yv], &[]);
            if expected >= i64::MIN as i128 && expected <= i64::MAX as i128 {
                let result = outcome.unwrap();
                assert_eq!(as_int(&result), expected as i64, "{op:?} {x} {y}");
            } else {
                // Out of machine range: the fast path must have deferred
                // to the boxed protocol, which reports overflow.
                let raised = outcome.unwrap_err();
                assert_eq!(raised.exc_type.get(), rt.excs.overflow_error.get());
            }
        }
    }
}

#[test]
fn test_unhandled_failure_carries_traceback() {
    let mut b = CodeBuilder::new("boom");
    let c0 = b.const_int(1);
    let cz = b.const_int(0);
    let t = b.temp();
    b.emit(Opcode::BinaryDivide, &[c0, cz, t], 0);
    b.emit_return(t);
    let code = b.finish();

    let ev = Evaluator::new();
    let globals = ev.runtime().new_dict();
    let f = ev.make_function(code, &globals);
    let raised = ev.eval_callable(&f, &[], &[]).unwrap_err();
    assert_eq!(
        raised.exc_type.get(),
        ev.runtime().excs.zero_division_error.get()
    );
    let tb = raised.traceback.expect("missing traceback");
    match tb.payload() {
        Payload::Traceback(entries) => {
            let entries = entries.borrow();
            assert_eq!(entries.len(), 1);
            assert_eq!(&*entries[0].func, "boom");
        }
        _ => panic!("not a traceback"),
    }
}
