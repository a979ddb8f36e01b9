//! Host object protocols.
//!
//! These are the C-level entry points of a host runtime, rendered as free
//! functions: the evaluator's slow paths call them with borrowed `Obj`
//! arguments and get back owned results. Nothing here re-enters the
//! evaluator; callables with compiled bodies are the evaluator's own
//! business.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::object::{Obj, ObjHandle, Payload};
use crate::runtime::Runtime;
use crate::types::class::is_subclass;
use crate::types::exceptions::exception_args;
use crate::types::function::MethodObject;
use crate::types::iter::IterObject;
use crate::RtResult;

use kestrel_compiler::bytecode::opcode::cmp;

/// Type name for diagnostics.
pub fn type_name(v: Obj) -> &'static str {
    if v.is_null() {
        return "<null>";
    }
    match v.payload() {
        Payload::None => "NoneType",
        Payload::Bool(_) => "bool",
        Payload::Int(_) => "int",
        Payload::Float(_) => "float",
        Payload::Str(_) => "str",
        Payload::Tuple(_) => "tuple",
        Payload::List(_) => "list",
        Payload::Dict(_) => "dict",
        Payload::Slice { .. } => "slice",
        Payload::ClosureCell(_) => "cell",
        Payload::Code(_) => "code",
        Payload::Function(_) => "function",
        Payload::Method(_) => "instancemethod",
        Payload::Builtin(_) => "builtin_function_or_method",
        Payload::Class(_) => "classobj",
        Payload::Instance(_) => "instance",
        Payload::Module(_) => "module",
        Payload::Iter(_) => "iterator",
        Payload::Traceback(_) => "traceback",
    }
}

// =============================================================================
// Numeric coercion
// =============================================================================

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

#[inline]
fn as_num(v: Obj) -> Option<Num> {
    match v.payload() {
        Payload::Int(i) => Some(Num::Int(*i)),
        Payload::Bool(b) => Some(Num::Int(*b as i64)),
        Payload::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

#[inline]
fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

/// Host floor division (result rounds toward negative infinity).
#[inline]
pub fn floor_div_i64(a: i64, b: i64) -> Option<i64> {
    if a == i64::MIN && b == -1 {
        return None;
    }
    let q = a / b;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Host modulo (result takes the sign of the divisor).
#[inline]
pub fn floor_mod_i64(a: i64, b: i64) -> Option<i64> {
    if a == i64::MIN && b == -1 {
        return Some(0);
    }
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn binop_type_error(rt: &Runtime, op: &str, a: Obj, b: Obj) -> crate::Raised {
    rt.raise_type_error(&format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        type_name(a),
        type_name(b)
    ))
}

// =============================================================================
// Binary numeric protocol
// =============================================================================

pub fn number_add(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return match (x, y) {
            (Num::Int(i), Num::Int(j)) => match i.checked_add(j) {
                Some(v) => Ok(rt.new_int(v)),
                None => Err(rt.raise_overflow_error("integer addition overflow")),
            },
            _ => Ok(rt.new_float(as_f64(x) + as_f64(y))),
        };
    }
    match (a.payload(), b.payload()) {
        (Payload::Str(x), Payload::Str(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x.as_str());
            s.push_str(y.as_str());
            Ok(rt.new_string(s))
        }
        (Payload::List(x), Payload::List(y)) => {
            let mut items: Vec<Obj> = Vec::with_capacity(x.borrow().len() + y.borrow().len());
            for &v in x.borrow().iter().chain(y.borrow().iter()) {
                v.incref();
                items.push(v);
            }
            Ok(rt.new_list(items))
        }
        (Payload::Tuple(x), Payload::Tuple(y)) => {
            let mut items: Vec<Obj> = Vec::with_capacity(x.len() + y.len());
            for &v in x.iter().chain(y.iter()) {
                v.incref();
                items.push(v);
            }
            Ok(rt.new_tuple(items))
        }
        _ => Err(binop_type_error(rt, "+", a, b)),
    }
}

pub fn number_subtract(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(i)), Some(Num::Int(j))) => match i.checked_sub(j) {
            Some(v) => Ok(rt.new_int(v)),
            None => Err(rt.raise_overflow_error("integer subtraction overflow")),
        },
        (Some(x), Some(y)) => Ok(rt.new_float(as_f64(x) - as_f64(y))),
        _ => Err(binop_type_error(rt, "-", a, b)),
    }
}

pub fn number_multiply(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(i)), Some(Num::Int(j))) => match i.checked_mul(j) {
            Some(v) => Ok(rt.new_int(v)),
            None => Err(rt.raise_overflow_error("integer multiplication overflow")),
        },
        (Some(x), Some(y)) => Ok(rt.new_float(as_f64(x) * as_f64(y))),
        _ => Err(binop_type_error(rt, "*", a, b)),
    }
}

/// Classic division: floor for integers, true division for floats.
pub fn number_divide(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(i)), Some(Num::Int(j))) => {
            if j == 0 {
                return Err(rt.raise_zero_division("integer division or modulo by zero"));
            }
            match floor_div_i64(i, j) {
                Some(v) => Ok(rt.new_int(v)),
                None => Err(rt.raise_overflow_error("integer division overflow")),
            }
        }
        (Some(x), Some(y)) => {
            let d = as_f64(y);
            if d == 0.0 {
                return Err(rt.raise_zero_division("float division"));
            }
            Ok(rt.new_float(as_f64(x) / d))
        }
        _ => Err(binop_type_error(rt, "/", a, b)),
    }
}

pub fn number_floor_divide(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(_)), Some(Num::Int(_))) => number_divide(rt, a, b),
        (Some(x), Some(y)) => {
            let d = as_f64(y);
            if d == 0.0 {
                return Err(rt.raise_zero_division("float floor division"));
            }
            Ok(rt.new_float((as_f64(x) / d).floor()))
        }
        _ => Err(binop_type_error(rt, "//", a, b)),
    }
}

pub fn number_true_divide(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    match (as_num(a), as_num(b)) {
        (Some(x), Some(y)) => {
            let d = as_f64(y);
            if d == 0.0 {
                return Err(rt.raise_zero_division("division by zero"));
            }
            Ok(rt.new_float(as_f64(x) / d))
        }
        _ => Err(binop_type_error(rt, "/", a, b)),
    }
}

/// Modulo; a string left operand formats instead.
pub fn number_remainder(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    if let Payload::Str(fmt) = a.payload() {
        return str_format_percent(rt, fmt.as_str(), b);
    }
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(i)), Some(Num::Int(j))) => {
            if j == 0 {
                return Err(rt.raise_zero_division("integer division or modulo by zero"));
            }
            match floor_mod_i64(i, j) {
                Some(v) => Ok(rt.new_int(v)),
                None => Err(rt.raise_overflow_error("integer modulo overflow")),
            }
        }
        (Some(x), Some(y)) => {
            let d = as_f64(y);
            if d == 0.0 {
                return Err(rt.raise_zero_division("float modulo"));
            }
            let n = as_f64(x);
            Ok(rt.new_float(n - d * (n / d).floor()))
        }
        _ => Err(binop_type_error(rt, "%", a, b)),
    }
}

pub fn number_power(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(base)), Some(Num::Int(exp))) => {
            if exp < 0 {
                return Ok(rt.new_float((base as f64).powf(exp as f64)));
            }
            if exp > u32::MAX as i64 {
                return Err(rt.raise_overflow_error("integer power overflow"));
            }
            match (base as i128).checked_pow(exp as u32) {
                Some(v) if v >= i64::MIN as i128 && v <= i64::MAX as i128 => {
                    Ok(rt.new_int(v as i64))
                }
                _ => Err(rt.raise_overflow_error("integer power overflow")),
            }
        }
        (Some(x), Some(y)) => Ok(rt.new_float(as_f64(x).powf(as_f64(y)))),
        _ => Err(binop_type_error(rt, "** or pow()", a, b)),
    }
}

fn int_pair(rt: &Runtime, op: &str, a: Obj, b: Obj) -> RtResult<(i64, i64)> {
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(i)), Some(Num::Int(j))) => Ok((i, j)),
        _ => Err(binop_type_error(rt, op, a, b)),
    }
}

pub fn number_and(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    let (i, j) = int_pair(rt, "&", a, b)?;
    Ok(rt.new_int(i & j))
}

pub fn number_or(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    let (i, j) = int_pair(rt, "|", a, b)?;
    Ok(rt.new_int(i | j))
}

pub fn number_xor(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    let (i, j) = int_pair(rt, "^", a, b)?;
    Ok(rt.new_int(i ^ j))
}

pub fn number_lshift(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    let (i, j) = int_pair(rt, "<<", a, b)?;
    if j < 0 {
        return Err(rt.raise_value_error("negative shift count"));
    }
    if j >= 64 {
        return Err(rt.raise_overflow_error("shift count out of range"));
    }
    match i.checked_shl(j as u32) {
        Some(v) if (v >> j) == i => Ok(rt.new_int(v)),
        _ => Err(rt.raise_overflow_error("integer left shift overflow")),
    }
}

pub fn number_rshift(rt: &Runtime, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    let (i, j) = int_pair(rt, ">>", a, b)?;
    if j < 0 {
        return Err(rt.raise_value_error("negative shift count"));
    }
    let shift = j.min(63) as u32;
    Ok(rt.new_int(i >> shift))
}

// =============================================================================
// Unary protocol
// =============================================================================

pub fn unary_negative(rt: &Runtime, v: Obj) -> RtResult<ObjHandle> {
    match as_num(v) {
        Some(Num::Int(i)) => match i.checked_neg() {
            Some(n) => Ok(rt.new_int(n)),
            None => Err(rt.raise_overflow_error("integer negation overflow")),
        },
        Some(Num::Float(f)) => Ok(rt.new_float(-f)),
        None => Err(rt.raise_type_error(&format!(
            "bad operand type for unary -: '{}'",
            type_name(v)
        ))),
    }
}

pub fn unary_positive(rt: &Runtime, v: Obj) -> RtResult<ObjHandle> {
    match as_num(v) {
        Some(Num::Int(i)) => Ok(rt.new_int(i)),
        Some(Num::Float(f)) => Ok(rt.new_float(f)),
        None => Err(rt.raise_type_error(&format!(
            "bad operand type for unary +: '{}'",
            type_name(v)
        ))),
    }
}

pub fn unary_invert(rt: &Runtime, v: Obj) -> RtResult<ObjHandle> {
    match v.payload() {
        Payload::Int(i) => Ok(rt.new_int(!i)),
        Payload::Bool(b) => Ok(rt.new_int(!(*b as i64))),
        _ => Err(rt.raise_type_error(&format!(
            "bad operand type for unary ~: '{}'",
            type_name(v)
        ))),
    }
}

// =============================================================================
// Equality, ordering, hashing, truth
// =============================================================================

/// Structural equality without allocation or user code: numbers by value,
/// strings by content, tuples/lists elementwise, everything else by
/// identity. This is both dict-key equality and the `==` slow path.
pub fn const_eq(a: Obj, b: Obj) -> bool {
    if a == b {
        return true;
    }
    if a.is_null() || b.is_null() {
        return false;
    }
    match (a.payload(), b.payload()) {
        (Payload::Str(x), Payload::Str(y)) => x.as_str() == y.as_str(),
        (Payload::Tuple(x), Payload::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(&i, &j)| const_eq(i, j))
        }
        (Payload::List(x), Payload::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(&i, &j)| const_eq(i, j))
        }
        _ => match (as_num(a), as_num(b)) {
            (Some(Num::Int(i)), Some(Num::Int(j))) => i == j,
            (Some(x), Some(y)) => as_f64(x) == as_f64(y),
            _ => false,
        },
    }
}

pub fn hash_int(v: i64) -> u64 {
    let mut hasher = FxHasher::default();
    v.hash(&mut hasher);
    hasher.finish()
}

/// Hash protocol. Mutable containers are unhashable; everything else
/// hashes so that `const_eq` equals imply hash equality.
pub fn object_hash(rt: &Runtime, v: Obj) -> RtResult<u64> {
    match v.payload() {
        Payload::Int(i) => Ok(hash_int(*i)),
        Payload::Bool(b) => Ok(hash_int(*b as i64)),
        Payload::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Ok(hash_int(*f as i64))
            } else {
                Ok(hash_int(f.to_bits() as i64))
            }
        }
        Payload::Str(s) => Ok(s.hash()),
        Payload::None => Ok(hash_int(0x6e6f6e65)),
        Payload::Tuple(items) => {
            let mut hasher = FxHasher::default();
            for &item in items.iter() {
                object_hash(rt, item)?.hash(&mut hasher);
            }
            Ok(hasher.finish())
        }
        Payload::List(_) | Payload::Dict(_) => Err(rt.raise_type_error(&format!(
            "unhashable type: '{}'",
            type_name(v)
        ))),
        _ => Ok(hash_int(v.id() as i64)),
    }
}

/// Hash of a string object (names are always strings).
#[inline]
pub fn str_hash(s: Obj) -> u64 {
    match s.payload() {
        Payload::Str(st) => st.hash(),
        _ => hash_int(s.id() as i64),
    }
}

fn order_of(a: Obj, b: Obj) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return match (x, y) {
            (Num::Int(i), Num::Int(j)) => Some(i.cmp(&j)),
            _ => as_f64(x).partial_cmp(&as_f64(y)),
        };
    }
    if let (Payload::Str(x), Payload::Str(y)) = (a.payload(), b.payload()) {
        return Some(x.as_str().cmp(y.as_str()));
    }
    None
}

/// Rich comparison for the ordered operators plus `==`/`!=`.
pub fn rich_compare(rt: &Runtime, op: u16, a: Obj, b: Obj) -> RtResult<ObjHandle> {
    use std::cmp::Ordering::*;
    let result = match op {
        cmp::EQ => const_eq(a, b),
        cmp::NE => !const_eq(a, b),
        _ => match order_of(a, b) {
            Some(ord) => match op {
                cmp::LT => ord == Less,
                cmp::LE => ord != Greater,
                cmp::GT => ord == Greater,
                cmp::GE => ord != Less,
                _ => {
                    return Err(rt.raise_system_error("bad comparison operator"));
                }
            },
            None => {
                // NaN operands land here for floats too; only genuinely
                // un-ordered *types* are an error.
                if as_num(a).is_some() && as_num(b).is_some() {
                    false
                } else {
                    return Err(rt.raise_type_error(&format!(
                        "cannot compare '{}' with '{}'",
                        type_name(a),
                        type_name(b)
                    )));
                }
            }
        },
    };
    Ok(rt.bool_obj(result))
}

pub fn object_is_true(v: Obj) -> bool {
    match v.payload() {
        Payload::None => false,
        Payload::Bool(b) => *b,
        Payload::Int(i) => *i != 0,
        Payload::Float(f) => *f != 0.0,
        Payload::Str(s) => !s.is_empty(),
        Payload::Tuple(items) => !items.is_empty(),
        Payload::List(items) => !items.borrow().is_empty(),
        Payload::Dict(d) => !d.borrow().is_empty(),
        _ => true,
    }
}

// =============================================================================
// str() / repr()
// =============================================================================

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

pub fn object_str(rt: &Runtime, v: Obj) -> RtResult<ObjHandle> {
    match v.payload() {
        Payload::Str(_) => Ok(ObjHandle::from_borrowed(v)),
        Payload::Instance(inst) => {
            if let Payload::Class(cls) = inst.class.payload() {
                if cls.is_exception {
                    return exception_text(rt, v);
                }
                return Ok(rt.new_string(format!("<{} instance>", cls.name_str())));
            }
            Ok(rt.new_str("<instance>"))
        }
        _ => object_repr(rt, v),
    }
}

/// `str()` of an exception instance: its sole argument, or the argument
/// tuple, or the empty string.
fn exception_text(rt: &Runtime, exc: Obj) -> RtResult<ObjHandle> {
    match exception_args(exc) {
        Some(args) => match args.payload() {
            Payload::Tuple(items) if items.is_empty() => Ok(rt.new_str("")),
            Payload::Tuple(items) if items.len() == 1 => object_str(rt, items[0]),
            _ => object_repr(rt, args),
        },
        None => Ok(rt.new_str("")),
    }
}

pub fn object_repr(rt: &Runtime, v: Obj) -> RtResult<ObjHandle> {
    let text = repr_text(rt, v)?;
    Ok(rt.new_string(text))
}

fn repr_text(rt: &Runtime, v: Obj) -> RtResult<String> {
    Ok(match v.payload() {
        Payload::None => "None".to_owned(),
        Payload::Bool(true) => "True".to_owned(),
        Payload::Bool(false) => "False".to_owned(),
        Payload::Int(i) => i.to_string(),
        Payload::Float(f) => format_float(*f),
        Payload::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('\'');
            for c in s.as_str().chars() {
                match c {
                    '\'' => out.push_str("\\'"),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    _ => out.push(c),
                }
            }
            out.push('\'');
            out
        }
        Payload::Tuple(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|&i| repr_text(rt, i))
                .collect::<RtResult<_>>()?;
            if parts.len() == 1 {
                format!("({},)", parts[0])
            } else {
                format!("({})", parts.join(", "))
            }
        }
        Payload::List(items) => {
            let parts: Vec<String> = items
                .borrow()
                .iter()
                .map(|&i| repr_text(rt, i))
                .collect::<RtResult<_>>()?;
            format!("[{}]", parts.join(", "))
        }
        Payload::Dict(d) => {
            let mut parts = Vec::with_capacity(d.borrow().len());
            for (k, val) in d.borrow().items() {
                parts.push(format!("{}: {}", repr_text(rt, k)?, repr_text(rt, val)?));
            }
            format!("{{{}}}", parts.join(", "))
        }
        Payload::Class(c) => format!("<class '{}'>", c.name_str()),
        Payload::Function(f) => match f.name.payload() {
            Payload::Str(s) => format!("<function {}>", s.as_str()),
            _ => "<function>".to_owned(),
        },
        Payload::Method(m) => {
            let recv = type_name(m.receiver);
            format!("<bound method of {recv}>")
        }
        Payload::Builtin(b) => format!("<built-in function {}>", b.name),
        Payload::Module(m) => match m.name.payload() {
            Payload::Str(s) => format!("<module '{}'>", s.as_str()),
            _ => "<module>".to_owned(),
        },
        Payload::Instance(_) => {
            let s = object_str(rt, v)?;
            match s.payload() {
                Payload::Str(t) => t.as_str().to_owned(),
                _ => "<instance>".to_owned(),
            }
        }
        _ => format!("<{} object>", type_name(v)),
    })
}

/// Convenience: `str()` as a Rust `String`.
pub fn str_of(rt: &Runtime, v: Obj) -> RtResult<String> {
    let s = object_str(rt, v)?;
    match s.payload() {
        Payload::Str(t) => Ok(t.as_str().to_owned()),
        _ => Ok(String::new()),
    }
}

// =============================================================================
// Item protocol
// =============================================================================

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    if i >= 0 && i < len {
        Some(i as usize)
    } else {
        None
    }
}

fn index_value(v: Obj) -> Option<i64> {
    match v.payload() {
        Payload::Int(i) => Some(*i),
        Payload::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

pub fn object_get_item(rt: &Runtime, container: Obj, key: Obj) -> RtResult<ObjHandle> {
    match container.payload() {
        Payload::List(items) => {
            if let Payload::Slice { start, stop } = key.payload() {
                return apply_slice(rt, container, *start, *stop);
            }
            let i = index_value(key).ok_or_else(|| {
                rt.raise_type_error("list indices must be integers")
            })?;
            let items = items.borrow();
            match normalize_index(i, items.len()) {
                Some(idx) => Ok(ObjHandle::from_borrowed(items[idx])),
                None => Err(rt.raise_index_error("list index out of range")),
            }
        }
        Payload::Tuple(items) => {
            if let Payload::Slice { start, stop } = key.payload() {
                return apply_slice(rt, container, *start, *stop);
            }
            let i = index_value(key).ok_or_else(|| {
                rt.raise_type_error("tuple indices must be integers")
            })?;
            match normalize_index(i, items.len()) {
                Some(idx) => Ok(ObjHandle::from_borrowed(items[idx])),
                None => Err(rt.raise_index_error("tuple index out of range")),
            }
        }
        Payload::Str(s) => {
            if let Payload::Slice { start, stop } = key.payload() {
                return apply_slice(rt, container, *start, *stop);
            }
            let i = index_value(key).ok_or_else(|| {
                rt.raise_type_error("string indices must be integers")
            })?;
            let chars: Vec<char> = s.as_str().chars().collect();
            match normalize_index(i, chars.len()) {
                Some(idx) => Ok(rt.new_string(chars[idx].to_string())),
                None => Err(rt.raise_index_error("string index out of range")),
            }
        }
        Payload::Dict(d) => {
            let hash = object_hash(rt, key)?;
            match d.borrow().get(key, hash) {
                Some(v) => Ok(ObjHandle::from_borrowed(v)),
                None => {
                    let text = repr_text(rt, key)?;
                    Err(rt.raise_key_error(&text))
                }
            }
        }
        _ => Err(rt.raise_type_error(&format!(
            "'{}' object is unsubscriptable",
            type_name(container)
        ))),
    }
}

pub fn object_set_item(rt: &Runtime, container: Obj, key: Obj, value: Obj) -> RtResult<()> {
    match container.payload() {
        Payload::List(items) => {
            if let Payload::Slice { start, stop } = key.payload() {
                return assign_slice(rt, container, *start, *stop, value);
            }
            let i = index_value(key).ok_or_else(|| {
                rt.raise_type_error("list indices must be integers")
            })?;
            let mut items = items.borrow_mut();
            let len = items.len();
            match normalize_index(i, len) {
                Some(idx) => {
                    value.incref();
                    let old = items[idx];
                    items[idx] = value;
                    drop(items);
                    old.decref();
                    Ok(())
                }
                None => Err(rt.raise_index_error("list assignment index out of range")),
            }
        }
        Payload::Dict(d) => {
            let hash = object_hash(rt, key)?;
            d.borrow_mut().insert(key, hash, value);
            Ok(())
        }
        _ => Err(rt.raise_type_error(&format!(
            "'{}' object does not support item assignment",
            type_name(container)
        ))),
    }
}

// =============================================================================
// Slicing
// =============================================================================

fn slice_bound(rt: &Runtime, v: Obj, len: usize, default: usize) -> RtResult<usize> {
    if v.is_null() || matches!(v.payload(), Payload::None) {
        return Ok(default);
    }
    let i = index_value(v)
        .ok_or_else(|| rt.raise_type_error("slice indices must be integers or None"))?;
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    Ok(i.clamp(0, len) as usize)
}

/// `seq[left:right]`; a null or `None` bound means the respective end.
pub fn apply_slice(rt: &Runtime, seq: Obj, left: Obj, right: Obj) -> RtResult<ObjHandle> {
    match seq.payload() {
        Payload::List(items) => {
            let items = items.borrow();
            let lo = slice_bound(rt, left, items.len(), 0)?;
            let hi = slice_bound(rt, right, items.len(), items.len())?;
            let mut out = Vec::new();
            if lo < hi {
                out.reserve(hi - lo);
                for &v in &items[lo..hi] {
                    v.incref();
                    out.push(v);
                }
            }
            Ok(rt.new_list(out))
        }
        Payload::Tuple(items) => {
            let lo = slice_bound(rt, left, items.len(), 0)?;
            let hi = slice_bound(rt, right, items.len(), items.len())?;
            let mut out = Vec::new();
            if lo < hi {
                for &v in &items[lo..hi] {
                    v.incref();
                    out.push(v);
                }
            }
            Ok(rt.new_tuple(out))
        }
        Payload::Str(s) => {
            let chars: Vec<char> = s.as_str().chars().collect();
            let lo = slice_bound(rt, left, chars.len(), 0)?;
            let hi = slice_bound(rt, right, chars.len(), chars.len())?;
            let text: String = if lo < hi {
                chars[lo..hi].iter().collect()
            } else {
                String::new()
            };
            Ok(rt.new_string(text))
        }
        _ => Err(rt.raise_type_error(&format!(
            "'{}' object is unsliceable",
            type_name(seq)
        ))),
    }
}

/// `seq[left:right] = value` for lists.
pub fn assign_slice(rt: &Runtime, seq: Obj, left: Obj, right: Obj, value: Obj) -> RtResult<()> {
    let Payload::List(items) = seq.payload() else {
        return Err(rt.raise_type_error(&format!(
            "'{}' object does not support slice assignment",
            type_name(seq)
        )));
    };
    let incoming: Vec<Obj> = match value.payload() {
        Payload::List(v) => v.borrow().clone(),
        Payload::Tuple(v) => v.to_vec(),
        _ => {
            return Err(rt.raise_type_error("can only assign an iterable to a slice"));
        }
    };
    for &v in &incoming {
        v.incref();
    }
    let mut items = items.borrow_mut();
    let lo = slice_bound(rt, left, items.len(), 0)?;
    let hi = slice_bound(rt, right, items.len(), items.len())?.max(lo);
    let removed: Vec<Obj> = items.splice(lo..hi, incoming).collect();
    drop(items);
    for v in removed {
        v.decref();
    }
    Ok(())
}

// =============================================================================
// Attribute protocol
// =============================================================================

/// Apply non-data descriptor binding: class-level functions bind to the
/// receiver, everything else passes through.
pub fn bind_class_attr(attr: Obj, receiver: Obj) -> ObjHandle {
    if let Payload::Function(_) = attr.payload() {
        attr.incref();
        receiver.incref();
        return ObjHandle::from_owned(Obj::alloc(Payload::Method(MethodObject {
            func: attr,
            receiver,
        })));
    }
    ObjHandle::from_borrowed(attr)
}

fn attr_error(rt: &Runtime, obj: Obj, name: Obj) -> crate::Raised {
    let name_text = match name.payload() {
        Payload::Str(s) => s.as_str().to_owned(),
        _ => "?".to_owned(),
    };
    let type_text = match obj.payload() {
        Payload::Instance(inst) => match inst.class.payload() {
            Payload::Class(c) => c.name_str().to_owned(),
            _ => type_name(obj).to_owned(),
        },
        _ => type_name(obj).to_owned(),
    };
    rt.raise_attribute_error(&format!(
        "'{type_text}' object has no attribute '{name_text}'"
    ))
}

/// Generic attribute load: modules and classes read their dicts, instances
/// run the full resolution order (instance dict, then class MRO with
/// descriptor binding).
pub fn object_get_attr(rt: &Runtime, obj: Obj, name: Obj) -> RtResult<ObjHandle> {
    let hash = str_hash(name);
    match obj.payload() {
        Payload::Module(m) => {
            if let Payload::Dict(d) = m.dict.payload() {
                if let Some(v) = d.borrow().get(name, hash) {
                    return Ok(ObjHandle::from_borrowed(v));
                }
            }
            Err(attr_error(rt, obj, name))
        }
        Payload::Class(cls) => match cls.mro_lookup(name, hash) {
            Some(v) => Ok(ObjHandle::from_borrowed(v)),
            None => Err(attr_error(rt, obj, name)),
        },
        Payload::Instance(inst) => {
            if let Payload::Dict(d) = inst.dict.payload() {
                if let Some(v) = d.borrow().get(name, hash) {
                    return Ok(ObjHandle::from_borrowed(v));
                }
            }
            if let Payload::Class(cls) = inst.class.payload() {
                if let Some(attr) = cls.mro_lookup(name, hash) {
                    return Ok(bind_class_attr(attr, obj));
                }
            }
            Err(attr_error(rt, obj, name))
        }
        _ => Err(attr_error(rt, obj, name)),
    }
}

pub fn object_set_attr(rt: &Runtime, obj: Obj, name: Obj, value: Obj) -> RtResult<()> {
    let hash = str_hash(name);
    let dict = match obj.payload() {
        Payload::Instance(inst) => inst.dict,
        Payload::Module(m) => m.dict,
        Payload::Class(c) => c.dict,
        _ => {
            return Err(attr_error(rt, obj, name));
        }
    };
    if let Payload::Dict(d) = dict.payload() {
        d.borrow_mut().insert(name, hash, value);
        Ok(())
    } else {
        Err(rt.raise_system_error("attribute dict is not a dict"))
    }
}

// =============================================================================
// Iteration protocol
// =============================================================================

pub fn object_get_iter(rt: &Runtime, v: Obj) -> RtResult<ObjHandle> {
    match v.payload() {
        Payload::List(_) | Payload::Tuple(_) | Payload::Str(_) => {
            v.incref();
            Ok(ObjHandle::from_owned(Obj::alloc(Payload::Iter(
                std::cell::RefCell::new(IterObject { seq: v, index: 0 }),
            ))))
        }
        Payload::Dict(d) => {
            let mut keys = Vec::with_capacity(d.borrow().len());
            for (k, _) in d.borrow().items() {
                k.incref();
                keys.push(k);
            }
            let list = rt.new_list(keys);
            Ok(ObjHandle::from_owned(Obj::alloc(Payload::Iter(
                std::cell::RefCell::new(IterObject {
                    seq: list.into_raw(),
                    index: 0,
                }),
            ))))
        }
        Payload::Iter(_) => Ok(ObjHandle::from_borrowed(v)),
        _ => Err(rt.raise_type_error(&format!(
            "'{}' object is not iterable",
            type_name(v)
        ))),
    }
}

/// Advance an iterator; `Ok(None)` is end-of-iteration.
pub fn iter_next(rt: &Runtime, it: Obj) -> RtResult<Option<ObjHandle>> {
    let Payload::Iter(state) = it.payload() else {
        return Err(rt.raise_type_error(&format!(
            "'{}' object is not an iterator",
            type_name(it)
        )));
    };
    let mut state = state.borrow_mut();
    let idx = state.index;
    let result = match state.seq.payload() {
        Payload::List(items) => items.borrow().get(idx).map(|&v| ObjHandle::from_borrowed(v)),
        Payload::Tuple(items) => items.get(idx).map(|&v| ObjHandle::from_borrowed(v)),
        Payload::Str(s) => s
            .as_str()
            .chars()
            .nth(idx)
            .map(|c| rt.new_string(c.to_string())),
        _ => None,
    };
    if result.is_some() {
        state.index += 1;
    }
    Ok(result)
}

// =============================================================================
// Containment and exception matching
// =============================================================================

pub fn sequence_contains(rt: &Runtime, container: Obj, item: Obj) -> RtResult<bool> {
    match container.payload() {
        Payload::List(items) => Ok(items.borrow().iter().any(|&v| const_eq(v, item))),
        Payload::Tuple(items) => Ok(items.iter().any(|&v| const_eq(v, item))),
        Payload::Dict(d) => {
            let hash = object_hash(rt, item)?;
            Ok(d.borrow().get(item, hash).is_some())
        }
        Payload::Str(s) => match item.payload() {
            Payload::Str(needle) => Ok(s.as_str().contains(needle.as_str())),
            _ => Err(rt.raise_type_error(
                "'in <string>' requires string as left operand",
            )),
        },
        _ => Err(rt.raise_type_error(&format!(
            "argument of type '{}' is not iterable",
            type_name(container)
        ))),
    }
}

/// `except` clause matching: `exc` may be an exception class or instance,
/// `classinfo` a class or a tuple of classes.
pub fn exception_matches(exc: Obj, classinfo: Obj) -> bool {
    if let Payload::Tuple(options) = classinfo.payload() {
        return options.iter().any(|&c| exception_matches(exc, c));
    }
    let exc_class = match exc.payload() {
        Payload::Instance(inst) => inst.class,
        Payload::Class(_) => exc,
        _ => return false,
    };
    matches!(classinfo.payload(), Payload::Class(_)) && is_subclass(exc_class, classinfo)
}

// =============================================================================
// %-formatting
// =============================================================================

/// The string `%` operator. Supports `%s`, `%r`, `%d`, `%f` and `%%`.
pub fn str_format_percent(rt: &Runtime, fmt: &str, args: Obj) -> RtResult<ObjHandle> {
    let positional: Vec<Obj> = match args.payload() {
        Payload::Tuple(items) => items.to_vec(),
        _ => vec![args],
    };
    let mut out = String::with_capacity(fmt.len());
    let mut next = 0usize;
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(conv) = chars.next() else {
            return Err(rt.raise_value_error("incomplete format"));
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let Some(&arg) = positional.get(next) else {
            return Err(rt.raise_type_error("not enough arguments for format string"));
        };
        next += 1;
        match conv {
            's' => out.push_str(&str_of(rt, arg)?),
            'r' => {
                let r = object_repr(rt, arg)?;
                if let Payload::Str(s) = r.payload() {
                    out.push_str(s.as_str());
                }
            }
            'd' | 'i' => match as_num(arg) {
                Some(Num::Int(i)) => out.push_str(&i.to_string()),
                Some(Num::Float(f)) => out.push_str(&(f as i64).to_string()),
                None => {
                    return Err(rt.raise_type_error(&format!(
                        "%d format: a number is required, not {}",
                        type_name(arg)
                    )));
                }
            },
            'f' => match as_num(arg) {
                Some(n) => out.push_str(&format!("{:.6}", as_f64(n))),
                None => {
                    return Err(rt.raise_type_error("float argument required"));
                }
            },
            _ => {
                return Err(rt.raise_value_error(&format!(
                    "unsupported format character '{conv}'"
                )));
            }
        }
    }
    if next < positional.len() {
        return Err(rt.raise_type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(rt.new_string(out))
}
