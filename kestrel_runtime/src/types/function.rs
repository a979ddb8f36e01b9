//! Callable payloads: compiled functions, bound methods, builtins.

use std::sync::Arc;

use kestrel_compiler::RegisterCode;

use crate::object::{Obj, ObjHandle};
use crate::runtime::Runtime;
use crate::RtResult;

/// A compiled function: register code plus its binding environment.
pub struct FunctionObject {
    pub code: Arc<RegisterCode>,
    /// Module dict the function's globals resolve against (owned).
    pub globals: Obj,
    /// Trailing-parameter defaults tuple, or null (owned).
    pub defaults: Obj,
    /// Tuple of closure cells for the code's free-vars, or null (owned).
    pub closure: Obj,
    /// Function name string (owned).
    pub name: Obj,
}

impl FunctionObject {
    /// Number of defaulted trailing parameters.
    pub fn num_defaults(&self) -> usize {
        if self.defaults.is_null() {
            return 0;
        }
        match self.defaults.payload() {
            crate::object::Payload::Tuple(items) => items.len(),
            _ => 0,
        }
    }
}

/// A callable carrying a bound receiver.
pub struct MethodObject {
    /// The underlying function (owned).
    pub func: Obj,
    /// The receiver installed as the first parameter (owned).
    pub receiver: Obj,
}

/// Native function signature: borrowed arguments, owned result.
pub type BuiltinFn = fn(&Runtime, &[Obj]) -> RtResult<ObjHandle>;

/// A native callable installed in the builtin scope or a module dict.
pub struct BuiltinObject {
    pub name: &'static str,
    pub f: BuiltinFn,
}
