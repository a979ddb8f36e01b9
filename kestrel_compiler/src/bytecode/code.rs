//! The compiled code unit consumed by the evaluator.

use std::sync::Arc;

use super::instr::CodeBuf;

/// A compile-time constant, materialised into a host object at frame entry.
#[derive(Debug, Clone)]
pub enum Literal {
    None,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// Nested compiled function body (closed over by `MAKE_FUNCTION`).
    Code(Arc<RegisterCode>),
}

/// An immutable compiled function or module body.
///
/// The register file it executes against is partitioned by construction:
/// registers `0..consts.len()` alias the constants, the next `arg_count`
/// registers hold parameters, and the rest are temporaries. Once a frame
/// is live the partition is purely documentary; instructions address
/// registers by absolute index.
#[derive(Debug)]
pub struct RegisterCode {
    /// Function name, or `<module>` for module-level code.
    pub name: Arc<str>,

    /// Instruction byte buffer (see [`super::instr`]).
    pub instructions: CodeBuf,

    /// Constant pool; constant `i` is pre-loaded into register `i`.
    pub consts: Box<[Literal]>,

    /// Global / attribute names referenced by index.
    pub names: Box<[Arc<str>]>,

    /// Local variable names; the first `arg_count` are parameters.
    pub varnames: Box<[Arc<str>]>,

    /// Names of cells created by this code for nested closures.
    pub cellvars: Box<[Arc<str>]>,

    /// Names of cells borrowed from the enclosing callable's closure.
    pub freevars: Box<[Arc<str>]>,

    /// Number of positional parameters (including a bound receiver).
    pub arg_count: u16,

    /// Size of the register file.
    pub num_registers: u16,
}

impl RegisterCode {
    #[inline]
    pub fn num_consts(&self) -> usize {
        self.consts.len()
    }

    #[inline]
    pub fn num_cellvars(&self) -> usize {
        self.cellvars.len()
    }

    #[inline]
    pub fn num_freevars(&self) -> usize {
        self.freevars.len()
    }

    /// Total free-variable array length (cell-vars then free-vars).
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }
}
