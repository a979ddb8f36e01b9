//! Register bytecode for the Kestrel evaluator.
//!
//! This crate defines the compiled artifact the evaluator consumes:
//!
//! - [`bytecode::Opcode`] — opcode numbering shared with the host's stack
//!   bytecode (0–146) plus the register-VM private extensions (148–157)
//! - [`bytecode::instr`] — packed, variably-sized instruction records
//!   addressed by a byte program counter
//! - [`bytecode::RegisterCode`] — the immutable compiled unit
//! - [`bytecode::CodeBuilder`] — the emission API used by the
//!   stack-to-register translator (and by tests)
//!
//! The translator itself lives outside this workspace; everything here is
//! the data contract between it and the evaluator.

pub mod bytecode;

pub use bytecode::builder::{CodeBuilder, Label};
pub use bytecode::code::{Literal, RegisterCode};
pub use bytecode::instr::{CodeBuf, OpView, INVALID_REGISTER};
pub use bytecode::opcode::Opcode;
