//! Bytecode representation: opcodes, instruction records, code objects.

pub mod builder;
pub mod code;
pub mod instr;
pub mod opcode;

pub use builder::{CodeBuilder, Label};
pub use code::{Literal, RegisterCode};
pub use instr::{CodeBuf, OpView, INVALID_REGISTER};
pub use opcode::Opcode;
