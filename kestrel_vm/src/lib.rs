//! Kestrel: a register virtual machine for dynamic-language bytecode.
//!
//! Kestrel executes `RegisterCode` — the register-based translation of a
//! stack bytecode — against a refcounted host object model. The register
//! form eliminates per-operation stack traffic, gives every operand a
//! fixed address, and opens the door to type specialization and inline
//! caches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Evaluator                        │
//! ├──────────────────────────────────────────────────────┤
//! │  dispatch loop (table / switch)   hint table (32K)    │
//! │          │                                            │
//! │  ┌───────▼────────┐   nested calls build child        │
//! │  │ RegisterFrame  │── frames and recurse through      │
//! │  │ consts│args│tmp│   the same dispatch               │
//! │  └────────────────┘                                   │
//! │          │                                            │
//! │  Runtime: singletons, interner, builtins, modules     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Entry points
//!
//! - [`Evaluator::eval_module`] — run a module body against its dict
//! - [`Evaluator::eval_callable`] — call a function with arguments
//! - [`Evaluator::disassemble`] — render a callable's register code
//!
//! Failures surface as [`kestrel_runtime::Raised`] triples carrying the
//! host exception type, value and a traceback chained outermost-last.
//!
//! Set `EVAL_LOG` in a debug build for per-opcode tracing.

pub mod error;
pub mod eval;
pub mod frame;
pub mod hints;
pub mod ops;
pub mod register;

pub use error::VmResult;
pub use eval::{DispatchMode, Evaluator};
pub use frame::{HandlerEntry, RegisterFrame, MAX_REGISTERS};
pub use hints::{Hint, HintTable, INVALID_HINT_POS, MAX_HINTS};
pub use register::{RegType, Register};
