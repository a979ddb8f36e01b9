//! Host object model for the Kestrel register evaluator.
//!
//! The evaluator treats the host runtime as a collaborator reached through
//! C-level-style protocols. This crate provides that collaborator:
//!
//! - [`object`] — refcounted heap objects (`PyObject` box, copyable [`Obj`]
//!   pointer, owning [`ObjHandle`]) with an explicit ownership discipline:
//!   every `Obj` stored in a container or register cell accounts for
//!   exactly one reference
//! - [`types`] — the concrete payloads the opcode families touch: dict
//!   (open-addressing, stable entry offsets for the attribute inline
//!   cache), list, tuple, string, closure cell, function, class, instance,
//!   module, iterator, traceback
//! - [`protocol`] — numeric, comparison, truth, item, attribute and
//!   iteration protocols; the evaluator's slow paths land here
//! - [`builtins`] — the builtin scope (`len`, `range`, `str`, `repr`,
//!   `isinstance`, `__import__`, exception types) and the tiny module
//!   registry behind `__import__`
//! - [`Runtime`] — owner of the singletons, interner, exception types and
//!   builtin scope; one per embedding
//!
//! Failure is a [`Raised`]: an owned (type, value, traceback) triple that
//! propagates by `Result` until an entry point surfaces it.

pub mod builtins;
pub mod intern;
pub mod object;
pub mod protocol;
pub mod runtime;
pub mod types;

pub use object::{live_object_count, Obj, ObjHandle, Payload};
pub use runtime::{Runtime, RuntimeGuard};
pub use types::exceptions::Raised;

/// Result type for every operation that can raise a host exception.
pub type RtResult<T> = Result<T, Raised>;
