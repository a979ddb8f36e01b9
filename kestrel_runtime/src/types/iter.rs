//! Iterator state over the host sequence types.

use crate::object::Obj;

/// Cursor over a list, tuple or string. Dict iteration materialises the
/// key list at `GET_ITER` and iterates that.
pub struct IterObject {
    /// The sequence being walked (owned).
    pub seq: Obj,
    pub index: usize,
}
