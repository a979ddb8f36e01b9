//! Packed, self-describing instruction records.
//!
//! Instructions live in a flat byte buffer and are addressed by a byte
//! program counter. Every record begins with `{opcode: u8, num_registers:
//! u8}`, and its total size is a pure function of those two bytes, so the
//! dispatch loop can advance linearly without a side table.
//!
//! With the `pack-instructions` feature (default) three layouts exist:
//!
//! ```text
//! RegOp<K>    op nreg  reg*K   arg  hint               =  6 + 2K bytes
//! BranchOp<K> op nreg  reg*K   arg  hint  label:u32    = 10 + 2K bytes
//! VarRegOp    op nreg  arg  hint  reg*N                =  6 + 2N bytes
//! ```
//!
//! Without it, every record uses the maximum layout
//! `{op, nreg, arg, hint, label: u32, reg*N}` (10 + 2N bytes) for simpler
//! access. All multi-byte fields are little-endian.
//!
//! The buffer is a slice of `Cell<u8>` rather than plain bytes because the
//! attribute-load handler patches its record's hint slot in place after a
//! successful slow-path lookup. Evaluation is single-threaded; the cells
//! make the mutation explicit without locking.

use std::cell::Cell;

use super::opcode;

/// Instruction byte buffer.
pub type CodeBuf = Box<[Cell<u8>]>;

/// Register index sentinel marking an absent operand.
pub const INVALID_REGISTER: u16 = 0xFFFF;

/// Convert raw emitted bytes into an instruction buffer.
pub fn to_code_buf(bytes: Vec<u8>) -> CodeBuf {
    bytes.into_iter().map(Cell::new).collect()
}

#[inline(always)]
fn u8_at(buf: &[Cell<u8>], off: usize) -> u8 {
    buf[off].get()
}

#[inline(always)]
fn u16_at(buf: &[Cell<u8>], off: usize) -> u16 {
    u16::from_le_bytes([buf[off].get(), buf[off + 1].get()])
}

#[inline(always)]
fn u32_at(buf: &[Cell<u8>], off: usize) -> u32 {
    u32::from_le_bytes([
        buf[off].get(),
        buf[off + 1].get(),
        buf[off + 2].get(),
        buf[off + 3].get(),
    ])
}

/// Overwrite a little-endian `u16` field in place.
#[inline]
pub fn patch_u16(buf: &[Cell<u8>], off: usize, value: u16) {
    let b = value.to_le_bytes();
    buf[off].set(b[0]);
    buf[off + 1].set(b[1]);
}

// =============================================================================
// Decoding
// =============================================================================

/// A decoded view of one instruction record.
///
/// The view borrows nothing: register indices are re-read through
/// [`OpView::reg`] so the underlying record stays the single source of
/// truth even across in-place patches.
#[derive(Debug, Clone, Copy)]
pub struct OpView {
    pub opcode: u8,
    pub num_regs: u8,
    pub arg: u16,
    pub hint: u16,
    /// Absolute byte label; meaningful only for branch records.
    pub label: u32,
    /// Total record size in bytes.
    pub size: u32,
    /// Byte offset of the register index array.
    regs_at: u32,
    /// Byte offset of the hint field, for in-place patching.
    hint_at: u32,
}

impl OpView {
    /// Read the `i`-th register index of this record.
    #[inline(always)]
    pub fn reg(&self, buf: &[Cell<u8>], i: usize) -> u16 {
        debug_assert!(i < self.num_regs as usize);
        u16_at(buf, self.regs_at as usize + 2 * i)
    }

    /// Patch this record's hint slot.
    #[inline]
    pub fn patch_hint(&self, buf: &[Cell<u8>], hint: u16) {
        patch_u16(buf, self.hint_at as usize, hint);
    }

    /// Render the record for disassembly output.
    pub fn format(&self, buf: &[Cell<u8>]) -> String {
        use std::fmt::Write;

        let mut out = String::with_capacity(48);
        out.push_str(opcode::name(self.opcode));
        for i in 0..self.num_regs as usize {
            let r = self.reg(buf, i);
            if r == INVALID_REGISTER {
                out.push_str(" r-");
            } else {
                let _ = write!(out, " r{r}");
            }
        }
        if self.arg != 0 {
            let _ = write!(out, " [{}]", self.arg);
        }
        if opcode::is_branch(self.opcode) {
            let _ = write!(out, " -> {}", self.label);
        }
        out
    }
}

/// Decode the record whose header starts at `pc`.
#[cfg(feature = "pack-instructions")]
pub fn decode(buf: &[Cell<u8>], pc: usize) -> OpView {
    let op = u8_at(buf, pc);
    let nreg = u8_at(buf, pc + 1);
    let n = nreg as usize;

    if opcode::is_varargs(op) {
        // VarRegOp: header, arg, hint, registers.
        OpView {
            opcode: op,
            num_regs: nreg,
            arg: u16_at(buf, pc + 2),
            hint: u16_at(buf, pc + 4),
            label: 0,
            size: (6 + 2 * n) as u32,
            regs_at: (pc + 6) as u32,
            hint_at: (pc + 4) as u32,
        }
    } else {
        // RegOp / BranchOp: header, registers, arg, hint[, label].
        let arg_at = pc + 2 + 2 * n;
        let hint_at = arg_at + 2;
        let branch = opcode::is_branch(op);
        OpView {
            opcode: op,
            num_regs: nreg,
            arg: u16_at(buf, arg_at),
            hint: u16_at(buf, hint_at),
            label: if branch { u32_at(buf, hint_at + 2) } else { 0 },
            size: if branch { 10 + 2 * n } else { 6 + 2 * n } as u32,
            regs_at: (pc + 2) as u32,
            hint_at: hint_at as u32,
        }
    }
}

/// Decode the record whose header starts at `pc` (uniform layout).
#[cfg(not(feature = "pack-instructions"))]
pub fn decode(buf: &[Cell<u8>], pc: usize) -> OpView {
    let op = u8_at(buf, pc);
    let nreg = u8_at(buf, pc + 1);
    let n = nreg as usize;
    OpView {
        opcode: op,
        num_regs: nreg,
        arg: u16_at(buf, pc + 2),
        hint: u16_at(buf, pc + 4),
        label: u32_at(buf, pc + 6),
        size: (10 + 2 * n) as u32,
        regs_at: (pc + 10) as u32,
        hint_at: (pc + 4) as u32,
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Append one record to `out`, returning the byte offset of its label field
/// for branch records (so forward references can be patched).
pub fn encode(out: &mut Vec<u8>, op: u8, regs: &[u16], arg: u16, label: Option<u32>) -> usize {
    debug_assert!(regs.len() <= u8::MAX as usize, "too many registers");
    debug_assert_eq!(opcode::is_branch(op), label.is_some(), "label/branch mismatch");

    out.push(op);
    out.push(regs.len() as u8);
    encode_body(out, op, regs, arg, label)
}

#[cfg(feature = "pack-instructions")]
fn encode_body(out: &mut Vec<u8>, op: u8, regs: &[u16], arg: u16, label: Option<u32>) -> usize {
    if opcode::is_varargs(op) {
        out.extend_from_slice(&arg.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // hint
        for &r in regs {
            out.extend_from_slice(&r.to_le_bytes());
        }
        out.len()
    } else {
        for &r in regs {
            out.extend_from_slice(&r.to_le_bytes());
        }
        out.extend_from_slice(&arg.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // hint
        let label_at = out.len();
        if let Some(l) = label {
            out.extend_from_slice(&l.to_le_bytes());
        }
        label_at
    }
}

#[cfg(not(feature = "pack-instructions"))]
fn encode_body(out: &mut Vec<u8>, _op: u8, regs: &[u16], arg: u16, label: Option<u32>) -> usize {
    out.extend_from_slice(&arg.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // hint
    let label_at = out.len();
    out.extend_from_slice(&label.unwrap_or(0).to_le_bytes());
    for &r in regs {
        out.extend_from_slice(&r.to_le_bytes());
    }
    label_at
}

/// Patch a previously emitted label field.
pub fn patch_label(out: &mut [u8], label_at: usize, label: u32) {
    out[label_at..label_at + 4].copy_from_slice(&label.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::Opcode;

    #[test]
    fn test_fixed_arity_roundtrip() {
        let mut bytes = Vec::new();
        encode(&mut bytes, Opcode::BinaryAdd as u8, &[3, 4, 5], 0, None);
        let buf = to_code_buf(bytes);

        let v = decode(&buf, 0);
        assert_eq!(v.opcode, Opcode::BinaryAdd as u8);
        assert_eq!(v.num_regs, 3);
        assert_eq!(v.reg(&buf, 0), 3);
        assert_eq!(v.reg(&buf, 1), 4);
        assert_eq!(v.reg(&buf, 2), 5);
        assert_eq!(v.size as usize, buf.len());
    }

    #[test]
    fn test_varargs_roundtrip() {
        let mut bytes = Vec::new();
        encode(
            &mut bytes,
            Opcode::BuildTuple as u8,
            &[1, 2, 3, 9],
            3,
            None,
        );
        let buf = to_code_buf(bytes);

        let v = decode(&buf, 0);
        assert_eq!(v.num_regs, 4);
        assert_eq!(v.arg, 3);
        assert_eq!(v.reg(&buf, 3), 9);
        assert_eq!(v.size as usize, buf.len());
    }

    #[test]
    fn test_branch_label_patch() {
        let mut bytes = Vec::new();
        let label_at = encode(&mut bytes, Opcode::JumpAbsolute as u8, &[], 0, Some(0));
        patch_label(&mut bytes, label_at, 84);
        let buf = to_code_buf(bytes);

        let v = decode(&buf, 0);
        assert_eq!(v.label, 84);
        assert_eq!(v.size as usize, buf.len());
    }

    #[test]
    fn test_hint_patch_in_place() {
        let mut bytes = Vec::new();
        encode(&mut bytes, Opcode::LoadAttr as u8, &[0, 1], 2, None);
        let buf = to_code_buf(bytes);

        let v = decode(&buf, 0);
        assert_eq!(v.hint, 0);
        v.patch_hint(&buf, 7);
        let v2 = decode(&buf, 0);
        assert_eq!(v2.hint, 7);
        // Registers and arg are untouched by the patch.
        assert_eq!(v2.reg(&buf, 0), 0);
        assert_eq!(v2.reg(&buf, 1), 1);
        assert_eq!(v2.arg, 2);
    }

    #[test]
    fn test_consecutive_records_advance_linearly() {
        let mut bytes = Vec::new();
        encode(&mut bytes, Opcode::LoadFast as u8, &[0, 1], 0, None);
        let second = bytes.len();
        encode(&mut bytes, Opcode::ReturnValue as u8, &[1], 0, None);
        let buf = to_code_buf(bytes);

        let v = decode(&buf, 0);
        assert_eq!(v.size as usize, second);
        let v2 = decode(&buf, second);
        assert_eq!(v2.opcode, Opcode::ReturnValue as u8);
    }
}
