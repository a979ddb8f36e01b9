//! Code builder: emission API with labels and pooled constants/names.
//!
//! The builder enforces the register-file partition at construction time:
//! constants are declared first (register `i` = constant `i`), then named
//! locals (parameters first), then anonymous temporaries. Branch targets
//! are labels resolved when the code is finished.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::code::{Literal, RegisterCode};
use super::instr;
use super::opcode::{self, Opcode};

/// A branch target; bind with [`CodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

/// Key for constant-pool deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    None,
    Bool(bool),
    Int(i64),
    /// Bit pattern, for exact float comparison.
    Float(u64),
    Str(Arc<str>),
}

/// Builder for one [`RegisterCode`] unit.
pub struct CodeBuilder {
    name: Arc<str>,
    code: Vec<u8>,

    consts: Vec<Literal>,
    const_map: FxHashMap<ConstKey, u16>,

    names: Vec<Arc<str>>,
    name_map: FxHashMap<Arc<str>, u16>,

    varnames: Vec<Arc<str>>,
    cellvars: Vec<Arc<str>>,
    freevars: Vec<Arc<str>>,
    arg_count: u16,

    /// Temporaries allocated past the constant and local regions.
    num_temps: u16,
    /// Set once locals/temps exist; constants are frozen from then on.
    regions_frozen: bool,

    labels: Vec<Option<u32>>,
    forward_refs: Vec<(usize, Label)>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            code: Vec::new(),
            consts: Vec::new(),
            const_map: FxHashMap::default(),
            names: Vec::new(),
            name_map: FxHashMap::default(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            arg_count: 0,
            num_temps: 0,
            regions_frozen: false,
            labels: Vec::new(),
            forward_refs: Vec::new(),
        }
    }

    // =========================================================================
    // Register regions
    // =========================================================================

    /// Declare a constant, returning the register that aliases it.
    ///
    /// Identical constants share a register. Must precede local and
    /// temporary declarations: the constant region comes first in the file.
    pub fn const_(&mut self, lit: Literal) -> u16 {
        assert!(
            !self.regions_frozen,
            "constants must be declared before locals and temporaries"
        );
        let key = match &lit {
            Literal::None => ConstKey::None,
            Literal::True => ConstKey::Bool(true),
            Literal::False => ConstKey::Bool(false),
            Literal::Int(i) => ConstKey::Int(*i),
            Literal::Float(f) => ConstKey::Float(f.to_bits()),
            Literal::Str(s) => ConstKey::Str(s.clone()),
            // Code constants are never shared.
            Literal::Code(_) => {
                let reg = self.consts.len() as u16;
                self.consts.push(lit);
                return reg;
            }
        };
        if let Some(&reg) = self.const_map.get(&key) {
            return reg;
        }
        let reg = self.consts.len() as u16;
        self.consts.push(lit);
        self.const_map.insert(key, reg);
        reg
    }

    pub fn const_int(&mut self, v: i64) -> u16 {
        self.const_(Literal::Int(v))
    }

    pub fn const_str(&mut self, s: impl Into<Arc<str>>) -> u16 {
        self.const_(Literal::Str(s.into()))
    }

    pub fn const_none(&mut self) -> u16 {
        self.const_(Literal::None)
    }

    /// Declare a positional parameter, returning its register.
    pub fn param(&mut self, name: impl Into<Arc<str>>) -> u16 {
        assert_eq!(
            self.arg_count as usize,
            self.varnames.len(),
            "parameters must precede other locals"
        );
        self.arg_count += 1;
        self.local(name)
    }

    /// Declare a named local variable, returning its register.
    pub fn local(&mut self, name: impl Into<Arc<str>>) -> u16 {
        assert_eq!(self.num_temps, 0, "locals must precede temporaries");
        self.regions_frozen = true;
        let reg = (self.consts.len() + self.varnames.len()) as u16;
        self.varnames.push(name.into());
        reg
    }

    /// Allocate an anonymous temporary register.
    pub fn temp(&mut self) -> u16 {
        self.regions_frozen = true;
        let reg = (self.consts.len() + self.varnames.len()) as u16 + self.num_temps;
        self.num_temps += 1;
        reg
    }

    /// Declare a cell variable, returning its index in the cell array.
    pub fn cellvar(&mut self, name: impl Into<Arc<str>>) -> u16 {
        assert!(self.freevars.is_empty(), "cell-vars must precede free-vars");
        let idx = self.cellvars.len() as u16;
        self.cellvars.push(name.into());
        idx
    }

    /// Declare a free variable, returning its index in the cell array.
    pub fn freevar(&mut self, name: impl Into<Arc<str>>) -> u16 {
        let idx = (self.cellvars.len() + self.freevars.len()) as u16;
        self.freevars.push(name.into());
        idx
    }

    /// Intern a global/attribute name, returning its name-table index.
    pub fn name(&mut self, name: impl Into<Arc<str>>) -> u16 {
        let name = name.into();
        if let Some(&idx) = self.name_map.get(&name) {
            return idx;
        }
        let idx = self.names.len() as u16;
        self.names.push(name.clone());
        self.name_map.insert(name, idx);
        idx
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Byte offset the next record will start at.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn emit(&mut self, op: Opcode, regs: &[u16], arg: u16) {
        debug_assert!(!opcode::is_branch(op.as_u8()));
        instr::encode(&mut self.code, op.as_u8(), regs, arg, None);
    }

    pub fn emit_branch(&mut self, op: Opcode, regs: &[u16], arg: u16, target: Label) {
        debug_assert!(opcode::is_branch(op.as_u8()));
        let label_at = instr::encode(&mut self.code, op.as_u8(), regs, arg, Some(0));
        match self.labels[target.0 as usize] {
            Some(off) => instr::patch_label(&mut self.code, label_at, off),
            None => self.forward_refs.push((label_at, target)),
        }
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind a label to the current offset.
    pub fn bind(&mut self, label: Label) {
        debug_assert!(self.labels[label.0 as usize].is_none(), "label bound twice");
        self.labels[label.0 as usize] = Some(self.offset());
    }

    // A few high-traffic shorthands; everything else goes through `emit`.

    pub fn emit_move(&mut self, src: u16, dst: u16) {
        self.emit(Opcode::LoadFast, &[src, dst], 0);
    }

    pub fn emit_return(&mut self, reg: u16) {
        self.emit(Opcode::ReturnValue, &[reg], 0);
    }

    pub fn emit_jump(&mut self, target: Label) {
        self.emit_branch(Opcode::JumpAbsolute, &[], 0, target);
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// Resolve forward references and seal the code object.
    pub fn finish(mut self) -> Arc<RegisterCode> {
        for (label_at, label) in std::mem::take(&mut self.forward_refs) {
            let off = self.labels[label.0 as usize]
                .expect("unbound label at finish");
            instr::patch_label(&mut self.code, label_at, off);
        }

        let num_registers =
            (self.consts.len() + self.varnames.len()) as u16 + self.num_temps;

        Arc::new(RegisterCode {
            name: self.name,
            instructions: instr::to_code_buf(self.code),
            consts: self.consts.into_boxed_slice(),
            names: self.names.into_boxed_slice(),
            varnames: self.varnames.into_boxed_slice(),
            cellvars: self.cellvars.into_boxed_slice(),
            freevars: self.freevars.into_boxed_slice(),
            arg_count: self.arg_count,
            num_registers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_regions() {
        let mut b = CodeBuilder::new("f");
        let c0 = b.const_int(0);
        let c1 = b.const_int(1);
        let p = b.param("n");
        let t = b.temp();

        assert_eq!(c0, 0);
        assert_eq!(c1, 1);
        assert_eq!(p, 2);
        assert_eq!(t, 3);

        b.emit_return(p);
        let code = b.finish();
        assert_eq!(code.num_registers, 4);
        assert_eq!(code.arg_count, 1);
        assert_eq!(code.num_consts(), 2);
    }

    #[test]
    fn test_constant_dedup() {
        let mut b = CodeBuilder::new("f");
        let a = b.const_int(7);
        let c = b.const_int(7);
        let d = b.const_int(8);
        assert_eq!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let mut b = CodeBuilder::new("f");
        let r = b.const_none();

        let top = b.label();
        let done = b.label();
        b.bind(top);
        let top_off = b.offset();
        b.emit_branch(Opcode::JumpAbsolute, &[], 0, done); // forward
        b.emit_branch(Opcode::JumpAbsolute, &[], 0, top); // backward
        b.bind(done);
        let done_off = b.offset();
        b.emit_return(r);
        let code = b.finish();

        let v = instr::decode(&code.instructions, top_off as usize);
        assert_eq!(v.label, done_off);
        let v2 = instr::decode(&code.instructions, (top_off + v.size) as usize);
        assert_eq!(v2.label, top_off);
    }

    #[test]
    #[should_panic(expected = "constants must be declared")]
    fn test_constant_after_local_panics() {
        let mut b = CodeBuilder::new("f");
        b.local("x");
        b.const_int(1);
    }
}
