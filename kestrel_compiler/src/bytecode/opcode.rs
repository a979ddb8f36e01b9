//! Opcode numbering and layout classification.
//!
//! Opcodes 0–146 reuse the host's stack-bytecode numbers so the dispatch
//! table can be shared with tooling that understands the stack form.
//! Opcodes 148–157 are register-VM private extensions.
//!
//! Every opcode falls into exactly one layout class, which determines how
//! its record is encoded (see [`super::instr`]):
//!
//! - fixed-arity (`RegOp<K>`) — the default
//! - variable-arity (`VarRegOp`) — calls, container builds, function builds
//! - branch (`BranchOp<K>`) — jumps, `FOR_ITER`, handler setup

/// Register bytecode opcodes.
///
/// Discriminants are the wire numbering and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    StopCode = 0,
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryConvert = 13,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    Slice = 30,
    StoreSlice = 40,
    DeleteSlice = 50,
    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceDivide = 58,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    PrintExpr = 70,
    PrintItem = 71,
    PrintNewline = 72,
    PrintItemTo = 73,
    PrintNewlineTo = 74,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanup = 81,
    LoadLocals = 82,
    ReturnValue = 83,
    ImportStar = 84,
    ExecStmt = 85,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    BuildClass = 89,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    ListAppend = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    DupTopx = 99,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    SetupWith = 143,
    ExtendedArg = 145,
    SetAdd = 146,
    MapAdd = 147,
    Incref = 148,
    Decref = 149,
    ConstIndex = 150,
    BinarySubscrList = 151,
    BinarySubscrDict = 152,
    StoreSubscrList = 153,
    StoreSubscrDict = 154,
    DictContains = 155,
    DictGet = 156,
    DictGetDefault = 157,
}

impl Opcode {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// True for opcodes whose record carries a 32-bit absolute label.
///
/// `SETUP_EXCEPT`/`SETUP_FINALLY` are not jumps, but their handler offset
/// is patched like a branch target, so they share the branch layout.
#[inline]
pub const fn is_branch(op: u8) -> bool {
    op == Opcode::ForIter as u8
        || op == Opcode::JumpIfFalseOrPop as u8
        || op == Opcode::JumpIfTrueOrPop as u8
        || op == Opcode::PopJumpIfFalse as u8
        || op == Opcode::PopJumpIfTrue as u8
        || op == Opcode::JumpAbsolute as u8
        || op == Opcode::JumpForward as u8
        || op == Opcode::BreakLoop as u8
        || op == Opcode::ContinueLoop as u8
        || op == Opcode::SetupExcept as u8
        || op == Opcode::SetupFinally as u8
}

/// True for opcodes encoded as variable-arity records.
#[inline]
pub const fn is_varargs(op: u8) -> bool {
    op == Opcode::CallFunction as u8
        || op == Opcode::CallFunctionVar as u8
        || op == Opcode::CallFunctionKw as u8
        || op == Opcode::CallFunctionVarKw as u8
        || op == Opcode::BuildTuple as u8
        || op == Opcode::BuildList as u8
        || op == Opcode::BuildSet as u8
        || op == Opcode::MakeFunction as u8
        || op == Opcode::MakeClosure as u8
}

/// True for opcodes whose hint slot is live (attribute inline cache).
#[inline]
pub const fn has_hint(op: u8) -> bool {
    op == Opcode::LoadAttr as u8
}

/// Wire name of an opcode number, for disassembly and diagnostics.
pub fn name(op: u8) -> &'static str {
    match op {
        0 => "STOP_CODE",
        1 => "POP_TOP",
        2 => "ROT_TWO",
        3 => "ROT_THREE",
        4 => "DUP_TOP",
        5 => "ROT_FOUR",
        9 => "NOP",
        10 => "UNARY_POSITIVE",
        11 => "UNARY_NEGATIVE",
        12 => "UNARY_NOT",
        13 => "UNARY_CONVERT",
        15 => "UNARY_INVERT",
        19 => "BINARY_POWER",
        20 => "BINARY_MULTIPLY",
        21 => "BINARY_DIVIDE",
        22 => "BINARY_MODULO",
        23 => "BINARY_ADD",
        24 => "BINARY_SUBTRACT",
        25 => "BINARY_SUBSCR",
        26 => "BINARY_FLOOR_DIVIDE",
        27 => "BINARY_TRUE_DIVIDE",
        28 => "INPLACE_FLOOR_DIVIDE",
        29 => "INPLACE_TRUE_DIVIDE",
        30..=33 => "SLICE",
        40..=43 => "STORE_SLICE",
        50..=53 => "DELETE_SLICE",
        54 => "STORE_MAP",
        55 => "INPLACE_ADD",
        56 => "INPLACE_SUBTRACT",
        57 => "INPLACE_MULTIPLY",
        58 => "INPLACE_DIVIDE",
        59 => "INPLACE_MODULO",
        60 => "STORE_SUBSCR",
        61 => "DELETE_SUBSCR",
        62 => "BINARY_LSHIFT",
        63 => "BINARY_RSHIFT",
        64 => "BINARY_AND",
        65 => "BINARY_XOR",
        66 => "BINARY_OR",
        67 => "INPLACE_POWER",
        68 => "GET_ITER",
        70 => "PRINT_EXPR",
        71 => "PRINT_ITEM",
        72 => "PRINT_NEWLINE",
        73 => "PRINT_ITEM_TO",
        74 => "PRINT_NEWLINE_TO",
        75 => "INPLACE_LSHIFT",
        76 => "INPLACE_RSHIFT",
        77 => "INPLACE_AND",
        78 => "INPLACE_XOR",
        79 => "INPLACE_OR",
        80 => "BREAK_LOOP",
        81 => "WITH_CLEANUP",
        82 => "LOAD_LOCALS",
        83 => "RETURN_VALUE",
        84 => "IMPORT_STAR",
        85 => "EXEC_STMT",
        86 => "YIELD_VALUE",
        87 => "POP_BLOCK",
        88 => "END_FINALLY",
        89 => "BUILD_CLASS",
        90 => "STORE_NAME",
        91 => "DELETE_NAME",
        92 => "UNPACK_SEQUENCE",
        93 => "FOR_ITER",
        94 => "LIST_APPEND",
        95 => "STORE_ATTR",
        96 => "DELETE_ATTR",
        97 => "STORE_GLOBAL",
        98 => "DELETE_GLOBAL",
        99 => "DUP_TOPX",
        100 => "LOAD_CONST",
        101 => "LOAD_NAME",
        102 => "BUILD_TUPLE",
        103 => "BUILD_LIST",
        104 => "BUILD_SET",
        105 => "BUILD_MAP",
        106 => "LOAD_ATTR",
        107 => "COMPARE_OP",
        108 => "IMPORT_NAME",
        109 => "IMPORT_FROM",
        110 => "JUMP_FORWARD",
        111 => "JUMP_IF_FALSE_OR_POP",
        112 => "JUMP_IF_TRUE_OR_POP",
        113 => "JUMP_ABSOLUTE",
        114 => "POP_JUMP_IF_FALSE",
        115 => "POP_JUMP_IF_TRUE",
        116 => "LOAD_GLOBAL",
        119 => "CONTINUE_LOOP",
        120 => "SETUP_LOOP",
        121 => "SETUP_EXCEPT",
        122 => "SETUP_FINALLY",
        124 => "LOAD_FAST",
        125 => "STORE_FAST",
        126 => "DELETE_FAST",
        130 => "RAISE_VARARGS",
        131 => "CALL_FUNCTION",
        132 => "MAKE_FUNCTION",
        133 => "BUILD_SLICE",
        134 => "MAKE_CLOSURE",
        135 => "LOAD_CLOSURE",
        136 => "LOAD_DEREF",
        137 => "STORE_DEREF",
        140 => "CALL_FUNCTION_VAR",
        141 => "CALL_FUNCTION_KW",
        142 => "CALL_FUNCTION_VAR_KW",
        143 => "SETUP_WITH",
        145 => "EXTENDED_ARG",
        146 => "SET_ADD",
        147 => "MAP_ADD",
        148 => "INCREF",
        149 => "DECREF",
        150 => "CONST_INDEX",
        151 => "BINARY_SUBSCR_LIST",
        152 => "BINARY_SUBSCR_DICT",
        153 => "STORE_SUBSCR_LIST",
        154 => "STORE_SUBSCR_DICT",
        155 => "DICT_CONTAINS",
        156 => "DICT_GET",
        157 => "DICT_GET_DEFAULT",
        _ => "INVALID_OP",
    }
}

/// Comparison operator codes carried in `COMPARE_OP`'s immediate argument.
pub mod cmp {
    pub const LT: u16 = 0;
    pub const LE: u16 = 1;
    pub const EQ: u16 = 2;
    pub const NE: u16 = 3;
    pub const GT: u16 = 4;
    pub const GE: u16 = 5;
    pub const IN: u16 = 6;
    pub const NOT_IN: u16 = 7;
    pub const IS: u16 = 8;
    pub const IS_NOT: u16 = 9;
    pub const EXC_MATCH: u16 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_numbering() {
        assert_eq!(Opcode::Incref as u8, 148);
        assert_eq!(Opcode::Decref as u8, 149);
        assert_eq!(Opcode::ConstIndex as u8, 150);
        assert_eq!(Opcode::DictGetDefault as u8, 157);
    }

    #[test]
    fn test_classification_is_disjoint() {
        for op in 0..=255u8 {
            assert!(
                !(is_branch(op) && is_varargs(op)),
                "opcode {op} classified as both branch and varargs"
            );
        }
    }

    #[test]
    fn test_names_for_known_opcodes() {
        assert_eq!(name(Opcode::BinaryAdd as u8), "BINARY_ADD");
        assert_eq!(name(Opcode::LoadAttr as u8), "LOAD_ATTR");
        assert_eq!(name(200), "INVALID_OP");
    }
}
