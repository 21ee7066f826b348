//! SSA type definitions.
//!
//! Handles are dense newtype indices into the arenas owned by
//! [`FunctionBuilder`](super::FunctionBuilder); instruction payloads are plain
//! data so the frontend can be tested by matching on emitted instructions.

use std::fmt;

/// Value types of the IR (the four WebAssembly number types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
        }
    }
}

/// An SSA definition: a dense identifier plus its type tag.
/// Values are immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    idx: u32,
    ty: Type,
}

impl Value {
    pub(super) fn new(idx: u32, ty: Type) -> Self {
        Self { idx, ty }
    }

    /// The type this value was defined with.
    pub fn ty(self) -> Type {
        self.ty
    }

    /// Dense index of this value.
    pub fn index(self) -> u32 {
        self.idx
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.idx)
    }
}

/// Unique identifier for a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block(pub(super) u32);

impl Block {
    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk{}", self.0)
    }
}

/// Unique identifier for an inserted instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inst(pub(super) u32);

impl Inst {
    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A symbolic slot resolved to the reaching SSA value at each program point.
/// Used for WebAssembly locals and for cached module-context loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable(pub(super) u32);

impl Variable {
    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

/// Reference to a signature registered with the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigRef(pub(super) u32);

impl SigRef {
    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Reference to a function in the module's function index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef(pub u32);

impl fmt::Display for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// A call signature at the IR level (machine-level parameters included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

/// Integer compare conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCC {
    Equal,
    NotEqual,
    SignedLessThan,
    UnsignedLessThan,
    SignedGreaterThan,
    UnsignedGreaterThan,
    SignedLessThanOrEqual,
    UnsignedLessThanOrEqual,
    SignedGreaterThanOrEqual,
    UnsignedGreaterThanOrEqual,
}

impl fmt::Display for IntCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntCC::Equal => "eq",
            IntCC::NotEqual => "ne",
            IntCC::SignedLessThan => "slt",
            IntCC::UnsignedLessThan => "ult",
            IntCC::SignedGreaterThan => "sgt",
            IntCC::UnsignedGreaterThan => "ugt",
            IntCC::SignedLessThanOrEqual => "sle",
            IntCC::UnsignedLessThanOrEqual => "ule",
            IntCC::SignedGreaterThanOrEqual => "sge",
            IntCC::UnsignedGreaterThanOrEqual => "uge",
        };
        f.write_str(s)
    }
}

/// Float compare conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatCC {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
}

impl fmt::Display for FloatCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FloatCC::Equal => "eq",
            FloatCC::NotEqual => "ne",
            FloatCC::LessThan => "lt",
            FloatCC::GreaterThan => "gt",
            FloatCC::LessThanOrEqual => "le",
            FloatCC::GreaterThanOrEqual => "ge",
        };
        f.write_str(s)
    }
}

/// Exit codes carried by trap instructions. The executor maps these to the
/// corresponding runtime trap; the frontend only emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Unreachable,
    MemoryOutOfBounds,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCode::Unreachable => write!(f, "unreachable"),
            ExitCode::MemoryOutOfBounds => write!(f, "memory_out_of_bounds"),
        }
    }
}

/// Kind of a sign/zero-extending sub-word load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtLoadKind {
    Sload8,
    Uload8,
    Sload16,
    Uload16,
    Sload32,
    Uload32,
}

impl fmt::Display for ExtLoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtLoadKind::Sload8 => "sload8",
            ExtLoadKind::Uload8 => "uload8",
            ExtLoadKind::Sload16 => "sload16",
            ExtLoadKind::Uload16 => "uload16",
            ExtLoadKind::Sload32 => "sload32",
            ExtLoadKind::Uload32 => "uload32",
        };
        f.write_str(s)
    }
}

/// Instruction payloads.
///
/// Branch payloads (`Jump`, `Brz`, `Brnz`) carry block arguments matching the
/// target's block parameters; the builder appends further arguments when
/// sealing introduces parameters on the target.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrData {
    /// 32-bit integer constant (bit pattern).
    Iconst32 { value: u32 },
    /// 64-bit integer constant (bit pattern).
    Iconst64 { value: u64 },
    /// 32-bit float constant.
    F32const { value: f32 },
    /// 64-bit float constant.
    F64const { value: f64 },

    /// Integer add (width follows the operands).
    Iadd { x: Value, y: Value },
    Isub { x: Value, y: Value },
    Imul { x: Value, y: Value },
    /// Shift left.
    Ishl { x: Value, y: Value },
    /// Logical shift right.
    Ushr { x: Value, y: Value },
    /// Arithmetic shift right.
    Sshr { x: Value, y: Value },

    Fadd { x: Value, y: Value },
    Fsub { x: Value, y: Value },
    Fmul { x: Value, y: Value },
    Fdiv { x: Value, y: Value },
    Fmin { x: Value, y: Value },
    Fmax { x: Value, y: Value },

    /// Integer compare producing an i32 boolean.
    Icmp { x: Value, y: Value, cond: IntCC },
    /// Float compare producing an i32 boolean.
    Fcmp { x: Value, y: Value, cond: FloatCC },

    /// Integer sign/zero extension from `from_bits` to `to_bits`.
    Extend {
        value: Value,
        signed: bool,
        from_bits: u8,
        to_bits: u8,
    },

    /// Full-width typed load from `base + offset`.
    Load { base: Value, offset: u32, ty: Type },
    /// Sub-word load, extended to i64 when `to_64` is set, i32 otherwise.
    ExtLoad {
        kind: ExtLoadKind,
        base: Value,
        offset: u32,
        to_64: bool,
    },
    /// Full-width typed store to `base + offset`.
    Store {
        value: Value,
        base: Value,
        offset: u32,
        ty: Type,
    },
    /// Narrowing integer store of the low `width_bits` bits.
    NarrowStore {
        value: Value,
        base: Value,
        offset: u32,
        width_bits: u8,
    },

    /// Unconditional jump with block arguments.
    Jump { args: Vec<Value>, target: Block },
    /// Branch to `target` when `cond` is zero; fall through otherwise.
    Brz {
        cond: Value,
        args: Vec<Value>,
        target: Block,
    },
    /// Branch to `target` when `cond` is non-zero; fall through otherwise.
    Brnz {
        cond: Value,
        args: Vec<Value>,
        target: Block,
    },

    /// Direct call. `args` includes the machine-level context pointers.
    Call {
        func: FuncRef,
        sig: SigRef,
        args: Vec<Value>,
    },
    /// Indirect call through a function pointer value.
    CallIndirect {
        func_ptr: Value,
        sig: SigRef,
        args: Vec<Value>,
    },

    /// Return from the function with the given values.
    Return { values: Vec<Value> },

    /// Unconditional trap with an exit code.
    Exit { exec_ctx: Value, code: ExitCode },
    /// Trap with an exit code when `cond` is non-zero.
    ExitIfNonzero {
        cond: Value,
        exec_ctx: Value,
        code: ExitCode,
    },
}

impl InstrData {
    /// The branch target of this instruction, if it is a branch.
    pub fn branch_target(&self) -> Option<Block> {
        match self {
            InstrData::Jump { target, .. }
            | InstrData::Brz { target, .. }
            | InstrData::Brnz { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// The block arguments of this instruction, if it is a branch.
    pub fn branch_args(&self) -> Option<&[Value]> {
        match self {
            InstrData::Jump { args, .. }
            | InstrData::Brz { args, .. }
            | InstrData::Brnz { args, .. } => Some(args),
            _ => None,
        }
    }
}
