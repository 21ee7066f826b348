//! SSA intermediate representation.
//!
//! A lowered function is a control-flow graph of basic blocks. Each block
//! carries typed *block parameters* in place of phi nodes: every predecessor's
//! terminating branch passes one argument per parameter. Instructions are
//! three-address and produce fresh [`Value`]s; WebAssembly locals and other
//! mutable slots are modeled as [`Variable`]s that the builder resolves to the
//! reaching SSA value at each program point, materializing block parameters at
//! joins as needed (incremental SSA construction).

mod builder;
mod types;

pub use builder::{Function, FunctionBuilder};
pub use types::{
    Block, ExitCode, ExtLoadKind, FloatCC, FuncRef, Inst, InstrData, IntCC, SigRef, Signature,
    Type, Value, Variable,
};
