//! gneiss — ahead-of-time WebAssembly compiler frontend.
//!
//! This crate lowers validated WebAssembly function bodies to a block-parameter
//! SSA intermediate representation, one pass per function. The pipeline is:
//!
//! ```text
//! .wasm bytes
//!      │
//!      ├─[parser]────► ParsedModule   (sections via wasmparser; bodies kept
//!      │                               as raw bytes for the frontend)
//!      ├─[frontend]──► ModuleInfo     (resolved types / index space / memory)
//!      │                   │
//!      │                   └── per local function:
//!      │                         FunctionCompiler::lower_body()
//!      │                           └── per opcode: lower_opcode()
//!      └────────────► Vec<ssa::Function>
//! ```
//!
//! The frontend is a faithful non-optimizing lowering: it never folds,
//! reorders, or eliminates anything. Backends (instruction selection, register
//! allocation) and the executor consume the emitted SSA elsewhere.

pub mod frontend;
pub mod parser;
pub mod ssa;

// Re-export key types for convenience
pub use anyhow::{Context, Result};

/// Fatal errors surfaced by the frontend.
///
/// Traps (`unreachable`, bounds failures) are *not* errors: they are
/// instructions emitted into the IR and only take effect at runtime.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    /// The bytecode is malformed despite supposed validation (LEB overflow,
    /// truncated immediates). Only possible on corrupt input; surfaced rather
    /// than silenced so upstream bugs are detectable.
    #[error("malformed function body despite validation: {0}")]
    Internal(String),

    /// A valid Wasm opcode this frontend does not implement yet.
    #[error("unsupported opcode: {0}")]
    UnsupportedOpcode(String),

    /// The IR builder signaled a violation (e.g. resolving an undefined
    /// variable).
    #[error("IR builder violation: {0}")]
    Builder(String),
}

/// Lower every local function of a WebAssembly module to SSA.
///
/// This is the main entry point for the frontend pipeline. The module is
/// assumed validated; the frontend does not re-validate.
pub fn lower(wasm_bytes: &[u8]) -> Result<Vec<ssa::Function>> {
    let parsed = parser::parse_wasm(wasm_bytes).context("failed to parse WebAssembly module")?;
    let module =
        frontend::ModuleInfo::from_parsed(&parsed).context("failed to resolve module context")?;
    frontend::lower_module(&module).context("failed to lower module to SSA")
}
