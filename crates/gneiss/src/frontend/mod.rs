//! WebAssembly-to-SSA lowering frontend.
//!
//! One pass, single-threaded per function: the [`FunctionCompiler`] walks a
//! validated raw function body with a [`cursor::BytecodeCursor`], simulating
//! the Wasm operand stack in SSA values and emitting instructions through a
//! [`crate::ssa::FunctionBuilder`]. Control flow is tracked with a stack of
//! control frames; join points receive SSA block parameters through the
//! builder's variable + seal protocol.
//!
//! | Module      | Responsibility                                        |
//! |-------------|-------------------------------------------------------|
//! | [`cursor`]  | Positional reader over the raw body (LEB128, floats)  |
//! | `state`     | Operand stack, control frames, unreachable tracking   |
//! | [`opcodes`] | Opcode byte constants and diagnostic names            |
//! | `lower`     | The per-opcode translation rules                      |

pub mod cursor;
mod lower;
pub mod opcodes;
mod state;

use anyhow::{bail, Context as _, Result};

use crate::parser::{ImportKind, ParsedModule};
use crate::ssa::{Function, FunctionBuilder, InstrData, SigRef, Type, Value, Variable};
use crate::FrontendError;
use cursor::BytecodeCursor;
use state::{ControlFrame, ControlFrameKind, LoweringState};

/// A Wasm-level function type: `(params) -> (results)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

/// A local (non-imported) function awaiting lowering.
#[derive(Debug, Clone)]
pub struct LocalFunction {
    /// Index into the type section.
    pub type_idx: u32,
    /// Declared locals, parameters excluded.
    pub locals: Vec<Type>,
    /// Raw body bytecode, terminating `end` included.
    pub body: Vec<u8>,
}

/// Resolved module context the frontend lowers against.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// The type section, lowered to IR types.
    pub types: Vec<FunctionType>,
    /// Type index of every function in the index space, imports first.
    pub func_type_indices: Vec<u32>,
    /// Imports occupy indices `0..num_imported_functions` of the index space.
    pub num_imported_functions: u32,
    /// Whether the module declares a (local) linear memory.
    pub has_memory: bool,
    /// Local function bodies, in code-section order.
    pub functions: Vec<LocalFunction>,
}

fn value_type(vt: wasmparser::ValType) -> Result<Type> {
    use wasmparser::ValType;
    match vt {
        ValType::I32 => Ok(Type::I32),
        ValType::I64 => Ok(Type::I64),
        ValType::F32 => Ok(Type::F32),
        ValType::F64 => Ok(Type::F64),
        other => bail!("unsupported value type: {other:?}"),
    }
}

impl ModuleInfo {
    /// Resolve a parsed module into the context the lowering needs.
    pub fn from_parsed(parsed: &ParsedModule) -> Result<ModuleInfo> {
        let mut types = Vec::with_capacity(parsed.types.len());
        for ty in &parsed.types {
            let params = ty
                .params()
                .iter()
                .map(|&vt| value_type(vt))
                .collect::<Result<Vec<_>>>()?;
            let results = ty
                .results()
                .iter()
                .map(|&vt| value_type(vt))
                .collect::<Result<Vec<_>>>()?;
            types.push(FunctionType { params, results });
        }

        let mut func_type_indices = Vec::new();
        for import in &parsed.imports {
            match import.kind {
                ImportKind::Function(type_idx) => func_type_indices.push(type_idx),
                ImportKind::Memory { .. } => {
                    bail!(
                        "imported memories are not supported ({}.{})",
                        import.module_name,
                        import.name
                    )
                }
                _ => {}
            }
        }
        for func in &parsed.functions {
            func_type_indices.push(func.type_idx);
        }

        let mut functions = Vec::with_capacity(parsed.functions.len());
        for func in &parsed.functions {
            let locals = func
                .locals
                .iter()
                .map(|&vt| value_type(vt))
                .collect::<Result<Vec<_>>>()?;
            functions.push(LocalFunction {
                type_idx: func.type_idx,
                locals,
                body: func.body.clone(),
            });
        }

        Ok(ModuleInfo {
            types,
            func_type_indices,
            num_imported_functions: parsed.num_imported_functions,
            has_memory: parsed.memory.is_some(),
            functions,
        })
    }

    /// The Wasm type of a function in the full index space.
    pub fn function_type(&self, func_idx: u32) -> Option<&FunctionType> {
        let type_idx = *self.func_type_indices.get(func_idx as usize)?;
        self.types.get(type_idx as usize)
    }
}

/// Byte offsets into the execution-context and module-context structures the
/// emitted code addresses. These mirror the runtime's layout: a 16-byte module
/// header, the imported-function table (16 bytes per entry: function pointer,
/// then callee module context pointer), then the local memory base and length
/// slots.
#[derive(Debug, Clone, Copy)]
pub struct ContextOffsets {
    num_imported_functions: u32,
}

impl ContextOffsets {
    /// Offset of `callerModuleContextPtr` within the execution context.
    pub const CALLER_MODULE_CONTEXT_PTR: u32 = 8;

    const IMPORTED_FUNCTIONS_BEGIN: u32 = 16;
    const IMPORTED_FUNCTION_SIZE: u32 = 16;

    pub fn new(num_imported_functions: u32) -> Self {
        Self {
            num_imported_functions,
        }
    }

    /// Offsets of an imported function's `(funcPtr, moduleCtxPtr)` pair within
    /// the module context.
    pub fn imported_function(&self, index: u32) -> (u32, u32) {
        let base = Self::IMPORTED_FUNCTIONS_BEGIN + Self::IMPORTED_FUNCTION_SIZE * index;
        (base, base + 8)
    }

    /// Offset of the local memory base pointer within the module context.
    pub fn local_memory_base(&self) -> u32 {
        Self::IMPORTED_FUNCTIONS_BEGIN + Self::IMPORTED_FUNCTION_SIZE * self.num_imported_functions
    }

    /// Offset of the local memory length within the module context.
    pub fn local_memory_len(&self) -> u32 {
        self.local_memory_base() + 8
    }
}

/// Lowers one function body to SSA.
///
/// Owns the builder, the lowering state, and the bytecode cursor for the
/// duration of one function; a fresh compiler is created per function, so
/// parallel callers share nothing.
pub struct FunctionCompiler<'a> {
    module: &'a ModuleInfo,
    offsets: ContextOffsets,
    builder: FunctionBuilder,
    state: LoweringState,
    cursor: BytecodeCursor<'a>,
    wasm_func_type: FunctionType,
    entry: crate::ssa::Block,
    /// Entry block parameters 0 and 1: the execution context and the current
    /// module context.
    exec_ctx_ptr: Value,
    module_ctx_ptr: Value,
    /// Wasm local index -> builder variable.
    local_vars: Vec<Variable>,
    /// Cached module-context loads, re-declared after calls.
    memory_base_var: Variable,
    memory_len_var: Variable,
    /// Lazily declared IR signatures, one slot per type-section entry.
    sig_refs: Vec<Option<SigRef>>,
}

impl<'a> FunctionCompiler<'a> {
    /// Seed the compiler for `func`: entry block with context pointers and
    /// parameters, locals materialized as variables, and the function-level
    /// control frame targeting the return block.
    pub fn new(module: &'a ModuleInfo, func: &'a LocalFunction) -> Result<Self, FrontendError> {
        let wasm_func_type = module
            .types
            .get(func.type_idx as usize)
            .cloned()
            .ok_or_else(|| {
                FrontendError::Internal(format!("type index {} out of range", func.type_idx))
            })?;

        let mut builder = FunctionBuilder::new(&wasm_func_type.results);
        let entry = builder.allocate_block();
        let exec_ctx_ptr = builder.append_block_param(entry, Type::I64);
        let module_ctx_ptr = builder.append_block_param(entry, Type::I64);
        let param_values: Vec<Value> = wasm_func_type
            .params
            .iter()
            .map(|&ty| builder.append_block_param(entry, ty))
            .collect();
        builder.set_current_block(entry);
        builder.seal(entry)?;

        // Parameters first, then declared locals (zero-initialized per the
        // Wasm spec), so local indices map straight onto `local_vars`.
        let mut local_vars = Vec::with_capacity(wasm_func_type.params.len() + func.locals.len());
        for (i, &ty) in wasm_func_type.params.iter().enumerate() {
            let var = builder.declare_variable(ty);
            builder.define_variable_in_current_bb(var, param_values[i]);
            local_vars.push(var);
        }
        for &ty in &func.locals {
            let var = builder.declare_variable(ty);
            let zero = match ty {
                Type::I32 => builder.insert(InstrData::Iconst32 { value: 0 }),
                Type::I64 => builder.insert(InstrData::Iconst64 { value: 0 }),
                Type::F32 => builder.insert(InstrData::F32const { value: 0.0 }),
                Type::F64 => builder.insert(InstrData::F64const { value: 0.0 }),
            };
            let zero = builder.first_result(zero);
            builder.define_variable_in_current_bb(var, zero);
            local_vars.push(var);
        }

        let memory_base_var = builder.declare_variable(Type::I64);
        let memory_len_var = builder.declare_variable(Type::I64);

        let mut state = LoweringState::default();
        state.ctrl_push(ControlFrame {
            kind: ControlFrameKind::Function,
            block_type: wasm_func_type.clone(),
            original_stack_len_without_param: 0,
            blk: None,
            following_block: builder.return_block(),
            cloned_args: Vec::new(),
        });

        Ok(Self {
            module,
            offsets: ContextOffsets::new(module.num_imported_functions),
            builder,
            state,
            cursor: BytecodeCursor::new(&func.body),
            wasm_func_type,
            entry,
            exec_ctx_ptr,
            module_ctx_ptr,
            local_vars,
            memory_base_var,
            memory_len_var,
            sig_refs: vec![None; module.types.len()],
        })
    }

    /// Drive the dispatcher over the whole body and freeze the SSA.
    pub fn lower_body(mut self) -> Result<Function, FrontendError> {
        while !self.cursor.done() {
            let op = self.cursor.read_opcode()?;
            self.lower_opcode(op)?;
        }
        Ok(self.builder.finish(self.entry))
    }

    fn local_var(&self, index: u32) -> Result<Variable, FrontendError> {
        self.local_vars.get(index as usize).copied().ok_or_else(|| {
            FrontendError::Internal(format!("local index {index} out of range"))
        })
    }

    /// The IR signature for a type-section entry, declared on first use. The
    /// machine-level signature prepends the execution and module context
    /// pointers to the Wasm parameters.
    fn signature_ref(&mut self, type_idx: u32) -> Result<SigRef, FrontendError> {
        let slot = self
            .sig_refs
            .get(type_idx as usize)
            .copied()
            .ok_or_else(|| {
                FrontendError::Internal(format!("type index {type_idx} out of range"))
            })?;
        if let Some(sig) = slot {
            return Ok(sig);
        }
        let ty = &self.module.types[type_idx as usize];
        let mut params = Vec::with_capacity(ty.params.len() + 2);
        params.push(Type::I64);
        params.push(Type::I64);
        params.extend_from_slice(&ty.params);
        let sig = self.builder.declare_signature(crate::ssa::Signature {
            params,
            results: ty.results.clone(),
        });
        self.sig_refs[type_idx as usize] = Some(sig);
        Ok(sig)
    }
}

/// Lower every local function of `module` to SSA, in index order.
pub fn lower_module(module: &ModuleInfo) -> Result<Vec<Function>> {
    let mut lowered = Vec::with_capacity(module.functions.len());
    for (i, func) in module.functions.iter().enumerate() {
        let compiler = FunctionCompiler::new(module, func)
            .with_context(|| format!("failed to seed lowering of function {i}"))?;
        let function = compiler
            .lower_body()
            .with_context(|| format!("failed to lower function {i}"))?;
        lowered.push(function);
    }
    Ok(lowered)
}
