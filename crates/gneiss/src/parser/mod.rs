//! WebAssembly module parser.
//!
//! This module wraps the `wasmparser` crate to extract the structure the
//! frontend needs from a `.wasm` binary: the type section, imports, the memory
//! declaration, and each local function's locals plus raw bytecode. Opcode
//! decoding is deliberately *not* done here — function bodies stay raw bytes
//! for the lowering frontend's cursor.

use anyhow::{Context, Result};
use wasmparser::{FuncType, Parser, Payload, TypeRef, ValType};

/// Memory declaration from the Wasm module.
#[derive(Debug, Clone)]
pub struct MemoryInfo {
    /// Initial page count (pages are 64 KiB).
    pub initial_pages: u32,

    /// Declared page limit, if the module states one.
    pub maximum_pages: Option<u32>,
}

/// An import from the host environment.
#[derive(Debug, Clone)]
pub struct ImportInfo {
    /// Namespace the import is resolved in (e.g. "env").
    pub module_name: String,
    /// Item name within that namespace.
    pub name: String,
    /// What is being imported.
    pub kind: ImportKind,
}

/// Shape of an imported item.
#[derive(Debug, Clone)]
pub enum ImportKind {
    /// Function import, carrying its type-section index.
    Function(u32),
    /// Global import.
    Global { val_type: ValType, mutable: bool },
    /// Memory import.
    Memory {
        initial_pages: u32,
        maximum_pages: Option<u32>,
    },
    /// Table import.
    Table {
        initial_size: u32,
        max_size: Option<u32>,
    },
}

/// One local function as it appears in the code section.
#[derive(Debug, Clone)]
pub struct ParsedFunction {
    /// Signature, as a type-section index.
    pub type_idx: u32,

    /// Flattened local declarations; parameters are not repeated here.
    pub locals: Vec<ValType>,

    /// Function body (raw Wasm bytecode, terminating `end` included)
    pub body: Vec<u8>,
}

/// Parsed WebAssembly module, reduced to what lowering needs.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    /// Function signatures from the type section.
    pub types: Vec<FuncType>,

    /// Local functions, in code-section order.
    pub functions: Vec<ParsedFunction>,

    /// The module's sole linear memory, when one is declared (Wasm MVP
    /// allows at most one).
    pub memory: Option<MemoryInfo>,

    /// Everything the module imports.
    pub imports: Vec<ImportInfo>,

    /// Count of imported functions; they occupy the low indices of the
    /// function index space, ahead of local functions.
    pub num_imported_functions: u32,
}

/// Split one code-section entry into its flattened local declarations and the
/// opcode stream that follows them.
fn split_code_entry(entry: wasmparser::FunctionBody, type_idx: u32) -> Result<ParsedFunction> {
    // Local declarations are run-length encoded as (count, type) pairs.
    let mut locals = Vec::new();
    for decl in entry
        .get_locals_reader()
        .context("bad locals declaration")?
    {
        let (run, ty) = decl.context("bad locals declaration")?;
        locals.extend(std::iter::repeat(ty).take(run as usize));
    }

    // Everything after the declarations is the opcode stream. Hand it over
    // untouched: the lowering cursor decodes it itself.
    let mut opcodes = entry
        .get_operators_reader()
        .context("locating the opcode stream")?
        .get_binary_reader();
    let len = opcodes.bytes_remaining();
    let body = opcodes
        .read_bytes(len)
        .context("slicing the opcode stream")?
        .to_vec();

    Ok(ParsedFunction {
        type_idx,
        locals,
        body,
    })
}

/// Parse a WebAssembly binary into a structured module.
pub fn parse_wasm(wasm_bytes: &[u8]) -> Result<ParsedModule> {
    let mut types = Vec::new();
    let mut declared_types: Vec<u32> = Vec::new(); // type index per local function
    let mut functions = Vec::new();
    let mut memory: Option<MemoryInfo> = None;
    let mut imports = Vec::new();

    for payload in Parser::new(0).parse_all(wasm_bytes) {
        match payload.context("parsing wasm payload")? {
            Payload::TypeSection(section) => {
                for group in section {
                    let group = group.context("malformed type section")?;
                    for sub_type in group.types() {
                        match &sub_type.composite_type.inner {
                            wasmparser::CompositeInnerType::Func(func_ty) => {
                                types.push(func_ty.clone());
                            }
                            _ => {
                                // GC proposal types (arrays, structs) play no
                                // role in the lowering; skip them.
                            }
                        }
                    }
                }
            }

            Payload::ImportSection(section) => {
                for entry in section {
                    let entry = entry.context("malformed import entry")?;
                    let kind = match entry.ty {
                        TypeRef::Func(ty) => ImportKind::Function(ty),
                        TypeRef::Memory(m) => ImportKind::Memory {
                            initial_pages: m.initial as u32,
                            maximum_pages: m.maximum.map(|max| max as u32),
                        },
                        TypeRef::Global(g) => ImportKind::Global {
                            val_type: g.content_type,
                            mutable: g.mutable,
                        },
                        TypeRef::Table(t) => ImportKind::Table {
                            initial_size: t.initial as u32,
                            max_size: t.maximum.map(|max| max as u32),
                        },
                        _ => continue,
                    };
                    imports.push(ImportInfo {
                        module_name: entry.module.to_string(),
                        name: entry.name.to_string(),
                        kind,
                    });
                }
            }

            Payload::FunctionSection(section) => {
                // One type index per local function, in code-section order.
                for idx in section {
                    declared_types.push(idx.context("malformed function section")?);
                }
            }

            Payload::CodeSectionEntry(entry) => {
                let type_idx = *declared_types
                    .get(functions.len())
                    .context("code entry without a function declaration")?;
                functions.push(split_code_entry(entry, type_idx)?);
            }

            Payload::MemorySection(section) => {
                // Only memory 0 matters; further memories belong to the
                // multi-memory proposal, which this model ignores.
                for mem in section.into_iter().take(1) {
                    let mem = mem.context("malformed memory declaration")?;
                    memory = Some(MemoryInfo {
                        initial_pages: mem.initial as u32,
                        maximum_pages: mem.maximum.map(|max| max as u32),
                    });
                }
            }

            _ => {}
        }
    }

    // Imports sit in front of local functions in the index space.
    let num_imported_functions = imports
        .iter()
        .filter(|import| matches!(import.kind, ImportKind::Function(_)))
        .count() as u32;

    Ok(ParsedModule {
        types,
        functions,
        memory,
        imports,
        num_imported_functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_module() {
        let wat = r#"
            (module)
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        assert_eq!(module.types.len(), 0);
        assert_eq!(module.functions.len(), 0);
    }

    #[test]
    fn parse_add_function_keeps_the_raw_body() {
        let wat = r#"
            (module
                (func (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add
                )
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.functions.len(), 1);
        assert!(module.memory.is_none());

        // local.get 0; local.get 1; i32.add; end
        assert_eq!(
            module.functions[0].body,
            vec![0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b]
        );
    }

    #[test]
    fn parse_locals_are_flattened() {
        let wat = r#"
            (module
                (func (param i32)
                    (local i32 i32 i64)
                )
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        assert_eq!(
            module.functions[0].locals,
            vec![ValType::I32, ValType::I32, ValType::I64]
        );
    }

    #[test]
    fn parse_memory_section() {
        let wat = r#"
            (module
                (memory 2 10)
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        let memory = module.memory.expect("module should have memory");
        assert_eq!(memory.initial_pages, 2);
        assert_eq!(memory.maximum_pages, Some(10));
    }

    #[test]
    fn parse_function_import() {
        let wat = r#"
            (module
                (import "env" "log" (func (param i32)))
                (func (result i32)
                    i32.const 42
                )
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();

        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].module_name, "env");
        assert_eq!(module.imports[0].name, "log");
        match &module.imports[0].kind {
            ImportKind::Function(type_idx) => assert_eq!(*type_idx, 0),
            _ => panic!("Expected function import"),
        }

        assert_eq!(module.num_imported_functions, 1);
        assert_eq!(module.functions.len(), 1);
    }
}
