//! Per-opcode translation rules.
//!
//! Universal rule: while `unreachable` is set, every opcode except
//! `block`/`loop`/`if`/`else`/`end` still consumes its immediates but emits no
//! SSA and leaves the value stack alone. The control opcodes carry their own
//! unreachable handling, tracked by `unreachable_depth` for constructs opened
//! inside an unreachable region.

use super::opcodes as op;
use super::state::{ControlFrame, ControlFrameKind};
use super::FunctionCompiler;
use crate::ssa::{Block, ExitCode, ExtLoadKind, FloatCC, FuncRef, InstrData, IntCC, Type, Value};
use crate::FrontendError;

fn ext_load(kind: ExtLoadKind, base: Value, offset: u32, to_64: bool) -> InstrData {
    InstrData::ExtLoad {
        kind,
        base,
        offset,
        to_64,
    }
}

impl FunctionCompiler<'_> {
    /// Translate a single opcode; its immediates are consumed from the cursor.
    pub(super) fn lower_opcode(&mut self, opcode: u8) -> Result<(), FrontendError> {
        match opcode {
            // === Constants ===
            op::I32_CONST => {
                let value = self.cursor.read_s32_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let inst = self.builder.insert(InstrData::Iconst32 {
                    value: value as u32,
                });
                let value = self.builder.first_result(inst);
                self.state.push(value);
            }
            op::I64_CONST => {
                let value = self.cursor.read_s64_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let inst = self.builder.insert(InstrData::Iconst64 {
                    value: value as u64,
                });
                let value = self.builder.first_result(inst);
                self.state.push(value);
            }
            op::F32_CONST => {
                let value = self.cursor.read_f32()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let inst = self.builder.insert(InstrData::F32const { value });
                let value = self.builder.first_result(inst);
                self.state.push(value);
            }
            op::F64_CONST => {
                let value = self.cursor.read_f64()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let inst = self.builder.insert(InstrData::F64const { value });
                let value = self.builder.first_result(inst);
                self.state.push(value);
            }

            // === Integer arithmetic (same IR op for both widths) ===
            op::I32_ADD | op::I64_ADD => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Iadd { x, y })?;
            }
            op::I32_SUB | op::I64_SUB => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Isub { x, y })?;
            }
            op::I32_MUL | op::I64_MUL => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Imul { x, y })?;
            }
            op::I32_SHL | op::I64_SHL => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Ishl { x, y })?;
            }
            op::I32_SHR_U | op::I64_SHR_U => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Ushr { x, y })?;
            }
            op::I32_SHR_S | op::I64_SHR_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Sshr { x, y })?;
            }

            // === Float arithmetic ===
            op::F32_ADD | op::F64_ADD => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Fadd { x, y })?;
            }
            op::F32_SUB | op::F64_SUB => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Fsub { x, y })?;
            }
            op::F32_MUL | op::F64_MUL => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Fmul { x, y })?;
            }
            op::F32_DIV | op::F64_DIV => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Fdiv { x, y })?;
            }
            op::F32_MIN | op::F64_MIN => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Fmin { x, y })?;
            }
            op::F32_MAX | op::F64_MAX => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_binop(|x, y| InstrData::Fmax { x, y })?;
            }

            // === Integer comparisons ===
            op::I32_EQ | op::I64_EQ => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::Equal)?;
            }
            op::I32_NE | op::I64_NE => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::NotEqual)?;
            }
            op::I32_LT_S | op::I64_LT_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::SignedLessThan)?;
            }
            op::I32_LT_U | op::I64_LT_U => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::UnsignedLessThan)?;
            }
            op::I32_GT_S | op::I64_GT_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::SignedGreaterThan)?;
            }
            op::I32_GT_U | op::I64_GT_U => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::UnsignedGreaterThan)?;
            }
            op::I32_LE_S | op::I64_LE_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::SignedLessThanOrEqual)?;
            }
            op::I32_LE_U | op::I64_LE_U => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::UnsignedLessThanOrEqual)?;
            }
            op::I32_GE_S | op::I64_GE_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::SignedGreaterThanOrEqual)?;
            }
            op::I32_GE_U | op::I64_GE_U => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_icmp(IntCC::UnsignedGreaterThanOrEqual)?;
            }

            // === Float comparisons ===
            op::F32_EQ | op::F64_EQ => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_fcmp(FloatCC::Equal)?;
            }
            op::F32_NE | op::F64_NE => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_fcmp(FloatCC::NotEqual)?;
            }
            op::F32_LT | op::F64_LT => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_fcmp(FloatCC::LessThan)?;
            }
            op::F32_GT | op::F64_GT => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_fcmp(FloatCC::GreaterThan)?;
            }
            op::F32_LE | op::F64_LE => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_fcmp(FloatCC::LessThanOrEqual)?;
            }
            op::F32_GE | op::F64_GE => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_fcmp(FloatCC::GreaterThanOrEqual)?;
            }

            // === Sign/zero extensions ===
            op::I64_EXTEND_I32_S | op::I64_EXTEND32_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_integer_extend(true, 32, 64)?;
            }
            op::I64_EXTEND_I32_U => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_integer_extend(false, 32, 64)?;
            }
            op::I32_EXTEND8_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_integer_extend(true, 8, 32)?;
            }
            op::I32_EXTEND16_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_integer_extend(true, 16, 32)?;
            }
            op::I64_EXTEND8_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_integer_extend(true, 8, 64)?;
            }
            op::I64_EXTEND16_S => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.insert_integer_extend(true, 16, 64)?;
            }

            // === Locals ===
            op::LOCAL_GET => {
                let index = self.cursor.read_u32_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let var = self.local_var(index)?;
                let value = self.builder.must_find_value(var)?;
                self.state.push(value);
            }
            op::LOCAL_SET => {
                let index = self.cursor.read_u32_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let var = self.local_var(index)?;
                let value = self.state.pop()?;
                self.builder.define_variable_in_current_bb(var, value);
            }
            op::LOCAL_TEE => {
                let index = self.cursor.read_u32_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let var = self.local_var(index)?;
                let value = self.state.peek()?;
                self.builder.define_variable_in_current_bb(var, value);
            }

            // === Memory access ===
            op::I32_LOAD
            | op::I64_LOAD
            | op::F32_LOAD
            | op::F64_LOAD
            | op::I32_LOAD8_S
            | op::I32_LOAD8_U
            | op::I32_LOAD16_S
            | op::I32_LOAD16_U
            | op::I64_LOAD8_S
            | op::I64_LOAD8_U
            | op::I64_LOAD16_S
            | op::I64_LOAD16_U
            | op::I64_LOAD32_S
            | op::I64_LOAD32_U => {
                let (_align, offset) = self.cursor.read_mem_arg()?;
                if self.state.unreachable {
                    return Ok(());
                }
                self.lower_load(opcode, offset)?;
            }
            op::I32_STORE
            | op::I64_STORE
            | op::F32_STORE
            | op::F64_STORE
            | op::I32_STORE8
            | op::I32_STORE16
            | op::I64_STORE8
            | op::I64_STORE16
            | op::I64_STORE32 => {
                let (_align, offset) = self.cursor.read_mem_arg()?;
                if self.state.unreachable {
                    return Ok(());
                }
                self.lower_store(opcode, offset)?;
            }

            // === Structured control flow ===
            op::BLOCK => {
                // No block is allocated for the body: straight-line code
                // continues in the current block and the following block is
                // only entered at `end`.
                let bt = self.cursor.read_block_type(&self.module.types)?;
                if self.state.unreachable {
                    self.state.unreachable_depth += 1;
                    return Ok(());
                }
                let following_block = self.builder.allocate_block();
                self.add_block_params(&bt.results, following_block);
                let original = self.frame_base(bt.params.len())?;
                self.state.ctrl_push(ControlFrame {
                    kind: ControlFrameKind::Block,
                    original_stack_len_without_param: original,
                    blk: None,
                    following_block,
                    block_type: bt,
                    cloned_args: Vec::new(),
                });
            }
            op::LOOP => {
                let bt = self.cursor.read_block_type(&self.module.types)?;
                if self.state.unreachable {
                    self.state.unreachable_depth += 1;
                    return Ok(());
                }
                let loop_header = self.builder.allocate_block();
                let after_loop = self.builder.allocate_block();
                self.add_block_params(&bt.params, loop_header);
                self.add_block_params(&bt.results, after_loop);
                let original = self.frame_base(bt.params.len())?;
                self.state.ctrl_push(ControlFrame {
                    kind: ControlFrameKind::Loop,
                    original_stack_len_without_param: original,
                    blk: Some(loop_header),
                    following_block: after_loop,
                    block_type: bt,
                    cloned_args: Vec::new(),
                });

                let args = self.state.values[original..].to_vec();
                self.builder.insert(InstrData::Jump {
                    args,
                    target: loop_header,
                });

                // The header is *not* sealed here: back-edges from `br`/`br_if`
                // inside the loop will add predecessors until the matching
                // `end`.
                self.switch_to(original, loop_header);
            }
            op::IF => {
                let bt = self.cursor.read_block_type(&self.module.types)?;
                if self.state.unreachable {
                    self.state.unreachable_depth += 1;
                    return Ok(());
                }
                let cond = self.state.pop()?;
                let then_blk = self.builder.allocate_block();
                let else_blk = self.builder.allocate_block();
                let following_block = self.builder.allocate_block();

                // The if/else params are not promoted to SSA block parameters:
                // their definitions are unique on each branch. Only the join
                // after if-then-else can see multiple definitions.
                self.add_block_params(&bt.results, following_block);

                let original = self.frame_base(bt.params.len())?;
                let cloned_args = self.state.values[original..].to_vec();

                self.builder.insert(InstrData::Brz {
                    cond,
                    args: Vec::new(),
                    target: else_blk,
                });
                self.builder.insert(InstrData::Jump {
                    args: Vec::new(),
                    target: then_blk,
                });

                self.state.ctrl_push(ControlFrame {
                    kind: ControlFrameKind::IfWithoutElse,
                    original_stack_len_without_param: original,
                    blk: Some(else_blk),
                    following_block,
                    block_type: bt,
                    cloned_args,
                });

                self.builder.set_current_block(then_blk);

                // Then and else have exactly one predecessor each.
                self.builder.seal(then_blk)?;
                self.builder.seal(else_blk)?;
            }
            op::ELSE => {
                if self.state.unreachable && self.state.unreachable_depth > 0 {
                    // This else belongs to an `if` opened inside an unreachable
                    // region; no frame was materialized for it.
                    return Ok(());
                }
                let (following_block, results_len, original, else_blk, cloned_args) = {
                    let frame = self.state.ctrl_peek_mut(0)?;
                    frame.kind = ControlFrameKind::IfWithElse;
                    (
                        frame.following_block,
                        frame.block_type.results.len(),
                        frame.original_stack_len_without_param,
                        frame.blk.expect("if frame carries its else block"),
                        frame.cloned_args.clone(),
                    )
                };
                if !self.state.unreachable {
                    // The then branch falls through to the join.
                    let args = self.state.peek_n(results_len)?;
                    self.builder.insert(InstrData::Jump {
                        args,
                        target: following_block,
                    });
                } else {
                    // The else branch starts with fresh reachability.
                    self.state.unreachable = false;
                }
                self.state.values.truncate(original);
                for arg in cloned_args {
                    self.state.push(arg);
                }
                self.builder.set_current_block(else_blk);
            }
            op::END => {
                if self.state.unreachable && self.state.unreachable_depth > 0 {
                    self.state.unreachable_depth -= 1;
                    return Ok(());
                }
                let frame = self.state.ctrl_pop()?;
                let following_block = frame.following_block;

                if !self.state.unreachable {
                    let args = self.state.peek_n(frame.block_type.results.len())?;
                    self.builder.insert(InstrData::Jump {
                        args,
                        target: following_block,
                    });
                } else {
                    self.state.unreachable = false;
                }

                match frame.kind {
                    ControlFrameKind::Function => {
                        // The very end of the function body.
                        return Ok(());
                    }
                    ControlFrameKind::Loop => {
                        // Every back-edge targeting the header exists by now.
                        let header = frame.blk.expect("loop frame carries its header block");
                        self.builder.seal(header)?;
                    }
                    ControlFrameKind::IfWithoutElse => {
                        // The else side was never emitted; synthesize the empty
                        // branch. Validation guarantees params == results for
                        // if-without-else, so the cloned arguments are exactly
                        // the values the join expects.
                        let else_blk = frame.blk.expect("if frame carries its else block");
                        self.builder.set_current_block(else_blk);
                        self.builder.insert(InstrData::Jump {
                            args: frame.cloned_args.clone(),
                            target: following_block,
                        });
                    }
                    ControlFrameKind::Block | ControlFrameKind::IfWithElse => {}
                }

                self.builder.seal(following_block)?;
                self.switch_to(frame.original_stack_len_without_param, following_block);
            }
            op::BR => {
                let label = self.cursor.read_u32_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let (target, arg_count) = self.branch_target(label)?;
                let args = self.state.peek_n(arg_count)?;
                self.builder.insert(InstrData::Jump { args, target });
                self.state.unreachable = true;
            }
            op::BR_IF => {
                let label = self.cursor.read_u32_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                let cond = self.state.pop()?;
                let (target, arg_count) = self.branch_target(label)?;
                let args = self.state.peek_n(arg_count)?;
                self.builder.insert(InstrData::Brnz { cond, args, target });

                // Straight-line successor for the not-taken path.
                let fallthrough = self.builder.allocate_block();
                self.builder.insert(InstrData::Jump {
                    args: Vec::new(),
                    target: fallthrough,
                });
                self.builder.seal(fallthrough)?;
                self.builder.set_current_block(fallthrough);
            }
            op::RETURN => {
                if self.state.unreachable {
                    return Ok(());
                }
                let values = self.state.peek_n(self.wasm_func_type.results.len())?;
                self.builder.insert(InstrData::Return { values });
                self.state.unreachable = true;
            }
            op::UNREACHABLE => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.builder.insert(InstrData::Exit {
                    exec_ctx: self.exec_ctx_ptr,
                    code: ExitCode::Unreachable,
                });
                self.state.unreachable = true;
            }

            op::CALL => {
                let fn_index = self.cursor.read_u32_leb()?;
                if self.state.unreachable {
                    return Ok(());
                }
                self.lower_call(fn_index)?;
            }

            op::DROP => {
                if self.state.unreachable {
                    return Ok(());
                }
                self.state.pop()?;
            }
            op::NOP => {}

            other => {
                return Err(FrontendError::UnsupportedOpcode(op::name(other)));
            }
        }

        Ok(())
    }

    // === Emit helpers ===

    /// Pop `y` then `x` (the stack top is the right operand), emit, push.
    fn insert_binop(
        &mut self,
        make: fn(Value, Value) -> InstrData,
    ) -> Result<(), FrontendError> {
        let y = self.state.pop()?;
        let x = self.state.pop()?;
        let inst = self.builder.insert(make(x, y));
        let value = self.builder.first_result(inst);
        self.state.push(value);
        Ok(())
    }

    fn insert_icmp(&mut self, cond: IntCC) -> Result<(), FrontendError> {
        let y = self.state.pop()?;
        let x = self.state.pop()?;
        let inst = self.builder.insert(InstrData::Icmp { x, y, cond });
        let value = self.builder.first_result(inst);
        self.state.push(value);
        Ok(())
    }

    fn insert_fcmp(&mut self, cond: FloatCC) -> Result<(), FrontendError> {
        let y = self.state.pop()?;
        let x = self.state.pop()?;
        let inst = self.builder.insert(InstrData::Fcmp { x, y, cond });
        let value = self.builder.first_result(inst);
        self.state.push(value);
        Ok(())
    }

    fn insert_integer_extend(
        &mut self,
        signed: bool,
        from_bits: u8,
        to_bits: u8,
    ) -> Result<(), FrontendError> {
        let value = self.state.pop()?;
        let inst = self.builder.insert(InstrData::Extend {
            value,
            signed,
            from_bits,
            to_bits,
        });
        let value = self.builder.first_result(inst);
        self.state.push(value);
        Ok(())
    }

    fn add_block_params(&mut self, types: &[Type], block: Block) {
        for &ty in types {
            self.builder.append_block_param(block, ty);
        }
    }

    /// Value-stack length at frame open minus the frame's consumed params.
    fn frame_base(&self, param_count: usize) -> Result<usize, FrontendError> {
        self.state
            .values
            .len()
            .checked_sub(param_count)
            .ok_or_else(|| FrontendError::Internal("value stack underflow".to_string()))
    }

    /// Resolve a `br`-family target: loops are entered at their header with
    /// param-arity arguments, everything else at its following block with
    /// result-arity arguments.
    fn branch_target(&self, label: u32) -> Result<(Block, usize), FrontendError> {
        let frame = self.state.ctrl_peek(label as usize)?;
        Ok(if frame.is_loop() {
            (
                frame.blk.expect("loop frame carries its header block"),
                frame.block_type.params.len(),
            )
        } else {
            (frame.following_block, frame.block_type.results.len())
        })
    }

    /// Truncate the value stack, enter `target`, and rebuild the stack from
    /// its block parameters. A target without predecessors marks the region
    /// unreachable: no path enters it, and subsequent opcodes lower harmlessly.
    fn switch_to(&mut self, original_stack_len: usize, target: Block) {
        if self.builder.pred_count(target) == 0 {
            self.state.unreachable = true;
        }
        self.state.values.truncate(original_stack_len);
        self.builder.set_current_block(target);
        for value in self.builder.block_params(target).to_vec() {
            self.state.push(value);
        }
    }

    // === Memory access ===

    /// Emit the bounds check for a `width`-byte access at `base_addr + offset`
    /// and return the 64-bit native address of the access.
    ///
    /// The guarded region is `extBase + offset + width <= memLen`; the exit
    /// code fires when the out-of-bounds predicate holds.
    fn prepare_memory_access(
        &mut self,
        base_addr: Value,
        offset: u32,
        width: u32,
    ) -> Result<Value, FrontendError> {
        let ceil = u64::from(offset) + u64::from(width);
        let ceil_inst = self.builder.insert(InstrData::Iconst64 { value: ceil });
        let ceil_value = self.builder.first_result(ceil_inst);

        // Address arithmetic happens in 64-bit space; the Wasm pointer is
        // 32 bits wide.
        let ext_inst = self.builder.insert(InstrData::Extend {
            value: base_addr,
            signed: false,
            from_bits: 32,
            to_bits: 64,
        });
        let ext_base = self.builder.first_result(ext_inst);

        // memLen is already zero-extended to 64 bits at load time.
        let mem_len = self.memory_len_value();

        let need_inst = self.builder.insert(InstrData::Iadd {
            x: ext_base,
            y: ceil_value,
        });
        let need = self.builder.first_result(need_inst);

        let cmp_inst = self.builder.insert(InstrData::Icmp {
            x: mem_len,
            y: need,
            cond: IntCC::UnsignedLessThan,
        });
        let cmp = self.builder.first_result(cmp_inst);
        self.builder.insert(InstrData::ExitIfNonzero {
            cond: cmp,
            exec_ctx: self.exec_ctx_ptr,
            code: ExitCode::MemoryOutOfBounds,
        });

        let mem_base = self.memory_base_value();
        let addr_inst = self.builder.insert(InstrData::Iadd {
            x: mem_base,
            y: ext_base,
        });
        Ok(self.builder.first_result(addr_inst))
    }

    fn lower_load(&mut self, opcode: u8, offset: u32) -> Result<(), FrontendError> {
        let width = match opcode {
            op::I32_LOAD8_S | op::I32_LOAD8_U | op::I64_LOAD8_S | op::I64_LOAD8_U => 1,
            op::I32_LOAD16_S | op::I32_LOAD16_U | op::I64_LOAD16_S | op::I64_LOAD16_U => 2,
            op::I32_LOAD | op::F32_LOAD | op::I64_LOAD32_S | op::I64_LOAD32_U => 4,
            op::I64_LOAD | op::F64_LOAD => 8,
            _ => {
                return Err(FrontendError::Internal(format!(
                    "not a load opcode: 0x{opcode:02x}"
                )))
            }
        };

        let base_addr = self.state.pop()?;
        let addr = self.prepare_memory_access(base_addr, offset, width)?;

        let data = match opcode {
            op::I32_LOAD => InstrData::Load {
                base: addr,
                offset,
                ty: Type::I32,
            },
            op::I64_LOAD => InstrData::Load {
                base: addr,
                offset,
                ty: Type::I64,
            },
            op::F32_LOAD => InstrData::Load {
                base: addr,
                offset,
                ty: Type::F32,
            },
            op::F64_LOAD => InstrData::Load {
                base: addr,
                offset,
                ty: Type::F64,
            },
            op::I32_LOAD8_S => ext_load(ExtLoadKind::Sload8, addr, offset, false),
            op::I32_LOAD8_U => ext_load(ExtLoadKind::Uload8, addr, offset, false),
            op::I32_LOAD16_S => ext_load(ExtLoadKind::Sload16, addr, offset, false),
            op::I32_LOAD16_U => ext_load(ExtLoadKind::Uload16, addr, offset, false),
            op::I64_LOAD8_S => ext_load(ExtLoadKind::Sload8, addr, offset, true),
            op::I64_LOAD8_U => ext_load(ExtLoadKind::Uload8, addr, offset, true),
            op::I64_LOAD16_S => ext_load(ExtLoadKind::Sload16, addr, offset, true),
            op::I64_LOAD16_U => ext_load(ExtLoadKind::Uload16, addr, offset, true),
            op::I64_LOAD32_S => ext_load(ExtLoadKind::Sload32, addr, offset, true),
            op::I64_LOAD32_U => ext_load(ExtLoadKind::Uload32, addr, offset, true),
            _ => {
                return Err(FrontendError::Internal(format!(
                    "not a load opcode: 0x{opcode:02x}"
                )))
            }
        };
        let inst = self.builder.insert(data);
        let value = self.builder.first_result(inst);
        self.state.push(value);
        Ok(())
    }

    fn lower_store(&mut self, opcode: u8, offset: u32) -> Result<(), FrontendError> {
        let width = match opcode {
            op::I32_STORE8 | op::I64_STORE8 => 1,
            op::I32_STORE16 | op::I64_STORE16 => 2,
            op::I32_STORE | op::F32_STORE | op::I64_STORE32 => 4,
            op::I64_STORE | op::F64_STORE => 8,
            _ => {
                return Err(FrontendError::Internal(format!(
                    "not a store opcode: 0x{opcode:02x}"
                )))
            }
        };

        let value = self.state.pop()?;
        let base_addr = self.state.pop()?;
        let addr = self.prepare_memory_access(base_addr, offset, width)?;

        let data = match opcode {
            op::I32_STORE => InstrData::Store {
                value,
                base: addr,
                offset,
                ty: Type::I32,
            },
            op::I64_STORE => InstrData::Store {
                value,
                base: addr,
                offset,
                ty: Type::I64,
            },
            op::F32_STORE => InstrData::Store {
                value,
                base: addr,
                offset,
                ty: Type::F32,
            },
            op::F64_STORE => InstrData::Store {
                value,
                base: addr,
                offset,
                ty: Type::F64,
            },
            op::I32_STORE8 | op::I64_STORE8 => InstrData::NarrowStore {
                value,
                base: addr,
                offset,
                width_bits: 8,
            },
            op::I32_STORE16 | op::I64_STORE16 => InstrData::NarrowStore {
                value,
                base: addr,
                offset,
                width_bits: 16,
            },
            op::I64_STORE32 => InstrData::NarrowStore {
                value,
                base: addr,
                offset,
                width_bits: 32,
            },
            _ => {
                return Err(FrontendError::Internal(format!(
                    "not a store opcode: 0x{opcode:02x}"
                )))
            }
        };
        self.builder.insert(data);
        Ok(())
    }

    /// The memory base pointer, loaded from the module context and cached in
    /// the current block via the variable mechanism.
    fn memory_base_value(&mut self) -> Value {
        if let Some(value) = self.builder.find_value(self.memory_base_var) {
            return value;
        }
        let inst = self.builder.insert(InstrData::Load {
            base: self.module_ctx_ptr,
            offset: self.offsets.local_memory_base(),
            ty: Type::I64,
        });
        let value = self.builder.first_result(inst);
        self.builder
            .define_variable_in_current_bb(self.memory_base_var, value);
        value
    }

    /// The memory length in bytes, zero-extended to 64 bits and cached like
    /// the base pointer.
    fn memory_len_value(&mut self) -> Value {
        if let Some(value) = self.builder.find_value(self.memory_len_var) {
            return value;
        }
        let inst = self.builder.insert(InstrData::ExtLoad {
            kind: ExtLoadKind::Uload32,
            base: self.module_ctx_ptr,
            offset: self.offsets.local_memory_len(),
            to_64: true,
        });
        let value = self.builder.first_result(inst);
        self.builder
            .define_variable_in_current_bb(self.memory_len_var, value);
        value
    }

    /// Re-define the memory base/length variables in the current block. Called
    /// after any call: the callee may grow memory, invalidating both.
    fn reload_memory_context(&mut self) {
        let inst = self.builder.insert(InstrData::Load {
            base: self.module_ctx_ptr,
            offset: self.offsets.local_memory_base(),
            ty: Type::I64,
        });
        let value = self.builder.first_result(inst);
        self.builder
            .define_variable_in_current_bb(self.memory_base_var, value);

        let inst = self.builder.insert(InstrData::ExtLoad {
            kind: ExtLoadKind::Uload32,
            base: self.module_ctx_ptr,
            offset: self.offsets.local_memory_len(),
            to_64: true,
        });
        let value = self.builder.first_result(inst);
        self.builder
            .define_variable_in_current_bb(self.memory_len_var, value);
    }

    // === Calls ===

    /// Store the current module's context pointer into the execution context
    /// so host-function trampolines can see the caller's module.
    fn store_caller_module_context(&mut self) {
        self.builder.insert(InstrData::Store {
            value: self.module_ctx_ptr,
            base: self.exec_ctx_ptr,
            offset: super::ContextOffsets::CALLER_MODULE_CONTEXT_PTR,
            ty: Type::I64,
        });
    }

    fn lower_call(&mut self, fn_index: u32) -> Result<(), FrontendError> {
        self.store_caller_module_context();

        let type_idx = self
            .module
            .func_type_indices
            .get(fn_index as usize)
            .copied()
            .ok_or_else(|| {
                FrontendError::Internal(format!("function index {fn_index} out of range"))
            })?;
        let sig = self.signature_ref(type_idx)?;
        let param_count = self.module.types[type_idx as usize].params.len();
        let wasm_args = self.state.pop_n(param_count)?;

        let mut args = Vec::with_capacity(param_count + 2);
        args.push(self.exec_ctx_ptr);
        let call = if fn_index >= self.module.num_imported_functions {
            // The callee module is this one.
            args.push(self.module_ctx_ptr);
            args.extend(wasm_args);
            self.builder.insert(InstrData::Call {
                func: FuncRef(fn_index),
                sig,
                args,
            })
        } else {
            // Imported function: its address and module context live in our
            // module context at the import slot.
            let (func_ptr_off, module_ctx_off) = self.offsets.imported_function(fn_index);
            let load_func_ptr = self.builder.insert(InstrData::Load {
                base: self.module_ctx_ptr,
                offset: func_ptr_off,
                ty: Type::I64,
            });
            let load_callee_ctx = self.builder.insert(InstrData::Load {
                base: self.module_ctx_ptr,
                offset: module_ctx_off,
                ty: Type::I64,
            });
            let func_ptr = self.builder.first_result(load_func_ptr);
            args.push(self.builder.first_result(load_callee_ctx));
            args.extend(wasm_args);
            self.builder
                .insert(InstrData::CallIndirect { func_ptr, sig, args })
        };

        for value in self.builder.inst_results(call).to_vec() {
            self.state.push(value);
        }

        // A call may grow memory; force the cached base/length to reload.
        if self.module.has_memory {
            self.reload_memory_context();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{FunctionCompiler, LocalFunction, ModuleInfo};
    use crate::ssa::{ExitCode, Function, InstrData, Type};
    use crate::FrontendError;

    fn single_function_module(results: Vec<Type>, body: Vec<u8>) -> ModuleInfo {
        ModuleInfo {
            types: vec![super::super::FunctionType {
                params: Vec::new(),
                results,
            }],
            func_type_indices: vec![0],
            num_imported_functions: 0,
            has_memory: false,
            functions: vec![LocalFunction {
                type_idx: 0,
                locals: Vec::new(),
                body,
            }],
        }
    }

    fn lower_single(module: &ModuleInfo) -> Result<Function, FrontendError> {
        FunctionCompiler::new(module, &module.functions[0])?.lower_body()
    }

    #[test]
    fn add_two_constants() {
        // i32.const 3; i32.const 4; i32.add; end
        let module = single_function_module(
            vec![Type::I32],
            vec![0x41, 0x03, 0x41, 0x04, 0x6a, 0x0b],
        );
        let f = lower_single(&module).unwrap();

        let entry = f.entry_block();
        let insts = f.block_insts(entry);
        assert_eq!(insts.len(), 4);
        assert_eq!(f.instr(insts[0]), &InstrData::Iconst32 { value: 3 });
        assert_eq!(f.instr(insts[1]), &InstrData::Iconst32 { value: 4 });
        let (v1, v2) = (f.inst_results(insts[0])[0], f.inst_results(insts[1])[0]);
        assert_eq!(f.instr(insts[2]), &InstrData::Iadd { x: v1, y: v2 });
        let sum = f.inst_results(insts[2])[0];
        match f.instr(insts[3]) {
            InstrData::Jump { args, target } => {
                assert_eq!(*target, f.return_block());
                assert_eq!(args, &[sum]);
            }
            other => panic!("expected jump to the return block, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_region_consumes_bytes_but_emits_nothing() {
        // unreachable; i32.const 5; i32.const 7; i32.add; end
        let module = single_function_module(
            vec![Type::I32],
            vec![0x00, 0x41, 0x05, 0x41, 0x07, 0x6a, 0x0b],
        );
        let f = lower_single(&module).unwrap();

        let entry = f.entry_block();
        let insts = f.block_insts(entry);
        assert_eq!(insts.len(), 1);
        assert!(matches!(
            f.instr(insts[0]),
            InstrData::Exit {
                code: ExitCode::Unreachable,
                ..
            }
        ));
        // No constants, no add, anywhere.
        for block in f.blocks() {
            for &inst in f.block_insts(block) {
                assert!(!matches!(
                    f.instr(inst),
                    InstrData::Iconst32 { .. } | InstrData::Iadd { .. }
                ));
            }
        }
    }

    #[test]
    fn unknown_opcode_is_reported_with_its_byte() {
        // select (valid Wasm, not implemented here)
        let module = single_function_module(vec![], vec![0x1b, 0x0b]);
        let err = lower_single(&module).unwrap_err();
        match err {
            FrontendError::UnsupportedOpcode(name) => assert_eq!(name, "0x1b"),
            other => panic!("expected an unsupported-opcode error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_immediate_is_an_internal_error() {
        // i32.const with a continuation byte and nothing after it
        let module = single_function_module(vec![], vec![0x41, 0x80]);
        let err = lower_single(&module).unwrap_err();
        assert!(matches!(err, FrontendError::Internal(_)));
    }
}
