//! Lowering state: the abstract operand stack and the control-frame stack.

use super::FunctionType;
use crate::ssa::{Block, Value};
use crate::FrontendError;

/// Kind of an open structured construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ControlFrameKind {
    /// The implicit frame of the whole function body.
    Function,
    Block,
    Loop,
    IfWithoutElse,
    IfWithElse,
}

/// One live structured construct (`block`/`loop`/`if`, or the function body).
///
/// Pushed by the opening opcode, popped by the matching `end`; `else` mutates
/// an `IfWithoutElse` frame in place.
#[derive(Debug, Clone)]
pub(super) struct ControlFrame {
    pub(super) kind: ControlFrameKind,
    /// The Wasm `(params, results)` type of the construct.
    pub(super) block_type: FunctionType,
    /// Value-stack length at frame open minus the params consumed by the
    /// construct; the stack is truncated back to this on `else`/`end`.
    pub(super) original_stack_len_without_param: usize,
    /// The loop header for `Loop` frames, the else-side block for `If` frames.
    pub(super) blk: Option<Block>,
    /// The block control reaches after the construct's `end`. For `Function`
    /// this is the IR return block.
    pub(super) following_block: Block,
    /// Saved argument values re-pushed when entering the else branch.
    pub(super) cloned_args: Vec<Value>,
}

impl ControlFrame {
    pub(super) fn is_loop(&self) -> bool {
        self.kind == ControlFrameKind::Loop
    }
}

/// Mutable state of one function lowering.
///
/// While reachable, `values` exactly mirrors the Wasm operand stack above the
/// innermost frame's baseline. While `unreachable` is set the stack is stale
/// and must not be read; it is rebuilt at the next `else`/`end`.
#[derive(Debug, Default)]
pub(super) struct LoweringState {
    pub(super) values: Vec<Value>,
    pub(super) control_frames: Vec<ControlFrame>,
    pub(super) unreachable: bool,
    /// Nesting depth of constructs opened while already unreachable.
    pub(super) unreachable_depth: usize,
}

impl LoweringState {
    pub(super) fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub(super) fn pop(&mut self) -> Result<Value, FrontendError> {
        self.values
            .pop()
            .ok_or_else(|| FrontendError::Internal("value stack underflow".to_string()))
    }

    pub(super) fn peek(&self) -> Result<Value, FrontendError> {
        self.values
            .last()
            .copied()
            .ok_or_else(|| FrontendError::Internal("value stack underflow".to_string()))
    }

    /// Remove the top `n` values, returned in stack order (deepest first).
    pub(super) fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, FrontendError> {
        let at = self.values.len().checked_sub(n).ok_or_else(|| {
            FrontendError::Internal("value stack underflow".to_string())
        })?;
        Ok(self.values.split_off(at))
    }

    /// Copy (without removing) the top `n` values, in stack order.
    pub(super) fn peek_n(&self, n: usize) -> Result<Vec<Value>, FrontendError> {
        let at = self.values.len().checked_sub(n).ok_or_else(|| {
            FrontendError::Internal("value stack underflow".to_string())
        })?;
        Ok(self.values[at..].to_vec())
    }

    pub(super) fn ctrl_push(&mut self, frame: ControlFrame) {
        self.control_frames.push(frame);
    }

    pub(super) fn ctrl_pop(&mut self) -> Result<ControlFrame, FrontendError> {
        self.control_frames
            .pop()
            .ok_or_else(|| FrontendError::Internal("control stack underflow".to_string()))
    }

    /// The frame at `depth` below the innermost one (depth 0 = innermost).
    pub(super) fn ctrl_peek(&self, depth: usize) -> Result<&ControlFrame, FrontendError> {
        let idx = self
            .control_frames
            .len()
            .checked_sub(depth + 1)
            .ok_or_else(|| {
                FrontendError::Internal(format!("branch depth {depth} exceeds control stack"))
            })?;
        Ok(&self.control_frames[idx])
    }

    pub(super) fn ctrl_peek_mut(&mut self, depth: usize) -> Result<&mut ControlFrame, FrontendError> {
        let idx = self
            .control_frames
            .len()
            .checked_sub(depth + 1)
            .ok_or_else(|| {
                FrontendError::Internal(format!("branch depth {depth} exceeds control stack"))
            })?;
        Ok(&mut self.control_frames[idx])
    }
}
