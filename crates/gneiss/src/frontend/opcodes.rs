//! WebAssembly opcode byte constants.
//!
//! Only the opcodes this frontend lowers are named; everything else is
//! reported as unsupported with its raw byte.

// Control flow
pub const UNREACHABLE: u8 = 0x00;
pub const NOP: u8 = 0x01;
pub const BLOCK: u8 = 0x02;
pub const LOOP: u8 = 0x03;
pub const IF: u8 = 0x04;
pub const ELSE: u8 = 0x05;
pub const END: u8 = 0x0b;
pub const BR: u8 = 0x0c;
pub const BR_IF: u8 = 0x0d;
pub const RETURN: u8 = 0x0f;
pub const CALL: u8 = 0x10;

// Parametric
pub const DROP: u8 = 0x1a;

// Variables
pub const LOCAL_GET: u8 = 0x20;
pub const LOCAL_SET: u8 = 0x21;
pub const LOCAL_TEE: u8 = 0x22;

// Memory loads
pub const I32_LOAD: u8 = 0x28;
pub const I64_LOAD: u8 = 0x29;
pub const F32_LOAD: u8 = 0x2a;
pub const F64_LOAD: u8 = 0x2b;
pub const I32_LOAD8_S: u8 = 0x2c;
pub const I32_LOAD8_U: u8 = 0x2d;
pub const I32_LOAD16_S: u8 = 0x2e;
pub const I32_LOAD16_U: u8 = 0x2f;
pub const I64_LOAD8_S: u8 = 0x30;
pub const I64_LOAD8_U: u8 = 0x31;
pub const I64_LOAD16_S: u8 = 0x32;
pub const I64_LOAD16_U: u8 = 0x33;
pub const I64_LOAD32_S: u8 = 0x34;
pub const I64_LOAD32_U: u8 = 0x35;

// Memory stores
pub const I32_STORE: u8 = 0x36;
pub const I64_STORE: u8 = 0x37;
pub const F32_STORE: u8 = 0x38;
pub const F64_STORE: u8 = 0x39;
pub const I32_STORE8: u8 = 0x3a;
pub const I32_STORE16: u8 = 0x3b;
pub const I64_STORE8: u8 = 0x3c;
pub const I64_STORE16: u8 = 0x3d;
pub const I64_STORE32: u8 = 0x3e;

// Constants
pub const I32_CONST: u8 = 0x41;
pub const I64_CONST: u8 = 0x42;
pub const F32_CONST: u8 = 0x43;
pub const F64_CONST: u8 = 0x44;

// i32 comparisons
pub const I32_EQ: u8 = 0x46;
pub const I32_NE: u8 = 0x47;
pub const I32_LT_S: u8 = 0x48;
pub const I32_LT_U: u8 = 0x49;
pub const I32_GT_S: u8 = 0x4a;
pub const I32_GT_U: u8 = 0x4b;
pub const I32_LE_S: u8 = 0x4c;
pub const I32_LE_U: u8 = 0x4d;
pub const I32_GE_S: u8 = 0x4e;
pub const I32_GE_U: u8 = 0x4f;

// i64 comparisons
pub const I64_EQ: u8 = 0x51;
pub const I64_NE: u8 = 0x52;
pub const I64_LT_S: u8 = 0x53;
pub const I64_LT_U: u8 = 0x54;
pub const I64_GT_S: u8 = 0x55;
pub const I64_GT_U: u8 = 0x56;
pub const I64_LE_S: u8 = 0x57;
pub const I64_LE_U: u8 = 0x58;
pub const I64_GE_S: u8 = 0x59;
pub const I64_GE_U: u8 = 0x5a;

// f32 comparisons
pub const F32_EQ: u8 = 0x5b;
pub const F32_NE: u8 = 0x5c;
pub const F32_LT: u8 = 0x5d;
pub const F32_GT: u8 = 0x5e;
pub const F32_LE: u8 = 0x5f;
pub const F32_GE: u8 = 0x60;

// f64 comparisons
pub const F64_EQ: u8 = 0x61;
pub const F64_NE: u8 = 0x62;
pub const F64_LT: u8 = 0x63;
pub const F64_GT: u8 = 0x64;
pub const F64_LE: u8 = 0x65;
pub const F64_GE: u8 = 0x66;

// i32 arithmetic
pub const I32_ADD: u8 = 0x6a;
pub const I32_SUB: u8 = 0x6b;
pub const I32_MUL: u8 = 0x6c;
pub const I32_SHL: u8 = 0x74;
pub const I32_SHR_S: u8 = 0x75;
pub const I32_SHR_U: u8 = 0x76;

// i64 arithmetic
pub const I64_ADD: u8 = 0x7c;
pub const I64_SUB: u8 = 0x7d;
pub const I64_MUL: u8 = 0x7e;
pub const I64_SHL: u8 = 0x86;
pub const I64_SHR_S: u8 = 0x87;
pub const I64_SHR_U: u8 = 0x88;

// f32 arithmetic
pub const F32_ADD: u8 = 0x92;
pub const F32_SUB: u8 = 0x93;
pub const F32_MUL: u8 = 0x94;
pub const F32_DIV: u8 = 0x95;
pub const F32_MIN: u8 = 0x96;
pub const F32_MAX: u8 = 0x97;

// f64 arithmetic
pub const F64_ADD: u8 = 0xa0;
pub const F64_SUB: u8 = 0xa1;
pub const F64_MUL: u8 = 0xa2;
pub const F64_DIV: u8 = 0xa3;
pub const F64_MIN: u8 = 0xa4;
pub const F64_MAX: u8 = 0xa5;

// Conversions and extensions
pub const I64_EXTEND_I32_S: u8 = 0xac;
pub const I64_EXTEND_I32_U: u8 = 0xad;
pub const I32_EXTEND8_S: u8 = 0xc0;
pub const I32_EXTEND16_S: u8 = 0xc1;
pub const I64_EXTEND8_S: u8 = 0xc2;
pub const I64_EXTEND16_S: u8 = 0xc3;
pub const I64_EXTEND32_S: u8 = 0xc4;

/// Diagnostic name for an opcode byte, `"0x??"` for bytes this frontend has no
/// name for.
pub fn name(op: u8) -> String {
    let known = match op {
        UNREACHABLE => "unreachable",
        NOP => "nop",
        BLOCK => "block",
        LOOP => "loop",
        IF => "if",
        ELSE => "else",
        END => "end",
        BR => "br",
        BR_IF => "br_if",
        RETURN => "return",
        CALL => "call",
        DROP => "drop",
        LOCAL_GET => "local.get",
        LOCAL_SET => "local.set",
        LOCAL_TEE => "local.tee",
        I32_LOAD => "i32.load",
        I64_LOAD => "i64.load",
        F32_LOAD => "f32.load",
        F64_LOAD => "f64.load",
        I32_LOAD8_S => "i32.load8_s",
        I32_LOAD8_U => "i32.load8_u",
        I32_LOAD16_S => "i32.load16_s",
        I32_LOAD16_U => "i32.load16_u",
        I64_LOAD8_S => "i64.load8_s",
        I64_LOAD8_U => "i64.load8_u",
        I64_LOAD16_S => "i64.load16_s",
        I64_LOAD16_U => "i64.load16_u",
        I64_LOAD32_S => "i64.load32_s",
        I64_LOAD32_U => "i64.load32_u",
        I32_STORE => "i32.store",
        I64_STORE => "i64.store",
        F32_STORE => "f32.store",
        F64_STORE => "f64.store",
        I32_STORE8 => "i32.store8",
        I32_STORE16 => "i32.store16",
        I64_STORE8 => "i64.store8",
        I64_STORE16 => "i64.store16",
        I64_STORE32 => "i64.store32",
        I32_CONST => "i32.const",
        I64_CONST => "i64.const",
        F32_CONST => "f32.const",
        F64_CONST => "f64.const",
        I32_EQ => "i32.eq",
        I32_NE => "i32.ne",
        I32_LT_S => "i32.lt_s",
        I32_LT_U => "i32.lt_u",
        I32_GT_S => "i32.gt_s",
        I32_GT_U => "i32.gt_u",
        I32_LE_S => "i32.le_s",
        I32_LE_U => "i32.le_u",
        I32_GE_S => "i32.ge_s",
        I32_GE_U => "i32.ge_u",
        I64_EQ => "i64.eq",
        I64_NE => "i64.ne",
        I64_LT_S => "i64.lt_s",
        I64_LT_U => "i64.lt_u",
        I64_GT_S => "i64.gt_s",
        I64_GT_U => "i64.gt_u",
        I64_LE_S => "i64.le_s",
        I64_LE_U => "i64.le_u",
        I64_GE_S => "i64.ge_s",
        I64_GE_U => "i64.ge_u",
        F32_EQ => "f32.eq",
        F32_NE => "f32.ne",
        F32_LT => "f32.lt",
        F32_GT => "f32.gt",
        F32_LE => "f32.le",
        F32_GE => "f32.ge",
        F64_EQ => "f64.eq",
        F64_NE => "f64.ne",
        F64_LT => "f64.lt",
        F64_GT => "f64.gt",
        F64_LE => "f64.le",
        F64_GE => "f64.ge",
        I32_ADD => "i32.add",
        I32_SUB => "i32.sub",
        I32_MUL => "i32.mul",
        I32_SHL => "i32.shl",
        I32_SHR_S => "i32.shr_s",
        I32_SHR_U => "i32.shr_u",
        I64_ADD => "i64.add",
        I64_SUB => "i64.sub",
        I64_MUL => "i64.mul",
        I64_SHL => "i64.shl",
        I64_SHR_S => "i64.shr_s",
        I64_SHR_U => "i64.shr_u",
        F32_ADD => "f32.add",
        F32_SUB => "f32.sub",
        F32_MUL => "f32.mul",
        F32_DIV => "f32.div",
        F32_MIN => "f32.min",
        F32_MAX => "f32.max",
        F64_ADD => "f64.add",
        F64_SUB => "f64.sub",
        F64_MUL => "f64.mul",
        F64_DIV => "f64.div",
        F64_MIN => "f64.min",
        F64_MAX => "f64.max",
        I64_EXTEND_I32_S => "i64.extend_i32_s",
        I64_EXTEND_I32_U => "i64.extend_i32_u",
        I32_EXTEND8_S => "i32.extend8_s",
        I32_EXTEND16_S => "i32.extend16_s",
        I64_EXTEND8_S => "i64.extend8_s",
        I64_EXTEND16_S => "i64.extend16_s",
        I64_EXTEND32_S => "i64.extend32_s",
        _ => return format!("0x{op:02x}"),
    };
    known.to_string()
}
