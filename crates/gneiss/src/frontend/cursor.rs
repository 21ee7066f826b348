//! Positional reader over a raw WebAssembly function body.
//!
//! The cursor decodes the opcode immediates the dispatcher asks for: LEB128
//! integers, little-endian IEEE-754 floats, memargs, and block types. Decode
//! failures surface as [`FrontendError::Internal`] — they are only possible on
//! corrupt input because the body is assumed validated, but they are reported
//! rather than silenced so upstream bugs are detectable.

use super::FunctionType;
use crate::ssa::Type;
use crate::FrontendError;

/// Byte cursor over one function body.
pub struct BytecodeCursor<'a> {
    body: &'a [u8],
    pc: usize,
}

impl<'a> BytecodeCursor<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { body, pc: 0 }
    }

    /// Current byte offset into the body.
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Whether the whole body has been consumed.
    pub fn done(&self) -> bool {
        self.pc >= self.body.len()
    }

    /// Consume and return the opcode byte at the current position.
    pub fn read_opcode(&mut self) -> Result<u8, FrontendError> {
        self.read_byte()
    }

    fn read_byte(&mut self) -> Result<u8, FrontendError> {
        let byte = *self
            .body
            .get(self.pc)
            .ok_or_else(|| FrontendError::Internal("unexpected end of function body".to_string()))?;
        self.pc += 1;
        Ok(byte)
    }

    /// Decode an unsigned LEB128 u32.
    pub fn read_u32_leb(&mut self) -> Result<u32, FrontendError> {
        let mut result: u32 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_byte()?;
            result |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                if shift == 28 && byte >> 4 != 0 {
                    return Err(FrontendError::Internal(
                        "u32 LEB128 overflows 32 bits".to_string(),
                    ));
                }
                return Ok(result);
            }
            shift += 7;
            if shift >= 32 {
                return Err(FrontendError::Internal(
                    "u32 LEB128 is longer than 5 bytes".to_string(),
                ));
            }
        }
    }

    /// Decode a signed LEB128 integer of up to `bits` significant bits.
    fn read_signed_leb(&mut self, bits: u32) -> Result<i64, FrontendError> {
        let max_shift = bits.div_ceil(7) * 7;
        let mut result: i64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_byte()?;
            if shift < 64 {
                result |= i64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                break;
            }
            if shift >= max_shift {
                return Err(FrontendError::Internal(format!(
                    "s{bits} LEB128 is longer than {} bytes",
                    max_shift / 7
                )));
            }
        }
        if bits < 64 {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if result < min || result > max {
                return Err(FrontendError::Internal(format!(
                    "s{bits} LEB128 overflows {bits} bits"
                )));
            }
        }
        Ok(result)
    }

    /// Decode a signed LEB128 s32 (`i32.const` immediate).
    pub fn read_s32_leb(&mut self) -> Result<i32, FrontendError> {
        Ok(self.read_signed_leb(32)? as i32)
    }

    /// Decode a signed LEB128 s64 (`i64.const` immediate).
    pub fn read_s64_leb(&mut self) -> Result<i64, FrontendError> {
        self.read_signed_leb(64)
    }

    /// Read a little-endian f32 (`f32.const` immediate, raw bits).
    pub fn read_f32(&mut self) -> Result<f32, FrontendError> {
        let bytes = self.read_raw::<4>()?;
        Ok(f32::from_le_bytes(bytes))
    }

    /// Read a little-endian f64 (`f64.const` immediate, raw bits).
    pub fn read_f64(&mut self) -> Result<f64, FrontendError> {
        let bytes = self.read_raw::<8>()?;
        Ok(f64::from_le_bytes(bytes))
    }

    fn read_raw<const N: usize>(&mut self) -> Result<[u8; N], FrontendError> {
        let slice = self.body.get(self.pc..self.pc + N).ok_or_else(|| {
            FrontendError::Internal("truncated float immediate".to_string())
        })?;
        self.pc += N;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        Ok(bytes)
    }

    /// Read a memarg: two consecutive u32 LEBs, `(align, offset)`.
    ///
    /// The alignment hint is advisory in Wasm; lowering ignores it.
    pub fn read_mem_arg(&mut self) -> Result<(u32, u32), FrontendError> {
        let align = self.read_u32_leb()?;
        let offset = self.read_u32_leb()?;
        Ok((align, offset))
    }

    /// Read a structured block type, resolving type-section indices through
    /// `types`.
    pub fn read_block_type(&mut self, types: &[FunctionType]) -> Result<FunctionType, FrontendError> {
        let shorthand = |results: Vec<Type>| FunctionType {
            params: Vec::new(),
            results,
        };
        match self.body.get(self.pc).copied() {
            Some(0x40) => {
                self.pc += 1;
                Ok(shorthand(Vec::new()))
            }
            Some(0x7f) => {
                self.pc += 1;
                Ok(shorthand(vec![Type::I32]))
            }
            Some(0x7e) => {
                self.pc += 1;
                Ok(shorthand(vec![Type::I64]))
            }
            Some(0x7d) => {
                self.pc += 1;
                Ok(shorthand(vec![Type::F32]))
            }
            Some(0x7c) => {
                self.pc += 1;
                Ok(shorthand(vec![Type::F64]))
            }
            Some(_) => {
                let index = self.read_signed_leb(33)?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| types.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        FrontendError::Internal(format!("block type index {index} out of range"))
                    })
            }
            None => Err(FrontendError::Internal(
                "unexpected end of function body".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_leb() {
        let mut c = BytecodeCursor::new(&[0x00, 0x7f, 0xe5, 0x8e, 0x26]);
        assert_eq!(c.read_u32_leb().unwrap(), 0);
        assert_eq!(c.read_u32_leb().unwrap(), 127);
        assert_eq!(c.read_u32_leb().unwrap(), 624485);
        assert!(c.done());
    }

    #[test]
    fn signed_leb() {
        // -1, 63, -123456
        let mut c = BytecodeCursor::new(&[0x7f, 0xbf, 0x00, 0xc0, 0xbb, 0x78]);
        assert_eq!(c.read_s32_leb().unwrap(), -1);
        assert_eq!(c.read_s32_leb().unwrap(), 63);
        assert_eq!(c.read_s32_leb().unwrap(), -123456);
    }

    #[test]
    fn signed_leb_64_extremes() {
        let mut c = BytecodeCursor::new(&[
            // i64::MIN
            0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f,
            // i64::MAX
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00,
        ]);
        assert_eq!(c.read_s64_leb().unwrap(), i64::MIN);
        assert_eq!(c.read_s64_leb().unwrap(), i64::MAX);
    }

    #[test]
    fn truncated_leb_is_an_internal_error() {
        let mut c = BytecodeCursor::new(&[0x80, 0x80]);
        assert!(matches!(
            c.read_u32_leb(),
            Err(FrontendError::Internal(_))
        ));
    }

    #[test]
    fn overlong_leb_is_an_internal_error() {
        let mut c = BytecodeCursor::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(
            c.read_u32_leb(),
            Err(FrontendError::Internal(_))
        ));
    }

    #[test]
    fn float_immediates_are_raw_little_endian() {
        let mut bytes = 1.5f32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-2.25f64).to_le_bytes());
        let mut c = BytecodeCursor::new(&bytes);
        assert_eq!(c.read_f32().unwrap(), 1.5);
        assert_eq!(c.read_f64().unwrap(), -2.25);
    }

    #[test]
    fn truncated_float_is_an_internal_error() {
        let mut c = BytecodeCursor::new(&[0x00, 0x00]);
        assert!(matches!(c.read_f32(), Err(FrontendError::Internal(_))));
    }

    #[test]
    fn mem_arg_reads_align_then_offset() {
        let mut c = BytecodeCursor::new(&[0x02, 0x10]);
        assert_eq!(c.read_mem_arg().unwrap(), (2, 16));
    }

    #[test]
    fn block_type_shorthands() {
        let mut c = BytecodeCursor::new(&[0x40, 0x7f, 0x7c]);
        let empty = c.read_block_type(&[]).unwrap();
        assert!(empty.params.is_empty() && empty.results.is_empty());
        assert_eq!(c.read_block_type(&[]).unwrap().results, vec![Type::I32]);
        assert_eq!(c.read_block_type(&[]).unwrap().results, vec![Type::F64]);
    }

    #[test]
    fn block_type_index_resolves_through_the_type_section() {
        let types = vec![FunctionType {
            params: vec![Type::I32, Type::I32],
            results: vec![Type::I32],
        }];
        let mut c = BytecodeCursor::new(&[0x00]);
        assert_eq!(c.read_block_type(&types).unwrap(), types[0]);
    }
}
