//! Streaming MessagePack encoder.

use std::io::Write;

use super::wire::*;
use crate::error::{Error, Result};

const MAX_LEN: u64 = u32::MAX as u64;

/// Writes MessagePack values to any [`Write`] sink.
///
/// Every integer, length and payload is written in its shortest form.
/// Lengths above `u32::MAX` fail with [`Error::LongValue`] before anything
/// is written for that value.
pub struct Encoder<'a> {
    writer: &'a mut dyn Write,
}

impl<'a> Encoder<'a> {
    pub fn new(writer: &'a mut dyn Write) -> Self {
        Self { writer }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    pub fn pack_nil(&mut self) -> Result<()> {
        self.put(&[NIL])
    }

    pub fn pack_bool(&mut self, v: bool) -> Result<()> {
        self.put(&[if v { TRUE } else { FALSE }])
    }

    /// Non-negative values take the unsigned path so every encoder agrees on
    /// the bytes for small positive numbers.
    pub fn pack_int(&mut self, v: i64) -> Result<()> {
        if v >= 0 {
            return self.pack_uint(v as u64);
        }
        if v >= -32 {
            self.put(&[v as i8 as u8])
        } else if v >= i8::MIN as i64 {
            self.put(&[INT8, v as i8 as u8])
        } else if v >= i16::MIN as i64 {
            let b = (v as i16).to_be_bytes();
            self.put(&[INT16, b[0], b[1]])
        } else if v >= i32::MIN as i64 {
            let b = (v as i32).to_be_bytes();
            self.put(&[INT32, b[0], b[1], b[2], b[3]])
        } else {
            self.put(&[INT64])?;
            self.put(&v.to_be_bytes())
        }
    }

    pub fn pack_uint(&mut self, v: u64) -> Result<()> {
        if v <= POS_FIXINT_MAX as u64 {
            self.put(&[v as u8])
        } else if v <= u8::MAX as u64 {
            self.put(&[UINT8, v as u8])
        } else if v <= u16::MAX as u64 {
            let b = (v as u16).to_be_bytes();
            self.put(&[UINT16, b[0], b[1]])
        } else if v <= u32::MAX as u64 {
            let b = (v as u32).to_be_bytes();
            self.put(&[UINT32, b[0], b[1], b[2], b[3]])
        } else {
            self.put(&[UINT64])?;
            self.put(&v.to_be_bytes())
        }
    }

    pub fn pack_float(&mut self, v: f64) -> Result<()> {
        self.put(&[FLOAT64])?;
        self.put(&v.to_bits().to_be_bytes())
    }

    pub fn pack_string(&mut self, v: &str) -> Result<()> {
        self.pack_string_bytes(v.as_bytes())
    }

    /// Write `v` with a string header without checking that it is UTF-8.
    pub fn pack_string_bytes(&mut self, v: &[u8]) -> Result<()> {
        let n = v.len() as u64;
        if n < 32 {
            self.put(&[FIXSTR | n as u8])?;
        } else {
            self.pack_len(n, [STR8, STR16, STR32])?;
        }
        self.put(v)
    }

    pub fn pack_binary(&mut self, v: &[u8]) -> Result<()> {
        self.pack_len(v.len() as u64, [BIN8, BIN16, BIN32])?;
        self.put(v)
    }

    pub fn pack_array_len(&mut self, n: u64) -> Result<()> {
        if n < 16 {
            self.put(&[FIXARRAY | n as u8])
        } else {
            self.pack_len16(n, ARRAY16, ARRAY32)
        }
    }

    pub fn pack_map_len(&mut self, n: u64) -> Result<()> {
        if n < 16 {
            self.put(&[FIXMAP | n as u8])
        } else {
            self.pack_len16(n, MAP16, MAP32)
        }
    }

    pub fn pack_extension(&mut self, kind: i8, data: &[u8]) -> Result<()> {
        let fixed = match data.len() {
            1 => Some(FIXEXT1),
            2 => Some(FIXEXT2),
            4 => Some(FIXEXT4),
            8 => Some(FIXEXT8),
            16 => Some(FIXEXT16),
            _ => None,
        };
        match fixed {
            Some(code) => self.put(&[code, kind as u8])?,
            None => {
                self.pack_len(data.len() as u64, [EXT8, EXT16, EXT32])?;
                self.put(&[kind as u8])?;
            }
        }
        self.put(data)
    }

    /// Append bytes that are already valid MessagePack.
    pub fn pack_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.put(raw)
    }

    fn pack_len(&mut self, n: u64, codes: [u8; 3]) -> Result<()> {
        if n <= u8::MAX as u64 {
            self.put(&[codes[0], n as u8])
        } else if n <= u16::MAX as u64 {
            let b = (n as u16).to_be_bytes();
            self.put(&[codes[1], b[0], b[1]])
        } else if n <= MAX_LEN {
            let b = (n as u32).to_be_bytes();
            self.put(&[codes[2], b[0], b[1], b[2], b[3]])
        } else {
            Err(Error::LongValue(n))
        }
    }

    fn pack_len16(&mut self, n: u64, code16: u8, code32: u8) -> Result<()> {
        if n <= u16::MAX as u64 {
            let b = (n as u16).to_be_bytes();
            self.put(&[code16, b[0], b[1]])
        } else if n <= MAX_LEN {
            let b = (n as u32).to_be_bytes();
            self.put(&[code32, b[0], b[1], b[2], b[3]])
        } else {
            Err(Error::LongValue(n))
        }
    }
}
