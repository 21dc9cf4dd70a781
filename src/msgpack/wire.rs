//! MessagePack format codes and the lead-byte lookup table.

use std::fmt;

pub(crate) const POS_FIXINT_MAX: u8 = 0x7f;
pub(crate) const FIXMAP: u8 = 0x80;
pub(crate) const FIXARRAY: u8 = 0x90;
pub(crate) const FIXSTR: u8 = 0xa0;
pub(crate) const NIL: u8 = 0xc0;
pub(crate) const UNUSED: u8 = 0xc1;
pub(crate) const FALSE: u8 = 0xc2;
pub(crate) const TRUE: u8 = 0xc3;
pub(crate) const BIN8: u8 = 0xc4;
pub(crate) const BIN16: u8 = 0xc5;
pub(crate) const BIN32: u8 = 0xc6;
pub(crate) const EXT8: u8 = 0xc7;
pub(crate) const EXT16: u8 = 0xc8;
pub(crate) const EXT32: u8 = 0xc9;
pub(crate) const FLOAT32: u8 = 0xca;
pub(crate) const FLOAT64: u8 = 0xcb;
pub(crate) const UINT8: u8 = 0xcc;
pub(crate) const UINT16: u8 = 0xcd;
pub(crate) const UINT32: u8 = 0xce;
pub(crate) const UINT64: u8 = 0xcf;
pub(crate) const INT8: u8 = 0xd0;
pub(crate) const INT16: u8 = 0xd1;
pub(crate) const INT32: u8 = 0xd2;
pub(crate) const INT64: u8 = 0xd3;
pub(crate) const FIXEXT1: u8 = 0xd4;
pub(crate) const FIXEXT2: u8 = 0xd5;
pub(crate) const FIXEXT4: u8 = 0xd6;
pub(crate) const FIXEXT8: u8 = 0xd7;
pub(crate) const FIXEXT16: u8 = 0xd8;
pub(crate) const STR8: u8 = 0xd9;
pub(crate) const STR16: u8 = 0xda;
pub(crate) const STR32: u8 = 0xdb;
pub(crate) const ARRAY16: u8 = 0xdc;
pub(crate) const ARRAY32: u8 = 0xdd;
pub(crate) const MAP16: u8 = 0xde;
pub(crate) const MAP32: u8 = 0xdf;
pub(crate) const NEG_FIXINT_MIN: u8 = 0xe0;

/// Semantic type of a MessagePack value, independent of its encoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Invalid,
    Nil,
    Bool,
    Int,
    Uint,
    Float,
    String,
    Binary,
    ArrayLen,
    MapLen,
    Extension,
}

impl WireType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireType::Invalid => "invalid",
            WireType::Nil => "nil",
            WireType::Bool => "bool",
            WireType::Int => "int",
            WireType::Uint => "uint",
            WireType::Float => "float",
            WireType::String => "string",
            WireType::Binary => "binary",
            WireType::ArrayLen => "array",
            WireType::MapLen => "map",
            WireType::Extension => "extension",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the 64-bit `n` slot of a header is filled after the lead byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arg {
    /// Low bits of the lead byte, under the given mask.
    Lead(u8),
    /// The lead byte itself, sign-extended (negative fixint).
    LeadSigned,
    /// A constant (nil, booleans, fixext sizes).
    Const(u64),
    /// Big-endian unsigned integer of the given byte width.
    Unsigned(u8),
    /// Big-endian signed integer of the given byte width, sign-extended.
    Signed(u8),
    /// IEEE-754 binary32 widened to binary64 bits.
    Float32,
    /// IEEE-754 binary64 bits.
    Float64,
}

/// Decoding recipe for one lead byte.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Format {
    pub ty: WireType,
    pub arg: Arg,
    /// String, binary and extension values carry `n` payload bytes.
    pub payload: bool,
}

impl Format {
    const fn new(ty: WireType, arg: Arg) -> Self {
        Self {
            ty,
            arg,
            payload: false,
        }
    }

    const fn with_payload(ty: WireType, arg: Arg) -> Self {
        Self {
            ty,
            arg,
            payload: true,
        }
    }

    /// Number of bytes that follow the lead byte before the payload,
    /// including the kind byte of extensions.
    pub fn header_len(&self) -> usize {
        let arg = match self.arg {
            Arg::Unsigned(width) | Arg::Signed(width) => width as usize,
            Arg::Float32 => 4,
            Arg::Float64 => 8,
            Arg::Lead(_) | Arg::LeadSigned | Arg::Const(_) => 0,
        };
        if self.ty == WireType::Extension {
            arg + 1
        } else {
            arg
        }
    }
}

pub(crate) static FORMATS: [Format; 256] = build_formats();

const fn build_formats() -> [Format; 256] {
    let mut table = [Format::new(WireType::Invalid, Arg::Const(0)); 256];

    let mut code = 0usize;
    while code <= POS_FIXINT_MAX as usize {
        table[code] = Format::new(WireType::Uint, Arg::Lead(0x7f));
        code += 1;
    }
    code = FIXMAP as usize;
    while code < FIXARRAY as usize {
        table[code] = Format::new(WireType::MapLen, Arg::Lead(0x0f));
        code += 1;
    }
    code = FIXARRAY as usize;
    while code < FIXSTR as usize {
        table[code] = Format::new(WireType::ArrayLen, Arg::Lead(0x0f));
        code += 1;
    }
    code = FIXSTR as usize;
    while code < NIL as usize {
        table[code] = Format::with_payload(WireType::String, Arg::Lead(0x1f));
        code += 1;
    }
    code = NEG_FIXINT_MIN as usize;
    while code <= 0xff {
        table[code] = Format::new(WireType::Int, Arg::LeadSigned);
        code += 1;
    }

    table[NIL as usize] = Format::new(WireType::Nil, Arg::Const(0));
    table[FALSE as usize] = Format::new(WireType::Bool, Arg::Const(0));
    table[TRUE as usize] = Format::new(WireType::Bool, Arg::Const(1));

    table[BIN8 as usize] = Format::with_payload(WireType::Binary, Arg::Unsigned(1));
    table[BIN16 as usize] = Format::with_payload(WireType::Binary, Arg::Unsigned(2));
    table[BIN32 as usize] = Format::with_payload(WireType::Binary, Arg::Unsigned(4));

    table[EXT8 as usize] = Format::with_payload(WireType::Extension, Arg::Unsigned(1));
    table[EXT16 as usize] = Format::with_payload(WireType::Extension, Arg::Unsigned(2));
    table[EXT32 as usize] = Format::with_payload(WireType::Extension, Arg::Unsigned(4));

    table[FLOAT32 as usize] = Format::new(WireType::Float, Arg::Float32);
    table[FLOAT64 as usize] = Format::new(WireType::Float, Arg::Float64);

    table[UINT8 as usize] = Format::new(WireType::Uint, Arg::Unsigned(1));
    table[UINT16 as usize] = Format::new(WireType::Uint, Arg::Unsigned(2));
    table[UINT32 as usize] = Format::new(WireType::Uint, Arg::Unsigned(4));
    table[UINT64 as usize] = Format::new(WireType::Uint, Arg::Unsigned(8));

    table[INT8 as usize] = Format::new(WireType::Int, Arg::Signed(1));
    table[INT16 as usize] = Format::new(WireType::Int, Arg::Signed(2));
    table[INT32 as usize] = Format::new(WireType::Int, Arg::Signed(4));
    table[INT64 as usize] = Format::new(WireType::Int, Arg::Signed(8));

    table[FIXEXT1 as usize] = Format::with_payload(WireType::Extension, Arg::Const(1));
    table[FIXEXT2 as usize] = Format::with_payload(WireType::Extension, Arg::Const(2));
    table[FIXEXT4 as usize] = Format::with_payload(WireType::Extension, Arg::Const(4));
    table[FIXEXT8 as usize] = Format::with_payload(WireType::Extension, Arg::Const(8));
    table[FIXEXT16 as usize] = Format::with_payload(WireType::Extension, Arg::Const(16));

    table[STR8 as usize] = Format::with_payload(WireType::String, Arg::Unsigned(1));
    table[STR16 as usize] = Format::with_payload(WireType::String, Arg::Unsigned(2));
    table[STR32 as usize] = Format::with_payload(WireType::String, Arg::Unsigned(4));

    table[ARRAY16 as usize] = Format::new(WireType::ArrayLen, Arg::Unsigned(2));
    table[ARRAY32 as usize] = Format::new(WireType::ArrayLen, Arg::Unsigned(4));
    table[MAP16 as usize] = Format::new(WireType::MapLen, Arg::Unsigned(2));
    table[MAP32 as usize] = Format::new(WireType::MapLen, Arg::Unsigned(4));

    // UNUSED stays Invalid.
    table
}

/// Fill the `n` slot from the lead byte and the bytes that follow it.
pub(crate) fn read_arg(code: u8, arg: Arg, bytes: &[u8]) -> u64 {
    match arg {
        Arg::Lead(mask) => (code & mask) as u64,
        Arg::LeadSigned => code as i8 as i64 as u64,
        Arg::Const(n) => n,
        Arg::Unsigned(_) => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        Arg::Signed(width) => {
            let raw = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            let shift = 64 - 8 * width as u32;
            (((raw << shift) as i64) >> shift) as u64
        }
        Arg::Float32 => {
            let bits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (f32::from_bits(bits) as f64).to_bits()
        }
        Arg::Float64 => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
    }
}
