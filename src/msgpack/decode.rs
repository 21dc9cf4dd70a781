//! Streaming, pull-based MessagePack decoder.
//!
//! The decoder reads one header at a time with [`Decoder::unpack`]. After a
//! header is read, the accessors describe the current value; string, binary
//! and extension payloads are available through [`Decoder::bytes`] (copy) or
//! [`Decoder::bytes_no_copy`] (borrowed until the next `unpack`).
//!
//! Small payloads are peeked straight out of the reader's buffer; larger ones
//! are read into an owned allocation.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use super::codec::Decode;
use super::extension::ExtensionRegistry;
use super::wire::{read_arg, Arg, WireType, FORMATS};
use crate::error::{ConvertError, Error, Result};

/// Payloads up to this size are borrowed from the reader's buffer.
pub const PEEK_THRESHOLD: usize = 4096;

/// Default capacity of the buffered reader wrapped around a raw stream.
pub const DEFAULT_READ_BUFFER: usize = 8192;

/// Cap on the up-front allocation for large payloads; the rest grows as
/// bytes actually arrive.
const MAX_PREALLOC: u64 = 64 * 1024;

enum Payload {
    None,
    Peeked(usize),
    Owned(Vec<u8>),
}

/// Pull decoder over a buffered byte stream.
pub struct Decoder<'a> {
    reader: Box<dyn BufRead + Send + 'a>,
    code: u8,
    ty: WireType,
    n: u64,
    ext_kind: i8,
    payload: Payload,
    latched: Option<Error>,
    convert: Option<ConvertError>,
    convert_count: usize,
    extensions: Option<Arc<ExtensionRegistry>>,
}

impl<'a> Decoder<'a> {
    /// Wrap an unbuffered reader.
    pub fn new(reader: impl Read + Send + 'a) -> Self {
        Self::with_buffer(BufReader::with_capacity(DEFAULT_READ_BUFFER, reader))
    }

    /// Use a reader that is already buffered.
    pub fn with_buffer(reader: impl BufRead + Send + 'a) -> Self {
        Self {
            reader: Box::new(reader),
            code: 0,
            ty: WireType::Invalid,
            n: 0,
            ext_kind: 0,
            payload: Payload::None,
            latched: None,
            convert: None,
            convert_count: 0,
            extensions: None,
        }
    }

    /// Decode from an in-memory buffer.
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        Self::with_buffer(bytes)
    }

    pub fn set_extensions(&mut self, extensions: Option<Arc<ExtensionRegistry>>) {
        self.extensions = extensions;
    }

    pub fn extensions(&self) -> Option<&Arc<ExtensionRegistry>> {
        self.extensions.as_ref()
    }

    /// Read the next value header.
    ///
    /// Returns [`Error::Eof`] when the stream ends cleanly before a lead byte.
    /// Any failure latches: later calls return the same error.
    pub fn unpack(&mut self) -> Result<()> {
        if let Some(err) = &self.latched {
            return Err(err.clone());
        }
        match self.read_header() {
            Ok(()) => Ok(()),
            Err(err) => Err(self.latch(err)),
        }
    }

    /// Read the header of a value nested inside the current one. End of
    /// stream here is always an error.
    pub fn unpack_nested(&mut self) -> Result<()> {
        match self.unpack() {
            Err(Error::Eof) => Err(self.latch(Error::UnexpectedEof)),
            other => other,
        }
    }

    fn latch(&mut self, err: Error) -> Error {
        self.ty = WireType::Invalid;
        self.payload = Payload::None;
        self.latched = Some(err.clone());
        err
    }

    fn read_header(&mut self) -> Result<()> {
        if let Payload::Peeked(n) = std::mem::replace(&mut self.payload, Payload::None) {
            self.reader.consume(n);
        }

        let code = {
            let buf = self.reader.fill_buf()?;
            match buf.first() {
                Some(&code) => code,
                None => return Err(Error::Eof),
            }
        };
        self.reader.consume(1);

        let format = FORMATS[code as usize];
        if format.ty == WireType::Invalid {
            return Err(Error::UnknownCode(code));
        }

        let width = match format.arg {
            Arg::Unsigned(w) | Arg::Signed(w) => w as usize,
            Arg::Float32 => 4,
            Arg::Float64 => 8,
            Arg::Lead(_) | Arg::LeadSigned | Arg::Const(_) => 0,
        };
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf[..width])?;

        self.code = code;
        self.ty = format.ty;
        self.n = read_arg(code, format.arg, &buf[..width]);

        if format.ty == WireType::Extension {
            let mut kind = [0u8; 1];
            self.reader.read_exact(&mut kind)?;
            self.ext_kind = kind[0] as i8;
        }

        if format.payload {
            self.load_payload()?;
        }
        Ok(())
    }

    fn load_payload(&mut self) -> Result<()> {
        let n = self.n;
        if n == 0 {
            // Nothing to read; a blocking stream may have no more bytes yet.
            self.payload = Payload::None;
            return Ok(());
        }
        if n <= PEEK_THRESHOLD as u64 {
            let available = self.reader.fill_buf()?;
            if available.len() as u64 >= n {
                self.payload = Payload::Peeked(n as usize);
                return Ok(());
            }
        }

        let mut data = Vec::with_capacity(n.min(MAX_PREALLOC) as usize);
        (&mut self.reader).take(n).read_to_end(&mut data)?;
        if data.len() as u64 != n {
            return Err(Error::UnexpectedEof);
        }
        self.payload = Payload::Owned(data);
        Ok(())
    }

    /// Semantic type of the current value.
    pub fn wire_type(&self) -> WireType {
        self.ty
    }

    /// Lead byte of the current value.
    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn bool(&self) -> bool {
        self.n != 0
    }

    /// The current integer as signed. Only meaningful for `Int`, or for
    /// `Uint` values below 2^63.
    pub fn int(&self) -> i64 {
        self.n as i64
    }

    pub fn uint(&self) -> u64 {
        self.n
    }

    pub fn float(&self) -> f64 {
        f64::from_bits(self.n)
    }

    /// Element count of an array, pair count of a map, or payload length.
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn extension_kind(&self) -> i8 {
        self.ext_kind
    }

    /// Borrow the current payload. The slice is invalidated by the next
    /// `unpack`.
    pub fn bytes_no_copy(&mut self) -> Result<&[u8]> {
        match &self.payload {
            Payload::None => Ok(&[]),
            Payload::Owned(data) => Ok(data),
            Payload::Peeked(n) => {
                let n = *n;
                let buf = self.reader.fill_buf()?;
                Ok(&buf[..n])
            }
        }
    }

    /// Copy the current payload.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.bytes_no_copy()?.to_vec())
    }

    fn child_count(&self) -> u64 {
        match self.ty {
            WireType::ArrayLen => self.n,
            WireType::MapLen => self.n.saturating_mul(2),
            _ => 0,
        }
    }

    /// Skip the current value, including every nested value of an array or
    /// map.
    pub fn skip(&mut self) -> Result<()> {
        let mut pending = self.child_count();
        while pending > 0 {
            self.unpack_nested()?;
            pending = pending - 1 + self.child_count();
        }
        Ok(())
    }

    /// Capture the exact encoding of the current value and its children.
    pub fn read_raw(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut pending = 1u64;
        loop {
            self.append_current(&mut out)?;
            pending = pending - 1 + self.child_count();
            if pending == 0 {
                return Ok(out);
            }
            self.unpack_nested()?;
        }
    }

    fn append_current(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let format = FORMATS[self.code as usize];
        out.push(self.code);
        match format.arg {
            Arg::Unsigned(w) | Arg::Signed(w) => {
                out.extend_from_slice(&self.n.to_be_bytes()[8 - w as usize..]);
            }
            Arg::Float32 => {
                let narrow = f64::from_bits(self.n) as f32;
                out.extend_from_slice(&narrow.to_bits().to_be_bytes());
            }
            Arg::Float64 => out.extend_from_slice(&self.n.to_be_bytes()),
            Arg::Lead(_) | Arg::LeadSigned | Arg::Const(_) => {}
        }
        if format.ty == WireType::Extension {
            out.push(self.ext_kind as u8);
        }
        if format.payload {
            let payload = self.bytes_no_copy()?;
            out.extend_from_slice(payload);
        }
        Ok(())
    }

    /// Record a conversion failure. Only the first one is kept.
    pub fn record_convert(&mut self, err: ConvertError) {
        self.convert_count += 1;
        if self.convert.is_none() {
            self.convert = Some(err);
        }
    }

    /// Record that the current value does not fit `target` and skip it.
    pub fn convert_mismatch(&mut self, target: &'static str) -> Result<()> {
        self.record_convert(ConvertError::new(self.ty, target));
        self.skip()
    }

    /// Number of conversion failures recorded so far. Containers compare it
    /// before and after decoding an entry to tell whether the entry converted.
    pub fn convert_count(&self) -> usize {
        self.convert_count
    }

    pub fn take_convert_error(&mut self) -> Option<ConvertError> {
        self.convert.take()
    }

    /// Decode the next value into `dst`.
    ///
    /// Conversion failures do not stop decoding; the first one is returned
    /// once the whole value has been consumed.
    pub fn decode<T: Decode + ?Sized>(&mut self, dst: &mut T) -> Result<()> {
        self.unpack()?;
        self.decode_current(dst)
    }

    /// Like [`Decoder::decode`], for a value whose header is already unpacked.
    pub fn decode_current<T: Decode + ?Sized>(&mut self, dst: &mut T) -> Result<()> {
        self.convert = None;
        dst.decode_into(self)?;
        match self.convert.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Unpack the next nested header and decode it into `dst`.
    pub fn decode_element<T: Decode + ?Sized>(&mut self, dst: &mut T) -> Result<()> {
        self.unpack_nested()?;
        dst.decode_into(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scalars() {
        let bytes = [0xcc, 0x80, 0xd0, 0xdf, 0xc3, 0xc0, 0xca, 0x3f, 0x00, 0x00, 0x00];
        let mut dec = Decoder::from_slice(&bytes);

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Uint);
        assert_eq!(dec.uint(), 128);

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Int);
        assert_eq!(dec.int(), -33);

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Bool);
        assert!(dec.bool());

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Nil);

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Float);
        assert_eq!(dec.float(), 0.5);

        assert!(matches!(dec.unpack(), Err(Error::Eof)));
    }

    #[test]
    fn test_payload_peek_and_copy() {
        let bytes = [0xa3, b'a', b'b', b'c', 0xc4, 0x02, 0x01, 0x02];
        let mut dec = Decoder::from_slice(&bytes);

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::String);
        assert_eq!(dec.bytes_no_copy().unwrap(), b"abc");
        assert_eq!(dec.bytes().unwrap(), b"abc".to_vec());

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Binary);
        assert_eq!(dec.bytes().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_large_payload_is_owned() {
        let mut bytes = vec![0xc5, 0x20, 0x00];
        bytes.extend(std::iter::repeat(7u8).take(0x2000));
        bytes.push(0x01);
        let mut dec = Decoder::new(std::io::Cursor::new(bytes));

        dec.unpack().unwrap();
        assert_eq!(dec.len(), 0x2000);
        let payload = dec.bytes().unwrap();
        assert_eq!(payload.len(), 0x2000);
        assert!(payload.iter().all(|&b| b == 7));

        dec.unpack().unwrap();
        assert_eq!(dec.uint(), 1);
    }

    #[test]
    fn test_extension_header() {
        let bytes = [0xd4, 0x02, 0x05, 0xc7, 0x03, 0x07, 1, 2, 3];
        let mut dec = Decoder::from_slice(&bytes);

        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Extension);
        assert_eq!(dec.extension_kind(), 2);
        assert_eq!(dec.bytes().unwrap(), vec![5]);

        dec.unpack().unwrap();
        assert_eq!(dec.extension_kind(), 7);
        assert_eq!(dec.bytes().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_skip_nested() {
        // [[1, {"a": [2, 3]}], "x"] followed by 9
        let bytes = [
            0x92, 0x92, 0x01, 0x81, 0xa1, b'a', 0x92, 0x02, 0x03, 0xa1, b'x', 0x09,
        ];
        let mut dec = Decoder::from_slice(&bytes);
        dec.unpack().unwrap();
        dec.skip().unwrap();
        dec.unpack().unwrap();
        assert_eq!(dec.uint(), 9);
    }

    #[test]
    fn test_read_raw_roundtrips_bytes() {
        let bytes = [
            0x93, 0xd1, 0xff, 0x7f, 0x81, 0xa1, b'k', 0xd4, 0x01, 0x2a, 0xcb, 0x3f, 0xf0, 0, 0,
            0, 0, 0, 0, 0xc0,
        ];
        let mut dec = Decoder::from_slice(&bytes);
        dec.unpack().unwrap();
        let raw = dec.read_raw().unwrap();
        assert_eq!(raw, bytes[..bytes.len() - 1].to_vec());
        dec.unpack().unwrap();
        assert_eq!(dec.wire_type(), WireType::Nil);
    }

    /// Hands out its bytes once, then behaves like an idle socket.
    struct Idle(Option<Vec<u8>>);

    impl Read for Idle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.take() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => Err(std::io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    #[test]
    fn test_empty_payload_does_not_read_ahead() {
        let cases: [(&[u8], WireType); 3] = [
            (&[0xa0], WireType::String),
            (&[0xc4, 0x00], WireType::Binary),
            (&[0xc7, 0x00, 0x05], WireType::Extension),
        ];
        for (bytes, ty) in cases {
            let mut dec = Decoder::new(Idle(Some(bytes.to_vec())));
            dec.unpack().unwrap();
            assert_eq!(dec.wire_type(), ty);
            assert_eq!(dec.len(), 0);
            assert_eq!(dec.bytes_no_copy().unwrap(), b"");
        }

        let mut dec = Decoder::new(Idle(Some(vec![0xa0])));
        let mut s = "stale".to_string();
        dec.decode(&mut s).unwrap();
        assert_eq!(s, "");
    }

    #[test]
    fn test_truncated_value_latches() {
        let bytes = [0x92, 0x01];
        let mut dec = Decoder::from_slice(&bytes);
        dec.unpack().unwrap();
        assert!(matches!(dec.skip(), Err(Error::UnexpectedEof)));
        assert!(matches!(dec.unpack(), Err(Error::UnexpectedEof)));
        assert_eq!(dec.wire_type(), WireType::Invalid);

        let short_int = [0xcd, 0x01];
        let mut dec = Decoder::from_slice(&short_int);
        assert!(matches!(dec.unpack(), Err(Error::UnexpectedEof)));

        let short_str = [0xa5, b'a'];
        let mut dec = Decoder::from_slice(&short_str);
        assert!(matches!(dec.unpack(), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn test_unknown_code_latches() {
        let bytes = [0xc1, 0x01];
        let mut dec = Decoder::from_slice(&bytes);
        assert!(matches!(dec.unpack(), Err(Error::UnknownCode(0xc1))));
        assert!(matches!(dec.unpack(), Err(Error::UnknownCode(0xc1))));
    }
}
