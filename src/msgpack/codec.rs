//! Per-type encode/decode strategies.
//!
//! [`Encode`] and [`Decode`] are the codec functions of this crate: every host
//! type that crosses the wire implements them, either through the impls in this
//! module, through [`msgpack_struct!`](crate::msgpack_struct), or by hand when
//! a type wants full control over its encoding.
//!
//! Decoding writes into an existing destination. When a wire value does not
//! fit the destination, the decoder records a [`ConvertError`], skips the value
//! and leaves the destination as it was.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use super::decode::Decoder;
use super::encode::Encoder;
use super::extension::ExtensionRegistry;
use super::fields::StructInfo;
use super::structs::StructAccess;
use super::wire::WireType;
use crate::error::{ConvertError, Result};

/// Serialize a host value.
pub trait Encode {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()>;

    /// Whether `omitempty` treats this value as absent.
    fn is_empty_value(&self) -> bool {
        false
    }

    /// Encode a slice of `Self`. `u8` overrides this to write binary.
    fn encode_slice(items: &[Self], enc: &mut Encoder<'_>) -> Result<()>
    where
        Self: Sized,
    {
        enc.pack_array_len(items.len() as u64)?;
        for item in items {
            item.encode(enc)?;
        }
        Ok(())
    }

    /// Field layout, for types declared with `msgpack_struct!`.
    fn struct_info() -> Option<StructInfo>
    where
        Self: Sized,
    {
        None
    }

    fn as_struct(&self) -> Option<&dyn StructAccess> {
        None
    }
}

/// Deserialize into an existing host value.
///
/// `decode_into` is called with the value's header already unpacked.
pub trait Decode {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()>;

    /// Decode into a growable sequence of `Self`. `u8` overrides this to
    /// accept binary and string values.
    fn decode_vec(dst: &mut Vec<Self>, dec: &mut Decoder<'_>) -> Result<()>
    where
        Self: Sized + Default,
    {
        if dec.wire_type() != WireType::ArrayLen {
            return dec.convert_mismatch("sequence");
        }
        let n = dec.len() as usize;
        dst.truncate(n);
        for i in 0..n {
            if i == dst.len() {
                dst.push(Self::default());
            }
            dec.decode_element(&mut dst[i])?;
        }
        Ok(())
    }

    /// Decode into a fixed-size sequence: the tail is reset to the default
    /// value and surplus elements are skipped.
    fn decode_slice(dst: &mut [Self], dec: &mut Decoder<'_>) -> Result<()>
    where
        Self: Sized + Default,
    {
        if dec.wire_type() != WireType::ArrayLen {
            return dec.convert_mismatch("array");
        }
        let n = dec.len() as usize;
        for i in 0..n {
            match dst.get_mut(i) {
                Some(slot) => dec.decode_element(slot)?,
                None => {
                    dec.unpack_nested()?;
                    dec.skip()?;
                }
            }
        }
        for slot in dst.iter_mut().skip(n) {
            *slot = Self::default();
        }
        Ok(())
    }

    /// Parse the literal of an `empty = "..."` field attribute. Only
    /// integers, booleans and strings accept one.
    fn from_sentinel(_literal: &str) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }

    fn as_struct_mut(&mut self) -> Option<&mut dyn StructAccess> {
        None
    }
}

/// Encode `value` into a new buffer.
pub fn to_vec<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.encode(&mut Encoder::new(&mut buf))?;
    Ok(buf)
}

/// Decode one value from `bytes` into `dst`.
pub fn from_slice<T: Decode + ?Sized>(bytes: &[u8], dst: &mut T) -> Result<()> {
    from_slice_with(bytes, dst, None)
}

/// Decode one value from `bytes`, resolving extensions through `extensions`.
pub fn from_slice_with<T: Decode + ?Sized>(
    bytes: &[u8],
    dst: &mut T,
    extensions: Option<Arc<ExtensionRegistry>>,
) -> Result<()> {
    let mut dec = Decoder::from_slice(bytes);
    dec.set_extensions(extensions);
    dec.decode(dst)
}

// =============================================================================
// Scalars
// =============================================================================

impl Encode for bool {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_bool(*self)
    }

    fn is_empty_value(&self) -> bool {
        !*self
    }
}

impl Decode for bool {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        match dec.wire_type() {
            WireType::Bool => *self = dec.bool(),
            WireType::Nil => *self = false,
            _ => dec.convert_mismatch("bool")?,
        }
        Ok(())
    }

    fn from_sentinel(literal: &str) -> Option<Self> {
        literal.parse().ok()
    }
}

/// Read the current value as a signed integer. `None` means the value was
/// recorded as a conversion failure and consumed.
fn decode_i64(dec: &mut Decoder<'_>, target: &'static str) -> Result<Option<i64>> {
    match dec.wire_type() {
        WireType::Int => Ok(Some(dec.int())),
        WireType::Uint => {
            let v = dec.uint();
            if v <= i64::MAX as u64 {
                Ok(Some(v as i64))
            } else {
                dec.record_convert(
                    ConvertError::new(WireType::Uint, target).with_detail(v.to_string()),
                );
                Ok(None)
            }
        }
        WireType::Float => {
            let f = dec.float();
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Ok(Some(f as i64))
            } else {
                dec.record_convert(
                    ConvertError::new(WireType::Float, target).with_detail(f.to_string()),
                );
                Ok(None)
            }
        }
        WireType::Nil => Ok(Some(0)),
        _ => {
            dec.convert_mismatch(target)?;
            Ok(None)
        }
    }
}

fn decode_u64(dec: &mut Decoder<'_>, target: &'static str) -> Result<Option<u64>> {
    match dec.wire_type() {
        WireType::Uint => Ok(Some(dec.uint())),
        WireType::Int => {
            let v = dec.int();
            if v >= 0 {
                Ok(Some(v as u64))
            } else {
                dec.record_convert(
                    ConvertError::new(WireType::Int, target).with_detail(v.to_string()),
                );
                Ok(None)
            }
        }
        WireType::Float => {
            let f = dec.float();
            if f.fract() == 0.0 && f >= 0.0 && f < u64::MAX as f64 {
                Ok(Some(f as u64))
            } else {
                dec.record_convert(
                    ConvertError::new(WireType::Float, target).with_detail(f.to_string()),
                );
                Ok(None)
            }
        }
        WireType::Nil => Ok(Some(0)),
        _ => {
            dec.convert_mismatch(target)?;
            Ok(None)
        }
    }
}

macro_rules! impl_signed {
    ($($t:ty),*) => {$(
        impl Encode for $t {
            fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
                enc.pack_int(*self as i64)
            }

            fn is_empty_value(&self) -> bool {
                *self == 0
            }
        }

        impl Decode for $t {
            fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
                let found = dec.wire_type();
                if let Some(v) = decode_i64(dec, stringify!($t))? {
                    match <$t>::try_from(v) {
                        Ok(v) => *self = v,
                        Err(_) => dec.record_convert(
                            ConvertError::new(found, stringify!($t)).with_detail(v.to_string()),
                        ),
                    }
                }
                Ok(())
            }

            fn from_sentinel(literal: &str) -> Option<Self> {
                literal.parse().ok()
            }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($t:ty),*) => {$(
        impl Encode for $t {
            fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
                enc.pack_uint(*self as u64)
            }

            fn is_empty_value(&self) -> bool {
                *self == 0
            }
        }

        impl Decode for $t {
            fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
                let found = dec.wire_type();
                if let Some(v) = decode_u64(dec, stringify!($t))? {
                    match <$t>::try_from(v) {
                        Ok(v) => *self = v,
                        Err(_) => dec.record_convert(
                            ConvertError::new(found, stringify!($t)).with_detail(v.to_string()),
                        ),
                    }
                }
                Ok(())
            }

            fn from_sentinel(literal: &str) -> Option<Self> {
                literal.parse().ok()
            }
        }
    )*};
}

impl_signed!(i8, i16, i32, i64, isize);
impl_unsigned!(u16, u32, u64, usize);

impl Encode for u8 {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_uint(*self as u64)
    }

    fn is_empty_value(&self) -> bool {
        *self == 0
    }

    fn encode_slice(items: &[Self], enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_binary(items)
    }
}

impl Decode for u8 {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        let found = dec.wire_type();
        if let Some(v) = decode_u64(dec, "u8")? {
            match u8::try_from(v) {
                Ok(v) => *self = v,
                Err(_) => dec
                    .record_convert(ConvertError::new(found, "u8").with_detail(v.to_string())),
            }
        }
        Ok(())
    }

    fn decode_vec(dst: &mut Vec<Self>, dec: &mut Decoder<'_>) -> Result<()> {
        match dec.wire_type() {
            WireType::Binary | WireType::String => {
                dst.clear();
                dst.extend_from_slice(dec.bytes_no_copy()?);
                Ok(())
            }
            WireType::ArrayLen => {
                let n = dec.len() as usize;
                dst.truncate(n);
                for i in 0..n {
                    if i == dst.len() {
                        dst.push(0);
                    }
                    dec.decode_element(&mut dst[i])?;
                }
                Ok(())
            }
            _ => dec.convert_mismatch("bytes"),
        }
    }

    fn decode_slice(dst: &mut [Self], dec: &mut Decoder<'_>) -> Result<()> {
        match dec.wire_type() {
            WireType::Binary | WireType::String => {
                let bytes = dec.bytes_no_copy()?;
                let n = bytes.len().min(dst.len());
                dst[..n].copy_from_slice(&bytes[..n]);
                dst[n..].fill(0);
                Ok(())
            }
            WireType::ArrayLen => {
                let n = dec.len() as usize;
                for i in 0..n {
                    match dst.get_mut(i) {
                        Some(slot) => dec.decode_element(slot)?,
                        None => {
                            dec.unpack_nested()?;
                            dec.skip()?;
                        }
                    }
                }
                for slot in dst.iter_mut().skip(n) {
                    *slot = 0;
                }
                Ok(())
            }
            _ => dec.convert_mismatch("bytes"),
        }
    }

    fn from_sentinel(literal: &str) -> Option<Self> {
        literal.parse().ok()
    }
}

impl Encode for f64 {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_float(*self)
    }

    fn is_empty_value(&self) -> bool {
        *self == 0.0
    }
}

impl Encode for f32 {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_float(*self as f64)
    }

    fn is_empty_value(&self) -> bool {
        *self == 0.0
    }
}

fn decode_f64(dec: &mut Decoder<'_>, target: &'static str) -> Result<Option<f64>> {
    match dec.wire_type() {
        WireType::Float => Ok(Some(dec.float())),
        WireType::Int => Ok(Some(dec.int() as f64)),
        WireType::Uint => Ok(Some(dec.uint() as f64)),
        WireType::Nil => Ok(Some(0.0)),
        _ => {
            dec.convert_mismatch(target)?;
            Ok(None)
        }
    }
}

impl Decode for f64 {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        if let Some(v) = decode_f64(dec, "f64")? {
            *self = v;
        }
        Ok(())
    }
}

impl Decode for f32 {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        if let Some(v) = decode_f64(dec, "f32")? {
            *self = v as f32;
        }
        Ok(())
    }
}

impl Encode for str {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_string(self)
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl Encode for String {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_string(self)
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl Decode for String {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        match dec.wire_type() {
            WireType::String | WireType::Binary => {
                let found = dec.wire_type();
                match std::str::from_utf8(dec.bytes_no_copy()?) {
                    Ok(s) => {
                        self.clear();
                        self.push_str(s);
                    }
                    Err(e) => dec.record_convert(
                        ConvertError::new(found, "String").with_detail(e.to_string()),
                    ),
                }
                Ok(())
            }
            WireType::Nil => {
                self.clear();
                Ok(())
            }
            _ => dec.convert_mismatch("String"),
        }
    }

    fn from_sentinel(literal: &str) -> Option<Self> {
        Some(literal.to_string())
    }
}

impl Encode for () {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_nil()
    }

    fn is_empty_value(&self) -> bool {
        true
    }
}

impl Decode for () {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        dec.skip()
    }
}

// =============================================================================
// Pointers and optionals
// =============================================================================

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        (**self).encode(enc)
    }

    fn is_empty_value(&self) -> bool {
        (**self).is_empty_value()
    }
}

impl<T: Encode + ?Sized> Encode for Box<T> {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        (**self).encode(enc)
    }

    fn is_empty_value(&self) -> bool {
        (**self).is_empty_value()
    }

    fn struct_info() -> Option<StructInfo> {
        None
    }

    fn as_struct(&self) -> Option<&dyn StructAccess> {
        (**self).as_struct()
    }
}

impl<T: Decode + ?Sized> Decode for Box<T> {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        (**self).decode_into(dec)
    }

    fn as_struct_mut(&mut self) -> Option<&mut dyn StructAccess> {
        (**self).as_struct_mut()
    }
}

impl<T: Encode + ?Sized> Encode for Arc<T> {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        (**self).encode(enc)
    }

    fn is_empty_value(&self) -> bool {
        (**self).is_empty_value()
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        match self {
            Some(v) => v.encode(enc),
            None => enc.pack_nil(),
        }
    }

    fn is_empty_value(&self) -> bool {
        self.is_none()
    }
}

impl<T: Decode + Default> Decode for Option<T> {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        if dec.wire_type() == WireType::Nil {
            *self = None;
            return Ok(());
        }
        self.get_or_insert_with(T::default).decode_into(dec)
    }
}

// =============================================================================
// Sequences
// =============================================================================

impl<T: Encode> Encode for [T] {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        T::encode_slice(self, enc)
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        T::encode_slice(self, enc)
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Decode + Default> Decode for Vec<T> {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        if dec.wire_type() == WireType::Nil {
            self.clear();
            return Ok(());
        }
        T::decode_vec(self, dec)
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        T::encode_slice(self, enc)
    }

    fn is_empty_value(&self) -> bool {
        N == 0
    }
}

impl<T: Decode + Default, const N: usize> Decode for [T; N] {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        if dec.wire_type() == WireType::Nil {
            for slot in self.iter_mut() {
                *slot = T::default();
            }
            return Ok(());
        }
        T::decode_slice(self, dec)
    }
}

// =============================================================================
// Maps
// =============================================================================

fn encode_map<'m, K, V>(
    len: usize,
    entries: impl Iterator<Item = (&'m K, &'m V)>,
    enc: &mut Encoder<'_>,
) -> Result<()>
where
    K: Encode + 'm,
    V: Encode + 'm,
{
    enc.pack_map_len(len as u64)?;
    for (k, v) in entries {
        k.encode(enc)?;
        v.encode(enc)?;
    }
    Ok(())
}

/// Decode map entries, handing each converted entry to `insert`. An entry
/// whose key fails to convert is skipped.
fn decode_map<K, V>(dec: &mut Decoder<'_>, mut insert: impl FnMut(K, V)) -> Result<()>
where
    K: Decode + Default,
    V: Decode + Default,
{
    let n = dec.len();
    for _ in 0..n {
        let mut key = K::default();
        let before = dec.convert_count();
        dec.decode_element(&mut key)?;
        if dec.convert_count() != before {
            dec.unpack_nested()?;
            dec.skip()?;
            continue;
        }
        let mut value = V::default();
        dec.decode_element(&mut value)?;
        insert(key, value);
    }
    Ok(())
}

impl<K: Encode, V: Encode, S> Encode for HashMap<K, V, S> {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        encode_map(self.len(), self.iter(), enc)
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Default + Eq + Hash,
    V: Decode + Default,
    S: BuildHasher,
{
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        match dec.wire_type() {
            WireType::MapLen => decode_map(dec, |k, v| {
                self.insert(k, v);
            }),
            WireType::Nil => {
                self.clear();
                Ok(())
            }
            _ => dec.convert_mismatch("map"),
        }
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        encode_map(self.len(), self.iter(), enc)
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> Decode for BTreeMap<K, V>
where
    K: Decode + Default + Ord,
    V: Decode + Default,
{
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        match dec.wire_type() {
            WireType::MapLen => decode_map(dec, |k, v| {
                self.insert(k, v);
            }),
            WireType::Nil => {
                self.clear();
                Ok(())
            }
            _ => dec.convert_mismatch("map"),
        }
    }
}

// =============================================================================
// Tuples
// =============================================================================

macro_rules! impl_tuple {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
                enc.pack_array_len($len)?;
                $(self.$idx.encode(enc)?;)+
                Ok(())
            }
        }

        impl<$($name: Decode + Default),+> Decode for ($($name,)+) {
            fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
                match dec.wire_type() {
                    WireType::ArrayLen => {
                        let n = dec.len();
                        $(
                            if $idx < n {
                                dec.decode_element(&mut self.$idx)?;
                            } else {
                                self.$idx = $name::default();
                            }
                        )+
                        for _ in $len..n {
                            dec.unpack_nested()?;
                            dec.skip()?;
                        }
                        Ok(())
                    }
                    WireType::Nil => {
                        *self = Default::default();
                        Ok(())
                    }
                    _ => dec.convert_mismatch("tuple"),
                }
            }
        }
    };
}

impl_tuple!(1; A 0);
impl_tuple!(2; A 0, B 1);
impl_tuple!(3; A 0, B 1, C 2);
impl_tuple!(4; A 0, B 1, C 2, D 3);
impl_tuple!(5; A 0, B 1, C 2, D 3, E 4);
impl_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_tuple!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_tuple!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

// =============================================================================
// Pre-encoded values
// =============================================================================

/// A value kept in its encoded form.
///
/// Encoding writes the bytes verbatim; decoding captures the exact bytes of
/// the next value, children included, without interpreting them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Raw(pub Vec<u8>);

impl Raw {
    /// Encode `value` now and keep the bytes.
    pub fn encode_from<T: Encode + ?Sized>(value: &T) -> Result<Self> {
        to_vec(value).map(Raw)
    }

    /// Decode the captured bytes into `dst`.
    pub fn decode_to<T: Decode + ?Sized>(
        &self,
        dst: &mut T,
        extensions: Option<Arc<ExtensionRegistry>>,
    ) -> Result<()> {
        from_slice_with(&self.0, dst, extensions)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Encode for Raw {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        if self.0.is_empty() {
            return enc.pack_nil();
        }
        enc.pack_raw(&self.0)
    }

    fn is_empty_value(&self) -> bool {
        self.0.is_empty()
    }
}

impl Decode for Raw {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        self.0 = dec.read_raw()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    fn roundtrip<T: Encode + Decode + Default>(value: &T) -> T {
        let bytes = to_vec(value).unwrap();
        let mut out = T::default();
        from_slice(&bytes, &mut out).unwrap();
        out
    }

    #[test]
    fn test_end_to_end_integers() {
        assert_eq!(to_vec(&0x80i64).unwrap(), vec![0xcc, 0x80]);
        assert_eq!(roundtrip(&0x80i64), 128);

        assert_eq!(to_vec(&-0x21i64).unwrap(), vec![0xd0, 0xdf]);
        assert_eq!(roundtrip(&-0x21i64), -33);
    }

    #[test]
    fn test_integer_extremes() {
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            let bytes = to_vec(&v).unwrap();
            assert!(bytes.len() <= 9);
            assert_eq!(roundtrip(&v), v);
        }
        for v in [0u64, 127, 128, u32::MAX as u64, u64::MAX] {
            let bytes = to_vec(&v).unwrap();
            assert!(bytes.len() <= 9);
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn test_end_to_end_strings() {
        let s31 = "1234567890123456789012345678901";
        let bytes = to_vec(s31).unwrap();
        assert_eq!(bytes[0], 0xbf);
        assert_eq!(&bytes[1..], s31.as_bytes());
        assert_eq!(roundtrip(&s31.to_string()), s31);

        let s32 = "12345678901234567890123456789012";
        let bytes = to_vec(s32).unwrap();
        assert_eq!(&bytes[..2], &[0xd9, 0x20]);
        assert_eq!(&bytes[2..], s32.as_bytes());
    }

    #[test]
    fn test_bytes_are_binary() {
        let data = vec![0u8, 1, 2, 255];
        let bytes = to_vec(&data).unwrap();
        assert_eq!(bytes, vec![0xc4, 4, 0, 1, 2, 255]);
        assert_eq!(roundtrip(&data), data);

        let mut from_string = Vec::<u8>::new();
        from_slice(&to_vec("hi").unwrap(), &mut from_string).unwrap();
        assert_eq!(from_string, b"hi".to_vec());
    }

    #[test]
    fn test_sequence_roundtrip() {
        let items = vec![1i64, -2, 300, -40000];
        assert_eq!(roundtrip(&items), items);

        let words = vec!["a".to_string(), "bc".to_string()];
        assert_eq!(roundtrip(&words), words);
    }

    #[test]
    fn test_vec_is_resized_to_incoming_length() {
        let mut dst = vec![9i64; 5];
        from_slice(&to_vec(&vec![1i64, 2]).unwrap(), &mut dst).unwrap();
        assert_eq!(dst, vec![1, 2]);
    }

    #[test]
    fn test_fixed_array_fill_and_drop() {
        let mut short = [7i32; 4];
        from_slice(&to_vec(&vec![1i32, 2]).unwrap(), &mut short).unwrap();
        assert_eq!(short, [1, 2, 0, 0]);

        let mut long = [0i32; 2];
        from_slice(&to_vec(&vec![1i32, 2, 3]).unwrap(), &mut long).unwrap();
        assert_eq!(long, [1, 2]);

        let mut bytes = [0u8; 4];
        from_slice(&to_vec(&vec![1u8, 2]).unwrap(), &mut bytes).unwrap();
        assert_eq!(bytes, [1, 2, 0, 0]);
    }

    #[test]
    fn test_convert_errors_are_recoverable() {
        let mut v = 5i64;
        let err = from_slice(&to_vec(&1.5f64).unwrap(), &mut v).unwrap_err();
        assert!(matches!(err, Error::Convert(_)));
        assert_eq!(v, 5);

        let mut small = 0i8;
        let err = from_slice(&to_vec(&300i64).unwrap(), &mut small).unwrap_err();
        assert!(matches!(err, Error::Convert(_)));

        let mut signed = 0i64;
        let err = from_slice(&to_vec(&u64::MAX).unwrap(), &mut signed).unwrap_err();
        assert!(matches!(err, Error::Convert(_)));

        let mut whole = 0i64;
        from_slice(&to_vec(&2.0f64).unwrap(), &mut whole).unwrap();
        assert_eq!(whole, 2);
    }

    #[test]
    fn test_convert_error_keeps_decoding() {
        // ["x", 2, 3] into Vec<i64>: the first element fails, the rest decode.
        let bytes = to_vec(&("x", 2i64, 3i64)).unwrap();
        let mut dst: Vec<i64> = Vec::new();
        let err = from_slice(&bytes, &mut dst).unwrap_err();
        assert!(matches!(err, Error::Convert(_)));
        assert_eq!(dst, vec![0, 2, 3]);
    }

    #[test]
    fn test_map_roundtrip_and_bad_keys() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1i64);
        map.insert("b".to_string(), 2i64);
        assert_eq!(roundtrip(&map), map);

        // {1: 10, "k": 20}
        let bytes = [0x82, 0x01, 0x0a, 0xa1, b'k', 0x14];
        let mut dst: HashMap<String, i64> = HashMap::new();
        let err = from_slice(&bytes, &mut dst).unwrap_err();
        assert!(matches!(err, Error::Convert(_)));
        assert_eq!(dst.len(), 1);
        assert_eq!(dst["k"], 20);
    }

    #[test]
    fn test_option_and_nil() {
        let mut v: Option<i64> = Some(3);
        from_slice(&[0xc0], &mut v).unwrap();
        assert_eq!(v, None);
        from_slice(&[0x07], &mut v).unwrap();
        assert_eq!(v, Some(7));

        let mut s = "keep".to_string();
        from_slice(&[0xc0], &mut s).unwrap();
        assert_eq!(s, "");
    }

    #[test]
    fn test_tuple_extra_and_missing() {
        let mut pair: (i64, String) = (0, String::new());
        from_slice(&to_vec(&(1i64, "x", true)).unwrap(), &mut pair).unwrap();
        assert_eq!(pair, (1, "x".to_string()));

        let mut triple: (i64, i64, i64) = (9, 9, 9);
        from_slice(&to_vec(&(1i64,)).unwrap(), &mut triple).unwrap();
        assert_eq!(triple, (1, 0, 0));
    }

    #[test]
    fn test_raw_capture() {
        let bytes = to_vec(&(1i64, vec!["a", "b"])).unwrap();
        let mut raw = Raw::default();
        from_slice(&bytes, &mut raw).unwrap();
        assert_eq!(raw.0, bytes);

        let mut decoded: (i64, Vec<String>) = Default::default();
        raw.decode_to(&mut decoded, None).unwrap();
        assert_eq!(decoded, (1, vec!["a".to_string(), "b".to_string()]));
    }
}
