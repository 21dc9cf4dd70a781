//! Dynamic values for untyped destinations.

use std::collections::BTreeMap;
use std::fmt;

use super::codec::{Decode, Encode};
use super::decode::Decoder;
use super::encode::Encoder;
use super::extension::{Extension, Handle};
use super::wire::WireType;
use crate::error::{ConvertError, Result};

/// Any MessagePack value.
///
/// Decoding into a `Value` picks a canonical representation: `Int` for
/// signed wire integers, `Uint` for unsigned ones, `String` for UTF-8 text
/// (non-UTF-8 strings become `Binary`), and string-keyed maps. A map entry
/// whose key is not a string is recorded as a conversion error and skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Extension(Extension),
    Handle(Handle),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value, if it fits an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Uint(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(n) => Some(*n),
            Value::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::Uint(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up `key` in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }
}

impl Encode for Value {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        match self {
            Value::Nil => enc.pack_nil(),
            Value::Bool(b) => enc.pack_bool(*b),
            Value::Int(n) => enc.pack_int(*n),
            Value::Uint(n) => enc.pack_uint(*n),
            Value::Float(f) => enc.pack_float(*f),
            Value::String(s) => enc.pack_string(s),
            Value::Binary(b) => enc.pack_binary(b),
            Value::Array(items) => items.encode(enc),
            Value::Map(map) => map.encode(enc),
            Value::Extension(ext) => ext.encode(enc),
            Value::Handle(handle) => handle.encode(enc),
        }
    }

    fn is_empty_value(&self) -> bool {
        self.is_nil()
    }
}

impl Decode for Value {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        *self = match dec.wire_type() {
            WireType::Nil => Value::Nil,
            WireType::Bool => Value::Bool(dec.bool()),
            WireType::Int => Value::Int(dec.int()),
            WireType::Uint => Value::Uint(dec.uint()),
            WireType::Float => Value::Float(dec.float()),
            WireType::String => {
                let bytes = dec.bytes()?;
                match String::from_utf8(bytes) {
                    Ok(s) => Value::String(s),
                    Err(err) => Value::Binary(err.into_bytes()),
                }
            }
            WireType::Binary => Value::Binary(dec.bytes()?),
            WireType::ArrayLen => {
                let n = dec.len();
                let mut items = Vec::with_capacity(n.min(1024) as usize);
                for _ in 0..n {
                    let mut item = Value::Nil;
                    dec.decode_element(&mut item)?;
                    items.push(item);
                }
                Value::Array(items)
            }
            WireType::MapLen => Value::Map(decode_string_map(dec)?),
            WireType::Extension => {
                let kind = dec.extension_kind();
                let data = dec.bytes()?;
                match dec.extensions().and_then(|r| r.decode(kind, &data)) {
                    Some(Ok(value)) => value,
                    Some(Err(err)) => {
                        dec.record_convert(
                            ConvertError::new(WireType::Extension, "Value")
                                .with_detail(err.to_string()),
                        );
                        return Ok(());
                    }
                    None => Value::Extension(Extension { kind, data }),
                }
            }
            WireType::Invalid => return dec.convert_mismatch("Value"),
        };
        Ok(())
    }
}

fn decode_string_map(dec: &mut Decoder<'_>) -> Result<BTreeMap<String, Value>> {
    let n = dec.len();
    let mut map = BTreeMap::new();
    for _ in 0..n {
        dec.unpack_nested()?;
        let key = match dec.wire_type() {
            WireType::String => std::str::from_utf8(dec.bytes_no_copy()?)
                .ok()
                .map(str::to_string),
            _ => None,
        };
        let Some(key) = key else {
            dec.convert_mismatch("map key")?;
            dec.unpack_nested()?;
            dec.skip()?;
            continue;
        };
        let mut value = Value::Nil;
        dec.decode_element(&mut value)?;
        map.insert(key, value);
    }
    Ok(map)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Uint(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Binary(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Extension(ext) => write!(f, "ext({}, {} bytes)", ext.kind, ext.data.len()),
            Value::Handle(handle) => write!(f, "handle({}, {})", handle.kind, handle.id),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Uint(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

// =============================================================================
// JSON interop
// =============================================================================

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        use serde_json::json;

        match value {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(n) => json!(n),
            Value::Uint(n) => json!(n),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => json!(s),
            Value::Binary(bytes) => json!(bytes),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::Extension(ext) => json!({ "kind": ext.kind, "data": ext.data }),
            Value::Handle(handle) => json!({ "kind": handle.kind, "id": handle.id }),
        }
    }
}

impl Encode for serde_json::Value {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        match self {
            serde_json::Value::Null => enc.pack_nil(),
            serde_json::Value::Bool(b) => enc.pack_bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    enc.pack_uint(u)
                } else if let Some(i) = n.as_i64() {
                    enc.pack_int(i)
                } else {
                    enc.pack_float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => enc.pack_string(s),
            serde_json::Value::Array(items) => items.encode(enc),
            serde_json::Value::Object(map) => {
                enc.pack_map_len(map.len() as u64)?;
                for (key, value) in map {
                    enc.pack_string(key)?;
                    value.encode(enc)?;
                }
                Ok(())
            }
        }
    }

    fn is_empty_value(&self) -> bool {
        self.is_null()
    }
}

impl Decode for serde_json::Value {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        let mut value = Value::Nil;
        value.decode_into(dec)?;
        *self = serde_json::Value::from(&value);
        Ok(())
    }
}
