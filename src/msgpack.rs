//! MessagePack codec.
//!
//! # Layers
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Encode / Decode (host type) │  codec.rs, structs.rs, value.rs, extension.rs
//! ├──────────────────────────────┤
//! │  Field resolver (structs)    │  fields.rs
//! ├──────────────────────────────┤
//! │  Encoder / Decoder (wire)    │  encode.rs, decode.rs, wire.rs
//! └──────────────────────────────┘
//! ```
//!
//! The wire layer knows nothing about host types: it reads and writes headers,
//! lengths and payloads. Host types implement [`Encode`] and [`Decode`];
//! structs get both from [`msgpack_struct!`](crate::msgpack_struct).
//!
//! # Usage
//!
//! ```
//! use nvrpc::msgpack::{from_slice, to_vec, Value};
//!
//! let bytes = to_vec(&(1i64, "two", vec![3.0f64])).unwrap();
//!
//! let mut value = Value::Nil;
//! from_slice(&bytes, &mut value).unwrap();
//! assert_eq!(value.as_array().map(|a| a.len()), Some(3));
//! ```

mod codec;
mod decode;
mod encode;
mod extension;
mod fields;
mod structs;
mod value;
mod wire;

pub use codec::{from_slice, from_slice_with, to_vec, Decode, Encode, Raw};
pub use decode::{Decoder, DEFAULT_READ_BUFFER, PEEK_THRESHOLD};
pub use encode::Encoder;
pub use extension::{
    Buffer, Extension, ExtensionDecodeFn, ExtensionRegistry, Handle, Tabpage, Window,
};
pub use fields::{resolve, FieldDef, FieldDescriptor, StructFields, StructInfo};
pub use structs::{decode_struct, encode_struct, StructAccess};
pub use value::Value;
pub use wire::WireType;
