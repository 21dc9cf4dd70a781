//! Extension values, the extension registry, and the editor's handle types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::codec::{from_slice, to_vec, Decode, Encode};
use super::decode::Decoder;
use super::encode::Encoder;
use super::value::Value;
use super::wire::WireType;
use crate::error::{ConvertError, Result};

/// An extension value the decoder had no registry entry for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Extension {
    pub kind: i8,
    pub data: Vec<u8>,
}

impl Extension {
    pub fn new(kind: i8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }
}

impl Encode for Extension {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_extension(self.kind, &self.data)
    }
}

impl Decode for Extension {
    fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        match dec.wire_type() {
            WireType::Extension => {
                self.kind = dec.extension_kind();
                self.data = dec.bytes()?;
                Ok(())
            }
            WireType::Nil => {
                *self = Extension::default();
                Ok(())
            }
            _ => dec.convert_mismatch("Extension"),
        }
    }
}

/// Decodes the payload of one extension kind.
pub type ExtensionDecodeFn = Arc<dyn Fn(&[u8]) -> Result<Value> + Send + Sync>;

/// Maps extension kinds to decode functions.
///
/// Consulted when an extension is decoded into a [`Value`]. Kinds without an
/// entry surface as [`Value::Extension`].
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    decoders: HashMap<i8, ExtensionDecodeFn>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the editor's handle kinds: buffer, window and tabpage
    /// decode to [`Value::Handle`].
    pub fn editor() -> Self {
        let mut registry = Self::new();
        for kind in [Buffer::KIND, Window::KIND, Tabpage::KIND] {
            registry.register(kind, move |data| {
                Ok(Value::Handle(Handle {
                    kind,
                    id: handle_id(data)?,
                }))
            });
        }
        registry
    }

    /// Install `decode` for `kind`, replacing any previous entry.
    pub fn register<F>(&mut self, kind: i8, decode: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<Value> + Send + Sync + 'static,
    {
        self.decoders.insert(kind, Arc::new(decode));
        self
    }

    pub fn contains(&self, kind: i8) -> bool {
        self.decoders.contains_key(&kind)
    }

    /// Run the decode function for `kind`, if one is registered.
    pub fn decode(&self, kind: i8, data: &[u8]) -> Option<Result<Value>> {
        self.decoders.get(&kind).map(|decode| decode(data))
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.decoders.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("ExtensionRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

/// A decoded editor handle of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    pub kind: i8,
    pub id: i64,
}

impl Encode for Handle {
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_extension(self.kind, &to_vec(&self.id)?)
    }
}

/// Handle payloads are a MessagePack integer.
fn handle_id(data: &[u8]) -> Result<i64> {
    let mut id = 0i64;
    from_slice(data, &mut id)?;
    Ok(id)
}

fn decode_handle(dec: &mut Decoder<'_>, kind: i8, target: &'static str) -> Result<Option<i64>> {
    match dec.wire_type() {
        WireType::Extension if dec.extension_kind() == kind => {
            let data = dec.bytes()?;
            match handle_id(&data) {
                Ok(id) => Ok(Some(id)),
                Err(err) => {
                    dec.record_convert(
                        ConvertError::new(WireType::Extension, target).with_detail(err.to_string()),
                    );
                    Ok(None)
                }
            }
        }
        WireType::Extension => {
            let found = dec.extension_kind();
            dec.record_convert(
                ConvertError::new(WireType::Extension, target)
                    .with_detail(format!("extension kind {}", found)),
            );
            Ok(None)
        }
        WireType::Nil => Ok(Some(0)),
        _ => {
            dec.convert_mismatch(target)?;
            Ok(None)
        }
    }
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident = $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl $name {
            /// Extension kind on the wire.
            pub const KIND: i8 = $kind;

            pub fn id(&self) -> i64 {
                self.0
            }
        }

        impl Encode for $name {
            fn encode(&self, enc: &mut Encoder<'_>) -> Result<()> {
                enc.pack_extension(Self::KIND, &to_vec(&self.0)?)
            }

            fn is_empty_value(&self) -> bool {
                self.0 == 0
            }
        }

        impl Decode for $name {
            fn decode_into(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
                if let Some(id) = decode_handle(dec, Self::KIND, stringify!($name))? {
                    self.0 = id;
                }
                Ok(())
            }
        }

        impl From<$name> for Handle {
            fn from(handle: $name) -> Self {
                Handle {
                    kind: $name::KIND,
                    id: handle.0,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", stringify!($name), self.0)
            }
        }
    };
}

handle_type!(
    /// Editor buffer handle.
    Buffer = 0
);
handle_type!(
    /// Editor window handle.
    Window = 1
);
handle_type!(
    /// Editor tabpage handle.
    Tabpage = 2
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::msgpack::from_slice_with;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_end_to_end_extensions() {
        let fixed = Extension::new(6, b"1234567890123456".to_vec());
        let bytes = to_vec(&fixed).unwrap();
        assert_eq!(&bytes[..2], &[0xd8, 0x06]);
        assert_eq!(&bytes[2..], b"1234567890123456");

        let odd = Extension::new(7, b"12345678901234567".to_vec());
        let bytes = to_vec(&odd).unwrap();
        assert_eq!(&bytes[..3], &[0xc7, 0x11, 0x07]);
        assert_eq!(bytes.len(), 3 + 17);

        let mut back = Extension::default();
        from_slice(&bytes, &mut back).unwrap();
        assert_eq!(back, odd);
    }

    #[test]
    fn test_handle_encoding() {
        let bytes = to_vec(&Buffer(5)).unwrap();
        assert_eq!(bytes, vec![0xd4, 0x00, 0x05]);

        let bytes = to_vec(&Window(1000)).unwrap();
        assert_eq!(bytes, vec![0xc7, 0x03, 0x01, 0xcd, 0x03, 0xe8]);

        let mut window = Window::default();
        from_slice(&bytes, &mut window).unwrap();
        assert_eq!(window, Window(1000));
    }

    #[test]
    fn test_handle_kind_mismatch() {
        let bytes = to_vec(&Tabpage(3)).unwrap();
        let mut buffer = Buffer(9);
        let err = from_slice(&bytes, &mut buffer).unwrap_err();
        assert!(matches!(err, Error::Convert(_)));
        assert_eq!(buffer, Buffer(9));
    }

    #[test]
    fn test_registry_decodes_into_value() {
        let bytes = to_vec(&Buffer(12)).unwrap();

        let mut plain = Value::Nil;
        from_slice(&bytes, &mut plain).unwrap();
        assert_eq!(plain, Value::Extension(Extension::new(0, vec![0x0c])));

        let mut resolved = Value::Nil;
        from_slice_with(&bytes, &mut resolved, Some(Arc::new(ExtensionRegistry::editor())))
            .unwrap();
        assert_eq!(resolved, Value::Handle(Handle { kind: 0, id: 12 }));
        assert_eq!(to_vec(&resolved).unwrap(), bytes);
    }

    #[test]
    fn test_custom_registry_entry() {
        let mut registry = ExtensionRegistry::new();
        registry.register(9, |data| Ok(Value::Uint(data.len() as u64)));
        assert!(registry.contains(9));
        assert!(!registry.contains(0));

        let bytes = to_vec(&Extension::new(9, vec![1, 2, 3])).unwrap();
        let mut v = Value::Nil;
        from_slice_with(&bytes, &mut v, Some(Arc::new(registry))).unwrap();
        assert_eq!(v, Value::Uint(3));
    }
}
