//! Struct codec and the `msgpack_struct!` declaration macro.

use super::codec::{to_vec, Decode, Encode};
use super::decode::Decoder;
use super::encode::Encoder;
use super::fields::{resolve, FieldDescriptor, StructInfo};
use super::wire::WireType;
use crate::error::{ConvertError, Error, Result};

/// Positional access to the fields of a declared struct.
///
/// Implemented by [`msgpack_struct!`](crate::msgpack_struct); indices follow
/// declaration order.
pub trait StructAccess {
    fn field(&self, index: usize) -> Option<&dyn Encode>;
    fn field_mut(&mut self, index: usize) -> Option<&mut dyn Decode>;
}

fn unreachable_field(info: &StructInfo, field: &FieldDescriptor) -> Error {
    Error::InvalidTag {
        type_name: info.type_name,
        field: field.ident,
        reason: format!("no field at path {:?}", field.path),
    }
}

fn field_at<'s>(root: &'s dyn StructAccess, path: &[usize]) -> Option<&'s dyn Encode> {
    let (last, parents) = path.split_last()?;
    let mut current = root;
    for &index in parents {
        current = current.field(index)?.as_struct()?;
    }
    current.field(*last)
}

fn field_at_mut<'s>(root: &'s mut dyn StructAccess, path: &[usize]) -> Option<&'s mut dyn Decode> {
    let (last, parents) = path.split_last()?;
    let mut current = root;
    for &index in parents {
        current = current.field_mut(index)?.as_struct_mut()?;
    }
    current.field_mut(*last)
}

fn is_empty(field: &FieldDescriptor, value: &dyn Encode) -> Result<bool> {
    match &field.empty {
        Some(sentinel) => Ok(to_vec(value)? == *sentinel),
        None => Ok(value.is_empty_value()),
    }
}

/// Encode a declared struct as a map of its resolved fields, or as an array
/// in array mode.
pub fn encode_struct(
    value: &dyn StructAccess,
    info: &StructInfo,
    enc: &mut Encoder<'_>,
) -> Result<()> {
    let fields = resolve(info)?;

    if fields.array_mode {
        enc.pack_array_len(fields.len() as u64)?;
        for field in &fields.fields {
            field_at(value, &field.path)
                .ok_or_else(|| unreachable_field(info, field))?
                .encode(enc)?;
        }
        return Ok(());
    }

    let mut present = Vec::with_capacity(fields.len());
    for field in &fields.fields {
        let v = field_at(value, &field.path).ok_or_else(|| unreachable_field(info, field))?;
        if field.omit_empty && is_empty(field, v)? {
            continue;
        }
        present.push((field, v));
    }

    enc.pack_map_len(present.len() as u64)?;
    for (field, v) in present {
        enc.pack_string(&field.name)?;
        v.encode(enc)?;
    }
    Ok(())
}

/// Decode a map (keys matched by wire name) or an array (fields in order)
/// into a declared struct.
///
/// Unknown keys and surplus elements are skipped. Fields absent from a map
/// are set to their `empty` value when they declare one. Nil leaves the
/// struct unchanged.
pub fn decode_struct(
    value: &mut dyn StructAccess,
    info: &StructInfo,
    dec: &mut Decoder<'_>,
) -> Result<()> {
    let fields = resolve(info)?;

    match dec.wire_type() {
        WireType::Nil => Ok(()),
        WireType::MapLen => {
            let n = dec.len();
            let mut seen = vec![false; fields.len()];
            for _ in 0..n {
                dec.unpack_nested()?;
                let index = match dec.wire_type() {
                    WireType::String | WireType::Binary => std::str::from_utf8(dec.bytes_no_copy()?)
                        .ok()
                        .and_then(|key| fields.index_of(key)),
                    found => {
                        dec.record_convert(ConvertError::new(found, "field name"));
                        dec.skip()?;
                        None
                    }
                };

                match index {
                    Some(i) => {
                        let field = &fields.fields[i];
                        seen[i] = true;
                        let slot = field_at_mut(value, &field.path)
                            .ok_or_else(|| unreachable_field(info, field))?;
                        dec.decode_element(slot)?;
                    }
                    None => {
                        dec.unpack_nested()?;
                        dec.skip()?;
                    }
                }
            }

            for (field, _) in fields.fields.iter().zip(seen).filter(|(_, seen)| !seen) {
                if let Some(sentinel) = &field.empty {
                    let slot = field_at_mut(value, &field.path)
                        .ok_or_else(|| unreachable_field(info, field))?;
                    let mut sub = Decoder::from_slice(sentinel);
                    sub.unpack()?;
                    slot.decode_into(&mut sub)?;
                }
            }
            Ok(())
        }
        WireType::ArrayLen => {
            let n = dec.len() as usize;
            for i in 0..n {
                match fields.fields.get(i) {
                    Some(field) => {
                        let slot = field_at_mut(value, &field.path)
                            .ok_or_else(|| unreachable_field(info, field))?;
                        dec.decode_element(slot)?;
                    }
                    None => {
                        dec.unpack_nested()?;
                        dec.skip()?;
                    }
                }
            }
            Ok(())
        }
        _ => dec.convert_mismatch(info.type_name),
    }
}

/// Declare how a struct crosses the wire.
///
/// Each field may carry a tag literal (`name,keyword,...`) and an `empty`
/// literal after `=`:
///
/// ```
/// use nvrpc::msgpack_struct;
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Cursor {
///     row: i64,
///     col: i64,
///     mode: String,
///     scratch: Vec<u8>,
/// }
///
/// msgpack_struct!(Cursor {
///     row: "line",
///     col,
///     mode: ",omitempty" = "n",
///     scratch: "-",
/// });
///
/// let cursor = Cursor { row: 3, col: 7, mode: "n".into(), scratch: vec![] };
/// let bytes = nvrpc::msgpack::to_vec(&cursor).unwrap();
///
/// let mut back = Cursor::default();
/// nvrpc::msgpack::from_slice(&bytes, &mut back).unwrap();
/// assert_eq!(back, cursor);
/// ```
///
/// A field whose type is another declared struct encodes as a nested map.
/// Tag it `",inline"` to lift that struct's fields into the outer map instead.
///
/// The struct must implement `Default` to be decoded inside sequences, maps
/// and optionals.
#[macro_export]
macro_rules! msgpack_struct {
    ($ty:ident { $( $field:ident $(: $tag:literal)? $(= $empty:literal)? ),* $(,)? }) => {
        impl $ty {
            #[doc(hidden)]
            fn __msgpack_struct_info() -> $crate::msgpack::StructInfo {
                $crate::msgpack::StructInfo::new::<$ty>(stringify!($ty), || {
                    vec![$(
                        $crate::msgpack::FieldDef::new(
                            stringify!($field),
                            {
                                let tag: &[&'static str] = &[$($tag)?];
                                tag.first().copied().unwrap_or_default()
                            },
                            {
                                let empty: &[&'static str] = &[$($empty)?];
                                empty.first().copied()
                            },
                            |s: &$ty| &s.$field,
                        )
                    ),*]
                })
            }
        }

        impl $crate::msgpack::StructAccess for $ty {
            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn field(&self, index: usize) -> Option<&dyn $crate::msgpack::Encode> {
                let mut i = 0usize;
                $(
                    if i == index {
                        return Some(&self.$field);
                    }
                    i += 1;
                )*
                None
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn field_mut(&mut self, index: usize) -> Option<&mut dyn $crate::msgpack::Decode> {
                let mut i = 0usize;
                $(
                    if i == index {
                        return Some(&mut self.$field);
                    }
                    i += 1;
                )*
                None
            }
        }

        impl $crate::msgpack::Encode for $ty {
            fn encode(&self, enc: &mut $crate::msgpack::Encoder<'_>) -> $crate::Result<()> {
                $crate::msgpack::encode_struct(self, &Self::__msgpack_struct_info(), enc)
            }

            fn struct_info() -> Option<$crate::msgpack::StructInfo> {
                Some(Self::__msgpack_struct_info())
            }

            fn as_struct(&self) -> Option<&dyn $crate::msgpack::StructAccess> {
                Some(self)
            }
        }

        impl $crate::msgpack::Decode for $ty {
            fn decode_into(&mut self, dec: &mut $crate::msgpack::Decoder<'_>) -> $crate::Result<()> {
                $crate::msgpack::decode_struct(self, &Self::__msgpack_struct_info(), dec)
            }

            fn as_struct_mut(&mut self) -> Option<&mut dyn $crate::msgpack::StructAccess> {
                Some(self)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::msgpack::{from_slice, to_vec, Value};
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default, PartialEq)]
    struct Tagged {
        a: i64,
        b: i64,
        c: i64,
        d: i64,
    }

    msgpack_struct!(Tagged {
        a: "A",
        b: "BB",
        c: "omitempty",
        d: "-",
    });

    #[derive(Debug, Default, PartialEq)]
    struct Defaults {
        name: String,
        count: i64,
        enabled: bool,
        note: String,
    }

    msgpack_struct!(Defaults {
        name: ",omitempty",
        count = "5",
        enabled: "on" = "true",
        note: ",omitempty" = "none",
    });

    #[derive(Debug, Default, PartialEq)]
    struct Position {
        line: i64,
        col: i64,
    }

    msgpack_struct!(Position { line, col });

    #[derive(Debug, Default, PartialEq)]
    struct Mark {
        pos: Position,
        name: String,
        line: i64,
    }

    msgpack_struct!(Mark {
        pos: ",inline",
        name,
        line,
    });

    #[derive(Debug, Default, PartialEq)]
    struct Span {
        start: Position,
        end: Position,
    }

    msgpack_struct!(Span { start, end });

    #[derive(Debug, Default, PartialEq)]
    struct Node {
        name: String,
        children: Vec<Node>,
        next: Option<Box<Node>>,
    }

    msgpack_struct!(Node {
        name,
        children: ",omitempty",
        next: ",omitempty",
    });

    #[derive(Debug, Default, PartialEq)]
    struct Pair {
        key: String,
        value: i64,
    }

    msgpack_struct!(Pair {
        key: ",array",
        value,
    });

    #[derive(Debug, Default, PartialEq)]
    struct Nested {
        label: String,
        pos: Option<Box<Position>>,
        marks: Vec<Pair>,
    }

    msgpack_struct!(Nested { label, pos: "pos", marks });

    fn as_value(bytes: &[u8]) -> Value {
        let mut v = Value::Nil;
        from_slice(bytes, &mut v).unwrap();
        v
    }

    #[test]
    fn test_end_to_end_struct_tags() {
        let value = Tagged { a: 1, b: 2, c: 3, d: 4 };
        let bytes = to_vec(&value).unwrap();

        let map = as_value(&bytes);
        let map = map.as_map().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["A"], Value::Uint(1));
        assert_eq!(map["BB"], Value::Uint(2));
        assert_eq!(map["omitempty"], Value::Uint(3));

        let mut back = Tagged::default();
        from_slice(&bytes, &mut back).unwrap();
        assert_eq!(back, Tagged { a: 1, b: 2, c: 3, d: 0 });
    }

    #[test]
    fn test_omitempty_uses_sentinel() {
        let value = Defaults {
            name: String::new(),
            count: 0,
            enabled: false,
            note: "none".into(),
        };
        let map = as_value(&to_vec(&value).unwrap());
        let keys: Vec<_> = map.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["count".to_string(), "on".to_string()]);
    }

    #[test]
    fn test_absent_fields_take_empty_value() {
        // {"name": "x"}
        let bytes = [0x81, 0xa4, b'n', b'a', b'm', b'e', 0xa1, b'x'];
        let mut value = Defaults::default();
        from_slice(&bytes, &mut value).unwrap();
        assert_eq!(
            value,
            Defaults {
                name: "x".into(),
                count: 5,
                enabled: true,
                note: "none".into(),
            }
        );
    }

    #[test]
    fn test_unknown_keys_are_skipped() {
        // {"zz": [1, {"q": 2}], "A": 7}
        let bytes = [
            0x82, 0xa2, b'z', b'z', 0x92, 0x01, 0x81, 0xa1, b'q', 0x02, 0xa1, b'A', 0x07,
        ];
        let mut value = Tagged::default();
        from_slice(&bytes, &mut value).unwrap();
        assert_eq!(value.a, 7);
    }

    #[test]
    fn test_inline_struct_is_flattened() {
        let mark = Mark {
            pos: Position { line: 3, col: 4 },
            name: "a".into(),
            line: 9,
        };
        let bytes = to_vec(&mark).unwrap();
        let map = as_value(&bytes);
        let map = map.as_map().unwrap();
        // The outer "line" shadows the embedded one.
        assert_eq!(map.len(), 3);
        assert_eq!(map["col"], Value::Uint(4));
        assert_eq!(map["line"], Value::Uint(9));

        let mut back = Mark::default();
        from_slice(&bytes, &mut back).unwrap();
        assert_eq!(back.pos.col, 4);
        assert_eq!(back.pos.line, 0);
        assert_eq!(back.line, 9);
    }

    #[test]
    fn test_struct_fields_nest_by_default() {
        let span = Span {
            start: Position { line: 1, col: 2 },
            end: Position { line: 1, col: 9 },
        };
        let bytes = to_vec(&span).unwrap();
        let map = as_value(&bytes);
        assert_eq!(map.as_map().unwrap().len(), 2);
        assert_eq!(
            map.get("end").and_then(|end| end.get("col")),
            Some(&Value::Uint(9))
        );

        let mut back = Span::default();
        from_slice(&bytes, &mut back).unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn test_recursive_struct_roundtrip() {
        let leaf = |name: &str| Node {
            name: name.into(),
            ..Node::default()
        };
        let tree = Node {
            name: "root".into(),
            children: vec![
                Node {
                    name: "a".into(),
                    children: vec![leaf("a1"), leaf("a2")],
                    next: Some(Box::new(leaf("b"))),
                },
                leaf("c"),
            ],
            next: None,
        };
        let bytes = to_vec(&tree).unwrap();

        let map = as_value(&bytes);
        assert!(map.get("next").is_none());
        let children = map.get("children").and_then(Value::as_array).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(
            children[0].get("next").and_then(|n| n.get("name")),
            Some(&Value::String("b".into()))
        );

        let mut back = Node::default();
        from_slice(&bytes, &mut back).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_array_mode() {
        let pair = Pair {
            key: "k".into(),
            value: -1,
        };
        let bytes = to_vec(&pair).unwrap();
        assert_eq!(bytes, vec![0x92, 0xa1, b'k', 0xff]);

        let mut back = Pair::default();
        from_slice(&bytes, &mut back).unwrap();
        assert_eq!(back, pair);

        // Surplus elements are ignored.
        let mut short = Pair::default();
        from_slice(&[0x93, 0xa1, b'k', 0x01, 0xc3], &mut short).unwrap();
        assert_eq!(short.value, 1);
    }

    #[test]
    fn test_nested_structs_and_options() {
        let value = Nested {
            label: "n".into(),
            pos: Some(Box::new(Position { line: 1, col: 2 })),
            marks: vec![
                Pair {
                    key: "a".into(),
                    value: 1,
                },
                Pair {
                    key: "b".into(),
                    value: 2,
                },
            ],
        };
        let bytes = to_vec(&value).unwrap();
        let mut back = Nested::default();
        from_slice(&bytes, &mut back).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_nil_leaves_struct_unchanged() {
        let mut value = Tagged { a: 1, b: 2, c: 3, d: 4 };
        from_slice(&[0xc0], &mut value).unwrap();
        assert_eq!(value, Tagged { a: 1, b: 2, c: 3, d: 4 });
    }

    #[test]
    fn test_field_convert_error_is_reported() {
        // {"A": "x", "BB": 2}
        let bytes = [0x82, 0xa1, b'A', 0xa1, b'x', 0xa2, b'B', b'B', 0x02];
        let mut value = Tagged::default();
        let err = from_slice(&bytes, &mut value).unwrap_err();
        assert!(matches!(err, Error::Convert(_)));
        assert_eq!(value.b, 2);
    }
}
