//! Struct field resolution.
//!
//! A struct declared with [`msgpack_struct!`](crate::msgpack_struct) exposes a
//! [`StructInfo`]: its type id and a list of [`FieldDef`]s carrying the raw
//! tag text. [`resolve`] turns that into the ordered [`StructFields`] the codec
//! walks, applying names, `-`, `omitempty`, `array`, `empty` sentinels and
//! embedding. Results are cached for the life of the process.
//!
//! # Tag grammar
//!
//! `"name,keyword,keyword"`: the first element is the wire name (blank means
//! the Rust field name), the rest are keywords.
//!
//! | Element     | Meaning                                                   |
//! |-------------|-----------------------------------------------------------|
//! | `-`         | field is never encoded or decoded                         |
//! | `omitempty` | skip the field when it equals its empty value             |
//! | `array`     | encode the whole struct as an array instead of a map      |
//! | `inline`    | embed a declared struct's fields at the current level     |
//!
//! A field whose type is a declared struct encodes as a nested map unless it
//! is tagged `,inline`. An inline field takes no wire name, and its type must
//! be a declared struct. Name collisions keep the shallowest field, and two
//! fields at the same depth with the same name are both dropped. A struct
//! that inlines itself, directly or through another struct, contributes its
//! fields only once.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::codec::{to_vec, Decode, Encode};
use crate::error::{Error, Result};

type SentinelFn = fn(&str) -> Option<Result<Vec<u8>>>;

/// Identity and field list of a declared struct.
#[derive(Clone, Copy)]
pub struct StructInfo {
    pub type_id: TypeId,
    pub type_name: &'static str,
    fields: fn() -> Vec<FieldDef>,
}

impl StructInfo {
    pub fn new<S: 'static>(type_name: &'static str, fields: fn() -> Vec<FieldDef>) -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name,
            fields,
        }
    }

    pub fn fields(&self) -> Vec<FieldDef> {
        (self.fields)()
    }
}

impl std::fmt::Debug for StructInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructInfo")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// One declared field, before resolution.
pub struct FieldDef {
    pub ident: &'static str,
    pub tag: &'static str,
    pub empty: Option<&'static str>,
    pub type_name: &'static str,
    /// Layout of the field's type, when it is itself a declared struct.
    pub nested: Option<StructInfo>,
    sentinel: SentinelFn,
}

impl FieldDef {
    /// `accessor` only pins down the field type; it is never called.
    pub fn new<S, T, F>(
        ident: &'static str,
        tag: &'static str,
        empty: Option<&'static str>,
        _accessor: F,
    ) -> Self
    where
        T: Encode + Decode + 'static,
        F: for<'a> Fn(&'a S) -> &'a T,
    {
        Self {
            ident,
            tag,
            empty,
            type_name: std::any::type_name::<T>(),
            nested: T::struct_info(),
            sentinel: sentinel_bytes::<T>,
        }
    }
}

fn sentinel_bytes<T: Encode + Decode>(literal: &str) -> Option<Result<Vec<u8>>> {
    T::from_sentinel(literal).map(|value| to_vec(&value))
}

/// A resolved field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Wire name (map key).
    pub name: String,
    pub ident: &'static str,
    /// Field indices from the outer struct down through embedded structs.
    pub path: Vec<usize>,
    pub type_name: &'static str,
    pub omit_empty: bool,
    /// Encoded `empty` value, if the field declares one.
    pub empty: Option<Vec<u8>>,
}

/// The resolved, ordered field list of one struct type.
#[derive(Debug)]
pub struct StructFields {
    pub type_name: &'static str,
    pub array_mode: bool,
    pub fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
}

impl StructFields {
    /// Position of the field with wire name `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

type Cache = RwLock<HashMap<TypeId, Arc<StructFields>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Resolve (or fetch from cache) the field list of `info`.
///
/// # Errors
///
/// Returns [`Error::InvalidTag`] for unknown keywords or an `empty` value the
/// field type cannot hold.
pub fn resolve(info: &StructInfo) -> Result<Arc<StructFields>> {
    if let Some(found) = cache()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&info.type_id)
    {
        return Ok(Arc::clone(found));
    }

    let built = Arc::new(build(info)?);
    let mut cache = cache().write().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(cache.entry(info.type_id).or_insert(built)))
}

struct ParsedTag<'t> {
    name: &'t str,
    omit_empty: bool,
    array: bool,
    inline: bool,
}

fn parse_tag(info: &StructInfo, def: &FieldDef) -> Result<ParsedTag<'static>> {
    let mut parts = def.tag.split(',');
    let name = parts.next().unwrap_or_default();
    let mut parsed = ParsedTag {
        name,
        omit_empty: false,
        array: false,
        inline: false,
    };
    let invalid = |reason: String| Error::InvalidTag {
        type_name: info.type_name,
        field: def.ident,
        reason,
    };
    for keyword in parts {
        match keyword {
            "omitempty" => parsed.omit_empty = true,
            "array" => parsed.array = true,
            "inline" => parsed.inline = true,
            "" => {}
            other => return Err(invalid(format!("unknown tag keyword {:?}", other))),
        }
    }
    if parsed.inline {
        if def.nested.is_none() {
            return Err(invalid(format!(
                "inline needs a declared struct, found {}",
                def.type_name
            )));
        }
        if !parsed.name.is_empty() && parsed.name != "-" {
            return Err(invalid(format!(
                "inline field cannot be named {:?}",
                parsed.name
            )));
        }
    }
    Ok(parsed)
}

fn build(info: &StructInfo) -> Result<StructFields> {
    let mut candidates = Vec::new();
    let mut visited = HashSet::new();
    let mut array_mode = false;
    collect(
        info,
        &[],
        &mut visited,
        &mut candidates,
        Some(&mut array_mode),
    )?;

    // Group by name; the shallowest field wins, a tie drops the name.
    let mut by_depth: HashMap<&str, (usize, usize)> = HashMap::new();
    for c in &candidates {
        let depth = c.path.len();
        by_depth
            .entry(c.name.as_str())
            .and_modify(|(best, count)| {
                if depth < *best {
                    *best = depth;
                    *count = 1;
                } else if depth == *best {
                    *count += 1;
                }
            })
            .or_insert((depth, 1));
    }
    let keep: Vec<bool> = candidates
        .iter()
        .map(|c| by_depth[c.name.as_str()] == (c.path.len(), 1))
        .collect();

    let mut fields: Vec<FieldDescriptor> = candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(c, keep)| keep.then_some(c))
        .collect();
    fields.sort_by(|a, b| a.path.cmp(&b.path));

    let by_name = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.clone(), i))
        .collect();

    Ok(StructFields {
        type_name: info.type_name,
        array_mode,
        fields,
        by_name,
    })
}

fn collect(
    info: &StructInfo,
    prefix: &[usize],
    visited: &mut HashSet<TypeId>,
    out: &mut Vec<FieldDescriptor>,
    array_mode: Option<&mut bool>,
) -> Result<()> {
    if !visited.insert(info.type_id) {
        return Ok(());
    }

    let mut array = false;
    for (index, def) in info.fields().into_iter().enumerate() {
        let tag = parse_tag(info, &def)?;
        array |= tag.array;
        if tag.name == "-" {
            continue;
        }

        let mut path = prefix.to_vec();
        path.push(index);

        if tag.inline {
            if let Some(nested) = def.nested {
                collect(&nested, &path, visited, out, None)?;
                continue;
            }
        }

        let empty = match def.empty {
            None => None,
            Some(literal) => match (def.sentinel)(literal) {
                Some(bytes) => Some(bytes?),
                None => {
                    return Err(Error::InvalidTag {
                        type_name: info.type_name,
                        field: def.ident,
                        reason: format!(
                            "empty value {:?} is not supported for {}",
                            literal, def.type_name
                        ),
                    })
                }
            },
        };

        let name = if tag.name.is_empty() {
            def.ident.to_string()
        } else {
            tag.name.to_string()
        };
        out.push(FieldDescriptor {
            name,
            ident: def.ident,
            path,
            type_name: def.type_name,
            omit_empty: tag.omit_empty,
            empty,
        });
    }

    if let Some(flag) = array_mode {
        *flag = array;
    }
    visited.remove(&info.type_id);
    Ok(())
}
