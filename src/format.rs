//! Type registry and resolver.
//!
//! FORMAT records declare composite types as `name:type[n] field;type field;`.
//! A subscription's type is flattened into an ordered list of primitive
//! leaves with fixed byte offsets:
//!
//! ```text
//! vehicle:uint64_t timestamp;float[2] pos;gps fix;
//! gps:int32_t lat;int32_t lon;
//!
//! timestamp   uint64_t  @0
//! pos[0]      float     @8
//! pos[1]      float     @12
//! fix.lat     int32_t   @16
//! fix.lon     int32_t   @20
//! ```
//!
//! Resolution reads the registry as it stands at call time.  A reference to
//! a type that is not (yet) registered contributes no leaves.  A type nested
//! too deeply or too wide for any DATA record fails with [`LayoutError`].

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::record::{PayloadError, MAX_PLAUSIBLE_SIZE};
use crate::text::TextDecoding;
use crate::types::PrimitiveType;

/// Leaves whose name starts with this are alignment padding.
pub const PADDING_PREFIX: &str = "_padding";
/// The leaf every sample-bearing type must carry.
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Largest sample a DATA record can carry: the plausible payload ceiling
/// minus the 2-byte message id.
pub const MAX_SAMPLE_SIZE: usize = MAX_PLAUSIBLE_SIZE as usize - 2;
/// Composite types nested deeper than this are rejected.
pub const MAX_NESTING_DEPTH: usize = 32;

/// A type that can never describe a valid sample.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Type {type_name:?} nests deeper than {} levels", MAX_NESTING_DEPTH)]
    TooDeep { type_name: String },
    #[error("Type {type_name:?} exceeds the {}-byte sample limit", MAX_SAMPLE_SIZE)]
    TooLarge { type_name: String },
}

// ── Definitions ──────────────────────────────────────────────────────────────

/// One `type[n] name` triple as declared in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub type_name: String,
    pub array_len: usize,
    pub name:      String,
}

impl FieldDef {
    fn parse(decl: &str) -> Result<Self, PayloadError> {
        let invalid = || PayloadError::InvalidFormat(decl.to_owned());

        let (type_part, name) = decl.trim().split_once(' ').ok_or_else(invalid)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid());
        }

        let (type_name, array_len) = match type_part.split_once('[') {
            None => (type_part, 1),
            Some((base, rest)) => {
                let len = rest
                    .strip_suffix(']')
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| (1..=MAX_SAMPLE_SIZE).contains(n))
                    .ok_or_else(invalid)?;
                (base, len)
            }
        };

        Ok(Self {
            type_name: type_name.trim().to_owned(),
            array_len,
            name: name.to_owned(),
        })
    }

    fn to_decl(&self) -> String {
        if self.array_len > 1 {
            format!("{}[{}] {}", self.type_name, self.array_len, self.name)
        } else {
            format!("{} {}", self.type_name, self.name)
        }
    }
}

/// A named composite type, exactly as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDefinition {
    pub name:   String,
    pub fields: Vec<FieldDef>,
}

impl TypeDefinition {
    /// Parse a FORMAT payload.
    pub fn parse(payload: &[u8], text: TextDecoding) -> Result<Self, PayloadError> {
        let decl = text.decode(payload)?;
        let (name, body) = decl
            .split_once(':')
            .ok_or_else(|| PayloadError::InvalidFormat(decl.clone()))?;

        let fields = body
            .split(';')
            .filter(|f| !f.trim().is_empty())
            .map(FieldDef::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { name: name.trim().to_owned(), fields })
    }

    /// The FORMAT payload text for this definition.
    pub fn to_format_string(&self) -> String {
        let mut out = format!("{}:", self.name);
        for field in &self.fields {
            out.push_str(&field.to_decl());
            out.push(';');
        }
        out
    }
}

// ── Resolved layout ──────────────────────────────────────────────────────────

/// A flattened primitive leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedField {
    /// Dotted for nesting, bracketed for arrays: `fix.lat`, `pos[1]`.
    pub name:   String,
    pub ty:     PrimitiveType,
    /// Byte offset within one sample.
    pub offset: usize,
}

impl ResolvedField {
    #[inline]
    pub fn width(&self) -> usize {
        self.ty.width()
    }

    pub fn is_padding(&self) -> bool {
        self.name.starts_with(PADDING_PREFIX)
    }
}

/// Remove trailing padding leaves until a real field is reached.
pub fn trim_padding(fields: &mut Vec<ResolvedField>) {
    while fields.last().is_some_and(ResolvedField::is_padding) {
        fields.pop();
    }
}

/// Sum of leaf widths.
pub fn sample_size(fields: &[ResolvedField]) -> usize {
    fields.iter().map(ResolvedField::width).sum()
}

/// Everything the subscription tracker needs to know about one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLayout {
    /// Leaves with trailing padding removed; this is the decode order.
    pub fields:           Vec<ResolvedField>,
    /// Sum of `fields` widths: the stride of a stored sample.
    pub min_size:         usize,
    /// Width including trailing padding that still occupies wire bytes.
    pub max_size:         usize,
    /// Offset of the 8-byte integer `timestamp` leaf, if present.
    pub timestamp_offset: Option<usize>,
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDefinition>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition.  A later definition with the same name
    /// replaces the earlier one.
    pub fn register(&mut self, def: TypeDefinition) -> Option<TypeDefinition> {
        self.types.insert(def.name.clone(), def)
    }

    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name.trim())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    /// Flatten `type_name` into primitive leaves, padding included.
    ///
    /// Fails when the type nests deeper than [`MAX_NESTING_DEPTH`] or cannot
    /// fit in a [`MAX_SAMPLE_SIZE`]-byte sample.
    pub fn resolve(&self, type_name: &str) -> Result<Vec<ResolvedField>, LayoutError> {
        let mut resolver = Resolver { registry: self, out: Vec::new(), offset: 0, visits: 0, stack: Vec::new() };
        resolver.descend("", type_name)?;
        Ok(resolver.out)
    }

    /// Resolve `type_name` and derive its sample bounds and timestamp offset.
    pub fn layout(&self, type_name: &str) -> Result<ResolvedLayout, LayoutError> {
        let mut fields = self.resolve(type_name)?;
        let max_size = sample_size(&fields);
        let timestamp_offset = fields
            .iter()
            .find(|f| f.name == TIMESTAMP_FIELD)
            .filter(|f| matches!(f.ty, PrimitiveType::UInt64 | PrimitiveType::Int64))
            .map(|f| f.offset);

        trim_padding(&mut fields);
        let min_size = sample_size(&fields);

        Ok(ResolvedLayout { fields, min_size, max_size, timestamp_offset })
    }
}

/// Depth-first flattening state for one [`TypeRegistry::resolve`] call.
struct Resolver<'r> {
    registry: &'r TypeRegistry,
    out:      Vec<ResolvedField>,
    offset:   usize,
    /// Composite references followed so far, resolved or not.  Bounds the
    /// work spent on zero-width types.
    visits:   usize,
    stack:    Vec<&'r str>,
}

impl<'r> Resolver<'r> {
    fn descend(&mut self, prefix: &str, type_name: &str) -> Result<(), LayoutError> {
        self.visits += 1;
        if self.visits > MAX_SAMPLE_SIZE {
            return Err(LayoutError::TooLarge { type_name: type_name.trim().to_owned() });
        }
        let Some(def) = self.registry.get(type_name) else {
            return Ok(());
        };
        if self.stack.contains(&def.name.as_str()) {
            warn!(type_name = %def.name, "self-referential type definition skipped");
            return Ok(());
        }
        if self.stack.len() >= MAX_NESTING_DEPTH {
            return Err(LayoutError::TooDeep { type_name: def.name.clone() });
        }
        self.stack.push(def.name.as_str());

        for field in &def.fields {
            match PrimitiveType::from_name(&field.type_name) {
                Some(ty) => {
                    if self.offset + ty.width() * field.array_len > MAX_SAMPLE_SIZE {
                        return Err(LayoutError::TooLarge { type_name: def.name.clone() });
                    }
                    for name in leaf_names(prefix, field) {
                        self.out.push(ResolvedField { name, ty, offset: self.offset });
                        self.offset += ty.width();
                    }
                }
                None => {
                    for name in leaf_names(prefix, field) {
                        let nested = format!("{name}.");
                        self.descend(&nested, &field.type_name)?;
                    }
                }
            }
        }

        self.stack.pop();
        Ok(())
    }
}

/// `field` for scalars, `field[0]`..`field[n-1]` for arrays.
fn leaf_names(prefix: &str, field: &FieldDef) -> Vec<String> {
    if field.array_len > 1 {
        (0..field.array_len)
            .map(|i| format!("{prefix}{}[{i}]", field.name))
            .collect()
    } else {
        vec![format!("{prefix}{}", field.name)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(defs: &[&str]) -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        for d in defs {
            reg.register(TypeDefinition::parse(d.as_bytes(), TextDecoding::Strict).unwrap());
        }
        reg
    }

    #[test]
    fn parses_format_text() {
        let def = TypeDefinition::parse(b"sensor:uint64_t timestamp;float[3] acc;", TextDecoding::Strict).unwrap();
        assert_eq!(def.name, "sensor");
        assert_eq!(def.fields.len(), 2);
        assert_eq!(def.fields[1], FieldDef {
            type_name: "float".into(),
            array_len: 3,
            name:      "acc".into(),
        });
        assert_eq!(def.to_format_string(), "sensor:uint64_t timestamp;float[3] acc;");
    }

    #[test]
    fn rejects_malformed_format_text() {
        assert!(TypeDefinition::parse(b"no colon here", TextDecoding::Strict).is_err());
        assert!(TypeDefinition::parse(b"t:float;", TextDecoding::Strict).is_err());
        assert!(TypeDefinition::parse(b"t:float[x] a;", TextDecoding::Strict).is_err());
        assert!(TypeDefinition::parse(b"t:float[0] a;", TextDecoding::Strict).is_err());
    }

    #[test]
    fn flattens_arrays_and_nested_types() {
        let reg = registry(&[
            "outer:int16_t[3] arr;inner nested;",
            "inner:uint8_t a;double b;",
        ]);
        let leaves = reg.resolve("outer").unwrap();
        let names: Vec<_> = leaves.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["arr[0]", "arr[1]", "arr[2]", "nested.a", "nested.b"]);
        let offsets: Vec<_> = leaves.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, [0, 2, 4, 6, 7]);
    }

    #[test]
    fn arrays_of_composites_are_indexed() {
        let reg = registry(&["pair:float x;float y;", "path:pair[2] pts;"]);
        let names: Vec<_> = reg.resolve("path").unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["pts[0].x", "pts[0].y", "pts[1].x", "pts[1].y"]);
    }

    #[test]
    fn unknown_nested_type_contributes_nothing() {
        let reg = registry(&["msg:uint64_t timestamp;missing m;float f;"]);
        let names: Vec<_> = reg.resolve("msg").unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["timestamp", "f"]);
        assert!(reg.resolve("nope").unwrap().is_empty());
    }

    #[test]
    fn trailing_padding_is_trimmed_but_bounds_keep_it() {
        let reg = registry(&["msg:uint64_t timestamp;uint8_t _padding0;float v;uint8_t[3] _padding1;"]);
        let layout = reg.layout("msg").unwrap();
        let names: Vec<_> = layout.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["timestamp", "_padding0", "v"]);
        assert_eq!(layout.min_size, 13);
        assert_eq!(layout.max_size, 16);
        assert_eq!(layout.timestamp_offset, Some(0));
    }

    #[test]
    fn timestamp_offset_tracks_position() {
        let reg = registry(&["msg:uint8_t flag;uint64_t timestamp;"]);
        assert_eq!(reg.layout("msg").unwrap().timestamp_offset, Some(1));

        let reg = registry(&["msg:uint32_t timestamp;"]);
        assert_eq!(reg.layout("msg").unwrap().timestamp_offset, None);
    }

    #[test]
    fn redefinition_replaces() {
        let mut reg = registry(&["t:float a;"]);
        let old = reg.register(TypeDefinition::parse(b"t:double a;", TextDecoding::Strict).unwrap());
        assert!(old.is_some());
        assert_eq!(reg.resolve("t").unwrap()[0].ty, PrimitiveType::Double);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn cyclic_types_terminate() {
        let reg = registry(&["a:float x;b next;", "b:a back;float y;"]);
        let names: Vec<_> = reg.resolve("a").unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["x", "next.y"]);
    }

    #[test]
    fn deep_chains_are_rejected_not_recursed() {
        let defs: Vec<String> = (0..2_000)
            .map(|i| format!("t{i}:t{} x;", i + 1))
            .chain(std::iter::once("t2000:uint8_t v;".to_string()))
            .collect();
        let refs: Vec<&str> = defs.iter().map(String::as_str).collect();
        let reg = registry(&refs);
        assert!(matches!(reg.resolve("t0"), Err(LayoutError::TooDeep { .. })));

        // A chain at the cap still resolves.
        let shallow = format!("t{}", 2_000 - (MAX_NESTING_DEPTH - 1));
        let names: Vec<_> = reg.resolve(&shallow).unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".x.v"));
    }

    #[test]
    fn nested_arrays_stop_at_the_sample_limit() {
        let reg = registry(&[
            "a:uint64_t timestamp;b[400] x;",
            "b:c[400] y;",
            "c:uint8_t[400] z;",
        ]);
        assert!(matches!(reg.layout("a"), Err(LayoutError::TooLarge { .. })));

        // Zero-width composites still count against the limit.
        let reg = registry(&["a:b[9000] x;", "b:c[9000] y;", "c:missing[9000] z;"]);
        assert!(matches!(reg.resolve("a"), Err(LayoutError::TooLarge { .. })));
    }

    #[test]
    fn sample_limit_is_inclusive() {
        let exact = format!("m:uint8_t[{}] raw;", MAX_SAMPLE_SIZE);
        let reg = registry(&[exact.as_str()]);
        assert_eq!(reg.layout("m").unwrap().max_size, MAX_SAMPLE_SIZE);

        let over = format!("m:uint8_t[{}] raw;uint8_t extra;", MAX_SAMPLE_SIZE);
        let reg = registry(&[over.as_str()]);
        assert!(matches!(reg.layout("m"), Err(LayoutError::TooLarge { .. })));
    }

    #[test]
    fn array_lengths_beyond_a_record_are_malformed() {
        let text = format!("t:uint8_t[{}] a;", MAX_SAMPLE_SIZE + 1);
        assert!(TypeDefinition::parse(text.as_bytes(), TextDecoding::Strict).is_err());
        assert!(TypeDefinition::parse(b"t:uint8_t[18446744073709551615] a;", TextDecoding::Strict).is_err());
    }
}
