use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Binding source for a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSource {
    /// Captured path segment (e.g. `/users/:id`).
    Path,
    /// Query string parameter (e.g. `?limit=10`).
    Query,
    /// HTTP header.
    Header,
    /// Field of the JSON request body.
    Body,
}

impl std::fmt::Display for ParamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamSource::Path => write!(f, "path"),
            ParamSource::Query => write!(f, "query"),
            ParamSource::Header => write!(f, "header"),
            ParamSource::Body => write!(f, "body"),
        }
    }
}

/// Integer width for bounds-checked decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl IntWidth {
    /// Inclusive signed bounds; `None` for `U64`, which is checked as
    /// unsigned.
    pub(crate) fn signed_bounds(&self) -> Option<(i64, i64)> {
        match self {
            IntWidth::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            IntWidth::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            IntWidth::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            IntWidth::I64 => Some((i64::MIN, i64::MAX)),
            IntWidth::U8 => Some((0, u8::MAX as i64)),
            IntWidth::U16 => Some((0, u16::MAX as i64)),
            IntWidth::U32 => Some((0, u32::MAX as i64)),
            IntWidth::U64 => None,
        }
    }

    pub(crate) fn is_unsigned(&self) -> bool {
        matches!(
            self,
            IntWidth::U8 | IntWidth::U16 | IntWidth::U32 | IntWidth::U64
        )
    }
}

impl std::fmt::Display for IntWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntWidth::I8 => "i8",
            IntWidth::I16 => "i16",
            IntWidth::I32 => "i32",
            IntWidth::I64 => "i64",
            IntWidth::U8 => "u8",
            IntWidth::U16 => "u16",
            IntWidth::U32 => "u32",
            IntWidth::U64 => "u64",
        };
        write!(f, "{s}")
    }
}

/// Decoded kind of a declared field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// `true|false|1|0`.
    Bool,
    /// Decimal integer, bounds-checked per width.
    Int(IntWidth),
    /// Standard decimal floating point.
    Float,
    /// Raw string, passed through.
    Str,
    /// RFC 3339 time instant.
    Instant,
    /// Sequence of a scalar kind, from repeated query values in order or a
    /// single comma-separated value.
    Seq(Box<FieldKind>),
}

/// One declared field of a request type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// External name: path capture, query key, header name (matched
    /// case-insensitively) or body object key. Also the serde field name.
    pub name: &'static str,
    pub source: ParamSource,
    pub kind: FieldKind,
    /// Required unless the target field is an optional-of-T.
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: &'static str, source: ParamSource, kind: FieldKind) -> Self {
        Self {
            name,
            source,
            kind,
            required: true,
        }
    }

    pub fn path(name: &'static str, kind: FieldKind) -> Self {
        Self::new(name, ParamSource::Path, kind)
    }

    pub fn query(name: &'static str, kind: FieldKind) -> Self {
        Self::new(name, ParamSource::Query, kind)
    }

    pub fn header(name: &'static str, kind: FieldKind) -> Self {
        Self::new(name, ParamSource::Header, kind)
    }

    pub fn body(name: &'static str, kind: FieldKind) -> Self {
        Self::new(name, ParamSource::Body, kind)
    }

    /// Mark the field optional; absent values are skipped instead of
    /// reported as errors.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Precomputed binding summary of a request type.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Type identity, as reported to observers.
    pub type_name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl Descriptor {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Fields bound from the JSON body, the subset decoded en bloc.
    pub fn body_fields(&self) -> impl Iterator<Item = &FieldSpec> + '_ {
        self.fields
            .iter()
            .filter(|f| f.source == ParamSource::Body)
    }
}

/// Request descriptor plus the response type identity, handed to route
/// observers at registration.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    pub request: Arc<Descriptor>,
    pub response_type: &'static str,
}

/// A request type the binder can decode. The descriptor declares the
/// fields; serde materializes the final value.
pub trait Bindable: DeserializeOwned + Send + 'static {
    fn descriptor() -> Descriptor;
}

static DESCRIPTORS: Lazy<RwLock<HashMap<TypeId, Arc<Descriptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Fetch the memoized descriptor for `T`, computing it on first use.
///
/// The cache is process-wide and written at most once per type: a read
/// probe first, then the write lock re-checks before inserting.
pub fn descriptor_for<T: Bindable>() -> Arc<Descriptor> {
    let id = TypeId::of::<T>();
    if let Some(found) = DESCRIPTORS.read().unwrap().get(&id) {
        return Arc::clone(found);
    }
    let mut cache = DESCRIPTORS.write().unwrap();
    if let Some(found) = cache.get(&id) {
        return Arc::clone(found);
    }
    let built = Arc::new(T::descriptor());
    cache.insert(id, Arc::clone(&built));
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[allow(dead_code)]
        id: String,
    }

    impl Bindable for Probe {
        fn descriptor() -> Descriptor {
            Descriptor::new("Probe").field(FieldSpec::path("id", FieldKind::Str))
        }
    }

    #[test]
    fn descriptor_is_memoized_per_type() {
        let a = descriptor_for::<Probe>();
        let b = descriptor_for::<Probe>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.type_name, "Probe");
    }

    #[test]
    fn int_width_bounds() {
        assert_eq!(IntWidth::I8.signed_bounds(), Some((-128, 127)));
        assert_eq!(IntWidth::U16.signed_bounds(), Some((0, 65535)));
        assert!(IntWidth::U64.signed_bounds().is_none());
        assert!(IntWidth::U32.is_unsigned());
        assert!(!IntWidth::I32.is_unsigned());
    }
}
