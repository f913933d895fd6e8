//! # Parameter Binder Module
//!
//! Descriptor-driven decoding of request inputs into strongly typed values.
//!
//! ## Overview
//!
//! Each opinionated handler declares a request type implementing
//! [`Bindable`]. The type's [`Descriptor`] lists every declared field with
//! its binding source (path, query, header or body), its external name, its
//! decoded kind and whether it is required. Descriptors are computed once
//! per type and memoized process-wide, keyed by type identity.
//!
//! ## Architecture
//!
//! Binding is a two-phase pipeline:
//!
//! 1. **Decode**: each field is pulled from its declared source and decoded
//!    according to its kind into a JSON value. Failures accumulate as
//!    per-field errors rather than aborting on the first problem.
//! 2. **Materialize**: when no field failed, the assembled JSON object is
//!    deserialized into the target type via serde.
//!
//! A failed bind carries every [`crate::error::FieldError`] so clients see
//! the full validation picture in one response.
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchboard::binder::{bind, BindInput, Bindable, Descriptor, FieldKind, FieldSpec};
//!
//! #[derive(serde::Deserialize)]
//! struct ListPets {
//!     limit: i32,
//!     breed: Option<String>,
//! }
//!
//! impl Bindable for ListPets {
//!     fn descriptor() -> Descriptor {
//!         Descriptor::new("ListPets")
//!             .field(FieldSpec::query("limit", FieldKind::Int(IntWidth::I32)))
//!             .field(FieldSpec::query("breed", FieldKind::Str).optional())
//!     }
//! }
//! ```
//!
//! ## Concurrency
//!
//! Descriptors are shared read-only after first registration; the cache is
//! written at most once per type using double-checked initialization.
//! Binding itself allocates only the target value and its owned sub-values.

mod decode;
mod descriptor;

pub use decode::{bind, BindFailure, BindInput};
pub use descriptor::{
    descriptor_for, Bindable, Descriptor, FieldKind, FieldSpec, HandlerDescriptor, IntWidth,
    ParamSource,
};
