//! # Typed Module
//!
//! Opinionated, strongly typed request handlers.
//!
//! ## Overview
//!
//! A typed handler declares its request and response shapes and lets the
//! engine do the plumbing: the request type's binder descriptor drives
//! decoding and validation, the handler sees only valid data, and the
//! response is serialized to JSON. Domain errors map onto the standard
//! envelope via [`crate::error::HandlerError`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use switchboard::typed::{Handler, TypedRequest};
//! use switchboard::binder::{Bindable, Descriptor, FieldKind, FieldSpec, IntWidth};
//! use switchboard::error::HandlerError;
//!
//! #[derive(serde::Deserialize)]
//! struct GetPet { id: i64 }
//!
//! impl Bindable for GetPet {
//!     fn descriptor() -> Descriptor {
//!         Descriptor::new("GetPet")
//!             .field(FieldSpec::path("id", FieldKind::Int(IntWidth::I64)))
//!     }
//! }
//!
//! #[derive(serde::Serialize)]
//! struct Pet { id: i64, name: String }
//!
//! struct GetPetHandler;
//!
//! impl Handler for GetPetHandler {
//!     type Request = GetPet;
//!     type Response = Pet;
//!
//!     fn handle(&self, req: TypedRequest<GetPet>) -> Result<Pet, HandlerError> {
//!         Ok(Pet { id: req.data.id, name: "Fluffy".into() })
//!     }
//! }
//! ```
//!
//! On invocation the wrapper binds (400 with the structured validation
//! envelope on failure), calls the handler, maps any error to its HTTP
//! kind, and otherwise replies 200 — or 201 when the route's method is
//! POST.

mod core;

pub use core::{handler_descriptor, spawn_typed, Handler, TypedRequest};
