//! # Schema registry and the type-URI grammar.
//!
//! The registry loads the five fixed schemas at startup and provides a
//! reference-resolving validator over them; the grammar module defines the
//! one URI shape those schemas are allowed to reference.

mod registry;
mod uri;

pub use registry::{SchemaKind, SchemaRegistry};
pub use uri::{is_type_uri, split_type_uri, TYPE_URI_PATTERN};
