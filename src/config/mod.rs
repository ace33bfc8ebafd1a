//! # The configuration graph compiler.
//!
//! Everything between raw files on disk and the read-only
//! [`CompiledConfig`] the supervisor consumes:
//!
//! - **manifests.rs**: discovery and validation of module manifests.
//! - **interfaces.rs**: interface inheritance, merge conflicts, error-ref
//!   expansion, memoized resolution.
//! - **types.rs**: type definition files addressed as `/file#/Name`.
//! - **errors_decl.rs**: error-declaration lists and the three reference
//!   shapes that point into them.
//! - **compiler.rs**: the ordered compile pipeline and the compiled object.
//!
//! ## Data flow
//! ```text
//! raw files ──► SchemaRegistry ──► ManifestStore ─┐
//!                     │                           ├─► Compiler ─► CompiledConfig
//!                     ├──► InterfaceResolver ─────┤
//!                     ├──► TypeStore ─────────────┤
//!                     └──► ErrorStore ────────────┘
//! ```

mod compiler;
mod errors_decl;
mod interfaces;
mod manifests;
mod types;

pub use compiler::{CompiledConfig, Compiler};
pub use errors_decl::{ErrorDeclaration, ErrorStore};
pub use interfaces::InterfaceResolver;
pub use manifests::ManifestStore;
pub use types::TypeStore;
