/// Open Packaging Conventions (OPC) implementation.
///
/// This module provides the parts of the OPC specification that comment
/// editing needs:
///
/// - Package structure (parts, relationships)
/// - Content type management
/// - The [`PartStore`] seam used by document-model code
///
/// The zip container itself is out of scope: [`OpcPackage`] is built from
/// and flattened to `(member name, bytes)` entries.
pub mod constants;
pub mod content_types;
pub mod error;
pub mod package;
pub mod packuri;
pub mod part;
pub mod rel;

// Re-export commonly used types
pub use content_types::ContentTypes;
pub use package::OpcPackage;
pub use packuri::PackURI;
pub use part::PartStore;
pub use rel::{Relationship, Relationships};
