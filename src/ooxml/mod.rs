//! Office Open XML (OOXML) format implementation.
//!
//! The module is organized into layers:
//!
//! 1. **OPC Layer** (`opc`): package parts, relationships and content types
//! 2. **Errors** (`error`): format-level failures shared by the layers above
//! 3. **WordprocessingML** (`docx`): editable story bodies and the comment engine
pub mod docx;
pub mod error;
pub mod opc;

// Re-export commonly used types from OPC layer
pub use opc::{OpcPackage, PackURI, PartStore};

// Re-export error types
pub use error::{OoxmlError, Result};
