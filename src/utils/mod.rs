//! Utility modules shared across the crate:
//! - Error types
//! - Source location tracking
//! - Text formatting for the IR printer

pub mod errors;
pub mod location;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use location::{SourceLocation, SourceMap, Span};
pub use pretty::CodeFormatter;
