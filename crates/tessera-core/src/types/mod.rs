//! Core data types for tessera.

mod document;
mod record;
mod zone;

pub use document::*;
pub use record::*;
pub use zone::*;
