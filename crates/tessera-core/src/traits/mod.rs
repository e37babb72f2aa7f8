//! Core traits for tessera collaborators.

mod detector;
mod stage;
mod text;

pub use detector::*;
pub use stage::*;
pub use text::*;
