// Document patch-resolution engine.
// Decides what an LLM reply means for the live LaTeX document and merges it back
// without touching unrelated sections. Everything here is a pure function over
// immutable strings: no locking, no I/O.

pub mod classifier;
pub mod field_locator;
pub mod resolver;
pub mod section_locator;
pub mod tables;

// Re-export the public API consumed by the session, chat, and handler layers.
pub use classifier::extract_latex_block;
pub use field_locator::{locate_field, FieldLookup, FieldMatch};
pub use resolver::{resolve_update, UpdateResult, UpdateType};
pub use tables::{FieldKind, SectionKind};
