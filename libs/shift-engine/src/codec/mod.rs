//! Schema-compatible binary codec.
//!
//! Binaries are self-describing: each field carries its name and kind, so a
//! reader detects presence structurally and resolves absent fields to the
//! defaults its own schema declares.

pub mod compact;
pub mod registry;

pub use compact::{CompactCodec, FieldEntry, FieldTable};
pub use registry::TypeRegistry;
