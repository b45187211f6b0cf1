//! Field mapping for imports: per-field sanitize + default substitution.

mod field_mapper;

pub use field_mapper::{is_empty_row, map_row, FieldDef, Sanitizer};
