//! Maps raw CSV rows onto an operation's canonical fields.
//!
//! For each target field the mapper pulls the raw value from the CSV column
//! named by the user's field map, applies the field's sanitizer, and
//! substitutes the field's default when the sanitized value is empty.
//! Sanitizers are pure and declared once per operation definition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::source::Record;

// ─────────────────────────────────────────────────────────────────────────────
// Sanitizer
// ─────────────────────────────────────────────────────────────────────────────

/// Pure value normalizer applied to a raw CSV cell.
#[derive(Clone)]
pub enum Sanitizer {
    /// Pass the value through untouched.
    Raw,
    /// Trim surrounding whitespace.
    Trim,
    /// Trim and lowercase.
    Lowercase,
    /// Trim, lowercase, and blank out values without a plausible
    /// `local@domain` shape.
    Email,
    /// Keep digits, sign, and decimal point; blank out everything else.
    Numeric,
    /// Host-supplied function.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl Sanitizer {
    /// Applies the sanitizer.
    pub fn apply(&self, raw: &str) -> String {
        match self {
            Sanitizer::Raw => raw.to_string(),
            Sanitizer::Trim => raw.trim().to_string(),
            Sanitizer::Lowercase => raw.trim().to_lowercase(),
            Sanitizer::Email => {
                let v = raw.trim().to_lowercase();
                let mut parts = v.splitn(2, '@');
                match (parts.next(), parts.next()) {
                    (Some(local), Some(domain))
                        if !local.is_empty() && domain.contains('.') && !domain.ends_with('.') =>
                    {
                        v
                    }
                    _ => String::new(),
                }
            }
            Sanitizer::Numeric => {
                let v: String = raw
                    .trim()
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                v
            }
            Sanitizer::Custom(f) => f(raw),
        }
    }
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sanitizer::Raw => "Raw",
            Sanitizer::Trim => "Trim",
            Sanitizer::Lowercase => "Lowercase",
            Sanitizer::Email => "Email",
            Sanitizer::Numeric => "Numeric",
            Sanitizer::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FieldDef
// ─────────────────────────────────────────────────────────────────────────────

/// One canonical target field of an import operation.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Canonical field name.
    pub field: String,
    /// Display label (also used for export headers).
    pub label: String,
    /// Substituted when the sanitized value is empty.
    pub default: Option<String>,
    pub sanitizer: Sanitizer,
}

impl FieldDef {
    /// Creates a field with trim sanitization and no default.
    pub fn new(field: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            label: label.into(),
            default: None,
            sanitizer: Sanitizer::Trim,
        }
    }

    /// Sets the default value.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the sanitizer.
    pub fn sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a raw CSV row onto the operation's canonical fields.
///
/// `field_map` goes canonical-field → CSV-column-name. A field not present
/// in the map, or whose mapped column is missing from the row, yields an
/// empty value (then the default, if any).
pub fn map_row(raw: &Record, field_map: &HashMap<String, String>, defs: &[FieldDef]) -> Record {
    let mut out = Record::new();

    for def in defs {
        let raw_value = field_map
            .get(&def.field)
            .and_then(|column| raw.get(column))
            .unwrap_or("");

        let mut value = def.sanitizer.apply(raw_value);
        if value.is_empty() {
            if let Some(default) = &def.default {
                value = default.clone();
            }
        }

        out.push(def.field.clone(), value);
    }

    out
}

/// True iff every mapped value is empty. Used to skip empty trailing rows
/// without counting them as failures. Defaults are deliberately ignored
/// here: a row that only "has" values because of defaults is still empty.
pub fn is_empty_row(raw: &Record, field_map: &HashMap<String, String>) -> bool {
    field_map
        .values()
        .all(|column| raw.get(column).map_or(true, |v| v.trim().is_empty()))
}
