//! Operation registry.
//!
//! An explicit registry object built at startup and handed to the engine by
//! reference, with no global state. Job sessions store only the operation name;
//! descriptors (and the callables inside them) are looked up fresh from the
//! registry on every call and are never serialized.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::batch::{ItemProcessor, PreValidator};
use crate::error::EngineError;
use crate::mapping::FieldDef;
use crate::source::{Record, RowFetcher};
use crate::storage::DateRange;

// ─────────────────────────────────────────────────────────────────────────────
// QueryHandler Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Host-side data access for exports: counts and offset-paged reads of the
/// filtered result set. The filter/date snapshot comes from the job session,
/// captured once at start.
pub trait QueryHandler: Send + Sync {
    /// Total matching items for the snapshot.
    fn count<'a>(
        &'a self,
        filters: &'a Value,
        date_range: Option<&'a DateRange>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EngineError>> + Send + 'a>>;

    /// One offset-paged slice of the filtered result set.
    fn fetch<'a>(
        &'a self,
        filters: &'a Value,
        date_range: Option<&'a DateRange>,
        offset: u64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>, EngineError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// One output column of an export.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Field name keyed into the rows the query hands back.
    pub field: String,
    /// Header label in the generated CSV.
    pub label: String,
}

/// A configured export operation.
#[derive(Clone)]
pub struct ExportDefinition {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub query: Option<Arc<dyn QueryHandler>>,
}

impl std::fmt::Debug for ExportDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportDefinition")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("query", &self.query.as_ref().map(|_| "<QueryHandler>"))
            .finish()
    }
}

impl ExportDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            query: None,
        }
    }

    /// Adds an output column.
    pub fn column(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.columns.push(ColumnDef {
            field: field.into(),
            label: label.into(),
        });
        self
    }

    pub fn query(mut self, query: Arc<dyn QueryHandler>) -> Self {
        self.query = Some(query);
        self
    }
}

/// A configured import operation.
#[derive(Clone)]
pub struct ImportDefinition {
    pub name: String,
    /// Canonical target fields, with sanitizers and defaults declared once.
    pub fields: Vec<FieldDef>,
    pub processor: Option<Arc<dyn ItemProcessor>>,
    pub pre_validate: Option<Arc<dyn PreValidator>>,
}

impl ImportDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            processor: None,
            pre_validate: None,
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn ItemProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn pre_validate(mut self, validator: Arc<dyn PreValidator>) -> Self {
        self.pre_validate = Some(validator);
        self
    }
}

/// A configured sync operation against an external paginated source.
#[derive(Clone)]
pub struct SyncDefinition {
    pub name: String,
    /// Label shown in stats (e.g. the remote system's name).
    pub source_label: String,
    pub fetcher: Option<Arc<dyn RowFetcher>>,
    pub processor: Option<Arc<dyn ItemProcessor>>,
}

impl SyncDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source_label: name.clone(),
            name,
            fetcher: None,
            processor: None,
        }
    }

    pub fn source_label(mut self, label: impl Into<String>) -> Self {
        self.source_label = label.into();
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn RowFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn ItemProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OperationRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// All configured operations, keyed by name within their kind.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    exports: HashMap<String, ExportDefinition>,
    imports: HashMap<String, ImportDefinition>,
    syncs: HashMap<String, SyncDefinition>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an export definition, replacing any previous one.
    pub fn register_export(mut self, def: ExportDefinition) -> Self {
        self.exports.insert(def.name.clone(), def);
        self
    }

    /// Registers an import definition, replacing any previous one.
    pub fn register_import(mut self, def: ImportDefinition) -> Self {
        self.imports.insert(def.name.clone(), def);
        self
    }

    /// Registers a sync definition, replacing any previous one.
    pub fn register_sync(mut self, def: SyncDefinition) -> Self {
        self.syncs.insert(def.name.clone(), def);
        self
    }

    pub fn export(&self, name: &str) -> Result<&ExportDefinition, EngineError> {
        self.exports
            .get(name)
            .ok_or_else(|| EngineError::InvalidOperation(name.to_string()))
    }

    pub fn import(&self, name: &str) -> Result<&ImportDefinition, EngineError> {
        self.imports
            .get(name)
            .ok_or_else(|| EngineError::InvalidOperation(name.to_string()))
    }

    pub fn sync(&self, name: &str) -> Result<&SyncDefinition, EngineError> {
        self.syncs
            .get(name)
            .ok_or_else(|| EngineError::InvalidOperation(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_kind_and_name() {
        let registry = OperationRegistry::new()
            .register_export(ExportDefinition::new("orders").column("id", "ID"))
            .register_import(ImportDefinition::new("contacts"))
            .register_sync(SyncDefinition::new("members"));

        assert!(registry.export("orders").is_ok());
        assert!(registry.import("contacts").is_ok());
        assert!(registry.sync("members").is_ok());

        // Names are scoped per kind.
        assert!(matches!(
            registry.export("contacts").unwrap_err(),
            EngineError::InvalidOperation(_)
        ));
    }

    #[test]
    fn re_registering_replaces() {
        let registry = OperationRegistry::new()
            .register_export(ExportDefinition::new("orders").column("id", "ID"))
            .register_export(ExportDefinition::new("orders").column("id", "Order ID"));

        let def = registry.export("orders").unwrap();
        assert_eq!(def.columns.len(), 1);
        assert_eq!(def.columns[0].label, "Order ID");
    }

    #[test]
    fn sync_label_defaults_to_name() {
        let def = SyncDefinition::new("members");
        assert_eq!(def.source_label, "members");

        let def = SyncDefinition::new("members").source_label("Members API");
        assert_eq!(def.source_label, "Members API");
    }
}
