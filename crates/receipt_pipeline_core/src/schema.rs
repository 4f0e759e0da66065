//! crates/receipt_pipeline_core/src/schema.rs
//!
//! The schema registry: validates and stores per-collection column definitions.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Collection, Column, ColumnType};
use crate::error::{PipelineError, PipelineResult, Step};
use crate::ports::{DatabaseService, PortError};

/// An unvalidated column as received from a caller.
#[derive(Debug, Clone)]
pub struct ColumnDraft {
    pub name: String,
    pub column_type: String,
    pub required: bool,
}

/// An unvalidated collection definition as received from a caller.
#[derive(Debug, Clone)]
pub struct CollectionDraft {
    pub collection_id: String,
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<ColumnDraft>,
}

/// The result of `define_schema`.
#[derive(Debug, Clone)]
pub struct Defined {
    pub collection: Collection,
    /// False when the call replayed an identical, already stored definition.
    pub created: bool,
}

/// Validates a column list. Names are trimmed; uniqueness ignores case.
pub fn validate_columns(columns: &[ColumnDraft]) -> PipelineResult<Vec<Column>> {
    if columns.is_empty() {
        return Err(PipelineError::Validation(
            "a collection needs at least one column".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(columns.len());
    let mut validated = Vec::with_capacity(columns.len());
    for (index, draft) in columns.iter().enumerate() {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(PipelineError::Validation(format!(
                "column {} has an empty name",
                index + 1
            )));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(PipelineError::Validation(format!(
                "duplicate column name '{}'",
                name
            )));
        }
        let column_type = draft
            .column_type
            .parse::<ColumnType>()
            .map_err(|e| PipelineError::Validation(format!("column '{}': {}", name, e)))?;
        validated.push(Column::new(name, column_type, draft.required));
    }
    Ok(validated)
}

/// Owns collection schemas. Every definition is re-validated here regardless
/// of what the client already checked.
#[derive(Clone)]
pub struct SchemaRegistry {
    db: Arc<dyn DatabaseService>,
}

impl SchemaRegistry {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Defines a collection under its client-generated id.
    ///
    /// Replaying an identical definition is a no-op; a different definition
    /// under an existing id is a `Conflict`. Stored schemas are never overwritten.
    pub async fn define_schema(&self, owner_id: &str, draft: CollectionDraft) -> PipelineResult<Defined> {
        let collection_id = draft.collection_id.trim();
        if collection_id.is_empty() {
            return Err(PipelineError::Validation("folderId is required".to_string()));
        }
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(PipelineError::Validation("name is required".to_string()));
        }
        let columns = validate_columns(&draft.columns)?;
        let description = draft
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let now = Utc::now();
        let candidate = Collection {
            owner_id: owner_id.to_string(),
            collection_id: collection_id.to_string(),
            name: name.to_string(),
            description,
            columns,
            created_at: now,
            updated_at: now,
        };

        match self.db.insert_collection(candidate.clone()).await {
            Ok(collection) => {
                info!(owner_id, collection_id, columns = collection.columns.len(), "Collection defined");
                Ok(Defined {
                    collection,
                    created: true,
                })
            }
            Err(PortError::Conflict(_)) => {
                let existing = self
                    .db
                    .get_collection(owner_id, collection_id)
                    .await
                    .map_err(|e| PipelineError::from_port(Step::Store, e))?;
                if same_definition(&existing, &candidate) {
                    debug!(owner_id, collection_id, "Replayed identical collection definition");
                    Ok(Defined {
                        collection: existing,
                        created: false,
                    })
                } else {
                    warn!(owner_id, collection_id, "Rejected conflicting collection definition");
                    Err(PipelineError::Conflict(format!(
                        "folder '{}' already exists with a different definition",
                        collection_id
                    )))
                }
            }
            Err(e) => Err(PipelineError::from_port(Step::Store, e)),
        }
    }

    pub async fn get_schema(&self, owner_id: &str, collection_id: &str) -> PipelineResult<Collection> {
        self.db
            .get_collection(owner_id, collection_id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => PipelineError::not_found("folder", collection_id),
                other => PipelineError::from_port(Step::Store, other),
            })
    }

    /// All collections of the owner, most recently modified first.
    pub async fn list_collections(&self, owner_id: &str) -> PipelineResult<Vec<Collection>> {
        self.db
            .list_collections(owner_id)
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))
    }

    /// Deletes the collection. Its records are not touched and become uncategorized.
    pub async fn delete_collection(&self, owner_id: &str, collection_id: &str) -> PipelineResult<()> {
        self.db
            .delete_collection(owner_id, collection_id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => PipelineError::not_found("folder", collection_id),
                other => PipelineError::from_port(Step::Store, other),
            })?;
        info!(owner_id, collection_id, "Collection deleted; its receipts are now uncategorized");
        Ok(())
    }
}

fn same_definition(a: &Collection, b: &Collection) -> bool {
    a.name == b.name && a.description == b.description && a.columns == b.columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    fn col(name: &str, ty: &str, required: bool) -> ColumnDraft {
        ColumnDraft {
            name: name.to_string(),
            column_type: ty.to_string(),
            required,
        }
    }

    fn draft(id: &str, columns: Vec<ColumnDraft>) -> CollectionDraft {
        CollectionDraft {
            collection_id: id.to_string(),
            name: "Groceries".to_string(),
            description: None,
            columns,
        }
    }

    #[test]
    fn rejects_empty_duplicate_and_unknown_columns() {
        assert!(matches!(validate_columns(&[]), Err(PipelineError::Validation(_))));
        assert!(matches!(
            validate_columns(&[col("  ", "text", false)]),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            validate_columns(&[col("Vendor", "text", true), col("vendor", "number", false)]),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            validate_columns(&[col("Vendor", "blob", true)]),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn only_the_four_documented_type_tags_are_accepted() {
        for tag in ["text", "number", "date", "currency"] {
            assert!(validate_columns(&[col("Vendor", tag, true)]).is_ok(), "{tag}");
        }
        for tag in ["string", "int", ""] {
            assert!(
                matches!(
                    validate_columns(&[col("Vendor", tag, true)]),
                    Err(PipelineError::Validation(_))
                ),
                "{tag}"
            );
        }
    }

    #[test]
    fn keeps_declared_order_and_parses_types() {
        let columns = validate_columns(&[
            col("Vendor", "Text", true),
            col("Total", "number", true),
            col("Date", "DATE", false),
            col("Tip", "currency", false),
        ])
        .unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Vendor", "Total", "Date", "Tip"]);
        assert_eq!(columns[1].column_type, ColumnType::Number);
        assert_eq!(columns[3].column_type, ColumnType::Currency);
    }

    #[tokio::test]
    async fn identical_replay_is_a_noop_and_different_definition_conflicts() {
        let registry = SchemaRegistry::new(Arc::new(InMemoryStore::new()));
        let first = registry
            .define_schema("owner-1", draft("f1", vec![col("Vendor", "text", true)]))
            .await
            .unwrap();
        assert!(first.created);

        let replay = registry
            .define_schema("owner-1", draft("f1", vec![col("Vendor", "text", true)]))
            .await
            .unwrap();
        assert!(!replay.created);
        assert_eq!(replay.collection.created_at, first.collection.created_at);

        let err = registry
            .define_schema("owner-1", draft("f1", vec![col("Total", "number", true)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));

        let stored = registry.get_schema("owner-1", "f1").await.unwrap();
        assert_eq!(stored.column_names(), vec!["Vendor".to_string()]);
    }

    #[tokio::test]
    async fn ids_are_scoped_per_owner() {
        let registry = SchemaRegistry::new(Arc::new(InMemoryStore::new()));
        registry
            .define_schema("owner-1", draft("f1", vec![col("Vendor", "text", true)]))
            .await
            .unwrap();
        let other = registry
            .define_schema("owner-2", draft("f1", vec![col("Total", "number", true)]))
            .await
            .unwrap();
        assert!(other.created);
        assert!(matches!(
            registry.get_schema("owner-3", "f1").await,
            Err(PipelineError::NotFound { .. })
        ));
    }
}
