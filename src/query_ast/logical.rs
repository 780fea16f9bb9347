//! Compiled query: the backend operation a statement lowers to, before wire rendering.

use bson::Document;

use super::errors::Warning;

/// One aggregation pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Document),
    /// `local_field` / `foreign_field` are None for a cross join (uncorrelated lookup).
    Lookup { from: String, local_field: Option<String>, foreign_field: Option<String>, as_field: String },
    Unwind { path: String, preserve_null_and_empty: bool },
    Group(Document),
    Project(Document),
    Sort(Document),
    Skip(u64),
    Limit(u64),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Lookup { .. } => "$lookup",
            Stage::Unwind { .. } => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub keys: Document,
    pub name: String,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledOperation {
    Find { filter: Document, projection: Option<Document>, sort: Option<Document>, limit: Option<u64>, skip: Option<u64> },
    Aggregate { pipeline: Vec<Stage> },
    /// Always holds at least one document.
    Insert { documents: Vec<Document> },
    Update { filter: Document, update: Document },
    Delete { filter: Document },
    CreateCollection {
        validator: Option<Document>,
        validation_level: String,
        validation_action: String,
        indexes: Vec<IndexSpec>,
        metadata: Option<Document>,
    },
    DropCollection { if_exists: bool },
    /// Not executable as a single operation; `queries` are the pieces the caller has to combine.
    RequiresManualStrategy { reason: String, strategy: String, recommendation: String, queries: Vec<CompiledQuery> },
}

impl CompiledOperation {
    pub fn name(&self) -> &'static str {
        match self {
            CompiledOperation::Find { .. } => "find",
            CompiledOperation::Aggregate { .. } => "aggregate",
            CompiledOperation::Insert { documents } if documents.len() > 1 => "insert_many",
            CompiledOperation::Insert { .. } => "insert",
            CompiledOperation::Update { .. } => "update",
            CompiledOperation::Delete { .. } => "delete",
            CompiledOperation::CreateCollection { .. } => "create_collection_with_schema",
            CompiledOperation::DropCollection { .. } => "drop_collection",
            CompiledOperation::RequiresManualStrategy { .. } => "requires_manual_strategy",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub collection: String,
    pub operation: CompiledOperation,
    pub warnings: Vec<Warning>,
}

impl CompiledQuery {
    pub fn is_executable(&self) -> bool { !matches!(self.operation, CompiledOperation::RequiresManualStrategy { .. }) }

    pub fn pipeline(&self) -> Option<&[Stage]> {
        match &self.operation {
            CompiledOperation::Aggregate { pipeline } => Some(pipeline),
            _ => None,
        }
    }
}
