//! Compiled query → wire document (BSON) and its JSON rendering.

use bson::{Bson, Document, doc};
use serde_json::{Map, Number, Value};

use super::logical::{CompiledOperation, CompiledQuery, IndexSpec, Stage};

pub mod filter;

/// Counts are Int32 when they fit, like `doc!` literals.
fn count(n: u64) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX)),
    }
}

pub fn stage_to_document(stage: &Stage) -> Document {
    let body: Bson = match stage {
        Stage::Match(d) | Stage::Group(d) | Stage::Project(d) | Stage::Sort(d) => d.clone().into(),
        Stage::Lookup { from, local_field: Some(local), foreign_field: Some(foreign), as_field } => {
            doc! { "from": from.as_str(), "localField": local.as_str(), "foreignField": foreign.as_str(), "as": as_field.as_str() }.into()
        }
        Stage::Lookup { from, as_field, .. } => doc! { "from": from.as_str(), "pipeline": [], "as": as_field.as_str() }.into(),
        Stage::Unwind { path, preserve_null_and_empty } => {
            doc! { "path": format!("${}", path), "preserveNullAndEmptyArrays": *preserve_null_and_empty }.into()
        }
        Stage::Skip(n) | Stage::Limit(n) => count(*n),
    };
    let mut d = Document::new();
    d.insert(stage.name(), body);
    d
}

fn index_to_document(index: &IndexSpec) -> Document { doc! { "key": index.keys.clone(), "name": index.name.as_str(), "unique": index.unique } }

/// Wire form of a compiled query: `{operation, collection, ...}` plus `warnings` when there are any.
pub fn to_document(query: &CompiledQuery) -> Document {
    let mut out = doc! { "operation": query.operation.name(), "collection": query.collection.as_str() };
    match &query.operation {
        CompiledOperation::Find { filter, projection, sort, limit, skip } => {
            out.insert("query", filter.clone());
            if let Some(p) = projection {
                out.insert("projection", p.clone());
            }
            if let Some(s) = sort {
                out.insert("sort", s.clone());
            }
            if let Some(n) = limit {
                out.insert("limit", count(*n));
            }
            if let Some(n) = skip {
                out.insert("skip", count(*n));
            }
        }
        CompiledOperation::Aggregate { pipeline } => {
            out.insert("pipeline", pipeline.iter().map(stage_to_document).collect::<Vec<_>>());
        }
        CompiledOperation::Insert { documents } => match documents.as_slice() {
            [single] => {
                out.insert("document", single.clone());
            }
            many => {
                out.insert("documents", many.to_vec());
            }
        },
        CompiledOperation::Update { filter, update } => {
            out.insert("query", doc! { "query": filter.clone(), "update": update.clone() });
        }
        CompiledOperation::Delete { filter } => {
            out.insert("query", filter.clone());
        }
        CompiledOperation::CreateCollection { validator, validation_level, validation_action, indexes, metadata } => {
            let mut options = Document::new();
            if let Some(v) = validator {
                options.insert("validator", v.clone());
            }
            options.insert("validationLevel", validation_level.as_str());
            options.insert("validationAction", validation_action.as_str());
            out.insert("options", options);
            out.insert("indexes_to_create", indexes.iter().map(index_to_document).collect::<Vec<_>>());
            if let Some(m) = metadata {
                out.insert("metadata", m.clone());
            }
        }
        CompiledOperation::DropCollection { if_exists } => {
            if *if_exists {
                out.insert("if_exists", true);
            }
        }
        CompiledOperation::RequiresManualStrategy { reason, strategy, recommendation, queries } => {
            out.insert("reason", reason.as_str());
            out.insert("strategy", strategy.as_str());
            out.insert("recommendation", recommendation.as_str());
            if !queries.is_empty() {
                out.insert("queries", queries.iter().map(to_document).collect::<Vec<_>>());
            }
        }
    }
    if !query.warnings.is_empty() {
        out.insert("warnings", query.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>());
    }
    out
}

/// Plain JSON: numbers stay numbers, key order is preserved.
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(d) => Value::Object(document_to_map(d)),
        other => Value::String(other.to_string()),
    }
}

fn document_to_map(d: &Document) -> Map<String, Value> { d.iter().map(|(k, v)| (k.clone(), bson_to_json(v))).collect() }

pub fn to_json(query: &CompiledQuery) -> Value { Value::Object(document_to_map(&to_document(query))) }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WarningKind;
    use crate::query_ast::errors::Warning;

    #[test]
    fn find_wire_shape() {
        let q = CompiledQuery {
            collection: "users".into(),
            operation: CompiledOperation::Find { filter: doc! { "age": { "$gt": 21 } }, projection: None, sort: None, limit: Some(10), skip: None },
            warnings: vec![],
        };
        assert_eq!(to_document(&q), doc! { "operation": "find", "collection": "users", "query": { "age": { "$gt": 21 } }, "limit": 10 });
        assert_eq!(to_json(&q).to_string(), r#"{"operation":"find","collection":"users","query":{"age":{"$gt":21}},"limit":10}"#);
    }

    #[test]
    fn lookup_and_unwind_stages() {
        let lookup = Stage::Lookup { from: "b".into(), local_field: Some("b_id".into()), foreign_field: Some("id".into()), as_field: "b_joined".into() };
        assert_eq!(stage_to_document(&lookup), doc! { "$lookup": { "from": "b", "localField": "b_id", "foreignField": "id", "as": "b_joined" } });
        let cross = Stage::Lookup { from: "b".into(), local_field: None, foreign_field: None, as_field: "b_joined".into() };
        assert_eq!(stage_to_document(&cross), doc! { "$lookup": { "from": "b", "pipeline": [], "as": "b_joined" } });
        let unwind = Stage::Unwind { path: "b_joined".into(), preserve_null_and_empty: true };
        assert_eq!(stage_to_document(&unwind), doc! { "$unwind": { "path": "$b_joined", "preserveNullAndEmptyArrays": true } });
    }

    #[test]
    fn insert_many_and_warnings() {
        let q = CompiledQuery {
            collection: "t".into(),
            operation: CompiledOperation::Insert { documents: vec![doc! { "a": 1 }, doc! { "a": 2 }] },
            warnings: vec![Warning::new(WarningKind::RowRejected, "row 2 has 1 values for 2 columns")],
        };
        assert_eq!(
            to_document(&q),
            doc! {
                "operation": "insert_many",
                "collection": "t",
                "documents": [{ "a": 1 }, { "a": 2 }],
                "warnings": ["row rejected: row 2 has 1 values for 2 columns"],
            }
        );
    }

    #[test]
    fn update_nests_query_and_update() {
        let q = CompiledQuery {
            collection: "t".into(),
            operation: CompiledOperation::Update { filter: doc! { "id": 1 }, update: doc! { "$set": { "a": 2 } } },
            warnings: vec![],
        };
        assert_eq!(to_document(&q).get_document("query").unwrap(), &doc! { "query": { "id": 1 }, "update": { "$set": { "a": 2 } } });
    }
}
