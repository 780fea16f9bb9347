//! CREATE TABLE / DROP TABLE → collection schema operations.

use bson::{Bson, Document, doc};
use log::{debug, warn};

use super::errors::{CompileError, ParseError, Warning};
use super::logical::{CompiledOperation, IndexSpec};
use crate::config::CompilerConfig;
use crate::models::{ColumnDef, CreateTableSpec, DropTableSpec, TableConstraint, WarningKind};

/// SQL base type → `$jsonSchema` bsonType.
const TYPE_MAP: &[(&str, &str)] = &[
    ("INT", "int"),
    ("INTEGER", "int"),
    ("SMALLINT", "int"),
    ("TINYINT", "int"),
    ("MEDIUMINT", "int"),
    ("SERIAL", "int"),
    ("BIGINT", "long"),
    ("BIGSERIAL", "long"),
    ("DECIMAL", "double"),
    ("NUMERIC", "double"),
    ("FLOAT", "double"),
    ("DOUBLE", "double"),
    ("REAL", "double"),
    ("CHAR", "string"),
    ("VARCHAR", "string"),
    ("NCHAR", "string"),
    ("NVARCHAR", "string"),
    ("TEXT", "string"),
    ("TINYTEXT", "string"),
    ("MEDIUMTEXT", "string"),
    ("LONGTEXT", "string"),
    ("UUID", "string"),
    ("TIME", "string"),
    ("DATE", "date"),
    ("DATETIME", "date"),
    ("TIMESTAMP", "date"),
    ("BOOLEAN", "bool"),
    ("BOOL", "bool"),
    ("BIT", "bool"),
    ("JSON", "object"),
    ("JSONB", "object"),
    ("BLOB", "binData"),
    ("TINYBLOB", "binData"),
    ("MEDIUMBLOB", "binData"),
    ("LONGBLOB", "binData"),
    ("BINARY", "binData"),
    ("VARBINARY", "binData"),
    ("BYTEA", "binData"),
];

pub fn bson_type(sql_type: &str) -> Option<&'static str> {
    let upper = sql_type.to_ascii_uppercase();
    TYPE_MAP.iter().find(|(sql, _)| *sql == upper).map(|(_, b)| *b)
}

fn index_prefix(table: &str) -> String { table.replace('.', "_") }

fn keys(columns: &[String]) -> Document {
    let mut d = Document::new();
    for c in columns {
        d.insert(c.clone(), 1);
    }
    d
}

fn property(col: &ColumnDef, warnings: &mut Vec<Warning>) -> Document {
    let ty = bson_type(&col.data_type).unwrap_or_else(|| {
        let msg = format!("unknown type {} for column `{}`, stored as string", col.data_type, col.name);
        warn!("{}", msg);
        warnings.push(Warning::new(WarningKind::SchemaNote, msg));
        "string"
    });
    let nullable = !col.not_null && !col.primary_key;
    let bson_type: Bson = if nullable { vec![ty, "null"].into() } else { ty.into() };
    let declared = match col.length {
        Some(n) => format!("{}({})", col.data_type, n),
        None => col.data_type.clone(),
    };
    let mut prop = doc! { "bsonType": bson_type, "description": format!("Column {} ({})", col.name, declared) };
    if ty == "string"
        && let Some(n) = col.length
    {
        prop.insert("maxLength", i64::from(n));
    }
    prop
}

pub fn translate_create(table: &str, spec: &CreateTableSpec, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> CompiledOperation {
    let mut properties = Document::new();
    let mut required: Vec<Bson> = Vec::new();
    for col in &spec.columns {
        properties.insert(col.name.clone(), property(col, warnings));
        if col.not_null {
            required.push(col.name.clone().into());
        }
    }
    let validator = (!properties.is_empty()).then(|| {
        let mut schema = doc! { "bsonType": "object" };
        if !required.is_empty() {
            schema.insert("required", required);
        }
        schema.insert("properties", properties);
        doc! { "$jsonSchema": schema }
    });

    let prefix = index_prefix(table);
    let mut indexes = Vec::new();
    let mut primary: Vec<String> = spec.columns.iter().filter(|c| c.primary_key).map(|c| c.name.clone()).collect();
    for c in &spec.constraints {
        if let TableConstraint::PrimaryKey { columns } = c {
            primary = columns.clone();
        }
    }
    if !primary.is_empty() {
        indexes.push(IndexSpec { keys: keys(&primary), name: format!("{}_pkey", prefix), unique: true });
    }
    for col in spec.columns.iter().filter(|c| c.unique && !c.primary_key) {
        indexes.push(IndexSpec { keys: keys(std::slice::from_ref(&col.name)), name: format!("{}_{}_key", prefix, col.name), unique: true });
    }

    let mut foreign_keys: Vec<Bson> = Vec::new();
    let mut checks: Vec<Bson> = Vec::new();
    for col in &spec.columns {
        if let Some((ref_table, ref_col)) = &col.references {
            foreign_keys.push(foreign_key(None, std::slice::from_ref(&col.name), ref_table, std::slice::from_ref(ref_col), warnings).into());
        }
        if let Some(expr) = &col.check {
            checks.push(check(None, expr, warnings).into());
        }
    }
    for c in &spec.constraints {
        match c {
            TableConstraint::PrimaryKey { .. } => {}
            TableConstraint::Unique { name, columns } => indexes.push(IndexSpec {
                keys: keys(columns),
                name: name.clone().unwrap_or_else(|| format!("{}_{}_key", prefix, columns.join("_"))),
                unique: true,
            }),
            TableConstraint::Index { name, columns } => indexes.push(IndexSpec {
                keys: keys(columns),
                name: name.clone().unwrap_or_else(|| format!("{}_{}_idx", prefix, columns.join("_"))),
                unique: false,
            }),
            TableConstraint::ForeignKey { name, columns, ref_table, ref_columns } => {
                foreign_keys.push(foreign_key(name.as_deref(), columns, ref_table, ref_columns, warnings).into());
            }
            TableConstraint::Check { name, expr } => checks.push(check(name.as_deref(), expr, warnings).into()),
        }
    }

    let mut metadata = Document::new();
    let mut defaults = Document::new();
    for col in spec.columns.iter() {
        if let Some(v) = &col.default {
            defaults.insert(col.name.clone(), v.to_bson());
        }
    }
    let auto_increment: Vec<Bson> = spec.columns.iter().filter(|c| c.auto_increment).map(|c| Bson::String(c.name.clone())).collect();
    for col in spec.columns.iter().filter(|c| c.auto_increment) {
        warnings.push(Warning::new(WarningKind::SchemaNote, format!("AUTO_INCREMENT on `{}` needs an application-side counter", col.name)));
    }
    if !defaults.is_empty() {
        metadata.insert("defaults", defaults);
    }
    if !auto_increment.is_empty() {
        metadata.insert("auto_increment", auto_increment);
    }
    if !foreign_keys.is_empty() {
        metadata.insert("foreign_keys", foreign_keys);
    }
    if !checks.is_empty() {
        metadata.insert("checks", checks);
    }
    if spec.if_not_exists {
        metadata.insert("if_not_exists", true);
    }

    debug!("CREATE TABLE {}: {} columns, {} indexes", table, spec.columns.len(), indexes.len());
    CompiledOperation::CreateCollection {
        validator,
        validation_level: config.validation_level.clone(),
        validation_action: config.validation_action.clone(),
        indexes,
        metadata: (!metadata.is_empty()).then_some(metadata),
    }
}

fn foreign_key(name: Option<&str>, columns: &[String], ref_table: &str, ref_columns: &[String], warnings: &mut Vec<Warning>) -> Document {
    let msg = format!("foreign keys are not enforced natively: ({}) -> {}({})", columns.join(", "), ref_table, ref_columns.join(", "));
    warn!("{}", msg);
    warnings.push(Warning::new(WarningKind::ForeignKeyNotEnforced, msg));
    let mut fk = doc! { "columns": columns.to_vec(), "references": { "table": ref_table, "columns": ref_columns.to_vec() } };
    if let Some(n) = name {
        fk.insert("name", n);
    }
    fk
}

fn check(name: Option<&str>, expr: &str, warnings: &mut Vec<Warning>) -> Document {
    warnings.push(Warning::new(WarningKind::SchemaNote, format!("CHECK ({}) is recorded but not enforced", expr)));
    let mut c = doc! { "expression": expr };
    if let Some(n) = name {
        c.insert("name", n);
    }
    c
}

pub fn translate_drop(table: &str, spec: &DropTableSpec) -> Result<CompiledOperation, CompileError> {
    if table.is_empty() {
        return Err(ParseError::MissingTable("DROP TABLE").into());
    }
    Ok(CompiledOperation::DropCollection { if_exists: spec.if_exists })
}
