use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::enums::WarningKind;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("ambiguous statement: {0}")] AmbiguousStatement(String),
    #[error("no table name found in {0} statement")] MissingTable(&'static str),
    #[error("unparsable condition: {0}")] UnparsableCondition(String),
    #[error("tokenize error: {0}")] Tokenize(String),
    #[error("syntax error: {0}")] Syntax(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)] Parse(#[from] ParseError),
    #[error("unsupported join condition: {0}")] UnsupportedJoinCondition(String),
    #[error("no valid rows to insert ({rejected} rejected)")] NoValidRows { rejected: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    #[error("unsupported function: {0}")] Unsupported(String),
    #[error("{name} expects {expected} argument(s), got {got}")] Arity { name: String, expected: &'static str, got: usize },
    #[error("invalid argument for {name}: {detail}")] Argument { name: String, detail: String },
}

impl From<sqlparser::tokenizer::TokenizerError> for ParseError { fn from(e: sqlparser::tokenizer::TokenizerError) -> Self { ParseError::Tokenize(e.to_string()) } }

/// Non-fatal diagnostic carried on a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self { Self { kind, message: message.into() } }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}: {}", self.kind.label(), self.message) }
}
