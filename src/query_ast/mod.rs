//! SQL → document-database query compiler.
//!
//! Parsing turns one SQL statement into a [`ParsedStatement`](crate::models::ParsedStatement);
//! compilation lowers it to a [`CompiledQuery`] (find, aggregate, write or schema operation);
//! the emitter renders the wire document. Nothing here performs I/O.

pub mod condition;
pub mod ddl;
pub mod emitter;
pub mod errors;
pub mod expr;
pub mod extractor;
pub mod functions;
pub mod joins;
pub mod lexer;
pub mod logical;
pub mod parser;
pub mod pipeline;
pub mod value;

pub use condition::parse_condition;
pub use emitter::{to_document, to_json};
pub use errors::*;
pub use logical::*;
pub use parser::parse_statement;

use crate::config::CompilerConfig;
use crate::models::ParsedStatement;

/// Stateless compiler; holds only its configuration and may be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self { Self { config } }

    pub fn config(&self) -> &CompilerConfig { &self.config }

    pub fn compile(&self, stmt: &ParsedStatement) -> Result<CompiledQuery, CompileError> { pipeline::compile_statement(stmt, &self.config) }

    pub fn compile_sql(&self, sql: &str) -> Result<CompiledQuery, CompileError> {
        let stmt = parse_statement(sql)?;
        log::debug!("parsed {:?} on `{}`", stmt.kind, stmt.table);
        self.compile(&stmt)
    }
}

/// Compile with the default configuration.
pub fn compile(stmt: &ParsedStatement) -> Result<CompiledQuery, CompileError> { Compiler::default().compile(stmt) }

pub fn compile_sql(sql: &str) -> Result<CompiledQuery, CompileError> { Compiler::default().compile_sql(sql) }
