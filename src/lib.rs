pub mod config;
pub mod models;
pub mod query_ast;

pub use config::CompilerConfig;
pub use query_ast::{CompileError, CompiledOperation, CompiledQuery, Compiler, compile_sql, parse_statement};

use std::io::Read;

/// Command-line entrypoint: SQL from the arguments (joined) or stdin, wire JSON on stdout.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let _ = env_logger::Builder::from_default_env()
        // warnings are part of the output, info shows the chosen operation
        .filter_module("sqlbridge", log::LevelFilter::Info)
        .is_test(false)
        .try_init();

    let mut compact = false;
    let mut print_config = false;
    let mut words = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--compact" => compact = true,
            "--print-config" => print_config = true,
            _ => words.push(arg),
        }
    }

    let config = CompilerConfig::load();
    if print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let sql = if words.is_empty() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        words.join(" ")
    };
    if sql.trim().is_empty() {
        return Err("no SQL given; pass it as arguments or on stdin".into());
    }

    let compiled = Compiler::new(config).compile_sql(&sql)?;
    let json = query_ast::to_json(&compiled);
    let rendered = if compact { serde_json::to_string(&json)? } else { serde_json::to_string_pretty(&json)? };
    println!("{}", rendered);
    Ok(())
}
