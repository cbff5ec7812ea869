pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod disasm;
pub mod emitter;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod value;
pub mod vm;

use crate::ast::Program;
use crate::bytecode::Bytecode;
use crate::diagnostic::Diagnostic;

/// Lex and parse `source`. Diagnostics carry the source for rendering.
pub fn parse_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let tokens = lexer::lex(source).map_err(|e| vec![Diagnostic::from(&e).with_source(source)])?;
    let (program, errors) = parser::parse(tokens);
    if !errors.is_empty() {
        return Err(errors.iter().map(|e| Diagnostic::from(e).with_source(source)).collect());
    }
    Ok(program)
}

/// Full front end: source text to an assembled stream whose entry
/// function is `entry`.
pub fn compile_source(source: &str, entry: &str) -> Result<Bytecode, Vec<Diagnostic>> {
    let program = parse_source(source)?;
    compiler::Compiler::new(entry)
        .compile(&program)
        .map_err(|errors| errors.iter().map(|e| Diagnostic::from(e).with_source(source)).collect())
}
