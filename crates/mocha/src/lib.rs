//! Single-pass compiler from a small imperative scripting language to a JVM
//! class file.
//!
//! Pipeline: source text → [`parser::parse`] → typed AST →
//! [`codegen::CodeGenerator`] (type checking + instruction emission) →
//! [`classfile::ClassEmitter::finish`] → container bytes. The whole source
//! is parsed and compiled before any output exists; the first error aborts
//! the compilation, so a failed run never produces a partial artifact.

pub mod classfile;
pub mod codegen;
pub mod parser;
pub mod semantics;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] parser::SyntaxError),
    #[error(transparent)]
    Semantic(#[from] codegen::SemanticError),
    #[error(transparent)]
    ClassFile(#[from] classfile::ClassFileError),
}

impl CompileError {
    /// Render the error with its source position and the offending snippet.
    pub fn format_with_source(&self, source: &str) -> String {
        let position = match self {
            CompileError::Syntax(error) => error.position,
            CompileError::Semantic(error) => error.span().start,
            // assembly errors have no source position
            CompileError::ClassFile(error) => return error.to_string(),
        };
        let (line, column) = offset_to_line_col(source, position);
        let snippet = source[position..]
            .lines()
            .next()
            .unwrap_or("")
            .trim_end();
        if snippet.is_empty() {
            format!("error at {line}:{column}: {self}")
        } else {
            format!("error at {line}:{column}: {self}\n  {snippet}")
        }
    }
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for ch in source[..offset.min(source.len())].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Compile a complete source text to class-file bytes.
///
/// Errors carry the offending source span; nothing is written anywhere —
/// persisting the artifact is the caller's responsibility.
pub fn compile(source: &str) -> Result<Vec<u8>, CompileError> {
    let program = parser::parse(source)?;
    let mut emitter = classfile::ClassEmitter::new();
    let max_locals = {
        let mut generator = codegen::CodeGenerator::new(&mut emitter);
        generator.compile_program(&program)?;
        generator.max_locals()
    };
    Ok(emitter.finish(max_locals)?)
}
