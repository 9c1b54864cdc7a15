//! Crate root: wires together the compilation pipeline.
//!
//! The stages run strictly in order, each consuming the previous one's output:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns a function AST with locals.
//! - `codegen` lays out the stack frame and lowers the function into x86-64 assembly.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod codegen;
pub mod error;
pub mod parser;
pub mod tokenizer;

pub use error::{CompileError, CompileResult};

/// Compile a source string into Intel-syntax assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let mut program = parser::parse(tokens, source)?;
  codegen::assign_lvar_offsets(&mut program);
  codegen::generate(&program)
}
