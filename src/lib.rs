//! minic: a compiler front-end-to-back-end pipeline for a subset of C
//!
//! Given a single C source file and a list of include directories, produces
//! x86-64 assembly text. The pipeline runs strictly forward through nine
//! stages (lex, parse, resolve, type-check, TAC-lower, backend-lower,
//! backend-symtab-convert, emit), never revisiting a tree once the next
//! stage has consumed it.
//!
//! ```rust,ignore
//! use minic::{CompileSession, CompilerConfig};
//! use minic::config::DebugStage;
//!
//! let config = CompilerConfig::new(vec![], DebugStage::None);
//! let asm = CompileSession::new().compile_file(&path, &config)?;
//! ```

pub mod ast;
pub mod backend;
pub mod config;
pub mod emit;
pub mod error;
pub mod intern;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod symbol;
pub mod tac;
pub mod typecheck;

pub use config::CompilerConfig;
pub use error::CompileError;
pub use intern::{Identifier, NameGenerator};
pub use symbol::{StructTable, SymbolTable};

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::ast::Program;
use crate::backend::ast::AsmProgram;
use crate::backend::lower::BackendLowering;
use crate::backend::symtab::{convert_symbol_table, BackendSymbolTable};
use crate::config::DebugStage;
use crate::resolver::Resolver;
use crate::tac::{TacLowering, TacProgram};
use crate::typecheck::TypeChecker;

/// One compile-unit's worth of process-wide state (§5): the name generator,
/// the front symbol table, and the structure-type table. Each survives from
/// the stage that populates it through to backend symbol conversion, so this
/// struct, rather than ambient globals, is what gets threaded through the
/// pipeline.
#[derive(Default)]
pub struct CompileSession {
    name_gen: NameGenerator,
    symbols: SymbolTable,
    structs: StructTable,
}

/// What a single `compile_file` call can be asked to stop at and print,
/// alongside the final assembly text when it runs to completion.
pub enum DebugOutput {
    Tokens(String),
    CAst(String),
    TypedAst(String),
    Tac(String),
    Assembly(String),
    Final(String),
}

impl CompileSession {
    pub fn new() -> Self {
        CompileSession::default()
    }

    /// Runs every stage in order, stopping early to render an intermediate
    /// tree's `Debug` text if `config.debug_stage` asks for one.
    #[instrument(skip(self, config), fields(path = %path.display()))]
    pub fn compile_file(&mut self, path: &Path, config: &CompilerConfig) -> Result<DebugOutput, CompileError> {
        info!("lexing");
        let search_paths = config.search_paths();
        let (tokens, _source_map) = lexer::lex(path, &search_paths)?;
        if config.debug_stage == DebugStage::Tokens {
            return Ok(DebugOutput::Tokens(format!("{tokens:#?}")));
        }

        debug!(count = tokens.len(), "parsing");
        let mut parser = parser::Parser::new(&tokens, path.to_path_buf());
        let mut program = parser.parse_program()?;
        if config.debug_stage == DebugStage::CAst {
            return Ok(DebugOutput::CAst(format!("{program:#?}")));
        }

        info!("resolving names");
        let mut resolver = Resolver::new(&self.name_gen);
        resolver.resolve_program(&mut program)?;

        info!("type-checking");
        let mut checker = TypeChecker::new(&mut self.symbols, &mut self.structs);
        checker.check_program(&mut program)?;
        if config.debug_stage == DebugStage::TypedAst {
            return Ok(DebugOutput::TypedAst(format!("{program:#?}")));
        }

        info!("lowering to three-address code");
        let tac_program = self.lower_to_tac(&program);
        if config.debug_stage == DebugStage::Tac {
            return Ok(DebugOutput::Tac(format!("{tac_program:#?}")));
        }

        info!("lowering to backend assembly");
        let (asm_program, _backend_symbols) = self.lower_to_backend(&tac_program);
        if config.debug_stage == DebugStage::Assembly {
            return Ok(DebugOutput::Assembly(format!("{asm_program:#?}")));
        }

        info!("emitting assembly text");
        let text = emit::emit_program(&asm_program).map_err(|e| CompileError::new(path, 0, e.to_string()))?;
        Ok(DebugOutput::Final(text))
    }

    fn lower_to_tac(&mut self, program: &Program) -> TacProgram {
        let mut lowering = TacLowering::new(&mut self.symbols, &self.structs, &self.name_gen);
        lowering.lower_program(program)
    }

    fn lower_to_backend(&self, tac_program: &TacProgram) -> (AsmProgram, BackendSymbolTable) {
        let mut lowering = BackendLowering::new(&self.symbols, &self.structs);
        let asm_program = lowering.lower_program(tac_program);
        let backend_symbols = convert_symbol_table(&self.symbols, &self.structs);
        (asm_program, backend_symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(src: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(src.as_bytes()).unwrap();
        f
    }

    #[test]
    fn compiles_trivial_main_to_assembly_with_ret() {
        let f = write_source("int main(void) { return 0; }");
        let config = CompilerConfig::new(vec![], DebugStage::None);
        let mut session = CompileSession::new();
        let output = session.compile_file(f.path(), &config).unwrap();
        let DebugOutput::Final(text) = output else { panic!("expected final assembly") };
        assert!(text.contains("main:"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn debug_stage_tokens_stops_before_parsing() {
        let f = write_source("int main(void) { return 0; }");
        let config = CompilerConfig::new(vec![], DebugStage::Tokens);
        let mut session = CompileSession::new();
        let output = session.compile_file(f.path(), &config).unwrap();
        assert!(matches!(output, DebugOutput::Tokens(_)));
    }

    #[test]
    fn static_variable_initializer_survives_to_assembly() {
        let f = write_source("int x = 5; int main(void) { return x; }");
        let config = CompilerConfig::new(vec![], DebugStage::None);
        let mut session = CompileSession::new();
        let output = session.compile_file(f.path(), &config).unwrap();
        let DebugOutput::Final(text) = output else { panic!("expected final assembly") };
        assert!(text.contains(".long 5"));
    }
}
