//! Single-pass compiler for MicroJava.
//!
//! Source text goes through the lexer into a recursive-descent parser that
//! checks types and emits stack-machine code as it recognizes each rule.
//! The result is an [`ObjectFile`] for the MicroJava VM; [`vm::Vm`] is a
//! reference interpreter for it.

pub mod bytecode;
pub mod diagnostic;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod symtab;
pub mod token;
pub mod vm;

use thiserror::Error;

pub use bytecode::ObjectFile;
pub use diagnostic::Diagnostic;
pub use options::CompileOptions;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation failed with {} error(s)", .0.len())]
    Failed(Vec<Diagnostic>),
}

/// Outcome of one compilation: the generated code and everything reported
/// along the way.
#[derive(Debug)]
pub struct Compilation {
    object: ObjectFile,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Compilation {
    pub(crate) fn new(object: ObjectFile, errors: Vec<Diagnostic>, warnings: Vec<Diagnostic>) -> Self {
        Compilation {
            object,
            errors,
            warnings,
        }
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// The generated code, only if compilation reported no errors.
    pub fn object(&self) -> Option<&ObjectFile> {
        self.is_ok().then_some(&self.object)
    }

    pub fn into_result(self) -> Result<ObjectFile, CompileError> {
        if self.errors.is_empty() {
            Ok(self.object)
        } else {
            Err(CompileError::Failed(self.errors))
        }
    }
}

/// Compiles `source` with default options.
pub fn compile(source: &str) -> Compilation {
    compile_with(source, &CompileOptions::default())
}

pub fn compile_with(source: &str, options: &CompileOptions) -> Compilation {
    parser::Parser::new(source, options).parse()
}
