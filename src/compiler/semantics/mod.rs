pub mod error;
pub mod macros;
pub mod stack;
pub mod symbol_table;
pub mod type_checker;


pub use error::SemanticError;
pub use stack::TypeStack;
pub use symbol_table::{ItemSymbol, Local, LocalScope, Resolved, SymbolTable};
pub use type_checker::{check, check_with_tracing};

use super::{ast::Program, memory::Layout, CompilerError};

pub type SemanticResult<T> = std::result::Result<T, CompilerError<SemanticError>>;

/// A program that passed type checking, with every expression annotated.
/// This is the only input the code generators accept.
#[derive(Debug)]
pub struct CheckedProgram {
    program: Program,
    symbols: SymbolTable,
}

impl CheckedProgram {
    fn new(program: Program, symbols: SymbolTable) -> CheckedProgram {
        CheckedProgram { program, symbols }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn layout(&self) -> Layout<'_> {
        Layout::new(&self.symbols)
    }

    /// Gives the annotated tree back, e.g. to serialize it or check it again.
    pub fn into_program(self) -> Program {
        self.program
    }
}
