pub mod result;

pub mod cli;
pub mod compiler;
pub mod diagnostics;
pub mod io;

pub use cli::*;
pub use compiler::{
    codegen::{generate, Backend},
    semantics::{check, check_with_tracing, CheckedProgram},
};
pub use io::{read_program, write_output};
