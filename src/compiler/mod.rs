/*!
 The compiler takes a program's AST, checks it, and lowers it to text for one
 of two backends.

 Stages, in order:
 1. `semantics`: builds the symbol table of file level items and type checks
    every procedure body by simulating the operand stack. Every expression
    that produces a single value is annotated with its type. The output is a
    `CheckedProgram`, the only thing the generators accept.
 2. `memory`: computes sizes, field offsets and frame positions. Used by the
    checker for `sizeof` and friends and by both generators.
 3. `codegen`: picks the backend and checks the entry procedure.
    * `x86` writes fasm assembly for a static Linux executable.
    * `qbe` writes QBE IL, which QBE compiles for its own targets.

 A program that passes the checker is lowered as given: the generators only
 report errors for constructs they cannot express, or for annotations that
 are missing because the tree was never checked.
*/

pub mod ast;
pub mod codegen;
mod error;
pub mod flow;
pub mod memory;
pub mod qbe;
pub mod semantics;
pub mod source;
pub mod x86;

pub use error::{AtLocation, CompilerError, CompilerErrorDisplay, ErrorKind};
pub use source::Location;
