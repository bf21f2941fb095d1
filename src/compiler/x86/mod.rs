/*!
 # x86
 ## About
 Native backend: lowers a checked program to x86-64 assembly for fasm,
 producing a static Linux ELF64 executable.

 `assembly` models the subset of instructions the generator uses and knows
 how fasm wants them written. `generator` walks the annotated tree and
 emits those instructions.

 ## Frame
 ```text
 [rbp+16 ..]  arguments, the last one at rbp+16
 [rbp+8]      return address
 [rbp]        caller's rbp
 [rbp-8 ..]   locals, below an 8 byte gap
 ```
 Returning moves the returned bytes to where the arguments started, so the
 caller finds the results on top of its stack in place of the arguments.
*/

pub mod assembly;
mod generator;

pub use generator::FasmContext;
