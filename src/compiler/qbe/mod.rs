//! Portable backend: lowers a checked program to the QBE intermediate
//! language, which QBE then compiles for any of its targets.
//!
//! Arguments, locals and the return buffer live in stack slots made with
//! `alloc8`. Every other value is a temporary, tracked on a stack that
//! mirrors the machine stack of the native backend. Procedures with return
//! values return an opaque aggregate `:.N` of the combined return size.

mod generator;
pub mod ir;

pub use generator::QbeContext;
