pub mod layout;

pub use layout::{chunks, Chunk, Layout, LayoutError, LayoutResult, LocationSize, NATIVE_WIDTHS, PORTABLE_WIDTHS};
