//! Human-readable renderings for debugging.
pub mod trace;

pub use trace::format_trace;
