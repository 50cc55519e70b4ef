//! Value model, formula execution and derivation.
pub mod engine;
pub mod expr;
pub mod formula;
pub mod ledger;

pub use engine::{resolve, resolve_changed, Diagnostic, Resolution, Resolver};
pub use formula::{compute, Calculation, FormulaExecutor};
pub use ledger::{ComputationError, Value, ValueMap, ERROR_SENTINEL};
