//! Scan definitions, iteration order, and swept-parameter bindings.

pub mod bindings;
pub mod space;
pub mod spec;

pub use bindings::VariableBindings;
pub use space::{IterationSpace, ScanCursor, ScanPosition};
pub use spec::{Scannable, ScanSpec, SequenceScan, CURRENT_TAB};
