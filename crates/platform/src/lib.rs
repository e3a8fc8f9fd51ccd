//! GoExport platform contracts.
//!
//! Monitor geometry and the check that a requested capture size fits on the
//! primary display.

pub mod display;

pub use display::*;
