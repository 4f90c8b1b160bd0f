//! A toolchain for a small three-address intermediate language: a JSON
//! program format, a reference interpreter with a typed heap, and a
//! CFG-based optimizer (dead-code elimination and loop induction-variable
//! strength reduction).

pub mod commons;
pub mod error;
pub mod interp;
pub mod middle_end;

pub use error::{Error, Result};
