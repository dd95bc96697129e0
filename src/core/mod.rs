//! Core data types and models

pub mod event;
pub mod segment;
pub mod temporal;

pub use event::*;
pub use segment::*;
pub use temporal::*;
