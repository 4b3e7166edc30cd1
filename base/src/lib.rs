//! The `base` crate defines the machine-word and instruction
//! representations which are useful in both the simulator and other
//! associated tools.  The idea is that if you want to write a loader
//! or a cross-assembler, it would depend on the base crate but would
//! not need to depend on the simulator library itself.

mod types;
mod word;

pub mod collections;
pub mod instruction;
pub mod prelude;

pub use crate::types::*;
pub use crate::word::*;
