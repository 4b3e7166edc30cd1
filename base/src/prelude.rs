//! Convenience re-exports for callers that want the whole machine
//! vocabulary in scope.

pub use crate::instruction::{Decoded, IndexOp, Instruction, Opcode};
pub use crate::types::{Address, ChannelNumber, Tag};
pub use crate::word::{Accumulator, Sign, Word};
