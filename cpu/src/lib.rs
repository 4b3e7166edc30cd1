//! Simulator core for a 7090/7094-class, 36-bit, signed-magnitude
//! mainframe with a timesharing relocation/protection extension and
//! two data-channel architectures.
//!
//! The crate simulates the instruction execution engine (fetch,
//! decode, execute, addressing, arithmetic, traps, protection) and
//! the channel I/O engine (both channel state machines and the
//! channel-trap evaluator).  Peripheral simulators, the object-file
//! loader and the operator front end are external: they reach the
//! core only through [`io::Unit`], [`System::load_word`] /
//! [`System::read_word`] and the [`StopReason`] status set.
#![crate_name = "cpu"]

pub mod arith;
pub mod chan;
mod clock;
mod context;
pub mod control;
pub mod float;
pub mod io;
pub mod memory;
mod stop;
mod system;

pub use clock::{BasicClock, Clock};
pub use context::Context;
pub use control::{Cpu, CpuConfiguration, CpuState, ExecOutcome, HistoryEntry};
pub use memory::{BankSelect, CoreMemory, Mapping, MemoryConfiguration, MemoryFault, Stream};
pub use stop::{IoStatus, StopReason};
pub use system::{System, SystemConfiguration};
