//! Trap firing: fixed save locations, fixed entry vectors, and the
//! transient-mode cleardown that keeps trap handlers supervisor-safe.
//!
//! Location assignments:
//!
//! | trap                  | save    | vector  | save word |
//! | --------------------- | ------- | ------- | --------- |
//! | transfer trap         | 00000   | 00001   | address <- branch target, decrement <- old PC |
//! | STR                   | 00000   | 00002   | address <- old PC |
//! | floating point        | 00000   | 00010   | address <- old PC, decrement <- spill code |
//! | select (compat)       | 00000   | 00010   | address <- old PC, decrement <- 0o20 |
//! | copy (compat)         | 00000   | 00010   | address <- old PC, decrement <- 0o40 |
//! | protection            | 00032   | 00033   | address <- old PC |
//! | channel c trap        | 00012+2c| 00013+2c| address <- old PC, decrement <- cause |
//!
//! The floating-point and compatibility traps share the vector at
//! 00010; the cause code in the save word's decrement field tells the
//! handler which it was (low four bits are the spill code).
//!
//! Taking *any* trap clears the transient mode flags — copy trap,
//! select trap, storage nullification, user mode and its buffer,
//! relocation mode and its buffer, and both bank selectors — so the
//! handler always runs unrelocated, unprotected and unprivileged-safe.

use tracing::{event, Level};

use base::prelude::*;

use crate::memory::{BankSelect, CoreMemory};

use super::Cpu;

/// Cause-code bit marking a select compatibility trap.
pub const CAUSE_SELECT: u16 = 0o20;
/// Cause-code bit marking a copy compatibility trap.
pub const CAUSE_COPY: u16 = 0o40;

/// The kinds of trap the machine can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapKind {
    /// Floating-point spill; the 4-bit code says which register
    /// overflowed or underflowed.
    Floating { spill: u8 },
    /// User-mode access outside the protection window.
    Protection,
    /// A select-class instruction executed in select-trap mode.
    Select,
    /// A copy-class instruction executed in copy-trap mode.
    Copy,
    /// A control transfer intercepted by transfer-trap mode.
    Transfer { target: Address },
    /// The STR instruction.
    Str,
    /// A channel trap, with its cause flags.
    Channel { channel: ChannelNumber, cause: u8 },
}

impl TrapKind {
    fn save_and_vector(&self) -> (Address, Address) {
        match self {
            TrapKind::Transfer { .. } => (Address::ZERO, Address::new(0o1)),
            TrapKind::Str => (Address::ZERO, Address::new(0o2)),
            TrapKind::Floating { .. } | TrapKind::Select | TrapKind::Copy => {
                (Address::ZERO, Address::new(0o10))
            }
            TrapKind::Protection => (Address::new(0o32), Address::new(0o33)),
            TrapKind::Channel { channel, .. } => {
                let c = channel.index() as u16;
                (Address::new(0o12 + 2 * c), Address::new(0o13 + 2 * c))
            }
        }
    }

    fn save_word(&self, old_pc: Address) -> Word {
        let base = Word::ZERO.with_address(old_pc.bits());
        match self {
            TrapKind::Floating { spill } => base.with_decrement(u16::from(*spill)),
            TrapKind::Select => base.with_decrement(CAUSE_SELECT),
            TrapKind::Copy => base.with_decrement(CAUSE_COPY),
            TrapKind::Transfer { target } => Word::ZERO
                .with_address(target.bits())
                .with_decrement(old_pc.bits()),
            TrapKind::Str | TrapKind::Protection => base,
            TrapKind::Channel { cause, .. } => base.with_decrement(u16::from(*cause)),
        }
    }
}

impl Cpu {
    /// Fire a trap: save the old program counter (and cause, where
    /// the kind defines one), transfer to the vector, and clear the
    /// transient mode flags.
    pub(crate) fn fire_trap(&mut self, mem: &mut CoreMemory, kind: TrapKind) {
        let (save, vector) = kind.save_and_vector();
        let word = kind.save_word(self.regs.ic);
        mem.write_physical(save, word);
        event!(
            Level::DEBUG,
            "trap {:?}: save {:o} <- {:o}, vector {:o}",
            kind,
            save,
            word,
            vector
        );
        self.regs.ic = vector;
        self.clear_transient_modes();
    }

    /// The cleardown every trap performs.
    fn clear_transient_modes(&mut self) {
        self.regs.copy_trap = false;
        self.regs.select_trap = false;
        self.regs.storage_null = false;
        self.regs.user_mode = false;
        self.regs.user_buf = false;
        self.regs.reloc_mode = false;
        self.regs.reloc_buf = false;
        self.regs.instruction_bank = BankSelect::A;
        self.regs.data_bank = BankSelect::A;
    }
}
