//! The timesharing-extension instructions: bank transfers, the
//! relocation/protection register images, storage nullification and
//! channel-trap control.
//!
//! Register-image word formats:
//!
//! - relocation word (LRI/SRI): block number in the low eight bits of
//!   the decrement field;
//! - protection word (LPI/SPI): starting block in the low eight bits
//!   of the address field, limit block in the low eight bits of the
//!   decrement field.
//!
//! TIA/TIB transfer with the instruction stream switched to the named
//! bank; bit 17 of the decrement field set enters user mode, bit 16
//! enters relocation mode, both through the one-instruction-delayed
//! buffers, so the mode is live from the next instruction boundary.

use base::prelude::*;

use crate::chan::ChannelSet;
use crate::memory::{BankSelect, CoreMemory};

use super::{Cpu, Flow, OpResult};

impl Cpu {
    /// ESNT: enter storage-nullification mode and transfer.  The
    /// transfer is a supervisor dispatch and is deliberately not
    /// subject to transfer-trap redirection.
    pub(super) fn op_esnt(&mut self, ea: Address) -> OpResult {
        self.regs.storage_null = true;
        Ok(Flow::Jump(ea))
    }

    /// TIA/TIB.
    pub(super) fn op_transfer_in(
        &mut self,
        word: Word,
        ea: Address,
        bank: BankSelect,
    ) -> OpResult {
        self.regs.instruction_bank = bank;
        let dec = word.decrement();
        if dec & 0o1 != 0 {
            self.regs.user_buf = true;
        }
        if dec & 0o2 != 0 {
            self.regs.reloc_buf = true;
        }
        Ok(Flow::Jump(ea))
    }

    pub(super) fn op_lri(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.reloc_block = w.decrement() & 0o377;
        Ok(Flow::Next)
    }

    pub(super) fn op_lpi(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.start_block = w.address_bits() & 0o377;
        self.regs.limit_block = w.decrement() & 0o377;
        Ok(Flow::Next)
    }

    /// SRI: store the relocation register image.
    ///
    /// TODO: the surviving notes on the relocation hardware do not
    /// pin down which bit of the stored image carried the
    /// relocation-mode flag, so only the block number is stored; the
    /// mode flag's position is left unset rather than guessed.
    pub(super) fn op_sri(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let image = Word::ZERO.with_decrement(self.regs.reloc_block);
        self.write_data(mem, ea, image)?;
        Ok(Flow::Next)
    }

    /// SPI: store the protection register image.
    pub(super) fn op_spi(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let image = Word::ZERO
            .with_address(self.regs.start_block)
            .with_decrement(self.regs.limit_block);
        self.write_data(mem, ea, image)?;
        Ok(Flow::Next)
    }

    /// ENB: load the channel-trap enable mask; traps stay inhibited
    /// until one further instruction has completed.
    pub(super) fn op_enb(
        &mut self,
        mem: &mut CoreMemory,
        chans: &mut ChannelSet,
        ea: Address,
    ) -> OpResult {
        let w = self.read_data(mem, ea)?;
        chans.traps.set_enable_mask(w);
        chans.traps.arm_one_instruction_inhibit();
        Ok(Flow::Next)
    }
}
