//! Index-register operations: the decrement-format test/modify-and-
//! branch family, and the normal-format load/store/place family.

use base::prelude::*;

use crate::memory::CoreMemory;

use super::trap::TrapKind;
use super::{Cpu, Flow, OpError, OpResult};

impl Cpu {
    /// Dispatch for the decrement instruction format.  The index
    /// comparisons are unsigned over the 15-bit register value.
    pub(super) fn op_index_format(
        &mut self,
        op: IndexOp,
        tag: Tag,
        decrement: u16,
        address: Address,
        mem: &mut CoreMemory,
    ) -> OpResult {
        let xr = self.regs.index_value(tag);
        match op {
            IndexOp::Txi => {
                self.regs.set_index(tag, xr.wrapping_add(decrement));
                self.branch_to(mem, address)
            }
            IndexOp::Tix => {
                if xr > decrement {
                    self.regs.set_index(tag, xr - decrement);
                    self.branch_to(mem, address)
                } else {
                    Ok(Flow::Next)
                }
            }
            IndexOp::Txh => {
                if xr > decrement {
                    self.branch_to(mem, address)
                } else {
                    Ok(Flow::Next)
                }
            }
            IndexOp::Tnx => {
                if xr > decrement {
                    self.regs.set_index(tag, xr - decrement);
                    Ok(Flow::Next)
                } else {
                    self.branch_to(mem, address)
                }
            }
            IndexOp::Txl => {
                if xr <= decrement {
                    self.branch_to(mem, address)
                } else {
                    Ok(Flow::Next)
                }
            }
            IndexOp::Str => {
                self.fire_trap(mem, TrapKind::Str);
                Err(OpError::Trapped)
            }
        }
    }

    // Normal-format index operations.

    pub(super) fn op_lxa(&mut self, mem: &mut CoreMemory, tag: Tag, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.set_index(tag, w.address_bits());
        Ok(Flow::Next)
    }

    pub(super) fn op_lxd(&mut self, mem: &mut CoreMemory, tag: Tag, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.set_index(tag, w.decrement());
        Ok(Flow::Next)
    }

    pub(super) fn op_sxa(&mut self, mem: &mut CoreMemory, tag: Tag, ea: Address) -> OpResult {
        let xr = self.regs.index_value(tag);
        let target = self.read_data(mem, ea)?;
        self.write_data(mem, ea, target.with_address(xr))?;
        Ok(Flow::Next)
    }

    pub(super) fn op_sxd(&mut self, mem: &mut CoreMemory, tag: Tag, ea: Address) -> OpResult {
        let xr = self.regs.index_value(tag);
        let target = self.read_data(mem, ea)?;
        self.write_data(mem, ea, target.with_decrement(xr))?;
        Ok(Flow::Next)
    }

    pub(super) fn op_pax(&mut self, tag: Tag) -> OpResult {
        let a = self.regs.ac.to_word().address_bits();
        self.regs.set_index(tag, a);
        Ok(Flow::Next)
    }

    pub(super) fn op_pdx(&mut self, tag: Tag) -> OpResult {
        let d = self.regs.ac.to_word().decrement();
        self.regs.set_index(tag, d);
        Ok(Flow::Next)
    }

    pub(super) fn op_pxa(&mut self, tag: Tag) -> OpResult {
        let xr = self.regs.index_value(tag);
        self.regs.ac = Accumulator::from_word(Word::ZERO.with_address(xr));
        Ok(Flow::Next)
    }

    pub(super) fn op_pxd(&mut self, tag: Tag) -> OpResult {
        let xr = self.regs.index_value(tag);
        self.regs.ac = Accumulator::from_word(Word::ZERO.with_decrement(xr));
        Ok(Flow::Next)
    }

    /// AXT: the raw (unindexed) address field to the index register.
    pub(super) fn op_axt(&mut self, tag: Tag, address: Address) -> OpResult {
        self.regs.set_index(tag, address.bits());
        Ok(Flow::Next)
    }
}
