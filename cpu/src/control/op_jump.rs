//! Conditional and unconditional transfers.
//!
//! Every transfer here goes through `Cpu::branch_to`, so transfer-trap
//! mode intercepts all of them; TTR (trap transfer) is the deliberate
//! exception, decoded and dispatched directly in `control`.

use base::prelude::*;

use crate::memory::CoreMemory;

use super::{Cpu, Flow, OpResult};

impl Cpu {
    /// TZE: transfer when the whole 38-bit accumulator magnitude is
    /// zero, either sign.
    pub(super) fn op_tze(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.ac.is_zero() {
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    pub(super) fn op_tnz(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.ac.is_zero() {
            Ok(Flow::Next)
        } else {
            self.branch_to(mem, ea)
        }
    }

    pub(super) fn op_tpl(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.ac.sign() == Sign::Plus {
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    pub(super) fn op_tmi(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.ac.sign() == Sign::Minus {
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    /// TOV: transfer and clear when the overflow indicator is on.
    pub(super) fn op_tov(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.ac_overflow {
            self.regs.ac_overflow = false;
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    /// TNO: transfer when the overflow indicator is off; when it is
    /// on, turn it off and proceed.
    pub(super) fn op_tno(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.ac_overflow {
            self.regs.ac_overflow = false;
            Ok(Flow::Next)
        } else {
            self.branch_to(mem, ea)
        }
    }

    pub(super) fn op_tqo(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.mq_overflow {
            self.regs.mq_overflow = false;
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    pub(super) fn op_tqp(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        if self.regs.mq.sign() == Sign::Plus {
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    /// TLQ: transfer when the MQ is algebraically lower than the AC.
    pub(super) fn op_tlq(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let mq = value_of(self.regs.mq);
        let ac = {
            let w = self.regs.ac.to_word();
            let mut v = value_of(w);
            // The guard bits participate: a magnitude overflowing the
            // stored word still compares by its full value.
            let guards = (self.regs.ac.magnitude() >> 35) as i64;
            let extra = guards << 35;
            v += if self.regs.ac.sign() == Sign::Minus {
                -extra
            } else {
                extra
            };
            v
        };
        if mq < ac {
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    /// TSX: plant the two's complement of the return location in the
    /// index register, then transfer.  The complement makes the usual
    /// `TRA n,t` return sequence work, since indexing subtracts.
    pub(super) fn op_tsx(&mut self, mem: &mut CoreMemory, tag: Tag, ea: Address) -> OpResult {
        let return_loc = self.regs.ic.pred(self.regs.addr_mask);
        let complement = 0u16.wrapping_sub(return_loc.bits()) & self.regs.addr_mask;
        self.regs.set_index(tag, complement);
        self.branch_to(mem, ea)
    }
}

fn value_of(w: Word) -> i64 {
    let m = w.magnitude() as i64;
    if w.sign().is_minus() {
        -m
    } else {
        m
    }
}
