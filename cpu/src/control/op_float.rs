//! Floating-point opcodes: thin wrappers around the floating unit
//! plus the spill-to-trap plumbing.

use base::prelude::*;

use crate::float::{
    self, fp_add, fp_div_double, fp_div_single, fp_mul, unpack_double, unpack_single, FpDivideCheck,
};
use crate::memory::CoreMemory;
use crate::stop::StopReason;

use super::trap::TrapKind;
use super::{Cpu, Flow, OpError, OpResult};

impl Cpu {
    /// Deliver a spill code: trap in floating-trap mode, indicators
    /// otherwise.  Overflow and underflow report independently per
    /// register.
    fn deliver_spill(&mut self, mem: &mut CoreMemory, spill: u8) -> OpResult {
        if spill == 0 {
            return Ok(Flow::Next);
        }
        if self.regs.floating_trap {
            self.fire_trap(mem, TrapKind::Floating { spill });
            Err(OpError::Trapped)
        } else {
            if spill & (float::SPILL_AC_OVERFLOW | float::SPILL_AC_UNDERFLOW) != 0 {
                self.regs.ac_overflow = true;
            }
            if spill & (float::SPILL_MQ_OVERFLOW | float::SPILL_MQ_UNDERFLOW) != 0 {
                self.regs.mq_overflow = true;
            }
            Ok(Flow::Next)
        }
    }

    /// The register operand: AC for single precision, AC‖MQ for
    /// double.
    fn register_operand(&self, double: bool) -> float::Unpacked {
        if double {
            unpack_double(self.regs.ac.to_word(), self.regs.mq)
        } else {
            unpack_single(self.regs.ac.to_word())
        }
    }

    /// The storage operand: Y for single precision, Y and Y+1 for
    /// double.
    fn storage_operand(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        double: bool,
    ) -> Result<float::Unpacked, OpError> {
        let hi = self.read_data(mem, ea)?;
        if double {
            let lo = self.read_data(mem, ea.succ(self.regs.addr_mask))?;
            Ok(unpack_double(hi, lo))
        } else {
            Ok(unpack_single(hi))
        }
    }

    pub(super) fn op_fp_add(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        double: bool,
        normalize: bool,
        subtract: bool,
    ) -> OpResult {
        let a = self.register_operand(double);
        let mut b = self.storage_operand(mem, ea, double)?;
        if subtract {
            b.sign = -b.sign;
        }
        let r = fp_add(a, b, normalize);
        self.regs.ac = Accumulator::from_word(r.hi);
        self.regs.mq = r.lo;
        if r.early_end && double {
            // The aligned-out-of-range case deposits the low-order
            // result word in the storage-indicator register.
            self.regs.si = r.lo;
        }
        self.deliver_spill(mem, r.spill)
    }

    pub(super) fn op_fp_mul(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        double: bool,
        normalize: bool,
    ) -> OpResult {
        // Single multiply takes its register operand from the MQ;
        // double from the AC‖MQ pair.
        let a = if double {
            self.register_operand(true)
        } else {
            unpack_single(self.regs.mq)
        };
        let b = self.storage_operand(mem, ea, double)?;
        let r = fp_mul(a, b, double, normalize);
        self.regs.ac = Accumulator::from_word(r.hi);
        self.regs.mq = r.lo;
        self.deliver_spill(mem, r.spill)
    }

    pub(super) fn op_fp_div(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        double: bool,
        halt_on_check: bool,
    ) -> OpResult {
        let a = self.register_operand(double);
        let b = self.storage_operand(mem, ea, double)?;
        let outcome = if double {
            fp_div_double(a, b)
        } else {
            fp_div_single(a, b)
        };
        match outcome {
            Ok(out) => {
                if double {
                    self.regs.ac = Accumulator::from_word(out.quotient.hi);
                    self.regs.mq = out.quotient.lo;
                } else {
                    // Quotient to the MQ, remainder to the AC.
                    self.regs.mq = out.quotient.hi;
                    if let Some(rem) = out.remainder {
                        self.regs.ac = Accumulator::from_word(rem);
                    }
                }
                self.deliver_spill(mem, out.quotient.spill)
            }
            Err(FpDivideCheck) => {
                self.regs.divide_check = true;
                if halt_on_check {
                    Err(OpError::Stop(StopReason::DivideCheck))
                } else {
                    Ok(Flow::Next)
                }
            }
        }
    }
}
