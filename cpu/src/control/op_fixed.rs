//! Load/store, fixed-point arithmetic, shifts, logic and the
//! sense/indicator operations.

use base::prelude::*;
use base::AC_MAGNITUDE_MASK;

use crate::arith;
use crate::memory::CoreMemory;
use crate::stop::StopReason;

use super::{Cpu, Flow, OpError, OpResult};

/// Algebraic comparison of two signed-magnitude words; `+0` and `-0`
/// compare equal.
fn compare_algebraic(a: Word, b: Word) -> std::cmp::Ordering {
    let value = |w: Word| -> i64 {
        let m = w.magnitude() as i64;
        if w.sign().is_minus() {
            -m
        } else {
            m
        }
    };
    value(a).cmp(&value(b))
}

impl Cpu {
    // Loads and stores.

    pub(super) fn op_cla(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.ac = Accumulator::from_word(w);
        Ok(Flow::Next)
    }

    pub(super) fn op_cal(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.ac = Accumulator::from_logical_word(w);
        Ok(Flow::Next)
    }

    pub(super) fn op_cls(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.ac = Accumulator::from_word(w.negate());
        Ok(Flow::Next)
    }

    pub(super) fn op_ldq(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.regs.mq = self.read_data(mem, ea)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_stq(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.write_data(mem, ea, self.regs.mq)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_sto(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.write_data(mem, ea, self.regs.ac.to_word())?;
        Ok(Flow::Next)
    }

    pub(super) fn op_slw(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.write_data(mem, ea, self.regs.ac.to_logical_word())?;
        Ok(Flow::Next)
    }

    pub(super) fn op_stz(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.write_data(mem, ea, Word::ZERO)?;
        Ok(Flow::Next)
    }

    /// Field stores read the target word, replace one field from the
    /// accumulator, and write it back.
    fn store_field<F: FnOnce(Word, Word) -> Word>(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        replace: F,
    ) -> OpResult {
        let target = self.read_data(mem, ea)?;
        let ac_word = self.regs.ac.to_word();
        self.write_data(mem, ea, replace(target, ac_word))?;
        Ok(Flow::Next)
    }

    pub(super) fn op_sta(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.store_field(mem, ea, |t, a| t.with_address(a.address_bits()))
    }

    pub(super) fn op_std(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.store_field(mem, ea, |t, a| t.with_decrement(a.decrement()))
    }

    pub(super) fn op_stt(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.store_field(mem, ea, |t, a| t.with_tag(a.tag_bits()))
    }

    pub(super) fn op_stp(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.store_field(mem, ea, |t, a| t.with_prefix(a.prefix()))
    }

    pub(super) fn op_xca(&mut self) -> OpResult {
        let old_ac = self.regs.ac.to_word();
        self.regs.ac = Accumulator::from_word(self.regs.mq);
        self.regs.mq = old_ac;
        Ok(Flow::Next)
    }

    pub(super) fn op_xcl(&mut self) -> OpResult {
        let old_ac = self.regs.ac.to_logical_word();
        self.regs.ac = Accumulator::from_logical_word(self.regs.mq);
        self.regs.mq = old_ac;
        Ok(Flow::Next)
    }

    pub(super) fn op_enk(&mut self) -> OpResult {
        self.regs.mq = self.regs.keys;
        Ok(Flow::Next)
    }

    // Fixed-point arithmetic.

    /// ADD/SUB/ADM/SBM: `negate` flips the operand sign, `magnitude`
    /// forces it positive first.
    pub(super) fn op_add(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        negate: bool,
        magnitude: bool,
    ) -> OpResult {
        let mut w = self.read_data(mem, ea)?;
        if magnitude {
            w = Word::from_sign_magnitude(Sign::Plus, w.magnitude());
        }
        if negate {
            w = w.negate();
        }
        let out = arith::add(self.regs.ac, w);
        self.regs.ac = out.ac;
        if out.overflow {
            self.regs.ac_overflow = true;
        }
        Ok(Flow::Next)
    }

    pub(super) fn op_acl(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        self.regs.ac = arith::add_logical(self.regs.ac, w);
        Ok(Flow::Next)
    }

    pub(super) fn op_mpy(&mut self, mem: &mut CoreMemory, ea: Address, steps: u32) -> OpResult {
        let w = self.read_data(mem, ea)?;
        let out = arith::multiply(self.regs.mq, w, steps);
        self.regs.ac = out.ac;
        self.regs.mq = out.mq;
        Ok(Flow::Next)
    }

    /// DVH/DVP and the variable-length forms.  `halt_on_check`
    /// distinguishes the halting divides from the proceeding ones.
    pub(super) fn op_div(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        steps: u32,
        halt_on_check: bool,
    ) -> OpResult {
        let w = self.read_data(mem, ea)?;
        match arith::divide(self.regs.ac, self.regs.mq, w, steps) {
            Ok(out) => {
                self.regs.ac = out.ac;
                self.regs.mq = out.mq;
                Ok(Flow::Next)
            }
            Err(arith::DivideCheck) => {
                self.regs.divide_check = true;
                if halt_on_check {
                    Err(OpError::Stop(StopReason::DivideCheck))
                } else {
                    Ok(Flow::Next)
                }
            }
        }
    }

    // Shifts.  The count is the low eight bits of the effective
    // address.

    fn shift_count(ea: Address) -> u32 {
        u32::from(ea.bits() & 0o377)
    }

    pub(super) fn op_als(&mut self, ea: Address) -> OpResult {
        let out = arith::shift_ac_left(self.regs.ac, Self::shift_count(ea));
        self.regs.ac = out.ac;
        if out.overflow {
            self.regs.ac_overflow = true;
        }
        Ok(Flow::Next)
    }

    pub(super) fn op_ars(&mut self, ea: Address) -> OpResult {
        self.regs.ac = arith::shift_ac_right(self.regs.ac, Self::shift_count(ea));
        Ok(Flow::Next)
    }

    pub(super) fn op_lls(&mut self, ea: Address) -> OpResult {
        let (out, mq) = arith::shift_long_left(self.regs.ac, self.regs.mq, Self::shift_count(ea));
        self.regs.ac = out.ac;
        self.regs.mq = mq;
        if out.overflow {
            self.regs.ac_overflow = true;
        }
        Ok(Flow::Next)
    }

    pub(super) fn op_lrs(&mut self, ea: Address) -> OpResult {
        let (ac, mq) = arith::shift_long_right(self.regs.ac, self.regs.mq, Self::shift_count(ea));
        self.regs.ac = ac;
        self.regs.mq = mq;
        Ok(Flow::Next)
    }

    pub(super) fn op_lgl(&mut self, ea: Address) -> OpResult {
        let (out, mq) =
            arith::shift_logical_left(self.regs.ac, self.regs.mq, Self::shift_count(ea));
        self.regs.ac = out.ac;
        self.regs.mq = mq;
        if out.overflow {
            self.regs.ac_overflow = true;
        }
        Ok(Flow::Next)
    }

    pub(super) fn op_lgr(&mut self, ea: Address) -> OpResult {
        let (ac, mq) =
            arith::shift_logical_right(self.regs.ac, self.regs.mq, Self::shift_count(ea));
        self.regs.ac = ac;
        self.regs.mq = mq;
        Ok(Flow::Next)
    }

    pub(super) fn op_rql(&mut self, ea: Address) -> OpResult {
        self.regs.mq = arith::rotate_mq_left(self.regs.mq, Self::shift_count(ea));
        Ok(Flow::Next)
    }

    // Logic, through the 36-bit logical view of the accumulator.

    fn logic_to_ac<F: FnOnce(u64, u64) -> u64>(
        &mut self,
        mem: &mut CoreMemory,
        ea: Address,
        f: F,
    ) -> OpResult {
        let w = self.read_data(mem, ea)?;
        let a = self.regs.ac.to_logical_word().bits();
        self.regs.ac = Accumulator::from_logical_word(Word::new(f(a, w.bits())));
        Ok(Flow::Next)
    }

    pub(super) fn op_ana(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.logic_to_ac(mem, ea, |a, b| a & b)
    }

    pub(super) fn op_ora(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.logic_to_ac(mem, ea, |a, b| a | b)
    }

    pub(super) fn op_era(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        self.logic_to_ac(mem, ea, |a, b| a ^ b)
    }

    pub(super) fn op_ans(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        let result = Word::new(self.regs.ac.to_logical_word().bits() & w.bits());
        self.write_data(mem, ea, result)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_ors(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        let result = Word::new(self.regs.ac.to_logical_word().bits() | w.bits());
        self.write_data(mem, ea, result)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_com(&mut self) -> OpResult {
        let mag = self.regs.ac.magnitude() ^ AC_MAGNITUDE_MASK;
        self.regs.ac.set_magnitude(mag);
        Ok(Flow::Next)
    }

    pub(super) fn op_chs(&mut self) -> OpResult {
        let s = self.regs.ac.sign();
        self.regs.ac.set_sign(-s);
        Ok(Flow::Next)
    }

    pub(super) fn op_ssp(&mut self) -> OpResult {
        self.regs.ac.set_sign(Sign::Plus);
        Ok(Flow::Next)
    }

    pub(super) fn op_ssm(&mut self) -> OpResult {
        self.regs.ac.set_sign(Sign::Minus);
        Ok(Flow::Next)
    }

    pub(super) fn op_clm(&mut self) -> OpResult {
        self.regs.ac.set_magnitude(0);
        Ok(Flow::Next)
    }

    // Compares.

    /// CAS: skip nothing when AC > storage, one when equal, two when
    /// AC < storage.
    pub(super) fn op_cas(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        Ok(match compare_algebraic(self.regs.ac.to_word(), w) {
            std::cmp::Ordering::Greater => Flow::Next,
            std::cmp::Ordering::Equal => Flow::Skip(1),
            std::cmp::Ordering::Less => Flow::Skip(2),
        })
    }

    /// LAS: the logical (unsigned 36-bit) counterpart of CAS.
    pub(super) fn op_las(&mut self, mem: &mut CoreMemory, ea: Address) -> OpResult {
        let w = self.read_data(mem, ea)?;
        let a = self.regs.ac.to_logical_word().bits();
        Ok(match a.cmp(&w.bits()) {
            std::cmp::Ordering::Greater => Flow::Next,
            std::cmp::Ordering::Equal => Flow::Skip(1),
            std::cmp::Ordering::Less => Flow::Skip(2),
        })
    }

    // Sense and indicator operations.

    pub(super) fn op_lbt(&mut self) -> OpResult {
        Ok(if self.regs.ac.magnitude() & 1 != 0 {
            Flow::Skip(1)
        } else {
            Flow::Next
        })
    }

    pub(super) fn op_pbt(&mut self) -> OpResult {
        Ok(if self.regs.ac.p_bit() {
            Flow::Skip(1)
        } else {
            Flow::Next
        })
    }

    /// DCT: indicator on — turn it off and proceed; off — skip.
    pub(super) fn op_dct(&mut self) -> OpResult {
        Ok(if self.regs.divide_check {
            self.regs.divide_check = false;
            Flow::Next
        } else {
            Flow::Skip(1)
        })
    }

    pub(super) fn op_swt(&mut self, n: u8) -> OpResult {
        let idx = usize::from(n.saturating_sub(1)).min(5);
        Ok(if self.regs.sense_switches[idx] {
            Flow::Skip(1)
        } else {
            Flow::Next
        })
    }

    pub(super) fn op_sln(&mut self, n: u8) -> OpResult {
        let idx = usize::from(n.saturating_sub(1)).min(3);
        self.regs.sense_lights[idx] = true;
        Ok(Flow::Next)
    }

    pub(super) fn op_slf(&mut self) -> OpResult {
        self.regs.sense_lights = [false; 4];
        Ok(Flow::Next)
    }
}
