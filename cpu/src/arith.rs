//! The fixed-point arithmetic unit: signed-magnitude addition,
//! bit-serial multiply and divide, and the shift family.
//!
//! Everything here is a pure function over register values; indicator
//! side effects (overflow, divide check) are part of each function's
//! return value and the execute loop moves them into the register
//! file.  This keeps the arithmetic independently testable.

use base::prelude::*;
use base::{AC_MAGNITUDE_MASK, AC_P_BIT, MAGNITUDE_MASK};

/// Result of a signed-magnitude add into the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub ac: Accumulator,
    /// Set when a carry propagated into the P guard position.
    pub overflow: bool,
}

/// Signed-magnitude addition of a storage word into the accumulator.
///
/// Same signs: the magnitudes add; a carry into the P position raises
/// the overflow indicator, and a carry out of Q is lost (the
/// magnitude wraps).  Opposite signs: the smaller magnitude is
/// subtracted from the larger and the result takes the larger
/// operand's sign; a zero difference keeps the accumulator's sign.
#[must_use]
pub fn add(ac: Accumulator, operand: Word) -> AddOutcome {
    let am = ac.magnitude();
    let wm = operand.magnitude();
    if ac.sign() == operand.sign() {
        let sum = am + wm;
        // Carry into bit 35 (the P position): x ^ y ^ sum holds the
        // carry-in at each bit position.
        let overflow = (am ^ wm ^ sum) & AC_P_BIT != 0;
        let mut out = ac;
        out.set_magnitude(sum & AC_MAGNITUDE_MASK);
        AddOutcome { ac: out, overflow }
    } else {
        let mut out = ac;
        if wm > am {
            out.set_sign(operand.sign());
            out.set_magnitude(wm - am);
        } else {
            // Includes the tie: magnitude zero, accumulator sign.
            out.set_magnitude(am - wm);
        }
        AddOutcome {
            ac: out,
            overflow: false,
        }
    }
}

/// Add-and-carry-logical: `operand` is treated as a 36-bit unsigned
/// quantity added into AC positions P,1-35, with the carry out of P
/// wrapping around into position 35 (end-around carry).  The sign and
/// Q are untouched and no overflow is reported.
#[must_use]
pub fn add_logical(ac: Accumulator, operand: Word) -> Accumulator {
    const MASK36: u64 = (1 << 36) - 1;
    let a = ac.magnitude() & MASK36;
    let mut sum = a + operand.bits();
    if sum > MASK36 {
        sum = (sum & MASK36) + 1;
    }
    let mut out = ac;
    out.set_magnitude((ac.magnitude() & !MASK36) | sum);
    out
}

/// Result of a multiply: 70-bit product split across AC and MQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplyOutcome {
    pub ac: Accumulator,
    pub mq: Word,
}

/// Bit-serial multiply: `steps` shift-and-add iterations over the low
/// bits of the multiplier (held in MQ).  The accumulator is cleared
/// first; after the loop AC holds the high product half and MQ the
/// low half, both carrying the product sign.  35 steps give the full
/// product; the variable-length form passes the instruction's count
/// field.
#[must_use]
pub fn multiply(mq: Word, operand: Word, steps: u32) -> MultiplyOutcome {
    let sign = mq.sign().xor(operand.sign());
    let mut high: u64 = 0; // accumulating product, 36 bits used
    let mut low = mq.magnitude();
    let m = operand.magnitude();
    for _ in 0..steps.min(35) {
        if low & 1 != 0 {
            high += m;
        }
        low = (low >> 1) | ((high & 1) << 34);
        high >>= 1;
    }
    let mut ac = Accumulator::ZERO;
    ac.set_sign(sign);
    ac.set_magnitude(high);
    MultiplyOutcome {
        ac,
        mq: Word::from_sign_magnitude(sign, low),
    }
}

/// Divide overflow: the quotient would not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivideCheck;

/// Result of a successful divide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivideOutcome {
    /// Remainder, with the dividend's sign.
    pub ac: Accumulator,
    /// Quotient, with the algebraic sign of the quotient.
    pub mq: Word,
}

/// Bit-serial divide of the 70-bit AC‖MQ dividend magnitude by the
/// operand magnitude, `steps` shift-and-subtract iterations.
///
/// Divide check fires when the accumulator magnitude is not smaller
/// than the divisor magnitude (which covers division by zero); the
/// registers are left unchanged in that case and the caller decides
/// whether to halt (DVH) or proceed (DVP).
pub fn divide(
    ac: Accumulator,
    mq: Word,
    operand: Word,
    steps: u32,
) -> Result<DivideOutcome, DivideCheck> {
    let d = operand.magnitude();
    if ac.magnitude() >= d {
        return Err(DivideCheck);
    }
    let mut rem = ac.magnitude();
    let mut quot = mq.magnitude();
    for _ in 0..steps.min(35) {
        rem = (rem << 1) | ((quot >> 34) & 1);
        quot = (quot << 1) & MAGNITUDE_MASK;
        if rem >= d {
            rem -= d;
            quot |= 1;
        }
    }
    let mut rem_ac = Accumulator::ZERO;
    rem_ac.set_sign(ac.sign());
    rem_ac.set_magnitude(rem);
    Ok(DivideOutcome {
        ac: rem_ac,
        mq: Word::from_sign_magnitude(ac.sign().xor(operand.sign()), quot),
    })
}

/// Accumulator left shift.  A nonzero bit entering (or passing
/// through) the P position raises the overflow indicator.
#[must_use]
pub fn shift_ac_left(ac: Accumulator, count: u32) -> AddOutcome {
    let mut mag = ac.magnitude();
    let mut overflow = false;
    for _ in 0..count {
        mag = (mag << 1) & AC_MAGNITUDE_MASK;
        if mag & AC_P_BIT != 0 {
            overflow = true;
        }
    }
    let mut out = ac;
    out.set_magnitude(mag);
    AddOutcome { ac: out, overflow }
}

/// Accumulator right shift; vacated positions fill with zeros.
#[must_use]
pub fn shift_ac_right(ac: Accumulator, count: u32) -> Accumulator {
    let mut out = ac;
    out.set_magnitude(if count >= 37 {
        0
    } else {
        ac.magnitude() >> count
    });
    out
}

/// Long left shift over AC‖MQ magnitudes (72 bits).  The accumulator
/// sign is replaced by the MQ sign, and overflow rises when a nonzero
/// bit enters the P position.
#[must_use]
pub fn shift_long_left(ac: Accumulator, mq: Word, count: u32) -> (AddOutcome, Word) {
    const WIDTH: u32 = 37 + 35;
    let mut v: u128 = (u128::from(ac.magnitude()) << 35) | u128::from(mq.magnitude());
    let mut overflow = false;
    for _ in 0..count {
        v = (v << 1) & ((1u128 << WIDTH) - 1);
        if v & (1u128 << (35 + 35)) != 0 {
            overflow = true;
        }
    }
    let mut out = ac;
    out.set_sign(mq.sign());
    out.set_magnitude((v >> 35) as u64);
    let mq_out = Word::from_sign_magnitude(mq.sign(), (v as u64) & MAGNITUDE_MASK);
    (AddOutcome { ac: out, overflow }, mq_out)
}

/// Long right shift over AC‖MQ magnitudes; the MQ sign is replaced by
/// the AC sign.
#[must_use]
pub fn shift_long_right(ac: Accumulator, mq: Word, count: u32) -> (Accumulator, Word) {
    let v: u128 = (u128::from(ac.magnitude()) << 35) | u128::from(mq.magnitude());
    let v = if count >= 72 { 0 } else { v >> count };
    let mut out = ac;
    out.set_magnitude((v >> 35) as u64);
    let mq_out = Word::from_sign_magnitude(ac.sign(), (v as u64) & MAGNITUDE_MASK);
    (out, mq_out)
}

/// Logical left shift: the MQ sign participates as an ordinary data
/// bit below AC position 35; the AC sign is untouched.
#[must_use]
pub fn shift_logical_left(ac: Accumulator, mq: Word, count: u32) -> (AddOutcome, Word) {
    const WIDTH: u32 = 37 + 36;
    let mut v: u128 = (u128::from(ac.magnitude()) << 36) | u128::from(mq.bits());
    let mut overflow = false;
    for _ in 0..count {
        v = (v << 1) & ((1u128 << WIDTH) - 1);
        if v & (1u128 << (36 + 35)) != 0 {
            overflow = true;
        }
    }
    let mut out = ac;
    out.set_magnitude((v >> 36) as u64);
    (
        AddOutcome { ac: out, overflow },
        Word::new((v as u64) & ((1 << 36) - 1)),
    )
}

/// Logical right shift, MQ sign included as a data bit.
#[must_use]
pub fn shift_logical_right(ac: Accumulator, mq: Word, count: u32) -> (Accumulator, Word) {
    let v: u128 = (u128::from(ac.magnitude()) << 36) | u128::from(mq.bits());
    let v = if count >= 73 { 0 } else { v >> count };
    let mut out = ac;
    out.set_magnitude((v >> 36) as u64);
    (out, Word::new((v as u64) & ((1 << 36) - 1)))
}

/// Rotate the full 36-bit MQ (sign included) left.
#[must_use]
pub fn rotate_mq_left(mq: Word, count: u32) -> Word {
    let n = count % 36;
    let bits = mq.bits();
    Word::new((bits << n) | (bits >> (36 - n).min(63)))
}
