//! The floating-point unit.
//!
//! A floating-point word is sign / 8-bit characteristic (biased by
//! 0o200) / 27-bit fraction.  A double-precision operand spans two
//! words: the low-order word carries the next 27 fraction bits and a
//! characteristic 27 less than the high word's.
//!
//! All operations go through the same explicit steps: unpack into
//! {sign, characteristic, 54-bit fraction}, operate, optionally
//! normalize, pack back into a word pair.  Every operation produces a
//! word *pair* (high result and low-order extension), matching the
//! hardware's habit of leaving the low-order fraction in the MQ.
//!
//! Characteristic overflow and underflow are reported per register
//! through a 4-bit spill code; the execute loop turns a nonzero spill
//! into the floating-point trap or the overflow indicator depending
//! on the floating-trap mode.

use base::prelude::*;

/// Characteristic bias.
pub const CHAR_BIAS: i32 = 0o200;

/// Fraction width of a double-precision operand.
pub const FRAC_BITS: u32 = 54;

const FRAC27_MASK: u64 = (1 << 27) - 1;
const FRAC54_MASK: u64 = (1 << 54) - 1;
const FRAC_TOP_BIT: u64 = 1 << 53;

/// Spill code bits, reported independently per result register.
pub const SPILL_AC_OVERFLOW: u8 = 0o1;
pub const SPILL_AC_UNDERFLOW: u8 = 0o2;
pub const SPILL_MQ_OVERFLOW: u8 = 0o4;
pub const SPILL_MQ_UNDERFLOW: u8 = 0o10;

/// An unpacked floating-point operand.
///
/// The characteristic is kept in a signed integer so intermediate
/// results can range freely; packing detects over/underflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpacked {
    pub sign: Sign,
    pub characteristic: i32,
    /// 54-bit fraction, high-justified: a single-precision operand
    /// occupies the top 27 bits.
    pub fraction: u64,
}

/// Extract the characteristic field (machine bits 1-8).
fn char_field(w: Word) -> i32 {
    ((w.bits() >> 27) & 0o377) as i32
}

/// Unpack a single-precision operand.
#[must_use]
pub fn unpack_single(w: Word) -> Unpacked {
    Unpacked {
        sign: w.sign(),
        characteristic: char_field(w),
        fraction: (w.bits() & FRAC27_MASK) << 27,
    }
}

/// Unpack a double-precision operand pair.  The low word contributes
/// only fraction bits; its sign and characteristic are ignored, as
/// the hardware derives them from the high word.
#[must_use]
pub fn unpack_double(hi: Word, lo: Word) -> Unpacked {
    Unpacked {
        sign: hi.sign(),
        characteristic: char_field(hi),
        fraction: ((hi.bits() & FRAC27_MASK) << 27) | (lo.bits() & FRAC27_MASK),
    }
}

/// Left-normalize a nonzero fraction.
pub fn normalize(x: &mut Unpacked) {
    if x.fraction == 0 {
        return;
    }
    while x.fraction & FRAC_TOP_BIT == 0 {
        x.fraction <<= 1;
        x.characteristic -= 1;
    }
}

/// Pack a result into its word pair, reporting spill.
///
/// A zero fraction short-circuits to true zero: characteristic 0 in
/// both words, no spill, regardless of whether the operation was a
/// normalizing one.  This is what makes `+0 + +0` yield a true zero
/// even in the unnormalized operations.
#[must_use]
pub fn pack_pair(x: Unpacked) -> (Word, Word, u8) {
    if x.fraction == 0 {
        let zero = Word::from_sign_magnitude(x.sign, 0);
        return (zero, zero, 0);
    }
    let hi_char = x.characteristic;
    let lo_char = x.characteristic - 27;
    let mut spill = 0;
    if hi_char > 0o377 {
        spill |= SPILL_AC_OVERFLOW;
    }
    if hi_char < 0 {
        spill |= SPILL_AC_UNDERFLOW;
    }
    if lo_char > 0o377 {
        spill |= SPILL_MQ_OVERFLOW;
    }
    if lo_char < 0 {
        spill |= SPILL_MQ_UNDERFLOW;
    }
    let hi = Word::from_sign_magnitude(
        x.sign,
        (((hi_char & 0o377) as u64) << 27) | (x.fraction >> 27),
    );
    let lo = Word::from_sign_magnitude(
        x.sign,
        (((lo_char & 0o377) as u64) << 27) | (x.fraction & FRAC27_MASK),
    );
    (hi, lo, spill)
}

/// The packed outcome of a floating-point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpResult {
    pub hi: Word,
    pub lo: Word,
    pub spill: u8,
    /// Set when add/subtract alignment collapsed the smaller operand
    /// to zero (exponent difference beyond the fraction width).
    pub early_end: bool,
}

fn result_of(mut x: Unpacked, norm: bool, early_end: bool) -> FpResult {
    if norm {
        normalize(&mut x);
    }
    let (hi, lo, spill) = pack_pair(x);
    FpResult {
        hi,
        lo,
        spill,
        early_end,
    }
}

/// Floating add.  `a` is the register operand, `b` the storage
/// operand (negate its sign first for subtract).  When the exponent
/// difference exceeds the 54-bit fraction width the smaller operand
/// collapses to zero and the larger comes back unchanged (the "early
/// end" case); the caller reproduces the associated storage-indicator
/// side effect for double-precision adds.
#[must_use]
pub fn fp_add(a: Unpacked, b: Unpacked, norm: bool) -> FpResult {
    if a.fraction == 0 && b.fraction == 0 {
        return result_of(
            Unpacked {
                sign: a.sign,
                characteristic: 0,
                fraction: 0,
            },
            norm,
            false,
        );
    }
    if a.fraction == 0 {
        return result_of(b, norm, false);
    }
    if b.fraction == 0 {
        return result_of(a, norm, false);
    }

    let (big, small) = if b.characteristic > a.characteristic {
        (b, a)
    } else {
        (a, b)
    };
    let diff = (big.characteristic - small.characteristic) as u32;
    if diff > FRAC_BITS {
        return result_of(big, norm, true);
    }
    let aligned = if diff == 0 {
        small.fraction
    } else {
        small.fraction >> diff
    };

    let mut out = big;
    if big.sign == small.sign {
        let sum = big.fraction + aligned;
        if sum > FRAC54_MASK {
            // Carry out of the fraction: shift right one, bump the
            // characteristic.  This happens in the unnormalized
            // operations too.
            out.fraction = (sum >> 1) & FRAC54_MASK;
            out.characteristic += 1;
        } else {
            out.fraction = sum;
        }
    } else if aligned > big.fraction {
        out.sign = small.sign;
        out.fraction = aligned - big.fraction;
    } else {
        out.fraction = big.fraction - aligned;
        if out.fraction == 0 {
            // Exact cancellation: true zero.
            out.characteristic = 0;
        }
    };
    result_of(out, norm, false)
}

/// Floating multiply: the two 27-bit fraction halves (single) or the
/// full 54-bit fractions (double) form a double-width product of
/// which the top 54 bits are kept.
#[must_use]
pub fn fp_mul(a: Unpacked, b: Unpacked, double: bool, norm: bool) -> FpResult {
    if a.fraction == 0 || b.fraction == 0 {
        return result_of(
            Unpacked {
                sign: a.sign.xor(b.sign),
                characteristic: 0,
                fraction: 0,
            },
            norm,
            false,
        );
    }
    let sign = a.sign.xor(b.sign);
    let fraction = if double {
        ((u128::from(a.fraction) * u128::from(b.fraction)) >> FRAC_BITS) as u64
    } else {
        (a.fraction >> 27) * (b.fraction >> 27)
    };
    let characteristic = a.characteristic + b.characteristic - CHAR_BIAS;
    result_of(
        Unpacked {
            sign,
            characteristic,
            fraction,
        },
        norm,
        false,
    )
}

/// Floating divide check: quotient would not fit, or the divisor is
/// unusable (zero or, for the double divide, unnormalized).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpDivideCheck;

/// Outcome of a floating divide: quotient pair plus, for the single
/// divide, the remainder word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpDivResult {
    pub quotient: FpResult,
    pub remainder: Option<Word>,
}

/// Single-precision divide of `a` by `b`, in 27-bit halves: one
/// division step yields the 27-bit quotient and the remainder.
pub fn fp_div_single(a: Unpacked, b: Unpacked) -> Result<FpDivResult, FpDivideCheck> {
    let b27 = b.fraction >> 27;
    if b27 == 0 {
        return Err(FpDivideCheck);
    }
    if a.fraction >= 2 * b.fraction {
        return Err(FpDivideCheck);
    }
    if a.fraction == 0 {
        let (hi, lo, spill) = pack_pair(Unpacked {
            sign: a.sign.xor(b.sign),
            characteristic: 0,
            fraction: 0,
        });
        return Ok(FpDivResult {
            quotient: FpResult {
                hi,
                lo,
                spill,
                early_end: false,
            },
            remainder: Some(Word::from_sign_magnitude(a.sign, 0)),
        });
    }
    let a27 = a.fraction >> 27;
    let q = (a27 << 26) / b27;
    let r = (a27 << 26) % b27;
    let quotient = result_of(
        Unpacked {
            sign: a.sign.xor(b.sign),
            characteristic: a.characteristic - b.characteristic + CHAR_BIAS + 1,
            fraction: q << 27,
        },
        true,
        false,
    );
    // The remainder keeps the dividend's sign; its characteristic is
    // the dividend's less the 26-bit quotient scale.
    let remainder = if r == 0 {
        Word::from_sign_magnitude(a.sign, 0)
    } else {
        let mut rem = Unpacked {
            sign: a.sign,
            characteristic: a.characteristic - 26,
            fraction: r << 27,
        };
        normalize(&mut rem);
        let (hi, _, _) = pack_pair(rem);
        hi
    };
    Ok(FpDivResult {
        quotient,
        remainder: Some(remainder),
    })
}

/// Double-precision divide: one hardware division step against the
/// high divisor half, then a Taylor correction term to make the
/// 54-bit quotient exact.
pub fn fp_div_double(a: Unpacked, b: Unpacked) -> Result<FpDivResult, FpDivideCheck> {
    let bhi = b.fraction >> 27;
    if bhi == 0 {
        // Zero or unnormalized divisor: the refinement below needs a
        // usable high half.
        return Err(FpDivideCheck);
    }
    if a.fraction >= 2 * b.fraction {
        return Err(FpDivideCheck);
    }
    if a.fraction == 0 {
        let (hi, lo, spill) = pack_pair(Unpacked {
            sign: a.sign.xor(b.sign),
            characteristic: 0,
            fraction: 0,
        });
        return Ok(FpDivResult {
            quotient: FpResult {
                hi,
                lo,
                spill,
                early_end: false,
            },
            remainder: None,
        });
    }
    let blo = b.fraction & FRAC27_MASK;
    let bhi_full = bhi << 27;
    let num = u128::from(a.fraction) << 53;
    // First term: divide by the high divisor half only.
    let q0 = num / u128::from(bhi_full);
    let rem0 = num % u128::from(bhi_full);
    // Second term: the first-order error is (rem0 - q0*blo)/b.
    let corr = (rem0 as i128 - q0 as i128 * i128::from(blo)).div_euclid(i128::from(b.fraction));
    let q = (q0 as i128 + corr) as u64;
    let quotient = result_of(
        Unpacked {
            sign: a.sign.xor(b.sign),
            characteristic: a.characteristic - b.characteristic + CHAR_BIAS + 1,
            fraction: q & FRAC54_MASK,
        },
        true,
        false,
    );
    Ok(FpDivResult {
        quotient,
        remainder: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a normalized single word for `mantissa * 2^exp2` with
    /// `mantissa` in [2^26, 2^27).
    fn single(sign: Sign, characteristic: i32, frac27: u64) -> Word {
        Word::from_sign_magnitude(sign, ((characteristic as u64) << 27) | frac27)
    }

    #[test]
    fn unpack_pack_round_trips_normalized_values() {
        for (chr, frac) in [
            (0o200, 0o400000000),
            (0o201, 0o400000001),
            (0o177, 0o777777777),
            (0o001, 0o500000000),
        ] {
            let w = single(Sign::Minus, chr, frac);
            let u = unpack_single(w);
            let (hi, _, spill) = pack_pair(u);
            assert_eq!(hi, w);
            assert_eq!(spill, 0);
        }
    }

    #[test]
    fn zero_fraction_packs_to_true_zero() {
        let mut u = unpack_single(single(Sign::Plus, 0o123, 0));
        normalize(&mut u); // must not loop or invent a characteristic
        let (hi, lo, spill) = pack_pair(u);
        assert_eq!(hi, Word::ZERO);
        assert_eq!(lo, Word::ZERO);
        assert_eq!(spill, 0);
    }

    #[test]
    fn add_of_two_zeros_is_true_zero_in_both_modes() {
        let z = unpack_single(Word::ZERO);
        for norm in [false, true] {
            let r = fp_add(z, z, norm);
            assert_eq!(char_field(r.hi), 0);
            assert_eq!(char_field(r.lo), 0);
            assert_eq!(r.hi, Word::ZERO);
            assert_eq!(r.lo, Word::ZERO);
        }
    }

    #[test]
    fn add_aligns_by_characteristic() {
        // 2.0 + 1.0 = 3.0:
        //   2.0 = char 0o202, frac 0.5
        //   1.0 = char 0o201, frac 0.5
        let two = unpack_single(single(Sign::Plus, 0o202, 0o400000000));
        let one = unpack_single(single(Sign::Plus, 0o201, 0o400000000));
        let r = fp_add(two, one, true);
        assert_eq!(r.hi, single(Sign::Plus, 0o202, 0o600000000));
        assert!(!r.early_end);
        assert_eq!(r.spill, 0);
    }

    #[test]
    fn add_carry_shifts_right_and_bumps_characteristic() {
        // 0.75 + 0.75 = 1.5 = char+1, frac 0.75
        let x = unpack_single(single(Sign::Plus, 0o200, 0o600000000));
        let r = fp_add(x, x, true);
        assert_eq!(r.hi, single(Sign::Plus, 0o201, 0o600000000));
    }

    #[test]
    fn add_early_end_returns_larger_operand() {
        let big = unpack_single(single(Sign::Plus, 0o300, 0o400000000));
        let tiny = unpack_single(single(Sign::Plus, 0o200, 0o400000000));
        let r = fp_add(big, tiny, true);
        assert!(r.early_end);
        assert_eq!(r.hi, single(Sign::Plus, 0o300, 0o400000000));
    }

    #[test]
    fn unnormalized_add_skips_normalization() {
        // 1.0 - 0.5 with UFA leaves the un-normalized difference.
        let one = unpack_single(single(Sign::Plus, 0o201, 0o400000000));
        let neg_half = unpack_single(single(Sign::Minus, 0o200, 0o400000000));
        let r = fp_add(one, neg_half, false);
        // Aligned subtraction gives frac 0.25 at char 0o201, left
        // unnormalized.
        assert_eq!(r.hi, single(Sign::Plus, 0o201, 0o200000000));
        let rn = fp_add(one, neg_half, true);
        assert_eq!(rn.hi, single(Sign::Plus, 0o200, 0o400000000));
    }

    #[test]
    fn exact_cancellation_is_true_zero() {
        let x = unpack_single(single(Sign::Plus, 0o210, 0o400000000));
        let y = unpack_single(single(Sign::Minus, 0o210, 0o400000000));
        let r = fp_add(x, y, false);
        assert_eq!(r.hi, Word::ZERO);
        assert_eq!(r.lo, Word::ZERO);
    }

    #[test]
    fn multiply_single() {
        // 2.0 * 3.0 = 6.0: chars 0o202/0o202, fracs 0.5/0.75.
        let two = unpack_single(single(Sign::Plus, 0o202, 0o400000000));
        let three = unpack_single(single(Sign::Minus, 0o202, 0o600000000));
        let r = fp_mul(two, three, false, true);
        assert_eq!(r.hi, single(Sign::Minus, 0o203, 0o600000000));
        assert_eq!(r.spill, 0);
    }

    #[test]
    fn multiply_by_zero_is_true_zero() {
        let x = unpack_single(single(Sign::Plus, 0o202, 0o400000000));
        let z = unpack_single(Word::ZERO);
        let r = fp_mul(x, z, false, false);
        assert_eq!(r.hi, Word::ZERO);
    }

    #[test]
    fn characteristic_overflow_spills_per_register() {
        // 0.75 * 0.75 stays normalized, so the characteristic sum
        // 0o300+0o300-0o200 = 0o400 stands: the high word overflows
        // while the low word (0o400 - 27) does not.
        let big = unpack_single(single(Sign::Plus, 0o300, 0o600000000));
        let r = fp_mul(big, big, false, true);
        assert_ne!(r.spill & SPILL_AC_OVERFLOW, 0);
        assert_eq!(r.spill & SPILL_MQ_OVERFLOW, 0);
    }

    #[test]
    fn characteristic_underflow_spills() {
        let tiny = unpack_single(single(Sign::Plus, 0o001, 0o400000000));
        let r = fp_mul(tiny, tiny, false, true);
        assert_ne!(r.spill & SPILL_AC_UNDERFLOW, 0);
    }

    #[test]
    fn divide_single_exact() {
        // 6.0 / 2.0 = 3.0.
        let six = unpack_single(single(Sign::Plus, 0o203, 0o600000000));
        let two = unpack_single(single(Sign::Plus, 0o202, 0o400000000));
        let out = fp_div_single(six, two).expect("no divide check");
        assert_eq!(out.quotient.hi, single(Sign::Plus, 0o202, 0o600000000));
        assert_eq!(out.remainder, Some(Word::ZERO));
    }

    #[test]
    fn divide_check_fires_on_oversized_dividend() {
        let four = unpack_single(single(Sign::Plus, 0o203, 0o400000000));
        let one = unpack_single(single(Sign::Plus, 0o203, 0o200000000));
        // Fractions 0.5 vs 0.25: dividend fraction >= 2*divisor.
        assert_eq!(fp_div_single(four, one), Err(FpDivideCheck));
        let zero = unpack_single(Word::ZERO);
        assert_eq!(fp_div_single(four, zero), Err(FpDivideCheck));
    }

    #[test]
    fn divide_double_taylor_refinement_is_exact() {
        // (1/3 represented to 54 bits) / (1/3) should give exactly 1.0
        // within an ulp: check against direct 128-bit division.
        let third = Unpacked {
            sign: Sign::Plus,
            characteristic: 0o177,
            fraction: 0o252525252525252525, // 0.0101...b, 1/3 to 54 bits
        };
        let a = Unpacked {
            sign: Sign::Plus,
            characteristic: 0o201,
            fraction: 0o400000000000000000, // 0.5
        };
        let out = fp_div_double(a, third).expect("no divide check");
        let direct = ((u128::from(a.fraction) << 53) / u128::from(third.fraction)) as u64;
        let mut expect = Unpacked {
            sign: Sign::Plus,
            characteristic: a.characteristic - third.characteristic + CHAR_BIAS + 1,
            fraction: direct,
        };
        normalize(&mut expect);
        let (hi, lo, _) = pack_pair(expect);
        assert_eq!(out.quotient.hi, hi);
        assert_eq!(out.quotient.lo, lo);
    }

    #[test]
    fn unpack_double_merges_fractions() {
        let hi = single(Sign::Minus, 0o205, 0o123456701);
        let lo = single(Sign::Plus, 0o146, 0o234567012); // char ignored
        let u = unpack_double(hi, lo);
        assert_eq!(u.sign, Sign::Minus);
        assert_eq!(u.characteristic, 0o205);
        assert_eq!(u.fraction, 0o123456701_234567012);
    }
}
