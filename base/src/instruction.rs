//! Binary representation and decoding of instruction words.
//!
//! An instruction occupies one 36-bit word.  There are two formats,
//! distinguished by the prefix (machine bits S,1-2):
//!
//! Decrement format (either of bits 1-2 set):
//!
//! |Prefix |Decrement|Tag    |Address|
//! |-------|---------|-------|-------|
//! |3 bits |15 bits  |3 bits |15 bits|
//! |(S,1-2)|(3-17)   |(18-20)|(21-35)|
//!
//! Normal format (bits 1-2 both zero; the prefix contributes only the
//! sign to the operation code):
//!
//! |Operation|Flags  |unused |Tag    |Address|
//! |---------|-------|-------|-------|-------|
//! |12 bits  |2 bits |4 bits |3 bits |15 bits|
//! |(S,1-11) |(12-13)|(14-17)|(18-20)|(21-35)|
//!
//! Both flag bits set in a normal-format word select one level of
//! indirect addressing.
//!
//! Decoding happens exactly once, here, producing the closed
//! [`Decoded`] enum; everything downstream dispatches on the enum and
//! never re-parses bit patterns.  Unknown operation codes decode to
//! [`Opcode::Illegal`] so that decode is total.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::types::{Address, ChannelNumber, Tag};
use crate::word::{Sign, Word};

/// An instruction word, undecoded.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(Word);

impl Instruction {
    #[must_use]
    pub fn from_word(w: Word) -> Instruction {
        Instruction(w)
    }

    #[must_use]
    pub fn word(&self) -> Word {
        self.0
    }

    /// Decode into one of the two instruction formats.
    #[must_use]
    pub fn decode(&self) -> Decoded {
        let w = self.0;
        let prefix = w.prefix();
        if prefix & 0o3 != 0 {
            Decoded::Index {
                op: IndexOp::from_prefix(prefix),
                tag: Tag::new(w.tag_bits()),
                decrement: w.decrement(),
                address: Address::new(w.address_bits()),
            }
        } else {
            Decoded::Normal {
                op: decode_opcode(w),
                indirect: w.flag_bits() == 0o3,
                tag: Tag::new(w.tag_bits()),
                address: Address::new(w.address_bits()),
            }
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:o}", self.0)
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Decrement-format: the index-register test/modify-and-branch
    /// family.  These are never indirect and never indexed in the
    /// ordinary sense; the tag names the register(s) under test.
    Index {
        op: IndexOp,
        tag: Tag,
        decrement: u16,
        address: Address,
    },
    /// Normal format: memory reference, shifts, sense and I/O class.
    Normal {
        op: Opcode,
        indirect: bool,
        tag: Tag,
        address: Address,
    },
}

/// Operations of the decrement format, selected by the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexOp {
    /// +1: add decrement to the index register, then transfer.
    Txi,
    /// +2: if index > decrement, subtract and transfer.
    Tix,
    /// +3: transfer if index > decrement.
    Txh,
    /// -1: store location and trap.
    Str,
    /// -2: if index <= decrement, transfer; else subtract.
    Tnx,
    /// -3: transfer if index <= decrement.
    Txl,
}

impl IndexOp {
    fn from_prefix(prefix: u8) -> IndexOp {
        match prefix {
            1 => IndexOp::Txi,
            2 => IndexOp::Tix,
            3 => IndexOp::Txh,
            5 => IndexOp::Str,
            6 => IndexOp::Tnx,
            7 => IndexOp::Txl,
            // from_prefix is only called when bits 1-2 are nonzero.
            _ => unreachable!("prefix {prefix:o} is not a decrement-format prefix"),
        }
    }
}

impl Display for IndexOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            IndexOp::Txi => "TXI",
            IndexOp::Tix => "TIX",
            IndexOp::Txh => "TXH",
            IndexOp::Str => "STR",
            IndexOp::Tnx => "TNX",
            IndexOp::Txl => "TXL",
        })
    }
}

/// Operations of the normal format.
///
/// The operation code is conventionally written as a signed octal
/// number (sign bit plus machine bits 1-11); the mapping from those
/// spellings to enumerators is in [`decode_opcode`].  Channel-class
/// operations carry their channel, decoded from the opcode pair
/// structure (plus sign = even channel, minus sign = odd).
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Opcode {
    // Control transfers and tests
    Htr,
    Tra,
    Ttr,
    Tlq,
    Tsx,
    Tze,
    Tnz,
    Tpl,
    Tmi,
    Tov,
    Tno,
    Tqo,
    Tqp,
    Cas,
    Las,
    Xec,
    Nop,
    Hpr,
    // Load/store/move
    Cla,
    Cal,
    Cls,
    Ldq,
    Stq,
    Sto,
    Slw,
    Stz,
    Sta,
    Std,
    Stt,
    Stp,
    Xca,
    Xcl,
    // Fixed point
    Add,
    Adm,
    Sub,
    Sbm,
    Acl,
    Mpy,
    Vlm,
    Dvh,
    Dvp,
    Vdh,
    Vdp,
    // Shifts
    Als,
    Ars,
    Lls,
    Lrs,
    Lgl,
    Lgr,
    Rql,
    // Logic
    Ana,
    Ans,
    Ora,
    Ors,
    Era,
    Com,
    Chs,
    Ssp,
    Ssm,
    Clm,
    // Floating point
    Fad,
    Fsb,
    Ufa,
    Ufs,
    Fmp,
    Ufm,
    Fdh,
    Fdp,
    Dfad,
    Dfsb,
    Dufa,
    Dufs,
    Dfmp,
    Dufm,
    Dfdh,
    Dfdp,
    // Index registers, normal format
    Lxa,
    Lxd,
    Sxa,
    Sxd,
    Pax,
    Pdx,
    Pxa,
    Pxd,
    Axt,
    // Sense: panel and indicator class
    Lbt,
    Pbt,
    Dct,
    Enk,
    Swt(u8),
    Sln(u8),
    Slf,
    // Input-output class
    Rds,
    Wrs,
    Bsr,
    Bsf,
    Wef,
    Rew,
    Run,
    Sdn,
    Rch(ChannelNumber),
    Lch(ChannelNumber),
    Sch(ChannelNumber),
    Tco(ChannelNumber),
    Tcn(ChannelNumber),
    /// The 704-era copy operation: on this machine it exists only to
    /// fire the copy compatibility trap.
    Cpy,
    // Trap-mode and compatibility controls
    Etm,
    Ltm,
    Estm,
    Ectm,
    Eftm,
    Lftm,
    Emtm,
    Lmtm,
    Esnt,
    Lsnm,
    // Timesharing extension (relocation/protection)
    Sea,
    Seb,
    Tia,
    Tib,
    Lri,
    Lpi,
    Sri,
    Spi,
    Rct,
    Enb,
    /// Undefined operation code; `sign`/`code` reproduce the raw
    /// opcode field for diagnostics.
    Illegal { sign: Sign, code: u16 },
}

/// Decode a channel from one of the four-pair opcode families
/// (`RCHA`=+0540, `RCHB`=-0540, `RCHC`=+0541, ...): the low two bits
/// of the code select the pair and the sign selects even or odd.
fn channel_pair(sign: Sign, code: u16, family_base: u16) -> ChannelNumber {
    let pair = (code - family_base) & 0o3;
    let n = (pair as u8) * 2 + u8::from(sign.is_minus());
    ChannelNumber::try_from(n).expect("pair arithmetic yields 0-7")
}

fn decode_opcode(w: Word) -> Opcode {
    use Opcode::*;
    let sign = w.sign();
    let code = w.opcode_bits();
    match (sign, code) {
        (Sign::Plus, 0o0000) => Htr,
        (Sign::Plus, 0o0020) => Tra,
        (Sign::Plus, 0o0021) => Ttr,
        (Sign::Minus, 0o0021) => Esnt,
        (Sign::Plus, 0o0040) => Tlq,
        (Sign::Plus, c @ 0o0060..=0o0067) => Tco(
            ChannelNumber::try_from((c - 0o0060) as u8).expect("range checked"),
        ),
        (Sign::Minus, c @ 0o0060..=0o0067) => Tcn(
            ChannelNumber::try_from((c - 0o0060) as u8).expect("range checked"),
        ),
        (Sign::Plus, 0o0074) => Tsx,
        (Sign::Plus, 0o0100) => Tze,
        (Sign::Minus, 0o0100) => Tnz,
        (Sign::Plus, 0o0101) => Tia,
        (Sign::Minus, 0o0101) => Tib,
        (Sign::Plus, 0o0120) => Tpl,
        (Sign::Minus, 0o0120) => Tmi,
        (Sign::Plus, 0o0131) => Xca,
        (Sign::Minus, 0o0130) => Xcl,
        (Sign::Plus, 0o0140) => Tov,
        (Sign::Minus, 0o0140) => Tno,
        (Sign::Plus, 0o0161) => Tqo,
        (Sign::Plus, 0o0162) => Tqp,
        (Sign::Plus, 0o0200) => Mpy,
        (Sign::Plus, 0o0204) => Vlm,
        (Sign::Plus, 0o0220) => Dvh,
        (Sign::Plus, 0o0221) => Dvp,
        (Sign::Plus, 0o0224) => Vdh,
        (Sign::Plus, 0o0225) => Vdp,
        (Sign::Plus, 0o0240) => Fdh,
        (Sign::Plus, 0o0241) => Fdp,
        (Sign::Minus, 0o0240) => Dfdh,
        (Sign::Minus, 0o0241) => Dfdp,
        (Sign::Plus, 0o0260) => Fmp,
        (Sign::Minus, 0o0260) => Dfmp,
        (Sign::Plus, 0o0261) => Ufm,
        (Sign::Minus, 0o0261) => Dufm,
        (Sign::Plus, 0o0300) => Fad,
        (Sign::Minus, 0o0300) => Dfad,
        (Sign::Plus, 0o0301) => Ufa,
        (Sign::Minus, 0o0301) => Dufa,
        (Sign::Plus, 0o0302) => Fsb,
        (Sign::Minus, 0o0302) => Dfsb,
        (Sign::Plus, 0o0303) => Ufs,
        (Sign::Minus, 0o0303) => Dufs,
        (Sign::Plus, 0o0320) => Ans,
        (Sign::Minus, 0o0320) => Ana,
        (Sign::Plus, 0o0322) => Era,
        (Sign::Plus, 0o0340) => Cas,
        (Sign::Minus, 0o0340) => Las,
        (Sign::Plus, 0o0361) => Acl,
        (Sign::Plus, 0o0400) => Add,
        (Sign::Plus, 0o0401) => Adm,
        (Sign::Plus, 0o0402) => Sub,
        (Sign::Minus, 0o0400) => Sbm,
        (Sign::Plus, 0o0420) => Hpr,
        (Sign::Plus, 0o0450) => Lri,
        (Sign::Plus, 0o0451) => Lpi,
        (Sign::Plus, 0o0452) => Sri,
        (Sign::Plus, 0o0453) => Spi,
        (Sign::Plus, 0o0500) => Cla,
        (Sign::Minus, 0o0500) => Cal,
        (Sign::Plus, 0o0502) => Cls,
        (Sign::Minus, 0o0501) => Ora,
        (Sign::Plus, 0o0522) => Xec,
        (Sign::Plus, 0o0534) => Lxa,
        (Sign::Minus, 0o0534) => Lxd,
        (s, c @ 0o0540..=0o0543) => Rch(channel_pair(s, c, 0o0540)),
        (s, c @ 0o0544..=0o0547) => Lch(channel_pair(s, c, 0o0544)),
        (Sign::Plus, 0o0560) => Ldq,
        (Sign::Plus, 0o0564) => Enb,
        (Sign::Plus, 0o0600) => Stz,
        (Sign::Plus, 0o0601) => Sto,
        (Sign::Plus, 0o0602) => Slw,
        (Sign::Minus, 0o0600) => Stq,
        (Sign::Minus, 0o0602) => Ors,
        (Sign::Plus, 0o0621) => Sta,
        (Sign::Plus, 0o0622) => Std,
        (Sign::Plus, 0o0625) => Stt,
        (Sign::Plus, 0o0630) => Stp,
        (Sign::Plus, 0o0634) => Sxa,
        (Sign::Minus, 0o0634) => Sxd,
        (s, c @ 0o0640..=0o0643) => Sch(channel_pair(s, c, 0o0640)),
        (Sign::Plus, 0o0700) => Cpy,
        (Sign::Plus, 0o0734) => Pax,
        (Sign::Minus, 0o0734) => Pdx,
        (Sign::Plus, 0o0754) => Pxa,
        (Sign::Minus, 0o0754) => Pxd,
        (_, 0o0760) => decode_sense(sign, w.address_bits()),
        (Sign::Plus, 0o0761) => Nop,
        (Sign::Plus, 0o0762) => Rds,
        (Sign::Plus, 0o0763) => Lls,
        (Sign::Minus, 0o0763) => Lgl,
        (Sign::Plus, 0o0764) => Bsr,
        (Sign::Minus, 0o0764) => Bsf,
        (Sign::Plus, 0o0765) => Lrs,
        (Sign::Minus, 0o0765) => Lgr,
        (Sign::Plus, 0o0766) => Wrs,
        (Sign::Plus, 0o0767) => Als,
        (Sign::Plus, 0o0770) => Wef,
        (Sign::Plus, 0o0771) => Ars,
        (Sign::Plus, 0o0772) => Rew,
        (Sign::Minus, 0o0772) => Run,
        (Sign::Minus, 0o0773) => Rql,
        (Sign::Plus, 0o0774) => Axt,
        (Sign::Plus, 0o0776) => Sdn,
        (sign, code) => Illegal { sign, code },
    }
}

/// The ±0760 operation selects among the sense, indicator-control and
/// mode-control operations by its address field.
fn decode_sense(sign: Sign, subcode: u16) -> Opcode {
    use Opcode::*;
    match (sign, subcode) {
        (Sign::Plus, 0o0000) => Clm,
        (Sign::Plus, 0o0001) => Lbt,
        (Sign::Plus, 0o0002) => Chs,
        (Sign::Plus, 0o0003) => Ssp,
        (Sign::Plus, 0o0004) => Enk,
        (Sign::Plus, 0o0006) => Com,
        (Sign::Plus, 0o0007) => Etm,
        (Sign::Plus, 0o0012) => Dct,
        (Sign::Plus, 0o0016) => Emtm,
        (Sign::Plus, 0o0140) => Slf,
        (Sign::Plus, n @ 0o0141..=0o0144) => Sln((n - 0o0140) as u8),
        (Sign::Minus, 0o0001) => Pbt,
        (Sign::Minus, 0o0002) => Eftm,
        (Sign::Minus, 0o0003) => Ssm,
        (Sign::Minus, 0o0005) => Estm,
        (Sign::Minus, 0o0006) => Ectm,
        (Sign::Minus, 0o0007) => Ltm,
        (Sign::Minus, 0o0010) => Lftm,
        (Sign::Minus, 0o0012) => Rct,
        (Sign::Minus, 0o0016) => Lmtm,
        (Sign::Minus, 0o0017) => Lsnm,
        (Sign::Minus, 0o0140) => Sea,
        (Sign::Minus, 0o0141) => Seb,
        (Sign::Minus, n @ 0o0161..=0o0166) => Swt((n - 0o0160) as u8),
        (sign, _) => Illegal { sign, code: 0o760 },
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        use Opcode::*;
        match self {
            Rch(c) => return write!(f, "RCH{c}"),
            Lch(c) => return write!(f, "LCH{c}"),
            Sch(c) => return write!(f, "SCH{c}"),
            Tco(c) => return write!(f, "TCO{c}"),
            Tcn(c) => return write!(f, "TCN{c}"),
            Swt(n) => return write!(f, "SWT {n}"),
            Sln(n) => return write!(f, "SLN {n}"),
            Illegal { sign, code } => return write!(f, "illegal {sign}{code:04o}"),
            _ => (),
        }
        let mnemonic = format!("{self:?}").to_uppercase();
        f.write_str(&mnemonic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bits: u64) -> Decoded {
        Instruction::from_word(Word::new(bits)).decode()
    }

    #[test]
    fn decode_add() {
        // +0400 00 0 00100: ADD 100
        match decode(0o0400_00_0_00100) {
            Decoded::Normal {
                op: Opcode::Add,
                indirect: false,
                tag,
                address,
            } => {
                assert!(tag.is_zero());
                assert_eq!(address, Address::new(0o100));
            }
            other => panic!("ADD decoded as {other:?}"),
        }
    }

    #[test]
    fn decode_indirect_flag() {
        // Flag bits 12-13 both set marks indirection.
        match decode(0o0500_60_0_00200) {
            Decoded::Normal {
                op: Opcode::Cla,
                indirect,
                ..
            } => assert!(indirect),
            other => panic!("CLA* decoded as {other:?}"),
        }
    }

    #[test]
    fn decode_decrement_format() {
        // prefix 2 = TIX, decrement 5, tag 1, address 1000.
        match decode(0o2_00005_1_01000) {
            Decoded::Index {
                op: IndexOp::Tix,
                tag,
                decrement,
                address,
            } => {
                assert_eq!(tag.bits(), 1);
                assert_eq!(decrement, 5);
                assert_eq!(address, Address::new(0o1000));
            }
            other => panic!("TIX decoded as {other:?}"),
        }
    }

    #[test]
    fn decode_channel_pairs() {
        // +0540 = RCHA, -0540 = RCHB, +0541 = RCHC.
        let expectations: [(u64, char); 3] = [
            (0o0540_00_0_00100, 'A'),
            (0o4540_00_0_00100, 'B'),
            (0o0541_00_0_00100, 'C'),
        ];
        for (bits, letter) in expectations {
            match decode(bits) {
                Decoded::Normal {
                    op: Opcode::Rch(c), ..
                } => assert_eq!(c.letter(), letter),
                other => panic!("RCH{letter} decoded as {other:?}"),
            }
        }
    }

    #[test]
    fn decode_sense_group() {
        match decode(0o0760_00_0_00007) {
            Decoded::Normal {
                op: Opcode::Etm, ..
            } => (),
            other => panic!("ETM decoded as {other:?}"),
        }
        match decode(0o4760_00_0_00161) {
            Decoded::Normal {
                op: Opcode::Swt(1), ..
            } => (),
            other => panic!("SWT 1 decoded as {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_decodes_to_illegal() {
        match decode(0o0777_00_0_00000) {
            Decoded::Normal {
                op: Opcode::Illegal { sign, code },
                ..
            } => {
                assert_eq!(sign, Sign::Plus);
                assert_eq!(code, 0o777);
            }
            other => panic!("expected Illegal, got {other:?}"),
        }
    }
}
