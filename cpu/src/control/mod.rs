//! The control unit: the register file, instruction fetch/decode and
//! the flat opcode dispatch.
//!
//! Within this simulator the control unit:
//!
//! - holds every architectural register and mode flag,
//! - resolves addressing (indexing, multi-tag combination, one level
//!   of indirection),
//! - dispatches decoded instructions to the arithmetic, floating,
//!   trap, and channel subsystems,
//! - runs execute-indirect chains (XEC) under the configured depth
//!   limit,
//! - keeps the bounded instruction history the front end can dump.
//!
//! The surrounding run loop (`crate::system`) owns the ordering of
//! channel servicing, channel traps and instruction execution; the
//! control unit only ever executes one instruction at a time.

mod op_ctss;
mod op_fixed;
mod op_float;
mod op_index;
mod op_io;
mod op_jump;
pub mod trap;

use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::time::Duration;

use tracing::{event, span, Level};

use base::prelude::*;
use base::ADDR_MASK;

use crate::chan::ChannelSet;
use crate::memory::{BankSelect, CoreMemory, Mapping, MemoryFault};
use crate::stop::StopReason;

use trap::TrapKind;

/// Static configuration of the control unit.
pub struct CpuConfiguration {
    /// Maximum depth of an execute-indirect (XEC) chain; exceeding it
    /// is a stop condition, not a trap.
    pub xec_limit: u32,
    /// Instruction history ring size; zero disables the history.
    pub history_capacity: usize,
    /// Simulated time one instruction consumes.
    pub instruction_time: Duration,
}

impl Default for CpuConfiguration {
    fn default() -> CpuConfiguration {
        CpuConfiguration {
            xec_limit: 64,
            history_capacity: 64,
            instruction_time: Duration::from_micros(2),
        }
    }
}

/// The architectural register file and mode flags.
///
/// Every address-holding register is masked to the address width on
/// every write; index register 0 reads as zero and is never stored
/// into.
#[derive(Debug)]
pub struct CpuState {
    pub ac: Accumulator,
    pub mq: Word,
    /// Storage-indicator register.
    pub si: Word,
    /// Front-panel keys.
    pub keys: Word,
    /// Instruction counter (program counter).
    pub ic: Address,
    /// Index registers; `xr[0]` is fixed at zero.
    xr: [u16; 8],
    pub addr_mask: u16,
    pub sense_switches: [bool; 6],
    pub sense_lights: [bool; 4],

    // Indicators.
    pub ac_overflow: bool,
    pub mq_overflow: bool,
    pub divide_check: bool,
    pub io_check: bool,

    // Mode flags.
    pub transfer_trap: bool,
    pub copy_trap: bool,
    pub select_trap: bool,
    pub floating_trap: bool,
    pub storage_null: bool,
    pub multi_tag: bool,

    // Timesharing extension state.  The user and relocation flags
    // activate through one-instruction-delayed buffers: a privileged
    // instruction loads the buffer, and the flag itself is committed
    // at the next instruction boundary.
    pub user_mode: bool,
    pub user_buf: bool,
    pub reloc_mode: bool,
    pub reloc_buf: bool,
    pub instruction_bank: BankSelect,
    pub data_bank: BankSelect,
    /// Relocation value, an 8-bit block number.
    pub reloc_block: u16,
    /// Protection window, inclusive, in 8-bit block numbers.
    pub start_block: u16,
    pub limit_block: u16,
}

impl CpuState {
    fn new() -> CpuState {
        CpuState {
            ac: Accumulator::ZERO,
            mq: Word::ZERO,
            si: Word::ZERO,
            keys: Word::ZERO,
            ic: Address::ZERO,
            xr: [0; 8],
            addr_mask: ADDR_MASK,
            sense_switches: [false; 6],
            sense_lights: [false; 4],
            ac_overflow: false,
            mq_overflow: false,
            divide_check: false,
            io_check: false,
            transfer_trap: false,
            copy_trap: false,
            select_trap: false,
            // Floating-point spills trap by default on this machine.
            floating_trap: true,
            storage_null: false,
            multi_tag: false,
            user_mode: false,
            user_buf: false,
            reloc_mode: false,
            reloc_buf: false,
            instruction_bank: BankSelect::A,
            data_bank: BankSelect::A,
            reloc_block: 0,
            start_block: 0,
            limit_block: 0,
        }
    }

    /// The relocation/protection snapshot governing logical accesses
    /// right now.
    #[must_use]
    pub fn mapping(&self) -> Mapping {
        Mapping {
            relocate: self.reloc_mode,
            user_mode: self.user_mode,
            nullify_stores: self.storage_null,
            reloc_block: self.reloc_block,
            start_block: self.start_block,
            limit_block: self.limit_block,
            instruction_bank: self.instruction_bank,
            data_bank: self.data_bank,
        }
    }

    /// Read through the tag field.  Single-tag mode names one index
    /// register; multi-tag mode ORs together the registers selected
    /// by the individual tag bits.
    #[must_use]
    pub fn index_value(&self, tag: Tag) -> u16 {
        debug_assert_eq!(self.xr[0], 0);
        if self.multi_tag {
            tag.multi_tag_registers()
                .fold(0, |acc, r| acc | self.xr[r])
        } else {
            self.xr[usize::from(tag.bits())]
        }
    }

    /// Write through the tag field: exactly the selected registers in
    /// multi-tag mode, exactly one in single-tag mode, and never
    /// index register 0.
    pub fn set_index(&mut self, tag: Tag, value: u16) {
        let value = value & self.addr_mask;
        if self.multi_tag {
            for r in tag.multi_tag_registers() {
                self.xr[r] = value;
            }
        } else if !tag.is_zero() {
            self.xr[usize::from(tag.bits())] = value;
        }
    }

    /// Direct index-register accessor for the operator front end.
    #[must_use]
    pub fn xr(&self, n: usize) -> u16 {
        self.xr[n & 0o7]
    }
}

/// Where control goes after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    /// Skip `n` instructions beyond the next one.
    Skip(u16),
    Jump(Address),
    /// Backpressure: back the program counter up and retry this
    /// instruction on the next loop iteration.
    Stall,
    /// Halt once the channels drain; `resume` is where a restart
    /// continues.
    Halt(Address),
    /// Execute-indirect: decode the word at the given address without
    /// a new fetch.
    Execute(Address),
}

/// Out-of-line exits from an opcode handler.
#[derive(Debug)]
pub(crate) enum OpError {
    /// A trap fired inside the handler; the program counter already
    /// points at the vector.
    Trapped,
    Stop(StopReason),
}

impl From<StopReason> for OpError {
    fn from(s: StopReason) -> OpError {
        OpError::Stop(s)
    }
}

pub(crate) type OpResult = Result<Flow, OpError>;

/// What `execute_one` tells the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Continue,
    /// A halt completed decode; the run loop drains the channels
    /// before honouring it.
    Halted { resume: Address },
}

/// One entry of the instruction history ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub ic: Address,
    pub word: Word,
    pub effective_address: Option<Address>,
}

#[derive(Debug, Default)]
struct InstructionHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl InstructionHistory {
    fn record(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// The control unit.
pub struct Cpu {
    pub regs: CpuState,
    config: CpuConfiguration,
    history: InstructionHistory,
    pub breakpoints: BTreeSet<Address>,
    /// Effective address of the instruction in flight, for the
    /// history entry.
    last_ea: Option<Address>,
}

impl Cpu {
    #[must_use]
    pub fn new(config: CpuConfiguration) -> Cpu {
        let history = InstructionHistory {
            entries: VecDeque::new(),
            capacity: config.history_capacity,
        };
        Cpu {
            regs: CpuState::new(),
            config,
            history,
            breakpoints: BTreeSet::new(),
            last_ea: None,
        }
    }

    #[must_use]
    pub fn instruction_time(&self) -> Duration {
        self.config.instruction_time
    }

    /// Master reset of the register file; breakpoints and history
    /// survive (they belong to the operator, not the machine).
    pub fn reset(&mut self) {
        self.regs = CpuState::new();
    }

    #[must_use]
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.entries.iter()
    }

    /// Take the pending channel trap, if one is pending and allowed:
    /// the current program counter is saved at the channel's fixed
    /// location together with the cause, and execution transfers to
    /// the channel's vector.
    pub fn take_channel_trap(&mut self, mem: &mut CoreMemory, chans: &mut ChannelSet) -> bool {
        match chans.take_trap() {
            Some((channel, cause)) => {
                self.fire_trap(mem, TrapKind::Channel { channel, cause });
                true
            }
            None => false,
        }
    }

    /// Logical data read; a protection violation fires the trap and
    /// unwinds the handler.
    pub(crate) fn read_data(
        &mut self,
        mem: &mut CoreMemory,
        addr: Address,
    ) -> Result<Word, OpError> {
        match mem.read_logical(&self.regs.mapping(), addr) {
            Ok(w) => Ok(w),
            Err(MemoryFault::Protection { .. }) => {
                self.fire_trap(mem, TrapKind::Protection);
                Err(OpError::Trapped)
            }
        }
    }

    /// Logical data write with the same trap behaviour.
    pub(crate) fn write_data(
        &mut self,
        mem: &mut CoreMemory,
        addr: Address,
        value: Word,
    ) -> Result<(), OpError> {
        match mem.write_logical(&self.regs.mapping(), addr, value) {
            Ok(()) => Ok(()),
            Err(MemoryFault::Protection { .. }) => {
                self.fire_trap(mem, TrapKind::Protection);
                Err(OpError::Trapped)
            }
        }
    }

    /// Resolve the operand address: indexing (single- or multi-tag),
    /// then one optional level of indirection.  The indirect word
    /// contributes its own tag.
    pub(crate) fn effective_address(
        &mut self,
        mem: &mut CoreMemory,
        indirect: bool,
        tag: Tag,
        address: Address,
    ) -> Result<Address, OpError> {
        let mask = self.regs.addr_mask;
        let mut ea = address.index_by(self.regs.index_value(tag), mask);
        if indirect {
            let w = self.read_data(mem, ea)?;
            let itag = Tag::new(w.tag_bits());
            ea = Address::new(w.address_bits()).index_by(self.regs.index_value(itag), mask);
        }
        self.last_ea = Some(ea);
        Ok(ea)
    }

    /// Branch, honouring transfer-trap mode: when the mode is set,
    /// every ordinary control transfer redirects through the transfer
    /// trap instead of branching directly.
    pub(crate) fn branch_to(&mut self, mem: &mut CoreMemory, target: Address) -> OpResult {
        if self.regs.transfer_trap {
            self.fire_trap(mem, TrapKind::Transfer { target });
            Err(OpError::Trapped)
        } else {
            Ok(Flow::Jump(target))
        }
    }

    /// Fetch, decode and execute one instruction (including any XEC
    /// chain hanging off it).  Returns `Halted` for halt-class
    /// instructions; the run loop owns the channel drain.
    pub fn execute_one(
        &mut self,
        mem: &mut CoreMemory,
        chans: &mut ChannelSet,
    ) -> Result<ExecOutcome, StopReason> {
        let fetch_ic = self.regs.ic;
        if self.breakpoints.contains(&fetch_ic) {
            return Err(StopReason::Breakpoint(fetch_ic));
        }
        let word = match mem.fetch_instruction(&self.regs.mapping(), fetch_ic) {
            Ok(w) => w,
            Err(MemoryFault::Protection { .. }) => {
                self.fire_trap(mem, TrapKind::Protection);
                self.instruction_boundary(chans);
                return Ok(ExecOutcome::Continue);
            }
        };
        self.regs.ic = fetch_ic.succ(self.regs.addr_mask);
        self.last_ea = None;

        let span = span!(Level::TRACE, "xop", ic = %fetch_ic);
        let _enter = span.enter();

        let mut inst = Instruction::from_word(word);
        let mut depth: u32 = 0;
        let outcome = loop {
            let decoded = inst.decode();
            match self.dispatch(decoded, inst.word(), mem, chans) {
                Ok(Flow::Next) => break ExecOutcome::Continue,
                Ok(Flow::Skip(n)) => {
                    for _ in 0..n {
                        self.regs.ic = self.regs.ic.succ(self.regs.addr_mask);
                    }
                    break ExecOutcome::Continue;
                }
                Ok(Flow::Jump(target)) => {
                    self.regs.ic = Address::new(target.bits() & self.regs.addr_mask);
                    break ExecOutcome::Continue;
                }
                Ok(Flow::Stall) => {
                    // Backpressure: retry the same instruction on the
                    // next loop iteration.
                    event!(Level::TRACE, "stall; backing the program counter up");
                    self.regs.ic = fetch_ic;
                    break ExecOutcome::Continue;
                }
                Ok(Flow::Halt(resume)) => {
                    break ExecOutcome::Halted {
                        resume: Address::new(resume.bits() & self.regs.addr_mask),
                    };
                }
                Ok(Flow::Execute(target)) => {
                    depth += 1;
                    if depth > self.config.xec_limit {
                        return Err(StopReason::XecLimit { depth });
                    }
                    match self.read_data(mem, target) {
                        Ok(w) => {
                            inst = Instruction::from_word(w);
                            continue;
                        }
                        Err(OpError::Trapped) => break ExecOutcome::Continue,
                        Err(OpError::Stop(stop)) => return Err(stop),
                    }
                }
                Err(OpError::Trapped) => break ExecOutcome::Continue,
                Err(OpError::Stop(stop)) => return Err(stop),
            }
        };

        self.history.record(HistoryEntry {
            ic: fetch_ic,
            word,
            effective_address: self.last_ea,
        });
        self.instruction_boundary(chans);
        Ok(outcome)
    }

    /// The instruction boundary: buffered timesharing mode changes
    /// commit here, and the channel-trap one-instruction inhibit
    /// counts down here.
    fn instruction_boundary(&mut self, chans: &mut ChannelSet) {
        self.regs.user_mode = self.regs.user_buf;
        self.regs.reloc_mode = self.regs.reloc_buf;
        chans.traps.instruction_boundary();
    }

    /// The flat dispatch: one arm per decoded instruction form.
    fn dispatch(
        &mut self,
        decoded: Decoded,
        word: Word,
        mem: &mut CoreMemory,
        chans: &mut ChannelSet,
    ) -> OpResult {
        match decoded {
            Decoded::Index {
                op,
                tag,
                decrement,
                address,
            } => self.op_index_format(op, tag, decrement, address, mem),
            Decoded::Normal {
                op,
                indirect,
                tag,
                address,
            } => self.dispatch_normal(op, indirect, tag, address, word, mem, chans),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch_normal(
        &mut self,
        op: Opcode,
        indirect: bool,
        tag: Tag,
        address: Address,
        word: Word,
        mem: &mut CoreMemory,
        chans: &mut ChannelSet,
    ) -> OpResult {
        use Opcode::*;

        // The sense group encodes its operation in the address field,
        // so it takes no effective address; AXT uses the raw address
        // field by definition.
        let needs_ea = !matches!(
            op,
            Clm | Lbt
                | Pbt
                | Chs
                | Ssp
                | Ssm
                | Com
                | Enk
                | Dct
                | Etm
                | Ltm
                | Estm
                | Ectm
                | Eftm
                | Lftm
                | Emtm
                | Lmtm
                | Lsnm
                | Sea
                | Seb
                | Rct
                | Slf
                | Sln(_)
                | Swt(_)
                | Axt
                | Nop
                | Cpy
                | Illegal { .. }
        );
        // The variable-length arithmetic instructions reuse the flag
        // bits as part of their count field and are never indirect.
        let indirect = indirect && !matches!(op, Vlm | Vdh | Vdp);
        let ea = if needs_ea {
            self.effective_address(mem, indirect, tag, address)?
        } else {
            address
        };

        match op {
            // Control transfers and tests.
            Htr => Ok(Flow::Halt(ea)),
            Hpr => Ok(Flow::Halt(self.regs.ic)),
            Tra => self.branch_to(mem, ea),
            Ttr => Ok(Flow::Jump(ea)),
            Tze => self.op_tze(mem, ea),
            Tnz => self.op_tnz(mem, ea),
            Tpl => self.op_tpl(mem, ea),
            Tmi => self.op_tmi(mem, ea),
            Tov => self.op_tov(mem, ea),
            Tno => self.op_tno(mem, ea),
            Tqo => self.op_tqo(mem, ea),
            Tqp => self.op_tqp(mem, ea),
            Tlq => self.op_tlq(mem, ea),
            Tsx => self.op_tsx(mem, tag, ea),
            Cas => self.op_cas(mem, ea),
            Las => self.op_las(mem, ea),
            Xec => Ok(Flow::Execute(ea)),
            Nop => Ok(Flow::Next),

            // Loads, stores and moves.
            Cla => self.op_cla(mem, ea),
            Cal => self.op_cal(mem, ea),
            Cls => self.op_cls(mem, ea),
            Ldq => self.op_ldq(mem, ea),
            Stq => self.op_stq(mem, ea),
            Sto => self.op_sto(mem, ea),
            Slw => self.op_slw(mem, ea),
            Stz => self.op_stz(mem, ea),
            Sta => self.op_sta(mem, ea),
            Std => self.op_std(mem, ea),
            Stt => self.op_stt(mem, ea),
            Stp => self.op_stp(mem, ea),
            Xca => self.op_xca(),
            Xcl => self.op_xcl(),
            Enk => self.op_enk(),

            // Fixed point.
            Add => self.op_add(mem, ea, false, false),
            Sub => self.op_add(mem, ea, true, false),
            Adm => self.op_add(mem, ea, false, true),
            Sbm => self.op_add(mem, ea, true, true),
            Acl => self.op_acl(mem, ea),
            Mpy => self.op_mpy(mem, ea, 35),
            Vlm => self.op_mpy(mem, ea, word.count_field()),
            Dvh => self.op_div(mem, ea, 35, true),
            Dvp => self.op_div(mem, ea, 35, false),
            Vdh => self.op_div(mem, ea, word.count_field(), true),
            Vdp => self.op_div(mem, ea, word.count_field(), false),

            // Shifts.
            Als => self.op_als(ea),
            Ars => self.op_ars(ea),
            Lls => self.op_lls(ea),
            Lrs => self.op_lrs(ea),
            Lgl => self.op_lgl(ea),
            Lgr => self.op_lgr(ea),
            Rql => self.op_rql(ea),

            // Logic.
            Ana => self.op_ana(mem, ea),
            Ans => self.op_ans(mem, ea),
            Ora => self.op_ora(mem, ea),
            Ors => self.op_ors(mem, ea),
            Era => self.op_era(mem, ea),
            Com => self.op_com(),
            Chs => self.op_chs(),
            Ssp => self.op_ssp(),
            Ssm => self.op_ssm(),
            Clm => self.op_clm(),

            // Floating point.
            Fad => self.op_fp_add(mem, ea, false, true, false),
            Fsb => self.op_fp_add(mem, ea, false, true, true),
            Ufa => self.op_fp_add(mem, ea, false, false, false),
            Ufs => self.op_fp_add(mem, ea, false, false, true),
            Dfad => self.op_fp_add(mem, ea, true, true, false),
            Dfsb => self.op_fp_add(mem, ea, true, true, true),
            Dufa => self.op_fp_add(mem, ea, true, false, false),
            Dufs => self.op_fp_add(mem, ea, true, false, true),
            Fmp => self.op_fp_mul(mem, ea, false, true),
            Ufm => self.op_fp_mul(mem, ea, false, false),
            Dfmp => self.op_fp_mul(mem, ea, true, true),
            Dufm => self.op_fp_mul(mem, ea, true, false),
            Fdh => self.op_fp_div(mem, ea, false, true),
            Fdp => self.op_fp_div(mem, ea, false, false),
            Dfdh => self.op_fp_div(mem, ea, true, true),
            Dfdp => self.op_fp_div(mem, ea, true, false),

            // Index registers, normal format.
            Lxa => self.op_lxa(mem, tag, ea),
            Lxd => self.op_lxd(mem, tag, ea),
            Sxa => self.op_sxa(mem, tag, ea),
            Sxd => self.op_sxd(mem, tag, ea),
            Pax => self.op_pax(tag),
            Pdx => self.op_pdx(tag),
            Pxa => self.op_pxa(tag),
            Pxd => self.op_pxd(tag),
            Axt => self.op_axt(tag, address),

            // Sense: panel and indicators.
            Lbt => self.op_lbt(),
            Pbt => self.op_pbt(),
            Dct => self.op_dct(),
            Swt(n) => self.op_swt(n),
            Sln(n) => self.op_sln(n),
            Slf => self.op_slf(),

            // Input-output.
            Rds => self.op_data_select(mem, chans, ea, crate::chan::Direction::Read),
            Wrs => self.op_data_select(mem, chans, ea, crate::chan::Direction::Write),
            Bsr => self.op_nondata_select(mem, chans, ea, crate::io::Selector::Backspace),
            Bsf => self.op_nondata_select(mem, chans, ea, crate::io::Selector::BackspaceFile),
            Wef => self.op_nondata_select(mem, chans, ea, crate::io::Selector::WriteEndOfFile),
            Rew => self.op_nondata_select(mem, chans, ea, crate::io::Selector::Rewind),
            Run => self.op_nondata_select(mem, chans, ea, crate::io::Selector::RewindUnload),
            Sdn => self.op_nondata_select(mem, chans, ea, crate::io::Selector::SetDensity),
            Rch(c) => self.op_chain(chans, mem, c, true, ea),
            Lch(c) => self.op_chain(chans, mem, c, false, ea),
            Sch(c) => self.op_sch(mem, chans, c, ea),
            Tco(c) => self.op_tco(mem, chans, c, ea),
            Tcn(c) => self.op_tcn(mem, chans, c, ea),

            // Trap-mode and compatibility controls.
            Etm => self.op_set_flag(|r| r.transfer_trap = true),
            Ltm => self.op_set_flag(|r| r.transfer_trap = false),
            Estm => self.op_set_flag(|r| r.select_trap = true),
            Ectm => self.op_set_flag(|r| r.copy_trap = true),
            Eftm => self.op_set_flag(|r| r.floating_trap = true),
            Lftm => self.op_set_flag(|r| r.floating_trap = false),
            Emtm => self.op_set_flag(|r| r.multi_tag = true),
            Lmtm => self.op_set_flag(|r| r.multi_tag = false),
            Esnt => self.op_esnt(ea),
            Lsnm => self.op_set_flag(|r| r.storage_null = false),
            Cpy => {
                // The copy operation exists only for 704-era programs:
                // in copy-trap mode it traps, otherwise it is illegal.
                if self.regs.copy_trap {
                    self.fire_trap(mem, TrapKind::Copy);
                    Err(OpError::Trapped)
                } else {
                    Err(OpError::Stop(StopReason::IllegalInstruction {
                        word,
                        address: self.regs.ic.pred(self.regs.addr_mask),
                    }))
                }
            }

            // Timesharing extension.
            Sea => self.op_set_flag(|r| r.data_bank = BankSelect::A),
            Seb => self.op_set_flag(|r| r.data_bank = BankSelect::B),
            Tia => self.op_transfer_in(word, ea, BankSelect::A),
            Tib => self.op_transfer_in(word, ea, BankSelect::B),
            Lri => self.op_lri(mem, ea),
            Lpi => self.op_lpi(mem, ea),
            Sri => self.op_sri(mem, ea),
            Spi => self.op_spi(mem, ea),
            Rct => {
                chans.traps.return_from_trap();
                Ok(Flow::Next)
            }
            Enb => self.op_enb(mem, chans, ea),

            Illegal { .. } => Err(OpError::Stop(StopReason::IllegalInstruction {
                word,
                address: self.regs.ic.pred(self.regs.addr_mask),
            })),
        }
    }

    /// Shared helper for the one-line mode-flag operations.
    fn op_set_flag<F: FnOnce(&mut CpuState)>(&mut self, f: F) -> OpResult {
        f(&mut self.regs);
        Ok(Flow::Next)
    }
}
