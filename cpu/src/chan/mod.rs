//! The data channels: control blocks, request bits, the CPU-side
//! select/chain instructions' entry points, and the channel-trap
//! evaluator.
//!
//! Eight channels are fitted, each configured at construction as one
//! of the two channel architectures:
//!
//! - [`ChannelKind::Select`] — the poll/select channel used by most
//!   peripherals (engine in [`select`]).
//! - [`ChannelKind::Command`] — the command-list channel with its own
//!   interrupt controller, used by the disk and communications
//!   controllers (engine in [`command`]).
//!
//! Devices talk to a channel only through [`crate::io::ChannelCall`]s,
//! which [`ChannelSet::apply_calls`] buffers into the control block;
//! the owning engine consumes them when the channel is serviced.
//! Channel data transfers use *physical* addressing: channel programs
//! are pre-validated by privileged code, and the engines deliberately
//! perform no bounds checks of their own.

pub mod command;
pub mod select;

use std::fmt::{self, Debug, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;
use base::ADDR_MASK;

use crate::context::Context;
use crate::io::{ChannelCall, DeviceManager, DisconnectFlag, Selector};
use crate::memory::CoreMemory;
use crate::stop::{IoStatus, StopReason};

/// Channel flag bits: the per-channel trap sources.
pub const FLAG_END_OF_FILE: u8 = 0o1;
pub const FLAG_CHECK: u8 = 0o2;
pub const FLAG_COMMAND: u8 = 0o4;

/// Device condition bits for interrupt-capable channels.
pub const COND_ATTENTION: u8 = 0o1;
pub const COND_IO_CHECK: u8 = 0o2;
pub const COND_UNUSUAL_END: u8 = 0o4;
pub const COND_SEQUENCE_CHECK: u8 = 0o10;

/// Which channel architecture a slot is wired as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelKind {
    Select,
    Command,
}

/// Operating state of a channel.
///
/// The poll/select architecture uses the first six states; the
/// command architecture uses only `Idle` and `Executing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Idle,
    /// A data select is waiting for the device to accept it.
    PollData,
    /// A non-data select is waiting for the device to accept it.
    PollNonData,
    /// Data select accepted; waiting for a channel program (RCH/LCH).
    DataWait,
    /// Data select running a channel command.
    DataExec,
    /// Non-data operation in progress at the device.
    NonDataExec,
    /// Command-architecture channel running its command list.
    Executing,
}

/// Direction of the data transfer a select established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Read,
    Write,
}

/// The six channel-command sub-opcodes of the poll/select
/// architecture, decoded from the command word's prefix field.
///
/// | prefix | op   | at count end        | stores | on end-of-record |
/// | ------ | ---- | ------------------- | ------ | ---------------- |
/// | 0      | IOCD | disconnect          | yes    | disconnect       |
/// | 1      | IOCP | proceed             | yes    | disconnect       |
/// | 2      | IOCT | wait for chain      | yes    | disconnect       |
/// | 3      | IORP | proceed             | yes    | proceed          |
/// | 4      | IORT | wait for chain      | yes    | wait for chain   |
/// | 5      | IOSP | proceed             | no     | disconnect       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChanOp {
    Iocd,
    Iocp,
    Ioct,
    Iorp,
    Iort,
    Iosp,
}

impl ChanOp {
    pub(crate) fn from_prefix(prefix: u8) -> Option<ChanOp> {
        match prefix {
            0 => Some(ChanOp::Iocd),
            1 => Some(ChanOp::Iocp),
            2 => Some(ChanOp::Ioct),
            3 => Some(ChanOp::Iorp),
            4 => Some(ChanOp::Iort),
            5 => Some(ChanOp::Iosp),
            _ => None,
        }
    }

    pub(crate) fn prefix(self) -> u8 {
        match self {
            ChanOp::Iocd => 0,
            ChanOp::Iocp => 1,
            ChanOp::Ioct => 2,
            ChanOp::Iorp => 3,
            ChanOp::Iort => 4,
            ChanOp::Iosp => 5,
        }
    }

    pub(crate) fn stores(self) -> bool {
        !matches!(self, ChanOp::Iosp)
    }
}

/// A select waiting for the channel to come free or for the device
/// to accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingSelect {
    pub selector: Selector,
    pub unit: u16,
}

/// How a command-architecture copy command finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CopyMode {
    /// CPYD disconnects when the device signals end of record; CPYP
    /// continues across record boundaries.
    pub disconnect_on_eor: bool,
}

/// One channel control block.
///
/// Mutated exclusively by the owning channel engine and by the
/// instruction loop's channel-start instructions; devices reach it
/// only through buffered [`ChannelCall`]s.
pub struct Channel {
    pub number: ChannelNumber,
    pub kind: ChannelKind,
    pub state: ChannelState,
    /// Current command sub-opcode (poll/select architecture).
    pub op: ChanOp,
    /// Location counter: address of the next channel command.
    pub lc: Address,
    /// Word count of the running command.
    pub wc: u16,
    /// Current memory address of the running command.
    pub ca: Address,
    /// Assembly register.
    pub ar: Word,
    pub direction: Direction,
    pub connected: bool,
    /// Unit address given by the select that connected the device.
    pub unit: u16,
    /// Channel flag bits (trap sources).
    pub flags: u8,

    // Command-architecture extras.
    /// Condition register: latched, in-service conditions.
    pub cond: u8,
    /// OR'd pending device conditions, not yet latched.
    pub pending_cond: u8,
    /// Interrupt mask: a set bit *masks* the corresponding condition.
    pub mask: u8,
    /// Loop counter for counted transfers.
    pub lcc: u8,
    /// Saved location counter while an interrupt is in service.
    pub clc: Address,
    pub in_service: bool,
    pub(crate) copy: Option<CopyMode>,
    pub(crate) sense_pending: bool,

    // Buffered device calls.
    pub(crate) inbound: Option<(Word, bool)>,
    pub(crate) write_request: bool,
    pub(crate) disconnect_request: Option<Option<DisconnectFlag>>,

    // Stacked selects (poll/select architecture).
    pub(crate) active_select: Option<PendingSelect>,
    pub(crate) stacked_data: Option<PendingSelect>,
    pub(crate) stacked_nondata: Option<PendingSelect>,
}

impl Channel {
    fn new(number: ChannelNumber, kind: ChannelKind) -> Channel {
        Channel {
            number,
            kind,
            state: ChannelState::Idle,
            op: ChanOp::Iocd,
            lc: Address::ZERO,
            wc: 0,
            ca: Address::ZERO,
            ar: Word::ZERO,
            direction: Direction::Read,
            connected: false,
            unit: 0,
            flags: 0,
            cond: 0,
            pending_cond: 0,
            mask: 0,
            lcc: 0,
            clc: Address::ZERO,
            in_service: false,
            copy: None,
            sense_pending: false,
            inbound: None,
            write_request: false,
            disconnect_request: None,
            active_select: None,
            stacked_data: None,
            stacked_nondata: None,
        }
    }

    /// Channel reset: back to idle, everything cleared.
    pub fn reset(&mut self) {
        *self = Channel::new(self.number, self.kind);
    }

    /// Is the channel doing anything at all?
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state != ChannelState::Idle
            || self.stacked_data.is_some()
            || self.stacked_nondata.is_some()
    }

    /// True while a data select occupies the channel.
    pub(crate) fn data_select_active(&self) -> bool {
        matches!(
            self.state,
            ChannelState::PollData | ChannelState::DataWait | ChannelState::DataExec
        )
    }

    pub(crate) fn nondata_select_active(&self) -> bool {
        matches!(
            self.state,
            ChannelState::PollNonData | ChannelState::NonDataExec
        )
    }

    /// Load a command word: {prefix → op, decrement → word count,
    /// address → memory address}.
    pub(crate) fn load_command(&mut self, word: Word) -> Result<(), StopReason> {
        match ChanOp::from_prefix(word.prefix()) {
            Some(op) => {
                self.op = op;
                self.wc = word.decrement();
                self.ca = Address::new(word.address_bits());
                Ok(())
            }
            None => Err(StopReason::IllegalIoOperation(format!(
                "channel {} command word {word:o} has reserved sub-opcode {:o}",
                self.number,
                word.prefix(),
            ))),
        }
    }

    /// The diagnostic word the SCH instruction stores: current
    /// sub-opcode in the prefix, word count in the decrement, current
    /// address in the address field.
    #[must_use]
    pub fn diagnostic_word(&self) -> Word {
        Word::ZERO
            .with_prefix(self.op.prefix())
            .with_decrement(self.wc)
            .with_address(self.ca.bits())
    }
}

impl Debug for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Channel")
            .field("number", &self.number)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("op", &self.op)
            .field("lc", &self.lc)
            .field("wc", &self.wc)
            .field("ca", &self.ca)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Channel-trap control state: the enable mask and the two inhibits.
#[derive(Debug, Default)]
pub struct ChannelTrapControl {
    /// 30-bit per-source enable mask: bit c enables the end-of-file
    /// trap for channel c, bit 8+c the check trap, bit 16+c the
    /// command trap; higher bits are reserved.
    enable: u32,
    /// Set when a channel trap is taken; cleared only by RCT.
    inhibit_until_rct: bool,
    /// Countdown inhibit armed by ENB/RCT: holds traps off until one
    /// further instruction has completed.
    inhibit_countdown: u8,
}

impl ChannelTrapControl {
    pub fn set_enable_mask(&mut self, word: Word) {
        self.enable = (word.bits() & 0x3FFF_FFFF) as u32;
    }

    /// RCT: re-enable channel traps after the next instruction.
    pub fn return_from_trap(&mut self) {
        self.inhibit_until_rct = false;
        self.arm_one_instruction_inhibit();
    }

    /// Hold traps off until one further instruction has completed.
    pub fn arm_one_instruction_inhibit(&mut self) {
        self.inhibit_countdown = 2;
    }

    /// Called once per completed instruction.
    pub fn instruction_boundary(&mut self) {
        if self.inhibit_countdown > 0 {
            self.inhibit_countdown -= 1;
        }
    }

    #[must_use]
    pub fn traps_allowed(&self) -> bool {
        !self.inhibit_until_rct && self.inhibit_countdown == 0
    }

    fn enabled_causes(&self, channel: ChannelNumber) -> u8 {
        let c = channel.index();
        let mut causes = 0;
        if self.enable & (1 << c) != 0 {
            causes |= FLAG_END_OF_FILE;
        }
        if self.enable & (1 << (8 + c)) != 0 {
            causes |= FLAG_CHECK;
        }
        if self.enable & (1 << (16 + c)) != 0 {
            causes |= FLAG_COMMAND;
        }
        causes
    }
}

/// All eight channels plus the request bits and trap control.
#[derive(Debug)]
pub struct ChannelSet {
    channels: [Channel; base::NUM_CHANNELS],
    requests: u8,
    pub traps: ChannelTrapControl,
}

impl ChannelSet {
    #[must_use]
    pub fn new(kinds: [ChannelKind; base::NUM_CHANNELS]) -> ChannelSet {
        let mut numbers = ChannelNumber::all().into_iter();
        ChannelSet {
            channels: kinds.map(|kind| {
                Channel::new(numbers.next().expect("eight channel numbers"), kind)
            }),
            requests: 0,
            traps: ChannelTrapControl::default(),
        }
    }

    #[must_use]
    pub fn channel(&self, ch: ChannelNumber) -> &Channel {
        &self.channels[ch.index()]
    }

    pub(crate) fn channel_mut(&mut self, ch: ChannelNumber) -> &mut Channel {
        &mut self.channels[ch.index()]
    }

    pub fn set_request(&mut self, ch: ChannelNumber) {
        self.requests |= 1 << ch.index();
    }

    pub fn clear_request(&mut self, ch: ChannelNumber) {
        self.requests &= !(1 << ch.index());
    }

    #[must_use]
    pub fn has_request(&self, ch: ChannelNumber) -> bool {
        self.requests & (1 << ch.index()) != 0
    }

    #[must_use]
    pub fn any_request(&self) -> bool {
        self.requests != 0
    }

    /// Is any channel mid-operation?  The halt instructions drain
    /// until this is false.
    #[must_use]
    pub fn any_busy(&self) -> bool {
        self.channels.iter().any(Channel::is_busy)
    }

    /// TCO/TCN: is this channel in operation?
    #[must_use]
    pub fn is_operating(&self, ch: ChannelNumber) -> bool {
        self.channel(ch).state != ChannelState::Idle
    }

    /// Channel reset (one channel): clears the control block and its
    /// request bit.  The caller also resets the attached device,
    /// which cancels its pending callback.
    pub fn reset_channel(&mut self, ch: ChannelNumber) {
        self.channel_mut(ch).reset();
        self.clear_request(ch);
    }

    pub fn reset_all(&mut self) {
        for ch in ChannelNumber::all() {
            self.reset_channel(ch);
        }
        self.traps = ChannelTrapControl::default();
    }

    /// Buffer device-originated calls into the control block and mark
    /// the channel for service.
    pub fn apply_calls(&mut self, ch: ChannelNumber, calls: Vec<ChannelCall>) {
        for call in calls {
            let chan = self.channel_mut(ch);
            match call {
                ChannelCall::DeliverRead {
                    word,
                    end_of_record,
                } => {
                    if chan.inbound.is_some() {
                        event!(
                            Level::WARN,
                            "channel {} read overrun; previous word not yet taken",
                            ch
                        );
                    }
                    chan.inbound = Some((word, end_of_record));
                }
                ChannelCall::RequestWrite => {
                    chan.write_request = true;
                }
                ChannelCall::SetFlags(bits) => {
                    chan.flags |= bits;
                }
                ChannelCall::RaiseCondition(bits) => {
                    chan.pending_cond |= bits;
                }
                ChannelCall::Disconnect(flag) => {
                    chan.disconnect_request = Some(flag);
                }
            }
            self.set_request(ch);
        }
    }

    /// Service one channel: run its engine over whatever is buffered.
    pub fn service(
        &mut self,
        ctx: &Context,
        ch: ChannelNumber,
        mem: &mut CoreMemory,
        devices: &mut DeviceManager,
    ) -> Result<(), StopReason> {
        self.clear_request(ch);
        let kind = self.channel(ch).kind;
        match kind {
            ChannelKind::Select => select::service(ctx, self.channel_mut(ch), mem, devices),
            ChannelKind::Command => command::service(ctx, self.channel_mut(ch), mem, devices),
        }
    }

    /// CPU data select (RDS/WRS).
    ///
    /// A data select on a channel already holding one returns the
    /// stall status and leaves the channel untouched; a data select
    /// on a channel busy with a non-data operation is stacked and
    /// retried when the channel next returns toward idle.
    pub fn start_data_select(
        &mut self,
        ch: ChannelNumber,
        direction: Direction,
        unit: u16,
    ) -> IoStatus {
        let selector = match direction {
            Direction::Read => Selector::Read,
            Direction::Write => Selector::Write,
        };
        let number = ch;
        let chan = self.channel_mut(ch);
        let pending = PendingSelect { selector, unit };
        match chan.kind {
            ChannelKind::Command => {
                if chan.state == ChannelState::Executing || chan.connected {
                    return IoStatus::Stall;
                }
                chan.direction = direction;
                chan.unit = unit;
                chan.active_select = Some(pending);
            }
            ChannelKind::Select => {
                if chan.data_select_active() || chan.stacked_data.is_some() {
                    return IoStatus::Stall;
                }
                chan.direction = direction;
                chan.unit = unit;
                if chan.state == ChannelState::Idle {
                    chan.state = ChannelState::PollData;
                    chan.active_select = Some(pending);
                } else {
                    // Non-data operation in progress: stack the data
                    // select for the idle-to-poll transition.
                    chan.stacked_data = Some(pending);
                }
            }
        }
        self.set_request(number);
        IoStatus::Ok
    }

    /// CPU non-data select (BSR/BSF/WEF/REW/RUN/SDN).
    pub fn start_nondata_select(&mut self, ch: ChannelNumber, selector: Selector, unit: u16) -> IoStatus {
        let number = ch;
        let chan = self.channel_mut(ch);
        if chan.kind == ChannelKind::Command {
            // Command-architecture devices are sequenced with CTL
            // orders, not non-data selects.
            return IoStatus::Stop(StopReason::IllegalIoOperation(format!(
                "non-data select on command channel {number}"
            )));
        }
        if chan.nondata_select_active() || chan.stacked_nondata.is_some() {
            return IoStatus::Stall;
        }
        let pending = PendingSelect { selector, unit };
        if chan.state == ChannelState::Idle {
            chan.state = ChannelState::PollNonData;
            chan.active_select = Some(pending);
        } else {
            chan.stacked_nondata = Some(pending);
        }
        self.set_request(number);
        IoStatus::Ok
    }

    /// RCH (reset and load channel) / LCH (load channel, i.e. chain).
    ///
    /// `reset_first` distinguishes RCH from LCH.  For the
    /// poll/select architecture the operand addresses the command
    /// word; for the command architecture it is the start of the
    /// command list.
    pub fn chain(
        &mut self,
        ch: ChannelNumber,
        reset_first: bool,
        operand: Address,
        mem: &CoreMemory,
    ) -> IoStatus {
        let number = ch;
        let chan = self.channel_mut(ch);
        match chan.kind {
            ChannelKind::Command => {
                if !chan.connected && chan.active_select.is_none() {
                    return IoStatus::Stop(StopReason::IllegalIoOperation(format!(
                        "channel {number} started with no select outstanding"
                    )));
                }
                chan.lc = operand;
                chan.copy = None;
                chan.state = ChannelState::Executing;
            }
            ChannelKind::Select => match chan.state {
                ChannelState::Idle | ChannelState::PollNonData | ChannelState::NonDataExec => {
                    return IoStatus::Stop(StopReason::IllegalIoOperation(format!(
                        "channel {number} chained with no data select outstanding"
                    )));
                }
                ChannelState::DataExec if !reset_first => {
                    // LCH must wait for the running command to reach
                    // its chain point.
                    return IoStatus::Stall;
                }
                ChannelState::PollData => {
                    // Device has not accepted the select yet; let the
                    // program retry.
                    return IoStatus::Stall;
                }
                ChannelState::DataWait | ChannelState::DataExec => {
                    let word = mem.read_physical(operand);
                    if let Err(stop) = chan.load_command(word) {
                        return IoStatus::Stop(stop);
                    }
                    chan.lc = operand.succ(ADDR_MASK);
                    chan.state = ChannelState::DataExec;
                }
                ChannelState::Executing => unreachable!("select-kind channel cannot be Executing"),
            },
        }
        self.set_request(number);
        IoStatus::Ok
    }

    /// Evaluate the highest-priority pending channel trap, in fixed
    /// channel-index order.  Does not consult the inhibit flags; the
    /// caller gates on [`ChannelTrapControl::traps_allowed`].
    #[must_use]
    pub fn evaluate_trap(&self) -> Option<(ChannelNumber, u8)> {
        for ch in ChannelNumber::all() {
            let causes = self.channel(ch).flags & self.traps.enabled_causes(ch);
            if causes != 0 {
                return Some((ch, causes));
            }
        }
        None
    }

    /// Take the pending channel trap, if any and if traps are
    /// allowed: clears the taken cause bits and inhibits further
    /// channel traps until RCT.
    pub fn take_trap(&mut self) -> Option<(ChannelNumber, u8)> {
        if !self.traps.traps_allowed() {
            return None;
        }
        let (ch, causes) = self.evaluate_trap()?;
        self.channel_mut(ch).flags &= !causes;
        self.traps.inhibit_until_rct = true;
        event!(Level::DEBUG, "channel {} trap, cause {:o}", ch, causes);
        Some((ch, causes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_select() -> ChannelSet {
        ChannelSet::new([ChannelKind::Select; 8])
    }

    fn chan_b() -> ChannelNumber {
        ChannelNumber::try_from(1).expect("valid channel")
    }

    #[test]
    fn request_bits_set_and_clear() {
        let mut chans = all_select();
        assert!(!chans.any_request());
        chans.set_request(chan_b());
        assert!(chans.has_request(chan_b()));
        assert!(!chans.has_request(ChannelNumber::A));
        chans.clear_request(chan_b());
        assert!(!chans.any_request());
    }

    #[test]
    fn apply_calls_buffers_and_requests_service() {
        let mut chans = all_select();
        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::DeliverRead {
                word: Word::new(0o7),
                end_of_record: false,
            }],
        );
        assert!(chans.has_request(ChannelNumber::A));
        assert_eq!(
            chans.channel(ChannelNumber::A).inbound,
            Some((Word::new(0o7), false))
        );
    }

    #[test]
    fn trap_evaluator_honours_enable_mask_and_priority() {
        let mut chans = all_select();
        // EOF flags on channels B and A; enable EOF for both, check
        // for neither.
        chans.channel_mut(chan_b()).flags |= FLAG_END_OF_FILE;
        chans.channel_mut(ChannelNumber::A).flags |= FLAG_CHECK;
        chans
            .traps
            .set_enable_mask(Word::new(0b11)); // EOF enables for channels A and B
        // Channel A's flag is a check, which is not enabled, so the
        // EOF on B wins despite A's higher priority.
        assert_eq!(chans.evaluate_trap(), Some((chan_b(), FLAG_END_OF_FILE)));
        // Enabling checks flips priority to channel A.
        chans
            .traps
            .set_enable_mask(Word::new(0b11 | (1 << 8)));
        assert_eq!(chans.evaluate_trap(), Some((ChannelNumber::A, FLAG_CHECK)));
    }

    #[test]
    fn taking_a_trap_inhibits_until_rct() {
        let mut chans = all_select();
        chans.channel_mut(ChannelNumber::A).flags |= FLAG_END_OF_FILE;
        chans.traps.set_enable_mask(Word::new(0b1));
        let taken = chans.take_trap();
        assert_eq!(taken, Some((ChannelNumber::A, FLAG_END_OF_FILE)));
        // Cause cleared, further traps held off.
        chans.channel_mut(ChannelNumber::A).flags |= FLAG_END_OF_FILE;
        assert_eq!(chans.take_trap(), None);
        chans.traps.return_from_trap();
        // RCT arms the one-instruction inhibit: not yet.
        assert_eq!(chans.take_trap(), None);
        chans.traps.instruction_boundary();
        chans.traps.instruction_boundary();
        assert_eq!(chans.take_trap(), Some((ChannelNumber::A, FLAG_END_OF_FILE)));
    }

    #[test]
    fn data_select_on_idle_channel_enters_poll_state() {
        let mut chans = all_select();
        let status = chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        assert_eq!(status, IoStatus::Ok);
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::PollData);
        assert!(chans.has_request(ChannelNumber::A));
    }

    #[test]
    fn data_select_on_busy_data_channel_stalls_without_state_change() {
        let mut chans = all_select();
        chans.channel_mut(ChannelNumber::A).state = ChannelState::DataExec;
        let before = chans.channel(ChannelNumber::A).state;
        let status = chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        assert_eq!(status, IoStatus::Stall);
        assert_eq!(chans.channel(ChannelNumber::A).state, before);
        assert!(chans.channel(ChannelNumber::A).stacked_data.is_none());
    }

    #[test]
    fn data_select_stacks_behind_nondata_operation() {
        let mut chans = all_select();
        chans.channel_mut(ChannelNumber::A).state = ChannelState::NonDataExec;
        let status = chans.start_data_select(ChannelNumber::A, Direction::Write, 0o202);
        assert_eq!(status, IoStatus::Ok);
        assert!(chans.channel(ChannelNumber::A).stacked_data.is_some());
        assert_eq!(
            chans.channel(ChannelNumber::A).state,
            ChannelState::NonDataExec
        );
    }

    #[test]
    fn chain_with_nothing_outstanding_is_illegal() {
        let mut chans = all_select();
        let mem = CoreMemory::new(&crate::memory::MemoryConfiguration { dual_banks: false });
        match chans.chain(ChannelNumber::A, true, Address::new(0o100), &mem) {
            IoStatus::Stop(StopReason::IllegalIoOperation(_)) => (),
            other => panic!("expected illegal I/O operation, got {other:?}"),
        }
    }

    #[test]
    fn diagnostic_word_round_trips_command_fields() {
        let mut chan = Channel::new(ChannelNumber::A, ChannelKind::Select);
        chan.load_command(
            Word::ZERO
                .with_prefix(ChanOp::Iorp.prefix())
                .with_decrement(0o144)
                .with_address(0o4321),
        )
        .expect("valid command");
        let diag = chan.diagnostic_word();
        assert_eq!(diag.prefix(), ChanOp::Iorp.prefix());
        assert_eq!(diag.decrement(), 0o144);
        assert_eq!(diag.address_bits(), 0o4321);
    }
}
