//! The poll/select channel engine (variant A).
//!
//! State machine per channel:
//!
//! ```text
//!        RDS/WRS             device accepts          RCH/LCH
//! Idle ----------> PollData ---------------> DataWait -------> DataExec
//!   \-- BSR/WEF/... -> PollNonData -> NonDataExec
//! ```
//!
//! Disconnection always returns the channel to Idle, or to the
//! opposite poll state when a select of the other kind was stacked
//! while the channel was busy.
//!
//! The engine is driven entirely by `service`: the instruction loop
//! calls it for every channel whose request bit is set, and the
//! request bit is set by buffered device calls and by the CPU's
//! select/chain instructions.

use tracing::{event, Level};

use base::prelude::*;
use base::{ADDR_MASK, PHYS_ADDR_MASK};

use crate::context::Context;
use crate::io::{DeviceManager, DisconnectFlag, SelectOutcome, TransferOutcome};
use crate::memory::CoreMemory;
use crate::stop::StopReason;

use super::{Channel, ChanOp, ChannelState, Direction, FLAG_CHECK, FLAG_END_OF_FILE};

/// Ceiling on zero-count command chaining within one service pass; a
/// channel program that proceeds forever without transferring a word
/// is broken.
const CHAIN_CEILING: u32 = 64;

pub(super) fn service(
    ctx: &Context,
    chan: &mut Channel,
    mem: &mut CoreMemory,
    devices: &mut DeviceManager,
) -> Result<(), StopReason> {
    if matches!(chan.state, ChannelState::PollData | ChannelState::PollNonData) {
        try_select(ctx, chan, devices)?;
    }

    // Buffered data is consumed before a buffered disconnect: a
    // device that delivers its final word and disconnects in the same
    // callback must not lose the word.
    if chan.state == ChannelState::DataExec {
        if chan.direction == Direction::Read {
            process_inbound(chan, mem)?;
        } else {
            process_write_request(ctx, chan, mem, devices)?;
        }
    } else if chan.inbound.is_some() && chan.state == ChannelState::Idle {
        // Data arriving for a disconnected channel is dropped.
        event!(
            Level::WARN,
            "channel {} dropped a word delivered while idle",
            chan.number
        );
        chan.inbound = None;
    }

    if let Some(flag) = chan.disconnect_request.take() {
        disconnect(chan, flag);
        // The disconnect may have promoted a stacked select into a
        // poll state; give it its first try straight away.
        if matches!(chan.state, ChannelState::PollData | ChannelState::PollNonData) {
            try_select(ctx, chan, devices)?;
        }
    }
    Ok(())
}

/// Retry the active select against the device.  `Busy` leaves the
/// channel in its poll state; the retry happens on the next service,
/// which the device's own completion calls will trigger.
fn try_select(
    ctx: &Context,
    chan: &mut Channel,
    devices: &mut DeviceManager,
) -> Result<(), StopReason> {
    let Some(sel) = chan.active_select else {
        event!(
            Level::WARN,
            "channel {} is polling with no select recorded; returning it to idle",
            chan.number
        );
        chan.state = ChannelState::Idle;
        return Ok(());
    };
    match devices.select(ctx, chan.number, sel.selector, sel.unit) {
        SelectOutcome::Ok => {
            chan.connected = true;
            chan.unit = sel.unit;
            chan.state = match chan.state {
                ChannelState::PollData => ChannelState::DataWait,
                _ => ChannelState::NonDataExec,
            };
            event!(
                Level::DEBUG,
                "channel {} select accepted, now {:?}",
                chan.number,
                chan.state
            );
            Ok(())
        }
        SelectOutcome::Busy => Ok(()),
        SelectOutcome::NonexistentUnit => Err(StopReason::NonexistentDevice {
            channel: chan.number,
        }),
        SelectOutcome::Error(message) => {
            disconnect(chan, Some(DisconnectFlag::ChannelCheck));
            Err(StopReason::IoError {
                channel: chan.number,
                message,
            })
        }
    }
}

/// Consume one buffered read word (or end-of-record) per the running
/// command.
fn process_inbound(chan: &mut Channel, mem: &mut CoreMemory) -> Result<(), StopReason> {
    let Some((word, end_of_record)) = chan.inbound.take() else {
        return Ok(());
    };
    if end_of_record {
        match chan.op {
            ChanOp::Iorp => next_command(chan, mem)?,
            ChanOp::Iort => chan.state = ChannelState::DataWait,
            _ => disconnect(chan, None),
        }
        return Ok(());
    }
    if chan.wc == 0 {
        // Over-delivery; the command already completed.
        event!(
            Level::WARN,
            "channel {} discarded a word beyond the command count",
            chan.number
        );
        return Ok(());
    }
    if chan.op.stores() {
        mem.write_physical(chan.ca, word);
        chan.ca = chan.ca.succ(PHYS_ADDR_MASK);
    }
    chan.wc -= 1;
    if chan.wc == 0 {
        end_of_count(chan, mem)?;
    }
    Ok(())
}

/// Feed the device one output word per the running command.
fn process_write_request(
    ctx: &Context,
    chan: &mut Channel,
    mem: &mut CoreMemory,
    devices: &mut DeviceManager,
) -> Result<(), StopReason> {
    if !chan.write_request {
        return Ok(());
    }
    if chan.wc == 0 {
        chan.write_request = false;
        return Ok(());
    }
    let word = if chan.op.stores() {
        mem.read_physical(chan.ca)
    } else {
        Word::ZERO
    };
    let last = chan.wc == 1 && chan.op == ChanOp::Iocd;
    match devices.write(ctx, chan.number, word, last) {
        TransferOutcome::Ok => {
            chan.write_request = false;
            if chan.op.stores() {
                chan.ca = chan.ca.succ(PHYS_ADDR_MASK);
            }
            chan.wc -= 1;
            if chan.wc == 0 {
                end_of_count(chan, mem)?;
            }
            Ok(())
        }
        TransferOutcome::Busy => Ok(()), // retried on the next service
        TransferOutcome::Error(message) => {
            disconnect(chan, Some(DisconnectFlag::ChannelCheck));
            Err(StopReason::IoError {
                channel: chan.number,
                message,
            })
        }
    }
}

/// The running command's word count reached zero.
fn end_of_count(chan: &mut Channel, mem: &mut CoreMemory) -> Result<(), StopReason> {
    match chan.op {
        ChanOp::Iocd => {
            disconnect(chan, None);
            Ok(())
        }
        ChanOp::Iocp | ChanOp::Iorp | ChanOp::Iosp => next_command(chan, mem),
        ChanOp::Ioct | ChanOp::Iort => {
            chan.state = ChannelState::DataWait;
            Ok(())
        }
    }
}

/// Fetch the next command word at the location counter, chaining past
/// zero-count proceed commands (bounded).
fn next_command(chan: &mut Channel, mem: &mut CoreMemory) -> Result<(), StopReason> {
    for _ in 0..CHAIN_CEILING {
        let word = mem.read_physical(chan.lc);
        chan.lc = chan.lc.succ(ADDR_MASK);
        chan.load_command(word)?;
        event!(
            Level::TRACE,
            "channel {} command {:?} wc={:o} ca={:o}",
            chan.number,
            chan.op,
            chan.wc,
            chan.ca
        );
        if chan.wc > 0 {
            chan.state = ChannelState::DataExec;
            return Ok(());
        }
        match chan.op {
            ChanOp::Iocd => {
                disconnect(chan, None);
                return Ok(());
            }
            ChanOp::Ioct | ChanOp::Iort => {
                chan.state = ChannelState::DataWait;
                return Ok(());
            }
            ChanOp::Iocp | ChanOp::Iorp | ChanOp::Iosp => (), // chain again
        }
    }
    Err(StopReason::IoError {
        channel: chan.number,
        message: "channel program chained endlessly without transferring data".to_string(),
    })
}

/// Disconnect: back to Idle, or to the opposite poll state when a
/// select of the other kind was stacked.
pub(super) fn disconnect(chan: &mut Channel, flag: Option<DisconnectFlag>) {
    match flag {
        Some(DisconnectFlag::EndOfFile) => chan.flags |= FLAG_END_OF_FILE,
        Some(DisconnectFlag::ChannelCheck) => chan.flags |= FLAG_CHECK,
        None => (),
    }
    let was_data = chan.data_select_active();
    chan.connected = false;
    chan.active_select = None;
    chan.inbound = None;
    chan.write_request = false;
    chan.state = ChannelState::Idle;
    if was_data {
        if let Some(sel) = chan.stacked_nondata.take() {
            chan.state = ChannelState::PollNonData;
            chan.active_select = Some(sel);
        }
    } else if let Some(sel) = chan.stacked_data.take() {
        chan.state = ChannelState::PollData;
        chan.active_select = Some(sel);
    }
    event!(
        Level::DEBUG,
        "channel {} disconnected (flag {:?}), now {:?}",
        chan.number,
        flag,
        chan.state
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::{ChannelKind, ChannelSet};
    use super::*;
    use crate::io::testing::ScriptedUnit;
    use crate::io::{ChannelCall, Selector};
    use crate::memory::MemoryConfiguration;
    use crate::stop::IoStatus;

    fn ctx() -> Context {
        Context::new(Duration::from_micros(100), Duration::ZERO)
    }

    fn rig() -> (ChannelSet, CoreMemory, DeviceManager) {
        let chans = ChannelSet::new([ChannelKind::Select; 8]);
        let mem = CoreMemory::new(&MemoryConfiguration { dual_banks: false });
        let devices = DeviceManager::new();
        (chans, mem, devices)
    }

    fn attach_ok_unit(devices: &mut DeviceManager) {
        devices.attach(&ctx(), ChannelNumber::A, Box::new(ScriptedUnit::default()));
    }

    fn command_word(op: ChanOp, wc: u16, ca: u16) -> Word {
        Word::ZERO
            .with_prefix(op.prefix())
            .with_decrement(wc)
            .with_address(ca)
    }

    fn deliver(chans: &mut ChannelSet, word: u64, eor: bool) {
        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::DeliverRead {
                word: Word::new(word),
                end_of_record: eor,
            }],
        );
    }

    #[test]
    fn read_select_transfers_words_to_memory_and_disconnects() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        mem.write_physical(Address::new(0o200), command_word(ChanOp::Iocd, 2, 0o1000));

        assert_eq!(
            chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201),
            IoStatus::Ok
        );
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::DataWait);

        assert_eq!(
            chans.chain(ChannelNumber::A, true, Address::new(0o200), &mem),
            IoStatus::Ok
        );
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::DataExec);

        deliver(&mut chans, 0o111, false);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        deliver(&mut chans, 0o222, false);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");

        assert_eq!(mem.read_physical(Address::new(0o1000)), Word::new(0o111));
        assert_eq!(mem.read_physical(Address::new(0o1001)), Word::new(0o222));
        // IOCD at count end: channel is idle again.
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);
        assert!(!chans.channel(ChannelNumber::A).connected);
    }

    #[test]
    fn record_command_proceeds_on_end_of_record() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        mem.write_physical(Address::new(0o200), command_word(ChanOp::Iorp, 10, 0o1000));
        mem.write_physical(Address::new(0o201), command_word(ChanOp::Iocd, 1, 0o2000));

        chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        chans.chain(ChannelNumber::A, true, Address::new(0o200), &mem);

        deliver(&mut chans, 0o111, false);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        // Short record: end-of-record arrives with nine words unread.
        deliver(&mut chans, 0, true);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        // IORP proceeded to the next command word.
        let chan = chans.channel(ChannelNumber::A);
        assert_eq!(chan.state, ChannelState::DataExec);
        assert_eq!(chan.op, ChanOp::Iocd);
        assert_eq!(chan.wc, 1);
        assert_eq!(chan.ca, Address::new(0o2000));
    }

    #[test]
    fn nonrecord_command_disconnects_on_end_of_record() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        mem.write_physical(Address::new(0o200), command_word(ChanOp::Iocp, 5, 0o1000));
        chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        chans.chain(ChannelNumber::A, true, Address::new(0o200), &mem);
        deliver(&mut chans, 0, true);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);
    }

    #[test]
    fn chain_wait_command_parks_channel_until_lch() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        mem.write_physical(Address::new(0o200), command_word(ChanOp::Ioct, 1, 0o1000));
        mem.write_physical(Address::new(0o300), command_word(ChanOp::Iocd, 1, 0o2000));
        chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        chans.chain(ChannelNumber::A, true, Address::new(0o200), &mem);
        deliver(&mut chans, 0o333, false);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        // IOCT at count end waits for an explicit chain.
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::DataWait);
        assert_eq!(
            chans.chain(ChannelNumber::A, false, Address::new(0o300), &mem),
            IoStatus::Ok
        );
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::DataExec);
        assert_eq!(chans.channel(ChannelNumber::A).ca, Address::new(0o2000));
    }

    #[test]
    fn lch_during_transfer_stalls() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        mem.write_physical(Address::new(0o200), command_word(ChanOp::Iocd, 4, 0o1000));
        chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        chans.chain(ChannelNumber::A, true, Address::new(0o200), &mem);
        assert_eq!(
            chans.chain(ChannelNumber::A, false, Address::new(0o200), &mem),
            IoStatus::Stall
        );
    }

    #[test]
    fn write_select_feeds_device_from_memory() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        mem.write_physical(Address::new(0o200), command_word(ChanOp::Iocd, 2, 0o1000));
        mem.write_physical(Address::new(0o1000), Word::new(0o111));
        mem.write_physical(Address::new(0o1001), Word::new(0o222));

        chans.start_data_select(ChannelNumber::A, Direction::Write, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        chans.chain(ChannelNumber::A, true, Address::new(0o200), &mem);

        for _ in 0..2 {
            chans.apply_calls(ChannelNumber::A, vec![ChannelCall::RequestWrite]);
            chans
                .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
                .expect("service");
        }
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);
    }

    #[test]
    fn busy_device_keeps_channel_polling() {
        let (mut chans, mut mem, mut devices) = rig();
        let unit = ScriptedUnit {
            select_responses: vec![SelectOutcome::Busy, SelectOutcome::Ok],
            ..ScriptedUnit::default()
        };
        devices.attach(&ctx(), ChannelNumber::A, Box::new(unit));
        chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::PollData);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::DataWait);
    }

    #[test]
    fn disconnect_restacks_opposite_select() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        // Non-data operation in progress...
        chans.start_nondata_select(ChannelNumber::A, Selector::Rewind, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        assert_eq!(
            chans.channel(ChannelNumber::A).state,
            ChannelState::NonDataExec
        );
        // ...a data select stacks behind it...
        assert_eq!(
            chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201),
            IoStatus::Ok
        );
        // ...and the rewind completing moves the channel to the data
        // poll state, not to idle.
        chans.apply_calls(ChannelNumber::A, vec![ChannelCall::Disconnect(None)]);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        // The service pass that handled the disconnect also retried
        // the stacked select, which the device accepted.
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::DataWait);
    }

    #[test]
    fn end_of_file_disconnect_raises_trap_flag() {
        let (mut chans, mut mem, mut devices) = rig();
        attach_ok_unit(&mut devices);
        chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201);
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::Disconnect(Some(DisconnectFlag::EndOfFile))],
        );
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        assert_ne!(chans.channel(ChannelNumber::A).flags & FLAG_END_OF_FILE, 0);
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);
    }
}
