//! The command-list channel engine (variant B).
//!
//! This channel runs a small program of its own, fetched from memory
//! at the location counter.  A command word carries its operation in
//! the top six bits (S,1-5), a 12-bit count/mask field in machine
//! bits 6-17 and an address in the address field:
//!
//! | code | op   | effect |
//! | ---- | ---- | ------ |
//! | 04   | TCH  | transfer: location counter <- address |
//! | 05   | TDC  | decrement loop counter and transfer if it was nonzero |
//! | 06   | TCM  | transfer if condition register matches the mask |
//! | 10   | LAR  | assembly register <- memory |
//! | 11   | SAR  | memory <- assembly register |
//! | 12   | SMS  | interrupt mask <- address field |
//! | 14   | LCC  | loop counter <- address field |
//! | 15   | ICC  | insert loop counter into the assembly register |
//! | 20   | SNS  | sense: next delivered word lands in the assembly register |
//! | 24   | CTL  | send the control order at `address` to the device |
//! | 25   | CTLR | CTL, then transfers read from the device |
//! | 26   | CTLW | CTL, then transfers write to the device |
//! | 30   | CPYD | copy `count` words; disconnect at end of record |
//! | 31   | CPYP | copy `count` words; continue across records |
//! | 34   | LIP  | leave interrupt; resume the saved location counter |
//! | 35   | LIPT | leave interrupt and transfer |
//! | 36   | WTR  | wait: stop the command list |
//!
//! Interrupts are buffered: device conditions OR into the pending
//! field; when no interrupt is in service, unmasked pending
//! conditions latch into the condition register, the channel saves
//! {current address, location-counter+1} at its fixed save location
//! and jumps to its fixed vector.  An undefined command raises the
//! sequence-check condition and stops the list.

use tracing::{event, Level};

use base::prelude::*;
use base::ADDR_MASK;

use crate::context::Context;
use crate::io::{DeviceManager, DisconnectFlag, SelectOutcome, Selector, TransferOutcome};
use crate::memory::CoreMemory;
use crate::stop::StopReason;

use super::{
    Channel, ChannelState, CopyMode, Direction, COND_IO_CHECK, COND_SEQUENCE_CHECK, FLAG_CHECK,
    FLAG_END_OF_FILE,
};

/// Commands executed per service pass before the channel program is
/// declared runaway.
const COMMAND_CEILING: u32 = 64;

/// Base of the per-channel interrupt save/vector pairs: channel c
/// saves at 0o42+2c and vectors to 0o43+2c.
const INTERRUPT_BASE: u16 = 0o42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmd {
    Tch,
    Tdc,
    Tcm,
    Lar,
    Sar,
    Sms,
    Lcc,
    Icc,
    Sns,
    Ctl,
    Ctlr,
    Ctlw,
    Cpyd,
    Cpyp,
    Lip,
    Lipt,
    Wtr,
}

fn decode_cmd(word: Word) -> Option<Cmd> {
    let code = (word.bits() >> 30) & 0o77;
    match code {
        0o04 => Some(Cmd::Tch),
        0o05 => Some(Cmd::Tdc),
        0o06 => Some(Cmd::Tcm),
        0o10 => Some(Cmd::Lar),
        0o11 => Some(Cmd::Sar),
        0o12 => Some(Cmd::Sms),
        0o14 => Some(Cmd::Lcc),
        0o15 => Some(Cmd::Icc),
        0o20 => Some(Cmd::Sns),
        0o24 => Some(Cmd::Ctl),
        0o25 => Some(Cmd::Ctlr),
        0o26 => Some(Cmd::Ctlw),
        0o30 => Some(Cmd::Cpyd),
        0o31 => Some(Cmd::Cpyp),
        0o34 => Some(Cmd::Lip),
        0o35 => Some(Cmd::Lipt),
        0o36 => Some(Cmd::Wtr),
        _ => None,
    }
}

/// The count/mask field: machine bits 6-17 (12 bits).
fn count_field(word: Word) -> u16 {
    ((word.bits() >> 18) & 0o7777) as u16
}

/// Build a command word; shared with tests and documentation.
#[must_use]
pub fn command_word(code: u64, count: u16, address: u16) -> Word {
    Word::new(
        ((code & 0o77) << 30) | (u64::from(count & 0o7777) << 18) | u64::from(address & 0o77777),
    )
}

pub(super) fn service(
    ctx: &Context,
    chan: &mut Channel,
    mem: &mut CoreMemory,
    devices: &mut DeviceManager,
) -> Result<(), StopReason> {
    // A select left by RDS/WRS connects the device before anything
    // else happens.
    if !chan.connected {
        if let Some(sel) = chan.active_select {
            match devices.select(ctx, chan.number, sel.selector, sel.unit) {
                SelectOutcome::Ok => {
                    chan.connected = true;
                    chan.unit = sel.unit;
                    chan.active_select = None;
                }
                SelectOutcome::Busy => return Ok(()),
                SelectOutcome::NonexistentUnit => {
                    return Err(StopReason::NonexistentDevice {
                        channel: chan.number,
                    });
                }
                SelectOutcome::Error(message) => {
                    disconnect(chan, Some(DisconnectFlag::ChannelCheck));
                    return Err(StopReason::IoError {
                        channel: chan.number,
                        message,
                    });
                }
            }
        }
    }

    consider_interrupt(chan, mem);

    if chan.sense_pending {
        if let Some((word, _)) = chan.inbound.take() {
            chan.ar = word;
            chan.sense_pending = false;
        }
    }

    if chan.copy.is_some() {
        run_copy(ctx, chan, mem, devices)?;
    }

    // Buffered data was consumed above; only now honour a buffered
    // disconnect, so a final-word-plus-disconnect callback keeps the
    // word.
    if let Some(flag) = chan.disconnect_request.take() {
        disconnect(chan, flag);
    }

    if chan.state == ChannelState::Executing && chan.copy.is_none() && !chan.sense_pending {
        run_commands(ctx, chan, mem, devices)?;
    }
    Ok(())
}

/// Latch unmasked pending conditions and redirect the command list
/// through the channel's interrupt vector.
fn consider_interrupt(chan: &mut Channel, mem: &mut CoreMemory) {
    if chan.in_service {
        return;
    }
    let unmasked = chan.pending_cond & !chan.mask;
    if unmasked == 0 {
        return;
    }
    chan.cond = unmasked;
    chan.pending_cond &= chan.mask;
    let c = chan.number.index() as u16;
    let save = Address::new(INTERRUPT_BASE + 2 * c);
    let vector = Address::new(INTERRUPT_BASE + 1 + 2 * c);
    let resume = chan.lc.succ(ADDR_MASK);
    mem.write_physical(
        save,
        Word::ZERO
            .with_address(chan.ca.bits())
            .with_decrement(resume.bits()),
    );
    chan.clc = chan.lc;
    chan.lc = vector;
    chan.in_service = true;
    chan.state = ChannelState::Executing;
    event!(
        Level::DEBUG,
        "channel {} interrupt, conditions {:o}, vector {:o}",
        chan.number,
        chan.cond,
        vector
    );
}

/// Move words for an active CPYD/CPYP.
fn run_copy(
    ctx: &Context,
    chan: &mut Channel,
    mem: &mut CoreMemory,
    devices: &mut DeviceManager,
) -> Result<(), StopReason> {
    let Some(mode) = chan.copy else {
        return Ok(());
    };
    match chan.direction {
        Direction::Read => {
            if let Some((word, end_of_record)) = chan.inbound.take() {
                if end_of_record {
                    if mode.disconnect_on_eor {
                        disconnect(chan, Some(DisconnectFlag::EndOfFile));
                    }
                    // CPYP continues across the record boundary.
                } else if chan.wc > 0 {
                    mem.write_physical(chan.ca, word);
                    chan.ca = chan.ca.succ(base::PHYS_ADDR_MASK);
                    chan.wc -= 1;
                    if chan.wc == 0 {
                        chan.copy = None;
                    }
                }
            }
        }
        Direction::Write => {
            if chan.write_request && chan.wc > 0 {
                let word = mem.read_physical(chan.ca);
                let last = chan.wc == 1 && mode.disconnect_on_eor;
                match devices.write(ctx, chan.number, word, last) {
                    TransferOutcome::Ok => {
                        chan.write_request = false;
                        chan.ca = chan.ca.succ(base::PHYS_ADDR_MASK);
                        chan.wc -= 1;
                        if chan.wc == 0 {
                            chan.copy = None;
                        }
                    }
                    TransferOutcome::Busy => (),
                    TransferOutcome::Error(message) => {
                        chan.pending_cond |= COND_IO_CHECK;
                        disconnect(chan, Some(DisconnectFlag::ChannelCheck));
                        return Err(StopReason::IoError {
                            channel: chan.number,
                            message,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Run the command list until it blocks (copy, sense, wait) or the
/// per-pass ceiling trips.
fn run_commands(
    ctx: &Context,
    chan: &mut Channel,
    mem: &mut CoreMemory,
    devices: &mut DeviceManager,
) -> Result<(), StopReason> {
    for _ in 0..COMMAND_CEILING {
        if chan.state != ChannelState::Executing || chan.copy.is_some() || chan.sense_pending {
            return Ok(());
        }
        let at = chan.lc;
        let word = mem.read_physical(at);
        chan.lc = chan.lc.succ(ADDR_MASK);
        let address = Address::new(word.address_bits());
        let count = count_field(word);
        let Some(cmd) = decode_cmd(word) else {
            event!(
                Level::WARN,
                "channel {} undefined command {:o} at {:o}",
                chan.number,
                word,
                at
            );
            chan.pending_cond |= COND_SEQUENCE_CHECK;
            chan.state = ChannelState::Idle;
            return Ok(());
        };
        event!(
            Level::TRACE,
            "channel {} {:?} at {:o} (count {:o}, address {:o})",
            chan.number,
            cmd,
            at,
            count,
            address
        );
        match cmd {
            Cmd::Tch => chan.lc = address,
            Cmd::Tdc => {
                if chan.lcc > 0 {
                    chan.lcc -= 1;
                    chan.lc = address;
                }
            }
            Cmd::Tcm => {
                let mask = (count & 0o377) as u8;
                let matched = if mask == 0 {
                    chan.cond == 0
                } else {
                    chan.cond & mask != 0
                };
                if matched {
                    chan.lc = address;
                }
            }
            Cmd::Lar => chan.ar = mem.read_physical(address),
            Cmd::Sar => mem.write_physical(address, chan.ar),
            Cmd::Sms => chan.mask = (address.bits() & 0o377) as u8,
            Cmd::Lcc => chan.lcc = (address.bits() & 0o77) as u8,
            Cmd::Icc => {
                chan.ar = chan
                    .ar
                    .with_address((chan.ar.address_bits() & !0o77) | u16::from(chan.lcc));
            }
            Cmd::Sns => match devices.select(ctx, chan.number, Selector::Sense, chan.unit) {
                SelectOutcome::Ok => chan.sense_pending = true,
                SelectOutcome::Busy => {
                    chan.lc = at;
                    return Ok(());
                }
                SelectOutcome::NonexistentUnit => {
                    return Err(StopReason::NonexistentDevice {
                        channel: chan.number,
                    });
                }
                SelectOutcome::Error(message) => {
                    disconnect(chan, Some(DisconnectFlag::ChannelCheck));
                    return Err(StopReason::IoError {
                        channel: chan.number,
                        message,
                    });
                }
            },
            Cmd::Ctl | Cmd::Ctlr | Cmd::Ctlw => {
                let order = mem.read_physical(address);
                match devices.write(ctx, chan.number, order, true) {
                    TransferOutcome::Ok => match cmd {
                        Cmd::Ctlr => chan.direction = Direction::Read,
                        Cmd::Ctlw => chan.direction = Direction::Write,
                        _ => (),
                    },
                    TransferOutcome::Busy => {
                        chan.lc = at;
                        return Ok(());
                    }
                    TransferOutcome::Error(message) => {
                        chan.pending_cond |= COND_IO_CHECK;
                        disconnect(chan, Some(DisconnectFlag::ChannelCheck));
                        return Err(StopReason::IoError {
                            channel: chan.number,
                            message,
                        });
                    }
                }
            }
            Cmd::Cpyd | Cmd::Cpyp => {
                if count > 0 {
                    chan.wc = count;
                    chan.ca = address;
                    chan.copy = Some(CopyMode {
                        disconnect_on_eor: cmd == Cmd::Cpyd,
                    });
                }
            }
            Cmd::Lip => {
                chan.lc = chan.clc;
                chan.in_service = false;
                chan.cond = 0;
            }
            Cmd::Lipt => {
                chan.lc = address;
                chan.in_service = false;
                chan.cond = 0;
            }
            Cmd::Wtr => {
                chan.state = ChannelState::Idle;
                return Ok(());
            }
        }
    }
    Err(StopReason::IoError {
        channel: chan.number,
        message: "channel command list ran away without blocking".to_string(),
    })
}

/// Return the channel to idle.  End-of-file and check flags feed the
/// CPU channel-trap evaluator like the poll/select architecture's.
fn disconnect(chan: &mut Channel, flag: Option<DisconnectFlag>) {
    match flag {
        Some(DisconnectFlag::EndOfFile) => chan.flags |= FLAG_END_OF_FILE,
        Some(DisconnectFlag::ChannelCheck) => chan.flags |= FLAG_CHECK,
        None => (),
    }
    chan.connected = false;
    chan.active_select = None;
    chan.copy = None;
    chan.sense_pending = false;
    chan.inbound = None;
    chan.write_request = false;
    chan.state = ChannelState::Idle;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::{ChannelKind, ChannelSet, COND_ATTENTION};
    use super::*;
    use crate::io::testing::ScriptedUnit;
    use crate::io::ChannelCall;
    use crate::memory::MemoryConfiguration;
    use crate::stop::IoStatus;

    fn ctx() -> Context {
        Context::new(Duration::from_micros(100), Duration::ZERO)
    }

    fn rig() -> (ChannelSet, CoreMemory, DeviceManager) {
        let chans = ChannelSet::new([ChannelKind::Command; 8]);
        let mem = CoreMemory::new(&MemoryConfiguration { dual_banks: false });
        let mut devices = DeviceManager::new();
        devices.attach(&ctx(), ChannelNumber::A, Box::new(ScriptedUnit::default()));
        (chans, mem, devices)
    }

    fn start(chans: &mut ChannelSet, mem: &mut CoreMemory, devices: &mut DeviceManager, at: u16) {
        assert_eq!(
            chans.start_data_select(ChannelNumber::A, Direction::Read, 0o201),
            IoStatus::Ok
        );
        assert_eq!(
            chans.chain(ChannelNumber::A, true, Address::new(at), mem),
            IoStatus::Ok
        );
        chans
            .service(&ctx(), ChannelNumber::A, mem, devices)
            .expect("service");
    }

    #[test]
    fn command_list_runs_until_wait() {
        let (mut chans, mut mem, mut devices) = rig();
        mem.write_physical(Address::new(0o2000), Word::new(0o123456712345));
        // LAR 2000; SAR 2001; WTR.
        mem.write_physical(Address::new(0o100), command_word(0o10, 0, 0o2000));
        mem.write_physical(Address::new(0o101), command_word(0o11, 0, 0o2001));
        mem.write_physical(Address::new(0o102), command_word(0o36, 0, 0));
        start(&mut chans, &mut mem, &mut devices, 0o100);
        assert_eq!(
            mem.read_physical(Address::new(0o2001)),
            Word::new(0o123456712345)
        );
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);
    }

    #[test]
    fn counted_transfer_loops_with_loop_counter() {
        let (mut chans, mut mem, mut devices) = rig();
        // LCC 2; top: ICC; SAR 3000; TDC top; WTR.  After the loop the
        // assembly register's low bits hold zero and three words were
        // stored.
        mem.write_physical(Address::new(0o100), command_word(0o14, 0, 2));
        mem.write_physical(Address::new(0o101), command_word(0o15, 0, 0));
        mem.write_physical(Address::new(0o102), command_word(0o11, 0, 0o3000));
        mem.write_physical(Address::new(0o103), command_word(0o05, 0, 0o101));
        mem.write_physical(Address::new(0o104), command_word(0o36, 0, 0));
        start(&mut chans, &mut mem, &mut devices, 0o100);
        // First pass stored lcc=2, second 1, third 0 (loop exits).
        assert_eq!(
            mem.read_physical(Address::new(0o3000)).address_bits() & 0o77,
            0
        );
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);
    }

    #[test]
    fn copy_disconnect_stops_at_end_of_record() {
        let (mut chans, mut mem, mut devices) = rig();
        // CPYD 3 words to 4000; WTR (never reached if EOR comes first).
        mem.write_physical(Address::new(0o100), command_word(0o30, 3, 0o4000));
        mem.write_physical(Address::new(0o101), command_word(0o36, 0, 0));
        start(&mut chans, &mut mem, &mut devices, 0o100);
        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::DeliverRead {
                word: Word::new(0o11),
                end_of_record: false,
            }],
        );
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        assert_eq!(mem.read_physical(Address::new(0o4000)), Word::new(0o11));
        // End of record after one word: CPYD disconnects.
        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::DeliverRead {
                word: Word::ZERO,
                end_of_record: true,
            }],
        );
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        let chan = chans.channel(ChannelNumber::A);
        assert_eq!(chan.state, ChannelState::Idle);
        assert_ne!(chan.flags & FLAG_END_OF_FILE, 0);
    }

    #[test]
    fn copy_proceed_resumes_command_list_at_count_end() {
        let (mut chans, mut mem, mut devices) = rig();
        // CPYP 1 word to 4000; SAR 4001; WTR.
        mem.write_physical(Address::new(0o100), command_word(0o31, 1, 0o4000));
        mem.write_physical(Address::new(0o101), command_word(0o11, 0, 0o4001));
        mem.write_physical(Address::new(0o102), command_word(0o36, 0, 0));
        start(&mut chans, &mut mem, &mut devices, 0o100);
        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::DeliverRead {
                word: Word::new(0o77),
                end_of_record: false,
            }],
        );
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        // The copy completed and the list resumed through SAR and WTR.
        assert_eq!(mem.read_physical(Address::new(0o4000)), Word::new(0o77));
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);
    }

    #[test]
    fn interrupt_latches_saves_and_vectors() {
        let (mut chans, mut mem, mut devices) = rig();
        // Main list: WTR at 100.  Interrupt handler at the channel A
        // vector (0o43): LIPT 100.
        mem.write_physical(Address::new(0o100), command_word(0o36, 0, 0));
        mem.write_physical(Address::new(0o43), command_word(0o35, 0, 0o100));
        start(&mut chans, &mut mem, &mut devices, 0o100);
        assert_eq!(chans.channel(ChannelNumber::A).state, ChannelState::Idle);

        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::RaiseCondition(COND_ATTENTION)],
        );
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        // The interrupt ran: the save word was written and the
        // handler's LIPT cleared the in-service state.
        let chan = chans.channel(ChannelNumber::A);
        assert!(!chan.in_service);
        assert_eq!(chan.cond, 0);
        assert_eq!(chan.pending_cond, 0);
        assert_ne!(mem.read_physical(Address::new(0o42)), Word::ZERO);
        // LIPT sent the list back to 100, whose WTR idled the channel.
        assert_eq!(chan.state, ChannelState::Idle);
    }

    #[test]
    fn masked_conditions_do_not_interrupt() {
        let (mut chans, mut mem, mut devices) = rig();
        // SMS with attention masked; WTR.
        mem.write_physical(Address::new(0o100), command_word(0o12, 0, COND_ATTENTION as u16));
        mem.write_physical(Address::new(0o101), command_word(0o36, 0, 0));
        start(&mut chans, &mut mem, &mut devices, 0o100);
        chans.apply_calls(
            ChannelNumber::A,
            vec![ChannelCall::RaiseCondition(COND_ATTENTION)],
        );
        chans
            .service(&ctx(), ChannelNumber::A, &mut mem, &mut devices)
            .expect("service");
        let chan = chans.channel(ChannelNumber::A);
        assert!(!chan.in_service);
        // The condition stays pending until unmasked.
        assert_eq!(chan.pending_cond, COND_ATTENTION);
    }

    #[test]
    fn undefined_command_raises_sequence_check() {
        let (mut chans, mut mem, mut devices) = rig();
        mem.write_physical(Address::new(0o100), command_word(0o77, 0, 0));
        start(&mut chans, &mut mem, &mut devices, 0o100);
        let chan = chans.channel(ChannelNumber::A);
        assert_eq!(chan.state, ChannelState::Idle);
        assert_ne!(chan.pending_cond & COND_SEQUENCE_CHECK, 0);
    }
}
