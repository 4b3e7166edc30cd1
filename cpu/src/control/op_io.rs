//! The channel-class instructions: selects, chains, channel store and
//! channel tests.
//!
//! The effective address of a select encodes the target: bits 21-26
//! (the high six bits of the address field, i.e. `address >> 9`) hold
//! the channel number plus one, and the low nine bits the unit within
//! the channel.  Channel field zero, or one beyond the fitted
//! channels, stops the run with a nonexistent-channel reason.
//!
//! A stall returned by the channel layer propagates out as
//! `Flow::Stall`, which backs the program counter up so the select is
//! retried on the next loop iteration.

use base::prelude::*;

use crate::chan::{ChannelSet, Direction};
use crate::io::Selector;
use crate::memory::CoreMemory;
use crate::stop::{IoStatus, StopReason};

use super::trap::TrapKind;
use super::{Cpu, Flow, OpError, OpResult};

impl Cpu {
    fn channel_and_unit(ea: Address) -> Result<(ChannelNumber, u16), StopReason> {
        let field = ea.bits() >> 9;
        if field == 0 || field > base::NUM_CHANNELS as u16 {
            return Err(StopReason::NonexistentChannel(field));
        }
        let channel =
            ChannelNumber::try_from((field - 1) as u8).expect("field range checked above");
        Ok((channel, ea.bits() & 0o777))
    }

    fn map_io(status: IoStatus) -> OpResult {
        match status {
            IoStatus::Ok => Ok(Flow::Next),
            IoStatus::Stall => Ok(Flow::Stall),
            IoStatus::Stop(stop) => Err(OpError::Stop(stop)),
        }
    }

    pub(super) fn op_data_select(
        &mut self,
        mem: &mut CoreMemory,
        chans: &mut ChannelSet,
        ea: Address,
        direction: Direction,
    ) -> OpResult {
        if self.regs.select_trap {
            self.fire_trap(mem, TrapKind::Select);
            return Err(OpError::Trapped);
        }
        let (channel, unit) = Self::channel_and_unit(ea)?;
        Self::map_io(chans.start_data_select(channel, direction, unit))
    }

    pub(super) fn op_nondata_select(
        &mut self,
        mem: &mut CoreMemory,
        chans: &mut ChannelSet,
        ea: Address,
        selector: Selector,
    ) -> OpResult {
        if self.regs.select_trap {
            self.fire_trap(mem, TrapKind::Select);
            return Err(OpError::Trapped);
        }
        let (channel, unit) = Self::channel_and_unit(ea)?;
        Self::map_io(chans.start_nondata_select(channel, selector, unit))
    }

    pub(super) fn op_chain(
        &mut self,
        chans: &mut ChannelSet,
        mem: &mut CoreMemory,
        channel: ChannelNumber,
        reset_first: bool,
        ea: Address,
    ) -> OpResult {
        Self::map_io(chans.chain(channel, reset_first, ea, mem))
    }

    /// SCH: store the channel's diagnostic word.
    pub(super) fn op_sch(
        &mut self,
        mem: &mut CoreMemory,
        chans: &ChannelSet,
        channel: ChannelNumber,
        ea: Address,
    ) -> OpResult {
        let word = chans.channel(channel).diagnostic_word();
        self.write_data(mem, ea, word)?;
        Ok(Flow::Next)
    }

    /// TCO: transfer while the channel is in operation.
    pub(super) fn op_tco(
        &mut self,
        mem: &mut CoreMemory,
        chans: &ChannelSet,
        channel: ChannelNumber,
        ea: Address,
    ) -> OpResult {
        if chans.is_operating(channel) {
            self.branch_to(mem, ea)
        } else {
            Ok(Flow::Next)
        }
    }

    /// TCN: transfer while the channel is not in operation.
    pub(super) fn op_tcn(
        &mut self,
        mem: &mut CoreMemory,
        chans: &ChannelSet,
        channel: ChannelNumber,
        ea: Address,
    ) -> OpResult {
        if chans.is_operating(channel) {
            Ok(Flow::Next)
        } else {
            self.branch_to(mem, ea)
        }
    }
}
