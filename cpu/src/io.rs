//! The device seam: the narrow contract between the channel engines
//! and the peripheral simulators, and the deferred-callback scheduler
//! that stands in for device timing.
//!
//! Devices never call into the instruction loop or mutate channel
//! state directly.  A device is driven by `select`/`write` calls from
//! its channel and by `poll` callbacks at simulated times it asked
//! for; it communicates back exclusively by returning
//! [`ChannelCall`]s, which the owning channel engine applies.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use tracing::{event, Level};

use base::collections::pq::KeyedReversePriorityQueue;
use base::prelude::*;

use crate::context::Context;

/// What a select asks the device to start doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Read,
    Write,
    Backspace,
    BackspaceFile,
    WriteEndOfFile,
    Rewind,
    RewindUnload,
    SetDensity,
    Sense,
}

impl Selector {
    /// Data selects move words; everything else is a control motion.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Selector::Read | Selector::Write)
    }
}

/// Outcome of a `select` call.  A device that is not ready must
/// return `Busy`, never block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Ok,
    Busy,
    /// The unit address is not one this device answers to.
    NonexistentUnit,
    /// Host-level failure (e.g. backing file unreadable).
    Error(String),
}

/// Outcome of a `write` call (one channel-supplied word).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Ok,
    Busy,
    Error(String),
}

/// Flag accompanying a device-initiated disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectFlag {
    /// End of file / end of device operation.
    EndOfFile,
    /// The device failed mid-operation; the channel records a check.
    ChannelCheck,
}

/// A call from a device to its channel.  The engine applies these in
/// order when it services the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    /// Deliver one read word.  `end_of_record` is sent on its own,
    /// after the final data word of the record.
    DeliverRead { word: Word, end_of_record: bool },
    /// Ask the channel for the next output word (delivered through a
    /// `write` call on the device).
    RequestWrite,
    /// OR bits into the channel's flag register (trap sources).
    SetFlags(u8),
    /// OR device conditions (attention, I/O check, ...) into an
    /// interrupt-capable channel's pending-condition field.
    RaiseCondition(u8),
    /// Disconnect from the channel.
    Disconnect(Option<DisconnectFlag>),
}

/// What a device reports from a `poll` callback.
#[derive(Debug, Default)]
pub struct UnitActivity {
    pub calls: Vec<ChannelCall>,
    /// When the device next wants a callback; `None` means it is
    /// quiescent until selected again.
    pub next_poll: Option<Duration>,
}

/// The device interface.  One implementation per peripheral,
/// registered once at configuration time against its channel.
pub trait Unit {
    fn name(&self) -> String;

    /// Begin or queue an operation.
    fn select(&mut self, ctx: &Context, selector: Selector, unit: u16) -> SelectOutcome;

    /// Accept one channel-supplied word; `end_of_record` marks the
    /// final word (or a control order).
    fn write(&mut self, ctx: &Context, word: Word, end_of_record: bool) -> TransferOutcome;

    /// A deferred callback the device previously scheduled has come
    /// due.  `connected` reports whether the channel still considers
    /// the device connected.
    fn poll(&mut self, ctx: &Context, connected: bool) -> UnitActivity;

    /// Device reset; any in-progress operation is abandoned.
    fn reset(&mut self, ctx: &Context);
}

struct AttachedUnit {
    inner: Box<dyn Unit>,
}

impl Debug for AttachedUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "<unit: {}>", self.inner.name())
    }
}

/// Registry of attached devices, keyed by channel, plus the
/// deferred-callback queue.
///
/// The queue priority is a (due time, schedule sequence) pair:
/// callbacks that come due at the same tick fire in the order they
/// were scheduled, not in channel-priority order.
#[derive(Debug, Default)]
pub struct DeviceManager {
    devices: BTreeMap<ChannelNumber, AttachedUnit>,
    poll_queue: KeyedReversePriorityQueue<ChannelNumber, (Duration, u64)>,
    schedule_seq: u64,
}

impl DeviceManager {
    #[must_use]
    pub fn new() -> DeviceManager {
        DeviceManager::default()
    }

    fn schedule(&mut self, channel: ChannelNumber, when: Duration) {
        let seq = self.schedule_seq;
        self.schedule_seq += 1;
        self.poll_queue.push(channel, (when, seq));
    }

    /// Attach a device to a channel.  Registration happens once, at
    /// configuration time.
    pub fn attach(&mut self, ctx: &Context, channel: ChannelNumber, mut unit: Box<dyn Unit>) {
        let activity = unit.poll(ctx, false);
        if let Some(when) = activity.next_poll {
            self.schedule(channel, when);
        }
        event!(Level::DEBUG, "attached {} to channel {}", unit.name(), channel);
        self.devices.insert(channel, AttachedUnit { inner: unit });
    }

    #[must_use]
    pub fn is_attached(&self, channel: ChannelNumber) -> bool {
        self.devices.contains_key(&channel)
    }

    /// Forward a select to the channel's device.  A successful select
    /// schedules an immediate poll so the device can start producing
    /// work.
    pub fn select(
        &mut self,
        ctx: &Context,
        channel: ChannelNumber,
        selector: Selector,
        unit: u16,
    ) -> SelectOutcome {
        match self.devices.get_mut(&channel) {
            None => SelectOutcome::NonexistentUnit,
            Some(attached) => {
                let outcome = attached.inner.select(ctx, selector, unit);
                if outcome == SelectOutcome::Ok {
                    self.schedule(channel, ctx.simulated_time);
                }
                outcome
            }
        }
    }

    /// Forward one output word to the channel's device.
    pub fn write(
        &mut self,
        ctx: &Context,
        channel: ChannelNumber,
        word: Word,
        end_of_record: bool,
    ) -> TransferOutcome {
        match self.devices.get_mut(&channel) {
            None => TransferOutcome::Error(format!("no device attached to channel {channel}")),
            Some(attached) => {
                let outcome = attached.inner.write(ctx, word, end_of_record);
                if outcome == TransferOutcome::Ok {
                    self.schedule(channel, ctx.simulated_time);
                }
                outcome
            }
        }
    }

    /// The next time any device wants a callback.
    #[must_use]
    pub fn next_poll_due(&self) -> Option<Duration> {
        self.poll_queue.peek().map(|(_, (when, _))| *when)
    }

    /// Fire every callback due at or before the current simulated
    /// time, in schedule order.  Returns the channel calls each
    /// device produced, for the caller to apply to the channels.
    pub fn poll_due<F>(
        &mut self,
        ctx: &Context,
        mut is_connected: F,
    ) -> Vec<(ChannelNumber, UnitActivity)>
    where
        F: FnMut(ChannelNumber) -> bool,
    {
        let mut fired = Vec::new();
        while let Some((&channel, &(when, _))) = self.poll_queue.peek() {
            if when > ctx.simulated_time {
                break;
            }
            let (channel, _) = self
                .poll_queue
                .pop()
                .expect("peek just returned an entry");
            let Some(attached) = self.devices.get_mut(&channel) else {
                event!(
                    Level::WARN,
                    "channel {} is in the poll queue but has no device; dropping",
                    channel
                );
                continue;
            };
            let activity = attached.inner.poll(ctx, is_connected(channel));
            if let Some(next) = activity.next_poll {
                self.schedule(channel, next);
            }
            fired.push((channel, activity));
        }
        fired
    }

    /// Reset one device, synchronously cancelling its pending
    /// callback.
    pub fn reset(&mut self, ctx: &Context, channel: ChannelNumber) {
        if let Some(attached) = self.devices.get_mut(&channel) {
            attached.inner.reset(ctx);
        }
        self.poll_queue.remove(&channel);
    }

    pub fn reset_all(&mut self, ctx: &Context) {
        for (_, attached) in self.devices.iter_mut() {
            attached.inner.reset(ctx);
        }
        while self.poll_queue.pop().is_some() {}
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scriptable device for exercising the channel engines.

    use super::*;

    /// A stub device that answers selects per a canned script and
    /// emits canned channel calls from its polls.
    #[derive(Default)]
    pub(crate) struct ScriptedUnit {
        pub selects: Vec<(Selector, u16)>,
        pub writes: Vec<(Word, bool)>,
        pub select_responses: Vec<SelectOutcome>,
        pub poll_script: Vec<UnitActivity>,
        pub resets: usize,
    }

    impl Unit for ScriptedUnit {
        fn name(&self) -> String {
            "scripted test unit".to_string()
        }

        fn select(&mut self, _ctx: &Context, selector: Selector, unit: u16) -> SelectOutcome {
            self.selects.push((selector, unit));
            if self.select_responses.is_empty() {
                SelectOutcome::Ok
            } else {
                self.select_responses.remove(0)
            }
        }

        fn write(&mut self, _ctx: &Context, word: Word, end_of_record: bool) -> TransferOutcome {
            self.writes.push((word, end_of_record));
            TransferOutcome::Ok
        }

        fn poll(&mut self, _ctx: &Context, _connected: bool) -> UnitActivity {
            if self.poll_script.is_empty() {
                UnitActivity::default()
            } else {
                self.poll_script.remove(0)
            }
        }

        fn reset(&mut self, _ctx: &Context) {
            self.resets += 1;
        }
    }
}
