//! The assembled machine: CPU, core storage, channels and devices,
//! plus the run loop that orders them.
//!
//! Each run-loop iteration:
//!
//! 1. honours an external stop request or an exhausted instruction
//!    budget,
//! 2. drains the deferred device callbacks that have come due at the
//!    current simulated time (the only suspension point in the
//!    system),
//! 3. services every channel whose request bit is set, in fixed
//!    channel-index order, re-evaluating channel traps as it goes (a
//!    channel-engine error unwinds immediately),
//! 4. redirects through a pending channel trap *before* the next
//!    fetch — the interrupted instruction is not re-fetched,
//! 5. fetches, decodes and executes one instruction.
//!
//! Halt-class instructions do not stop immediately while channel
//! activity is outstanding: the loop drains channel events (bounded)
//! until all channels go idle, and a channel trap becoming pending
//! during the wait cancels the halt entirely.

use std::time::Duration;

use tracing::{event, span, Level};

use base::prelude::*;

use crate::chan::{ChannelKind, ChannelSet};
use crate::clock::{BasicClock, Clock};
use crate::context::Context;
use crate::control::{Cpu, CpuConfiguration, ExecOutcome};
use crate::io::{DeviceManager, Unit};
use crate::memory::{CoreMemory, MemoryConfiguration};
use crate::stop::StopReason;

/// Iteration ceiling for the halt-time channel drain; a channel that
/// stays busy this long is broken.
const HALT_DRAIN_CEILING: u32 = 1_000_000;

pub struct SystemConfiguration {
    pub memory: MemoryConfiguration,
    pub cpu: CpuConfiguration,
    pub channels: [ChannelKind; base::NUM_CHANNELS],
}

impl Default for SystemConfiguration {
    fn default() -> SystemConfiguration {
        SystemConfiguration {
            memory: MemoryConfiguration { dual_banks: false },
            cpu: CpuConfiguration::default(),
            channels: [ChannelKind::Select; base::NUM_CHANNELS],
        }
    }
}

enum DrainOutcome {
    Idle,
    TrapPending,
    Failed(StopReason),
}

/// The whole simulated machine.
pub struct System {
    cpu: Cpu,
    mem: CoreMemory,
    chans: ChannelSet,
    devices: DeviceManager,
    clock: BasicClock,
    stop_requested: bool,
}

impl System {
    #[must_use]
    pub fn new(config: &SystemConfiguration) -> System {
        System {
            cpu: Cpu::new(CpuConfiguration {
                xec_limit: config.cpu.xec_limit,
                history_capacity: config.cpu.history_capacity,
                instruction_time: config.cpu.instruction_time,
            }),
            mem: CoreMemory::new(&config.memory),
            chans: ChannelSet::new(config.channels),
            devices: DeviceManager::new(),
            clock: BasicClock::new(),
            stop_requested: false,
        }
    }

    fn context(&self) -> Context {
        Context::new(self.clock.now(), self.clock.now())
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    #[must_use]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelSet {
        &self.chans
    }

    /// Mutable channel access for the operator surface (trap-enable
    /// poking, state inspection); programs use ENB and the channel
    /// instructions instead.
    pub fn channels_mut(&mut self) -> &mut ChannelSet {
        &mut self.chans
    }

    /// Register a device against a channel; configuration-time only.
    pub fn attach_device(&mut self, channel: ChannelNumber, unit: Box<dyn Unit>) {
        let ctx = self.context();
        self.devices.attach(&ctx, channel, unit);
    }

    /// Ask the run loop to stop at the next iteration boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    // The loader/display contract: raw word access, no checks.

    pub fn load_word(&mut self, addr: Address, word: Word) {
        self.mem.write_physical(addr, word);
    }

    #[must_use]
    pub fn read_word(&self, addr: Address) -> Word {
        self.mem.read_physical(addr)
    }

    /// Master reset: registers, channels and devices (pending device
    /// callbacks are cancelled).  Memory is preserved.
    pub fn master_reset(&mut self) {
        let ctx = self.context();
        self.cpu.reset();
        self.chans.reset_all();
        self.devices.reset_all(&ctx);
    }

    /// Reset a single channel and its device, synchronously
    /// cancelling the device's pending callback.
    pub fn reset_channel(&mut self, channel: ChannelNumber) {
        let ctx = self.context();
        self.chans.reset_channel(channel);
        self.devices.reset(&ctx, channel);
    }

    /// Execute until a stop condition or until `max_instructions`
    /// have run.
    pub fn run(&mut self, max_instructions: u64) -> StopReason {
        let run_span = span!(Level::DEBUG, "run");
        let _enter = run_span.enter();
        let mut executed: u64 = 0;
        loop {
            if self.stop_requested {
                self.stop_requested = false;
                return StopReason::OperatorStop;
            }
            if executed >= max_instructions {
                return StopReason::LimitReached;
            }

            self.fire_due_callbacks();

            let ctx = self.context();
            for ch in ChannelNumber::all() {
                if self.chans.has_request(ch) {
                    if let Err(stop) =
                        self.chans.service(&ctx, ch, &mut self.mem, &mut self.devices)
                    {
                        event!(Level::INFO, "channel {} stopped the run: {}", ch, stop);
                        return stop;
                    }
                    // Channel traps are re-evaluated lazily: the next
                    // take_channel_trap sees this channel's flags.
                }
            }

            if self.cpu.take_channel_trap(&mut self.mem, &mut self.chans) {
                continue;
            }

            match self.cpu.execute_one(&mut self.mem, &mut self.chans) {
                Ok(ExecOutcome::Continue) => {
                    executed += 1;
                    let dt = self.cpu.instruction_time();
                    self.clock.consume(&dt);
                }
                Ok(ExecOutcome::Halted { resume }) => {
                    executed += 1;
                    match self.drain_channels_for_halt() {
                        DrainOutcome::Idle => {
                            self.cpu.regs.ic = resume;
                            event!(Level::INFO, "halted; resume address {:o}", resume);
                            return StopReason::Halted { resume };
                        }
                        DrainOutcome::TrapPending => {
                            // Halt cancelled: the trap redirect at the
                            // top of the loop wins, and the handler
                            // returns to the halt's resume address.
                            self.cpu.regs.ic = resume;
                        }
                        DrainOutcome::Failed(stop) => return stop,
                    }
                }
                Err(stop) => {
                    event!(Level::INFO, "run stopped: {}", stop);
                    return stop;
                }
            }
        }
    }

    /// Drain deferred device callbacks due at or before now, applying
    /// their channel calls.
    fn fire_due_callbacks(&mut self) {
        let ctx = self.context();
        if self
            .devices
            .next_poll_due()
            .is_none_or(|due| due > ctx.simulated_time)
        {
            return;
        }
        let chans = &self.chans;
        let fired = self
            .devices
            .poll_due(&ctx, |c| chans.channel(c).connected);
        for (ch, activity) in fired {
            self.chans.apply_calls(ch, activity.calls);
        }
    }

    /// The halt-time busy-wait: keep the channels moving until they
    /// all go idle, a channel trap becomes pending, or the ceiling
    /// trips.
    fn drain_channels_for_halt(&mut self) -> DrainOutcome {
        for _ in 0..HALT_DRAIN_CEILING {
            if !self.chans.any_busy() && !self.chans.any_request() {
                return DrainOutcome::Idle;
            }
            if self.chans.traps.traps_allowed() && self.chans.evaluate_trap().is_some() {
                return DrainOutcome::TrapPending;
            }
            self.fire_due_callbacks();
            let ctx = self.context();
            for ch in ChannelNumber::all() {
                if self.chans.has_request(ch) {
                    if let Err(stop) =
                        self.chans.service(&ctx, ch, &mut self.mem, &mut self.devices)
                    {
                        return DrainOutcome::Failed(stop);
                    }
                }
            }
            // Advance simulated time to the next device event, or by
            // a nominal tick when none is scheduled.
            let step = match self.devices.next_poll_due() {
                Some(due) if due > self.clock.now() => due - self.clock.now(),
                _ => Duration::from_micros(1),
            };
            self.clock.consume(&step);
        }
        let broken = ChannelNumber::all()
            .into_iter()
            .find(|c| self.chans.channel(*c).is_busy())
            .unwrap_or(ChannelNumber::A);
        DrainOutcome::Failed(StopReason::IoError {
            channel: broken,
            message: "channel failed to go idle while draining for a halt".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::ChannelState;
    use crate::io::testing::ScriptedUnit;
    use crate::io::{ChannelCall, UnitActivity};

    fn assemble(words: &[(u16, u64)], sys: &mut System) {
        for (addr, bits) in words {
            sys.load_word(Address::new(*addr), Word::new(*bits));
        }
    }

    #[test]
    fn straight_line_program_halts() {
        let mut sys = System::new(&SystemConfiguration::default());
        assemble(
            &[
                (0o100, 0o0500_00_0_00200), // CLA 200
                (0o101, 0o0400_00_0_00201), // ADD 201
                (0o102, 0o0601_00_0_00202), // STO 202
                (0o103, 0o0420_00_0_00000), // HPR
                (0o200, 5),
                (0o201, 7),
            ],
            &mut sys,
        );
        sys.cpu_mut().regs.ic = Address::new(0o100);
        let stop = sys.run(100);
        assert_eq!(
            stop,
            StopReason::Halted {
                resume: Address::new(0o104)
            }
        );
        assert_eq!(sys.read_word(Address::new(0o202)), Word::new(12));
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        let mut sys = System::new(&SystemConfiguration::default());
        // TRA to self: an infinite loop.
        assemble(&[(0o100, 0o0020_00_0_00100)], &mut sys);
        sys.cpu_mut().regs.ic = Address::new(0o100);
        assert_eq!(sys.run(10), StopReason::LimitReached);
    }

    #[test]
    fn operator_stop_wins() {
        let mut sys = System::new(&SystemConfiguration::default());
        assemble(&[(0o100, 0o0020_00_0_00100)], &mut sys);
        sys.cpu_mut().regs.ic = Address::new(0o100);
        sys.request_stop();
        assert_eq!(sys.run(10), StopReason::OperatorStop);
    }

    #[test]
    fn device_read_flows_through_channel_into_memory() {
        let mut sys = System::new(&SystemConfiguration::default());
        // Script: attach poll (idle), then on the post-select poll
        // deliver one word and disconnect.
        let unit = ScriptedUnit {
            poll_script: vec![
                UnitActivity::default(),
                UnitActivity {
                    calls: vec![
                        ChannelCall::DeliverRead {
                            word: Word::new(0o123456700000),
                            end_of_record: false,
                        },
                        ChannelCall::Disconnect(None),
                    ],
                    next_poll: None,
                },
            ],
            ..ScriptedUnit::default()
        };
        sys.attach_device(ChannelNumber::A, Box::new(unit));
        assemble(
            &[
                (0o100, 0o0762_00_0_01201), // RDS channel A unit 201
                (0o101, 0o0540_00_0_00200), // RCHA 200
                (0o102, 0o0060_00_0_00102), // TCOA *: spin while operating
                (0o103, 0o0000_00_0_00103), // HTR *
                // Channel program: IOCD, one word, to 1000.
                (0o200, 0o0_00001_0_01000),
            ],
            &mut sys,
        );
        sys.cpu_mut().regs.ic = Address::new(0o100);
        let stop = sys.run(10_000);
        assert_eq!(
            stop,
            StopReason::Halted {
                resume: Address::new(0o103)
            }
        );
        assert_eq!(sys.read_word(Address::new(0o1000)), Word::new(0o123456700000));
        assert_eq!(sys.channels().channel(ChannelNumber::A).state, ChannelState::Idle);
    }

    #[test]
    fn pending_channel_trap_cancels_a_halt() {
        use crate::chan::FLAG_END_OF_FILE;

        let mut sys = System::new(&SystemConfiguration::default());
        // The device accepts the read select, asks to be polled again
        // later, and that later callback raises an enabled flag while
        // the halt is draining.
        let unit = ScriptedUnit {
            poll_script: vec![
                UnitActivity::default(),
                UnitActivity {
                    calls: vec![],
                    next_poll: Some(Duration::from_micros(100)),
                },
                UnitActivity {
                    calls: vec![ChannelCall::SetFlags(FLAG_END_OF_FILE)],
                    next_poll: None,
                },
            ],
            ..ScriptedUnit::default()
        };
        sys.attach_device(ChannelNumber::A, Box::new(unit));
        sys.channels_mut().traps.set_enable_mask(Word::new(0b1));
        assemble(
            &[
                (0o100, 0o0762_00_0_01201), // RDS channel A
                (0o101, 0o0420_00_0_00000), // HPR: drains, gets cancelled
                (0o13, 0o0020_00_0_00500),  // channel A trap vector: TRA 500
                (0o500, 0o0020_00_0_00500), // spin in the handler
            ],
            &mut sys,
        );
        sys.cpu_mut().regs.ic = Address::new(0o100);
        // The run must not halt: the trap cancels it, and the handler
        // spins until the budget runs out.
        assert_eq!(sys.run(50), StopReason::LimitReached);
        let save = sys.read_word(Address::new(0o12));
        assert_eq!(save.decrement(), u16::from(FLAG_END_OF_FILE));
        // HPR's resume address (the word after it) is what the trap
        // saves, since the cancelled halt left the counter there.
        assert_eq!(save.address_bits(), 0o102, "halt resume address saved");
        assert_eq!(sys.cpu().regs.ic, Address::new(0o500));
    }

    #[test]
    fn channel_reset_cancels_device_callback() {
        let mut sys = System::new(&SystemConfiguration::default());
        let unit = ScriptedUnit {
            poll_script: vec![UnitActivity {
                calls: vec![],
                next_poll: Some(Duration::from_micros(50)),
            }],
            ..ScriptedUnit::default()
        };
        sys.attach_device(ChannelNumber::A, Box::new(unit));
        sys.reset_channel(ChannelNumber::A);
        // A HPR with no channel activity halts immediately; the
        // cancelled callback never fires.
        assemble(&[(0o100, 0o0420_00_0_00000)], &mut sys);
        sys.cpu_mut().regs.ic = Address::new(0o100);
        assert_eq!(
            sys.run(10),
            StopReason::Halted {
                resume: Address::new(0o101)
            }
        );
    }
}
