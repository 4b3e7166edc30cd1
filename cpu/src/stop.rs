//! Stop reasons and the I/O status codes crossing the device seam.
//!
//! The set is deliberately closed: everything that can halt a run or
//! come back over the channel/device boundary is named here, so the
//! operator front end can match on stable reasons.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::*;

/// Why the run loop stopped.
///
/// These are terminal for the current run: the simulated machine
/// state is left intact (the program counter points at the stopped
/// instruction, or at the resume address for a halt) and the operator
/// decides what happens next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// A halt instruction completed, with all channels drained.  The
    /// machine resumes at `resume` if restarted.
    Halted { resume: Address },
    /// Execution reached an address in the breakpoint set.
    Breakpoint(Address),
    /// An undefined operation code was executed.
    IllegalInstruction { word: Word, address: Address },
    /// An I/O instruction was issued in a state where it has no
    /// defined meaning (e.g. chaining a channel that holds no select).
    IllegalIoOperation(String),
    /// An I/O instruction named a channel that is not fitted.
    NonexistentChannel(u16),
    /// A select addressed a channel with no attached device, or a
    /// unit the device does not recognise.
    NonexistentDevice { channel: ChannelNumber },
    /// Fixed-point divide with quotient too large for the register.
    DivideCheck,
    /// An execute-indirect chain exceeded the configured depth.
    XecLimit { depth: u32 },
    /// A write reached a write-protected target.
    WriteProtect(Address),
    /// A device reported a host-level failure; the channel has been
    /// disconnected with its check flag raised.
    IoError {
        channel: ChannelNumber,
        message: String,
    },
    /// The operator (or embedding front end) requested a stop.
    OperatorStop,
    /// The caller's instruction budget ran out before any other stop
    /// condition occurred.
    LimitReached,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        use StopReason::*;
        match self {
            Halted { resume } => write!(f, "halted; resume address {resume:o}"),
            Breakpoint(addr) => write!(f, "breakpoint at {addr:o}"),
            IllegalInstruction { word, address } => {
                write!(f, "illegal instruction {word:o} at {address:o}")
            }
            IllegalIoOperation(msg) => write!(f, "illegal I/O operation: {msg}"),
            NonexistentChannel(n) => write!(f, "channel {n:o} does not exist"),
            NonexistentDevice { channel } => {
                write!(f, "no device attached to channel {channel}")
            }
            DivideCheck => f.write_str("divide check"),
            XecLimit { depth } => {
                write!(f, "execute chain exceeded the configured limit of {depth}")
            }
            WriteProtect(addr) => write!(f, "write to protected location {addr:o}"),
            IoError { channel, message } => {
                write!(f, "I/O error on channel {channel}: {message}")
            }
            OperatorStop => f.write_str("stop requested"),
            LimitReached => f.write_str("instruction budget exhausted"),
        }
    }
}

impl Error for StopReason {}

/// Status of an I/O-class instruction.
///
/// `Stall` is not an error: the instruction loop backs the program
/// counter up by one and the instruction retries on the next
/// iteration, which is how the hardware models backpressure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoStatus {
    Ok,
    Stall,
    Stop(StopReason),
}

#[test]
fn stop_reasons_display_stably() {
    let reason = StopReason::IllegalInstruction {
        word: Word::new(0o0777_00_0_00000),
        address: Address::new(0o100),
    };
    assert_eq!(
        reason.to_string(),
        "illegal instruction 077700000000 at 00100"
    );
    assert_eq!(StopReason::DivideCheck.to_string(), "divide check");
}
