//! The context in which the simulator performs a single operation.
//!
//! Every call into the core carries the current simulated time so
//! that instruction execution and deferred device callbacks observe a
//! single, strictly ordered clock.  The caller also tracks real
//! elapsed time; keeping the two together in one struct gives both
//! quantities unambiguous names.

use core::time::Duration;

#[derive(Debug, Clone)]
pub struct Context {
    pub simulated_time: Duration,
    pub real_elapsed_time: Duration,
}

impl Context {
    #[must_use]
    pub fn new(simulated_time: Duration, real_elapsed_time: Duration) -> Context {
        Context {
            simulated_time,
            real_elapsed_time,
        }
    }
}
