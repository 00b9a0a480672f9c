//! Fibers and fiber-bound I/O protocols (spec.md §3, §4.E).
pub mod core;
pub mod io;

pub use self::core::Poll;
pub use self::io::{Consumed, IoError, Reader, Writer};

use std::os::unix::io::{AsRawFd, RawFd};

use crate::reactor::client::{EventMask, FinalizeStatus, SelectClient};
use crate::reactor::kernel::{EventFd, TimerFd};

/// Arms a timer and wakes a suspended fiber when it fires — the
/// `FiberTimerEvent` variant named in spec.md §4.D, distinct from
/// `reactor::client::TimerEvent` in that it fires the wakeup exactly
/// once (one-shot, matching a single suspension point) rather than
/// repeatedly on every expiration.
pub struct FiberTimerEvent<F: FnMut()> {
    timer: TimerFd,
    on_fire: F,
    fired: bool,
}

impl<F: FnMut()> FiberTimerEvent<F> {
    pub fn new(timer: TimerFd, on_fire: F) -> FiberTimerEvent<F> {
        FiberTimerEvent { timer, on_fire, fired: false }
    }
}

impl<F: FnMut()> SelectClient for FiberTimerEvent<F> {
    fn fd(&self) -> RawFd {
        self.timer.as_raw_fd()
    }

    fn events(&self) -> EventMask {
        EventMask::READABLE
    }

    fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
        let n = self.timer.handle()?;
        if n > 0 && !self.fired {
            self.fired = true;
            (self.on_fire)();
        }
        Ok(!self.fired)
    }

    fn finalize(&mut self, _status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}

/// Wakes a suspended fiber on an explicit cross-loop trigger (the
/// "explicit fiber-event" suspension point of spec.md §5).
pub struct FiberSelectEvent<F: FnMut()> {
    event: EventFd,
    on_trigger: F,
}

impl<F: FnMut()> FiberSelectEvent<F> {
    pub fn new(event: EventFd, on_trigger: F) -> FiberSelectEvent<F> {
        FiberSelectEvent { event, on_trigger }
    }
}

impl<F: FnMut()> SelectClient for FiberSelectEvent<F> {
    fn fd(&self) -> RawFd {
        self.event.as_raw_fd()
    }

    fn events(&self) -> EventMask {
        EventMask::READABLE
    }

    fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
        let n = self.event.handle()?;
        if n > 0 {
            (self.on_trigger)();
        }
        Ok(true)
    }

    fn finalize(&mut self, _status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}
