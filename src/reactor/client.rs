//! Select-client abstraction (spec.md §4.D): the polymorphic leaf the
//! dispatcher registers by fd and notifies via `handle`/`finalize`.
use std::cell::RefCell;
use std::ops::{BitOr, BitAnd};
use std::os::unix::io::RawFd;
use std::rc::Rc;

use super::timeout::ExpiryHandle;

/// Readiness flags delivered by the dispatcher. Hangup is not fatal on
/// its own: it may coincide with a final readable event carrying the
/// last bytes, so `handle` is still called (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const READABLE: EventMask = EventMask(0b0001);
    pub const WRITABLE: EventMask = EventMask(0b0010);
    pub const HANGUP: EventMask = EventMask(0b0100);
    pub const ERROR: EventMask = EventMask(0b1000);
    pub const INVALID: EventMask = EventMask(0b1_0000);

    pub fn empty() -> EventMask {
        EventMask(0)
    }

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Decodes a raw `epoll_event.events` bitfield.
    pub fn from_raw(bits: u32) -> EventMask {
        let mut mask = EventMask::empty();
        if bits & (libc::EPOLLIN as u32) != 0 {
            mask = mask | EventMask::READABLE;
        }
        if bits & (libc::EPOLLOUT as u32) != 0 {
            mask = mask | EventMask::WRITABLE;
        }
        if bits & (libc::EPOLLRDHUP as u32) != 0 {
            mask = mask | EventMask::HANGUP;
        }
        if bits & (libc::EPOLLERR as u32) != 0 {
            mask = mask | EventMask::ERROR;
        }
        if bits & (libc::EPOLLHUP as u32) != 0 {
            mask = mask | EventMask::HANGUP;
        }
        mask
    }

    /// Encodes to a raw `epoll_event.events` bitfield for registration.
    pub fn to_raw(self) -> u32 {
        let mut bits = 0u32;
        if self.contains(EventMask::READABLE) {
            bits |= libc::EPOLLIN as u32;
        }
        if self.contains(EventMask::WRITABLE) {
            bits |= libc::EPOLLOUT as u32;
        }
        bits |= libc::EPOLLRDHUP as u32;
        bits
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;
    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

/// Outcome passed to `finalize`, called exactly once per registration
/// lifecycle (spec.md §4.D, §8 invariant 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStatus {
    Success,
    Error,
    Timeout,
    Hangup,
}

/// A client registered with the dispatcher.
///
/// # Ownership hazard
///
/// The dispatcher holds an `Rc<RefCell<dyn SelectClient>>`, not a raw
/// pointer, specifically so the object identified by a registration
/// cannot be dropped out from under the epoll set the way spec.md §5
/// warns about for pointer-based implementations. It is still possible to
/// leak a client by never unregistering it (the `Rc` keeps it alive
/// forever); `finalize` is the only place that should drop the last
/// external reference.
pub trait SelectClient {
    fn fd(&self) -> RawFd;

    /// Interested event mask for the current registration epoch. May
    /// change across re-`register` calls (e.g. a reader switching to a
    /// writer after headers are sent).
    fn events(&self) -> EventMask;

    /// `Ok(true)` means "keep me registered", `Ok(false)` means
    /// "unregister me now" (dispatcher then calls `finalize(Success)`).
    /// An `Err` is caught by the dispatcher and routed to `error()`
    /// before the client is unregistered and finalized with `Error`
    /// (spec.md §4.C "Failure model" — never propagates out of the loop).
    fn handle(&mut self, mask: EventMask) -> Result<bool, Box<dyn std::error::Error>>;

    /// One-shot release callback, called at most once per registration.
    /// An `Err` here is likewise caught and routed to `error()`.
    fn finalize(&mut self, status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>>;

    /// Per-client debug identifier, surfaced by observability hooks.
    fn debug_id(&self) -> String {
        format!("fd:{}", self.fd())
    }

    /// Reports an error raised by `handle` or `finalize` that the
    /// dispatcher caught on this client's behalf (spec.md §4.C "Failure
    /// model").
    fn error(&mut self, _err: &(dyn std::error::Error + 'static), _mask: EventMask) {}

    /// The client's current expiry registration, if it has one.
    fn expiry_registration(&self) -> Option<ExpiryHandle> {
        None
    }
}

pub type ClientRef = Rc<RefCell<dyn SelectClient>>;

/// Fires a user handler on each timer expiration.
pub struct TimerEvent<F: FnMut(u64)> {
    timer: super::kernel::TimerFd,
    on_fire: F,
}

impl<F: FnMut(u64)> TimerEvent<F> {
    pub fn new(timer: super::kernel::TimerFd, on_fire: F) -> Self {
        TimerEvent { timer, on_fire }
    }
}

impl<F: FnMut(u64)> SelectClient for TimerEvent<F> {
    fn fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.timer.as_raw_fd()
    }

    fn events(&self) -> EventMask {
        EventMask::READABLE
    }

    fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
        match self.timer.handle()? {
            0 => Ok(true),
            n => {
                (self.on_fire)(n);
                Ok(true)
            }
        }
    }

    fn finalize(&mut self, _status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}

/// User-triggered wakeup (cross-thread/cross-loop), counting variant
/// reports how many triggers accumulated since the last `handle`.
pub struct CountingSelectEvent<F: FnMut(u64)> {
    event: super::kernel::EventFd,
    on_trigger: F,
}

impl<F: FnMut(u64)> CountingSelectEvent<F> {
    pub fn new(event: super::kernel::EventFd, on_trigger: F) -> Self {
        CountingSelectEvent { event, on_trigger }
    }
}

impl<F: FnMut(u64)> SelectClient for CountingSelectEvent<F> {
    fn fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.event.as_raw_fd()
    }

    fn events(&self) -> EventMask {
        EventMask::READABLE
    }

    fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
        match self.event.handle()? {
            0 => Ok(true),
            n => {
                (self.on_trigger)(n);
                Ok(true)
            }
        }
    }

    fn finalize(&mut self, _status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}

/// Non-counting alias: a `SelectEvent` that only cares *that* it fired.
pub type SelectEvent<F> = CountingSelectEvent<F>;

/// Inotify descriptor fanning out path/mask events. Supplied for
/// completeness (spec.md §4.D); not exercised by the HTTP connection
/// handler itself.
pub struct FileSystemEvent<F: FnMut(i32, u32, String)> {
    fd: RawFd,
    on_event: F,
}

impl<F: FnMut(i32, u32, String)> FileSystemEvent<F> {
    pub fn create(on_event: F) -> std::io::Result<Self> {
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(FileSystemEvent { fd, on_event })
    }

    pub fn watch(&self, path: &std::ffi::CStr, mask: u32) -> std::io::Result<i32> {
        let wd = unsafe { libc::inotify_add_watch(self.fd, path.as_ptr(), mask) };
        if wd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(wd)
    }
}

impl<F: FnMut(i32, u32, String)> SelectClient for FileSystemEvent<F> {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn events(&self) -> EventMask {
        EventMask::READABLE
    }

    fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
        // inotify_event is a variable-length record (name follows the
        // fixed header); read a batch and walk it.
        let mut buf = [0u8; 4096];
        let n = unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(true);
            }
            return Err(Box::new(err));
        }
        let mut offset = 0usize;
        let header_size = std::mem::size_of::<libc::inotify_event>();
        while offset + header_size <= n as usize {
            let event = unsafe {
                &*(buf.as_ptr().add(offset) as *const libc::inotify_event)
            };
            let name_start = offset + header_size;
            let name_end = name_start + event.len as usize;
            let name = if event.len > 0 && name_end <= n as usize {
                let raw = &buf[name_start..name_end];
                let nul = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(&raw[..nul]).into_owned()
            } else {
                String::new()
            };
            (self.on_event)(event.wd, event.mask, name);
            offset = name_end;
        }
        Ok(true)
    }

    fn finalize(&mut self, _status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}

impl<F: FnMut(i32, u32, String)> Drop for FileSystemEvent<F> {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
