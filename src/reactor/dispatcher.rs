//! The select dispatcher (spec.md §4.C): the epoll event loop.
use std::collections::HashMap;
use std::os::unix::io::RawFd;

use log::{debug, trace, warn};

use super::client::{ClientRef, EventMask, FinalizeStatus};
use super::error::ReactorError;
use super::timeout::{ExpiryHandle, TimeoutManager};

/// Monotonic "now" in microseconds, the same clock deadlines are computed
/// against.
pub fn now_us() -> i64 {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as i64 * 1_000_000 + ts.tv_nsec as i64 / 1_000
}

const DEFAULT_MAX_EVENTS: usize = 256;

/// The epoll event loop plus its client registry (component C).
///
/// Single-threaded: one reactor owns one epoll instance. Multiple
/// reactors may coexist in different threads but share no state
/// (spec.md §5).
pub struct Dispatcher {
    epoll_fd: RawFd,
    clients: HashMap<RawFd, ClientRef>,
    timeouts: TimeoutManager,
    /// Maps a live `ExpiryHandle`'s slot index back to the fd it guards,
    /// so `check_timeouts` (which only knows handles) can tell the
    /// dispatcher which registered clients timed out.
    expiry_owner: HashMap<usize, RawFd>,
    shutdown_requested: bool,
    max_events: usize,
    wait_calls: u64,
    timeout_wakeups: u64,
}

impl Dispatcher {
    pub fn new() -> Result<Dispatcher, ReactorError> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(ReactorError::EpollCreate(std::io::Error::last_os_error()));
        }
        Ok(Dispatcher {
            epoll_fd: fd,
            clients: HashMap::new(),
            timeouts: TimeoutManager::new(),
            expiry_owner: HashMap::new(),
            shutdown_requested: false,
            max_events: DEFAULT_MAX_EVENTS,
            wait_calls: 0,
            timeout_wakeups: 0,
        })
    }

    pub fn num_registered(&self) -> usize {
        self.clients.len()
    }

    /// Observability counters: `(wait_calls, timeout_wakeups)`.
    pub fn stats(&self) -> (u64, u64) {
        (self.wait_calls, self.timeout_wakeups)
    }

    /// Registers (or replaces) `fd`'s expiry deadline, recording which fd
    /// owns the handle so a future timeout can be routed back to it.
    pub fn register_expiry(
        &mut self,
        fd: RawFd,
        existing: Option<ExpiryHandle>,
        deadline_us: i64,
    ) -> ExpiryHandle {
        if let Some(h) = existing {
            self.expiry_owner.remove(&h.index());
        }
        let handle = self.timeouts.register(existing, deadline_us);
        self.expiry_owner.insert(handle.index(), fd);
        handle
    }

    pub fn unregister_expiry(&mut self, handle: ExpiryHandle) {
        self.expiry_owner.remove(&handle.index());
        self.timeouts.unregister(handle);
    }

    fn epoll_event(fd: RawFd, mask: EventMask) -> libc::epoll_event {
        libc::epoll_event {
            events: mask.to_raw(),
            u64: fd as u64,
        }
    }

    /// Adds a client fresh. Returns `true` on a fresh add; an fd that is
    /// already registered is a logic error (spec.md §3: "at most one
    /// client per fd may be active at a time").
    pub fn register(&mut self, client: ClientRef) -> Result<bool, ReactorError> {
        let fd = client.borrow().fd();
        let mask = client.borrow().events();
        if self.clients.contains_key(&fd) {
            return Err(ReactorError::DuplicateRegistration { fd });
        }
        let mut ev = Self::epoll_event(fd, mask);
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ENOMEM) | Some(libc::EINVAL) => return Err(ReactorError::EpollCtl(err)),
                _ => return Err(ReactorError::Kernel(err)),
            }
        }
        self.clients.insert(fd, client);
        Ok(true)
    }

    /// Re-registers interest for a client already tracked by the
    /// dispatcher (its event mask changed since the last registration).
    /// Falls back to `ADD` on `ENOENT` (the fd was expectedly closed
    /// under us and the kernel already dropped it from the epoll set).
    pub fn modify(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        let client = self.clients.get(&fd).cloned().ok_or(ReactorError::NotRegistered { fd })?;
        let mask = client.borrow().events();
        let mut ev = Self::epoll_event(fd, mask);
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                let ret = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
                if ret < 0 {
                    return Err(ReactorError::Kernel(std::io::Error::last_os_error()));
                }
                return Ok(());
            }
            match err.raw_os_error() {
                Some(libc::ENOMEM) | Some(libc::EINVAL) => return Err(ReactorError::EpollCtl(err)),
                _ => return Err(ReactorError::Kernel(err)),
            }
        }
        Ok(())
    }

    /// Removes the fd from epoll. Tolerates `ENOENT` (closed under us)
    /// and `EBADF`; fatal on `ENOMEM`/`EINVAL`.
    pub fn unregister(&mut self, fd: RawFd) -> Result<Option<ClientRef>, ReactorError> {
        let client = self.clients.remove(&fd);
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EBADF) => {}
                Some(libc::ENOMEM) | Some(libc::EINVAL) => return Err(ReactorError::EpollCtl(err)),
                _ => return Err(ReactorError::Kernel(err)),
            }
        }
        Ok(client)
    }

    /// Atomically swaps the client bound to an fd without a window where
    /// the fd is unwatched. Preconditions: `next.fd() == fd`, `fd` is
    /// already registered (spec.md §4.C).
    pub fn change_client(&mut self, fd: RawFd, next: ClientRef) -> Result<(), ReactorError> {
        if next.borrow().fd() != fd {
            return Err(ReactorError::NotRegistered { fd: next.borrow().fd() });
        }
        if !self.clients.contains_key(&fd) {
            return Err(ReactorError::NotRegistered { fd });
        }
        self.clients.insert(fd, next);
        self.modify(fd)
    }

    pub fn shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Runs until either the registered-client set becomes empty or
    /// `shutdown()` was requested. Not re-entrant.
    pub fn event_loop(&mut self) -> Result<(), ReactorError> {
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; self.max_events];
        loop {
            if self.shutdown_requested || self.clients.is_empty() {
                return Ok(());
            }
            self.wait_once(&mut events)?;
        }
    }

    fn wait_once(&mut self, events: &mut [libc::epoll_event]) -> Result<(), ReactorError> {
        let now = now_us();
        let wait_ms = self.timeouts.time_until_earliest_ms(now).unwrap_or(-1);
        self.wait_calls += 1;
        trace!("epoll_wait: {} clients registered, bound {}ms", self.clients.len(), wait_ms);
        let n = loop {
            let ret = unsafe {
                libc::epoll_wait(
                    self.epoll_fd,
                    events.as_mut_ptr(),
                    events.len() as libc::c_int,
                    wait_ms.min(i32::MAX as i64) as libc::c_int,
                )
            };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ReactorError::EpollWait(err));
            }
            break ret as usize;
        };

        // Snapshot which registered fds have also timed out as of "now",
        // sorted for binary search against the ready keys below (spec.md
        // §4.C step 4). `check_timeouts` only knows handles, so resolve
        // each through `expiry_owner` before the manager recycles the
        // slot.
        let now = now_us();
        let mut timed_out_fds: Vec<RawFd> = {
            let Dispatcher { ref mut timeouts, ref mut expiry_owner, .. } = *self;
            let mut fds = Vec::new();
            timeouts.check_timeouts(now, |handle| {
                if let Some(fd) = expiry_owner.remove(&handle.index()) {
                    fds.push(fd);
                }
            });
            fds
        };
        timed_out_fds.sort_unstable();
        if !timed_out_fds.is_empty() {
            debug!("{} client(s) timed out this wait", timed_out_fds.len());
        }

        for ev in events.iter().take(n) {
            let fd = ev.u64 as RawFd;
            let mask = EventMask::from_raw(ev.events);
            if timed_out_fds.binary_search(&fd).is_ok() {
                // Finalized in the sweep below; never handled.
                continue;
            }
            let client = match self.clients.get(&fd) {
                Some(c) => c.clone(),
                None => continue, // a previous handler in this pass already unregistered it
            };
            let has_error = mask.contains(EventMask::ERROR);
            let outcome = client.borrow_mut().handle(mask);
            let status = match outcome {
                Ok(true) if !has_error => None,
                Ok(_) => Some(FinalizeStatus::Success),
                Err(err) => {
                    warn!("{} handle() failed: {}", client.borrow().debug_id(), err);
                    client.borrow_mut().error(&*err, mask);
                    Some(FinalizeStatus::Error)
                }
            };
            let status = if has_error && status.is_none() { Some(FinalizeStatus::Error) } else { status };
            match status {
                Some(status) => {
                    self.unregister(fd)?;
                    if let Err(err) = client.borrow_mut().finalize(status) {
                        client.borrow_mut().error(&*err, mask);
                    }
                }
                // Still registered: the client's `events()` may have
                // changed mid-`handle` (e.g. a connection switching from
                // awaiting readable to awaiting writable) — refresh the
                // epoll interest set so the next wait reflects it.
                None => self.modify(fd)?,
            }
        }

        for fd in timed_out_fds {
            if let Some(client) = self.unregister(fd)? {
                debug!("{} finalized as Timeout", client.borrow().debug_id());
                if let Err(err) = client.borrow_mut().finalize(FinalizeStatus::Timeout) {
                    client.borrow_mut().error(&*err, EventMask::empty());
                }
                self.timeout_wakeups += 1;
            }
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll_fd) };
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::os::unix::io::RawFd;
    use std::rc::Rc;

    use super::*;
    use crate::reactor::client::{EventMask, FinalizeStatus, SelectClient};

    struct PipeClient {
        fd: RawFd,
        handled: Rc<RefCell<usize>>,
        finalized: Rc<RefCell<Option<FinalizeStatus>>>,
    }

    impl SelectClient for PipeClient {
        fn fd(&self) -> RawFd {
            self.fd
        }
        fn events(&self) -> EventMask {
            EventMask::READABLE
        }
        fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
            let mut buf = [0u8; 16];
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            *self.handled.borrow_mut() += 1;
            Ok(n > 0)
        }
        fn finalize(&mut self, status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
            *self.finalized.borrow_mut() = Some(status);
            Ok(())
        }
    }

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        for &fd in &fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL, 0);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        (fds[0], fds[1])
    }

    #[test]
    fn register_and_dispatch_readable() {
        let (read_fd, write_fd) = pipe();
        let mut dispatcher = Dispatcher::new().unwrap();
        let handled = Rc::new(RefCell::new(0));
        let finalized = Rc::new(RefCell::new(None));
        let client: ClientRef = Rc::new(RefCell::new(PipeClient {
            fd: read_fd,
            handled: handled.clone(),
            finalized: finalized.clone(),
        }));
        assert!(dispatcher.register(client).unwrap());
        assert_eq!(dispatcher.num_registered(), 1);

        unsafe { libc::write(write_fd, b"x".as_ptr() as *const libc::c_void, 1) };
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; 16];
        dispatcher.wait_once(&mut events).unwrap();
        assert_eq!(*handled.borrow(), 1);
        assert_eq!(dispatcher.num_registered(), 1, "reader returned Ok(true): stays registered");

        unsafe { libc::close(write_fd) };
        // EOF: read() returns 0, our handler returns Ok(false) -> unregistered.
        dispatcher.wait_once(&mut events).unwrap();
        assert_eq!(dispatcher.num_registered(), 0);
        assert_eq!(*finalized.borrow(), Some(FinalizeStatus::Success));

        unsafe { libc::close(read_fd) };
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (read_fd, write_fd) = pipe();
        let mut dispatcher = Dispatcher::new().unwrap();
        let client: ClientRef = Rc::new(RefCell::new(PipeClient {
            fd: read_fd,
            handled: Rc::new(RefCell::new(0)),
            finalized: Rc::new(RefCell::new(None)),
        }));
        dispatcher.register(client.clone()).unwrap();
        assert!(dispatcher.register(client).is_err());
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn timeout_finalizes_without_handling() {
        let (read_fd, write_fd) = pipe();
        let mut dispatcher = Dispatcher::new().unwrap();
        let handled = Rc::new(RefCell::new(0));
        let finalized = Rc::new(RefCell::new(None));
        let client: ClientRef = Rc::new(RefCell::new(PipeClient {
            fd: read_fd,
            handled: handled.clone(),
            finalized: finalized.clone(),
        }));
        dispatcher.register(client).unwrap();
        dispatcher.register_expiry(read_fd, None, now_us() - 1);

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; 16];
        dispatcher.wait_once(&mut events).unwrap();
        assert_eq!(*handled.borrow(), 0, "timed-out client must never be handled");
        assert_eq!(*finalized.borrow(), Some(FinalizeStatus::Timeout));
        assert_eq!(dispatcher.num_registered(), 0);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
