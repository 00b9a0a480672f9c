//! HTTP connection handler (spec.md §4.J): the per-connection state
//! machine driving a request/response cycle through `fiber::io`'s
//! reader and writer.
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use log::{debug, warn};

use crate::config::Config;
use crate::fiber::io::{IoError, Reader, Writer};
use crate::fiber::Poll;
use crate::http::request::{BodyParser, HeaderParser, ParsedHead, RequestError, Version};
use crate::http::response::Response;
use crate::http::Request;
use crate::reactor::client::{EventMask, FinalizeStatus, SelectClient};
use crate::reactor::dispatcher::now_us;
use crate::reactor::timeout::ExpiryHandle;
use crate::reactor::{Dispatcher, ReactorError};

/// User-supplied request logic (spec.md §4.J step 4), replacing the
/// teacher's streaming `server::Server` trait with a single synchronous
/// `(status, body)` return per request.
pub trait Handler {
    fn handle(&mut self, request: &Request) -> (u16, Vec<u8>);
}

enum Phase {
    ReadingHead,
    ReadingBody(ParsedHead),
    Writing { close_after: bool },
    Closed,
}

/// Drives one accepted socket through spec.md §4.J's per-connection loop:
/// start → read request → method gate → dispatch → compose response →
/// send → continue-or-close.
pub struct Connection<H: Handler> {
    fd: RawFd,
    config: Rc<Config>,
    dispatcher: Rc<RefCell<Dispatcher>>,
    handler: H,
    reader: Reader,
    writer: Writer,
    header_parser: HeaderParser,
    body_parser: Option<BodyParser>,
    phase: Phase,
    request_number: u32,
    expiry: Option<ExpiryHandle>,
    hangup: bool,
}

impl<H: Handler> Connection<H> {
    /// Builds a connection over `fd` and registers it (and, if
    /// `connection_idle_timeout_ms` is non-zero, its idle expiry) with
    /// `dispatcher`.
    pub fn register(
        dispatcher: Rc<RefCell<Dispatcher>>,
        fd: RawFd,
        config: Rc<Config>,
        handler: H,
    ) -> Result<Rc<RefCell<Connection<H>>>, ReactorError> {
        let methods = Rc::new(config.supported_methods.clone());
        let header_parser = HeaderParser::new(config.header_length_limit, methods);
        let conn = Rc::new(RefCell::new(Connection {
            reader: Reader::new(fd, config.io_buffer_size),
            writer: Writer::new(fd),
            header_parser,
            body_parser: None,
            phase: Phase::ReadingHead,
            request_number: 0,
            expiry: None,
            hangup: false,
            fd,
            dispatcher: dispatcher.clone(),
            config,
            handler,
        }));
        dispatcher.borrow_mut().register(conn.clone())?;
        conn.borrow_mut().arm_idle_timeout();
        Ok(conn)
    }

    fn arm_idle_timeout(&mut self) {
        if self.config.connection_idle_timeout_ms == 0 {
            return;
        }
        let deadline = now_us() + self.config.connection_idle_timeout_ms as i64 * 1000;
        let handle = self.dispatcher.borrow_mut().register_expiry(self.fd, self.expiry, deadline);
        self.expiry = Some(handle);
    }

    /// Step 1: reset per-request parser state, rearm the idle timer.
    fn start_request(&mut self) {
        self.reader.reset();
        self.header_parser.reset();
        self.body_parser = None;
        self.phase = Phase::ReadingHead;
        self.arm_idle_timeout();
    }

    fn client_wants_keep_alive(version: Version, connection_header: Option<&str>) -> bool {
        match connection_header.map(|h| h.trim().to_ascii_lowercase()) {
            Some(ref h) if h == "close" => false,
            Some(ref h) if h == "keep-alive" => true,
            _ => matches!(version, Version::Http11),
        }
    }

    fn has_keep_alive_budget(&self) -> bool {
        self.config.keep_alive_max > 0 && self.request_number < self.config.keep_alive_max
    }

    /// Step 5/6: serializes a response and queues it on the writer,
    /// returning whether the connection should close once it drains.
    fn begin_write(&mut self, version: Version, connection_header: Option<&str>, status: u16, body: &[u8]) {
        let close = !(Self::client_wants_keep_alive(version, connection_header) && self.has_keep_alive_budget());
        let mut resp = Response::new(version);
        resp.set_header("Connection", if close { "close" } else { "Keep-Alive" });
        let serialized = resp.send(status, body);
        self.writer.reset();
        self.writer.queue(&serialized);
        self.phase = Phase::Writing { close_after: close };
    }

    fn begin_error_write(&mut self, version: Version, err: &RequestError) {
        warn!("fd:{} request rejected: {} ({})", self.fd, err, err.status());
        // Parse errors at/above 413 are not retried on this connection
        // regardless of keep-alive policy (spec.md §4.J: "default: close
        // on 413, else keep").
        let mut resp = Response::new(version);
        let close = err.status() == 413 || !self.has_keep_alive_budget();
        resp.set_header("Connection", if close { "close" } else { "Keep-Alive" });
        let serialized = resp.send_with_reason(err.status(), b"", err.reason());
        self.writer.reset();
        self.writer.queue(&serialized);
        self.phase = Phase::Writing { close_after: close };
    }

    fn drive_head(&mut self) -> Result<bool, Box<dyn std::error::Error>> {
        let Connection { ref mut reader, ref mut header_parser, .. } = *self;
        let outcome = reader.read(|buf| header_parser.consume(buf));
        match outcome {
            Ok(Poll::Pending) => Ok(true),
            Ok(Poll::Ready(())) => {
                if let Some(err) = self.header_parser.take_error() {
                    self.begin_error_write(Version::Http11, &err);
                    return Ok(true);
                }
                let head = self.header_parser.take_result().expect("Done without result or error");
                if head.content_length == 0 {
                    self.dispatch(head, Vec::new());
                } else {
                    match BodyParser::new(head.content_length, self.config.body_length_limit) {
                        Ok(body_parser) => {
                            self.body_parser = Some(body_parser);
                            self.phase = Phase::ReadingBody(head);
                        }
                        Err(err) => self.begin_error_write(head.version, &err),
                    }
                }
                Ok(true)
            }
            Err(IoError::Ended) => {
                self.hangup = self.reader.has_read_any();
                Ok(false)
            }
            Err(IoError::Os(err)) => Err(Box::new(err)),
        }
    }

    fn drive_body(&mut self) -> Result<bool, Box<dyn std::error::Error>> {
        let head = match &self.phase {
            Phase::ReadingBody(head) => head.clone(),
            _ => unreachable!(),
        };
        let Connection { ref mut reader, ref mut body_parser, .. } = *self;
        let outcome = reader.read(|buf| body_parser.as_mut().expect("body phase without parser").consume(buf));
        match outcome {
            Ok(Poll::Pending) => Ok(true),
            Ok(Poll::Ready(())) => {
                let body_parser = self.body_parser.as_mut().unwrap();
                if let Some(err) = body_parser.take_error() {
                    self.begin_error_write(head.version, &err);
                    return Ok(true);
                }
                let body = body_parser.take_body();
                self.dispatch(head, body);
                Ok(true)
            }
            Err(IoError::Ended) => {
                // Headers were already complete by the time we reached
                // this phase, so an EOF here always interrupts a request
                // in flight.
                self.hangup = true;
                Ok(false)
            }
            Err(IoError::Os(err)) => Err(Box::new(err)),
        }
    }

    /// Step 3/4: gates the method and calls the user handler.
    fn dispatch(&mut self, head: ParsedHead, body: Vec<u8>) {
        let connection_header = head.headers.get("connection").map(|s| s.to_string());
        if self.config.accepts_body(&head.method).is_none() {
            let err = RequestError::UnknownMethod(head.method.clone());
            self.begin_error_write(head.version, &err);
            return;
        }
        let request = Request { method: head.method, url: head.url, version: head.version, headers: head.headers, body };
        let (status, body) = self.handler.handle(&request);
        // A handler that returns a status outside the valid HTTP range is
        // a bug in the handler, not a client error; fall back to the
        // configured exception status rather than writing a malformed
        // status line (spec.md §6 `default_exception_status`).
        let status = if (100..=599).contains(&status) {
            status
        } else {
            warn!("fd:{} handler returned invalid status {}, substituting {}", self.fd, status, self.config.default_exception_status);
            self.config.default_exception_status
        };
        self.begin_write(request.version, connection_header.as_deref(), status, &body);
    }

    fn drive_write(&mut self) -> Result<bool, Box<dyn std::error::Error>> {
        let close_after = match &self.phase {
            Phase::Writing { close_after } => *close_after,
            _ => unreachable!(),
        };
        match self.writer.write() {
            Ok(Poll::Pending) => Ok(true),
            Ok(Poll::Ready(())) => {
                self.request_number += 1;
                if close_after {
                    Ok(false)
                } else {
                    self.start_request();
                    Ok(true)
                }
            }
            Err(IoError::Ended) => Ok(false),
            Err(IoError::Os(err)) => Err(Box::new(err)),
        }
    }
}

impl<H: Handler> SelectClient for Connection<H> {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn events(&self) -> EventMask {
        match self.phase {
            Phase::ReadingHead | Phase::ReadingBody(_) => EventMask::READABLE,
            Phase::Writing { .. } => EventMask::WRITABLE,
            Phase::Closed => EventMask::empty(),
        }
    }

    fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
        match self.phase {
            Phase::ReadingHead => self.drive_head(),
            Phase::ReadingBody(_) => self.drive_body(),
            Phase::Writing { .. } => self.drive_write(),
            Phase::Closed => Ok(false),
        }
    }

    fn finalize(&mut self, status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
        let status = if self.hangup && status == FinalizeStatus::Success {
            FinalizeStatus::Hangup
        } else {
            status
        };
        debug!("fd:{} closing after {} request(s): {:?}", self.fd, self.request_number, status);
        self.phase = Phase::Closed;
        if let Some(handle) = self.expiry.take() {
            self.dispatcher.borrow_mut().unregister_expiry(handle);
        }
        unsafe { libc::close(self.fd) };
        Ok(())
    }

    fn debug_id(&self) -> String {
        format!("conn:{}", self.fd)
    }

    fn expiry_registration(&self) -> Option<ExpiryHandle> {
        self.expiry
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::io::RawFd;

    struct Noop;
    impl Handler for Noop {
        fn handle(&mut self, _request: &crate::http::Request) -> (u16, Vec<u8>) {
            (200, Vec::new())
        }
    }

    /// Returns (server, client): `server` is what `Connection` drives,
    /// already closed on the client side so the very next read is EOF.
    fn closed_pair() -> RawFd {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) }, 0);
        for &fd in &fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL, 0);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        unsafe { libc::close(fds[1]) };
        fds[0]
    }

    /// A pair left open so the caller can send partial bytes before
    /// closing the client half to simulate a mid-request hangup.
    fn open_pair() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) }, 0);
        for &fd in &fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL, 0);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        (fds[0], fds[1])
    }

    fn new_connection(fd: RawFd) -> Connection<Noop> {
        let config = Rc::new(Config::default());
        let methods = Rc::new(config.supported_methods.clone());
        Connection {
            reader: Reader::new(fd, config.io_buffer_size),
            writer: Writer::new(fd),
            header_parser: HeaderParser::new(config.header_length_limit, methods),
            body_parser: None,
            phase: Phase::ReadingHead,
            request_number: 0,
            expiry: None,
            hangup: false,
            fd,
            dispatcher: Rc::new(RefCell::new(Dispatcher::new().unwrap())),
            config,
            handler: Noop,
        }
    }

    #[test]
    fn eof_with_no_bytes_read_is_not_a_hangup() {
        let fd = closed_pair();
        let mut conn = new_connection(fd);
        assert!(conn.drive_head().is_ok());
        assert!(!conn.hangup);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn eof_mid_header_is_a_hangup() {
        let (server_fd, client_fd) = open_pair();
        let mut conn = new_connection(server_fd);
        let n = unsafe { libc::write(client_fd, b"GET /x HTTP/1.1\r\n".as_ptr() as *const libc::c_void, 17) };
        assert_eq!(n, 17);
        // First drive: reads the partial header line, still waiting for
        // the terminator.
        assert!(conn.drive_head().is_ok());
        assert!(!conn.hangup);
        unsafe { libc::close(client_fd) };
        // Second drive: the peer is gone, so this read hits EOF having
        // already observed bytes this request.
        assert!(conn.drive_head().is_ok());
        assert!(conn.hangup);
        unsafe { libc::close(server_fd) };
    }

    #[test]
    fn finalize_reports_hangup_instead_of_success_when_flagged() {
        let fd = closed_pair();
        let mut conn = new_connection(fd);
        conn.hangup = true;
        let _ = SelectClient::finalize(&mut conn, FinalizeStatus::Success);
        assert!(matches!(conn.phase, Phase::Closed));
    }
}
