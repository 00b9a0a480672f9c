//! End-to-end scenarios from spec.md §8, driven over a real non-blocking
//! `socketpair` so the dispatcher, fiber I/O and connection handler all
//! run together exactly as they would over a TCP socket.
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use fiber_http::config::Config;
use fiber_http::conn::{Connection, Handler};
use fiber_http::http::Request;
use fiber_http::reactor::Dispatcher;

fn nonblocking_pair() -> (RawFd, RawFd) {
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

struct Echo {
    seen: Rc<RefCell<Vec<String>>>,
}

impl Handler for Echo {
    fn handle(&mut self, request: &Request) -> (u16, Vec<u8>) {
        self.seen.borrow_mut().push(request.method.clone());
        match request.url.path().get(0) {
            Some("echo") => (200, request.body.clone()),
            _ => (200, b"ok".to_vec()),
        }
    }
}

fn recv_all(fd: RawFd) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            out.extend_from_slice(&buf[..n as usize]);
        } else if n == 0 {
            break;
        } else {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                break;
            }
            panic!("read failed: {}", err);
        }
    }
    out
}

fn send_all(fd: RawFd, data: &[u8]) {
    let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    assert_eq!(n as usize, data.len());
}

#[test]
fn simple_get_round_trips_a_200() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let config = Rc::new(Config::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    Connection::register(dispatcher.clone(), server_fd, config, Echo { seen: seen.clone() }).unwrap();

    send_all(client_fd, b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n");
    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "unexpected status line: {}", text);
    assert!(text.ends_with("ok"));
    assert_eq!(seen.borrow().as_slice(), &["GET".to_string()]);
    unsafe { libc::close(client_fd) };
}

#[test]
fn post_with_body_is_echoed_back() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let config = Rc::new(Config::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    Connection::register(dispatcher.clone(), server_fd, config, Echo { seen }).unwrap();

    send_all(
        client_fd,
        b"POST /echo HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
    );
    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("hello"));
    unsafe { libc::close(client_fd) };
}

#[test]
fn oversize_header_is_rejected_with_413() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let mut config = Config::default();
    config.header_length_limit = 32;
    let config = Rc::new(config);
    let seen = Rc::new(RefCell::new(Vec::new()));
    Connection::register(dispatcher.clone(), server_fd, config, Echo { seen }).unwrap();

    let oversized = format!("GET /{} HTTP/1.1\r\n\r\n", "x".repeat(256));
    send_all(client_fd, oversized.as_bytes());
    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 413"), "expected 413, got: {}", text);
    unsafe { libc::close(client_fd) };
}

#[test]
fn unknown_method_is_rejected_with_501() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let config = Rc::new(Config::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    Connection::register(dispatcher.clone(), server_fd, config, Echo { seen }).unwrap();

    send_all(client_fd, b"FROB / HTTP/1.1\r\nConnection: close\r\n\r\n");
    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 501"), "expected 501, got: {}", text);
    unsafe { libc::close(client_fd) };
}

#[test]
fn keep_alive_serves_two_requests_on_one_connection() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let mut config = Config::default();
    config.keep_alive_max = 5;
    let config = Rc::new(config);
    let seen = Rc::new(RefCell::new(Vec::new()));
    Connection::register(dispatcher.clone(), server_fd, config, Echo { seen: seen.clone() }).unwrap();

    // Both requests are queued before the loop runs once; the connection
    // stays registered across the first response because it doesn't ask
    // to close, then the second (Connection: close) finalizes it.
    send_all(client_fd, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    send_all(client_fd, b"GET /again HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n");

    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    let text = String::from_utf8_lossy(&resp);
    let responses: Vec<&str> = text.split("HTTP/1.1 200 OK\r\n").filter(|s| !s.is_empty()).collect();
    assert_eq!(responses.len(), 2, "expected two responses, got: {}", text);
    assert_eq!(seen.borrow().len(), 2);
    unsafe { libc::close(client_fd) };
}

#[test]
fn reused_connection_response_reports_capitalized_keep_alive() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let mut config = Config::default();
    config.keep_alive_max = 5;
    let config = Rc::new(config);
    let seen = Rc::new(RefCell::new(Vec::new()));
    Connection::register(dispatcher.clone(), server_fd, config, Echo { seen }).unwrap();

    send_all(client_fd, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    send_all(client_fd, b"GET /again HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n");
    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.contains("Connection: Keep-Alive\r\n"), "expected capitalized Keep-Alive, got: {}", text);
    unsafe { libc::close(client_fd) };
}

struct InvalidStatus;

impl Handler for InvalidStatus {
    fn handle(&mut self, _request: &Request) -> (u16, Vec<u8>) {
        (0, Vec::new())
    }
}

#[test]
fn handler_returning_invalid_status_falls_back_to_configured_default() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let mut config = Config::default();
    config.default_exception_status = 599;
    let config = Rc::new(config);
    Connection::register(dispatcher.clone(), server_fd, config, InvalidStatus).unwrap();

    send_all(client_fd, b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    let text = String::from_utf8_lossy(&resp);
    assert!(text.starts_with("HTTP/1.1 599"), "expected fallback 599 status, got: {}", text);
    unsafe { libc::close(client_fd) };
}

#[test]
fn idle_timeout_closes_connection_without_a_response() {
    let (client_fd, server_fd) = nonblocking_pair();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new().unwrap()));
    let mut config = Config::default();
    config.connection_idle_timeout_ms = 1;
    let config = Rc::new(config);
    let seen = Rc::new(RefCell::new(Vec::new()));
    Connection::register(dispatcher.clone(), server_fd, config, Echo { seen }).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    dispatcher.borrow_mut().event_loop().unwrap();

    let resp = recv_all(client_fd);
    assert!(resp.is_empty(), "expected no response after idle timeout, got: {:?}", resp);
    unsafe { libc::close(client_fd) };
}
