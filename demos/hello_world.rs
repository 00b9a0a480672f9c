//! A minimal server wired up with a real TCP listener, analogous to the
//! teacher's own `hello_world_server.rs` example: bind, accept, and hand
//! each connection to `Connection::register` with a trivial `Handler`.
//!
//! This binary is where the `env_logger` backend lives; the library
//! itself only depends on the `log` facade.
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use fiber_http::conn::{Connection, Handler};
use fiber_http::http::Request;
use fiber_http::reactor::client::{EventMask, FinalizeStatus, SelectClient};
use fiber_http::reactor::Dispatcher;
use fiber_http::Config;

struct HelloWorld {
    visits: Rc<RefCell<usize>>,
}

impl Handler for HelloWorld {
    fn handle(&mut self, request: &Request) -> (u16, Vec<u8>) {
        *self.visits.borrow_mut() += 1;
        match request.url.path().get(0) {
            None => (200, b"Hello World!".to_vec()),
            Some("num") => (200, format!("This host has been visited {} times", self.visits.borrow()).into_bytes()),
            Some(name) => (200, format!("Hello {}!", name).into_bytes()),
        }
    }
}

/// Listens for new connections and registers each accepted fd as its own
/// `Connection`. Implements `SelectClient` itself rather than pulling in
/// a listener abstraction the distilled spec never asked for.
struct Listener {
    fd: RawFd,
    dispatcher: Rc<RefCell<Dispatcher>>,
    config: Rc<Config>,
    visits: Rc<RefCell<usize>>,
}

impl Listener {
    fn bind(addr: &str, port: u16, dispatcher: Rc<RefCell<Dispatcher>>, config: Rc<Config>) -> std::io::Result<Listener> {
        unsafe {
            let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0);
            if fd < 0 {
                return Err(std::io::Error::last_os_error());
            }
            let one: libc::c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            let ip: std::net::Ipv4Addr = addr.parse().expect("invalid bind address");
            let sockaddr = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: port.to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(ip.octets()) },
                sin_zero: [0; 8],
            };
            let ret = libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            );
            if ret != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::listen(fd, 128) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(Listener { fd, dispatcher, config, visits: Rc::new(RefCell::new(0)) })
        }
    }
}

impl SelectClient for Listener {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn events(&self) -> EventMask {
        EventMask::READABLE
    }

    fn handle(&mut self, _mask: EventMask) -> Result<bool, Box<dyn std::error::Error>> {
        loop {
            let client_fd = unsafe { libc::accept4(self.fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC) };
            if client_fd < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Ok(true);
                }
                return Err(Box::new(err));
            }
            log::debug!("accepted connection fd:{}", client_fd);
            Connection::register(
                self.dispatcher.clone(),
                client_fd,
                self.config.clone(),
                HelloWorld { visits: self.visits.clone() },
            )?;
        }
    }

    fn finalize(&mut self, _status: FinalizeStatus) -> Result<(), Box<dyn std::error::Error>> {
        unsafe { libc::close(self.fd) };
        Ok(())
    }

    fn debug_id(&self) -> String {
        format!("listener:{}", self.fd)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new()?));
    let config = Rc::new(Config::default());
    let listener = Rc::new(RefCell::new(Listener::bind("127.0.0.1", 3000, dispatcher.clone(), config)?));
    dispatcher.borrow_mut().register(listener)?;
    log::info!("listening on 127.0.0.1:3000");
    dispatcher.borrow_mut().event_loop()?;
    Ok(())
}
