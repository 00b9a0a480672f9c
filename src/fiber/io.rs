//! Fiber-bound reader/writer protocols (spec.md §4.E).
use std::os::unix::io::RawFd;

use super::core::Poll;

quick_error! {
    #[derive(Debug)]
    pub enum IoError {
        Ended {
            description("end of stream before the consumer signalled completion")
        }
        Os(err: std::io::Error) {
            from()
            description("I/O error")
            display("I/O error: {}", err)
        }
    }
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn raw_write(fd: RawFd, buf: &[u8]) -> std::io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

/// What a chunk consumer reports back to `Reader::read`.
pub enum Consumed {
    /// Parsing is complete; this many bytes of the chunk were consumed
    /// (may be less than the chunk's length — the remainder stays
    /// buffered for the next read).
    Done(usize),
    /// Not enough data yet; the whole chunk was inspected but nothing
    /// can be produced. Feed more bytes.
    NeedMore,
}

/// Owns a read buffer and feeds it to a chunk consumer.
///
/// Suspension in this crate is a `Poll::Pending` return rather than an
/// actual stack suspend (see `fiber::core`); the caller is responsible
/// for registering this reader's fd with the dispatcher for readable
/// events and calling `read` again with the *same* consumer once ready.
pub struct Reader {
    fd: RawFd,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    io_buffer_size: usize,
    total_read: usize,
}

impl Reader {
    pub fn new(fd: RawFd, io_buffer_size: usize) -> Reader {
        Reader { fd, buf: vec![0; io_buffer_size], pos: 0, filled: 0, io_buffer_size, total_read: 0 }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Whether any bytes have been read since the last `reset` — lets a
    /// caller tell an EOF on an idle, between-requests connection (no
    /// bytes seen) apart from one that interrupted a request already in
    /// flight (spec.md §7: a mid-request hangup is a distinct, fatal
    /// outcome from an ordinary keep-alive close).
    pub fn has_read_any(&self) -> bool {
        self.total_read > 0
    }

    /// Clears the buffer; retains allocated capacity (spec.md §4.F "the
    /// request object is reusable").
    pub fn reset(&mut self) {
        self.pos = 0;
        self.filled = 0;
        self.total_read = 0;
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
    }

    fn grow_if_full(&mut self) {
        if self.filled == self.buf.len() {
            let new_len = self.buf.len() + self.io_buffer_size;
            self.buf.resize(new_len, 0);
        }
    }

    /// Drives the consumer until it signals completion, an I/O error
    /// occurs, or the fd would block.
    pub fn read<C>(&mut self, mut consumer: C) -> Result<Poll<()>, IoError>
        where C: FnMut(&[u8]) -> Consumed
    {
        loop {
            if self.pos < self.filled {
                match consumer(&self.buf[self.pos..self.filled]) {
                    Consumed::Done(n) => {
                        self.pos += n;
                        return Ok(Poll::Ready(()));
                    }
                    Consumed::NeedMore => {}
                }
            }
            self.compact();
            self.grow_if_full();
            match raw_read(self.fd, &mut self.buf[self.filled..]) {
                Ok(0) => return Err(IoError::Ended),
                Ok(n) => {
                    self.filled += n;
                    self.total_read += n;
                }
                Err(err) if would_block(&err) => return Ok(Poll::Pending),
                Err(err) => return Err(IoError::Os(err)),
            }
        }
    }
}

/// Dual to `Reader`: queues bytes, writes non-blockingly, and reports
/// whether everything queued so far has drained.
pub struct Writer {
    fd: RawFd,
    buf: Vec<u8>,
    pos: usize,
}

impl Writer {
    pub fn new(fd: RawFd) -> Writer {
        Writer { fd, buf: Vec::new(), pos: 0 }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn queue(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn is_drained(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Writes until the queued buffer is drained or the fd would block.
    pub fn write(&mut self) -> Result<Poll<()>, IoError> {
        while self.pos < self.buf.len() {
            match raw_write(self.fd, &self.buf[self.pos..]) {
                Ok(0) => return Err(IoError::Ended),
                Ok(n) => self.pos += n,
                Err(err) if would_block(&err) => return Ok(Poll::Pending),
                Err(err) => return Err(IoError::Os(err)),
            }
        }
        self.buf.clear();
        self.pos = 0;
        Ok(Poll::Ready(()))
    }
}
