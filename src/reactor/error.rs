//! Reactor-fatal and kernel-wrapper error kinds (spec.md §7: "Resource
//! errors" and "Logic errors").
use std::io;

quick_error! {
    /// Errors that escape the event loop rather than being routed to a
    /// client's `error()` callback.
    ///
    /// Per spec.md §7, `ENOMEM`/`EINVAL` from epoll are reactor-fatal and
    /// propagate; everything else (`ENOENT`, `EBADF` on unregister) is
    /// swallowed at the call site instead of reaching this type.
    #[derive(Debug)]
    pub enum ReactorError {
        EpollCreate(err: io::Error) {
            description("failed to create epoll instance")
            display("failed to create epoll instance: {}", err)
        }
        EpollCtl(err: io::Error) {
            description("fatal epoll_ctl failure")
            display("fatal epoll_ctl failure: {}", err)
        }
        EpollWait(err: io::Error) {
            description("fatal epoll_wait failure")
            display("fatal epoll_wait failure: {}", err)
        }
        Kernel(err: io::Error) {
            from()
            description("kernel primitive wrapper failed")
            display("kernel primitive wrapper failed: {}", err)
        }
        /// Registering a second client on an fd that already has one, or
        /// swapping clients whose `fd` fields differ. Spec.md §3/§4.C
        /// class these as assertion-class logic errors.
        DuplicateRegistration { fd: i32 } {
            description("fd already has a registered client")
            display("fd {} already has a registered client", fd)
        }
        NotRegistered { fd: i32 } {
            description("fd has no registered client")
            display("fd {} has no registered client", fd)
        }
    }
}
