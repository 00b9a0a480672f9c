//! Suspension primitive shared by every fiber-bound I/O protocol (spec.md
//! §3, §4.E, §9 Design Notes).
//!
//! Rust has no portable, safe way to suspend an arbitrary call stack, so
//! rather than reach for an unsafe stack-switching crate, suspension here
//! is the explicit state-machine encoding spec.md §9 sanctions: "the
//! state is the parser phase + I/O pending flag". `conn::Connection`'s
//! `Phase` enum *is* that state machine directly — there is no separate
//! generic coroutine type wrapping it. `Poll` is the shared vocabulary
//! for "did this suspension point make progress": every fiber-bound
//! protocol (`fiber::io::Reader`/`Writer`) and the connection handler
//! built on them returns it instead of blocking.
/// Result of polling a suspension point: either it completed, or it
/// needs another reactor readiness event before it can make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}
