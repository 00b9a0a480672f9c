//! A single-threaded, epoll-driven HTTP/1.x server core.
//!
//! The crate is a composition of four pieces that only make sense
//! together: a [`reactor`] (epoll event loop plus a timer-backed timeout
//! manager), a [`fiber`] abstraction that lets connection handlers suspend
//! at I/O boundaries, an [`http`] module with a streaming request parser,
//! URL/cookie codecs and a response formatter, and [`conn`], the
//! connection handler that ties the three together.
//!
//! TLS, HTTP/2, compression, routing and process supervision are not
//! provided; this crate is meant to sit underneath all of those.
#[macro_use]
extern crate quick_error;

pub mod config;
pub mod reactor;
pub mod fiber;
pub mod http;
pub mod conn;

pub use config::Config;
pub use conn::{Connection, Handler};
