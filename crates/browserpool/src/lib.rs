//! Browserpool backend library.
//!
//! Provisions ephemeral, containerized headless-browser instances and hands
//! callers a reachable remote-debugging URL. The core is the session
//! lifecycle controller in [`session`]; the HTTP surface in [`api`] is a
//! thin layer over it.

pub mod api;
pub mod config;
pub mod container;
pub mod discovery;
pub mod ports;
pub mod session;
