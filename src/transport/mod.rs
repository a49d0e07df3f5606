//! Transport module - TCP connect/accept and socket setup.
//!
//! Provides:
//! - [`TcpServer`] - listener producing server-role sessions
//! - [`TcpClient`] - connector producing client-role sessions

mod tcp;

pub use tcp::{TcpClient, TcpServer};
