//! Network UPS Tools integration module
//!
//! - `client`: Protocol client (connect, login, variable listing)
//! - `translator`: Raw variables → structured status

pub mod client;
pub mod translator;

pub use client::{TcpConnector, UpsClient, UpsConnector};
pub use translator::translate;
