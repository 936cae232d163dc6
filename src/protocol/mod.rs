//! HTLC scripts, protocol messages and their transport.

pub mod contract;
pub mod error;
pub mod exchange;
pub mod messages;

pub use contract::LockData;
pub use exchange::{Exchanger, TcpExchanger};
pub use messages::TradeMessage;
