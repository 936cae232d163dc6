//! Message transport between buyer and seller.

use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::NetError,
    utill::{read_message, send_message},
};

use super::messages::TradeMessage;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const CONNECT_RETRY: Duration = Duration::from_millis(200);

/// A blocking, request-style channel to the counterparty.
pub trait Exchanger {
    fn send(&self, message: &TradeMessage) -> Result<(), NetError>;

    /// Wait for the next message. Fails with [NetError::ConnectionTimedOut] when none
    /// arrives in time.
    fn receive(&self) -> Result<TradeMessage, NetError>;
}

/// [Exchanger] over one TCP connection, framed as length-prefixed CBOR.
#[derive(Debug)]
pub struct TcpExchanger {
    stream: TcpStream,
}

impl TcpExchanger {
    /// Wrap a connected stream. Reads and writes give up after `timeout`.
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> Result<Self, NetError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(TcpExchanger { stream })
    }

    /// Connect to the seller, retrying until `timeout` passed.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, NetError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetError::ConnectionTimedOut);
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => {
                    log::info!("Connected to {}", addr);
                    return Self::from_stream(stream, timeout);
                }
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    log::debug!("{} not listening yet", addr);
                    thread::sleep(CONNECT_RETRY.min(remaining));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Accept the buyer's connection on `listener`, waiting at most `timeout`.
    pub fn accept(listener: &TcpListener, timeout: Duration) -> Result<Self, NetError> {
        listener.set_nonblocking(true)?;
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("Accepted connection from {}", addr);
                    return Self::from_stream(stream, timeout);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(NetError::ConnectionTimedOut);
                    }
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Exchanger for TcpExchanger {
    fn send(&self, message: &TradeMessage) -> Result<(), NetError> {
        log::debug!("==> {}", message);
        send_message(&mut &self.stream, message)
    }

    fn receive(&self) -> Result<TradeMessage, NetError> {
        let message: TradeMessage = read_message(&mut &self.stream)?;
        log::debug!("<== {}", message);
        Ok(message)
    }
}
