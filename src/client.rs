//! An asynchronous D-Bus client: a non-blocking wrapper around [`Connection`]
//! driven by a Tokio reactor.

use std::num::NonZeroU32;

use tokio::io::unix::AsyncFd;

use crate::connection::Connection;
use crate::error::Result;
use crate::message::{Message, OwnedMessage};

/// An asynchronous connection to a D-Bus bus.
///
/// Wraps a blocking [`Connection`] in an [`AsyncFd`], retrying any operation
/// that reports it would block once the socket becomes ready again. The
/// handshake that establishes the connection (address resolution plus the
/// SASL exchange) still runs to completion off the async runtime, since it
/// is a handful of round trips against a local socket; everything after
/// that point runs through the reactor.
pub struct Client {
    connection: AsyncFd<Connection>,
}

impl Client {
    /// Connect to the session bus named by `DBUS_SESSION_BUS_ADDRESS`.
    pub async fn session_bus() -> Result<Self> {
        let connection = tokio::task::spawn_blocking(Connection::session_bus)
            .await
            .expect("connection setup task panicked")?;
        Self::new(connection)
    }

    /// Connect to the system bus, falling back to the well-known system
    /// socket if `DBUS_SYSTEM_BUS_ADDRESS` is unset.
    pub async fn system_bus() -> Result<Self> {
        let connection = tokio::task::spawn_blocking(Connection::system_bus)
            .await
            .expect("connection setup task panicked")?;
        Self::new(connection)
    }

    fn new(connection: Connection) -> Result<Self> {
        connection.set_nonblocking(true)?;
        Ok(Self {
            connection: AsyncFd::new(connection)?,
        })
    }

    /// Send a message, assigning it a fresh serial, and return that serial.
    ///
    /// The message is encoded onto the outgoing buffer once, up front; only
    /// the flush is retried while waiting for the socket to become writable,
    /// so a would-block result never causes the message to be encoded twice.
    pub async fn send(&mut self, message: &Message<'_>) -> Result<NonZeroU32> {
        let serial = self.connection.get_mut().write_message(message);

        while self.connection.get_ref().has_pending_send() {
            let mut guard = self.connection.writable_mut().await?;

            match guard.get_inner_mut().flush_send() {
                Err(error) if error.would_block() => {
                    guard.clear_ready();
                    continue;
                }
                result => result?,
            }
        }

        Ok(serial)
    }

    /// Wait for the next full message to arrive and return it.
    pub async fn receive(&mut self) -> Result<OwnedMessage> {
        loop {
            let mut guard = self.connection.readable_mut().await?;

            match guard.get_inner_mut().receive() {
                Err(error) if error.would_block() => {
                    guard.clear_ready();
                    continue;
                }
                result => return result,
            }
        }
    }
}
