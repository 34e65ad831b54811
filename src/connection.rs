//! A blocking connection to a D-Bus bus: address resolution, the SASL
//! handshake, and message framing on top of a Unix-domain socket.

use std::env;
use std::ffi::{OsStr, OsString};
use std::io::{self, Read, Write};
use std::mem::size_of;
use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;

use crate::buf::{padding_to_align, BufMut, OwnedBuf, ReadBuf, MAX_ARRAY_LENGTH, MAX_BODY_LENGTH};
use crate::error::{Error, ErrorKind, Result};
use crate::message::{decode_message, encode_message, Message, OwnedMessage};
use crate::protocol::{Endianness, Header};
use crate::sasl::{self, Auth, SaslRequest, SaslResponse};

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// A connection to a D-Bus bus.
///
/// This is the blocking transport primitive: it owns the socket, the SASL
/// handshake, and message framing, but has no opinion on concurrency or
/// dispatch. [`crate::dispatcher::Dispatcher`] wraps it for async use.
pub struct Connection {
    stream: UnixStream,
    send: OwnedBuf,
    recv: OwnedBuf,
    next_serial: u32,
}

impl Connection {
    /// Connect to the session bus named by `DBUS_SESSION_BUS_ADDRESS`.
    pub fn session_bus() -> Result<Self> {
        Self::from_env(ENV_SESSION_BUS, None)
    }

    /// Connect to the system bus named by `DBUS_SYSTEM_BUS_ADDRESS`, falling
    /// back to the well-known system socket if that variable is unset.
    pub fn system_bus() -> Result<Self> {
        Self::from_env(ENV_SYSTEM_BUS, Some(DEFAULT_SYSTEM_BUS))
    }

    fn from_env(env: &str, default: Option<&str>) -> Result<Self> {
        let value;

        let address: &OsStr = match env::var_os(env) {
            Some(address) => {
                value = address;
                value.as_os_str()
            }
            None => match default {
                Some(default) => default.as_ref(),
                None => return Err(Error::new(ErrorKind::MissingBus)),
            },
        };

        let path = parse_unix_path(address)?;
        let stream = UnixStream::connect(&path)?;
        let mut connection = Self::from_std(stream);
        connection.authenticate()?;
        Ok(connection)
    }

    /// Wrap an already-connected Unix-domain socket. The caller is still
    /// responsible for calling [`authenticate`](Self::authenticate) before
    /// exchanging messages.
    pub(crate) fn from_std(stream: UnixStream) -> Self {
        Self {
            stream,
            send: OwnedBuf::new(),
            recv: OwnedBuf::new(),
            next_serial: 1,
        }
    }

    pub(crate) fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    /// Run the `EXTERNAL` SASL handshake followed by `BEGIN`, after which
    /// the socket speaks the binary message protocol.
    fn authenticate(&mut self) -> Result<()> {
        self.send.extend_from_slice(b"\0");

        let mut uid_buf = [0u8; 32];
        let auth = Auth::external_from_uid(&mut uid_buf);
        let mut line = Vec::new();
        sasl::encode_request(&SaslRequest::Auth(auth), &mut line);
        self.send.extend_from_slice(&line);
        self.send.extend_from_slice(b"\r\n");
        self.flush_send()?;

        let response = self.recv_sasl_line()?;

        match sasl::parse_response(&response)? {
            SaslResponse::Ok(_) => {}
        }

        self.send.extend_from_slice(b"BEGIN\r\n");
        self.flush_send()
    }

    fn recv_sasl_line(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(n) = self.recv.get().iter().position(|&b| b == b'\n') {
                let line = self.recv.get()[..=n].to_vec();
                self.recv.advance(n + 1);
                self.recv.compact();
                return Ok(line);
            }

            self.recv_fill(4096)?;
        }
    }

    fn recv_fill(&mut self, hint: usize) -> Result<()> {
        let spare = self.recv.spare_mut(hint);
        let n = (&mut &self.stream).read(spare)?;

        if n == 0 {
            return Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)));
        }

        self.recv.truncate_spare(hint - n);
        Ok(())
    }

    fn recv_exact(&mut self, n: usize) -> Result<()> {
        while self.recv.len() < n {
            self.recv_fill(4096.max(n - self.recv.len()))?;
        }

        Ok(())
    }

    pub(crate) fn flush_send(&mut self) -> Result<()> {
        while !self.send.is_empty() {
            let n = (&mut &self.stream).write(self.send.get())?;
            self.send.advance(n);
        }

        (&mut &self.stream).flush()?;
        self.send.compact();
        Ok(())
    }

    fn next_serial(&mut self) -> NonZeroU32 {
        loop {
            let serial = self.next_serial;
            self.next_serial = self.next_serial.wrapping_add(1);

            if let Some(serial) = NonZeroU32::new(serial) {
                return serial;
            }
        }
    }

    /// Encode `message` onto the outgoing buffer, assigning it a fresh
    /// serial, without flushing. Safe to call even while a previous flush is
    /// still pending, since it only ever appends.
    pub(crate) fn write_message(&mut self, message: &Message<'_>) -> NonZeroU32 {
        let serial = self.next_serial();
        encode_message(&mut self.send, message, serial);
        serial
    }

    /// Whether there are bytes queued by [`write_message`](Self::write_message)
    /// still waiting to be flushed.
    pub(crate) fn has_pending_send(&self) -> bool {
        !self.send.is_empty()
    }

    /// Send a message, assigning it a fresh serial, and return that serial.
    pub fn send(&mut self, message: &Message<'_>) -> Result<NonZeroU32> {
        let serial = self.write_message(message);
        self.flush_send()?;
        Ok(serial)
    }

    /// Block until the next full message arrives and return it.
    pub fn receive(&mut self) -> Result<OwnedMessage> {
        let prefix = size_of::<Header>() + size_of::<u32>();
        self.recv_exact(prefix)?;

        let endianness = match self.recv.get()[0] {
            b'l' => Endianness::LITTLE,
            b'B' => Endianness::BIG,
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        };

        let mut peek = ReadBuf::new(&self.recv.get()[..prefix], endianness);
        let header = peek.load::<Header>()?;

        if header.body_length > MAX_BODY_LENGTH {
            return Err(Error::new(ErrorKind::BodyTooLong(header.body_length)));
        }

        let headers = peek.load::<u32>()?;

        if headers > MAX_ARRAY_LENGTH {
            return Err(Error::new(ErrorKind::ArrayTooLong(headers)));
        }

        let headers = headers as usize;
        let body_length = header.body_length as usize;
        let total = size_of::<u32>() + headers + padding_to_align(8, headers) + body_length;

        self.recv_exact(size_of::<Header>() + total)?;
        self.recv.advance(size_of::<Header>());

        let message = {
            let data = self.recv.read_buf(total);
            let data = ReadBuf::new(data.get(), endianness);
            decode_message(header, data)?.to_owned()
        };

        self.recv.compact();
        Ok(message)
    }
}

impl AsRawFd for Connection {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

fn parse_unix_path(address: &OsStr) -> Result<OsString> {
    let full = address.as_bytes();
    let first = full.split(|&b| b == b';').next().unwrap_or(full);

    let Some((transport, rest)) = split_once(first, b':') else {
        return Err(Error::new(ErrorKind::InvalidAddress));
    };

    if transport != b"unix" {
        return Err(Error::new(ErrorKind::InvalidAddress));
    }

    for pair in rest.split(|&b| b == b',') {
        if let Some((key, value)) = split_once(pair, b'=') {
            if key == b"path" {
                return Ok(OsStr::from_bytes(value).to_owned());
            }
        }
    }

    Err(Error::new(ErrorKind::InvalidAddress))
}

fn split_once(bytes: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
    let index = bytes.iter().position(|&b| b == sep)?;
    Some((&bytes[..index], &bytes[index + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path_address() {
        let address = OsStr::new("unix:path=/run/user/1000/bus,guid=deadbeef");
        assert_eq!(parse_unix_path(address).unwrap(), OsStr::new("/run/user/1000/bus"));
    }

    #[test]
    fn rejects_non_unix_transport() {
        let address = OsStr::new("tcp:host=localhost,port=1234");
        assert!(parse_unix_path(address).is_err());
    }
}
