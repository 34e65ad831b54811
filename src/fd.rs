//! Ownership-transferring wrapper around a UNIX file descriptor, used for
//! the `UNIX_FD` D-Bus type.

use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::buf::{BodyBuf, ReadBuf};
use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};
use crate::signature::OwnedSignature;

/// An owned file descriptor carried as an argument of a D-Bus message.
///
/// On the wire this is encoded as a `UINT32` index into the message's
/// out-of-band array of descriptors (transferred alongside the message
/// bytes via `SCM_RIGHTS`); [`Fd::encode`] and [`Fd::decode`] only ever see
/// that index; it is [`crate::connection::Connection`] that is responsible
/// for threading the real descriptors through.
pub struct Fd {
    inner: OwnedFd,
}

impl Fd {
    /// Take ownership of a raw file descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open, uniquely-owned file descriptor.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            inner: OwnedFd::from_raw_fd(fd),
        }
    }

    /// Wrap an already-owned file descriptor.
    pub fn new(inner: OwnedFd) -> Self {
        Self { inner }
    }

    /// Borrow the underlying raw file descriptor without transferring
    /// ownership.
    pub fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    /// Release ownership, returning the raw file descriptor. The caller
    /// becomes responsible for closing it.
    pub fn into_raw_fd(self) -> RawFd {
        self.inner.into_raw_fd()
    }

    /// Duplicate the descriptor with `dup(2)`.
    pub fn try_clone(&self) -> Result<Self> {
        // SAFETY: `dup` either returns a freshly owned valid descriptor or
        // -1, which we check for below.
        let raw = unsafe { libc::dup(self.inner.as_raw_fd()) };

        if raw < 0 {
            return Err(Error::from(std::io::Error::last_os_error()));
        }

        // SAFETY: `dup` returned a uniquely owned descriptor.
        Ok(unsafe { Self::from_raw_fd(raw) })
    }
}

impl fmt::Debug for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fd").field("fd", &self.as_raw_fd()).finish()
    }
}

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl From<OwnedFd> for Fd {
    fn from(inner: OwnedFd) -> Self {
        Self { inner }
    }
}

impl Encode for Fd {
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('h')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        // The real index is backpatched by the connection once it knows
        // where this descriptor lands in the message's out-of-band array;
        // here we only reserve the slot.
        buf.store(buf.fds_len());
        buf.push_fd(self.as_raw_fd());
    }
}

impl<'de> Decode<'de> for Fd {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let index = buf.load::<u32>()?;
        buf.take_fd(index)
    }
}
