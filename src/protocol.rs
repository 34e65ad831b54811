//! Low level details of the D-Bus wire protocol.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor};

use crate::frame::Frame;

/// The fixed D-Bus protocol header that precedes every message.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct Header {
    pub(crate) endianness: Endianness,
    pub(crate) message_type: MessageType,
    pub(crate) flags: Flags,
    pub(crate) version: u8,
    pub(crate) body_length: u32,
    pub(crate) serial: u32,
}

unsafe impl Frame for Header {
    fn adjust(&mut self, endianness: Endianness) {
        self.body_length.adjust(endianness);
        self.serial.adjust(endianness);
    }
}

macro_rules! raw_enum {
    (
        $(#[doc = $doc:literal])*
        #[repr($repr:ty)]
        $vis:vis enum $name:ident {
            $(
                $(#[$($variant_meta:meta)*])*
                $variant:ident = $value:expr
            ),* $(,)?
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        #[repr(transparent)]
        $vis struct $name(pub(crate) $repr);

        impl $name {
            $(
                $(#[$($variant_meta)*])*
                $vis const $variant: Self = Self($value);
            )*
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match *self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)*
                    _ => f.write_str("INVALID"),
                }
            }
        }
    }
}

macro_rules! raw_set {
    (
        $(#[doc = $doc:literal])*
        #[repr($repr:ty)]
        $vis:vis enum $name:ident {
            $(
                $(#[$($variant_meta:meta)*])*
                $variant:ident = $value:expr
            ),* $(,)?
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        #[repr(transparent)]
        $vis struct $name(pub(crate) $repr);

        impl $name {
            $(
                $(#[$($variant_meta)*])*
                $vis const $variant: Self = Self($value);
            )*
        }
    }
}

raw_enum! {
    /// The byte ordering used by a message.
    #[repr(u8)]
    pub enum Endianness {
        /// Little endian, the ASCII letter `l`.
        LITTLE = b'l',
        /// Big endian, the ASCII letter `B`.
        BIG = b'B',
    }
}

impl Endianness {
    #[cfg(target_endian = "little")]
    pub(crate) const NATIVE: Self = Self::LITTLE;
    #[cfg(target_endian = "big")]
    pub(crate) const NATIVE: Self = Self::BIG;
}

raw_enum! {
    /// The type of a message.
    #[repr(u8)]
    pub(crate) enum MessageType {
        METHOD_CALL = 1,
        METHOD_RETURN = 2,
        ERROR = 3,
        SIGNAL = 4,
    }
}

unsafe impl Frame for MessageType {
    #[inline]
    fn adjust(&mut self, _: Endianness) {}
}

raw_set! {
    /// Flags carried by a message.
    #[repr(u8)]
    pub enum Flags {
        /// An empty set of flags.
        EMPTY = 0,
        /// No method return or error reply is expected for this message.
        NO_REPLY_EXPECTED = 1,
        /// The bus must not auto-start a service to deliver this message.
        NO_AUTO_START = 2,
        /// The caller is prepared to wait for interactive authorization.
        ALLOW_INTERACTIVE_AUTHORIZATION = 4,
    }
}

unsafe impl Frame for Flags {
    #[inline]
    fn adjust(&mut self, _: Endianness) {}
}

impl BitOr<Flags> for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Flags) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd<Flags> for Flags {
    type Output = bool;

    #[inline]
    fn bitand(self, rhs: Flags) -> Self::Output {
        self.0 & rhs.0 != 0
    }
}

impl BitXor<Flags> for Flags {
    type Output = Self;

    #[inline]
    fn bitxor(self, rhs: Flags) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

raw_enum! {
    /// A header field discriminant, as defined by the D-Bus specification.
    #[repr(u8)]
    pub(crate) enum HeaderField {
        PATH = 1,
        INTERFACE = 2,
        MEMBER = 3,
        ERROR_NAME = 4,
        REPLY_SERIAL = 5,
        DESTINATION = 6,
        SENDER = 7,
        SIGNATURE = 8,
        UNIX_FDS = 9,
    }
}

unsafe impl Frame for HeaderField {
    #[inline]
    fn adjust(&mut self, _: Endianness) {}
}

raw_enum! {
    /// The type code inside of a signature.
    #[repr(u8)]
    pub(crate) enum Type {
        INVALID = b'\0',
        BYTE = b'y',
        BOOLEAN = b'b',
        INT16 = b'n',
        UINT16 = b'q',
        INT32 = b'i',
        UINT32 = b'u',
        INT64 = b'x',
        UINT64 = b't',
        DOUBLE = b'd',
        STRING = b's',
        OBJECT_PATH = b'o',
        SIGNATURE = b'g',
        ARRAY = b'a',
        STRUCT = b'r',
        OPEN_PAREN = b'(',
        CLOSE_PAREN = b')',
        VARIANT = b'v',
        DICT_ENTRY = b'e',
        OPEN_BRACE = b'{',
        CLOSE_BRACE = b'}',
        UNIX_FD = b'h',
    }
}
