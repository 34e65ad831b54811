//! D-Bus messages: the borrowed [`Message`] view produced while decoding off
//! the wire, the [`OwnedMessage`] variant that outlives the buffer it came
//! from, and the framing logic connecting both to [`OwnedBuf`]/[`ReadBuf`].

use std::num::NonZeroU32;

use crate::buf::{BodyBuf, BufMut, OwnedBuf, ReadBuf};
use crate::codec::{Decode, Encode};
use crate::error::{Error, ErrorKind, Result};
use crate::object_path::{ObjectPath, OwnedObjectPath};
use crate::protocol::{Endianness, Flags, Header, HeaderField, MessageType};
use crate::signature::{OwnedSignature, Signature};
use crate::variant::{alignment_of, Variant};

/// The kind of a borrowed [`Message`], carrying whatever fields are unique
/// to that message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageKind<'a> {
    /// A method call. May prompt a reply unless `NO_REPLY_EXPECTED` is set.
    MethodCall {
        /// The object being called.
        path: &'a ObjectPath,
        /// The method being called.
        member: &'a str,
    },
    /// A successful method reply.
    MethodReturn {
        /// The serial of the call this replies to.
        reply_serial: NonZeroU32,
    },
    /// An error reply.
    Error {
        /// The D-Bus error name, e.g. `org.freedesktop.DBus.Error.Failed`.
        error_name: &'a str,
        /// The serial of the call this replies to.
        reply_serial: NonZeroU32,
    },
    /// A signal emission.
    Signal {
        /// The object the signal was emitted from.
        path: &'a ObjectPath,
        /// The signal being emitted.
        member: &'a str,
    },
}

impl MessageKind<'_> {
    fn to_owned(self) -> OwnedMessageKind {
        match self {
            MessageKind::MethodCall { path, member } => OwnedMessageKind::MethodCall {
                path: path.to_owned(),
                member: member.into(),
            },
            MessageKind::MethodReturn { reply_serial } => {
                OwnedMessageKind::MethodReturn { reply_serial }
            }
            MessageKind::Error {
                error_name,
                reply_serial,
            } => OwnedMessageKind::Error {
                error_name: error_name.into(),
                reply_serial,
            },
            MessageKind::Signal { path, member } => OwnedMessageKind::Signal {
                path: path.to_owned(),
                member: member.into(),
            },
        }
    }
}

/// A borrowed D-Bus message, either freshly built for sending or decoded
/// from a receive buffer.
#[derive(Debug)]
pub struct Message<'a> {
    pub(crate) kind: MessageKind<'a>,
    pub(crate) serial: Option<NonZeroU32>,
    pub(crate) flags: Flags,
    pub(crate) interface: Option<&'a str>,
    pub(crate) destination: Option<&'a str>,
    pub(crate) sender: Option<&'a str>,
    pub(crate) signature: &'a Signature,
    pub(crate) body: ReadBuf<'a>,
}

impl<'a> Message<'a> {
    /// Construct a method call message.
    pub fn method_call(path: &'a ObjectPath, member: &'a str) -> Self {
        Self {
            kind: MessageKind::MethodCall { path, member },
            serial: None,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: Signature::EMPTY,
            body: ReadBuf::empty(),
        }
    }

    /// Construct a signal message.
    pub fn signal(path: &'a ObjectPath, member: &'a str) -> Self {
        Self {
            kind: MessageKind::Signal { path, member },
            serial: None,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: Signature::EMPTY,
            body: ReadBuf::empty(),
        }
    }

    /// Build a method-return reply addressed back to this message's sender.
    pub fn method_return(&self) -> Result<Message<'a>> {
        let reply_serial = self.serial.ok_or_else(|| Error::new(ErrorKind::MissingReplySerial))?;

        Ok(Message {
            kind: MessageKind::MethodReturn { reply_serial },
            serial: None,
            flags: Flags::EMPTY,
            interface: None,
            destination: self.sender,
            sender: self.destination,
            signature: Signature::EMPTY,
            body: ReadBuf::empty(),
        })
    }

    /// Build an error reply addressed back to this message's sender.
    pub fn error_reply(&self, error_name: &'a str) -> Result<Message<'a>> {
        let reply_serial = self.serial.ok_or_else(|| Error::new(ErrorKind::MissingReplySerial))?;

        Ok(Message {
            kind: MessageKind::Error {
                error_name,
                reply_serial,
            },
            serial: None,
            flags: Flags::EMPTY,
            interface: None,
            destination: self.sender,
            sender: self.destination,
            signature: Signature::EMPTY,
            body: ReadBuf::empty(),
        })
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageKind<'a> {
        self.kind
    }

    /// The serial this message was (or will be) sent with.
    pub fn serial(&self) -> Option<NonZeroU32> {
        self.serial
    }

    /// Set the body and signature of this message to that of `body`.
    #[must_use]
    pub fn with_body(self, body: &'a BodyBuf) -> Self {
        Self {
            signature: body.signature(),
            body: body.read_buf(),
            ..self
        }
    }

    #[must_use]
    pub fn with_serial(self, serial: NonZeroU32) -> Self {
        Self {
            serial: Some(serial),
            ..self
        }
    }

    #[must_use]
    pub fn with_flags(self, flags: Flags) -> Self {
        Self { flags, ..self }
    }

    #[must_use]
    pub fn with_interface(self, interface: &'a str) -> Self {
        Self {
            interface: Some(interface),
            ..self
        }
    }

    #[must_use]
    pub fn with_destination(self, destination: &'a str) -> Self {
        Self {
            destination: Some(destination),
            ..self
        }
    }

    #[must_use]
    pub fn with_sender(self, sender: &'a str) -> Self {
        Self {
            sender: Some(sender),
            ..self
        }
    }

    /// The interface this message is addressed to or came from, if any.
    pub fn interface(&self) -> Option<&'a str> {
        self.interface
    }

    /// The destination bus name, if any.
    pub fn destination(&self) -> Option<&'a str> {
        self.destination
    }

    /// The sending bus name, as filled in by the bus, if any.
    pub fn sender(&self) -> Option<&'a str> {
        self.sender
    }

    /// The flags carried by this message.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The signature of this message's body.
    pub fn signature(&self) -> &'a Signature {
        self.signature
    }

    /// A fresh cursor over the body.
    pub fn body(&self) -> ReadBuf<'a> {
        self.body.clone()
    }

    /// Convert to an owned message that outlives the original buffer.
    pub fn to_owned(&self) -> OwnedMessage {
        OwnedMessage {
            kind: self.kind.to_owned(),
            serial: self.serial,
            flags: self.flags,
            interface: self.interface.map(Box::from),
            destination: self.destination.map(Box::from),
            sender: self.sender.map(Box::from),
            signature: self.signature.to_owned(),
            body: self.body.get().to_vec(),
            endianness: self.body.endianness(),
        }
    }

    pub(crate) fn message_type(&self) -> MessageType {
        match self.kind {
            MessageKind::MethodCall { .. } => MessageType::METHOD_CALL,
            MessageKind::MethodReturn { .. } => MessageType::METHOD_RETURN,
            MessageKind::Error { .. } => MessageType::ERROR,
            MessageKind::Signal { .. } => MessageType::SIGNAL,
        }
    }
}

/// The owning counterpart of [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedMessageKind {
    MethodCall {
        path: OwnedObjectPath,
        member: Box<str>,
    },
    MethodReturn {
        reply_serial: NonZeroU32,
    },
    Error {
        error_name: Box<str>,
        reply_serial: NonZeroU32,
    },
    Signal {
        path: OwnedObjectPath,
        member: Box<str>,
    },
}

/// An owned D-Bus message, able to outlive the receive buffer it was
/// decoded from. Useful when a message must cross an `.await` point after
/// the connection's buffer may have been reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    pub(crate) kind: OwnedMessageKind,
    pub(crate) serial: Option<NonZeroU32>,
    pub(crate) flags: Flags,
    pub(crate) interface: Option<Box<str>>,
    pub(crate) destination: Option<Box<str>>,
    pub(crate) sender: Option<Box<str>>,
    pub(crate) signature: OwnedSignature,
    pub(crate) body: Vec<u8>,
    pub(crate) endianness: Endianness,
}

impl OwnedMessage {
    /// Borrow this message back out as a [`Message`].
    pub fn borrow(&self) -> Message<'_> {
        let kind = match &self.kind {
            OwnedMessageKind::MethodCall { path, member } => MessageKind::MethodCall {
                path: path.as_object_path(),
                member,
            },
            OwnedMessageKind::MethodReturn { reply_serial } => MessageKind::MethodReturn {
                reply_serial: *reply_serial,
            },
            OwnedMessageKind::Error {
                error_name,
                reply_serial,
            } => MessageKind::Error {
                error_name,
                reply_serial: *reply_serial,
            },
            OwnedMessageKind::Signal { path, member } => MessageKind::Signal {
                path: path.as_object_path(),
                member,
            },
        };

        Message {
            kind,
            serial: self.serial,
            flags: self.flags,
            interface: self.interface.as_deref(),
            destination: self.destination.as_deref(),
            sender: self.sender.as_deref(),
            signature: self.signature.as_signature(),
            body: ReadBuf::new(&self.body, self.endianness),
        }
    }

    /// The kind of this message.
    pub fn kind(&self) -> &OwnedMessageKind {
        &self.kind
    }

    /// A fresh cursor over the body.
    pub fn body(&self) -> ReadBuf<'_> {
        ReadBuf::new(&self.body, self.endianness)
    }

    /// The signature of this message's body.
    pub fn signature(&self) -> &Signature {
        self.signature.as_signature()
    }
}

/// Append `message`'s header and body to `buf`, assigning it `serial`.
///
/// Any `UNIX_FD` arguments referenced by the message's body (see
/// [`Message::with_body`]) are reported in the `UNIX_FDS` header field; the
/// caller is responsible for sending the same descriptors alongside the
/// returned bytes via `SCM_RIGHTS`, which it can retrieve with
/// `message.body().fds()`.
pub(crate) fn encode_message(buf: &mut OwnedBuf, message: &Message<'_>, serial: NonZeroU32) {
    let fds = message.body.fds();
    let mut fields: Vec<(u8, Variant)> = Vec::new();

    match message.kind {
        MessageKind::MethodCall { path, member } => {
            fields.push((HeaderField::PATH.0, Variant::new(path)));
            fields.push((HeaderField::MEMBER.0, Variant::new(member)));
        }
        MessageKind::MethodReturn { reply_serial } => {
            fields.push((HeaderField::REPLY_SERIAL.0, Variant::new(&reply_serial.get())));
        }
        MessageKind::Error {
            error_name,
            reply_serial,
        } => {
            fields.push((HeaderField::ERROR_NAME.0, Variant::new(error_name)));
            fields.push((HeaderField::REPLY_SERIAL.0, Variant::new(&reply_serial.get())));
        }
        MessageKind::Signal { path, member } => {
            fields.push((HeaderField::PATH.0, Variant::new(path)));
            fields.push((HeaderField::MEMBER.0, Variant::new(member)));
        }
    }

    if let Some(interface) = message.interface {
        fields.push((HeaderField::INTERFACE.0, Variant::new(interface)));
    }

    if let Some(destination) = message.destination {
        fields.push((HeaderField::DESTINATION.0, Variant::new(destination)));
    }

    if let Some(sender) = message.sender {
        fields.push((HeaderField::SENDER.0, Variant::new(sender)));
    }

    if !message.signature.is_empty() {
        fields.push((HeaderField::SIGNATURE.0, Variant::new(message.signature)));
    }

    if !fds.is_empty() {
        fields.push((HeaderField::UNIX_FDS.0, Variant::new(&(fds.len() as u32))));
    }

    let body = message.body.get();

    let header = Header {
        endianness: buf.endianness(),
        message_type: message.message_type(),
        flags: message.flags,
        version: 1,
        body_length: body.len() as u32,
        serial: serial.get(),
    };

    // Assembled in its own buffer, starting at relative offset zero, so
    // that the padding computed for the header-fields array and the body
    // lines up with the alignment rules, which are always relative to the
    // start of a message rather than wherever `buf` currently ends.
    let mut frame = BodyBuf::with_endianness(buf.endianness());
    frame.store(header);
    frame.write(&fields);
    frame.align_to(8);
    frame.extend_from_slice(body);

    buf.extend_from_slice(frame.get());
}

/// Decode a single message out of `data`, which must hold exactly the bytes
/// following the 12-byte fixed header (i.e. starting at the header-fields
/// array's length prefix) through the end of the body.
pub(crate) fn decode_message<'a>(header: Header, data: ReadBuf<'a>) -> Result<Message<'a>> {
    let mut data = data;

    let array_len = data.load::<u32>()? as usize;
    data.align_to(8)?;
    let mut array = data.read_buf(array_len)?;

    let mut path = None;
    let mut member = None;
    let mut error_name = None;
    let mut reply_serial = None;
    let mut interface = None;
    let mut destination = None;
    let mut sender = None;
    let mut signature: &Signature = Signature::EMPTY;

    while !array.is_empty() {
        array.align_to(8)?;
        let code = array.load::<u8>()?;
        let sig_len = array.load::<u8>()? as usize;
        let sig_bytes = array.load_slice_nul(sig_len)?;
        let first = sig_bytes.first().copied().unwrap_or(b'y');
        array.align_to(alignment_of(first))?;

        match code {
            c if c == HeaderField::PATH.0 => path = Some(<&ObjectPath>::decode(&mut array)?),
            c if c == HeaderField::MEMBER.0 => member = Some(<&str>::decode(&mut array)?),
            c if c == HeaderField::ERROR_NAME.0 => error_name = Some(<&str>::decode(&mut array)?),
            c if c == HeaderField::REPLY_SERIAL.0 => {
                let value = u32::decode(&mut array)?;
                reply_serial =
                    Some(NonZeroU32::new(value).ok_or_else(|| Error::new(ErrorKind::InvalidProtocol))?);
            }
            c if c == HeaderField::INTERFACE.0 => interface = Some(<&str>::decode(&mut array)?),
            c if c == HeaderField::DESTINATION.0 => destination = Some(<&str>::decode(&mut array)?),
            c if c == HeaderField::SENDER.0 => sender = Some(<&str>::decode(&mut array)?),
            c if c == HeaderField::SIGNATURE.0 => signature = <&Signature>::decode(&mut array)?,
            c if c == HeaderField::UNIX_FDS.0 => {
                u32::decode(&mut array)?;
            }
            _ => {
                // Unknown header field: skip its value using the generic
                // signature interpreter.
                crate::variant::skip_one(sig_bytes, &mut array)?;
            }
        }
    }

    let kind = match header.message_type {
        MessageType::METHOD_CALL => MessageKind::MethodCall {
            path: path.ok_or_else(|| Error::new(ErrorKind::MissingPath))?,
            member: member.ok_or_else(|| Error::new(ErrorKind::MissingMember))?,
        },
        MessageType::METHOD_RETURN => MessageKind::MethodReturn {
            reply_serial: reply_serial.ok_or_else(|| Error::new(ErrorKind::MissingReplySerial))?,
        },
        MessageType::ERROR => MessageKind::Error {
            error_name: error_name.ok_or_else(|| Error::new(ErrorKind::MissingErrorName))?,
            reply_serial: reply_serial.ok_or_else(|| Error::new(ErrorKind::MissingReplySerial))?,
        },
        MessageType::SIGNAL => MessageKind::Signal {
            path: path.ok_or_else(|| Error::new(ErrorKind::MissingPath))?,
            member: member.ok_or_else(|| Error::new(ErrorKind::MissingMember))?,
        },
        _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
    };

    let serial = NonZeroU32::new(header.serial);
    data.align_to(8)?;
    let body = data.read_buf(header.body_length as usize)?;

    Ok(Message {
        kind,
        serial,
        flags: header.flags,
        interface,
        destination,
        sender,
        signature,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Endianness;

    #[test]
    fn round_trips_method_call() {
        let path = ObjectPath::new("/org/freedesktop/DBus").unwrap();
        let mut body = BodyBuf::new();
        body.write(&"Hello".to_owned());

        let message = Message::method_call(path, "Ping")
            .with_interface("org.freedesktop.DBus")
            .with_destination("org.freedesktop.DBus")
            .with_body(&body);

        let mut out = OwnedBuf::with_endianness(Endianness::NATIVE);
        let serial = NonZeroU32::new(1).unwrap();
        encode_message(&mut out, &message, serial);

        let mut read = out.read_buf(out.len());
        let header = read.load::<Header>().unwrap();
        let decoded = decode_message(header, read).unwrap();

        assert_eq!(
            decoded.kind(),
            MessageKind::MethodCall {
                path,
                member: "Ping"
            }
        );
        assert_eq!(decoded.interface(), Some("org.freedesktop.DBus"));
        assert_eq!(decoded.destination(), Some("org.freedesktop.DBus"));
        assert_eq!(decoded.signature().as_str(), "s");
        assert_eq!(String::decode(&mut decoded.body()).unwrap(), "Hello");
    }

    #[test]
    fn round_trips_signal_with_no_body() {
        let path = ObjectPath::new("/org/freedesktop/DBus").unwrap();
        let message = Message::signal(path, "NameOwnerChanged").with_interface("org.freedesktop.DBus");

        let mut out = OwnedBuf::with_endianness(Endianness::NATIVE);
        let serial = NonZeroU32::new(7).unwrap();
        encode_message(&mut out, &message, serial);

        let mut read = out.read_buf(out.len());
        let header = read.load::<Header>().unwrap();
        let decoded = decode_message(header, read).unwrap();

        assert_eq!(
            decoded.kind(),
            MessageKind::Signal {
                path,
                member: "NameOwnerChanged"
            }
        );
        assert!(decoded.signature().is_empty());
    }
}
