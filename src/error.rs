use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::object_path::ObjectPathError;
use crate::signature::SignatureError;

/// Result alias using [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The well-known D-Bus error name used for [`Error::Runtime`].
pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";

/// An error produced by this crate.
///
/// This folds two distinct concerns into one type, matching how the
/// original design treats them: low-level wire/transport failures (a
/// malformed frame, a closed socket, an unsupported signature), and the
/// RPC-level error taxonomy that application handlers raise and that
/// travels over the bus as a D-Bus `ERROR` message.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// Construct a generic application-defined runtime error.
    pub fn runtime(code: i32, message: impl Into<String>) -> Error {
        Self::new(ErrorKind::Runtime {
            code,
            message: message.into(),
        })
    }

    /// Construct an error carrying an explicit, caller-chosen D-Bus error
    /// name.
    pub fn user(name: impl Into<String>, message: impl Into<String>) -> Error {
        Self::new(ErrorKind::User {
            name: name.into(),
            message: message.into(),
        })
    }

    /// Construct a transport-level error. These never appear on the wire;
    /// they describe a local condition (a cancelled call observed late, a
    /// socket that vanished, a call that outlived its timeout).
    pub fn transport(message: impl Into<String>) -> Error {
        Self::new(ErrorKind::Transport(message.into()))
    }

    /// The D-Bus error name this error would be reported under, if put on
    /// the wire as a method-call `ERROR` reply.
    pub fn wire_name(&self) -> &str {
        match &self.kind {
            ErrorKind::Runtime { .. } => FAILED,
            ErrorKind::User { name, .. } => name,
            _ => FAILED,
        }
    }

    /// The body that would accompany this error as a single string
    /// argument, if put on the wire.
    pub fn wire_message(&self) -> String {
        match &self.kind {
            ErrorKind::Runtime { code, message } => format!("{code} {message}"),
            ErrorKind::User { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Parse an incoming D-Bus `ERROR` message back into the RPC taxonomy.
    pub(crate) fn from_wire(error_name: &str, body: Option<&str>) -> Error {
        if error_name == FAILED {
            if let Some(body) = body {
                if let Some((code, message)) = body.split_once(' ') {
                    if let Ok(code) = code.parse::<i32>() {
                        return Self::runtime(code, message);
                    }
                }
            }

            return Self::runtime(0, body.unwrap_or_default());
        }

        Self::user(error_name, body.unwrap_or_default())
    }

    /// Test if this error is a [`Error::Runtime`] with the given code.
    pub fn is_runtime(&self) -> bool {
        matches!(self.kind, ErrorKind::Runtime { .. })
    }

    /// Test if this error is a [`Error::Transport`] error.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport(..))
    }

    /// Test if the error indicates that the operation would block.
    #[inline]
    pub(crate) fn would_block(&self) -> bool {
        matches!(self.kind, ErrorKind::WouldBlock)
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<ObjectPathError> for Error {
    #[inline]
    fn from(error: ObjectPathError) -> Self {
        Self::new(ErrorKind::ObjectPath(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock => Self::new(ErrorKind::WouldBlock),
            _ => Self::new(ErrorKind::Io(error)),
        }
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8Error(error))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::ObjectPath(error) => Some(error),
            ErrorKind::Utf8Error(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    // NOTE: `Clone` is implemented by hand below rather than derived,
    // because `io::Error` is not `Clone`; an async reply waiter and a
    // dispatcher-level `CallState` snapshot both need their own copy of the
    // same outcome.
    /// Application-level failure reported by a method handler.
    Runtime { code: i32, message: String },
    /// Application-level failure with a caller-chosen D-Bus error name.
    User { name: String, message: String },
    /// Local transport failure; never appears on the wire.
    Transport(String),
    Io(io::Error),
    Signature(SignatureError),
    ObjectPath(ObjectPathError),
    Utf8Error(Utf8Error),
    WouldBlock,
    BufferUnderflow,
    MissingBus,
    InvalidAddress,
    InvalidSasl,
    InvalidSaslResponse,
    InvalidProtocol,
    MissingPath,
    MissingMember,
    MissingReplySerial,
    MissingErrorName,
    NotNullTerminated,
    ArrayTooLong(u32),
    BodyTooLong(u32),
    MessageTooLong,
    DecodeMismatch { expected: &'static str, found: String },
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
        }
    }
}

impl Clone for ErrorKind {
    fn clone(&self) -> Self {
        match self {
            ErrorKind::Runtime { code, message } => ErrorKind::Runtime {
                code: *code,
                message: message.clone(),
            },
            ErrorKind::User { name, message } => ErrorKind::User {
                name: name.clone(),
                message: message.clone(),
            },
            ErrorKind::Transport(message) => ErrorKind::Transport(message.clone()),
            // `io::Error` does not implement `Clone`; its kind and message
            // are preserved, its `source()` chain is not.
            ErrorKind::Io(error) => ErrorKind::Io(io::Error::new(error.kind(), error.to_string())),
            ErrorKind::Signature(error) => ErrorKind::Signature(*error),
            ErrorKind::ObjectPath(error) => ErrorKind::ObjectPath(*error),
            ErrorKind::Utf8Error(error) => ErrorKind::Utf8Error(*error),
            ErrorKind::WouldBlock => ErrorKind::WouldBlock,
            ErrorKind::BufferUnderflow => ErrorKind::BufferUnderflow,
            ErrorKind::MissingBus => ErrorKind::MissingBus,
            ErrorKind::InvalidAddress => ErrorKind::InvalidAddress,
            ErrorKind::InvalidSasl => ErrorKind::InvalidSasl,
            ErrorKind::InvalidSaslResponse => ErrorKind::InvalidSaslResponse,
            ErrorKind::InvalidProtocol => ErrorKind::InvalidProtocol,
            ErrorKind::MissingPath => ErrorKind::MissingPath,
            ErrorKind::MissingMember => ErrorKind::MissingMember,
            ErrorKind::MissingReplySerial => ErrorKind::MissingReplySerial,
            ErrorKind::MissingErrorName => ErrorKind::MissingErrorName,
            ErrorKind::NotNullTerminated => ErrorKind::NotNullTerminated,
            ErrorKind::ArrayTooLong(n) => ErrorKind::ArrayTooLong(*n),
            ErrorKind::BodyTooLong(n) => ErrorKind::BodyTooLong(*n),
            ErrorKind::MessageTooLong => ErrorKind::MessageTooLong,
            ErrorKind::DecodeMismatch { expected, found } => ErrorKind::DecodeMismatch {
                expected,
                found: found.clone(),
            },
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Runtime { code, message } => write!(f, "runtime error {code}: {message}"),
            ErrorKind::User { name, message } => write!(f, "{name}: {message}"),
            ErrorKind::Transport(message) => write!(f, "transport error: {message}"),
            ErrorKind::Io(error) => error.fmt(f),
            ErrorKind::Signature(error) => error.fmt(f),
            ErrorKind::ObjectPath(error) => error.fmt(f),
            ErrorKind::Utf8Error(error) => error.fmt(f),
            ErrorKind::WouldBlock => write!(f, "would block"),
            ErrorKind::BufferUnderflow => write!(f, "buffer underflow"),
            ErrorKind::MissingBus => write!(f, "missing session bus address"),
            ErrorKind::InvalidAddress => write!(f, "invalid d-bus address"),
            ErrorKind::InvalidSasl => write!(f, "invalid SASL message"),
            ErrorKind::InvalidSaslResponse => write!(f, "invalid SASL response"),
            ErrorKind::InvalidProtocol => write!(f, "invalid protocol"),
            ErrorKind::MissingPath => write!(f, "missing required PATH header"),
            ErrorKind::MissingMember => write!(f, "missing required MEMBER header"),
            ErrorKind::MissingReplySerial => write!(f, "missing required REPLY_SERIAL header"),
            ErrorKind::MissingErrorName => write!(f, "missing required ERROR_NAME header"),
            ErrorKind::NotNullTerminated => write!(f, "string is not null terminated"),
            ErrorKind::ArrayTooLong(n) => write!(f, "array of length {n} exceeds the 64 MiB limit"),
            ErrorKind::BodyTooLong(n) => write!(f, "body of length {n} exceeds the 128 MiB limit"),
            ErrorKind::MessageTooLong => write!(f, "message is too long"),
            ErrorKind::DecodeMismatch { expected, found } => {
                write!(f, "expected a `{expected}` argument, found `{found}`")
            }
        }
    }
}
