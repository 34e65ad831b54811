//! A strongly-typed D-Bus RPC framework: stubs, skeletons and a
//! Tokio-driven dispatcher built on top of a pure-Rust wire implementation.

pub use self::buf::{BodyBuf, OwnedBuf, ReadBuf};
pub mod buf;

pub use self::call_state::CallState;
mod call_state;

#[cfg(feature = "tokio")]
pub use self::client::Client;
#[cfg(feature = "tokio")]
mod client;

pub use self::codec::{Decode, Encode};
mod codec;

pub use self::connection::Connection;
mod connection;

pub use self::error::{Error, Result};
mod error;

pub use self::fd::Fd;
mod fd;

mod frame;

pub use self::interface::{Interface, Member, MethodInfo, PropertyInfo, SignalInfo};
pub use self::interface::{Method, Property, Signal};
mod interface;

#[macro_use]
mod macros;

pub use self::message::{Message, MessageKind, OwnedMessage, OwnedMessageKind};
mod message;

pub use self::object_path::{ObjectPath, ObjectPathError, OwnedObjectPath};
mod object_path;

mod org_freedesktop_dbus;

#[cfg(feature = "tokio")]
pub use self::pending_call::PendingCall;
#[cfg(feature = "tokio")]
mod pending_call;

pub use self::properties::{Access, NotifyPolicy};
mod properties;

pub use self::protocol::{Endianness, Flags};
mod protocol;

mod sasl;

pub use self::signature::{OwnedSignature, Signature, SignatureError};
mod signature;

pub use self::variant::{Any, Variant, WideString};
mod variant;

#[cfg(feature = "tokio")]
pub use self::dispatcher::{ConnectionState, Dispatcher, DispatcherHandle};
#[cfg(feature = "tokio")]
mod dispatcher;

#[cfg(feature = "tokio")]
pub use self::stub::Stub;
#[cfg(feature = "tokio")]
mod stub;

#[cfg(feature = "tokio")]
pub use self::skeleton::{MethodReply, RequestContext, RequestDescriptor, Skeleton};
#[cfg(feature = "tokio")]
mod skeleton;

#[cfg(feature = "tokio")]
mod introspect;

#[cfg(feature = "tokio")]
pub use self::object_manager::ObjectManager;
#[cfg(feature = "tokio")]
mod object_manager;

#[cfg(all(test, feature = "tokio"))]
mod scenario_tests;
