//! The skeleton side of the typed front-end: a locally implemented object
//! that answers method calls, emits signals, and serves its property table
//! over `org.freedesktop.DBus.Properties`.
//!
//! Grounded on `SPEC_FULL.md` §4.5; like `stub.rs`, the teacher has no
//! equivalent (it never dispatches inbound calls to application code), so
//! the registration/dispatch bookkeeping is new, but it plugs directly
//! into `dispatcher.rs`'s existing `SkeletonDispatch` boxed-closure slot
//! and reuses `message.rs`'s `error_reply`/`to_owned` pattern (see
//! `unknown_object` in `dispatcher.rs`) for building replies.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::buf::BodyBuf;
use crate::codec::{ArgList, Decode, DecodeArgList, Encode};
use crate::dispatcher::DispatcherHandle;
use crate::error::{Error, Result};
use crate::interface::{Interface, Member, Method, Property, Signal};
use crate::introspect;
use crate::message::{Message, MessageKind, OwnedMessage};
use crate::object_path::{ObjectPath, OwnedObjectPath};
use crate::properties::{self as props, Access, NotifyPolicy};
use crate::protocol::Flags;
use crate::variant::Variant;

/// What a method handler, once invoked, wants to happen to the call that
/// triggered it.
enum MethodOutcome {
    Reply(BodyBuf),
    Error(Error),
    Deferred,
    NoReply,
}

/// What a [`Method::handled_by`] closure returns, once it has decided what
/// to do about the call it was given.
///
/// A handler that can answer synchronously should return [`Reply`] or
/// [`Error`] the way a plain `Result<Out>` would. A handler that needs to
/// finish the call from another task calls [`RequestContext::defer_response`]
/// before returning and answers with [`Deferred`]; dispatch then sends no
/// reply itself and trusts the returned [`RequestDescriptor`] to call
/// [`RequestDescriptor::respond`] exactly once.
///
/// [`Reply`]: MethodReply::Reply
/// [`Error`]: MethodReply::Error
/// [`Deferred`]: MethodReply::Deferred
pub enum MethodReply<Out> {
    Reply(Out),
    Error(Error),
    Deferred,
}

impl<Out> From<Result<Out>> for MethodReply<Out> {
    fn from(result: Result<Out>) -> Self {
        match result {
            Ok(value) => MethodReply::Reply(value),
            Err(error) => MethodReply::Error(error),
        }
    }
}

type SkeletonMethodHandler = Box<dyn for<'a> Fn(RequestContext, crate::buf::ReadBuf<'a>) -> MethodOutcome + Send + Sync>;

struct PropertyEntry {
    access: Access,
    notify: NotifyPolicy,
    value: Variant,
    pending: bool,
}

/// Everything a handler needs to know about the call it was invoked for,
/// beyond its decoded arguments.
///
/// Owned rather than borrowed from the triggering message, so it can be
/// moved into a spawned task for a deferred reply.
pub struct RequestContext {
    handle: DispatcherHandle,
    reply_serial: Option<NonZeroU32>,
    sender: Option<Box<str>>,
}

impl RequestContext {
    /// The unique bus name of the caller, if the bus filled it in.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Detach this call from its synchronous handler invocation. The
    /// returned descriptor can be moved into another task and completed
    /// later via [`RequestDescriptor::respond`].
    pub fn defer_response(&self) -> RequestDescriptor {
        RequestDescriptor {
            handle: self.handle.clone(),
            reply_serial: self.reply_serial,
            sender: self.sender.clone(),
        }
    }
}

/// A method call detached from its synchronous dispatch, kept alive long
/// enough for an asynchronous handler to complete it exactly once.
pub struct RequestDescriptor {
    handle: DispatcherHandle,
    reply_serial: Option<NonZeroU32>,
    sender: Option<Box<str>>,
}

impl RequestDescriptor {
    /// Complete the deferred call with a reply or an error.
    ///
    /// A no-op if the original call had `NO_REPLY_EXPECTED` set (no serial
    /// was ever assigned to reply against).
    pub fn respond<T: Encode>(self, result: Result<T>) {
        let Some(reply_serial) = self.reply_serial else {
            return;
        };

        let message = match result {
            Ok(value) => {
                let mut body = BodyBuf::new();
                body.write(&value);
                build_reply(reply_serial, self.sender.as_deref(), &body)
            }
            Err(error) => build_error_reply(reply_serial, self.sender.as_deref(), &error),
        };

        self.handle.send_signal(message);
    }
}

fn build_reply(reply_serial: NonZeroU32, destination: Option<&str>, body: &BodyBuf) -> OwnedMessage {
    Message {
        kind: MessageKind::MethodReturn { reply_serial },
        serial: None,
        flags: Flags::EMPTY,
        interface: None,
        destination,
        sender: None,
        signature: body.signature(),
        body: body.read_buf(),
    }
    .to_owned()
}

fn build_error_reply(reply_serial: NonZeroU32, destination: Option<&str>, error: &Error) -> OwnedMessage {
    let mut body = BodyBuf::new();
    body.write(&error.wire_message());

    Message {
        kind: MessageKind::Error {
            error_name: error.wire_name(),
            reply_serial,
        },
        serial: None,
        flags: Flags::EMPTY,
        interface: None,
        destination,
        sender: None,
        signature: body.signature(),
        body: body.read_buf(),
    }
    .to_owned()
}

/// The untyped runtime half of a skeleton: everything that doesn't depend
/// on which [`Interface`] it implements. [`Skeleton<I>`] borrows from this
/// through [`Deref`].
pub struct SkeletonBase {
    handle: DispatcherHandle,
    interface: &'static str,
    bus_name: Box<str>,
    path: OwnedObjectPath,
    methods: Arc<Mutex<HashMap<&'static str, SkeletonMethodHandler>>>,
    properties: Arc<Mutex<HashMap<&'static str, PropertyEntry>>>,
}

impl SkeletonBase {
    async fn attach(
        handle: DispatcherHandle,
        interface: &'static str,
        members: &'static [Member],
        bus_name: Box<str>,
        path: OwnedObjectPath,
    ) -> Result<Self> {
        let methods: Arc<Mutex<HashMap<&'static str, SkeletonMethodHandler>>> = Arc::new(Mutex::new(HashMap::new()));
        let properties: Arc<Mutex<HashMap<&'static str, PropertyEntry>>> = Arc::new(Mutex::new(HashMap::new()));

        {
            let mut table = properties.lock().unwrap();
            for member in members {
                if let Member::Property(info) = member {
                    table.insert(
                        info.name,
                        PropertyEntry {
                            access: info.access,
                            notify: info.notify,
                            value: Variant::new(&()),
                            pending: false,
                        },
                    );
                }
            }
        }

        let dispatch = build_dispatch(
            handle.clone(),
            interface,
            members,
            path.clone(),
            methods.clone(),
            properties.clone(),
        );

        handle.register_skeleton(path.clone(), bus_name.clone(), dispatch).await?;

        Ok(Self {
            handle,
            interface,
            bus_name,
            path,
            methods,
            properties,
        })
    }

    /// The object path this skeleton answers requests on.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// The bus name this skeleton was registered under.
    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    /// The interface this skeleton implements.
    pub(crate) fn interface_name(&self) -> &'static str {
        self.interface
    }

    /// A snapshot of every currently readable property, for
    /// `ObjectManager::GetManagedObjects`/`InterfacesAdded`.
    pub(crate) fn property_snapshot(&self) -> HashMap<String, Variant> {
        self.properties
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entry)| ((*name).to_owned(), entry.value.clone()))
            .collect()
    }

    fn register_method(&self, name: &'static str, handler: SkeletonMethodHandler) {
        self.methods.lock().unwrap().insert(name, handler);
    }

    fn property_value<T>(&self, name: &str) -> Result<T>
    where
        T: for<'de> Decode<'de> + Encode,
    {
        let properties = self.properties.lock().unwrap();
        let entry = properties
            .get(name)
            .ok_or_else(|| Error::transport(format!("no such property '{name}'")))?;
        entry.value.get::<T>()
    }

    fn set_property_value<T>(&self, name: &'static str, value: T) -> Result<()>
    where
        T: Encode + PartialEq + for<'de> Decode<'de>,
    {
        let outcome = {
            let mut properties = self.properties.lock().unwrap();
            let entry = properties
                .get_mut(name)
                .ok_or_else(|| Error::transport(format!("no such property '{name}'")))?;

            let changed = match entry.value.get::<T>() {
                Ok(current) => current != value,
                Err(_) => true,
            };

            entry.value = Variant::new(&value);

            match entry.notify.outcome(changed) {
                props::ChangeOutcome::Suppressed => None,
                props::ChangeOutcome::Emit => Some(entry.value.clone()),
                props::ChangeOutcome::Pending => {
                    entry.pending = true;
                    None
                }
            }
        };

        if let Some(variant) = outcome {
            self.emit_properties_changed(&[(name, variant)], &[]);
        }

        Ok(())
    }

    fn emit_properties_changed(&self, changed: &[(&str, Variant)], invalidated: &[&str]) {
        emit_properties_changed_msg(&self.handle, self.path.as_object_path(), self.interface, changed, invalidated);
    }

    /// Flush every property currently batched under the `Committed` notify
    /// policy as a single `PropertiesChanged` emission.
    pub fn commit(&self) {
        let changed: Vec<(&'static str, Variant)> = {
            let mut properties = self.properties.lock().unwrap();
            properties
                .iter_mut()
                .filter(|(_, entry)| entry.pending)
                .map(|(name, entry)| {
                    entry.pending = false;
                    (*name, entry.value.clone())
                })
                .collect()
        };

        if !changed.is_empty() {
            self.emit_properties_changed(&changed, &[]);
        }
    }

    /// Emit a signal declared on this skeleton's interface.
    pub(crate) fn emit_signal(&self, member: &str, body: &BodyBuf) {
        let message = Message::signal(self.path.as_object_path(), member)
            .with_interface(self.interface)
            .with_body(body)
            .to_owned();

        self.handle.send_signal(message);
    }
}

impl Drop for SkeletonBase {
    fn drop(&mut self) {
        self.handle.detach_skeleton(self.path.clone());
    }
}

fn emit_properties_changed_msg(
    handle: &DispatcherHandle,
    path: &ObjectPath,
    interface: &str,
    changed: &[(&str, Variant)],
    invalidated: &[&str],
) {
    let mut body = BodyBuf::new();
    body.write(&interface.to_owned());

    let changed_dict: HashMap<String, Variant> = changed
        .iter()
        .map(|(name, variant)| ((*name).to_owned(), variant.clone()))
        .collect();
    body.write(&changed_dict);

    let invalidated_names: Vec<String> = invalidated.iter().map(|name| (*name).to_owned()).collect();
    body.write(&invalidated_names);

    let message = Message::signal(path, props::CHANGED_SIGNAL)
        .with_interface(props::INTERFACE)
        .with_body(&body)
        .to_owned();

    handle.send_signal(message);
}

fn build_dispatch(
    handle: DispatcherHandle,
    interface: &'static str,
    members: &'static [Member],
    path: OwnedObjectPath,
    methods: Arc<Mutex<HashMap<&'static str, SkeletonMethodHandler>>>,
    properties: Arc<Mutex<HashMap<&'static str, PropertyEntry>>>,
) -> crate::dispatcher::SkeletonDispatch {
    Box::new(move |message: &Message<'_>| {
        let member = match message.kind() {
            MessageKind::MethodCall { member, .. } => member,
            _ => return None,
        };

        let oneway = message.flags() & Flags::NO_REPLY_EXPECTED;
        let reply_serial = message.serial();
        let sender = message.sender().map(|sender| sender.to_owned().into_boxed_str());

        let ctx = RequestContext {
            handle: handle.clone(),
            reply_serial,
            sender: sender.clone(),
        };

        let outcome = match message.interface() {
            Some(iface) if iface == introspect::INTERFACE && member == introspect::INTROSPECT => {
                let mut body = BodyBuf::new();
                body.write(&introspect::describe(interface, members));
                MethodOutcome::Reply(body)
            }
            Some(iface) if iface == props::INTERFACE => {
                dispatch_properties(member, message, interface, path.as_object_path(), &handle, &properties)
            }
            _ => {
                let handlers = methods.lock().unwrap();
                match handlers.get(member) {
                    Some(handler) => handler(ctx, message.body()),
                    None => MethodOutcome::Error(Error::user(
                        "org.freedesktop.DBus.Error.UnknownMethod",
                        format!("No such method '{member}'"),
                    )),
                }
            }
        };

        if oneway {
            return None;
        }

        match outcome {
            MethodOutcome::Reply(body) => reply_serial.map(|serial| build_reply(serial, sender.as_deref(), &body)),
            MethodOutcome::Error(error) => {
                reply_serial.map(|serial| build_error_reply(serial, sender.as_deref(), &error))
            }
            MethodOutcome::Deferred | MethodOutcome::NoReply => None,
        }
    })
}

fn dispatch_properties(
    member: &str,
    message: &Message<'_>,
    interface: &'static str,
    path: &ObjectPath,
    handle: &DispatcherHandle,
    properties: &Arc<Mutex<HashMap<&'static str, PropertyEntry>>>,
) -> MethodOutcome {
    let mut body = message.body();

    if member == props::GET {
        let (_requested_interface, name) = match (String::decode(&mut body), String::decode(&mut body)) {
            (Ok(i), Ok(n)) => (i, n),
            _ => return MethodOutcome::Error(Error::transport("malformed Get arguments")),
        };

        let properties = properties.lock().unwrap();
        return match properties.get(name.as_str()) {
            Some(entry) => {
                let mut reply = BodyBuf::new();
                reply.write(&entry.value);
                MethodOutcome::Reply(reply)
            }
            None => MethodOutcome::Error(Error::user(
                "org.freedesktop.DBus.Error.UnknownProperty",
                format!("No such property '{name}'"),
            )),
        };
    }

    if member == props::SET {
        let (_requested_interface, name, value) =
            match (String::decode(&mut body), String::decode(&mut body), Variant::decode(&mut body)) {
                (Ok(i), Ok(n), Ok(v)) => (i, n, v),
                _ => return MethodOutcome::Error(Error::transport("malformed Set arguments")),
            };

        let emitted = {
            let mut properties = properties.lock().unwrap();
            let Some(entry) = properties.get_mut(name.as_str()) else {
                return MethodOutcome::Error(Error::user(
                    "org.freedesktop.DBus.Error.UnknownProperty",
                    format!("No such property '{name}'"),
                ));
            };

            if !entry.access.is_writable() {
                return MethodOutcome::Error(Error::user(
                    "org.freedesktop.DBus.Error.PropertyReadOnly",
                    format!("property '{name}' is not writable"),
                ));
            }

            let changed = entry.value != value;
            entry.value = value;

            match entry.notify.outcome(changed) {
                props::ChangeOutcome::Suppressed => None,
                props::ChangeOutcome::Emit => Some(entry.value.clone()),
                props::ChangeOutcome::Pending => {
                    entry.pending = true;
                    None
                }
            }
        };

        if let Some(variant) = emitted {
            emit_properties_changed_msg(handle, path, interface, &[(name.as_str(), variant)], &[]);
        }

        return MethodOutcome::Reply(BodyBuf::new());
    }

    if member == props::GET_ALL {
        let _requested_interface = String::decode(&mut body).ok();
        let properties = properties.lock().unwrap();
        let all: HashMap<String, Variant> = properties
            .iter()
            .map(|(name, entry)| ((*name).to_owned(), entry.value.clone()))
            .collect();

        let mut reply = BodyBuf::new();
        reply.write(&all);
        return MethodOutcome::Reply(reply);
    }

    MethodOutcome::Error(Error::user(
        "org.freedesktop.DBus.Error.UnknownMethod",
        format!("No such method '{member}' on {}", props::INTERFACE),
    ))
}

/// A locally implemented object answering calls for interface `I`.
pub struct Skeleton<I> {
    base: SkeletonBase,
    _marker: PhantomData<I>,
}

impl<I> Deref for Skeleton<I> {
    type Target = SkeletonBase;

    fn deref(&self) -> &SkeletonBase {
        &self.base
    }
}

impl<I: Interface> Skeleton<I> {
    /// Derive a bus name and object path from `I::NAME` and `role`, and
    /// register with `handle`.
    pub async fn for_role(handle: DispatcherHandle, role: &str) -> Result<Self> {
        let bus_name = format!("{}.{}", I::NAME, role);
        let path = OwnedObjectPath::new(format!("/{}/{}", I::NAME.replace('.', "/"), role))
            .expect("a dotted interface name and role always yield a well-formed path");
        Self::new(handle, bus_name, path).await
    }

    /// Register with `handle` using an explicitly supplied bus name and
    /// object path.
    pub async fn new(handle: DispatcherHandle, bus_name: impl Into<Box<str>>, path: OwnedObjectPath) -> Result<Self> {
        let base = SkeletonBase::attach(handle, I::NAME, I::MEMBERS, bus_name.into(), path).await?;
        Ok(Self {
            base,
            _marker: PhantomData,
        })
    }
}

impl<In, Out> Method<In, Out>
where
    In: for<'de> DecodeArgList<'de>,
    Out: Encode,
{
    /// Register the handler invoked for calls to this method.
    ///
    /// `handler` returns a [`MethodReply<Out>`]; `impl From<Result<Out>>`
    /// lets a synchronous handler keep writing `Ok(value)`/`Err(error)` and
    /// rely on `.into()` (or a `?`-and-`Ok` body with a `Result<Out>` return
    /// type, converted at the call site) while a handler that calls
    /// [`RequestContext::defer_response`] returns [`MethodReply::Deferred`]
    /// directly.
    pub fn handled_by<F>(&self, skeleton: &SkeletonBase, handler: F)
    where
        F: Fn(RequestContext, In) -> MethodReply<Out> + Send + Sync + 'static,
    {
        let oneway = self.info.oneway;

        skeleton.register_method(
            self.info.name,
            Box::new(move |ctx, mut body| match In::decode_args(&mut body) {
                Ok(args) => match handler(ctx, args) {
                    MethodReply::Reply(_) if oneway => MethodOutcome::NoReply,
                    MethodReply::Reply(value) => {
                        let mut reply = BodyBuf::new();
                        reply.write(&value);
                        MethodOutcome::Reply(reply)
                    }
                    MethodReply::Error(_) if oneway => MethodOutcome::NoReply,
                    MethodReply::Error(error) => MethodOutcome::Error(error),
                    MethodReply::Deferred => MethodOutcome::Deferred,
                },
                Err(error) => MethodOutcome::Error(error),
            }),
        );
    }
}

impl<Args> Signal<Args>
where
    Args: ArgList,
{
    /// Emit this signal to every subscribed stub.
    pub fn emit(&self, skeleton: &SkeletonBase, args: Args) {
        let mut body = BodyBuf::new();
        body.write_args(&args);
        skeleton.emit_signal(self.info.name, &body);
    }
}

impl<T> Property<T>
where
    T: Encode + PartialEq + for<'de> Decode<'de>,
{
    /// Read the property's current value from the skeleton's table.
    pub fn get_value(&self, skeleton: &SkeletonBase) -> Result<T> {
        skeleton.property_value(self.info.name)
    }

    /// Assign a new value, applying this property's [`NotifyPolicy`].
    pub fn set_value(&self, skeleton: &SkeletonBase, value: T) -> Result<()> {
        skeleton.set_property_value(self.info.name, value)
    }
}
