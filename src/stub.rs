//! The stub side of the typed front-end: a proxy for a remote object that
//! issues method calls, subscribes to signals, and watches properties.
//!
//! Grounded on `SPEC_FULL.md` §4.4; the teacher has no analogue (it is a
//! bare connection with no member-declaration surface), so the runtime
//! bookkeeping here (signal/property tables, connection-state caching) is
//! built from scratch in the teacher's idiom: plain `Arc<Mutex<_>>` state
//! shared between the stub and the one boxed closure it installs on the
//! dispatcher, rather than a lock held across an `.await` point.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::buf::BodyBuf;
use crate::codec::{ArgList, Decode, DecodeArgList, Encode};
use crate::dispatcher::{ConnectionState, DispatcherHandle, SignalHandler, StateCallback, StubId};
use crate::error::{Error, Result};
use crate::interface::{Interface, Method, Property, Signal};
use crate::message::{Message, MessageKind, OwnedMessage};
use crate::object_path::OwnedObjectPath;
use crate::pending_call::PendingCall;
use crate::properties as props;
use crate::protocol::Flags;
use crate::variant::Variant;

pub(crate) enum PropertyUpdate<'a> {
    Changed(&'a Variant),
    Invalidated,
}

struct PropertySlot {
    observer: Box<dyn FnMut(PropertyUpdate<'_>) + Send>,
}

/// The untyped runtime half of a stub: everything that doesn't depend on
/// which [`Interface`] it proxies. [`Stub<I>`] borrows from this through
/// [`Deref`] so the `Method`/`Signal`/`Property` inherent impls below only
/// need to take `&StubBase`.
pub struct StubBase {
    handle: DispatcherHandle,
    id: StubId,
    interface: &'static str,
    bus_name: Box<str>,
    path: OwnedObjectPath,
    state: Arc<Mutex<ConnectionState>>,
    user_state_callback: Arc<Mutex<Option<Box<dyn FnMut(ConnectionState) + Send>>>>,
    signals: Arc<Mutex<HashMap<&'static str, Box<dyn FnMut(&Message<'_>) + Send>>>>,
    properties: Arc<Mutex<HashMap<&'static str, PropertySlot>>>,
}

impl StubBase {
    fn attach(handle: DispatcherHandle, interface: &'static str, bus_name: Box<str>, path: OwnedObjectPath) -> Self {
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));
        let user_state_callback: Arc<Mutex<Option<Box<dyn FnMut(ConnectionState) + Send>>>> =
            Arc::new(Mutex::new(None));
        let signals: Arc<Mutex<HashMap<&'static str, Box<dyn FnMut(&Message<'_>) + Send>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let properties: Arc<Mutex<HashMap<&'static str, PropertySlot>>> = Arc::new(Mutex::new(HashMap::new()));

        let cached_state = state.clone();
        let user_callback = user_state_callback.clone();
        let on_state_change: StateCallback = Box::new(move |new_state| {
            *cached_state.lock().unwrap() = new_state;
            if let Some(callback) = user_callback.lock().unwrap().as_mut() {
                callback(new_state);
            }
        });

        let id = handle.register_stub(bus_name.clone(), Some(on_state_change));
        let handler = build_signal_handler(signals.clone(), properties.clone());
        handle.set_signal_handler(id, Some(handler));

        Self {
            handle,
            id,
            interface,
            bus_name,
            path,
            state,
            user_state_callback,
            signals,
            properties,
        }
    }

    /// The current connection state, as last observed by the dispatcher.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Replace the callback invoked on connection-state transitions.
    pub fn on_state_change(&self, callback: impl FnMut(ConnectionState) + Send + 'static) {
        *self.user_state_callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// The bus name this stub addresses requests to.
    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    /// The object path this stub addresses requests to.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    fn build_message(&self, interface: &str, member: &str, body: BodyBuf, oneway: bool) -> OwnedMessage {
        let flags = if oneway { Flags::NO_REPLY_EXPECTED } else { Flags::EMPTY };

        Message::method_call(self.path.as_object_path(), member)
            .with_interface(interface)
            .with_destination(&self.bus_name)
            .with_flags(flags)
            .with_body(&body)
            .to_owned()
    }

    pub(crate) async fn send_request(&self, interface: &str, member: &str, body: BodyBuf, oneway: bool) -> Result<PendingCall> {
        let message = self.build_message(interface, member, body, oneway);
        self.handle.send_request(message, oneway).await
    }

    /// Block the current task until a method call resolves, via a
    /// `block_in_place` bridge to a fresh `block_on` of the dispatcher
    /// round trip, so synchronous call sites don't need to be `async fn`.
    pub(crate) fn send_request_and_block(&self, interface: &str, member: &str, body: BodyBuf, oneway: bool) -> Result<OwnedMessage> {
        let message = self.build_message(interface, member, body, oneway);
        let handle = self.handle.clone();

        tokio::task::block_in_place(move || {
            tokio::runtime::Handle::current().block_on(async move {
                let call = handle.send_request(message, oneway).await?;
                call.wait().await
            })
        })
    }

    fn signal_match_rule(&self, member: &str) -> String {
        format!(
            "type='signal',sender='{}',path='{}',interface='{}',member='{}'",
            self.bus_name, self.path, self.interface, member
        )
    }

    fn properties_changed_rule(&self) -> String {
        format!(
            "type='signal',sender='{}',path='{}',interface='{}',member='{}'",
            self.bus_name, self.path, props::INTERFACE, props::CHANGED_SIGNAL
        )
    }

    pub(crate) fn register_signal(&self, name: &'static str, observer: Box<dyn FnMut(&Message<'_>) + Send>) {
        let mut signals = self.signals.lock().unwrap();
        let first = !signals.contains_key(name);
        signals.insert(name, observer);
        drop(signals);

        if first {
            self.handle.register_match(self.signal_match_rule(name));
        }
    }

    pub(crate) fn unregister_signal(&self, name: &str) {
        let removed = self.signals.lock().unwrap().remove(name).is_some();

        if removed {
            self.handle.unregister_match(self.signal_match_rule(name));
        }
    }

    pub(crate) fn attach_property(&self, name: &'static str, observer: Box<dyn FnMut(PropertyUpdate<'_>) + Send>) {
        let mut properties = self.properties.lock().unwrap();
        let first = properties.is_empty();
        properties.insert(name, PropertySlot { observer });
        drop(properties);

        if first {
            self.handle.register_match(self.properties_changed_rule());
        }

        self.fetch_initial_property(name);
    }

    /// Issue `Properties.Get` for a property just attached to and feed the
    /// reply to its observer, on a later dispatcher turn, so the observer
    /// sees the current value once even if no `PropertiesChanged` signal
    /// ever follows.
    fn fetch_initial_property(&self, name: &'static str) {
        let interface = self.interface.to_owned();
        let bus_name = self.bus_name.clone();
        let path = self.path.clone();
        let handle = self.handle.clone();
        let properties = self.properties.clone();

        tokio::spawn(async move {
            let mut body = BodyBuf::new();
            body.write(&interface);
            body.write(&name.to_owned());

            let message = Message::method_call(path.as_object_path(), props::GET)
                .with_interface(props::INTERFACE)
                .with_destination(&bus_name)
                .with_body(&body)
                .to_owned();

            let Ok(call) = handle.send_request(message, false).await else {
                return;
            };
            let Ok(reply) = call.wait().await else {
                return;
            };

            let mut cursor = reply.body();
            let Ok(variant) = Variant::decode(&mut cursor) else {
                return;
            };

            if let Some(slot) = properties.lock().unwrap().get_mut(name) {
                (slot.observer)(PropertyUpdate::Changed(&variant));
            }
        });
    }

    pub(crate) fn detach_property(&self, name: &str) {
        let mut properties = self.properties.lock().unwrap();
        properties.remove(name);
        let now_empty = properties.is_empty();
        drop(properties);

        if now_empty {
            self.handle.unregister_match(self.properties_changed_rule());
        }
    }

    pub(crate) async fn get_property_message(&self, name: &str) -> Result<OwnedMessage> {
        let call = self.get_property_call(name).await?;
        call.wait().await
    }

    pub(crate) async fn get_property_call(&self, name: &str) -> Result<PendingCall> {
        let mut body = BodyBuf::new();
        body.write(&self.interface.to_owned());
        body.write(&name.to_owned());
        self.send_request(props::INTERFACE, props::GET, body, false).await
    }

    pub(crate) async fn set_property_message<T>(&self, name: &str, value: &T) -> Result<OwnedMessage>
    where
        T: Encode,
    {
        let call = self.set_property_call(name, value).await?;
        call.wait().await
    }

    pub(crate) async fn set_property_call<T>(&self, name: &str, value: &T) -> Result<PendingCall>
    where
        T: Encode,
    {
        let mut body = BodyBuf::new();
        body.write(&self.interface.to_owned());
        body.write(&name.to_owned());
        body.write(&Variant::new(value));
        self.send_request(props::INTERFACE, props::SET, body, false).await
    }

    /// Issue `Properties.GetAll` and feed every known, attached property's
    /// observer with the value the server reported; names with no attached
    /// observer are silently skipped.
    pub async fn get_all_properties(&self) -> Result<()> {
        let mut body = BodyBuf::new();
        body.write(&self.interface.to_owned());
        let call = self.send_request(props::INTERFACE, props::GET_ALL, body, false).await?;
        let reply = call.wait().await?;
        let mut cursor = reply.body();
        let all = HashMap::<String, Variant>::decode(&mut cursor)?;

        let mut properties = self.properties.lock().unwrap();
        for (name, variant) in &all {
            if let Some((_, slot)) = properties.iter_mut().find(|(known, _)| **known == name.as_str()) {
                (slot.observer)(PropertyUpdate::Changed(variant));
            }
        }

        Ok(())
    }
}

impl Drop for StubBase {
    fn drop(&mut self) {
        let signal_names: Vec<&'static str> = self.signals.lock().unwrap().keys().copied().collect();

        for name in signal_names {
            self.handle.unregister_match(self.signal_match_rule(name));
        }

        if !self.properties.lock().unwrap().is_empty() {
            self.handle.unregister_match(self.properties_changed_rule());
        }

        self.handle.detach_stub(self.id);
    }
}

fn build_signal_handler(
    signals: Arc<Mutex<HashMap<&'static str, Box<dyn FnMut(&Message<'_>) + Send>>>>,
    properties: Arc<Mutex<HashMap<&'static str, PropertySlot>>>,
) -> SignalHandler {
    Box::new(move |message: &Message<'_>| {
        let member = match message.kind() {
            MessageKind::Signal { member, .. } => member,
            _ => return,
        };

        if member == props::CHANGED_SIGNAL && message.interface() == Some(props::INTERFACE) {
            dispatch_properties_changed(&properties, message);
            return;
        }

        if let Some(observer) = signals.lock().unwrap().get_mut(member) {
            observer(message);
        }
    })
}

fn dispatch_properties_changed(
    properties: &Mutex<HashMap<&'static str, PropertySlot>>,
    message: &Message<'_>,
) {
    let mut body = message.body();

    let _interface = match String::decode(&mut body) {
        Ok(interface) => interface,
        Err(_) => return,
    };

    let changed = match HashMap::<String, Variant>::decode(&mut body) {
        Ok(changed) => changed,
        Err(_) => return,
    };

    let invalidated = Vec::<String>::decode(&mut body).unwrap_or_default();

    let mut properties = properties.lock().unwrap();

    for (name, variant) in &changed {
        if let Some((_, slot)) = properties.iter_mut().find(|(known, _)| **known == name.as_str()) {
            (slot.observer)(PropertyUpdate::Changed(variant));
        }
    }

    for name in &invalidated {
        if let Some((_, slot)) = properties.iter_mut().find(|(known, _)| **known == name.as_str()) {
            (slot.observer)(PropertyUpdate::Invalidated);
        }
    }
}

fn decode_reply<Out>(reply: &OwnedMessage) -> Result<Out>
where
    Out: for<'de> Decode<'de>,
{
    let mut body = reply.body();
    Out::decode(&mut body)
}

/// A typed proxy for a remote object implementing interface `I`.
pub struct Stub<I> {
    base: StubBase,
    _marker: PhantomData<I>,
}

impl<I> Deref for Stub<I> {
    type Target = StubBase;

    fn deref(&self) -> &StubBase {
        &self.base
    }
}

impl<I: Interface> Stub<I> {
    /// Derive a bus name and object path from `I::NAME` and `role` (by
    /// appending the role and translating dots to path segments), and
    /// attach to `handle`.
    pub fn for_role(handle: DispatcherHandle, role: &str) -> Self {
        let bus_name = format!("{}.{}", I::NAME, role);
        let path = OwnedObjectPath::new(format!("/{}/{}", I::NAME.replace('.', "/"), role))
            .expect("a dotted interface name and role always yield a well-formed path");
        Self::new(handle, bus_name, path)
    }

    /// Attach to `handle` using an explicitly supplied bus name and object
    /// path.
    pub fn new(handle: DispatcherHandle, bus_name: impl Into<Box<str>>, path: OwnedObjectPath) -> Self {
        Self {
            base: StubBase::attach(handle, I::NAME, bus_name.into(), path),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> Method<In, Out>
where
    In: ArgList,
    Out: Encode + for<'de> Decode<'de>,
{
    /// Call this method and wait for its reply.
    pub async fn call(&self, stub: &StubBase, args: In) -> Result<Out> {
        let call = self.call_async(stub, args).await?;
        let reply = call.wait().await?;
        decode_reply(&reply)
    }

    /// Submit this method call without waiting for the reply.
    pub async fn call_async(&self, stub: &StubBase, args: In) -> Result<PendingCall> {
        let mut body = BodyBuf::new();
        body.write_args(&args);
        stub.send_request(stub.interface, self.info.name, body, self.info.oneway).await
    }
}

impl<In> Method<In, ()>
where
    In: ArgList,
{
    /// Call a `oneway` method; there is no reply to wait for.
    pub async fn call_oneway(&self, stub: &StubBase, args: In) -> Result<()> {
        let mut body = BodyBuf::new();
        body.write_args(&args);
        stub.send_request(stub.interface, self.info.name, body, true).await?;
        Ok(())
    }
}

impl<Args> Signal<Args>
where
    Args: ArgList + for<'de> DecodeArgList<'de> + Send + 'static,
{
    /// Subscribe to this signal.
    pub fn attach(&self, stub: &StubBase, mut observer: impl FnMut(Args) + Send + 'static) {
        let name = self.info.name;

        stub.register_signal(
            name,
            Box::new(move |message: &Message<'_>| {
                let mut body = message.body();
                if let Ok(args) = Args::decode_args(&mut body) {
                    observer(args);
                }
            }),
        );
    }

    /// Unsubscribe from this signal.
    pub fn detach(&self, stub: &StubBase) {
        stub.unregister_signal(self.info.name);
    }
}

impl<T> Property<T>
where
    T: Encode + for<'de> Decode<'de> + Send + 'static,
{
    /// Watch this property for change notifications.
    ///
    /// The observer receives `Some(value)` on `PropertiesChanged`, or
    /// `None` if the server instead reported the value as invalidated.
    pub fn attach(&self, stub: &StubBase, mut observer: impl FnMut(Option<T>) + Send + 'static) {
        let name = self.info.name;

        stub.attach_property(
            name,
            Box::new(move |update: PropertyUpdate<'_>| match update {
                PropertyUpdate::Changed(variant) => {
                    if let Ok(value) = variant.get::<T>() {
                        observer(Some(value));
                    }
                }
                PropertyUpdate::Invalidated => observer(None),
            }),
        );
    }

    /// Stop watching this property.
    pub fn detach(&self, stub: &StubBase) {
        stub.detach_property(self.info.name);
    }

    /// Read the current value via a blocking `Properties.Get` call.
    pub fn get(&self, stub: &StubBase) -> Result<T> {
        let reply = stub.send_request_and_block(
            props::INTERFACE,
            props::GET,
            get_property_body(stub.interface, self.info.name),
            false,
        )?;
        decode_variant_reply(&reply)
    }

    /// Read the current value asynchronously.
    pub async fn get_async(&self, stub: &StubBase) -> Result<T> {
        let reply = stub.get_property_message(self.info.name).await?;
        decode_variant_reply(&reply)
    }

    /// Write a new value via a blocking `Properties.Set` call.
    pub fn set(&self, stub: &StubBase, value: &T) -> Result<()>
    where
        T: Encode,
    {
        let mut body = BodyBuf::new();
        body.write(&stub.interface.to_owned());
        body.write(&self.info.name.to_owned());
        body.write(&Variant::new(value));
        stub.send_request_and_block(props::INTERFACE, props::SET, body, false)?;
        Ok(())
    }

    /// Write a new value asynchronously.
    pub async fn set_async(&self, stub: &StubBase, value: &T) -> Result<()>
    where
        T: Encode,
    {
        stub.set_property_message(self.info.name, value).await?;
        Ok(())
    }
}

fn get_property_body(interface: &str, name: &str) -> BodyBuf {
    let mut body = BodyBuf::new();
    body.write(&interface.to_owned());
    body.write(&name.to_owned());
    body
}

fn decode_variant_reply<T>(reply: &OwnedMessage) -> Result<T>
where
    T: for<'de> Decode<'de> + Encode,
{
    let mut body = reply.body();
    let variant = Variant::decode(&mut body)?;
    variant.get::<T>().map_err(|_| Error::transport("property reply did not match the expected type"))
}
