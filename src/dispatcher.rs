//! The single Tokio task that owns the connection and fans inbound traffic
//! out to attached stubs and skeletons.
//!
//! Grounded on the teacher's [`Client`](crate::client::Client)/
//! [`Connection`](crate::connection::Connection) pair: `Dispatcher::run` is
//! the async reactor loop, generalized from "drive one connection" to
//! "drive one connection, routing each message to whichever attached stub
//! or skeleton it belongs to". Everything that used to be a raw pointer
//! back-reference in the original design is, here, a message sent down an
//! `mpsc` channel to this task.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::buf::BodyBuf;
use crate::client::Client;
use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};
use crate::message::{Message, MessageKind, OwnedMessage, OwnedMessageKind};
use crate::object_path::{ObjectPath, OwnedObjectPath};
use crate::org_freedesktop_dbus as bus;
use crate::pending_call::{self, PendingCall, PendingCallResolver};
use crate::protocol::Flags;

/// A stub's bus-presence state, as observed by the [`Dispatcher`] that owns
/// its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The peer's bus name is not currently owned.
    Disconnected,
    /// The peer's bus name is owned and the stub can be called.
    Connected,
    /// A blocking call observed the peer as permanently unreachable.
    NotAvailable,
    /// An explicit "wait for this name to appear" deadline elapsed.
    Timeout,
}

pub(crate) type StubId = u64;

pub(crate) type StateCallback = Box<dyn FnMut(ConnectionState) + Send>;
pub(crate) type SignalHandler = Box<dyn for<'a> FnMut(&Message<'a>) + Send>;
pub(crate) type SkeletonDispatch = Box<dyn for<'a> FnMut(&Message<'a>) -> Option<OwnedMessage> + Send>;

pub(crate) enum Command {
    RegisterStub {
        id: StubId,
        bus_name: Box<str>,
        state_callback: Option<StateCallback>,
    },
    DetachStub {
        id: StubId,
    },
    SetStateCallback {
        id: StubId,
        callback: Option<StateCallback>,
    },
    SetSignalHandler {
        id: StubId,
        handler: Option<SignalHandler>,
    },
    RegisterMatch {
        rule: String,
    },
    UnregisterMatch {
        rule: String,
    },
    SendRequest {
        message: OwnedMessage,
        oneway: bool,
        ack: oneshot::Sender<Result<PendingCall>>,
    },
    SendSignal {
        message: OwnedMessage,
    },
    RegisterSkeleton {
        path: OwnedObjectPath,
        bus_name: Box<str>,
        dispatch: SkeletonDispatch,
        ack: oneshot::Sender<Result<()>>,
    },
    DetachSkeleton {
        path: OwnedObjectPath,
    },
    Stop,
}

struct StubEntry {
    bus_name: Box<str>,
    state: ConnectionState,
    state_callback: Option<StateCallback>,
    signal_handler: Option<SignalHandler>,
}

struct PendingEntry {
    resolver: PendingCallResolver,
    destination: Box<str>,
}

struct SkeletonEntry {
    dispatch: SkeletonDispatch,
}

/// A cheap, `Clone`-able reference to a running [`Dispatcher`].
///
/// This is the Rust-idiomatic replacement for the original design's raw
/// pointer back-reference from a stub/skeleton to its owning connection:
/// every operation a stub or skeleton needs from the dispatcher goes
/// through this handle's internal `mpsc` sender, so the dispatcher task
/// remains the sole owner of its mutable state.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl DispatcherHandle {
    /// Request that the dispatcher's [`run`](Dispatcher::run) loop stop
    /// after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.sender.send(Command::Stop);
    }

    /// Whether [`stop`](Self::stop) has not yet been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| Error::transport("dispatcher is no longer running"))
    }

    fn alloc_id(&self) -> StubId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_stub(&self, bus_name: Box<str>, state_callback: Option<StateCallback>) -> StubId {
        let id = self.alloc_id();
        let _ = self.send(Command::RegisterStub {
            id,
            bus_name,
            state_callback,
        });
        id
    }

    pub(crate) fn detach_stub(&self, id: StubId) {
        let _ = self.send(Command::DetachStub { id });
    }

    pub(crate) fn set_state_callback(&self, id: StubId, callback: Option<StateCallback>) {
        let _ = self.send(Command::SetStateCallback { id, callback });
    }

    pub(crate) fn set_signal_handler(&self, id: StubId, handler: Option<SignalHandler>) {
        let _ = self.send(Command::SetSignalHandler { id, handler });
    }

    pub(crate) fn register_match(&self, rule: String) {
        let _ = self.send(Command::RegisterMatch { rule });
    }

    pub(crate) fn unregister_match(&self, rule: String) {
        let _ = self.send(Command::UnregisterMatch { rule });
    }

    pub(crate) async fn send_request(&self, message: OwnedMessage, oneway: bool) -> Result<PendingCall> {
        let (ack, rx) = oneshot::channel();
        self.send(Command::SendRequest { message, oneway, ack })?;
        rx.await
            .map_err(|_| Error::transport("dispatcher is no longer running"))?
    }

    pub(crate) fn send_signal(&self, message: OwnedMessage) {
        let _ = self.send(Command::SendSignal { message });
    }

    pub(crate) async fn register_skeleton(
        &self,
        path: OwnedObjectPath,
        bus_name: Box<str>,
        dispatch: SkeletonDispatch,
    ) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send(Command::RegisterSkeleton {
            path,
            bus_name,
            dispatch,
            ack,
        })?;
        rx.await
            .map_err(|_| Error::transport("dispatcher is no longer running"))?
    }

    pub(crate) fn detach_skeleton(&self, path: OwnedObjectPath) {
        let _ = self.send(Command::DetachSkeleton { path });
    }
}

/// Drives one D-Bus connection: receives messages, routes them to attached
/// stubs/skeletons, and executes commands submitted through a
/// [`DispatcherHandle`].
///
/// `run` consumes the dispatcher and must be polled (typically via
/// `tokio::spawn`) for any attached stub or skeleton to make progress.
pub struct Dispatcher {
    client: Client,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: DispatcherHandle,
    present: HashSet<String>,
    owners: HashMap<String, String>,
    pending: HashMap<NonZeroU32, PendingEntry>,
    match_counts: HashMap<String, u32>,
    stubs: HashMap<StubId, StubEntry>,
    skeletons: HashMap<OwnedObjectPath, SkeletonEntry>,
    ready_states: Vec<(StubId, ConnectionState)>,
}

impl Dispatcher {
    /// Connect to the session bus and perform bus registration
    /// (`Hello`/`ListNames`/the global `NameOwnerChanged` match).
    pub async fn session_bus() -> Result<(Self, DispatcherHandle)> {
        Self::connect(Client::session_bus().await?).await
    }

    /// Connect to the system bus and perform bus registration.
    pub async fn system_bus() -> Result<(Self, DispatcherHandle)> {
        Self::connect(Client::system_bus().await?).await
    }

    async fn connect(client: Client) -> Result<(Self, DispatcherHandle)> {
        let (sender, commands) = mpsc::unbounded_channel();

        let handle = DispatcherHandle {
            sender,
            next_id: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(true)),
        };

        let mut dispatcher = Self {
            client,
            commands,
            handle: handle.clone(),
            present: HashSet::new(),
            owners: HashMap::new(),
            pending: HashMap::new(),
            match_counts: HashMap::new(),
            stubs: HashMap::new(),
            skeletons: HashMap::new(),
            ready_states: Vec::new(),
        };

        dispatcher.bring_up().await?;
        Ok((dispatcher, handle))
    }

    async fn bring_up(&mut self) -> Result<()> {
        self.call_bus("Hello", BodyBuf::new()).await?;

        let reply = self.call_bus("ListNames", BodyBuf::new()).await?;
        let names = Vec::<String>::decode(&mut reply.body())?;

        for name in names {
            if name.starts_with(':') {
                continue;
            }

            self.present.insert(name.clone());

            if let Ok(owner) = self.get_name_owner(&name).await {
                self.owners.insert(name, owner);
            }
        }

        let mut body = BodyBuf::new();
        body.write(&format!(
            "type='signal',interface='{}',member='{}'",
            bus::INTERFACE,
            bus::NAME_OWNER_CHANGED
        ));
        self.call_bus("AddMatch", body).await?;

        Ok(())
    }

    async fn get_name_owner(&mut self, name: &str) -> Result<String> {
        let mut body = BodyBuf::new();
        body.write(&name.to_owned());
        let reply = self.call_bus("GetNameOwner", body).await?;
        String::decode(&mut reply.body())
    }

    /// Run the reactor loop until [`DispatcherHandle::stop`] is called or
    /// the connection is lost.
    pub async fn run(mut self) -> Result<()> {
        loop {
            if !self.handle.is_running() {
                return Ok(());
            }

            for (id, state) in std::mem::take(&mut self.ready_states) {
                if let Some(entry) = self.stubs.get_mut(&id) {
                    entry.state = state;
                    if let Some(callback) = entry.state_callback.as_mut() {
                        callback(state);
                    }
                }
            }

            tokio::select! {
                message = self.client.receive() => {
                    self.route_message(message?).await?;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await?,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::RegisterStub {
                id,
                bus_name,
                state_callback,
            } => {
                let already_present = self.present.contains(bus_name.as_ref());

                self.stubs.insert(
                    id,
                    StubEntry {
                        bus_name,
                        state: ConnectionState::Disconnected,
                        state_callback,
                        signal_handler: None,
                    },
                );

                if already_present {
                    self.ready_states.push((id, ConnectionState::Connected));
                }
            }
            Command::DetachStub { id } => {
                self.stubs.remove(&id);
            }
            Command::SetStateCallback { id, callback } => {
                if let Some(entry) = self.stubs.get_mut(&id) {
                    entry.state_callback = callback;
                }
            }
            Command::SetSignalHandler { id, handler } => {
                if let Some(entry) = self.stubs.get_mut(&id) {
                    entry.signal_handler = handler;
                }
            }
            Command::RegisterMatch { rule } => self.register_match(rule).await?,
            Command::UnregisterMatch { rule } => self.unregister_match(rule).await?,
            Command::SendRequest { message, oneway, ack } => {
                let result = self.dispatch_send_request(message, oneway).await;
                let _ = ack.send(result);
            }
            Command::SendSignal { message } => {
                self.client.send(&message.borrow()).await?;
            }
            Command::RegisterSkeleton {
                path,
                bus_name,
                dispatch,
                ack,
            } => {
                let result = self.request_name(&bus_name).await;

                if result.is_ok() {
                    self.skeletons.insert(path, SkeletonEntry { dispatch });
                }

                let _ = ack.send(result);
            }
            Command::DetachSkeleton { path } => {
                self.skeletons.remove(&path);
            }
            Command::Stop => {}
        }

        Ok(())
    }

    async fn register_match(&mut self, rule: String) -> Result<()> {
        let count = self.match_counts.entry(rule.clone()).or_insert(0);
        *count += 1;

        if *count == 1 {
            let mut body = BodyBuf::new();
            body.write(&rule);
            self.call_bus("AddMatch", body).await?;
        }

        Ok(())
    }

    async fn unregister_match(&mut self, rule: String) -> Result<()> {
        if let Some(count) = self.match_counts.get_mut(&rule) {
            *count -= 1;

            if *count == 0 {
                self.match_counts.remove(&rule);
                let mut body = BodyBuf::new();
                body.write(&rule);
                self.call_bus("RemoveMatch", body).await?;
            }
        }

        Ok(())
    }

    async fn request_name(&mut self, bus_name: &str) -> Result<()> {
        let mut body = BodyBuf::new();
        body.write(&bus_name.to_owned());
        body.write(&0u32);
        self.call_bus("RequestName", body).await?;
        Ok(())
    }

    /// Send a method call and register its pending call atomically: the
    /// serial is only known once `client.send` resolves, and nothing else
    /// can run on this task between that and the table insert, so a
    /// same-tick reply can never arrive before the resolver exists.
    async fn dispatch_send_request(&mut self, message: OwnedMessage, oneway: bool) -> Result<PendingCall> {
        let destination = message.borrow().destination().unwrap_or_default().to_owned();
        let serial = self.client.send(&message.borrow()).await?;
        let (call, resolver) = pending_call::new(serial);

        if oneway {
            resolver.resolve(Ok(receipt(serial)));
        } else {
            self.pending.insert(
                serial,
                PendingEntry {
                    resolver,
                    destination: destination.into_boxed_str(),
                },
            );
        }

        Ok(call)
    }

    async fn call_bus(&mut self, member: &str, body: BodyBuf) -> Result<OwnedMessage> {
        let path = ObjectPath::new_const(bus::PATH);
        let message = Message::method_call(path, member)
            .with_interface(bus::INTERFACE)
            .with_destination(bus::DESTINATION)
            .with_body(&body);

        let serial = self.client.send(&message).await?;
        self.await_reply(serial).await
    }

    /// Wait for the reply to `serial`, routing any other traffic that
    /// arrives in the meantime through the normal path so nothing is
    /// reordered or dropped.
    async fn await_reply(&mut self, serial: NonZeroU32) -> Result<OwnedMessage> {
        loop {
            let message = self.client.receive().await?;

            let outcome = {
                let borrowed = message.borrow();
                match borrowed.kind() {
                    MessageKind::MethodReturn { reply_serial } if reply_serial == serial => Some(Ok(())),
                    MessageKind::Error {
                        error_name,
                        reply_serial,
                    } if reply_serial == serial => Some(Err(decode_error(error_name, borrowed.body()))),
                    _ => None,
                }
            };

            match outcome {
                Some(Ok(())) => return Ok(message),
                Some(Err(error)) => return Err(error),
                None => self.route_message(message).await?,
            }
        }
    }

    async fn route_message(&mut self, message: OwnedMessage) -> Result<()> {
        match message.kind() {
            OwnedMessageKind::MethodCall { .. } => self.dispatch_method_call(message).await,
            OwnedMessageKind::MethodReturn { reply_serial } => {
                let reply_serial = *reply_serial;
                self.complete_pending(reply_serial, Ok(message));
                Ok(())
            }
            OwnedMessageKind::Error { reply_serial, .. } => {
                let reply_serial = *reply_serial;
                let error = {
                    let borrowed = message.borrow();
                    match borrowed.kind() {
                        MessageKind::Error { error_name, .. } => decode_error(error_name, borrowed.body()),
                        _ => unreachable!("kind() is stable across borrow/owned views"),
                    }
                };
                self.complete_pending(reply_serial, Err(error));
                Ok(())
            }
            OwnedMessageKind::Signal { member, .. } => {
                let member = member.clone();
                self.route_signal(message, &member).await
            }
        }
    }

    fn complete_pending(&mut self, reply_serial: NonZeroU32, outcome: Result<OwnedMessage>) {
        if let Some(entry) = self.pending.remove(&reply_serial) {
            entry.resolver.resolve(outcome);
        }
    }

    async fn dispatch_method_call(&mut self, message: OwnedMessage) -> Result<()> {
        let path = match message.borrow().kind() {
            MessageKind::MethodCall { path, .. } => path.to_owned(),
            _ => unreachable!("dispatch_method_call only called for MethodCall"),
        };

        let reply = match self.skeletons.get_mut(&path) {
            Some(entry) => (entry.dispatch)(&message.borrow()),
            None => {
                let no_reply = message.borrow().flags() & Flags::NO_REPLY_EXPECTED;
                if no_reply {
                    None
                } else {
                    Some(unknown_object(&message, &path))
                }
            }
        };

        if let Some(reply) = reply {
            self.client.send(&reply.borrow()).await?;
        }

        Ok(())
    }

    /// Handle `org.freedesktop.DBus.NameOwnerChanged`: update the presence
    /// and owner tables, abort in-flight calls for a peer whose name
    /// changed owner without an intervening absence, and fan out
    /// connection-state transitions to matching stubs.
    fn handle_name_owner_changed(&mut self, message: &OwnedMessage) {
        let mut body = message.body();

        let (name, old_owner, new_owner) = match (
            String::decode(&mut body),
            String::decode(&mut body),
            String::decode(&mut body),
        ) {
            (Ok(name), Ok(old_owner), Ok(new_owner)) => (name, old_owner, new_owner),
            _ => return,
        };

        if name.starts_with(':') {
            return;
        }

        let is_present = !new_owner.is_empty();
        let owner_changed_in_place = !old_owner.is_empty() && !new_owner.is_empty() && old_owner != new_owner;

        if is_present {
            self.present.insert(name.clone());
            self.owners.insert(name.clone(), new_owner);
        } else {
            self.present.remove(&name);
            self.owners.remove(&name);
        }

        if owner_changed_in_place {
            let stale: Vec<NonZeroU32> = self
                .pending
                .iter()
                .filter(|(_, entry)| entry.destination.as_ref() == name.as_str())
                .map(|(serial, _)| *serial)
                .collect();

            for serial in stale {
                if let Some(entry) = self.pending.remove(&serial) {
                    entry
                        .resolver
                        .resolve(Err(Error::transport("peer bus name changed owner")));
                }
            }
        }

        let new_state = if is_present {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };

        for entry in self.stubs.values_mut() {
            if entry.bus_name.as_ref() != name.as_str() {
                continue;
            }

            if entry.state != new_state || owner_changed_in_place {
                entry.state = new_state;
                if let Some(callback) = entry.state_callback.as_mut() {
                    callback(new_state);
                }
            }
        }
    }

    async fn route_signal(&mut self, message: OwnedMessage, member: &str) -> Result<()> {
        let interface = message.borrow().interface().map(str::to_owned);

        if interface.as_deref() == Some(bus::INTERFACE) && member == bus::NAME_OWNER_CHANGED {
            self.handle_name_owner_changed(&message);
            return Ok(());
        }

        let sender = match message.borrow().sender() {
            Some(sender) => sender.to_owned(),
            None => return Ok(()),
        };

        let owners = &self.owners;
        let matching: Vec<StubId> = self
            .stubs
            .iter()
            .filter(|(_, entry)| {
                owners.get(entry.bus_name.as_ref()).map(String::as_str) == Some(sender.as_str())
            })
            .map(|(id, _)| *id)
            .collect();

        for id in matching {
            if let Some(entry) = self.stubs.get_mut(&id) {
                if let Some(handler) = entry.signal_handler.as_mut() {
                    handler(&message.borrow());
                }
            }
        }

        Ok(())
    }
}

fn decode_error(error_name: &str, mut body: crate::buf::ReadBuf<'_>) -> Error {
    let message = String::decode(&mut body).ok();
    Error::from_wire(error_name, message.as_deref())
}

fn unknown_object(message: &OwnedMessage, path: &OwnedObjectPath) -> OwnedMessage {
    let error = Error::user(
        "org.freedesktop.DBus.Error.UnknownObject",
        format!("No such object path '{path}'"),
    );

    let mut body = BodyBuf::new();
    body.write(&error.wire_message());

    let borrowed = message.borrow();
    borrowed
        .error_reply(error.wire_name())
        .expect("an incoming method call always carries a serial")
        .with_body(&body)
        .to_owned()
}

/// A resolved sentinel outcome for a `oneway` send, which never gets a real
/// reply: resolved immediately so `PendingCall::wait` returns right away
/// for anyone who chooses to await it anyway.
fn receipt(serial: NonZeroU32) -> OwnedMessage {
    let body = BodyBuf::new();
    Message {
        kind: MessageKind::MethodReturn { reply_serial: serial },
        serial: None,
        flags: Flags::EMPTY,
        interface: None,
        destination: None,
        sender: None,
        signature: body.signature(),
        body: body.read_buf(),
    }
    .to_owned()
}
