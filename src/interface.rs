//! Declarative interface descriptors and the typed front-end (`Method`,
//! `Signal`, `Property`) that binds a member name to the codec and, via
//! inherent impls in [`crate::stub`]/[`crate::skeleton`], to the
//! stub/skeleton runtime.
//!
//! These types replace the typelist metaprogramming of the original design
//! (see `SPEC_FULL.md` §9): parameter direction is captured here by plain
//! generic parameters (`In`, `Out`, `Args`) rather than a compile-time
//! typelist tree, and the [`interface!`](crate::interface!) macro expands
//! to plain `const` values of these types.

use std::marker::PhantomData;

use crate::codec::{ArgList, Encode};
use crate::properties::{Access, NotifyPolicy};
use crate::signature::OwnedSignature;

/// A compile-time description of one bus interface: its dotted name plus
/// the ordered list of members declared on it.
///
/// Implemented by the marker type the [`interface!`](crate::interface!)
/// macro generates for each `interface! { ... }` block; never implemented
/// by hand.
pub trait Interface {
    /// The interface's bus-compatible dotted name, e.g.
    /// `"org.example.Calculator"`.
    const NAME: &'static str;

    /// The members declared on this interface, in declaration order. Used
    /// by introspection and by `ObjectManager`.
    const MEMBERS: &'static [Member];
}

/// One element of an [`Interface`]'s declaration, as needed by
/// introspection and dispatch bookkeeping.
#[derive(Debug, Clone, Copy)]
pub enum Member {
    Method(MethodInfo),
    Signal(SignalInfo),
    Property(PropertyInfo),
}

fn signature_of<T>() -> OwnedSignature
where
    T: Encode,
{
    let mut signature = OwnedSignature::new();
    T::signature(&mut signature);
    signature
}

/// Like [`signature_of`], but for a method's/signal's flat argument list
/// (see [`ArgList`]) rather than a single struct-valued type.
fn arg_signature_of<T>() -> OwnedSignature
where
    T: ArgList,
{
    let mut signature = OwnedSignature::new();
    T::arg_signature(&mut signature);
    signature
}

fn empty_signature() -> OwnedSignature {
    OwnedSignature::new()
}

/// Static metadata for one method member. The input/output signatures are
/// function pointers rather than precomputed strings, since the codec's
/// `signature()` builds an [`OwnedSignature`] rather than a `const`-evaluable
/// string; introspection calls them on demand.
#[derive(Debug, Clone, Copy)]
pub struct MethodInfo {
    pub name: &'static str,
    pub oneway: bool,
    pub in_signature: fn() -> OwnedSignature,
    pub out_signature: fn() -> OwnedSignature,
}

/// Static metadata for one signal member.
#[derive(Debug, Clone, Copy)]
pub struct SignalInfo {
    pub name: &'static str,
    pub signature: fn() -> OwnedSignature,
}

/// Static metadata for one property member.
#[derive(Debug, Clone, Copy)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub signature: fn() -> OwnedSignature,
    pub access: Access,
    pub notify: NotifyPolicy,
}

/// A method member: binds a name to a statically known argument tuple `In`
/// and return type `Out`.
///
/// `In` is always the tuple the `interface!` macro builds from the method's
/// parameter list (`()` for none, `(T,)` for one, and so on), encoded as a
/// flat [`ArgList`] rather than a `STRUCT`. `Out` is the bare return type the
/// method declares, encoded with the ordinary [`Encode`]. A `oneway` method
/// always has `Out = ()`.
///
/// Stub-side call methods (`call`, `call_async`) live in [`crate::stub`];
/// skeleton-side registration (`handled_by`) lives in [`crate::skeleton`].
pub struct Method<In, Out> {
    pub info: MethodInfo,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Method<In, Out>
where
    In: ArgList,
    Out: Encode,
{
    /// Declare a method that expects a reply.
    pub const fn new(name: &'static str) -> Self {
        Self {
            info: MethodInfo {
                name,
                oneway: false,
                in_signature: arg_signature_of::<In>,
                out_signature: signature_of::<Out>,
            },
            _marker: PhantomData,
        }
    }
}

impl<In> Method<In, ()>
where
    In: ArgList,
{
    /// Declare a `oneway` method: no reply is expected or permitted.
    pub const fn new_oneway(name: &'static str) -> Self {
        Self {
            info: MethodInfo {
                name,
                oneway: true,
                in_signature: arg_signature_of::<In>,
                out_signature: empty_signature,
            },
            _marker: PhantomData,
        }
    }
}

/// A signal member: a fire-and-forget message from skeleton to subscribed
/// stubs, carrying a statically known payload tuple `Args`, encoded as a
/// flat [`ArgList`] the same way a method's `In` is (see [`Method`]).
pub struct Signal<Args> {
    pub info: SignalInfo,
    _marker: PhantomData<fn(Args)>,
}

impl<Args> Signal<Args>
where
    Args: ArgList,
{
    pub const fn new(name: &'static str) -> Self {
        Self {
            info: SignalInfo {
                name,
                signature: arg_signature_of::<Args>,
            },
            _marker: PhantomData,
        }
    }
}

/// A property member: a named typed value with an access mode and a
/// change-notification policy.
pub struct Property<T> {
    pub info: PropertyInfo,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Property<T>
where
    T: Encode,
{
    pub const fn new(name: &'static str, access: Access, notify: NotifyPolicy) -> Self {
        Self {
            info: PropertyInfo {
                name,
                signature: signature_of::<T>,
                access,
                notify,
            },
            _marker: PhantomData,
        }
    }
}
