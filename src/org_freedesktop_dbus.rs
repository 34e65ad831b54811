//! Well-known names belonging to the `org.freedesktop.DBus` bus daemon
//! interface, used internally for `Hello`, `ListNames`, `AddMatch` and
//! `NameOwnerChanged` bookkeeping.

/// Well known destination name.
pub(crate) const DESTINATION: &str = "org.freedesktop.DBus";

/// Well known interface name.
pub(crate) const INTERFACE: &str = "org.freedesktop.DBus";

/// Well known D-Bus path.
pub(crate) const PATH: &str = "/org/freedesktop/DBus";

/// The `NameOwnerChanged` signal member.
pub(crate) const NAME_OWNER_CHANGED: &str = "NameOwnerChanged";
