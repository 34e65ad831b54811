//! Access mode and change-notification policy for interface properties,
//! plus the well-known `org.freedesktop.DBus.Properties` names shared by
//! the stub and skeleton sides.

/// The `org.freedesktop.DBus.Properties` interface name.
pub(crate) const INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// The `PropertiesChanged` signal member name.
pub(crate) const CHANGED_SIGNAL: &str = "PropertiesChanged";

/// The `Get` method member name.
pub(crate) const GET: &str = "Get";

/// The `Set` method member name.
pub(crate) const SET: &str = "Set";

/// The `GetAll` method member name.
pub(crate) const GET_ALL: &str = "GetAll";

/// Whether a property can be written over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Only `Properties.Get`/`GetAll` are accepted; `Set` is rejected.
    ReadOnly,
    /// Both `Get` and `Set` are accepted.
    ReadWrite,
}

impl Access {
    pub(crate) fn is_writable(self) -> bool {
        matches!(self, Access::ReadWrite)
    }
}

/// When a property change should be announced via `PropertiesChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPolicy {
    /// Never emit a signal for this property.
    None,
    /// Emit only when the new value differs from the current one.
    OnChange,
    /// Emit on every assignment, regardless of whether the value changed.
    Always,
    /// Batch assignments; emit only when the skeleton's `commit()` runs.
    Committed,
}

/// The outcome of assigning a new value to a property, used by the
/// skeleton to decide whether (and how) to emit `PropertiesChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeOutcome {
    /// No signal should be emitted for this assignment.
    Suppressed,
    /// The property changed and should be reported immediately.
    Emit,
    /// The property changed but reporting is deferred to `commit()`.
    Pending,
}

impl NotifyPolicy {
    /// Decide what should happen when a property transitions from `changed
    /// = false` (identical) to `changed = true` (different), per this
    /// policy.
    pub(crate) fn outcome(self, changed: bool) -> ChangeOutcome {
        match self {
            NotifyPolicy::None => ChangeOutcome::Suppressed,
            NotifyPolicy::OnChange if changed => ChangeOutcome::Emit,
            NotifyPolicy::OnChange => ChangeOutcome::Suppressed,
            NotifyPolicy::Always => ChangeOutcome::Emit,
            NotifyPolicy::Committed if changed => ChangeOutcome::Pending,
            NotifyPolicy::Committed => ChangeOutcome::Suppressed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_change_only_emits_when_different() {
        assert_eq!(NotifyPolicy::OnChange.outcome(true), ChangeOutcome::Emit);
        assert_eq!(NotifyPolicy::OnChange.outcome(false), ChangeOutcome::Suppressed);
    }

    #[test]
    fn always_emits_regardless() {
        assert_eq!(NotifyPolicy::Always.outcome(false), ChangeOutcome::Emit);
    }

    #[test]
    fn committed_defers() {
        assert_eq!(NotifyPolicy::Committed.outcome(true), ChangeOutcome::Pending);
    }
}
