//! The outcome of a completed method call, delivered to an async
//! continuation or returned from a blocking call.

use std::num::NonZeroU32;

use crate::error::Error;

/// The result of a method call, paired with the serial it replied to.
///
/// Coerces to `bool`, `true` for a successful reply and `false` for an
/// error, mirroring how call outcomes are checked before unpacking a reply.
#[derive(Debug)]
pub struct CallState {
    serial: NonZeroU32,
    result: Result<(), Error>,
}

impl CallState {
    pub(crate) fn success(serial: NonZeroU32) -> Self {
        Self {
            serial,
            result: Ok(()),
        }
    }

    pub(crate) fn failure(serial: NonZeroU32, error: Error) -> Self {
        Self {
            serial,
            result: Err(error),
        }
    }

    /// The serial of the call this state belongs to.
    pub fn serial(&self) -> NonZeroU32 {
        self.serial
    }

    /// Test whether the call failed with a transport-level error.
    pub fn is_transport_error(&self) -> bool {
        matches!(&self.result, Err(error) if error.is_transport())
    }

    /// Test whether the call failed with an application-level runtime error.
    pub fn is_runtime_error(&self) -> bool {
        matches!(&self.result, Err(error) if error.is_runtime())
    }

    /// Borrow the error, if the call failed.
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    /// Consume this state as a `Result`.
    pub fn into_result(self) -> Result<(), Error> {
        self.result
    }
}

impl From<CallState> for bool {
    fn from(state: CallState) -> Self {
        state.result.is_ok()
    }
}
