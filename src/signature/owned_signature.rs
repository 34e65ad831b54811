use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use super::validate::MAX_SIGNATURE;
use super::{Signature, SignatureError};

/// An owned, growable D-Bus signature, used to accumulate the signature of a
/// message body as values are stored into it.
#[derive(Clone, Default, Hash, PartialEq, Eq)]
pub struct OwnedSignature {
    value: String,
}

impl OwnedSignature {
    /// Construct a new, empty signature.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct an owned signature from a validated string.
    pub fn from_str(signature: &str) -> Result<Self, SignatureError> {
        let sig = Signature::new(signature)?;
        Ok(sig.to_owned())
    }

    /// Construct an owned signature without validating it.
    ///
    /// # Safety
    ///
    /// The caller must ensure `value` is a well-formed signature.
    pub(crate) unsafe fn from_string_unchecked(value: String) -> Self {
        Self { value }
    }

    /// Append another signature's contents to this one.
    ///
    /// Returns `false`, leaving `self` unmodified, if the result would
    /// exceed the 255 byte signature limit.
    #[must_use = "the return value must be checked to detect signature overflow"]
    pub(crate) fn extend(&mut self, other: &Signature) -> bool {
        if self.value.len() + other.len() > MAX_SIGNATURE {
            return false;
        }

        self.value.push_str(other.as_str());
        true
    }

    /// Append a single type code.
    #[must_use = "the return value must be checked to detect signature overflow"]
    pub(crate) fn push(&mut self, code: char) -> bool {
        if self.value.len() + 1 > MAX_SIGNATURE {
            return false;
        }

        self.value.push(code);
        true
    }

    /// Clear the signature.
    pub(crate) fn clear(&mut self) {
        self.value.clear();
    }

    /// Borrow this as a [`Signature`].
    pub fn as_signature(&self) -> &Signature {
        // SAFETY: only ever constructed from validated input.
        unsafe { Signature::new_unchecked(self.value.as_bytes()) }
    }
}

impl Deref for OwnedSignature {
    type Target = Signature;

    fn deref(&self) -> &Self::Target {
        self.as_signature()
    }
}

impl AsRef<Signature> for OwnedSignature {
    fn as_ref(&self) -> &Signature {
        self.as_signature()
    }
}

impl Borrow<Signature> for OwnedSignature {
    fn borrow(&self) -> &Signature {
        self.as_signature()
    }
}

impl fmt::Debug for OwnedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_signature().fmt(f)
    }
}

impl fmt::Display for OwnedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_signature().fmt(f)
    }
}

impl PartialEq<Signature> for OwnedSignature {
    fn eq(&self, other: &Signature) -> bool {
        self.value == *other.as_str()
    }
}

impl PartialEq<&Signature> for OwnedSignature {
    fn eq(&self, other: &&Signature) -> bool {
        self.value == *other.as_str()
    }
}
