use std::fmt;

use super::validate::validate;
use super::{OwnedSignature, SignatureError};

/// A borrowed, validated D-Bus signature string.
///
/// # Examples
///
/// ```
/// use simppl::Signature;
///
/// assert!(Signature::new("ai").is_ok());
/// assert!(Signature::new("(a)").is_err());
/// ```
#[derive(Hash, PartialEq, Eq)]
#[repr(transparent)]
pub struct Signature(str);

impl Signature {
    /// The empty signature.
    pub const EMPTY: &'static Signature = Signature::new_const("");
    /// A single signature argument.
    pub const SIGNATURE: &'static Signature = Signature::new_const("g");
    /// An object path argument.
    pub const OBJECT_PATH: &'static Signature = Signature::new_const("o");
    /// A string argument.
    pub const STRING: &'static Signature = Signature::new_const("s");
    /// A single byte.
    pub const BYTE: &'static Signature = Signature::new_const("y");
    /// A boolean, encoded as a `UINT32` that must be `0` or `1`.
    pub const BOOLEAN: &'static Signature = Signature::new_const("b");
    /// Signed 16-bit integer.
    pub const INT16: &'static Signature = Signature::new_const("n");
    /// Unsigned 16-bit integer.
    pub const UINT16: &'static Signature = Signature::new_const("q");
    /// Signed 32-bit integer.
    pub const INT32: &'static Signature = Signature::new_const("i");
    /// Unsigned 32-bit integer.
    pub const UINT32: &'static Signature = Signature::new_const("u");
    /// Signed 64-bit integer.
    pub const INT64: &'static Signature = Signature::new_const("x");
    /// Unsigned 64-bit integer.
    pub const UINT64: &'static Signature = Signature::new_const("t");
    /// IEEE 754 double precision float.
    pub const DOUBLE: &'static Signature = Signature::new_const("d");
    /// A variant.
    pub const VARIANT: &'static Signature = Signature::new_const("v");
    /// An index into an out-of-band array of file descriptors.
    pub const UNIX_FD: &'static Signature = Signature::new_const("h");

    /// Construct a new signature, validating it in a constant context. Panics
    /// if the signature is malformed.
    #[track_caller]
    pub const fn new_const(signature: &str) -> &Signature {
        if validate(signature.as_bytes()).is_err() {
            panic!("invalid D-Bus signature");
        }

        // SAFETY: `Signature` is `repr(transparent)` over `str`.
        unsafe { &*(signature as *const str as *const Signature) }
    }

    /// Try to construct a new signature, validating it.
    pub fn new(signature: &str) -> Result<&Signature, SignatureError> {
        validate(signature.as_bytes())?;
        // SAFETY: `Signature` is `repr(transparent)` over `str`.
        Ok(unsafe { &*(signature as *const str as *const Signature) })
    }

    /// Construct a new signature from raw bytes without validating that the
    /// bytes are well-formed UTF-8 or a valid signature grammar.
    ///
    /// # Safety
    ///
    /// The caller must ensure `bytes` is valid UTF-8 and a well-formed
    /// signature.
    pub(crate) unsafe fn new_unchecked(bytes: &[u8]) -> &Signature {
        &*(std::str::from_utf8_unchecked(bytes) as *const str as *const Signature)
    }

    /// Test if the signature is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of bytes in the signature.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the signature as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Borrow the signature as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Signature> for Signature {
    fn as_ref(&self) -> &Signature {
        self
    }
}

impl ToOwned for Signature {
    type Owned = OwnedSignature;

    fn to_owned(&self) -> Self::Owned {
        // SAFETY: `self` is already validated.
        unsafe { OwnedSignature::from_string_unchecked(self.0.to_owned()) }
    }
}

impl PartialEq<OwnedSignature> for Signature {
    fn eq(&self, other: &OwnedSignature) -> bool {
        self.0 == *other.as_str()
    }
}

impl PartialEq<OwnedSignature> for &Signature {
    fn eq(&self, other: &OwnedSignature) -> bool {
        self.0 == *other.as_str()
    }
}

impl PartialEq<str> for Signature {
    fn eq(&self, other: &str) -> bool {
        self.0 == *other
    }
}
