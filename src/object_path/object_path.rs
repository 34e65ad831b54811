use std::fmt;

use super::validate::validate;
use super::{ObjectPathError, OwnedObjectPath};

/// A validated D-Bus object path.
///
/// * Must begin with `/` and consist of elements separated by `/`.
/// * Each element may only contain `[A-Za-z0-9_]` and must not be empty.
/// * A trailing `/` is only allowed for the root path `/` itself.
///
/// # Examples
///
/// ```
/// use simppl::ObjectPath;
///
/// assert!(ObjectPath::new("/org/freedesktop/DBus").is_ok());
/// assert!(ObjectPath::new("/org//DBus").is_err());
/// assert!(ObjectPath::new("relative/path").is_err());
/// ```
#[derive(PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectPath(str);

impl ObjectPath {
    /// The root object path `"/"`.
    pub const ROOT: &'static ObjectPath = ObjectPath::new_const("/");

    /// Construct a new object path, validating it in a constant context.
    /// Panics if the path is malformed.
    #[track_caller]
    pub const fn new_const(path: &str) -> &ObjectPath {
        if !validate(path.as_bytes()) {
            panic!("invalid D-Bus object path");
        }

        // SAFETY: `ObjectPath` is `repr(transparent)` over `str`.
        unsafe { &*(path as *const str as *const ObjectPath) }
    }

    /// Try to construct a new object path, validating it.
    pub fn new(path: &str) -> Result<&ObjectPath, ObjectPathError> {
        if !validate(path.as_bytes()) {
            return Err(ObjectPathError);
        }

        // SAFETY: `ObjectPath` is `repr(transparent)` over `str`.
        Ok(unsafe { &*(path as *const str as *const ObjectPath) })
    }

    /// Construct an object path from raw bytes without validating them.
    ///
    /// # Safety
    ///
    /// The caller must ensure `bytes` is valid UTF-8 and a well-formed path.
    pub(crate) unsafe fn new_unchecked(bytes: &[u8]) -> &ObjectPath {
        &*(std::str::from_utf8_unchecked(bytes) as *const str as *const ObjectPath)
    }

    /// Borrow the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path's `/`-separated elements.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Test whether `other` is this path or a descendant of it.
    pub fn is_ancestor_of(&self, other: &ObjectPath) -> bool {
        if &self.0 == "/" {
            return true;
        }

        other.0.starts_with(&self.0)
            && other.0[self.0.len()..]
                .chars()
                .next()
                .map_or(true, |c| c == '/')
    }
}

impl fmt::Debug for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectPath").field(&self.as_str()).finish()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<ObjectPath> for ObjectPath {
    fn as_ref(&self) -> &ObjectPath {
        self
    }
}

impl ToOwned for ObjectPath {
    type Owned = OwnedObjectPath;

    fn to_owned(&self) -> Self::Owned {
        // SAFETY: `self` is already validated.
        unsafe { OwnedObjectPath::from_string_unchecked(self.0.to_owned()) }
    }
}

impl PartialEq<str> for ObjectPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<OwnedObjectPath> for ObjectPath {
    fn eq(&self, other: &OwnedObjectPath) -> bool {
        self.0 == *other.as_str()
    }
}
