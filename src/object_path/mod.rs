//! D-Bus object paths.

pub use self::object_path::ObjectPath;
mod object_path;

pub use self::owned_object_path::OwnedObjectPath;
mod owned_object_path;

pub use self::error::ObjectPathError;
mod error;

mod validate;

#[cfg(test)]
mod tests;
