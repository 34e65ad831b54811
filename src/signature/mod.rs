//! D-Bus type signatures.

pub use self::signature::Signature;
mod signature;

pub use self::owned_signature::OwnedSignature;
mod owned_signature;

pub use self::error::SignatureError;
mod error;

mod validate;

#[cfg(test)]
mod tests;
