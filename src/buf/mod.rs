//! Aligned buffers used to marshal and unmarshal D-Bus messages.
//!
//! D-Bus requires every scalar to be placed at an offset that is a multiple
//! of its own size (1, 2, 4 or 8 bytes), counted from the start of the
//! message. Because every message's header is itself padded out to an
//! 8-byte boundary before the body begins, a body-relative offset of zero is
//! congruent to the true message-relative offset for every alignment D-Bus
//! uses — so buffers in this module track alignment relative to their own
//! start rather than needing to know where they sit inside a larger message.

pub use self::buf_mut::{Alloc, BufMut};
mod buf_mut;

pub use self::owned_buf::OwnedBuf;
mod owned_buf;

pub use self::read_buf::ReadBuf;
mod read_buf;

pub use self::body::{ArrayWriter, BodyBuf, StructReader, StructWriter};
mod body;

#[cfg(test)]
mod tests;

/// The maximum length of an array, in bytes, per the D-Bus specification.
pub(crate) const MAX_ARRAY_LENGTH: u32 = 1 << 26;
/// The maximum length of a message body, in bytes.
pub(crate) const MAX_BODY_LENGTH: u32 = 1 << 27;

/// Padding needed so that `len` becomes a multiple of `align_of::<T>()`.
#[inline(always)]
pub(crate) fn padding_to<T>(len: usize) -> usize {
    padding_to_align(std::mem::align_of::<T>(), len)
}

#[inline(always)]
pub(crate) fn padding_to_align(align: usize, len: usize) -> usize {
    let mask = align - 1;
    (align - (len & mask)) & mask
}
