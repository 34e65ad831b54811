use crate::protocol::Endianness;

/// A fixed-size value that can be byte-swapped in place when the message it
/// was read from, or is being written to, uses a non-native endianness.
///
/// # Safety
///
/// Implementors must be `repr(C)` or `repr(transparent)`, inhabit every bit
/// pattern of their size, and have an alignment of at most 8 (the maximum
/// alignment used by the D-Bus wire format).
pub(crate) unsafe trait Frame: Copy {
    /// Adjust `self` from wire order to native order, or vice versa.
    fn adjust(&mut self, endianness: Endianness);
}

unsafe impl Frame for u8 {
    #[inline]
    fn adjust(&mut self, _: Endianness) {}
}

unsafe impl Frame for i8 {
    #[inline]
    fn adjust(&mut self, _: Endianness) {}
}

macro_rules! impl_number {
    ($($ty:ty),* $(,)?) => {
        $(
            unsafe impl Frame for $ty {
                #[inline]
                fn adjust(&mut self, endianness: Endianness) {
                    if endianness != Endianness::NATIVE {
                        *self = <$ty>::swap_bytes(*self);
                    }
                }
            }
        )*
    }
}

impl_number!(u16, u32, u64);
impl_number!(i16, i32, i64);

unsafe impl Frame for f64 {
    #[inline]
    fn adjust(&mut self, endianness: Endianness) {
        if endianness != Endianness::NATIVE {
            *self = f64::from_bits(self.to_bits().swap_bytes());
        }
    }
}
