//! Marshaling traits that connect Rust values to D-Bus wire types.

use std::collections::HashMap;
use std::hash::Hash;

use crate::buf::{BodyBuf, BufMut, ReadBuf};
use crate::error::{Error, ErrorKind, Result};
use crate::object_path::{ObjectPath, OwnedObjectPath};
use crate::protocol::Type;
use crate::signature::{OwnedSignature, Signature};

/// A value that can be appended to a [`BodyBuf`] as a D-Bus message
/// argument.
pub trait Encode {
    /// The D-Bus alignment, in bytes, of the first byte of this type's
    /// encoding.
    const ALIGNMENT: usize;

    /// Append this type's signature to `sig`.
    fn signature(sig: &mut OwnedSignature) -> bool;

    /// Encode `self` into `buf`.
    fn encode(&self, buf: &mut BodyBuf);
}

/// A value that can be read back out of a message body.
pub trait Decode<'de>: Sized {
    /// Decode a value from `buf`.
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self>;
}

fn expect(found: Type, expected: &'static str) -> Error {
    Error::new(ErrorKind::DecodeMismatch {
        expected,
        found: (found.0 as char).to_string(),
    })
}

macro_rules! impl_integer {
    ($ty:ty, $sig:literal, $align:expr, $expected:literal) => {
        impl Encode for $ty {
            const ALIGNMENT: usize = $align;

            fn signature(sig: &mut OwnedSignature) -> bool {
                sig.push($sig as char)
            }

            fn encode(&self, buf: &mut BodyBuf) {
                buf.store(*self);
            }
        }

        impl<'de> Decode<'de> for $ty {
            fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
                buf.load::<$ty>()
            }
        }
    };
}

impl_integer!(u8, b'y', 1, "BYTE");
impl_integer!(i16, b'n', 2, "INT16");
impl_integer!(u16, b'q', 2, "UINT16");
impl_integer!(i32, b'i', 4, "INT32");
impl_integer!(u32, b'u', 4, "UINT32");
impl_integer!(i64, b'x', 8, "INT64");
impl_integer!(u64, b't', 8, "UINT64");
impl_integer!(f64, b'd', 8, "DOUBLE");

/// The empty argument list: encodes nothing and has the empty signature.
/// Used by the typed front-end for methods and signals declared with no
/// parameters.
impl Encode for () {
    const ALIGNMENT: usize = 1;

    fn signature(_sig: &mut OwnedSignature) -> bool {
        true
    }

    fn encode(&self, _buf: &mut BodyBuf) {}
}

impl<'de> Decode<'de> for () {
    fn decode(_buf: &mut ReadBuf<'de>) -> Result<Self> {
        Ok(())
    }
}

impl Encode for bool {
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('b')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        buf.store(u32::from(*self));
    }
}

impl<'de> Decode<'de> for bool {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        Ok(buf.load::<u32>()? != 0)
    }
}

impl Encode for str {
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('s')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        buf.store(self.len() as u32);
        buf.extend_from_slice_nul(self.as_bytes());
    }
}

impl Encode for String {
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        <str as Encode>::signature(sig)
    }

    fn encode(&self, buf: &mut BodyBuf) {
        self.as_str().encode(buf);
    }
}

impl<'de> Decode<'de> for &'de str {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u32>()? as usize;
        let bytes = buf.load_slice_nul(len)?;
        Ok(std::str::from_utf8(bytes)?)
    }
}

impl<'de> Decode<'de> for String {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        Ok(<&str>::decode(buf)?.to_owned())
    }
}

impl Encode for Signature {
    const ALIGNMENT: usize = 1;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('g')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        buf.store(self.len() as u8);
        buf.extend_from_slice_nul(self.as_bytes());
    }
}

impl Encode for OwnedSignature {
    const ALIGNMENT: usize = 1;

    fn signature(sig: &mut OwnedSignature) -> bool {
        <Signature as Encode>::signature(sig)
    }

    fn encode(&self, buf: &mut BodyBuf) {
        self.as_signature().encode(buf);
    }
}

impl<'de> Decode<'de> for &'de Signature {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u8>()? as usize;
        let bytes = buf.load_slice_nul(len)?;
        let text = std::str::from_utf8(bytes)?;
        Ok(Signature::new(text)?)
    }
}

impl<'de> Decode<'de> for OwnedSignature {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u8>()? as usize;
        let bytes = buf.load_slice_nul(len)?;
        let text = std::str::from_utf8(bytes)?;
        Ok(OwnedSignature::from_str(text)?)
    }
}

impl Encode for ObjectPath {
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('o')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        buf.store(self.as_str().len() as u32);
        buf.extend_from_slice_nul(self.as_str().as_bytes());
    }
}

impl Encode for OwnedObjectPath {
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        <ObjectPath as Encode>::signature(sig)
    }

    fn encode(&self, buf: &mut BodyBuf) {
        self.as_object_path().encode(buf);
    }
}

impl<'de> Decode<'de> for &'de ObjectPath {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u32>()? as usize;
        let bytes = buf.load_slice_nul(len)?;
        let text = std::str::from_utf8(bytes)?;
        Ok(ObjectPath::new(text)?)
    }
}

impl<'de> Decode<'de> for OwnedObjectPath {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u32>()? as usize;
        let bytes = buf.load_slice_nul(len)?;
        let text = std::str::from_utf8(bytes)?;
        Ok(OwnedObjectPath::new(text.to_owned())?)
    }
}

impl<T> Encode for Vec<T>
where
    T: Encode,
{
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('a') && T::signature(sig)
    }

    fn encode(&self, buf: &mut BodyBuf) {
        let (len_at, start) = buf.begin_array(T::ALIGNMENT);

        for value in self {
            value.encode(buf);
        }

        buf.end_array(len_at, start);
    }
}

impl<'de, T> Decode<'de> for Vec<T>
where
    T: Decode<'de> + Encode,
{
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u32>()? as usize;
        buf.align_to(T::ALIGNMENT)?;
        let mut array = buf.read_buf(len)?;
        let mut out = Vec::new();

        while !array.is_empty() {
            array.align_to(T::ALIGNMENT)?;
            out.push(T::decode(&mut array)?);
        }

        Ok(out)
    }
}

impl<K, V> Encode for HashMap<K, V>
where
    K: Encode,
    V: Encode,
{
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('a') && sig.push('{') && K::signature(sig) && V::signature(sig) && sig.push('}')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        let (len_at, start) = buf.begin_array(8);

        for (key, value) in self {
            buf.align_mut::<u64>();
            key.encode(buf);
            value.encode(buf);
        }

        buf.end_array(len_at, start);
    }
}

impl<'de, K, V> Decode<'de> for HashMap<K, V>
where
    K: Decode<'de> + Eq + Hash,
    V: Decode<'de>,
{
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u32>()? as usize;
        buf.align::<u64>()?;
        let mut array = buf.read_buf(len)?;
        let mut out = HashMap::new();

        while !array.is_empty() {
            array.align::<u64>()?;
            let key = K::decode(&mut array)?;
            let value = V::decode(&mut array)?;
            out.insert(key, value);
        }

        Ok(out)
    }
}

macro_rules! impl_tuple {
    ($($name:ident: $idx:tt),+) => {
        impl<$($name),+> Encode for ($($name,)+)
        where
            $($name: Encode),+
        {
            const ALIGNMENT: usize = 8;

            fn signature(sig: &mut OwnedSignature) -> bool {
                sig.push('(') $(&& $name::signature(sig))+ && sig.push(')')
            }

            fn encode(&self, buf: &mut BodyBuf) {
                buf.align_mut::<u64>();
                $(self.$idx.encode(buf);)+
            }
        }

        impl<'de, $($name),+> Decode<'de> for ($($name,)+)
        where
            $($name: Decode<'de>),+
        {
            fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
                buf.align::<u64>()?;
                Ok(($($name::decode(buf)?,)+))
            }
        }
    };
}

impl_tuple!(A: 0);
impl_tuple!(A: 0, B: 1);
impl_tuple!(A: 0, B: 1, C: 2);
impl_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// The flat top-level argument sequence carried by a method call, method
/// return, or signal body.
///
/// The `interface!` macro always builds a method's/signal's parameter list
/// as a tuple, but on the wire those parameters are a flat sequence of
/// complete types, not a single `STRUCT`-typed argument the way a genuine
/// struct-valued field would be. The tuple [`Encode`]/[`Decode`] impls
/// above are for that second case (`sig.push('(')`/`align_mut::<u64>()`);
/// `ArgList` is the first case, used only by [`crate::stub`]/
/// [`crate::skeleton`] when reading or writing a member's argument list.
pub trait ArgList {
    /// Append this argument list's signature to `sig`, with no enclosing
    /// container.
    fn arg_signature(sig: &mut OwnedSignature) -> bool;

    /// Encode each argument in sequence, with no enclosing container.
    fn encode_args(&self, buf: &mut BodyBuf);
}

/// The decoding half of [`ArgList`].
pub trait DecodeArgList<'de>: Sized {
    /// Decode each argument in sequence, with no enclosing container.
    fn decode_args(buf: &mut ReadBuf<'de>) -> Result<Self>;
}

impl ArgList for () {
    fn arg_signature(_sig: &mut OwnedSignature) -> bool {
        true
    }

    fn encode_args(&self, _buf: &mut BodyBuf) {}
}

impl<'de> DecodeArgList<'de> for () {
    fn decode_args(_buf: &mut ReadBuf<'de>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_arg_list {
    ($($name:ident: $idx:tt),+) => {
        impl<$($name),+> ArgList for ($($name,)+)
        where
            $($name: Encode),+
        {
            fn arg_signature(sig: &mut OwnedSignature) -> bool {
                true $(&& $name::signature(sig))+
            }

            fn encode_args(&self, buf: &mut BodyBuf) {
                $(self.$idx.encode(buf);)+
            }
        }

        impl<'de, $($name),+> DecodeArgList<'de> for ($($name,)+)
        where
            $($name: Decode<'de>),+
        {
            fn decode_args(buf: &mut ReadBuf<'de>) -> Result<Self> {
                Ok(($($name::decode(buf)?,)+))
            }
        }
    };
}

impl_arg_list!(A: 0);
impl_arg_list!(A: 0, B: 1);
impl_arg_list!(A: 0, B: 1, C: 2);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars() {
        let mut body = BodyBuf::new();
        body.write(&10u16);
        body.write(&"hello".to_owned());
        body.write(&true);

        assert_eq!(body.signature(), Signature::new("qsb").unwrap());

        let mut read = body.read_buf();
        assert_eq!(u16::decode(&mut read).unwrap(), 10);
        assert_eq!(String::decode(&mut read).unwrap(), "hello");
        assert!(bool::decode(&mut read).unwrap());
    }

    #[test]
    fn round_trips_array_and_map() {
        let mut body = BodyBuf::new();
        body.write(&vec![1u32, 2, 3]);

        let mut map = HashMap::new();
        map.insert("a".to_owned(), 1i32);
        body.write(&map);

        assert_eq!(body.signature(), Signature::new("aua{si}").unwrap());

        let mut read = body.read_buf();
        assert_eq!(Vec::<u32>::decode(&mut read).unwrap(), vec![1, 2, 3]);
        let decoded = HashMap::<String, i32>::decode(&mut read).unwrap();
        assert_eq!(decoded.get("a"), Some(&1));
    }
}
