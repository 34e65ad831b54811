//! Dynamically-typed D-Bus values: `VARIANT` and the wide-string extension
//! used by properties whose concrete type is only known at runtime.

use crate::buf::{BodyBuf, BufMut, ReadBuf};
use crate::codec::{Decode, Encode};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::Endianness;
use crate::signature::{OwnedSignature, Signature};

pub(crate) fn alignment_of(code: u8) -> usize {
    match code {
        b'y' | b'g' | b'v' => 1,
        b'n' | b'q' => 2,
        b'b' | b'i' | b'u' | b's' | b'o' | b'h' | b'a' => 4,
        b'x' | b't' | b'd' | b'(' | b'{' => 8,
        _ => 1,
    }
}

/// The number of signature bytes making up one complete type starting at
/// `sig[0]`.
fn type_len(sig: &[u8]) -> usize {
    match sig[0] {
        b'a' => 1 + type_len(&sig[1..]),
        b'(' => {
            let mut i = 1;
            while sig[i] != b')' {
                i += type_len(&sig[i..]);
            }
            i + 1
        }
        b'{' => {
            let mut i = 1;
            while sig[i] != b'}' {
                i += type_len(&sig[i..]);
            }
            i + 1
        }
        _ => 1,
    }
}

/// Advance `buf` past exactly one complete value of the type described by
/// `sig[0..]`, returning how many signature bytes that type consumed.
pub(crate) fn skip_one(sig: &[u8], buf: &mut ReadBuf<'_>) -> Result<usize> {
    match sig[0] {
        b'y' | b'g' => {
            buf.load::<u8>()?;
        }
        b'n' | b'q' => {
            buf.load::<u16>()?;
        }
        b'b' | b'i' | b'u' | b'h' => {
            buf.load::<u32>()?;
        }
        b'x' | b't' | b'd' => {
            buf.load::<u64>()?;
        }
        b's' | b'o' => {
            let len = buf.load::<u32>()? as usize;
            buf.advance(len + 1)?;
        }
        b'v' => {
            let len = buf.load::<u8>()? as usize;
            let inner = buf.load_slice_nul(len)?.to_vec();
            skip_one(&inner, buf)?;
        }
        b'a' => {
            let elem_len = type_len(&sig[1..]);
            let array_len = buf.load::<u32>()? as usize;
            buf.align_to(alignment_of(sig[1]))?;
            buf.advance(array_len)?;
            return Ok(1 + elem_len);
        }
        b'(' => {
            buf.align_to(8)?;
            let mut i = 1;

            while sig[i] != b')' {
                i += skip_one(&sig[i..], buf)?;
            }

            return Ok(i + 1);
        }
        _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
    }

    Ok(1)
}

/// A dynamically-typed D-Bus value, as carried by a `VARIANT` argument.
///
/// The inner value is captured as its signature plus its already-encoded
/// bytes; [`Variant::get`] re-decodes it on demand.
#[derive(Debug, Clone)]
pub struct Variant {
    signature: OwnedSignature,
    body: Vec<u8>,
    endianness: Endianness,
}

impl Variant {
    /// Capture `value` as a variant.
    pub fn new<T>(value: &T) -> Self
    where
        T: ?Sized + Encode,
    {
        let mut body = BodyBuf::new();
        body.write(value);
        Self {
            signature: body.signature().to_owned(),
            body: body.get().to_vec(),
            endianness: body.endianness(),
        }
    }

    /// The signature of the contained value.
    pub fn signature(&self) -> &Signature {
        self.signature.as_signature()
    }

    /// Test whether the contained value has type `T`.
    pub fn is<T>(&self) -> bool
    where
        T: Encode,
    {
        let mut sig = OwnedSignature::new();
        T::signature(&mut sig);
        self.signature == sig
    }

    /// Decode the contained value as `T`, failing if the signature does not
    /// match.
    pub fn get<'de, T>(&'de self) -> Result<T>
    where
        T: Decode<'de> + Encode,
    {
        if !self.is::<T>() {
            return Err(Error::new(ErrorKind::DecodeMismatch {
                expected: "variant payload",
                found: self.signature.to_string(),
            }));
        }

        let mut buf = self.body_reader();
        T::decode(&mut buf)
    }

    pub(crate) fn body_reader(&self) -> ReadBuf<'_> {
        ReadBuf::new(&self.body, self.endianness)
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature && self.body == other.body
    }
}

impl Encode for Variant {
    const ALIGNMENT: usize = 1;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('v')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        self.signature.as_signature().encode(buf);
        let align = alignment_of(self.signature.as_bytes().first().copied().unwrap_or(b'y'));
        buf.align_to(align);
        buf.extend_from_slice(&self.body);
    }
}

impl<'de> Decode<'de> for Variant {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let len = buf.load::<u8>()? as usize;
        let sig_bytes = buf.load_slice_nul(len)?.to_vec();
        let signature = OwnedSignature::from_str(std::str::from_utf8(&sig_bytes)?)?;

        let start_align = alignment_of(sig_bytes.first().copied().unwrap_or(b'y'));
        buf.align_to(start_align)?;

        let mut probe = buf.clone();
        skip_one(&sig_bytes, &mut probe)?;
        let consumed = probe.position() - buf.position();
        let body = buf.load_slice(consumed)?.to_vec();

        Ok(Self {
            signature,
            body,
            endianness: buf.endianness(),
        })
    }
}

/// A runtime-typed value, decoded by inspecting the wire type code of a
/// `VARIANT` argument rather than a statically known `T`.
///
/// This is the application-facing dynamic value described by the codec
/// layer: it encodes and decodes exactly like [`Variant`] (the wire-level
/// `VARIANT` container used to cross the `Properties` boundary), but its API
/// is built around runtime type tests (`is`/`get`) instead of property
/// assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Any(Variant);

impl Any {
    /// Capture `value` as a dynamically-typed value.
    pub fn new<T>(value: &T) -> Self
    where
        T: ?Sized + Encode,
    {
        Self(Variant::new(value))
    }

    /// The signature of the contained value.
    pub fn signature(&self) -> &Signature {
        self.0.signature()
    }

    /// Test whether the contained value has type `T`.
    pub fn is<T>(&self) -> bool
    where
        T: Encode,
    {
        self.0.is::<T>()
    }

    /// Decode the contained value as `T`, failing if the signature does not
    /// match.
    pub fn get<'de, T>(&'de self) -> Result<T>
    where
        T: Decode<'de> + Encode,
    {
        self.0.get()
    }

    /// Test whether the contained value is an array whose elements all have
    /// type `T`, without decoding it.
    pub fn is_vec<T>(&self) -> bool
    where
        T: Encode,
    {
        let bytes = self.signature().as_bytes();

        if bytes.first() != Some(&b'a') {
            return false;
        }

        let mut element = OwnedSignature::new();
        T::signature(&mut element);
        bytes[1..] == *element.as_bytes()
    }

    /// Decode the contained value as `Vec<T>`, failing if it is not a
    /// homogeneous array of `T`.
    pub fn get_vec<'de, T>(&'de self) -> Result<Vec<T>>
    where
        T: Decode<'de> + Encode,
    {
        if !self.is_vec::<T>() {
            return Err(Error::new(ErrorKind::DecodeMismatch {
                expected: "homogeneous array",
                found: self.signature().to_string(),
            }));
        }

        let mut buf = self.0.body_reader();
        Vec::<T>::decode(&mut buf)
    }
}

impl Encode for Any {
    const ALIGNMENT: usize = <Variant as Encode>::ALIGNMENT;

    fn signature(sig: &mut OwnedSignature) -> bool {
        <Variant as Encode>::signature(sig)
    }

    fn encode(&self, buf: &mut BodyBuf) {
        self.0.encode(buf);
    }
}

impl<'de> Decode<'de> for Any {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        Ok(Self(Variant::decode(buf)?))
    }
}

/// A wide (UTF-32) string, encoded as `ARRAY<UINT32>` rather than D-Bus's
/// native UTF-8 `STRING`. Not interoperable with other D-Bus peers; only
/// useful between two ends of this crate that have agreed to use it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideString(pub String);

impl Encode for WideString {
    const ALIGNMENT: usize = 4;

    fn signature(sig: &mut OwnedSignature) -> bool {
        sig.push('a') && sig.push('u')
    }

    fn encode(&self, buf: &mut BodyBuf) {
        let chars: Vec<u32> = self.0.chars().map(|c| c as u32).collect();
        chars.encode(buf);
    }
}

impl<'de> Decode<'de> for WideString {
    fn decode(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let chars = Vec::<u32>::decode(buf)?;
        let mut s = String::with_capacity(chars.len());

        for value in chars {
            let c = char::from_u32(value)
                .ok_or_else(|| Error::new(ErrorKind::InvalidProtocol))?;
            s.push(c);
        }

        Ok(Self(s))
    }
}
