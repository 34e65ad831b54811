use std::os::fd::RawFd;

use crate::buf::{Alloc, BufMut, OwnedBuf, ReadBuf};
use crate::codec::{ArgList, Decode, Encode};
use crate::error::Result;
use crate::frame::Frame;
use crate::protocol::Endianness;
use crate::signature::{OwnedSignature, Signature};

/// A buffer used to assemble a D-Bus message body, tracking its signature as
/// values are stored into it.
///
/// # Examples
///
/// ```
/// use simppl::BodyBuf;
///
/// let mut body = BodyBuf::new();
/// body.write(&10u16);
/// body.write(&10u32);
/// assert_eq!(body.signature().as_str(), "qu");
/// ```
pub struct BodyBuf {
    signature: OwnedSignature,
    buf: OwnedBuf,
    /// Raw descriptors referenced by `UNIX_FDS` arguments written so far.
    /// These are borrowed, not owned: the connection's writer must
    /// complete the `SCM_RIGHTS` send while the caller's [`Fd`](crate::fd::Fd)
    /// values are still alive.
    fds: Vec<RawFd>,
}

impl BodyBuf {
    /// Construct a new, empty body buffer using the host's native endianness.
    pub fn new() -> Self {
        Self::with_endianness(Endianness::NATIVE)
    }

    /// Construct a new, empty body buffer with an explicit endianness.
    pub fn with_endianness(endianness: Endianness) -> Self {
        Self {
            signature: OwnedSignature::new(),
            buf: OwnedBuf::with_endianness(endianness),
            fds: Vec::new(),
        }
    }

    /// Number of file descriptors referenced so far.
    pub(crate) fn fds_len(&self) -> u32 {
        self.fds.len() as u32
    }

    /// Record a descriptor referenced by a `UNIX_FDS` argument.
    pub(crate) fn push_fd(&mut self, fd: RawFd) {
        self.fds.push(fd);
    }

    /// The descriptors referenced by this body's `UNIX_FDS` arguments, in
    /// wire order.
    pub(crate) fn fds(&self) -> &[RawFd] {
        &self.fds
    }

    /// The accumulated signature of everything stored so far.
    pub fn signature(&self) -> &Signature {
        self.signature.as_signature()
    }

    /// The endianness this buffer encodes with.
    pub fn endianness(&self) -> Endianness {
        self.buf.endianness()
    }

    /// Change the endianness used for subsequent writes.
    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.buf.set_endianness(endianness);
    }

    /// The bytes written so far.
    pub fn get(&self) -> &[u8] {
        self.buf.get()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        BufMut::len(self)
    }

    /// Test whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the full contents of this buffer for reading, independent of
    /// the internal write cursor.
    pub fn read_buf(&self) -> ReadBuf<'_> {
        ReadBuf::with_fds(self.buf.get(), self.buf.endianness(), &self.fds)
    }

    /// Store a raw [`Frame`] value without touching the signature. Used by
    /// [`Encode`] implementations that have already accounted for their own
    /// signature.
    pub(crate) fn store<T>(&mut self, frame: T)
    where
        T: Frame,
    {
        BufMut::store(self, frame);
    }

    /// Write a value implementing [`Encode`], extending the signature with
    /// its full composite type before encoding its bytes.
    pub fn write<T>(&mut self, value: &T)
    where
        T: ?Sized + Encode,
    {
        T::signature(&mut self.signature);
        value.encode(self);
    }

    /// Write a method/signal argument list, extending the signature with
    /// each argument's flat type in sequence rather than wrapping them in
    /// a `STRUCT` container the way [`write`](Self::write) would.
    pub fn write_args<T>(&mut self, value: &T)
    where
        T: ArgList,
    {
        T::arg_signature(&mut self.signature);
        value.encode_args(self);
    }

    /// Begin writing an array whose elements do not carry their own
    /// signature contribution (used internally by [`Encode`] impls, which
    /// have their composite signature already appended by
    /// [`write`](Self::write)).
    pub(crate) fn begin_array(&mut self, element_alignment: usize) -> (Alloc<u32>, usize) {
        self.align_mut::<u32>();
        let len_at = self.alloc::<u32>();
        self.align_to(element_alignment);
        let start = BufMut::len(self);
        (len_at, start)
    }

    /// Close an array opened with [`begin_array`](Self::begin_array),
    /// backpatching its byte length.
    pub(crate) fn end_array(&mut self, len_at: Alloc<u32>, start: usize) {
        let len = (BufMut::len(self) - start) as u32;
        self.store_at(len_at, len);
    }

    /// Begin writing an array into the signature and the body, returning a
    /// writer for its elements. Intended for manually assembling a body
    /// outside of the [`Encode`] machinery.
    ///
    /// # Examples
    ///
    /// ```
    /// use simppl::BodyBuf;
    ///
    /// let mut body = BodyBuf::new();
    /// let mut array = body.write_array::<u32>();
    /// array.write(&1u32);
    /// array.write(&2u32);
    /// array.finish();
    /// assert_eq!(body.signature().as_str(), "au");
    /// ```
    pub fn write_array<T>(&mut self) -> ArrayWriter<'_, T>
    where
        T: Encode,
    {
        self.signature.push('a');
        T::signature(&mut self.signature);
        let (len_at, start) = self.begin_array(T::ALIGNMENT);
        ArrayWriter {
            buf: self,
            len_at,
            start,
            _marker: std::marker::PhantomData,
        }
    }

    /// Begin writing a struct into the signature and the body.
    pub fn write_struct(&mut self) -> StructWriter<'_> {
        self.signature.push('(');
        self.align_mut::<u64>();
        StructWriter { buf: self }
    }
}

impl Default for BodyBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl BufMut for BodyBuf {
    fn align_mut<T>(&mut self) {
        self.buf.align_mut::<T>();
    }

    fn len(&self) -> usize {
        BufMut::len(&self.buf)
    }

    fn store<T>(&mut self, frame: T)
    where
        T: Frame,
    {
        BufMut::store(&mut self.buf, frame);
    }

    fn alloc<T>(&mut self) -> Alloc<T>
    where
        T: Frame,
    {
        BufMut::alloc(&mut self.buf)
    }

    fn store_at<T>(&mut self, at: Alloc<T>, frame: T)
    where
        T: Frame,
    {
        BufMut::store_at(&mut self.buf, at, frame);
    }

    fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// Writer for the elements of a homogeneously-typed array, obtained from
/// [`BodyBuf::write_array`].
pub struct ArrayWriter<'a, T> {
    buf: &'a mut BodyBuf,
    len_at: Alloc<u32>,
    start: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T> ArrayWriter<'a, T>
where
    T: Encode,
{
    /// Write the next array element.
    pub fn write(&mut self, value: &T) -> &mut Self {
        value.encode(self.buf);
        self
    }

    /// Finish writing the array, backpatching its byte length.
    pub fn finish(self) {
        self.buf.end_array(self.len_at, self.start);
    }
}

/// Writer for the fields of a struct, obtained from [`BodyBuf::write_struct`].
pub struct StructWriter<'a> {
    buf: &'a mut BodyBuf,
}

impl<'a> StructWriter<'a> {
    /// Write the next field.
    pub fn write<T>(&mut self, value: &T) -> &mut Self
    where
        T: ?Sized + Encode,
    {
        T::signature(&mut self.buf.signature);
        value.encode(self.buf);
        self
    }

    /// Finish writing the struct.
    pub fn finish(self) {
        self.buf.signature.push(')');
    }
}

/// A cursor over the fields of a struct being decoded from a [`ReadBuf`].
pub struct StructReader<'a, 'de> {
    buf: &'a mut ReadBuf<'de>,
}

impl<'a, 'de> StructReader<'a, 'de> {
    /// Begin reading a struct, skipping to its 8-byte alignment boundary.
    pub fn new(buf: &'a mut ReadBuf<'de>) -> Result<Self> {
        buf.align::<u64>()?;
        Ok(Self { buf })
    }

    /// Read the next field.
    pub fn read<T>(&mut self) -> Result<T>
    where
        T: Decode<'de>,
    {
        T::decode(self.buf)
    }
}
