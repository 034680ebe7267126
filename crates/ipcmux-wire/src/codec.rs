//! The `Wire` trait and the encoder/decoder it runs against.
//!
//! Every wire type goes through four passes: size, encode, validate and
//! decode. Encoding and decoding address the payload by byte index, so a
//! value is written into a slot that its parent reserved. Validation always
//! runs over the untrusted bytes first; decoding assumes a validated payload
//! but still never reads out of bounds.

use ipcmux_transport::Handle;

use crate::buffer::FixedBuffer;
use crate::error::{Result, ValidationError};
use crate::layout::{self, read_bytes, read_u8};
use crate::validation::ValidationContext;

/// How one slot is validated.
///
/// Containers hand `element` down to their elements, which is how an array
/// of nullable handles differs from an array of required ones.
#[derive(Debug, Clone, Copy)]
pub struct ValidateParams<'p> {
    /// A null pointer, invalid handle or invalid interface id is accepted.
    pub nullable: bool,
    /// Required element count of an array, `0` for any.
    pub expected_num_elements: u32,
    /// Params for the elements of a container.
    pub element: Option<&'p ValidateParams<'p>>,
}

impl ValidateParams<'static> {
    pub const DEFAULT: ValidateParams<'static> = ValidateParams {
        nullable: false,
        expected_num_elements: 0,
        element: None,
    };

    pub const NULLABLE: ValidateParams<'static> = ValidateParams {
        nullable: true,
        expected_num_elements: 0,
        element: None,
    };
}

impl<'p> ValidateParams<'p> {
    pub const fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub const fn with_expected_num_elements(mut self, n: u32) -> Self {
        self.expected_num_elements = n;
        self
    }

    pub const fn with_element(mut self, element: &'p ValidateParams<'p>) -> Self {
        self.element = Some(element);
        self
    }

    /// Params for container elements, defaulting to non-nullable.
    pub fn element(&self) -> &ValidateParams<'p> {
        self.element.unwrap_or(&ValidateParams::DEFAULT)
    }
}

impl Default for ValidateParams<'static> {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Write side of the codec: the arena plus the handles collected so far.
#[derive(Debug)]
pub struct Encoder<'b> {
    buf: &'b mut FixedBuffer,
    handles: Vec<Handle>,
}

impl<'b> Encoder<'b> {
    pub fn new(buf: &'b mut FixedBuffer) -> Self {
        Self {
            buf,
            handles: Vec::new(),
        }
    }

    pub fn buffer(&mut self) -> &mut FixedBuffer {
        self.buf
    }

    /// Reserve an out-of-line region and return its offset.
    pub fn allocate(&mut self, num_bytes: usize) -> usize {
        self.buf.allocate(num_bytes)
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) {
        self.buf.put_u8(offset, value);
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.buf.put_u32(offset, value);
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) {
        self.buf.put_u64(offset, value);
    }

    pub fn put_pointer(&mut self, slot: usize, target: usize) {
        layout::encode_pointer(self.buf, slot, target);
    }

    /// Move `handle` into the out-of-band list and return its index.
    pub fn add_handle(&mut self, handle: Handle) -> u32 {
        let index = u32::try_from(self.handles.len()).expect("handle count exceeds u32");
        self.handles.push(handle);
        index
    }

    pub fn into_handles(self) -> Vec<Handle> {
        self.handles
    }
}

/// Read side of the codec over a validated payload.
///
/// Handles are taken out of the message as they are decoded, so each one
/// ends up owned by exactly one decoded value.
#[derive(Debug)]
pub struct Decoder<'d> {
    data: &'d [u8],
    handles: &'d mut [Option<Handle>],
}

impl<'d> Decoder<'d> {
    pub fn new(data: &'d [u8], handles: &'d mut [Option<Handle>]) -> Self {
        Self { data, handles }
    }

    pub fn data(&self) -> &'d [u8] {
        self.data
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        read_u8(self.data, offset)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        layout::read_u32(self.data, offset)
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        layout::read_u64(self.data, offset)
    }

    pub fn read_pointer(&self, slot: usize) -> Result<Option<usize>> {
        layout::decode_pointer(self.data, slot)
    }

    /// Take handle `index` out of the message.
    pub fn take_handle(&mut self, index: u32) -> Result<Handle> {
        self.handles
            .get_mut(index as usize)
            .and_then(Option::take)
            .ok_or(ValidationError::IllegalHandle)
    }
}

/// A type with a fixed inline representation and optional out-of-line data.
pub trait Wire: Sized {
    /// Bytes the value occupies in its parent's slot.
    const INLINE_SIZE: usize;

    /// Out-of-line bytes the value needs, including padding.
    fn out_of_line_size(&self) -> usize {
        0
    }

    /// Write the value into `slot`, allocating out-of-line data as needed.
    fn encode(self, enc: &mut Encoder<'_>, slot: usize);

    /// Check the untrusted value stored at `slot`.
    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()>;

    /// Read a value back out of a validated payload.
    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self>;

    /// Bytes an array body of `len` elements occupies, before padding.
    fn array_body_size(len: usize) -> usize {
        len.saturating_mul(Self::INLINE_SIZE)
    }

    fn encode_array(items: Vec<Self>, enc: &mut Encoder<'_>, body: usize) {
        for (i, item) in items.into_iter().enumerate() {
            item.encode(enc, body + i * Self::INLINE_SIZE);
        }
    }

    fn validate_array(
        ctx: &mut ValidationContext<'_>,
        body: usize,
        len: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        for i in 0..len {
            Self::validate(ctx, body + i * Self::INLINE_SIZE, params)?;
        }
        Ok(())
    }

    fn decode_array(dec: &mut Decoder<'_>, body: usize, len: usize) -> Result<Vec<Self>> {
        let mut items = Vec::with_capacity(len.min(dec.data().len()));
        for i in 0..len {
            items.push(Self::decode(dec, body + i * Self::INLINE_SIZE)?);
        }
        Ok(items)
    }
}

/// A wire type with an encoded null value, which makes `Option<T>` a wire
/// type too.
pub trait Nullable: Wire {
    fn is_null(data: &[u8], slot: usize) -> Result<bool>;

    /// Write the null value. Slots start zeroed, so this is often a no-op.
    fn encode_null(enc: &mut Encoder<'_>, slot: usize);
}

macro_rules! impl_wire_for_number {
    ($($ty:ty),* $(,)?) => {$(
        impl Wire for $ty {
            const INLINE_SIZE: usize = std::mem::size_of::<$ty>();

            fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
                enc.buffer()
                    .slice_mut(slot, Self::INLINE_SIZE)
                    .copy_from_slice(&self.to_le_bytes());
            }

            fn validate(
                _ctx: &mut ValidationContext<'_>,
                _slot: usize,
                _params: &ValidateParams<'_>,
            ) -> Result<()> {
                Ok(())
            }

            fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
                read_bytes(dec.data(), slot).map(<$ty>::from_le_bytes)
            }
        }
    )*};
}

impl_wire_for_number!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// Booleans take a byte inline and a bit inside arrays.
impl Wire for bool {
    const INLINE_SIZE: usize = 1;

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        enc.put_u8(slot, u8::from(self));
    }

    fn validate(
        _ctx: &mut ValidationContext<'_>,
        _slot: usize,
        _params: &ValidateParams<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        Ok(dec.read_u8(slot)? & 1 != 0)
    }

    fn array_body_size(len: usize) -> usize {
        len.div_ceil(8)
    }

    fn encode_array(items: Vec<Self>, enc: &mut Encoder<'_>, body: usize) {
        for (i, item) in items.into_iter().enumerate() {
            if item {
                enc.buffer().slice_mut(body + i / 8, 1)[0] |= 1 << (i % 8);
            }
        }
    }

    fn validate_array(
        _ctx: &mut ValidationContext<'_>,
        _body: usize,
        _len: usize,
        _params: &ValidateParams<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn decode_array(dec: &mut Decoder<'_>, body: usize, len: usize) -> Result<Vec<Self>> {
        let mut items = Vec::with_capacity(len.min(dec.data().len() * 8));
        for i in 0..len {
            let byte = dec.read_u8(body + i / 8)?;
            items.push(byte & (1 << (i % 8)) != 0);
        }
        Ok(items)
    }
}

impl<T: Nullable> Wire for Option<T> {
    const INLINE_SIZE: usize = T::INLINE_SIZE;

    fn out_of_line_size(&self) -> usize {
        self.as_ref().map_or(0, Wire::out_of_line_size)
    }

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        match self {
            Some(value) => value.encode(enc, slot),
            None => T::encode_null(enc, slot),
        }
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        T::validate(ctx, slot, &params.with_nullable(true))
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        if T::is_null(dec.data(), slot)? {
            return Ok(None);
        }
        T::decode(dec, slot).map(Some)
    }
}

impl<T: Wire> Wire for Box<T> {
    const INLINE_SIZE: usize = T::INLINE_SIZE;

    fn out_of_line_size(&self) -> usize {
        (**self).out_of_line_size()
    }

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        (*self).encode(enc, slot);
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        T::validate(ctx, slot, params)
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        T::decode(dec, slot).map(Box::new)
    }
}

impl<T: Nullable> Nullable for Box<T> {
    fn is_null(data: &[u8], slot: usize) -> Result<bool> {
        T::is_null(data, slot)
    }

    fn encode_null(enc: &mut Encoder<'_>, slot: usize) {
        T::encode_null(enc, slot);
    }
}

/// Null check shared by every pointer-encoded type.
pub fn is_null_pointer(data: &[u8], slot: usize) -> Result<bool> {
    layout::read_u64(data, slot).map(|offset| offset == 0)
}

/// Resolve a pointer slot during validation, applying nullability.
///
/// Returns `Ok(None)` for an accepted null.
pub fn validate_pointer(
    ctx: &ValidationContext<'_>,
    slot: usize,
    params: &ValidateParams<'_>,
) -> Result<Option<usize>> {
    match layout::decode_pointer(ctx.data(), slot)? {
        Some(target) => Ok(Some(target)),
        None if params.nullable => Ok(None),
        None => Err(ValidationError::UnexpectedNullPointer),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Encode `value` as the only object of a fresh buffer: an 8-byte slot
    /// followed by its out-of-line data.
    pub fn encode_slot<T: Wire>(value: T) -> (Vec<u8>, Vec<Handle>) {
        let size = crate::buffer::align(T::INLINE_SIZE) + value.out_of_line_size();
        let mut buf = FixedBuffer::new(size);
        let slot = buf.allocate(T::INLINE_SIZE);
        let mut enc = Encoder::new(&mut buf);
        value.encode(&mut enc, slot);
        let handles = enc.into_handles();
        assert_eq!(buf.cursor(), buf.capacity(), "size pass disagrees with encode");
        (buf.into_vec(), handles)
    }

    /// Validate the slot at offset 0 the way a message payload would be.
    pub fn validate_slot<T: Wire>(
        data: &[u8],
        num_handles: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        let mut ctx = ValidationContext::new(data, num_handles);
        ctx.claim_memory(0, crate::buffer::align(T::INLINE_SIZE))?;
        T::validate(&mut ctx, 0, params)
    }

    pub fn decode_slot<T: Wire>(data: &[u8], handles: Vec<Handle>) -> Result<T> {
        let mut handles: Vec<Option<Handle>> = handles.into_iter().map(Some).collect();
        let mut dec = Decoder::new(data, &mut handles);
        T::decode(&mut dec, 0)
    }
}
