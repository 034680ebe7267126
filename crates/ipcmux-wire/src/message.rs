//! Messages: a versioned header, a struct payload and out-of-band handles.
//!
//! Header layout (all little-endian):
//!
//! ```text
//! 0      4        8              12     16      20        24           32
//! +------+--------+--------------+------+-------+---------+------------+
//! | size | version| interface id | name | flags | padding | request id |
//! +------+--------+--------------+------+-------+---------+------------+
//!                                                          (version >= 1)
//! ```

use bitflags::bitflags;
use ipcmux_transport::{Handle, Packet};
use tracing::debug;

use crate::buffer::FixedBuffer;
use crate::codec::{Decoder, Encoder};
use crate::error::{Result, ValidationError};
use crate::interface_id::InterfaceId;
use crate::layout::{read_u32, read_u64};
use crate::structs::{
    decode_struct_at, encode_struct, struct_size, validate_struct_at, validate_struct_header,
    validate_struct_version, StructHeader, StructVersion, WireStruct,
};
use crate::validation::ValidationContext;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u32 {
        const EXPECTS_RESPONSE = 1 << 0;
        const IS_RESPONSE = 1 << 1;
        const IS_SYNC = 1 << 2;
    }
}

pub const HEADER_V0_SIZE: usize = 24;
pub const HEADER_V1_SIZE: usize = 32;

const HEADER_VERSIONS: &[StructVersion] = &[
    StructVersion::new(0, HEADER_V0_SIZE as u32),
    StructVersion::new(1, HEADER_V1_SIZE as u32),
];

const INTERFACE_ID_OFFSET: usize = 8;
const NAME_OFFSET: usize = 12;
const FLAGS_OFFSET: usize = 16;
const REQUEST_ID_OFFSET: usize = 24;

/// Decoded view of a message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_bytes: u32,
    pub version: u32,
    pub interface_id: InterfaceId,
    pub name: u32,
    pub flags: MessageFlags,
    pub request_id: Option<u64>,
}

/// Check the header at the start of `data` and return it.
pub fn validate_message_header(data: &[u8]) -> Result<MessageHeader> {
    if data.len() < HEADER_V0_SIZE {
        return Err(ValidationError::MessageTooShort);
    }
    let mut ctx = ValidationContext::new(data, 0);
    let header = validate_struct_header(&mut ctx, 0)?;
    validate_struct_version(&header, HEADER_VERSIONS)?;

    // Unknown bits are reserved and ignored.
    let flags = MessageFlags::from_bits_truncate(read_u32(data, FLAGS_OFFSET)?);
    let expects = flags.contains(MessageFlags::EXPECTS_RESPONSE);
    let is_response = flags.contains(MessageFlags::IS_RESPONSE);
    if expects && is_response {
        return Err(ValidationError::MessageHeaderInvalidFlags);
    }
    if header.version < 1 && (expects || is_response) {
        return Err(ValidationError::MessageHeaderMissingRequestId);
    }
    if flags.contains(MessageFlags::IS_SYNC) && !(expects || is_response) {
        return Err(ValidationError::MessageHeaderInvalidFlags);
    }

    let interface_id = InterfaceId::from_raw(read_u32(data, INTERFACE_ID_OFFSET)?);
    // The invalid id addresses the pipe itself, which never takes part in
    // request/response exchanges.
    if !interface_id.is_valid() && !flags.is_empty() {
        return Err(ValidationError::MessageHeaderInvalidFlags);
    }

    let request_id = if header.version >= 1 {
        Some(read_u64(data, REQUEST_ID_OFFSET)?)
    } else {
        None
    };
    Ok(MessageHeader {
        num_bytes: header.num_bytes,
        version: header.version,
        interface_id,
        name: read_u32(data, NAME_OFFSET)?,
        flags,
        request_id,
    })
}

/// One self-contained message. Exclusively owned; moved into the pipe or
/// into a responder, never shared.
#[derive(Debug)]
pub struct Message {
    data: Vec<u8>,
    handles: Vec<Option<Handle>>,
    header_size: usize,
}

impl Message {
    /// Serialize `payload` behind a fresh header.
    ///
    /// The header is version 1 whenever `flags` calls for a request id; the
    /// id itself starts at 0 and is stamped by whoever sends the message.
    pub fn new<S: WireStruct>(name: u32, flags: MessageFlags, payload: S) -> Self {
        let needs_request_id =
            flags.intersects(MessageFlags::EXPECTS_RESPONSE | MessageFlags::IS_RESPONSE);
        let (header_size, version) = if needs_request_id {
            (HEADER_V1_SIZE, 1)
        } else {
            (HEADER_V0_SIZE, 0)
        };

        let mut buf = FixedBuffer::new(header_size + struct_size(&payload));
        let at = buf.allocate(header_size);
        buf.put_u32(at, header_size as u32);
        buf.put_u32(at + 4, version);
        buf.put_u32(at + INTERFACE_ID_OFFSET, InterfaceId::MASTER.raw());
        buf.put_u32(at + NAME_OFFSET, name);
        buf.put_u32(at + FLAGS_OFFSET, flags.bits());

        let mut enc = Encoder::new(&mut buf);
        encode_struct(payload, &mut enc);
        let handles = enc.into_handles();

        Self {
            data: buf.into_vec(),
            handles: handles.into_iter().map(Some).collect(),
            header_size,
        }
    }

    /// Adopt raw bytes and handles, checking the header.
    pub fn from_parts(data: Vec<u8>, handles: Vec<Handle>) -> Result<Self> {
        let header = validate_message_header(&data).inspect_err(|err| {
            debug!(error = %err, len = data.len(), "rejected message header");
        })?;
        Ok(Self {
            data,
            handles: handles.into_iter().map(Some).collect(),
            header_size: header.num_bytes as usize,
        })
    }

    pub fn from_packet(packet: Packet) -> Result<Self> {
        Self::from_parts(packet.data.to_vec(), packet.handles)
    }

    /// Hand the message to the transport. Handles already taken by a
    /// decoder are not sent.
    pub fn into_packet(self) -> Packet {
        Packet::with_handles(self.data, self.handles.into_iter().flatten().collect())
    }

    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            num_bytes: self.header_size as u32,
            version: self.version(),
            interface_id: self.interface_id(),
            name: self.name(),
            flags: self.flags(),
            request_id: self.request_id(),
        }
    }

    fn field(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    fn put_field(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn version(&self) -> u32 {
        self.field(4)
    }

    pub fn name(&self) -> u32 {
        self.field(NAME_OFFSET)
    }

    pub fn flags(&self) -> MessageFlags {
        MessageFlags::from_bits_truncate(self.field(FLAGS_OFFSET))
    }

    pub fn has_flag(&self, flag: MessageFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn is_sync(&self) -> bool {
        self.has_flag(MessageFlags::IS_SYNC)
    }

    pub fn expects_response(&self) -> bool {
        self.has_flag(MessageFlags::EXPECTS_RESPONSE)
    }

    pub fn is_response(&self) -> bool {
        self.has_flag(MessageFlags::IS_RESPONSE)
    }

    pub fn interface_id(&self) -> InterfaceId {
        InterfaceId::from_raw(self.field(INTERFACE_ID_OFFSET))
    }

    pub fn set_interface_id(&mut self, id: InterfaceId) {
        self.put_field(INTERFACE_ID_OFFSET, id.raw());
    }

    /// Messages addressed to the pipe rather than to an endpoint.
    pub fn is_pipe_control(&self) -> bool {
        !self.interface_id().is_valid()
    }

    pub fn request_id(&self) -> Option<u64> {
        (self.version() >= 1).then(|| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.data[REQUEST_ID_OFFSET..REQUEST_ID_OFFSET + 8]);
            u64::from_le_bytes(bytes)
        })
    }

    /// # Panics
    ///
    /// Panics on a version 0 header, which has no room for a request id.
    pub fn set_request_id(&mut self, request_id: u64) {
        assert!(
            self.version() >= 1,
            "message {} has no request id field",
            self.name()
        );
        self.data[REQUEST_ID_OFFSET..REQUEST_ID_OFFSET + 8]
            .copy_from_slice(&request_id.to_le_bytes());
    }

    /// Whole serialized message, header included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.header_size..]
    }

    pub fn num_handles(&self) -> usize {
        self.handles.len()
    }

    /// Validate the payload as an `S`. Handles must be claimed in order and
    /// every pointer must land inside the payload.
    pub fn validate_payload<S: WireStruct>(&self) -> Result<()> {
        let mut ctx = ValidationContext::new(self.payload(), self.handles.len());
        validate_struct_at::<S>(&mut ctx, 0).map(|_| ())
    }

    /// Decode a validated payload, moving the handles it references out of
    /// the message.
    pub fn decode_payload<S: WireStruct>(&mut self) -> Result<S> {
        let payload = &self.data[self.header_size..];
        let mut dec = Decoder::new(payload, &mut self.handles);
        decode_struct_at(&mut dec, 0)
    }

    /// Validate and then decode.
    pub fn read_payload<S: WireStruct>(&mut self) -> Result<S> {
        self.validate_payload::<S>()?;
        self.decode_payload()
    }
}

/// Method-level check for a request that expects a response.
pub fn validate_request_expecting_response(message: &Message) -> Result<()> {
    if !message.expects_response() || message.is_response() {
        return Err(ValidationError::MessageHeaderInvalidFlags);
    }
    Ok(())
}

/// Method-level check for a one-way request.
pub fn validate_request_without_response(message: &Message) -> Result<()> {
    if message.expects_response() || message.is_response() {
        return Err(ValidationError::MessageHeaderInvalidFlags);
    }
    Ok(())
}

/// Method-level check for a response.
pub fn validate_response(message: &Message) -> Result<()> {
    if !message.is_response() || message.expects_response() {
        return Err(ValidationError::MessageHeaderInvalidFlags);
    }
    Ok(())
}

/// An empty payload, for methods without parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyPayload;

impl WireStruct for EmptyPayload {
    const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 8)];

    fn encode_fields(self, _enc: &mut Encoder<'_>, _base: usize) {}

    fn validate_fields(
        _ctx: &mut ValidationContext<'_>,
        _base: usize,
        _header: &StructHeader,
    ) -> Result<()> {
        Ok(())
    }

    fn decode_fields(
        _dec: &mut Decoder<'_>,
        _base: usize,
        _header: &StructHeader,
    ) -> Result<Self> {
        Ok(EmptyPayload)
    }
}
