//! Handles and associated interface ids inside payloads.
//!
//! A handle is encoded as a `u32` index into the message's handle list. An
//! associated interface is encoded as its `u32` interface id; the endpoint
//! itself travels implicitly on the same pipe.

use ipcmux_transport::Handle;

use crate::codec::{Decoder, Encoder, Nullable, ValidateParams, Wire};
use crate::error::{Result, ValidationError};
use crate::interface_id::InterfaceId;
use crate::layout::read_u32;
use crate::validation::{ValidationContext, INVALID_HANDLE_INDEX};

impl Wire for Handle {
    const INLINE_SIZE: usize = 4;

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        let index = enc.add_handle(self);
        enc.put_u32(slot, index);
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        let index = read_u32(ctx.data(), slot)?;
        if index == INVALID_HANDLE_INDEX && !params.nullable {
            return Err(ValidationError::UnexpectedInvalidHandle);
        }
        ctx.claim_handle(index)
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        match dec.read_u32(slot)? {
            INVALID_HANDLE_INDEX => Err(ValidationError::UnexpectedInvalidHandle),
            index => dec.take_handle(index),
        }
    }
}

impl Nullable for Handle {
    fn is_null(data: &[u8], slot: usize) -> Result<bool> {
        read_u32(data, slot).map(|index| index == INVALID_HANDLE_INDEX)
    }

    fn encode_null(enc: &mut Encoder<'_>, slot: usize) {
        enc.put_u32(slot, INVALID_HANDLE_INDEX);
    }
}

/// Shared checks for an interface id read from a payload.
fn validate_interface_id(raw: u32, params: &ValidateParams<'_>) -> Result<()> {
    let id = InterfaceId::from_raw(raw);
    if !id.is_valid() {
        return if params.nullable {
            Ok(())
        } else {
            Err(ValidationError::UnexpectedInvalidInterfaceId)
        };
    }
    // The primary interface is never carried as an associated one.
    if id.is_master() {
        return Err(ValidationError::IllegalInterfaceId);
    }
    Ok(())
}

/// The remote-bound end of an associated interface, sent so the receiver
/// can make calls on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociatedInterfacePtrInfo {
    pub id: InterfaceId,
    pub version: u32,
}

impl Wire for AssociatedInterfacePtrInfo {
    const INLINE_SIZE: usize = 8;

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        enc.put_u32(slot, self.id.raw());
        enc.put_u32(slot + 4, self.version);
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        validate_interface_id(read_u32(ctx.data(), slot)?, params)
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        let id = InterfaceId::from_raw(dec.read_u32(slot)?);
        if !id.is_valid() {
            return Err(ValidationError::UnexpectedInvalidInterfaceId);
        }
        Ok(Self {
            id,
            version: dec.read_u32(slot + 4)?,
        })
    }
}

impl Nullable for AssociatedInterfacePtrInfo {
    fn is_null(data: &[u8], slot: usize) -> Result<bool> {
        read_u32(data, slot).map(|raw| !InterfaceId::from_raw(raw).is_valid())
    }

    fn encode_null(enc: &mut Encoder<'_>, slot: usize) {
        enc.put_u32(slot, InterfaceId::INVALID.raw());
    }
}

/// The implementation-bound end of an associated interface, sent so the
/// receiver can serve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociatedInterfaceRequest {
    pub id: InterfaceId,
}

impl Wire for AssociatedInterfaceRequest {
    const INLINE_SIZE: usize = 4;

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        enc.put_u32(slot, self.id.raw());
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        validate_interface_id(read_u32(ctx.data(), slot)?, params)
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        let id = InterfaceId::from_raw(dec.read_u32(slot)?);
        if !id.is_valid() {
            return Err(ValidationError::UnexpectedInvalidInterfaceId);
        }
        Ok(Self { id })
    }
}

impl Nullable for AssociatedInterfaceRequest {
    fn is_null(data: &[u8], slot: usize) -> Result<bool> {
        read_u32(data, slot).map(|raw| !InterfaceId::from_raw(raw).is_valid())
    }

    fn encode_null(enc: &mut Encoder<'_>, slot: usize) {
        enc.put_u32(slot, InterfaceId::INVALID.raw());
    }
}
