//! Messages the two routers exchange about endpoint lifetimes.
//!
//! They travel with the invalid interface id, so they never reach an
//! endpoint client.

use ipcmux_wire::structs::{
    decode_struct_pointer, encode_struct_pointer, struct_size, validate_field,
    validate_struct_pointer,
};
use ipcmux_wire::union::UNION_SIZE;
use ipcmux_wire::{
    impl_wire_for_struct, impl_wire_for_union, validate_request_without_response, Decoder,
    Encoder, InterfaceId, Message, MessageFlags, StructHeader, StructVersion, ValidateParams,
    ValidationContext, ValidationError, Wire, WireStruct, WireUnion,
};

pub const RUN_OR_CLOSE_PIPE_MESSAGE_ID: u32 = 0xFFFF_FFFE;

/// Why an endpoint was closed, as reported to the peer's error handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub custom_reason: u32,
    pub description: String,
}

impl DisconnectReason {
    pub fn new(custom_reason: u32, description: impl Into<String>) -> Self {
        Self {
            custom_reason,
            description: description.into(),
        }
    }
}

impl WireStruct for DisconnectReason {
    const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 24)];

    fn fields_out_of_line_size(&self) -> usize {
        self.description.out_of_line_size()
    }

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.custom_reason.encode(enc, base + 8);
        self.description.encode(enc, base + 16);
    }

    fn validate_fields(
        ctx: &mut ValidationContext<'_>,
        base: usize,
        header: &StructHeader,
    ) -> ipcmux_wire::Result<()> {
        validate_field::<String>(ctx, header, base, 16, &ValidateParams::DEFAULT)
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Self {
            custom_reason: u32::decode(dec, base + 8)?,
            description: String::decode(dec, base + 16)?,
        })
    }
}

/// The sender closed its end of `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAssociatedEndpointClosedEvent {
    pub id: InterfaceId,
    pub disconnect_reason: Option<DisconnectReason>,
}

impl WireStruct for PeerAssociatedEndpointClosedEvent {
    const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 24)];

    fn fields_out_of_line_size(&self) -> usize {
        self.disconnect_reason.out_of_line_size()
    }

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.id.raw().encode(enc, base + 8);
        self.disconnect_reason.encode(enc, base + 16);
    }

    fn validate_fields(
        ctx: &mut ValidationContext<'_>,
        base: usize,
        header: &StructHeader,
    ) -> ipcmux_wire::Result<()> {
        validate_field::<Option<DisconnectReason>>(
            ctx,
            header,
            base,
            16,
            &ValidateParams::DEFAULT,
        )
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Self {
            id: InterfaceId::from_raw(u32::decode(dec, base + 8)?),
            disconnect_reason: Option::<DisconnectReason>::decode(dec, base + 16)?,
        })
    }
}

/// The sender dropped the remote handle of `id` without ever sending it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociatedEndpointClosedBeforeSentEvent {
    pub id: InterfaceId,
}

impl WireStruct for AssociatedEndpointClosedBeforeSentEvent {
    const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 16)];

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.id.raw().encode(enc, base + 8);
    }

    fn validate_fields(
        _ctx: &mut ValidationContext<'_>,
        _base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<()> {
        Ok(())
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Self {
            id: InterfaceId::from_raw(u32::decode(dec, base + 8)?),
        })
    }
}

impl_wire_for_struct!(
    DisconnectReason,
    PeerAssociatedEndpointClosedEvent,
    AssociatedEndpointClosedBeforeSentEvent
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeControlInput {
    PeerAssociatedEndpointClosed(PeerAssociatedEndpointClosedEvent),
    AssociatedEndpointClosedBeforeSent(AssociatedEndpointClosedBeforeSentEvent),
}

impl WireUnion for PipeControlInput {
    fn tag(&self) -> u32 {
        match self {
            PipeControlInput::PeerAssociatedEndpointClosed(_) => 0,
            PipeControlInput::AssociatedEndpointClosedBeforeSent(_) => 1,
        }
    }

    fn data_out_of_line_size(&self) -> usize {
        match self {
            PipeControlInput::PeerAssociatedEndpointClosed(event) => struct_size(event),
            PipeControlInput::AssociatedEndpointClosedBeforeSent(event) => struct_size(event),
        }
    }

    fn encode_data(self, enc: &mut Encoder<'_>, data_slot: usize) {
        match self {
            PipeControlInput::PeerAssociatedEndpointClosed(event) => {
                encode_struct_pointer(event, enc, data_slot)
            }
            PipeControlInput::AssociatedEndpointClosedBeforeSent(event) => {
                encode_struct_pointer(event, enc, data_slot)
            }
        }
    }

    fn validate_data(
        ctx: &mut ValidationContext<'_>,
        tag: u32,
        data_slot: usize,
    ) -> ipcmux_wire::Result<()> {
        match tag {
            0 => validate_struct_pointer::<PeerAssociatedEndpointClosedEvent>(
                ctx,
                data_slot,
                &ValidateParams::DEFAULT,
            ),
            1 => validate_struct_pointer::<AssociatedEndpointClosedBeforeSentEvent>(
                ctx,
                data_slot,
                &ValidateParams::DEFAULT,
            ),
            _ => Err(ValidationError::UnknownUnionTag),
        }
    }

    fn decode_data(
        dec: &mut Decoder<'_>,
        tag: u32,
        data_slot: usize,
    ) -> ipcmux_wire::Result<Self> {
        match tag {
            0 => decode_struct_pointer(dec, data_slot).map(Self::PeerAssociatedEndpointClosed),
            1 => {
                decode_struct_pointer(dec, data_slot).map(Self::AssociatedEndpointClosedBeforeSent)
            }
            _ => Err(ValidationError::UnknownUnionTag),
        }
    }
}

impl_wire_for_union!(PipeControlInput);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOrClosePipeMessageParams {
    pub input: PipeControlInput,
}

impl WireStruct for RunOrClosePipeMessageParams {
    const VERSIONS: &'static [StructVersion] =
        &[StructVersion::new(0, (8 + UNION_SIZE) as u32)];

    fn fields_out_of_line_size(&self) -> usize {
        self.input.out_of_line_size()
    }

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.input.encode(enc, base + 8);
    }

    fn validate_fields(
        ctx: &mut ValidationContext<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<()> {
        PipeControlInput::validate(ctx, base + 8, &ValidateParams::DEFAULT)
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Self {
            input: PipeControlInput::decode(dec, base + 8)?,
        })
    }
}

fn pipe_control_message(input: PipeControlInput) -> Message {
    let mut message = Message::new(
        RUN_OR_CLOSE_PIPE_MESSAGE_ID,
        MessageFlags::empty(),
        RunOrClosePipeMessageParams { input },
    );
    message.set_interface_id(InterfaceId::INVALID);
    message
}

pub fn peer_associated_endpoint_closed(
    id: InterfaceId,
    disconnect_reason: Option<DisconnectReason>,
) -> Message {
    pipe_control_message(PipeControlInput::PeerAssociatedEndpointClosed(
        PeerAssociatedEndpointClosedEvent {
            id,
            disconnect_reason,
        },
    ))
}

pub fn associated_endpoint_closed_before_sent(id: InterfaceId) -> Message {
    pipe_control_message(PipeControlInput::AssociatedEndpointClosedBeforeSent(
        AssociatedEndpointClosedBeforeSentEvent { id },
    ))
}

/// Validate and decode a message addressed to the pipe.
pub fn parse(message: &mut Message) -> ipcmux_wire::Result<PipeControlInput> {
    if message.name() != RUN_OR_CLOSE_PIPE_MESSAGE_ID {
        return Err(ValidationError::MessageHeaderUnknownMethod);
    }
    validate_request_without_response(message)?;
    message
        .read_payload::<RunOrClosePipeMessageParams>()
        .map(|params| params.input)
}

#[cfg(test)]
mod tests {
    use ipcmux_wire::validate_message_header;
    use proptest::prelude::*;

    use super::*;

    fn reparse(message: Message) -> ipcmux_wire::Result<PipeControlInput> {
        let mut message = Message::from_packet(message.into_packet())?;
        parse(&mut message)
    }

    #[test]
    fn closed_with_reason() {
        let message = peer_associated_endpoint_closed(
            InterfaceId::from_raw(4),
            Some(DisconnectReason::new(7, "version too old")),
        );
        assert!(message.is_pipe_control());
        validate_message_header(message.data()).unwrap();

        let input = reparse(message).unwrap();
        assert_eq!(
            input,
            PipeControlInput::PeerAssociatedEndpointClosed(PeerAssociatedEndpointClosedEvent {
                id: InterfaceId::from_raw(4),
                disconnect_reason: Some(DisconnectReason::new(7, "version too old")),
            })
        );
    }

    #[test]
    fn closed_before_sent() {
        let input = reparse(associated_endpoint_closed_before_sent(InterfaceId::from_raw(
            0x8000_0002,
        )))
        .unwrap();
        assert_eq!(
            input,
            PipeControlInput::AssociatedEndpointClosedBeforeSent(
                AssociatedEndpointClosedBeforeSentEvent {
                    id: InterfaceId::from_raw(0x8000_0002)
                }
            )
        );
    }

    #[test]
    fn unknown_name_is_rejected() {
        let mut message = Message::new(12, MessageFlags::empty(), ipcmux_wire::EmptyPayload);
        message.set_interface_id(InterfaceId::INVALID);
        assert_eq!(
            parse(&mut message),
            Err(ValidationError::MessageHeaderUnknownMethod)
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let message = associated_endpoint_closed_before_sent(InterfaceId::from_raw(3));
        let mut data = message.into_packet().data.to_vec();
        data.truncate(data.len() - 8);
        let mut message = Message::from_parts(data, Vec::new()).unwrap();
        assert_eq!(parse(&mut message), Err(ValidationError::IllegalMemoryRange));
    }

    proptest! {
        #[test]
        fn arbitrary_pipe_messages_never_panic(
            payload in prop::collection::vec(any::<u8>(), 0..96),
            closed_before_sent in any::<bool>(),
        ) {
            let mut message = Message::new(
                RUN_OR_CLOSE_PIPE_MESSAGE_ID,
                MessageFlags::empty(),
                ipcmux_wire::EmptyPayload,
            );
            message.set_interface_id(InterfaceId::INVALID);
            let mut data = message.into_packet().data.to_vec();
            data.truncate(ipcmux_wire::HEADER_V0_SIZE);
            data.extend_from_slice(&payload);
            let Ok(mut message) = Message::from_parts(data, Vec::new()) else {
                return Ok(());
            };
            if closed_before_sent {
                let _ = message.validate_payload::<AssociatedEndpointClosedBeforeSentEvent>();
            } else {
                let _ = message.validate_payload::<PeerAssociatedEndpointClosedEvent>();
            }
            let _ = parse(&mut message);
        }
    }
}
