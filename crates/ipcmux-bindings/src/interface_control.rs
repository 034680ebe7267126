//! Built-in messages every endpoint understands, whatever its interface.
//!
//! They share the endpoint's interface id and are told apart from user
//! methods by their reserved names.

use ipcmux_wire::structs::{
    decode_struct_pointer, encode_struct_pointer, struct_size, validate_struct_pointer,
};
use ipcmux_wire::union::UNION_SIZE;
use ipcmux_wire::{
    impl_wire_for_struct, impl_wire_for_union, Decoder, EmptyPayload, Encoder, Message,
    MessageFlags, StructHeader, StructVersion, ValidateParams, ValidationContext,
    ValidationError, Wire, WireStruct, WireUnion,
};

/// Request/response control exchange.
pub const RUN_MESSAGE_ID: u32 = 0xFFFF_FFFF;
/// One-way control message.
pub const RUN_OR_CLOSE_PIPE_MESSAGE_ID: u32 = 0xFFFF_FFFE;

pub fn is_control_message(message: &Message) -> bool {
    matches!(message.name(), RUN_MESSAGE_ID | RUN_OR_CLOSE_PIPE_MESSAGE_ID)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryVersionResult {
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequireVersion {
    pub version: u32,
}

macro_rules! version_struct {
    ($($ty:ident),+) => {$(
        impl WireStruct for $ty {
            const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 16)];

            fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
                self.version.encode(enc, base + 8);
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
                    version: u32::decode(dec, base + 8)?,
                })
            }
        }
    )+};
}

version_struct!(QueryVersionResult, RequireVersion);
impl_wire_for_struct!(QueryVersionResult, RequireVersion);

/// Input of a [`RUN_MESSAGE_ID`] request. Both variants carry an empty
/// struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunInput {
    QueryVersion,
    FlushForTesting,
}

impl WireUnion for RunInput {
    fn tag(&self) -> u32 {
        match self {
            RunInput::QueryVersion => 0,
            RunInput::FlushForTesting => 1,
        }
    }

    fn data_out_of_line_size(&self) -> usize {
        struct_size(&EmptyPayload)
    }

    fn encode_data(self, enc: &mut Encoder<'_>, data_slot: usize) {
        encode_struct_pointer(EmptyPayload, enc, data_slot);
    }

    fn validate_data(
        ctx: &mut ValidationContext<'_>,
        tag: u32,
        data_slot: usize,
    ) -> ipcmux_wire::Result<()> {
        match tag {
            0 | 1 => {
                validate_struct_pointer::<EmptyPayload>(ctx, data_slot, &ValidateParams::DEFAULT)
            }
            _ => Err(ValidationError::UnknownUnionTag),
        }
    }

    fn decode_data(
        dec: &mut Decoder<'_>,
        tag: u32,
        data_slot: usize,
    ) -> ipcmux_wire::Result<Self> {
        decode_struct_pointer::<EmptyPayload>(dec, data_slot)?;
        match tag {
            0 => Ok(RunInput::QueryVersion),
            1 => Ok(RunInput::FlushForTesting),
            _ => Err(ValidationError::UnknownUnionTag),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutput {
    QueryVersionResult(QueryVersionResult),
}

impl WireUnion for RunOutput {
    fn tag(&self) -> u32 {
        0
    }

    fn data_out_of_line_size(&self) -> usize {
        match self {
            RunOutput::QueryVersionResult(result) => struct_size(result),
        }
    }

    fn encode_data(self, enc: &mut Encoder<'_>, data_slot: usize) {
        match self {
            RunOutput::QueryVersionResult(result) => encode_struct_pointer(result, enc, data_slot),
        }
    }

    fn validate_data(
        ctx: &mut ValidationContext<'_>,
        tag: u32,
        data_slot: usize,
    ) -> ipcmux_wire::Result<()> {
        match tag {
            0 => validate_struct_pointer::<QueryVersionResult>(
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
            0 => decode_struct_pointer(dec, data_slot).map(RunOutput::QueryVersionResult),
            _ => Err(ValidationError::UnknownUnionTag),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOrClosePipeInput {
    RequireVersion(RequireVersion),
}

impl WireUnion for RunOrClosePipeInput {
    fn tag(&self) -> u32 {
        0
    }

    fn data_out_of_line_size(&self) -> usize {
        match self {
            RunOrClosePipeInput::RequireVersion(require) => struct_size(require),
        }
    }

    fn encode_data(self, enc: &mut Encoder<'_>, data_slot: usize) {
        match self {
            RunOrClosePipeInput::RequireVersion(require) => {
                encode_struct_pointer(require, enc, data_slot)
            }
        }
    }

    fn validate_data(
        ctx: &mut ValidationContext<'_>,
        tag: u32,
        data_slot: usize,
    ) -> ipcmux_wire::Result<()> {
        match tag {
            0 => {
                validate_struct_pointer::<RequireVersion>(ctx, data_slot, &ValidateParams::DEFAULT)
            }
            _ => Err(ValidationError::UnknownUnionTag),
        }
    }

    fn decode_data(
        dec: &mut Decoder<'_>,
        tag: u32,
        data_slot: usize,
    ) -> ipcmux_wire::Result<Self> {
        match tag {
            0 => decode_struct_pointer(dec, data_slot).map(RunOrClosePipeInput::RequireVersion),
            _ => Err(ValidationError::UnknownUnionTag),
        }
    }
}

impl_wire_for_union!(RunInput, RunOutput, RunOrClosePipeInput);

const PARAMS_VERSIONS: &[StructVersion] = &[StructVersion::new(0, (8 + UNION_SIZE) as u32)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMessageParams {
    pub input: RunInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResponseMessageParams {
    /// Absent when the receiver did not recognize the input.
    pub output: Option<RunOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOrClosePipeMessageParams {
    pub input: RunOrClosePipeInput,
}

impl WireStruct for RunMessageParams {
    const VERSIONS: &'static [StructVersion] = PARAMS_VERSIONS;

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
        RunInput::validate(ctx, base + 8, &ValidateParams::DEFAULT)
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Self {
            input: RunInput::decode(dec, base + 8)?,
        })
    }
}

impl WireStruct for RunResponseMessageParams {
    const VERSIONS: &'static [StructVersion] = PARAMS_VERSIONS;

    fn fields_out_of_line_size(&self) -> usize {
        self.output.out_of_line_size()
    }

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.output.encode(enc, base + 8);
    }

    fn validate_fields(
        ctx: &mut ValidationContext<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<()> {
        Option::<RunOutput>::validate(ctx, base + 8, &ValidateParams::NULLABLE)
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Self {
            output: Option::<RunOutput>::decode(dec, base + 8)?,
        })
    }
}

impl WireStruct for RunOrClosePipeMessageParams {
    const VERSIONS: &'static [StructVersion] = PARAMS_VERSIONS;

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
        RunOrClosePipeInput::validate(ctx, base + 8, &ValidateParams::DEFAULT)
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Self {
            input: RunOrClosePipeInput::decode(dec, base + 8)?,
        })
    }
}

/// A request for the peer's interface version.
pub fn query_version_request() -> Message {
    run_request(RunInput::QueryVersion, MessageFlags::empty())
}

/// A sync round trip that completes once everything sent before it has
/// been dispatched by the peer.
pub fn flush_for_testing_request() -> Message {
    run_request(RunInput::FlushForTesting, MessageFlags::IS_SYNC)
}

fn run_request(input: RunInput, extra: MessageFlags) -> Message {
    Message::new(
        RUN_MESSAGE_ID,
        MessageFlags::EXPECTS_RESPONSE | extra,
        RunMessageParams { input },
    )
}

/// The answer to `request`. `output` is `None` for inputs this side does
/// not know.
pub fn run_response(request: &Message, output: Option<RunOutput>) -> Message {
    let mut flags = MessageFlags::IS_RESPONSE;
    if request.is_sync() {
        flags |= MessageFlags::IS_SYNC;
    }
    let mut response = Message::new(RUN_MESSAGE_ID, flags, RunResponseMessageParams { output });
    response.set_interface_id(request.interface_id());
    if let Some(request_id) = request.request_id() {
        response.set_request_id(request_id);
    }
    response
}

/// Ask the peer to close the endpoint unless it implements at least
/// `version`.
pub fn require_version_message(version: u32) -> Message {
    Message::new(
        RUN_OR_CLOSE_PIPE_MESSAGE_ID,
        MessageFlags::empty(),
        RunOrClosePipeMessageParams {
            input: RunOrClosePipeInput::RequireVersion(RequireVersion { version }),
        },
    )
}

/// A decoded control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Run(RunInput),
    RunResponse(Option<RunOutput>),
    RunOrClosePipe(RunOrClosePipeInput),
}

/// Validate and decode a message for which [`is_control_message`] holds.
pub fn parse(message: &mut Message) -> ipcmux_wire::Result<ControlMessage> {
    match message.name() {
        RUN_MESSAGE_ID if message.is_response() => {
            ipcmux_wire::validate_response(message)?;
            let params = message.read_payload::<RunResponseMessageParams>()?;
            Ok(ControlMessage::RunResponse(params.output))
        }
        RUN_MESSAGE_ID => {
            ipcmux_wire::validate_request_expecting_response(message)?;
            let params = message.read_payload::<RunMessageParams>()?;
            Ok(ControlMessage::Run(params.input))
        }
        RUN_OR_CLOSE_PIPE_MESSAGE_ID => {
            ipcmux_wire::validate_request_without_response(message)?;
            let params = message.read_payload::<RunOrClosePipeMessageParams>()?;
            Ok(ControlMessage::RunOrClosePipe(params.input))
        }
        _ => Err(ValidationError::MessageHeaderUnknownMethod),
    }
}
