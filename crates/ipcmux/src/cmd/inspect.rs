use std::io::Read;
use std::path::Path;

use bytes::BytesMut;
use ipcmux_bindings::interface_control::{
    self, ControlMessage, RunInput, RunOrClosePipeInput, RunOutput,
};
use ipcmux_bindings::pipe_control::{self, PipeControlInput};
use ipcmux_transport::framed::decode_packet;
use ipcmux_wire::{validate_message_header, Message};
use serde::Serialize;
use tracing::debug;

use crate::cmd::InspectArgs;
use crate::exit::{
    io_error, transport_error, validation_error, CliError, CliResult, DATA_INVALID, SUCCESS,
};
use crate::output::{flag_names, interface_kind, print_json, print_raw, print_table, OutputFormat};

#[derive(Debug, Serialize)]
struct InspectOutput {
    schema_id: &'static str,
    size: usize,
    header_size: u32,
    header_version: u32,
    interface_id: u32,
    interface_kind: &'static str,
    name: u32,
    flags: Vec<&'static str>,
    request_id: Option<u64>,
    payload_size: usize,
    control: Option<String>,
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let input = read_input(&args.path)?;
    let data = if args.framed {
        unframe(input, args.max_size)?
    } else {
        input
    };
    let (output, message) = inspect(data)?;

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => print_table(&table_rows(&output)),
        OutputFormat::Pretty => {
            println!(
                "{} interface={} ({}) name={} flags=[{}] size={} payload={}",
                output.control.as_deref().unwrap_or("message"),
                output.interface_id,
                output.interface_kind,
                output.name,
                output.flags.join("|"),
                output.size,
                output.payload_size
            );
        }
        OutputFormat::Raw => print_raw(message.payload()),
    }
    Ok(SUCCESS)
}

fn read_input(path: &Path) -> CliResult<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .map_err(|err| io_error("read stdin", err))?;
        return Ok(data);
    }
    std::fs::read(path).map_err(|err| io_error(&format!("read {}", path.display()), err))
}

fn unframe(input: Vec<u8>, max_size: usize) -> CliResult<Vec<u8>> {
    let mut buf = BytesMut::from(&input[..]);
    let packet = decode_packet(&mut buf, max_size)
        .map_err(|err| transport_error("decode packet", err))?
        .ok_or_else(|| CliError::new(DATA_INVALID, "decode packet: truncated packet"))?;
    if !buf.is_empty() {
        debug!(trailing = buf.len(), "ignoring bytes after the first packet");
    }
    Ok(packet.to_vec())
}

fn inspect(data: Vec<u8>) -> CliResult<(InspectOutput, Message)> {
    let size = data.len();
    let header =
        validate_message_header(&data).map_err(|err| validation_error("message header", err))?;
    let mut message =
        Message::from_parts(data, Vec::new()).map_err(|err| validation_error("message", err))?;

    let control = if message.is_pipe_control() {
        let input = pipe_control::parse(&mut message)
            .map_err(|err| validation_error("pipe control", err))?;
        Some(describe_pipe_control(&input))
    } else if interface_control::is_control_message(&message) {
        let control = interface_control::parse(&mut message)
            .map_err(|err| validation_error("interface control", err))?;
        Some(describe_interface_control(control))
    } else {
        None
    };

    let output = InspectOutput {
        schema_id: "https://schemas.3leaps.dev/ipcmux/cli/v1/message-inspect.schema.json",
        size,
        header_size: header.num_bytes,
        header_version: header.version,
        interface_id: header.interface_id.raw(),
        interface_kind: interface_kind(header.interface_id),
        name: header.name,
        flags: flag_names(header.flags),
        request_id: header.request_id,
        payload_size: message.payload().len(),
        control,
    };
    Ok((output, message))
}

fn describe_pipe_control(input: &PipeControlInput) -> String {
    match input {
        PipeControlInput::PeerAssociatedEndpointClosed(event) => match &event.disconnect_reason {
            Some(reason) => format!(
                "peer_associated_endpoint_closed id={} reason={} \"{}\"",
                event.id, reason.custom_reason, reason.description
            ),
            None => format!("peer_associated_endpoint_closed id={}", event.id),
        },
        PipeControlInput::AssociatedEndpointClosedBeforeSent(event) => {
            format!("associated_endpoint_closed_before_sent id={}", event.id)
        }
    }
}

fn describe_interface_control(control: ControlMessage) -> String {
    match control {
        ControlMessage::Run(RunInput::QueryVersion) => "run query_version".to_string(),
        ControlMessage::Run(RunInput::FlushForTesting) => "run flush_for_testing".to_string(),
        ControlMessage::RunResponse(Some(RunOutput::QueryVersionResult(result))) => {
            format!("run_response version={}", result.version)
        }
        ControlMessage::RunResponse(None) => "run_response".to_string(),
        ControlMessage::RunOrClosePipe(RunOrClosePipeInput::RequireVersion(require)) => {
            format!("require_version {}", require.version)
        }
    }
}

fn table_rows(output: &InspectOutput) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("size", output.size.to_string()),
        (
            "header",
            format!("v{} ({} bytes)", output.header_version, output.header_size),
        ),
        (
            "interface",
            format!("{} ({})", output.interface_id, output.interface_kind),
        ),
        ("name", output.name.to_string()),
        ("flags", output.flags.join("|")),
        (
            "request_id",
            output
                .request_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
        ),
        ("payload", format!("{} bytes", output.payload_size)),
    ];
    if let Some(control) = &output.control {
        rows.push(("control", control.clone()));
    }
    rows
}
