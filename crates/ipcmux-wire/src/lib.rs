//! Self-describing binary wire format for ipcmux.
//!
//! Values are laid out in one 8-byte-aligned arena per message. Out-of-line
//! objects are reached through relative `u64` pointers, and handles travel
//! out of band, referenced by index. Every inbound payload is validated
//! against a [`ValidationContext`] before anything is decoded:
//! - pointers must be aligned and land in the unclaimed tail of the payload
//! - handle indices must be strictly increasing
//! - nesting is capped at [`MAX_RECURSION_DEPTH`]
//!
//! [`Message`] wraps a payload with the routing header used by the
//! multiplexing layer.

pub mod array;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod handle;
pub mod interface_id;
pub mod layout;
pub mod map;
pub mod message;
pub mod structs;
pub mod union;
pub mod validation;

#[cfg(test)]
mod proptests;

pub use buffer::{align, FixedBuffer, ALIGNMENT};
pub use codec::{Decoder, Encoder, Nullable, ValidateParams, Wire};
pub use error::{Result, ValidationError};
pub use handle::{AssociatedInterfacePtrInfo, AssociatedInterfaceRequest};
pub use interface_id::InterfaceId;
pub use message::{
    validate_message_header, validate_request_expecting_response,
    validate_request_without_response, validate_response, EmptyPayload, Message, MessageFlags,
    MessageHeader, HEADER_V0_SIZE, HEADER_V1_SIZE,
};
pub use structs::{StructHeader, StructVersion, WireStruct};
pub use union::WireUnion;
pub use validation::{ValidationContext, INVALID_HANDLE_INDEX, MAX_RECURSION_DEPTH};

pub use ipcmux_transport::Handle;
