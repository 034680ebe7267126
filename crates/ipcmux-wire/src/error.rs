/// Reasons an inbound message is rejected.
///
/// Every variant is detected locally from untrusted bytes. A message that
/// fails validation is never partially trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// An object does not start on an 8-byte boundary.
    #[error("misaligned object")]
    MisalignedObject,

    /// An object lies outside the unclaimed part of the message, or overlaps
    /// an object claimed earlier.
    #[error("illegal memory range")]
    IllegalMemoryRange,

    /// A struct header is too small or does not match any known version.
    #[error("unexpected struct header")]
    UnexpectedStructHeader,

    /// An array header is inconsistent with its element count.
    #[error("unexpected array header")]
    UnexpectedArrayHeader,

    /// An inlined union header has an unexpected size.
    #[error("unexpected union header")]
    UnexpectedUnionHeader,

    /// A pointer's decoded target does not fit in the address space.
    #[error("illegal pointer")]
    IllegalPointer,

    /// A non-nullable pointer is null.
    #[error("unexpected null pointer")]
    UnexpectedNullPointer,

    /// A handle index is out of range or not strictly increasing.
    #[error("illegal handle")]
    IllegalHandle,

    /// A non-nullable handle is invalid.
    #[error("unexpected invalid handle")]
    UnexpectedInvalidHandle,

    /// An interface id refers to the primary interface or is otherwise not
    /// usable as an associated endpoint.
    #[error("illegal interface id")]
    IllegalInterfaceId,

    /// A non-nullable interface id is invalid.
    #[error("unexpected invalid interface id")]
    UnexpectedInvalidInterfaceId,

    /// A union carries a tag the receiver does not know.
    #[error("unknown union tag")]
    UnknownUnionTag,

    /// A fixed-size array has the wrong number of elements.
    #[error("unexpected array length")]
    UnexpectedArrayLength,

    /// A string is not valid UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// The message header combines flags that exclude each other.
    #[error("message header has invalid flags")]
    MessageHeaderInvalidFlags,

    /// The message header needs a request id but has none.
    #[error("message header is missing a request id")]
    MessageHeaderMissingRequestId,

    /// The message name is not known to the receiving interface.
    #[error("message header has an unknown method")]
    MessageHeaderUnknownMethod,

    /// The message is shorter than its header.
    #[error("message too short")]
    MessageTooShort,

    /// Nested objects exceed the recursion ceiling.
    #[error("max recursion depth exceeded")]
    MaxRecursionDepth,

    /// The key and value arrays of a map differ in length.
    #[error("differently sized arrays in map")]
    DifferentSizedArraysInMap,
}

impl ValidationError {
    /// Stable, log-friendly name of the error.
    pub fn code(self) -> &'static str {
        match self {
            ValidationError::MisalignedObject => "VALIDATION_ERROR_MISALIGNED_OBJECT",
            ValidationError::IllegalMemoryRange => "VALIDATION_ERROR_ILLEGAL_MEMORY_RANGE",
            ValidationError::UnexpectedStructHeader => "VALIDATION_ERROR_UNEXPECTED_STRUCT_HEADER",
            ValidationError::UnexpectedArrayHeader => "VALIDATION_ERROR_UNEXPECTED_ARRAY_HEADER",
            ValidationError::UnexpectedUnionHeader => "VALIDATION_ERROR_UNEXPECTED_UNION_HEADER",
            ValidationError::IllegalPointer => "VALIDATION_ERROR_ILLEGAL_POINTER",
            ValidationError::UnexpectedNullPointer => "VALIDATION_ERROR_UNEXPECTED_NULL_POINTER",
            ValidationError::IllegalHandle => "VALIDATION_ERROR_ILLEGAL_HANDLE",
            ValidationError::UnexpectedInvalidHandle => "VALIDATION_ERROR_UNEXPECTED_INVALID_HANDLE",
            ValidationError::IllegalInterfaceId => "VALIDATION_ERROR_ILLEGAL_INTERFACE_ID",
            ValidationError::UnexpectedInvalidInterfaceId => {
                "VALIDATION_ERROR_UNEXPECTED_INVALID_INTERFACE_ID"
            }
            ValidationError::UnknownUnionTag => "VALIDATION_ERROR_UNKNOWN_UNION_TAG",
            ValidationError::UnexpectedArrayLength => "VALIDATION_ERROR_UNEXPECTED_ARRAY_LENGTH",
            ValidationError::InvalidUtf8 => "VALIDATION_ERROR_INVALID_UTF8",
            ValidationError::MessageHeaderInvalidFlags => {
                "VALIDATION_ERROR_MESSAGE_HEADER_INVALID_FLAGS"
            }
            ValidationError::MessageHeaderMissingRequestId => {
                "VALIDATION_ERROR_MESSAGE_HEADER_MISSING_REQUEST_ID"
            }
            ValidationError::MessageHeaderUnknownMethod => {
                "VALIDATION_ERROR_MESSAGE_HEADER_UNKNOWN_METHOD"
            }
            ValidationError::MessageTooShort => "VALIDATION_ERROR_MESSAGE_TOO_SHORT",
            ValidationError::MaxRecursionDepth => "VALIDATION_ERROR_MAX_RECURSION_DEPTH",
            ValidationError::DifferentSizedArraysInMap => {
                "VALIDATION_ERROR_DIFFERENT_SIZED_ARRAYS_IN_MAP"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_prefixed() {
        let all = [
            ValidationError::MisalignedObject,
            ValidationError::IllegalMemoryRange,
            ValidationError::UnexpectedStructHeader,
            ValidationError::UnexpectedArrayHeader,
            ValidationError::UnexpectedUnionHeader,
            ValidationError::IllegalPointer,
            ValidationError::UnexpectedNullPointer,
            ValidationError::IllegalHandle,
            ValidationError::UnexpectedInvalidHandle,
            ValidationError::IllegalInterfaceId,
            ValidationError::UnexpectedInvalidInterfaceId,
            ValidationError::UnknownUnionTag,
            ValidationError::UnexpectedArrayLength,
            ValidationError::InvalidUtf8,
            ValidationError::MessageHeaderInvalidFlags,
            ValidationError::MessageHeaderMissingRequestId,
            ValidationError::MessageHeaderUnknownMethod,
            ValidationError::MessageTooShort,
            ValidationError::MaxRecursionDepth,
            ValidationError::DifferentSizedArraysInMap,
        ];
        let mut codes: Vec<_> = all.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|c| c.starts_with("VALIDATION_ERROR_")));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
